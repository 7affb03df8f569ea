//! Raw JNI and JVMTI declarations.
//!
//! Only the vtable slots the agent calls are named; everything else is
//! reserved padding so the named slots stay at their JDK offsets.

pub mod jni;
pub mod jvmti;
