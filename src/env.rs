//! Environment wrappers for JVMTI and JNI.
//!
//! [`Jvmti`] covers capabilities, event wiring, field watches and JVMTI
//! memory. [`JniEnv`] covers class definition, native registration and the
//! calls the collector bridge makes to read argument values.
//!
//! ```rust,ignore
//! use argcov::prelude::*;
//!
//! fn on_load(vm: *mut jni::JavaVM) -> argcov::Result<()> {
//!     let jvmti = Jvmti::new(vm)?;
//!     let mut caps = jvmti::jvmtiCapabilities::default();
//!     caps.set_can_generate_all_class_hook_events(true);
//!     jvmti.add_capabilities(&caps)?;
//!     jvmti.set_event_callbacks(get_default_callbacks())?;
//!     Ok(())
//! }
//! ```
//!
//! [`LocalRef`] deletes a local reference when it goes out of scope; the
//! bridge wraps every object it pulls out of an argument array in one.

pub use crate::jni_wrapper::{JniEnv, LocalRef};
pub use crate::jvmti_wrapper::Jvmti;
