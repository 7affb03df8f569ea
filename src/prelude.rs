//! Common imports for embedding the coverage agent.
//!
//! Small on purpose: the agent plumbing plus the types needed to configure a
//! run and read its results.

pub use crate::agent::ArgCoverageAgent;
pub use crate::codec::{CodecRegistry, ValueCodec};
pub use crate::collector::{Collector, CollectorMode, RecordOutcome};
pub use crate::config::Config;
pub use crate::env::{JniEnv, Jvmti, LocalRef};
pub use crate::error::{Error, Result};
pub use crate::export_agent;
pub use crate::get_default_callbacks;
pub use crate::instrument::Instrumenter;
pub use crate::runtime::{CoverageSession, Runtime};
pub use crate::store::{CoverageStore, Observation, Value};
pub use crate::sys::{jni, jvmti};
pub use crate::Agent;
