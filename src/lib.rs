//! # argcov
//!
//! Argument and field value coverage for the JVM, as a JVMTI agent written in
//! Rust.
//!
//! Every method the configured rules select is rewritten at class-load time
//! so that its entry hands the actual argument values to a collector. The
//! collector keeps the distinct argument tuples per method, in first-seen
//! order, and writes them out when the VM exits:
//!
//! ```text
//! com.acme.Service#handle(ILjava/lang/String;)V
//!  -> [5, x]
//!  -> [6, y]
//! com.acme.Service#retries:I
//! ```
//!
//! A member with no continuation lines was loaded but never observed.
//!
//! ## Quick Start
//!
//! **1. Create the agent crate** from `templates/agent-starter`, or by hand:
//!
//! ```toml
//! [lib]
//! crate-type = ["cdylib"]
//!
//! [dependencies]
//! argcov = "0.4"
//! ```
//!
//! **2. Export the agent (src/lib.rs):**
//! ```rust,ignore
//! argcov::export_agent!(argcov::agent::ArgCoverageAgent);
//! ```
//!
//! **3. Run:**
//! ```bash
//! java -agentpath:./libargcov_agent.so=output=coverage.txt,include=prefix=com.acme. MyApp
//! ```
//!
//! Options and `ARGCOV_*` environment variables are listed in [`config`].
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │            agent::ArgCoverageAgent, bridge               │
//! │   class load hook, field watches, native record()        │
//! ├─────────────────────────────────────────────────────────┤
//! │        instrument, bytecode, classfile, signature        │
//! │   capture prefix, slot accounting, offset shifting       │
//! ├─────────────────────────────────────────────────────────┤
//! │       runtime, collector, guard, store, codec, config    │
//! │   one run: dedup, reentrancy, coverage file I/O          │
//! ├─────────────────────────────────────────────────────────┤
//! │        Agent trait, export_agent!, env, sys              │
//! │   JVMTI/JNI entry points and vtables                     │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything above the bottom layer except `agent` and `bridge` is plain
//! Rust and usable without a VM; the tests drive the instrumenter with
//! class files built in memory and the collector directly.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`signature`] | method and field descriptors, slot layout |
//! | [`predicate`] | which members get instrumented |
//! | [`classfile`] | class file reader and writer |
//! | [`bytecode`] | instruction decoding and encoding |
//! | [`instrument`] | method entry rewriting |
//! | [`collector`] | the process-wide sink |
//! | [`store`] | observations and the coverage file format |
//! | [`codec`] | pluggable value serialization |
//! | [`runtime`] | configuration to saved file |

pub mod error;

pub mod signature;
pub mod predicate;
pub mod bytecode;
pub mod classfile;
pub mod instrument;

pub mod guard;
pub mod store;
pub mod codec;
pub mod collector;
pub mod config;
pub mod runtime;

pub mod agent;
pub mod bridge;

pub mod sys;
pub mod env;
pub mod prelude;

// Implementation modules (use `env` module for the public API)
#[doc(hidden)]
pub mod jvmti_wrapper;
#[doc(hidden)]
pub mod jni_wrapper;

pub use error::{Error, Result};

use std::sync::OnceLock;
pub use crate::sys::jni;
use crate::sys::jvmti;

/// A JVMTI agent. Implement it and hand the type to [`export_agent!`].
///
/// Only the events the coverage agent needs are routed. All methods except
/// [`on_load`](Agent::on_load) default to no-ops.
///
/// Events fire on arbitrary VM threads, hence `Sync + Send`.
pub trait Agent: Sync + Send {
    /// Called from `Agent_OnLoad`. Request capabilities and enable events
    /// here. Return `JNI_OK`, or `JNI_ERR` to abort VM start-up.
    fn on_load(&self, vm: *mut jni::JavaVM, options: &str) -> jni::jint;

    fn on_unload(&self) {}

    /// JNI is fully usable from here on.
    fn vm_init(&self, _jni: *mut jni::JNIEnv, _thread: jni::jthread) {}

    /// Last event with a usable JNI environment.
    fn vm_death(&self, _jni: *mut jni::JNIEnv) {}

    /// Class bytes are about to be defined. To replace them, allocate with
    /// JVMTI `Allocate`, copy, and set both out-parameters.
    fn class_file_load_hook(&self, _jni: *mut jni::JNIEnv, _class_being_redefined: jni::jclass,
                            _loader: jni::jobject, _name: *const std::os::raw::c_char,
                            _protection_domain: jni::jobject, _class_data_len: jni::jint,
                            _class_data: *const std::os::raw::c_uchar,
                            _new_class_data_len: *mut jni::jint,
                            _new_class_data: *mut *mut std::os::raw::c_uchar) {}

    /// The class is linked; its fields and methods can be queried.
    fn class_prepare(&self, _jni: *mut jni::JNIEnv, _thread: jni::jthread, _klass: jni::jclass) {}

    /// A watched field is about to be written.
    /// Requires `can_generate_field_modification_events`.
    fn field_modification(&self, _jni: *mut jni::JNIEnv, _thread: jni::jthread, _method: jni::jmethodID,
                          _location: jvmti::jlocation, _field_klass: jni::jclass, _object: jni::jobject,
                          _field: jni::jfieldID, _sig_type: std::os::raw::c_char, _new_value: jni::jvalue) {}
}

#[doc(hidden)]
pub static GLOBAL_AGENT: OnceLock<Box<dyn Agent>> = OnceLock::new();

/// Installs the process-wide agent. Fails if one is already set.
pub fn set_global_agent(agent: Box<dyn Agent>) -> std::result::Result<(), Box<dyn Agent>> {
    GLOBAL_AGENT.set(agent)
}

// =============================================================================
// Trampolines
// =============================================================================

unsafe extern "system" fn trampoline_vm_init(_env: *mut jvmti::jvmtiEnv, jni: *mut jni::JNIEnv, thread: jni::jthread) {
    if let Some(agent) = GLOBAL_AGENT.get() { agent.vm_init(jni, thread); }
}
unsafe extern "system" fn trampoline_vm_death(_env: *mut jvmti::jvmtiEnv, jni: *mut jni::JNIEnv) {
    if let Some(agent) = GLOBAL_AGENT.get() { agent.vm_death(jni); }
}
unsafe extern "system" fn trampoline_class_file_load_hook(
    _env: *mut jvmti::jvmtiEnv, jni: *mut jni::JNIEnv, class_being_redefined: jni::jclass,
    loader: jni::jobject, name: *const std::os::raw::c_char, protection_domain: jni::jobject,
    class_data_len: jni::jint, class_data: *const std::os::raw::c_uchar,
    new_class_data_len: *mut jni::jint, new_class_data: *mut *mut std::os::raw::c_uchar
) {
    if let Some(agent) = GLOBAL_AGENT.get() {
        agent.class_file_load_hook(jni, class_being_redefined, loader, name, protection_domain,
                                   class_data_len, class_data, new_class_data_len, new_class_data);
    }
}
unsafe extern "system" fn trampoline_class_prepare(_env: *mut jvmti::jvmtiEnv, jni: *mut jni::JNIEnv, thread: jni::jthread, klass: jni::jclass) {
    if let Some(agent) = GLOBAL_AGENT.get() { agent.class_prepare(jni, thread, klass); }
}
unsafe extern "system" fn trampoline_field_modification(
    _env: *mut jvmti::jvmtiEnv, jni: *mut jni::JNIEnv, thread: jni::jthread, method: jni::jmethodID,
    location: jvmti::jlocation, field_klass: jni::jclass, object: jni::jobject, field: jni::jfieldID,
    sig_type: std::os::raw::c_char, new_value: jni::jvalue
) {
    if let Some(agent) = GLOBAL_AGENT.get() {
        agent.field_modification(jni, thread, method, location, field_klass, object, field, sig_type, new_value);
    }
}

/// Callbacks that route every supported event to the global [`Agent`].
/// Events still have to be enabled one by one.
pub fn get_default_callbacks() -> jvmti::jvmtiEventCallbacks {
    jvmti::jvmtiEventCallbacks {
        VMInit: Some(trampoline_vm_init),
        VMDeath: Some(trampoline_vm_death),
        ClassFileLoadHook: Some(trampoline_class_file_load_hook),
        ClassPrepare: Some(trampoline_class_prepare),
        FieldModification: Some(trampoline_field_modification),
        ..jvmti::jvmtiEventCallbacks::default()
    }
}

/// Generates `Agent_OnLoad` and `Agent_OnUnload` for an [`Agent`] type that
/// also implements [`Default`].
///
/// ```rust,ignore
/// argcov::export_agent!(argcov::agent::ArgCoverageAgent);
/// ```
///
/// The crate must be built as a `cdylib`. Everything after `=` in
/// `-agentpath:lib.so=...` is passed to [`Agent::on_load`].
#[macro_export]
macro_rules! export_agent {
    ($agent_type:ty) => {
        #[no_mangle]
        pub unsafe extern "system" fn Agent_OnLoad(
            vm: *mut $crate::sys::jni::JavaVM,
            options: *mut std::ffi::c_char,
            _reserved: *mut std::ffi::c_void,
        ) -> $crate::sys::jni::jint {
            let agent = Box::new(<$agent_type>::default());
            if $crate::set_global_agent(agent).is_err() {
                return $crate::sys::jni::JNI_ERR;
            }

            let options_str = if options.is_null() {
                std::borrow::Cow::Borrowed("")
            } else {
                std::ffi::CStr::from_ptr(options).to_string_lossy()
            };

            match $crate::GLOBAL_AGENT.get() {
                Some(global_agent) => global_agent.on_load(vm, &options_str),
                None => $crate::sys::jni::JNI_ERR,
            }
        }

        #[no_mangle]
        pub unsafe extern "system" fn Agent_OnUnload(_vm: *mut $crate::sys::jni::JavaVM) {
            if let Some(agent) = $crate::GLOBAL_AGENT.get() {
                agent.on_unload();
            }
        }
    };
}
