//! The coverage agent.
//!
//! ```bash
//! java -agentpath:./libargcov_agent.so=output=coverage.txt,include=prefix=com.acme. MyApp
//! ```
//!
//! Life cycle:
//!
//! 1. `on_load`: logging, [`Config`], [`Runtime`], capabilities and events.
//! 2. `vm_init`: defines the collector class in the bootstrap loader and binds
//!    its `record` native to [`bridge::native_record`]. Classes loaded before
//!    this point are left alone.
//! 3. `class_file_load_hook`: rewrites accepted methods.
//! 4. `class_prepare` / `field_modification`: field coverage, when enabled.
//! 5. `vm_death`: writes the coverage file.

use std::collections::HashMap;
use std::ffi::CStr;
use std::os::raw::{c_char, c_uchar};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};
use tracing_subscriber::EnvFilter;

use crate::bridge;
use crate::classfile::ClassFile;
use crate::codec::CodecRegistry;
use crate::config::Config;
use crate::error::Result;
use crate::instrument::{COLLECTOR_CLASS, RECORD_DESCRIPTOR, RECORD_METHOD};
use crate::jni_wrapper::JniEnv;
use crate::jvmti_wrapper::Jvmti;
use crate::predicate::{AccessFlags, MemberInfo};
use crate::runtime::{self, Runtime};
use crate::store::MemberKey;
use crate::sys::{jni, jvmti};
use crate::{get_default_callbacks, Agent};

const DEFAULT_LOG_FILTER: &str = "argcov=info";

/// A field with a modification watch, keyed by its `jfieldID`.
#[derive(Debug, Clone)]
struct WatchedField {
    owner: String,
    member: String,
    descriptor: String,
}

/// Records argument values of instrumented methods and, with `fields=true`,
/// values written to watched fields.
#[derive(Default)]
pub struct ArgCoverageAgent {
    jvmti: OnceLock<Jvmti>,
    collector_ready: AtomicBool,
    watched: Mutex<HashMap<usize, WatchedField>>,
}

/// `Lcom/acme/Service;` to `com.acme.Service`.
pub fn binary_name(class_signature: &str) -> Option<String> {
    let internal = class_signature.strip_prefix('L')?.strip_suffix(';')?;
    Some(internal.replace('/', "."))
}

/// Installs the global subscriber. A second call, or a host that already
/// installed one, is left alone.
pub fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}

impl ArgCoverageAgent {
    fn runtime(&self) -> Option<&'static Runtime> {
        runtime::global()
    }

    fn start(&self, vm: *mut jni::JavaVM, options: &str) -> Result<()> {
        let config = match Config::load(options) {
            Ok(config) => config,
            Err(error) => {
                init_tracing(DEFAULT_LOG_FILTER);
                return Err(error.into());
            }
        };
        init_tracing(&config.log);

        let fields = config.fields;
        let runtime = runtime::install(Runtime::start(config, &CodecRegistry::with_defaults())?)?;
        debug!(config = ?runtime.config(), "configuration loaded");

        let jvmti = Jvmti::new(vm)?;
        debug!(phase = jvmti.get_phase()?, "agent loading");

        let mut caps = jvmti::jvmtiCapabilities::default();
        caps.set_can_generate_all_class_hook_events(true);
        if fields {
            caps.set_can_generate_field_modification_events(true);
        }
        jvmti.add_capabilities(&caps)?;
        jvmti.set_event_callbacks(get_default_callbacks())?;

        let mut events = vec![
            jvmti::JVMTI_EVENT_VM_INIT,
            jvmti::JVMTI_EVENT_VM_DEATH,
            jvmti::JVMTI_EVENT_CLASS_FILE_LOAD_HOOK,
        ];
        if fields {
            events.extend([jvmti::JVMTI_EVENT_CLASS_PREPARE, jvmti::JVMTI_EVENT_FIELD_MODIFICATION]);
        }
        for event in events {
            jvmti.set_event_notification_mode(true, event, std::ptr::null_mut())?;
        }

        let _ = self.jvmti.set(jvmti);
        Ok(())
    }

    fn define_collector(&self, env: &JniEnv) -> Result<()> {
        let mut class = ClassFile::new_class(
            COLLECTOR_CLASS,
            "java/lang/Object",
            (AccessFlags::PUBLIC | AccessFlags::SUPER).bits(),
        )?;
        class.add_native_method(
            (AccessFlags::PUBLIC | AccessFlags::STATIC | AccessFlags::NATIVE).bits(),
            RECORD_METHOD,
            RECORD_DESCRIPTOR,
        )?;

        let defined = env.define_class(COLLECTOR_CLASS, std::ptr::null_mut(), &class.to_bytes())?;
        env.register_natives(defined, &[bridge::record_native_method()])?;
        env.delete_local_ref(defined);
        bridge::prepare(env)?;
        Ok(())
    }

    fn transform(
        &self,
        runtime: &Runtime,
        jvmti: &Jvmti,
        name: &str,
        class_data: &[u8],
    ) -> Result<Option<(*mut u8, jni::jint)>> {
        let outcome = runtime.instrumenter().instrument_class(class_data, runtime.collector().as_ref())?;
        if !outcome.failures.is_empty() {
            debug!(class = name, failed = outcome.failures.len(), "members left uninstrumented");
        }
        match outcome.bytes {
            Some(bytes) => Ok(Some(jvmti.allocate_copy(&bytes)?)),
            None => Ok(None),
        }
    }

    fn watch_fields(&self, runtime: &Runtime, jvmti: &Jvmti, klass: jni::jclass) -> Result<()> {
        let Some(owner) = binary_name(&jvmti.get_class_signature(klass)?) else {
            return Ok(());
        };
        for field in jvmti.get_class_fields(klass)? {
            let (name, descriptor) = jvmti.get_field_name(klass, field)?;
            let modifiers = jvmti.get_field_modifiers(klass, field)?;
            let info = MemberInfo::new(AccessFlags::from_bits_retain(modifiers as u16), &owner, &name, &descriptor);
            if !runtime.instrumenter().accepts(&info) {
                continue;
            }
            jvmti.set_field_modification_watch(klass, field)?;
            let key = MemberKey::field(&owner, &name, &descriptor);
            runtime.collector().declare(&key.owner, &key.member);
            trace!(field = %key, "watching");
            self.watched.lock().insert(
                field as usize,
                WatchedField { owner: key.owner, member: key.member, descriptor },
            );
        }
        Ok(())
    }
}

impl Agent for ArgCoverageAgent {
    fn on_load(&self, vm: *mut jni::JavaVM, options: &str) -> jni::jint {
        match self.start(vm, options) {
            Ok(()) => {
                info!(options, "argcov loaded");
                jni::JNI_OK
            }
            Err(e) => {
                error!(error = %e, "argcov failed to start");
                jni::JNI_ERR
            }
        }
    }

    fn on_unload(&self) {
        debug!("argcov unloaded");
    }

    fn vm_init(&self, jni: *mut jni::JNIEnv, _thread: jni::jthread) {
        let env = unsafe { JniEnv::from_raw(jni) };
        match self.define_collector(&env) {
            Ok(()) => {
                self.collector_ready.store(true, Ordering::Release);
                debug!(class = COLLECTOR_CLASS, "collector bound");
            }
            Err(e) => error!(error = %e, "collector class unavailable, no methods will be instrumented"),
        }
    }

    fn vm_death(&self, _jni: *mut jni::JNIEnv) {
        self.collector_ready.store(false, Ordering::Release);
        let Some(runtime) = self.runtime() else {
            return;
        };
        if let Err(e) = runtime.session().finish() {
            error!(error = %e, "failed to write coverage");
        }
    }

    fn class_file_load_hook(
        &self,
        _jni: *mut jni::JNIEnv,
        _class_being_redefined: jni::jclass,
        _loader: jni::jobject,
        name: *const c_char,
        _protection_domain: jni::jobject,
        class_data_len: jni::jint,
        class_data: *const c_uchar,
        new_class_data_len: *mut jni::jint,
        new_class_data: *mut *mut c_uchar,
    ) {
        if !self.collector_ready.load(Ordering::Acquire) || class_data.is_null() || class_data_len <= 0 {
            return;
        }
        let (Some(runtime), Some(jvmti)) = (self.runtime(), self.jvmti.get()) else {
            return;
        };

        let class_name = if name.is_null() {
            "<unknown>".to_string()
        } else {
            unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned()
        };
        if class_name == COLLECTOR_CLASS {
            return;
        }

        let bytes = unsafe { std::slice::from_raw_parts(class_data, class_data_len as usize) };
        match self.transform(runtime, jvmti, &class_name, bytes) {
            Ok(Some((data, len))) => unsafe {
                *new_class_data = data;
                *new_class_data_len = len;
            },
            Ok(None) => {}
            Err(e) => warn!(class = %class_name, error = %e, "class left unchanged"),
        }
    }

    fn class_prepare(&self, _jni: *mut jni::JNIEnv, _thread: jni::jthread, klass: jni::jclass) {
        let (Some(runtime), Some(jvmti)) = (self.runtime(), self.jvmti.get()) else {
            return;
        };
        if let Err(e) = self.watch_fields(runtime, jvmti, klass) {
            debug!(error = %e, "field watches not installed");
        }
    }

    fn field_modification(
        &self,
        jni: *mut jni::JNIEnv,
        _thread: jni::jthread,
        _method: jni::jmethodID,
        _location: jvmti::jlocation,
        _field_klass: jni::jclass,
        _object: jni::jobject,
        field: jni::jfieldID,
        sig_type: c_char,
        new_value: jni::jvalue,
    ) {
        let Some(runtime) = self.runtime() else {
            return;
        };
        let Some(watched) = self.watched.lock().get(&(field as usize)).cloned() else {
            return;
        };
        let env = unsafe { JniEnv::from_raw(jni) };
        runtime.collector().record_with(&watched.owner, &watched.member, &watched.descriptor, || {
            vec![bridge::field_value(&env, sig_type, new_value)]
        });
        env.take_exception();
    }
}
