// argcov/src/jvmti_wrapper.rs
use std::ffi::CStr;
use std::os::raw::c_char;
use std::ptr;

use crate::error::{Error, Result};
use crate::sys::jni;
use crate::sys::jvmti;

/// A JVMTI environment pointer.
pub struct Jvmti {
    env: *mut jvmti::jvmtiEnv,
}

// A JVMTI environment is not bound to the thread that obtained it.
unsafe impl Send for Jvmti {}
unsafe impl Sync for Jvmti {}

fn check(call: &'static str, code: jvmti::jvmtiError) -> Result<()> {
    if code == jvmti::JVMTI_ERROR_NONE {
        Ok(())
    } else {
        Err(Error::Jvmti { call, code })
    }
}

/// Looks up a table slot; an empty slot is reported as `NOT_AVAILABLE`.
fn function<F>(call: &'static str, slot: Option<F>) -> Result<F> {
    slot.ok_or(Error::Jvmti { call, code: jvmti::JVMTI_ERROR_NOT_AVAILABLE })
}

impl Jvmti {
    /// Obtains a JVMTI 1.2 environment from the VM.
    pub fn new(vm: *mut jni::JavaVM) -> Result<Self> {
        let mut env_ptr: *mut std::ffi::c_void = ptr::null_mut();
        let res = unsafe { ((**vm).GetEnv)(vm, &mut env_ptr, jvmti::JVMTI_VERSION_1_2) };
        if res != jni::JNI_OK || env_ptr.is_null() {
            return Err(Error::Jni { call: "GetEnv" });
        }
        Ok(Jvmti { env: env_ptr as *mut jvmti::jvmtiEnv })
    }

    /// # Safety
    /// The pointer must be a live JVMTI environment.
    pub unsafe fn from_raw(env: *mut jvmti::jvmtiEnv) -> Self {
        Jvmti { env }
    }

    pub fn raw(&self) -> *mut jvmti::jvmtiEnv {
        self.env
    }

    fn functions(&self) -> &jvmti::jvmtiInterface_1_ {
        unsafe { &*(*self.env).functions }
    }

    pub fn add_capabilities(&self, caps: &jvmti::jvmtiCapabilities) -> Result<()> {
        let f = function("AddCapabilities", self.functions().AddCapabilities)?;
        check("AddCapabilities", unsafe { f(self.env, caps) })
    }

    pub fn set_event_callbacks(&self, callbacks: jvmti::jvmtiEventCallbacks) -> Result<()> {
        let f = function("SetEventCallbacks", self.functions().SetEventCallbacks)?;
        let size = std::mem::size_of::<jvmti::jvmtiEventCallbacks>() as jni::jint;
        check("SetEventCallbacks", unsafe { f(self.env, &callbacks, size) })
    }

    /// `thread` may be null for all threads.
    pub fn set_event_notification_mode(&self, enable: bool, event_type: u32, thread: jni::jthread) -> Result<()> {
        let f = function("SetEventNotificationMode", self.functions().SetEventNotificationMode)?;
        let mode = if enable { jvmti::JVMTI_ENABLE } else { jvmti::JVMTI_DISABLE };
        check("SetEventNotificationMode", unsafe { f(self.env, mode, event_type, thread) })
    }

    pub fn get_phase(&self) -> Result<jni::jint> {
        let f = function("GetPhase", self.functions().GetPhase)?;
        let mut phase: jni::jint = 0;
        check("GetPhase", unsafe { f(self.env, &mut phase) })?;
        Ok(phase)
    }

    pub fn set_field_modification_watch(&self, klass: jni::jclass, field: jni::jfieldID) -> Result<()> {
        let f = function("SetFieldModificationWatch", self.functions().SetFieldModificationWatch)?;
        check("SetFieldModificationWatch", unsafe { f(self.env, klass, field) })
    }

    // =========================================================================
    // Memory
    // =========================================================================

    pub fn allocate(&self, size: jni::jlong) -> Result<*mut u8> {
        let f = function("Allocate", self.functions().Allocate)?;
        let mut mem_ptr: *mut u8 = ptr::null_mut();
        check("Allocate", unsafe { f(self.env, size, &mut mem_ptr) })?;
        Ok(mem_ptr)
    }

    /// Copies `bytes` into JVMTI-owned memory, as class file load hooks must
    /// return their replacement bytes.
    pub fn allocate_copy(&self, bytes: &[u8]) -> Result<(*mut u8, jni::jint)> {
        let len = jni::jint::try_from(bytes.len())
            .map_err(|_| Error::Jvmti { call: "Allocate", code: jvmti::JVMTI_ERROR_NOT_AVAILABLE })?;
        let mem = self.allocate(len.into())?;
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), mem, bytes.len()) };
        Ok((mem, len))
    }

    pub fn deallocate(&self, mem: *mut u8) -> Result<()> {
        if mem.is_null() {
            return Ok(());
        }
        let f = function("Deallocate", self.functions().Deallocate)?;
        check("Deallocate", unsafe { f(self.env, mem) })
    }

    /// Copies and frees a JVMTI-allocated C string.
    fn take_string(&self, s: *mut c_char) -> Result<Option<String>> {
        if s.is_null() {
            return Ok(None);
        }
        let owned = unsafe { CStr::from_ptr(s) }.to_string_lossy().into_owned();
        self.deallocate(s as *mut u8)?;
        Ok(Some(owned))
    }

    // =========================================================================
    // Classes and fields
    // =========================================================================

    /// Type signature of the class, `Lcom/acme/Service;`.
    pub fn get_class_signature(&self, klass: jni::jclass) -> Result<String> {
        let f = function("GetClassSignature", self.functions().GetClassSignature)?;
        let mut sig_ptr: *mut c_char = ptr::null_mut();
        let mut gen_ptr: *mut c_char = ptr::null_mut();
        check("GetClassSignature", unsafe { f(self.env, klass, &mut sig_ptr, &mut gen_ptr) })?;
        self.take_string(gen_ptr)?;
        Ok(self.take_string(sig_ptr)?.unwrap_or_default())
    }

    pub fn get_class_fields(&self, klass: jni::jclass) -> Result<Vec<jni::jfieldID>> {
        let f = function("GetClassFields", self.functions().GetClassFields)?;
        let mut field_count: jni::jint = 0;
        let mut fields_ptr: *mut jni::jfieldID = ptr::null_mut();
        check("GetClassFields", unsafe { f(self.env, klass, &mut field_count, &mut fields_ptr) })?;
        if fields_ptr.is_null() {
            return Ok(Vec::new());
        }
        let fields = unsafe { std::slice::from_raw_parts(fields_ptr, field_count.max(0) as usize) }.to_vec();
        self.deallocate(fields_ptr as *mut u8)?;
        Ok(fields)
    }

    /// Name and type descriptor of a field.
    pub fn get_field_name(&self, klass: jni::jclass, field: jni::jfieldID) -> Result<(String, String)> {
        let f = function("GetFieldName", self.functions().GetFieldName)?;
        let mut name_ptr: *mut c_char = ptr::null_mut();
        let mut sig_ptr: *mut c_char = ptr::null_mut();
        check("GetFieldName", unsafe { f(self.env, klass, field, &mut name_ptr, &mut sig_ptr, ptr::null_mut()) })?;
        let name = self.take_string(name_ptr)?.unwrap_or_default();
        let sig = self.take_string(sig_ptr)?.unwrap_or_default();
        Ok((name, sig))
    }

    pub fn get_field_modifiers(&self, klass: jni::jclass, field: jni::jfieldID) -> Result<jni::jint> {
        let f = function("GetFieldModifiers", self.functions().GetFieldModifiers)?;
        let mut modifiers: jni::jint = 0;
        check("GetFieldModifiers", unsafe { f(self.env, klass, field, &mut modifiers) })?;
        Ok(modifiers)
    }
}
