// argcov/src/sys/jvmti.rs
//
// JVMTI declarations for class-load instrumentation and field watches.
//
// Function slots are numbered one-based as in the JVMTI specification (the
// first slot is reserved). Slots the agent never calls are padding.

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

use std::os::raw::{c_char, c_uchar, c_void};

use crate::sys::jni::{jclass, jfieldID, jint, jlong, jmethodID, jobject, jthread, jvalue, JNIEnv};

pub const JVMTI_VERSION_1_2: jint = 0x30010200;

pub const JVMTI_EVENT_VM_INIT: u32 = 50;
pub const JVMTI_EVENT_VM_DEATH: u32 = 51;
pub const JVMTI_EVENT_CLASS_FILE_LOAD_HOOK: u32 = 54;
pub const JVMTI_EVENT_CLASS_PREPARE: u32 = 56;
pub const JVMTI_EVENT_FIELD_MODIFICATION: u32 = 64;

pub const JVMTI_PHASE_ONLOAD: jint = 1;
pub const JVMTI_PHASE_PRIMORDIAL: jint = 2;
pub const JVMTI_PHASE_START: jint = 6;
pub const JVMTI_PHASE_LIVE: jint = 4;
pub const JVMTI_PHASE_DEAD: jint = 8;

pub const JVMTI_ENABLE: jint = 1;
pub const JVMTI_DISABLE: jint = 0;

/// Raw `jvmtiError`. Kept as an integer so unknown codes from newer VMs
/// pass through unchanged.
pub type jvmtiError = u32;

pub const JVMTI_ERROR_NONE: jvmtiError = 0;
pub const JVMTI_ERROR_INVALID_CLASS: jvmtiError = 21;
pub const JVMTI_ERROR_DUPLICATE: jvmtiError = 40;
pub const JVMTI_ERROR_NOT_AVAILABLE: jvmtiError = 98;
pub const JVMTI_ERROR_MUST_POSSESS_CAPABILITY: jvmtiError = 99;
pub const JVMTI_ERROR_WRONG_PHASE: jvmtiError = 112;

pub type jlocation = jlong;

// --- Capabilities ---
#[repr(C)]
#[derive(Debug, Copy, Clone, Default)]
pub struct jvmtiCapabilities {
    bits: [u32; 4],
}

impl jvmtiCapabilities {
    fn set_bit(&mut self, bit_offset: usize, value: bool) {
        let word_index = bit_offset / 32;
        let bit_index = bit_offset % 32;
        if value {
            self.bits[word_index] |= 1 << bit_index;
        } else {
            self.bits[word_index] &= !(1 << bit_index);
        }
    }

    fn get_bit(&self, bit_offset: usize) -> bool {
        (self.bits[bit_offset / 32] & (1 << (bit_offset % 32))) != 0
    }

    // [1]
    pub fn set_can_generate_field_modification_events(&mut self, v: bool) { self.set_bit(1, v); }
    pub fn can_generate_field_modification_events(&self) -> bool { self.get_bit(1) }

    // [26]
    pub fn set_can_generate_all_class_hook_events(&mut self, v: bool) { self.set_bit(26, v); }
    pub fn can_generate_all_class_hook_events(&self) -> bool { self.get_bit(26) }

    // [42] (Java 9+)
    pub fn set_can_generate_early_class_hook_events(&mut self, v: bool) { self.set_bit(42, v); }
    pub fn can_generate_early_class_hook_events(&self) -> bool { self.get_bit(42) }
}

// --- Function typedefs ---
pub type JvmtiSetEventNotificationModeFn =
    unsafe extern "system" fn(env: *mut jvmtiEnv, mode: jint, event_type: u32, event_thread: jthread) -> jvmtiError;
pub type JvmtiSetFieldModificationWatchFn =
    unsafe extern "system" fn(env: *mut jvmtiEnv, klass: jclass, field: jfieldID) -> jvmtiError;
pub type JvmtiAllocateFn = unsafe extern "system" fn(env: *mut jvmtiEnv, size: jlong, mem_ptr: *mut *mut c_uchar) -> jvmtiError;
pub type JvmtiDeallocateFn = unsafe extern "system" fn(env: *mut jvmtiEnv, mem: *mut c_uchar) -> jvmtiError;
pub type JvmtiGetClassSignatureFn = unsafe extern "system" fn(
    env: *mut jvmtiEnv,
    klass: jclass,
    signature_ptr: *mut *mut c_char,
    generic_ptr: *mut *mut c_char,
) -> jvmtiError;
pub type JvmtiGetClassFieldsFn = unsafe extern "system" fn(
    env: *mut jvmtiEnv,
    klass: jclass,
    field_count_ptr: *mut jint,
    fields_ptr: *mut *mut jfieldID,
) -> jvmtiError;
pub type JvmtiGetFieldNameFn = unsafe extern "system" fn(
    env: *mut jvmtiEnv,
    klass: jclass,
    field: jfieldID,
    name_ptr: *mut *mut c_char,
    signature_ptr: *mut *mut c_char,
    generic_ptr: *mut *mut c_char,
) -> jvmtiError;
pub type JvmtiGetFieldModifiersFn =
    unsafe extern "system" fn(env: *mut jvmtiEnv, klass: jclass, field: jfieldID, modifiers_ptr: *mut jint) -> jvmtiError;
pub type JvmtiSetEventCallbacksFn = unsafe extern "system" fn(
    env: *mut jvmtiEnv,
    callbacks: *const jvmtiEventCallbacks,
    size_of_callbacks: jint,
) -> jvmtiError;
pub type JvmtiGetPhaseFn = unsafe extern "system" fn(env: *mut jvmtiEnv, phase_ptr: *mut jint) -> jvmtiError;
pub type JvmtiAddCapabilitiesFn =
    unsafe extern "system" fn(env: *mut jvmtiEnv, capabilities_ptr: *const jvmtiCapabilities) -> jvmtiError;

// --- Event callback typedefs ---
pub type JvmtiVMInitFn = unsafe extern "system" fn(jvmti_env: *mut jvmtiEnv, jni_env: *mut JNIEnv, thread: jthread);
pub type JvmtiVMDeathFn = unsafe extern "system" fn(jvmti_env: *mut jvmtiEnv, jni_env: *mut JNIEnv);
pub type JvmtiClassFileLoadHookFn = unsafe extern "system" fn(
    jvmti_env: *mut jvmtiEnv,
    jni_env: *mut JNIEnv,
    class_being_redefined: jclass,
    loader: jobject,
    name: *const c_char,
    protection_domain: jobject,
    class_data_len: jint,
    class_data: *const c_uchar,
    new_class_data_len: *mut jint,
    new_class_data: *mut *mut c_uchar,
);
pub type JvmtiClassPrepareFn =
    unsafe extern "system" fn(jvmti_env: *mut jvmtiEnv, jni_env: *mut JNIEnv, thread: jthread, klass: jclass);
pub type JvmtiFieldModificationFn = unsafe extern "system" fn(
    jvmti_env: *mut jvmtiEnv,
    jni_env: *mut JNIEnv,
    thread: jthread,
    method: jmethodID,
    location: jlocation,
    field_klass: jclass,
    object: jobject,
    field: jfieldID,
    signature_type: c_char,
    new_value: jvalue,
);

type Reserved = *mut c_void;
type UnusedCallback = Option<unsafe extern "system" fn()>;

/// The JVMTI function table (156 slots).
#[repr(C)]
pub struct jvmtiInterface_1_ {
    /*   1: RESERVED */
    pub reserved1: Reserved,
    /*   2: Set Event Notification Mode */
    pub SetEventNotificationMode: Option<JvmtiSetEventNotificationModeFn>,
    /*   3-42 */
    pub _pad3: [Reserved; 40],
    /*  43: Set Field Modification Watch */
    pub SetFieldModificationWatch: Option<JvmtiSetFieldModificationWatchFn>,
    /*  44-45 */
    pub _pad44: [Reserved; 2],
    /*  46: Allocate */
    pub Allocate: Option<JvmtiAllocateFn>,
    /*  47: Deallocate */
    pub Deallocate: Option<JvmtiDeallocateFn>,
    /*  48: Get Class Signature */
    pub GetClassSignature: Option<JvmtiGetClassSignatureFn>,
    /*  49-52 */
    pub _pad49: [Reserved; 4],
    /*  53: Get Class Fields */
    pub GetClassFields: Option<JvmtiGetClassFieldsFn>,
    /*  54-59 */
    pub _pad54: [Reserved; 6],
    /*  60: Get Field Name (and Signature) */
    pub GetFieldName: Option<JvmtiGetFieldNameFn>,
    /*  61 */
    pub _pad61: Reserved,
    /*  62: Get Field Modifiers */
    pub GetFieldModifiers: Option<JvmtiGetFieldModifiersFn>,
    /*  63-121 */
    pub _pad63: [Reserved; 59],
    /* 122: Set Event Callbacks */
    pub SetEventCallbacks: Option<JvmtiSetEventCallbacksFn>,
    /* 123-132 */
    pub _pad123: [Reserved; 10],
    /* 133: Get Phase */
    pub GetPhase: Option<JvmtiGetPhaseFn>,
    /* 134-141 */
    pub _pad134: [Reserved; 8],
    /* 142: Add Capabilities */
    pub AddCapabilities: Option<JvmtiAddCapabilitiesFn>,
    /* 143-156 */
    pub _pad143: [Reserved; 14],
}

#[repr(C)]
pub struct jvmtiEnv {
    pub functions: *const jvmtiInterface_1_,
}

/// Event callbacks up to `FieldModification`. The VM accepts a shorter
/// table and treats the missing entries as unset.
#[repr(C)]
#[derive(Copy, Clone, Default, Debug)]
pub struct jvmtiEventCallbacks {
    pub VMInit: Option<JvmtiVMInitFn>,
    pub VMDeath: Option<JvmtiVMDeathFn>,
    pub ThreadStart: UnusedCallback,
    pub ThreadEnd: UnusedCallback,
    pub ClassFileLoadHook: Option<JvmtiClassFileLoadHookFn>,
    pub ClassLoad: UnusedCallback,
    pub ClassPrepare: Option<JvmtiClassPrepareFn>,
    pub VMStart: UnusedCallback,
    pub Exception: UnusedCallback,
    pub ExceptionCatch: UnusedCallback,
    pub SingleStep: UnusedCallback,
    pub FramePop: UnusedCallback,
    pub Breakpoint: UnusedCallback,
    pub FieldAccess: UnusedCallback,
    pub FieldModification: Option<JvmtiFieldModificationFn>,
}
