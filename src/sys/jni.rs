// argcov/src/sys/jni.rs
//
// JNI declarations used by the agent and the native collector bridge.
//
// The function table layout follows jni.h. Slot numbers are zero-based and
// have been stable since JDK 1.6; unused slots are declared as padding.

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

use std::ffi::c_void;
use std::os::raw::c_char;

// =============================================================================
// Primitive Types
// =============================================================================

pub type jint = i32;
pub type jlong = i64;
pub type jbyte = i8;
pub type jboolean = u8;
pub type jchar = u16;
pub type jshort = i16;
pub type jfloat = f32;
pub type jdouble = f64;
pub type jsize = jint;

// =============================================================================
// Reference Types
// =============================================================================

pub type jobject = *mut c_void;
pub type jclass = jobject;
pub type jstring = jobject;
pub type jarray = jobject;
pub type jthread = jobject;
pub type jobjectArray = jarray;

pub type jmethodID = *mut c_void;
pub type jfieldID = *mut c_void;

#[repr(C)]
#[derive(Copy, Clone)]
pub union jvalue {
    pub z: jboolean,
    pub b: jbyte,
    pub c: jchar,
    pub s: jshort,
    pub i: jint,
    pub j: jlong,
    pub f: jfloat,
    pub d: jdouble,
    pub l: jobject,
}

// =============================================================================
// Constants
// =============================================================================

pub const JNI_OK: jint = 0;
pub const JNI_ERR: jint = -1;

pub const JNI_TRUE: jboolean = 1;
pub const JNI_FALSE: jboolean = 0;

#[repr(C)]
pub struct JNINativeMethod {
    pub name: *const c_char,
    pub signature: *const c_char,
    pub fnPtr: *mut c_void,
}

type Reserved = *mut c_void;

// =============================================================================
// JNINativeInterface_ (236 slots in JDK 24+)
// =============================================================================

#[repr(C)]
pub struct JNINativeInterface_ {
    // 0-3
    pub reserved: [Reserved; 4],
    // 4
    pub GetVersion: unsafe extern "system" fn(env: *mut JNIEnv) -> jint,
    // 5
    pub DefineClass: unsafe extern "system" fn(
        env: *mut JNIEnv,
        name: *const c_char,
        loader: jobject,
        buf: *const jbyte,
        len: jsize,
    ) -> jclass,
    // 6
    pub FindClass: unsafe extern "system" fn(env: *mut JNIEnv, name: *const c_char) -> jclass,
    // 7-16
    pub _pad7: [Reserved; 10],
    // 17
    pub ExceptionClear: unsafe extern "system" fn(env: *mut JNIEnv),
    // 18-22
    pub _pad18: [Reserved; 5],
    // 23
    pub DeleteLocalRef: unsafe extern "system" fn(env: *mut JNIEnv, obj: jobject),
    // 24-30
    pub _pad24: [Reserved; 7],
    // 31-33
    pub GetObjectClass: unsafe extern "system" fn(env: *mut JNIEnv, obj: jobject) -> jclass,
    pub IsInstanceOf: unsafe extern "system" fn(env: *mut JNIEnv, obj: jobject, clazz: jclass) -> jboolean,
    pub GetMethodID: unsafe extern "system" fn(
        env: *mut JNIEnv,
        clazz: jclass,
        name: *const c_char,
        sig: *const c_char,
    ) -> jmethodID,
    // 34-35
    pub _pad34: [Reserved; 2],
    // 36
    pub CallObjectMethodA:
        unsafe extern "system" fn(env: *mut JNIEnv, obj: jobject, methodID: jmethodID, args: *const jvalue) -> jobject,
    // 37-38
    pub _pad37: [Reserved; 2],
    // 39
    pub CallBooleanMethodA:
        unsafe extern "system" fn(env: *mut JNIEnv, obj: jobject, methodID: jmethodID, args: *const jvalue) -> jboolean,
    // 40-41
    pub _pad40: [Reserved; 2],
    // 42
    pub CallByteMethodA:
        unsafe extern "system" fn(env: *mut JNIEnv, obj: jobject, methodID: jmethodID, args: *const jvalue) -> jbyte,
    // 43-44
    pub _pad43: [Reserved; 2],
    // 45
    pub CallCharMethodA:
        unsafe extern "system" fn(env: *mut JNIEnv, obj: jobject, methodID: jmethodID, args: *const jvalue) -> jchar,
    // 46-47
    pub _pad46: [Reserved; 2],
    // 48
    pub CallShortMethodA:
        unsafe extern "system" fn(env: *mut JNIEnv, obj: jobject, methodID: jmethodID, args: *const jvalue) -> jshort,
    // 49-50
    pub _pad49: [Reserved; 2],
    // 51
    pub CallIntMethodA:
        unsafe extern "system" fn(env: *mut JNIEnv, obj: jobject, methodID: jmethodID, args: *const jvalue) -> jint,
    // 52-53
    pub _pad52: [Reserved; 2],
    // 54
    pub CallLongMethodA:
        unsafe extern "system" fn(env: *mut JNIEnv, obj: jobject, methodID: jmethodID, args: *const jvalue) -> jlong,
    // 55-56
    pub _pad55: [Reserved; 2],
    // 57
    pub CallFloatMethodA:
        unsafe extern "system" fn(env: *mut JNIEnv, obj: jobject, methodID: jmethodID, args: *const jvalue) -> jfloat,
    // 58-59
    pub _pad58: [Reserved; 2],
    // 60
    pub CallDoubleMethodA:
        unsafe extern "system" fn(env: *mut JNIEnv, obj: jobject, methodID: jmethodID, args: *const jvalue) -> jdouble,
    // 61-112
    pub _pad61: [Reserved; 52],
    // 113
    pub GetStaticMethodID: unsafe extern "system" fn(
        env: *mut JNIEnv,
        clazz: jclass,
        name: *const c_char,
        sig: *const c_char,
    ) -> jmethodID,
    // 114-166
    pub _pad114: [Reserved; 53],
    // 167
    pub NewStringUTF: unsafe extern "system" fn(env: *mut JNIEnv, utf: *const c_char) -> jstring,
    // 168
    pub _pad168: Reserved,
    // 169-171
    pub GetStringUTFChars:
        unsafe extern "system" fn(env: *mut JNIEnv, str: jstring, isCopy: *mut jboolean) -> *const c_char,
    pub ReleaseStringUTFChars: unsafe extern "system" fn(env: *mut JNIEnv, str: jstring, chars: *const c_char),
    pub GetArrayLength: unsafe extern "system" fn(env: *mut JNIEnv, array: jarray) -> jsize,
    // 172
    pub _pad172: Reserved,
    // 173
    pub GetObjectArrayElement:
        unsafe extern "system" fn(env: *mut JNIEnv, array: jobjectArray, index: jsize) -> jobject,
    // 174-214
    pub _pad174: [Reserved; 41],
    // 215
    pub RegisterNatives: unsafe extern "system" fn(
        env: *mut JNIEnv,
        clazz: jclass,
        methods: *const JNINativeMethod,
        nMethods: jint,
    ) -> jint,
    // 216-227
    pub _pad216: [Reserved; 12],
    // 228
    pub ExceptionCheck: unsafe extern "system" fn(env: *mut JNIEnv) -> jboolean,
    // 229-235
    pub _pad229: [Reserved; 7],
}

/// In C, `JNIEnv` is the vtable pointer itself.
pub type JNIEnv = *const JNINativeInterface_;

#[repr(C)]
pub struct JNIInvokeInterface_ {
    pub reserved0: Reserved,
    pub reserved1: Reserved,
    pub reserved2: Reserved,

    pub DestroyJavaVM: unsafe extern "system" fn(vm: *mut JavaVM) -> jint,
    pub AttachCurrentThread:
        unsafe extern "system" fn(vm: *mut JavaVM, penv: *mut *mut c_void, args: *mut c_void) -> jint,
    pub DetachCurrentThread: unsafe extern "system" fn(vm: *mut JavaVM) -> jint,
    pub GetEnv: unsafe extern "system" fn(vm: *mut JavaVM, penv: *mut *mut c_void, version: jint) -> jint,
    pub AttachCurrentThreadAsDaemon:
        unsafe extern "system" fn(vm: *mut JavaVM, penv: *mut *mut c_void, args: *mut c_void) -> jint,
}

pub type JavaVM = *const JNIInvokeInterface_;
