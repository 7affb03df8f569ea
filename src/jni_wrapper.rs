//! Thin wrapper around the JNI environment.
//!
//! Covers what the agent needs: defining the collector class, binding its
//! native method, reading `Object[]` arguments and turning Java objects into
//! text. Failures are reported as [`Error::Jni`].
//!
//! ```rust,ignore
//! let env = unsafe { JniEnv::from_raw(jni) };
//! let class = env.find_class("java/lang/Integer")?;
//! let int_value = env.get_method_id(class, "intValue", "()I")?;
//! ```

use std::ffi::{CStr, CString};
use std::ptr;

use crate::error::{Error, Result};
use crate::sys::jni;

/// A JNI environment pointer. Valid only on the thread it was handed to.
pub struct JniEnv {
    env: *mut jni::JNIEnv,
}

fn c_string(call: &'static str, s: &str) -> Result<CString> {
    CString::new(s).map_err(|_| Error::Jni { call })
}

impl JniEnv {
    /// # Safety
    ///
    /// `env` must be the JNI environment of the current thread.
    pub unsafe fn from_raw(env: *mut jni::JNIEnv) -> Self {
        JniEnv { env }
    }

    pub fn raw(&self) -> *mut jni::JNIEnv {
        self.env
    }

    fn vtable(&self) -> &jni::JNINativeInterface_ {
        unsafe { &**self.env }
    }

    // =========================================================================
    // Classes
    // =========================================================================

    /// Defines a class from its bytes in `loader` (null for the bootstrap
    /// loader).
    pub fn define_class(&self, name: &str, loader: jni::jobject, bytes: &[u8]) -> Result<jni::jclass> {
        let c_name = c_string("DefineClass", name)?;
        let cls = unsafe {
            (self.vtable().DefineClass)(
                self.env,
                c_name.as_ptr(),
                loader,
                bytes.as_ptr() as *const jni::jbyte,
                bytes.len() as jni::jsize,
            )
        };
        self.non_null("DefineClass", cls)
    }

    /// `name` uses `/` as package separator.
    pub fn find_class(&self, name: &str) -> Result<jni::jclass> {
        let c_name = c_string("FindClass", name)?;
        let cls = unsafe { (self.vtable().FindClass)(self.env, c_name.as_ptr()) };
        self.non_null("FindClass", cls)
    }

    pub fn is_instance_of(&self, obj: jni::jobject, cls: jni::jclass) -> bool {
        unsafe { (self.vtable().IsInstanceOf)(self.env, obj, cls) != 0 }
    }

    // =========================================================================
    // Exceptions
    // =========================================================================

    pub fn exception_check(&self) -> bool {
        unsafe { (self.vtable().ExceptionCheck)(self.env) != 0 }
    }

    pub fn exception_clear(&self) {
        unsafe { (self.vtable().ExceptionClear)(self.env) }
    }

    /// Clears a pending exception and reports whether there was one.
    pub fn take_exception(&self) -> bool {
        let pending = self.exception_check();
        if pending {
            self.exception_clear();
        }
        pending
    }

    /// Turns a null result, or one that left an exception behind, into an
    /// error. The exception is cleared.
    fn non_null<T>(&self, call: &'static str, value: *mut T) -> Result<*mut T> {
        if self.take_exception() || value.is_null() {
            Err(Error::Jni { call })
        } else {
            Ok(value)
        }
    }

    // =========================================================================
    // Strings
    // =========================================================================

    /// Copies a Java string. Returns `None` for null. Characters outside the
    /// BMP come back through the lossy conversion of modified UTF-8.
    pub fn get_string_utf(&self, s: jni::jstring) -> Option<String> {
        if s.is_null() {
            return None;
        }
        unsafe {
            let chars = (self.vtable().GetStringUTFChars)(self.env, s, ptr::null_mut());
            if chars.is_null() {
                self.take_exception();
                return None;
            }
            let result = CStr::from_ptr(chars).to_string_lossy().into_owned();
            (self.vtable().ReleaseStringUTFChars)(self.env, s, chars);
            Some(result)
        }
    }

    // =========================================================================
    // Methods
    // =========================================================================

    pub fn get_method_id(&self, cls: jni::jclass, name: &str, sig: &str) -> Result<jni::jmethodID> {
        let c_name = c_string("GetMethodID", name)?;
        let c_sig = c_string("GetMethodID", sig)?;
        let id = unsafe { (self.vtable().GetMethodID)(self.env, cls, c_name.as_ptr(), c_sig.as_ptr()) };
        self.non_null("GetMethodID", id)
    }

    /// Calls an object-returning method. A thrown exception is cleared and
    /// reported as an error; a null return is `Ok(null)`.
    pub fn call_object_method(&self, obj: jni::jobject, method: jni::jmethodID, args: &[jni::jvalue]) -> Result<jni::jobject> {
        let result = unsafe { (self.vtable().CallObjectMethodA)(self.env, obj, method, args.as_ptr()) };
        if self.take_exception() {
            return Err(Error::Jni { call: "CallObjectMethodA" });
        }
        Ok(result)
    }

    // Primitive-returning no-argument calls, used to unbox wrapper objects.

    pub fn call_boolean_method(&self, obj: jni::jobject, method: jni::jmethodID) -> bool {
        unsafe { (self.vtable().CallBooleanMethodA)(self.env, obj, method, ptr::null()) != 0 }
    }

    pub fn call_byte_method(&self, obj: jni::jobject, method: jni::jmethodID) -> jni::jbyte {
        unsafe { (self.vtable().CallByteMethodA)(self.env, obj, method, ptr::null()) }
    }

    pub fn call_char_method(&self, obj: jni::jobject, method: jni::jmethodID) -> jni::jchar {
        unsafe { (self.vtable().CallCharMethodA)(self.env, obj, method, ptr::null()) }
    }

    pub fn call_short_method(&self, obj: jni::jobject, method: jni::jmethodID) -> jni::jshort {
        unsafe { (self.vtable().CallShortMethodA)(self.env, obj, method, ptr::null()) }
    }

    pub fn call_int_method(&self, obj: jni::jobject, method: jni::jmethodID) -> jni::jint {
        unsafe { (self.vtable().CallIntMethodA)(self.env, obj, method, ptr::null()) }
    }

    pub fn call_long_method(&self, obj: jni::jobject, method: jni::jmethodID) -> jni::jlong {
        unsafe { (self.vtable().CallLongMethodA)(self.env, obj, method, ptr::null()) }
    }

    pub fn call_float_method(&self, obj: jni::jobject, method: jni::jmethodID) -> jni::jfloat {
        unsafe { (self.vtable().CallFloatMethodA)(self.env, obj, method, ptr::null()) }
    }

    pub fn call_double_method(&self, obj: jni::jobject, method: jni::jmethodID) -> jni::jdouble {
        unsafe { (self.vtable().CallDoubleMethodA)(self.env, obj, method, ptr::null()) }
    }

    // =========================================================================
    // References and arrays
    // =========================================================================

    pub fn delete_local_ref(&self, obj: jni::jobject) {
        unsafe { (self.vtable().DeleteLocalRef)(self.env, obj) }
    }

    pub fn get_array_length(&self, array: jni::jarray) -> jni::jsize {
        if array.is_null() {
            return 0;
        }
        unsafe { (self.vtable().GetArrayLength)(self.env, array) }
    }

    pub fn get_object_array_element(&self, array: jni::jobjectArray, index: jni::jsize) -> jni::jobject {
        unsafe { (self.vtable().GetObjectArrayElement)(self.env, array, index) }
    }

    // =========================================================================
    // Native method registration
    // =========================================================================

    pub fn register_natives(&self, cls: jni::jclass, methods: &[jni::JNINativeMethod]) -> Result<()> {
        let result =
            unsafe { (self.vtable().RegisterNatives)(self.env, cls, methods.as_ptr(), methods.len() as jni::jint) };
        if self.take_exception() || result != jni::JNI_OK {
            return Err(Error::Jni { call: "RegisterNatives" });
        }
        Ok(())
    }
}

/// Deletes a local reference when dropped.
///
/// ```rust,ignore
/// let text = LocalRef::new(&env, env.call_object_method(obj, to_string, &[])?);
/// ```
pub struct LocalRef<'a> {
    env: &'a JniEnv,
    obj: jni::jobject,
}

impl<'a> LocalRef<'a> {
    pub fn new(env: &'a JniEnv, obj: jni::jobject) -> Self {
        LocalRef { env, obj }
    }

    pub fn get(&self) -> jni::jobject {
        self.obj
    }

    pub fn is_null(&self) -> bool {
        self.obj.is_null()
    }
}

impl Drop for LocalRef<'_> {
    fn drop(&mut self) {
        if !self.obj.is_null() {
            self.env.delete_local_ref(self.obj);
        }
    }
}
