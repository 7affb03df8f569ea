//! JNI side of collection.
//!
//! Instrumented methods call the static native
//! `argcov.runtime.Collector.record(String, String, String, Object[])`,
//! which lands in [`native_record`]. Primitive arguments arrive boxed and are
//! unboxed by the parameter descriptor; every other object is converted with
//! `toString()`. Java exceptions raised along the way are cleared and never
//! reach the instrumented caller.

use std::collections::HashMap;
use std::ffi::c_void;
use std::os::raw::c_char;
use std::sync::OnceLock;

use tracing::{debug, warn};

use crate::error::Result;
use crate::jni_wrapper::{JniEnv, LocalRef};
use crate::runtime;
use crate::signature::{self, ParameterDescriptor, PrimitiveKind};
use crate::store::Value;
use crate::sys::jni;

/// Recorded for objects whose `toString()` threw or returned null.
pub const UNPRINTABLE: &str = "<unprintable>";

const ALL_KINDS: [PrimitiveKind; 8] = [
    PrimitiveKind::Boolean,
    PrimitiveKind::Byte,
    PrimitiveKind::Char,
    PrimitiveKind::Short,
    PrimitiveKind::Int,
    PrimitiveKind::Long,
    PrimitiveKind::Float,
    PrimitiveKind::Double,
];

#[derive(Clone, Copy)]
struct MethodId(jni::jmethodID);

// Method IDs of bootstrap classes stay valid for the life of the VM and may
// be used from any thread.
unsafe impl Send for MethodId {}
unsafe impl Sync for MethodId {}

struct MethodIds {
    to_string: MethodId,
    unbox: HashMap<PrimitiveKind, MethodId>,
}

static METHOD_IDS: OnceLock<MethodIds> = OnceLock::new();

impl MethodIds {
    fn resolve(env: &JniEnv) -> Result<Self> {
        let object = LocalRef::new(env, env.find_class("java/lang/Object")?);
        let to_string = MethodId(env.get_method_id(object.get(), "toString", "()Ljava/lang/String;")?);

        let mut unbox = HashMap::with_capacity(ALL_KINDS.len());
        for kind in ALL_KINDS {
            let class = LocalRef::new(env, env.find_class(kind.box_class())?);
            let (name, descriptor) = kind.unbox_method();
            unbox.insert(kind, MethodId(env.get_method_id(class.get(), name, descriptor)?));
        }
        Ok(Self { to_string, unbox })
    }
}

/// Resolves the method IDs used for value conversion. Called once the VM is
/// live; later calls are free.
pub fn prepare(env: &JniEnv) -> Result<()> {
    if METHOD_IDS.get().is_none() {
        let ids = MethodIds::resolve(env)?;
        let _ = METHOD_IDS.set(ids);
    }
    Ok(())
}

fn method_ids(env: &JniEnv) -> Option<&'static MethodIds> {
    if let Err(error) = prepare(env) {
        debug!(%error, "value conversion unavailable");
    }
    METHOD_IDS.get()
}

/// `String.valueOf(obj)`, with [`UNPRINTABLE`] when `toString()` throws or
/// returns null.
pub fn object_text(env: &JniEnv, obj: jni::jobject) -> Value {
    if obj.is_null() {
        return Value::Null;
    }
    let Some(ids) = method_ids(env) else {
        return Value::Text(UNPRINTABLE.to_string());
    };
    match env.call_object_method(obj, ids.to_string.0, &[]) {
        Ok(text) => {
            let text = LocalRef::new(env, text);
            env.get_string_utf(text.get())
                .map_or_else(|| Value::Text(UNPRINTABLE.to_string()), Value::Text)
        }
        Err(_) => Value::Text(UNPRINTABLE.to_string()),
    }
}

/// Unboxes a wrapper object. Falls back to text if `obj` is not an instance
/// of the expected wrapper.
pub fn unbox(env: &JniEnv, obj: jni::jobject, kind: PrimitiveKind) -> Value {
    if obj.is_null() {
        return Value::Null;
    }
    let Some(id) = method_ids(env).and_then(|ids| ids.unbox.get(&kind)).map(|id| id.0) else {
        return object_text(env, obj);
    };
    let matches = env
        .find_class(kind.box_class())
        .map(|class| {
            let class = LocalRef::new(env, class);
            env.is_instance_of(obj, class.get())
        })
        .unwrap_or(false);
    if !matches {
        return object_text(env, obj);
    }

    let value = match kind {
        PrimitiveKind::Boolean => Value::Boolean(env.call_boolean_method(obj, id)),
        PrimitiveKind::Byte => Value::Byte(env.call_byte_method(obj, id)),
        PrimitiveKind::Char => Value::Char(env.call_char_method(obj, id)),
        PrimitiveKind::Short => Value::Short(env.call_short_method(obj, id)),
        PrimitiveKind::Int => Value::Int(env.call_int_method(obj, id)),
        PrimitiveKind::Long => Value::Long(env.call_long_method(obj, id)),
        PrimitiveKind::Float => Value::Float(env.call_float_method(obj, id)),
        PrimitiveKind::Double => Value::Double(env.call_double_method(obj, id)),
    };
    if env.take_exception() {
        return Value::Text(UNPRINTABLE.to_string());
    }
    value
}

/// Converts every element of `args`, using `params` to decide which ones are
/// boxed primitives. Extra elements are converted as objects.
pub fn capture_args(env: &JniEnv, args: jni::jobjectArray, params: &[ParameterDescriptor]) -> Vec<Value> {
    let len = env.get_array_length(args);
    let mut values = Vec::with_capacity(len.max(0) as usize);
    for index in 0..len {
        let element = LocalRef::new(env, env.get_object_array_element(args, index));
        if env.take_exception() {
            values.push(Value::Null);
            continue;
        }
        let value = match params.get(index as usize).and_then(ParameterDescriptor::primitive) {
            Some(kind) => unbox(env, element.get(), kind),
            None => object_text(env, element.get()),
        };
        values.push(value);
    }
    values
}

/// Converts a value delivered by a `FieldModification` event. `sig_type` is
/// the first character of the field descriptor.
pub fn field_value(env: &JniEnv, sig_type: c_char, value: jni::jvalue) -> Value {
    let tag = sig_type as u8 as char;
    // SAFETY: the VM fills the union member that matches `sig_type`.
    unsafe {
        match PrimitiveKind::from_tag(tag) {
            Some(PrimitiveKind::Boolean) => Value::Boolean(value.z != jni::JNI_FALSE),
            Some(PrimitiveKind::Byte) => Value::Byte(value.b),
            Some(PrimitiveKind::Char) => Value::Char(value.c),
            Some(PrimitiveKind::Short) => Value::Short(value.s),
            Some(PrimitiveKind::Int) => Value::Int(value.i),
            Some(PrimitiveKind::Long) => Value::Long(value.j),
            Some(PrimitiveKind::Float) => Value::Float(value.f),
            Some(PrimitiveKind::Double) => Value::Double(value.d),
            None => object_text(env, value.l),
        }
    }
}

/// Implementation of the collector class's `record` native.
///
/// # Safety
///
/// Must only be called by the JVM, through the native binding installed at
/// VM start.
pub unsafe extern "system" fn native_record(
    env: *mut jni::JNIEnv,
    _class: jni::jclass,
    owner: jni::jstring,
    member: jni::jstring,
    signature: jni::jstring,
    args: jni::jobjectArray,
) {
    let Some(runtime) = runtime::global() else {
        return;
    };
    let env = JniEnv::from_raw(env);
    let (Some(owner), Some(member), Some(descriptor)) =
        (env.get_string_utf(owner), env.get_string_utf(member), env.get_string_utf(signature))
    else {
        env.take_exception();
        return;
    };

    let params = match signature::parse(&descriptor) {
        Ok(params) => params,
        Err(error) => {
            warn!(%owner, %member, %error, "unparseable signature, values kept as text");
            Vec::new()
        }
    };

    runtime
        .collector()
        .record_with(&owner, &member, &descriptor, || capture_args(&env, args, &params));
    env.take_exception();
}

/// The `JNINativeMethod` entry binding `record` to [`native_record`].
pub fn record_native_method() -> jni::JNINativeMethod {
    jni::JNINativeMethod {
        name: c"record".as_ptr(),
        signature: c"(Ljava/lang/String;Ljava/lang/String;Ljava/lang/String;[Ljava/lang/Object;)V".as_ptr(),
        fnPtr: native_record as *mut c_void,
    }
}
