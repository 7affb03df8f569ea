//! Crate-level error type.
//!
//! Each module reports its own narrow error enum; they all funnel into
//! [`Error`] so callers of the runtime and the instrumenter only match on one
//! type.
//!
//! | Variant | Raised by | Handling |
//! |---------|-----------|----------|
//! | [`Error::MalformedSignature`] | descriptor parsing | member skipped, batch continues |
//! | [`Error::CodecResolution`] | codec lookup at start-up | fatal to the run |
//! | [`Error::Io`] | reading or writing coverage files | propagated to the caller |
//! | [`Error::Format`] | a coverage file line that cannot be read | propagated to the caller |
//! | [`Error::Initialization`] | every call after a failed collector initializer | `save` refuses to write |
//!
//! Re-entrant collection calls are not errors; they are reported as
//! [`crate::collector::RecordOutcome::Reentrant`].

use std::io;

use thiserror::Error;

use crate::bytecode::BytecodeError;
use crate::classfile::ClassFileError;
use crate::codec::CodecError;
use crate::config::ConfigError;
use crate::signature::SignatureError;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Every failure this crate can report.
#[derive(Debug, Error)]
pub enum Error {
    /// A method or field descriptor could not be parsed.
    #[error("malformed signature: {0}")]
    MalformedSignature(#[from] SignatureError),

    /// A configured serializer or deserializer could not be constructed.
    #[error("codec resolution failed: {0}")]
    CodecResolution(#[from] CodecError),

    /// Reading or writing the on-disk coverage format failed.
    #[error("I/O failure: {0}")]
    Io(#[from] io::Error),

    /// A coverage file line did not follow the header/continuation layout.
    #[error("coverage file line {line}: {message}")]
    Format {
        /// One-based line number in the input.
        line: usize,
        /// What was wrong with it.
        message: String,
    },

    /// The collector's initializer failed on an earlier call, so the store
    /// is missing the coverage it was meant to merge in.
    #[error("coverage initializer failed earlier: {0}")]
    Initialization(String),

    /// The class file could not be read or written.
    #[error("class file: {0}")]
    ClassFile(#[from] ClassFileError),

    /// Method code could not be decoded or encoded.
    #[error("bytecode: {0}")]
    Bytecode(#[from] BytecodeError),

    /// Instrumented code would exceed the JVM's 64 KiB method limit.
    #[error("method {member} too large after instrumentation ({size} bytes)")]
    CodeTooLarge {
        /// `name + descriptor` of the method.
        member: String,
        /// Resulting code length.
        size: usize,
    },

    /// A configuration value was rejected.
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    /// A JVMTI call returned a non-zero error code.
    #[error("JVMTI error {code} in {call}")]
    Jvmti {
        /// Name of the JVMTI function.
        call: &'static str,
        /// Raw `jvmtiError` value.
        code: u32,
    },

    /// A JNI call failed.
    #[error("JNI failure in {call}")]
    Jni {
        /// Name of the JNI function.
        call: &'static str,
    },

    /// The process-wide runtime was installed twice.
    #[error("runtime already installed")]
    AlreadyInstalled,
}
