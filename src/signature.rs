//! JVM descriptor parsing.
//!
//! A method descriptor such as `(IJLjava/lang/String;[I)V` is turned into an
//! ordered list of [`ParameterDescriptor`]s. Each descriptor knows how many
//! local-variable slots it occupies and, for primitives, which wrapper class
//! boxes it.
//!
//! Arrays are captured by reference: `[I` and `[[Ljava/lang/Object;` both come
//! back as [`ParamKind::Array`] and are treated as plain objects by the
//! instrumenter, whatever their element type.
//!
//! ```
//! use argcov::signature::{self, slot_sequence};
//!
//! let params = signature::parse("(IJLjava/lang/String;)V").unwrap();
//! assert_eq!(params.len(), 3);
//! assert_eq!(slot_sequence(&params, 0), vec![0, 1, 3, 4]);
//! ```

use std::fmt;

use thiserror::Error;

/// Reasons a descriptor is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("descriptor {0:?} does not start with '('")]
    MissingParameterList(String),
    #[error("descriptor {0:?} has no closing ')'")]
    UnterminatedParameterList(String),
    #[error("unknown type code {code:?} at offset {offset} in {descriptor:?}")]
    UnknownTypeCode { descriptor: String, code: char, offset: usize },
    #[error("class name starting at offset {offset} in {descriptor:?} has no ';'")]
    UnterminatedClassName { descriptor: String, offset: usize },
    #[error("descriptor {0:?} has no return type")]
    MissingReturnType(String),
    #[error("unexpected characters after offset {offset} in {descriptor:?}")]
    TrailingCharacters { descriptor: String, offset: usize },
}

/// The eight JVM primitive types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
}

impl PrimitiveKind {
    pub fn from_tag(tag: char) -> Option<Self> {
        Some(match tag {
            'Z' => PrimitiveKind::Boolean,
            'B' => PrimitiveKind::Byte,
            'C' => PrimitiveKind::Char,
            'S' => PrimitiveKind::Short,
            'I' => PrimitiveKind::Int,
            'J' => PrimitiveKind::Long,
            'F' => PrimitiveKind::Float,
            'D' => PrimitiveKind::Double,
            _ => return None,
        })
    }

    pub fn tag(self) -> char {
        match self {
            PrimitiveKind::Boolean => 'Z',
            PrimitiveKind::Byte => 'B',
            PrimitiveKind::Char => 'C',
            PrimitiveKind::Short => 'S',
            PrimitiveKind::Int => 'I',
            PrimitiveKind::Long => 'J',
            PrimitiveKind::Float => 'F',
            PrimitiveKind::Double => 'D',
        }
    }

    /// `long` and `double` take two local-variable slots.
    pub fn is_wide(self) -> bool {
        matches!(self, PrimitiveKind::Long | PrimitiveKind::Double)
    }

    /// Internal name of the wrapper class used for boxing.
    pub fn box_class(self) -> &'static str {
        match self {
            PrimitiveKind::Boolean => "java/lang/Boolean",
            PrimitiveKind::Byte => "java/lang/Byte",
            PrimitiveKind::Char => "java/lang/Character",
            PrimitiveKind::Short => "java/lang/Short",
            PrimitiveKind::Int => "java/lang/Integer",
            PrimitiveKind::Long => "java/lang/Long",
            PrimitiveKind::Float => "java/lang/Float",
            PrimitiveKind::Double => "java/lang/Double",
        }
    }

    /// Descriptor of the wrapper's static `valueOf` factory.
    pub fn value_of_descriptor(self) -> &'static str {
        match self {
            PrimitiveKind::Boolean => "(Z)Ljava/lang/Boolean;",
            PrimitiveKind::Byte => "(B)Ljava/lang/Byte;",
            PrimitiveKind::Char => "(C)Ljava/lang/Character;",
            PrimitiveKind::Short => "(S)Ljava/lang/Short;",
            PrimitiveKind::Int => "(I)Ljava/lang/Integer;",
            PrimitiveKind::Long => "(J)Ljava/lang/Long;",
            PrimitiveKind::Float => "(F)Ljava/lang/Float;",
            PrimitiveKind::Double => "(D)Ljava/lang/Double;",
        }
    }

    /// Name and descriptor of the wrapper's accessor (`intValue()I` …).
    pub fn unbox_method(self) -> (&'static str, &'static str) {
        match self {
            PrimitiveKind::Boolean => ("booleanValue", "()Z"),
            PrimitiveKind::Byte => ("byteValue", "()B"),
            PrimitiveKind::Char => ("charValue", "()C"),
            PrimitiveKind::Short => ("shortValue", "()S"),
            PrimitiveKind::Int => ("intValue", "()I"),
            PrimitiveKind::Long => ("longValue", "()J"),
            PrimitiveKind::Float => ("floatValue", "()F"),
            PrimitiveKind::Double => ("doubleValue", "()D"),
        }
    }
}

/// What a single parameter (or field) holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParamKind {
    Primitive(PrimitiveKind),
    /// Internal class name, e.g. `java/lang/String`.
    Object(String),
    /// Full array descriptor, e.g. `[[I`.
    Array(String),
}

/// One parsed parameter. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParameterDescriptor {
    kind: ParamKind,
}

impl ParameterDescriptor {
    pub fn new(kind: ParamKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> &ParamKind {
        &self.kind
    }

    pub fn primitive(&self) -> Option<PrimitiveKind> {
        match self.kind {
            ParamKind::Primitive(p) => Some(p),
            _ => None,
        }
    }

    pub fn slot_width(&self) -> u16 {
        match self.kind {
            ParamKind::Primitive(p) if p.is_wide() => 2,
            _ => 1,
        }
    }

    /// Wrapper class for primitives, `None` for references (arrays included).
    pub fn boxing_target(&self) -> Option<&'static str> {
        self.primitive().map(PrimitiveKind::box_class)
    }

    /// The descriptor text this parameter was parsed from.
    pub fn descriptor(&self) -> String {
        match &self.kind {
            ParamKind::Primitive(p) => p.tag().to_string(),
            ParamKind::Object(name) => format!("L{name};"),
            ParamKind::Array(desc) => desc.clone(),
        }
    }
}

impl fmt::Display for ParameterDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.descriptor())
    }
}

/// A parsed method descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSignature {
    pub params: Vec<ParameterDescriptor>,
    /// `None` for `void`.
    pub return_type: Option<ParameterDescriptor>,
}

impl MethodSignature {
    pub fn parse(descriptor: &str) -> Result<Self, SignatureError> {
        let bytes = descriptor.as_bytes();
        if bytes.first() != Some(&b'(') {
            return Err(SignatureError::MissingParameterList(descriptor.to_string()));
        }

        let mut params = Vec::new();
        let mut pos = 1;
        loop {
            match bytes.get(pos) {
                None => return Err(SignatureError::UnterminatedParameterList(descriptor.to_string())),
                Some(b')') => {
                    pos += 1;
                    break;
                }
                Some(_) => {
                    let (param, next) = parse_type(descriptor, pos)?;
                    params.push(param);
                    pos = next;
                }
            }
        }

        let return_type = match bytes.get(pos) {
            None => return Err(SignatureError::MissingReturnType(descriptor.to_string())),
            Some(b'V') => {
                pos += 1;
                None
            }
            Some(_) => {
                let (ret, next) = parse_type(descriptor, pos)?;
                pos = next;
                Some(ret)
            }
        };

        if pos != bytes.len() {
            return Err(SignatureError::TrailingCharacters { descriptor: descriptor.to_string(), offset: pos });
        }

        Ok(Self { params, return_type })
    }

    pub fn arg_slots(&self) -> u16 {
        arg_slots(&self.params)
    }
}

/// Parses the parameter list of a method descriptor.
pub fn parse(descriptor: &str) -> Result<Vec<ParameterDescriptor>, SignatureError> {
    MethodSignature::parse(descriptor).map(|sig| sig.params)
}

/// Parses a field descriptor such as `I` or `Ljava/util/List;`.
pub fn parse_field(descriptor: &str) -> Result<ParameterDescriptor, SignatureError> {
    if descriptor.is_empty() {
        return Err(SignatureError::MissingReturnType(descriptor.to_string()));
    }
    let (param, next) = parse_type(descriptor, 0)?;
    if next != descriptor.len() {
        return Err(SignatureError::TrailingCharacters { descriptor: descriptor.to_string(), offset: next });
    }
    Ok(param)
}

/// Start slot of every parameter, followed by the first slot after the last
/// one. `first_slot` is 0 for static methods and 1 for instance methods,
/// where slot 0 holds the receiver.
pub fn slot_sequence(params: &[ParameterDescriptor], first_slot: u16) -> Vec<u16> {
    let mut slots = Vec::with_capacity(params.len() + 1);
    let mut next = first_slot;
    slots.push(next);
    for param in params {
        next += param.slot_width();
        slots.push(next);
    }
    slots
}

pub fn arg_slots(params: &[ParameterDescriptor]) -> u16 {
    params.iter().map(ParameterDescriptor::slot_width).sum()
}

fn parse_type(descriptor: &str, start: usize) -> Result<(ParameterDescriptor, usize), SignatureError> {
    let bytes = descriptor.as_bytes();
    let mut pos = start;
    while bytes.get(pos) == Some(&b'[') {
        pos += 1;
    }
    let dims = pos - start;

    let code = match bytes.get(pos) {
        Some(&c) => c as char,
        None => return Err(SignatureError::UnterminatedParameterList(descriptor.to_string())),
    };

    let end = if code == 'L' {
        let semi = descriptor[pos..]
            .find(';')
            .ok_or(SignatureError::UnterminatedClassName { descriptor: descriptor.to_string(), offset: pos })?;
        pos + semi + 1
    } else if PrimitiveKind::from_tag(code).is_some() {
        pos + 1
    } else {
        return Err(SignatureError::UnknownTypeCode { descriptor: descriptor.to_string(), code, offset: pos });
    };

    let kind = if dims > 0 {
        ParamKind::Array(descriptor[start..end].to_string())
    } else if code == 'L' {
        ParamKind::Object(descriptor[pos + 1..end - 1].to_string())
    } else {
        // from_tag succeeded above
        match PrimitiveKind::from_tag(code) {
            Some(p) => ParamKind::Primitive(p),
            None => return Err(SignatureError::UnknownTypeCode { descriptor: descriptor.to_string(), code, offset: pos }),
        }
    };

    Ok((ParameterDescriptor::new(kind), end))
}
