//! Pluggable observation codecs.
//!
//! A codec turns one [`Observation`] into the text after ` -> ` in a coverage
//! file and back. Codecs are looked up by name in a [`CodecRegistry`];
//! constructor arguments go in parentheses, so `truncate(40)` builds a
//! [`TruncatingCodec`] with a limit of 40 characters.
//!
//! | Name | Round trip |
//! |------|------------|
//! | `plain` | values come back as text (`null` as [`Value::Null`]) |
//! | `typed` | lossless |
//! | `truncate(N)` | like `plain`, text cut to `N` characters |

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use thiserror::Error;

use crate::store::{Observation, Value};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("cannot resolve codec {spec:?}: {reason}")]
    Resolution { spec: String, reason: String },
    #[error("malformed observation {text:?}: {reason}")]
    Malformed { text: String, reason: String },
}

impl CodecError {
    fn resolution(spec: &str, reason: impl Into<String>) -> Self {
        CodecError::Resolution { spec: spec.to_string(), reason: reason.into() }
    }

    fn malformed(text: &str, reason: impl Into<String>) -> Self {
        CodecError::Malformed { text: text.to_string(), reason: reason.into() }
    }
}

pub trait ValueCodec: Send + Sync {
    fn name(&self) -> &str;

    /// Single-line text for `observation`.
    fn serialize(&self, observation: &Observation) -> String;

    fn deserialize(&self, text: &str) -> Result<Observation, CodecError>;

    /// `observation` as it reads back after a write with this codec.
    fn canonical(&self, observation: Observation) -> Observation {
        self.deserialize(&self.serialize(&observation)).unwrap_or(observation)
    }
}

impl fmt::Debug for dyn ValueCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValueCodec({})", self.name())
    }
}

/// Generic string conversion, written as `[a, b]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainCodec;

impl ValueCodec for PlainCodec {
    fn name(&self) -> &str {
        "plain"
    }

    fn serialize(&self, observation: &Observation) -> String {
        bracket(observation.values().iter().map(|v| escape(&v.to_string())))
    }

    fn deserialize(&self, text: &str) -> Result<Observation, CodecError> {
        Ok(split_items(text)?.into_iter().map(plain_value).collect())
    }
}

fn plain_value(item: String) -> Value {
    if item == "null" {
        Value::Null
    } else {
        Value::Text(item)
    }
}

/// Type-tagged literals (`I:5`, `T:x`, `N`) that read back exactly.
#[derive(Debug, Clone, Copy, Default)]
pub struct TypedCodec;

impl ValueCodec for TypedCodec {
    fn name(&self) -> &str {
        "typed"
    }

    fn serialize(&self, observation: &Observation) -> String {
        bracket(observation.values().iter().map(|v| match v {
            Value::Null => "N".to_string(),
            Value::Boolean(b) => format!("Z:{b}"),
            Value::Byte(b) => format!("B:{b}"),
            Value::Char(c) => format!("C:{c}"),
            Value::Short(s) => format!("S:{s}"),
            Value::Int(i) => format!("I:{i}"),
            Value::Long(l) => format!("J:{l}"),
            Value::Float(x) => format!("F:{x:?}"),
            Value::Double(x) => format!("D:{x:?}"),
            Value::Text(t) => format!("T:{}", escape(t)),
        }))
    }

    fn deserialize(&self, text: &str) -> Result<Observation, CodecError> {
        split_items(text)?.iter().map(|item| typed_value(text, item)).collect()
    }

    fn canonical(&self, observation: Observation) -> Observation {
        observation
    }
}

fn typed_value(text: &str, item: &str) -> Result<Value, CodecError> {
    if item == "N" {
        return Ok(Value::Null);
    }
    let (tag, literal) = item
        .split_once(':')
        .ok_or_else(|| CodecError::malformed(text, format!("item {item:?} has no type tag")))?;
    let bad = || CodecError::malformed(text, format!("bad {tag} literal {literal:?}"));
    Ok(match tag {
        "Z" => Value::Boolean(literal.parse().map_err(|_| bad())?),
        "B" => Value::Byte(literal.parse().map_err(|_| bad())?),
        "C" => Value::Char(literal.parse().map_err(|_| bad())?),
        "S" => Value::Short(literal.parse().map_err(|_| bad())?),
        "I" => Value::Int(literal.parse().map_err(|_| bad())?),
        "J" => Value::Long(literal.parse().map_err(|_| bad())?),
        "F" => Value::Float(literal.parse().map_err(|_| bad())?),
        "D" => Value::Double(literal.parse().map_err(|_| bad())?),
        "T" => Value::Text(literal.to_string()),
        _ => return Err(CodecError::malformed(text, format!("unknown type tag {tag:?}"))),
    })
}

/// [`PlainCodec`] with every value's text cut to `limit` characters.
#[derive(Debug, Clone, Copy)]
pub struct TruncatingCodec {
    limit: usize,
}

impl TruncatingCodec {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl ValueCodec for TruncatingCodec {
    fn name(&self) -> &str {
        "truncate"
    }

    fn serialize(&self, observation: &Observation) -> String {
        bracket(observation.values().iter().map(|v| {
            let text: String = v.to_string().chars().take(self.limit).collect();
            escape(&text)
        }))
    }

    fn deserialize(&self, text: &str) -> Result<Observation, CodecError> {
        PlainCodec.deserialize(text)
    }
}

fn bracket(items: impl Iterator<Item = String>) -> String {
    let mut out = String::from("[");
    for (i, item) in items.enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&item);
    }
    out.push(']');
    out
}

/// Escapes the item separator and line breaks so an observation stays on one
/// line and splits back unambiguously. An empty item is written as `\e` so
/// that `[""]` and `[]` differ.
fn escape(text: &str) -> String {
    if text.is_empty() {
        return "\\e".to_string();
    }
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            ',' => out.push_str("\\,"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out
}

/// Inverse of [`bracket`] + [`escape`].
fn split_items(text: &str) -> Result<Vec<String>, CodecError> {
    let inner = text
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .ok_or_else(|| CodecError::malformed(text, "expected [...]"))?;
    if inner.is_empty() {
        return Ok(Vec::new());
    }

    let mut items = Vec::new();
    let mut current = String::new();
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('n') => current.push('\n'),
                Some('r') => current.push('\r'),
                Some('e') => {}
                Some(other) => current.push(other),
                None => return Err(CodecError::malformed(text, "dangling escape")),
            },
            ',' => {
                items.push(std::mem::take(&mut current));
                // the separator is ", "
                if chars.as_str().starts_with(' ') {
                    chars.next();
                }
            }
            _ => current.push(c),
        }
    }
    items.push(current);
    Ok(items)
}

type Factory = Box<dyn Fn(&[String]) -> Result<Arc<dyn ValueCodec>, String> + Send + Sync>;

/// Name → constructor table for codecs.
pub struct CodecRegistry {
    factories: IndexMap<String, Factory>,
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecRegistry").field("names", &self.factories.keys().collect::<Vec<_>>()).finish()
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl CodecRegistry {
    pub fn empty() -> Self {
        Self { factories: IndexMap::new() }
    }

    /// `plain`, `typed` and `truncate(N)`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register("plain", |args| {
            no_args(args)?;
            Ok(Arc::new(PlainCodec) as Arc<dyn ValueCodec>)
        });
        registry.register("typed", |args| {
            no_args(args)?;
            Ok(Arc::new(TypedCodec) as Arc<dyn ValueCodec>)
        });
        registry.register("truncate", |args| match args {
            [limit] => {
                let limit = limit.parse::<usize>().map_err(|e| format!("limit {limit:?}: {e}"))?;
                Ok(Arc::new(TruncatingCodec::new(limit)) as Arc<dyn ValueCodec>)
            }
            _ => Err(format!("expected one argument, got {}", args.len())),
        });
        registry
    }

    /// Adds or replaces the factory for `name`.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&[String]) -> Result<Arc<dyn ValueCodec>, String> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Builds the codec described by `spec`, e.g. `plain` or `truncate(40)`.
    pub fn resolve(&self, spec: &str) -> Result<Arc<dyn ValueCodec>, CodecError> {
        let (name, args) = parse_spec(spec)?;
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| CodecError::resolution(spec, format!("unknown codec {name:?}")))?;
        factory(&args).map_err(|reason| CodecError::resolution(spec, reason))
    }
}

fn no_args(args: &[String]) -> Result<(), String> {
    if args.is_empty() {
        Ok(())
    } else {
        Err("takes no arguments".to_string())
    }
}

fn parse_spec(spec: &str) -> Result<(&str, Vec<String>), CodecError> {
    let spec_trimmed = spec.trim();
    let Some(open) = spec_trimmed.find('(') else {
        if spec_trimmed.is_empty() || spec_trimmed.contains(')') {
            return Err(CodecError::resolution(spec, "empty or unbalanced name"));
        }
        return Ok((spec_trimmed, Vec::new()));
    };

    let name = spec_trimmed[..open].trim();
    let rest = spec_trimmed[open + 1..]
        .strip_suffix(')')
        .ok_or_else(|| CodecError::resolution(spec, "missing ')'"))?;
    if name.is_empty() {
        return Err(CodecError::resolution(spec, "missing codec name"));
    }
    let args = if rest.trim().is_empty() {
        Vec::new()
    } else {
        rest.split(',').map(|a| a.trim().to_string()).collect()
    };
    Ok((name, args))
}
