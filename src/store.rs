//! In-memory coverage model and its line-oriented file format.
//!
//! ```text
//! com.acme.Service#handle(ILjava/lang/String;)V
//!  -> [5, x]
//!  -> [6, y]
//! com.acme.Service#retries:I
//! ```
//!
//! A header line names a member; each following ` -> ` line holds one
//! observation as produced by the configured [`ValueCodec`]. A header with no
//! continuation lines is a declared member that was never observed.

use std::fmt;
use std::fs::File;
use std::hash::{Hash, Hasher};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use indexmap::{IndexMap, IndexSet};

use crate::codec::ValueCodec;
use crate::error::{Error, Result};

/// Prefix of every observation line.
pub const CONTINUATION: &str = " -> ";

/// Separator between owner and member on a header line.
pub const MEMBER_SEPARATOR: char = '#';

/// One captured argument or field value.
///
/// Floating point values compare by bit pattern so that every value, `NaN`
/// included, can live in a hash set.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Boolean(bool),
    Byte(i8),
    /// UTF-16 code unit, as the JVM stores `char`.
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    /// Object references, converted to text when captured.
    Text(String),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Byte(a), Value::Byte(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::Short(a), Value::Short(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Text(a), Value::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Boolean(v) => v.hash(state),
            Value::Byte(v) => v.hash(state),
            Value::Char(v) => v.hash(state),
            Value::Short(v) => v.hash(state),
            Value::Int(v) => v.hash(state),
            Value::Long(v) => v.hash(state),
            Value::Float(v) => v.to_bits().hash(state),
            Value::Double(v) => v.to_bits().hash(state),
            Value::Text(v) => v.hash(state),
        }
    }
}

/// Java's string conversion of the value.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Byte(v) => write!(f, "{v}"),
            Value::Char(v) => match char::from_u32(*v as u32) {
                Some(c) => write!(f, "{c}"),
                None => f.write_str("\u{fffd}"),
            },
            Value::Short(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}"),
            Value::Float(v) => write_java_float(f, *v as f64, &format!("{v:?}")),
            Value::Double(v) => write_java_float(f, *v, &format!("{v:?}")),
            Value::Text(v) => f.write_str(v),
        }
    }
}

// `{:?}` keeps the trailing `.0` Java prints for integral values.
fn write_java_float(f: &mut fmt::Formatter<'_>, v: f64, shortest: &str) -> fmt::Result {
    if v.is_nan() {
        f.write_str("NaN")
    } else if v.is_infinite() {
        f.write_str(if v > 0.0 { "Infinity" } else { "-Infinity" })
    } else {
        f.write_str(shortest)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// One recorded tuple: a method's arguments in declaration order, or the
/// single value written to a field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Observation(pub Vec<Value>);

impl Observation {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Value>> for Observation {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

impl FromIterator<Value> for Observation {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// `owner` plus `member`, where member is `name + descriptor` for methods
/// and `name:descriptor` for fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberKey {
    pub owner: String,
    pub member: String,
}

impl MemberKey {
    pub fn new(owner: impl Into<String>, member: impl Into<String>) -> Self {
        Self { owner: owner.into(), member: member.into() }
    }

    pub fn method(owner: &str, name: &str, descriptor: &str) -> Self {
        Self::new(owner, format!("{name}{descriptor}"))
    }

    pub fn field(owner: &str, name: &str, descriptor: &str) -> Self {
        Self::new(owner, format!("{name}:{descriptor}"))
    }
}

impl fmt::Display for MemberKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.owner, MEMBER_SEPARATOR, self.member)
    }
}

/// Distinct observations of one member, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObservationList {
    items: IndexSet<Observation>,
}

impl ObservationList {
    /// Returns `false` if an equal observation is already present.
    pub fn insert(&mut self, observation: Observation) -> bool {
        self.items.insert(observation)
    }

    pub fn contains(&self, observation: &Observation) -> bool {
        self.items.contains(observation)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Observation> {
        self.items.iter()
    }
}

impl<'a> IntoIterator for &'a ObservationList {
    type Item = &'a Observation;
    type IntoIter = indexmap::set::Iter<'a, Observation>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// owner → member → observations, all in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoverageStore {
    owners: IndexMap<String, IndexMap<String, ObservationList>>,
}

impl CoverageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The list for `owner#member`, created empty if it does not exist yet.
    pub fn get(&mut self, owner: &str, member: &str) -> &mut ObservationList {
        self.owners.entry(owner.to_string()).or_default().entry(member.to_string()).or_default()
    }

    /// `None` means the member was never declared.
    pub fn lookup(&self, owner: &str, member: &str) -> Option<&ObservationList> {
        self.owners.get(owner).and_then(|members| members.get(member))
    }

    pub fn contains(&self, owner: &str, member: &str) -> bool {
        self.lookup(owner, member).is_some()
    }

    /// Returns `true` if the member was not present before.
    pub fn declare(&mut self, owner: &str, member: &str) -> bool {
        if self.contains(owner, member) {
            return false;
        }
        self.get(owner, member);
        true
    }

    /// Returns `true` if the observation was new for this member.
    pub fn add(&mut self, owner: &str, member: &str, observation: Observation) -> bool {
        self.get(owner, member).insert(observation)
    }

    /// Folds `other` into `self`, keeping existing order first.
    pub fn merge(&mut self, other: CoverageStore) {
        for (owner, members) in other.owners {
            let target = self.owners.entry(owner).or_default();
            for (member, list) in members {
                let into = target.entry(member).or_default();
                for observation in list.items {
                    into.insert(observation);
                }
            }
        }
    }

    /// Every observation rewritten into the form `codec` reads back.
    /// Observations that become equal collapse into one.
    pub fn canonicalize(self, codec: &dyn ValueCodec) -> Self {
        let mut out = CoverageStore::new();
        for (owner, members) in self.owners {
            let target = out.owners.entry(owner).or_default();
            for (member, list) in members {
                let into = target.entry(member).or_default();
                for observation in list.items {
                    into.insert(codec.canonical(observation));
                }
            }
        }
        out
    }

    pub fn owners(&self) -> impl Iterator<Item = &str> {
        self.owners.keys().map(String::as_str)
    }

    pub fn members(&self, owner: &str) -> impl Iterator<Item = (&str, &ObservationList)> {
        self.owners.get(owner).into_iter().flat_map(|m| m.iter().map(|(k, v)| (k.as_str(), v)))
    }

    /// Every member as `(owner, member, observations)`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &ObservationList)> {
        self.owners
            .iter()
            .flat_map(|(owner, members)| members.iter().map(move |(m, list)| (owner.as_str(), m.as_str(), list)))
    }

    pub fn clear(&mut self) {
        self.owners.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    pub fn member_count(&self) -> usize {
        self.owners.values().map(IndexMap::len).sum()
    }

    pub fn observation_count(&self) -> usize {
        self.iter().map(|(_, _, list)| list.len()).sum()
    }

    pub fn write_to<W: Write>(&self, writer: &mut W, codec: &dyn ValueCodec) -> Result<()> {
        for (owner, member, list) in self.iter() {
            writeln!(writer, "{owner}{MEMBER_SEPARATOR}{member}")?;
            for observation in list {
                writeln!(writer, "{CONTINUATION}{}", codec.serialize(observation))?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    pub fn read_from<R: BufRead>(reader: R, codec: &dyn ValueCodec) -> Result<Self> {
        let mut store = CoverageStore::new();
        let mut current: Option<(String, String)> = None;

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let number = index + 1;
            if line.trim().is_empty() {
                continue;
            }

            if let Some(text) = line.strip_prefix(CONTINUATION) {
                let (owner, member) = current.as_ref().ok_or_else(|| Error::Format {
                    line: number,
                    message: "observation before any member header".to_string(),
                })?;
                let observation = codec
                    .deserialize(text)
                    .map_err(|e| Error::Format { line: number, message: e.to_string() })?;
                store.add(owner, member, observation);
                continue;
            }

            let (owner, member) = line.split_once(MEMBER_SEPARATOR).ok_or_else(|| Error::Format {
                line: number,
                message: format!("header has no '{MEMBER_SEPARATOR}' separator"),
            })?;
            if owner.is_empty() || member.is_empty() {
                return Err(Error::Format { line: number, message: "empty owner or member".to_string() });
            }
            store.declare(owner, member);
            current = Some((owner.to_string(), member.to_string()));
        }

        Ok(store)
    }

    pub fn save(&self, path: &Path, codec: &dyn ValueCodec) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_to(&mut writer, codec)
    }

    pub fn load(path: &Path, codec: &dyn ValueCodec) -> Result<Self> {
        Self::read_from(BufReader::new(File::open(path)?), codec)
    }
}
