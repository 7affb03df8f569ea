//! Member selection.
//!
//! A [`MemberPredicate`] decides, per method or field, whether it is
//! instrumented. Predicates are pure and composable:
//!
//! ```
//! use argcov::predicate::{MemberInfo, MemberPredicate, OwnerPrefix, NameIs, PredicateExt, AccessFlags};
//!
//! let p = OwnerPrefix::new("com.acme.").and(NameIs::new("handle").not());
//! let m = MemberInfo::new(AccessFlags::PUBLIC, "com.acme.Service", "run", "(I)V");
//! assert!(p.accept(&m));
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use parking_lot::Mutex;

use crate::config::ConfigError;
use crate::signature;

bitflags! {
    /// JVM access flags. Some bits mean different things on classes,
    /// fields and methods, hence the aliases.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SYNCHRONIZED = 0x0020;
        const SUPER = 0x0020;
        const VOLATILE = 0x0040;
        const BRIDGE = 0x0040;
        const TRANSIENT = 0x0080;
        const VARARGS = 0x0080;
        const NATIVE = 0x0100;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const STRICT = 0x0800;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Method,
    Field,
}

/// What a predicate gets to look at. `owner` is the binary class name
/// (`com.acme.Service`).
#[derive(Debug, Clone, Copy)]
pub struct MemberInfo<'a> {
    pub access: AccessFlags,
    pub owner: &'a str,
    pub name: &'a str,
    pub descriptor: &'a str,
}

impl<'a> MemberInfo<'a> {
    pub fn new(access: AccessFlags, owner: &'a str, name: &'a str, descriptor: &'a str) -> Self {
        Self { access, owner, name, descriptor }
    }

    pub fn kind(&self) -> MemberKind {
        if self.descriptor.starts_with('(') {
            MemberKind::Method
        } else {
            MemberKind::Field
        }
    }

    pub fn is_static(&self) -> bool {
        self.access.contains(AccessFlags::STATIC)
    }
}

pub trait MemberPredicate: Send + Sync {
    fn accept(&self, member: &MemberInfo<'_>) -> bool;
}

impl<P: MemberPredicate + ?Sized> MemberPredicate for Box<P> {
    fn accept(&self, member: &MemberInfo<'_>) -> bool {
        (**self).accept(member)
    }
}

impl<P: MemberPredicate + ?Sized> MemberPredicate for Arc<P> {
    fn accept(&self, member: &MemberInfo<'_>) -> bool {
        (**self).accept(member)
    }
}

impl<P: MemberPredicate + ?Sized> MemberPredicate for &P {
    fn accept(&self, member: &MemberInfo<'_>) -> bool {
        (**self).accept(member)
    }
}

/// Wraps a closure as a predicate.
pub struct FnPredicate<F>(F);

pub fn from_fn<F>(f: F) -> FnPredicate<F>
where
    F: Fn(&MemberInfo<'_>) -> bool + Send + Sync,
{
    FnPredicate(f)
}

impl<F> MemberPredicate for FnPredicate<F>
where
    F: Fn(&MemberInfo<'_>) -> bool + Send + Sync,
{
    fn accept(&self, member: &MemberInfo<'_>) -> bool {
        (self.0)(member)
    }
}

impl<F> fmt::Debug for FnPredicate<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnPredicate")
    }
}

#[derive(Debug, Clone)]
pub struct And<A, B>(A, B);

#[derive(Debug, Clone)]
pub struct Or<A, B>(A, B);

#[derive(Debug, Clone)]
pub struct Not<A>(A);

impl<A: MemberPredicate, B: MemberPredicate> MemberPredicate for And<A, B> {
    fn accept(&self, member: &MemberInfo<'_>) -> bool {
        self.0.accept(member) && self.1.accept(member)
    }
}

impl<A: MemberPredicate, B: MemberPredicate> MemberPredicate for Or<A, B> {
    fn accept(&self, member: &MemberInfo<'_>) -> bool {
        self.0.accept(member) || self.1.accept(member)
    }
}

impl<A: MemberPredicate> MemberPredicate for Not<A> {
    fn accept(&self, member: &MemberInfo<'_>) -> bool {
        !self.0.accept(member)
    }
}

pub trait PredicateExt: MemberPredicate + Sized {
    fn and<P: MemberPredicate>(self, other: P) -> And<Self, P> {
        And(self, other)
    }

    fn or<P: MemberPredicate>(self, other: P) -> Or<Self, P> {
        Or(self, other)
    }

    fn not(self) -> Not<Self> {
        Not(self)
    }

    fn boxed(self) -> Box<dyn MemberPredicate>
    where
        Self: 'static,
    {
        Box::new(self)
    }
}

impl<P: MemberPredicate + Sized> PredicateExt for P {}

#[derive(Debug, Clone, Copy, Default)]
pub struct AnyMember;

impl MemberPredicate for AnyMember {
    fn accept(&self, _member: &MemberInfo<'_>) -> bool {
        true
    }
}

#[derive(Debug, Clone)]
pub struct OwnerIs(String);

impl OwnerIs {
    pub fn new(owner: impl Into<String>) -> Self {
        Self(owner.into())
    }
}

impl MemberPredicate for OwnerIs {
    fn accept(&self, member: &MemberInfo<'_>) -> bool {
        member.owner == self.0
    }
}

#[derive(Debug, Clone)]
pub struct OwnerPrefix(String);

impl OwnerPrefix {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self(prefix.into())
    }
}

impl MemberPredicate for OwnerPrefix {
    fn accept(&self, member: &MemberInfo<'_>) -> bool {
        member.owner.starts_with(&self.0)
    }
}

/// Rejects members whose owner starts with any of the prefixes.
#[derive(Debug, Clone, Default)]
pub struct ExcludeOwnerPrefix(Vec<String>);

impl ExcludeOwnerPrefix {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(prefixes.into_iter().map(Into::into).collect())
    }

    /// Platform packages plus the agent's own runtime classes.
    pub fn platform() -> Self {
        Self::new(["java.", "javax.", "jdk.", "sun.", "com.sun.", "argcov."])
    }
}

impl MemberPredicate for ExcludeOwnerPrefix {
    fn accept(&self, member: &MemberInfo<'_>) -> bool {
        !self.0.iter().any(|p| member.owner.starts_with(p.as_str()))
    }
}

#[derive(Debug, Clone)]
pub struct NameIs(String);

impl NameIs {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl MemberPredicate for NameIs {
    fn accept(&self, member: &MemberInfo<'_>) -> bool {
        member.name == self.0
    }
}

/// Compiler-generated members: synthetic ones, and bridge methods.
#[derive(Debug, Clone, Copy, Default)]
pub struct SkipSynthetic;

impl MemberPredicate for SkipSynthetic {
    fn accept(&self, member: &MemberInfo<'_>) -> bool {
        if member.access.contains(AccessFlags::SYNTHETIC) {
            return false;
        }
        !(member.kind() == MemberKind::Method && member.access.contains(AccessFlags::BRIDGE))
    }
}

/// Accepts members with at least one parameter (or a field type) among
/// `types`. Results are cached per descriptor.
#[derive(Debug)]
pub struct ParameterTypesIntersect {
    types: HashSet<String>,
    cache: Mutex<HashMap<String, bool>>,
}

impl ParameterTypesIntersect {
    /// Types may be descriptors (`I`, `Ljava/lang/String;`) or Java names
    /// (`int`, `java.lang.String`).
    pub fn new<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            types: types.into_iter().map(|t| to_descriptor(t.as_ref())).collect(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn compute(&self, member: &MemberInfo<'_>) -> bool {
        let params = match member.kind() {
            MemberKind::Method => signature::parse(member.descriptor),
            MemberKind::Field => signature::parse_field(member.descriptor).map(|p| vec![p]),
        };
        match params {
            Ok(params) => params.iter().any(|p| self.types.contains(&p.descriptor())),
            Err(_) => false,
        }
    }
}

impl MemberPredicate for ParameterTypesIntersect {
    fn accept(&self, member: &MemberInfo<'_>) -> bool {
        if let Some(hit) = self.cache.lock().get(member.descriptor) {
            return *hit;
        }
        let hit = self.compute(member);
        self.cache.lock().insert(member.descriptor.to_string(), hit);
        hit
    }
}

fn to_descriptor(name: &str) -> String {
    let name = name.trim();
    if let Some(element) = name.strip_suffix("[]") {
        return format!("[{}", to_descriptor(element));
    }
    let primitive = match name {
        "boolean" => "Z",
        "byte" => "B",
        "char" => "C",
        "short" => "S",
        "int" => "I",
        "long" => "J",
        "float" => "F",
        "double" => "D",
        _ => "",
    };
    if !primitive.is_empty() {
        return primitive.to_string();
    }
    if signature::parse_field(name).is_ok() {
        return name.to_string();
    }
    format!("L{};", name.replace('.', "/"))
}

/// Builds the conjunction of configuration rules:
///
/// | Rule | Meaning |
/// |------|---------|
/// | `all` | everything |
/// | `owner=X` | owner equals `X` |
/// | `prefix=X` | owner starts with `X` |
/// | `exclude=X` | owner does not start with `X` |
/// | `name=X` | member name equals `X` |
/// | `params=A\|B` | some parameter type is `A` or `B` |
/// | `nosynthetic` | no synthetic or bridge members |
pub fn from_rules<S: AsRef<str>>(rules: &[S]) -> Result<Box<dyn MemberPredicate>, ConfigError> {
    let mut parts: Vec<Box<dyn MemberPredicate>> = Vec::with_capacity(rules.len());
    for rule in rules {
        let rule = rule.as_ref().trim();
        let part: Box<dyn MemberPredicate> = match rule.split_once('=') {
            None if rule == "all" => Box::new(AnyMember),
            None if rule == "nosynthetic" => Box::new(SkipSynthetic),
            Some(("owner", v)) if !v.is_empty() => Box::new(OwnerIs::new(v)),
            Some(("prefix", v)) if !v.is_empty() => Box::new(OwnerPrefix::new(v)),
            Some(("exclude", v)) if !v.is_empty() => Box::new(ExcludeOwnerPrefix::new([v])),
            Some(("name", v)) if !v.is_empty() => Box::new(NameIs::new(v)),
            Some(("params", v)) if !v.is_empty() => Box::new(ParameterTypesIntersect::new(v.split('|'))),
            _ => return Err(ConfigError::InvalidRule(rule.to_string())),
        };
        parts.push(part);
    }
    Ok(Box::new(AllOf(parts)))
}

/// Conjunction over a runtime-sized list; empty accepts everything.
pub struct AllOf(pub Vec<Box<dyn MemberPredicate>>);

impl MemberPredicate for AllOf {
    fn accept(&self, member: &MemberInfo<'_>) -> bool {
        self.0.iter().all(|p| p.accept(member))
    }
}
