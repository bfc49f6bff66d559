//! Host value model
//!
//! `HostValue` is the closed set of host shapes the bridge knows how to
//! marshal. Host types enter it through `From` impls; anything with no
//! guest representation (functions, channels, raw pointers) is carried as
//! `Opaque` so the Pusher can reject it with a precise error.
//!
//! # Numbers
//!
//! `Int`, `UInt` and `Float` compare by numeric value, so `Int(42)` equals
//! `Float(42.0)`. The guest has a single number type and `t[1]` and `t[1.0]`
//! name the same entry, so the host side must agree for round trips to hold.
//!
//! # Maps
//!
//! `HostMap` keeps insertion order and indexes scalar keys. Composite keys
//! (a guest table used as a key comes back as a `Map` key) are never merged:
//! guest tables are keyed by identity, so two equal-looking table keys are
//! still two entries.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Aliasing host pointer; the only way to build a cyclic host value
pub type Shared = Rc<RefCell<HostValue>>;

/// Host value kinds that have no guest representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpaqueKind {
    Function,
    Channel,
    Pointer,
}

impl OpaqueKind {
    pub fn name(self) -> &'static str {
        match self {
            OpaqueKind::Function => "function",
            OpaqueKind::Channel => "channel",
            OpaqueKind::Pointer => "pointer",
        }
    }
}

impl std::fmt::Display for OpaqueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A host value the guest cannot see, identified by kind and label
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Opaque {
    kind: OpaqueKind,
    label: String,
}

impl Opaque {
    pub fn new(kind: OpaqueKind, label: impl Into<String>) -> Self {
        Opaque {
            kind,
            label: label.into(),
        }
    }

    pub fn function(label: impl Into<String>) -> Self {
        Self::new(OpaqueKind::Function, label)
    }

    pub fn channel(label: impl Into<String>) -> Self {
        Self::new(OpaqueKind::Channel, label)
    }

    pub fn pointer(label: impl Into<String>) -> Self {
        Self::new(OpaqueKind::Pointer, label)
    }

    pub fn kind(&self) -> OpaqueKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// One field of a record
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub value: HostValue,
    /// Only exported fields are visible to the guest
    pub exported: bool,
}

/// Structured host record: a type name and an ordered list of fields
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    name: String,
    fields: Vec<Field>,
}

impl Record {
    pub fn new(name: impl Into<String>) -> Self {
        Record {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Add an exported field (builder pattern)
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<HostValue>) -> Self {
        self.fields.push(Field {
            name: name.into(),
            value: value.into(),
            exported: true,
        });
        self
    }

    /// Add a field the guest never sees
    pub fn with_private_field(
        mut self,
        name: impl Into<String>,
        value: impl Into<HostValue>,
    ) -> Self {
        self.fields.push(Field {
            name: name.into(),
            value: value.into(),
            exported: false,
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn exported_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.exported)
    }
}

/// Hashable form of a scalar host value
///
/// Numbers are normalized so that numerically equal values share a key:
/// anything integral that fits in an `i128` becomes `Integer`, other finite
/// or infinite floats are keyed by their bits. NaN has no key form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScalarKey {
    Nil,
    Bool(bool),
    Integer(i128),
    Float(u64),
    String(String),
}

/// 2^127, the first magnitude an `i128` cannot hold
const I128_BOUND: f64 = 170_141_183_460_469_231_731_687_303_715_884_105_728.0;

fn integral_float(f: f64) -> Option<i128> {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < I128_BOUND {
        Some(f as i128)
    } else {
        None
    }
}

impl ScalarKey {
    /// Key form of `value`, or `None` for composites and NaN
    pub fn from_value(value: &HostValue) -> Option<ScalarKey> {
        match value {
            HostValue::Nil => Some(ScalarKey::Nil),
            HostValue::Bool(b) => Some(ScalarKey::Bool(*b)),
            HostValue::Int(i) => Some(ScalarKey::Integer(*i as i128)),
            HostValue::UInt(u) => Some(ScalarKey::Integer(*u as i128)),
            HostValue::Float(f) if f.is_nan() => None,
            HostValue::Float(f) => Some(match integral_float(*f) {
                Some(i) => ScalarKey::Integer(i),
                None => ScalarKey::Float(f.to_bits()),
            }),
            HostValue::String(s) => Some(ScalarKey::String(s.clone())),
            _ => None,
        }
    }
}

/// Insertion-ordered host mapping with any `HostValue` as key
#[derive(Debug, Clone, Default)]
pub struct HostMap {
    entries: Vec<(HostValue, HostValue)>,
    index: HashMap<ScalarKey, usize>,
}

impl HostMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        HostMap {
            entries: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert an entry. A scalar key that is already present has its value
    /// replaced and the old value returned; composite keys always append.
    pub fn insert(
        &mut self,
        key: impl Into<HostValue>,
        value: impl Into<HostValue>,
    ) -> Option<HostValue> {
        let key = key.into();
        let value = value.into();
        if let Some(scalar) = ScalarKey::from_value(&key) {
            if let Some(&i) = self.index.get(&scalar) {
                return Some(std::mem::replace(&mut self.entries[i].1, value));
            }
            self.index.insert(scalar, self.entries.len());
        }
        self.entries.push((key, value));
        None
    }

    pub fn get(&self, key: &HostValue) -> Option<&HostValue> {
        match ScalarKey::from_value(key) {
            Some(scalar) => self.index.get(&scalar).map(|&i| &self.entries[i].1),
            None => self
                .entries
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v),
        }
    }

    /// Look up a string key
    pub fn get_str(&self, key: &str) -> Option<&HostValue> {
        self.index
            .get(&ScalarKey::String(key.to_string()))
            .map(|&i| &self.entries[i].1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&HostValue, &HostValue)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }
}

/// Maps are equal when they hold the same keys with equal values,
/// regardless of insertion order.
///
/// Scalar-keyed entries are matched through the index. Composite-keyed
/// entries are matched as a multiset: each entry must pair with a distinct
/// equal entry on the other side.
impl PartialEq for HostMap {
    fn eq(&self, other: &Self) -> bool {
        if self.len() != other.len() {
            return false;
        }
        let mut claimed = vec![false; other.entries.len()];
        for (key, value) in &self.entries {
            let found = match ScalarKey::from_value(key) {
                Some(scalar) => other
                    .index
                    .get(&scalar)
                    .copied()
                    .filter(|&i| other.entries[i].1 == *value),
                None => other.entries.iter().enumerate().position(|(i, (k, v))| {
                    !claimed[i] && ScalarKey::from_value(k).is_none() && k == key && v == value
                }),
            };
            match found {
                Some(i) if !claimed[i] => claimed[i] = true,
                _ => return false,
            }
        }
        true
    }
}

impl<K: Into<HostValue>, V: Into<HostValue>> FromIterator<(K, V)> for HostMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = HostMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl IntoIterator for HostMap {
    type Item = (HostValue, HostValue);
    type IntoIter = std::vec::IntoIter<(HostValue, HostValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// A host value the bridge can marshal (or reject)
#[derive(Debug, Clone)]
pub enum HostValue {
    Nil,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    Seq(Vec<HostValue>),
    Map(HostMap),
    Record(Record),
    Shared(Shared),
    Opaque(Opaque),
}

impl HostValue {
    /// Wrap a value in a fresh shared cell
    pub fn shared(value: impl Into<HostValue>) -> HostValue {
        HostValue::Shared(Rc::new(RefCell::new(value.into())))
    }

    /// Build a map value from key/value pairs
    pub fn map<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> HostValue
    where
        K: Into<HostValue>,
        V: Into<HostValue>,
    {
        HostValue::Map(entries.into_iter().collect())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            HostValue::Nil => "nil",
            HostValue::Bool(_) => "bool",
            HostValue::Int(_) => "int",
            HostValue::UInt(_) => "uint",
            HostValue::Float(_) => "float",
            HostValue::String(_) => "string",
            HostValue::Seq(_) => "sequence",
            HostValue::Map(_) => "map",
            HostValue::Record(_) => "record",
            HostValue::Shared(_) => "shared",
            HostValue::Opaque(o) => o.kind().name(),
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, HostValue::Nil)
    }

    /// Numeric value as `i64` when it is integral and in range
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            HostValue::Int(i) => Some(*i),
            HostValue::UInt(u) => i64::try_from(*u).ok(),
            HostValue::Float(f) => integral_float(*f).and_then(|i| i64::try_from(i).ok()),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&HostMap> {
        match self {
            HostValue::Map(m) => Some(m),
            _ => None,
        }
    }
}

#[derive(PartialEq)]
enum Numeric {
    Exact(i128),
    Inexact(f64),
}

fn numeric(value: &HostValue) -> Option<Numeric> {
    match value {
        HostValue::Int(i) => Some(Numeric::Exact(*i as i128)),
        HostValue::UInt(u) => Some(Numeric::Exact(*u as i128)),
        HostValue::Float(f) => Some(match integral_float(*f) {
            Some(i) => Numeric::Exact(i),
            None => Numeric::Inexact(*f),
        }),
        _ => None,
    }
}

/// Structural equality with numeric comparison across `Int`, `UInt` and
/// `Float`. `Shared` values are equal only when they are the same cell.
impl PartialEq for HostValue {
    fn eq(&self, other: &Self) -> bool {
        if let (Some(a), Some(b)) = (numeric(self), numeric(other)) {
            return a == b;
        }
        match (self, other) {
            (HostValue::Nil, HostValue::Nil) => true,
            (HostValue::Bool(a), HostValue::Bool(b)) => a == b,
            (HostValue::String(a), HostValue::String(b)) => a == b,
            (HostValue::Seq(a), HostValue::Seq(b)) => a == b,
            (HostValue::Map(a), HostValue::Map(b)) => a == b,
            (HostValue::Record(a), HostValue::Record(b)) => a == b,
            (HostValue::Shared(a), HostValue::Shared(b)) => Rc::ptr_eq(a, b),
            (HostValue::Opaque(a), HostValue::Opaque(b)) => a == b,
            _ => false,
        }
    }
}

macro_rules! impl_from_int {
    ($variant:ident as $wide:ty: $($t:ty),*) => {
        $(
            impl From<$t> for HostValue {
                fn from(v: $t) -> Self {
                    HostValue::$variant(v as $wide)
                }
            }
        )*
    };
}

impl_from_int!(Int as i64: i8, i16, i32, i64, isize);
impl_from_int!(UInt as u64: u8, u16, u32, u64, usize);

impl From<f32> for HostValue {
    fn from(v: f32) -> Self {
        HostValue::Float(v as f64)
    }
}

impl From<f64> for HostValue {
    fn from(v: f64) -> Self {
        HostValue::Float(v)
    }
}

impl From<bool> for HostValue {
    fn from(v: bool) -> Self {
        HostValue::Bool(v)
    }
}

impl From<&str> for HostValue {
    fn from(v: &str) -> Self {
        HostValue::String(v.to_string())
    }
}

impl From<String> for HostValue {
    fn from(v: String) -> Self {
        HostValue::String(v)
    }
}

impl<T: Into<HostValue>> From<Vec<T>> for HostValue {
    fn from(v: Vec<T>) -> Self {
        HostValue::Seq(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<HostValue>> From<Option<T>> for HostValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(HostValue::Nil, Into::into)
    }
}

impl From<HostMap> for HostValue {
    fn from(v: HostMap) -> Self {
        HostValue::Map(v)
    }
}

impl From<Record> for HostValue {
    fn from(v: Record) -> Self {
        HostValue::Record(v)
    }
}

impl From<Opaque> for HostValue {
    fn from(v: Opaque) -> Self {
        HostValue::Opaque(v)
    }
}

impl From<Shared> for HostValue {
    fn from(v: Shared) -> Self {
        HostValue::Shared(v)
    }
}
