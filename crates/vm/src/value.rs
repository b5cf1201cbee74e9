//! Runtime values.
//!
//! Scalars are copied; strings are immutable and shared; arrays and hashes
//! are shared mutable references. Lifetime is managed by `Arc` reference
//! counts.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::function::Function;
use crate::types::{TypeInfo, ValueTag};

/// Shared, mutable array storage.
pub type ArrRef = Arc<Mutex<Vec<Value>>>;

/// Shared, mutable, insertion-ordered hash storage.
pub type HashRef = Arc<Mutex<IndexMap<HashKey, Value>>>;

/// A value on the stack, in a slot, or inside a container.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Str(Arc<str>),
    Arr(ArrRef),
    Fun(Function),
    Type(Arc<TypeInfo>),
    Hash(HashRef),
    /// Opaque library handle.
    CLib(u64),
    /// Opaque symbol handle.
    CSym(u64),
    /// Marks a slot that has not been defined yet.
    Undef,
}

/// Values allowed as hash keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    Null,
    Bool(bool),
    Int(i64),
    Str(Arc<str>),
}

impl TryFrom<Value> for HashKey {
    type Error = Value;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Null => Ok(HashKey::Null),
            Value::Bool(b) => Ok(HashKey::Bool(b)),
            Value::Int(n) => Ok(HashKey::Int(n)),
            Value::Str(s) => Ok(HashKey::Str(s)),
            other => Err(other),
        }
    }
}

impl From<HashKey> for Value {
    fn from(key: HashKey) -> Self {
        match key {
            HashKey::Null => Value::Null,
            HashKey::Bool(b) => Value::Bool(b),
            HashKey::Int(n) => Value::Int(n),
            HashKey::Str(s) => Value::Str(s),
        }
    }
}

impl Value {
    pub fn str(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }

    pub fn arr(items: Vec<Value>) -> Self {
        Value::Arr(Arc::new(Mutex::new(items)))
    }

    pub fn hash(entries: IndexMap<HashKey, Value>) -> Self {
        Value::Hash(Arc::new(Mutex::new(entries)))
    }

    /// Build an exception hash: `{type: kind, ...fields}`.
    pub fn error(kind: &str, fields: &[(&str, Value)]) -> Self {
        let mut entries = IndexMap::with_capacity(fields.len() + 1);
        entries.insert(HashKey::Str(Arc::from("type")), Value::str(kind));
        for (name, value) in fields {
            entries.insert(HashKey::Str(Arc::from(*name)), value.clone());
        }
        Value::hash(entries)
    }

    /// The value's type tag. `None` for the undefined sentinel.
    pub fn tag(&self) -> Option<ValueTag> {
        Some(match self {
            Value::Null => ValueTag::Null,
            Value::Bool(_) => ValueTag::Bool,
            Value::Int(_) => ValueTag::Int,
            Value::Str(_) => ValueTag::Str,
            Value::Arr(_) => ValueTag::Arr,
            Value::Fun(_) => ValueTag::Fun,
            Value::Type(_) => ValueTag::Type,
            Value::Hash(_) => ValueTag::Hash,
            Value::CLib(_) => ValueTag::CLib,
            Value::CSym(_) => ValueTag::CSym,
            Value::Undef => return None,
        })
    }

    pub fn type_name(&self) -> &'static str {
        self.tag().map_or("Undef", |t| t.name())
    }

    pub fn is_undef(&self) -> bool {
        matches!(self, Value::Undef)
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null | Value::Undef => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Str(s) => !s.is_empty(),
            Value::Arr(a) => !a.lock().is_empty(),
            Value::Hash(h) => !h.lock().is_empty(),
            _ => true,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_ref()),
            _ => None,
        }
    }

    /// Look up a string key in a hash value.
    pub fn get_field(&self, name: &str) -> Option<Value> {
        match self {
            Value::Hash(h) => h.lock().get(&HashKey::Str(Arc::from(name))).cloned(),
            _ => None,
        }
    }

    /// Display with containers already being printed shown as `[...]` or
    /// `{...}`. Elements are copied out of the lock before recursing.
    fn fmt_guarded(&self, f: &mut fmt::Formatter<'_>, seen: &mut Vec<*const ()>) -> fmt::Result {
        match self {
            Value::Arr(items) => {
                let ptr = Arc::as_ptr(items) as *const ();
                if seen.contains(&ptr) {
                    return f.write_str("[...]");
                }
                let items = items.lock().clone();
                seen.push(ptr);
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    item.fmt_nested(f, seen)?;
                }
                seen.pop();
                f.write_str("]")
            }
            Value::Hash(entries) => {
                let ptr = Arc::as_ptr(entries) as *const ();
                if seen.contains(&ptr) {
                    return f.write_str("{...}");
                }
                let entries = entries.lock().clone();
                seen.push(ptr);
                f.write_str("{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    Value::from(key.clone()).fmt_nested(f, seen)?;
                    f.write_str(": ")?;
                    value.fmt_nested(f, seen)?;
                }
                seen.pop();
                f.write_str("}")
            }
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Str(s) => f.write_str(s),
            Value::Fun(fun) => write!(f, "<{fun}>"),
            Value::Type(t) => write!(f, "<type {}>", t.name),
            Value::CLib(h) => write!(f, "<clib {h:#x}>"),
            Value::CSym(h) => write!(f, "<csym {h:#x}>"),
            Value::Undef => f.write_str("<undef>"),
        }
    }

    fn fmt_nested(&self, f: &mut fmt::Formatter<'_>, seen: &mut Vec<*const ()>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{s:?}"),
            other => other.fmt_guarded(f, seen),
        }
    }

    /// Structural equality. A pair of containers revisited while it is
    /// still being compared counts as equal, so cyclic values terminate.
    fn eq_guarded(&self, other: &Self, seen: &mut Vec<(*const (), *const ())>) -> bool {
        match (self, other) {
            (Value::Arr(a), Value::Arr(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let pair = (Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ());
                if seen.contains(&pair) {
                    return true;
                }
                let left = a.lock().clone();
                let right = b.lock().clone();
                if left.len() != right.len() {
                    return false;
                }
                seen.push(pair);
                let equal = left
                    .iter()
                    .zip(&right)
                    .all(|(x, y)| x.eq_guarded(y, seen));
                seen.pop();
                equal
            }
            (Value::Hash(a), Value::Hash(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let pair = (Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ());
                if seen.contains(&pair) {
                    return true;
                }
                let left = a.lock().clone();
                let right = b.lock().clone();
                if left.len() != right.len() {
                    return false;
                }
                seen.push(pair);
                let equal = left
                    .iter()
                    .all(|(k, x)| right.get(k).is_some_and(|y| x.eq_guarded(y, seen)));
                seen.pop();
                equal
            }
            (Value::Null, Value::Null) | (Value::Undef, Value::Undef) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Fun(a), Value::Fun(b)) => a.ptr_eq(b),
            (Value::Type(a), Value::Type(b)) => a.tag == b.tag,
            (Value::CLib(a), Value::CLib(b)) | (Value::CSym(a), Value::CSym(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.eq_guarded(other, &mut Vec::new())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_guarded(f, &mut Vec::new())
    }
}
