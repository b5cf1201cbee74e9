//! Built-in type descriptors.
//!
//! The registry is populated once when the VM is created and never changes
//! afterwards, so it is shared behind an `Arc` without a lock.

use std::fmt;
use std::sync::Arc;

/// Dynamic type tag of a value or of an abstract parent type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueTag {
    Null,
    Bool,
    Int,
    Str,
    Arr,
    Fun,
    /// Root of the hierarchy. No value carries it.
    Any,
    /// Parent of Str and Arr. No value carries it.
    Seq,
    Type,
    Hash,
    CLib,
    CSym,
}

/// All tags, in registry order.
pub const ALL_TAGS: [ValueTag; 12] = [
    ValueTag::Null,
    ValueTag::Bool,
    ValueTag::Int,
    ValueTag::Str,
    ValueTag::Arr,
    ValueTag::Fun,
    ValueTag::Any,
    ValueTag::Seq,
    ValueTag::Type,
    ValueTag::Hash,
    ValueTag::CLib,
    ValueTag::CSym,
];

impl ValueTag {
    pub fn name(&self) -> &'static str {
        match self {
            ValueTag::Null => "Null",
            ValueTag::Bool => "Bool",
            ValueTag::Int => "Int",
            ValueTag::Str => "Str",
            ValueTag::Arr => "Arr",
            ValueTag::Fun => "Fun",
            ValueTag::Any => "Any",
            ValueTag::Seq => "Seq",
            ValueTag::Type => "Type",
            ValueTag::Hash => "Hash",
            ValueTag::CLib => "CLib",
            ValueTag::CSym => "CSym",
        }
    }

    /// Immediate parent in the built-in hierarchy.
    pub fn parent(&self) -> Option<ValueTag> {
        match self {
            ValueTag::Any => None,
            ValueTag::Str | ValueTag::Arr => Some(ValueTag::Seq),
            _ => Some(ValueTag::Any),
        }
    }
}

impl fmt::Display for ValueTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfo {
    pub tag: ValueTag,
    pub name: &'static str,
    pub parent: Option<ValueTag>,
}

/// The set of built-in types.
#[derive(Debug)]
pub struct TypeRegistry {
    types: Vec<Arc<TypeInfo>>,
}

impl TypeRegistry {
    /// Build the registry of all built-in types.
    pub fn new() -> Self {
        let types = ALL_TAGS
            .iter()
            .map(|&tag| {
                Arc::new(TypeInfo {
                    tag,
                    name: tag.name(),
                    parent: tag.parent(),
                })
            })
            .collect();
        Self { types }
    }

    pub fn get(&self, tag: ValueTag) -> &Arc<TypeInfo> {
        &self.types[tag as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<TypeInfo>> {
        self.types.iter()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// True if `tag` is `ancestor` or descends from it.
    pub fn is_subtype(&self, tag: ValueTag, ancestor: ValueTag) -> bool {
        let mut current = Some(tag);
        while let Some(t) = current {
            if t == ancestor {
                return true;
            }
            current = self.get(t).parent;
        }
        false
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
