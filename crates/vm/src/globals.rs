//! Global symbol table.
//!
//! Names map to dense, zero-based indices in insertion order. Entries are
//! never removed, so an index stays valid for the life of the VM.

use indexmap::IndexMap;

use crate::value::Value;

#[derive(Debug, Default)]
pub struct SymbolTable {
    slots: IndexMap<Box<str>, Value>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of `name`, if present. Never creates a slot.
    pub fn check(&self, name: &str) -> Option<usize> {
        self.slots.get_index_of(name)
    }

    /// Index of `name`, appending an undefined slot if absent.
    pub fn resolve_or_create(&mut self, name: &str) -> usize {
        if let Some(index) = self.slots.get_index_of(name) {
            return index;
        }
        self.slots.insert_full(name.into(), Value::Undef).0
    }

    /// Resolve `name` and store `value` in its slot.
    pub fn define(&mut self, name: &str, value: Value) -> usize {
        let index = self.resolve_or_create(name);
        self.set(index, value);
        index
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.slots.get_index(index).map(|(name, _)| name.as_ref())
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.slots.get_index(index).map(|(_, value)| value)
    }

    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.slots.get(name)
    }

    /// Store into an existing slot. Returns false if `index` is unknown.
    pub fn set(&mut self, index: usize, value: Value) -> bool {
        match self.slots.get_index_mut(index) {
            Some((_, slot)) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Name for error messages, falling back to the index.
    pub(crate) fn describe(&self, index: usize) -> String {
        self.name(index)
            .map_or_else(|| format!("#{index}"), str::to_owned)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
