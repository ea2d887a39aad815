//! The `Vec` value: an ordered, growable list, optionally operating in
//! reference-sharing mode (spec §4.2, "Vec").

use super::Value;

/// `refs == true` means `clone_at` aliases each element (like every other
/// reference-counted value) instead of deep-copying it, and attribute
/// writes to the member reuse the incoming value's binding rather than
/// taking a fresh copy. Mirrors the original's `refs`-mode vector.
#[derive(Debug, Clone)]
pub struct VecData {
    pub items: Vec<Value>,
    pub refs: bool,
}

impl VecData {
    pub fn new(items: Vec<Value>, refs: bool) -> Self {
        Self { items, refs }
    }

    /// Attribute names this value always answers to, on top of integer indices.
    pub fn named_attr_exists(&self, name: &str) -> bool {
        matches!(name, "refs" | "size")
    }

    pub fn index_in_range(&self, idx: usize) -> bool {
        idx < self.items.len()
    }
}
