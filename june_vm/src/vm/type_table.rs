//! Per-type method tables, and the "All" fallback every type inherits from
//! (spec §3 "Type-function table", grounded on `State::addTypeFn`/`getTypeFn`).

use std::collections::HashMap;

use super::value::{Value, ValueType};

/// Identifies a type for the purposes of method dispatch. Built-in values use
/// `Builtin`; native modules that register their own attribute-bearing types
/// are handed a fresh `Custom` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKey {
    Builtin(ValueType),
    /// The "All" fallback table every type inherits from.
    All,
    Custom(u64),
}

impl From<ValueType> for TypeKey {
    fn from(vt: ValueType) -> Self {
        TypeKey::Builtin(vt)
    }
}

#[derive(Debug, Default)]
struct TypeEntry {
    methods: HashMap<String, Value>,
}

/// Maps each type to a name→`Func` map, plus the distinguished `All` table
/// every lookup falls back to.
#[derive(Debug, Default)]
pub struct TypeTable {
    entries: HashMap<TypeKey, TypeEntry>,
    names: HashMap<TypeKey, String>,
    next_custom: u64,
}

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh key for a native-module-defined type.
    pub fn new_custom_key(&mut self) -> TypeKey {
        let key = TypeKey::Custom(self.next_custom);
        self.next_custom += 1;
        key
    }

    pub fn set_name(&mut self, key: TypeKey, name: impl Into<String>) {
        self.names.insert(key, name.into());
    }

    pub fn name_of(&self, key: TypeKey) -> String {
        self.names
            .get(&key)
            .cloned()
            .unwrap_or_else(|| format!("TypeId{{ {:?} }}", key))
    }

    /// Register `name` on `key`'s table. Returns `false` (and registers
    /// nothing) if the name already exists there — callers should report a
    /// "function already exists" failure in that case, matching the original.
    pub fn add_fn(&mut self, key: TypeKey, name: impl Into<String>, func: Value) -> bool {
        let name = name.into();
        let entry = self.entries.entry(key).or_default();
        if entry.methods.contains_key(&name) {
            return false;
        }
        entry.methods.insert(name, func);
        true
    }

    /// Resolve `name` for a value whose own type-fn key is `fn_key` and whose
    /// plain runtime type is `own_key` when it differs (only true for `Any`,
    /// whose `fn_key` is its boxed inner type). Mirrors `State::getTypeFn`:
    /// try `fn_key`'s table, then (if attribute-based and `own_key` differs)
    /// `own_key`'s table, then the `All` fallback.
    pub fn resolve(
        &self,
        fn_key: TypeKey,
        own_key: TypeKey,
        attr_based: bool,
        name: &str,
    ) -> Option<Value> {
        if let Some(entry) = self.entries.get(&fn_key) {
            if let Some(v) = entry.methods.get(name) {
                return Some(v.clone());
            }
        } else if attr_based && own_key != fn_key {
            if let Some(entry) = self.entries.get(&own_key) {
                if let Some(v) = entry.methods.get(name) {
                    return Some(v.clone());
                }
            }
        }
        self.entries
            .get(&TypeKey::All)
            .and_then(|e| e.methods.get(name))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::value::Value;

    #[test]
    fn add_fn_rejects_duplicate_names() {
        let mut table = TypeTable::new();
        let key = TypeKey::Builtin(ValueType::Int);
        let f = Value::nil(0, 0);
        assert!(table.add_fn(key, "double", f.clone()));
        assert!(!table.add_fn(key, "double", f));
    }

    #[test]
    fn resolve_falls_back_to_all_table() {
        let mut table = TypeTable::new();
        let all_fn = Value::nil(0, 0);
        table.add_fn(TypeKey::All, "toStr", all_fn);
        let resolved = table.resolve(TypeKey::Builtin(ValueType::Int), TypeKey::Builtin(ValueType::Int), false, "toStr");
        assert!(resolved.is_some());
    }

    #[test]
    fn unregistered_type_has_default_name() {
        let table = TypeTable::new();
        let name = table.name_of(TypeKey::Custom(7));
        assert!(name.contains("Custom(7)"));
    }
}
