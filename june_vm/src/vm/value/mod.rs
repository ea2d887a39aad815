//! The closed value model (spec §3 "Value", §4.2 "Value Model").
//!
//! `Value` is a cheaply-cloneable handle (`Rc`) onto a [`VarHeader`] plus a
//! [`ValueData`] payload. Ordinary `Clone::clone` aliases the same
//! underlying object — the moral equivalent of copying a raw pointer in the
//! original engine — while [`Value::clone_at`] implements the *value-level*
//! `clone(srcId, idx)` operation the spec describes, producing a logically
//! new value at a new origin. Domain refcounting (`iref`/`deref`) is tracked
//! independently of Rust's own `Rc` strong count, on [`VarHeader`].

mod func;
mod header;
mod source_value;
mod vec_value;

pub use func::{FnBody, FnBodySpan, FnData, FuncData, NativeFn};
pub use header::{VarHeader, INFO_ATTR_BASED, INFO_CALLABLE, INFO_LOAD_AS_REF};
pub use source_value::SourceData;
pub use vec_value::VecData;

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::state::State;
use crate::vm::error::VmError;
use crate::vm::type_table::TypeKey;

/// The ten closed shapes a value may take (spec §3, §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Nil,
    Bool,
    Int,
    Float,
    Str,
    Vec,
    Func,
    Source,
    TypeId,
    Any,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A value boxed generically, carrying its own dynamic type alongside the
/// inner payload (spec §3 "Any").
#[derive(Debug, Clone)]
pub struct AnyData {
    pub inner: Box<Value>,
    pub dyn_type: TypeKey,
}

#[derive(Debug, Clone)]
pub enum ValueData {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Vec(VecData),
    Func(FuncData),
    Source(SourceData),
    TypeId(TypeKey),
    Any(AnyData),
}

impl ValueData {
    pub fn value_type(&self) -> ValueType {
        match self {
            ValueData::Nil => ValueType::Nil,
            ValueData::Bool(_) => ValueType::Bool,
            ValueData::Int(_) => ValueType::Int,
            ValueData::Float(_) => ValueType::Float,
            ValueData::Str(_) => ValueType::Str,
            ValueData::Vec(_) => ValueType::Vec,
            ValueData::Func(_) => ValueType::Func,
            ValueData::Source(_) => ValueType::Source,
            ValueData::TypeId(_) => ValueType::TypeId,
            ValueData::Any(_) => ValueType::Any,
        }
    }
}

struct ValueCell {
    header: VarHeader,
    data: RefCell<ValueData>,
}

impl fmt::Debug for ValueCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueCell")
            .field("header", &self.header)
            .field("data", &self.data.borrow())
            .finish()
    }
}

/// A reference-counted runtime value. See the module documentation for the
/// distinction between `Clone::clone` (aliasing) and [`Value::clone_at`]
/// (the spec's value-level clone).
#[derive(Clone, Debug)]
pub struct Value(Rc<ValueCell>);

impl Value {
    fn new(data: ValueData, src_id: u64, idx: u64, info: u8) -> Self {
        Value(Rc::new(ValueCell {
            header: VarHeader::new(src_id, idx, info),
            data: RefCell::new(data),
        }))
    }

    pub fn nil(src_id: u64, idx: u64) -> Self {
        Value::new(ValueData::Nil, src_id, idx, 0)
    }

    pub fn bool_val(b: bool, src_id: u64, idx: u64) -> Self {
        Value::new(ValueData::Bool(b), src_id, idx, 0)
    }

    pub fn int_val(n: i64, src_id: u64, idx: u64) -> Self {
        Value::new(ValueData::Int(n), src_id, idx, 0)
    }

    pub fn float_val(n: f64, src_id: u64, idx: u64) -> Self {
        Value::new(ValueData::Float(n), src_id, idx, 0)
    }

    pub fn str_val(s: impl Into<String>, src_id: u64, idx: u64) -> Self {
        Value::new(ValueData::Str(s.into()), src_id, idx, 0)
    }

    pub fn vec_val(items: Vec<Value>, refs: bool, src_id: u64, idx: u64) -> Self {
        Value::new(ValueData::Vec(VecData::new(items, refs)), src_id, idx, 0)
    }

    pub fn type_id_val(key: TypeKey, src_id: u64, idx: u64) -> Self {
        Value::new(ValueData::TypeId(key), src_id, idx, 0)
    }

    pub fn func_val(data: FuncData, src_id: u64, idx: u64) -> Self {
        let info = INFO_CALLABLE;
        Value::new(ValueData::Func(data), src_id, idx, info)
    }

    pub fn source_val(data: SourceData, src_id: u64, idx: u64) -> Self {
        Value::new(ValueData::Source(data), src_id, idx, INFO_ATTR_BASED)
    }

    pub fn any_val(inner: Value, dyn_type: TypeKey, src_id: u64, idx: u64) -> Self {
        Value::new(
            ValueData::Any(AnyData {
                inner: Box::new(inner),
                dyn_type,
            }),
            src_id,
            idx,
            0,
        )
    }

    pub fn header(&self) -> &VarHeader {
        &self.0.header
    }

    pub fn src_id(&self) -> u64 {
        self.0.header.src_id.get()
    }

    pub fn idx(&self) -> u64 {
        self.0.header.idx.get()
    }

    pub fn value_type(&self) -> ValueType {
        self.0.data.borrow().value_type()
    }

    pub fn is_nil(&self) -> bool {
        matches!(self.value_type(), ValueType::Nil)
    }

    pub fn is_callable(&self) -> bool {
        self.0.header.is_callable()
    }

    pub fn is_attr_based(&self) -> bool {
        self.0.header.is_attr_based()
    }

    pub fn is_load_as_ref(&self) -> bool {
        self.0.header.is_load_as_ref()
    }

    pub fn set_load_as_ref(&self) {
        self.0.header.set_load_as_ref();
    }

    /// Whether this `Value` is the unique owner of its underlying cell — the
    /// Rust-level analogue of the original's `refCount() == 1` ownership
    /// check used by `Create` to decide move-vs-copy.
    pub fn is_uniquely_held(&self) -> bool {
        Rc::strong_count(&self.0) == 1
    }

    pub fn iref(&self) {
        self.0.header.iref();
    }

    pub fn deref(&self) -> u64 {
        self.0.header.deref()
    }

    pub fn refcount(&self) -> u64 {
        self.0.header.refcount()
    }

    /// Identity check: do these two handles point at the same underlying
    /// object? Used by the environment/attribute tables to detect a
    /// self-overwrite (`add` re-binding the same value under its own name).
    pub fn is_same_object(&self, other: &Value) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// `typeFnId()`: normally the value's own type, except `Any`, whose
    /// method-table lookups are delegated to its boxed dynamic type.
    pub fn type_fn_key(&self) -> TypeKey {
        match &*self.0.data.borrow() {
            ValueData::Any(a) => a.dyn_type,
            other => TypeKey::Builtin(other.value_type()),
        }
    }

    pub fn type_key(&self) -> TypeKey {
        TypeKey::Builtin(self.value_type())
    }

    /// The payload of a `TypeId` value — the type it names, not the type of
    /// the `TypeId` value itself.
    pub fn as_type_id(&self) -> Option<TypeKey> {
        match &*self.0.data.borrow() {
            ValueData::TypeId(k) => Some(*k),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match &*self.0.data.borrow() {
            ValueData::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match &*self.0.data.borrow() {
            ValueData::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match &*self.0.data.borrow() {
            ValueData::Float(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<std::cell::Ref<'_, str>> {
        let data = self.0.data.borrow();
        std::cell::Ref::filter_map(data, |d| match d {
            ValueData::Str(s) => Some(s.as_str()),
            _ => None,
        })
        .ok()
    }

    pub fn with_func<R>(&self, f: impl FnOnce(&FuncData) -> R) -> Option<R> {
        match &*self.0.data.borrow() {
            ValueData::Func(fd) => Some(f(fd)),
            _ => None,
        }
    }

    pub fn with_vec<R>(&self, f: impl FnOnce(&VecData) -> R) -> Option<R> {
        match &*self.0.data.borrow() {
            ValueData::Vec(v) => Some(f(v)),
            _ => None,
        }
    }

    pub fn with_vec_mut<R>(&self, f: impl FnOnce(&mut VecData) -> R) -> Option<R> {
        match &mut *self.0.data.borrow_mut() {
            ValueData::Vec(v) => Some(f(v)),
            _ => None,
        }
    }

    pub fn with_source<R>(&self, f: impl FnOnce(&SourceData) -> R) -> Option<R> {
        match &*self.0.data.borrow() {
            ValueData::Source(s) => Some(f(s)),
            _ => None,
        }
    }

    /// Value-level `clone(srcId, idx)` (spec §4.2). Produces a logically new
    /// value, not an alias — `Vec` honors its `refs` flag, `Source` produces
    /// a non-owning view, everything else copies its scalar payload.
    pub fn clone_at(&self, src_id: u64, idx: u64) -> Value {
        let info = self.raw_info();
        match &*self.0.data.borrow() {
            ValueData::Nil => Value::new(ValueData::Nil, src_id, idx, info),
            ValueData::Bool(b) => Value::new(ValueData::Bool(*b), src_id, idx, info),
            ValueData::Int(n) => Value::new(ValueData::Int(*n), src_id, idx, info),
            ValueData::Float(n) => Value::new(ValueData::Float(*n), src_id, idx, info),
            ValueData::Str(s) => Value::new(ValueData::Str(s.clone()), src_id, idx, info),
            ValueData::TypeId(k) => Value::new(ValueData::TypeId(*k), src_id, idx, info),
            ValueData::Any(a) => {
                let inner = a.inner.clone_at(src_id, idx);
                Value::new(
                    ValueData::Any(AnyData {
                        inner: Box::new(inner),
                        dyn_type: a.dyn_type,
                    }),
                    src_id,
                    idx,
                    info,
                )
            }
            ValueData::Vec(v) => {
                let items = if v.refs {
                    v.items
                        .iter()
                        .map(|e| {
                            e.iref();
                            e.clone()
                        })
                        .collect()
                } else {
                    v.items.iter().map(|e| e.clone_at(src_id, idx)).collect()
                };
                Value::new(
                    ValueData::Vec(VecData::new(items, v.refs)),
                    src_id,
                    idx,
                    info,
                )
            }
            ValueData::Func(fd) => Value::new(ValueData::Func(fd.clone()), src_id, idx, info),
            ValueData::Source(s) => {
                Value::new(ValueData::Source(s.clone_handle()), src_id, idx, info)
            }
        }
    }

    fn raw_info(&self) -> u8 {
        let mut info = 0u8;
        if self.is_callable() {
            info |= INFO_CALLABLE;
        }
        if self.is_attr_based() {
            info |= INFO_ATTR_BASED;
        }
        info
    }

    /// Type-aware overwrite (spec §4.2 "set"). Replacing like-typed data
    /// keeps the target alive; replacing across variants resets to that
    /// variant's default. Strict type equality for `Store` is enforced by
    /// the executor, not here.
    pub fn set_from(&self, from: &Value) {
        let mut target = self.0.data.borrow_mut();
        let source = from.0.data.borrow();
        match (&mut *target, &*source) {
            (ValueData::Nil, ValueData::Nil) => {}
            (ValueData::Bool(t), ValueData::Bool(s)) => *t = *s,
            (ValueData::Int(t), ValueData::Int(s)) => *t = *s,
            (ValueData::Float(t), ValueData::Float(s)) => *t = *s,
            (ValueData::Str(t), ValueData::Str(s)) => t.clone_from(s),
            (ValueData::TypeId(t), ValueData::TypeId(s)) => *t = *s,
            (ValueData::Func(t), ValueData::Func(s)) => *t = s.clone(),
            (ValueData::Source(t), ValueData::Source(s)) => {
                t.file = Rc::clone(&s.file);
                t.env = Rc::clone(&s.env);
            }
            (ValueData::Vec(t), ValueData::Vec(s)) => {
                if t.refs {
                    for v in t.items.drain(..) {
                        v.deref();
                    }
                    t.items = s.items.clone();
                    for v in &t.items {
                        v.iref();
                    }
                } else {
                    t.items = s.items.clone();
                }
            }
            (ValueData::Any(t), ValueData::Any(s)) => {
                t.inner = s.inner.clone();
                t.dyn_type = s.dyn_type;
            }
            // `Func`, `Source` and `Any` have no meaningful "empty" default
            // (there is no null body span / null environment in this
            // model), so a cross-variant `set` onto one of these is left
            // unchanged rather than reset.
            (ValueData::Func(_), _) | (ValueData::Source(_), _) | (ValueData::Any(_), _) => {}
            (t, _) => *t = default_for(t.value_type()),
        }
    }

    /// `attrExists`/`attrGet`/`attrSet`: default "no attributes" for
    /// scalars; `Vec` answers numeric-string indices plus `size`/`refs`;
    /// `Source` delegates into its module environment.
    pub fn attr_exists(&self, name: &str) -> bool {
        match &*self.0.data.borrow() {
            ValueData::Vec(v) => {
                v.named_attr_exists(name) || name.parse::<usize>().is_ok_and(|i| v.index_in_range(i))
            }
            ValueData::Source(s) => s.env.borrow().exists(name),
            _ => false,
        }
    }

    pub fn attr_get(&self, name: &str) -> Option<Value> {
        match &*self.0.data.borrow() {
            ValueData::Vec(v) => {
                if name == "refs" {
                    return Some(Value::bool_val(v.refs, self.src_id(), self.idx()));
                }
                if name == "size" {
                    return Some(Value::int_val(v.items.len() as i64, self.src_id(), self.idx()));
                }
                let i: usize = name.parse().ok()?;
                v.items.get(i).cloned()
            }
            ValueData::Source(s) => s.env.borrow().get(name),
            _ => None,
        }
    }

    pub fn attr_set(&self, name: &str, val: Value, iref: bool) -> Result<(), VmError> {
        match &mut *self.0.data.borrow_mut() {
            ValueData::Vec(v) => {
                if name == "refs" {
                    if let Some(want_refs) = val.as_bool() {
                        if want_refs != v.refs {
                            if want_refs {
                                for item in &v.items {
                                    item.iref();
                                }
                            } else {
                                for item in &v.items {
                                    item.deref();
                                }
                            }
                            v.refs = want_refs;
                        }
                    }
                    return Ok(());
                }
                let i: usize = name
                    .parse()
                    .map_err(|_| VmError::exec(format!("Vec has no attribute `{}`", name)))?;
                if let Some(slot) = v.items.get_mut(i) {
                    if v.refs {
                        slot.deref();
                    }
                    *slot = val;
                    if v.refs || iref {
                        slot.iref();
                    }
                }
                Ok(())
            }
            ValueData::Source(s) => {
                s.env.borrow_mut().add(name, val, iref);
                Ok(())
            }
            other => Err(VmError::exec(format!(
                "type `{:?}` has no attributes",
                other.value_type()
            ))),
        }
    }

    /// `toString` (spec §4.2): strings return themselves; everything else
    /// resolves a callable `toStr` through attribute lookup (if
    /// attribute-based) then the type-function table, and requires the
    /// result to itself be a string.
    pub fn to_string_value(&self, state: &mut State) -> Result<String, VmError> {
        if let ValueData::Str(s) = &*self.0.data.borrow() {
            return Ok(s.clone());
        }
        let method = self.resolve_method(state, "toStr").ok_or_else(|| {
            VmError::exec(format!(
                "type `{}` has no `toStr` method",
                state.type_name(self.type_fn_key())
            ))
        })?;
        let result = state.call_value(&method, vec![self.clone()], self.src_id(), self.idx())?;
        match &*result.0.data.borrow() {
            ValueData::Str(s) => Ok(s.clone()),
            other => Err(VmError::exec(format!(
                "toStr returned non-string value of type `{:?}`",
                other.value_type()
            ))),
        }
    }

    /// `toBool`, mirroring `toString`'s resolution policy exactly.
    pub fn to_bool_value(&self, state: &mut State) -> Result<bool, VmError> {
        if let ValueData::Bool(b) = &*self.0.data.borrow() {
            return Ok(*b);
        }
        let method = self.resolve_method(state, "toBool").ok_or_else(|| {
            VmError::exec(format!(
                "type `{}` has no `toBool` method",
                state.type_name(self.type_fn_key())
            ))
        })?;
        let result = state.call_value(&method, vec![self.clone()], self.src_id(), self.idx())?;
        match &*result.0.data.borrow() {
            ValueData::Bool(b) => Ok(*b),
            other => Err(VmError::exec(format!(
                "toBool returned non-bool value of type `{:?}`",
                other.value_type()
            ))),
        }
    }

    fn resolve_method(&self, state: &mut State, name: &str) -> Option<Value> {
        if self.is_attr_based() {
            if let Some(m) = self.attr_get(name) {
                return Some(m);
            }
        }
        state.resolve_type_fn(self, name)
    }

    /// A simple, state-free rendering used for diagnostics (`VmError`'s
    /// `Display` impl has no `State` to resolve a `toStr` method through).
    pub fn display_for_error(&self) -> String {
        match &*self.0.data.borrow() {
            ValueData::Nil => "nil".to_string(),
            ValueData::Bool(b) => b.to_string(),
            ValueData::Int(n) => n.to_string(),
            ValueData::Float(n) => n.to_string(),
            ValueData::Str(s) => s.clone(),
            ValueData::Vec(v) => format!("<Vec of {} elements>", v.items.len()),
            ValueData::Func(fd) => format!("<Func {}>", fd.src_name),
            ValueData::Source(_) => "<Source>".to_string(),
            ValueData::TypeId(k) => format!("<TypeId {:?}>", k),
            ValueData::Any(a) => format!("<Any {:?}>", a.dyn_type),
        }
    }
}

fn default_for(vt: ValueType) -> ValueData {
    match vt {
        ValueType::Nil => ValueData::Nil,
        ValueType::Bool => ValueData::Bool(false),
        ValueType::Int => ValueData::Int(0),
        ValueType::Float => ValueData::Float(0.0),
        ValueType::Str => ValueData::Str(String::new()),
        ValueType::Vec => ValueData::Vec(VecData::new(Vec::new(), false)),
        ValueType::TypeId => ValueData::TypeId(TypeKey::All),
        // Unreachable in practice: `set_from` matches `Func`/`Source`/`Any`
        // targets in their own arm before falling through to this helper.
        ValueType::Func | ValueType::Source | ValueType::Any => unreachable!(
            "set_from only calls default_for on a scalar target"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_at_assigns_new_origin_but_same_payload() {
        let v = Value::int_val(42, 1, 1);
        let c = v.clone_at(2, 9);
        assert_eq!(c.as_int(), Some(42));
        assert_eq!(c.src_id(), 2);
        assert_eq!(c.idx(), 9);
    }

    #[test]
    fn vec_clone_in_ref_mode_shares_elements_and_irefs() {
        let elem = Value::int_val(1, 0, 0);
        let v = Value::vec_val(vec![elem.clone()], true, 0, 0);
        assert_eq!(elem.refcount(), 1);
        let _c = v.clone_at(0, 0);
        assert_eq!(elem.refcount(), 2);
    }

    #[test]
    fn vec_clone_without_refs_deep_copies_elements() {
        let elem = Value::int_val(1, 0, 0);
        let v = Value::vec_val(vec![elem.clone()], false, 5, 5);
        let c = v.clone_at(9, 9);
        let c_elem = c.with_vec(|d| d.items[0].clone()).unwrap();
        assert!(!elem.is_same_object(&c_elem));
        assert_eq!(c_elem.src_id(), 9);
    }

    #[test]
    fn vec_attrs_expose_size_refs_and_indices() {
        let items = vec![
            Value::int_val(1, 0, 0),
            Value::int_val(2, 0, 0),
            Value::int_val(3, 0, 0),
        ];
        let v = Value::vec_val(items, true, 0, 0);
        assert!(v.attr_exists("size"));
        assert!(v.attr_exists("refs"));
        assert!(v.attr_exists("1"));
        assert!(!v.attr_exists("7"));
        assert_eq!(v.attr_get("size").unwrap().as_int(), Some(3));
        assert_eq!(v.attr_get("1").unwrap().as_int(), Some(2));
        assert!(v.attr_get("7").is_none());
    }

    #[test]
    fn set_from_resets_to_default_across_variants() {
        let a = Value::int_val(5, 0, 0);
        let b = Value::str_val("hi", 0, 0);
        a.set_from(&b);
        assert_eq!(a.as_int(), Some(0));
    }

    #[test]
    fn set_from_keeps_like_typed_value() {
        let a = Value::int_val(5, 0, 0);
        let b = Value::int_val(9, 0, 0);
        a.set_from(&b);
        assert_eq!(a.as_int(), Some(9));
    }

    #[test]
    fn iref_deref_round_trip() {
        let v = Value::nil(0, 0);
        assert_eq!(v.refcount(), 1);
        v.iref();
        v.iref();
        assert_eq!(v.deref(), 2);
        assert_eq!(v.deref(), 1);
    }
}
