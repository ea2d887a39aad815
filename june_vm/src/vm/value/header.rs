//! The per-value header: origin, reference count, and info flags shared by
//! every variant (spec §3 "Value (polymorphic)").

use std::cell::Cell;

/// `call()` may be invoked directly, without probing a `"()"` attribute first.
pub const INFO_CALLABLE: u8 = 1 << 0;
/// `toStr`/`toBool` resolution prefers attribute lookup over the type-function table.
pub const INFO_ATTR_BASED: u8 = 1 << 1;
/// `Create` must move this value into its binding rather than copy it.
pub const INFO_LOAD_AS_REF: u8 = 1 << 2;

#[derive(Debug)]
pub struct VarHeader {
    pub src_id: Cell<u64>,
    pub idx: Cell<u64>,
    refcount: Cell<u64>,
    info: Cell<u8>,
}

impl VarHeader {
    pub fn new(src_id: u64, idx: u64, info: u8) -> Self {
        Self {
            src_id: Cell::new(src_id),
            idx: Cell::new(idx),
            refcount: Cell::new(1),
            info: Cell::new(info),
        }
    }

    pub fn iref(&self) {
        self.refcount.set(self.refcount.get() + 1);
    }

    /// Decrement the refcount and return the new value. Debug builds assert
    /// the count was nonzero — a `deref` without a matching prior
    /// `iref`/construction is always a bookkeeping bug.
    pub fn deref(&self) -> u64 {
        let cur = self.refcount.get();
        debug_assert!(cur > 0, "deref on a value with refcount already zero");
        let next = cur.saturating_sub(1);
        self.refcount.set(next);
        next
    }

    pub fn refcount(&self) -> u64 {
        self.refcount.get()
    }

    pub fn is_callable(&self) -> bool {
        self.info.get() & INFO_CALLABLE != 0
    }

    pub fn is_attr_based(&self) -> bool {
        self.info.get() & INFO_ATTR_BASED != 0
    }

    pub fn is_load_as_ref(&self) -> bool {
        self.info.get() & INFO_LOAD_AS_REF != 0
    }

    pub fn set_load_as_ref(&self) {
        self.info.set(self.info.get() | INFO_LOAD_AS_REF);
    }

    pub fn unset_load_as_ref(&self) {
        self.info.set(self.info.get() & !INFO_LOAD_AS_REF);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_header_starts_at_refcount_one() {
        let h = VarHeader::new(0, 0, 0);
        assert_eq!(h.refcount(), 1);
    }

    #[test]
    fn iref_and_deref_balance() {
        let h = VarHeader::new(1, 2, 0);
        h.iref();
        h.iref();
        assert_eq!(h.refcount(), 3);
        assert_eq!(h.deref(), 2);
        assert_eq!(h.deref(), 1);
    }

    #[test]
    fn load_as_ref_flag_toggles() {
        let h = VarHeader::new(0, 0, INFO_CALLABLE);
        assert!(h.is_callable());
        assert!(!h.is_load_as_ref());
        h.set_load_as_ref();
        assert!(h.is_load_as_ref());
        assert!(h.is_callable());
        h.unset_load_as_ref();
        assert!(!h.is_load_as_ref());
    }
}
