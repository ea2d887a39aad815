//! The fail stack: nested deques of raised values bracketed by
//! `PushJump`/`PopJump` (spec §3 "Fail stack", grounded on `VM/FailStack.hpp`).

use std::collections::VecDeque;

use super::value::Value;

#[derive(Debug, Default)]
pub struct FailStack {
    blocks: Vec<VecDeque<Value>>,
}

impl FailStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a new fail block (`PushJump`).
    pub fn blk_add(&mut self) {
        self.blocks.push(VecDeque::new());
    }

    /// End the innermost fail block (`PopJump`), dereferencing whatever was
    /// left unclaimed in it.
    pub fn blk_rem(&mut self) {
        if let Some(block) = self.blocks.pop() {
            for v in block {
                v.deref();
            }
        }
    }

    pub fn push(&mut self, val: Value, iref: bool) {
        if iref {
            val.iref();
        }
        if let Some(block) = self.blocks.last_mut() {
            block.push_back(val);
        }
    }

    pub fn pop(&mut self, dref: bool) -> Option<Value> {
        let v = self.blocks.last_mut().and_then(|b| b.pop_back());
        if dref {
            if let Some(ref v) = v {
                v.deref();
            }
        }
        v
    }

    pub fn size(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn back_is_empty(&self) -> bool {
        self.blocks.last().is_none_or(|b| b.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_pop_within_a_block() {
        let mut fs = FailStack::new();
        fs.blk_add();
        let v = Value::str_val("x", 0, 0);
        fs.push(v.clone(), false);
        assert!(!fs.back_is_empty());
        let popped = fs.pop(false).unwrap();
        assert_eq!(popped.as_str().map(|s| s.to_string()), Some("x".to_string()));
    }

    #[test]
    fn blk_rem_derefs_unclaimed_values() {
        let mut fs = FailStack::new();
        fs.blk_add();
        let v = Value::str_val("x", 0, 0);
        fs.push(v.clone(), true);
        assert_eq!(v.refcount(), 2);
        fs.blk_rem();
        assert_eq!(v.refcount(), 1);
        assert!(fs.is_empty());
    }
}
