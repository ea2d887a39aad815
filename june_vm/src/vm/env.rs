//! Per-source variable environment: nested lexical frames, loop marks, and
//! the argument-binding stash (spec §4.7, grounded on `VM/Vars.hpp`).

use std::collections::HashMap;

use super::value::Value;

#[derive(Debug, Default)]
struct Frame(HashMap<String, Value>);

impl Frame {
    fn add(&mut self, name: &str, val: Value, iref: bool) {
        if let Some(old) = self.0.remove(name) {
            old.deref();
        }
        if iref {
            val.iref();
        }
        self.0.insert(name.to_string(), val);
    }

    fn remove(&mut self, name: &str, dref: bool) -> bool {
        if let Some(v) = self.0.remove(name) {
            if dref {
                v.deref();
            }
            true
        } else {
            false
        }
    }
}

/// One active call's stack of lexical scopes, plus the loop marks recorded
/// within it (`VarsStack` in the original).
#[derive(Debug, Default)]
struct CallFrames {
    frames: Vec<Frame>,
    loops_from: Vec<usize>,
}

impl CallFrames {
    fn new() -> Self {
        Self {
            frames: vec![Frame::default()],
            loops_from: Vec::new(),
        }
    }

    fn innermost_exists(&self, name: &str) -> bool {
        self.frames
            .last()
            .is_some_and(|f| f.0.contains_key(name))
    }

    fn exists_anywhere(&self, name: &str) -> bool {
        self.frames.iter().rev().any(|f| f.0.contains_key(name))
    }

    fn get(&self, name: &str) -> Option<Value> {
        self.frames
            .iter()
            .rev()
            .find_map(|f| f.0.get(name).cloned())
    }

    fn add(&mut self, name: &str, val: Value, iref: bool) {
        self.frames
            .last_mut()
            .expect("a call frame always has at least one scope")
            .add(name, val, iref);
    }

    fn remove(&mut self, name: &str, dref: bool) -> bool {
        self.frames
            .last_mut()
            .expect("a call frame always has at least one scope")
            .remove(name, dref)
    }

    fn inc_top(&mut self, count: u64) {
        for _ in 0..count {
            self.frames.push(Frame::default());
        }
    }

    fn dec_top(&mut self, count: u64) {
        for _ in 0..count {
            if let Some(frame) = self.frames.pop() {
                for v in frame.0.into_values() {
                    v.deref();
                }
            }
        }
    }

    fn push_loop(&mut self) {
        self.frames.push(Frame::default());
        self.loops_from.push(self.frames.len());
    }

    /// `continue`: unwind back to the loop's own frame and start fresh,
    /// without forgetting the loop mark (the loop keeps running).
    fn loop_continue(&mut self) {
        if let Some(&depth) = self.loops_from.last() {
            while self.frames.len() > depth {
                if let Some(frame) = self.frames.pop() {
                    for v in frame.0.into_values() {
                        v.deref();
                    }
                }
            }
            self.frames.push(Frame::default());
        }
    }

    /// `break`/fall-through: unwind back to the loop's own frame and forget
    /// the mark entirely.
    fn pop_loop(&mut self) {
        if let Some(depth) = self.loops_from.pop() {
            while self.frames.len() >= depth {
                if let Some(frame) = self.frames.pop() {
                    for v in frame.0.into_values() {
                        v.deref();
                    }
                }
            }
        }
    }
}

/// A source's full variable environment: one [`CallFrames`] per active call
/// into this source, plus a module-level frame (index `0`) visible to every
/// nested call when a lookup misses locally (`Vars` in the original).
#[derive(Debug)]
pub struct Env {
    fn_stack: i64,
    fn_vars: HashMap<i64, CallFrames>,
    stash: HashMap<String, Value>,
}

impl Default for Env {
    fn default() -> Self {
        Self::new()
    }
}

impl Env {
    pub fn new() -> Self {
        let mut fn_vars = HashMap::new();
        fn_vars.insert(0, CallFrames::new());
        Self {
            fn_stack: -1,
            fn_vars,
            stash: HashMap::new(),
        }
    }

    /// `fn_stack < 0` means no call is active yet — e.g. a `Source` whose
    /// own top-level bytecode hasn't run, reached via `Attr`/`attr_get` on
    /// its module value. That case operates on the module frame (key `0`),
    /// same as `fn_stack == 0` (env.rs's module-frame doc comment above).
    fn current_key(&self) -> i64 {
        self.fn_stack.max(0)
    }

    fn current(&self) -> &CallFrames {
        self.fn_vars
            .get(&self.current_key())
            .expect("fn_stack always indexes a live CallFrames")
    }

    fn current_mut(&mut self) -> &mut CallFrames {
        let key = self.current_key();
        self.fn_vars
            .get_mut(&key)
            .expect("fn_stack always indexes a live CallFrames")
    }

    pub fn exists(&self, name: &str) -> bool {
        self.current().innermost_exists(name)
    }

    pub fn exists_global(&self, name: &str) -> bool {
        let mut i = self.fn_stack;
        while i >= 0 {
            if self
                .fn_vars
                .get(&i)
                .is_some_and(|f| f.exists_anywhere(name))
            {
                return true;
            }
            i -= 1;
        }
        false
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        let local = self.current().get(name);
        if local.is_some() || self.current_key() == 0 {
            return local;
        }
        self.fn_vars.get(&0).and_then(|f| f.get(name))
    }

    pub fn blk_add(&mut self, count: u64) {
        self.current_mut().inc_top(count);
        let stash = std::mem::take(&mut self.stash);
        let frame = self.current_mut();
        for (name, val) in stash {
            frame.add(&name, val, false);
        }
    }

    pub fn blk_rem(&mut self, count: u64) {
        self.current_mut().dec_top(count);
    }

    pub fn push_fn(&mut self) {
        self.fn_stack += 1;
        if self.fn_stack == 0 {
            return;
        }
        self.fn_vars.insert(self.fn_stack, CallFrames::new());
    }

    pub fn pop_fn(&mut self) {
        if self.fn_stack == 0 {
            return;
        }
        self.fn_vars.remove(&self.fn_stack);
        self.fn_stack -= 1;
    }

    pub fn stash(&mut self, name: &str, val: Value, iref: bool) {
        if iref {
            val.iref();
        }
        if let Some(old) = self.stash.insert(name.to_string(), val) {
            old.deref();
        }
    }

    pub fn unstash(&mut self) {
        for (_, v) in self.stash.drain() {
            v.deref();
        }
    }

    pub fn push_loop(&mut self) {
        self.current_mut().push_loop();
    }

    pub fn pop_loop(&mut self) {
        self.current_mut().pop_loop();
    }

    pub fn loop_continue(&mut self) {
        self.current_mut().loop_continue();
    }

    pub fn add(&mut self, name: &str, val: Value, iref: bool) {
        self.current_mut().add(name, val, iref);
    }

    pub fn add_module(&mut self, name: &str, val: Value, iref: bool) {
        self.fn_vars
            .get_mut(&0)
            .expect("module frame always exists")
            .add(name, val, iref);
    }

    pub fn remove(&mut self, name: &str, dref: bool) -> bool {
        self.current_mut().remove(name, dref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_fresh_env_reads_and_writes_the_module_frame_before_any_call_is_pushed() {
        let mut env = Env::new();
        assert!(!env.exists("answer"));
        env.add("answer", Value::int_val(42, 0, 0), false);
        assert_eq!(env.get("answer").unwrap().as_int(), Some(42));
    }

    #[test]
    fn module_frame_is_visible_from_nested_calls() {
        let mut env = Env::new();
        env.push_fn();
        env.add_module("g", Value::int_val(1, 0, 0), false);
        env.push_fn();
        assert_eq!(env.get("g").unwrap().as_int(), Some(1));
        env.pop_fn();
        env.pop_fn();
    }

    #[test]
    fn blk_add_commits_stashed_bindings() {
        let mut env = Env::new();
        env.push_fn();
        env.stash("x", Value::int_val(7, 0, 0), false);
        env.blk_add(1);
        assert_eq!(env.get("x").unwrap().as_int(), Some(7));
        env.pop_fn();
    }

    #[test]
    fn blk_rem_derefs_discarded_frame_values() {
        let mut env = Env::new();
        env.push_fn();
        env.blk_add(1);
        let v = Value::int_val(1, 0, 0);
        env.add("y", v.clone(), true);
        assert_eq!(v.refcount(), 2);
        env.blk_rem(1);
        assert_eq!(v.refcount(), 1);
        env.pop_fn();
    }

    #[test]
    fn loop_continue_keeps_the_mark_pop_loop_clears_it() {
        let mut env = Env::new();
        env.push_fn();
        env.push_loop();
        env.add("i", Value::int_val(0, 0, 0), false);
        env.loop_continue();
        assert!(!env.exists("i"));
        env.add("i", Value::int_val(1, 0, 0), false);
        env.pop_loop();
        assert!(!env.exists("i"));
        env.pop_fn();
    }
}
