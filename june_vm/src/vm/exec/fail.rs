//! Fail blocks: `PushJump`/`PushJumpNamed`/`PopJump`, and the rewind that
//! runs when an opcode fails inside an active block (spec §4.8 "Error
//! handling", grounded on `handleError`/`execFail` in `VM/Exec.cpp`).

use crate::state::State;
use crate::vm::error::VmError;
use crate::vm::value::Value;

use super::Signal;

/// One active `PushJump` block: where to resume, and the name (if any) a
/// caught failure should be bound under.
pub(super) struct JumpMark {
    pub pos: u64,
    pub name: Option<String>,
}

pub(super) fn push_jump(state: &mut State, jumps: &mut Vec<JumpMark>, target: u64) -> Signal {
    jumps.push(JumpMark { pos: target, name: None });
    state.fails.blk_add();
    Signal::Continue
}

pub(super) fn push_jump_named(jumps: &mut Vec<JumpMark>, name: String) -> Signal {
    if let Some(mark) = jumps.last_mut() {
        mark.name = Some(name);
    }
    Signal::Continue
}

pub(super) fn pop_jump(state: &mut State, jumps: &mut Vec<JumpMark>) -> Signal {
    jumps.pop();
    state.fails.blk_rem();
    Signal::Continue
}

/// On any opcode failure: if a fail block is active and the VM isn't mid
/// `exit()`, rewind to it, optionally binding the caught value, and resume.
/// Otherwise hand `err` back to the caller to propagate.
pub(super) fn handle_fail(
    state: &mut State,
    env: &std::rc::Rc<std::cell::RefCell<crate::vm::env::Env>>,
    jumps: &mut Vec<JumpMark>,
    err: VmError,
) -> Result<u64, VmError> {
    if jumps.is_empty() || state.exit_called {
        return Err(err);
    }
    let mark = jumps.pop().expect("checked non-empty above");
    if let Some(name) = &mark.name {
        let caught: Option<Value> = match &err {
            VmError::Raised(v) => Some(v.clone()),
            _ if !state.fails.back_is_empty() => state.fails.pop(false),
            other => Some(Value::str_val(other.to_string(), 0, 0)),
        };
        if let Some(v) = caught {
            env.borrow_mut().stash(name, v, false);
        }
    }
    state.fails.blk_rem();
    state.exec_stack_count_exceeded = false;
    Ok(mark.pos)
}
