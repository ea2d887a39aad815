//! Unconditional/conditional jumps, loop marks, and the body-span recorder
//! (spec §4.3, §4.8, grounded on the jump family in `VM/Exec.cpp`).

use std::cell::RefCell;
use std::rc::Rc;

use crate::bytecode::{Bytecode, Data};
use crate::state::State;
use crate::vm::env::Env;
use crate::vm::error::VmError;
use crate::vm::instr::Operation;
use crate::vm::stack_ops::StackOps;
use crate::vm::value::{FnBodySpan, Value};

use super::Signal;

/// Every jump-family opcode stores its target as an interned `Data::Size`,
/// referenced through the operation's `data_idx` (spec §4.3).
pub(super) fn jump_target(bc: &Bytecode, op: Operation) -> Result<u64, VmError> {
    match bc.data.get(op.data_idx) {
        Some(Data::Size(n)) => Ok(*n),
        _ => Err(VmError::exec("jump instruction missing its target operand")),
    }
}

fn peek(state: &mut State) -> Result<Value, VmError> {
    state
        .operand_stack()
        .last()
        .cloned()
        .ok_or_else(|| VmError::exec("operand stack underflow"))
}

fn pop_and_discard(state: &mut State) -> Result<(), VmError> {
    let v = state.operand_stack().pop_value()?;
    v.deref();
    Ok(())
}

pub(super) fn op_jump(bc: &Bytecode, op: Operation) -> Result<Signal, VmError> {
    Ok(Signal::JumpTo(jump_target(bc, op)?))
}

/// `JumpTrue`/`JumpTruePop`: jump when the condition is true; the
/// non-`Pop` variant otherwise leaves the value in place only on the taken
/// branch, discarding it whenever the jump isn't taken.
pub(super) fn op_jump_true(
    state: &mut State,
    bc: &Bytecode,
    op: Operation,
    always_pop: bool,
) -> Result<Signal, VmError> {
    let top = peek(state)?;
    let res = match top.to_bool_value(state) {
        Ok(b) => b,
        Err(e) => {
            pop_and_discard(state)?;
            return Err(e);
        }
    };
    if !res || always_pop {
        pop_and_discard(state)?;
    }
    if res {
        Ok(Signal::JumpTo(jump_target(bc, op)?))
    } else {
        Ok(Signal::Continue)
    }
}

/// `JumpFalse`/`JumpFalsePop`: mirror image of [`op_jump_true`] — jumping on
/// `false`, discarding on the taken branch by default.
pub(super) fn op_jump_false(
    state: &mut State,
    bc: &Bytecode,
    op: Operation,
    always_pop: bool,
) -> Result<Signal, VmError> {
    let top = peek(state)?;
    let res = match top.to_bool_value(state) {
        Ok(b) => b,
        Err(e) => {
            pop_and_discard(state)?;
            return Err(e);
        }
    };
    if !res || always_pop {
        pop_and_discard(state)?;
    }
    if !res {
        Ok(Signal::JumpTo(jump_target(bc, op)?))
    } else {
        Ok(Signal::Continue)
    }
}

pub(super) fn op_jump_nil(state: &mut State, bc: &Bytecode, op: Operation) -> Result<Signal, VmError> {
    let top = peek(state)?;
    if top.is_nil() {
        pop_and_discard(state)?;
        Ok(Signal::JumpTo(jump_target(bc, op)?))
    } else {
        Ok(Signal::Continue)
    }
}

/// Records `[i + 1, target)` as a function body span and skips straight past
/// it — the body only ever runs via a later `Call`, never by falling through.
pub(super) fn op_body_marker(
    bc: &Bytecode,
    op: Operation,
    i: u64,
    bodies: &mut Vec<FnBodySpan>,
) -> Result<Signal, VmError> {
    let target = jump_target(bc, op)?;
    bodies.push(FnBodySpan { start: i + 1, end: target });
    Ok(Signal::JumpTo(target))
}

pub(super) fn op_push_loop(env: &Rc<RefCell<Env>>) -> Signal {
    env.borrow_mut().push_loop();
    Signal::Continue
}

pub(super) fn op_pop_loop(env: &Rc<RefCell<Env>>) -> Signal {
    env.borrow_mut().pop_loop();
    Signal::Continue
}

pub(super) fn op_continue(env: &Rc<RefCell<Env>>, bc: &Bytecode, op: Operation) -> Result<Signal, VmError> {
    env.borrow_mut().loop_continue();
    Ok(Signal::JumpTo(jump_target(bc, op)?))
}

/// `Break` also unwinds the loop's scope before jumping out, matching the
/// (fall-through, `continue`, `break`) symmetry the environment expects —
/// see the module doc comment on the discrepancy with the reference
/// executor this resolves.
pub(super) fn op_break(env: &Rc<RefCell<Env>>, bc: &Bytecode, op: Operation) -> Result<Signal, VmError> {
    env.borrow_mut().pop_loop();
    Ok(Signal::JumpTo(jump_target(bc, op)?))
}
