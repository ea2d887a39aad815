//! The bytecode dispatch loop (spec §4.3 "Execution model", §4.8 "Error
//! handling", grounded on `VM::exec`/`VM::execOp` in `VM/Exec.cpp`).
//!
//! Each opcode handler returns a [`Signal`] telling the loop whether to fall
//! through to the next instruction, jump, or unwind the current call.

mod bindings;
mod call;
mod fail;
mod jump;

use std::cell::RefCell;
use std::rc::Rc;

use crate::bytecode::{Bytecode, Data};
use crate::source_file::SrcFile;
use crate::state::State;
use crate::vm::env::Env;
use crate::vm::error::VmError;
use crate::vm::instr::{Op, Operation};
use crate::vm::stack_ops::StackOps;
use crate::vm::value::{FnBodySpan, Value};

/// What the dispatch loop should do after an opcode handler returns
/// successfully.
#[derive(Debug, Clone, Copy)]
pub(super) enum Signal {
    Continue,
    JumpTo(u64),
    Return,
}

fn data_to_value(data: &Data, src_id: u64, idx: u64) -> Result<Value, VmError> {
    match data {
        Data::Int(n) => Ok(Value::int_val(*n, src_id, idx)),
        Data::Float(s) => {
            let f: f64 = s
                .parse()
                .map_err(|_| VmError::exec(format!("malformed float literal `{}`", s)))?;
            Ok(Value::float_val(f, src_id, idx))
        }
        Data::Str(s) => Ok(Value::str_val(s.clone(), src_id, idx)),
        Data::Bool(b) => Ok(Value::bool_val(*b, src_id, idx)),
        Data::Nil => Ok(Value::nil(src_id, idx)),
        Data::Ident(_) | Data::Size(_) => {
            Err(VmError::exec("Load instruction operand is not a loadable constant"))
        }
    }
}

/// `Load`: an `Ident` operand is a variable reference (local scope, falling
/// back to the module's global frame); anything else is a literal constant,
/// materialized fresh on every load.
fn op_load(state: &mut State, env: &Rc<RefCell<Env>>, bc: &Bytecode, op: Operation) -> Result<Signal, VmError> {
    let data = bc
        .data
        .get(op.data_idx)
        .ok_or_else(|| VmError::exec("Load instruction missing its operand"))?;
    let value = match data {
        Data::Ident(name) => env
            .borrow()
            .get(name)
            .or_else(|| state.global_get(name))
            .ok_or_else(|| VmError::exec(format!("undefined variable `{}`", name)))?,
        other => data_to_value(other, op.src_id, op.idx)?,
    };
    state.operand_stack().push_value(value);
    Ok(Signal::Continue)
}

fn ident_operand(bc: &Bytecode, op: Operation, context: &str) -> Result<String, VmError> {
    match bc.data.get(op.data_idx) {
        Some(Data::Ident(s)) | Some(Data::Str(s)) => Ok(s.clone()),
        _ => Err(VmError::exec(format!("{} instruction missing its name operand", context))),
    }
}

fn return_has_value(bc: &Bytecode, op: Operation) -> Result<bool, VmError> {
    match bc.data.get(op.data_idx) {
        Some(Data::Bool(b)) => Ok(*b),
        _ => Err(VmError::exec("Return instruction missing its has-value flag")),
    }
}

#[allow(clippy::too_many_arguments)]
fn dispatch(
    state: &mut State,
    bc: &Bytecode,
    env: &Rc<RefCell<Env>>,
    op: Operation,
    i: u64,
    bodies: &mut Vec<FnBodySpan>,
    jumps: &mut Vec<fail::JumpMark>,
) -> Result<Signal, VmError> {
    match op.op {
        Op::Load => op_load(state, env, bc, op),
        Op::Pop => {
            let v = state.operand_stack().pop_value()?;
            v.deref();
            Ok(Signal::Continue)
        }
        Op::BlkA => {
            let count = jump::jump_target(bc, op)?;
            env.borrow_mut().blk_add(count);
            Ok(Signal::Continue)
        }
        Op::BlkR => {
            let count = jump::jump_target(bc, op)?;
            env.borrow_mut().blk_rem(count);
            Ok(Signal::Continue)
        }
        Op::Create => bindings::op_create(state, bc, op),
        Op::Store => bindings::op_store(state),
        Op::Attr => bindings::op_attr(state, bc, op),
        Op::Jump => jump::op_jump(bc, op),
        Op::JumpTrue => jump::op_jump_true(state, bc, op, false),
        Op::JumpTruePop => jump::op_jump_true(state, bc, op, true),
        Op::JumpFalse => jump::op_jump_false(state, bc, op, false),
        Op::JumpFalsePop => jump::op_jump_false(state, bc, op, true),
        Op::JumpNil => jump::op_jump_nil(state, bc, op),
        Op::BodyMarker => jump::op_body_marker(bc, op, i, bodies),
        Op::PushLoop => Ok(jump::op_push_loop(env)),
        Op::PopLoop => Ok(jump::op_pop_loop(env)),
        Op::Continue => jump::op_continue(env, bc, op),
        Op::Break => jump::op_break(env, bc, op),
        Op::MakeFunc => call::op_make_func(state, bc, op, bodies),
        Op::Call => call::op_call(state, bc, op),
        Op::CallMember => call::op_call_member(state, bc, op),
        Op::Return => call::op_return(state, op, return_has_value(bc, op)?),
        Op::PushJump => {
            let target = jump::jump_target(bc, op)?;
            Ok(fail::push_jump(state, jumps, target))
        }
        Op::PushJumpNamed => {
            let name = ident_operand(bc, op, "PushJumpNamed")?;
            Ok(fail::push_jump_named(jumps, name))
        }
        Op::PopJump => Ok(fail::pop_jump(state, jumps)),
    }
}

/// Run `bc[begin..end]` (`end == 0` means "to the end of the stream")
/// against the active source's environment, or `custom` when given (in
/// which case the function-variable stack is left untouched — a nested
/// `eval` doesn't open its own call frame).
fn run(state: &mut State, custom: Option<&Bytecode>, begin: u64, end: u64) -> Result<u64, VmError> {
    let env = state
        .current_env()
        .ok_or_else(|| VmError::exec("exec with no active source"))?;

    let file_holder: Option<Rc<SrcFile>>;
    let bc: &Bytecode = match custom {
        Some(bc) => {
            file_holder = None;
            bc
        }
        None => {
            let source = state
                .current_source()
                .cloned()
                .expect("current_env returned Some implies a current source");
            let file = source
                .with_source(|s| Rc::clone(&s.file))
                .expect("current source holds a Source value");
            file_holder = Some(file);
            file_holder.as_ref().unwrap().bytecode()
        }
    };

    let end_idx = if end == 0 { bc.ops.len() as u64 } else { end };
    let is_custom = custom.is_some();
    if !is_custom {
        env.borrow_mut().push_fn();
    }

    let mut bodies: Vec<FnBodySpan> = Vec::new();
    let mut jumps: Vec<fail::JumpMark> = Vec::new();
    let mut i = begin;

    let result = loop {
        if i >= end_idx {
            break Ok(state.exit_code);
        }
        let op = match bc.ops.get(i as usize) {
            Some(op) => *op,
            None => break Err(VmError::exec("instruction pointer out of range")),
        };
        match dispatch(state, bc, &env, op, i, &mut bodies, &mut jumps) {
            Ok(Signal::Continue) => i += 1,
            Ok(Signal::JumpTo(target)) => i = target,
            Ok(Signal::Return) => break Ok(state.exit_code),
            Err(e) => match fail::handle_fail(state, &env, &mut jumps, e) {
                Ok(resume) => i = resume,
                Err(e) => break Err(e),
            },
        }
    };

    if !is_custom {
        env.borrow_mut().pop_fn();
    }
    result
}

/// Public entry point: guards against runaway recursion
/// (`exec_stack_max`, spec §4.9) before delegating to [`run`].
pub fn exec(state: &mut State, custom: Option<&Bytecode>, begin: u64, end: u64) -> Result<u64, VmError> {
    state.exec_stack_count += 1;
    if state.exec_stack_count > state.exec_stack_max {
        state.exec_stack_count -= 1;
        state.exec_stack_count_exceeded = true;
        return Err(VmError::exec("exceeded call stack size"));
    }
    let result = run(state, custom, begin, end);
    state.exec_stack_count -= 1;
    result
}
