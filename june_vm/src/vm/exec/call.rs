//! `MakeFunc`, `Call`, `CallMember`, `Return` (spec §4.3, §4.8, grounded on
//! the corresponding cases in `VM/Exec.cpp`; `VarFunc::call` itself has no
//! surviving implementation to ground on — see `DESIGN.md`).

use std::rc::Rc;

use crate::bytecode::{Bytecode, Data};
use crate::state::State;
use crate::vm::error::VmError;
use crate::vm::instr::Operation;
use crate::vm::stack_ops::StackOps;
use crate::vm::value::{FnBody, FnBodySpan, FuncData, Value};

use super::Signal;

/// `Call`/`CallMember`'s argument descriptor: a leading `'0'`/`'1'`
/// variadic-unpack flag followed by the decimal argument count. Produced by
/// the (out-of-scope) compiler; any encoding works as long as the executor
/// agrees with it, so this one is ours rather than a mirror of the
/// reference compiler's C-string-length trick.
fn parse_count_flag(bc: &Bytecode, op: Operation, context: &str) -> Result<(bool, usize), VmError> {
    let flag = match bc.data.get(op.data_idx) {
        Some(Data::Str(s)) => s,
        _ => return Err(VmError::exec(format!("{} instruction missing its descriptor", context))),
    };
    let mut chars = flag.chars();
    let leading = chars
        .next()
        .ok_or_else(|| VmError::exec(format!("{} descriptor is empty", context)))?;
    let count: usize = chars
        .as_str()
        .parse()
        .map_err(|_| VmError::exec(format!("{} descriptor has a malformed count", context)))?;
    Ok((leading == '1', count))
}

/// `MakeFunc`: pop the (optional variadic, then positional) argument name
/// strings, claim the most recently recorded body span, and push the
/// resulting `Func` value.
pub(super) fn op_make_func(
    state: &mut State,
    bc: &Bytecode,
    op: Operation,
    bodies: &mut Vec<FnBodySpan>,
) -> Result<Signal, VmError> {
    let (is_variadic, count) = parse_count_flag(bc, op, "MakeFunc")?;

    let var_arg = if is_variadic {
        let v = state.operand_stack().pop_str()?;
        v
    } else {
        String::new()
    };

    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        args.push(state.operand_stack().pop_str()?);
    }
    args.reverse();

    let span = bodies
        .pop()
        .ok_or_else(|| VmError::exec("MakeFunc with no recorded body span"))?;

    let src_name: Rc<str> = state
        .current_source()
        .and_then(|s| s.with_source(|s| Rc::from(s.file.path())))
        .unwrap_or_else(|| Rc::from(""));

    let data = FuncData {
        src_name,
        var_arg,
        args,
        body: FnBody::June(span),
        is_native: false,
    };
    state.operand_stack().push_value(Value::func_val(data, op.src_id, op.idx));
    Ok(Signal::Continue)
}

fn call_impl(state: &mut State, bc: &Bytecode, op: Operation, is_member: bool) -> Result<Signal, VmError> {
    let context = if is_member { "CallMember" } else { "Call" };
    let (va_unpack, arg_count) = parse_count_flag(bc, op, context)?;

    let mut args = Vec::with_capacity(arg_count);
    for _ in 0..arg_count {
        args.push(state.operand_stack().pop_value()?);
    }
    args.reverse();

    if va_unpack {
        let last = args
            .pop()
            .ok_or_else(|| VmError::exec(format!("{} variadic-unpack needs at least one argument", context)))?;
        let items = last.with_vec(|v| v.items.clone());
        match items {
            Some(items) => {
                for item in &items {
                    item.iref();
                }
                args.extend(items);
                last.deref();
            }
            None => {
                last.deref();
                for a in args {
                    a.deref();
                }
                return Err(VmError::exec(format!(
                    "{} variadic-unpack expects a Vec as the last argument",
                    context
                )));
            }
        }
    }

    let (ctx, func) = if is_member {
        let method_name = state.operand_stack().pop_str()?;
        let receiver = state.operand_stack().pop_value()?;
        let resolved = if receiver.is_attr_based() {
            receiver.attr_get(&method_name)
        } else {
            None
        }
        .or_else(|| state.resolve_type_fn(&receiver, &method_name));
        match resolved {
            Some(f) => (receiver, f),
            None => {
                receiver.deref();
                for a in args {
                    a.deref();
                }
                return Err(VmError::exec(format!("no method `{}`", method_name)));
            }
        }
    } else {
        let func = state.operand_stack().pop_value()?;
        let nil = state.nil();
        nil.iref();
        (nil, func)
    };

    let mut full_args = Vec::with_capacity(args.len() + 1);
    full_args.push(ctx);
    full_args.extend(args);

    let result = state.call_value(&func, full_args, op.src_id, op.idx);

    if !is_member {
        func.deref();
    }

    // A raised/executor error from inside the callee propagates as-is —
    // `call_value` already reports "not callable" via `call_failed` itself,
    // so wrapping here would bury the callee's own raised value. The
    // returned value (nil or not) already carries the one reference unit
    // the callee handed off; push it as-is rather than re-`iref`ing.
    let value = result?;
    state.operand_stack().push(value);
    if state.exit_called {
        Ok(Signal::Return)
    } else {
        Ok(Signal::Continue)
    }
}

pub(super) fn op_call(state: &mut State, bc: &Bytecode, op: Operation) -> Result<Signal, VmError> {
    call_impl(state, bc, op, false)
}

pub(super) fn op_call_member(state: &mut State, bc: &Bytecode, op: Operation) -> Result<Signal, VmError> {
    call_impl(state, bc, op, true)
}

/// `Return`: the function's result was already left on the operand stack by
/// whatever produced it (an expression, or an implicit `nil`); this opcode
/// only signals the dispatch loop to unwind, it never touches the stack
/// itself (spec §4.8).
pub(super) fn op_return(state: &mut State, op: Operation, has_value: bool) -> Result<Signal, VmError> {
    if !has_value {
        state.operand_stack().push_value(state.nil());
    }
    let _ = op;
    Ok(Signal::Return)
}
