//! Binding and attribute opcodes: `Create`, `Store`, `Attr` (spec §4.3,
//! §4.8, grounded on the corresponding cases in `VM/Exec.cpp`).

use crate::bytecode::{Bytecode, Data};
use crate::state::State;
use crate::vm::error::VmError;
use crate::vm::instr::Operation;
use crate::vm::stack_ops::StackOps;

use super::Signal;

fn attr_name(bc: &Bytecode, op: Operation) -> Result<String, VmError> {
    match bc.data.get(op.data_idx) {
        Some(Data::Ident(s)) | Some(Data::Str(s)) => Ok(s.clone()),
        _ => Err(VmError::exec("instruction missing its attribute name")),
    }
}

/// `Create`: bind a name to a value, either as a plain local binding or —
/// when a context value is present — as an attribute or type-function.
pub(super) fn op_create(state: &mut State, bc: &Bytecode, op: Operation) -> Result<Signal, VmError> {
    let has_ctx = match bc.data.get(op.data_idx) {
        Some(Data::Bool(b)) => *b,
        _ => return Err(VmError::exec("Create instruction missing its context flag")),
    };

    let name = state.operand_stack().pop_str()?;
    let ctx = if has_ctx {
        Some(state.operand_stack().pop_value()?)
    } else {
        None
    };
    let val = state.operand_stack().pop_value()?;

    match ctx {
        None => {
            let bound = if val.is_load_as_ref() || val.is_uniquely_held() {
                val
            } else {
                let cloned = val.clone_at(op.src_id, op.idx);
                val.deref();
                cloned
            };
            let env = state
                .current_env()
                .ok_or_else(|| VmError::exec("Create with no active source"))?;
            env.borrow_mut().add(&name, bound, false);
            Ok(Signal::Continue)
        }
        Some(ctx_val) => {
            if ctx_val.is_attr_based() {
                let result = ctx_val.attr_set(&name, val.clone(), true);
                val.deref();
                ctx_val.deref();
                result?;
                return Ok(Signal::Continue);
            }
            if !val.is_callable() {
                val.deref();
                ctx_val.deref();
                return Err(VmError::exec(
                    "only callable values can be added to non-attribute based types",
                ));
            }
            let key = ctx_val.as_type_id().unwrap_or_else(|| ctx_val.type_fn_key());
            // `add_fn` doesn't iref on success — the single reference we
            // already own (from the pop above) becomes the table's; only on
            // rejection do we own a unit nobody will ever release otherwise.
            let added = state.add_type_fn(key, &name, val.clone());
            ctx_val.deref();
            if !added {
                val.deref();
                return Err(VmError::exec(format!("function `{}` already exists", name)));
            }
            Ok(Signal::Continue)
        }
    }
}

/// `Store`: requires exact type equality, overwrites the target in place,
/// and leaves the target (not the assigned value) on the stack.
pub(super) fn op_store(state: &mut State) -> Result<Signal, VmError> {
    let var = state.operand_stack().pop_value()?;
    let val = state.operand_stack().pop_value()?;
    if var.value_type() != val.value_type() {
        let vt = var.value_type();
        let xt = val.value_type();
        var.deref();
        val.deref();
        return Err(VmError::store_type_mismatch(vt, xt));
    }
    var.set_from(&val);
    val.deref();
    state.operand_stack().push(var);
    Ok(Signal::Continue)
}

/// `Attr`: resolve a fixed attribute name on the popped receiver, preferring
/// its own attribute table when attribute-based, falling back to the
/// type-function table otherwise.
pub(super) fn op_attr(state: &mut State, bc: &Bytecode, op: Operation) -> Result<Signal, VmError> {
    let name = attr_name(bc, op)?;
    let receiver = state.operand_stack().pop_value()?;
    let resolved = if receiver.is_attr_based() {
        receiver.attr_get(&name)
    } else {
        None
    }
    .or_else(|| state.resolve_type_fn(&receiver, &name));
    receiver.deref();
    let resolved = resolved.ok_or_else(|| VmError::exec(format!("no attribute `{}`", name)))?;
    state.operand_stack().push_value(resolved);
    Ok(Signal::Continue)
}
