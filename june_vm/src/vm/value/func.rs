//! Function values: native (Rust-implemented) and June (bytecode-bodied).

use std::fmt;
use std::rc::Rc;

use super::Value;
use crate::vm::error::VmError;
use crate::state::State;

/// Bytecode range a June-defined function's body occupies, as `[start, end)`
/// indices into its owning source's operation list (spec §4.3, §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FnBodySpan {
    pub start: u64,
    pub end: u64,
}

/// Arguments bound for a single call, handed to a native function alongside
/// the `State`. `src_id`/`idx` are the call site, for error reporting.
#[derive(Debug)]
pub struct FnData {
    pub src_id: u64,
    pub idx: u64,
    pub args: Vec<Value>,
}

pub type NativeFn = fn(&mut State, &FnData) -> Result<Value, VmError>;

#[derive(Clone)]
pub enum FnBody {
    Native(NativeFn),
    June(FnBodySpan),
}

impl fmt::Debug for FnBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FnBody::Native(_) => f.write_str("FnBody::Native(..)"),
            FnBody::June(span) => f.debug_tuple("FnBody::June").field(span).finish(),
        }
    }
}

/// A callable value. `src_name` names the source the function was defined in
/// (used in diagnostics); `var_arg`, when non-empty, is the name the trailing
/// variadic arguments are collected under.
#[derive(Debug, Clone)]
pub struct FuncData {
    pub src_name: Rc<str>,
    pub var_arg: String,
    pub args: Vec<String>,
    pub body: FnBody,
    pub is_native: bool,
}

impl FuncData {
    pub fn is_native(&self) -> bool {
        self.is_native
    }

    pub fn is_june(&self) -> bool {
        !self.is_native
    }
}
