//! `State`: the VM's entry point. Owns globals, the type-function registry,
//! the operand/fail/source stacks, the dynamic library manager, and the
//! singletons every running program sees (spec §4.9, grounded on
//! `VM/State.hpp`/`State.cpp`).

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::dylib::Dylib;
use crate::loader;
use crate::source_file::SrcFile;
use crate::vm::error::VmError;
use crate::vm::exec;
use crate::vm::type_table::{TypeKey, TypeTable};
use crate::vm::value::{FnBody, FnData, SourceData, Value, ValueType};

/// Default recursion guard, matching `kExecStackMaxDefault`.
pub const EXEC_STACK_MAX_DEFAULT: u64 = 2000;

fn builtin_type_name(vt: ValueType) -> &'static str {
    match vt {
        ValueType::Nil => "nil",
        ValueType::Bool => "bool",
        ValueType::Int => "int",
        ValueType::Float => "float",
        ValueType::Str => "string",
        ValueType::Vec => "Vec",
        ValueType::Func => "Func",
        ValueType::Source => "Src",
        ValueType::TypeId => "TypeId",
        ValueType::Any => "Any",
    }
}

/// The engine's owning struct. One `State` per running program.
pub struct State {
    globals: HashMap<String, Value>,
    type_table: TypeTable,
    mod_deinit_order: Vec<String>,
    mod_deinit_fns: HashMap<String, unsafe extern "C" fn()>,
    self_bin: String,
    self_base: String,

    pub(crate) true_val: Value,
    pub(crate) false_val: Value,
    pub(crate) nil_val: Value,

    pub(crate) stack: Vec<Value>,
    pub(crate) fails: crate::vm::fail_stack::FailStack,
    pub(crate) src_stack: Vec<Value>,
    all_srcs: HashMap<String, Value>,
    sources_by_id: HashMap<u64, Value>,

    dylib: Dylib,
    src_args: Value,

    pub exit_called: bool,
    pub exit_code: u64,
    pub exec_stack_count: u64,
    pub exec_stack_max: u64,
    pub exec_stack_count_exceeded: bool,
}

impl State {
    /// Construct a fresh `State`: registers the built-in type names, builds
    /// the `true`/`false`/`nil` singletons, and binds `ARGS` from `args`.
    pub fn new(self_bin: impl Into<String>, self_base: impl Into<String>, args: &[String]) -> Self {
        let mut type_table = TypeTable::new();
        for vt in [
            ValueType::Nil,
            ValueType::Bool,
            ValueType::Int,
            ValueType::Float,
            ValueType::Str,
            ValueType::Vec,
            ValueType::Func,
            ValueType::Source,
            ValueType::TypeId,
            ValueType::Any,
        ] {
            type_table.set_name(TypeKey::Builtin(vt), builtin_type_name(vt));
        }
        type_table.set_name(TypeKey::All, "All");

        let arg_values: Vec<Value> = args.iter().map(|a| Value::str_val(a.clone(), 0, 0)).collect();

        State {
            globals: HashMap::new(),
            type_table,
            mod_deinit_order: Vec::new(),
            mod_deinit_fns: HashMap::new(),
            self_bin: self_bin.into(),
            self_base: self_base.into(),
            true_val: Value::bool_val(true, 0, 0),
            false_val: Value::bool_val(false, 0, 0),
            nil_val: Value::nil(0, 0),
            stack: Vec::new(),
            fails: crate::vm::fail_stack::FailStack::new(),
            src_stack: Vec::new(),
            all_srcs: HashMap::new(),
            sources_by_id: HashMap::new(),
            dylib: Dylib::new(),
            src_args: Value::vec_val(arg_values, true, 0, 0),
            exit_called: false,
            exit_code: 0,
            exec_stack_count: 0,
            exec_stack_max: EXEC_STACK_MAX_DEFAULT,
            exec_stack_count_exceeded: false,
        }
    }

    pub fn self_bin(&self) -> &str {
        &self.self_bin
    }

    pub fn self_base(&self) -> &str {
        &self.self_base
    }

    pub fn src_args(&self) -> &Value {
        &self.src_args
    }

    pub fn nil(&self) -> Value {
        self.nil_val.clone()
    }

    pub fn true_val(&self) -> Value {
        self.true_val.clone()
    }

    pub fn false_val(&self) -> Value {
        self.false_val.clone()
    }

    pub fn bool_singleton(&self, b: bool) -> Value {
        if b {
            self.true_val.clone()
        } else {
            self.false_val.clone()
        }
    }

    pub fn operand_stack(&mut self) -> &mut Vec<Value> {
        &mut self.stack
    }

    pub fn global_add(&mut self, name: &str, val: Value, iref: bool) {
        if iref {
            val.iref();
        }
        if let Some(old) = self.globals.insert(name.to_string(), val) {
            old.deref();
        }
    }

    pub fn global_get(&self, name: &str) -> Option<Value> {
        self.globals.get(name).cloned()
    }

    /// `getTypeFn`: resolve a method by name on `val`, falling back to the
    /// `"All"` table (spec §4.2, §4.8's `CallMember` resolution order).
    pub fn resolve_type_fn(&self, val: &Value, name: &str) -> Option<Value> {
        self.type_table
            .resolve(val.type_fn_key(), val.type_key(), val.is_attr_based(), name)
    }

    pub fn add_type_fn(&mut self, key: TypeKey, name: &str, func: Value) -> bool {
        self.type_table.add_fn(key, name, func)
    }

    pub fn new_custom_type_key(&mut self) -> TypeKey {
        self.type_table.new_custom_key()
    }

    pub fn set_type_name(&mut self, key: TypeKey, name: &str) {
        self.type_table.set_name(key, name);
    }

    pub fn type_name(&self, key: TypeKey) -> String {
        self.type_table.name_of(key)
    }

    pub fn current_source(&self) -> Option<&Value> {
        self.src_stack.last()
    }

    /// The active source's environment, for opcode handlers that bind or
    /// look up local variables.
    pub fn current_env(&self) -> Option<Rc<RefCell<crate::vm::env::Env>>> {
        self.current_source().and_then(|s| s.with_source(|s| Rc::clone(&s.env)))
    }

    /// Push `val` onto the nearest active fail block and return a
    /// [`VmError::Raised`] wrapping it — the way a native `raise`
    /// implementation signals a catchable failure (spec §4.8, §7).
    pub fn fail(&mut self, val: Value) -> VmError {
        self.fails.push(val.clone(), true);
        VmError::Raised(val)
    }

    /// Register a `Source` value under its owning `SrcFile`'s id, and push
    /// it as the active source. Mirrors `State::pushSrc`.
    pub fn push_src(&mut self, source: Value) {
        if let Some(id) = source.with_source(|s| s.file.id()) {
            self.sources_by_id.insert(id, source.clone());
        }
        self.src_stack.push(source);
    }

    pub fn pop_src(&mut self) -> Option<Value> {
        self.src_stack.pop()
    }

    pub fn source_by_id(&self, id: u64) -> Option<Value> {
        self.sources_by_id.get(&id).cloned()
    }

    /// `AllSrcs`: absolute path → loaded `Source`, the idempotence registry
    /// module imports consult (spec §4.6).
    pub fn registered_source(&self, abs_path: &str) -> Option<Value> {
        self.all_srcs.get(abs_path).cloned()
    }

    pub fn register_source(&mut self, abs_path: String, source: Value) {
        if let Some(id) = source.with_source(|s| s.file.id()) {
            self.sources_by_id.insert(id, source.clone());
        }
        self.all_srcs.insert(abs_path, source);
    }

    pub fn dylib(&mut self) -> &mut Dylib {
        &mut self.dylib
    }

    /// Record a `june_deinit` callback to be invoked, in reverse
    /// registration order, at teardown.
    pub fn register_mod_deinit(&mut self, path: String, f: unsafe extern "C" fn()) {
        self.mod_deinit_order.push(path.clone());
        self.mod_deinit_fns.insert(path, f);
    }

    /// Load the fixed core module list plus `core.json`'s `coreModules`
    /// (spec §4.6, §6).
    pub fn load_core_modules(&mut self) -> Result<(), VmError> {
        loader::load_core_modules(self)
    }

    pub fn load_june_module(&mut self, module: &str, src_id: u64, idx: u64) -> Result<(), VmError> {
        loader::june_module_load(self, module, src_id, idx)
    }

    pub fn load_native_module(&mut self, module: &str, src_id: u64, idx: u64) -> Result<(), VmError> {
        loader::native_module_load(self, module, src_id, idx)
    }

    /// Push `src`, run its bytecode end to end, and pop it. Used for the
    /// main program and for June module imports alike.
    pub fn run_source(&mut self, src: Rc<SrcFile>) -> Result<u64, VmError> {
        let env = Rc::new(RefCell::new(crate::vm::env::Env::new()));
        let source = Value::source_val(SourceData::new(src, env), 0, 0);
        self.push_src(source);
        let result = exec::exec(self, None, 0, 0);
        self.pop_src();
        result
    }

    /// Invoke any callable value with `args`, resolving `apply` first if the
    /// value isn't directly callable (spec §4.2 `call`).
    pub fn call_value(&mut self, target: &Value, args: Vec<Value>, src_id: u64, idx: u64) -> Result<Value, VmError> {
        let func = if target.is_callable() {
            target.clone()
        } else {
            self.resolve_type_fn(target, "apply").ok_or_else(|| {
                VmError::call_failed(&self.type_name(target.type_key()), "value is not callable")
            })?
        };
        let body = func
            .with_func(|fd| fd.body.clone())
            .ok_or_else(|| VmError::exec("call target resolved to a non-Func value"))?;
        match body {
            FnBody::Native(native_fn) => {
                // Natives only borrow `data.args` (the ABI hands out `&FnData`,
                // spec §6) and must `iref` anything they retain; release the
                // call's own ownership of each arg once the call returns.
                let data = FnData { src_id, idx, args };
                let result = native_fn(self, &data);
                for a in &data.args {
                    a.deref();
                }
                result
            }
            FnBody::June(span) => self.call_june_body(&func, span, args, src_id, idx),
        }
    }

    fn call_june_body(
        &mut self,
        func: &Value,
        span: crate::vm::value::FnBodySpan,
        args: Vec<Value>,
        call_src_id: u64,
        call_idx: u64,
    ) -> Result<Value, VmError> {
        let owner_id = func.src_id();
        let source = self
            .source_by_id(owner_id)
            .ok_or_else(|| VmError::exec("function body's owning source is not loaded"))?;
        let env = source
            .with_source(|s| s.env.clone())
            .ok_or_else(|| VmError::exec("call target's owning value is not a Source"))?;

        let (param_names, var_arg) = func
            .with_func(|fd| (fd.args.clone(), fd.var_arg.clone()))
            .expect("body came from a Func value");

        {
            let mut env = env.borrow_mut();
            let mut args = args.into_iter();
            for name in &param_names {
                let v = args.next().unwrap_or_else(|| Value::nil(call_src_id, call_idx));
                env.stash(name, v, false);
            }
            if !var_arg.is_empty() {
                let rest: Vec<Value> = args.collect();
                env.stash(&var_arg, Value::vec_val(rest, false, call_src_id, call_idx), false);
            } else {
                for extra in args {
                    extra.deref();
                }
            }
        }

        self.push_src(source);
        let result = exec::exec(self, None, span.start, span.end);
        self.pop_src();
        result?;

        self.stack
            .pop()
            .ok_or_else(|| VmError::exec("June function returned without a value on the operand stack"))
    }
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State")
            .field("exit_called", &self.exit_called)
            .field("exit_code", &self.exit_code)
            .field("exec_stack_count", &self.exec_stack_count)
            .field("stack_depth", &self.stack.len())
            .finish_non_exhaustive()
    }
}

/// Teardown: release owned references in reverse order, run native
/// de-init callbacks, then close the dylib manager (spec §4.9).
impl Drop for State {
    fn drop(&mut self) {
        for v in self.stack.drain(..) {
            v.deref();
        }
        for v in self.src_stack.drain(..) {
            v.deref();
        }
        for (_, v) in self.globals.drain() {
            v.deref();
        }
        self.true_val.deref();
        self.false_val.deref();
        self.nil_val.deref();
        self.src_args.deref();

        for path in self.mod_deinit_order.drain(..).rev() {
            if let Some(f) = self.mod_deinit_fns.remove(&path) {
                // SAFETY: `f` was resolved from a loaded native module's
                // `june_deinit` symbol with this exact signature.
                unsafe { f() };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_registers_builtin_type_names() {
        let state = State::new("bin", "base", &[]);
        assert_eq!(state.type_name(TypeKey::Builtin(ValueType::Int)), "int");
        assert_eq!(state.type_name(TypeKey::All), "All");
    }

    #[test]
    fn src_args_binds_process_arguments_as_a_ref_vec() {
        let state = State::new("bin", "base", &["a".to_string(), "b".to_string()]);
        let count = state.src_args().with_vec(|v| v.items.len()).unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn global_add_overwrite_derefs_the_previous_binding() {
        let mut state = State::new("bin", "base", &[]);
        let v1 = Value::int_val(1, 0, 0);
        state.global_add("x", v1.clone(), true);
        assert_eq!(v1.refcount(), 2);
        let v2 = Value::int_val(2, 0, 0);
        state.global_add("x", v2, true);
        assert_eq!(v1.refcount(), 1);
    }
}
