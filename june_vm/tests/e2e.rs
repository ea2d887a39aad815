//! End-to-end scenarios driving `State`/`loader`/`vm::exec` together through
//! hand-assembled bytecode (there is no compiler in this crate to produce it
//! from source text).

use std::cell::RefCell;
use std::rc::Rc;

use june_vm::bytecode::{write_file, Data};
use june_vm::source_file::SrcFile;
use june_vm::state::State;
use june_vm::vm::env::Env;
use june_vm::vm::error::VmError;
use june_vm::vm::exec;
use june_vm::vm::stack_ops::StackOps;
use june_vm::vm::value::{FnBody, FnData, FuncData, SourceData, Value};
use june_vm::{Bytecode, Op, Operation};

fn native_print(state: &mut State, data: &FnData) -> Result<Value, VmError> {
    let msg = data.args[1].as_str().map(|s| s.to_string()).unwrap_or_default();
    let sink = state.global_get("__output").expect("output sink registered");
    sink.with_vec_mut(|v| v.items.push(Value::str_val(msg, 0, 0)));
    Ok(state.nil())
}

fn native_add(_: &mut State, data: &FnData) -> Result<Value, VmError> {
    let a = data.args[1]
        .as_int()
        .ok_or_else(|| VmError::exec("add expects an Int"))?;
    let b = data.args[2]
        .as_int()
        .ok_or_else(|| VmError::exec("add expects an Int"))?;
    Ok(Value::int_val(a + b, 0, 0))
}

fn native_boom(state: &mut State, _data: &FnData) -> Result<Value, VmError> {
    Err(state.fail(Value::str_val("boom", 0, 0)))
}

fn native_func(f: fn(&mut State, &FnData) -> Result<Value, VmError>) -> Value {
    let data = FuncData {
        src_name: Rc::from(""),
        var_arg: String::new(),
        args: Vec::new(),
        body: FnBody::Native(f),
        is_native: true,
    };
    Value::func_val(data, 0, 0)
}

#[test]
fn hello_world_calls_a_native_function_with_a_string_argument() {
    let mut state = State::new("bin", "base", &[]);
    state.global_add("__output", Value::vec_val(Vec::new(), false, 0, 0), false);
    state.global_add("print", native_func(native_print), false);

    let mut bc = Bytecode::new();
    let print_ident = bc.data.intern(Data::Ident("print".to_string()));
    let msg = bc.data.intern(Data::Str("Hello, World!".to_string()));
    let descriptor = bc.data.intern(Data::Str("01".to_string()));
    bc.push(Operation::new(0, 0, Op::Load, print_ident));
    bc.push(Operation::new(0, 1, Op::Load, msg));
    bc.push(Operation::new(0, 2, Op::Call, descriptor));
    bc.push(Operation::new(0, 3, Op::Pop, 0));

    let file = Rc::new(SrcFile::from_bytecode("dir", "main.junec", bc, true));
    state.run_source(file).unwrap();

    let sink = state.global_get("__output").unwrap();
    let printed = sink.with_vec(|v| v.items[0].as_str().map(|s| s.to_string())).unwrap();
    assert_eq!(printed.as_deref(), Some("Hello, World!"));
}

#[test]
fn a_call_through_a_native_function_round_trips_arithmetic() {
    let mut state = State::new("bin", "base", &[]);
    state.global_add("add", native_func(native_add), false);

    let mut bc = Bytecode::new();
    let add_ident = bc.data.intern(Data::Ident("add".to_string()));
    let three = bc.data.intern(Data::Int(3));
    let four = bc.data.intern(Data::Int(4));
    let descriptor = bc.data.intern(Data::Str("02".to_string()));
    bc.push(Operation::new(0, 0, Op::Load, add_ident));
    bc.push(Operation::new(0, 1, Op::Load, three));
    bc.push(Operation::new(0, 2, Op::Load, four));
    bc.push(Operation::new(0, 3, Op::Call, descriptor));

    let file = Rc::new(SrcFile::from_bytecode("dir", "main.junec", bc, true));
    state.run_source(file).unwrap();

    let result = state.operand_stack().pop_value().unwrap();
    assert_eq!(result.as_int(), Some(7));
    result.deref();
}

/// A `PushJump`/`PushJumpNamed` block rewinds to its target and binds the
/// raised value under the named variable when the protected call fails.
#[test]
fn a_failing_call_is_caught_by_its_enclosing_fail_block() {
    let mut state = State::new("bin", "base", &[]);
    state.global_add("boom", native_func(native_boom), false);

    let mut bc = Bytecode::new();
    let boom_ident = bc.data.intern(Data::Ident("boom".to_string()));
    let descriptor = bc.data.intern(Data::Str("00".to_string()));
    let err_name = bc.data.intern(Data::Ident("err".to_string()));
    let after_call = bc.data.intern(Data::Size(4));
    let one_frame = bc.data.intern(Data::Size(1));

    bc.push(Operation::new(0, 0, Op::PushJump, after_call));
    bc.push(Operation::new(0, 1, Op::PushJumpNamed, err_name));
    bc.push(Operation::new(0, 2, Op::Load, boom_ident));
    bc.push(Operation::new(0, 3, Op::Call, descriptor));
    bc.push(Operation::new(0, 4, Op::BlkA, one_frame)); // target of the rewind
    bc.push(Operation::new(0, 5, Op::Load, err_name));

    let file = Rc::new(SrcFile::from_bytecode("dir", "main.junec", bc, true));
    state.run_source(file).unwrap();

    let caught = state.operand_stack().pop_value().unwrap();
    assert_eq!(caught.as_str().map(|s| s.to_string()).as_deref(), Some("boom"));
    caught.deref();
}

#[test]
fn attr_resolves_a_variable_bound_in_a_sources_module_environment() {
    let mut state = State::new("bin", "base", &[]);

    let module_env = Rc::new(RefCell::new(Env::new()));
    module_env.borrow_mut().add_module("answer", Value::int_val(42, 0, 0), false);
    let module_file = Rc::new(SrcFile::from_bytecode("dir", "mod.junec", Bytecode::new(), false));
    let module_source = Value::source_val(SourceData::new(module_file, module_env), 0, 0);
    state.global_add("mod", module_source, false);

    let mut bc = Bytecode::new();
    let mod_ident = bc.data.intern(Data::Ident("mod".to_string()));
    let answer_ident = bc.data.intern(Data::Ident("answer".to_string()));
    bc.push(Operation::new(0, 0, Op::Load, mod_ident));
    bc.push(Operation::new(0, 1, Op::Attr, answer_ident));

    let main_file = Rc::new(SrcFile::from_bytecode("dir", "main.junec", bc, true));
    state.run_source(main_file).unwrap();

    let result = state.operand_stack().pop_value().unwrap();
    assert_eq!(result.as_int(), Some(42));
    result.deref();
}

#[test]
fn june_module_import_through_state_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("m.junec");
    let mut bytes = b"JUNE".to_vec();
    bytes.extend(Bytecode::new().to_bytes());
    std::fs::write(&path, &bytes).unwrap();

    let mut state = State::new("bin", dir.path().to_string_lossy().to_string(), &[]);
    let module_path = path.to_string_lossy().to_string();
    state.load_june_module(&module_path, 0, 0).unwrap();
    assert!(state.registered_source(&module_path).is_some());
    state.load_june_module(&module_path, 0, 0).unwrap();
}

#[test]
fn a_bytecode_file_written_to_disk_loads_back_as_a_source() {
    let mut bc = Bytecode::new();
    let n = bc.data.intern(Data::Int(9));
    bc.push(Operation::new(0, 0, Op::Load, n));
    bc.push(Operation::new(0, 1, Op::Pop, 0));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prog.junec");
    let mut file = std::fs::File::create(&path).unwrap();
    write_file(&bc, &mut file).unwrap();
    drop(file);

    let loaded = SrcFile::load(
        dir.path().to_string_lossy().to_string(),
        path.to_string_lossy().to_string(),
        true,
    )
    .unwrap();
    assert!(loaded.is_bytecode());
    assert_eq!(loaded.bytecode().ops.len(), 2);
    assert_eq!(loaded.bytecode().data.len(), 1);
}

#[test]
fn exec_rejects_recursion_past_the_configured_limit() {
    let mut state = State::new("bin", "base", &[]);
    state.exec_stack_max = 1;
    state.exec_stack_count = 1;

    let env = Rc::new(RefCell::new(Env::new()));
    let file = Rc::new(SrcFile::from_bytecode("dir", "main.junec", Bytecode::new(), true));
    let source = Value::source_val(SourceData::new(file, env), 0, 0);
    state.push_src(source);

    let result = exec::exec(&mut state, None, 0, 0);
    assert!(result.is_err());
    assert!(state.exec_stack_count_exceeded);
}
