use super::helpers::*;
use lua_core::{LuaError, LuaValue, OpCode, State};
use lua_vm::{Vm, VmConfig};
use std::cell::RefCell;
use std::rc::Rc;

#[test]
fn test_script_calls_registered_function() {
    // return add3(1, 2, 3)
    let mut main = main_chunk();
    let name = main.constant("add3");
    main.emit(abc(OpCode::GetTabUp, 0, 0, k(name)));
    for (reg, n) in [(1u32, 1i64), (2, 2), (3, 3)] {
        let c = main.constant(n);
        main.emit(abx(OpCode::LoadK, reg, c));
    }
    main.emit(abc(OpCode::Call, 0, 4, 0));
    main.emit(abc(OpCode::Return, 0, 0, 0));

    let mut vm = Vm::new();
    vm.register(
        "add3",
        host(|_, args| {
            let sum = args.iter().filter_map(LuaValue::to_integer).sum::<i64>();
            Ok(vec![LuaValue::Integer(sum)])
        }),
    );
    vm.load(main.finish());
    let r = vm.run().unwrap();
    assert_eq!(r, vec![LuaValue::Integer(6)]);
}

#[test]
fn test_host_calls_script_function_after_run() {
    // function double(x) return x * 2 end
    let mut f = function_with_env(1);
    let two = f.constant(2i64);
    f.emit(abc(OpCode::Mul, 1, 0, k(two)));
    f.emit(abc(OpCode::Return, 1, 2, 0));

    let mut main = main_chunk();
    let name = main.constant("double");
    let p = main.proto(f.finish());
    main.emit(abx(OpCode::Closure, 0, p));
    main.emit(abc(OpCode::SetTabUp, 0, k(name), 0));
    main.emit(abc(OpCode::Return, 0, 1, 0));

    let mut vm = Vm::new();
    vm.load(main.finish());
    assert!(vm.run().unwrap().is_empty());

    let out = vm.call_by_param("double", vec![LuaValue::Integer(21)]).unwrap();
    assert_eq!(out, vec![LuaValue::Integer(42)]);
    assert_eq!(vm.depth(), 0);
}

#[test]
fn test_call_by_param_missing_global() {
    let mut vm = Vm::new();
    let err = vm.call_by_param("nope", vec![]).unwrap_err();
    assert_eq!(err.to_string(), "attempt to call a nil value (global 'nope')");
}

#[test]
fn test_host_function_reenters_engine() {
    // return apply(function(x) return x + 1 end, 41)
    let mut f = function_with_env(1);
    let one = f.constant(1i64);
    f.emit(abc(OpCode::Add, 1, 0, k(one)));
    f.emit(abc(OpCode::Return, 1, 2, 0));

    let mut main = main_chunk();
    let name = main.constant("apply");
    let n = main.constant(41i64);
    let p = main.proto(f.finish());
    main.emit(abc(OpCode::GetTabUp, 0, 0, k(name)));
    main.emit(abx(OpCode::Closure, 1, p));
    main.emit(abx(OpCode::LoadK, 2, n));
    main.emit(abc(OpCode::Call, 0, 3, 0));
    main.emit(abc(OpCode::Return, 0, 0, 0));

    let mut vm = Vm::new();
    vm.register(
        "apply",
        host(|state, mut args| {
            let func = args.remove(0);
            state.call(func, args)
        }),
    );
    vm.load(main.finish());
    let r = vm.run().unwrap();
    assert_eq!(r, vec![LuaValue::Integer(42)]);
}

#[test]
fn test_host_errors_reach_script_pcall() {
    // return pcall(fail)
    let mut main = main_chunk();
    let pcall = main.constant("pcall");
    let fail = main.constant("fail");
    main.emit(abc(OpCode::GetTabUp, 0, 0, k(pcall)));
    main.emit(abc(OpCode::GetTabUp, 1, 0, k(fail)));
    main.emit(abc(OpCode::Call, 0, 2, 0));
    main.emit(abc(OpCode::Return, 0, 0, 0));

    let mut vm = Vm::new();
    vm.register(
        "fail",
        host(|_, _| Err(LuaError::Runtime("host refused".into()))),
    );
    vm.load(main.finish());
    let r = vm.run().unwrap();
    assert_bool(&r, 0, false);
    assert_str(&r, 1, "host refused");
}

#[test]
fn test_globals_are_shared_between_chunks() {
    // chunk 1: counter = 5
    let mut first = main_chunk();
    let name = first.constant("counter");
    let five = first.constant(5i64);
    first.emit(abc(OpCode::SetTabUp, 0, k(name), k(five)));
    first.emit(abc(OpCode::Return, 0, 1, 0));

    // chunk 2: return counter * 2
    let mut second = main_chunk();
    let name = second.constant("counter");
    let two = second.constant(2i64);
    second.emit(abc(OpCode::GetTabUp, 0, 0, k(name)));
    second.emit(abc(OpCode::Mul, 0, 0, k(two)));
    second.emit(abc(OpCode::Return, 0, 2, 0));

    let mut vm = Vm::new();
    vm.load(first.finish());
    vm.run().unwrap();
    assert_eq!(vm.get_global("counter"), LuaValue::Integer(5));
    vm.load(second.finish());
    assert_eq!(vm.run().unwrap(), vec![LuaValue::Integer(10)]);
}

#[test]
fn test_host_observes_script_writes() {
    // log("a"); log("b")
    let mut main = main_chunk();
    let name = main.constant("log");
    for s in ["a", "b"] {
        let c = main.constant(s);
        main.emit(abc(OpCode::GetTabUp, 0, 0, k(name)));
        main.emit(abx(OpCode::LoadK, 1, c));
        main.emit(abc(OpCode::Call, 0, 2, 1));
    }
    main.emit(abc(OpCode::Return, 0, 1, 0));

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    let mut vm = Vm::new();
    vm.register(
        "log",
        host(move |_, args| {
            sink.borrow_mut().extend(args);
            Ok(vec![])
        }),
    );
    vm.load(main.finish());
    vm.run().unwrap();
    assert_eq!(*seen.borrow(), vec![LuaValue::from("a"), LuaValue::from("b")]);
}

#[test]
fn test_bare_engine_has_no_base_library() {
    // print("hi")
    let mut main = main_chunk();
    let print = main.constant("print");
    let hi = main.constant("hi");
    main.emit(abc(OpCode::GetTabUp, 0, 0, k(print)));
    main.emit(abx(OpCode::LoadK, 1, hi));
    main.emit(abc(OpCode::Call, 0, 2, 1));
    main.emit(abc(OpCode::Return, 0, 1, 0));

    let mut vm = Vm::with_config(VmConfig::bare());
    assert!(vm.get_global("print").is_nil());
    vm.load(main.finish());
    let err = vm.run().unwrap_err();
    assert_eq!(err.to_string(), "test:3: attempt to call a nil value");
    assert_eq!(vm.depth(), 0);
}

#[test]
fn test_run_without_load_is_internal_error() {
    let mut vm = Vm::new();
    let err = vm.run().unwrap_err();
    assert!(matches!(err, LuaError::Internal(_)));
}
