use super::helpers::*;
use lua_core::{LuaValue, OpCode, ProtoBuilder, UpvalueDesc};

// ── Recursion ───────────────────────────────────────────────────

#[test]
fn test_recursive_fib() {
    // local function fib(n)
    //   if n < 2 then return n end
    //   return fib(n - 1) + fib(n - 2)
    // end
    // return fib(10)
    let mut fib = ProtoBuilder::new("test").params(1).max_stack(4);
    fib.upvalue(UpvalueDesc::Stack(0));
    let two = fib.constant(2i64);
    let one = fib.constant(1i64);
    fib.emit(abc(OpCode::Lt, 0, 0, k(two)));
    fib.emit(asbx(OpCode::Jmp, 0, 1));
    fib.emit(abc(OpCode::Return, 0, 2, 0));
    fib.emit(abc(OpCode::GetUpval, 1, 0, 0));
    fib.emit(abc(OpCode::Sub, 2, 0, k(one)));
    fib.emit(abc(OpCode::Call, 1, 2, 2));
    fib.emit(abc(OpCode::GetUpval, 2, 0, 0));
    fib.emit(abc(OpCode::Sub, 3, 0, k(two)));
    fib.emit(abc(OpCode::Call, 2, 2, 2));
    fib.emit(abc(OpCode::Add, 1, 1, 2));
    fib.emit(abc(OpCode::Return, 1, 2, 0));
    fib.emit(abc(OpCode::Return, 0, 1, 0));

    let mut main = main_chunk();
    let p = main.proto(fib.finish());
    let ten = main.constant(10i64);
    main.emit(abx(OpCode::Closure, 0, p));
    main.emit(abc(OpCode::Move, 1, 0, 0));
    main.emit(abx(OpCode::LoadK, 2, ten));
    main.emit(abc(OpCode::Call, 1, 2, 0));
    main.emit(abc(OpCode::Return, 1, 0, 0));

    let r = run(main.finish());
    assert_eq!(r.len(), 1);
    assert_int(&r, 0, 55);
}

#[test]
fn test_global_function_recursion() {
    // function fact(n) if n == 0 then return 1 end return n * fact(n - 1) end
    // return fact(20)
    let mut fact = function_with_env(1);
    let zero = fact.constant(0i64);
    let one = fact.constant(1i64);
    let name = fact.constant("fact");
    fact.emit(abc(OpCode::Eq, 0, 0, k(zero)));
    fact.emit(asbx(OpCode::Jmp, 0, 2));
    fact.emit(abx(OpCode::LoadK, 1, one));
    fact.emit(abc(OpCode::Return, 1, 2, 0));
    fact.emit(abc(OpCode::GetTabUp, 1, 0, k(name)));
    fact.emit(abc(OpCode::Sub, 2, 0, k(one)));
    fact.emit(abc(OpCode::Call, 1, 2, 2));
    fact.emit(abc(OpCode::Mul, 1, 0, 1));
    fact.emit(abc(OpCode::Return, 1, 2, 0));

    let mut main = main_chunk();
    let p = main.proto(fact.finish());
    let name = main.constant("fact");
    let twenty = main.constant(20i64);
    main.emit(abx(OpCode::Closure, 0, p));
    main.emit(abc(OpCode::SetTabUp, 0, k(name), 0));
    main.emit(abc(OpCode::GetTabUp, 0, 0, k(name)));
    main.emit(abx(OpCode::LoadK, 1, twenty));
    main.emit(abc(OpCode::Call, 0, 2, 2));
    main.emit(abc(OpCode::Return, 0, 2, 0));

    let r = run(main.finish());
    assert_int(&r, 0, 2_432_902_008_176_640_000);
}

// ── Varargs and multiple results ────────────────────────────────

#[test]
fn test_varargs_count_and_unpack() {
    // local function f(...) local a, b = ...; return select('#', ...), a, b end
    // return f(1, 2, 3)
    let mut f = function_with_env(0).vararg();
    let select = f.constant("select");
    let hash = f.constant("#");
    f.emit(abc(OpCode::VarArg, 0, 3, 0));
    f.emit(abc(OpCode::GetTabUp, 2, 0, k(select)));
    f.emit(abx(OpCode::LoadK, 3, hash));
    f.emit(abc(OpCode::VarArg, 4, 0, 0));
    f.emit(abc(OpCode::Call, 2, 0, 2));
    f.emit(abc(OpCode::Move, 3, 0, 0));
    f.emit(abc(OpCode::Move, 4, 1, 0));
    f.emit(abc(OpCode::Return, 2, 4, 0));

    let mut main = main_chunk();
    let p = main.proto(f.finish());
    main.emit(abx(OpCode::Closure, 0, p));
    for (reg, n) in [(1u32, 1i64), (2, 2), (3, 3)] {
        let c = main.constant(n);
        main.emit(abx(OpCode::LoadK, reg, c));
    }
    main.emit(abc(OpCode::Call, 0, 4, 0));
    main.emit(abc(OpCode::Return, 0, 0, 0));

    let r = run(main.finish());
    assert_eq!(r.len(), 3);
    assert_int(&r, 0, 3);
    assert_int(&r, 1, 1);
    assert_int(&r, 2, 2);
}

#[test]
fn test_varargs_pass_through_keeps_nils() {
    // local function id(...) return ... end
    // return id(1, nil, 3)
    let mut id = ProtoBuilder::new("test").vararg().max_stack(2);
    id.emit(abc(OpCode::VarArg, 0, 0, 0));
    id.emit(abc(OpCode::Return, 0, 0, 0));

    let mut main = main_chunk();
    let p = main.proto(id.finish());
    let one = main.constant(1i64);
    let three = main.constant(3i64);
    main.emit(abx(OpCode::Closure, 0, p));
    main.emit(abx(OpCode::LoadK, 1, one));
    main.emit(abc(OpCode::LoadNil, 2, 0, 0));
    main.emit(abx(OpCode::LoadK, 3, three));
    main.emit(abc(OpCode::Call, 0, 4, 0));
    main.emit(abc(OpCode::Return, 0, 0, 0));

    let r = run(main.finish());
    assert_eq!(r, vec![LuaValue::Integer(1), LuaValue::Nil, LuaValue::Integer(3)]);
}

#[test]
fn test_missing_arguments_are_nil() {
    // local function f(a, b) return b end
    // return f(1)
    let mut f = ProtoBuilder::new("test").params(2).max_stack(2);
    f.emit(abc(OpCode::Return, 1, 2, 0));

    let mut main = main_chunk();
    let p = main.proto(f.finish());
    let one = main.constant(1i64);
    main.emit(abx(OpCode::Closure, 0, p));
    main.emit(abx(OpCode::LoadK, 1, one));
    main.emit(abc(OpCode::Call, 0, 2, 2));
    main.emit(abc(OpCode::Return, 0, 2, 0));

    let r = run(main.finish());
    assert_nil(&r, 0);
}

#[test]
fn test_nested_call_results_feed_arguments() {
    // local function three() return 1, 2, 3 end
    // return select('#', three())
    let mut three = ProtoBuilder::new("test").max_stack(3);
    for (reg, n) in [(0u32, 1i64), (1, 2), (2, 3)] {
        let c = three.constant(n);
        three.emit(abx(OpCode::LoadK, reg, c));
    }
    three.emit(abc(OpCode::Return, 0, 4, 0));

    let mut main = main_chunk();
    let p = main.proto(three.finish());
    let select = main.constant("select");
    let hash = main.constant("#");
    main.emit(abx(OpCode::Closure, 0, p));
    main.emit(abc(OpCode::GetTabUp, 1, 0, k(select)));
    main.emit(abx(OpCode::LoadK, 2, hash));
    main.emit(abc(OpCode::Move, 3, 0, 0));
    main.emit(abc(OpCode::Call, 3, 1, 0));
    main.emit(abc(OpCode::Call, 1, 0, 2));
    main.emit(abc(OpCode::Return, 1, 2, 0));

    let r = run(main.finish());
    assert_int(&r, 0, 3);
}

#[test]
fn test_tail_call_returns_callee_results() {
    // local function g(x) return x, x end
    // local function f(x) return g(x + 1) end
    // return f(1)
    let mut g = ProtoBuilder::new("test").params(1).max_stack(2);
    g.emit(abc(OpCode::Move, 1, 0, 0));
    g.emit(abc(OpCode::Return, 0, 3, 0));

    let mut f = ProtoBuilder::new("test").params(1).max_stack(3);
    f.upvalue(UpvalueDesc::Stack(0));
    let one = f.constant(1i64);
    f.emit(abc(OpCode::GetUpval, 1, 0, 0));
    f.emit(abc(OpCode::Add, 2, 0, k(one)));
    f.emit(abc(OpCode::TailCall, 1, 2, 0));
    f.emit(abc(OpCode::Return, 1, 0, 0));

    let mut main = main_chunk();
    let pg = main.proto(g.finish());
    let pf = main.proto(f.finish());
    let one = main.constant(1i64);
    main.emit(abx(OpCode::Closure, 0, pg));
    main.emit(abx(OpCode::Closure, 1, pf));
    main.emit(abc(OpCode::Move, 2, 1, 0));
    main.emit(abx(OpCode::LoadK, 3, one));
    main.emit(abc(OpCode::Call, 2, 2, 0));
    main.emit(abc(OpCode::Return, 2, 0, 0));

    let r = run(main.finish());
    assert_eq!(r, vec![LuaValue::Integer(2), LuaValue::Integer(2)]);
}
