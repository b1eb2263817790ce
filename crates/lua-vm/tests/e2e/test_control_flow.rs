use super::helpers::*;
use lua_core::{LuaValue, OpCode};

// ── Numeric for ─────────────────────────────────────────────────

#[test]
fn test_sum_of_even_numbers() {
    // local s = 0
    // for i = 1, 100 do if i % 2 == 0 then s = s + i end end
    // return s
    let mut main = main_chunk();
    let zero = main.constant(0i64);
    let one = main.constant(1i64);
    let hundred = main.constant(100i64);
    let two = main.constant(2i64);
    main.emit(abx(OpCode::LoadK, 0, zero));
    main.emit(abx(OpCode::LoadK, 1, one));
    main.emit(abx(OpCode::LoadK, 2, hundred));
    main.emit(abx(OpCode::LoadK, 3, one));
    main.emit(asbx(OpCode::ForPrep, 1, 4));
    main.emit(abc(OpCode::Mod, 5, 4, k(two)));
    main.emit(abc(OpCode::Eq, 0, 5, k(zero)));
    main.emit(asbx(OpCode::Jmp, 0, 1));
    main.emit(abc(OpCode::Add, 0, 0, 4));
    main.emit(asbx(OpCode::ForLoop, 1, -5));
    main.emit(abc(OpCode::Return, 0, 2, 0));

    let r = run(main.finish());
    assert_int(&r, 0, 2550);
}

#[test]
fn test_descending_loop_visits_each_index() {
    // local s = "" ; for i = 3, 1, -1 do s = s .. i end ; return s
    let mut main = main_chunk();
    let empty = main.constant("");
    let three = main.constant(3i64);
    let one = main.constant(1i64);
    let minus_one = main.constant(-1i64);
    main.emit(abx(OpCode::LoadK, 0, empty));
    main.emit(abx(OpCode::LoadK, 1, three));
    main.emit(abx(OpCode::LoadK, 2, one));
    main.emit(abx(OpCode::LoadK, 3, minus_one));
    main.emit(asbx(OpCode::ForPrep, 1, 3));
    main.emit(abc(OpCode::Move, 5, 0, 0));
    main.emit(abc(OpCode::Move, 6, 4, 0));
    main.emit(abc(OpCode::Concat, 0, 5, 6));
    main.emit(asbx(OpCode::ForLoop, 1, -4));
    main.emit(abc(OpCode::Return, 0, 2, 0));

    let r = run(main.finish());
    assert_str(&r, 0, "321");
}

#[test]
fn test_loop_index_is_integer_for_integer_bounds() {
    // local last; for i = 1, 3 do last = i end; return last
    let mut main = main_chunk();
    let one = main.constant(1i64);
    let three = main.constant(3i64);
    main.emit(abc(OpCode::LoadNil, 0, 0, 0));
    main.emit(abx(OpCode::LoadK, 1, one));
    main.emit(abx(OpCode::LoadK, 2, three));
    main.emit(abx(OpCode::LoadK, 3, one));
    main.emit(asbx(OpCode::ForPrep, 1, 1));
    main.emit(abc(OpCode::Move, 0, 4, 0));
    main.emit(asbx(OpCode::ForLoop, 1, -2));
    main.emit(abc(OpCode::Return, 0, 2, 0));

    let r = run(main.finish());
    assert_eq!(r, vec![LuaValue::Integer(3)]);
}

#[test]
fn test_empty_range_skips_body() {
    // local n = 0; for i = 5, 1 do n = n + 1 end; return n
    let mut main = main_chunk();
    let zero = main.constant(0i64);
    let five = main.constant(5i64);
    let one = main.constant(1i64);
    main.emit(abx(OpCode::LoadK, 0, zero));
    main.emit(abx(OpCode::LoadK, 1, five));
    main.emit(abx(OpCode::LoadK, 2, one));
    main.emit(abx(OpCode::LoadK, 3, one));
    main.emit(asbx(OpCode::ForPrep, 1, 1));
    main.emit(abc(OpCode::Add, 0, 0, k(one)));
    main.emit(asbx(OpCode::ForLoop, 1, -2));
    main.emit(abc(OpCode::Return, 0, 2, 0));

    let r = run(main.finish());
    assert_int(&r, 0, 0);
}

// ── Conditionals ────────────────────────────────────────────────

#[test]
fn test_while_loop_with_test() {
    // local n, acc = 5, 1
    // while n do acc = acc * 2; n = n - 1; if n == 0 then n = nil end end
    // return acc
    let mut main = main_chunk();
    let five = main.constant(5i64);
    let one = main.constant(1i64);
    let two = main.constant(2i64);
    let zero = main.constant(0i64);
    main.emit(abx(OpCode::LoadK, 0, five));
    main.emit(abx(OpCode::LoadK, 1, one));
    main.emit(abc(OpCode::Test, 0, 0, 0)); // 2: while n
    main.emit(asbx(OpCode::Jmp, 0, 6)); // -> 10
    main.emit(abc(OpCode::Mul, 1, 1, k(two)));
    main.emit(abc(OpCode::Sub, 0, 0, k(one)));
    main.emit(abc(OpCode::Eq, 0, 0, k(zero)));
    main.emit(asbx(OpCode::Jmp, 0, 1));
    main.emit(abc(OpCode::LoadNil, 0, 0, 0));
    main.emit(asbx(OpCode::Jmp, 0, -8)); // -> 2
    main.emit(abc(OpCode::Return, 1, 2, 0));

    let r = run(main.finish());
    assert_int(&r, 0, 32);
}

#[test]
fn test_not_and_equality() {
    // return not nil, not 0, 1 == 1.0, "1" == 1
    let mut main = main_chunk();
    let one = main.constant(1i64);
    let onef = main.constant(1.0);
    let s = main.constant("1");
    main.emit(abc(OpCode::LoadNil, 4, 0, 0));
    main.emit(abc(OpCode::Not, 0, 4, 0));
    main.emit(abx(OpCode::LoadK, 4, one));
    main.emit(abc(OpCode::Not, 1, 4, 0));
    for (dst, lhs, rhs) in [(2u32, one, onef), (3, s, one)] {
        main.emit(abc(OpCode::Eq, 1, k(lhs), k(rhs)));
        main.emit(asbx(OpCode::Jmp, 0, 1));
        main.emit(abc(OpCode::LoadBool, dst, 0, 1));
        main.emit(abc(OpCode::LoadBool, dst, 1, 0));
    }
    main.emit(abc(OpCode::Return, 0, 5, 0));

    let r = run(main.finish());
    assert_bool(&r, 0, true);
    assert_bool(&r, 1, false);
    assert_bool(&r, 2, true);
    assert_bool(&r, 3, false);
}

// ── Arithmetic through opcodes ──────────────────────────────────

#[test]
fn test_floor_division_and_modulo() {
    // return 7 // 2, -7 // 2, 7 % -3, -7 % 3, 7.5 // 2, 5.5 % -2
    let mut main = main_chunk();
    let cases = [
        (OpCode::IDiv, LuaValue::Integer(7), LuaValue::Integer(2)),
        (OpCode::IDiv, LuaValue::Integer(-7), LuaValue::Integer(2)),
        (OpCode::Mod, LuaValue::Integer(7), LuaValue::Integer(-3)),
        (OpCode::Mod, LuaValue::Integer(-7), LuaValue::Integer(3)),
        (OpCode::IDiv, LuaValue::Float(7.5), LuaValue::Integer(2)),
        (OpCode::Mod, LuaValue::Float(5.5), LuaValue::Integer(-2)),
    ];
    for (dst, (op, a, b)) in cases.into_iter().enumerate() {
        let a = main.constant(a);
        let b = main.constant(b);
        main.emit(abc(op, dst as u32, k(a), k(b)));
    }
    main.emit(abc(OpCode::Return, 0, 7, 0));

    let r = run(main.finish());
    assert_int(&r, 0, 3);
    assert_int(&r, 1, -4);
    assert_int(&r, 2, -2);
    assert_int(&r, 3, 2);
    assert_float(&r, 4, 3.0);
    assert_float(&r, 5, -0.5);
}

#[test]
fn test_shift_right_is_logical() {
    // return -1 >> 63, 1 << 64, 3 & 5.0, ~0
    let mut main = main_chunk();
    let minus_one = main.constant(-1i64);
    let sixty_three = main.constant(63i64);
    let one = main.constant(1i64);
    let sixty_four = main.constant(64i64);
    let three = main.constant(3i64);
    let five = main.constant(5.0);
    let zero = main.constant(0i64);
    main.emit(abc(OpCode::Shr, 0, k(minus_one), k(sixty_three)));
    main.emit(abc(OpCode::Shl, 1, k(one), k(sixty_four)));
    main.emit(abc(OpCode::BAnd, 2, k(three), k(five)));
    main.emit(abx(OpCode::LoadK, 4, zero));
    main.emit(abc(OpCode::BNot, 3, 4, 0));
    main.emit(abc(OpCode::Return, 0, 5, 0));

    let r = run(main.finish());
    assert_int(&r, 0, 1);
    assert_int(&r, 1, 0);
    assert_int(&r, 2, 1);
    assert_int(&r, 3, -1);
}

#[test]
fn test_string_arithmetic_coerces() {
    // return "10" + 1, -"2", 2 ^ 0.5 * 2 ^ 0.5
    let mut main = main_chunk();
    let ten = main.constant("10");
    let one = main.constant(1i64);
    let two_s = main.constant("2");
    let two = main.constant(2i64);
    let half = main.constant(0.5);
    main.emit(abc(OpCode::Add, 0, k(ten), k(one)));
    main.emit(abx(OpCode::LoadK, 3, two_s));
    main.emit(abc(OpCode::Unm, 1, 3, 0));
    main.emit(abc(OpCode::Pow, 3, k(two), k(half)));
    main.emit(abc(OpCode::Mul, 2, 3, 3));
    main.emit(abc(OpCode::Return, 0, 4, 0));

    let r = run(main.finish());
    assert_float(&r, 0, 11.0);
    assert_float(&r, 1, -2.0);
    assert_float(&r, 2, 2.0);
}

#[test]
fn test_concat_numbers_and_strings() {
    // return "x" .. 1 .. 2.0
    let mut main = main_chunk();
    let x = main.constant("x");
    let one = main.constant(1i64);
    let two = main.constant(2.0);
    main.emit(abx(OpCode::LoadK, 1, x));
    main.emit(abx(OpCode::LoadK, 2, one));
    main.emit(abx(OpCode::LoadK, 3, two));
    main.emit(abc(OpCode::Concat, 0, 1, 3));
    main.emit(abc(OpCode::Return, 0, 2, 0));

    let r = run(main.finish());
    assert_str(&r, 0, "x12.0");
}
