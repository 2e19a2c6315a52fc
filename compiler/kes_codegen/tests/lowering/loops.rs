//! Loop exits: `break` skips the `else` clause, running out of iterations
//! runs it, `continue` skips the rest of the body.

use kes_codegen::{ExceptionSpec, NativeFuncDef, NativeParam, Stmt};
use kes_ir::{BinaryOp, CmpOp, Relation, Type};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

use crate::common::{Fixture, Program, State};

/// `cdef long f(long n, long b) except -1: <body>`
fn native_fn(fx: &Fixture, body: Vec<Stmt>) -> Program {
    let params = ["n", "b"]
        .iter()
        .map(|p| NativeParam {
            name: fx.name(p),
            ty: Type::LONG,
            span: fx.span(),
        })
        .collect();
    let def = NativeFuncDef::new(fx.name("f"), params, Type::LONG, body, fx.span())
        .with_exception(ExceptionSpec::Value("-1".to_owned()));
    let c = fx.compile_ok(vec![Stmt::native_func_def(def)]);
    Program::function(&c, "__kes_f_m_f")
}

fn call(program: &Program, n: i64, b: i64) -> i64 {
    let mut state = State::new().with_var("__kes_v_n", n).with_var("__kes_v_b", b);
    let outcome = program.run(&mut state);
    outcome.value.unwrap_or_else(|| panic!("unknown result {}", outcome.returned))
}

/// `return else_ran * 1000 + hits`
fn result(fx: &Fixture) -> Stmt {
    Stmt::return_(
        Some(fx.bin(
            BinaryOp::Add,
            fx.bin(BinaryOp::Mul, fx.var("else_ran"), fx.int(1000)),
            fx.var("hits"),
        )),
        fx.span(),
    )
}

/// ```text
/// while i < n:
///     if i == b: break
///     i += 1; hits += 1
/// else:
///     else_ran = 1
/// ```
fn while_with_else() -> Program {
    let fx = Fixture::new();
    let cond = fx.cmp(CmpOp::Lt, fx.var("i"), fx.var("n"));
    let body = vec![
        fx.longs(&["i", "hits", "else_ran"]),
        Stmt::while_(
            cond,
            vec![
                fx.when(
                    fx.cmp(CmpOp::Eq, fx.var("i"), fx.var("b")),
                    vec![Stmt::break_(fx.span())],
                ),
                fx.bump("i", 1),
                fx.bump("hits", 1),
            ],
            Some(vec![fx.assign("else_ran", fx.int(1))]),
            fx.span(),
        ),
        result(&fx),
    ];
    native_fn(&fx, body)
}

/// ```text
/// for i from 0 <= i < n:
///     if i == b: break
///     hits += 1
/// else:
///     else_ran = 1
/// ```
fn for_from_with_else() -> Program {
    let fx = Fixture::new();
    let body = vec![
        fx.longs(&["i", "hits", "else_ran"]),
        Stmt::for_from(
            fx.var("i"),
            fx.int(0),
            Relation::Le,
            Relation::Lt,
            fx.var("n"),
            None,
            vec![
                fx.when(
                    fx.cmp(CmpOp::Eq, fx.var("i"), fx.var("b")),
                    vec![Stmt::break_(fx.span())],
                ),
                fx.bump("hits", 1),
            ],
            Some(vec![fx.assign("else_ran", fx.int(1))]),
            fx.span(),
        ),
        result(&fx),
    ];
    native_fn(&fx, body)
}

/// ```text
/// for x in xs:
///     if hits == b: break
///     hits += 1
/// else:
///     else_ran = 1
/// ```
fn for_in_with_else() -> Program {
    let fx = Fixture::new();
    let body = vec![
        fx.longs(&["hits", "else_ran"]),
        Stmt::for_in(
            fx.var("x"),
            fx.var("xs"),
            vec![
                fx.when(
                    fx.cmp(CmpOp::Eq, fx.var("hits"), fx.var("b")),
                    vec![Stmt::break_(fx.span())],
                ),
                fx.bump("hits", 1),
            ],
            Some(vec![fx.assign("else_ran", fx.int(1))]),
            fx.span(),
        ),
        result(&fx),
    ];
    native_fn(&fx, body)
}

/// Runs `program` over an iterator that yields `n` items and then ends.
fn call_over_items(program: &Program, n: i64, b: i64) -> i64 {
    let items = usize::try_from(n).unwrap_or(0);
    let mut state = State::new()
        .with_var("__kes_v_b", b)
        .with_call("Kes_IterNext", 0)
        .with_call_sequence("Kes_IterNext", std::iter::repeat(7).take(items));
    let outcome = program.run(&mut state);
    assert_eq!(outcome.count("Kes_IterNext("), items.min(usize::try_from(b).unwrap_or(items)) + 1);
    outcome.value.unwrap_or_else(|| panic!("unknown result {}", outcome.returned))
}

fn expected(n: i64, b: i64) -> i64 {
    if (0..n).contains(&b) {
        b
    } else {
        1000 + n.max(0)
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        ..ProptestConfig::default()
    })]

    /// The `else` clause runs exactly when the loop ends without `break`.
    #[test]
    fn prop_while_else_runs_iff_no_break(n in 0i64..8, b in -1i64..10) {
        let program = while_with_else();
        prop_assert_eq!(call(&program, n, b), expected(n, b));
    }

    #[test]
    fn prop_for_from_else_runs_iff_no_break(n in 0i64..8, b in -1i64..10) {
        let program = for_from_with_else();
        prop_assert_eq!(call(&program, n, b), expected(n, b));
    }

    #[test]
    fn prop_for_in_else_runs_iff_no_break(n in 0i64..8, b in -1i64..10) {
        let program = for_in_with_else();
        prop_assert_eq!(call_over_items(&program, n, b), expected(n, b));
    }

    /// `for i from n >= i > 0 by 2` visits n, n-2, ... down to 1 or 2.
    #[test]
    fn prop_for_from_descending_step(n in 0i64..12) {
        let fx = Fixture::new();
        let body = vec![
            fx.longs(&["i", "hits", "else_ran"]),
            Stmt::for_from(
                fx.var("i"),
                fx.var("n"),
                Relation::Ge,
                Relation::Gt,
                fx.int(0),
                Some(fx.int(2)),
                vec![fx.bump("hits", 1)],
                None,
                fx.span(),
            ),
            result(&fx),
        ];
        let program = native_fn(&fx, body);
        prop_assert_eq!(call(&program, n, 0), (n + 1) / 2);
    }
}

#[test]
fn continue_skips_the_rest_of_the_body() {
    let fx = Fixture::new();
    // while i < n: i += 1; if i == b: continue; hits += 1
    let body = vec![
        fx.longs(&["i", "hits", "else_ran"]),
        Stmt::while_(
            fx.cmp(CmpOp::Lt, fx.var("i"), fx.var("n")),
            vec![
                fx.bump("i", 1),
                fx.when(
                    fx.cmp(CmpOp::Eq, fx.var("i"), fx.var("b")),
                    vec![Stmt::continue_(fx.span())],
                ),
                fx.bump("hits", 1),
            ],
            None,
            fx.span(),
        ),
        result(&fx),
    ];
    let program = native_fn(&fx, body);
    assert_eq!(call(&program, 5, 3), 4);
    assert_eq!(call(&program, 5, 9), 5);
}

#[test]
fn nested_break_leaves_only_the_inner_loop() {
    let fx = Fixture::new();
    // for i from 0 <= i < n: (while 1: hits += 1; break)
    let inner = Stmt::while_(
        fx.int(1),
        vec![fx.bump("hits", 1), Stmt::break_(fx.span())],
        Some(vec![fx.assign("else_ran", fx.int(1))]),
        fx.span(),
    );
    let body = vec![
        fx.longs(&["i", "hits", "else_ran"]),
        Stmt::for_from(
            fx.var("i"),
            fx.int(0),
            Relation::Le,
            Relation::Lt,
            fx.var("n"),
            None,
            vec![inner],
            None,
            fx.span(),
        ),
        result(&fx),
    ];
    let program = native_fn(&fx, body);
    assert_eq!(call(&program, 3, 0), 3);
}

fn holds(lhs: i64, rel: Relation, rhs: i64) -> bool {
    match rel {
        Relation::Lt => lhs < rhs,
        Relation::Le => lhs <= rhs,
        Relation::Gt => lhs > rhs,
        Relation::Ge => lhs >= rhs,
    }
}

/// `for i from b1 r1 i r2 b2 by 1: hits += 1; sum = sum + i`, returning
/// `sum * 100 + hits`.
fn for_from_sum(b1: i64, r1: Relation, r2: Relation, b2: i64) -> i64 {
    let fx = Fixture::new();
    let body = vec![
        fx.longs(&["i", "hits", "sum"]),
        Stmt::for_from(
            fx.var("i"),
            fx.int(b1),
            r1,
            r2,
            fx.int(b2),
            Some(fx.int(1)),
            vec![
                fx.bump("hits", 1),
                fx.assign("sum", fx.bin(BinaryOp::Add, fx.var("sum"), fx.var("i"))),
            ],
            None,
            fx.span(),
        ),
        Stmt::return_(
            Some(fx.bin(
                BinaryOp::Add,
                fx.bin(BinaryOp::Mul, fx.var("sum"), fx.int(100)),
                fx.var("hits"),
            )),
            fx.span(),
        ),
    ];
    call(&native_fn(&fx, body), 0, 0)
}

#[test]
fn counting_loop_sums_its_range() {
    assert_eq!(for_from_sum(0, Relation::Le, Relation::Lt, 5), 10 * 100 + 5);
}

#[test]
fn for_from_relations_against_both_bound_orders() {
    let headers = [
        (Relation::Le, Relation::Lt),
        (Relation::Lt, Relation::Le),
        (Relation::Ge, Relation::Gt),
        (Relation::Gt, Relation::Ge),
    ];
    for (r1, r2) in headers {
        for (b1, b2) in [(0, 5), (5, 0)] {
            let visited: Vec<i64> = (-10..=10)
                .filter(|&i| holds(b1, r1, i) && holds(i, r2, b2))
                .collect();
            let expected = visited.iter().sum::<i64>() * 100 + i64::try_from(visited.len()).unwrap();
            assert_eq!(
                for_from_sum(b1, r1, r2, b2),
                expected,
                "for i from {b1} {} i {} {b2} by 1",
                r1.as_symbol(),
                r2.as_symbol()
            );
        }
    }
}
