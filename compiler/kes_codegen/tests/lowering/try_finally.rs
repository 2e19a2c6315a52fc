//! Every way out of a `try` body passes through the finally body once and
//! then continues where it was headed.

use kes_codegen::{ExceptionSpec, Expr, NativeFuncDef, NativeParam, Stmt};
use kes_ir::{BinaryOp, CmpOp, Type};
use pretty_assertions::assert_eq;

use crate::common::{Fixture, Program, State};

/// ```text
/// cdef long f(long k) except -1:
///     cdef long runs, after, loops
///     while loops < 2:
///         loops += 1
///         try:
///             if k == 1: break
///             if k == 2: continue
///             if k == 3: return 30
///             if k == 4: raise None
///         finally:
///             runs += 1
///         after += 1
///         break
///     return runs * 100 + after * 10 + loops
/// ```
fn exits_through_finally(fx: &Fixture) -> String {
    let body = vec![
        fx.longs(&["runs", "after", "loops"]),
        Stmt::while_(
            fx.cmp(CmpOp::Lt, fx.var("loops"), fx.int(2)),
            vec![
                fx.bump("loops", 1),
                Stmt::try_finally(
                    vec![
                        fx.when(fx.is("k", 1), vec![Stmt::break_(fx.span())]),
                        fx.when(fx.is("k", 2), vec![Stmt::continue_(fx.span())]),
                        fx.when(fx.is("k", 3), vec![Stmt::return_(Some(fx.int(30)), fx.span())]),
                        fx.when(
                            fx.is("k", 4),
                            vec![Stmt::raise(Expr::none(fx.span()), None, fx.span())],
                        ),
                    ],
                    vec![fx.bump("runs", 1)],
                    fx.span(),
                ),
                fx.bump("after", 1),
                Stmt::break_(fx.span()),
            ],
            None,
            fx.span(),
        ),
        Stmt::return_(
            Some(fx.bin(
                BinaryOp::Add,
                fx.bin(
                    BinaryOp::Add,
                    fx.bin(BinaryOp::Mul, fx.var("runs"), fx.int(100)),
                    fx.bin(BinaryOp::Mul, fx.var("after"), fx.int(10)),
                ),
                fx.var("loops"),
            )),
            fx.span(),
        ),
    ];
    let params = vec![NativeParam {
        name: fx.name("k"),
        ty: Type::LONG,
        span: fx.span(),
    }];
    let def = NativeFuncDef::new(fx.name("f"), params, Type::LONG, body, fx.span())
        .with_exception(ExceptionSpec::Value("-1".to_owned()));
    fx.compile_ok(vec![Stmt::native_func_def(def)])
}

fn run(k: i64) -> (State, crate::common::trace::Outcome) {
    let fx = Fixture::new();
    let c = exits_through_finally(&fx);
    let program = Program::function(&c, "__kes_f_m_f");
    let mut state = State::new().with_var("__kes_v_k", k);
    let outcome = program.run(&mut state);
    (state, outcome)
}

#[test]
fn normal_completion_runs_finally_then_continues() {
    let (_, outcome) = run(0);
    assert_eq!(outcome.value, Some(111));
}

#[test]
fn break_runs_finally_then_leaves_the_loop() {
    let (_, outcome) = run(1);
    assert_eq!(outcome.value, Some(101));
}

#[test]
fn continue_runs_finally_on_every_iteration() {
    let (_, outcome) = run(2);
    assert_eq!(outcome.value, Some(202));
}

#[test]
fn return_runs_finally_and_keeps_the_value() {
    let (state, outcome) = run(3);
    assert_eq!(outcome.value, Some(30));
    assert_eq!(state.var("__kes_v_runs"), Some(1));
}

#[test]
fn error_runs_finally_and_restores_the_exception() {
    let (state, outcome) = run(4);
    assert_eq!(outcome.value, Some(-1));
    assert_eq!(state.var("__kes_v_runs"), Some(1));
    assert!(outcome.executed("Kes_ErrFetch("));
    assert!(outcome.executed("Kes_ErrRestore("));
    assert!(outcome.executed("Kes_AddTraceback(\"m.f\""));
}

#[test]
fn finally_body_is_emitted_once() {
    let fx = Fixture::new();
    let c = exits_through_finally(&fx);
    assert_eq!(c.matches("__kes_v_runs += 1;").count(), 1);
}

#[test]
fn finally_without_abrupt_exits_is_inlined() {
    let fx = Fixture::new();
    let c = fx.compile_ok(vec![
        fx.longs(&["x"]),
        Stmt::try_finally(vec![fx.bump("x", 1)], vec![fx.bump("x", 2)], fx.span()),
    ]);
    assert!(!c.contains("switch ("), "{c}");
    let program = Program::function(&c, "__kes_module_exec");
    let mut state = State::new().with_var("__kes_v_m_x", 0);
    let outcome = program.run(&mut state);
    assert_eq!(outcome.value, Some(0));
    assert_eq!(state.var("__kes_v_m_x"), Some(3));
}
