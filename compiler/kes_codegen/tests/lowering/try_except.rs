//! Exception state around `try`/`except`: the outer exception is saved on
//! entry and handed back (or dropped) on every way out.

use kes_codegen::{ExceptClause, ExceptionSpec, Expr, NativeFuncDef, NativeParam, Stmt};
use kes_ir::{BinaryOp, Type};
use pretty_assertions::assert_eq;

use crate::common::trace::{Event, Outcome};
use crate::common::{Fixture, Program, State};

/// ```text
/// cdef long f(long k) except -1:
///     cdef long handled, orelse
///     try:
///         if k == 1: raise None
///     except E:
///         handled = 1
///     else:
///         orelse = 1
///     return handled * 10 + orelse
/// ```
fn guarded() -> Program {
    let fx = Fixture::new();
    let clause = ExceptClause::new(
        Some(fx.var("E")),
        None,
        vec![fx.assign("handled", fx.int(1))],
        fx.span(),
    );
    let body = vec![
        fx.longs(&["handled", "orelse"]),
        Stmt::try_except(
            vec![fx.when(
                fx.is("k", 1),
                vec![Stmt::raise(Expr::none(fx.span()), None, fx.span())],
            )],
            vec![clause],
            Some(vec![fx.assign("orelse", fx.int(1))]),
            fx.span(),
        ),
        Stmt::return_(
            Some(fx.bin(
                BinaryOp::Add,
                fx.bin(BinaryOp::Mul, fx.var("handled"), fx.int(10)),
                fx.var("orelse"),
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
    let c = fx.compile_ok(vec![Stmt::native_func_def(def)]);
    Program::function(&c, "__kes_f_m_f")
}

/// The three temporaries the outer exception was saved into.
fn saved_triple(outcome: &Outcome) -> Vec<String> {
    let save = outcome
        .trace
        .iter()
        .find_map(|e| match e {
            Event::Stmt(s) => s.strip_prefix("Kes_ExceptionSave("),
            Event::Label(_) => None,
        })
        .expect("exception state was not saved");
    save.trim_end_matches(')')
        .split(", ")
        .map(|arg| arg.trim_start_matches('&').to_owned())
        .collect()
}

fn assert_cleared(state: &State, outcome: &Outcome) {
    let triple = saved_triple(outcome);
    assert_eq!(triple.len(), 3);
    for temp in triple {
        assert_eq!(state.var(&temp), Some(0), "{temp} still holds a reference");
    }
}

#[test]
fn normal_completion_runs_else_and_drops_saved_state() {
    let program = guarded();
    let mut state = State::new().with_var("__kes_v_k", 0);
    let outcome = program.run(&mut state);
    assert_eq!(outcome.value, Some(1));
    assert!(!outcome.executed("Kes_ExceptionReset("));
    assert_cleared(&state, &outcome);
}

#[test]
fn matching_clause_handles_and_restores_saved_state() {
    let program = guarded();
    let mut state = State::new()
        .with_var("__kes_v_k", 1)
        .with_call("Kes_ErrExceptionMatches", 1);
    let outcome = program.run(&mut state);
    assert_eq!(outcome.value, Some(10));
    assert!(outcome.visited("_exception_handled"));
    assert!(outcome.executed("Kes_ExceptionReset("));
    assert_cleared(&state, &outcome);
}

#[test]
fn unmatched_exception_propagates_after_restoring() {
    let program = guarded();
    let mut state = State::new()
        .with_var("__kes_v_k", 1)
        .with_call("Kes_ErrExceptionMatches", 0);
    let outcome = program.run(&mut state);
    assert_eq!(outcome.value, Some(-1));
    assert_eq!(state.var("__kes_v_handled"), Some(0));
    assert!(outcome.executed("Kes_ExceptionReset("));
    assert_cleared(&state, &outcome);
}

#[test]
fn bound_target_receives_the_exception_value() {
    let fx = Fixture::new();
    let clause = ExceptClause::new(
        Some(fx.var("E")),
        Some(fx.var("e")),
        vec![Stmt::pass(fx.span())],
        fx.span(),
    );
    let body = vec![Stmt::try_except(
        vec![Stmt::raise(Expr::none(fx.span()), None, fx.span())],
        vec![clause],
        None,
        fx.span(),
    )];
    let c = fx.compile_ok(body);
    let program = Program::function(&c, "__kes_module_exec");
    let mut state = State::new().with_call("Kes_ErrExceptionMatches", 1);
    let outcome = program.run(&mut state);
    assert_eq!(outcome.value, Some(0));
    assert!(outcome.executed("Kes_GetException("));
    assert!(outcome.executed("__kes_n_e"));
    assert_cleared(&state, &outcome);
}
