//! Generator bodies resume after the `yield` they last stopped at.

use kes_codegen::{Expr, FuncDef, Stmt};
use pretty_assertions::assert_eq;

use crate::common::{Fixture, Program, State};

const RESUME: &str = "__kes_generator->resume_label";

fn generator(fx: &Fixture, body: Vec<Stmt>) -> String {
    let def = FuncDef::new(fx.name("gen"), Vec::new(), body, fx.span());
    fx.compile_ok(vec![Stmt::func_def(def)])
}

fn yield_stmt(fx: &Fixture, value: Option<Expr>) -> Stmt {
    Stmt::expr(Expr::yield_(value, fx.span()))
}

#[test]
fn each_resumption_continues_after_the_previous_yield() {
    let fx = Fixture::new();
    let body = (1..=3).map(|v| yield_stmt(&fx, Some(fx.int(v)))).collect();
    let c = generator(&fx, body);
    let program = Program::function(&c, "__kes_gb_m_gen");
    let mut state = State::new()
        .with_var(RESUME, 0)
        .with_var("__kes_sent_value", 1);

    let first = program.run(&mut state);
    assert!(first.visited("_first_run"));
    assert_eq!(first.returned, "__kes_r");
    assert_eq!(state.var(RESUME), Some(1));

    for n in 1..=2 {
        let outcome = program.run(&mut state);
        assert!(outcome.visited(&format!("_resume_{n}")));
        assert!(!outcome.visited("_first_run"));
        assert_eq!(state.var(RESUME), Some(n + 1));
    }

    let last = program.run(&mut state);
    assert!(last.visited("_resume_3"));
    assert!(last.executed("Kes_Generator_Clear("));
    assert_eq!(last.value, Some(0));
    assert_eq!(state.var(RESUME), Some(-1));

    let exhausted = program.run(&mut state);
    assert_eq!(exhausted.returned, "NULL");
    assert!(exhausted.trace.is_empty() || !exhausted.visited("_first_run"));
}

#[test]
fn resuming_with_an_error_skips_the_body() {
    let fx = Fixture::new();
    let body = vec![yield_stmt(&fx, None), yield_stmt(&fx, None)];
    let c = generator(&fx, body);
    let program = Program::function(&c, "__kes_gb_m_gen");
    let mut state = State::new()
        .with_var(RESUME, 1)
        .with_var("__kes_sent_value", 0);
    let outcome = program.run(&mut state);
    assert!(outcome.visited("_resume_1"));
    assert!(!outcome.visited("_resume_2"));
    assert!(outcome.executed("Kes_AddTraceback(\"m.gen\""));
    assert_eq!(state.var(RESUME), Some(-1));
}

#[test]
fn constructor_wraps_the_cell_in_a_generator_object() {
    let fx = Fixture::new();
    let c = generator(&fx, vec![yield_stmt(&fx, None)]);
    let program = Program::function(&c, "__kes_pf_m_gen");
    let outcome = program.run(&mut State::new());
    assert!(outcome.executed("Kes_ScopeNew("));
    assert!(outcome.executed("Kes_Generator_New((KesGeneratorBody)__kes_gb_m_gen"));
    assert!(!outcome.visited("_error"));
}

#[test]
fn generator_locals_live_in_the_cell() {
    let fx = Fixture::new();
    let body = vec![
        fx.assign("x", fx.int(1)),
        yield_stmt(&fx, Some(fx.var("x"))),
    ];
    let c = generator(&fx, body);
    assert!(c.contains("  KesObject *__kes_v_x;\n"), "{c}");
    assert!(c.contains("__kes_cur_scope->__kes_v_x"), "{c}");
}

#[test]
fn temporaries_live_across_a_yield_are_saved_and_restored() {
    let fx = Fixture::new();
    // g(h(), (yield))
    let call = Expr::call(
        fx.var("g"),
        vec![
            Expr::call(fx.var("h"), Vec::new(), fx.span()),
            Expr::yield_(None, fx.span()),
        ],
        fx.span(),
    );
    let c = generator(&fx, vec![Stmt::expr(call)]);
    let program = Program::function(&c, "__kes_gb_m_gen");
    let mut state = State::new()
        .with_var(RESUME, 0)
        .with_var("__kes_sent_value", 1);

    let suspend = program.run(&mut state);
    assert!(suspend.executed("__kes_cur_scope->__kes_t_"));
    assert_eq!(state.var(RESUME), Some(1));

    let resume = program.run(&mut state);
    assert!(resume.executed("= __kes_cur_scope->__kes_t_"));
    assert!(resume.executed("__kes_cur_scope->__kes_t_") && resume.executed("= 0"));
}
