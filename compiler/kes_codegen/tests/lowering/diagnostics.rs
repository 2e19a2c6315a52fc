//! Errors found by the declaration and analysis phases. Any error stops
//! emission, which `Fixture::error_codes` checks for every case.

use kes_codegen::{ExceptClause, Expr, FuncDef, NativeFuncDef, Param, Stmt};
use kes_diagnostic::ErrorCode;
use kes_ir::{BinaryOp, Relation, Type};
use pretty_assertions::assert_eq;

use crate::common::Fixture;

fn native(fx: &Fixture, ret: Type, body: Vec<Stmt>) -> NativeFuncDef {
    NativeFuncDef::new(fx.name("f"), Vec::new(), ret, body, fx.span())
}

#[test]
fn clean_module_compiles() {
    let fx = Fixture::new();
    let body = vec![fx.assign("x", fx.int(1)), fx.bump("x", 2)];
    assert_eq!(fx.error_codes(body), Vec::new());
}

#[test]
fn loop_exits_outside_a_loop() {
    let fx = Fixture::new();
    assert_eq!(fx.error_codes(vec![Stmt::break_(fx.span())]), vec![ErrorCode::E3001]);

    let fx = Fixture::new();
    assert_eq!(fx.error_codes(vec![Stmt::continue_(fx.span())]), vec![ErrorCode::E3002]);
}

#[test]
fn break_in_an_if_inside_a_loop_is_fine() {
    let fx = Fixture::new();
    let body = vec![Stmt::while_(
        fx.int(1),
        vec![fx.when(fx.is("x", 0), vec![Stmt::break_(fx.span())])],
        None,
        fx.span(),
    )];
    assert_eq!(fx.error_codes(body), Vec::new());
}

#[test]
fn break_in_a_nested_function_does_not_see_the_outer_loop() {
    let fx = Fixture::new();
    let inner = FuncDef::new(fx.name("g"), Vec::new(), vec![Stmt::break_(fx.span())], fx.span());
    let body = vec![Stmt::while_(
        fx.int(1),
        vec![Stmt::func_def(inner), Stmt::break_(fx.span())],
        None,
        fx.span(),
    )];
    assert_eq!(fx.error_codes(body), vec![ErrorCode::E3001]);
}

#[test]
fn return_and_yield_at_module_level() {
    let fx = Fixture::new();
    let body = vec![Stmt::return_(None, fx.span())];
    assert_eq!(fx.error_codes(body), vec![ErrorCode::E3003]);

    let fx = Fixture::new();
    let body = vec![Stmt::expr(Expr::yield_(None, fx.span()))];
    assert_eq!(fx.error_codes(body), vec![ErrorCode::E3004]);
}

#[test]
fn errors_are_all_reported() {
    let fx = Fixture::new();
    let body = vec![
        Stmt::break_(fx.span()),
        Stmt::continue_(fx.span()),
        Stmt::return_(None, fx.span()),
    ];
    let codes = fx.error_codes(body);
    assert_eq!(codes, vec![ErrorCode::E3001, ErrorCode::E3002, ErrorCode::E3003]);
}

#[test]
fn signature_shape() {
    let fx = Fixture::new();
    let params = vec![
        Param::positional(fx.name("a"), None, fx.span()),
        Param::positional(fx.name("a"), None, fx.span()),
    ];
    let def = FuncDef::new(fx.name("f"), params, vec![Stmt::pass(fx.span())], fx.span());
    assert_eq!(fx.error_codes(vec![Stmt::func_def(def)]), vec![ErrorCode::E1001]);

    let fx = Fixture::new();
    let params = vec![
        Param::positional(fx.name("a"), Some(fx.int(1)), fx.span()),
        Param::positional(fx.name("b"), None, fx.span()),
    ];
    let def = FuncDef::new(fx.name("f"), params, vec![Stmt::pass(fx.span())], fx.span());
    assert_eq!(fx.error_codes(vec![Stmt::func_def(def)]), vec![ErrorCode::E1002]);
}

#[test]
fn keyword_only_arguments_may_skip_defaults() {
    let fx = Fixture::new();
    let params = vec![
        Param::positional(fx.name("a"), Some(fx.int(1)), fx.span()),
        Param::keyword_only(fx.name("k"), None, fx.span()),
    ];
    let def = FuncDef::new(fx.name("f"), params, vec![Stmt::pass(fx.span())], fx.span());
    assert_eq!(fx.error_codes(vec![Stmt::func_def(def)]), Vec::new());
}

#[test]
fn catch_all_clause_must_be_last() {
    let fx = Fixture::new();
    let clauses = vec![
        ExceptClause::new(None, None, vec![Stmt::pass(fx.span())], fx.span()),
        ExceptClause::new(Some(fx.var("E")), None, vec![Stmt::pass(fx.span())], fx.span()),
    ];
    let body = vec![Stmt::try_except(vec![Stmt::pass(fx.span())], clauses, None, fx.span())];
    assert_eq!(fx.error_codes(body), vec![ErrorCode::E1003]);
}

#[test]
fn nonlocal_at_module_level() {
    let fx = Fixture::new();
    let body = vec![Stmt::nonlocal(vec![fx.name("x")], fx.span())];
    assert_eq!(fx.error_codes(body), vec![ErrorCode::E1004]);
}

#[test]
fn for_from_relations_must_agree() {
    let fx = Fixture::new();
    let body = vec![
        fx.longs(&["i"]),
        Stmt::for_from(
            fx.var("i"),
            fx.int(0),
            Relation::Le,
            Relation::Gt,
            fx.int(10),
            None,
            vec![Stmt::pass(fx.span())],
            None,
            fx.span(),
        ),
    ];
    assert_eq!(fx.error_codes(body), vec![ErrorCode::E2004]);
}

#[test]
fn for_from_target_must_be_an_integer_or_object() {
    let fx = Fixture::new();
    let body = vec![
        Stmt::native_decl(vec![(fx.name("x"), fx.span())], Type::DOUBLE, fx.span()),
        Stmt::for_from(
            fx.var("x"),
            fx.int(0),
            Relation::Le,
            Relation::Lt,
            fx.int(10),
            None,
            vec![Stmt::pass(fx.span())],
            None,
            fx.span(),
        ),
    ];
    assert_eq!(fx.error_codes(body), vec![ErrorCode::E2005]);
}

#[test]
fn integer_only_operator_on_a_double() {
    let fx = Fixture::new();
    let body = vec![
        Stmt::native_decl(vec![(fx.name("x"), fx.span())], Type::DOUBLE, fx.span()),
        Stmt::inplace(BinaryOp::LShift, fx.var("x"), fx.int(1), fx.span()),
    ];
    assert_eq!(fx.error_codes(body), vec![ErrorCode::E2009]);
}

#[test]
fn parallel_assignment_needs_one_value_per_target() {
    let fx = Fixture::new();
    let body = vec![Stmt::parallel(
        vec![fx.var("a"), fx.var("b")],
        vec![fx.int(1)],
        fx.span(),
    )];
    assert_eq!(fx.error_codes(body), vec![ErrorCode::E2012]);

    let fx = Fixture::new();
    let body = vec![Stmt::parallel(
        vec![fx.var("a"), fx.var("b")],
        vec![fx.var("b"), fx.var("a")],
        fx.span(),
    )];
    assert_eq!(fx.error_codes(body), Vec::new());
}

#[test]
fn native_returns_must_match_the_return_type() {
    let fx = Fixture::new();
    let def = native(&fx, Type::Void, vec![Stmt::return_(Some(fx.int(1)), fx.span())]);
    assert_eq!(fx.error_codes(vec![Stmt::native_func_def(def)]), vec![ErrorCode::E2002]);

    let fx = Fixture::new();
    let def = native(&fx, Type::LONG, vec![Stmt::return_(None, fx.span())]);
    assert_eq!(fx.error_codes(vec![Stmt::native_func_def(def)]), vec![ErrorCode::E2003]);
}

#[test]
fn lock_transitions_must_change_the_state() {
    let fx = Fixture::new();
    let body = vec![Stmt::lock_bracket(false, vec![Stmt::pass(fx.span())], fx.span())];
    assert_eq!(fx.error_codes(body), vec![ErrorCode::E2007]);

    let fx = Fixture::new();
    let inner = Stmt::lock_bracket(true, vec![Stmt::pass(fx.span())], fx.span());
    let body = vec![Stmt::lock_bracket(true, vec![inner], fx.span())];
    assert_eq!(fx.error_codes(body), vec![ErrorCode::E2007]);

    let fx = Fixture::new();
    let release = Stmt::lock_bracket(true, vec![Stmt::pass(fx.span())], fx.span());
    let def = native(&fx, Type::Void, vec![release]).nogil();
    assert_eq!(fx.error_codes(vec![Stmt::native_func_def(def)]), vec![ErrorCode::E2007]);
}

#[test]
fn reacquiring_inside_a_released_region_is_fine() {
    let fx = Fixture::new();
    let inner = Stmt::lock_bracket(false, vec![Stmt::pass(fx.span())], fx.span());
    let body = vec![Stmt::lock_bracket(true, vec![inner], fx.span())];
    assert_eq!(fx.error_codes(body), Vec::new());
}

#[test]
fn object_work_needs_the_lock() {
    let fx = Fixture::new();
    let handler = ExceptClause::new(None, None, vec![Stmt::pass(fx.span())], fx.span());
    let guarded = Stmt::try_except(vec![Stmt::pass(fx.span())], vec![handler], None, fx.span());
    let body = vec![Stmt::lock_bracket(true, vec![guarded], fx.span())];
    assert_eq!(fx.error_codes(body), vec![ErrorCode::E2006]);

    let fx = Fixture::new();
    let def = native(&fx, Type::Object, vec![Stmt::pass(fx.span())]).nogil();
    assert_eq!(fx.error_codes(vec![Stmt::native_func_def(def)]), vec![ErrorCode::E2006]);
}
