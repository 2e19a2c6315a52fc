//! Argument unpacking in `def` wrappers.

use kes_codegen::{DirectiveOverrides, FuncDef, Param, Stmt};
use pretty_assertions::assert_eq;

use crate::common::{Fixture, Program, State};

const BODY_CALL: &str = "__kes_pf_m_f(";

fn def(fx: &Fixture, params: Vec<Param>) -> FuncDef {
    FuncDef::new(fx.name("f"), params, vec![Stmt::pass(fx.span())], fx.span())
}

fn positional(fx: &Fixture, names: &[&str]) -> Vec<Param> {
    names
        .iter()
        .map(|n| Param::positional(fx.name(n), None, fx.span()))
        .collect()
}

fn wrapper(fx: &Fixture, def: FuncDef) -> (String, Program) {
    let c = fx.compile_ok(vec![Stmt::func_def(def)]);
    let program = Program::function(&c, "__kes_pw_m_f");
    (c, program)
}

/// Positional call without keywords passing `npos` arguments.
fn positional_call(npos: i64) -> State {
    State::new()
        .with_var("__kes_kwds", 0)
        .with_call("Kes_TUPLE_SIZE", npos)
}

#[test]
fn conventions_follow_the_signature() {
    let fx = Fixture::new();
    let (c, _) = wrapper(&fx, def(&fx, Vec::new()));
    assert!(c.contains("(KesCFunction)__kes_pw_m_f, KES_METH_NOARGS, 0};"), "{c}");

    let fx = Fixture::new();
    let (c, _) = wrapper(&fx, def(&fx, positional(&fx, &["a"])));
    assert!(c.contains("(KesCFunction)__kes_pw_m_f, KES_METH_O, 0};"), "{c}");

    let fx = Fixture::new();
    let (c, _) = wrapper(&fx, def(&fx, positional(&fx, &["a", "b"])));
    assert!(c.contains("KES_METH_VARARGS | KES_METH_KEYWORDS"), "{c}");
}

#[test]
fn keyword_directive_forces_the_generic_convention() {
    let fx = Fixture::new();
    let overrides = DirectiveOverrides {
        always_allow_keywords: Some(true),
        ..DirectiveOverrides::default()
    };
    let (c, _) = wrapper(&fx, def(&fx, positional(&fx, &["a"])).with_directives(overrides));
    assert!(c.contains("KES_METH_VARARGS | KES_METH_KEYWORDS"), "{c}");

    let mut fx = Fixture::new();
    fx.options.generic_calling_convention_only = true;
    let (c, _) = wrapper(&fx, def(&fx, Vec::new()));
    assert!(c.contains("KES_METH_VARARGS | KES_METH_KEYWORDS"), "{c}");
}

#[test]
fn single_argument_is_passed_straight_through() {
    let fx = Fixture::new();
    let (_, program) = wrapper(&fx, def(&fx, positional(&fx, &["a"])));
    let outcome = program.run(&mut State::new());
    assert!(outcome.executed("__kes_pf_m_f(__kes_self, __kes_arg0)"));
}

#[test]
fn too_few_positional_arguments_never_reach_the_body() {
    let fx = Fixture::new();
    let (_, program) = wrapper(&fx, def(&fx, positional(&fx, &["a", "b"])));
    let outcome = program.run(&mut positional_call(1));
    assert!(outcome.executed("Kes_RaiseArgtupleInvalid(\"f\", 1, 2, 2, __kes_npos)"));
    assert!(!outcome.executed(BODY_CALL));
    assert_eq!(outcome.value, Some(0));
}

#[test]
fn too_many_positional_arguments_are_rejected() {
    let fx = Fixture::new();
    let (_, program) = wrapper(&fx, def(&fx, positional(&fx, &["a", "b"])));
    let outcome = program.run(&mut positional_call(3));
    assert!(outcome.executed("Kes_RaiseArgtupleInvalid("));
    assert!(!outcome.executed(BODY_CALL));
}

#[test]
fn exact_positional_call_takes_the_fast_path() {
    let fx = Fixture::new();
    let (_, program) = wrapper(&fx, def(&fx, positional(&fx, &["a", "b"])));
    let outcome = program.run(&mut positional_call(2));
    assert_eq!(outcome.count("Kes_TUPLE_GET_ITEM("), 2);
    assert!(!outcome.executed("Kes_DICT_SIZE("));
    assert!(!outcome.executed("Kes_RaiseArgtupleInvalid("));
    assert!(outcome.executed("__kes_pf_m_f(__kes_self, __kes_values[0], __kes_values[1])"));
}

#[test]
fn defaults_fill_missing_arguments() {
    let fx = Fixture::new();
    let params = vec![
        Param::positional(fx.name("a"), None, fx.span()),
        Param::positional(fx.name("b"), Some(fx.int(7)), fx.span()),
    ];
    let (_, program) = wrapper(&fx, def(&fx, params));
    let outcome = program.run(&mut positional_call(1));
    assert!(outcome.executed("__kes_values[1] = "));
    assert!(!outcome.executed("Kes_RaiseArgtupleInvalid("));
    assert!(outcome.executed(BODY_CALL));
}

#[test]
fn keywords_bind_without_the_slow_parse() {
    let fx = Fixture::new();
    let (_, program) = wrapper(&fx, def(&fx, positional(&fx, &["a", "b"])));
    let mut state = State::new()
        .with_var("__kes_kwds", 1)
        .with_call("Kes_TUPLE_SIZE", 0)
        .with_call("Kes_DICT_SIZE", 2)
        .with_call("Kes_DictGetItem", 9);
    let outcome = program.run(&mut state);
    assert_eq!(outcome.count("Kes_DictGetItem("), 2);
    assert!(!outcome.executed("Kes_ParseOptionalKeywords("));
    assert_eq!(state.var("__kes_kw_left"), Some(0));
    assert!(outcome.executed(BODY_CALL));
}

#[test]
fn unknown_keywords_go_through_the_slow_parse() {
    let fx = Fixture::new();
    let (_, program) = wrapper(&fx, def(&fx, positional(&fx, &["a", "b"])));
    let mut state = State::new()
        .with_var("__kes_kwds", 1)
        .with_call("Kes_TUPLE_SIZE", 2)
        .with_call("Kes_DICT_SIZE", 1);
    let outcome = program.run(&mut state);
    assert!(!outcome.executed("Kes_DictGetItem("));
    assert!(outcome.executed("Kes_ParseOptionalKeywords("));
}

#[test]
fn required_keyword_only_argument_must_be_passed() {
    let fx = Fixture::new();
    let params = vec![Param::keyword_only(fx.name("k"), None, fx.span())];
    let (_, program) = wrapper(&fx, def(&fx, params));
    let outcome = program.run(&mut positional_call(0));
    assert!(outcome.executed("Kes_RaiseKeywordRequired(\"f\""));
    assert!(!outcome.executed(BODY_CALL));
}

#[test]
fn star_args_collect_the_extra_positionals() {
    let fx = Fixture::new();
    let params = vec![
        Param::positional(fx.name("a"), None, fx.span()),
        Param::star_args(fx.name("rest"), fx.span()),
    ];
    let (_, program) = wrapper(&fx, def(&fx, params));
    let outcome = program.run(&mut positional_call(3));
    assert!(outcome.executed("Kes_TupleGetSlice(__kes_args, 1, __kes_npos)"));
    assert!(!outcome.executed("Kes_RaiseArgtupleInvalid("));
    assert!(outcome.executed("__kes_pf_m_f(__kes_self, __kes_values[0], __kes_star_args)"));
    assert!(outcome.executed("Kes_XDECREF(__kes_star_args)"));
}
