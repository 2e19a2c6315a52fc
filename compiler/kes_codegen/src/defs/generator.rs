//! Generator functions as resumable state machines.
//!
//! Calling a generator function runs a constructor that builds the closure
//! cell, copies the arguments into it and wraps it in a generator object.
//! The body function `__kes_gb_*` is entered on every resumption: a switch
//! on the saved resume number jumps to the point after the last `yield`.
//! Temporaries live across a `yield` are saved into cell fields before
//! returning and restored after resuming.

use kes_ir::{Span, Type};

use super::{put_argument_setup, put_declarations, put_dynamic_epilogue, put_trace_summary, CellLayout};
use crate::emit::{clear_value, Code, FunctionState};
use crate::expr::Expr;
use crate::nodes::{ends_in_terminator, generate_block, Stmt};
use crate::symtab::{EntryId, ScopeId};

/// Emit the constructor `cname` and the resumable body of a generator.
pub(crate) fn generate_generator(
    code: &mut Code<'_>,
    scope: ScopeId,
    args: &[EntryId],
    cname: &str,
    qualified: &str,
    body: &mut [Stmt],
) {
    let layout = CellLayout::of(code.symtab, scope);
    let prefix = code.symtab.scope(scope).cname_prefix.clone();
    let body_cname = code.module.unique_cname(&format!("__kes_gb_{prefix}"));
    let span = body.first().map_or(Span::DUMMY, Stmt::span);

    let saved_temps = generate_resumable_body(code, &layout, &body_cname, qualified, body, span);
    let text = layout.definition(code, &saved_temps);
    code.module.add_scope_struct(text);

    generate_constructor(code, &layout, args, cname, &body_cname, qualified, span);
}

fn generate_constructor(
    code: &mut Code<'_>,
    layout: &CellLayout,
    args: &[EntryId],
    cname: &str,
    body_cname: &str,
    qualified: &str,
    span: Span,
) {
    let previous = code.enter_function(FunctionState::new(Some(layout.scope), qualified));
    let ip = code.insertion_point();
    if let Some(outer) = &layout.outer_struct {
        code.putln(&format!("__kes_outer_scope = (struct {outer} *)__kes_self;"));
    }
    layout.put_allocation(code, span);
    put_argument_setup(code, args);
    let name = code.module.string_constant(qualified);
    code.putln(&format!(
        "__kes_r = Kes_Generator_New((KesGeneratorBody){body_cname}, (KesObject *)__kes_cur_scope, {name});"
    ));
    code.put_error_if_null("__kes_r", span);
    put_dynamic_epilogue(code, layout, true);
    put_declarations(code, ip, layout, Some(Type::Object));
    put_trace_summary(code, cname);
    let mut state = code.leave_function(previous);

    let symtab = code.symtab;
    let mut params = vec!["KesObject *__kes_self".to_owned()];
    params.extend(args.iter().map(|&id| {
        let e = symtab.entry(id);
        e.ty.declaration_code(&e.cname)
    }));
    let header = format!("static KesObject *{cname}({})", params.join(", "));
    code.module.add_prototype(format!("{header};"));
    code.module
        .add_function(format!("{header} {{\n{}}}\n", state.take_output()));
}

/// Emit `__kes_gb_*`; returns the temporaries saved across suspension points.
fn generate_resumable_body(
    code: &mut Code<'_>,
    layout: &CellLayout,
    cname: &str,
    qualified: &str,
    body: &mut [Stmt],
    span: Span,
) -> Vec<(String, Type)> {
    let previous = code.enter_function(FunctionState::new(Some(layout.scope), qualified));
    let decls = code.insertion_point();
    let dispatch = code.insertion_point();

    let first_run = code.new_label("first_run");
    code.func.use_label(first_run);
    code.put_label(first_run);
    code.put_error_if("!__kes_sent_value", span);
    generate_block(body, code);

    let labels = code.labels();
    if !ends_in_terminator(body) {
        code.put_goto(labels.return_label);
    }
    if code.label_used(labels.error_label) {
        code.put_label(labels.error_label);
        for (temp, ty) in code.func.all_managed_temps() {
            code.put_xdecref(&temp, ty);
        }
        code.put_add_traceback();
    }
    code.put_label(labels.return_label);
    code.putln("Kes_XDECREF(__kes_r); __kes_r = 0;");
    code.putln("__kes_generator->resume_label = -1;");
    code.putln("Kes_Generator_Clear((KesObject *)__kes_generator);");
    code.putln("return __kes_r;");

    code.put_at(dispatch, "switch (__kes_generator->resume_label) {");
    let first = code.label_name(first_run);
    code.put_at(dispatch, &format!("case 0: goto {first};"));
    for (i, label) in code.func.yield_labels.clone().into_iter().enumerate() {
        let target = code.label_name(label);
        code.put_at(dispatch, &format!("case {}: goto {target};", i + 1));
    }
    code.put_at(dispatch, "default: return NULL;");
    code.put_at(dispatch, "}");

    let cell = &layout.cell_struct;
    code.put_at(
        decls,
        &format!("struct {cell} *__kes_cur_scope = (struct {cell} *)__kes_generator->closure;"),
    );
    if let Some(outer) = &layout.outer_struct {
        code.put_at(
            decls,
            &format!("struct {outer} *__kes_outer_scope = __kes_cur_scope->__kes_outer_scope;"),
        );
    }
    code.put_at(decls, "KesObject *__kes_r = 0;");
    for line in code.func.temp_declarations() {
        code.put_at(decls, &line);
    }
    for decl in code.func.extra_decls.clone() {
        code.put_at(decls, &format!("{decl};"));
    }
    tracing::debug!(
        function = cname,
        resume_points = code.func.yield_labels.len(),
        saved_temps = code.func.saved_temps.len(),
        "emitted generator body"
    );
    let mut state = code.leave_function(previous);

    let header = format!(
        "static KesObject *{cname}(KesGenerator *__kes_generator, KesObject *__kes_sent_value)"
    );
    code.module.add_prototype(format!("{header};"));
    code.module
        .add_function(format!("{header} {{\n{}}}\n", state.take_output()));
    std::mem::take(&mut state.saved_temps)
}

/// Emit a suspension point; returns a temporary holding the value sent in on
/// resumption.
pub fn generate_yield(value: Option<&mut Expr>, span: Span, code: &mut Code<'_>) -> String {
    match value {
        Some(value) => {
            value.generate_evaluation_code(code);
            if value.is_temp() {
                code.putln(&format!("__kes_r = {};", value.result()));
                value.generate_post_assignment_code(code);
            } else {
                code.put_incref(value.result(), Type::Object);
                code.putln(&format!("__kes_r = {};", value.result()));
                value.generate_disposal_code(code);
            }
        }
        None => code.putln("__kes_r = Kes_None; Kes_INCREF(Kes_None);"),
    }

    let live = code.func.temps_in_use();
    for (temp, ty) in &live {
        code.func.note_saved_temp(temp, *ty);
        code.putln(&format!("__kes_cur_scope->{temp} = {temp};"));
    }
    let (n, resume) = code.func.new_yield_label();
    code.putln(&format!("__kes_generator->resume_label = {n};"));
    code.putln("return __kes_r;");

    code.func.use_label(resume);
    code.put_label(resume);
    for (temp, ty) in &live {
        code.putln(&format!("{temp} = __kes_cur_scope->{temp};"));
        if ty.needs_refcounting() {
            code.putln(&format!("__kes_cur_scope->{temp} = {};", clear_value(*ty)));
        }
    }
    code.put_error_if("!__kes_sent_value", span);
    let sent = code.allocate_temp(Type::Object, true);
    code.putln(&format!("{sent} = __kes_sent_value; Kes_INCREF({sent});"));
    sent
}
