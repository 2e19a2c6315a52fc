//! Conditionals and loops.

use kes_diagnostic::{Diagnostic, ErrorCode};
use kes_ir::{Relation, Span, Type};

use super::{
    analyse_block, analyse_loop_body, block_contains_yield, declare_block, ends_in_terminator,
    generate_block, StatNode, Stmt,
};
use crate::emit::Code;
use crate::env::Env;
use crate::expr::{Expr, ExprKind};

#[derive(Clone, Debug)]
pub struct IfClause {
    pub cond: Expr,
    pub body: Vec<Stmt>,
}

impl IfClause {
    pub fn new(cond: Expr, body: Vec<Stmt>) -> Self {
        IfClause { cond, body }
    }
}

/// `if` / `elif` / `else`.
#[derive(Clone, Debug)]
pub struct IfStat {
    pub clauses: Vec<IfClause>,
    pub else_body: Option<Vec<Stmt>>,
    pub span: Span,
}

impl IfStat {
    pub fn new(clauses: Vec<IfClause>, else_body: Option<Vec<Stmt>>, span: Span) -> Self {
        IfStat {
            clauses,
            else_body,
            span,
        }
    }
}

impl StatNode for IfStat {
    fn analyse_declarations(&mut self, env: &mut Env<'_>) {
        for clause in &mut self.clauses {
            declare_block(&mut clause.body, env);
        }
        if let Some(body) = &mut self.else_body {
            declare_block(body, env);
        }
    }

    fn analyse_types(self, env: &mut Env<'_>) -> Stmt {
        let clauses = self
            .clauses
            .into_iter()
            .map(|clause| {
                let cond = analyse_condition(clause.cond, env);
                let body = analyse_block(clause.body, env);
                IfClause { cond, body }
            })
            .collect();
        let else_body = self.else_body.map(|body| analyse_block(body, env));
        Stmt::If(IfStat {
            clauses,
            else_body,
            span: self.span,
        })
    }

    fn generate_execution_code(&mut self, code: &mut Code<'_>) {
        let end = code.new_label("if_end");
        let last = self.clauses.len().saturating_sub(1);
        let has_else = self.else_body.is_some();
        for (i, clause) in self.clauses.iter_mut().enumerate() {
            code.mark_position(clause.cond.span);
            let cond = evaluate_condition(&mut clause.cond, code);
            code.putln(&format!("if ({cond}) {{"));
            generate_block(&mut clause.body, code);
            if (i != last || has_else) && !ends_in_terminator(&clause.body) {
                code.put_goto(end);
            }
            code.putln("}");
        }
        if let Some(body) = &mut self.else_body {
            code.putln("/*else*/ {");
            generate_block(body, code);
            code.putln("}");
        }
        code.put_label(end);
    }

    fn contains_yield(&self) -> bool {
        self.clauses
            .iter()
            .any(|c| c.cond.contains_yield() || block_contains_yield(&c.body))
            || self.else_body.as_deref().is_some_and(block_contains_yield)
    }

    fn span(&self) -> Span {
        self.span
    }
}

fn analyse_condition(cond: Expr, env: &mut Env<'_>) -> Expr {
    let cond = cond.analyse_types(env).coerce_to_boolean(env);
    env.check_nogil(&cond);
    cond
}

/// Evaluate a condition and release its temporaries; returns the C test.
fn evaluate_condition(cond: &mut Expr, code: &mut Code<'_>) -> String {
    cond.generate_evaluation_code(code);
    let result = cond.result().to_owned();
    cond.generate_disposal_code(code);
    result
}

#[derive(Clone, Debug)]
pub struct WhileStat {
    pub cond: Expr,
    pub body: Vec<Stmt>,
    pub else_body: Option<Vec<Stmt>>,
    pub span: Span,
}

impl WhileStat {
    pub fn new(cond: Expr, body: Vec<Stmt>, else_body: Option<Vec<Stmt>>, span: Span) -> Self {
        WhileStat {
            cond,
            body,
            else_body,
            span,
        }
    }
}

impl StatNode for WhileStat {
    fn analyse_declarations(&mut self, env: &mut Env<'_>) {
        declare_block(&mut self.body, env);
        if let Some(body) = &mut self.else_body {
            declare_block(body, env);
        }
    }

    fn analyse_types(self, env: &mut Env<'_>) -> Stmt {
        let cond = analyse_condition(self.cond, env);
        let body = analyse_loop_body(self.body, env);
        let else_body = self.else_body.map(|body| analyse_block(body, env));
        Stmt::While(WhileStat {
            cond,
            body,
            else_body,
            span: self.span,
        })
    }

    fn generate_execution_code(&mut self, code: &mut Code<'_>) {
        let old = code.func.new_loop_labels();
        code.putln("while (1) {");
        let cond = evaluate_condition(&mut self.cond, code);
        code.putln(&format!("if (!{cond}) break;"));
        generate_block(&mut self.body, code);
        let loop_labels = code.labels();
        if let Some(label) = loop_labels.continue_label {
            code.put_label(label);
        }
        code.putln("}");
        code.set_labels(old);
        if let Some(body) = &mut self.else_body {
            code.putln("/*else*/ {");
            generate_block(body, code);
            code.putln("}");
        }
        if let Some(label) = loop_labels.break_label {
            code.put_label(label);
        }
    }

    fn contains_yield(&self) -> bool {
        self.cond.contains_yield()
            || block_contains_yield(&self.body)
            || self.else_body.as_deref().is_some_and(block_contains_yield)
    }

    fn span(&self) -> Span {
        self.span
    }
}

/// `for target in iterable`
#[derive(Clone, Debug)]
pub struct ForInStat {
    pub target: Expr,
    pub iterable: Expr,
    pub body: Vec<Stmt>,
    pub else_body: Option<Vec<Stmt>>,
    pub span: Span,
    /// The fetched item, converted to the target's type.
    item: Option<Expr>,
}

impl ForInStat {
    pub fn new(
        target: Expr,
        iterable: Expr,
        body: Vec<Stmt>,
        else_body: Option<Vec<Stmt>>,
        span: Span,
    ) -> Self {
        ForInStat {
            target,
            iterable,
            body,
            else_body,
            span,
            item: None,
        }
    }
}

impl StatNode for ForInStat {
    fn analyse_declarations(&mut self, env: &mut Env<'_>) {
        self.target.analyse_target_declaration(env);
        declare_block(&mut self.body, env);
        if let Some(body) = &mut self.else_body {
            declare_block(body, env);
        }
    }

    fn analyse_types(self, env: &mut Env<'_>) -> Stmt {
        env.require_lock(self.span, "iterating over an object");
        let iterable = self.iterable.analyse_types(env).coerce_to_object(env);
        let target = self.target.analyse_target_types(env);
        let item = Expr::clone_placeholder(Type::Object, target.span).coerce_to(target.ty, env);
        let body = analyse_loop_body(self.body, env);
        let else_body = self.else_body.map(|body| analyse_block(body, env));
        Stmt::ForIn(ForInStat {
            target,
            iterable,
            body,
            else_body,
            span: self.span,
            item: Some(item),
        })
    }

    fn generate_execution_code(&mut self, code: &mut Code<'_>) {
        let span = self.span;
        self.iterable.generate_evaluation_code(code);
        let iter = code.allocate_temp(Type::Object, true);
        code.putln(&format!("{iter} = Kes_GetIter({});", self.iterable.result()));
        code.put_error_if_null(&iter, span);
        self.iterable.generate_disposal_code(code);

        let old = code.func.new_loop_labels();
        code.putln("for (;;) {");
        let item = code.allocate_temp(Type::Object, true);
        code.putln(&format!("{item} = Kes_IterNext({iter});"));
        code.putln(&format!("if (unlikely(!{item})) {{"));
        code.put_error_if("Kes_IterError()", span);
        code.putln("break;");
        code.putln("}");
        if let Some(conv) = &mut self.item {
            conv.set_clone_source(&item);
            conv.generate_evaluation_code(code);
            self.target.generate_assignment_code(conv, code);
        }
        code.put_decref_clear(&item, Type::Object);
        code.release_temp(&item);
        generate_block(&mut self.body, code);
        let loop_labels = code.labels();
        if let Some(label) = loop_labels.continue_label {
            code.put_label(label);
        }
        code.putln("}");
        code.set_labels(old);

        code.put_decref_clear(&iter, Type::Object);
        if let Some(body) = &mut self.else_body {
            code.putln("/*else*/ {");
            generate_block(body, code);
            code.putln("}");
        }
        if let Some(label) = loop_labels.break_label.filter(|&l| code.label_used(l)) {
            let end = code.new_label("for_end");
            code.put_goto(end);
            code.put_label(label);
            code.put_decref_clear(&iter, Type::Object);
            code.put_label(end);
        }
        code.release_temp(&iter);
    }

    fn contains_yield(&self) -> bool {
        self.iterable.contains_yield()
            || block_contains_yield(&self.body)
            || self.else_body.as_deref().is_some_and(block_contains_yield)
    }

    fn span(&self) -> Span {
        self.span
    }
}

/// `for i from a <= i < b [by s]`
#[derive(Clone, Debug)]
pub struct ForFromStat {
    pub target: Expr,
    pub bound1: Expr,
    pub rel1: Relation,
    pub rel2: Relation,
    pub bound2: Expr,
    pub step: Option<Expr>,
    pub body: Vec<Stmt>,
    pub else_body: Option<Vec<Stmt>>,
    pub span: Span,
    /// Type of the C induction variable.
    loop_type: Type,
    /// Conversion of the induction variable for an object target; `None`
    /// when the target itself is the induction variable.
    object_value: Option<Expr>,
}

impl ForFromStat {
    #[allow(clippy::too_many_arguments, reason = "mirrors the loop header")]
    pub fn new(
        target: Expr,
        bound1: Expr,
        rel1: Relation,
        rel2: Relation,
        bound2: Expr,
        step: Option<Expr>,
        body: Vec<Stmt>,
        else_body: Option<Vec<Stmt>>,
        span: Span,
    ) -> Self {
        ForFromStat {
            target,
            bound1,
            rel1,
            rel2,
            bound2,
            step,
            body,
            else_body,
            span,
            loop_type: Type::LONG,
            object_value: None,
        }
    }

    /// C text of `for (init; guard; step)` for the induction variable `var`.
    fn loop_header(&self, var: &str) -> String {
        let (offset, direction) = self.rel1.start_offset_and_direction();
        let start = self.bound1.result();
        let init = match offset {
            0 => start.to_owned(),
            1 => format!("{start} + 1"),
            _ => format!("{start} - 1"),
        };
        let guard = format!("{var} {} {}", self.rel2.as_symbol(), self.bound2.result());
        let increment = match &self.step {
            Some(step) if !matches!(step.kind, ExprKind::Int(1)) => {
                format!("{var} {} {}", direction.compound(), step.result())
            }
            _ => format!("{var}{}", direction.increment()),
        };
        format!("for ({var} = {init}; {guard}; {increment}) {{")
    }
}

impl StatNode for ForFromStat {
    fn analyse_declarations(&mut self, env: &mut Env<'_>) {
        self.target.analyse_target_declaration(env);
        declare_block(&mut self.body, env);
        if let Some(body) = &mut self.else_body {
            declare_block(body, env);
        }
    }

    fn analyse_types(mut self, env: &mut Env<'_>) -> Stmt {
        let span = self.span;
        let target = self.target.analyse_target_types(env);
        if self.rel1.direction() != self.rel2.direction() {
            env.error(
                Diagnostic::error(ErrorCode::E2004)
                    .with_message(format!(
                        "relations '{}' and '{}' in for-from loop point in different directions",
                        self.rel1.as_symbol(),
                        self.rel2.as_symbol()
                    ))
                    .with_label(span, "inconsistent loop direction"),
            );
        }
        let (loop_type, object_value) = if target.ty.is_int() {
            (target.ty, None)
        } else if target.ty.is_object_reference() {
            env.require_lock(span, "object loop variable");
            let conv = Expr::clone_placeholder(Type::LONG, target.span).coerce_to_object(env);
            (Type::LONG, Some(conv))
        } else {
            if !target.ty.is_error() {
                env.error_at(
                    ErrorCode::E2005,
                    target.span,
                    format!("for-from loop variable must be an integer or object, not '{}'", target.ty),
                );
            }
            (Type::LONG, None)
        };
        self.bound1 = self.bound1.analyse_types(env).coerce_to(loop_type, env);
        self.bound2 = self
            .bound2
            .analyse_types(env)
            .coerce_to(loop_type, env)
            .coerce_to_simple(env);
        self.step = self
            .step
            .map(|s| s.analyse_types(env).coerce_to(loop_type, env).coerce_to_simple(env));
        env.check_nogil(&self.bound1);
        env.check_nogil(&self.bound2);
        if let Some(step) = &self.step {
            env.check_nogil(step);
        }
        self.body = analyse_loop_body(self.body, env);
        self.else_body = self.else_body.map(|body| analyse_block(body, env));
        self.target = target;
        self.loop_type = loop_type;
        self.object_value = object_value;
        Stmt::ForFrom(self)
    }

    fn generate_execution_code(&mut self, code: &mut Code<'_>) {
        self.bound1.generate_evaluation_code(code);
        self.bound2.generate_evaluation_code(code);
        if let Some(step) = &mut self.step {
            step.generate_evaluation_code(code);
        }
        let (var, temp) = match (&self.object_value, self.target.entry()) {
            (None, Some(id)) => (code.entry_access(id), None),
            _ => {
                let t = code.allocate_temp(self.loop_type, false);
                (t.clone(), Some(t))
            }
        };

        let old = code.func.new_loop_labels();
        let header = self.loop_header(&var);
        code.putln(&header);
        if let Some(conv) = &mut self.object_value {
            conv.set_clone_source(&var);
            conv.generate_evaluation_code(code);
            self.target.generate_assignment_code(conv, code);
        }
        generate_block(&mut self.body, code);
        let loop_labels = code.labels();
        if let Some(label) = loop_labels.continue_label {
            code.put_label(label);
        }
        code.putln("}");
        code.set_labels(old);
        if let Some(body) = &mut self.else_body {
            code.putln("/*else*/ {");
            generate_block(body, code);
            code.putln("}");
        }
        if let Some(label) = loop_labels.break_label {
            code.put_label(label);
        }

        self.bound1.generate_disposal_code(code);
        self.bound2.generate_disposal_code(code);
        if let Some(step) = &mut self.step {
            step.generate_disposal_code(code);
        }
        if let Some(t) = temp {
            code.release_temp(&t);
        }
    }

    fn contains_yield(&self) -> bool {
        block_contains_yield(&self.body) || self.else_body.as_deref().is_some_and(block_contains_yield)
    }

    fn span(&self) -> Span {
        self.span
    }
}
