//! `try`/`except`, `try`/`finally`, lock brackets and `with`.
//!
//! Exception state never exists as a value: it lives in triples of
//! temporaries that are saved, fetched and restored around the regions
//! below. Abrupt exits out of a protected body are redirected to fresh
//! labels with [`FunctionState::all_new_labels`](crate::emit::FunctionState)
//! and re-issued against the outer labels once the cleanup has run.

use kes_diagnostic::ErrorCode;
use kes_ir::{Span, Type};

use super::{
    analyse_block, block_contains_yield, declare_block, ends_in_terminator, generate_block,
    StatNode, Stmt,
};
use crate::emit::{Code, Label, LabelSet};
use crate::env::Env;
use crate::expr::Expr;

fn allocate_triple(code: &mut Code<'_>, manage_ref: bool) -> [String; 3] {
    std::array::from_fn(|_| code.allocate_temp(Type::Object, manage_ref))
}

fn release_triple(code: &mut Code<'_>, triple: &[String; 3]) {
    for t in triple {
        code.release_temp(t);
    }
}

fn put_xdecref_triple(code: &mut Code<'_>, triple: &[String; 3]) {
    for t in triple {
        code.put_xdecref_clear(t, Type::Object);
    }
}

/// Hand the saved exception state back to the runtime and zero the slots.
fn put_exception_reset(code: &mut Code<'_>, saved: &[String; 3]) {
    code.putln(&format!(
        "Kes_ExceptionReset({}, {}, {}); {} = 0; {} = 0; {} = 0;",
        saved[0], saved[1], saved[2], saved[0], saved[1], saved[2]
    ));
}

/// Pairs of (diverted, original) labels for every exit that has a target.
fn exit_pairs(diverted: LabelSet, original: LabelSet) -> [(Option<Label>, Option<Label>); 4] {
    [
        (diverted.break_label, original.break_label),
        (diverted.continue_label, original.continue_label),
        (Some(diverted.return_label), Some(original.return_label)),
        (Some(diverted.error_label), Some(original.error_label)),
    ]
}

/// One `except [pattern] [as target]:` clause.
#[derive(Clone, Debug)]
pub struct ExceptClause {
    /// `None` for a catch-all clause.
    pub pattern: Option<Expr>,
    pub target: Option<Expr>,
    pub body: Vec<Stmt>,
    pub span: Span,
    /// The caught value converted to the target's type.
    bind: Option<Expr>,
}

impl ExceptClause {
    pub fn new(pattern: Option<Expr>, target: Option<Expr>, body: Vec<Stmt>, span: Span) -> Self {
        ExceptClause {
            pattern,
            target,
            body,
            span,
            bind: None,
        }
    }

    pub fn is_catch_all(&self) -> bool {
        self.pattern.is_none()
    }

    fn analyse_declarations(&mut self, env: &mut Env<'_>) {
        if let Some(target) = &self.target {
            target.analyse_target_declaration(env);
        }
        declare_block(&mut self.body, env);
    }

    fn analyse_types(self, env: &mut Env<'_>) -> ExceptClause {
        let pattern = self
            .pattern
            .map(|p| p.analyse_types(env).coerce_to_object(env));
        let (target, bind) = match self.target {
            Some(target) => {
                let target = target.analyse_target_types(env);
                let bind = Expr::clone_placeholder(Type::Object, target.span).coerce_to(target.ty, env);
                (Some(target), Some(bind))
            }
            None => (None, None),
        };
        env.flow.except_depth += 1;
        let body = analyse_block(self.body, env);
        env.flow.except_depth -= 1;
        ExceptClause {
            pattern,
            target,
            body,
            span: self.span,
            bind,
        }
    }

    /// Emit the match test and handler; a handled exception jumps to `end`.
    fn generate_handling_code(&mut self, code: &mut Code<'_>, end: Label) {
        code.mark_position(self.span);
        match &mut self.pattern {
            Some(pattern) => {
                pattern.generate_evaluation_code(code);
                let matched = code.allocate_temp(Type::Bint, false);
                code.putln(&format!(
                    "{matched} = Kes_ErrExceptionMatches({});",
                    pattern.result()
                ));
                pattern.generate_disposal_code(code);
                code.putln(&format!("if ({matched}) {{"));
                code.release_temp(&matched);
            }
            None => code.putln("/*except:*/ {"),
        }
        code.put_add_traceback();
        let vars = allocate_triple(code, true);
        code.put_error_if(
            &format!("Kes_GetException(&{}, &{}, &{}) < 0", vars[0], vars[1], vars[2]),
            self.span,
        );
        if let (Some(target), Some(bind)) = (&mut self.target, &mut self.bind) {
            bind.set_clone_source(&vars[1]);
            bind.generate_evaluation_code(code);
            target.generate_assignment_code(bind, code);
        }

        let old = code.labels();
        let clause_labels = LabelSet {
            break_label: old.break_label.map(|_| code.new_label("except_break")),
            continue_label: old.continue_label.map(|_| code.new_label("except_continue")),
            return_label: code.new_label("except_return"),
            error_label: code.new_label("except_error"),
        };
        code.set_labels(clause_labels);
        code.func.exc_vars.push(vars.clone());
        generate_block(&mut self.body, code);
        code.func.exc_vars.pop();
        code.set_labels(old);

        if !ends_in_terminator(&self.body) {
            put_xdecref_triple(code, &vars);
            code.put_goto(end);
        }
        for (new, orig) in exit_pairs(clause_labels, old) {
            if let (Some(new), Some(orig)) = (new, orig) {
                if code.label_used(new) {
                    code.put_label(new);
                    put_xdecref_triple(code, &vars);
                    code.put_goto(orig);
                }
            }
        }
        release_triple(code, &vars);
        code.putln("}");
    }
}

/// `try: ... except ...: ... else: ...`
#[derive(Clone, Debug)]
pub struct TryExceptStat {
    pub body: Vec<Stmt>,
    pub clauses: Vec<ExceptClause>,
    pub else_body: Option<Vec<Stmt>>,
    pub span: Span,
}

impl TryExceptStat {
    pub fn new(
        body: Vec<Stmt>,
        clauses: Vec<ExceptClause>,
        else_body: Option<Vec<Stmt>>,
        span: Span,
    ) -> Self {
        TryExceptStat {
            body,
            clauses,
            else_body,
            span,
        }
    }
}

impl StatNode for TryExceptStat {
    fn analyse_declarations(&mut self, env: &mut Env<'_>) {
        declare_block(&mut self.body, env);
        let last = self.clauses.len().saturating_sub(1);
        for (i, clause) in self.clauses.iter_mut().enumerate() {
            if clause.is_catch_all() && i != last {
                env.error_at(
                    ErrorCode::E1003,
                    clause.span,
                    "default 'except:' must be last",
                );
            }
            clause.analyse_declarations(env);
        }
        if let Some(body) = &mut self.else_body {
            declare_block(body, env);
        }
    }

    fn analyse_types(self, env: &mut Env<'_>) -> Stmt {
        env.require_lock(self.span, "try/except");
        let body = analyse_block(self.body, env);
        let clauses = self
            .clauses
            .into_iter()
            .map(|c| c.analyse_types(env))
            .collect();
        let else_body = self.else_body.map(|b| analyse_block(b, env));
        Stmt::TryExcept(TryExceptStat {
            body,
            clauses,
            else_body,
            span: self.span,
        })
    }

    fn generate_execution_code(&mut self, code: &mut Code<'_>) {
        let old = code.labels();
        let try_labels = LabelSet {
            break_label: old.break_label.map(|_| code.new_label("try_break")),
            continue_label: old.continue_label.map(|_| code.new_label("try_continue")),
            return_label: code.new_label("try_return"),
            error_label: code.new_label("try_error"),
        };
        let except_labels = LabelSet {
            return_label: code.new_label("except_return"),
            error_label: code.new_label("except_error"),
            ..try_labels
        };
        let except_end = code.new_label("exception_handled");
        let try_end = code.new_label("try_end");

        let saved = allocate_triple(code, false);
        code.putln("{");
        code.putln(&format!(
            "Kes_ExceptionSave(&{}, &{}, &{});",
            saved[0], saved[1], saved[2]
        ));
        code.set_labels(try_labels);
        code.putln("/*try:*/ {");
        generate_block(&mut self.body, code);
        code.putln("}");
        let temps_to_clean_up = code.func.all_free_managed_temps();

        if !ends_in_terminator(&self.body) {
            put_xdecref_triple(code, &saved);
            code.set_labels(old);
            if let Some(body) = &mut self.else_body {
                code.putln("/*else:*/ {");
                generate_block(body, code);
                code.putln("}");
            }
            code.put_goto(try_end);
        }

        if code.label_used(try_labels.error_label) {
            code.set_labels(except_labels);
            code.put_label(try_labels.error_label);
            for (cname, ty) in &temps_to_clean_up {
                code.put_xdecref_clear(cname, *ty);
            }
            for clause in &mut self.clauses {
                clause.generate_handling_code(code, except_end);
            }
            if !self.clauses.iter().any(ExceptClause::is_catch_all) {
                code.put_goto(except_labels.error_label);
            }
        }
        code.set_labels(old);

        let intercepts = [
            (try_labels.break_label, old.break_label),
            (try_labels.continue_label, old.continue_label),
            (Some(try_labels.return_label), Some(old.return_label)),
            (Some(except_labels.return_label), Some(old.return_label)),
            (Some(except_labels.error_label), Some(old.error_label)),
        ];
        for (new, orig) in intercepts {
            if let (Some(new), Some(orig)) = (new, orig) {
                if code.label_used(new) {
                    code.put_label(new);
                    put_exception_reset(code, &saved);
                    code.put_goto(orig);
                }
            }
        }
        if code.label_used(except_end) {
            code.put_label(except_end);
            put_exception_reset(code, &saved);
        }
        code.put_label(try_end);
        code.putln("}");
        release_triple(code, &saved);
    }

    fn contains_yield(&self) -> bool {
        block_contains_yield(&self.body)
            || self.clauses.iter().any(|c| block_contains_yield(&c.body))
            || self.else_body.as_deref().is_some_and(block_contains_yield)
    }

    fn span(&self) -> Span {
        self.span
    }
}

/// Reason codes written before jumping to a shared `finally` body.
const REASON_BREAK: u8 = 1;
const REASON_CONTINUE: u8 = 2;
const REASON_RETURN: u8 = 3;
const REASON_ERROR: u8 = 4;

/// `try: ... finally: ...`
#[derive(Clone, Debug)]
pub struct TryFinallyStat {
    pub body: Vec<Stmt>,
    pub finally: Vec<Stmt>,
    /// Route the body's errors through the finally body.
    pub handle_error_case: bool,
    /// Fetch a pending error before running the finally body and restore it
    /// afterwards. Off for lock brackets, whose finally body must not call
    /// into the runtime.
    pub preserve_exception: bool,
    pub span: Span,
}

impl TryFinallyStat {
    pub fn new(body: Vec<Stmt>, finally: Vec<Stmt>, span: Span) -> Self {
        TryFinallyStat {
            body,
            finally,
            handle_error_case: true,
            preserve_exception: true,
            span,
        }
    }
}

impl StatNode for TryFinallyStat {
    fn analyse_declarations(&mut self, env: &mut Env<'_>) {
        declare_block(&mut self.body, env);
        declare_block(&mut self.finally, env);
    }

    fn analyse_types(self, env: &mut Env<'_>) -> Stmt {
        env.flow.try_finally_depth += 1;
        let body = analyse_block(self.body, env);
        let finally = analyse_block(self.finally, env);
        env.flow.try_finally_depth -= 1;
        Stmt::TryFinally(TryFinallyStat {
            body,
            finally,
            ..self
        })
    }

    fn generate_execution_code(&mut self, code: &mut Code<'_>) {
        let old = code.func.all_new_labels();
        let mut diverted = code.labels();
        if !self.handle_error_case {
            diverted.error_label = old.error_label;
            code.set_labels(diverted);
        }
        code.putln("/*try:*/ {");
        generate_block(&mut self.body, code);
        code.putln("}");
        let temps_to_clean_up = code.func.all_free_managed_temps();
        code.set_labels(old);

        let mut exits: Vec<(u8, Label, Label)> = Vec::with_capacity(4);
        let candidates = [
            (REASON_BREAK, diverted.break_label, old.break_label),
            (REASON_CONTINUE, diverted.continue_label, old.continue_label),
            (REASON_RETURN, Some(diverted.return_label), Some(old.return_label)),
        ];
        for (reason, new, orig) in candidates {
            if let (Some(new), Some(orig)) = (new, orig) {
                if code.label_used(new) {
                    exits.push((reason, new, orig));
                }
            }
        }
        if self.handle_error_case && code.label_used(diverted.error_label) {
            exits.push((REASON_ERROR, diverted.error_label, old.error_label));
        }

        if exits.is_empty() {
            code.putln("/*finally:*/ {");
            generate_block(&mut self.finally, code);
            code.putln("}");
            return;
        }

        let reason = code.allocate_temp(Type::INT, false);
        let finally_label = code.new_label("finally");
        let preserve = self.preserve_exception && exits.iter().any(|&(r, ..)| r == REASON_ERROR);
        let pending = preserve.then(|| (allocate_triple(code, false), code.allocate_temp(Type::INT, false)));

        if !ends_in_terminator(&self.body) {
            code.putln(&format!("{reason} = 0;"));
            code.put_goto(finally_label);
        }
        for &(r, new, _) in &exits {
            code.put_label(new);
            if r == REASON_ERROR {
                if !code.func.lock_released {
                    for (cname, ty) in &temps_to_clean_up {
                        code.put_xdecref_clear(cname, *ty);
                    }
                }
                if let Some((exc, lineno)) = &pending {
                    code.putln(&format!("Kes_ErrFetch(&{}, &{}, &{});", exc[0], exc[1], exc[2]));
                    code.putln(&format!("{lineno} = __kes_lineno;"));
                }
            }
            code.putln(&format!("{reason} = {r};"));
            code.put_goto(finally_label);
        }

        code.put_label(finally_label);
        code.putln("/*finally:*/ {");
        let finally_labels = pending.as_ref().map(|_| {
            code.func.all_new_labels();
            code.labels()
        });
        generate_block(&mut self.finally, code);
        code.set_labels(old);

        let finally_end = code.new_label("finally_end");
        if !ends_in_terminator(&self.finally) {
            code.putln(&format!("switch ({reason}) {{"));
            for &(r, _, orig) in &exits {
                match (&pending, r) {
                    (Some((exc, lineno)), REASON_ERROR) => {
                        code.putln(&format!("case {r}: {{"));
                        code.putln(&format!(
                            "Kes_ErrRestore({}, {}, {}); {} = 0; {} = 0; {} = 0;",
                            exc[0], exc[1], exc[2], exc[0], exc[1], exc[2]
                        ));
                        code.putln(&format!("__kes_lineno = {lineno};"));
                        code.put_goto(orig);
                        code.putln("}");
                    }
                    _ => {
                        code.putln(&format!("case {r}:"));
                        code.put_goto(orig);
                    }
                }
            }
            code.putln("}");
        }

        // Abrupt exits out of the finally body itself drop the pending error.
        if let (Some(labels), Some((exc, _))) = (finally_labels, &pending) {
            let mut first = true;
            for (new, orig) in exit_pairs(labels, old) {
                if let (Some(new), Some(orig)) = (new, orig) {
                    if code.label_used(new) {
                        if first && !ends_in_terminator(&self.finally) {
                            code.put_goto(finally_end);
                        }
                        first = false;
                        code.put_label(new);
                        put_xdecref_triple(code, exc);
                        code.put_goto(orig);
                    }
                }
            }
        }
        code.put_label(finally_end);
        code.putln("}");

        if let Some((exc, lineno)) = &pending {
            release_triple(code, exc);
            code.release_temp(lineno);
        }
        code.release_temp(&reason);
    }

    fn contains_yield(&self) -> bool {
        block_contains_yield(&self.body) || block_contains_yield(&self.finally)
    }

    fn span(&self) -> Span {
        self.span
    }
}

/// `with nogil:` or `with gil:`; lowered to a [`TryFinallyStat`] during
/// analysis.
#[derive(Clone, Debug)]
pub struct LockBracket {
    /// `true` for `with nogil`.
    pub release: bool,
    pub body: Vec<Stmt>,
    pub span: Span,
}

impl LockBracket {
    pub fn new(release: bool, body: Vec<Stmt>, span: Span) -> Self {
        LockBracket {
            release,
            body,
            span,
        }
    }
}

impl StatNode for LockBracket {
    fn analyse_declarations(&mut self, env: &mut Env<'_>) {
        declare_block(&mut self.body, env);
    }

    fn analyse_types(self, env: &mut Env<'_>) -> Stmt {
        let span = self.span;
        if env.flow.lock_released == self.release {
            let message = if self.release {
                "the lock is already released"
            } else {
                "the lock is already held"
            };
            env.error_at(ErrorCode::E2007, span, message);
        }
        let saved = env.flow.lock_released;
        env.flow.lock_released = self.release;
        let body = analyse_block(self.body, env);
        env.flow.lock_released = saved;

        let id = env.fresh_id();
        let enter = LockTransition {
            release: self.release,
            nogil_bracket: self.release,
            id,
            span,
        };
        let leave = LockTransition {
            release: !self.release,
            ..enter
        };
        let mut try_body = Vec::with_capacity(body.len() + 1);
        try_body.push(Stmt::LockTransition(enter));
        try_body.extend(body);
        Stmt::TryFinally(TryFinallyStat {
            body: try_body,
            finally: vec![Stmt::LockTransition(leave)],
            handle_error_case: true,
            preserve_exception: false,
            span,
        })
    }

    fn generate_execution_code(&mut self, _code: &mut Code<'_>) {
        debug_assert!(false, "lock bracket reached code generation unlowered");
    }

    fn contains_yield(&self) -> bool {
        block_contains_yield(&self.body)
    }

    fn span(&self) -> Span {
        self.span
    }
}

/// Switch the lock state of the running code.
#[derive(Copy, Clone, Debug)]
pub struct LockTransition {
    /// The lock is released after this transition.
    pub release: bool,
    /// Part of a `with nogil` bracket (thread-state save/restore) rather
    /// than `with gil` (lock ensure/release).
    pub nogil_bracket: bool,
    pub id: u32,
    pub span: Span,
}

impl StatNode for LockTransition {
    fn analyse_declarations(&mut self, _env: &mut Env<'_>) {}

    fn analyse_types(self, _env: &mut Env<'_>) -> Stmt {
        Stmt::LockTransition(self)
    }

    fn generate_execution_code(&mut self, code: &mut Code<'_>) {
        let id = self.id;
        match (self.nogil_bracket, self.release) {
            (true, true) => {
                let state = format!("__kes_ts_{id}");
                code.func.extra_decls.push(format!("KesThreadState *{state}"));
                code.putln(&format!("{state} = Kes_SaveThread();"));
            }
            (true, false) => code.putln(&format!("Kes_RestoreThread(__kes_ts_{id});")),
            (false, false) => {
                let state = format!("__kes_gs_{id}");
                code.func.extra_decls.push(format!("KesGILState {state}"));
                code.putln(&format!("{state} = Kes_GILState_Ensure();"));
            }
            (false, true) => code.putln(&format!("Kes_GILState_Release(__kes_gs_{id});")),
        }
        code.func.lock_released = self.release;
    }

    fn span(&self) -> Span {
        self.span
    }
}

/// `with manager [as target]: body`
///
/// Analysis lowers the body to
/// `try: try: body except: <exit(exc)> finally: <exit(None)>`, with the
/// outer statement not routing errors through its finally body.
#[derive(Clone, Debug)]
pub struct WithStat {
    pub manager: Expr,
    pub target: Option<Expr>,
    pub body: Vec<Stmt>,
    pub span: Span,
    bind: Option<Expr>,
    lowered: Option<Box<Stmt>>,
}

impl WithStat {
    pub fn new(manager: Expr, target: Option<Expr>, body: Vec<Stmt>, span: Span) -> Self {
        WithStat {
            manager,
            target,
            body,
            span,
            bind: None,
            lowered: None,
        }
    }
}

impl StatNode for WithStat {
    fn analyse_declarations(&mut self, env: &mut Env<'_>) {
        if let Some(target) = &self.target {
            target.analyse_target_declaration(env);
        }
        declare_block(&mut self.body, env);
    }

    fn analyse_types(self, env: &mut Env<'_>) -> Stmt {
        let span = self.span;
        env.require_lock(span, "with statement");
        let manager = self.manager.analyse_types(env).coerce_to_object(env);
        let (target, bind) = match self.target {
            Some(target) => {
                let target = target.analyse_target_types(env);
                let bind = Expr::clone_placeholder(Type::Object, target.span).coerce_to(target.ty, env);
                (Some(target), Some(bind))
            }
            None => (None, None),
        };
        let handler = ExceptClause::new(
            None,
            None,
            vec![Stmt::WithExit(WithExit {
                exceptional: true,
                span,
            })],
            span,
        );
        let protected = TryExceptStat::new(self.body, vec![handler], None, span);
        let lowered = TryFinallyStat {
            body: vec![Stmt::TryExcept(protected)],
            finally: vec![Stmt::WithExit(WithExit {
                exceptional: false,
                span,
            })],
            handle_error_case: false,
            preserve_exception: true,
            span,
        };
        let lowered = lowered.analyse_types(env);
        Stmt::With(WithStat {
            manager,
            target,
            body: Vec::new(),
            span,
            bind,
            lowered: Some(Box::new(lowered)),
        })
    }

    fn generate_execution_code(&mut self, code: &mut Code<'_>) {
        let span = self.span;
        self.manager.generate_evaluation_code(code);
        let exit = code.allocate_temp(Type::Object, false);
        let n_exit = code.module.intern_name("__exit__");
        code.putln(&format!(
            "{exit} = Kes_LookupSpecial({}, {n_exit});",
            self.manager.result()
        ));
        code.put_error_if_null(&exit, span);

        let old_error = code.func.new_error_label();
        let setup_error = code.error_label();
        let n_enter = code.module.intern_name("__enter__");
        let enter = code.allocate_temp(Type::Object, true);
        code.putln(&format!(
            "{enter} = Kes_LookupSpecial({}, {n_enter});",
            self.manager.result()
        ));
        code.put_error_if_null(&enter, span);
        self.manager.generate_disposal_code(code);
        let result = code.allocate_temp(Type::Object, true);
        code.putln(&format!("{result} = Kes_CallNoArg({enter});"));
        code.put_decref_clear(&enter, Type::Object);
        code.release_temp(&enter);
        code.put_error_if_null(&result, span);
        if let (Some(target), Some(bind)) = (&mut self.target, &mut self.bind) {
            bind.set_clone_source(&result);
            bind.generate_evaluation_code(code);
            target.generate_assignment_code(bind, code);
        }
        code.put_decref_clear(&result, Type::Object);
        code.release_temp(&result);
        let labels = code.labels();
        code.set_labels(LabelSet {
            error_label: old_error,
            ..labels
        });

        code.func.with_exit_vars.push(exit.clone());
        if let Some(lowered) = &mut self.lowered {
            lowered.generate_execution_code(code);
        }
        code.func.with_exit_vars.pop();

        if code.label_used(setup_error) {
            let end = code.new_label("with_end");
            code.put_goto(end);
            code.put_label(setup_error);
            code.put_decref_clear(&exit, Type::Object);
            code.put_goto(old_error);
            code.put_label(end);
        }
        code.release_temp(&exit);
    }

    fn contains_yield(&self) -> bool {
        self.manager.contains_yield()
            || block_contains_yield(&self.body)
            || self.lowered.as_deref().is_some_and(Stmt::contains_yield)
    }

    fn span(&self) -> Span {
        self.span
    }
}

/// Call of the `__exit__` callable held by the innermost `with`.
#[derive(Copy, Clone, Debug)]
pub struct WithExit {
    /// Called from the exception handler with the caught triple; otherwise
    /// called with three `None`s if the callable is still held.
    pub exceptional: bool,
    pub span: Span,
}

impl StatNode for WithExit {
    fn analyse_declarations(&mut self, _env: &mut Env<'_>) {}

    fn analyse_types(self, _env: &mut Env<'_>) -> Stmt {
        Stmt::WithExit(self)
    }

    fn generate_execution_code(&mut self, code: &mut Code<'_>) {
        let span = self.span;
        let Some(exit) = code.func.with_exit_vars.last().cloned() else {
            debug_assert!(false, "with exit outside a with statement");
            return;
        };
        let result = code.allocate_temp(Type::Object, true);
        if self.exceptional {
            let Some(vars) = code.func.exc_vars.last().cloned() else {
                debug_assert!(false, "exceptional with exit outside a handler");
                return;
            };
            code.putln(&format!(
                "{result} = Kes_CallExit({exit}, {}, {}, {});",
                vars[0], vars[1], vars[2]
            ));
            code.put_decref_clear(&exit, Type::Object);
            code.put_error_if_null(&result, span);
            let suppress = code.allocate_temp(Type::Bint, false);
            code.putln(&format!("{suppress} = Kes_ObjectIsTrue({result});"));
            code.put_decref_clear(&result, Type::Object);
            code.put_error_if(&format!("{suppress} < 0"), span);
            code.putln(&format!("if (!{suppress}) {{"));
            for var in &vars {
                code.put_xincref(var);
            }
            code.putln(&format!(
                "Kes_ErrRestore({}, {}, {});",
                vars[0], vars[1], vars[2]
            ));
            let goto = code.error_goto(span);
            code.putln(&goto);
            code.putln("}");
            code.release_temp(&suppress);
        } else {
            code.putln(&format!("if ({exit}) {{"));
            code.putln(&format!(
                "{result} = Kes_CallExit({exit}, Kes_None, Kes_None, Kes_None);"
            ));
            code.put_decref_clear(&exit, Type::Object);
            code.put_error_if_null(&result, span);
            code.put_decref_clear(&result, Type::Object);
            code.putln("}");
        }
        code.release_temp(&result);
    }

    fn span(&self) -> Span {
        self.span
    }
}
