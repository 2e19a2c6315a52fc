//! Single-line statements: expression statements, declarations, jumps,
//! `raise`, `assert` and `del`.

use kes_diagnostic::{Diagnostic, ErrorCode};
use kes_ir::{Name, Span, Type};

use super::{StatNode, Stmt};
use crate::emit::Code;
use crate::env::Env;
use crate::expr::Expr;
use crate::symtab::ScopeKind;

/// An expression evaluated for its effect.
#[derive(Clone, Debug)]
pub struct ExprStat {
    pub expr: Expr,
    pub span: Span,
}

impl ExprStat {
    pub fn new(expr: Expr, span: Span) -> Self {
        ExprStat { expr, span }
    }
}

impl StatNode for ExprStat {
    fn analyse_declarations(&mut self, _env: &mut Env<'_>) {}

    fn analyse_types(self, env: &mut Env<'_>) -> Stmt {
        let expr = self.expr.analyse_types(env);
        env.check_nogil(&expr);
        Stmt::Expr(ExprStat { expr, ..self })
    }

    fn generate_execution_code(&mut self, code: &mut Code<'_>) {
        self.expr.generate_evaluation_code(code);
        self.expr.generate_disposal_code(code);
    }

    fn contains_yield(&self) -> bool {
        self.expr.contains_yield()
    }

    fn span(&self) -> Span {
        self.span
    }
}

#[derive(Clone, Debug)]
pub struct PassStat {
    pub span: Span,
}

impl StatNode for PassStat {
    fn analyse_declarations(&mut self, _env: &mut Env<'_>) {}

    fn analyse_types(self, _env: &mut Env<'_>) -> Stmt {
        Stmt::Pass(self)
    }

    fn generate_execution_code(&mut self, _code: &mut Code<'_>) {}

    fn span(&self) -> Span {
        self.span
    }
}

/// Variables declared with a native type.
///
/// In a class body the names become ordinary class attributes; typed
/// attribute storage belongs to extension types.
#[derive(Clone, Debug)]
pub struct NativeDecl {
    pub names: Vec<(Name, Span)>,
    pub ty: Type,
    pub span: Span,
}

impl StatNode for NativeDecl {
    fn analyse_declarations(&mut self, env: &mut Env<'_>) {
        for &(name, span) in &self.names {
            if env.scope_kind() == ScopeKind::Class {
                env.declare_name(name, Type::Object, span);
            } else {
                env.declare_native(name, self.ty, span);
            }
        }
    }

    fn analyse_types(self, _env: &mut Env<'_>) -> Stmt {
        Stmt::NativeDecl(self)
    }

    fn generate_execution_code(&mut self, _code: &mut Code<'_>) {}

    fn span(&self) -> Span {
        self.span
    }
}

#[derive(Clone, Debug)]
pub struct BreakStat {
    pub span: Span,
}

impl StatNode for BreakStat {
    fn analyse_declarations(&mut self, _env: &mut Env<'_>) {}

    fn analyse_types(self, env: &mut Env<'_>) -> Stmt {
        if env.flow.loop_depth == 0 {
            env.error_at(ErrorCode::E3001, self.span, "'break' outside loop");
        }
        Stmt::Break(self)
    }

    fn generate_execution_code(&mut self, code: &mut Code<'_>) {
        match code.labels().break_label {
            Some(label) => code.put_goto(label),
            None => debug_assert!(false, "break without a loop label"),
        }
    }

    fn is_terminator(&self) -> bool {
        true
    }

    fn span(&self) -> Span {
        self.span
    }
}

#[derive(Clone, Debug)]
pub struct ContinueStat {
    pub span: Span,
}

impl StatNode for ContinueStat {
    fn analyse_declarations(&mut self, _env: &mut Env<'_>) {}

    fn analyse_types(self, env: &mut Env<'_>) -> Stmt {
        if env.flow.loop_depth == 0 {
            env.error_at(ErrorCode::E3002, self.span, "'continue' not properly in loop");
        }
        Stmt::Continue(self)
    }

    fn generate_execution_code(&mut self, code: &mut Code<'_>) {
        match code.labels().continue_label {
            Some(label) => code.put_goto(label),
            None => debug_assert!(false, "continue without a loop label"),
        }
    }

    fn is_terminator(&self) -> bool {
        true
    }

    fn span(&self) -> Span {
        self.span
    }
}

#[derive(Clone, Debug)]
pub struct ReturnStat {
    pub value: Option<Expr>,
    pub span: Span,
    return_type: Type,
    in_generator: bool,
    /// A `finally` clause may run (and return again) before the function
    /// exits, so a previous return value has to be released.
    in_try_finally: bool,
}

impl ReturnStat {
    pub fn new(value: Option<Expr>, span: Span) -> Self {
        ReturnStat {
            value,
            span,
            return_type: Type::Object,
            in_generator: false,
            in_try_finally: false,
        }
    }
}

impl StatNode for ReturnStat {
    fn analyse_declarations(&mut self, _env: &mut Env<'_>) {}

    fn analyse_types(mut self, env: &mut Env<'_>) -> Stmt {
        let span = self.span;
        let Some(func) = env.current_function() else {
            env.error_at(ErrorCode::E3003, span, "'return' outside function");
            self.value = None;
            return Stmt::Return(self);
        };
        let (ret, is_generator, is_native) = match env.symtab.function_info(func) {
            Some(info) => (info.return_type, info.is_generator, info.is_native),
            None => (Type::Object, false, false),
        };
        self.in_generator = is_generator;
        self.return_type = if is_generator { Type::Object } else { ret };
        self.in_try_finally = env.flow.try_finally_depth > 0;

        match self.value.take() {
            Some(value) if ret.is_void() => {
                env.error(
                    Diagnostic::error(ErrorCode::E2002)
                        .with_message("return with a value in a function returning 'void'")
                        .with_label(value.span, "unexpected value"),
                );
            }
            Some(value) => {
                let value = value.analyse_types(env).coerce_to(self.return_type, env);
                env.check_nogil(&value);
                self.value = Some(value);
            }
            None if is_native && !ret.is_void() && !ret.is_object_reference() => {
                env.error_at(
                    ErrorCode::E2003,
                    span,
                    format!("return value required in a function returning '{ret}'"),
                );
            }
            None => {
                if ret.is_object_reference() && !is_generator {
                    env.require_lock(span, "returning an object");
                }
            }
        }
        Stmt::Return(self)
    }

    fn generate_execution_code(&mut self, code: &mut Code<'_>) {
        let ty = self.return_type;
        match &mut self.value {
            Some(value) if self.in_generator => {
                value.generate_evaluation_code(code);
                code.putln(&format!("Kes_ReturnWithStopIteration({});", value.result()));
                value.generate_disposal_code(code);
            }
            Some(value) => {
                value.generate_evaluation_code(code);
                if ty.needs_refcounting() {
                    if self.in_try_finally {
                        code.put_xdecref("__kes_r", ty);
                    }
                    if value.is_temp() {
                        code.putln(&format!("__kes_r = {};", value.result()));
                        value.generate_post_assignment_code(code);
                    } else {
                        code.put_incref(value.result(), ty);
                        code.putln(&format!("__kes_r = {};", value.result()));
                        value.generate_disposal_code(code);
                    }
                } else {
                    code.putln(&format!("__kes_r = {};", value.result()));
                    value.generate_disposal_code(code);
                }
            }
            None if ty.is_object_reference() && !self.in_generator => {
                if self.in_try_finally {
                    code.put_xdecref("__kes_r", ty);
                }
                code.putln("__kes_r = Kes_None; Kes_INCREF(Kes_None);");
            }
            None => {}
        }
        for (cname, ty) in code.func.temps_holding_reference() {
            code.put_xdecref_clear(&cname, ty);
        }
        let label = code.labels().return_label;
        code.put_goto(label);
    }

    fn is_terminator(&self) -> bool {
        true
    }

    fn contains_yield(&self) -> bool {
        self.value.as_ref().is_some_and(Expr::contains_yield)
    }

    fn span(&self) -> Span {
        self.span
    }
}

#[derive(Clone, Debug)]
pub struct RaiseStat {
    pub exc: Expr,
    pub cause: Option<Expr>,
    pub span: Span,
}

impl StatNode for RaiseStat {
    fn analyse_declarations(&mut self, _env: &mut Env<'_>) {}

    fn analyse_types(self, env: &mut Env<'_>) -> Stmt {
        env.require_lock(self.span, "raising an exception");
        let exc = self.exc.analyse_types(env).coerce_to_object(env);
        let cause = self
            .cause
            .map(|c| c.analyse_types(env).coerce_to_object(env));
        Stmt::Raise(RaiseStat {
            exc,
            cause,
            span: self.span,
        })
    }

    fn generate_execution_code(&mut self, code: &mut Code<'_>) {
        self.exc.generate_evaluation_code(code);
        if let Some(cause) = &mut self.cause {
            cause.generate_evaluation_code(code);
        }
        let cause = self
            .cause
            .as_ref()
            .map_or_else(|| "0".to_owned(), |c| c.result().to_owned());
        code.putln(&format!("Kes_Raise({}, 0, {cause});", self.exc.result()));
        self.exc.generate_disposal_code(code);
        if let Some(cause) = &mut self.cause {
            cause.generate_disposal_code(code);
        }
        let goto = code.error_goto(self.span);
        code.putln(&goto);
    }

    fn is_terminator(&self) -> bool {
        true
    }

    fn contains_yield(&self) -> bool {
        self.exc.contains_yield() || self.cause.as_ref().is_some_and(Expr::contains_yield)
    }

    fn span(&self) -> Span {
        self.span
    }
}

/// Bare `raise`: re-raise the exception being handled.
#[derive(Clone, Debug)]
pub struct ReraiseStat {
    pub span: Span,
}

impl StatNode for ReraiseStat {
    fn analyse_declarations(&mut self, _env: &mut Env<'_>) {}

    fn analyse_types(self, env: &mut Env<'_>) -> Stmt {
        env.require_lock(self.span, "raising an exception");
        Stmt::Reraise(self)
    }

    fn generate_execution_code(&mut self, code: &mut Code<'_>) {
        if let Some(vars) = code.func.exc_vars.last().cloned() {
            for var in &vars {
                code.put_xincref(var);
            }
            code.putln(&format!(
                "Kes_ErrRestore({}, {}, {});",
                vars[0], vars[1], vars[2]
            ));
        } else {
            code.putln("Kes_ReraiseException();");
        }
        let goto = code.error_goto(self.span);
        code.putln(&goto);
    }

    fn is_terminator(&self) -> bool {
        true
    }

    fn span(&self) -> Span {
        self.span
    }
}

#[derive(Clone, Debug)]
pub struct AssertStat {
    pub cond: Expr,
    pub message: Option<Expr>,
    pub span: Span,
}

impl StatNode for AssertStat {
    fn analyse_declarations(&mut self, _env: &mut Env<'_>) {}

    fn analyse_types(self, env: &mut Env<'_>) -> Stmt {
        env.require_lock(self.span, "assert");
        let cond = self.cond.analyse_types(env).coerce_to_boolean(env);
        let message = self
            .message
            .map(|m| m.analyse_types(env).coerce_to_object(env));
        Stmt::Assert(AssertStat {
            cond,
            message,
            span: self.span,
        })
    }

    fn generate_execution_code(&mut self, code: &mut Code<'_>) {
        code.putln("#ifndef KES_NO_ASSERTIONS");
        code.putln("if (unlikely(!Kes_OptimizeFlag)) {");
        self.cond.generate_evaluation_code(code);
        let cond = self.cond.result().to_owned();
        self.cond.generate_disposal_code(code);
        code.putln(&format!("if (unlikely(!{cond})) {{"));
        match &mut self.message {
            Some(message) => {
                message.generate_evaluation_code(code);
                code.putln(&format!(
                    "Kes_ErrSetObject(Kes_AssertionError, {});",
                    message.result()
                ));
                message.generate_disposal_code(code);
            }
            None => code.putln("Kes_ErrSetNone(Kes_AssertionError);"),
        }
        let goto = code.error_goto(self.span);
        code.putln(&goto);
        code.putln("}");
        code.putln("}");
        code.putln("#endif");
    }

    fn contains_yield(&self) -> bool {
        self.cond.contains_yield() || self.message.as_ref().is_some_and(Expr::contains_yield)
    }

    fn span(&self) -> Span {
        self.span
    }
}

#[derive(Clone, Debug)]
pub struct DelStat {
    pub targets: Vec<Expr>,
    pub span: Span,
}

impl StatNode for DelStat {
    fn analyse_declarations(&mut self, _env: &mut Env<'_>) {}

    fn analyse_types(self, env: &mut Env<'_>) -> Stmt {
        let targets = self
            .targets
            .into_iter()
            .map(|t| t.analyse_deletion(env))
            .collect();
        Stmt::Del(DelStat {
            targets,
            span: self.span,
        })
    }

    fn generate_execution_code(&mut self, code: &mut Code<'_>) {
        for target in &mut self.targets {
            target.generate_deletion_code(code);
        }
    }

    fn span(&self) -> Span {
        self.span
    }
}

/// `global` or `nonlocal` declaration.
#[derive(Clone, Debug)]
pub struct GlobalStat {
    pub names: Vec<Name>,
    pub nonlocal: bool,
    pub span: Span,
}

impl StatNode for GlobalStat {
    fn analyse_declarations(&mut self, env: &mut Env<'_>) {
        let func = env
            .current_function()
            .filter(|&f| f == env.scope);
        let Some(func) = func else {
            if self.nonlocal {
                env.error_at(
                    ErrorCode::E1004,
                    self.span,
                    "nonlocal declaration not allowed at module level",
                );
            }
            return;
        };
        if let Some(info) = env.symtab.function_info_mut(func) {
            let set = if self.nonlocal {
                &mut info.nonlocals
            } else {
                &mut info.globals
            };
            set.extend(self.names.iter().copied());
        }
    }

    fn analyse_types(self, env: &mut Env<'_>) -> Stmt {
        if self.nonlocal && env.in_function() {
            for &name in &self.names {
                let bound_in_function = env
                    .symtab
                    .resolve(env.scope, name)
                    .is_some_and(|id| env.symtab.scope(env.symtab.entry(id).scope).is_function());
                if !bound_in_function {
                    let text = env.name_text(name);
                    env.error_at(
                        ErrorCode::E1005,
                        self.span,
                        format!("no binding for nonlocal '{text}' found"),
                    );
                }
            }
        }
        Stmt::Global(self)
    }

    fn generate_execution_code(&mut self, _code: &mut Code<'_>) {}

    fn span(&self) -> Span {
        self.span
    }
}
