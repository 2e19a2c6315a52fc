//! Assignment statements.

use kes_diagnostic::ErrorCode;
use kes_ir::{BinaryOp, Span, Type};

use super::{StatNode, Stmt};
use crate::emit::{clear_value, Code};
use crate::env::Env;
use crate::expr::{assign_to_entry, put_slice_index_checks, Expr, ExprKind};

/// `target = value`
#[derive(Clone, Debug)]
pub struct SingleAssign {
    pub target: Expr,
    pub value: Expr,
    pub span: Span,
}

impl SingleAssign {
    pub fn new(target: Expr, value: Expr, span: Span) -> Self {
        SingleAssign {
            target,
            value,
            span,
        }
    }
}

impl StatNode for SingleAssign {
    fn analyse_declarations(&mut self, env: &mut Env<'_>) {
        self.target.analyse_target_declaration(env);
    }

    fn analyse_types(self, env: &mut Env<'_>) -> Stmt {
        let target = self.target.analyse_target_types(env);
        let value = self.value.analyse_types(env).coerce_to(target.ty, env);
        env.check_nogil(&value);
        env.check_nogil(&target);
        Stmt::Assign(SingleAssign {
            target,
            value,
            span: self.span,
        })
    }

    fn generate_execution_code(&mut self, code: &mut Code<'_>) {
        self.value.generate_evaluation_code(code);
        self.target.generate_assignment_code(&mut self.value, code);
    }

    fn contains_yield(&self) -> bool {
        self.target.contains_yield() || self.value.contains_yield()
    }

    fn span(&self) -> Span {
        self.span
    }
}

/// `a = b = value`: the value is computed once and stored left to right.
#[derive(Clone, Debug)]
pub struct CascadedAssign {
    pub targets: Vec<Expr>,
    pub value: Expr,
    pub span: Span,
    conversions: Vec<Expr>,
}

impl CascadedAssign {
    pub fn new(targets: Vec<Expr>, value: Expr, span: Span) -> Self {
        CascadedAssign {
            targets,
            value,
            span,
            conversions: Vec::new(),
        }
    }
}

impl StatNode for CascadedAssign {
    fn analyse_declarations(&mut self, env: &mut Env<'_>) {
        for target in &self.targets {
            target.analyse_target_declaration(env);
        }
    }

    fn analyse_types(self, env: &mut Env<'_>) -> Stmt {
        let value = self.value.analyse_types(env).coerce_to_simple(env);
        env.check_nogil(&value);
        let mut targets = Vec::with_capacity(self.targets.len());
        let mut conversions = Vec::with_capacity(self.targets.len());
        for target in self.targets {
            let target = target.analyse_target_types(env);
            env.check_nogil(&target);
            let conv = Expr::clone_placeholder(value.ty, value.span).coerce_to(target.ty, env);
            env.check_nogil(&conv);
            conversions.push(conv);
            targets.push(target);
        }
        Stmt::Cascaded(CascadedAssign {
            targets,
            value,
            span: self.span,
            conversions,
        })
    }

    fn generate_execution_code(&mut self, code: &mut Code<'_>) {
        self.value.generate_evaluation_code(code);
        let source = self.value.result().to_owned();
        for (target, conv) in self.targets.iter_mut().zip(self.conversions.iter_mut()) {
            conv.set_clone_source(&source);
            conv.generate_evaluation_code(code);
            target.generate_assignment_code(conv, code);
        }
        self.value.generate_disposal_code(code);
    }

    fn contains_yield(&self) -> bool {
        self.targets.iter().any(Expr::contains_yield) || self.value.contains_yield()
    }

    fn span(&self) -> Span {
        self.span
    }
}

/// `a, b = x, y`: every value is computed before any target is stored.
#[derive(Clone, Debug)]
pub struct ParallelAssign {
    pub targets: Vec<Expr>,
    pub values: Vec<Expr>,
    pub span: Span,
}

impl ParallelAssign {
    pub fn new(targets: Vec<Expr>, values: Vec<Expr>, span: Span) -> Self {
        ParallelAssign {
            targets,
            values,
            span,
        }
    }
}

impl StatNode for ParallelAssign {
    fn analyse_declarations(&mut self, env: &mut Env<'_>) {
        for target in &self.targets {
            target.analyse_target_declaration(env);
        }
    }

    fn analyse_types(self, env: &mut Env<'_>) -> Stmt {
        if self.targets.len() != self.values.len() {
            env.error_at(
                ErrorCode::E2012,
                self.span,
                format!(
                    "cannot assign {} values to {} targets",
                    self.values.len(),
                    self.targets.len()
                ),
            );
            return Stmt::pass(self.span);
        }
        let mut targets = Vec::with_capacity(self.targets.len());
        let mut values = Vec::with_capacity(self.values.len());
        for (target, value) in self.targets.into_iter().zip(self.values) {
            let target = target.analyse_target_types(env);
            let value = value
                .analyse_types(env)
                .coerce_to(target.ty, env)
                .coerce_to_temp(env);
            env.check_nogil(&target);
            env.check_nogil(&value);
            targets.push(target);
            values.push(value);
        }
        Stmt::Parallel(ParallelAssign {
            targets,
            values,
            span: self.span,
        })
    }

    fn generate_execution_code(&mut self, code: &mut Code<'_>) {
        for value in &mut self.values {
            value.generate_evaluation_code(code);
        }
        for (target, value) in self.targets.iter_mut().zip(self.values.iter_mut()) {
            target.generate_assignment_code(value, code);
        }
    }

    fn contains_yield(&self) -> bool {
        self.targets.iter().chain(&self.values).any(Expr::contains_yield)
    }

    fn span(&self) -> Span {
        self.span
    }
}

/// `target op= value`. The target's subexpressions are evaluated once.
#[derive(Clone, Debug)]
pub struct InPlaceAssign {
    pub op: BinaryOp,
    pub target: Expr,
    pub value: Expr,
    pub span: Span,
    /// Operates on C values rather than objects.
    native: bool,
    /// Read of the current value, for object variables.
    current: Option<Expr>,
}

impl InPlaceAssign {
    pub fn new(op: BinaryOp, target: Expr, value: Expr, span: Span) -> Self {
        InPlaceAssign {
            op,
            target,
            value,
            span,
            native: false,
            current: None,
        }
    }

    fn generate_native(&mut self, code: &mut Code<'_>) {
        let span = self.span;
        let lvalue = match &mut self.target.kind {
            ExprKind::Name { entry: Some(id), .. } => code.entry_access(*id),
            ExprKind::Index {
                base,
                index,
                directives,
                slice: true,
            } => {
                let directives = *directives;
                base.generate_evaluation_code(code);
                index.generate_evaluation_code(code);
                put_slice_index_checks(base.result(), index.result(), directives, span, code);
                format!("{}.data[{}]", base.result(), index.result())
            }
            _ => {
                debug_assert!(false, "invalid native in-place target");
                return;
            }
        };
        self.value.generate_evaluation_code(code);
        let v = self.value.result();
        let line = match self.op.c_operator() {
            Some(c) => format!("{lvalue} {c}= {v};"),
            None => format!("{lvalue} = {}({lvalue}, {v});", self.op.native_helper()),
        };
        code.putln(&line);
        self.value.generate_disposal_code(code);
        self.target.generate_disposal_code(code);
    }

    fn generate_object(&mut self, code: &mut Code<'_>) {
        let span = self.span;
        let func = self.op.inplace_runtime_function();
        match &mut self.target.kind {
            ExprKind::Name { entry: Some(id), .. } => {
                let id = *id;
                let Some(current) = &mut self.current else {
                    debug_assert!(false, "in-place name target without a current value");
                    return;
                };
                current.generate_evaluation_code(code);
                self.value.generate_evaluation_code(code);
                let t = code.allocate_temp(Type::Object, true);
                code.putln(&format!(
                    "{t} = {func}({}, {});",
                    current.result(),
                    self.value.result()
                ));
                code.put_error_if_null(&t, span);
                current.generate_disposal_code(code);
                self.value.generate_disposal_code(code);
                let stolen = assign_to_entry(code, id, &t, true, span);
                release_owned_temp(code, &t, stolen);
            }
            ExprKind::Attribute { obj, attr } => {
                obj.generate_evaluation_code(code);
                let n = code.intern_name(*attr);
                let old = code.allocate_temp(Type::Object, true);
                code.putln(&format!("{old} = Kes_GetAttr({}, {n});", obj.result()));
                code.put_error_if_null(&old, span);
                self.value.generate_evaluation_code(code);
                let new = code.allocate_temp(Type::Object, true);
                code.putln(&format!("{new} = {func}({old}, {});", self.value.result()));
                code.put_error_if_null(&new, span);
                release_owned_temp(code, &old, false);
                self.value.generate_disposal_code(code);
                code.put_error_if_neg(&format!("Kes_SetAttr({}, {n}, {new})", obj.result()), span);
                release_owned_temp(code, &new, false);
                obj.generate_disposal_code(code);
            }
            ExprKind::Index { base, index, .. } => {
                base.generate_evaluation_code(code);
                index.generate_evaluation_code(code);
                let old = code.allocate_temp(Type::Object, true);
                code.putln(&format!(
                    "{old} = Kes_GetItem({}, {});",
                    base.result(),
                    index.result()
                ));
                code.put_error_if_null(&old, span);
                self.value.generate_evaluation_code(code);
                let new = code.allocate_temp(Type::Object, true);
                code.putln(&format!("{new} = {func}({old}, {});", self.value.result()));
                code.put_error_if_null(&new, span);
                release_owned_temp(code, &old, false);
                self.value.generate_disposal_code(code);
                code.put_error_if_neg(
                    &format!("Kes_SetItem({}, {}, {new})", base.result(), index.result()),
                    span,
                );
                release_owned_temp(code, &new, false);
                base.generate_disposal_code(code);
                index.generate_disposal_code(code);
            }
            _ => debug_assert!(false, "invalid in-place target reached code generation"),
        }
    }
}

/// Give up the temporary `t`; its reference is released unless `stolen`.
fn release_owned_temp(code: &mut Code<'_>, t: &str, stolen: bool) {
    if stolen {
        code.putln(&format!("{t} = {};", clear_value(Type::Object)));
    } else {
        code.put_decref_clear(t, Type::Object);
    }
    code.release_temp(t);
}

impl StatNode for InPlaceAssign {
    fn analyse_declarations(&mut self, env: &mut Env<'_>) {
        self.target.analyse_target_declaration(env);
    }

    fn analyse_types(self, env: &mut Env<'_>) -> Stmt {
        let span = self.span;
        let op = self.op;
        let target = self.target.analyse_target_types(env);
        let value = self.value.analyse_types(env);
        if target.ty.is_error() || value.ty.is_error() {
            return Stmt::InPlace(InPlaceAssign {
                target: Expr::error(span),
                value,
                native: false,
                current: None,
                ..self
            });
        }
        let native = target.ty.is_native_numeric()
            && (value.ty.is_native_numeric() || value.ty.is_object_reference());
        if native {
            if op.is_integer_only() && (target.ty.is_float() || value.ty.is_float()) {
                env.error_at(
                    ErrorCode::E2009,
                    span,
                    format!(
                        "operator '{}=' not supported between '{}' and '{}'",
                        op.as_symbol(),
                        target.ty,
                        value.ty
                    ),
                );
            }
            let value = value.coerce_to(target.ty, env);
            env.check_nogil(&value);
            return Stmt::InPlace(InPlaceAssign {
                target,
                value,
                native: true,
                current: None,
                ..self
            });
        }
        env.require_lock(span, "in-place operation on an object");
        let value = value.coerce_to_object(env);
        let current = match &target.kind {
            ExprKind::Name { name, .. } => Some(Expr::name(*name, target.span).analyse_types(env)),
            _ => None,
        };
        if !target.ty.is_object_reference() {
            env.error_at(
                ErrorCode::E2009,
                span,
                format!(
                    "operator '{}=' not supported between '{}' and 'object'",
                    op.as_symbol(),
                    target.ty
                ),
            );
        }
        Stmt::InPlace(InPlaceAssign {
            target,
            value,
            native: false,
            current,
            ..self
        })
    }

    fn generate_execution_code(&mut self, code: &mut Code<'_>) {
        if self.native {
            self.generate_native(code);
        } else {
            self.generate_object(code);
        }
    }

    fn contains_yield(&self) -> bool {
        self.target.contains_yield() || self.value.contains_yield()
    }

    fn span(&self) -> Span {
        self.span
    }
}
