//! Statement nodes and the three-phase contract they implement.
//!
//! Every statement goes through the same pipeline:
//!
//! 1. [`StatNode::analyse_declarations`] creates the symbol entries the
//!    statement introduces and reports shape errors visible from syntax
//!    alone;
//! 2. [`StatNode::analyse_types`] consumes the node, settles expression types
//!    and returns the node to emit (possibly a different variant, as for
//!    lock brackets and `with`);
//! 3. [`StatNode::generate_execution_code`] writes C through the emitter.
//!
//! [`Stmt`] is the closed set of statement kinds; its methods dispatch to
//! the per-kind structs.

mod assign;
mod control;
mod simple;
mod try_stmt;

pub use assign::{CascadedAssign, InPlaceAssign, ParallelAssign, SingleAssign};
pub use control::{ForFromStat, ForInStat, IfClause, IfStat, WhileStat};
pub use simple::{
    AssertStat, BreakStat, ContinueStat, DelStat, ExprStat, GlobalStat, NativeDecl, PassStat,
    RaiseStat, ReraiseStat, ReturnStat,
};
pub use try_stmt::{
    ExceptClause, LockBracket, LockTransition, TryExceptStat, TryFinallyStat, WithExit, WithStat,
};

use kes_ir::{BinaryOp, Name, Relation, Span, Type};
use kes_stack::ensure_sufficient_stack;

use crate::defs::{ClassDef, FuncDef, NativeFuncDef};
use crate::emit::Code;
use crate::env::Env;
use crate::expr::Expr;

/// The contract shared by every statement kind.
pub trait StatNode {
    /// Phase 1: declare the names this statement binds.
    fn analyse_declarations(&mut self, env: &mut Env<'_>);

    /// Phase 2: resolve types and return the node to emit.
    fn analyse_types(self, env: &mut Env<'_>) -> Stmt;

    /// Phase 3: emit C for this statement.
    fn generate_execution_code(&mut self, code: &mut Code<'_>);

    /// Control never falls through to the next statement.
    fn is_terminator(&self) -> bool {
        false
    }

    /// A `yield` appears in this statement, outside nested definitions.
    fn contains_yield(&self) -> bool {
        false
    }

    fn span(&self) -> Span;
}

/// A statement or definition.
#[derive(Clone, Debug)]
pub enum Stmt {
    Expr(ExprStat),
    Pass(PassStat),
    NativeDecl(NativeDecl),
    If(IfStat),
    While(WhileStat),
    ForIn(ForInStat),
    ForFrom(ForFromStat),
    Break(BreakStat),
    Continue(ContinueStat),
    Return(ReturnStat),
    Raise(RaiseStat),
    Reraise(ReraiseStat),
    Assert(AssertStat),
    Del(DelStat),
    Global(GlobalStat),
    Assign(SingleAssign),
    Cascaded(CascadedAssign),
    Parallel(ParallelAssign),
    InPlace(InPlaceAssign),
    TryExcept(TryExceptStat),
    TryFinally(TryFinallyStat),
    LockBracket(LockBracket),
    LockTransition(LockTransition),
    With(WithStat),
    WithExit(WithExit),
    FuncDef(Box<FuncDef>),
    NativeFuncDef(Box<NativeFuncDef>),
    ClassDef(Box<ClassDef>),
}

macro_rules! dispatch {
    ($stmt:expr, $node:ident => $body:expr) => {
        match $stmt {
            Stmt::Expr($node) => $body,
            Stmt::Pass($node) => $body,
            Stmt::NativeDecl($node) => $body,
            Stmt::If($node) => $body,
            Stmt::While($node) => $body,
            Stmt::ForIn($node) => $body,
            Stmt::ForFrom($node) => $body,
            Stmt::Break($node) => $body,
            Stmt::Continue($node) => $body,
            Stmt::Return($node) => $body,
            Stmt::Raise($node) => $body,
            Stmt::Reraise($node) => $body,
            Stmt::Assert($node) => $body,
            Stmt::Del($node) => $body,
            Stmt::Global($node) => $body,
            Stmt::Assign($node) => $body,
            Stmt::Cascaded($node) => $body,
            Stmt::Parallel($node) => $body,
            Stmt::InPlace($node) => $body,
            Stmt::TryExcept($node) => $body,
            Stmt::TryFinally($node) => $body,
            Stmt::LockBracket($node) => $body,
            Stmt::LockTransition($node) => $body,
            Stmt::With($node) => $body,
            Stmt::WithExit($node) => $body,
            Stmt::FuncDef($node) => $body,
            Stmt::NativeFuncDef($node) => $body,
            Stmt::ClassDef($node) => $body,
        }
    };
}

impl Stmt {
    pub fn analyse_declarations(&mut self, env: &mut Env<'_>) {
        dispatch!(self, node => node.analyse_declarations(env));
    }

    pub fn analyse_types(self, env: &mut Env<'_>) -> Stmt {
        dispatch!(self, node => node.analyse_types(env))
    }

    pub fn generate_execution_code(&mut self, code: &mut Code<'_>) {
        dispatch!(self, node => node.generate_execution_code(code));
    }

    pub fn is_terminator(&self) -> bool {
        dispatch!(self, node => node.is_terminator())
    }

    pub fn contains_yield(&self) -> bool {
        dispatch!(self, node => node.contains_yield())
    }

    pub fn span(&self) -> Span {
        dispatch!(self, node => node.span())
    }
}

// Constructors, used by the front end to build the tree.

impl Stmt {
    pub fn expr(expr: Expr) -> Stmt {
        let span = expr.span;
        Stmt::Expr(ExprStat::new(expr, span))
    }

    pub fn pass(span: Span) -> Stmt {
        Stmt::Pass(PassStat { span })
    }

    /// `cdef <ty> a, b`
    pub fn native_decl(names: Vec<(Name, Span)>, ty: Type, span: Span) -> Stmt {
        Stmt::NativeDecl(NativeDecl { names, ty, span })
    }

    pub fn if_(clauses: Vec<(Expr, Vec<Stmt>)>, else_body: Option<Vec<Stmt>>, span: Span) -> Stmt {
        let clauses = clauses
            .into_iter()
            .map(|(cond, body)| IfClause::new(cond, body))
            .collect();
        Stmt::If(IfStat::new(clauses, else_body, span))
    }

    pub fn while_(cond: Expr, body: Vec<Stmt>, else_body: Option<Vec<Stmt>>, span: Span) -> Stmt {
        Stmt::While(WhileStat::new(cond, body, else_body, span))
    }

    pub fn for_in(
        target: Expr,
        iterable: Expr,
        body: Vec<Stmt>,
        else_body: Option<Vec<Stmt>>,
        span: Span,
    ) -> Stmt {
        Stmt::ForIn(ForInStat::new(target, iterable, body, else_body, span))
    }

    /// `for target from bound1 rel1 target rel2 bound2 [by step]`
    #[allow(clippy::too_many_arguments, reason = "mirrors the loop header")]
    pub fn for_from(
        target: Expr,
        bound1: Expr,
        rel1: Relation,
        rel2: Relation,
        bound2: Expr,
        step: Option<Expr>,
        body: Vec<Stmt>,
        else_body: Option<Vec<Stmt>>,
        span: Span,
    ) -> Stmt {
        Stmt::ForFrom(ForFromStat::new(
            target, bound1, rel1, rel2, bound2, step, body, else_body, span,
        ))
    }

    pub fn break_(span: Span) -> Stmt {
        Stmt::Break(BreakStat { span })
    }

    pub fn continue_(span: Span) -> Stmt {
        Stmt::Continue(ContinueStat { span })
    }

    pub fn return_(value: Option<Expr>, span: Span) -> Stmt {
        Stmt::Return(ReturnStat::new(value, span))
    }

    pub fn raise(exc: Expr, cause: Option<Expr>, span: Span) -> Stmt {
        Stmt::Raise(RaiseStat { exc, cause, span })
    }

    /// Bare `raise`.
    pub fn reraise(span: Span) -> Stmt {
        Stmt::Reraise(ReraiseStat { span })
    }

    pub fn assert(cond: Expr, message: Option<Expr>, span: Span) -> Stmt {
        Stmt::Assert(AssertStat {
            cond,
            message,
            span,
        })
    }

    pub fn del(targets: Vec<Expr>, span: Span) -> Stmt {
        Stmt::Del(DelStat { targets, span })
    }

    pub fn global(names: Vec<Name>, span: Span) -> Stmt {
        Stmt::Global(GlobalStat {
            names,
            nonlocal: false,
            span,
        })
    }

    pub fn nonlocal(names: Vec<Name>, span: Span) -> Stmt {
        Stmt::Global(GlobalStat {
            names,
            nonlocal: true,
            span,
        })
    }

    pub fn assign(target: Expr, value: Expr, span: Span) -> Stmt {
        Stmt::Assign(SingleAssign::new(target, value, span))
    }

    /// `a = b = value`
    pub fn cascaded(targets: Vec<Expr>, value: Expr, span: Span) -> Stmt {
        Stmt::Cascaded(CascadedAssign::new(targets, value, span))
    }

    /// `a, b = x, y`
    pub fn parallel(targets: Vec<Expr>, values: Vec<Expr>, span: Span) -> Stmt {
        Stmt::Parallel(ParallelAssign::new(targets, values, span))
    }

    pub fn inplace(op: BinaryOp, target: Expr, value: Expr, span: Span) -> Stmt {
        Stmt::InPlace(InPlaceAssign::new(op, target, value, span))
    }

    pub fn try_except(
        body: Vec<Stmt>,
        clauses: Vec<ExceptClause>,
        else_body: Option<Vec<Stmt>>,
        span: Span,
    ) -> Stmt {
        Stmt::TryExcept(TryExceptStat::new(body, clauses, else_body, span))
    }

    pub fn try_finally(body: Vec<Stmt>, finally: Vec<Stmt>, span: Span) -> Stmt {
        Stmt::TryFinally(TryFinallyStat::new(body, finally, span))
    }

    /// `with nogil:` (`release == true`) or `with gil:`.
    pub fn lock_bracket(release: bool, body: Vec<Stmt>, span: Span) -> Stmt {
        Stmt::LockBracket(LockBracket::new(release, body, span))
    }

    pub fn with(manager: Expr, target: Option<Expr>, body: Vec<Stmt>, span: Span) -> Stmt {
        Stmt::With(WithStat::new(manager, target, body, span))
    }

    pub fn func_def(def: FuncDef) -> Stmt {
        Stmt::FuncDef(Box::new(def))
    }

    pub fn native_func_def(def: NativeFuncDef) -> Stmt {
        Stmt::NativeFuncDef(Box::new(def))
    }

    pub fn class_def(def: ClassDef) -> Stmt {
        Stmt::ClassDef(Box::new(def))
    }
}

// Statement lists

pub(crate) fn declare_block(body: &mut [Stmt], env: &mut Env<'_>) {
    for stmt in body {
        ensure_sufficient_stack(|| stmt.analyse_declarations(env));
    }
}

pub(crate) fn analyse_block(body: Vec<Stmt>, env: &mut Env<'_>) -> Vec<Stmt> {
    body.into_iter()
        .map(|stmt| ensure_sufficient_stack(|| stmt.analyse_types(env)))
        .collect()
}

pub(crate) fn generate_block(body: &mut [Stmt], code: &mut Code<'_>) {
    for stmt in body {
        code.mark_position(stmt.span());
        ensure_sufficient_stack(|| stmt.generate_execution_code(code));
    }
}

pub(crate) fn ends_in_terminator(body: &[Stmt]) -> bool {
    body.last().is_some_and(Stmt::is_terminator)
}

pub(crate) fn block_contains_yield(body: &[Stmt]) -> bool {
    body.iter().any(Stmt::contains_yield)
}

/// Analyse `body` as a loop body.
pub(crate) fn analyse_loop_body(body: Vec<Stmt>, env: &mut Env<'_>) -> Vec<Stmt> {
    env.flow.loop_depth += 1;
    let body = analyse_block(body, env);
    env.flow.loop_depth -= 1;
    body
}
