//! Shared helpers: building statement trees and compiling them.

pub mod trace;

use kes_codegen::{compile_module, CodegenOptions, CodegenResult, Expr, Module, Stmt};
use kes_diagnostic::ErrorCode;
use kes_ir::{BinaryOp, CmpOp, Name, Span, StringInterner};

pub use trace::{Program, State};

/// Builds trees for one module named `m`.
pub struct Fixture {
    pub interner: StringInterner,
    pub options: CodegenOptions,
    /// Next span offset, so every node gets a distinct span.
    offset: std::cell::Cell<u32>,
}

impl Fixture {
    pub fn new() -> Self {
        Fixture {
            interner: StringInterner::new(),
            options: CodegenOptions::default(),
            offset: std::cell::Cell::new(0),
        }
    }

    pub fn span(&self) -> Span {
        let start = self.offset.get();
        self.offset.set(start + 2);
        Span::new(start, start + 1)
    }

    pub fn name(&self, text: &str) -> Name {
        self.interner.intern(text)
    }

    pub fn var(&self, text: &str) -> Expr {
        Expr::name(self.name(text), self.span())
    }

    pub fn int(&self, value: i64) -> Expr {
        Expr::int(value, self.span())
    }

    pub fn cmp(&self, op: CmpOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::compare(op, lhs, rhs, self.span())
    }

    pub fn bin(&self, op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(op, lhs, rhs, self.span())
    }

    /// `var == value`
    pub fn is(&self, var: &str, value: i64) -> Expr {
        self.cmp(CmpOp::Eq, self.var(var), self.int(value))
    }

    pub fn assign(&self, var: &str, value: Expr) -> Stmt {
        Stmt::assign(self.var(var), value, self.span())
    }

    /// `var += value`
    pub fn bump(&self, var: &str, value: i64) -> Stmt {
        Stmt::inplace(BinaryOp::Add, self.var(var), self.int(value), self.span())
    }

    /// `cdef long a, b, ...`
    pub fn longs(&self, names: &[&str]) -> Stmt {
        let names = names.iter().map(|n| (self.name(n), self.span())).collect();
        Stmt::native_decl(names, kes_ir::Type::LONG, self.span())
    }

    pub fn when(&self, cond: Expr, body: Vec<Stmt>) -> Stmt {
        Stmt::if_(vec![(cond, body)], None, self.span())
    }

    pub fn compile(&self, body: Vec<Stmt>) -> CodegenResult {
        let module = Module {
            name: self.name("m"),
            file: "m.kes".to_owned(),
            source: None,
            body,
        };
        compile_module(module, &self.interner, &self.options)
    }

    /// Compile and return the C text; fails the test on any diagnostic.
    pub fn compile_ok(&self, body: Vec<Stmt>) -> String {
        let result = self.compile(body);
        assert!(
            !result.has_errors(),
            "unexpected diagnostics: {:#?}",
            result.diagnostics
        );
        result.code.unwrap_or_default()
    }

    pub fn error_codes(&self, body: Vec<Stmt>) -> Vec<ErrorCode> {
        let result = self.compile(body);
        assert_eq!(result.code.is_none(), result.has_errors());
        result.diagnostics.iter().map(|d| d.code).collect()
    }
}
