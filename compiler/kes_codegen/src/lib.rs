//! Statement and definition lowering for Kestrel.
//!
//! This crate turns the statement tree of a Kestrel module into a C
//! translation unit that runs against the Kestrel object runtime. Every
//! statement goes through three phases:
//!
//! 1. **declare** - names bound by the statement are entered into the
//!    [`symtab::SymbolTable`];
//! 2. **analyse** - expression types are settled, coercions inserted, and
//!    region rules (loop nesting, lock state) checked. The node is consumed
//!    and a possibly different node returned;
//! 3. **emit** - C is written through the [`emit::Code`] emitter.
//!
//! Control flow is lowered to labels and `goto`: every function has a return
//! label and an error label, loops push continue/break labels, and
//! `try`/`finally` diverts each abrupt exit through the finally body with a
//! reason code.
//!
//! # Debugging
//!
//! - `RUST_LOG=kes_codegen=debug`: phase boundaries and per-function
//!   label/temporary counts.
//!
//! # Example
//!
//! ```ignore
//! use kes_codegen::{compile_module, CodegenOptions, Expr, Module, Stmt};
//! use kes_ir::{Span, StringInterner};
//!
//! let interner = StringInterner::new();
//! let x = interner.intern("x");
//! let module = Module {
//!     name: interner.intern("demo"),
//!     file: "demo.kes".to_owned(),
//!     source: None,
//!     body: vec![Stmt::assign(Expr::name(x, Span::DUMMY), Expr::int(1, Span::DUMMY), Span::DUMMY)],
//! };
//! let result = compile_module(module, &interner, &CodegenOptions::default());
//! assert!(result.code.is_some());
//! ```

pub mod defs;
pub mod emit;
pub mod env;
pub mod expr;
pub mod nodes;
pub mod options;
pub mod symtab;

mod driver;

pub use defs::{CallingConvention, ClassDef, FuncDef, NativeFuncDef, NativeParam, Param, ParamKind};
pub use driver::{compile_module, CodegenResult, Module};
pub use expr::Expr;
pub use nodes::{ExceptClause, Stmt};
pub use options::{CodegenOptions, DirectiveOverrides, Directives};
pub use symtab::ExceptionSpec;

use std::sync::Once;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for debug output.
///
/// Safe to call multiple times. Does nothing unless `RUST_LOG` is set.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        if std::env::var("RUST_LOG").is_ok() {
            let filter = EnvFilter::from_default_env();
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_level(true))
                .with(filter)
                .init();
        }
    });
}
