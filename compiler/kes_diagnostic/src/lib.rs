//! Diagnostics for the Kestrel back end.
//!
//! Every problem found while declaring names or analysing types becomes a
//! [`Diagnostic`] with a stable [`ErrorCode`], pushed into a
//! [`DiagnosticQueue`](queue::DiagnosticQueue). Nothing is thrown: analysis
//! substitutes a placeholder and keeps going, and the driver decides at the
//! phase boundary whether code generation may run.
//!
//! Reporting an error hands back an [`ErrorGuaranteed`], so a function that
//! gives up can prove it told the user why.

mod diagnostic;
mod error_code;
mod guarantee;
pub mod queue;
pub mod span_utils;

pub use diagnostic::{type_mismatch, Diagnostic, Label, Severity};
pub use error_code::ErrorCode;
pub use guarantee::ErrorGuaranteed;
pub use queue::{DiagnosticConfig, DiagnosticQueue};
