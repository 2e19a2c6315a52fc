//! Kestrel IR - shared vocabulary of the compiler back end.
//!
//! - [`Span`]: source byte ranges
//! - [`Name`] and [`StringInterner`]: interned identifiers
//! - [`Type`]: the native/object type model and its coercions
//! - operator enums used by expressions and in-place assignment

mod interner;
mod name;
mod ops;
mod span;
mod types;

pub use interner::{InternError, StringInterner};
pub use name::Name;
pub use ops::{BinaryOp, CmpOp, Direction, Relation};
pub use span::{Span, SpanError};
pub use types::{Coercion, FloatKind, IntKind, SliceElem, Type};
