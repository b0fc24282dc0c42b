//! asterc-util - Foundation types for the asterc compiler.
//!
//! This crate provides the small set of utilities every other compiler crate
//! builds on: typed index vectors for arena storage, source spans, and the
//! diagnostic handler.

pub mod diagnostic;
pub mod index_vec;
pub mod span;

pub use diagnostic::{Diagnostic, Handler, Level};
pub use index_vec::{Idx, IndexVec};
pub use span::{FileId, Span};

// Re-export the hash types used for compiler side tables.
pub use rustc_hash::{FxHashMap, FxHashSet};
