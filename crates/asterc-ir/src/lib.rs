//! asterc-ir - SSA intermediate representation and AST lowering.
//!
//! This crate owns the middle of the pipeline: the block-structured SSA IR
//! ([`ir`]), the recursive AST-to-IR builder ([`build`]), the name mangler
//! ([`mangle`]) and the textual/dot printers ([`print`]). The
//! [`context::CodegenContext`] ties them together: it owns the AST, the IR
//! module and every per-translation counter, so dropping the context releases
//! the whole compilation.

pub mod build;
pub mod context;
pub mod ir;
pub mod mangle;
pub mod print;
pub mod target;

pub use context::CodegenContext;
pub use ir::{
    BlockId, Callee, FuncId, Inst, InstId, InstKind, IrBlock, IrFunction, IrModule, PhiArg,
    StaticId, StaticInit, StaticVar,
};
pub use target::{Arch, CallConv, Language, TargetDesc, TargetFormat};
