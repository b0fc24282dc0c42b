//! asterc-ast - The typed AST and type system consumed by code generation.
//!
//! The front end (lexer, parser, semantic analyser) lives outside this
//! repository; what it hands the code generator is an [`Ast`]: an arena of
//! type-annotated [`Node`]s plus a [`TypeStore`] shared between the AST and
//! the IR. This crate defines that contract and the programmatic
//! constructors the driver and tests use to build trees.

pub mod ast;
pub mod attr;
pub mod types;

pub use ast::{
    Ast, BinaryOp, Import, IntrinsicKind, Linkage, LiteralKind, Node, NodeId, NodeKind, UnaryOp,
};
pub use attr::FuncAttrs;
pub use types::{Member, Param, StructDecl, StructId, Type, TypeId, TypeStore};
