//! The abstract syntax tree handed to code generation.
//!
//! Nodes live in an arena on [`Ast`] and reference each other by [`NodeId`].
//! Every node carries its resolved type and source span; variable references
//! carry the id of the declaration they bind. The tree is immutable during
//! code generation; the IR builder keeps its per-node memoisation in side
//! tables of its own.

use crate::types::{StructId, TypeId, TypeStore};
use asterc_util::define_idx;
use asterc_util::index_vec::IndexVec;
use asterc_util::span::Span;

define_idx!(NodeId);

/// Binary operator tokens the code generator understands
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    /// `:=` assignment
    Assign,
    /// `[` subscript
    Subscript,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    BitAnd,
    BitOr,
}

/// Prefix unary operator tokens
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    /// `&` address-of
    AddrOf,
    /// `@` dereference
    Deref,
    /// `~` bitwise complement
    Compl,
}

/// Literal discriminator
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LiteralKind {
    /// Integer literal
    Number(i64),
    /// String literal; index into [`Ast::strings`]
    String(usize),
    /// Compound (array) literal with ordered children
    Compound(Vec<NodeId>),
}

/// The fixed intrinsic catalogue.
///
/// `Line` and `Filename` are resolved by the semantic analyser and never
/// reach code generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntrinsicKind {
    Syscall,
    Inline,
    DebugTrap,
    Memcpy,
    Line,
    Filename,
}

/// Linkage of a declaration or function
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Linkage {
    /// Function-local variable; lives on the stack
    LocalVar,
    /// Defined here and visible to other objects
    Exported,
    /// Defined elsewhere
    Imported,
    /// Imported and re-exported
    Reexported,
    /// Defined here, not visible outside the module
    Internal,
}

/// One node of the typed AST
#[derive(Clone, Debug)]
pub struct Node {
    pub kind: NodeKind,
    pub ty: TypeId,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub enum NodeKind {
    /// The compilation unit's top-level expression sequence
    Root { children: Vec<NodeId> },
    /// Braced expression sequence; yields its last child when non-void
    Block { children: Vec<NodeId> },
    /// Function definition or external declaration (no body)
    Function {
        name: String,
        /// Parameter declarations, one `Declaration` node per parameter
        params: Vec<NodeId>,
        body: Option<NodeId>,
        linkage: Linkage,
    },
    /// Variable declaration, optionally initialised
    Declaration {
        name: String,
        linkage: Linkage,
        init: Option<NodeId>,
    },
    /// Structure declaration; generates no code
    StructureDecl { decl: StructId },
    /// Reference to a declaration
    VariableReference { decl: NodeId },
    /// Reference to an imported module
    ModuleReference { module: String },
    /// Reference to a function by name, before resolution
    FunctionReference { name: String },
    /// `base.member`; `member` indexes the structure's member list
    MemberAccess { base: NodeId, member: usize },
    If {
        cond: NodeId,
        then_branch: NodeId,
        else_branch: Option<NodeId>,
    },
    While { cond: NodeId, body: NodeId },
    For {
        init: NodeId,
        cond: NodeId,
        iter: NodeId,
        body: NodeId,
    },
    Return { value: Option<NodeId> },
    Call { callee: NodeId, args: Vec<NodeId> },
    IntrinsicCall {
        kind: IntrinsicKind,
        args: Vec<NodeId>,
    },
    Cast { value: NodeId },
    Binary {
        op: BinaryOp,
        lhs: NodeId,
        rhs: NodeId,
    },
    Unary { op: UnaryOp, value: NodeId },
    Literal(LiteralKind),
}

/// An imported module with the declarations it exports
#[derive(Clone, Debug)]
pub struct Import {
    pub module: String,
    pub exports: Vec<NodeId>,
}

/// A complete compilation unit
pub struct Ast {
    pub nodes: IndexVec<NodeId, Node>,
    pub types: TypeStore,
    /// String literal table; literals index into this
    pub strings: Vec<String>,
    /// All function nodes in declaration order
    pub functions: Vec<NodeId>,
    pub imports: Vec<Import>,
    pub root: Option<NodeId>,
    pub filename: String,
    /// Whether this unit is a module (no `main` is synthesised for modules)
    pub is_module: bool,
    pub module_name: String,
}

impl Ast {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            nodes: IndexVec::new(),
            types: TypeStore::new(),
            strings: Vec::new(),
            functions: Vec::new(),
            imports: Vec::new(),
            root: None,
            filename: filename.into(),
            is_module: false,
            module_name: String::new(),
        }
    }

    /// Add a node to the arena
    pub fn add(&mut self, kind: NodeKind, ty: TypeId, span: Span) -> NodeId {
        self.nodes.push(Node { kind, ty, span })
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    /// Intern a string literal, returning its table index
    pub fn intern_string(&mut self, s: impl Into<String>) -> usize {
        let s = s.into();
        if let Some(idx) = self.strings.iter().position(|existing| *existing == s) {
            return idx;
        }
        self.strings.push(s);
        self.strings.len() - 1
    }

    /// Whether the node can be emitted as an lvalue
    pub fn is_lvalue(&self, id: NodeId) -> bool {
        match &self.nodes[id].kind {
            NodeKind::Declaration { .. }
            | NodeKind::MemberAccess { .. }
            | NodeKind::VariableReference { .. } => true,
            NodeKind::Unary { op, .. } => *op == UnaryOp::Deref,
            NodeKind::Cast { value } => self.is_lvalue(*value),
            _ => false,
        }
    }

    // Convenience constructors, used by the driver's entry synthesis and
    // throughout the test suites.

    /// Integer literal of the given type
    pub fn lit_int(&mut self, value: i64, ty: TypeId, span: Span) -> NodeId {
        self.add(NodeKind::Literal(LiteralKind::Number(value)), ty, span)
    }

    /// String literal; interns the text
    pub fn lit_str(&mut self, text: impl Into<String>, ty: TypeId, span: Span) -> NodeId {
        let index = self.intern_string(text);
        self.add(NodeKind::Literal(LiteralKind::String(index)), ty, span)
    }

    /// Local variable declaration
    pub fn local_decl(
        &mut self,
        name: impl Into<String>,
        ty: TypeId,
        init: Option<NodeId>,
        span: Span,
    ) -> NodeId {
        self.add(
            NodeKind::Declaration {
                name: name.into(),
                linkage: Linkage::LocalVar,
                init,
            },
            ty,
            span,
        )
    }

    /// Reference to a previously created declaration
    pub fn var_ref(&mut self, decl: NodeId, span: Span) -> NodeId {
        let ty = self.nodes[decl].ty;
        self.add(NodeKind::VariableReference { decl }, ty, span)
    }

    /// Binary expression
    pub fn binary(
        &mut self,
        op: BinaryOp,
        lhs: NodeId,
        rhs: NodeId,
        ty: TypeId,
        span: Span,
    ) -> NodeId {
        self.add(NodeKind::Binary { op, lhs, rhs }, ty, span)
    }

    /// Block expression
    pub fn block(&mut self, children: Vec<NodeId>, ty: TypeId, span: Span) -> NodeId {
        self.add(NodeKind::Block { children }, ty, span)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_string_deduplicates() {
        let mut ast = Ast::new("test.as");
        let a = ast.intern_string("hello");
        let b = ast.intern_string("world");
        let c = ast.intern_string("hello");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(ast.strings.len(), 2);
    }

    #[test]
    fn var_ref_copies_decl_type() {
        let mut ast = Ast::new("test.as");
        let ty = ast.types.integer;
        let decl = ast.local_decl("x", ty, None, Span::DUMMY);
        let vref = ast.var_ref(decl, Span::DUMMY);
        assert_eq!(ast.node(vref).ty, ty);
    }

    #[test]
    fn lvalue_classification() {
        let mut ast = Ast::new("test.as");
        let ty = ast.types.integer;
        let decl = ast.local_decl("x", ty, None, Span::DUMMY);
        let vref = ast.var_ref(decl, Span::DUMMY);
        let lit = ast.lit_int(1, ty, Span::DUMMY);
        let deref = ast.add(
            NodeKind::Unary {
                op: UnaryOp::Deref,
                value: vref,
            },
            ty,
            Span::DUMMY,
        );
        let cast_of_ref = ast.add(NodeKind::Cast { value: vref }, ty, Span::DUMMY);

        assert!(ast.is_lvalue(decl));
        assert!(ast.is_lvalue(vref));
        assert!(ast.is_lvalue(deref));
        assert!(ast.is_lvalue(cast_of_ref));
        assert!(!ast.is_lvalue(lit));
    }
}
