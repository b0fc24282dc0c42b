//! The codegen context: root resource of a single compilation.
//!
//! The context owns the AST (and with it the type store), the IR module
//! under construction, the current insertion point, the per-node memoisation
//! side tables and every per-translation counter. Dropping the context
//! releases the whole compilation. The core is single-threaded; nothing in
//! here is shared across threads.

use crate::ir::{BlockId, FuncId, InstId, InstKind, IrModule, StaticId, StaticInit, StaticVar};
use crate::target::TargetDesc;
use asterc_ast::{Ast, Linkage, NodeId, TypeId};
use asterc_util::diagnostic::Handler;
use asterc_util::span::Span;
use asterc_util::{FxHashMap, FxHashSet};

pub struct CodegenContext<'a> {
    /// The compilation unit being lowered
    pub ast: Ast,
    pub target: TargetDesc,
    pub module: IrModule,
    pub handler: &'a Handler,

    /// The synthesised entry function (`main` or the module entry)
    pub entry: Option<FuncId>,
    /// Function currently being emitted into
    pub func: Option<FuncId>,
    /// Current insertion point; a single mutable handle
    pub insert_point: Option<BlockId>,

    /// IR function created for each AST function node
    pub func_irs: FxHashMap<NodeId, FuncId>,
    /// Nodes that have been rvalue-emitted (whether or not they produced a
    /// value)
    pub emitted: FxHashSet<NodeId>,
    /// Value instruction produced for a node
    pub values: FxHashMap<NodeId, InstId>,
    /// Address instruction produced for a node
    pub addresses: FxHashMap<NodeId, InstId>,

    /// Name counter for anonymous string-literal statics
    pub string_literal_count: usize,
    /// Disambiguation counter for anonymous structs during mangling
    pub anon_struct_count: usize,
}

impl<'a> CodegenContext<'a> {
    pub fn new(ast: Ast, target: TargetDesc, handler: &'a Handler) -> Self {
        Self {
            ast,
            target,
            module: IrModule::new(),
            handler,
            entry: None,
            func: None,
            insert_point: None,
            func_irs: FxHashMap::default(),
            emitted: FxHashSet::default(),
            values: FxHashMap::default(),
            addresses: FxHashMap::default(),
            string_literal_count: 0,
            anon_struct_count: 0,
        }
    }

    /// Whether a fatal diagnostic has been reported
    pub fn has_errors(&self) -> bool {
        self.handler.has_errors()
    }

    /// Create a new block in the current function
    pub fn block(&mut self) -> BlockId {
        let func = self.func.expect("no current function");
        self.module.create_block(func)
    }

    /// Make `block` the current insertion point
    pub fn attach(&mut self, block: BlockId) {
        self.insert_point = Some(block);
    }

    /// Whether the current insertion point is closed
    pub fn is_closed(&self) -> bool {
        let block = self.insert_point.expect("no insertion point");
        self.module.is_closed(block)
    }

    /// Create an instruction and insert it at the insertion point
    pub fn insert(&mut self, kind: InstKind, ty: TypeId, span: Span) -> InstId {
        let block = self.insert_point.expect("no insertion point");
        self.module.insert_new(block, kind, ty, span)
    }

    /// Insert a previously created instruction at the insertion point
    pub fn insert_existing(&mut self, inst: InstId) {
        let block = self.insert_point.expect("no insertion point");
        self.module.insert_into(block, inst);
    }

    /// Insert an alloca; its produced type is pointer-to-allocated-type
    pub fn insert_alloca(&mut self, allocated: TypeId, span: Span) -> InstId {
        let size = self.ast.types.size_of(allocated);
        let ty = self.ast.types.pointer_to(allocated);
        self.insert(InstKind::Alloca { size, frame: None }, ty, span)
    }

    /// Create a static variable, enforcing globally unique names
    pub fn create_static(
        &mut self,
        name: impl Into<String>,
        ty: TypeId,
        linkage: Linkage,
        span: Span,
    ) -> StaticId {
        self.module.create_static(StaticVar {
            name: name.into(),
            ty,
            linkage,
            init: None,
            span,
        })
    }

    /// Create a static for an anonymous string literal, naming it with the
    /// per-context counter
    pub fn create_string_static(&mut self, ty: TypeId, span: Span) -> StaticId {
        let name = format!("__str_lit{}", self.string_literal_count);
        self.string_literal_count += 1;
        self.create_static(name, ty, Linkage::Internal, span)
    }

    pub fn set_static_init(&mut self, var: StaticId, init: StaticInit) {
        self.module.set_static_init(var, init);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{Arch, CallConv, Language, TargetFormat};
    use asterc_ast::Ast;

    fn test_target() -> TargetDesc {
        TargetDesc {
            language: Language::Aster,
            arch: Arch::X86_64,
            format: TargetFormat::Native,
            call_conv: CallConv::SysV,
        }
    }

    #[test]
    fn string_statics_get_fresh_names() {
        let handler = Handler::new();
        let ast = Ast::new("test.as");
        let mut ctx = CodegenContext::new(ast, test_target(), &handler);
        let ty = ctx.ast.types.byte;
        let a = ctx.create_string_static(ty, Span::DUMMY);
        let b = ctx.create_string_static(ty, Span::DUMMY);
        assert_eq!(ctx.module.static_var(a).name, "__str_lit0");
        assert_eq!(ctx.module.static_var(b).name, "__str_lit1");
    }

    #[test]
    fn counters_reset_per_context() {
        let handler = Handler::new();
        let ctx = CodegenContext::new(Ast::new("a.as"), test_target(), &handler);
        assert_eq!(ctx.string_literal_count, 0);
        assert_eq!(ctx.anon_struct_count, 0);
        drop(ctx);
        let ctx2 = CodegenContext::new(Ast::new("b.as"), test_target(), &handler);
        assert_eq!(ctx2.string_literal_count, 0);
    }
}
