//! The SSA intermediate representation.
//!
//! Functions, blocks, instructions and static variables all live in arenas
//! on [`IrModule`] and reference each other by typed index. A block owns an
//! ordered list of instructions and is *closed* once its last instruction is
//! a terminator; insertion into a closed block is rejected. Every
//! value-producing instruction keeps a use list with one entry per operand
//! slot that references it, and functions keep the same for references made
//! by `FuncRef` instructions and direct calls.

use asterc_ast::{FuncAttrs, IntrinsicKind, Linkage, TypeId};
use asterc_util::define_idx;
use asterc_util::index_vec::IndexVec;
use asterc_util::Idx;
use asterc_util::span::Span;
use indexmap::IndexMap;

define_idx!(FuncId);
define_idx!(BlockId);
define_idx!(InstId);
define_idx!(StaticId);

/// One incoming value of a phi node
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhiArg {
    /// Predecessor block control arrives from
    pub block: BlockId,
    /// Value selected when control arrives from `block`
    pub value: InstId,
}

/// Target of a call instruction
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Callee {
    /// Direct call of an IR function
    Direct(FuncId),
    /// Indirect call through a value of pointer-to-function type
    Indirect(InstId),
}

/// Instruction kinds
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InstKind {
    // Constants
    Immediate(i64),
    /// Index into the compilation unit's string table; only appears as a
    /// static initialiser value
    InternedString(usize),

    // References
    StaticRef(StaticId),
    FuncRef(FuncId),
    /// Placeholder for the n-th incoming parameter; never lives in a block
    /// and must be lowered away before MIR translation
    Parameter(usize),
    /// Value pinned to a physical register by early lowering
    Register(u32),
    /// Stack allocation. `frame` is unset until the MIR translator assigns
    /// the index of the frame object backing it; it is written exactly once.
    Alloca { size: u64, frame: Option<u32> },

    // Memory
    Load { addr: InstId },
    Store { value: InstId, addr: InstId },

    // Conversions
    Bitcast { value: InstId },
    SExt { value: InstId },
    ZExt { value: InstId },
    Trunc { value: InstId },

    // Arithmetic and logic
    Add { lhs: InstId, rhs: InstId },
    Sub { lhs: InstId, rhs: InstId },
    Mul { lhs: InstId, rhs: InstId },
    Div { lhs: InstId, rhs: InstId },
    Mod { lhs: InstId, rhs: InstId },
    Shl { lhs: InstId, rhs: InstId },
    Sar { lhs: InstId, rhs: InstId },
    Shr { lhs: InstId, rhs: InstId },
    And { lhs: InstId, rhs: InstId },
    Or { lhs: InstId, rhs: InstId },
    Not { value: InstId },

    // Comparisons
    Lt { lhs: InstId, rhs: InstId },
    Le { lhs: InstId, rhs: InstId },
    Gt { lhs: InstId, rhs: InstId },
    Ge { lhs: InstId, rhs: InstId },
    Eq { lhs: InstId, rhs: InstId },
    Ne { lhs: InstId, rhs: InstId },

    // Control flow
    Branch { target: BlockId },
    CondBranch {
        cond: InstId,
        then_target: BlockId,
        else_target: BlockId,
    },
    Return { value: Option<InstId> },
    Unreachable,
    Phi { args: Vec<PhiArg> },

    // Calls
    Call {
        callee: Callee,
        args: Vec<InstId>,
        /// Set by the `inline` intrinsic; consumed by the mandatory
        /// inlining pass downstream of this crate
        force_inline: bool,
    },
    Intrinsic {
        kind: IntrinsicKind,
        args: Vec<InstId>,
    },

    // Misc
    Copy { value: InstId },
    /// Result of an invalid constant evaluation; refusing to generate code
    /// for this is an internal error guard, not a diagnostic
    Poison,
}

impl InstKind {
    /// Whether this instruction ends a block
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstKind::Branch { .. }
                | InstKind::CondBranch { .. }
                | InstKind::Return { .. }
                | InstKind::Unreachable
        )
    }

    /// Collect the instruction operands (value uses, not block targets)
    pub fn operands(&self) -> Vec<InstId> {
        match self {
            InstKind::Immediate(_)
            | InstKind::InternedString(_)
            | InstKind::StaticRef(_)
            | InstKind::FuncRef(_)
            | InstKind::Parameter(_)
            | InstKind::Register(_)
            | InstKind::Alloca { .. }
            | InstKind::Branch { .. }
            | InstKind::Unreachable
            | InstKind::Poison => Vec::new(),
            InstKind::Load { addr } => vec![*addr],
            InstKind::Store { value, addr } => vec![*value, *addr],
            InstKind::Bitcast { value }
            | InstKind::SExt { value }
            | InstKind::ZExt { value }
            | InstKind::Trunc { value }
            | InstKind::Not { value }
            | InstKind::Copy { value } => vec![*value],
            InstKind::Add { lhs, rhs }
            | InstKind::Sub { lhs, rhs }
            | InstKind::Mul { lhs, rhs }
            | InstKind::Div { lhs, rhs }
            | InstKind::Mod { lhs, rhs }
            | InstKind::Shl { lhs, rhs }
            | InstKind::Sar { lhs, rhs }
            | InstKind::Shr { lhs, rhs }
            | InstKind::And { lhs, rhs }
            | InstKind::Or { lhs, rhs }
            | InstKind::Lt { lhs, rhs }
            | InstKind::Le { lhs, rhs }
            | InstKind::Gt { lhs, rhs }
            | InstKind::Ge { lhs, rhs }
            | InstKind::Eq { lhs, rhs }
            | InstKind::Ne { lhs, rhs } => vec![*lhs, *rhs],
            InstKind::CondBranch { cond, .. } => vec![*cond],
            InstKind::Return { value } => value.iter().copied().collect(),
            InstKind::Phi { args } => args.iter().map(|a| a.value).collect(),
            InstKind::Call { callee, args, .. } => {
                let mut ops: Vec<InstId> = Vec::with_capacity(args.len() + 1);
                if let Callee::Indirect(inst) = callee {
                    ops.push(*inst);
                }
                ops.extend(args.iter().copied());
                ops
            }
            InstKind::Intrinsic { args, .. } => args.clone(),
        }
    }

    /// The function referenced by this instruction, if any
    pub fn referenced_func(&self) -> Option<FuncId> {
        match self {
            InstKind::FuncRef(f) => Some(*f),
            InstKind::Call {
                callee: Callee::Direct(f),
                ..
            } => Some(*f),
            _ => None,
        }
    }

    /// A short mnemonic for printing
    pub fn mnemonic(&self) -> &'static str {
        match self {
            InstKind::Immediate(_) => "immediate",
            InstKind::InternedString(_) => "interned-string",
            InstKind::StaticRef(_) => "static-ref",
            InstKind::FuncRef(_) => "func-ref",
            InstKind::Parameter(_) => "parameter",
            InstKind::Register(_) => "register",
            InstKind::Alloca { .. } => "alloca",
            InstKind::Load { .. } => "load",
            InstKind::Store { .. } => "store",
            InstKind::Bitcast { .. } => "bitcast",
            InstKind::SExt { .. } => "sext",
            InstKind::ZExt { .. } => "zext",
            InstKind::Trunc { .. } => "trunc",
            InstKind::Add { .. } => "add",
            InstKind::Sub { .. } => "sub",
            InstKind::Mul { .. } => "mul",
            InstKind::Div { .. } => "div",
            InstKind::Mod { .. } => "mod",
            InstKind::Shl { .. } => "shl",
            InstKind::Sar { .. } => "sar",
            InstKind::Shr { .. } => "shr",
            InstKind::And { .. } => "and",
            InstKind::Or { .. } => "or",
            InstKind::Not { .. } => "not",
            InstKind::Lt { .. } => "lt",
            InstKind::Le { .. } => "le",
            InstKind::Gt { .. } => "gt",
            InstKind::Ge { .. } => "ge",
            InstKind::Eq { .. } => "eq",
            InstKind::Ne { .. } => "ne",
            InstKind::Branch { .. } => "branch",
            InstKind::CondBranch { .. } => "branch-cond",
            InstKind::Return { .. } => "return",
            InstKind::Unreachable => "unreachable",
            InstKind::Phi { .. } => "phi",
            InstKind::Call { .. } => "call",
            InstKind::Intrinsic { .. } => "intrinsic",
            InstKind::Copy { .. } => "copy",
            InstKind::Poison => "poison",
        }
    }
}

/// One IR instruction
#[derive(Clone, Debug)]
pub struct Inst {
    pub kind: InstKind,
    /// Type of the produced value; void for pure side effects
    pub ty: TypeId,
    /// Owning block; `None` while the instruction is being built or when it
    /// never lives in a block (parameter placeholders)
    pub block: Option<BlockId>,
    pub span: Span,
    /// Instructions using this value, one entry per operand slot
    pub users: Vec<InstId>,
    /// Physical register this value is pinned to, set by early lowering
    pub reg: Option<u32>,
}

/// A basic block
#[derive(Clone, Debug)]
pub struct IrBlock {
    pub name: String,
    pub func: FuncId,
    pub insts: Vec<InstId>,
}

/// An IR function
#[derive(Clone, Debug)]
pub struct IrFunction {
    /// Source-level name; kept intact for diagnostics
    pub name: String,
    /// Mangled linkage name, filled in by the mangler
    pub mangled: Option<String>,
    /// Function type
    pub ty: TypeId,
    pub linkage: Linkage,
    pub attrs: FuncAttrs,
    /// Parameter placeholder instructions, one per declared parameter
    pub params: Vec<InstId>,
    /// Blocks in layout order; the first is the entry block
    pub blocks: Vec<BlockId>,
    /// False for functions declared but defined elsewhere
    pub is_definition: bool,
    pub span: Span,
    /// Instructions referencing this function
    pub users: Vec<InstId>,
}

impl IrFunction {
    pub fn entry_block(&self) -> BlockId {
        self.blocks[0]
    }

    /// The name the backend emits: the mangled name when present, the
    /// source name otherwise
    pub fn linkage_name(&self) -> &str {
        self.mangled.as_deref().unwrap_or(&self.name)
    }
}

/// Initial value of a static variable
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StaticInit {
    Int(i64),
    /// Index into the compilation unit's string table
    String(usize),
}

/// A static variable
#[derive(Clone, Debug)]
pub struct StaticVar {
    pub name: String,
    pub ty: TypeId,
    pub linkage: Linkage,
    pub init: Option<StaticInit>,
    pub span: Span,
}

/// The IR for one compilation unit
#[derive(Default)]
pub struct IrModule {
    pub funcs: IndexVec<FuncId, IrFunction>,
    pub blocks: IndexVec<BlockId, IrBlock>,
    pub insts: IndexVec<InstId, Inst>,
    pub statics: IndexVec<StaticId, StaticVar>,
    /// Static variables by name; names are globally unique in the module
    static_names: IndexMap<String, StaticId>,
}

impl IrModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inst(&self, id: InstId) -> &Inst {
        &self.insts[id]
    }

    pub fn block(&self, id: BlockId) -> &IrBlock {
        &self.blocks[id]
    }

    pub fn func(&self, id: FuncId) -> &IrFunction {
        &self.funcs[id]
    }

    pub fn static_var(&self, id: StaticId) -> &StaticVar {
        &self.statics[id]
    }

    /// Create a function together with its entry block and parameter
    /// placeholder instructions.
    pub fn create_function(
        &mut self,
        name: impl Into<String>,
        ty: TypeId,
        param_types: &[TypeId],
        linkage: Linkage,
        attrs: FuncAttrs,
        is_definition: bool,
        span: Span,
    ) -> FuncId {
        let func = self.funcs.next_index();
        let params = param_types
            .iter()
            .enumerate()
            .map(|(i, &pty)| {
                self.insts.push(Inst {
                    kind: InstKind::Parameter(i),
                    ty: pty,
                    block: None,
                    span,
                    users: Vec::new(),
                    reg: None,
                })
            })
            .collect();
        let entry = self.blocks.push(IrBlock {
            name: "entry".to_string(),
            func,
            insts: Vec::new(),
        });
        self.funcs.push(IrFunction {
            name: name.into(),
            mangled: None,
            ty,
            linkage,
            attrs,
            params,
            blocks: vec![entry],
            is_definition,
            span,
            users: Vec::new(),
        })
    }

    /// Append a fresh empty block to a function
    pub fn create_block(&mut self, func: FuncId) -> BlockId {
        let name = format!("bb{}", self.funcs[func].blocks.len());
        let block = self.blocks.push(IrBlock {
            name,
            func,
            insts: Vec::new(),
        });
        self.funcs[func].blocks.push(block);
        block
    }

    /// Create a static variable. Names must be unique within the module.
    pub fn create_static(&mut self, var: StaticVar) -> StaticId {
        assert!(
            !self.static_names.contains_key(&var.name),
            "duplicate static variable name '{}'",
            var.name
        );
        let name = var.name.clone();
        let id = self.statics.push(var);
        self.static_names.insert(name, id);
        id
    }

    pub fn set_static_init(&mut self, var: StaticId, init: StaticInit) {
        self.statics[var].init = Some(init);
    }

    /// Whether a block ends in a terminator
    pub fn is_closed(&self, block: BlockId) -> bool {
        self.blocks[block]
            .insts
            .last()
            .is_some_and(|&last| self.insts[last].kind.is_terminator())
    }

    /// The terminator of a block, if it has one
    pub fn terminator(&self, block: BlockId) -> Option<InstId> {
        let &last = self.blocks[block].insts.last()?;
        self.insts[last].kind.is_terminator().then_some(last)
    }

    /// Create an instruction without inserting it into a block.
    ///
    /// Use counts of its operands (and of any referenced function) are
    /// registered here.
    pub fn make(&mut self, kind: InstKind, ty: TypeId, span: Span) -> InstId {
        let id = self.insts.next_index();
        for operand in kind.operands() {
            self.insts[operand].users.push(id);
        }
        if let Some(func) = kind.referenced_func() {
            self.funcs[func].users.push(id);
        }
        self.insts.push(Inst {
            kind,
            ty,
            block: None,
            span,
            users: Vec::new(),
            reg: None,
        })
    }

    /// Insert a previously created instruction at the end of a block.
    ///
    /// Panics if the block is already closed.
    pub fn insert_into(&mut self, block: BlockId, inst: InstId) {
        assert!(
            !self.is_closed(block),
            "inserting into closed block '{}'",
            self.blocks[block].name
        );
        self.blocks[block].insts.push(inst);
        self.insts[inst].block = Some(block);
    }

    /// Create an instruction and insert it at the end of a block
    pub fn insert_new(
        &mut self,
        block: BlockId,
        kind: InstKind,
        ty: TypeId,
        span: Span,
    ) -> InstId {
        let inst = self.make(kind, ty, span);
        self.insert_into(block, inst);
        inst
    }

    /// Add an incoming (block, value) pair to a phi
    pub fn phi_add_arg(&mut self, phi: InstId, block: BlockId, value: InstId) {
        self.insts[value].users.push(phi);
        match &mut self.insts[phi].kind {
            InstKind::Phi { args } => args.push(PhiArg { block, value }),
            other => panic!("phi_add_arg on non-phi instruction {other:?}"),
        }
    }

    /// Append an argument to a call or intrinsic instruction
    pub fn call_add_arg(&mut self, call: InstId, value: InstId) {
        self.insts[value].users.push(call);
        match &mut self.insts[call].kind {
            InstKind::Call { args, .. } | InstKind::Intrinsic { args, .. } => args.push(value),
            other => panic!("call_add_arg on non-call instruction {other:?}"),
        }
    }

    /// Mark a call for mandatory inlining
    pub fn set_force_inline(&mut self, call: InstId) {
        match &mut self.insts[call].kind {
            InstKind::Call { force_inline, .. } => *force_inline = true,
            other => panic!("set_force_inline on non-call instruction {other:?}"),
        }
    }

    /// Overwrite the produced type of an instruction
    pub fn set_type(&mut self, inst: InstId, ty: TypeId) {
        self.insts[inst].ty = ty;
    }

    /// Pin an instruction's value to a physical register. Used by
    /// architecture early lowering; operands referencing the instruction
    /// then inline the register number directly.
    pub fn set_reg(&mut self, inst: InstId, reg: u32) {
        self.insts[inst].reg = Some(reg);
    }

    /// Record the frame object index backing an alloca. Written exactly once.
    pub fn set_alloca_frame(&mut self, inst: InstId, index: u32) {
        match &mut self.insts[inst].kind {
            InstKind::Alloca { frame, .. } => {
                assert!(frame.is_none(), "alloca frame index assigned twice");
                *frame = Some(index);
            }
            other => panic!("set_alloca_frame on non-alloca instruction {other:?}"),
        }
    }

    /// Verify that every instruction's recorded use list matches the operand
    /// slots referencing it. Used by tests and debug assertions.
    pub fn assert_use_counts(&self) {
        let mut counts: Vec<usize> = vec![0; self.insts.len()];
        for (_, inst) in self.insts.iter_enumerated() {
            for operand in inst.kind.operands() {
                counts[operand.index()] += 1;
            }
        }
        for (id, inst) in self.insts.iter_enumerated() {
            assert_eq!(
                inst.users.len(),
                counts[id.index()],
                "use count mismatch for %{}",
                id.0
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asterc_ast::TypeStore;

    fn test_func(module: &mut IrModule, types: &TypeStore) -> FuncId {
        let ty = types.integer;
        module.create_function("f", ty, &[], Linkage::Internal, FuncAttrs::empty(), true, Span::DUMMY)
    }

    #[test]
    fn entry_block_is_first() {
        let types = TypeStore::new();
        let mut module = IrModule::new();
        let f = test_func(&mut module, &types);
        let entry = module.func(f).entry_block();
        let second = module.create_block(f);
        assert_eq!(module.func(f).blocks, vec![entry, second]);
    }

    #[test]
    fn block_closes_on_terminator() {
        let types = TypeStore::new();
        let mut module = IrModule::new();
        let f = test_func(&mut module, &types);
        let entry = module.func(f).entry_block();
        assert!(!module.is_closed(entry));
        module.insert_new(entry, InstKind::Return { value: None }, types.void, Span::DUMMY);
        assert!(module.is_closed(entry));
    }

    #[test]
    #[should_panic(expected = "closed block")]
    fn insertion_into_closed_block_is_rejected() {
        let types = TypeStore::new();
        let mut module = IrModule::new();
        let f = test_func(&mut module, &types);
        let entry = module.func(f).entry_block();
        module.insert_new(entry, InstKind::Unreachable, types.void, Span::DUMMY);
        module.insert_new(entry, InstKind::Immediate(1), types.integer, Span::DUMMY);
    }

    #[test]
    fn operand_uses_are_recorded() {
        let types = TypeStore::new();
        let mut module = IrModule::new();
        let f = test_func(&mut module, &types);
        let entry = module.func(f).entry_block();
        let a = module.insert_new(entry, InstKind::Immediate(1), types.integer, Span::DUMMY);
        let b = module.insert_new(entry, InstKind::Immediate(2), types.integer, Span::DUMMY);
        let sum = module.insert_new(
            entry,
            InstKind::Add { lhs: a, rhs: b },
            types.integer,
            Span::DUMMY,
        );
        assert_eq!(module.inst(a).users, vec![sum]);
        assert_eq!(module.inst(b).users, vec![sum]);
        module.assert_use_counts();
    }

    #[test]
    fn function_uses_are_recorded() {
        let types = TypeStore::new();
        let mut module = IrModule::new();
        let f = test_func(&mut module, &types);
        let g = test_func(&mut module, &types);
        let entry = module.func(f).entry_block();
        let fref = module.insert_new(entry, InstKind::FuncRef(g), types.integer, Span::DUMMY);
        assert_eq!(module.func(g).users, vec![fref]);
    }

    #[test]
    #[should_panic(expected = "duplicate static")]
    fn duplicate_static_names_are_rejected() {
        let types = TypeStore::new();
        let mut module = IrModule::new();
        let var = StaticVar {
            name: "g".to_string(),
            ty: types.integer,
            linkage: Linkage::Internal,
            init: None,
            span: Span::DUMMY,
        };
        module.create_static(var.clone());
        module.create_static(var);
    }

    #[test]
    #[should_panic(expected = "assigned twice")]
    fn alloca_frame_written_once() {
        let types = TypeStore::new();
        let mut module = IrModule::new();
        let f = test_func(&mut module, &types);
        let entry = module.func(f).entry_block();
        let alloca = module.insert_new(
            entry,
            InstKind::Alloca { size: 8, frame: None },
            types.integer,
            Span::DUMMY,
        );
        module.set_alloca_frame(alloca, 0);
        module.set_alloca_frame(alloca, 1);
    }
}
