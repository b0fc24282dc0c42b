//! The machine IR data model.
//!
//! An [`MirFunction`] mirrors an IR function: its blocks keep an origin
//! pointer into the IR, its instructions carry a 32-bit opcode, a virtual
//! register number and a small-buffer operand list, and its stack layout is
//! a list of [`FrameObject`]s whose offsets a backend assigns later.

use asterc_ir::{BlockId, FuncId, InstId, StaticId};
use asterc_util::define_idx;
use asterc_util::index_vec::IndexVec;
use smallvec::SmallVec;

define_idx!(MirFuncId);
define_idx!(MirBlockId);
define_idx!(MirInstId);

/// Boundary of the shared opcode and virtual register spaces.
///
/// Common opcodes and physical register numbers sit below this value;
/// architecture-specific opcodes and virtual registers sit at or above it.
pub const ARCH_START: u32 = 0x800;

/// Opcodes shared by every architecture
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum MirOp {
    Immediate = 0,
    Intrinsic,
    Call,
    Not,
    ZExt,
    SExt,
    Trunc,
    Bitcast,
    Copy,
    Load,
    Store,
    Return,
    Branch,
    CondBranch,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Sar,
    Shr,
    And,
    Or,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    StaticRef,
    FuncRef,
    Alloca,
    Phi,
    Register,
    Unreachable,
}

impl MirOp {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Decode a common opcode; `None` for architecture-specific values
    pub fn from_u32(op: u32) -> Option<MirOp> {
        use MirOp::*;
        const TABLE: &[MirOp] = &[
            Immediate, Intrinsic, Call, Not, ZExt, SExt, Trunc, Bitcast, Copy, Load, Store,
            Return, Branch, CondBranch, Add, Sub, Mul, Div, Mod, Shl, Sar, Shr, And, Or, Lt, Le,
            Gt, Ge, Eq, Ne, StaticRef, FuncRef, Alloca, Phi, Register, Unreachable,
        ];
        TABLE.get(op as usize).copied()
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            MirOp::Immediate => "m.immediate",
            MirOp::Intrinsic => "m.intrinsic",
            MirOp::Call => "m.call",
            MirOp::Not => "m.not",
            MirOp::ZExt => "m.zero_extend",
            MirOp::SExt => "m.sign_extend",
            MirOp::Trunc => "m.truncate",
            MirOp::Bitcast => "m.bitcast",
            MirOp::Copy => "m.copy",
            MirOp::Load => "m.load",
            MirOp::Store => "m.store",
            MirOp::Return => "m.return",
            MirOp::Branch => "m.branch",
            MirOp::CondBranch => "m.branch_conditional",
            MirOp::Add => "m.add",
            MirOp::Sub => "m.sub",
            MirOp::Mul => "m.mul",
            MirOp::Div => "m.div",
            MirOp::Mod => "m.mod",
            MirOp::Shl => "m.shl",
            MirOp::Sar => "m.sar",
            MirOp::Shr => "m.shr",
            MirOp::And => "m.and",
            MirOp::Or => "m.or",
            MirOp::Lt => "m.lt",
            MirOp::Le => "m.le",
            MirOp::Gt => "m.gt",
            MirOp::Ge => "m.ge",
            MirOp::Eq => "m.eq",
            MirOp::Ne => "m.ne",
            MirOp::StaticRef => "m.static_reference",
            MirOp::FuncRef => "m.function_reference",
            MirOp::Alloca => "m.alloca",
            MirOp::Phi => "m.phi",
            MirOp::Register => "m.register",
            MirOp::Unreachable => "m.unreachable",
        }
    }
}

/// One MIR operand
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MirOperand {
    None,
    Register {
        reg: u32,
        /// Value size in bytes
        size: u16,
        /// Whether this operand defines the register
        defining: bool,
    },
    Immediate(i64),
    Block(MirBlockId),
    Function(MirFuncId),
    Name(String),
    /// Reference to an IR static variable
    Static(StaticId),
    /// Index into the function's frame object list
    Local(u32),
    /// Instruction-selection pattern auxiliary: operand `operand` of pattern
    /// instruction `inst`
    OpRef { inst: u32, operand: u32 },
    /// Instruction-selection pattern auxiliary: pattern instruction index
    InstRef(u32),
}

/// A stack allocation in a function's frame.
///
/// `lowered` is used by later passes that rebuild the frame-object list;
/// `offset` is assigned by the architecture backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameObject {
    pub size: u64,
    pub lowered: Option<u32>,
    pub offset: Option<i64>,
}

/// One MIR instruction
#[derive(Clone, Debug)]
pub struct MirInst {
    /// Common opcode (< [`ARCH_START`]) or architecture opcode (>=)
    pub opcode: u32,
    /// Up to four operands inline, spilling to the heap beyond that
    pub operands: SmallVec<[MirOperand; 4]>,
    /// Virtual register (>= [`ARCH_START`]) or pinned physical register
    pub reg: u32,
    /// IR instruction this was translated from
    pub origin: Option<InstId>,
    /// Forward pointer to a replacement produced by a later pass
    pub lowered: Option<MirInstId>,
    /// Physical registers clobbered by this instruction
    pub clobbers: Vec<u32>,
    pub block: Option<MirBlockId>,
}

impl MirInst {
    pub fn add_op(&mut self, op: MirOperand) {
        assert!(
            !matches!(op, MirOperand::None),
            "refusing to add a none operand"
        );
        self.operands.push(op);
    }

    pub fn clear_ops(&mut self) {
        self.operands.clear();
    }

    pub fn get_op(&self, index: usize) -> &MirOperand {
        &self.operands[index]
    }
}

/// One MIR block
#[derive(Clone, Debug)]
pub struct MirBlock {
    pub name: String,
    /// IR block this mirrors; trampolines have none
    pub origin: Option<BlockId>,
    pub is_entry: bool,
    pub is_exit: bool,
    pub insts: Vec<MirInstId>,
    pub preds: Vec<MirBlockId>,
    pub succs: Vec<MirBlockId>,
}

/// One MIR function
pub struct MirFunction {
    /// Linkage name, copied from the IR function
    pub name: String,
    /// IR function this was translated from
    pub origin: FuncId,
    pub blocks: IndexVec<MirBlockId, MirBlock>,
    /// Instruction arena; ordering lives in the blocks
    pub insts: IndexVec<MirInstId, MirInst>,
    pub frame_objects: Vec<FrameObject>,
    /// Counter used to allocate virtual register numbers
    pub inst_count: u32,
}

impl MirFunction {
    pub fn new(name: impl Into<String>, origin: FuncId) -> Self {
        Self {
            name: name.into(),
            origin,
            blocks: IndexVec::new(),
            insts: IndexVec::new(),
            frame_objects: Vec::new(),
            inst_count: 0,
        }
    }

    /// Append a fresh block
    pub fn add_block(&mut self, name: impl Into<String>, origin: Option<BlockId>) -> MirBlockId {
        self.blocks.push(MirBlock {
            name: name.into(),
            origin,
            is_entry: false,
            is_exit: false,
            insts: Vec::new(),
            preds: Vec::new(),
            succs: Vec::new(),
        })
    }

    /// Create an instruction in the arena without placing it in a block
    pub fn make(&mut self, opcode: MirOp) -> MirInstId {
        self.make_raw(opcode.as_u32())
    }

    /// Create an instruction with a raw (possibly architecture) opcode
    pub fn make_raw(&mut self, opcode: u32) -> MirInstId {
        self.insts.push(MirInst {
            opcode,
            operands: SmallVec::new(),
            reg: 0,
            origin: None,
            lowered: None,
            clobbers: Vec::new(),
            block: None,
        })
    }

    /// Append an instruction to a block, assigning the next virtual register
    /// unless `pin` names a physical register to use verbatim.
    pub fn push_into_block(&mut self, block: MirBlockId, inst: MirInstId, pin: Option<u32>) {
        let reg = pin.unwrap_or(ARCH_START + self.inst_count);
        self.push_with_reg(block, inst, reg);
    }

    /// Append an instruction to a block with an explicit register number
    pub fn push_with_reg(&mut self, block: MirBlockId, inst: MirInstId, reg: u32) {
        self.blocks[block].insts.push(inst);
        self.insts[inst].block = Some(block);
        self.insts[inst].reg = reg;
        self.inst_count += 1;
    }

    /// Insert an instruction into a block at `index` with an explicit
    /// register number
    pub fn insert_at(&mut self, block: MirBlockId, index: usize, inst: MirInstId, reg: u32) {
        self.blocks[block].insts.insert(index, inst);
        self.insts[inst].block = Some(block);
        self.insts[inst].reg = reg;
        self.inst_count += 1;
    }

    /// Remove an instruction from its block. The arena slot stays; only the
    /// block ordering forgets it.
    pub fn remove_from_block(&mut self, inst: MirInstId) {
        let block = self.insts[inst]
            .block
            .expect("cannot remove an instruction that is in no block");
        let insts = &mut self.blocks[block].insts;
        let pos = insts
            .iter()
            .position(|&i| i == inst)
            .expect("instruction not present in its own block");
        insts.remove(pos);
        self.insts[inst].block = None;
    }

    /// Add a frame object and return its index
    pub fn add_frame_object(&mut self, size: u64) -> u32 {
        let index = self.frame_objects.len() as u32;
        self.frame_objects.push(FrameObject {
            size,
            lowered: None,
            offset: None,
        });
        index
    }

    /// Chase `lowered` forwarding pointers to the final replacement
    pub fn resolve_lowered(&self, mut inst: MirInstId) -> MirInstId {
        while let Some(next) = self.insts[inst].lowered {
            inst = next;
        }
        inst
    }

    /// Find the instruction currently assigned a virtual register
    pub fn find_by_vreg(&self, reg: u32) -> Option<MirInstId> {
        assert!(reg >= ARCH_START, "not a virtual register: {reg}");
        self.blocks
            .iter()
            .flat_map(|b| b.insts.iter().copied())
            .find(|&i| self.insts[i].reg == reg)
    }
}

/// The MIR for a whole compilation unit; functions parallel the IR's
/// function list index for index.
#[derive(Default)]
pub struct MirModule {
    pub functions: IndexVec<MirFuncId, MirFunction>,
}

impl MirModule {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asterc_util::index_vec::Idx;

    #[test]
    fn vregs_count_up_from_arch_start() {
        let mut f = MirFunction::new("f", FuncId::from_usize(0));
        let b = f.add_block("entry", None);
        let a = f.make(MirOp::Immediate);
        let c = f.make(MirOp::Copy);
        f.push_into_block(b, a, None);
        f.push_into_block(b, c, None);
        assert_eq!(f.insts[a].reg, ARCH_START);
        assert_eq!(f.insts[c].reg, ARCH_START + 1);
    }

    #[test]
    fn pinned_registers_are_used_verbatim() {
        let mut f = MirFunction::new("f", FuncId::from_usize(0));
        let b = f.add_block("entry", None);
        let i = f.make(MirOp::Copy);
        f.push_into_block(b, i, Some(5));
        assert_eq!(f.insts[i].reg, 5);
        assert!(f.insts[i].reg < ARCH_START);
    }

    #[test]
    fn operand_list_spills_past_four() {
        let mut f = MirFunction::new("f", FuncId::from_usize(0));
        let i = f.make(MirOp::Call);
        for n in 0..6 {
            f.insts[i].add_op(MirOperand::Immediate(n));
        }
        assert_eq!(f.insts[i].operands.len(), 6);
        assert_eq!(*f.insts[i].get_op(5), MirOperand::Immediate(5));
    }

    #[test]
    fn lowered_chain_resolves_transitively() {
        let mut f = MirFunction::new("f", FuncId::from_usize(0));
        let a = f.make(MirOp::Copy);
        let b = f.make(MirOp::Copy);
        let c = f.make(MirOp::Copy);
        f.insts[a].lowered = Some(b);
        f.insts[b].lowered = Some(c);
        assert_eq!(f.resolve_lowered(a), c);
        assert_eq!(f.resolve_lowered(c), c);
    }

    #[test]
    fn remove_from_block_keeps_order() {
        let mut f = MirFunction::new("f", FuncId::from_usize(0));
        let b = f.add_block("entry", None);
        let x = f.make(MirOp::Immediate);
        let y = f.make(MirOp::Copy);
        let z = f.make(MirOp::Return);
        f.push_into_block(b, x, None);
        f.push_into_block(b, y, None);
        f.push_into_block(b, z, None);
        f.remove_from_block(y);
        assert_eq!(f.blocks[b].insts, vec![x, z]);
        assert!(f.insts[y].block.is_none());
    }

    #[test]
    fn opcode_round_trip() {
        for op in [MirOp::Immediate, MirOp::Store, MirOp::Unreachable] {
            assert_eq!(MirOp::from_u32(op.as_u32()), Some(op));
        }
        assert_eq!(MirOp::from_u32(ARCH_START), None);
    }
}
