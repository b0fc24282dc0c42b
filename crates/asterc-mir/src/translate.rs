//! IR to MIR translation.
//!
//! Each IR function is mirrored structurally first (every function, then
//! every block, so forward references resolve), then filled one instruction
//! at a time. Constant producers (`Immediate`, `FuncRef`) are materialised
//! as MIR instructions so phi lowering can refer to them by position, and
//! swept away once every phi is gone; their uses are inlined directly into
//! operands. Phi nodes themselves are rewritten into copies, with a
//! trampoline block inserted whenever a copy would land on a critical edge.

use crate::mir::{
    MirBlockId, MirFunction, MirInstId, MirModule, MirOp, MirOperand, MirFuncId,
};
use asterc_ir::{
    BlockId, Callee, CodegenContext, FuncId, InstId, InstKind, IrModule, PhiArg,
};
use asterc_ast::{IntrinsicKind, TypeStore};
use asterc_util::index_vec::Idx;
use asterc_util::FxHashMap;
use tracing::debug;

/// Encoding of the intrinsic catalogue as the first immediate operand of an
/// `m.intrinsic` instruction.
pub fn intrinsic_code(kind: IntrinsicKind) -> i64 {
    match kind {
        IntrinsicKind::Syscall => 0,
        IntrinsicKind::Inline => 1,
        IntrinsicKind::DebugTrap => 2,
        IntrinsicKind::Memcpy => 3,
        IntrinsicKind::Line => 4,
        IntrinsicKind::Filename => 5,
    }
}

/// Translate every IR function in the context to MIR.
pub fn mir_from_ir(ctx: &mut CodegenContext) -> MirModule {
    let mut module = MirModule::new();

    // Mirror every function and block first; calls and branches need the
    // targets to exist before any instruction is translated.
    let mut block_maps: Vec<FxHashMap<BlockId, MirBlockId>> = Vec::new();
    for (f, func) in ctx.module.funcs.iter_enumerated() {
        let mut mir_func = MirFunction::new(func.linkage_name(), f);
        let mut block_map = FxHashMap::default();
        for &b in &func.blocks {
            let mb = mir_func.add_block(ctx.module.block(b).name.clone(), Some(b));
            block_map.insert(b, mb);
        }
        module.functions.push(mir_func);
        block_maps.push(block_map);
    }

    for (f, block_map) in block_maps.iter().enumerate() {
        let f = FuncId::from_usize(f);
        if !ctx.module.func(f).is_definition {
            continue;
        }
        let mir_f = MirFuncId::from_usize(f.index());
        debug!(func = %module.functions[mir_f].name, "translating to MIR");

        let mut translation = FuncTranslation {
            ir: &mut ctx.module,
            types: &ctx.ast.types,
            func: &mut module.functions[mir_f],
            block_map,
            inst_map: FxHashMap::default(),
        };
        translation.run(f);
    }

    module
}

struct FuncTranslation<'a> {
    ir: &'a mut IrModule,
    types: &'a TypeStore,
    func: &'a mut MirFunction,
    block_map: &'a FxHashMap<BlockId, MirBlockId>,
    inst_map: FxHashMap<InstId, MirInstId>,
}

impl<'a> FuncTranslation<'a> {
    fn run(&mut self, f: FuncId) {
        // The first block is the entry point.
        let entry = self.block_map[&self.ir.func(f).entry_block()];
        self.func.blocks[entry].is_entry = true;

        let blocks = self.ir.func(f).blocks.clone();
        for b in blocks {
            let mir_block = self.block_map[&b];
            let insts = self.ir.block(b).insts.clone();
            for inst in insts {
                self.translate_inst(inst, mir_block);
            }
        }

        self.phi_to_copy();
        self.remove_inlined();
    }

    /// Construct an operand referencing an IR value, inlining constants,
    /// frame objects, statics and function references directly.
    fn op_from_ir(&mut self, inst: InstId) -> MirOperand {
        // Values pinned to a physical register flow through as that
        // register, whatever the instruction is.
        if let Some(reg) = self.ir.inst(inst).reg {
            return MirOperand::Register {
                reg,
                size: self.types.size_of(self.ir.inst(inst).ty) as u16,
                defining: false,
            };
        }

        match self.ir.inst(inst).kind {
            InstKind::Immediate(value) => MirOperand::Immediate(value),
            InstKind::Alloca { .. } => MirOperand::Local(self.local_ref(inst)),
            InstKind::StaticRef(var) => MirOperand::Static(var),
            InstKind::FuncRef(func) => MirOperand::Function(MirFuncId::from_usize(func.index())),
            _ => {
                let mir = *self
                    .inst_map
                    .get(&inst)
                    .unwrap_or_else(|| panic!("IR %{} used before it was translated to MIR", inst.0));
                let mir = self.func.resolve_lowered(mir);
                MirOperand::Register {
                    reg: self.func.insts[mir].reg,
                    size: self.types.size_of(self.ir.inst(inst).ty) as u16,
                    defining: false,
                }
            }
        }
    }

    /// Frame object index backing an alloca, creating the frame object on
    /// first reference and writing the alloca's offset field exactly once.
    fn local_ref(&mut self, alloca: InstId) -> u32 {
        let InstKind::Alloca { size, frame } = self.ir.inst(alloca).kind else {
            panic!("local_ref on non-alloca instruction");
        };
        if let Some(index) = frame {
            return index;
        }
        let index = self.func.add_frame_object(size);
        self.ir.set_alloca_frame(alloca, index);
        index
    }

    /// Virtual-register pin inherited from the origin IR instruction
    fn pin_of(&self, inst: InstId) -> Option<u32> {
        self.ir.inst(inst).reg
    }

    fn translate_inst(&mut self, inst: InstId, block: MirBlockId) {
        let kind = self.ir.inst(inst).kind.clone();
        let pin = self.pin_of(inst);
        match kind {
            InstKind::Poison => panic!("refusing to translate poison value"),

            // Materialised only so phis can refer to them; removed after
            // phi lowering.
            InstKind::Immediate(_) => {
                let mir = self.func.make(MirOp::Immediate);
                self.func.insts[mir].origin = Some(inst);
                self.inst_map.insert(inst, mir);
                self.func.push_into_block(block, mir, pin);
            }
            InstKind::FuncRef(_) => {
                let mir = self.func.make(MirOp::FuncRef);
                self.inst_map.insert(inst, mir);
                self.func.insts[mir].origin = Some(inst);
                let op = self.op_from_ir(inst);
                self.func.insts[mir].add_op(op);
                self.func.push_into_block(block, mir, pin);
            }

            // Pre-pinned values need no instruction of their own; the
            // register number flows into operands directly.
            InstKind::Register(_) => {}

            InstKind::Phi { .. } => {
                let mir = self.func.make(MirOp::Phi);
                self.func.insts[mir].origin = Some(inst);
                self.inst_map.insert(inst, mir);
                self.func.push_into_block(block, mir, pin);
            }

            InstKind::Intrinsic { kind, ref args } => {
                let mir = self.func.make(MirOp::Intrinsic);
                self.func.insts[mir].origin = Some(inst);
                self.inst_map.insert(inst, mir);
                self.func.insts[mir].add_op(MirOperand::Immediate(intrinsic_code(kind)));
                for &arg in args {
                    let op = self.op_from_ir(arg);
                    self.func.insts[mir].add_op(op);
                }
                self.func.push_into_block(block, mir, pin);
            }

            InstKind::Call {
                callee, ref args, ..
            } => {
                let mir = self.func.make(MirOp::Call);
                self.func.insts[mir].origin = Some(inst);
                self.inst_map.insert(inst, mir);
                let target = match callee {
                    Callee::Direct(f) => MirOperand::Function(MirFuncId::from_usize(f.index())),
                    Callee::Indirect(value) => self.op_from_ir(value),
                };
                self.func.insts[mir].add_op(target);
                for &arg in args {
                    let op = self.op_from_ir(arg);
                    self.func.insts[mir].add_op(op);
                }
                self.func.push_into_block(block, mir, pin);
            }

            InstKind::Load { addr } => {
                let mir = self.func.make(MirOp::Load);
                self.func.insts[mir].origin = Some(inst);
                let addr_op = self.op_from_ir(addr);
                let needs_size = matches!(addr_op, MirOperand::Register { .. });
                self.func.insts[mir].add_op(addr_op);
                if needs_size {
                    let size = self.types.size_of(self.ir.inst(inst).ty) as i64;
                    self.func.insts[mir].add_op(MirOperand::Immediate(size));
                }
                self.inst_map.insert(inst, mir);
                self.func.push_into_block(block, mir, pin);
            }

            InstKind::Store { value, addr } => {
                let mir = self.func.make(MirOp::Store);
                self.func.insts[mir].origin = Some(inst);
                let value_op = self.op_from_ir(value);
                let addr_op = self.op_from_ir(addr);
                let needs_size = matches!(addr_op, MirOperand::Register { .. })
                    && matches!(value_op, MirOperand::Immediate(_));
                self.func.insts[mir].add_op(value_op);
                self.func.insts[mir].add_op(addr_op);
                if needs_size {
                    let size = self.types.size_of(self.ir.inst(value).ty) as i64;
                    self.func.insts[mir].add_op(MirOperand::Immediate(size));
                }
                self.inst_map.insert(inst, mir);
                self.func.push_into_block(block, mir, pin);
            }

            InstKind::Not { value } | InstKind::Bitcast { value } => {
                let opcode = if matches!(kind, InstKind::Not { .. }) {
                    MirOp::Not
                } else {
                    MirOp::Bitcast
                };
                let mir = self.func.make(opcode);
                self.func.insts[mir].origin = Some(inst);
                let op = self.op_from_ir(value);
                self.func.insts[mir].add_op(op);
                self.inst_map.insert(inst, mir);
                self.func.push_into_block(block, mir, pin);
            }

            InstKind::ZExt { value } | InstKind::SExt { value } | InstKind::Trunc { value } => {
                let opcode = match kind {
                    InstKind::ZExt { .. } => MirOp::ZExt,
                    InstKind::SExt { .. } => MirOp::SExt,
                    _ => MirOp::Trunc,
                };
                let mir = self.func.make(opcode);
                self.func.insts[mir].origin = Some(inst);
                let op = self.op_from_ir(value);
                self.func.insts[mir].add_op(op);
                // Source width, then destination width, in bytes.
                let from = self.types.size_of(self.ir.inst(value).ty) as i64;
                let to = self.types.size_of(self.ir.inst(inst).ty) as i64;
                self.func.insts[mir].add_op(MirOperand::Immediate(from));
                self.func.insts[mir].add_op(MirOperand::Immediate(to));
                self.inst_map.insert(inst, mir);
                self.func.push_into_block(block, mir, pin);
            }

            InstKind::Copy { value } => {
                let mir = self.func.make(MirOp::Copy);
                self.func.insts[mir].origin = Some(inst);
                let op = self.op_from_ir(value);
                self.func.insts[mir].add_op(op);
                self.inst_map.insert(inst, mir);
                self.func.push_into_block(block, mir, pin);
            }

            InstKind::Return { value } => {
                let mir = self.func.make(MirOp::Return);
                self.func.insts[mir].origin = Some(inst);
                if let Some(value) = value {
                    let op = self.op_from_ir(value);
                    self.func.insts[mir].add_op(op);
                }
                self.inst_map.insert(inst, mir);
                self.func.push_into_block(block, mir, pin);
                self.func.blocks[block].is_exit = true;
            }

            InstKind::Branch { target } => {
                let mir = self.func.make(MirOp::Branch);
                self.func.insts[mir].origin = Some(inst);
                let dest = self.block_map[&target];
                self.func.insts[mir].add_op(MirOperand::Block(dest));
                self.inst_map.insert(inst, mir);
                self.func.push_into_block(block, mir, pin);
                self.func.blocks[block].succs.push(dest);
                self.func.blocks[dest].preds.push(block);
            }

            InstKind::CondBranch {
                cond,
                then_target,
                else_target,
            } => {
                let mir = self.func.make(MirOp::CondBranch);
                self.func.insts[mir].origin = Some(inst);
                let then_b = self.block_map[&then_target];
                let else_b = self.block_map[&else_target];
                let cond_op = self.op_from_ir(cond);
                self.func.insts[mir].add_op(cond_op);
                self.func.insts[mir].add_op(MirOperand::Block(then_b));
                self.func.insts[mir].add_op(MirOperand::Block(else_b));
                self.inst_map.insert(inst, mir);
                self.func.push_into_block(block, mir, pin);
                self.func.blocks[block].succs.push(then_b);
                self.func.blocks[block].succs.push(else_b);
                self.func.blocks[then_b].preds.push(block);
                self.func.blocks[else_b].preds.push(block);
            }

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
            | InstKind::Ne { lhs, rhs } => {
                let opcode = binary_opcode(&kind);
                let mir = self.func.make(opcode);
                self.func.insts[mir].origin = Some(inst);
                let lhs_op = self.op_from_ir(lhs);
                let rhs_op = self.op_from_ir(rhs);
                self.func.insts[mir].add_op(lhs_op);
                self.func.insts[mir].add_op(rhs_op);
                self.inst_map.insert(inst, mir);
                self.func.push_into_block(block, mir, pin);
            }

            InstKind::StaticRef(_) => {
                let mir = self.func.make(MirOp::StaticRef);
                self.inst_map.insert(inst, mir);
                self.func.insts[mir].origin = Some(inst);
                let op = self.op_from_ir(inst);
                self.func.insts[mir].add_op(op);
                self.func.push_into_block(block, mir, pin);
            }

            InstKind::Alloca { .. } => {
                let mir = self.func.make(MirOp::Alloca);
                self.func.insts[mir].origin = Some(inst);
                let index = self.local_ref(inst);
                self.func.insts[mir].add_op(MirOperand::Local(index));
                self.inst_map.insert(inst, mir);
                self.func.push_into_block(block, mir, pin);
            }

            InstKind::Unreachable => {
                let mir = self.func.make(MirOp::Unreachable);
                self.func.insts[mir].origin = Some(inst);
                self.inst_map.insert(inst, mir);
                self.func.push_into_block(block, mir, pin);
                self.func.blocks[block].is_exit = true;
            }

            InstKind::Parameter(_) => {
                panic!("unlowered parameter instruction reached MIR translation")
            }
            InstKind::InternedString(_) => {
                panic!("interned string literal outside a static initialiser")
            }
        }
    }

    /// Whether an IR value will occupy a register once translated, and may
    /// therefore be copied into a phi's register.
    fn needs_register(&self, inst: InstId) -> bool {
        match self.ir.inst(inst).kind {
            InstKind::Load { .. }
            | InstKind::Phi { .. }
            | InstKind::Copy { .. }
            | InstKind::Immediate(_)
            | InstKind::Intrinsic { .. }
            | InstKind::Call { .. }
            | InstKind::Register(_)
            | InstKind::Not { .. }
            | InstKind::ZExt { .. }
            | InstKind::SExt { .. }
            | InstKind::Trunc { .. }
            | InstKind::Bitcast { .. }
            | InstKind::Add { .. }
            | InstKind::Sub { .. }
            | InstKind::Mul { .. }
            | InstKind::Div { .. }
            | InstKind::Mod { .. }
            | InstKind::Shl { .. }
            | InstKind::Sar { .. }
            | InstKind::Shr { .. }
            | InstKind::And { .. }
            | InstKind::Or { .. }
            | InstKind::Lt { .. }
            | InstKind::Le { .. }
            | InstKind::Gt { .. }
            | InstKind::Ge { .. }
            | InstKind::Eq { .. }
            | InstKind::Ne { .. } => true,

            InstKind::Poison => panic!("refusing to translate poison value"),
            InstKind::Parameter(_) => panic!("unlowered parameter instruction"),

            // Addresses need a register only when actually used.
            InstKind::Alloca { .. } | InstKind::StaticRef(_) | InstKind::FuncRef(_) => {
                !self.ir.inst(inst).users.is_empty()
            }

            _ => false,
        }
    }

    /// Rewrite every phi into copies of its arguments into the phi's
    /// virtual register.
    fn phi_to_copy(&mut self) {
        let mut last_phi_block: Option<BlockId> = None;
        for block in self.func.blocks.indices().collect::<Vec<_>>() {
            let insts = self.func.blocks[block].insts.clone();
            for mir_phi in insts {
                if self.func.insts[mir_phi].opcode != MirOp::Phi.as_u32() {
                    continue;
                }
                let phi = self.func.insts[mir_phi]
                    .origin
                    .expect("phi instruction with no IR origin");
                let phi_ir_block = self.ir.inst(phi).block.expect("phi outside a block");
                assert!(
                    last_phi_block != Some(phi_ir_block),
                    "multiple phi instructions in a single block are not allowed"
                );
                last_phi_block = Some(phi_ir_block);

                let args: Vec<PhiArg> = match &self.ir.inst(phi).kind {
                    InstKind::Phi { args } => args.clone(),
                    _ => unreachable!(),
                };

                // A phi with a single argument is just a copy.
                if args.len() == 1 {
                    let op = self.op_from_ir(args[0].value);
                    let inst = &mut self.func.insts[mir_phi];
                    inst.opcode = MirOp::Copy.as_u32();
                    inst.clear_ops();
                    inst.add_op(op);
                    continue;
                }

                let phi_reg = self.func.insts[mir_phi].reg;
                let phi_mir_block = self.block_map[&phi_ir_block];

                for arg in &args {
                    let terminator = self
                        .ir
                        .terminator(arg.block)
                        .expect("phi predecessor has no terminator");
                    match self.ir.inst(terminator).kind.clone() {
                        // The predecessor never reaches the phi; the edge is
                        // dead and needs no copy.
                        InstKind::Return { .. } | InstKind::Unreachable => continue,

                        // A plain branch takes the copy right before it.
                        InstKind::Branch { .. } => {
                            assert!(
                                self.needs_register(arg.value),
                                "phi argument does not produce a value"
                            );
                            let op = self.op_from_ir(arg.value);
                            let copy = self.func.make(MirOp::Copy);
                            self.func.insts[copy].add_op(op);
                            let pred = self.block_map[&arg.block];
                            let index = self.func.blocks[pred].insts.len() - 1;
                            self.func.insert_at(pred, index, copy, phi_reg);
                        }

                        // A conditional branch makes the edge critical: the
                        // copy goes into a fresh trampoline block, and the
                        // branch operand that named the phi's block is
                        // rewritten to name the trampoline.
                        InstKind::CondBranch { .. } => {
                            let op = self.op_from_ir(arg.value);
                            let copy = self.func.make(MirOp::Copy);
                            self.func.insts[copy].add_op(op);

                            let trampoline = self.func.add_block(String::new(), None);
                            self.func.push_with_reg(trampoline, copy, phi_reg);
                            let branch = self.func.make(MirOp::Branch);
                            self.func.insts[branch].add_op(MirOperand::Block(phi_mir_block));
                            self.func.push_into_block(trampoline, branch, None);

                            let branch_mir = self.func.resolve_lowered(self.inst_map[&terminator]);
                            let then_matches = *self.func.insts[branch_mir].get_op(1)
                                == MirOperand::Block(phi_mir_block);
                            if then_matches {
                                self.func.insts[branch_mir].operands[1] =
                                    MirOperand::Block(trampoline);
                            } else {
                                assert!(
                                    *self.func.insts[branch_mir].get_op(2)
                                        == MirOperand::Block(phi_mir_block),
                                    "branch to phi block is neither the true nor the false target"
                                );
                                self.func.insts[branch_mir].operands[2] =
                                    MirOperand::Block(trampoline);
                            }
                        }

                        other => panic!("unexpected terminator {other:?} before phi"),
                    }
                }

                self.func.remove_from_block(mir_phi);
            }
        }
    }

    /// Delete materialised `m.immediate` and `m.function_reference`
    /// instructions; their uses have all been inlined into operands.
    fn remove_inlined(&mut self) {
        for block in self.func.blocks.indices().collect::<Vec<_>>() {
            let to_remove: Vec<MirInstId> = self.func.blocks[block]
                .insts
                .iter()
                .copied()
                .filter(|&i| {
                    self.func.insts[i].opcode == MirOp::Immediate.as_u32()
                        || self.func.insts[i].opcode == MirOp::FuncRef.as_u32()
                })
                .collect();
            for inst in to_remove {
                self.func.remove_from_block(inst);
            }
        }
    }
}

fn binary_opcode(kind: &InstKind) -> MirOp {
    match kind {
        InstKind::Add { .. } => MirOp::Add,
        InstKind::Sub { .. } => MirOp::Sub,
        InstKind::Mul { .. } => MirOp::Mul,
        InstKind::Div { .. } => MirOp::Div,
        InstKind::Mod { .. } => MirOp::Mod,
        InstKind::Shl { .. } => MirOp::Shl,
        InstKind::Sar { .. } => MirOp::Sar,
        InstKind::Shr { .. } => MirOp::Shr,
        InstKind::And { .. } => MirOp::And,
        InstKind::Or { .. } => MirOp::Or,
        InstKind::Lt { .. } => MirOp::Lt,
        InstKind::Le { .. } => MirOp::Le,
        InstKind::Gt { .. } => MirOp::Gt,
        InstKind::Ge { .. } => MirOp::Ge,
        InstKind::Eq { .. } => MirOp::Eq,
        InstKind::Ne { .. } => MirOp::Ne,
        other => panic!("not a binary instruction: {other:?}"),
    }
}
