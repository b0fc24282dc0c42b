//! Reference x86-64 backend.
//!
//! The code-generation core stops at MIR; this backend turns it into
//! AT&T-syntax assembly the way a first register allocator would: every
//! virtual register gets its own 8-byte spill slot, every instruction loads
//! its operands into scratch registers, computes, and stores the result
//! back. Frame objects get rbp-relative offsets here, fulfilling the
//! backend half of the frame-object contract.
//!
//! Early lowering pins parameter placeholder instructions to the calling
//! convention's argument registers; functions with more parameters than
//! argument registers are rejected.

use crate::error::{CodeGenError, Result};
use asterc_ast::Linkage;
use asterc_ir::{CallConv, CodegenContext, StaticInit};
use asterc_mir::{MirModule, MirOp, MirOperand, ARCH_START};
use asterc_util::FxHashMap;
use std::fmt::Write;
use tracing::debug;

// Physical register numbers follow the x86-64 instruction encoding.
pub const RAX: u32 = 0;
pub const RCX: u32 = 1;
pub const RDX: u32 = 2;
pub const RBX: u32 = 3;
pub const RSP: u32 = 4;
pub const RBP: u32 = 5;
pub const RSI: u32 = 6;
pub const RDI: u32 = 7;
pub const R8: u32 = 8;
pub const R9: u32 = 9;
pub const R10: u32 = 10;
pub const R11: u32 = 11;
pub const R12: u32 = 12;
pub const R13: u32 = 13;
pub const R14: u32 = 14;
pub const R15: u32 = 15;

fn reg_name(reg: u32) -> &'static str {
    match reg {
        RAX => "%rax",
        RCX => "%rcx",
        RDX => "%rdx",
        RBX => "%rbx",
        RSP => "%rsp",
        RBP => "%rbp",
        RSI => "%rsi",
        RDI => "%rdi",
        R8 => "%r8",
        R9 => "%r9",
        R10 => "%r10",
        R11 => "%r11",
        R12 => "%r12",
        R13 => "%r13",
        R14 => "%r14",
        R15 => "%r15",
        other => panic!("unknown physical register {other}"),
    }
}

/// Integer argument registers, in order
pub fn arg_registers(call_conv: CallConv) -> &'static [u32] {
    match call_conv {
        CallConv::SysV => &[RDI, RSI, RDX, RCX, R8, R9],
        CallConv::MsWin => &[RCX, RDX, R8, R9],
    }
}

/// Pin every function's parameter placeholders to argument registers, so
/// MIR translation can inline them as physical-register operands.
pub fn lower_early(ctx: &mut CodegenContext) -> Result<()> {
    let arg_regs = arg_registers(ctx.target.call_conv);
    for f in ctx.module.funcs.indices().collect::<Vec<_>>() {
        if !ctx.module.func(f).is_definition {
            continue;
        }
        let params = ctx.module.func(f).params.clone();
        if params.len() > arg_regs.len() {
            return Err(CodeGenError::TooManyParameters(
                ctx.module.func(f).name.clone(),
                params.len(),
            ));
        }
        for (i, &p) in params.iter().enumerate() {
            ctx.module.set_reg(p, arg_regs[i]);
        }
    }
    Ok(())
}

/// Emit the whole module as AT&T-syntax assembly, assigning frame-object
/// offsets along the way.
pub fn emit_x86_64(ctx: &CodegenContext, mir: &mut MirModule) -> Result<String> {
    let mut out = String::new();

    emit_statics(ctx, &mut out)?;

    writeln!(out, ".text")?;
    for func in mir.functions.iter_mut() {
        if !ctx.module.func(func.origin).is_definition {
            continue;
        }
        debug!(func = %func.name, "emitting x86-64");
        let linkage = ctx.module.func(func.origin).linkage;
        if matches!(linkage, Linkage::Exported | Linkage::Reexported) {
            writeln!(out, ".globl {}", func.name)?;
        }
        writeln!(out, "{}:", func.name)?;

        // Frame layout: frame objects first, then one spill slot per
        // virtual register.
        let mut offset: i64 = 0;
        for fo in func.frame_objects.iter_mut() {
            offset -= align_up(fo.size, 8) as i64;
            fo.offset = Some(offset);
        }
        let mut slots: FxHashMap<u32, i64> = FxHashMap::default();
        for block in func.blocks.iter() {
            for &i in &block.insts {
                let inst = &func.insts[i];
                if inst.reg >= ARCH_START {
                    slot_for(&mut slots, &mut offset, inst.reg);
                }
                for op in &inst.operands {
                    if let MirOperand::Register { reg, .. } = op {
                        if *reg >= ARCH_START {
                            slot_for(&mut slots, &mut offset, *reg);
                        }
                    }
                }
            }
        }
        let frame_size = align_up((-offset) as u64, 16);

        writeln!(out, "    pushq %rbp")?;
        writeln!(out, "    movq %rsp, %rbp")?;
        if frame_size > 0 {
            writeln!(out, "    subq ${frame_size}, %rsp")?;
        }

        let emitter = FuncEmitter {
            ctx,
            func,
            slots: &slots,
        };
        for (b, block) in func.blocks.iter_enumerated() {
            writeln!(out, "{}:", emitter.block_label(b.0))?;
            for &i in &block.insts {
                emitter.emit_inst(i, &mut out)?;
            }
        }
    }
    Ok(out)
}

fn align_up(value: u64, align: u64) -> u64 {
    (value + align - 1) & !(align - 1)
}

fn slot_for(slots: &mut FxHashMap<u32, i64>, offset: &mut i64, vreg: u32) -> i64 {
    *slots.entry(vreg).or_insert_with(|| {
        *offset -= 8;
        *offset
    })
}

fn emit_statics(ctx: &CodegenContext, out: &mut String) -> Result<()> {
    let mut data = String::new();
    let mut bss = String::new();
    for var in ctx.module.statics.iter() {
        if var.linkage == Linkage::Imported {
            continue;
        }
        let exported = matches!(var.linkage, Linkage::Exported | Linkage::Reexported);
        let size = ctx.ast.types.size_of(var.ty).max(1);
        match &var.init {
            Some(StaticInit::Int(value)) => {
                if exported {
                    writeln!(data, ".globl {}", var.name)?;
                }
                let directive = match size {
                    1 => ".byte",
                    2 => ".word",
                    4 => ".long",
                    _ => ".quad",
                };
                writeln!(data, "{}: {directive} {value}", var.name)?;
            }
            Some(StaticInit::String(index)) => {
                if exported {
                    writeln!(data, ".globl {}", var.name)?;
                }
                let text = escape_asm(&ctx.ast.strings[*index]);
                writeln!(data, "{}: .asciz \"{text}\"", var.name)?;
            }
            None => {
                if exported {
                    writeln!(bss, ".globl {}", var.name)?;
                }
                writeln!(bss, "{}: .zero {size}", var.name)?;
            }
        }
    }
    if !data.is_empty() {
        writeln!(out, ".data")?;
        out.push_str(&data);
    }
    if !bss.is_empty() {
        writeln!(out, ".bss")?;
        out.push_str(&bss);
    }
    Ok(())
}

fn escape_asm(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

struct FuncEmitter<'a> {
    ctx: &'a CodegenContext<'a>,
    func: &'a asterc_mir::MirFunction,
    slots: &'a FxHashMap<u32, i64>,
}

impl<'a> FuncEmitter<'a> {
    fn block_label(&self, block: u32) -> String {
        format!(".L{}_{}", self.func.name, block)
    }

    /// Emit code loading `op` into the 64-bit register `dst`.
    fn load_operand(&self, op: &MirOperand, dst: &str, out: &mut String) -> Result<()> {
        match op {
            MirOperand::Register { reg, .. } if *reg < ARCH_START => {
                let src = reg_name(*reg);
                if src != dst {
                    writeln!(out, "    movq {src}, {dst}")?;
                }
            }
            MirOperand::Register { reg, .. } => {
                let slot = self.slots[reg];
                writeln!(out, "    movq {slot}(%rbp), {dst}")?;
            }
            MirOperand::Immediate(value) => {
                if i32::try_from(*value).is_ok() {
                    writeln!(out, "    movq ${value}, {dst}")?;
                } else {
                    writeln!(out, "    movabsq ${value}, {dst}")?;
                }
            }
            MirOperand::Local(index) => {
                let off = self.frame_offset(*index);
                writeln!(out, "    leaq {off}(%rbp), {dst}")?;
            }
            MirOperand::Static(var) => {
                let name = &self.ctx.module.static_var(*var).name;
                writeln!(out, "    leaq {name}(%rip), {dst}")?;
            }
            MirOperand::Function(f) => {
                let name = self
                    .ctx
                    .module
                    .func(asterc_ir::FuncId((*f).0))
                    .linkage_name()
                    .to_string();
                writeln!(out, "    leaq {name}(%rip), {dst}")?;
            }
            MirOperand::Name(name) => {
                writeln!(out, "    leaq {name}(%rip), {dst}")?;
            }
            other => {
                return Err(CodeGenError::Unsupported(format!(
                    "operand {other:?} in value position"
                )))
            }
        }
        Ok(())
    }

    fn frame_offset(&self, index: u32) -> i64 {
        self.func.frame_objects[index as usize]
            .offset
            .expect("frame offset not assigned")
    }

    /// Emit code storing `%rax` into the destination of `inst`.
    fn store_result(&self, inst: asterc_mir::MirInstId, out: &mut String) -> Result<()> {
        let reg = self.func.insts[inst].reg;
        if reg >= ARCH_START {
            let slot = self.slots[&reg];
            writeln!(out, "    movq %rax, {slot}(%rbp)")?;
        } else if reg != RAX {
            writeln!(out, "    movq %rax, {}", reg_name(reg))?;
        }
        Ok(())
    }

    fn emit_inst(&self, id: asterc_mir::MirInstId, out: &mut String) -> Result<()> {
        let inst = &self.func.insts[id];
        let Some(op) = MirOp::from_u32(inst.opcode) else {
            return Err(CodeGenError::Unsupported(format!(
                "architecture opcode {} in common emitter",
                inst.opcode
            )));
        };
        match op {
            MirOp::Copy => {
                self.load_operand(inst.get_op(0), "%rax", out)?;
                self.store_result(id, out)?;
            }

            MirOp::Alloca | MirOp::StaticRef => {
                self.load_operand(inst.get_op(0), "%rax", out)?;
                self.store_result(id, out)?;
            }

            MirOp::Load => {
                match inst.get_op(0) {
                    MirOperand::Local(index) => {
                        let off = self.frame_offset(*index);
                        writeln!(out, "    movq {off}(%rbp), %rax")?;
                    }
                    MirOperand::Static(var) => {
                        let name = &self.ctx.module.static_var(*var).name;
                        writeln!(out, "    movq {name}(%rip), %rax")?;
                    }
                    addr => {
                        self.load_operand(addr, "%rcx", out)?;
                        let size = match inst.operands.get(1) {
                            Some(MirOperand::Immediate(s)) => *s,
                            _ => 8,
                        };
                        match size {
                            1 => writeln!(out, "    movzbq (%rcx), %rax")?,
                            2 => writeln!(out, "    movzwq (%rcx), %rax")?,
                            4 => writeln!(out, "    movl (%rcx), %eax")?,
                            _ => writeln!(out, "    movq (%rcx), %rax")?,
                        }
                    }
                }
                self.store_result(id, out)?;
            }

            MirOp::Store => {
                self.load_operand(inst.get_op(0), "%rax", out)?;
                match inst.get_op(1) {
                    MirOperand::Local(index) => {
                        let off = self.frame_offset(*index);
                        writeln!(out, "    movq %rax, {off}(%rbp)")?;
                    }
                    MirOperand::Static(var) => {
                        let name = &self.ctx.module.static_var(*var).name;
                        writeln!(out, "    movq %rax, {name}(%rip)")?;
                    }
                    addr => {
                        self.load_operand(addr, "%rcx", out)?;
                        let size = match inst.operands.get(2) {
                            Some(MirOperand::Immediate(s)) => *s,
                            _ => 8,
                        };
                        match size {
                            1 => writeln!(out, "    movb %al, (%rcx)")?,
                            2 => writeln!(out, "    movw %ax, (%rcx)")?,
                            4 => writeln!(out, "    movl %eax, (%rcx)")?,
                            _ => writeln!(out, "    movq %rax, (%rcx)")?,
                        }
                    }
                }
            }

            MirOp::Add | MirOp::Sub | MirOp::And | MirOp::Or | MirOp::Mul => {
                self.load_operand(inst.get_op(0), "%rax", out)?;
                self.load_operand(inst.get_op(1), "%rcx", out)?;
                let mnem = match op {
                    MirOp::Add => "addq",
                    MirOp::Sub => "subq",
                    MirOp::And => "andq",
                    MirOp::Or => "orq",
                    _ => "imulq",
                };
                writeln!(out, "    {mnem} %rcx, %rax")?;
                self.store_result(id, out)?;
            }

            MirOp::Div | MirOp::Mod => {
                self.load_operand(inst.get_op(0), "%rax", out)?;
                self.load_operand(inst.get_op(1), "%rcx", out)?;
                writeln!(out, "    cqto")?;
                writeln!(out, "    idivq %rcx")?;
                if op == MirOp::Mod {
                    writeln!(out, "    movq %rdx, %rax")?;
                }
                self.store_result(id, out)?;
            }

            MirOp::Shl | MirOp::Sar | MirOp::Shr => {
                self.load_operand(inst.get_op(0), "%rax", out)?;
                self.load_operand(inst.get_op(1), "%rcx", out)?;
                let mnem = match op {
                    MirOp::Shl => "shlq",
                    MirOp::Sar => "sarq",
                    _ => "shrq",
                };
                writeln!(out, "    {mnem} %cl, %rax")?;
                self.store_result(id, out)?;
            }

            MirOp::Not => {
                self.load_operand(inst.get_op(0), "%rax", out)?;
                writeln!(out, "    notq %rax")?;
                self.store_result(id, out)?;
            }

            MirOp::Lt | MirOp::Le | MirOp::Gt | MirOp::Ge | MirOp::Eq | MirOp::Ne => {
                self.load_operand(inst.get_op(0), "%rax", out)?;
                self.load_operand(inst.get_op(1), "%rcx", out)?;
                writeln!(out, "    cmpq %rcx, %rax")?;
                let set = match op {
                    MirOp::Lt => "setl",
                    MirOp::Le => "setle",
                    MirOp::Gt => "setg",
                    MirOp::Ge => "setge",
                    MirOp::Eq => "sete",
                    _ => "setne",
                };
                writeln!(out, "    {set} %al")?;
                writeln!(out, "    movzbq %al, %rax")?;
                self.store_result(id, out)?;
            }

            MirOp::ZExt | MirOp::SExt | MirOp::Trunc => {
                self.load_operand(inst.get_op(0), "%rax", out)?;
                let MirOperand::Immediate(from) = *inst.get_op(1) else {
                    return Err(CodeGenError::Unsupported(
                        "conversion without width operands".to_string(),
                    ));
                };
                let MirOperand::Immediate(to) = *inst.get_op(2) else {
                    return Err(CodeGenError::Unsupported(
                        "conversion without width operands".to_string(),
                    ));
                };
                let width = if op == MirOp::Trunc { to } else { from };
                match (op, width) {
                    (MirOp::SExt, 1) => writeln!(out, "    movsbq %al, %rax")?,
                    (MirOp::SExt, 2) => writeln!(out, "    movswq %ax, %rax")?,
                    (MirOp::SExt, 4) => writeln!(out, "    movslq %eax, %rax")?,
                    (_, 1) => writeln!(out, "    movzbq %al, %rax")?,
                    (_, 2) => writeln!(out, "    movzwq %ax, %rax")?,
                    (_, 4) => writeln!(out, "    movl %eax, %eax")?,
                    _ => {}
                }
                self.store_result(id, out)?;
            }

            MirOp::Bitcast => {
                self.load_operand(inst.get_op(0), "%rax", out)?;
                self.store_result(id, out)?;
            }

            MirOp::Branch => {
                let MirOperand::Block(target) = *inst.get_op(0) else {
                    return Err(CodeGenError::Unsupported(
                        "branch without block operand".to_string(),
                    ));
                };
                writeln!(out, "    jmp {}", self.block_label(target.0))?;
            }

            MirOp::CondBranch => {
                self.load_operand(inst.get_op(0), "%rax", out)?;
                let (MirOperand::Block(then_b), MirOperand::Block(else_b)) =
                    (inst.get_op(1).clone(), inst.get_op(2).clone())
                else {
                    return Err(CodeGenError::Unsupported(
                        "conditional branch without block operands".to_string(),
                    ));
                };
                writeln!(out, "    testq %rax, %rax")?;
                writeln!(out, "    jne {}", self.block_label(then_b.0))?;
                writeln!(out, "    jmp {}", self.block_label(else_b.0))?;
            }

            MirOp::Return => {
                if let Some(value) = inst.operands.first() {
                    self.load_operand(value, "%rax", out)?;
                }
                writeln!(out, "    leave")?;
                writeln!(out, "    ret")?;
            }

            MirOp::Call => {
                let arg_regs = arg_registers(self.ctx.target.call_conv);
                let args = &inst.operands[1..];
                if args.len() > arg_regs.len() {
                    return Err(CodeGenError::TooManyParameters(
                        self.func.name.clone(),
                        args.len(),
                    ));
                }
                // Stage arguments through the stack so an argument register
                // is never clobbered before it is read.
                for arg in args {
                    self.load_operand(arg, "%rax", out)?;
                    writeln!(out, "    pushq %rax")?;
                }
                for (i, _) in args.iter().enumerate().rev() {
                    writeln!(out, "    popq {}", reg_name(arg_regs[i]))?;
                }
                match inst.get_op(0) {
                    MirOperand::Function(f) => {
                        let name = self
                            .ctx
                            .module
                            .func(asterc_ir::FuncId((*f).0))
                            .linkage_name()
                            .to_string();
                        writeln!(out, "    call {name}")?;
                    }
                    callee => {
                        self.load_operand(callee, "%r10", out)?;
                        writeln!(out, "    call *%r10")?;
                    }
                }
                self.store_result(id, out)?;
            }

            MirOp::Intrinsic => {
                let MirOperand::Immediate(code) = *inst.get_op(0) else {
                    return Err(CodeGenError::Unsupported(
                        "intrinsic without kind operand".to_string(),
                    ));
                };
                self.emit_intrinsic(id, code, out)?;
            }

            MirOp::Unreachable => {
                writeln!(out, "    ud2")?;
            }

            MirOp::Phi | MirOp::Immediate | MirOp::FuncRef | MirOp::Register => {
                return Err(CodeGenError::UnloweredInstruction(
                    op.mnemonic().to_string(),
                ));
            }
        }
        Ok(())
    }

    fn emit_intrinsic(
        &self,
        id: asterc_mir::MirInstId,
        code: i64,
        out: &mut String,
    ) -> Result<()> {
        let inst = &self.func.insts[id];
        let args = &inst.operands[1..];
        match code {
            // syscall: first argument is the syscall number.
            0 => {
                const SYSCALL_REGS: &[u32] = &[RAX, RDI, RSI, RDX, R10, R8, R9];
                if args.len() > SYSCALL_REGS.len() {
                    return Err(CodeGenError::Unsupported(
                        "syscall with more than six arguments".to_string(),
                    ));
                }
                for arg in args {
                    self.load_operand(arg, "%rax", out)?;
                    writeln!(out, "    pushq %rax")?;
                }
                for (i, _) in args.iter().enumerate().rev() {
                    writeln!(out, "    popq {}", reg_name(SYSCALL_REGS[i]))?;
                }
                writeln!(out, "    syscall")?;
                self.store_result(id, out)?;
            }
            // debug trap
            2 => {
                writeln!(out, "    int3")?;
            }
            // memcpy(dest, src, len)
            3 => {
                self.load_operand(inst.get_op(1), "%rdi", out)?;
                self.load_operand(inst.get_op(2), "%rsi", out)?;
                self.load_operand(inst.get_op(3), "%rcx", out)?;
                writeln!(out, "    rep movsb")?;
            }
            other => {
                return Err(CodeGenError::Unsupported(format!(
                    "intrinsic code {other} in x86-64 emission"
                )))
            }
        }
        Ok(())
    }
}
