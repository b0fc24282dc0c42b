//! Human-readable MIR dumps.
//!
//! The layout follows the classic machine-IR dump shape: a frame-object
//! table, then each block with its ENTRY/EXITS markers and CFG edge lists,
//! then one line per instruction showing its register, mnemonic and
//! operands.

use crate::mir::{MirFunction, MirInst, MirModule, MirOp, MirOperand};
use std::fmt;

impl fmt::Display for MirModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for func in self.functions.iter() {
            writeln!(f, "{func}")?;
        }
        Ok(())
    }
}

impl fmt::Display for MirFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "| {} Frame Objects", self.frame_objects.len())?;
        for (i, fo) in self.frame_objects.iter().enumerate() {
            writeln!(f, "|   idx:{} sz:{}", i, fo.size)?;
        }
        writeln!(f, "{} {{", self.name)?;
        for (id, block) in self.blocks.iter_enumerated() {
            let name = if block.name.is_empty() {
                format!("bb{}", id.0)
            } else {
                block.name.clone()
            };
            write!(f, "{name}: ")?;
            if block.is_entry {
                write!(f, "ENTRY")?;
            }
            if block.is_exit {
                write!(f, "EXITS")?;
            }
            write!(f, " predecessors: {{ ")?;
            for p in &block.preds {
                write!(f, "{},", p.0)?;
            }
            write!(f, " }} successors: {{ ")?;
            for s in &block.succs {
                write!(f, "{},", s.0)?;
            }
            writeln!(f, " }}")?;
            for &inst in &block.insts {
                writeln!(f, "{}", render_inst(self, &self.insts[inst]))?;
            }
        }
        writeln!(f, "}}")
    }
}

fn render_inst(func: &MirFunction, inst: &MirInst) -> String {
    use std::fmt::Write;
    let mut s = String::new();
    let _ = write!(s, "    {} | ", inst.reg);
    match MirOp::from_u32(inst.opcode) {
        Some(op) => {
            let _ = write!(s, "{}", op.mnemonic());
        }
        None => {
            let _ = write!(s, "op{}", inst.opcode);
        }
    }
    for (i, op) in inst.operands.iter().enumerate() {
        if matches!(op, MirOperand::None) {
            break;
        }
        let sep = if i == 0 { " " } else { ", " };
        let _ = write!(s, "{sep}{}", render_operand(func, op));
    }
    if !inst.clobbers.is_empty() {
        let _ = write!(s, " clobbers ");
        for (i, c) in inst.clobbers.iter().enumerate() {
            let sep = if i == 0 { "" } else { ", " };
            let _ = write!(s, "{sep}{c}");
        }
    }
    s
}

fn render_operand(func: &MirFunction, op: &MirOperand) -> String {
    match op {
        MirOperand::None => "none".to_string(),
        MirOperand::Register { reg, size, defining } => {
            let def = if *defining { " DEF" } else { "" };
            format!("v{reg} {size}{def}")
        }
        MirOperand::Immediate(v) => format!("{v}"),
        MirOperand::Block(b) => format!("Block:{}", b.0),
        MirOperand::Function(f) => format!("Function:{}", f.0),
        MirOperand::Name(n) => format!("\"{n}\""),
        MirOperand::Static(s) => format!("Static:{}", s.0),
        MirOperand::Local(index) => {
            let size = func
                .frame_objects
                .get(*index as usize)
                .map(|fo| fo.size)
                .unwrap_or(0);
            format!("Stack:{index} #{size}")
        }
        MirOperand::OpRef { inst, operand } => format!("OP_REF inst:{inst} op:{operand}"),
        MirOperand::InstRef(i) => format!("INST_REF {i}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::MirFunction;
    use asterc_ir::FuncId;

    #[test]
    fn dump_contains_frame_objects_and_flags() {
        let mut func = MirFunction::new("f", FuncId(0));
        func.add_frame_object(24);
        let b = func.add_block("entry", None);
        func.blocks[b].is_entry = true;
        let i = func.make(MirOp::Alloca);
        func.insts[i].add_op(MirOperand::Local(0));
        func.push_into_block(b, i, None);

        let dump = format!("{func}");
        assert!(dump.contains("| 1 Frame Objects"));
        assert!(dump.contains("idx:0 sz:24"));
        assert!(dump.contains("entry: ENTRY"));
        assert!(dump.contains("m.alloca Stack:0 #24"));
    }

    #[test]
    fn arch_opcodes_print_numerically() {
        let mut func = MirFunction::new("f", FuncId(0));
        let b = func.add_block("entry", None);
        let i = func.make_raw(crate::mir::ARCH_START + 7);
        func.push_into_block(b, i, None);
        let dump = format!("{func}");
        assert!(dump.contains(&format!("op{}", crate::mir::ARCH_START + 7)));
    }
}
