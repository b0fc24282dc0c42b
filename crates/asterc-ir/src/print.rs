//! Textual IR dumps.
//!
//! Three entry points back the driver's debug modes: [`print_ir`] renders
//! every function as readable text, [`print_dot_cfg`] renders each
//! function's control-flow graph in Graphviz dot format, and
//! [`print_dot_dj`] renders the dominator tree with join (non-tree CFG)
//! edges dashed.

use crate::ir::{BlockId, Callee, FuncId, InstKind, IrModule};
use asterc_util::FxHashMap;
use std::fmt::Write;

/// Render the whole module as text.
pub fn print_ir(module: &IrModule) -> String {
    let mut out = String::new();
    for func in module.funcs.iter() {
        if !func.is_definition {
            let _ = writeln!(out, "declare {} ; {:?}", func.linkage_name(), func.linkage);
            continue;
        }
        let _ = writeln!(out, "define {} {{ ; {:?}", func.linkage_name(), func.linkage);
        for &b in &func.blocks {
            let _ = writeln!(out, "{}:", module.block(b).name);
            for &i in &module.block(b).insts {
                let _ = writeln!(out, "    {}", render_inst(module, i));
            }
        }
        let _ = writeln!(out, "}}");
    }
    out
}

fn render_inst(module: &IrModule, id: crate::ir::InstId) -> String {
    let inst = module.inst(id);
    let mut s = format!("%{} = {}", id.0, inst.kind.mnemonic());
    match &inst.kind {
        InstKind::Immediate(v) => {
            let _ = write!(s, " {v}");
        }
        InstKind::InternedString(idx) => {
            let _ = write!(s, " str#{idx}");
        }
        InstKind::StaticRef(var) => {
            let _ = write!(s, " @{}", module.static_var(*var).name);
        }
        InstKind::FuncRef(f) => {
            let _ = write!(s, " {}", module.func(*f).name);
        }
        InstKind::Parameter(i) => {
            let _ = write!(s, " #{i}");
        }
        InstKind::Register(r) => {
            let _ = write!(s, " r{r}");
        }
        InstKind::Alloca { size, .. } => {
            let _ = write!(s, " {size}");
        }
        InstKind::Branch { target } => {
            let _ = write!(s, " {}", module.block(*target).name);
        }
        InstKind::CondBranch {
            cond,
            then_target,
            else_target,
        } => {
            let _ = write!(
                s,
                " %{}, {}, {}",
                cond.0,
                module.block(*then_target).name,
                module.block(*else_target).name
            );
        }
        InstKind::Phi { args } => {
            for arg in args {
                let _ = write!(s, " [{}, %{}]", module.block(arg.block).name, arg.value.0);
            }
        }
        InstKind::Call { callee, args, .. } => {
            match callee {
                Callee::Direct(f) => {
                    let _ = write!(s, " {}", module.func(*f).name);
                }
                Callee::Indirect(v) => {
                    let _ = write!(s, " %{}", v.0);
                }
            }
            for arg in args {
                let _ = write!(s, ", %{}", arg.0);
            }
        }
        InstKind::Intrinsic { kind, args } => {
            let _ = write!(s, " {kind:?}");
            for arg in args {
                let _ = write!(s, ", %{}", arg.0);
            }
        }
        other => {
            for (i, op) in other.operands().iter().enumerate() {
                let sep = if i == 0 { " " } else { ", " };
                let _ = write!(s, "{sep}%{}", op.0);
            }
        }
    }
    s
}

/// Successor blocks of a block, read off its terminator
fn successors(module: &IrModule, block: BlockId) -> Vec<BlockId> {
    match module.terminator(block).map(|t| &module.inst(t).kind) {
        Some(InstKind::Branch { target }) => vec![*target],
        Some(InstKind::CondBranch {
            then_target,
            else_target,
            ..
        }) => vec![*then_target, *else_target],
        _ => Vec::new(),
    }
}

/// Render every function's CFG in dot format.
pub fn print_dot_cfg(module: &IrModule) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "digraph cfg {{");
    for (f, func) in module.funcs.iter_enumerated() {
        if !func.is_definition {
            continue;
        }
        for &b in &func.blocks {
            let _ = writeln!(out, "    \"f{}_{}\"", f.0, module.block(b).name);
            for succ in successors(module, b) {
                let _ = writeln!(
                    out,
                    "    \"f{}_{}\" -> \"f{}_{}\"",
                    f.0,
                    module.block(b).name,
                    f.0,
                    module.block(succ).name
                );
            }
        }
    }
    let _ = writeln!(out, "}}");
    out
}

/// Immediate dominators of a function's blocks, computed by iterating the
/// dominator sets to a fixed point and extracting the unique closest
/// strict dominator.
fn immediate_dominators(module: &IrModule, f: FuncId) -> FxHashMap<BlockId, BlockId> {
    use std::collections::HashSet;

    let blocks = &module.func(f).blocks;
    let entry = module.func(f).entry_block();

    let mut preds: FxHashMap<BlockId, Vec<BlockId>> = FxHashMap::default();
    for &b in blocks {
        for succ in successors(module, b) {
            preds.entry(succ).or_default().push(b);
        }
    }

    // All blocks dominate everything except the entry, which dominates only
    // itself; intersect over predecessors until nothing changes.
    let all: HashSet<BlockId> = blocks.iter().copied().collect();
    let mut doms: FxHashMap<BlockId, HashSet<BlockId>> = FxHashMap::default();
    for &b in blocks {
        if b == entry {
            doms.insert(b, std::iter::once(b).collect());
        } else {
            doms.insert(b, all.clone());
        }
    }
    let mut changed = true;
    while changed {
        changed = false;
        for &b in blocks {
            if b == entry {
                continue;
            }
            let mut new_dom: Option<HashSet<BlockId>> = None;
            for &p in preds.get(&b).map(|v| v.as_slice()).unwrap_or(&[]) {
                let pd = &doms[&p];
                new_dom = Some(match new_dom {
                    None => pd.clone(),
                    Some(acc) => acc.intersection(pd).copied().collect(),
                });
            }
            let mut new_dom = new_dom.unwrap_or_default();
            new_dom.insert(b);
            if new_dom != doms[&b] {
                doms.insert(b, new_dom);
                changed = true;
            }
        }
    }

    let mut idom = FxHashMap::default();
    for &b in blocks {
        if b == entry {
            continue;
        }
        let strict: Vec<BlockId> = doms[&b].iter().copied().filter(|&d| d != b).collect();
        // The immediate dominator is the strict dominator dominated by all
        // the others.
        let found = strict
            .iter()
            .copied()
            .find(|&cand| strict.iter().all(|&other| doms[&cand].contains(&other)));
        if let Some(found) = found {
            idom.insert(b, found);
        }
    }
    idom
}

/// Render every function's dominator tree in dot format, with CFG edges
/// that are not tree edges (join edges) drawn dashed.
pub fn print_dot_dj(module: &IrModule) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "digraph dj {{");
    for (f, func) in module.funcs.iter_enumerated() {
        if !func.is_definition {
            continue;
        }
        let idom = immediate_dominators(module, f);
        for &b in &func.blocks {
            let _ = writeln!(out, "    \"f{}_{}\"", f.0, module.block(b).name);
        }
        for (&b, &dom) in &idom {
            let _ = writeln!(
                out,
                "    \"f{}_{}\" -> \"f{}_{}\"",
                f.0,
                module.block(dom).name,
                f.0,
                module.block(b).name
            );
        }
        for &b in &func.blocks {
            for succ in successors(module, b) {
                if idom.get(&succ) == Some(&b) {
                    continue;
                }
                let _ = writeln!(
                    out,
                    "    \"f{}_{}\" -> \"f{}_{}\" [style=dashed]",
                    f.0,
                    module.block(b).name,
                    f.0,
                    module.block(succ).name
                );
            }
        }
    }
    let _ = writeln!(out, "}}");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{InstKind, IrModule};
    use asterc_ast::{FuncAttrs, Linkage, TypeStore};
    use asterc_util::span::Span;

    fn diamond() -> (IrModule, FuncId) {
        let types = TypeStore::new();
        let mut module = IrModule::new();
        let f = module.create_function(
            "f",
            types.integer,
            &[],
            Linkage::Internal,
            FuncAttrs::empty(),
            true,
            Span::DUMMY,
        );
        let entry = module.func(f).entry_block();
        let then_b = module.create_block(f);
        let else_b = module.create_block(f);
        let join = module.create_block(f);
        let cond = module.insert_new(entry, InstKind::Immediate(1), types.integer, Span::DUMMY);
        module.insert_new(
            entry,
            InstKind::CondBranch {
                cond,
                then_target: then_b,
                else_target: else_b,
            },
            types.void,
            Span::DUMMY,
        );
        module.insert_new(then_b, InstKind::Branch { target: join }, types.void, Span::DUMMY);
        module.insert_new(else_b, InstKind::Branch { target: join }, types.void, Span::DUMMY);
        module.insert_new(join, InstKind::Return { value: None }, types.void, Span::DUMMY);
        (module, f)
    }

    #[test]
    fn idoms_of_diamond() {
        let (module, f) = diamond();
        let blocks = module.func(f).blocks.clone();
        let idom = immediate_dominators(&module, f);
        // then, else and join are all immediately dominated by the entry.
        assert_eq!(idom[&blocks[1]], blocks[0]);
        assert_eq!(idom[&blocks[2]], blocks[0]);
        assert_eq!(idom[&blocks[3]], blocks[0]);
        assert!(!idom.contains_key(&blocks[0]));
    }

    #[test]
    fn cfg_dot_lists_all_edges() {
        let (module, _) = diamond();
        let dot = print_dot_cfg(&module);
        assert!(dot.contains("\"f0_entry\" -> \"f0_bb1\""));
        assert!(dot.contains("\"f0_entry\" -> \"f0_bb2\""));
        assert!(dot.contains("\"f0_bb1\" -> \"f0_bb3\""));
        assert!(dot.contains("\"f0_bb2\" -> \"f0_bb3\""));
    }

    #[test]
    fn dj_dot_marks_join_edges() {
        let (module, _) = diamond();
        let dot = print_dot_dj(&module);
        // join is dominated by entry, so the branches into it are J-edges.
        assert!(dot.contains("\"f0_bb1\" -> \"f0_bb3\" [style=dashed]"));
        assert!(dot.contains("\"f0_bb2\" -> \"f0_bb3\" [style=dashed]"));
        assert!(dot.contains("\"f0_entry\" -> \"f0_bb3\"\n"));
    }

    #[test]
    fn ir_print_renders_instructions() {
        let (module, _) = diamond();
        let text = print_ir(&module);
        assert!(text.contains("define f {"));
        assert!(text.contains("immediate 1"));
        assert!(text.contains("branch-cond"));
    }
}
