//! IR to MIR translation scenarios: phi lowering, trampolines, frame
//! objects and the post-lowering sweep.

use asterc_ast::{Ast, FuncAttrs, Linkage, NodeKind};
use asterc_ir::{
    Arch, CallConv, CodegenContext, InstKind, Language, TargetDesc, TargetFormat,
};
use asterc_mir::{mir_from_ir, MirFunction, MirOp, MirOperand, ARCH_START};
use asterc_util::diagnostic::Handler;
use asterc_util::span::Span;

fn target() -> TargetDesc {
    TargetDesc {
        language: Language::Aster,
        arch: Arch::X86_64,
        format: TargetFormat::Native,
        call_conv: CallConv::SysV,
    }
}

fn fresh_ctx(handler: &Handler) -> CodegenContext<'_> {
    CodegenContext::new(Ast::new("test.as"), target(), handler)
}

fn opcodes_of(func: &MirFunction) -> Vec<u32> {
    func.blocks
        .iter()
        .flat_map(|b| b.insts.iter().map(|&i| func.insts[i].opcode))
        .collect()
}

#[test]
fn phi_across_conditional_branch_gets_a_trampoline() {
    let handler = Handler::new();
    let mut ctx = fresh_ctx(&handler);
    let integer = ctx.ast.types.integer;
    let void = ctx.ast.types.void;

    // entry:      %c = 1; branch-cond %c, phi_block, other
    // phi_block:  %p = phi [entry %v1] [other %v2]; return %p
    // other:      %v2 = 2; branch phi_block
    let f = ctx.module.create_function(
        "f",
        integer,
        &[],
        Linkage::Internal,
        FuncAttrs::empty(),
        true,
        Span::DUMMY,
    );
    let entry = ctx.module.func(f).entry_block();
    let phi_block = ctx.module.create_block(f);
    let other = ctx.module.create_block(f);

    let cond = ctx
        .module
        .insert_new(entry, InstKind::Immediate(1), integer, Span::DUMMY);
    let v1 = ctx
        .module
        .insert_new(entry, InstKind::Immediate(10), integer, Span::DUMMY);
    ctx.module.insert_new(
        entry,
        InstKind::CondBranch {
            cond,
            then_target: phi_block,
            else_target: other,
        },
        void,
        Span::DUMMY,
    );

    let v2 = ctx
        .module
        .insert_new(other, InstKind::Immediate(2), integer, Span::DUMMY);
    ctx.module
        .insert_new(other, InstKind::Branch { target: phi_block }, void, Span::DUMMY);

    let phi = ctx
        .module
        .insert_new(phi_block, InstKind::Phi { args: Vec::new() }, integer, Span::DUMMY);
    ctx.module.phi_add_arg(phi, entry, v1);
    ctx.module.phi_add_arg(phi, other, v2);
    ctx.module
        .insert_new(phi_block, InstKind::Return { value: Some(phi) }, void, Span::DUMMY);

    let mir = mir_from_ir(&mut ctx);
    let func = mir.functions.iter().next().unwrap();

    // The original three blocks gained exactly one trampoline.
    assert_eq!(func.blocks.len(), 4);
    let trampoline = func
        .blocks
        .indices()
        .find(|&b| func.blocks[b].origin.is_none())
        .expect("a trampoline block was created");

    // The trampoline holds exactly one copy into the phi's register and one
    // unconditional branch to the phi's block.
    let tramp_insts = &func.blocks[trampoline].insts;
    assert_eq!(tramp_insts.len(), 2);
    let copy = &func.insts[tramp_insts[0]];
    let branch = &func.insts[tramp_insts[1]];
    assert_eq!(copy.opcode, MirOp::Copy.as_u32());
    assert_eq!(*copy.get_op(0), MirOperand::Immediate(10));
    assert_eq!(branch.opcode, MirOp::Branch.as_u32());
    let phi_mir_block = func
        .blocks
        .indices()
        .nth(1)
        .expect("phi block is the second block");
    assert_eq!(*branch.get_op(0), MirOperand::Block(phi_mir_block));

    // The conditional branch's then-operand now names the trampoline.
    let entry_block = func.blocks.indices().next().unwrap();
    let cond_br = func.blocks[entry_block]
        .insts
        .iter()
        .map(|&i| &func.insts[i])
        .find(|i| i.opcode == MirOp::CondBranch.as_u32())
        .expect("conditional branch survives");
    assert_eq!(*cond_br.get_op(1), MirOperand::Block(trampoline));
    assert_eq!(*cond_br.get_op(2), MirOperand::Block(func.blocks.indices().nth(2).unwrap()));

    // The unconditional edge got its copy right before the branch in the
    // predecessor, into the same register as the trampoline's copy.
    let other_block = func.blocks.indices().nth(2).unwrap();
    let other_insts = &func.blocks[other_block].insts;
    let last_two: Vec<_> = other_insts
        .iter()
        .map(|&i| &func.insts[i])
        .collect();
    let pred_copy = last_two[last_two.len() - 2];
    assert_eq!(pred_copy.opcode, MirOp::Copy.as_u32());
    assert_eq!(*pred_copy.get_op(0), MirOperand::Immediate(2));
    assert_eq!(pred_copy.reg, copy.reg);
    assert!(pred_copy.reg >= ARCH_START);

    // Nothing with opcode Phi, Immediate or FuncRef survives lowering.
    let ops = opcodes_of(func);
    assert!(!ops.contains(&MirOp::Phi.as_u32()));
    assert!(!ops.contains(&MirOp::Immediate.as_u32()));
    assert!(!ops.contains(&MirOp::FuncRef.as_u32()));
}

#[test]
fn single_argument_phi_becomes_a_copy() {
    let handler = Handler::new();
    let mut ctx = fresh_ctx(&handler);
    let integer = ctx.ast.types.integer;
    let void = ctx.ast.types.void;

    let f = ctx.module.create_function(
        "f",
        integer,
        &[],
        Linkage::Internal,
        FuncAttrs::empty(),
        true,
        Span::DUMMY,
    );
    let entry = ctx.module.func(f).entry_block();
    let next = ctx.module.create_block(f);

    let v = ctx
        .module
        .insert_new(entry, InstKind::Immediate(7), integer, Span::DUMMY);
    ctx.module
        .insert_new(entry, InstKind::Branch { target: next }, void, Span::DUMMY);
    let phi = ctx
        .module
        .insert_new(next, InstKind::Phi { args: Vec::new() }, integer, Span::DUMMY);
    ctx.module.phi_add_arg(phi, entry, v);
    ctx.module
        .insert_new(next, InstKind::Return { value: Some(phi) }, void, Span::DUMMY);

    let mir = mir_from_ir(&mut ctx);
    let func = mir.functions.iter().next().unwrap();

    // No new block; the phi was rewritten in place into a copy of the
    // inlined immediate.
    assert_eq!(func.blocks.len(), 2);
    let ops = opcodes_of(func);
    assert!(!ops.contains(&MirOp::Phi.as_u32()));
    let copies: Vec<_> = func
        .blocks
        .iter()
        .flat_map(|b| b.insts.iter())
        .map(|&i| &func.insts[i])
        .filter(|i| i.opcode == MirOp::Copy.as_u32())
        .collect();
    assert_eq!(copies.len(), 1);
    assert_eq!(*copies[0].get_op(0), MirOperand::Immediate(7));
}

#[test]
fn allocas_map_one_to_one_onto_frame_objects() {
    let handler = Handler::new();
    let mut ctx = fresh_ctx(&handler);
    let integer = ctx.ast.types.integer;
    let void = ctx.ast.types.void;
    let arr = ctx.ast.types.array_of(integer, 4);

    let f = ctx.module.create_function(
        "f",
        integer,
        &[],
        Linkage::Internal,
        FuncAttrs::empty(),
        true,
        Span::DUMMY,
    );
    let entry = ctx.module.func(f).entry_block();
    let int_ptr = ctx.ast.types.pointer_to(integer);
    let arr_ptr = ctx.ast.types.pointer_to(arr);
    let a1 = ctx.module.insert_new(
        entry,
        InstKind::Alloca { size: 8, frame: None },
        int_ptr,
        Span::DUMMY,
    );
    let a2 = ctx.module.insert_new(
        entry,
        InstKind::Alloca { size: 32, frame: None },
        arr_ptr,
        Span::DUMMY,
    );
    // Use both allocas so they stay live through translation.
    let v = ctx
        .module
        .insert_new(entry, InstKind::Load { addr: a1 }, integer, Span::DUMMY);
    ctx.module
        .insert_new(entry, InstKind::Store { value: v, addr: a2 }, void, Span::DUMMY);
    ctx.module
        .insert_new(entry, InstKind::Return { value: Some(v) }, void, Span::DUMMY);

    let mir = mir_from_ir(&mut ctx);
    let func = mir.functions.iter().next().unwrap();

    assert_eq!(func.frame_objects.len(), 2);
    let InstKind::Alloca { frame: f1, .. } = ctx.module.inst(a1).kind else {
        unreachable!()
    };
    let InstKind::Alloca { frame: f2, .. } = ctx.module.inst(a2).kind else {
        unreachable!()
    };
    let (f1, f2) = (f1.unwrap(), f2.unwrap());
    assert_ne!(f1, f2);
    assert_eq!(func.frame_objects[f1 as usize].size, 8);
    assert_eq!(func.frame_objects[f2 as usize].size, 32);
    // Offsets are left for the backend.
    assert!(func.frame_objects.iter().all(|fo| fo.offset.is_none()));
}

#[test]
fn loads_from_register_addresses_carry_a_size() {
    let handler = Handler::new();
    let mut ctx = fresh_ctx(&handler);
    let integer = ctx.ast.types.integer;
    let void = ctx.ast.types.void;
    let int_ptr = ctx.ast.types.pointer_to(integer);
    let int_ptr_ptr = ctx.ast.types.pointer_to(int_ptr);

    let f = ctx.module.create_function(
        "f",
        integer,
        &[],
        Linkage::Internal,
        FuncAttrs::empty(),
        true,
        Span::DUMMY,
    );
    let entry = ctx.module.func(f).entry_block();
    let slot = ctx.module.insert_new(
        entry,
        InstKind::Alloca { size: 8, frame: None },
        int_ptr_ptr,
        Span::DUMMY,
    );
    // The first load's address is a frame object; the second's is the
    // register produced by the first.
    let p = ctx
        .module
        .insert_new(entry, InstKind::Load { addr: slot }, int_ptr, Span::DUMMY);
    let v = ctx
        .module
        .insert_new(entry, InstKind::Load { addr: p }, integer, Span::DUMMY);
    ctx.module
        .insert_new(entry, InstKind::Return { value: Some(v) }, void, Span::DUMMY);

    let mir = mir_from_ir(&mut ctx);
    let func = mir.functions.iter().next().unwrap();
    let loads: Vec<_> = func
        .blocks
        .iter()
        .flat_map(|b| b.insts.iter())
        .map(|&i| &func.insts[i])
        .filter(|i| i.opcode == MirOp::Load.as_u32())
        .collect();
    assert_eq!(loads.len(), 2);
    assert!(matches!(loads[0].get_op(0), MirOperand::Local(_)));
    assert_eq!(loads[0].operands.len(), 1);
    assert!(matches!(loads[1].get_op(0), MirOperand::Register { .. }));
    assert_eq!(*loads[1].get_op(1), MirOperand::Immediate(8));
}

#[test]
fn full_pipeline_if_expression_lowers_clean() {
    // Lower an if-expression AST end to end, then translate it; the join
    // phi must come out as copies on both edges.
    let mut ast = Ast::new("pipeline.as");
    let integer = ast.types.integer;
    let cond = ast.lit_int(1, integer, Span::DUMMY);
    let one = ast.lit_int(1, integer, Span::DUMMY);
    let two = ast.lit_int(2, integer, Span::DUMMY);
    let if_expr = ast.add(
        NodeKind::If {
            cond,
            then_branch: one,
            else_branch: Some(two),
        },
        integer,
        Span::DUMMY,
    );
    let decl = ast.local_decl("x", integer, Some(if_expr), Span::DUMMY);
    let root = ast.add(NodeKind::Root { children: vec![decl] }, integer, Span::DUMMY);
    ast.root = Some(root);

    let handler = Handler::new();
    let mut ctx = CodegenContext::new(ast, target(), &handler);
    asterc_ir::build::build(&mut ctx);
    assert!(!handler.has_errors());

    let mir = mir_from_ir(&mut ctx);
    let main = mir.functions.iter().next().unwrap();

    let ops = opcodes_of(main);
    assert!(!ops.contains(&MirOp::Phi.as_u32()));
    assert!(!ops.contains(&MirOp::Immediate.as_u32()));

    // Both arms branch unconditionally, so the copies sit in the arm
    // blocks themselves, right before their terminators, writing the same
    // virtual register.
    let copies: Vec<_> = main
        .blocks
        .iter()
        .flat_map(|b| b.insts.iter())
        .map(|&i| &main.insts[i])
        .filter(|i| i.opcode == MirOp::Copy.as_u32())
        .collect();
    assert_eq!(copies.len(), 2);
    assert_eq!(copies[0].reg, copies[1].reg);
    assert_eq!(*copies[0].get_op(0), MirOperand::Immediate(1));
    assert_eq!(*copies[1].get_op(0), MirOperand::Immediate(2));
}
