//! Driver entry point scenarios: emission, dump modes, failure paths and
//! exit codes.

use asterc_ast::{Ast, BinaryOp, NodeKind};
use asterc_drv::{codegen, exit_code, CodegenOptions, CodegenOutcome, DumpMode};
use asterc_ir::{Arch, CallConv, Language, TargetFormat};
use asterc_util::span::Span;
use std::path::Path;

/// A minimal unit: `x : integer := 1 + 2`
fn simple_ast() -> Ast {
    let mut ast = Ast::new("unit.as");
    let integer = ast.types.integer;
    let a = ast.lit_int(1, integer, Span::DUMMY);
    let b = ast.lit_int(2, integer, Span::DUMMY);
    let sum = ast.binary(BinaryOp::Add, a, b, integer, Span::DUMMY);
    let decl = ast.local_decl("x", integer, Some(sum), Span::DUMMY);
    let root = ast.add(NodeKind::Root { children: vec![decl] }, integer, Span::DUMMY);
    ast.root = Some(root);
    ast
}

/// A unit with a guaranteed codegen diagnostic: subscripting an integer.
fn faulty_ast() -> Ast {
    let mut ast = Ast::new("bad.as");
    let integer = ast.types.integer;
    let lhs = ast.lit_int(1, integer, Span::DUMMY);
    let rhs = ast.lit_int(0, integer, Span::DUMMY);
    let subs = ast.binary(BinaryOp::Subscript, lhs, rhs, integer, Span::DUMMY);
    let decl = ast.local_decl("x", integer, Some(subs), Span::DUMMY);
    let root = ast.add(NodeKind::Root { children: vec![decl] }, integer, Span::DUMMY);
    ast.root = Some(root);
    ast
}

#[test]
fn native_emission_writes_assembly() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("unit.s");
    let result = codegen(
        Language::Aster,
        Arch::X86_64,
        TargetFormat::Native,
        CallConv::SysV,
        Path::new("unit.as"),
        &out,
        simple_ast(),
        "",
        &CodegenOptions::default(),
    );
    assert_eq!(result.unwrap(), CodegenOutcome::Emitted);
    let text = std::fs::read_to_string(&out).unwrap();
    assert!(text.contains(".globl main"));
    assert!(text.contains("main:"));
    assert!(text.contains("pushq %rbp"));
    assert!(text.contains("ret"));
}

#[test]
fn llvm_emission_writes_ir_text() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("unit.ll");
    let result = codegen(
        Language::Aster,
        Arch::None,
        TargetFormat::Llvm,
        CallConv::SysV,
        Path::new("unit.as"),
        &out,
        simple_ast(),
        "",
        &CodegenOptions::default(),
    );
    assert_eq!(result.unwrap(), CodegenOutcome::Emitted);
    let text = std::fs::read_to_string(&out).unwrap();
    assert!(text.contains("define i64 @main"));
    assert!(text.contains("ret"));
}

#[test]
fn diagnostics_fail_the_call_with_exit_code_one() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("bad.s");
    let result = codegen(
        Language::Aster,
        Arch::X86_64,
        TargetFormat::Native,
        CallConv::SysV,
        Path::new("bad.as"),
        &out,
        faulty_ast(),
        "",
        &CodegenOptions::default(),
    );
    assert!(result.is_err());
    assert_eq!(exit_code(&result), 1);
    // The handle was closed; the file exists with unspecified contents.
    assert!(out.exists());
}

#[test]
fn textual_ir_input_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("ir.s");
    let result = codegen(
        Language::Ir,
        Arch::X86_64,
        TargetFormat::Native,
        CallConv::SysV,
        Path::new("unit.ir"),
        &out,
        simple_ast(),
        "%0 = add 1, 2",
        &CodegenOptions::default(),
    );
    assert!(result.is_err());
    assert_eq!(exit_code(&result), 1);
}

#[test]
fn dump_modes_exit_with_42() {
    for dump in [DumpMode::PrintIr, DumpMode::PrintDotCfg, DumpMode::PrintDotDj] {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("unit.s");
        let result = codegen(
            Language::Aster,
            Arch::X86_64,
            TargetFormat::Native,
            CallConv::SysV,
            Path::new("unit.as"),
            &out,
            simple_ast(),
            "",
            &CodegenOptions { dump: Some(dump) },
        );
        let outcome = result.unwrap();
        assert_eq!(outcome, CodegenOutcome::DebugDumped);
        assert_eq!(outcome.exit_code(), 42);
        // Nothing was written to the output artifact.
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "");
    }
}

#[test]
fn success_maps_to_exit_code_zero() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("unit.s");
    let result = codegen(
        Language::Aster,
        Arch::X86_64,
        TargetFormat::Native,
        CallConv::SysV,
        Path::new("unit.as"),
        &out,
        simple_ast(),
        "",
        &CodegenOptions::default(),
    );
    assert_eq!(exit_code(&result), 0);
}

#[test]
fn syscalls_are_rejected_under_mswin() {
    let mut ast = Ast::new("sys.as");
    let integer = ast.types.integer;
    let num = ast.lit_int(60, integer, Span::DUMMY);
    let call = ast.add(
        NodeKind::IntrinsicCall {
            kind: asterc_ast::IntrinsicKind::Syscall,
            args: vec![num],
        },
        integer,
        Span::DUMMY,
    );
    let decl = ast.local_decl("r", integer, Some(call), Span::DUMMY);
    let root = ast.add(NodeKind::Root { children: vec![decl] }, integer, Span::DUMMY);
    ast.root = Some(root);

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("sys.s");
    let result = codegen(
        Language::Aster,
        Arch::X86_64,
        TargetFormat::Native,
        CallConv::MsWin,
        Path::new("sys.as"),
        &out,
        ast,
        "",
        &CodegenOptions::default(),
    );
    assert!(result.is_err());
    assert_eq!(exit_code(&result), 1);
}
