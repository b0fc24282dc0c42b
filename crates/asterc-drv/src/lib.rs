//! asterc-drv - The code-generation driver.
//!
//! [`codegen`] is the top-level entry point: it takes a type-checked AST
//! plus the target description, runs AST-to-IR lowering, name mangling, MIR
//! translation and backend emission in order, and writes the artifact to
//! the output path. Once a fatal diagnostic is recorded, no later pass runs
//! and the call fails; the output file's contents are then unspecified, but
//! its handle is always closed.
//!
//! Exit codes follow the compiler convention: 0 on success, 1 on any
//! diagnostic error, 42 when one of the debug-dump modes was selected.

use asterc_ast::Ast;
use asterc_gen::CodeGenError;
use asterc_ir::{build::build, print, Arch, CallConv, CodegenContext, Language, TargetDesc, TargetFormat};
use asterc_mir::mir_from_ir;
use asterc_util::diagnostic::Handler;
use anyhow::Context;
use std::io::Write;
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Errors produced by the driver itself
#[derive(Debug, Error)]
pub enum DriverError {
    /// The textual IR input path has no parser
    #[error("textual IR input is not supported")]
    IrInputUnsupported,

    /// Lowering reported diagnostics at severity error
    #[error("compilation failed with {0} error(s)")]
    CompileFailed(usize),

    /// The architecture/format combination has no backend
    #[error("no backend for {arch:?} with {format:?} output")]
    NoBackend { arch: Arch, format: TargetFormat },

    /// Backend failure
    #[error(transparent)]
    CodeGen(#[from] CodeGenError),
}

/// Debug-dump modes selectable instead of normal emission
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DumpMode {
    /// Dump the dominator tree with join edges in dot format
    PrintDotDj,
    /// Dump the control-flow graph in dot format
    PrintDotCfg,
    /// Dump the IR as text
    PrintIr,
}

/// Driver options beyond the target description
#[derive(Clone, Copy, Debug, Default)]
pub struct CodegenOptions {
    /// When set, dump the selected view to standard output and stop
    pub dump: Option<DumpMode>,
}

/// What a successful driver run produced
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodegenOutcome {
    /// The output path holds the emitted artifact
    Emitted,
    /// A debug dump was written to standard output instead
    DebugDumped,
}

impl CodegenOutcome {
    pub fn exit_code(self) -> i32 {
        match self {
            CodegenOutcome::Emitted => 0,
            CodegenOutcome::DebugDumped => 42,
        }
    }
}

/// Map a driver result to its process exit code
pub fn exit_code(result: &anyhow::Result<CodegenOutcome>) -> i32 {
    match result {
        Ok(outcome) => outcome.exit_code(),
        Err(_) => 1,
    }
}

/// Run code generation for one compilation unit.
///
/// `input_path` is only consulted for diagnostics and the (unsupported)
/// textual IR path; `ir_source` carries that path's input text.
#[allow(clippy::too_many_arguments)]
pub fn codegen(
    language: Language,
    arch: Arch,
    format: TargetFormat,
    call_conv: CallConv,
    input_path: &Path,
    output_path: &Path,
    ast: Ast,
    ir_source: &str,
    options: &CodegenOptions,
) -> anyhow::Result<CodegenOutcome> {
    // Open the output early so a bad path fails before any work happens.
    let mut output = std::fs::File::create(output_path)
        .with_context(|| format!("failed to create output file {}", output_path.display()))?;

    let target = TargetDesc {
        language,
        arch,
        format,
        call_conv,
    };
    let handler = Handler::new();
    let mut ctx = CodegenContext::new(ast, target, &handler);

    match language {
        Language::Ir => {
            let _ = (input_path, ir_source);
            return Err(DriverError::IrInputUnsupported.into());
        }
        Language::Aster => {
            info!(unit = %ctx.ast.filename, "generating code");
            build(&mut ctx);
        }
    }

    // Don't run any later pass over a faulty program.
    if handler.has_errors() {
        report_diagnostics(&ctx, &handler);
        return Err(DriverError::CompileFailed(handler.error_count()).into());
    }

    if let Some(dump) = options.dump {
        let text = match dump {
            DumpMode::PrintDotDj => print::print_dot_dj(&ctx.module),
            DumpMode::PrintDotCfg => print::print_dot_cfg(&ctx.module),
            DumpMode::PrintIr => print::print_ir(&ctx.module),
        };
        print!("{text}");
        return Ok(CodegenOutcome::DebugDumped);
    }

    let text = match (format, arch) {
        (TargetFormat::Llvm, _) => asterc_gen::llvm::emit_llvm(&ctx)?,
        (TargetFormat::Native, Arch::X86_64) => {
            asterc_gen::x86_64::lower_early(&mut ctx)?;
            let mut mir = mir_from_ir(&mut ctx);
            asterc_gen::x86_64::emit_x86_64(&ctx, &mut mir)?
        }
        (TargetFormat::Native, Arch::None) => {
            return Err(DriverError::NoBackend { arch, format }.into());
        }
    };

    output
        .write_all(text.as_bytes())
        .with_context(|| format!("failed to write {}", output_path.display()))?;
    Ok(CodegenOutcome::Emitted)
}

fn report_diagnostics(ctx: &CodegenContext, handler: &Handler) {
    for diag in handler.diagnostics() {
        eprintln!(
            "{}: {}: {} (bytes {}..{})",
            ctx.ast.filename, diag.level, diag.message, diag.span.start, diag.span.end
        );
        for note in &diag.notes {
            eprintln!("{}: note: {note}", ctx.ast.filename);
        }
    }
}
