//! Textual LLVM IR emission.
//!
//! Generates `.ll` text straight from the IR, with no LLVM bindings, so the
//! LLVM target needs nothing installed at build time. Pointers are emitted
//! as opaque `ptr`, and pointer arithmetic produced by the builder (adds of
//! byte offsets onto addresses) becomes byte-wise `getelementptr`.

use crate::error::{CodeGenError, Result};
use asterc_ast::{Linkage, TypeStore};
use asterc_ir::{Callee, CodegenContext, FuncId, InstId, InstKind, IrModule, StaticInit};
use asterc_util::FxHashMap;
use std::fmt::Write;
use tracing::debug;

/// Emit the whole module as LLVM IR text.
pub fn emit_llvm(ctx: &CodegenContext) -> Result<String> {
    let mut emitter = LlvmEmitter {
        ir: &ctx.module,
        types: &ctx.ast.types,
        strings: &ctx.ast.strings,
        out: String::new(),
        names: FxHashMap::default(),
        need_debugtrap: false,
        need_memcpy: false,
    };
    emitter.run(&ctx.ast.filename)?;
    Ok(emitter.out)
}

struct LlvmEmitter<'a> {
    ir: &'a IrModule,
    types: &'a TypeStore,
    strings: &'a [String],
    out: String,
    /// Rendered value for each instruction that has one
    names: FxHashMap<InstId, String>,
    need_debugtrap: bool,
    need_memcpy: bool,
}

impl<'a> LlvmEmitter<'a> {
    fn run(&mut self, unit: &str) -> Result<()> {
        debug!(unit, "emitting LLVM IR");
        let ir = self.ir;
        writeln!(self.out, "; ModuleID = '{unit}'")?;
        writeln!(self.out)?;

        for var in ir.statics.iter() {
            let name = &var.name;
            match (&var.init, var.linkage) {
                (_, Linkage::Imported) => {
                    let ty = llvm_type(self.types, var.ty);
                    writeln!(self.out, "@{name} = external global {ty}")?;
                }
                (Some(StaticInit::Int(value)), linkage) => {
                    let ty = llvm_type(self.types, var.ty);
                    let vis = linkage_keyword(linkage);
                    writeln!(self.out, "@{name} = {vis}global {ty} {value}")?;
                }
                (Some(StaticInit::String(index)), linkage) => {
                    let text = &self.strings[*index];
                    let vis = linkage_keyword(linkage);
                    writeln!(
                        self.out,
                        "@{name} = {vis}global [{} x i8] c\"{}\\00\"",
                        text.len() + 1,
                        escape_llvm(text)
                    )?;
                }
                (None, linkage) => {
                    let ty = llvm_type(self.types, var.ty);
                    let vis = linkage_keyword(linkage);
                    writeln!(self.out, "@{name} = {vis}global {ty} zeroinitializer")?;
                }
            }
        }
        writeln!(self.out)?;

        for (f, func) in ir.funcs.iter_enumerated() {
            let ret = llvm_type(self.types, self.types.fn_ret(func.ty));
            let params: Vec<String> = func
                .params
                .iter()
                .enumerate()
                .map(|(i, &p)| format!("{} %arg{i}", llvm_type(self.types, ir.inst(p).ty)))
                .collect();
            if !func.is_definition {
                writeln!(
                    self.out,
                    "declare {ret} @{}({})",
                    func.linkage_name(),
                    params.join(", ")
                )?;
                continue;
            }
            writeln!(
                self.out,
                "define {ret} @{}({}) {{",
                func.linkage_name(),
                params.join(", ")
            )?;
            for &b in &func.blocks {
                writeln!(self.out, "{}:", ir.block(b).name)?;
                for &inst in &ir.block(b).insts {
                    self.emit_inst(f, inst)?;
                }
            }
            writeln!(self.out, "}}")?;
            writeln!(self.out)?;
        }

        if self.need_debugtrap {
            writeln!(self.out, "declare void @llvm.debugtrap()")?;
        }
        if self.need_memcpy {
            writeln!(
                self.out,
                "declare void @llvm.memcpy.p0.p0.i64(ptr, ptr, i64, i1)"
            )?;
        }
        Ok(())
    }

    /// The rendered value of an instruction used as an operand.
    fn value_of(&self, inst: InstId) -> String {
        match &self.ir.inst(inst).kind {
            InstKind::Immediate(v) => format!("{v}"),
            InstKind::Parameter(i) => format!("%arg{i}"),
            InstKind::StaticRef(var) => format!("@{}", self.ir.static_var(*var).name),
            InstKind::FuncRef(f) => format!("@{}", self.ir.func(*f).linkage_name()),
            _ => self
                .names
                .get(&inst)
                .cloned()
                .unwrap_or_else(|| panic!("IR %{} used before emission", inst.0)),
        }
    }

    fn ty_of(&self, inst: InstId) -> String {
        llvm_type(self.types, self.ir.inst(inst).ty)
    }

    fn emit_inst(&mut self, _f: FuncId, id: InstId) -> Result<()> {
        let inst = self.ir.inst(id).clone();
        match &inst.kind {
            // Pure operands; nothing to emit.
            InstKind::Immediate(_) | InstKind::StaticRef(_) | InstKind::FuncRef(_) => {}

            InstKind::Alloca { .. } => {
                let allocated = llvm_type(self.types, self.types.element_of(inst.ty));
                writeln!(self.out, "  %v{} = alloca {allocated}", id.0)?;
                self.names.insert(id, format!("%v{}", id.0));
            }

            InstKind::Load { addr } => {
                let ty = self.ty_of(id);
                let a = self.value_of(*addr);
                writeln!(self.out, "  %v{} = load {ty}, ptr {a}", id.0)?;
                self.names.insert(id, format!("%v{}", id.0));
            }

            InstKind::Store { value, addr } => {
                let ty = self.ty_of(*value);
                let v = self.value_of(*value);
                let a = self.value_of(*addr);
                writeln!(self.out, "  store {ty} {v}, ptr {a}")?;
            }

            InstKind::Copy { value } => {
                // LLVM has no copy; forward the operand's rendering.
                let v = self.value_of(*value);
                self.names.insert(id, v);
            }

            InstKind::Bitcast { value } => {
                let from = self.ty_of(*value);
                let to = self.ty_of(id);
                let v = self.value_of(*value);
                if from == to {
                    self.names.insert(id, v);
                } else if from == "ptr" {
                    writeln!(self.out, "  %v{} = ptrtoint ptr {v} to {to}", id.0)?;
                    self.names.insert(id, format!("%v{}", id.0));
                } else if to == "ptr" {
                    writeln!(self.out, "  %v{} = inttoptr {from} {v} to ptr", id.0)?;
                    self.names.insert(id, format!("%v{}", id.0));
                } else {
                    writeln!(self.out, "  %v{} = bitcast {from} {v} to {to}", id.0)?;
                    self.names.insert(id, format!("%v{}", id.0));
                }
            }

            InstKind::SExt { value } | InstKind::ZExt { value } | InstKind::Trunc { value } => {
                let mnem = match inst.kind {
                    InstKind::SExt { .. } => "sext",
                    InstKind::ZExt { .. } => "zext",
                    _ => "trunc",
                };
                let from = self.ty_of(*value);
                let to = self.ty_of(id);
                let v = self.value_of(*value);
                writeln!(self.out, "  %v{} = {mnem} {from} {v} to {to}", id.0)?;
                self.names.insert(id, format!("%v{}", id.0));
            }

            InstKind::Add { lhs, rhs } if self.ty_of(id) == "ptr" => {
                // Address arithmetic: byte-wise getelementptr.
                let base = self.value_of(*lhs);
                let off = self.value_of(*rhs);
                let off_ty = self.ty_of(*rhs);
                writeln!(
                    self.out,
                    "  %v{} = getelementptr i8, ptr {base}, {off_ty} {off}",
                    id.0
                )?;
                self.names.insert(id, format!("%v{}", id.0));
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
            | InstKind::Or { lhs, rhs } => {
                let signed = self.types.is_signed(inst.ty);
                let mnem = match inst.kind {
                    InstKind::Add { .. } => "add",
                    InstKind::Sub { .. } => "sub",
                    InstKind::Mul { .. } => "mul",
                    InstKind::Div { .. } => {
                        if signed {
                            "sdiv"
                        } else {
                            "udiv"
                        }
                    }
                    InstKind::Mod { .. } => {
                        if signed {
                            "srem"
                        } else {
                            "urem"
                        }
                    }
                    InstKind::Shl { .. } => "shl",
                    InstKind::Sar { .. } => "ashr",
                    InstKind::Shr { .. } => "lshr",
                    InstKind::And { .. } => "and",
                    _ => "or",
                };
                let ty = self.ty_of(id);
                let a = self.value_of(*lhs);
                let b = self.value_of(*rhs);
                writeln!(self.out, "  %v{} = {mnem} {ty} {a}, {b}", id.0)?;
                self.names.insert(id, format!("%v{}", id.0));
            }

            InstKind::Not { value } => {
                let ty = self.ty_of(id);
                let v = self.value_of(*value);
                writeln!(self.out, "  %v{} = xor {ty} {v}, -1", id.0)?;
                self.names.insert(id, format!("%v{}", id.0));
            }

            InstKind::Lt { lhs, rhs }
            | InstKind::Le { lhs, rhs }
            | InstKind::Gt { lhs, rhs }
            | InstKind::Ge { lhs, rhs }
            | InstKind::Eq { lhs, rhs }
            | InstKind::Ne { lhs, rhs } => {
                let signed = self.types.is_signed(self.ir.inst(*lhs).ty);
                let cond = match (&inst.kind, signed) {
                    (InstKind::Lt { .. }, true) => "slt",
                    (InstKind::Lt { .. }, false) => "ult",
                    (InstKind::Le { .. }, true) => "sle",
                    (InstKind::Le { .. }, false) => "ule",
                    (InstKind::Gt { .. }, true) => "sgt",
                    (InstKind::Gt { .. }, false) => "ugt",
                    (InstKind::Ge { .. }, true) => "sge",
                    (InstKind::Ge { .. }, false) => "uge",
                    (InstKind::Eq { .. }, _) => "eq",
                    _ => "ne",
                };
                let operand_ty = self.ty_of(*lhs);
                let a = self.value_of(*lhs);
                let b = self.value_of(*rhs);
                let result_ty = self.ty_of(id);
                writeln!(
                    self.out,
                    "  %v{}.cmp = icmp {cond} {operand_ty} {a}, {b}",
                    id.0
                )?;
                writeln!(
                    self.out,
                    "  %v{} = zext i1 %v{}.cmp to {result_ty}",
                    id.0, id.0
                )?;
                self.names.insert(id, format!("%v{}", id.0));
            }

            InstKind::Branch { target } => {
                writeln!(self.out, "  br label %{}", self.ir.block(*target).name)?;
            }

            InstKind::CondBranch {
                cond,
                then_target,
                else_target,
            } => {
                let ty = self.ty_of(*cond);
                let c = self.value_of(*cond);
                writeln!(self.out, "  %v{}.cond = icmp ne {ty} {c}, 0", id.0)?;
                writeln!(
                    self.out,
                    "  br i1 %v{}.cond, label %{}, label %{}",
                    id.0,
                    self.ir.block(*then_target).name,
                    self.ir.block(*else_target).name
                )?;
            }

            InstKind::Return { value } => match value {
                Some(value) => {
                    let ty = self.ty_of(*value);
                    let v = self.value_of(*value);
                    writeln!(self.out, "  ret {ty} {v}")?;
                }
                None => writeln!(self.out, "  ret void")?,
            },

            InstKind::Unreachable => {
                writeln!(self.out, "  unreachable")?;
            }

            InstKind::Phi { args } => {
                let ty = self.ty_of(id);
                let rendered: Vec<String> = args
                    .iter()
                    .map(|arg| {
                        format!(
                            "[ {}, %{} ]",
                            self.value_of(arg.value),
                            self.ir.block(arg.block).name
                        )
                    })
                    .collect();
                writeln!(self.out, "  %v{} = phi {ty} {}", id.0, rendered.join(", "))?;
                self.names.insert(id, format!("%v{}", id.0));
            }

            InstKind::Call { callee, args, .. } => {
                let ret = self.ty_of(id);
                let rendered: Vec<String> = args
                    .iter()
                    .map(|&a| format!("{} {}", self.ty_of(a), self.value_of(a)))
                    .collect();
                let target = match callee {
                    Callee::Direct(f) => format!("@{}", self.ir.func(*f).linkage_name()),
                    Callee::Indirect(value) => self.value_of(*value),
                };
                if ret == "void" {
                    writeln!(self.out, "  call void {target}({})", rendered.join(", "))?;
                } else {
                    writeln!(
                        self.out,
                        "  %v{} = call {ret} {target}({})",
                        id.0,
                        rendered.join(", ")
                    )?;
                    self.names.insert(id, format!("%v{}", id.0));
                }
            }

            InstKind::Intrinsic { kind, args } => match kind {
                asterc_ast::IntrinsicKind::DebugTrap => {
                    self.need_debugtrap = true;
                    writeln!(self.out, "  call void @llvm.debugtrap()")?;
                }
                asterc_ast::IntrinsicKind::Memcpy => {
                    self.need_memcpy = true;
                    let dest = self.value_of(args[0]);
                    let src = self.value_of(args[1]);
                    let len_ty = self.ty_of(args[2]);
                    let len = self.value_of(args[2]);
                    writeln!(
                        self.out,
                        "  call void @llvm.memcpy.p0.p0.i64(ptr {dest}, ptr {src}, {len_ty} {len}, i1 false)"
                    )?;
                }
                other => {
                    return Err(CodeGenError::Unsupported(format!(
                        "intrinsic {other:?} in LLVM output"
                    )))
                }
            },

            InstKind::Register(_) | InstKind::Parameter(_) => {
                return Err(CodeGenError::UnloweredInstruction(format!(
                    "{} in a block during LLVM emission",
                    inst.kind.mnemonic()
                )))
            }
            InstKind::InternedString(_) | InstKind::Poison => {
                return Err(CodeGenError::UnloweredInstruction(
                    inst.kind.mnemonic().to_string(),
                ))
            }
        }
        Ok(())
    }
}

fn linkage_keyword(linkage: Linkage) -> &'static str {
    match linkage {
        Linkage::Internal | Linkage::LocalVar => "internal ",
        Linkage::Exported | Linkage::Reexported => "",
        Linkage::Imported => "external ",
    }
}

/// Render a type for LLVM IR; pointers are opaque.
fn llvm_type(types: &TypeStore, ty: asterc_ast::TypeId) -> String {
    use asterc_ast::Type;
    match types.get(types.resolve(ty)) {
        Type::Primitive { size: 0, .. } => "void".to_string(),
        Type::Primitive { size, .. } => format!("i{}", size * 8),
        Type::Integer { bits, .. } => format!("i{bits}"),
        Type::Pointer { .. } | Type::Reference { .. } | Type::Function { .. } => {
            "ptr".to_string()
        }
        Type::Array { of, len } => format!("[{len} x {}]", llvm_type(types, *of)),
        Type::Struct { .. } => {
            let size = types.size_of(ty).max(1);
            format!("[{size} x i8]")
        }
        Type::Named { name, .. } => panic!("unresolved named type '{name}' in LLVM emission"),
    }
}

fn escape_llvm(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'"' | b'\\' => out.push_str(&format!("\\{byte:02X}")),
            0x20..=0x7e => out.push(byte as char),
            other => out.push_str(&format!("\\{other:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use asterc_ast::{Ast, FuncAttrs, NodeKind};
    use asterc_ir::{build::build, Arch, CallConv, Language, TargetDesc, TargetFormat};
    use asterc_util::diagnostic::Handler;
    use asterc_util::span::Span;

    fn target() -> TargetDesc {
        TargetDesc {
            language: Language::Aster,
            arch: Arch::None,
            format: TargetFormat::Llvm,
            call_conv: CallConv::SysV,
        }
    }

    #[test]
    fn emits_main_with_phi() {
        let mut ast = Ast::new("llvm.as");
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
        build(&mut ctx);
        assert!(!handler.has_errors());

        let text = emit_llvm(&ctx).unwrap();
        assert!(text.contains("define i64 @main(i32 %arg0, ptr %arg1, ptr %arg2) {"));
        assert!(text.contains("phi i64 [ 1, %bb1 ], [ 2, %bb2 ]"));
        assert!(text.contains("alloca i64"));
        assert!(text.contains("store i64"));
    }

    #[test]
    fn string_statics_are_escaped() {
        let mut ast = Ast::new("str.as");
        let byte = ast.types.byte;
        let str_ty = ast.types.array_of(byte, 2);
        let s = ast.lit_str("a\"b", str_ty, Span::DUMMY);
        let decl = ast.local_decl("x", str_ty, Some(s), Span::DUMMY);
        let root = ast.add(
            NodeKind::Root { children: vec![decl] },
            ast.types.integer,
            Span::DUMMY,
        );
        ast.root = Some(root);

        let handler = Handler::new();
        let mut ctx = CodegenContext::new(ast, target(), &handler);
        build(&mut ctx);
        let text = emit_llvm(&ctx).unwrap();
        assert!(text.contains("@__str_lit0 = internal global [4 x i8] c\"a\\22b\\00\""));
    }

    #[test]
    fn extern_functions_become_declares() {
        let mut ast = Ast::new("ext.as");
        let integer = ast.types.integer;
        let void = ast.types.void;
        let f_ty = ast.types.function(
            integer,
            vec![asterc_ast::Param {
                name: "n".to_string(),
                ty: integer,
            }],
            FuncAttrs::empty(),
        );
        let f_param = ast.local_decl("n", integer, None, Span::DUMMY);
        let f_node = ast.add(
            NodeKind::Function {
                name: "getpid".to_string(),
                params: vec![f_param],
                body: None,
                linkage: asterc_ast::Linkage::Imported,
            },
            f_ty,
            Span::DUMMY,
        );
        ast.functions = vec![f_node];
        let root = ast.add(NodeKind::Root { children: vec![] }, void, Span::DUMMY);
        ast.root = Some(root);

        let handler = Handler::new();
        let mut ctx = CodegenContext::new(ast, target(), &handler);
        build(&mut ctx);
        let text = emit_llvm(&ctx).unwrap();
        assert!(text.contains("declare i64 @"));
    }
}
