//! AST to IR lowering.
//!
//! The builder walks the typed AST and emits IR into the context's current
//! insertion point. Every node is emitted at most once; the context's side
//! tables remember the value and/or address instruction a node produced, so
//! a node reached twice (say, a subscript base considered first as rvalue
//! and then as lvalue) reuses the first emission.
//!
//! Emission functions return `Option<InstId>`: `None` means the node either
//! produces no value (void expressions) or failed with a diagnostic already
//! reported through the handler. Callers that require a value bail out on
//! `None`; sequences keep going so one bad expression doesn't hide later
//! errors in the same function.

use crate::context::CodegenContext;
use crate::ir::{Callee, InstId, InstKind, StaticInit};
use crate::mangle::mangle_function_name;
use crate::target::CallConv;
use asterc_ast::{
    BinaryOp, FuncAttrs, IntrinsicKind, Linkage, LiteralKind, Node, NodeId, NodeKind, Param, Type,
    UnaryOp,
};
use asterc_util::span::Span;
use tracing::{debug, trace};

/// Lower the whole compilation unit: synthesise the entry function, create
/// every user function, emit imported declarations, the entry body and each
/// function body, then mangle function names.
pub fn build(ctx: &mut CodegenContext) {
    debug!(unit = %ctx.ast.filename, "lowering AST to IR");

    let entry = if !ctx.ast.is_module {
        let c_int = ctx.ast.types.c_int;
        let byte = ctx.ast.types.byte;
        let byte_ptr = ctx.ast.types.pointer_to(byte);
        let byte_ptr_ptr = ctx.ast.types.pointer_to(byte_ptr);
        let integer = ctx.ast.types.integer;
        let params = vec![
            Param {
                name: "__argc__".to_string(),
                ty: c_int,
            },
            Param {
                name: "__argv__".to_string(),
                ty: byte_ptr_ptr,
            },
            Param {
                name: "__envp__".to_string(),
                ty: byte_ptr_ptr,
            },
        ];
        let main_ty = ctx
            .ast
            .types
            .function(integer, params, FuncAttrs::empty());
        ctx.module.create_function(
            "main",
            main_ty,
            &[c_int, byte_ptr_ptr, byte_ptr_ptr],
            Linkage::Exported,
            FuncAttrs::NOMANGLE,
            true,
            Span::DUMMY,
        )
    } else {
        let void = ctx.ast.types.void;
        let entry_ty = ctx.ast.types.function(void, Vec::new(), FuncAttrs::empty());
        ctx.module.create_function(
            format!("__module{}_entry", ctx.ast.module_name),
            entry_ty,
            &[],
            Linkage::Exported,
            FuncAttrs::NOMANGLE,
            true,
            Span::DUMMY,
        )
    };
    ctx.entry = Some(entry);

    // Create the remaining functions up front so forward references and
    // direct calls resolve, propagating the shared attributes from the
    // function type.
    let function_nodes = ctx.ast.functions.clone();
    for &fnode in &function_nodes {
        let node = ctx.ast.node(fnode);
        let (name, linkage, has_body) = match &node.kind {
            NodeKind::Function {
                name,
                linkage,
                body,
                ..
            } => (name.clone(), *linkage, body.is_some()),
            other => panic!("function list contains non-function node {other:?}"),
        };
        let ty = node.ty;
        let span = node.span;
        let attrs = ctx.ast.types.fn_attrs(ty);
        let param_types: Vec<_> = ctx.ast.types.fn_params(ty).iter().map(|p| p.ty).collect();
        let f = ctx
            .module
            .create_function(name, ty, &param_types, linkage, attrs, has_body, span);
        ctx.func_irs.insert(fnode, f);
    }

    // Imported declarations need an address instruction, just like regular
    // declarations.
    ctx.func = Some(entry);
    ctx.insert_point = Some(ctx.module.func(entry).entry_block());
    let imports = ctx.ast.imports.clone();
    for import in &imports {
        for &n in &import.exports {
            if matches!(ctx.ast.node(n).kind, NodeKind::Declaration { .. }) {
                emit_lvalue(ctx, n);
            }
        }
    }

    // Emit the entry body.
    if let Some(root) = ctx.ast.root {
        emit_expr(ctx, root);
    }

    // Emit the remaining functions that aren't extern.
    for &fnode in &function_nodes {
        let f = ctx.func_irs[&fnode];
        if ctx.module.func(f).is_definition {
            emit_function(ctx, fnode);
        }
    }

    // Mangle names last, so diagnostics during emission always saw the
    // source-level names.
    for f in ctx.module.funcs.indices().collect::<Vec<_>>() {
        mangle_function_name(ctx, f);
    }
}

/// Emit a function body.
fn emit_function(ctx: &mut CodegenContext, fnode: NodeId) {
    let f = ctx.func_irs[&fnode];
    trace!(func = %ctx.module.func(f).name, "emitting function");
    ctx.func = Some(f);
    ctx.insert_point = Some(ctx.module.func(f).entry_block());

    let node = ctx.ast.node(fnode).clone();
    let NodeKind::Function { params, body, .. } = &node.kind else {
        panic!("emit_function on non-function node");
    };
    let body = body.expect("emit_function on a function without a body");
    let params = params.clone();

    // Emit all parameter declarations and store the initial parameter
    // values into them.
    for (i, &decl) in params.iter().enumerate() {
        let p = ctx.module.func(f).params[i];
        let decl_node = ctx.ast.node(decl);
        let decl_ty = decl_node.ty;
        let decl_span = decl_node.span;
        if ctx.ast.types.is_reference(decl_ty) {
            // References are already addresses; the parameter instruction
            // itself is the declaration's address.
            ctx.addresses.insert(decl, p);
        } else if parameter_is_passed_as_pointer(ctx, f, i) {
            let pty = ctx.module.inst(p).ty;
            let ptr = ctx.ast.types.pointer_to(pty);
            ctx.module.set_type(p, ptr);
            ctx.addresses.insert(decl, p);
        } else {
            let Some(addr) = emit_lvalue(ctx, decl) else {
                continue;
            };
            let void = ctx.ast.types.void;
            ctx.insert(InstKind::Store { value: p, addr }, void, decl_span);
        }
    }

    emit_expr(ctx, body);

    // If we can still fall off the end, return the body's value, or nothing
    // for void functions.
    if !ctx.is_closed() {
        let ret_ty = ctx.ast.types.fn_ret(node.ty);
        let value = if !ctx.ast.types.is_void(ret_ty) {
            ctx.values.get(&body).copied()
        } else {
            None
        };
        let void = ctx.ast.types.void;
        ctx.insert(InstKind::Return { value }, void, node.span);
    }
}

/// Whether parameter `index` of `f` is passed as a hidden pointer under the
/// selected calling convention.
fn parameter_is_passed_as_pointer(ctx: &CodegenContext, f: crate::ir::FuncId, index: usize) -> bool {
    let fn_ty = ctx.module.func(f).ty;
    let param_ty = ctx.ast.types.fn_params(fn_ty)[index].ty;
    let size = ctx.ast.types.size_of(param_ty);
    ctx.target.call_conv.passes_by_pointer(size)
}

/// Emit an lvalue: the produced instruction is the node's *address*.
fn emit_lvalue(ctx: &mut CodegenContext, id: NodeId) -> Option<InstId> {
    if let Some(&addr) = ctx.addresses.get(&id) {
        return Some(addr);
    }
    let node: Node = ctx.ast.node(id).clone();
    let span = node.span;

    match &node.kind {
        NodeKind::Declaration {
            name,
            linkage,
            init,
        } => {
            let addr;
            if *linkage != Linkage::LocalVar {
                let var = ctx.create_static(name.clone(), node.ty, *linkage, span);
                let ptr = ctx.ast.types.pointer_to(node.ty);
                addr = ctx.insert(InstKind::StaticRef(var), ptr, span);
                ctx.addresses.insert(id, addr);

                // A single numeric or string literal becomes the static
                // initialiser; no store is emitted.
                if let Some(init) = init {
                    match &ctx.ast.node(*init).kind {
                        NodeKind::Literal(LiteralKind::Number(n)) => {
                            ctx.set_static_init(var, StaticInit::Int(*n));
                            return Some(addr);
                        }
                        NodeKind::Literal(LiteralKind::String(idx)) => {
                            ctx.set_static_init(var, StaticInit::String(*idx));
                            return Some(addr);
                        }
                        _ => {}
                    }
                }
            } else {
                addr = ctx.insert_alloca(node.ty, span);
                ctx.addresses.insert(id, addr);
            }

            if let Some(init) = init {
                let value = emit_expr(ctx, *init)?;
                let void = ctx.ast.types.void;
                ctx.insert(InstKind::Store { value, addr }, void, span);
            }
            Some(addr)
        }

        NodeKind::MemberAccess { base, member } => {
            let base_addr = emit_lvalue(ctx, *base)?;
            let base_ty = ctx.ast.types.strip_references(ctx.ast.node(*base).ty);
            let decl = match ctx.ast.types.get(base_ty) {
                Type::Struct { decl } => *decl,
                other => panic!("member access on non-struct type {other:?}"),
            };
            let member = ctx.ast.types.struct_decl(decl).members[*member].clone();

            // A zero-offset member reuses the base address with a retyped
            // pointer.
            let base_addr_ty = ctx.module.inst(base_addr).ty;
            let addr = if member.offset != 0 {
                let integer = ctx.ast.types.integer;
                let imm = ctx.insert(InstKind::Immediate(member.offset as i64), integer, span);
                ctx.insert(
                    InstKind::Add {
                        lhs: base_addr,
                        rhs: imm,
                    },
                    base_addr_ty,
                    span,
                )
            } else {
                ctx.insert(InstKind::Copy { value: base_addr }, base_addr_ty, span)
            };
            let member_ptr = ctx.ast.types.pointer_to(member.ty);
            ctx.module.set_type(addr, member_ptr);
            ctx.addresses.insert(id, addr);
            Some(addr)
        }

        NodeKind::Unary { op, value } if *op == UnaryOp::Deref => {
            let addr = emit_expr(ctx, *value)?;
            ctx.addresses.insert(id, addr);
            Some(addr)
        }

        NodeKind::VariableReference { decl } => {
            let decl_addr = ctx
                .addresses
                .get(decl)
                .copied()
                .expect("cannot reference variable that has not yet been emitted");
            // Each use of a static gets its own static-reference
            // instruction; stack and parameter addresses are shared.
            let addr = match ctx.module.inst(decl_addr).kind {
                InstKind::StaticRef(var) => {
                    let ty = ctx.module.inst(decl_addr).ty;
                    ctx.insert(InstKind::StaticRef(var), ty, span)
                }
                _ => decl_addr,
            };
            ctx.addresses.insert(id, addr);
            Some(addr)
        }

        NodeKind::Cast { value } => {
            let addr = emit_lvalue(ctx, *value)?;
            ctx.addresses.insert(id, addr);
            Some(addr)
        }

        other => panic!("node kind {other:?} is not an lvalue"),
    }
}

/// Emit an rvalue: the produced instruction is the node's value.
fn emit_expr(ctx: &mut CodegenContext, id: NodeId) -> Option<InstId> {
    if ctx.emitted.contains(&id) {
        return ctx.values.get(&id).copied();
    }
    ctx.emitted.insert(id);

    let node: Node = ctx.ast.node(id).clone();
    let span = node.span;
    let value = match &node.kind {
        // A function node yields its address; taking the address of an
        // inline function is an error.
        NodeKind::Function { name, .. } => {
            let f = ctx.func_irs[&id];
            if ctx.module.func(f).attrs.contains(FuncAttrs::FORCE_INLINE) {
                ctx.handler.error(
                    span,
                    format!("cannot take address of inline function '{name}'"),
                );
                return None;
            }
            let fn_ptr = ctx.ast.types.pointer_to(ctx.module.func(f).ty);
            Some(ctx.insert(InstKind::FuncRef(f), fn_ptr, span))
        }

        NodeKind::ModuleReference { .. } => {
            ctx.handler.error(
                span,
                "module reference must not be used unless to access module exports",
            );
            return None;
        }

        NodeKind::Root { children } => {
            for &child in children {
                if matches!(ctx.ast.node(child).kind, NodeKind::Function { .. }) {
                    continue;
                }
                emit_expr(ctx, child);
            }
            // If the last expression didn't already return, return its value.
            if !ctx.is_closed() {
                let value = children.last().and_then(|last| ctx.values.get(last)).copied();
                let void = ctx.ast.types.void;
                ctx.insert(InstKind::Return { value }, void, span);
            }
            None
        }

        NodeKind::Declaration { .. } => {
            emit_lvalue(ctx, id);
            None
        }

        NodeKind::MemberAccess { .. } | NodeKind::VariableReference { .. } => {
            let addr = emit_lvalue(ctx, id)?;
            let addr_ty = ctx.module.inst(addr).ty;
            let loaded = ctx.ast.types.element_of(addr_ty);
            Some(ctx.insert(InstKind::Load { addr }, loaded, span))
        }

        NodeKind::StructureDecl { .. } => None,

        NodeKind::If {
            cond,
            then_branch,
            else_branch,
        } => {
            let cond_value = emit_expr(ctx, *cond)?;

            let then_block = ctx.block();
            let else_block = ctx.block();
            let join_block = ctx.block();
            let void = ctx.ast.types.void;

            ctx.insert(
                InstKind::CondBranch {
                    cond: cond_value,
                    then_target: then_block,
                    else_target: else_block,
                },
                void,
                span,
            );

            ctx.attach(then_block);
            emit_expr(ctx, *then_branch);
            // Whatever block we ended up in is the phi's then-predecessor;
            // nested control flow may have moved the insertion point.
            let last_then_block = ctx.insert_point.expect("no insertion point");
            if !ctx.is_closed() {
                ctx.insert(InstKind::Branch { target: join_block }, void, span);
            }

            ctx.attach(else_block);
            let mut last_else_block = else_block;
            if let Some(else_branch) = else_branch {
                emit_expr(ctx, *else_branch);
                last_else_block = ctx.insert_point.expect("no insertion point");
            }
            if !ctx.is_closed() {
                ctx.insert(InstKind::Branch { target: join_block }, void, span);
            }

            ctx.attach(join_block);

            if !ctx.ast.types.is_void(node.ty) {
                let then_value = ctx.values.get(then_branch).copied();
                let else_value = else_branch.and_then(|e| ctx.values.get(&e).copied());
                let (Some(then_value), Some(else_value)) = (then_value, else_value) else {
                    return None;
                };
                let phi = ctx.insert(InstKind::Phi { args: Vec::new() }, node.ty, span);
                ctx.module.phi_add_arg(phi, last_then_block, then_value);
                ctx.module.phi_add_arg(phi, last_else_block, else_value);
                Some(phi)
            } else {
                None
            }
        }

        NodeKind::While { cond, body } => {
            let cond_block = ctx.block();
            let join_block = ctx.block();
            let void = ctx.ast.types.void;

            ctx.insert(InstKind::Branch { target: cond_block }, void, span);
            ctx.attach(cond_block);
            let cond_value = emit_expr(ctx, *cond)?;

            // An empty body loops straight back to the condition; no body
            // block is allocated.
            let body_is_empty = matches!(
                &ctx.ast.node(*body).kind,
                NodeKind::Block { children } if children.is_empty()
            );
            if body_is_empty {
                ctx.insert(
                    InstKind::CondBranch {
                        cond: cond_value,
                        then_target: cond_block,
                        else_target: join_block,
                    },
                    void,
                    span,
                );
                ctx.attach(join_block);
                return None;
            }

            let body_block = ctx.block();
            ctx.insert(
                InstKind::CondBranch {
                    cond: cond_value,
                    then_target: body_block,
                    else_target: join_block,
                },
                void,
                span,
            );
            ctx.attach(body_block);
            emit_expr(ctx, *body);
            if !ctx.is_closed() {
                ctx.insert(InstKind::Branch { target: cond_block }, void, span);
            }
            ctx.attach(join_block);
            None
        }

        NodeKind::For {
            init,
            cond,
            iter,
            body,
        } => {
            let cond_block = ctx.block();
            let body_block = ctx.block();
            let join_block = ctx.block();
            let void = ctx.ast.types.void;

            emit_expr(ctx, *init);
            ctx.insert(InstKind::Branch { target: cond_block }, void, span);

            ctx.attach(cond_block);
            let cond_value = emit_expr(ctx, *cond)?;
            ctx.insert(
                InstKind::CondBranch {
                    cond: cond_value,
                    then_target: body_block,
                    else_target: join_block,
                },
                void,
                span,
            );

            ctx.attach(body_block);
            emit_expr(ctx, *body);
            // A body that already returned never runs the iterator.
            if !ctx.is_closed() {
                emit_expr(ctx, *iter);
                ctx.insert(InstKind::Branch { target: cond_block }, void, span);
            }

            ctx.attach(join_block);
            None
        }

        NodeKind::Block { children } => {
            let mut last = None;
            for &child in children {
                if matches!(ctx.ast.node(child).kind, NodeKind::Function { .. }) {
                    continue;
                }
                last = Some(child);
                emit_expr(ctx, child);
            }

            // The yield of a block is that of its last expression. A block
            // that doesn't yield void is guaranteed non-empty by the type
            // checker.
            if !ctx.ast.types.is_void(node.ty) {
                let value = last.and_then(|l| ctx.values.get(&l).copied());
                if value.is_none() && !ctx.has_errors() {
                    panic!("non-void block has no yield value");
                }
                value
            } else {
                None
            }
        }

        NodeKind::Call { callee, args } => {
            // Direct calls target the IR function; anything else is an
            // indirect call through the emitted callee value.
            let target = if matches!(ctx.ast.node(*callee).kind, NodeKind::Function { .. }) {
                Callee::Direct(ctx.func_irs[callee])
            } else {
                Callee::Indirect(emit_expr(ctx, *callee)?)
            };
            let call = ctx.module.make(
                InstKind::Call {
                    callee: target,
                    args: Vec::new(),
                    force_inline: false,
                },
                node.ty,
                span,
            );
            emit_call_args(ctx, call, args)?;
            ctx.insert_existing(call);
            Some(call)
        }

        NodeKind::IntrinsicCall { kind, args } => match kind {
            IntrinsicKind::Syscall => {
                // Syscalls are not a thing on Windows.
                if ctx.target.call_conv == CallConv::MsWin {
                    ctx.handler
                        .error(span, "syscalls are not supported on Windows");
                    return None;
                }
                let integer = ctx.ast.types.integer;
                let inst = ctx.module.make(
                    InstKind::Intrinsic {
                        kind: *kind,
                        args: Vec::new(),
                    },
                    integer,
                    span,
                );
                emit_call_args(ctx, inst, args)?;
                ctx.insert_existing(inst);
                Some(inst)
            }

            IntrinsicKind::Inline => {
                let call_node = args[0];
                let call = emit_expr(ctx, call_node)?;
                ctx.module.set_force_inline(call);
                if let Some(&addr) = ctx.addresses.get(&call_node) {
                    ctx.addresses.insert(id, addr);
                }
                Some(call)
            }

            IntrinsicKind::DebugTrap => {
                let void = ctx.ast.types.void;
                Some(ctx.insert(
                    InstKind::Intrinsic {
                        kind: *kind,
                        args: Vec::new(),
                    },
                    void,
                    span,
                ))
            }

            IntrinsicKind::Memcpy => {
                let void = ctx.ast.types.void;
                let inst = ctx.module.make(
                    InstKind::Intrinsic {
                        kind: *kind,
                        args: Vec::new(),
                    },
                    void,
                    span,
                );
                emit_call_args(ctx, inst, args)?;
                ctx.insert_existing(inst);
                Some(inst)
            }

            // Resolved by the semantic analyser.
            IntrinsicKind::Line | IntrinsicKind::Filename => {
                unreachable!("builtin {kind:?} reached code generation")
            }
        },

        NodeKind::Cast { value } => {
            let from_ty = ctx.ast.node(*value).ty;
            let to_ty = node.ty;
            let from_size = ctx.ast.types.size_of(from_ty);
            let to_size = ctx.ast.types.size_of(to_ty);
            let from_signed = ctx.ast.types.is_signed(from_ty);

            let inner = emit_expr(ctx, *value)?;
            let kind = if from_size == to_size {
                InstKind::Bitcast { value: inner }
            } else if from_size < to_size {
                // Smaller to larger: sign extend if the source is signed,
                // otherwise zero extend.
                if from_signed {
                    InstKind::SExt { value: inner }
                } else {
                    InstKind::ZExt { value: inner }
                }
            } else {
                // Larger to smaller: truncate.
                InstKind::Trunc { value: inner }
            };
            Some(ctx.insert(kind, to_ty, span))
        }

        NodeKind::Binary { op, lhs, rhs } => match op {
            BinaryOp::Assign => {
                let value = emit_expr(ctx, *rhs)?;
                let addr = emit_lvalue(ctx, *lhs)?;
                let void = ctx.ast.types.void;
                Some(ctx.insert(InstKind::Store { value, addr }, void, span))
            }
            BinaryOp::Subscript => emit_subscript(ctx, id, &node, *lhs, *rhs),
            _ => {
                let lhs_value = emit_expr(ctx, *lhs)?;
                let rhs_value = emit_expr(ctx, *rhs)?;
                let kind = binary_inst_kind(*op, lhs_value, rhs_value);
                Some(ctx.insert(kind, node.ty, span))
            }
        },

        NodeKind::Unary { op, value } => match op {
            // Address-of doesn't emit its operand as a value at all.
            UnaryOp::AddrOf => {
                let addr = emit_lvalue(ctx, *value)?;
                Some(addr)
            }
            UnaryOp::Deref => {
                let operand = emit_expr(ctx, *value)?;
                let operand_node_ty = ctx.ast.node(*value).ty;
                // Functions are already addresses; dereferencing a
                // pointer-to-function yields the pointer itself.
                let pointee_is_function = ctx.ast.types.is_pointer(operand_node_ty)
                    && ctx
                        .ast
                        .types
                        .is_function(ctx.ast.types.element_of(operand_node_ty));
                if pointee_is_function {
                    Some(operand)
                } else {
                    let operand_ty = ctx.module.inst(operand).ty;
                    let loaded = ctx.ast.types.element_of(operand_ty);
                    Some(ctx.insert(InstKind::Load { addr: operand }, loaded, span))
                }
            }
            UnaryOp::Compl => {
                let operand = emit_expr(ctx, *value)?;
                Some(ctx.insert(InstKind::Not { value: operand }, node.ty, span))
            }
        },

        NodeKind::Literal(lit) => match lit {
            LiteralKind::Number(n) => Some(ctx.insert(InstKind::Immediate(*n), node.ty, span)),

            LiteralKind::String(index) => {
                let var = ctx.create_string_static(node.ty, span);
                ctx.set_static_init(var, StaticInit::String(*index));
                let ptr = ctx.ast.types.pointer_to(node.ty);
                Some(ctx.insert(InstKind::StaticRef(var), ptr, span))
            }

            LiteralKind::Compound(elements) => {
                if !ctx.ast.types.is_array(node.ty) {
                    ctx.handler
                        .sorry(span, "emitting literals of this type is not supported");
                    return None;
                }
                let alloca = ctx.insert_alloca(node.ty, span);

                // Store each element through an advancing element pointer.
                let elem_ty = ctx.ast.types.element_of(node.ty);
                let elem_size = ctx.ast.types.size_of(elem_ty);
                let elem_ptr_ty = ctx.ast.types.pointer_to(elem_ty);
                let integer = ctx.ast.types.integer;
                let void = ctx.ast.types.void;
                let mut address =
                    ctx.insert(InstKind::Bitcast { value: alloca }, elem_ptr_ty, span);
                for (i, &element) in elements.iter().enumerate() {
                    let value = emit_expr(ctx, element)?;
                    ctx.insert(InstKind::Store { value, addr: address }, void, span);
                    if i + 1 == elements.len() {
                        break;
                    }
                    let step = ctx.insert(InstKind::Immediate(elem_size as i64), integer, span);
                    address = ctx.insert(
                        InstKind::Add {
                            lhs: address,
                            rhs: step,
                        },
                        elem_ptr_ty,
                        span,
                    );
                }

                // Load the whole array so the value is available where the
                // literal is required as one.
                Some(ctx.insert(InstKind::Load { addr: alloca }, node.ty, span))
            }
        },

        NodeKind::Return { value } => {
            let value = match value {
                Some(v) => Some(emit_expr(ctx, *v)?),
                None => None,
            };
            let void = ctx.ast.types.void;
            Some(ctx.insert(InstKind::Return { value }, void, span))
        }

        // Function references are resolved away by the semantic analyser.
        NodeKind::FunctionReference { .. } => {
            unreachable!("function reference survived semantic analysis")
        }
    };

    if let Some(value) = value {
        ctx.values.insert(id, value);
    }
    value
}

/// Emit call/intrinsic arguments onto an un-inserted call instruction.
/// Reference-typed arguments pass their address; everything else passes its
/// value.
fn emit_call_args(ctx: &mut CodegenContext, call: InstId, args: &[NodeId]) -> Option<()> {
    for &arg in args {
        let arg_ty = ctx.ast.node(arg).ty;
        let operand = if ctx.ast.types.is_reference(arg_ty) {
            emit_lvalue(ctx, arg)?
        } else {
            emit_expr(ctx, arg)?
        };
        ctx.module.call_add_arg(call, operand);
    }
    Some(())
}

/// Lower a subscript expression to address arithmetic.
fn emit_subscript(
    ctx: &mut CodegenContext,
    id: NodeId,
    node: &Node,
    lhs: NodeId,
    rhs: NodeId,
) -> Option<InstId> {
    let span = node.span;
    let lhs_ty = ctx.ast.node(lhs).ty;
    let stripped = ctx.ast.types.strip_references(lhs_ty);
    if !ctx.ast.types.is_array(stripped) && !ctx.ast.types.is_pointer(stripped) {
        ctx.handler.error(
            span,
            "subscript operator may only operate on arrays and pointers",
        );
        return None;
    }

    let integer = ctx.ast.types.integer;
    let lhs_kind = ctx.ast.node(lhs).kind.clone();

    let mut base = match &lhs_kind {
        NodeKind::VariableReference { decl } => {
            let decl_addr = ctx
                .addresses
                .get(decl)
                .copied()
                .expect("cannot subscript variable that has not yet been emitted");
            // A pointer variable holds the pointer itself in its slot; load
            // it so the arithmetic below starts from the pointer value.
            let addr_ty = ctx.module.inst(decl_addr).ty;
            let is_ptr_to_ptr = ctx.ast.types.is_pointer(addr_ty)
                && ctx
                    .ast
                    .types
                    .is_pointer(ctx.ast.types.element_of(addr_ty));
            let applicable = matches!(
                ctx.module.inst(decl_addr).kind,
                InstKind::Parameter(_) | InstKind::StaticRef(_) | InstKind::Alloca { .. }
            );
            if applicable && is_ptr_to_ptr {
                let loaded = ctx.ast.types.element_of(addr_ty);
                ctx.insert(InstKind::Load { addr: decl_addr }, loaded, span)
            } else {
                decl_addr
            }
        }
        _ if ctx.ast.is_lvalue(lhs) => emit_lvalue(ctx, lhs)?,
        NodeKind::Literal(LiteralKind::String(index)) => {
            let base = emit_expr(ctx, lhs)?;
            if let NodeKind::Literal(LiteralKind::Number(n)) = ctx.ast.node(rhs).kind {
                // Compile-time bounds check against the literal's size.
                let len = ctx.ast.strings[*index].len() as i64;
                if n >= len {
                    ctx.handler.error(
                        span,
                        format!("out of bounds: subscript {n} too large for string literal"),
                    );
                    return None;
                }
                let value = if n != 0 {
                    let imm = ctx.insert(InstKind::Immediate(n), integer, span);
                    ctx.insert(InstKind::Add { lhs: base, rhs: imm }, node.ty, span)
                } else {
                    base
                };
                ctx.values.insert(id, value);
                return Some(value);
            }
            base
        }
        _ => {
            ctx.handler
                .error(span, "left-hand side of subscript operator has invalid kind");
            return None;
        }
    };

    // A subscript of an array yields a pointer to the element type, not a
    // pointer to the array type.
    let base_ty = ctx.module.inst(base).ty;
    if (ctx.ast.types.is_pointer(base_ty) || ctx.ast.types.is_reference(base_ty))
        && ctx.ast.types.is_array(ctx.ast.types.element_of(base_ty))
    {
        let array_ty = ctx.ast.types.element_of(base_ty);
        let elem_ty = ctx.ast.types.element_of(array_ty);
        let elem_ptr = ctx.ast.types.pointer_to(elem_ty);
        base = ctx.insert(InstKind::Bitcast { value: base }, elem_ptr, span);
    }

    // Subscript zero is the base itself.
    if matches!(
        ctx.ast.node(rhs).kind,
        NodeKind::Literal(LiteralKind::Number(0))
    ) {
        ctx.values.insert(id, base);
        return Some(base);
    }

    let index = emit_expr(ctx, rhs)?;

    // Scale by the element size: the array's element for arrays, the
    // pointee for pointers.
    let elem_size = ctx.ast.types.size_of(ctx.ast.types.element_of(stripped));
    let imm = ctx.insert(InstKind::Immediate(elem_size as i64), integer, span);
    let scaled = ctx.insert(InstKind::Mul { lhs: index, rhs: imm }, integer, span);
    let value = ctx.insert(InstKind::Add { lhs: base, rhs: scaled }, node.ty, span);
    ctx.values.insert(id, value);
    Some(value)
}

/// Map a binary operator token to its IR instruction kind.
fn binary_inst_kind(op: BinaryOp, lhs: InstId, rhs: InstId) -> InstKind {
    match op {
        BinaryOp::Lt => InstKind::Lt { lhs, rhs },
        BinaryOp::Le => InstKind::Le { lhs, rhs },
        BinaryOp::Gt => InstKind::Gt { lhs, rhs },
        BinaryOp::Ge => InstKind::Ge { lhs, rhs },
        BinaryOp::Eq => InstKind::Eq { lhs, rhs },
        BinaryOp::Ne => InstKind::Ne { lhs, rhs },
        BinaryOp::Add => InstKind::Add { lhs, rhs },
        BinaryOp::Sub => InstKind::Sub { lhs, rhs },
        BinaryOp::Mul => InstKind::Mul { lhs, rhs },
        BinaryOp::Div => InstKind::Div { lhs, rhs },
        BinaryOp::Rem => InstKind::Mod { lhs, rhs },
        BinaryOp::Shl => InstKind::Shl { lhs, rhs },
        // `>>` is an arithmetic shift.
        BinaryOp::Shr => InstKind::Sar { lhs, rhs },
        BinaryOp::BitAnd => InstKind::And { lhs, rhs },
        BinaryOp::BitOr => InstKind::Or { lhs, rhs },
        BinaryOp::Assign | BinaryOp::Subscript => {
            unreachable!("assignment and subscript are lowered separately")
        }
    }
}
