//! Name mangling.
//!
//! Functions without the *no-mangle* attribute get a flat linkage name of
//! the form `_XF<len><name><signature>`, where the signature recursively
//! encodes the full function type. The encoding is injective for well-formed
//! type trees; anonymous structs are disambiguated with a per-context
//! counter, so two independent compilations in the same process see it
//! monotonically increase.
//!
//! The mangled name is stored *alongside* the source-level name, never in
//! its place: diagnostics after mangling still see the name the user wrote.

use crate::context::CodegenContext;
use crate::ir::FuncId;
use asterc_ast::{Type, TypeId, TypeStore};
use std::fmt::Write;

/// Mangle one function's name, storing the result in
/// [`IrFunction::mangled`](crate::ir::IrFunction::mangled).
///
/// Re-running is a no-op for functions carrying *no-mangle*, functions that
/// were already mangled, and names that already begin with `_XF`.
pub fn mangle_function_name(ctx: &mut CodegenContext, f: FuncId) {
    let func = &ctx.module.funcs[f];
    if func.attrs.contains(asterc_ast::FuncAttrs::NOMANGLE)
        || func.mangled.is_some()
        || func.name.starts_with("_XF")
    {
        return;
    }

    let mut buf = format!("_XF{}{}", func.name.len(), func.name);
    let ty = func.ty;
    mangle_type_to(&mut buf, &ctx.ast.types, ty, &mut ctx.anon_struct_count);
    ctx.module.funcs[f].mangled = Some(buf);
}

/// Append the encoding of `ty` to `buf`.
pub fn mangle_type_to(buf: &mut String, types: &TypeStore, ty: TypeId, anon_counter: &mut usize) {
    match types.get(ty) {
        Type::Struct { decl } => {
            let decl = types.struct_decl(*decl);
            if !decl.name.is_empty() {
                let _ = write!(buf, "{}{}", decl.name.len(), decl.name);
            } else {
                let n = *anon_counter;
                *anon_counter += 1;
                let _ = write!(buf, "{}{}", digits(n), n);
            }
        }

        Type::Primitive { name, .. } => {
            let _ = write!(buf, "{}{}", name.len(), name);
        }

        Type::Named { name, resolved } => match resolved {
            Some(inner) => mangle_type_to(buf, types, *inner, anon_counter),
            None => {
                let _ = write!(buf, "{}{}", name.len(), name);
            }
        },

        Type::Integer { bits, signed } => {
            let length = 1 + digits(*bits as usize);
            let sign = if *signed { 's' } else { 'u' };
            let _ = write!(buf, "{length}{sign}{bits}");
        }

        Type::Pointer { to } => {
            buf.push('P');
            mangle_type_to(buf, types, *to, anon_counter);
        }

        Type::Reference { to } => {
            buf.push('R');
            mangle_type_to(buf, types, *to, anon_counter);
        }

        Type::Array { of, len } => {
            let _ = write!(buf, "A{len}E");
            mangle_type_to(buf, types, *of, anon_counter);
        }

        Type::Function { ret, params, .. } => {
            buf.push('F');
            mangle_type_to(buf, types, *ret, anon_counter);
            for param in params {
                mangle_type_to(buf, types, param.ty, anon_counter);
            }
            buf.push('E');
        }
    }
}

/// Number of decimal digits of `n`
fn digits(n: usize) -> usize {
    if n == 0 {
        1
    } else {
        (n.ilog10() + 1) as usize
    }
}
