//! The type system shared between the AST and the IR.
//!
//! Types are interned in a [`TypeStore`] arena and referenced by [`TypeId`].
//! The store also owns structure declarations, so a struct type is a single
//! id regardless of how many members it has.

use crate::attr::FuncAttrs;
use asterc_util::define_idx;
use asterc_util::index_vec::IndexVec;

define_idx!(TypeId);
define_idx!(StructId);

/// A named function parameter
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub ty: TypeId,
}

/// A structure member with its layout offset
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Member {
    pub name: String,
    pub ty: TypeId,
    /// Byte offset of the member within the structure
    pub offset: u64,
}

/// A structure declaration.
///
/// An empty name marks an anonymous structure; the mangler disambiguates
/// those with a per-context counter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StructDecl {
    pub name: String,
    pub members: Vec<Member>,
}

/// A type in the Aster type system
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Type {
    /// Built-in named type with a fixed size (e.g. `void`)
    Primitive {
        name: String,
        size: u64,
        signed: bool,
    },
    /// Arbitrary-width integer type
    Integer { bits: u32, signed: bool },
    /// Pointer to another type
    Pointer { to: TypeId },
    /// Reference to another type; semantically an auto-dereferenced pointer
    Reference { to: TypeId },
    /// Fixed-size array
    Array { of: TypeId, len: u64 },
    /// Structure type
    Struct { decl: StructId },
    /// Function type
    Function {
        ret: TypeId,
        params: Vec<Param>,
        attrs: FuncAttrs,
    },
    /// Named alias, resolvable to an underlying type
    Named {
        name: String,
        resolved: Option<TypeId>,
    },
}

/// Arena of types and structure declarations.
///
/// A fresh store always contains the well-known types the code generator
/// needs: `void`, `integer` (64-bit signed), `byte` (8-bit unsigned) and
/// `c_int` (32-bit signed, the FFI int used by the synthesised entry).
pub struct TypeStore {
    types: IndexVec<TypeId, Type>,
    structs: IndexVec<StructId, StructDecl>,
    pub void: TypeId,
    pub integer: TypeId,
    pub byte: TypeId,
    pub c_int: TypeId,
}

impl TypeStore {
    pub fn new() -> Self {
        let mut types = IndexVec::new();
        let void = types.push(Type::Primitive {
            name: "void".to_string(),
            size: 0,
            signed: false,
        });
        let integer = types.push(Type::Integer {
            bits: 64,
            signed: true,
        });
        let byte = types.push(Type::Integer {
            bits: 8,
            signed: false,
        });
        let c_int = types.push(Type::Integer {
            bits: 32,
            signed: true,
        });
        Self {
            types,
            structs: IndexVec::new(),
            void,
            integer,
            byte,
            c_int,
        }
    }

    /// Add a type to the store
    pub fn add(&mut self, ty: Type) -> TypeId {
        self.types.push(ty)
    }

    /// Add a structure declaration and its type
    pub fn add_struct(&mut self, decl: StructDecl) -> (StructId, TypeId) {
        let id = self.structs.push(decl);
        let ty = self.types.push(Type::Struct { decl: id });
        (id, ty)
    }

    pub fn get(&self, id: TypeId) -> &Type {
        &self.types[id]
    }

    pub fn struct_decl(&self, id: StructId) -> &StructDecl {
        &self.structs[id]
    }

    /// Pointer to `to`
    pub fn pointer_to(&mut self, to: TypeId) -> TypeId {
        self.types.push(Type::Pointer { to })
    }

    /// Reference to `to`
    pub fn reference_to(&mut self, to: TypeId) -> TypeId {
        self.types.push(Type::Reference { to })
    }

    /// Array of `len` elements of `of`
    pub fn array_of(&mut self, of: TypeId, len: u64) -> TypeId {
        self.types.push(Type::Array { of, len })
    }

    /// Function type
    pub fn function(&mut self, ret: TypeId, params: Vec<Param>, attrs: FuncAttrs) -> TypeId {
        self.types.push(Type::Function { ret, params, attrs })
    }

    /// Integer type with the given width and signedness
    pub fn int(&mut self, bits: u32, signed: bool) -> TypeId {
        self.types.push(Type::Integer { bits, signed })
    }

    /// Chase `Named` aliases down to the underlying type id.
    ///
    /// An unresolved alias resolves to itself; code generation treats its
    /// appearance in a sized position as an internal error.
    pub fn resolve(&self, id: TypeId) -> TypeId {
        match &self.types[id] {
            Type::Named {
                resolved: Some(inner),
                ..
            } => self.resolve(*inner),
            _ => id,
        }
    }

    /// Byte size of a type
    pub fn size_of(&self, id: TypeId) -> u64 {
        match &self.types[self.resolve(id)] {
            Type::Primitive { size, .. } => *size,
            Type::Integer { bits, .. } => u64::from((*bits + 7) / 8),
            Type::Pointer { .. } | Type::Reference { .. } | Type::Function { .. } => 8,
            Type::Array { of, len } => self.size_of(*of) * len,
            Type::Struct { decl } => {
                let decl = &self.structs[*decl];
                decl.members
                    .iter()
                    .map(|m| m.offset + self.size_of(m.ty))
                    .max()
                    .unwrap_or(0)
            }
            Type::Named { name, .. } => {
                panic!("size_of unresolved named type '{name}'")
            }
        }
    }

    /// Whether the type is a signed integer or signed primitive
    pub fn is_signed(&self, id: TypeId) -> bool {
        match &self.types[self.resolve(id)] {
            Type::Integer { signed, .. } => *signed,
            Type::Primitive { signed, .. } => *signed,
            _ => false,
        }
    }

    pub fn is_void(&self, id: TypeId) -> bool {
        self.resolve(id) == self.void
    }

    pub fn is_pointer(&self, id: TypeId) -> bool {
        matches!(self.types[self.resolve(id)], Type::Pointer { .. })
    }

    pub fn is_reference(&self, id: TypeId) -> bool {
        matches!(self.types[self.resolve(id)], Type::Reference { .. })
    }

    pub fn is_array(&self, id: TypeId) -> bool {
        matches!(self.types[self.resolve(id)], Type::Array { .. })
    }

    pub fn is_function(&self, id: TypeId) -> bool {
        matches!(self.types[self.resolve(id)], Type::Function { .. })
    }

    /// Strip any number of reference wrappers
    pub fn strip_references(&self, id: TypeId) -> TypeId {
        match &self.types[self.resolve(id)] {
            Type::Reference { to } => self.strip_references(*to),
            _ => self.resolve(id),
        }
    }

    /// The pointee of a pointer or reference, or the element of an array.
    ///
    /// Panics on any other type kind; callers are expected to have checked.
    pub fn element_of(&self, id: TypeId) -> TypeId {
        match &self.types[self.resolve(id)] {
            Type::Pointer { to } | Type::Reference { to } => *to,
            Type::Array { of, .. } => *of,
            other => panic!("element_of non-indirect type {other:?}"),
        }
    }

    /// Return type of a function type
    pub fn fn_ret(&self, id: TypeId) -> TypeId {
        match &self.types[self.resolve(id)] {
            Type::Function { ret, .. } => *ret,
            other => panic!("fn_ret of non-function type {other:?}"),
        }
    }

    /// Parameters of a function type
    pub fn fn_params(&self, id: TypeId) -> &[Param] {
        match &self.types[self.resolve(id)] {
            Type::Function { params, .. } => params,
            other => panic!("fn_params of non-function type {other:?}"),
        }
    }

    /// Attributes of a function type
    pub fn fn_attrs(&self, id: TypeId) -> FuncAttrs {
        match &self.types[self.resolve(id)] {
            Type::Function { attrs, .. } => *attrs,
            other => panic!("fn_attrs of non-function type {other:?}"),
        }
    }
}

impl Default for TypeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_sizes() {
        let types = TypeStore::new();
        assert_eq!(types.size_of(types.void), 0);
        assert_eq!(types.size_of(types.integer), 8);
        assert_eq!(types.size_of(types.byte), 1);
        assert_eq!(types.size_of(types.c_int), 4);
        assert!(types.is_void(types.void));
        assert!(types.is_signed(types.integer));
        assert!(!types.is_signed(types.byte));
    }

    #[test]
    fn pointer_and_array_sizes() {
        let mut types = TypeStore::new();
        let p = types.pointer_to(types.byte);
        let a = types.array_of(types.integer, 3);
        assert_eq!(types.size_of(p), 8);
        assert_eq!(types.size_of(a), 24);
        assert!(types.is_pointer(p));
        assert!(types.is_array(a));
    }

    #[test]
    fn strip_references_goes_to_bottom() {
        let mut types = TypeStore::new();
        let inner = types.array_of(types.byte, 4);
        let r1 = types.reference_to(inner);
        let r2 = types.reference_to(r1);
        assert_eq!(types.strip_references(r2), inner);
        assert_eq!(types.strip_references(inner), inner);
    }

    #[test]
    fn named_alias_resolution() {
        let mut types = TypeStore::new();
        let alias = types.add(Type::Named {
            name: "word".to_string(),
            resolved: Some(types.integer),
        });
        assert_eq!(types.resolve(alias), types.integer);
        assert_eq!(types.size_of(alias), 8);
        assert!(types.is_signed(alias));
    }

    #[test]
    fn struct_size_is_end_of_last_member() {
        let mut types = TypeStore::new();
        let (_, ty) = types.add_struct(StructDecl {
            name: "pair".to_string(),
            members: vec![
                Member {
                    name: "a".to_string(),
                    ty: types.integer,
                    offset: 0,
                },
                Member {
                    name: "b".to_string(),
                    ty: types.byte,
                    offset: 8,
                },
            ],
        });
        assert_eq!(types.size_of(ty), 9);
    }

    #[test]
    fn element_of_indirections() {
        let mut types = TypeStore::new();
        let arr = types.array_of(types.byte, 2);
        let ptr = types.pointer_to(arr);
        assert_eq!(types.element_of(ptr), arr);
        assert_eq!(types.element_of(arr), types.byte);
    }
}
