#![forbid(unsafe_code)]

//! The type graph: an arena of type nodes addressed by [`TypeId`].
//!
//! Derived types (arrays, optionals, references, slices) are memoized on
//! their base node, so after resolution two structurally identical derived
//! types are the same handle and type equality is handle equality.

use std::collections::HashMap;
use std::sync::Arc;

use rain_ast::{ScopeId, SelfParam, Span, TypeId};

use crate::error::{NameKind, SemanticError};
use crate::layer::Layered;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Primitive {
    Bool,
    U8,
    I32,
    I64,
    F32,
    F64,
}

impl Primitive {
    pub const ALL: [Primitive; 6] = [
        Primitive::Bool,
        Primitive::U8,
        Primitive::I32,
        Primitive::I64,
        Primitive::F32,
        Primitive::F64,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Primitive::Bool => "bool",
            Primitive::U8 => "u8",
            Primitive::I32 => "i32",
            Primitive::I64 => "i64",
            Primitive::F32 => "f32",
            Primitive::F64 => "f64",
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            Primitive::Bool => 1,
            Primitive::U8 => 8,
            Primitive::I32 | Primitive::F32 => 32,
            Primitive::I64 | Primitive::F64 => 64,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, Primitive::F32 | Primitive::F64)
    }

    pub fn is_integer(self) -> bool {
        matches!(self, Primitive::U8 | Primitive::I32 | Primitive::I64)
    }

    pub fn is_signed(self) -> bool {
        matches!(self, Primitive::I32 | Primitive::I64)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Field {
    pub name: String,
    pub ty: TypeId,
}

/// A method an interface requires. `params` excludes the receiver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterfaceMethod {
    pub name: String,
    pub self_param: Option<SelfParam>,
    pub params: Vec<TypeId>,
    pub ret: Option<TypeId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeKind {
    Opaque(Primitive),
    Struct {
        name: Option<String>,
        fields: Vec<Field>,
        /// Lowered to a vector register instead of a struct.
        simd: bool,
    },
    Function {
        params: Vec<TypeId>,
        ret: Option<TypeId>,
    },
    Interface {
        name: String,
        methods: Vec<InterfaceMethod>,
    },
    Array {
        element: TypeId,
        length: u64,
    },
    Optional(TypeId),
    Reference(TypeId),
    Slice(TypeId),
    /// A name declared before its definition is known; `target` is filled
    /// in exactly once.
    Unresolved {
        name: String,
        target: Option<TypeId>,
    },
    Meta,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Derivation {
    Optional,
    Reference,
    Slice,
    Array(u64),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Derived {
    optional: Option<TypeId>,
    reference: Option<TypeId>,
    slice: Option<TypeId>,
    arrays: HashMap<u64, TypeId>,
}

impl Derived {
    fn get(&self, derivation: Derivation) -> Option<TypeId> {
        match derivation {
            Derivation::Optional => self.optional,
            Derivation::Reference => self.reference,
            Derivation::Slice => self.slice,
            Derivation::Array(length) => self.arrays.get(&length).copied(),
        }
    }

    fn set(&mut self, derivation: Derivation, id: TypeId) {
        match derivation {
            Derivation::Optional => self.optional = Some(id),
            Derivation::Reference => self.reference = Some(id),
            Derivation::Slice => self.slice = Some(id),
            Derivation::Array(length) => {
                self.arrays.insert(length, id);
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeData {
    pub kind: TypeKind,
    /// Scope that owns this node.
    pub owner: ScopeId,
    derived: Derived,
}

impl TypeData {
    fn new(kind: TypeKind, owner: ScopeId) -> Self {
        Self {
            kind,
            owner,
            derived: Derived::default(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct TypeGraph {
    types: Layered<TypeData>,
    /// Memos for bases in the shared builtin layer, which is read-only.
    overlay: HashMap<TypeId, Derived>,
    anonymous: HashMap<Vec<Field>, TypeId>,
    /// Owner of types derived from shared builtin types.
    home: ScopeId,
}

impl TypeGraph {
    pub(crate) fn new(base: Arc<[TypeData]>, anonymous: HashMap<Vec<Field>, TypeId>, home: ScopeId) -> Self {
        Self {
            types: Layered::new(base),
            overlay: HashMap::new(),
            anonymous,
            home,
        }
    }

    pub(crate) fn empty(home: ScopeId) -> Self {
        Self {
            types: Layered::empty(),
            overlay: HashMap::new(),
            anonymous: HashMap::new(),
            home,
        }
    }

    pub(crate) fn freeze(self) -> (Arc<[TypeData]>, HashMap<Vec<Field>, TypeId>) {
        (self.types.freeze(), self.anonymous)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.len() == 0
    }

    /// True for types in the shared builtin layer.
    pub fn is_builtin(&self, id: TypeId) -> bool {
        self.types.is_base(id.index())
    }

    pub fn get(&self, id: TypeId) -> Result<&TypeData, SemanticError> {
        self.types
            .get(id.index())
            .ok_or_else(|| SemanticError::internal(format!("unknown type handle #{}", id.0)))
    }

    pub fn kind(&self, id: TypeId) -> Result<&TypeKind, SemanticError> {
        Ok(&self.get(id)?.kind)
    }

    pub(crate) fn add(&mut self, kind: TypeKind, owner: ScopeId) -> TypeId {
        TypeId(self.types.push(TypeData::new(kind, owner)) as u32)
    }

    fn local_mut(&mut self, id: TypeId) -> Result<&mut TypeData, SemanticError> {
        self.types
            .get_mut(id.index())
            .ok_or_else(|| SemanticError::internal(format!("type #{} is read-only", id.0)))
    }

    /// Fill in the members of a struct registered by name earlier.
    pub(crate) fn define_struct(&mut self, id: TypeId, members: Vec<Field>) -> Result<(), SemanticError> {
        match &mut self.local_mut(id)?.kind {
            TypeKind::Struct { fields, .. } => {
                *fields = members;
                Ok(())
            }
            other => Err(SemanticError::internal(format!("cannot define fields on {other:?}"))),
        }
    }

    pub(crate) fn define_interface(&mut self, id: TypeId, required: Vec<InterfaceMethod>) -> Result<(), SemanticError> {
        match &mut self.local_mut(id)?.kind {
            TypeKind::Interface { methods, .. } => {
                *methods = required;
                Ok(())
            }
            other => Err(SemanticError::internal(format!("cannot define methods on {other:?}"))),
        }
    }

    /// The one-time unresolved to resolved rewrite.
    pub(crate) fn bind(&mut self, id: TypeId, resolved: TypeId) -> Result<(), SemanticError> {
        match &mut self.local_mut(id)?.kind {
            TypeKind::Unresolved { target: target @ None, .. } => {
                *target = Some(resolved);
                Ok(())
            }
            TypeKind::Unresolved { name, .. } => {
                Err(SemanticError::internal(format!("type `{name}` is already resolved")))
            }
            other => Err(SemanticError::internal(format!("cannot bind {other:?}"))),
        }
    }

    /// Canonical handle for `id`, following resolved forward declarations.
    /// Idempotent on already-canonical handles.
    pub fn resolve(&self, id: TypeId, span: Span) -> Result<TypeId, SemanticError> {
        let mut current = id;
        for _ in 0..=self.len() {
            match self.kind(current)? {
                TypeKind::Unresolved { target: Some(next), .. } => current = *next,
                TypeKind::Unresolved { name, target: None } => {
                    return Err(SemanticError::undefined(NameKind::Type, name.clone(), span));
                }
                _ => return Ok(current),
            }
        }
        Err(SemanticError::syntax("type alias refers to itself", span))
    }

    fn memo(&self, base: TypeId, derivation: Derivation) -> Result<Option<TypeId>, SemanticError> {
        if let Some(id) = self.get(base)?.derived.get(derivation) {
            return Ok(Some(id));
        }
        Ok(self.overlay.get(&base).and_then(|d| d.get(derivation)))
    }

    /// Memoized derived type; the flag reports whether it was just created.
    pub(crate) fn derive(
        &mut self,
        base: TypeId,
        derivation: Derivation,
        span: Span,
    ) -> Result<(TypeId, bool), SemanticError> {
        let base = self.resolve(base, span)?;
        if let Some(id) = self.memo(base, derivation)? {
            return Ok((id, false));
        }
        let owner = if self.is_builtin(base) {
            self.home
        } else {
            self.get(base)?.owner
        };
        let kind = match derivation {
            Derivation::Optional => TypeKind::Optional(base),
            Derivation::Reference => TypeKind::Reference(base),
            Derivation::Slice => TypeKind::Slice(base),
            Derivation::Array(length) => TypeKind::Array { element: base, length },
        };
        let id = self.add(kind, owner);
        if self.is_builtin(base) {
            self.overlay.entry(base).or_default().set(derivation, id);
        } else {
            self.local_mut(base)?.derived.set(derivation, id);
        }
        Ok((id, true))
    }

    /// Anonymous structs (tuples, inline struct types) are interned by shape.
    pub(crate) fn anonymous_struct(&mut self, fields: Vec<Field>) -> TypeId {
        if let Some(id) = self.anonymous.get(&fields) {
            return *id;
        }
        let id = self.add(
            TypeKind::Struct {
                name: None,
                fields: fields.clone(),
                simd: false,
            },
            self.home,
        );
        self.anonymous.insert(fields, id);
        id
    }

    /// Strip one level of reference.
    pub fn deref(&self, id: TypeId) -> TypeId {
        match self.kind(id) {
            Ok(TypeKind::Reference(inner)) => *inner,
            _ => id,
        }
    }

    pub fn primitive(&self, id: TypeId) -> Option<Primitive> {
        match self.kind(id) {
            Ok(TypeKind::Opaque(p)) => Some(*p),
            _ => None,
        }
    }

    pub fn optional_inner(&self, id: TypeId) -> Option<TypeId> {
        match self.kind(id) {
            Ok(TypeKind::Optional(inner)) => Some(*inner),
            _ => None,
        }
    }

    /// Whether a value of this type can be rebuilt from raw bytes.
    pub fn is_materializable(&self, id: TypeId) -> bool {
        let Ok(kind) = self.kind(id) else { return false };
        match kind {
            TypeKind::Opaque(_) | TypeKind::Slice(_) => true,
            TypeKind::Struct { fields, .. } => fields.iter().all(|f| self.is_materializable(f.ty)),
            TypeKind::Array { element, .. } => self.is_materializable(*element),
            TypeKind::Optional(inner) => self.is_materializable(*inner),
            TypeKind::Function { .. }
            | TypeKind::Interface { .. }
            | TypeKind::Reference(_)
            | TypeKind::Unresolved { .. }
            | TypeKind::Meta => false,
        }
    }

    /// Whether a value of this type carries slice pointers, which only
    /// survive compile-time evaluation when they point at constant data.
    pub fn contains_slice(&self, id: TypeId) -> bool {
        let mut stack = vec![id];
        let mut seen = Vec::new();
        while let Some(current) = stack.pop() {
            if seen.contains(&current) {
                continue;
            }
            seen.push(current);
            match self.kind(current) {
                Ok(TypeKind::Slice(_)) => return true,
                Ok(TypeKind::Struct { fields, .. }) => stack.extend(fields.iter().map(|f| f.ty)),
                Ok(TypeKind::Array { element, .. }) | Ok(TypeKind::Optional(element)) => stack.push(*element),
                Ok(TypeKind::Unresolved { target: Some(next), .. }) => stack.push(*next),
                _ => {}
            }
        }
        false
    }

    /// True when `ty` embeds `target` by value, directly or through
    /// arrays, optionals and other structs.
    pub fn contains_by_value(&self, ty: TypeId, target: TypeId) -> bool {
        let mut stack = vec![ty];
        let mut seen = Vec::new();
        while let Some(current) = stack.pop() {
            if seen.contains(&current) {
                continue;
            }
            seen.push(current);
            match self.kind(current) {
                Ok(TypeKind::Struct { fields, .. }) => {
                    for field in fields {
                        if field.ty == target {
                            return true;
                        }
                        stack.push(field.ty);
                    }
                }
                Ok(TypeKind::Array { element, .. }) | Ok(TypeKind::Optional(element)) => {
                    if *element == target {
                        return true;
                    }
                    stack.push(*element);
                }
                _ => {}
            }
        }
        false
    }

    pub fn display(&self, id: TypeId) -> String {
        let Ok(kind) = self.kind(id) else {
            return format!("<type #{}>", id.0);
        };
        match kind {
            TypeKind::Opaque(p) => p.name().to_string(),
            TypeKind::Struct { name: Some(name), .. } => name.clone(),
            TypeKind::Struct { name: None, fields, .. } => {
                let tuple = fields.iter().enumerate().all(|(i, f)| f.name == i.to_string());
                if tuple {
                    let items: Vec<_> = fields.iter().map(|f| self.display(f.ty)).collect();
                    format!("({})", items.join(", "))
                } else {
                    let items: Vec<_> = fields
                        .iter()
                        .map(|f| format!("{}: {}", f.name, self.display(f.ty)))
                        .collect();
                    format!("struct {{ {} }}", items.join(", "))
                }
            }
            TypeKind::Function { params, ret } => {
                let params: Vec<_> = params.iter().map(|p| self.display(*p)).collect();
                match ret {
                    Some(ret) => format!("fn({}) -> {}", params.join(", "), self.display(*ret)),
                    None => format!("fn({})", params.join(", ")),
                }
            }
            TypeKind::Interface { name, .. } => name.clone(),
            TypeKind::Array { element, length } => format!("[{}; {length}]", self.display(*element)),
            TypeKind::Optional(inner) => format!("?{}", self.display(*inner)),
            TypeKind::Reference(inner) => format!("&{}", self.display(*inner)),
            TypeKind::Slice(inner) => format!("[]{}", self.display(*inner)),
            TypeKind::Unresolved { name, .. } => name.clone(),
            TypeKind::Meta => "type".to_string(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (TypeId, &TypeData)> {
        self.types.iter().enumerate().map(|(i, t)| (TypeId(i as u32), t))
    }
}

#[cfg(test)]
mod tests {
    use rain_ast::span;

    use super::*;

    #[test]
    fn derived_types_are_memoized_on_their_base() {
        let mut graph = TypeGraph::empty(ScopeId(0));
        let int = graph.add(TypeKind::Opaque(Primitive::I32), ScopeId(0));
        let (a, created) = graph.derive(int, Derivation::Array(4), span(0, 0)).unwrap();
        assert!(created);
        let (b, created) = graph.derive(int, Derivation::Array(4), span(0, 0)).unwrap();
        assert!(!created);
        assert_eq!(a, b);
        let (c, _) = graph.derive(int, Derivation::Array(5), span(0, 0)).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn unresolved_names_forward_after_binding() {
        let mut graph = TypeGraph::empty(ScopeId(0));
        let int = graph.add(TypeKind::Opaque(Primitive::I32), ScopeId(0));
        let alias = graph.add(
            TypeKind::Unresolved {
                name: "Meters".to_string(),
                target: None,
            },
            ScopeId(0),
        );
        assert!(graph.resolve(alias, span(0, 0)).is_err());
        graph.bind(alias, int).unwrap();
        assert_eq!(graph.resolve(alias, span(0, 0)).unwrap(), int);
        assert_eq!(graph.resolve(int, span(0, 0)).unwrap(), int);
        assert!(graph.bind(alias, int).is_err());
    }

    #[test]
    fn recursive_struct_detection() {
        let mut graph = TypeGraph::empty(ScopeId(0));
        let node = graph.add(
            TypeKind::Struct {
                name: Some("Node".to_string()),
                fields: Vec::new(),
                simd: false,
            },
            ScopeId(0),
        );
        let (link, _) = graph.derive(node, Derivation::Reference, span(0, 0)).unwrap();
        graph
            .define_struct(
                node,
                vec![Field {
                    name: "next".to_string(),
                    ty: link,
                }],
            )
            .unwrap();
        assert!(!graph.contains_by_value(node, node));
        let (boxed, _) = graph.derive(node, Derivation::Optional, span(0, 0)).unwrap();
        graph
            .define_struct(
                node,
                vec![Field {
                    name: "next".to_string(),
                    ty: boxed,
                }],
            )
            .unwrap();
        assert!(graph.contains_by_value(node, node));
    }

    #[test]
    fn slices_are_found_through_aggregates() {
        let mut graph = TypeGraph::empty(ScopeId(0));
        let byte = graph.add(TypeKind::Opaque(Primitive::U8), ScopeId(0));
        let (bytes, _) = graph.derive(byte, Derivation::Slice, span(0, 0)).unwrap();
        let (maybe, _) = graph.derive(bytes, Derivation::Optional, span(0, 0)).unwrap();
        let (row, _) = graph.derive(maybe, Derivation::Array(2), span(0, 0)).unwrap();
        let (pointer, _) = graph.derive(bytes, Derivation::Reference, span(0, 0)).unwrap();
        let holder = graph.add(
            TypeKind::Struct {
                name: Some("Holder".to_string()),
                fields: vec![Field {
                    name: "rows".to_string(),
                    ty: row,
                }],
                simd: false,
            },
            ScopeId(0),
        );
        assert!(graph.contains_slice(bytes));
        assert!(graph.contains_slice(holder));
        assert!(!graph.contains_slice(byte));
        assert!(!graph.contains_slice(pointer));
    }
}
