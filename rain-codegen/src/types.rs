#![forbid(unsafe_code)]

use rain_ast::{Span, TypeId};
use rain_ir::{Signature, Type};
use rain_sema::{Primitive, TypeKind};
use tracing::debug;

use crate::error::CodegenError;
use crate::generator::Generator;

pub(crate) fn primitive_type(primitive: Primitive) -> Type {
    match primitive {
        Primitive::Bool => Type::I1,
        Primitive::U8 => Type::I8,
        Primitive::I32 => Type::I32,
        Primitive::I64 => Type::I64,
        Primitive::F32 => Type::F32,
        Primitive::F64 => Type::F64,
    }
}

impl Generator<'_> {
    /// Backend type of a semantic type, memoized per resolved handle.
    pub(crate) fn lower_type(&mut self, ty: TypeId, span: Span) -> Result<Type, CodegenError> {
        let tree = self.tree;
        let ty = tree.types().resolve(ty, span)?;
        if let Some(lowered) = self.types.get(&ty) {
            return Ok(lowered.clone());
        }
        let lowered = match tree.types().kind(ty)? {
            TypeKind::Opaque(primitive) => primitive_type(*primitive),
            TypeKind::Struct { simd: true, fields, .. } => {
                let lane = match fields.first() {
                    Some(field) => self.lower_type(field.ty, span)?,
                    None => return Err(CodegenError::internal("vector type without lanes", span)),
                };
                Type::vector(lane, fields.len() as u32)
            }
            TypeKind::Struct { name, fields, .. } => {
                let mut members = Vec::with_capacity(fields.len());
                for field in fields {
                    members.push(self.lower_type(field.ty, span)?);
                }
                match name {
                    Some(name) => self.module.named_struct(name.clone(), members),
                    None => self.module.anonymous_struct(members),
                }
            }
            TypeKind::Function { .. } | TypeKind::Reference(_) => Type::Ptr,
            // Object pointer and method table.
            TypeKind::Interface { .. } => self.module.anonymous_struct(vec![Type::Ptr, Type::Ptr]),
            TypeKind::Array { element, length } => Type::array(self.lower_type(*element, span)?, *length),
            TypeKind::Optional(inner) => {
                let inner = self.lower_type(*inner, span)?;
                self.module.anonymous_struct(vec![inner, Type::I1])
            }
            // Begin and end pointers.
            TypeKind::Slice(_) => self.module.anonymous_struct(vec![Type::Ptr, Type::Ptr]),
            TypeKind::Unresolved { name, .. } => {
                return Err(CodegenError::internal(format!("type `{name}` was never resolved"), span));
            }
            TypeKind::Meta => return Err(CodegenError::internal("type values have no runtime representation", span)),
        };
        debug!(ty = %tree.display(ty), lowered = ?lowered, "lowered type");
        self.types.insert(ty, lowered.clone());
        Ok(lowered)
    }

    pub(crate) fn lower_signature(&mut self, fn_ty: TypeId, span: Span) -> Result<Signature, CodegenError> {
        let tree = self.tree;
        let (params, ret) = tree.signature(fn_ty)?;
        let params = params
            .iter()
            .map(|param| self.lower_type(*param, span))
            .collect::<Result<Vec<_>, _>>()?;
        let ret = match ret {
            Some(ret) => self.lower_type(ret, span)?,
            None => Type::Void,
        };
        Ok(Signature { params, ret })
    }

    pub(crate) fn element_type(&self, ty: TypeId, span: Span) -> Result<TypeId, CodegenError> {
        let types = self.tree.types();
        match types.kind(types.deref(ty))? {
            TypeKind::Array { element, .. } | TypeKind::Slice(element) => Ok(*element),
            _ => Err(CodegenError::internal(
                format!("`{}` has no elements", self.tree.display(ty)),
                span,
            )),
        }
    }
}
