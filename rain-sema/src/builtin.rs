#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use rain_ast::{BinaryOp, ScopeId, TypeId, UnaryOp, span};
use tracing::debug;

use crate::error::SemanticError;
use crate::ops;
use crate::scope::{ScopeData, ScopeTree};
use crate::types::{Field, Primitive, TypeData, TypeKind};
use crate::var::{ArithOp, BitOp, CompareOp, Intrinsic, NumClass, Variable};

/// Handles of the types every module starts with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BuiltinTypes {
    pub bool: TypeId,
    pub u8: TypeId,
    pub i32: TypeId,
    pub i64: TypeId,
    pub f32: TypeId,
    pub f64: TypeId,
    pub f32x4: TypeId,
    pub meta: TypeId,
    /// `[]u8`, the type of string literals.
    pub string: TypeId,
}

impl BuiltinTypes {
    pub(crate) fn unset() -> Self {
        let none = TypeId(0);
        Self {
            bool: none,
            u8: none,
            i32: none,
            i64: none,
            f32: none,
            f64: none,
            f32x4: none,
            meta: none,
            string: none,
        }
    }

    pub fn primitive(&self, primitive: Primitive) -> TypeId {
        match primitive {
            Primitive::Bool => self.bool,
            Primitive::U8 => self.u8,
            Primitive::I32 => self.i32,
            Primitive::I64 => self.i64,
            Primitive::F32 => self.f32,
            Primitive::F64 => self.f64,
        }
    }
}

/// The frozen builtin scope. Build once and share between compilations;
/// every [`ScopeTree`] layers its module scope on top.
#[derive(Clone, Debug)]
pub struct Builtins {
    pub(crate) types: Arc<[TypeData]>,
    pub(crate) anonymous: HashMap<Vec<Field>, TypeId>,
    pub(crate) scopes: Arc<[ScopeData]>,
    pub(crate) variables: Arc<[Variable]>,
    pub(crate) ids: BuiltinTypes,
}

const ARITH: [(BinaryOp, ArithOp); 5] = [
    (BinaryOp::Add, ArithOp::Add),
    (BinaryOp::Sub, ArithOp::Sub),
    (BinaryOp::Mul, ArithOp::Mul),
    (BinaryOp::Div, ArithOp::Div),
    (BinaryOp::Rem, ArithOp::Rem),
];

const COMPARE: [(BinaryOp, CompareOp); 6] = [
    (BinaryOp::Eq, CompareOp::Eq),
    (BinaryOp::Ne, CompareOp::Ne),
    (BinaryOp::Lt, CompareOp::Lt),
    (BinaryOp::Le, CompareOp::Le),
    (BinaryOp::Gt, CompareOp::Gt),
    (BinaryOp::Ge, CompareOp::Ge),
];

const BITWISE: [(BinaryOp, BitOp); 7] = [
    (BinaryOp::And, BitOp::And),
    (BinaryOp::Or, BitOp::Or),
    (BinaryOp::Xor, BitOp::Xor),
    (BinaryOp::Shl, BitOp::Shl),
    (BinaryOp::Shr, BitOp::Shr),
    (BinaryOp::RotateLeft, BitOp::Rotl),
    (BinaryOp::RotateRight, BitOp::Rotr),
];

impl Builtins {
    pub fn new() -> Result<Self, SemanticError> {
        let mut tree = ScopeTree::bootstrap();
        let root = ScopeTree::BUILTIN;

        let mut ids = BuiltinTypes::unset();
        for primitive in Primitive::ALL {
            let id = tree.types_mut().add(TypeKind::Opaque(primitive), root);
            tree.add_type(root, primitive.name(), id)?;
            match primitive {
                Primitive::Bool => ids.bool = id,
                Primitive::U8 => ids.u8 = id,
                Primitive::I32 => ids.i32 = id,
                Primitive::I64 => ids.i64 = id,
                Primitive::F32 => ids.f32 = id,
                Primitive::F64 => ids.f64 = id,
            }
        }

        let lanes = ["x", "y", "z", "w"]
            .into_iter()
            .map(|name| Field {
                name: name.to_string(),
                ty: ids.f32,
            })
            .collect();
        ids.f32x4 = tree.types_mut().add(
            TypeKind::Struct {
                name: Some("f32x4".to_string()),
                fields: lanes,
                simd: true,
            },
            root,
        );
        tree.add_type(root, "f32x4", ids.f32x4)?;

        ids.meta = tree.types_mut().add(TypeKind::Meta, root);
        tree.add_type(root, "type", ids.meta)?;

        // Intrinsics of derived types need i32 and bool in place first.
        tree.set_builtin_types(ids);
        ids.string = tree.slice_of(ids.u8, span(0, 0))?;
        tree.add_type(root, "string", ids.string)?;
        tree.set_builtin_types(ids);

        register_operators(&mut tree, root, &ids)?;

        let builtins = tree.freeze();
        debug!(
            types = builtins.types.len(),
            variables = builtins.variables.len(),
            "built builtin scope"
        );
        Ok(builtins)
    }

    pub fn types(&self) -> &BuiltinTypes {
        &self.ids
    }

    pub fn scope(&self) -> ScopeId {
        ScopeTree::BUILTIN
    }
}

fn register_operators(tree: &mut ScopeTree, root: ScopeId, ids: &BuiltinTypes) -> Result<(), SemanticError> {
    let nowhere = span(0, 0);
    let op = |tree: &mut ScopeTree, receiver: TypeId, args: Vec<TypeId>, name: &str, ret: TypeId, intrinsic: Intrinsic| {
        tree.add_intrinsic(root, receiver, args, name, Some(ret), intrinsic, nowhere)
            .map(|_| ())
    };

    for primitive in Primitive::ALL {
        let ty = ids.primitive(primitive);

        // Conversions into every primitive; bool only converts from itself.
        for from in Primitive::ALL {
            if primitive == Primitive::Bool && from != Primitive::Bool {
                continue;
            }
            let intrinsic = if from == primitive {
                Intrinsic::Identity
            } else {
                Intrinsic::Convert { from, to: primitive }
            };
            op(tree, ty, vec![ids.primitive(from)], ops::CAST, ty, intrinsic)?;
        }

        if primitive == Primitive::Bool {
            for (binary, bit) in &BITWISE[..3] {
                if let Some(name) = ops::binary_method(*binary) {
                    let intrinsic = Intrinsic::Bitwise {
                        op: *bit,
                        class: NumClass::Unsigned,
                    };
                    op(tree, ty, vec![ty, ty], name, ty, intrinsic)?;
                }
            }
            for (binary, compare) in &COMPARE[..2] {
                if let Some(name) = ops::binary_method(*binary) {
                    let intrinsic = Intrinsic::Compare {
                        op: *compare,
                        class: NumClass::Unsigned,
                    };
                    op(tree, ty, vec![ty, ty], name, ids.bool, intrinsic)?;
                }
            }
            if let Some(name) = ops::unary_method(UnaryOp::Not) {
                op(tree, ty, vec![ty], name, ty, Intrinsic::Not)?;
            }
            continue;
        }

        let class = NumClass::of(primitive);
        for (binary, arith) in ARITH {
            if let Some(name) = ops::binary_method(binary) {
                op(tree, ty, vec![ty, ty], name, ty, Intrinsic::Arith { op: arith, class })?;
            }
        }
        for (binary, compare) in COMPARE {
            if let Some(name) = ops::binary_method(binary) {
                let intrinsic = Intrinsic::Compare { op: compare, class };
                op(tree, ty, vec![ty, ty], name, ids.bool, intrinsic)?;
            }
        }
        if let Some(name) = ops::unary_method(UnaryOp::Negative) {
            op(tree, ty, vec![ty], name, ty, Intrinsic::Negate { class })?;
        }
        if let Some(name) = ops::unary_method(UnaryOp::Positive) {
            op(tree, ty, vec![ty], name, ty, Intrinsic::Identity)?;
        }
        if primitive.is_integer() {
            for (binary, bit) in BITWISE {
                if let Some(name) = ops::binary_method(binary) {
                    op(tree, ty, vec![ty, ty], name, ty, Intrinsic::Bitwise { op: bit, class })?;
                }
            }
            if let Some(name) = ops::unary_method(UnaryOp::Not) {
                op(tree, ty, vec![ty], name, ty, Intrinsic::Not)?;
            }
        }
    }

    let vector = ids.f32x4;
    for (binary, arith) in &ARITH[..4] {
        if let Some(name) = ops::binary_method(*binary) {
            let intrinsic = Intrinsic::Arith {
                op: *arith,
                class: NumClass::Float,
            };
            op(tree, vector, vec![vector, vector], name, vector, intrinsic)?;
        }
    }
    if let Some(name) = ops::unary_method(UnaryOp::Negative) {
        op(tree, vector, vec![vector], name, vector, Intrinsic::Negate { class: NumClass::Float })?;
    }
    Ok(())
}
