#![forbid(unsafe_code)]

use rain_ast::{ScopeId, SelfParam, TypeId, VariableId};

use crate::types::Primitive;

/// How a builtin numeric operation treats its operands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NumClass {
    Signed,
    Unsigned,
    Float,
}

impl NumClass {
    pub fn of(primitive: Primitive) -> Self {
        if primitive.is_float() {
            NumClass::Float
        } else if primitive.is_signed() {
            NumClass::Signed
        } else {
            NumClass::Unsigned
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BitOp {
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Rotl,
    Rotr,
}

/// Operations the code generator expands inline instead of calling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Intrinsic {
    Arith { op: ArithOp, class: NumClass },
    Compare { op: CompareOp, class: NumClass },
    Bitwise { op: BitOp, class: NumClass },
    Negate { class: NumClass },
    Not,
    Identity,
    Convert { from: Primitive, to: Primitive },
    ArrayIndex,
    ArrayLength { length: u64 },
    SliceIndex,
    SliceLength,
    OptionalHasValue,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Storage {
    Parameter,
    Stack,
    Global,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VariableKind {
    Local {
        mutable: bool,
        storage: Storage,
    },
    Function {
        receiver: Option<TypeId>,
        self_param: Option<SelfParam>,
        exported: bool,
        defined: bool,
    },
    External {
        keys: Vec<String>,
        compile_time: bool,
    },
    Builtin(Intrinsic),
    /// The payload of an optional inside `if ?x { ... }`.
    UnwrappedOptional {
        wraps: VariableId,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    pub ty: TypeId,
    /// Declaring scope.
    pub scope: ScopeId,
    pub kind: VariableKind,
}

impl Variable {
    pub fn is_callable(&self) -> bool {
        matches!(
            self.kind,
            VariableKind::Function { .. } | VariableKind::External { .. } | VariableKind::Builtin(_)
        )
    }

    pub fn intrinsic(&self) -> Option<Intrinsic> {
        match self.kind {
            VariableKind::Builtin(intrinsic) => Some(intrinsic),
            _ => None,
        }
    }
}
