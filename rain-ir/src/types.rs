#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StructId(pub u32);

/// Backend value type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    Int(u32),
    F32,
    F64,
    Ptr,
    Vector(Box<Type>, u32),
    Array(Box<Type>, u64),
    Struct(StructId),
}

impl Type {
    pub const I1: Type = Type::Int(1);
    pub const I8: Type = Type::Int(8);
    pub const I32: Type = Type::Int(32);
    pub const I64: Type = Type::Int(64);

    pub fn vector(element: Type, len: u32) -> Type {
        Type::Vector(Box::new(element), len)
    }

    pub fn array(element: Type, len: u64) -> Type {
        Type::Array(Box::new(element), len)
    }

    pub fn int_bits(&self) -> Option<u32> {
        match self {
            Type::Int(bits) => Some(*bits),
            _ => None,
        }
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Type::Int(_))
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Type::F32 | Type::F64)
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, Type::Array(..) | Type::Struct(_) | Type::Vector(..))
    }

    /// Scalar type of a vector, or the type itself.
    pub fn scalar(&self) -> &Type {
        match self {
            Type::Vector(element, _) => element,
            other => other,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StructDef {
    /// Named structs print as `%Name`; anonymous ones are literal
    /// `{ ... }` types and are deduplicated by field list.
    pub name: Option<String>,
    pub fields: Vec<Type>,
}
