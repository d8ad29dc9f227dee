use crate::types::Type;

macro_rules! id {
    ($name:ident) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

id!(FuncId);
id!(GlobalId);
id!(BlockId);
id!(InstId);
id!(ConstId);

/// Operand handle. Instruction and argument values are local to the
/// function they appear in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Value {
    Inst(InstId),
    Arg(u32),
    Const(ConstId),
    Global(GlobalId),
    Function(FuncId),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Constant {
    /// Two's complement bit pattern, truncated to the type's width.
    Int { ty: Type, value: u64 },
    /// IEEE bit pattern; `f32` keeps its bits in the low word.
    Float { ty: Type, bits: u64 },
    Zero(Type),
    Undef(Type),
    /// Struct, array or vector with interned element constants.
    Aggregate { ty: Type, elements: Vec<ConstId> },
    GlobalAddr { global: GlobalId, offset: u64 },
    Null,
}

pub(crate) fn mask(bits: u32, value: u64) -> u64 {
    if bits >= 64 {
        value
    } else {
        value & ((1u64 << bits) - 1)
    }
}

pub(crate) fn sign_extend(bits: u32, value: u64) -> i64 {
    if bits >= 64 || bits == 0 {
        value as i64
    } else {
        let shift = 64 - bits;
        ((value << shift) as i64) >> shift
    }
}

impl Constant {
    pub fn int(ty: Type, value: i64) -> Constant {
        let bits = ty.int_bits().unwrap_or(64);
        Constant::Int {
            ty,
            value: mask(bits, value as u64),
        }
    }

    pub fn bool(value: bool) -> Constant {
        Constant::Int {
            ty: Type::I1,
            value: value as u64,
        }
    }

    pub fn f32(value: f32) -> Constant {
        Constant::Float {
            ty: Type::F32,
            bits: value.to_bits() as u64,
        }
    }

    pub fn f64(value: f64) -> Constant {
        Constant::Float {
            ty: Type::F64,
            bits: value.to_bits(),
        }
    }

    pub fn ty(&self) -> Type {
        match self {
            Constant::Int { ty, .. }
            | Constant::Float { ty, .. }
            | Constant::Zero(ty)
            | Constant::Undef(ty)
            | Constant::Aggregate { ty, .. } => ty.clone(),
            Constant::GlobalAddr { .. } | Constant::Null => Type::Ptr,
        }
    }

    /// Sign-extended integer value.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Constant::Int { ty, value } => Some(sign_extend(ty.int_bits()?, *value)),
            Constant::Zero(Type::Int(_)) => Some(0),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Constant::Float { ty: Type::F32, bits } => Some(f32::from_bits(*bits as u32) as f64),
            Constant::Float { ty: Type::F64, bits } => Some(f64::from_bits(*bits)),
            Constant::Zero(Type::F32 | Type::F64) => Some(0.0),
            _ => None,
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Constant::Zero(_) | Constant::Null => true,
            Constant::Int { value, .. } => *value == 0,
            Constant::Float { bits, .. } => *bits == 0,
            _ => false,
        }
    }
}
