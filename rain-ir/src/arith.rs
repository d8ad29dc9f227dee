//! Scalar and element-wise semantics shared by the interpreter and the
//! constant folder.

use crate::interp::{RtValue, Trap};
use crate::module::{BinOp, CastOp, FloatPredicate, IntPredicate};
use crate::types::Type;
use crate::value::{Constant, mask, sign_extend};

pub(crate) fn binary(op: BinOp, lhs: &RtValue, rhs: &RtValue) -> Result<RtValue, Trap> {
    match (lhs, rhs) {
        (RtValue::Aggregate(a), RtValue::Aggregate(b)) if a.len() == b.len() => a
            .iter()
            .zip(b)
            .map(|(x, y)| binary(op, x, y))
            .collect::<Result<Vec<_>, _>>()
            .map(RtValue::Aggregate),
        (RtValue::Int { bits, value: a }, RtValue::Int { value: b, .. }) => {
            int_binary(op, *bits, *a, *b).map(|value| RtValue::Int { bits: *bits, value })
        }
        (RtValue::F32(a), RtValue::F32(b)) => {
            float_binary(op, *a as f64, *b as f64).map(|v| RtValue::F32(v as f32))
        }
        (RtValue::F64(a), RtValue::F64(b)) => float_binary(op, *a, *b).map(RtValue::F64),
        _ => Err(Trap::Malformed(format!("operand mismatch for {op:?}"))),
    }
}

fn int_binary(op: BinOp, bits: u32, a: u64, b: u64) -> Result<u64, Trap> {
    let sa = sign_extend(bits, a);
    let sb = sign_extend(bits, b);
    let shift = (b % bits.max(1) as u64) as u32;
    let out = match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::SDiv => {
            if sb == 0 {
                return Err(Trap::DivisionByZero);
            }
            sa.wrapping_div(sb) as u64
        }
        BinOp::SRem => {
            if sb == 0 {
                return Err(Trap::DivisionByZero);
            }
            sa.wrapping_rem(sb) as u64
        }
        BinOp::UDiv | BinOp::URem => {
            let (ua, ub) = (mask(bits, a), mask(bits, b));
            if ub == 0 {
                return Err(Trap::DivisionByZero);
            }
            if op == BinOp::UDiv { ua / ub } else { ua % ub }
        }
        BinOp::And => a & b,
        BinOp::Or => a | b,
        BinOp::Xor => a ^ b,
        BinOp::Shl => a << shift,
        BinOp::LShr => mask(bits, a) >> shift,
        BinOp::AShr => (sa >> shift) as u64,
        other => return Err(Trap::Malformed(format!("{other:?} on integers"))),
    };
    Ok(mask(bits, out))
}

fn float_binary(op: BinOp, a: f64, b: f64) -> Result<f64, Trap> {
    Ok(match op {
        BinOp::FAdd => a + b,
        BinOp::FSub => a - b,
        BinOp::FMul => a * b,
        BinOp::FDiv => a / b,
        BinOp::FRem => a % b,
        other => return Err(Trap::Malformed(format!("{other:?} on floats"))),
    })
}

pub(crate) fn icmp(pred: IntPredicate, lhs: &RtValue, rhs: &RtValue) -> Result<RtValue, Trap> {
    match (lhs, rhs) {
        (RtValue::Aggregate(a), RtValue::Aggregate(b)) if a.len() == b.len() => a
            .iter()
            .zip(b)
            .map(|(x, y)| icmp(pred, x, y))
            .collect::<Result<Vec<_>, _>>()
            .map(RtValue::Aggregate),
        _ => {
            let (bits, a) = scalar_bits(lhs)?;
            let (_, b) = scalar_bits(rhs)?;
            let (sa, sb) = (sign_extend(bits, a), sign_extend(bits, b));
            let (ua, ub) = (mask(bits, a), mask(bits, b));
            let holds = match pred {
                IntPredicate::Eq => ua == ub,
                IntPredicate::Ne => ua != ub,
                IntPredicate::Slt => sa < sb,
                IntPredicate::Sle => sa <= sb,
                IntPredicate::Sgt => sa > sb,
                IntPredicate::Sge => sa >= sb,
                IntPredicate::Ult => ua < ub,
                IntPredicate::Ule => ua <= ub,
                IntPredicate::Ugt => ua > ub,
                IntPredicate::Uge => ua >= ub,
            };
            Ok(RtValue::bool(holds))
        }
    }
}

fn scalar_bits(value: &RtValue) -> Result<(u32, u64), Trap> {
    match value {
        RtValue::Int { bits, value } => Ok((*bits, *value)),
        RtValue::Ptr(p) => Ok((64, *p)),
        other => Err(Trap::Malformed(format!("expected integer, found {other:?}"))),
    }
}

pub(crate) fn fcmp(pred: FloatPredicate, lhs: &RtValue, rhs: &RtValue) -> Result<RtValue, Trap> {
    match (lhs, rhs) {
        (RtValue::Aggregate(a), RtValue::Aggregate(b)) if a.len() == b.len() => a
            .iter()
            .zip(b)
            .map(|(x, y)| fcmp(pred, x, y))
            .collect::<Result<Vec<_>, _>>()
            .map(RtValue::Aggregate),
        _ => {
            let a = lhs
                .as_f64()
                .ok_or_else(|| Trap::Malformed("fcmp on non-float".to_string()))?;
            let b = rhs
                .as_f64()
                .ok_or_else(|| Trap::Malformed("fcmp on non-float".to_string()))?;
            let holds = match pred {
                FloatPredicate::Oeq => a == b,
                FloatPredicate::One => !a.is_nan() && !b.is_nan() && a != b,
                FloatPredicate::Olt => a < b,
                FloatPredicate::Ole => a <= b,
                FloatPredicate::Ogt => a > b,
                FloatPredicate::Oge => a >= b,
            };
            Ok(RtValue::bool(holds))
        }
    }
}

pub(crate) fn cast(op: CastOp, value: &RtValue, to: &Type) -> Result<RtValue, Trap> {
    if let (RtValue::Aggregate(items), Type::Vector(element, _)) = (value, to) {
        return items
            .iter()
            .map(|item| cast(op, item, element))
            .collect::<Result<Vec<_>, _>>()
            .map(RtValue::Aggregate);
    }
    let to_bits = to.int_bits();
    let out = match (op, value) {
        (CastOp::Trunc | CastOp::ZExt, RtValue::Int { value, .. }) => RtValue::Int {
            bits: target_bits(to_bits)?,
            value: *value,
        },
        (CastOp::SExt, RtValue::Int { bits, value }) => RtValue::Int {
            bits: target_bits(to_bits)?,
            value: sign_extend(*bits, *value) as u64,
        },
        (CastOp::PtrToInt, RtValue::Ptr(p)) => RtValue::Int {
            bits: target_bits(to_bits)?,
            value: *p,
        },
        (CastOp::FpTrunc, RtValue::F64(v)) => RtValue::F32(*v as f32),
        (CastOp::FpExt, RtValue::F32(v)) => RtValue::F64(*v as f64),
        (CastOp::SiToFp, RtValue::Int { bits, value }) => float_of(to, sign_extend(*bits, *value) as f64)?,
        (CastOp::UiToFp, RtValue::Int { bits, value }) => float_of(to, mask(*bits, *value) as f64)?,
        (CastOp::FpToSi, RtValue::F32(v)) => RtValue::Int {
            bits: target_bits(to_bits)?,
            value: (*v as i64) as u64,
        },
        (CastOp::FpToSi, RtValue::F64(v)) => RtValue::Int {
            bits: target_bits(to_bits)?,
            value: (*v as i64) as u64,
        },
        (op, value) => return Err(Trap::Malformed(format!("cannot apply {op:?} to {value:?}"))),
    };
    Ok(match out {
        RtValue::Int { bits, value } => RtValue::Int {
            bits,
            value: mask(bits, value),
        },
        other => other,
    })
}

fn target_bits(bits: Option<u32>) -> Result<u32, Trap> {
    bits.ok_or_else(|| Trap::Malformed("integer cast to a non-integer type".to_string()))
}

fn float_of(ty: &Type, value: f64) -> Result<RtValue, Trap> {
    match ty {
        Type::F32 => Ok(RtValue::F32(value as f32)),
        Type::F64 => Ok(RtValue::F64(value)),
        other => Err(Trap::Malformed(format!("float conversion to {other:?}"))),
    }
}

/// Scalar constant as a runtime value; `None` for anything the folder
/// leaves alone.
pub(crate) fn scalar_of(constant: &Constant) -> Option<RtValue> {
    match constant {
        Constant::Int { ty, value } => Some(RtValue::Int {
            bits: ty.int_bits()?,
            value: *value,
        }),
        Constant::Float { ty: Type::F32, bits } => Some(RtValue::F32(f32::from_bits(*bits as u32))),
        Constant::Float { ty: Type::F64, bits } => Some(RtValue::F64(f64::from_bits(*bits))),
        _ => None,
    }
}

pub(crate) fn constant_of(value: &RtValue) -> Option<Constant> {
    match value {
        RtValue::Int { bits, value } => Some(Constant::Int {
            ty: Type::Int(*bits),
            value: *value,
        }),
        RtValue::F32(v) => Some(Constant::f32(*v)),
        RtValue::F64(v) => Some(Constant::f64(*v)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_division_truncates_toward_zero() {
        let out = binary(BinOp::SDiv, &RtValue::int(32, -7), &RtValue::int(32, 2)).unwrap();
        assert_eq!(out.as_i64(), Some(-3));
    }

    #[test]
    fn division_by_zero_traps() {
        let err = binary(BinOp::SRem, &RtValue::int(32, 1), &RtValue::int(32, 0)).unwrap_err();
        assert!(matches!(err, Trap::DivisionByZero));
    }

    #[test]
    fn vector_addition_is_element_wise() {
        let a = RtValue::Aggregate(vec![RtValue::F32(1.0), RtValue::F32(2.0)]);
        let b = RtValue::Aggregate(vec![RtValue::F32(0.5), RtValue::F32(0.25)]);
        let out = binary(BinOp::FAdd, &a, &b).unwrap();
        assert_eq!(out, RtValue::Aggregate(vec![RtValue::F32(1.5), RtValue::F32(2.25)]));
    }

    #[test]
    fn sign_extension_preserves_negative_values() {
        let out = cast(CastOp::SExt, &RtValue::int(32, -5), &Type::I64).unwrap();
        assert_eq!(out.as_i64(), Some(-5));
        assert_eq!(out, RtValue::Int { bits: 64, value: (-5i64) as u64 });
    }
}
