#![forbid(unsafe_code)]

use rain_ast::{Span, TypeId};
use rain_ir::{BinOp, CastOp, Constant, FloatPredicate, IntPredicate, Type, Value};
use rain_sema::{ArithOp, BitOp, CompareOp, Intrinsic, NumClass, Primitive};

use crate::error::CodegenError;
use crate::lower::FunctionLowering;
use crate::types::primitive_type;

fn arith_op(op: ArithOp, class: NumClass) -> BinOp {
    match (op, class) {
        (ArithOp::Add, NumClass::Float) => BinOp::FAdd,
        (ArithOp::Add, _) => BinOp::Add,
        (ArithOp::Sub, NumClass::Float) => BinOp::FSub,
        (ArithOp::Sub, _) => BinOp::Sub,
        (ArithOp::Mul, NumClass::Float) => BinOp::FMul,
        (ArithOp::Mul, _) => BinOp::Mul,
        (ArithOp::Div, NumClass::Float) => BinOp::FDiv,
        (ArithOp::Div, NumClass::Signed) => BinOp::SDiv,
        (ArithOp::Div, NumClass::Unsigned) => BinOp::UDiv,
        (ArithOp::Rem, NumClass::Float) => BinOp::FRem,
        (ArithOp::Rem, NumClass::Signed) => BinOp::SRem,
        (ArithOp::Rem, NumClass::Unsigned) => BinOp::URem,
    }
}

fn int_predicate(op: CompareOp, signed: bool) -> IntPredicate {
    match (op, signed) {
        (CompareOp::Eq, _) => IntPredicate::Eq,
        (CompareOp::Ne, _) => IntPredicate::Ne,
        (CompareOp::Lt, true) => IntPredicate::Slt,
        (CompareOp::Lt, false) => IntPredicate::Ult,
        (CompareOp::Le, true) => IntPredicate::Sle,
        (CompareOp::Le, false) => IntPredicate::Ule,
        (CompareOp::Gt, true) => IntPredicate::Sgt,
        (CompareOp::Gt, false) => IntPredicate::Ugt,
        (CompareOp::Ge, true) => IntPredicate::Sge,
        (CompareOp::Ge, false) => IntPredicate::Uge,
    }
}

fn float_predicate(op: CompareOp) -> FloatPredicate {
    match op {
        CompareOp::Eq => FloatPredicate::Oeq,
        CompareOp::Ne => FloatPredicate::One,
        CompareOp::Lt => FloatPredicate::Olt,
        CompareOp::Le => FloatPredicate::Ole,
        CompareOp::Gt => FloatPredicate::Ogt,
        CompareOp::Ge => FloatPredicate::Oge,
    }
}

fn convert_op(from: Primitive, to: Primitive) -> Option<CastOp> {
    match (from.is_float(), to.is_float()) {
        (true, true) if to.bits() > from.bits() => Some(CastOp::FpExt),
        (true, true) if to.bits() < from.bits() => Some(CastOp::FpTrunc),
        (true, true) => None,
        (true, false) => Some(CastOp::FpToSi),
        (false, true) if from.is_signed() => Some(CastOp::SiToFp),
        (false, true) => Some(CastOp::UiToFp),
        (false, false) if to.bits() < from.bits() => Some(CastOp::Trunc),
        (false, false) if to.bits() > from.bits() && from.is_signed() => Some(CastOp::SExt),
        (false, false) if to.bits() > from.bits() => Some(CastOp::ZExt),
        (false, false) => None,
    }
}

impl FunctionLowering<'_, '_> {
    /// Expand a builtin operation inline. `args` already include the
    /// receiver when the operation takes one.
    pub(crate) fn intrinsic(
        &mut self,
        intrinsic: Intrinsic,
        args: &[Value],
        params: &[TypeId],
        span: Span,
    ) -> Result<Option<Value>, CodegenError> {
        let arity = |n: usize| {
            if args.len() == n {
                Ok(())
            } else {
                Err(CodegenError::internal(
                    format!("{intrinsic:?} expects {n} operands, got {}", args.len()),
                    span,
                ))
            }
        };
        let value = match intrinsic {
            Intrinsic::Arith { op, class } => {
                arity(2)?;
                self.ir().binary(arith_op(op, class), args[0], args[1])?
            }
            Intrinsic::Compare { op, class } => {
                arity(2)?;
                match class {
                    NumClass::Float => self.ir().fcmp(float_predicate(op), args[0], args[1])?,
                    NumClass::Signed => self.ir().icmp(int_predicate(op, true), args[0], args[1])?,
                    NumClass::Unsigned => self.ir().icmp(int_predicate(op, false), args[0], args[1])?,
                }
            }
            Intrinsic::Bitwise { op, class } => {
                arity(2)?;
                self.bitwise(op, class, args[0], args[1], span)?
            }
            Intrinsic::Negate { class } => {
                arity(1)?;
                let ty = self.ir().value_type(args[0])?;
                let zero = self.ir().const_value(Constant::Zero(ty));
                let op = if class == NumClass::Float { BinOp::FSub } else { BinOp::Sub };
                self.ir().binary(op, zero, args[0])?
            }
            Intrinsic::Not => {
                arity(1)?;
                let ty = self.ir().value_type(args[0])?;
                let ones = self.ir().const_int(ty, -1);
                self.ir().binary(BinOp::Xor, args[0], ones)?
            }
            Intrinsic::Identity => {
                arity(1)?;
                args[0]
            }
            Intrinsic::Convert { from, to } => {
                arity(1)?;
                match convert_op(from, to) {
                    Some(op) => self.ir().cast(op, args[0], primitive_type(to))?,
                    None => args[0],
                }
            }
            Intrinsic::ArrayIndex => {
                arity(2)?;
                let array = self.ir().value_type(args[0])?;
                let slot = self.entry_alloca(array.clone())?;
                self.ir().store(args[0], slot)?;
                let zero = self.ir().const_int(Type::I32, 0);
                self.ir().gep(array, slot, vec![zero, args[1]])?
            }
            Intrinsic::ArrayLength { length } => self.ir().const_int(Type::I32, length as i64),
            Intrinsic::SliceIndex => {
                arity(2)?;
                let slice = *params
                    .first()
                    .ok_or_else(|| CodegenError::internal("slice index without a slice", span))?;
                self.slice_element(args[0], args[1], slice, span)?
            }
            Intrinsic::SliceLength => {
                arity(1)?;
                let slice = *params
                    .first()
                    .ok_or_else(|| CodegenError::internal("slice length without a slice", span))?;
                self.slice_length(args[0], slice, span)?
            }
            Intrinsic::OptionalHasValue => {
                arity(1)?;
                self.ir().extract_value(args[0], 1)?
            }
        };
        Ok(Some(value))
    }

    fn bitwise(
        &mut self,
        op: BitOp,
        class: NumClass,
        lhs: Value,
        rhs: Value,
        span: Span,
    ) -> Result<Value, CodegenError> {
        let simple = match op {
            BitOp::And => Some(BinOp::And),
            BitOp::Or => Some(BinOp::Or),
            BitOp::Xor => Some(BinOp::Xor),
            BitOp::Shl => Some(BinOp::Shl),
            BitOp::Shr if class == NumClass::Signed => Some(BinOp::AShr),
            BitOp::Shr => Some(BinOp::LShr),
            BitOp::Rotl | BitOp::Rotr => None,
        };
        if let Some(op) = simple {
            return Ok(self.ir().binary(op, lhs, rhs)?);
        }

        // x rotl n == (x << n) | (x >> (bits - n)), logically shifted.
        let ty = self.ir().value_type(lhs)?;
        let bits = ty
            .int_bits()
            .ok_or_else(|| CodegenError::internal(format!("rotate of {ty:?}"), span))?;
        let width = self.ir().const_int(ty, bits as i64);
        let back = self.ir().binary(BinOp::Sub, width, rhs)?;
        let (first, second) = if op == BitOp::Rotl {
            (BinOp::Shl, BinOp::LShr)
        } else {
            (BinOp::LShr, BinOp::Shl)
        };
        let high = self.ir().binary(first, lhs, rhs)?;
        let low = self.ir().binary(second, lhs, back)?;
        Ok(self.ir().binary(BinOp::Or, high, low)?)
    }

    /// Element count between the two slice pointers.
    fn slice_length(&mut self, slice: Value, slice_ty: TypeId, span: Span) -> Result<Value, CodegenError> {
        let element = self.generator.element_type(slice_ty, span)?;
        let element = self.lower(element, span)?;
        let size = self.generator.module.size_of(&element)?.max(1);
        let begin = self.ir().extract_value(slice, 0)?;
        let end = self.ir().extract_value(slice, 1)?;
        let begin = self.ir().cast(CastOp::PtrToInt, begin, Type::I64)?;
        let end = self.ir().cast(CastOp::PtrToInt, end, Type::I64)?;
        let bytes = self.ir().binary(BinOp::Sub, end, begin)?;
        let size = self.ir().const_int(Type::I64, size as i64);
        let count = self.ir().binary(BinOp::UDiv, bytes, size)?;
        Ok(self.ir().cast(CastOp::Trunc, count, Type::I32)?)
    }
}
