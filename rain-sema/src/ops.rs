//! Canonical method names behind operators.
//!
//! Operators are resolved as method lookups under these names, for builtin
//! and user types alike.

use rain_ast::{BinaryOp, UnaryOp};

pub const INDEX: &str = "__get__";
pub const CAST: &str = "__from__";
pub const HAS_VALUE: &str = "__has__";
pub const LENGTH: &str = "length";

/// `None` for assignment, which is not overloadable.
pub fn binary_method(op: BinaryOp) -> Option<&'static str> {
    Some(match op {
        BinaryOp::Assign => return None,
        BinaryOp::Add => "__add__",
        BinaryOp::Sub => "__sub__",
        BinaryOp::Mul => "__mul__",
        BinaryOp::Div => "__div__",
        BinaryOp::Rem => "__rem__",
        BinaryOp::Eq => "__eq__",
        BinaryOp::Ne => "__ne__",
        BinaryOp::Lt => "__lt__",
        BinaryOp::Le => "__le__",
        BinaryOp::Gt => "__gt__",
        BinaryOp::Ge => "__ge__",
        BinaryOp::And => "__and__",
        BinaryOp::Or => "__or__",
        BinaryOp::Xor => "__xor__",
        BinaryOp::Shl => "__shl__",
        BinaryOp::Shr => "__shr__",
        BinaryOp::RotateLeft => "__rotl__",
        BinaryOp::RotateRight => "__rotr__",
        BinaryOp::Index => INDEX,
    })
}

/// `None` for address-of, which the validator handles directly.
pub fn unary_method(op: UnaryOp) -> Option<&'static str> {
    Some(match op {
        UnaryOp::Negative => "__neg__",
        UnaryOp::Positive => "__pos__",
        UnaryOp::Not => "__not__",
        UnaryOp::HasValue => HAS_VALUE,
        UnaryOp::Reference => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_and_has_value_share_intrinsic_names() {
        assert_eq!(binary_method(BinaryOp::Index), Some(INDEX));
        assert_eq!(unary_method(UnaryOp::HasValue), Some(HAS_VALUE));
        assert_eq!(binary_method(BinaryOp::Assign), None);
    }
}
