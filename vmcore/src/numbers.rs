use std::cmp::Ordering;

use thiserror::Error;

use crate::{Heap, Value, ValueKind};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArithmeticError {
    #[error("IntegerDivisionByZeroException")]
    DivisionByZero,
    #[error("negative shift count {0}")]
    NegativeShift(i64),
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

pub type ArithmeticResult<T> = Result<T, ArithmeticError>;

/// Integers wrap around at 64 bits, smi overflow is handled by boxing into a
/// mint, never by widening.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Number {
    Integer(i64),
    Double(f64),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    TruncDiv,
    Mod,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    UShr,
}

// ── integers ───────────────────────────────────────────────────────

pub fn int_truncating_div(left: i64, right: i64) -> ArithmeticResult<i64> {
    if right == 0 {
        return Err(ArithmeticError::DivisionByZero);
    }
    // MIN ~/ -1 wraps back to MIN
    Ok(left.wrapping_div(right))
}

/// Euclidean-style modulo, the result is never negative.
pub fn int_modulo(left: i64, right: i64) -> ArithmeticResult<i64> {
    if right == 0 {
        return Err(ArithmeticError::DivisionByZero);
    }
    let mut result = left.wrapping_rem(right);
    if result < 0 {
        if right < 0 {
            result = result.wrapping_sub(right);
        } else {
            result = result.wrapping_add(right);
        }
    }
    Ok(result)
}

pub fn int_remainder(left: i64, right: i64) -> ArithmeticResult<i64> {
    if right == 0 {
        return Err(ArithmeticError::DivisionByZero);
    }
    Ok(left.wrapping_rem(right))
}

pub fn int_shl(value: i64, count: i64) -> ArithmeticResult<i64> {
    match count {
        i64::MIN..0 => Err(ArithmeticError::NegativeShift(count)),
        0..64 => Ok(value.wrapping_shl(count as u32)),
        _ => Ok(0),
    }
}

pub fn int_shr(value: i64, count: i64) -> ArithmeticResult<i64> {
    match count {
        i64::MIN..0 => Err(ArithmeticError::NegativeShift(count)),
        0..64 => Ok(value >> count),
        _ => Ok(if value < 0 { -1 } else { 0 }),
    }
}

pub fn int_ushr(value: i64, count: i64) -> ArithmeticResult<i64> {
    match count {
        i64::MIN..0 => Err(ArithmeticError::NegativeShift(count)),
        0..64 => Ok(((value as u64) >> count) as i64),
        _ => Ok(0),
    }
}

pub fn int_binary_op(op: BinaryOp, left: i64, right: i64) -> ArithmeticResult<i64> {
    match op {
        BinaryOp::Add => Ok(left.wrapping_add(right)),
        BinaryOp::Sub => Ok(left.wrapping_sub(right)),
        BinaryOp::Mul => Ok(left.wrapping_mul(right)),
        BinaryOp::TruncDiv => int_truncating_div(left, right),
        BinaryOp::Mod => int_modulo(left, right),
        BinaryOp::Rem => int_remainder(left, right),
        BinaryOp::BitAnd => Ok(left & right),
        BinaryOp::BitOr => Ok(left | right),
        BinaryOp::BitXor => Ok(left ^ right),
        BinaryOp::Shl => int_shl(left, right),
        BinaryOp::Shr => int_shr(left, right),
        BinaryOp::UShr => int_ushr(left, right),
    }
}

// ── doubles ────────────────────────────────────────────────────────

/// Truncating conversion, saturating outside the 64-bit range.
pub fn double_to_int(value: f64) -> ArithmeticResult<i64> {
    if value.is_nan() {
        return Err(ArithmeticError::Unsupported("NaN".into()));
    }
    if value.is_infinite() {
        let text = if value > 0.0 { "Infinity" } else { "-Infinity" };
        return Err(ArithmeticError::Unsupported(text.into()));
    }
    Ok(value.trunc() as i64)
}

pub fn double_modulo(left: f64, right: f64) -> f64 {
    let mut result = left % right;
    if result < 0.0 {
        if right < 0.0 {
            result -= right;
        } else {
            result += right;
        }
    }
    result
}

pub fn double_binary_op(op: BinaryOp, left: f64, right: f64) -> ArithmeticResult<Number> {
    let result = match op {
        BinaryOp::Add => left + right,
        BinaryOp::Sub => left - right,
        BinaryOp::Mul => left * right,
        BinaryOp::Mod => double_modulo(left, right),
        BinaryOp::Rem => left % right,
        BinaryOp::TruncDiv => {
            if right == 0.0 {
                return Err(ArithmeticError::DivisionByZero);
            }
            return double_to_int(left / right).map(Number::Integer);
        }
        _ => {
            return Err(ArithmeticError::Unsupported(format!(
                "{op:?} on double"
            )));
        }
    };
    Ok(Number::Double(result))
}

/// Bitwise equality, used for canonical doubles: `-0.0` and `0.0` differ,
/// identical NaN payloads are equal.
pub fn double_identical(left: f64, right: f64) -> bool {
    left.to_bits() == right.to_bits()
}

impl Number {
    pub fn binary_op(self, op: BinaryOp, other: Number) -> ArithmeticResult<Number> {
        match (self, other) {
            (Self::Integer(left), Self::Integer(right)) => {
                int_binary_op(op, left, right).map(Self::Integer)
            }
            (left, right) => double_binary_op(op, left.to_double(), right.to_double()),
        }
    }

    pub fn divide(self, other: Number) -> f64 {
        self.to_double() / other.to_double()
    }

    pub fn to_double(self) -> f64 {
        match self {
            Self::Integer(value) => value as f64,
            Self::Double(value) => value,
        }
    }

    pub fn negate(self) -> Number {
        match self {
            Self::Integer(value) => Self::Integer(value.wrapping_neg()),
            Self::Double(value) => Self::Double(-value),
        }
    }

    /// Numeric comparison, `None` when a NaN is involved.
    pub fn compare(self, other: Number) -> Option<Ordering> {
        match (self, other) {
            (Self::Integer(left), Self::Integer(right)) => Some(left.cmp(&right)),
            (left, right) => left.to_double().partial_cmp(&right.to_double()),
        }
    }
}

impl Heap {
    /// Numeric value of a smi, mint or double.
    pub fn number_value(&self, value: Value) -> Option<Number> {
        match value.kind() {
            ValueKind::Smi(smi) => Some(Number::Integer(smi)),
            ValueKind::Ref(id) => self
                .mint_value(id)
                .map(Number::Integer)
                .or_else(|| self.double_value(id).map(Number::Double)),
        }
    }

    pub fn integer_value(&self, value: Value) -> Option<i64> {
        match value.kind() {
            ValueKind::Smi(smi) => Some(smi),
            ValueKind::Ref(id) => self.mint_value(id),
        }
    }
}
