use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CtfError;
use crate::value::CtfValue;

/// The fixed operator table shared by assignments, conditions and any
/// instruction that takes an operator argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    FloorDiv,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Invert,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

pub const ALL_OPERATORS: [Operator; 19] = [
    Operator::Add,
    Operator::Sub,
    Operator::Mul,
    Operator::Div,
    Operator::Mod,
    Operator::Pow,
    Operator::FloorDiv,
    Operator::BitAnd,
    Operator::BitOr,
    Operator::BitXor,
    Operator::Shl,
    Operator::Shr,
    Operator::Invert,
    Operator::Eq,
    Operator::Ne,
    Operator::Lt,
    Operator::Le,
    Operator::Gt,
    Operator::Ge,
];

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn of(value: &CtfValue) -> Option<Self> {
        match value {
            CtfValue::Int(value) => Some(Self::Int(*value)),
            CtfValue::Float(value) => Some(Self::Float(*value)),
            CtfValue::Bool(value) => Some(Self::Int(i64::from(*value))),
            _ => None,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Self::Int(value) => value as f64,
            Self::Float(value) => value,
        }
    }
}

impl Operator {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Pow => "**",
            Self::FloorDiv => "//",
            Self::BitAnd => "&",
            Self::BitOr => "|",
            Self::BitXor => "^",
            Self::Shl => "<<",
            Self::Shr => ">>",
            Self::Invert => "~",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge
        )
    }

    pub fn is_unary(self) -> bool {
        self == Self::Invert
    }

    /// Applies a binary operator. `~` is rejected here; use
    /// [`Operator::apply_unary`].
    pub fn apply(self, lhs: &CtfValue, rhs: &CtfValue) -> Result<CtfValue, CtfError> {
        if self.is_unary() {
            return Err(CtfError::parameter(
                "OPERATOR_NOT_BINARY",
                "Operator \"~\" is unary and cannot combine two values.",
                self.symbol(),
            ));
        }
        if self.is_comparison() {
            return self.compare(lhs, rhs).map(CtfValue::Bool);
        }

        let result = match (lhs, rhs) {
            (CtfValue::String(left), CtfValue::String(right)) if self == Self::Add => {
                Some(CtfValue::String(format!("{}{}", left, right)))
            }
            (CtfValue::List(left), CtfValue::List(right)) if self == Self::Add => {
                Some(CtfValue::List(left.iter().chain(right).cloned().collect()))
            }
            (CtfValue::String(text), CtfValue::Int(count)) if self == Self::Mul => {
                Some(repeat(text, *count)?)
            }
            (CtfValue::Bool(left), CtfValue::Bool(right))
                if matches!(self, Self::BitAnd | Self::BitOr | Self::BitXor) =>
            {
                Some(CtfValue::Bool(match self {
                    Self::BitAnd => *left & *right,
                    Self::BitOr => *left | *right,
                    _ => *left ^ *right,
                }))
            }
            _ => match (Num::of(lhs), Num::of(rhs)) {
                (Some(left), Some(right)) => Some(self.apply_numeric(left, right, lhs, rhs)?),
                _ => None,
            },
        };

        result.ok_or_else(|| self.unsupported(lhs, rhs))
    }

    pub fn apply_unary(self, operand: &CtfValue) -> Result<CtfValue, CtfError> {
        match (self, operand) {
            (Self::Invert, CtfValue::Int(value)) => Ok(CtfValue::Int(!value)),
            (Self::Invert, CtfValue::Bool(value)) => Ok(CtfValue::Int(!i64::from(*value))),
            (Self::Sub, CtfValue::Int(value)) => value
                .checked_neg()
                .map(CtfValue::Int)
                .ok_or_else(|| overflow(self)),
            (Self::Sub, CtfValue::Float(value)) => Ok(CtfValue::Float(-value)),
            _ => Err(CtfError::parameter(
                "OPERATOR_UNSUPPORTED",
                format!(
                    "Unary operator \"{}\" does not apply to {} value {}.",
                    self.symbol(),
                    operand.type_tag(),
                    operand
                ),
                operand.to_string(),
            )),
        }
    }

    fn apply_numeric(
        self,
        left: Num,
        right: Num,
        lhs: &CtfValue,
        rhs: &CtfValue,
    ) -> Result<CtfValue, CtfError> {
        if let (Num::Int(a), Num::Int(b)) = (left, right) {
            return self.apply_int(a, b, lhs, rhs);
        }

        let (a, b) = (left.as_f64(), right.as_f64());
        let value = match self {
            Self::Add => a + b,
            Self::Sub => a - b,
            Self::Mul => a * b,
            Self::Div => {
                ensure_nonzero(b == 0.0, self)?;
                a / b
            }
            Self::Mod => {
                ensure_nonzero(b == 0.0, self)?;
                a - b * (a / b).floor()
            }
            Self::FloorDiv => {
                ensure_nonzero(b == 0.0, self)?;
                (a / b).floor()
            }
            Self::Pow => a.powf(b),
            _ => return Err(self.unsupported(lhs, rhs)),
        };
        Ok(CtfValue::Float(value))
    }

    fn apply_int(self, a: i64, b: i64, lhs: &CtfValue, rhs: &CtfValue) -> Result<CtfValue, CtfError> {
        let value = match self {
            Self::Add => a.checked_add(b),
            Self::Sub => a.checked_sub(b),
            Self::Mul => a.checked_mul(b),
            Self::Div => {
                ensure_nonzero(b == 0, self)?;
                return Ok(CtfValue::Float(a as f64 / b as f64));
            }
            Self::Mod => {
                ensure_nonzero(b == 0, self)?;
                a.checked_rem(b).map(|rem| {
                    if rem != 0 && ((rem < 0) != (b < 0)) {
                        rem + b
                    } else {
                        rem
                    }
                })
            }
            Self::FloorDiv => {
                ensure_nonzero(b == 0, self)?;
                a.checked_div(b).map(|quotient| {
                    if a % b != 0 && ((a < 0) != (b < 0)) {
                        quotient - 1
                    } else {
                        quotient
                    }
                })
            }
            Self::Pow => {
                if b < 0 {
                    return Ok(CtfValue::Float((a as f64).powf(b as f64)));
                }
                u32::try_from(b).ok().and_then(|exp| a.checked_pow(exp))
            }
            Self::BitAnd => Some(a & b),
            Self::BitOr => Some(a | b),
            Self::BitXor => Some(a ^ b),
            Self::Shl | Self::Shr => {
                if b < 0 {
                    return Err(CtfError::parameter(
                        "OPERATOR_NEGATIVE_SHIFT",
                        format!("Negative shift count {}.", b),
                        rhs.to_string(),
                    ));
                }
                let shift = u32::try_from(b).unwrap_or(u32::MAX);
                if self == Self::Shl {
                    a.checked_shl(shift).filter(|shifted| shifted >> shift == a)
                } else {
                    Some(a.checked_shr(shift).unwrap_or(if a < 0 { -1 } else { 0 }))
                }
            }
            _ => return Err(self.unsupported(lhs, rhs)),
        };
        value.map(CtfValue::Int).ok_or_else(|| overflow(self))
    }

    fn compare(self, lhs: &CtfValue, rhs: &CtfValue) -> Result<bool, CtfError> {
        if matches!(self, Self::Eq | Self::Ne) {
            let equal = values_equal(lhs, rhs);
            return Ok(if self == Self::Eq { equal } else { !equal });
        }

        let ordering = match (lhs, rhs) {
            (CtfValue::String(left), CtfValue::String(right)) => Some(left.cmp(right)),
            _ => match (Num::of(lhs), Num::of(rhs)) {
                (Some(Num::Int(a)), Some(Num::Int(b))) => Some(a.cmp(&b)),
                (Some(a), Some(b)) => a.as_f64().partial_cmp(&b.as_f64()),
                _ => None,
            },
        };

        let Some(ordering) = ordering else {
            return Err(self.unsupported(lhs, rhs));
        };
        Ok(match self {
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
            Self::Gt => ordering == Ordering::Greater,
            _ => ordering != Ordering::Less,
        })
    }

    fn unsupported(self, lhs: &CtfValue, rhs: &CtfValue) -> CtfError {
        CtfError::parameter(
            "OPERATOR_UNSUPPORTED",
            format!(
                "Operator \"{}\" does not apply to {} and {} ({} {} {}).",
                self.symbol(),
                lhs.type_tag(),
                rhs.type_tag(),
                lhs,
                self.symbol(),
                rhs
            ),
            self.symbol(),
        )
    }
}

fn ensure_nonzero(is_zero: bool, op: Operator) -> Result<(), CtfError> {
    if is_zero {
        return Err(CtfError::parameter(
            "OPERATOR_DIVISION_BY_ZERO",
            format!("Operator \"{}\" divided by zero.", op.symbol()),
            "0",
        ));
    }
    Ok(())
}

/// Longest string `*` may build, in bytes.
pub const MAX_REPEAT_LEN: usize = 1 << 20;

fn repeat(text: &str, count: i64) -> Result<CtfValue, CtfError> {
    let count = usize::try_from(count.max(0)).map_err(|_| overflow(Operator::Mul))?;
    match text.len().checked_mul(count) {
        Some(len) if len <= MAX_REPEAT_LEN => Ok(CtfValue::String(text.repeat(count))),
        _ => Err(CtfError::parameter(
            "OPERATOR_OVERFLOW",
            format!(
                "Repeating a {}-byte string {} times exceeds {} bytes.",
                text.len(),
                count,
                MAX_REPEAT_LEN
            ),
            Operator::Mul.symbol(),
        )),
    }
}

fn overflow(op: Operator) -> CtfError {
    CtfError::parameter(
        "OPERATOR_OVERFLOW",
        format!("Integer overflow applying \"{}\".", op.symbol()),
        op.symbol(),
    )
}

fn values_equal(lhs: &CtfValue, rhs: &CtfValue) -> bool {
    match (lhs, rhs) {
        (CtfValue::Int(a), CtfValue::Float(b)) | (CtfValue::Float(b), CtfValue::Int(a)) => {
            (*a as f64) == *b
        }
        (CtfValue::List(a), CtfValue::List(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (CtfValue::Dict(a), CtfValue::Dict(b)) => {
            a.len() == b.len()
                && a
                    .iter()
                    .all(|(key, x)| b.get(key).is_some_and(|y| values_equal(x, y)))
        }
        _ => lhs == rhs,
    }
}

impl FromStr for Operator {
    type Err = CtfError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        ALL_OPERATORS
            .iter()
            .copied()
            .find(|op| op.symbol() == raw.trim())
            .ok_or_else(|| {
                CtfError::parameter(
                    "OPERATOR_UNKNOWN",
                    format!("Operator \"{}\" is not defined in the operator table.", raw),
                    raw,
                )
            })
    }
}

impl TryFrom<String> for Operator {
    type Error = CtfError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

impl From<Operator> for String {
    fn from(op: Operator) -> Self {
        op.symbol().to_string()
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}
