use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CtfError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CtfValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<CtfValue>),
    Dict(BTreeMap<String, CtfValue>),
}

/// The closed set of type tags accepted by typed assignments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeTag {
    Int,
    Float,
    String,
    Boolean,
    List,
    Dict,
}

impl TypeTag {
    pub fn name(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::List => "list",
            Self::Dict => "dict",
        }
    }
}

impl FromStr for TypeTag {
    type Err = CtfError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "int" => Ok(Self::Int),
            "float" => Ok(Self::Float),
            "string" => Ok(Self::String),
            "boolean" => Ok(Self::Boolean),
            "list" => Ok(Self::List),
            "dict" => Ok(Self::Dict),
            other => Err(CtfError::parameter(
                "TYPE_TAG_UNKNOWN",
                format!("Unknown variable type \"{}\".", other),
                other,
            )),
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl CtfValue {
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Self::Bool(_) => TypeTag::Boolean,
            Self::Int(_) => TypeTag::Int,
            Self::Float(_) => TypeTag::Float,
            Self::String(_) => TypeTag::String,
            Self::List(_) => TypeTag::List,
            Self::Dict(_) => TypeTag::Dict,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(value) => Some(*value as f64),
            Self::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[CtfValue]> {
        match self {
            Self::List(values) => Some(values.as_slice()),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<String, CtfValue>> {
        match self {
            Self::Dict(entries) => Some(entries),
            _ => None,
        }
    }

    /// Zero, `false` and empty strings or containers are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Bool(value) => *value,
            Self::Int(value) => *value != 0,
            Self::Float(value) => *value != 0.0,
            Self::String(value) => !value.is_empty(),
            Self::List(values) => !values.is_empty(),
            Self::Dict(entries) => !entries.is_empty(),
        }
    }

    /// Converts into `tag`, failing with a parameter error when no
    /// sensible conversion exists.
    pub fn coerce(&self, tag: TypeTag) -> Result<CtfValue, CtfError> {
        let coerced = match (tag, self) {
            (TypeTag::Int, Self::Int(value)) => Some(Self::Int(*value)),
            (TypeTag::Int, Self::Bool(value)) => Some(Self::Int(i64::from(*value))),
            (TypeTag::Int, Self::Float(value)) => {
                if value.is_finite() && value.trunc().abs() < i64::MAX as f64 {
                    Some(Self::Int(value.trunc() as i64))
                } else {
                    None
                }
            }
            (TypeTag::Int, Self::String(raw)) => parse_int_literal(raw).map(Self::Int),

            (TypeTag::Float, Self::Float(value)) => Some(Self::Float(*value)),
            (TypeTag::Float, Self::Int(value)) => Some(Self::Float(*value as f64)),
            (TypeTag::Float, Self::Bool(value)) => {
                Some(Self::Float(if *value { 1.0 } else { 0.0 }))
            }
            (TypeTag::Float, Self::String(raw)) => raw.trim().parse::<f64>().ok().map(Self::Float),

            (TypeTag::String, value) => Some(Self::String(value.to_string())),

            (TypeTag::Boolean, Self::Bool(value)) => Some(Self::Bool(*value)),
            (TypeTag::Boolean, Self::Int(value)) => Some(Self::Bool(*value != 0)),
            (TypeTag::Boolean, Self::Float(value)) => Some(Self::Bool(*value != 0.0)),
            (TypeTag::Boolean, Self::String(raw)) => parse_bool_literal(raw).map(Self::Bool),

            (TypeTag::List, Self::List(values)) => Some(Self::List(values.clone())),
            (TypeTag::List, Self::String(raw)) => match serde_json::from_str(raw) {
                Ok(Self::List(values)) => Some(Self::List(values)),
                _ => None,
            },

            (TypeTag::Dict, Self::Dict(entries)) => Some(Self::Dict(entries.clone())),
            (TypeTag::Dict, Self::String(raw)) => match serde_json::from_str(raw) {
                Ok(Self::Dict(entries)) => Some(Self::Dict(entries)),
                _ => None,
            },

            _ => None,
        };

        coerced.ok_or_else(|| {
            CtfError::parameter(
                "TYPE_COERCION_FAILED",
                format!(
                    "Cannot convert {} value {} to {}.",
                    self.type_tag(),
                    self,
                    tag
                ),
                self.to_string(),
            )
        })
    }

    /// Parses a configuration literal: integers (base auto-detect), floats,
    /// `true`/`false`, otherwise the raw string.
    pub fn from_literal(raw: &str) -> CtfValue {
        if let Some(value) = parse_int_literal(raw) {
            return Self::Int(value);
        }
        if let Ok(value) = raw.trim().parse::<f64>() {
            return Self::Float(value);
        }
        match raw.trim() {
            "true" | "True" => Self::Bool(true),
            "false" | "False" => Self::Bool(false),
            _ => Self::String(raw.to_string()),
        }
    }
}

impl fmt::Display for CtfValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{}", value),
            Self::Int(value) => write!(f, "{}", value),
            Self::Float(value) => write!(f, "{:?}", value),
            Self::String(value) => f.write_str(value),
            Self::List(values) => {
                f.write_str("[")?;
                for (index, value) in values.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write_nested(f, value)?;
                }
                f.write_str("]")
            }
            Self::Dict(entries) => {
                f.write_str("{")?;
                for (index, (key, value)) in entries.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{:?}: ", key)?;
                    write_nested(f, value)?;
                }
                f.write_str("}")
            }
        }
    }
}

fn write_nested(f: &mut fmt::Formatter<'_>, value: &CtfValue) -> fmt::Result {
    match value {
        CtfValue::String(text) => write!(f, "{:?}", text),
        other => write!(f, "{}", other),
    }
}

impl From<bool> for CtfValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for CtfValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for CtfValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for CtfValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for CtfValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

/// Integer parsing with prefix auto-detect: `0x`, `0o`, `0b`, or decimal.
pub fn parse_int_literal(raw: &str) -> Option<i64> {
    let trimmed = raw.trim().replace('_', "");
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed.as_str())),
    };
    if digits.is_empty() {
        return None;
    }

    let lower = digits.to_ascii_lowercase();
    let (radix, body) = if let Some(body) = lower.strip_prefix("0x") {
        (16, body)
    } else if let Some(body) = lower.strip_prefix("0o") {
        (8, body)
    } else if let Some(body) = lower.strip_prefix("0b") {
        (2, body)
    } else {
        (10, lower.as_str())
    };
    if body.is_empty() {
        return None;
    }

    let magnitude = i128::from_str_radix(body, radix).ok()?;
    let signed = if negative { -magnitude } else { magnitude };
    i64::try_from(signed).ok()
}

fn parse_bool_literal(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}
