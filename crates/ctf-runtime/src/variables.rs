use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use ctf_core::{CtfError, CtfValue, Operator, TypeTag};
use regex::Regex;

const MARKER: char = '$';

fn whole_value_regex() -> &'static Regex {
    static WHOLE_VALUE: OnceLock<Regex> = OnceLock::new();
    WHOLE_VALUE.get_or_init(|| Regex::new(r"^\$[^$]+\$$").expect("whole-value regex must compile"))
}

/// `=` or one of the binary operators of the operator table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    Apply(Operator),
}

impl FromStr for AssignOp {
    type Err = CtfError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw.trim() == "=" {
            return Ok(Self::Assign);
        }
        let operator = raw.parse::<Operator>()?;
        if operator.is_unary() {
            return Err(CtfError::parameter(
                "OPERATOR_NOT_BINARY",
                format!("Operator \"{}\" cannot be used in an assignment.", raw),
                raw,
            ));
        }
        Ok(Self::Apply(operator))
    }
}

impl fmt::Display for AssignOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Assign => f.write_str("="),
            Self::Apply(operator) => f.write_str(operator.symbol()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableStore {
    values: BTreeMap<String, CtfValue>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&CtfValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Binds `name` directly, bypassing operators and substitution. Used to
    /// seed the store from configuration.
    pub fn insert(&mut self, name: impl Into<String>, value: CtfValue) {
        self.values.insert(name.into(), value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CtfValue)> {
        self.values.iter()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Assigns or updates `name`. `value` is stored as given: references in
    /// it must already be substituted. On any error the store is left
    /// untouched.
    pub fn set(
        &mut self,
        name: &str,
        op: AssignOp,
        value: &CtfValue,
        tag: Option<TypeTag>,
    ) -> Result<CtfValue, CtfError> {
        if name.trim().is_empty() {
            return Err(CtfError::parameter(
                "VARIABLE_NAME_EMPTY",
                "Variable name must not be empty.",
                name,
            ));
        }

        let incoming = value.clone();
        let stored = match op {
            AssignOp::Assign => match tag {
                Some(tag) => incoming.coerce(tag)?,
                None => {
                    log::warn!(
                        "Variable {} has no declared type; storing it as {}.",
                        name,
                        incoming.type_tag()
                    );
                    incoming
                }
            },
            AssignOp::Apply(operator) => {
                let current = self.values.get(name).ok_or_else(|| unbound(name, name))?;
                let rhs = match tag {
                    Some(tag) => incoming.coerce(tag)?,
                    None => incoming,
                };
                let result = operator.apply(current, &rhs)?;
                match tag {
                    Some(tag) => result.coerce(tag)?,
                    None => result,
                }
            }
        };

        self.values.insert(name.to_string(), stored.clone());
        Ok(stored)
    }

    /// Expands `$name$` references. A string that is exactly one reference
    /// yields the bound value itself, which may be a non-string.
    pub fn resolve_string(&self, text: &str) -> Result<CtfValue, CtfError> {
        if text.matches(MARKER).count() < 2 {
            return Ok(CtfValue::String(text.to_string()));
        }

        if whole_value_regex().is_match(text) {
            let name = &text[1..text.len() - 1];
            return self.values.get(name).cloned().ok_or_else(|| unbound(name, text));
        }

        let mut expanded = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(open) = rest.find(MARKER) {
            let after_open = &rest[open + 1..];
            let Some(close) = after_open.find(MARKER) else {
                break;
            };
            let name = &after_open[..close];
            let value = self.values.get(name).ok_or_else(|| unbound(name, text))?;
            expanded.push_str(&rest[..open]);
            expanded.push_str(&value.to_string());
            rest = &after_open[close + 1..];
        }
        expanded.push_str(rest);

        Ok(CtfValue::String(expanded))
    }

    /// Value of a variable written either as a bare name or as a whole
    /// `$name$` reference.
    pub fn lookup(&self, reference: &str) -> Result<CtfValue, CtfError> {
        if whole_value_regex().is_match(reference) {
            return self.resolve_string(reference);
        }
        self.values
            .get(reference)
            .cloned()
            .ok_or_else(|| unbound(reference, reference))
    }

    pub fn resolve_value(&self, value: &CtfValue) -> Result<CtfValue, CtfError> {
        match value {
            CtfValue::String(text) => self.resolve_string(text),
            other => Ok(other.clone()),
        }
    }

    /// Resolves every string inside `value`, descending into lists and maps.
    pub fn resolve_deep(&self, value: &CtfValue) -> Result<CtfValue, CtfError> {
        match value {
            CtfValue::List(items) => items
                .iter()
                .map(|item| self.resolve_deep(item))
                .collect::<Result<Vec<_>, _>>()
                .map(CtfValue::List),
            CtfValue::Dict(entries) => self.resolve_map(entries).map(CtfValue::Dict),
            other => self.resolve_value(other),
        }
    }

    pub fn resolve_map(
        &self,
        entries: &BTreeMap<String, CtfValue>,
    ) -> Result<BTreeMap<String, CtfValue>, CtfError> {
        entries
            .iter()
            .map(|(key, item)| Ok::<_, CtfError>((key.clone(), self.resolve_deep(item)?)))
            .collect()
    }
}

fn unbound(name: &str, literal: &str) -> CtfError {
    CtfError::parameter(
        "VARIABLE_UNBOUND",
        format!("Variable \"{}\" is not defined.", name),
        literal,
    )
}
