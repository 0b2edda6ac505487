use serde::{Deserialize, Serialize};
use std::fmt;

/// Comparison operator of a filter condition.
///
/// Everything except [`Operator::Custom`] can be translated into a SQL predicate.
/// A custom operator names a filter function registered with the executor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operator {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    Nin,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    Exists,
    NotExists,
    Custom(String),
}

/// Every native operator, in declaration order.
pub const NATIVE_OPERATORS: [Operator; 14] = [
    Operator::Eq,
    Operator::Neq,
    Operator::Lt,
    Operator::Lte,
    Operator::Gt,
    Operator::Gte,
    Operator::In,
    Operator::Nin,
    Operator::Contains,
    Operator::NotContains,
    Operator::StartsWith,
    Operator::EndsWith,
    Operator::Exists,
    Operator::NotExists,
];

impl Operator {
    pub fn custom(name: impl Into<String>) -> Self {
        Operator::from(name.into())
    }

    /// Whether the operator can be pushed down into generated SQL.
    pub fn is_native(&self) -> bool {
        !matches!(self, Operator::Custom(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Operator::Eq => "eq",
            Operator::Neq => "neq",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::In => "in",
            Operator::Nin => "nin",
            Operator::Contains => "contains",
            Operator::NotContains => "ncontains",
            Operator::StartsWith => "startswith",
            Operator::EndsWith => "endswith",
            Operator::Exists => "exists",
            Operator::NotExists => "nexists",
            Operator::Custom(name) => name,
        }
    }
}

impl From<String> for Operator {
    fn from(name: String) -> Self {
        match name.as_str() {
            "eq" => Operator::Eq,
            "neq" => Operator::Neq,
            "lt" => Operator::Lt,
            "lte" => Operator::Lte,
            "gt" => Operator::Gt,
            "gte" => Operator::Gte,
            "in" => Operator::In,
            "nin" => Operator::Nin,
            "contains" => Operator::Contains,
            "ncontains" => Operator::NotContains,
            "startswith" => Operator::StartsWith,
            "endswith" => Operator::EndsWith,
            "exists" => Operator::Exists,
            "nexists" => Operator::NotExists,
            _ => Operator::Custom(name),
        }
    }
}

impl From<&str> for Operator {
    fn from(name: &str) -> Self {
        Operator::from(name.to_string())
    }
}

impl From<Operator> for String {
    fn from(op: Operator) -> Self {
        match op {
            Operator::Custom(name) => name,
            native => native.as_str().to_string(),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical operator combining the children of a filter group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOperator {
    And,
    Or,
    Not,
    Nor,
    Xor,
}

impl LogicalOperator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            LogicalOperator::And => "AND",
            LogicalOperator::Or => "OR",
            LogicalOperator::Not => "NOT",
            LogicalOperator::Nor => "NOR",
            LogicalOperator::Xor => "XOR",
        }
    }

    /// Required child count, if the operator has a fixed arity.
    pub fn arity(&self) -> Option<usize> {
        match self {
            LogicalOperator::Not => Some(1),
            LogicalOperator::Xor => Some(2),
            LogicalOperator::And | LogicalOperator::Or | LogicalOperator::Nor => None,
        }
    }
}

impl fmt::Display for LogicalOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}
