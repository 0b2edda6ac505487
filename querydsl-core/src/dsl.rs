// Backend-agnostic request model shared by the SQL generator and the executor

use crate::operator::{LogicalOperator, Operator};
use crate::row::Value;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// A single `field <operator> value` predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
}

/// Children combined with a logical operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub operator: LogicalOperator,
    #[serde(default)]
    pub conditions: Vec<Filter>,
}

/// Recursive filter tree: either a leaf condition or a logical group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Filter {
    Condition(Condition),
    Group(Group),
}

impl Filter {
    pub fn condition(field: impl Into<String>, operator: impl Into<Operator>, value: impl Into<Value>) -> Self {
        Filter::Condition(Condition {
            field: field.into(),
            operator: operator.into(),
            value: value.into(),
        })
    }

    /// A condition evaluated by the filter function registered under `operator`.
    pub fn custom(field: impl Into<String>, operator: impl Into<String>) -> Self {
        Filter::condition(field, Operator::custom(operator), Value::Null)
    }

    pub fn group(operator: LogicalOperator, conditions: Vec<Filter>) -> Self {
        Filter::Group(Group { operator, conditions })
    }

    pub fn and(conditions: Vec<Filter>) -> Self {
        Filter::group(LogicalOperator::And, conditions)
    }

    pub fn or(conditions: Vec<Filter>) -> Self {
        Filter::group(LogicalOperator::Or, conditions)
    }

    pub fn nor(conditions: Vec<Filter>) -> Self {
        Filter::group(LogicalOperator::Nor, conditions)
    }

    pub fn not(inner: Filter) -> Self {
        Filter::group(LogicalOperator::Not, vec![inner])
    }

    pub fn xor(left: Filter, right: Filter) -> Self {
        Filter::group(LogicalOperator::Xor, vec![left, right])
    }

    /// True when no condition in this subtree uses a custom operator.
    pub fn is_fully_native(&self) -> bool {
        match self {
            Filter::Condition(cond) => cond.operator.is_native(),
            Filter::Group(group) => group.conditions.iter().all(Filter::is_fully_native),
        }
    }

    /// Visit every condition in the tree, depth first.
    pub fn for_each_condition<'a>(&'a self, visit: &mut impl FnMut(&'a Condition)) {
        match self {
            Filter::Condition(cond) => visit(cond),
            Filter::Group(group) => {
                for child in &group.conditions {
                    child.for_each_condition(visit);
                }
            }
        }
    }

    /// Names of all custom operators referenced anywhere in the tree.
    pub fn custom_operators(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.for_each_condition(&mut |cond| {
            if let Operator::Custom(name) = &cond.operator {
                if !names.contains(&name.as_str()) {
                    names.push(name.as_str());
                }
            }
        });
        names
    }

    /// Structural checks that hold regardless of where the tree is evaluated.
    pub fn validate(&self) -> Result<()> {
        match self {
            Filter::Condition(cond) => cond.validate(),
            Filter::Group(group) => {
                if let Some(arity) = group.operator.arity() {
                    if group.conditions.len() != arity {
                        return Err(Error::malformed(format!(
                            "{} operator requires exactly {} condition(s), got {}",
                            group.operator,
                            arity,
                            group.conditions.len()
                        )));
                    }
                }
                group.conditions.iter().try_for_each(Filter::validate)
            }
        }
    }
}

impl Condition {
    pub fn validate(&self) -> Result<()> {
        if self.field.is_empty() {
            return Err(Error::malformed(format!(
                "condition with operator '{}' has an empty field name",
                self.operator
            )));
        }
        if let Operator::Custom(name) = &self.operator {
            if name.is_empty() {
                return Err(Error::malformed("custom operator name cannot be empty"));
            }
            // Would read back as the native operator after serialization.
            if Operator::from(name.as_str()).is_native() {
                return Err(Error::malformed(format!(
                    "custom operator '{}' shadows a native operator",
                    name
                )));
            }
        }
        if matches!(self.operator, Operator::In | Operator::Nin) {
            match &self.value {
                Value::List(items) if !items.is_empty() => {}
                _ => {
                    return Err(Error::malformed(format!(
                        "{} operator requires a non-empty list value",
                        self.operator.as_str().to_uppercase()
                    )))
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// One ORDER BY entry; list position is priority, most significant first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sort {
    pub field: String,
    pub direction: SortDirection,
}

impl Sort {
    pub fn asc(field: impl Into<String>) -> Self {
        Self { field: field.into(), direction: SortDirection::Asc }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self { field: field.into(), direction: SortDirection::Desc }
    }
}

/// Pagination. Cursor pagination is part of the model but is not executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Pagination {
    Offset {
        limit: i64,
        #[serde(default)]
        offset: Option<i64>,
    },
    Cursor {
        cursor: String,
        #[serde(default)]
        limit: Option<i64>,
    },
}

impl Pagination {
    pub fn offset(limit: i64, offset: i64) -> Self {
        Pagination::Offset { limit, offset: Some(offset) }
    }

    pub fn limit(limit: i64) -> Self {
        Pagination::Offset { limit, offset: None }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Pagination::Offset { limit, offset } => {
                if *limit < 0 {
                    return Err(Error::malformed(format!("limit cannot be negative, got {}", limit)));
                }
                if let Some(offset) = offset {
                    if *offset < 0 {
                        return Err(Error::malformed(format!("offset cannot be negative, got {}", offset)));
                    }
                }
                Ok(())
            }
            Pagination::Cursor { limit, .. } => match limit {
                Some(limit) if *limit < 0 => {
                    Err(Error::malformed(format!("limit cannot be negative, got {}", limit)))
                }
                _ => Ok(()),
            },
        }
    }

    /// `(limit, offset)` for offset pagination, `None` for cursors.
    pub fn window(&self) -> Option<(i64, i64)> {
        match self {
            Pagination::Offset { limit, offset } => Some((*limit, offset.unwrap_or(0))),
            Pagination::Cursor { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionField {
    pub name: String,
    /// Sub-object projection. Accepted in requests, not executed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nested: Option<Box<Projection>>,
}

impl From<&str> for ProjectionField {
    fn from(name: &str) -> Self {
        Self { name: name.to_string(), nested: None }
    }
}

impl From<String> for ProjectionField {
    fn from(name: String) -> Self {
        Self { name, nested: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub function: String,
    #[serde(default)]
    pub arguments: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseCondition {
    pub when: Filter,
    pub then: Value,
}

/// A derived output field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ComputedItem {
    Computed {
        expression: FunctionCall,
        #[serde(default)]
        alias: Option<String>,
    },
    /// CASE expression: the first case whose `when` matches gives the value, else `else`.
    Case {
        cases: Vec<CaseCondition>,
        #[serde(default, rename = "else")]
        else_value: Value,
        #[serde(default)]
        alias: Option<String>,
    },
}

impl ComputedItem {
    pub fn function(name: impl Into<String>, alias: impl Into<String>) -> Self {
        ComputedItem::Computed {
            expression: FunctionCall { function: name.into(), arguments: Vec::new() },
            alias: Some(alias.into()),
        }
    }

    /// Output field name; defaults to the function name.
    pub fn alias(&self) -> String {
        match self {
            ComputedItem::Computed { expression, alias } => match alias {
                Some(alias) if !alias.is_empty() => alias.clone(),
                _ => expression.function.clone(),
            },
            ComputedItem::Case { alias, .. } => alias.clone().unwrap_or_else(|| "case".to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    #[serde(default)]
    pub include: Vec<ProjectionField>,
    #[serde(default)]
    pub exclude: Vec<ProjectionField>,
    #[serde(default)]
    pub computed: Vec<ComputedItem>,
}

impl Projection {
    pub fn include<I, F>(fields: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<ProjectionField>,
    {
        Self {
            include: fields.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn exclude<I, F>(fields: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<ProjectionField>,
    {
        Self {
            exclude: fields.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_computed(mut self, item: ComputedItem) -> Self {
        self.computed.push(item);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty() && self.computed.is_empty()
    }

    pub fn computed_aliases(&self) -> Vec<String> {
        self.computed.iter().map(ComputedItem::alias).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Join {
    #[serde(rename = "type")]
    pub join_type: JoinType,
    pub target_table: String,
    pub on: Filter,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub projection: Option<Projection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationType {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    #[serde(rename = "type")]
    pub aggregation_type: AggregationType,
    pub field: String,
    #[serde(default)]
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowFunction {
    pub function: String,
    #[serde(default)]
    pub arguments: Vec<Value>,
    #[serde(default)]
    pub partition_by: Vec<String>,
    #[serde(default)]
    pub order_by: Vec<Sort>,
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryHint {
    #[serde(rename = "type")]
    pub hint_type: String,
    #[serde(default)]
    pub index: Option<String>,
    #[serde(default)]
    pub seconds: Option<u64>,
}

/// A complete retrieval request.
///
/// `joins`, `aggregations`, `window` and `hints` are reserved: they round-trip
/// through serialization but the executor ignores them (with a warning).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub filter: Option<Filter>,
    #[serde(default)]
    pub sort: Vec<Sort>,
    #[serde(default)]
    pub pagination: Option<Pagination>,
    #[serde(default)]
    pub projection: Option<Projection>,
    #[serde(default)]
    pub joins: Vec<Join>,
    #[serde(default)]
    pub aggregations: Vec<Aggregation>,
    #[serde(default)]
    pub window: Vec<WindowFunction>,
    #[serde(default)]
    pub hints: Vec<QueryHint>,
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_sort(mut self, sort: Sort) -> Self {
        self.sort.push(sort);
        self
    }

    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }

    /// Reserved slots that carry data the executor will not act on.
    pub fn unsupported_features(&self) -> Vec<&'static str> {
        let mut features = Vec::new();
        if !self.joins.is_empty() {
            features.push("joins");
        }
        if !self.aggregations.is_empty() {
            features.push("aggregations");
        }
        if !self.window.is_empty() {
            features.push("window");
        }
        if !self.hints.is_empty() {
            features.push("hints");
        }
        features
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_json_shape() {
        let json = r#"{
            "group": {
                "operator": "or",
                "conditions": [
                    {"condition": {"field": "age", "operator": "gt", "value": 18}},
                    {"condition": {"field": "age", "operator": "is_adult"}}
                ]
            }
        }"#;
        let filter: Filter = serde_json::from_str(json).unwrap();
        assert_eq!(
            filter,
            Filter::or(vec![Filter::condition("age", Operator::Gt, 18), Filter::custom("age", "is_adult")])
        );
        assert!(!filter.is_fully_native());
        assert_eq!(filter.custom_operators(), vec!["is_adult"]);
    }

    #[test]
    fn test_empty_node_is_rejected() {
        assert!(serde_json::from_str::<Filter>("{}").is_err());
    }

    #[test]
    fn test_validate_arity() {
        let not = Filter::group(LogicalOperator::Not, vec![]);
        assert!(matches!(not.validate(), Err(Error::MalformedRequest(_))));

        let xor = Filter::group(
            LogicalOperator::Xor,
            vec![Filter::condition("a", Operator::Eq, 1)],
        );
        assert!(xor.validate().is_err());

        let ok = Filter::xor(Filter::condition("a", Operator::Eq, 1), Filter::condition("b", Operator::Eq, 2));
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_validate_empty_in_list() {
        let filter = Filter::condition("id", Operator::In, Value::List(vec![]));
        let err = filter.validate().unwrap_err();
        assert!(err.to_string().contains("IN operator requires a non-empty list"));

        let scalar = Filter::condition("id", Operator::Nin, 3);
        assert!(scalar.validate().is_err());
    }

    #[test]
    fn test_custom_name_cannot_shadow_native_operator() {
        let shadow = Filter::Condition(Condition {
            field: "age".to_string(),
            operator: Operator::Custom("eq".to_string()),
            value: Value::Integer(1),
        });
        let err = shadow.validate().unwrap_err();
        assert_eq!(err.to_string(), "Malformed request: custom operator 'eq' shadows a native operator");

        assert!(Filter::custom("age", "equals").validate().is_ok());
        let nested = Filter::not(Filter::Condition(Condition {
            field: "age".to_string(),
            operator: Operator::Custom("nexists".to_string()),
            value: Value::Null,
        }));
        assert!(nested.validate().is_err());
    }

    #[test]
    fn test_pagination_validate() {
        assert!(Pagination::limit(0).validate().is_ok());
        assert!(Pagination::limit(-1).validate().is_err());
        assert!(Pagination::offset(5, -2).validate().is_err());
        assert_eq!(Pagination::limit(2).window(), Some((2, 0)));
    }

    #[test]
    fn test_computed_alias_defaults_to_function() {
        let item = ComputedItem::Computed {
            expression: FunctionCall { function: "full_name".to_string(), arguments: vec![] },
            alias: None,
        };
        assert_eq!(item.alias(), "full_name");
        assert_eq!(ComputedItem::function("full_name", "name").alias(), "name");
    }

    #[test]
    fn test_request_from_json() {
        let request = Request::from_json(
            r#"{
                "filter": {"condition": {"field": "age", "operator": "gt", "value": 18}},
                "sort": [{"field": "id", "direction": "asc"}],
                "pagination": {"type": "offset", "limit": 2},
                "projection": {
                    "include": [{"name": "id"}],
                    "computed": [{"type": "computed", "expression": {"function": "full_name"}, "alias": "name"}]
                },
                "hints": [{"type": "index", "index": "idx_age"}]
            }"#,
        )
        .unwrap();
        assert_eq!(request.sort, vec![Sort::asc("id")]);
        assert_eq!(request.pagination, Some(Pagination::limit(2)));
        assert_eq!(request.unsupported_features(), vec!["hints"]);
        let projection = request.projection.unwrap();
        assert_eq!(projection.computed_aliases(), vec!["name".to_string()]);
    }

    proptest::proptest! {
        #[test]
        fn test_offset_pagination_accepts_only_non_negative(limit in -50i64..50, offset in -50i64..50) {
            let valid = Pagination::offset(limit, offset).validate().is_ok();
            proptest::prop_assert_eq!(valid, limit >= 0 && offset >= 0);
        }
    }
}
