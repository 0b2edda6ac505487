use crate::predicate::{evaluate_native, Affinities};
use crate::pushdown::{placement, Placement};
use crate::registry::ResolvedFunctions;
use querydsl_core::{
    ComputedItem, Error, Filter, LogicalOperator, Operator, Projection, Result, Row, Value,
};
use std::collections::HashSet;

/// Re-applies a filter tree to fetched rows.
///
/// Nodes the generator pushed down whole are trusted; everything else, custom
/// conditions and native conditions the database never saw, is evaluated here
/// with SQL's three-valued logic. A row is kept only when its filter is true,
/// never when it is unknown.
pub struct ResidualFilter<'a> {
    filter: &'a Filter,
    functions: &'a ResolvedFunctions,
    columns: Option<&'a Affinities>,
    strict: bool,
}

impl<'a> ResidualFilter<'a> {
    pub fn new(filter: &'a Filter, functions: &'a ResolvedFunctions) -> Self {
        Self { filter, functions, columns: None, strict: true }
    }

    /// Column affinities of the fetched rows; without them they are inferred per value.
    pub fn columns(mut self, columns: &'a Affinities) -> Self {
        self.columns = Some(columns);
        self
    }

    /// Check declared dependency fields before calling a filter function.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn apply(&self, rows: Vec<Row>) -> Result<Vec<Row>> {
        let mut kept = Vec::with_capacity(rows.len());
        for row in rows {
            if self.matches(&row)? {
                kept.push(row);
            }
        }
        Ok(kept)
    }

    /// Evaluate against a row returned by the pushed-down SQL.
    pub fn matches(&self, row: &Row) -> Result<bool> {
        self.evaluate_enforced(self.filter, row)
    }

    fn evaluate_enforced(&self, filter: &Filter, row: &Row) -> Result<bool> {
        match placement(filter) {
            Placement::Pushed => Ok(true),
            Placement::Split => {
                if let Filter::Group(group) = filter {
                    for child in &group.conditions {
                        if !self.evaluate_enforced(child, row)? {
                            return Ok(false);
                        }
                    }
                }
                Ok(true)
            }
            Placement::Residual => Ok(self.evaluate(filter, row)? == Some(true)),
        }
    }

    /// Evaluate a subtree entirely in-process, trusting nothing to SQL.
    ///
    /// `None` is unknown: a NULL reached a native comparison and no AND/OR
    /// short-circuit decided the result.
    pub fn evaluate(&self, filter: &Filter, row: &Row) -> Result<Option<bool>> {
        match filter {
            Filter::Condition(cond) => match &cond.operator {
                Operator::Custom(name) => {
                    let function = self.functions.filter(name)?;
                    if self.strict {
                        let fields = std::iter::once(&cond.field).chain(function.dependencies());
                        require_fields(name, fields, row)?;
                    }
                    function.call(row).map(Some).map_err(|source| Error::FunctionFailed {
                        name: name.clone(),
                        source,
                    })
                }
                _ => {
                    let declared = self.columns.and_then(|columns| columns.get(&cond.field));
                    evaluate_native(cond, row, declared)
                }
            },
            Filter::Group(group) => {
                let children = &group.conditions;
                match group.operator {
                    LogicalOperator::And => self.all(children, row),
                    LogicalOperator::Or => self.any(children, row),
                    LogicalOperator::Nor => Ok(self.any(children, row)?.map(|b| !b)),
                    LogicalOperator::Not => match children.as_slice() {
                        [only] => Ok(self.evaluate(only, row)?.map(|b| !b)),
                        _ => Err(Error::malformed(
                            "NOT operator requires exactly one condition/group",
                        )),
                    },
                    LogicalOperator::Xor => match children.as_slice() {
                        [left, right] => {
                            let (left, right) = (self.evaluate(left, row)?, self.evaluate(right, row)?);
                            Ok(left.zip(right).map(|(l, r)| l != r))
                        }
                        _ => Err(Error::malformed(
                            "XOR operator requires exactly two conditions/groups",
                        )),
                    },
                }
            }
        }
    }

    // False wins over unknown.
    fn all(&self, children: &[Filter], row: &Row) -> Result<Option<bool>> {
        let mut outcome = Some(true);
        for child in children {
            match self.evaluate(child, row)? {
                Some(false) => return Ok(Some(false)),
                None => outcome = None,
                Some(true) => {}
            }
        }
        Ok(outcome)
    }

    // True wins over unknown.
    fn any(&self, children: &[Filter], row: &Row) -> Result<Option<bool>> {
        let mut outcome = Some(false);
        for child in children {
            match self.evaluate(child, row)? {
                Some(true) => return Ok(Some(true)),
                None => outcome = None,
                Some(false) => {}
            }
        }
        Ok(outcome)
    }
}

/// Attaches computed fields to each row, in declaration order.
pub struct ComputeOperator<'a> {
    items: &'a [ComputedItem],
    functions: &'a ResolvedFunctions,
    columns: Option<&'a Affinities>,
    strict: bool,
}

impl<'a> ComputeOperator<'a> {
    pub fn new(items: &'a [ComputedItem], functions: &'a ResolvedFunctions) -> Self {
        Self { items, functions, columns: None, strict: true }
    }

    /// Column affinities used by CASE conditions.
    pub fn columns(mut self, columns: &'a Affinities) -> Self {
        self.columns = Some(columns);
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn apply(&self, mut rows: Vec<Row>) -> Result<Vec<Row>> {
        if self.items.is_empty() {
            return Ok(rows);
        }
        for row in &mut rows {
            for item in self.items {
                let value = self.compute(item, row)?;
                row.insert(item.alias(), value);
            }
        }
        Ok(rows)
    }

    fn compute(&self, item: &ComputedItem, row: &Row) -> Result<Value> {
        match item {
            ComputedItem::Computed { expression, .. } => {
                let name = &expression.function;
                let function = self.functions.compute(name)?;
                if self.strict {
                    require_fields(name, function.dependencies(), row)?;
                }
                function.call(row).map_err(|source| Error::FunctionFailed {
                    name: name.clone(),
                    source,
                })
            }
            ComputedItem::Case { cases, else_value, .. } => {
                for case in cases {
                    let when = ResidualFilter {
                        filter: &case.when,
                        functions: self.functions,
                        columns: self.columns,
                        strict: self.strict,
                    };
                    if when.evaluate(&case.when, row)? == Some(true) {
                        return Ok(case.then.clone());
                    }
                }
                Ok(else_value.clone())
            }
        }
    }
}

fn require_fields<'f>(
    function: &str,
    fields: impl IntoIterator<Item = &'f String>,
    row: &Row,
) -> Result<()> {
    for field in fields {
        if !row.contains(field) {
            return Err(Error::UnresolvedField {
                function: function.to_string(),
                field: field.clone(),
            });
        }
    }
    Ok(())
}

/// Final include/exclude shaping of result rows.
///
/// Computed aliases always survive. `include` wins over `exclude`; with
/// neither, rows pass through unchanged.
pub struct ProjectOperator<'a> {
    projection: Option<&'a Projection>,
}

impl<'a> ProjectOperator<'a> {
    pub fn new(projection: Option<&'a Projection>) -> Self {
        Self { projection }
    }

    pub fn apply(&self, rows: Vec<Row>) -> Vec<Row> {
        let projection = match self.projection {
            Some(projection) if !projection.include.is_empty() || !projection.exclude.is_empty() => {
                projection
            }
            _ => return rows,
        };

        let computed: HashSet<String> = projection.computed_aliases().into_iter().collect();

        if !projection.include.is_empty() {
            let keep: HashSet<&str> = projection
                .include
                .iter()
                .map(|f| f.name.as_str())
                .chain(computed.iter().map(String::as_str))
                .collect();
            rows.into_iter()
                .map(|row| row.into_iter().filter(|(name, _)| keep.contains(name.as_str())).collect())
                .collect()
        } else {
            let drop: HashSet<&str> = projection
                .exclude
                .iter()
                .map(|f| f.name.as_str())
                .filter(|name| !computed.contains(*name))
                .collect();
            rows.into_iter()
                .map(|row| row.into_iter().filter(|(name, _)| !drop.contains(name.as_str())).collect())
                .collect()
        }
    }
}
