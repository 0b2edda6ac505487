use crate::pushdown;
use crate::registry::ResolvedFunctions;
use querydsl_core::{ComputedItem, Operator, Pagination, Projection, Request, Result, Row};
use std::collections::BTreeSet;

/// What to fetch from the backend for one query, and what is left to do afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchPlan {
    /// Request handed to the generator: full filter, sort, widened projection.
    pub select: Request,
    /// Columns to fetch; empty means every column.
    pub fields: Vec<String>,
    /// The filter still has to be evaluated in-process.
    pub residual: bool,
    /// `(limit, offset)` applied after the residual filter instead of in SQL.
    pub window: Option<(i64, i64)>,
}

impl FetchPlan {
    pub fn build(request: &Request, functions: &ResolvedFunctions) -> Result<Self> {
        let residual = request.filter.as_ref().map(pushdown::needs_residual).unwrap_or(false);
        let fields = Self::fetch_fields(request, functions)?;

        // A page cut in SQL would come up short once residual filtering drops rows.
        let (pagination, window) = match &request.pagination {
            Some(pagination @ Pagination::Offset { .. }) if residual => (None, pagination.window()),
            other => (other.clone(), None),
        };

        let select = Request {
            filter: request.filter.clone(),
            sort: request.sort.clone(),
            pagination,
            projection: Some(Projection::include(fields.iter().cloned())),
            ..Default::default()
        };

        Ok(Self { select, fields, residual, window })
    }

    /// Requested fields plus every field the in-process stages read.
    ///
    /// An empty include list already selects every column, so dependencies
    /// only widen an explicit include list.
    fn fetch_fields(request: &Request, functions: &ResolvedFunctions) -> Result<Vec<String>> {
        let include = match &request.projection {
            Some(projection) if !projection.include.is_empty() => &projection.include,
            _ => return Ok(Vec::new()),
        };

        let mut fields: BTreeSet<String> = include
            .iter()
            .filter(|field| !field.name.is_empty())
            .map(|field| field.name.clone())
            .collect();

        if let Some(filter) = &request.filter {
            pushdown::residual_fields(filter, &mut fields);
            for operator in filter.custom_operators() {
                fields.extend(functions.filter(operator)?.dependencies().iter().cloned());
            }
        }

        let computed = request.projection.iter().flat_map(|p| p.computed.iter());
        for item in computed {
            match item {
                ComputedItem::Computed { expression, .. } => {
                    let function = functions.compute(&expression.function)?;
                    fields.extend(function.dependencies().iter().cloned());
                }
                ComputedItem::Case { cases, .. } => {
                    for case in cases {
                        pushdown::all_fields(&case.when, &mut fields);
                        let mut operators = Vec::new();
                        case.when.for_each_condition(&mut |cond| {
                            if let Operator::Custom(name) = &cond.operator {
                                operators.push(name.as_str());
                            }
                        });
                        for operator in operators {
                            fields.extend(functions.filter(operator)?.dependencies().iter().cloned());
                        }
                    }
                }
            }
        }

        Ok(fields.into_iter().collect())
    }

    /// Apply the deferred offset/limit, if any.
    pub fn apply_window(&self, rows: Vec<Row>) -> Vec<Row> {
        match self.window {
            Some((limit, offset)) => rows
                .into_iter()
                .skip(offset.max(0) as usize)
                .take(limit.max(0) as usize)
                .collect(),
            None => rows,
        }
    }
}
