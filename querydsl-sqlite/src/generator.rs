// SQLite dialect of the query generator.
//
// Identifiers are always double-quoted with embedded quotes doubled, and every
// value travels as a `?` parameter.

use querydsl_core::{Condition, Error, Filter, LogicalOperator, Operator, Record, Request, Result, Value};
use querydsl_query::predicate::like_pattern;
use querydsl_query::pushdown::{placement, Placement};
use querydsl_query::{QueryGenerator, Statement};

/// Quote an identifier so it can never terminate the surrounding statement.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[derive(Debug, Clone)]
pub struct SqliteGenerator {
    table: String,
}

impl SqliteGenerator {
    pub fn new(table: impl Into<String>) -> Self {
        Self { table: table.into() }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn quoted_table(&self) -> Result<String> {
        if self.table.is_empty() {
            return Err(Error::malformed("table name cannot be empty"));
        }
        Ok(quote_identifier(&self.table))
    }

    fn quoted_field(name: &str, context: &str) -> Result<String> {
        if name.is_empty() {
            return Err(Error::malformed(format!("{} field name cannot be empty", context)));
        }
        Ok(quote_identifier(name))
    }

    fn push_where(sql: &mut String, filter: Option<&Filter>, params: &mut Vec<Value>) -> Result<bool> {
        let clause = match filter {
            Some(filter) => {
                filter.validate()?;
                reject_untranslatable(filter)?;
                WhereBuilder { params }.enforced(filter)?
            }
            None => None,
        };
        match clause {
            Some(clause) => {
                sql.push_str(" WHERE ");
                sql.push_str(&clause);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl QueryGenerator for SqliteGenerator {
    fn generate_select(&self, request: &Request) -> Result<Statement> {
        let table = self.quoted_table()?;
        let mut params = Vec::new();

        let columns = match &request.projection {
            Some(projection) if !projection.include.is_empty() => projection
                .include
                .iter()
                .map(|field| Self::quoted_field(&field.name, "projection"))
                .collect::<Result<Vec<_>>>()?
                .join(", "),
            _ => "*".to_string(),
        };

        let mut sql = format!("SELECT {} FROM {}", columns, table);
        Self::push_where(&mut sql, request.filter.as_ref(), &mut params)?;

        if !request.sort.is_empty() {
            let order = request
                .sort
                .iter()
                .map(|sort| Ok(format!("{} {}", Self::quoted_field(&sort.field, "sort")?, sort.direction.as_sql())))
                .collect::<Result<Vec<_>>>()?;
            sql.push_str(" ORDER BY ");
            sql.push_str(&order.join(", "));
        }

        if let Some(pagination) = &request.pagination {
            pagination.validate()?;
            if let Some((limit, offset)) = pagination.window() {
                sql.push_str(" LIMIT ?");
                params.push(Value::Integer(limit));
                if offset > 0 {
                    sql.push_str(" OFFSET ?");
                    params.push(Value::Integer(offset));
                }
            }
        }

        Ok(Statement::new(sql, params))
    }

    fn generate_update(&self, updates: &Record, filter: Option<&Filter>) -> Result<Statement> {
        let table = self.quoted_table()?;
        if updates.is_empty() {
            return Err(Error::malformed("no fields to update"));
        }

        let mut params = Vec::with_capacity(updates.len());
        let mut assignments = Vec::with_capacity(updates.len());
        for (field, value) in updates {
            assignments.push(format!("{} = ?", Self::quoted_field(field, "update")?));
            params.push(value.clone());
        }

        let mut sql = format!("UPDATE {} SET {}", table, assignments.join(", "));
        Self::push_where(&mut sql, filter, &mut params)?;
        Ok(Statement::new(sql, params))
    }

    fn generate_insert(&self, records: &[Record]) -> Result<Statement> {
        let table = self.quoted_table()?;
        let first = records
            .first()
            .ok_or_else(|| Error::malformed("no records to insert"))?;
        if first.is_empty() {
            return Err(Error::malformed("cannot insert a record with no fields"));
        }

        for (index, record) in records.iter().enumerate().skip(1) {
            if record.len() != first.len() || !record.keys().eq(first.keys()) {
                return Err(Error::malformed(format!(
                    "record {} has a different set of fields than record 0",
                    index
                )));
            }
        }

        let columns = first
            .keys()
            .map(|field| Self::quoted_field(field, "insert"))
            .collect::<Result<Vec<_>>>()?;
        let placeholders = format!("({})", vec!["?"; columns.len()].join(", "));

        let mut params = Vec::with_capacity(columns.len() * records.len());
        for record in records {
            params.extend(record.values().cloned());
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES {} RETURNING *",
            table,
            columns.join(", "),
            vec![placeholders; records.len()].join(", ")
        );
        Ok(Statement::new(sql, params))
    }

    fn generate_delete(&self, filter: Option<&Filter>, allow_unrestricted: bool) -> Result<Statement> {
        let table = self.quoted_table()?;
        let mut params = Vec::new();
        let mut sql = format!("DELETE FROM {}", table);

        let restricted = Self::push_where(&mut sql, filter, &mut params)?;
        if !restricted && !allow_unrestricted {
            return Err(Error::malformed(
                "delete without a filter requires allow_unrestricted to be set",
            ));
        }
        Ok(Statement::new(sql, params))
    }
}

fn untranslatable(operator: LogicalOperator) -> Error {
    Error::malformed(format!(
        "unsupported logical operator for direct SQL translation: {}",
        operator
    ))
}

// A fully native NOR/XOR fails at any depth, including under groups that are
// evaluated in-process and never reach `WhereBuilder::native`.
fn reject_untranslatable(filter: &Filter) -> Result<()> {
    if let Filter::Group(group) = filter {
        if matches!(group.operator, LogicalOperator::Nor | LogicalOperator::Xor) && filter.is_fully_native() {
            return Err(untranslatable(group.operator));
        }
        for child in &group.conditions {
            reject_untranslatable(child)?;
        }
    }
    Ok(())
}

/// Builds a WHERE clause, appending parameters in fragment order.
///
/// `None` from any method means "no constraint": the fragment is omitted.
struct WhereBuilder<'a> {
    params: &'a mut Vec<Value>,
}

impl WhereBuilder<'_> {
    /// The portion of `filter` the database enforces, as decided by [`placement`].
    fn enforced(&mut self, filter: &Filter) -> Result<Option<String>> {
        match placement(filter) {
            Placement::Pushed => self.native(filter),
            Placement::Split => match filter {
                Filter::Group(group) => {
                    let mut fragments = Vec::new();
                    for child in &group.conditions {
                        if let Some(fragment) = self.enforced(child)? {
                            fragments.push(fragment);
                        }
                    }
                    Ok(Self::join(fragments, " AND "))
                }
                Filter::Condition(_) => Ok(None),
            },
            Placement::Residual => Ok(None),
        }
    }

    fn native(&mut self, filter: &Filter) -> Result<Option<String>> {
        let group = match filter {
            Filter::Condition(cond) => return self.condition(cond).map(Some),
            Filter::Group(group) => group,
        };

        match group.operator {
            LogicalOperator::And => {
                let mut fragments = Vec::new();
                for child in &group.conditions {
                    if let Some(fragment) = self.native(child)? {
                        fragments.push(fragment);
                    }
                }
                Ok(Self::join(fragments, " AND "))
            }
            LogicalOperator::Or => {
                if group.conditions.is_empty() {
                    return Ok(Some("1 = 0".to_string()));
                }
                let mut fragments = Vec::new();
                for child in &group.conditions {
                    match self.native(child)? {
                        Some(fragment) => fragments.push(fragment),
                        // An unconstrained branch makes the whole OR true.
                        None => return Ok(None),
                    }
                }
                Ok(Self::join(fragments, " OR "))
            }
            LogicalOperator::Not => match group.conditions.as_slice() {
                [only] => Ok(Some(match self.native(only)? {
                    Some(fragment) => format!("NOT ({})", fragment),
                    None => "1 = 0".to_string(),
                })),
                _ => Err(Error::malformed("NOT operator requires exactly one condition/group")),
            },
            LogicalOperator::Nor | LogicalOperator::Xor => Err(untranslatable(group.operator)),
        }
    }

    fn condition(&mut self, cond: &Condition) -> Result<String> {
        let field = SqliteGenerator::quoted_field(&cond.field, "filter")?;
        let comparison = |params: &mut Vec<Value>, op: &str| {
            params.push(cond.value.clone());
            format!("{} {} ?", field, op)
        };

        let fragment = match &cond.operator {
            Operator::Eq => comparison(self.params, "="),
            Operator::Neq => comparison(self.params, "!="),
            Operator::Lt => comparison(self.params, "<"),
            Operator::Lte => comparison(self.params, "<="),
            Operator::Gt => comparison(self.params, ">"),
            Operator::Gte => comparison(self.params, ">="),
            Operator::In | Operator::Nin => {
                let items = match cond.value.as_list() {
                    Some(items) if !items.is_empty() => items,
                    _ => {
                        return Err(Error::malformed(format!(
                            "{} operator requires a non-empty list value",
                            cond.operator.as_str().to_uppercase()
                        )))
                    }
                };
                self.params.extend(items.iter().cloned());
                let keyword = if cond.operator == Operator::In { "IN" } else { "NOT IN" };
                format!("{} {} ({})", field, keyword, vec!["?"; items.len()].join(", "))
            }
            Operator::Contains | Operator::NotContains | Operator::StartsWith | Operator::EndsWith => {
                let pattern = like_pattern(&cond.operator, &cond.value);
                self.params.push(pattern.map_or(Value::Null, Value::Text));
                let keyword = if cond.operator == Operator::NotContains { "NOT LIKE" } else { "LIKE" };
                format!("{} {} ?", field, keyword)
            }
            Operator::Exists => format!("{} IS NOT NULL", field),
            Operator::NotExists => format!("{} IS NULL", field),
            Operator::Custom(name) => {
                return Err(Error::malformed(format!(
                    "custom operator '{}' has no SQL translation",
                    name
                )))
            }
        };
        Ok(fragment)
    }

    fn join(fragments: Vec<String>, connective: &str) -> Option<String> {
        match fragments.len() {
            0 => None,
            1 => fragments.into_iter().next(),
            _ => Some(format!("({})", fragments.join(connective))),
        }
    }
}
