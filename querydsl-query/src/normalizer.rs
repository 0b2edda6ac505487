use crate::backend::{ColumnInfo, RawValue, ResultSet};
use querydsl_core::{Error, Result, Row, Value};

/// Converts driver values into canonical [`Value`]s.
///
/// Backends with their own type quirks supply their own implementation.
pub trait RowNormalizer: Send + Sync {
    fn normalize_value(&self, column: &ColumnInfo, raw: RawValue) -> Result<Value>;

    fn normalize_row(&self, columns: &[ColumnInfo], raw: Vec<RawValue>) -> Result<Row> {
        if raw.len() != columns.len() {
            return Err(Error::backend(
                "normalize",
                format!("row has {} values for {} columns", raw.len(), columns.len()),
            ));
        }
        let mut row = Row::with_capacity(columns.len());
        for (column, value) in columns.iter().zip(raw) {
            row.insert(column.name.clone(), self.normalize_value(column, value)?);
        }
        Ok(row)
    }

    fn normalize_all(&self, result: ResultSet) -> Result<Vec<Row>> {
        let ResultSet { columns, rows } = result;
        rows.into_iter()
            .map(|raw| self.normalize_row(&columns, raw))
            .collect()
    }
}

/// Maps storage classes one to one, ignoring declared types.
#[derive(Debug, Clone, Copy, Default)]
pub struct StorageClassNormalizer;

impl RowNormalizer for StorageClassNormalizer {
    fn normalize_value(&self, column: &ColumnInfo, raw: RawValue) -> Result<Value> {
        Ok(match raw {
            RawValue::Null => Value::Null,
            RawValue::Integer(v) => Value::Integer(v),
            RawValue::Real(v) => Value::Float(v),
            RawValue::Text(bytes) => Value::Text(decode_text(&column.name, bytes)?),
            RawValue::Blob(bytes) => Value::Blob(bytes),
        })
    }
}

pub fn decode_text(column: &str, bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes)
        .map_err(|e| Error::backend("normalize", format!("column '{}' is not valid UTF-8: {}", column, e)))
}
