use querydsl_core::{Result, Value};
use querydsl_query::normalizer::decode_text;
use querydsl_query::{ColumnInfo, RawValue, RowNormalizer};

/// Interpretation of a column's declared type, following SQLite's affinity
/// rules with booleans split out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclaredType {
    Boolean,
    Integer,
    Real,
    Text,
    Other,
}

impl DeclaredType {
    pub fn parse(decl_type: &str) -> Self {
        let upper = decl_type.to_ascii_uppercase();
        if upper.starts_with("BOOL") {
            DeclaredType::Boolean
        } else if upper.contains("INT") {
            DeclaredType::Integer
        } else if ["CHAR", "CLOB", "TEXT"].iter().any(|t| upper.contains(t)) {
            DeclaredType::Text
        } else if ["REAL", "FLOA", "DOUB"].iter().any(|t| upper.contains(t))
            || upper.starts_with("NUMERIC")
            || upper.starts_with("DECIMAL")
        {
            DeclaredType::Real
        } else {
            DeclaredType::Other
        }
    }
}

/// Maps SQLite storage classes to [`Value`]s using declared column types.
///
/// SQLite has no boolean storage class and keeps whole numbers in REAL/NUMERIC
/// columns as integers, so the declared type decides what the caller sees.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteNormalizer;

impl RowNormalizer for SqliteNormalizer {
    fn normalize_value(&self, column: &ColumnInfo, raw: RawValue) -> Result<Value> {
        let declared = column
            .decl_type
            .as_deref()
            .map(DeclaredType::parse)
            .unwrap_or(DeclaredType::Other);

        Ok(match (raw, declared) {
            (RawValue::Null, _) => Value::Null,
            (RawValue::Integer(v), DeclaredType::Boolean) => Value::Bool(v != 0),
            (RawValue::Integer(v), DeclaredType::Real) => Value::Float(v as f64),
            (RawValue::Integer(v), _) => Value::Integer(v),
            (RawValue::Real(v), _) => Value::Float(v),
            (RawValue::Text(bytes), _) => Value::Text(decode_text(&column.name, bytes)?),
            (RawValue::Blob(bytes), DeclaredType::Text) => Value::Text(decode_text(&column.name, bytes)?),
            (RawValue::Blob(bytes), _) => Value::Blob(bytes),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalize(decl: Option<&str>, raw: RawValue) -> Value {
        SqliteNormalizer.normalize_value(&ColumnInfo::new("c", decl), raw).unwrap()
    }

    #[test]
    fn test_declared_types() {
        assert_eq!(DeclaredType::parse("BOOLEAN"), DeclaredType::Boolean);
        assert_eq!(DeclaredType::parse("bigint"), DeclaredType::Integer);
        assert_eq!(DeclaredType::parse("VARCHAR(20)"), DeclaredType::Text);
        assert_eq!(DeclaredType::parse("DOUBLE PRECISION"), DeclaredType::Real);
        assert_eq!(DeclaredType::parse("DECIMAL(10,2)"), DeclaredType::Real);
        assert_eq!(DeclaredType::parse("DATETIME"), DeclaredType::Other);
    }

    #[test]
    fn test_boolean_columns() {
        assert_eq!(normalize(Some("BOOLEAN"), RawValue::Integer(1)), Value::Bool(true));
        assert_eq!(normalize(Some("BOOLEAN"), RawValue::Integer(0)), Value::Bool(false));
        assert_eq!(normalize(Some("INTEGER"), RawValue::Integer(1)), Value::Integer(1));
        assert_eq!(normalize(None, RawValue::Integer(1)), Value::Integer(1));
    }

    #[test]
    fn test_whole_numbers_in_real_columns() {
        assert_eq!(normalize(Some("REAL"), RawValue::Integer(250)), Value::Float(250.0));
        assert_eq!(normalize(Some("REAL"), RawValue::Real(100.5)), Value::Float(100.5));
    }

    #[test]
    fn test_text_and_blobs() {
        assert_eq!(normalize(Some("TEXT"), RawValue::Blob(b"hi".to_vec())), Value::from("hi"));
        assert_eq!(normalize(Some("BLOB"), RawValue::Blob(vec![0, 1])), Value::Blob(vec![0, 1]));
        assert_eq!(normalize(None, RawValue::Text(b"x".to_vec())), Value::from("x"));
    }

    #[test]
    fn test_null_is_preserved() {
        assert_eq!(normalize(Some("BOOLEAN"), RawValue::Null), Value::Null);
    }
}
