// In-process evaluation of native operators.
//
// Used for native conditions the database did not enforce, so results follow
// SQLite: a comparison involving NULL is unknown (`None`), the column's
// affinity converts the operand before comparing, and the string-matching
// operators are LIKE patterns over SQLite's text rendering of the value.

use crate::backend::ColumnInfo;
use querydsl_core::{Condition, Error, Operator, Result, Row, Value};
use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Type affinity of a column, derived from its declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affinity {
    Integer,
    Real,
    Numeric,
    Text,
    /// No affinity: operands are compared as they are.
    Blob,
}

impl Affinity {
    /// SQLite's declared-type rules, checked in this order.
    pub fn from_declared(decl_type: Option<&str>) -> Self {
        let Some(decl) = decl_type else {
            return Affinity::Blob;
        };
        let decl = decl.to_ascii_uppercase();
        if decl.contains("INT") {
            Affinity::Integer
        } else if ["CHAR", "CLOB", "TEXT"].iter().any(|t| decl.contains(t)) {
            Affinity::Text
        } else if decl.is_empty() || decl.contains("BLOB") {
            Affinity::Blob
        } else if ["REAL", "FLOA", "DOUB"].iter().any(|t| decl.contains(t)) {
            Affinity::Real
        } else {
            Affinity::Numeric
        }
    }

    /// Affinity implied by a value when no column metadata is available.
    pub fn of_value(value: &Value) -> Self {
        match value {
            Value::Text(_) => Affinity::Text,
            Value::Integer(_) | Value::Bool(_) => Affinity::Integer,
            Value::Float(_) => Affinity::Real,
            _ => Affinity::Blob,
        }
    }

    fn is_numeric(self) -> bool {
        matches!(self, Affinity::Integer | Affinity::Real | Affinity::Numeric)
    }
}

/// Column affinities of one result set, by column name.
#[derive(Debug, Clone, Default)]
pub struct Affinities {
    columns: HashMap<String, Affinity>,
}

impl Affinities {
    pub fn from_columns(columns: &[ColumnInfo]) -> Self {
        Self {
            columns: columns
                .iter()
                .map(|c| (c.name.clone(), Affinity::from_declared(c.decl_type.as_deref())))
                .collect(),
        }
    }

    pub fn get(&self, field: &str) -> Option<Affinity> {
        self.columns.get(field).copied()
    }
}

/// LIKE pattern for the string-matching operators, shared with SQL generation.
///
/// `None` for a NULL (or list) operand, which makes the match unknown.
pub fn like_pattern(operator: &Operator, value: &Value) -> Option<String> {
    let text = to_sqlite_text(value)?;
    match operator {
        Operator::Contains | Operator::NotContains => Some(format!("%{}%", text)),
        Operator::StartsWith => Some(format!("{}%", text)),
        Operator::EndsWith => Some(format!("%{}", text)),
        _ => None,
    }
}

/// Three-valued result of a native condition: `None` is SQL's unknown.
///
/// `declared` is the affinity of the condition's column; without it the
/// affinity is inferred from the row value.
pub fn evaluate_native(cond: &Condition, row: &Row, declared: Option<Affinity>) -> Result<Option<bool>> {
    let actual = row.get(&cond.field).ok_or_else(|| Error::UnresolvedField {
        function: cond.operator.to_string(),
        field: cond.field.clone(),
    })?;
    let affinity = declared.unwrap_or_else(|| Affinity::of_value(actual));

    let ordered = |accept: fn(Ordering) -> bool| -> Result<Option<bool>> {
        if cond.value.as_list().is_some() {
            return Err(Error::malformed(
                "list values can only be used with the in/nin operators",
            ));
        }
        Ok(compare(actual, &apply_affinity(&cond.value, affinity)).map(accept))
    };

    let outcome = match &cond.operator {
        Operator::Eq => ordered(|o| o == Ordering::Equal)?,
        Operator::Neq => ordered(|o| o != Ordering::Equal)?,
        Operator::Lt => ordered(|o| o == Ordering::Less)?,
        Operator::Lte => ordered(|o| o != Ordering::Greater)?,
        Operator::Gt => ordered(|o| o == Ordering::Greater)?,
        Operator::Gte => ordered(|o| o != Ordering::Less)?,
        Operator::In | Operator::Nin => {
            let items = cond.value.as_list().ok_or_else(|| {
                Error::malformed(format!("{} operator requires a list value", cond.operator))
            })?;
            let found = membership(actual, items, affinity);
            if cond.operator == Operator::In {
                found
            } else {
                found.map(|f| !f)
            }
        }
        Operator::Contains | Operator::StartsWith | Operator::EndsWith | Operator::NotContains => {
            let hit = match (stored_text(actual, affinity), like_pattern(&cond.operator, &cond.value)) {
                (Some(subject), Some(pattern)) => Some(like(&pattern, &subject)),
                _ => None,
            };
            if cond.operator == Operator::NotContains {
                hit.map(|h| !h)
            } else {
                hit
            }
        }
        Operator::Exists => Some(!actual.is_null()),
        Operator::NotExists => Some(actual.is_null()),
        Operator::Custom(name) => {
            return Err(Error::malformed(format!(
                "custom operator '{}' cannot be evaluated as a native predicate",
                name
            )))
        }
    };
    Ok(outcome)
}

// SQL `IN`: true on a match, unknown when nothing matched but a NULL was involved.
fn membership(actual: &Value, items: &[Value], affinity: Affinity) -> Option<bool> {
    if actual.is_null() {
        return None;
    }
    let mut unknown = false;
    for item in items {
        match compare(actual, &apply_affinity(item, affinity)) {
            Some(Ordering::Equal) => return Some(true),
            None => unknown = true,
            Some(_) => {}
        }
    }
    if unknown {
        None
    } else {
        Some(false)
    }
}

/// The operand as SQLite sees it after the column affinity is applied.
pub fn apply_affinity(operand: &Value, affinity: Affinity) -> Cow<'_, Value> {
    match (operand, affinity) {
        (Value::Integer(_) | Value::Float(_) | Value::Bool(_), Affinity::Text) => {
            Cow::Owned(to_sqlite_text(operand).map_or(Value::Null, Value::Text))
        }
        (Value::Text(text), affinity) if affinity.is_numeric() => match parse_numeric(text) {
            Some(number) => Cow::Owned(number),
            None => Cow::Borrowed(operand),
        },
        _ => Cow::Borrowed(operand),
    }
}

// Text that numeric affinity converts: a decimal literal, optionally padded
// with whitespace. Anything else stays text.
fn parse_numeric(text: &str) -> Option<Value> {
    let trimmed = text.trim_matches(|c: char| c.is_ascii_whitespace());
    let literal = trimmed.bytes().any(|b| b.is_ascii_digit())
        && trimmed
            .bytes()
            .all(|b| b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.' | b'e' | b'E'));
    if !literal {
        return None;
    }
    if let Ok(v) = trimmed.parse::<i64>() {
        return Some(Value::Integer(v));
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite()).map(Value::Float)
}

/// Ordering of two values the way SQLite orders them: `None` when either side
/// is NULL, otherwise numbers sort before text and text before blobs.
pub fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    let (left, right) = (stored(left), stored(right));
    match (left.as_ref(), right.as_ref()) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
        (Value::Integer(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
        (Value::Float(a), Value::Integer(b)) => a.partial_cmp(&(*b as f64)),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Text(a), Value::Text(b)) => Some(a.as_bytes().cmp(b.as_bytes())),
        (Value::Blob(a), Value::Blob(b)) => Some(a.cmp(b)),
        (a, b) => Some(class_rank(a).cmp(&class_rank(b))),
    }
}

// Booleans are integers once stored.
fn stored(value: &Value) -> Cow<'_, Value> {
    match value {
        Value::Bool(v) => Cow::Owned(Value::Integer(i64::from(*v))),
        _ => Cow::Borrowed(value),
    }
}

fn class_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) | Value::Integer(_) | Value::Float(_) => 1,
        Value::Text(_) => 2,
        Value::Blob(_) => 3,
        Value::List(_) => 4,
    }
}

/// SQLite's text rendering of a scalar value; `None` for NULL and lists.
pub fn to_sqlite_text(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::List(_) => None,
        Value::Bool(v) => Some(i64::from(*v).to_string()),
        Value::Integer(v) => Some(v.to_string()),
        Value::Float(v) => Some(real_to_text(*v)),
        Value::Text(v) => Some(v.clone()),
        Value::Blob(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
    }
}

// A NUMERIC column keeps whole REAL values as integers, so they render without `.0`.
fn stored_text(actual: &Value, affinity: Affinity) -> Option<String> {
    match actual {
        Value::Float(v) if affinity == Affinity::Numeric && v.fract() == 0.0 && v.abs() < 9.2e18 => {
            Some((*v as i64).to_string())
        }
        _ => to_sqlite_text(actual),
    }
}

// `%!.15g`: fifteen significant digits, always with a decimal point.
fn real_to_text(value: f64) -> String {
    if value.is_infinite() {
        return if value > 0.0 { "Inf".to_string() } else { "-Inf".to_string() };
    }
    if value == 0.0 || value.is_nan() {
        return "0.0".to_string();
    }

    let scientific = format!("{:.14e}", value.abs());
    let (mantissa, exponent) = scientific.split_once('e').unwrap_or((scientific.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let digits: String = mantissa.chars().filter(char::is_ascii_digit).collect();
    let sign = if value < 0.0 { "-" } else { "" };

    if !(-4..15).contains(&exponent) {
        let (head, tail) = digits.split_at(1);
        let tail = tail.trim_end_matches('0');
        format!(
            "{}{}.{}e{}{:02}",
            sign,
            head,
            if tail.is_empty() { "0" } else { tail },
            if exponent < 0 { '-' } else { '+' },
            exponent.abs()
        )
    } else if exponent >= 0 {
        let (whole, fraction) = digits.split_at(exponent as usize + 1);
        let fraction = fraction.trim_end_matches('0');
        format!("{}{}.{}", sign, whole, if fraction.is_empty() { "0" } else { fraction })
    } else {
        let zeros = "0".repeat((-exponent - 1) as usize);
        format!("{}0.{}{}", sign, zeros, digits.trim_end_matches('0'))
    }
}

/// LIKE matching: `%` is any run, `_` is one character, ASCII letters ignore case.
pub fn like(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && pattern[p] == '%' {
            backtrack = Some((p, t));
            p += 1;
        } else if p < pattern.len()
            && (pattern[p] == '_' || pattern[p].eq_ignore_ascii_case(&text[t]))
        {
            p += 1;
            t += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            t = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|c| *c == '%')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> Row {
        [
            ("age", Value::Integer(25)),
            ("balance", Value::Float(100.5)),
            ("name", Value::from("Alice")),
            ("is_active", Value::Bool(true)),
            ("deleted_at", Value::Null),
            ("created_at", Value::from("2023-01-15")),
        ]
        .into_iter()
        .collect()
    }

    fn eval(field: &str, op: Operator, value: impl Into<Value>, declared: Option<Affinity>) -> Option<bool> {
        let cond = Condition { field: field.to_string(), operator: op, value: value.into() };
        evaluate_native(&cond, &row(), declared).unwrap()
    }

    fn check(field: &str, op: Operator, value: impl Into<Value>) -> bool {
        eval(field, op, value, None) == Some(true)
    }

    #[test]
    fn test_comparisons() {
        assert!(check("age", Operator::Gt, 18));
        assert!(check("age", Operator::Lte, 25));
        assert!(!check("age", Operator::Lt, 25));
        assert!(check("balance", Operator::Gt, 100));
        assert!(check("age", Operator::Eq, 25.0));
        assert!(check("is_active", Operator::Eq, true));
        assert!(check("name", Operator::Neq, "Bob"));
    }

    #[test]
    fn test_null_is_unknown() {
        assert_eq!(eval("deleted_at", Operator::Eq, Value::Null, None), None);
        assert_eq!(eval("deleted_at", Operator::Neq, 1, None), None);
        assert_eq!(eval("deleted_at", Operator::Nin, vec![1], None), None);
        assert_eq!(eval("deleted_at", Operator::Contains, "x", None), None);
        assert_eq!(eval("name", Operator::Contains, Value::Null, None), None);
        assert_eq!(eval("deleted_at", Operator::NotExists, Value::Null, None), Some(true));
        assert_eq!(eval("deleted_at", Operator::Exists, Value::Null, None), Some(false));
    }

    #[test]
    fn test_membership() {
        assert!(check("age", Operator::In, vec![16, 25]));
        assert!(!check("age", Operator::Nin, vec![16, 25]));
        assert!(check("name", Operator::Nin, vec!["Bob", "Eve"]));
        // No match with a NULL in the list is unknown, not false.
        assert_eq!(eval("age", Operator::In, vec![Value::Integer(1), Value::Null], None), None);
        assert_eq!(eval("age", Operator::Nin, vec![Value::Integer(1), Value::Null], None), None);
        assert_eq!(eval("age", Operator::In, vec![Value::Integer(25), Value::Null], None), Some(true));
    }

    #[test]
    fn test_text_affinity_compares_numbers_as_text() {
        // '2023-01-15' < '2024' as text; as a number the text would sort after 2024.
        assert_eq!(eval("created_at", Operator::Lt, 2024, Some(Affinity::Text)), Some(true));
        assert_eq!(eval("name", Operator::Gt, 10, Some(Affinity::Text)), Some(true));
    }

    #[test]
    fn test_numeric_affinity_converts_numeric_text() {
        assert!(check("age", Operator::Eq, "25"));
        assert!(check("age", Operator::Eq, " 25.0 "));
        assert!(check("balance", Operator::Lt, "1e3"));
        // Non-numeric text stays text, and text sorts after every number.
        assert!(check("age", Operator::Lt, "abc"));
        assert!(!check("age", Operator::Eq, "0x19"));
    }

    #[test]
    fn test_no_affinity_compares_storage_classes() {
        assert_eq!(eval("age", Operator::Eq, "25", Some(Affinity::Blob)), Some(false));
        assert_eq!(eval("age", Operator::Lt, "25", Some(Affinity::Blob)), Some(true));
    }

    #[test]
    fn test_string_matching() {
        assert!(check("name", Operator::StartsWith, "al"));
        assert!(check("name", Operator::EndsWith, "ICE"));
        assert!(check("name", Operator::Contains, "lic"));
        assert!(check("name", Operator::NotContains, "bob"));
        assert!(!check("name", Operator::Contains, "z"));
    }

    #[test]
    fn test_string_matching_uses_stored_text() {
        assert!(check("is_active", Operator::Contains, "1"));
        assert!(!check("is_active", Operator::StartsWith, "t"));
        assert!(check("balance", Operator::EndsWith, ".5"));
        assert!(check("age", Operator::StartsWith, 2));

        let whole: Row = [("balance", Value::Float(250.0))].into_iter().collect();
        let cond = Condition { field: "balance".into(), operator: Operator::Contains, value: "250.0".into() };
        assert_eq!(evaluate_native(&cond, &whole, Some(Affinity::Real)).unwrap(), Some(true));
        // NUMERIC columns store whole values as integers.
        assert_eq!(evaluate_native(&cond, &whole, Some(Affinity::Numeric)).unwrap(), Some(false));
    }

    #[test]
    fn test_list_operand_needs_membership_operator() {
        let cond = Condition { field: "age".into(), operator: Operator::Eq, value: vec![1].into() };
        assert!(matches!(evaluate_native(&cond, &row(), None), Err(Error::MalformedRequest(_))));
    }

    #[test]
    fn test_missing_field_is_an_error() {
        let cond = Condition { field: "nope".to_string(), operator: Operator::Eq, value: Value::Integer(1) };
        assert!(matches!(evaluate_native(&cond, &row(), None), Err(Error::UnresolvedField { .. })));
    }

    #[test]
    fn test_affinity_from_declared_type() {
        assert_eq!(Affinity::from_declared(Some("BIGINT")), Affinity::Integer);
        assert_eq!(Affinity::from_declared(Some("VARCHAR(20)")), Affinity::Text);
        assert_eq!(Affinity::from_declared(Some("BLOB")), Affinity::Blob);
        assert_eq!(Affinity::from_declared(Some("DOUBLE PRECISION")), Affinity::Real);
        assert_eq!(Affinity::from_declared(Some("BOOLEAN")), Affinity::Numeric);
        assert_eq!(Affinity::from_declared(Some("DECIMAL(10,2)")), Affinity::Numeric);
        assert_eq!(Affinity::from_declared(Some("POINT")), Affinity::Numeric);
        assert_eq!(Affinity::from_declared(None), Affinity::Blob);

        let columns = [ColumnInfo::new("id", Some("INTEGER")), ColumnInfo::new("x", None)];
        let affinities = Affinities::from_columns(&columns);
        assert_eq!(affinities.get("id"), Some(Affinity::Integer));
        assert_eq!(affinities.get("x"), Some(Affinity::Blob));
        assert_eq!(affinities.get("missing"), None);
    }

    #[test]
    fn test_real_rendering() {
        assert_eq!(real_to_text(250.0), "250.0");
        assert_eq!(real_to_text(100.5), "100.5");
        assert_eq!(real_to_text(-0.25), "-0.25");
        assert_eq!(real_to_text(0.1), "0.1");
        assert_eq!(real_to_text(0.0001), "0.0001");
        assert_eq!(real_to_text(0.00001), "1.0e-05");
        assert_eq!(real_to_text(1e15), "1.0e+15");
        assert_eq!(real_to_text(123456789012345.0), "123456789012345.0");
        assert_eq!(real_to_text(1.0 / 3.0), "0.333333333333333");
    }

    #[test]
    fn test_like() {
        assert!(like("%", ""));
        assert!(like("a_c", "ABC"));
        assert!(like("%b%", "abc"));
        assert!(!like("%b", "abc"));
        assert!(like("%%c", "abc"));
        assert!(like("a%c%e", "abXcYe"));
        assert!(!like("a%c%e", "abXcY"));
    }

    proptest::proptest! {
        #[test]
        fn test_like_without_wildcards_is_case_insensitive_equality(text in "[a-zA-Z0-9 ]{0,12}") {
            proptest::prop_assert!(like(&text.to_ascii_uppercase(), &text));
            let longer = format!("{}x", text);
            proptest::prop_assert!(!like(&text, &longer));
        }

        #[test]
        fn test_contains_pattern_finds_substrings(prefix in "[a-z]{0,5}", needle in "[a-z]{1,5}", suffix in "[a-z]{0,5}") {
            let haystack = format!("{}{}{}", prefix, needle, suffix);
            let pattern = like_pattern(&Operator::Contains, &Value::from(needle.as_str())).unwrap();
            proptest::prop_assert!(like(&pattern, &haystack));
        }

        #[test]
        fn test_compare_is_antisymmetric(a in -1000i64..1000, b in -1000.0f64..1000.0) {
            let (a, b) = (Value::Integer(a), Value::Float(b));
            proptest::prop_assert_eq!(compare(&a, &b).map(Ordering::reverse), compare(&b, &a));
        }

        #[test]
        fn test_real_rendering_parses_back(v in -1.0e12f64..1.0e12) {
            let text = real_to_text(v);
            proptest::prop_assert!(text.contains('.'));
            let parsed: f64 = text.parse().unwrap();
            proptest::prop_assert!((parsed - v).abs() <= v.abs() * 1e-14);
        }
    }

    #[test]
    fn test_like_pattern() {
        assert_eq!(like_pattern(&Operator::Contains, &Value::from("x")), Some("%x%".to_string()));
        assert_eq!(like_pattern(&Operator::StartsWith, &Value::from("x")), Some("x%".to_string()));
        assert_eq!(like_pattern(&Operator::Contains, &Value::Bool(true)), Some("%1%".to_string()));
        assert_eq!(like_pattern(&Operator::EndsWith, &Value::Float(2.0)), Some("%2.0".to_string()));
        assert_eq!(like_pattern(&Operator::Contains, &Value::Null), None);
        assert_eq!(like_pattern(&Operator::Eq, &Value::from("x")), None);
    }
}
