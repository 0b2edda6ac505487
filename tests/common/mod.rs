// Shared fixtures: an in-memory database with `users`, `products` and
// `members` tables and the host functions the integration tests register.
// `members` repeats the users and adds rows with NULL columns.

#![allow(dead_code)]

use querydsl_core::{QueryResult, Value};
use querydsl_query::{ComputeFunction, FilterFunction, HybridExecutor, QueryExecutor};
use querydsl_sqlite::SqliteBackend;

pub const SCHEMA: &str = "
    CREATE TABLE users (
        id INTEGER PRIMARY KEY,
        first_name TEXT,
        last_name TEXT,
        age INTEGER,
        access_level TEXT,
        is_active BOOLEAN,
        balance REAL,
        created_at TEXT
    );
    INSERT INTO users VALUES
        (1, 'Alice', 'Smith', 25, 'standard', TRUE, 100.50, '2023-01-15'),
        (2, 'Bob', 'Johnson', 16, 'standard', TRUE, 50.25, '2023-03-20'),
        (3, 'Charlie', 'Brown', 30, 'premium', TRUE, 1200.75, '2023-02-10'),
        (4, 'Diana', 'Prince', 17, 'premium', FALSE, 250.00, '2023-04-01'),
        (5, 'Eve', 'Adams', 42, 'standard', TRUE, 75.00, '2023-05-05');

    CREATE TABLE products (
        id INTEGER PRIMARY KEY,
        name TEXT,
        price REAL,
        category TEXT
    );
    INSERT INTO products VALUES
        (101, 'Laptop', 1200.00, 'Electronics'),
        (102, 'Mouse', 25.50, 'Electronics'),
        (103, 'Keyboard', 75.00, 'Electronics'),
        (104, 'Desk Chair', 150.00, 'Furniture');

    CREATE TABLE members (
        id INTEGER PRIMARY KEY,
        first_name TEXT,
        last_name TEXT,
        age INTEGER,
        access_level TEXT,
        is_active BOOLEAN,
        balance REAL,
        created_at TEXT
    );
    INSERT INTO members SELECT * FROM users;
    INSERT INTO members VALUES
        (6, NULL, 'Null', NULL, NULL, NULL, NULL, NULL),
        (7, 'Grace', NULL, 19, 'premium', NULL, 0.5, '2024-02-29'),
        (8, 'Heidi', 'Klum', 18, NULL, FALSE, NULL, NULL);
";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub async fn backend() -> SqliteBackend {
    init_tracing();
    let backend = SqliteBackend::open_in_memory().unwrap();
    backend.execute_batch(SCHEMA).await.unwrap();
    backend
}

/// Executor over `users` with the standard functions registered.
pub async fn users() -> HybridExecutor<SqliteBackend> {
    let executor = querydsl_sqlite::executor(backend().await, "users");
    register_user_functions(&executor);
    executor
}

/// Executor over `members`, whose extra rows hold NULLs.
pub async fn members() -> HybridExecutor<SqliteBackend> {
    let executor = querydsl_sqlite::executor(backend().await, "members");
    register_user_functions(&executor);
    executor
}

pub fn register_user_functions(executor: &impl QueryExecutor) {
    executor.register_filter_functions(vec![
        (
            "is_adult".to_string(),
            FilterFunction::new(|row| Ok(int(row.get("age")) >= 18)).reads(["age"]),
        ),
        (
            "has_premium_access".to_string(),
            FilterFunction::new(|row| Ok(text(row.get("access_level")) == "premium")).reads(["access_level"]),
        ),
    ]);

    executor.register_compute_functions(vec![
        (
            "full_name".to_string(),
            ComputeFunction::new(|row| {
                Ok(Value::from(format!(
                    "{} {}",
                    text(row.get("first_name")),
                    text(row.get("last_name"))
                )))
            })
            .reads(["first_name", "last_name"]),
        ),
        (
            "age_category".to_string(),
            ComputeFunction::new(|row| {
                let age = row
                    .get("age")
                    .and_then(Value::as_i64)
                    .ok_or_else(|| anyhow::anyhow!("age is missing or not an integer"))?;
                Ok(Value::from(if age < 18 { "minor" } else if age < 40 { "adult" } else { "senior" }))
            })
            .reads(["age"]),
        ),
    ]);
}

pub fn ids(result: &QueryResult) -> Vec<i64> {
    result
        .data
        .iter()
        .filter_map(|row| row.get("id").and_then(Value::as_i64))
        .collect()
}

pub fn sorted_ids(result: &QueryResult) -> Vec<i64> {
    let mut ids = ids(result);
    ids.sort();
    ids
}

fn int(value: Option<&Value>) -> i64 {
    value.and_then(Value::as_i64).unwrap_or_default()
}

fn text(value: Option<&Value>) -> &str {
    value.and_then(Value::as_str).unwrap_or_default()
}
