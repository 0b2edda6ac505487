pub mod backend;
pub mod generator;
pub mod normalizer;

pub use backend::SqliteBackend;
pub use generator::{quote_identifier, SqliteGenerator};
pub use normalizer::{DeclaredType, SqliteNormalizer};

use querydsl_query::HybridExecutor;

/// Executor over one table of a SQLite database.
pub fn executor(backend: SqliteBackend, table: impl Into<String>) -> HybridExecutor<SqliteBackend> {
    HybridExecutor::new(backend, SqliteGenerator::new(table), SqliteNormalizer)
}
