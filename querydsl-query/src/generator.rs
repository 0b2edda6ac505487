use crate::backend::Statement;
use querydsl_core::{Filter, Record, Request, Result};

/// Translates requests into parameterized statements for one table.
///
/// Implementations must quote every identifier and pass every value as a
/// positional parameter, never as statement text.
pub trait QueryGenerator: Send + Sync {
    /// SELECT for `request`. Only `projection.include` is used for the column
    /// list (empty selects every column); computed items and exclusions are ignored.
    fn generate_select(&self, request: &Request) -> Result<Statement>;

    fn generate_update(&self, updates: &Record, filter: Option<&Filter>) -> Result<Statement>;

    /// Single or batch INSERT returning the stored rows. All records must share one key set.
    fn generate_insert(&self, records: &[Record]) -> Result<Statement>;

    /// DELETE; fails when the filter yields no predicate unless `allow_unrestricted` is set.
    fn generate_delete(&self, filter: Option<&Filter>, allow_unrestricted: bool) -> Result<Statement>;
}
