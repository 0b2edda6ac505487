pub mod backend;
pub mod generator;
pub mod normalizer;
pub mod registry;
pub mod pushdown;
pub mod predicate;
pub mod plan;
pub mod operators;
pub mod executor;

pub use backend::{Backend, ColumnInfo, RawValue, ResultSet, Statement};
pub use generator::QueryGenerator;
pub use normalizer::{RowNormalizer, StorageClassNormalizer};
pub use registry::{ComputeFunction, FilterFunction, FunctionRegistry, ResolvedFunctions};
pub use pushdown::Placement;
pub use plan::FetchPlan;
pub use operators::{ComputeOperator, ProjectOperator, ResidualFilter};
pub use executor::{HybridExecutor, QueryExecutor};
