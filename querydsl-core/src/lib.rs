pub mod error;
pub mod operator;
pub mod row;
pub mod dsl;
pub mod result;
pub mod config;

pub use error::{Error, ErrorKind, FunctionKind, Result};
pub use operator::{LogicalOperator, Operator, NATIVE_OPERATORS};
pub use row::{Record, Row, Value};
pub use dsl::{
    Aggregation, AggregationType, CaseCondition, ComputedItem, Condition, Filter, FunctionCall,
    Group, Join, JoinType, Pagination, Projection, ProjectionField, QueryHint, Request, Sort,
    SortDirection, WindowFunction,
};
pub use result::{PageInfo, QueryResult};
pub use config::EngineConfig;
