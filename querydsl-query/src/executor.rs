use crate::backend::{Backend, Statement};
use crate::generator::QueryGenerator;
use crate::normalizer::RowNormalizer;
use crate::operators::{ComputeOperator, ProjectOperator, ResidualFilter};
use crate::plan::FetchPlan;
use crate::predicate::Affinities;
use crate::registry::{ComputeFunction, FilterFunction, FunctionRegistry};
use async_trait::async_trait;
use querydsl_core::{EngineConfig, Error, Filter, Pagination, QueryResult, Record, Request, Result};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Public surface of the engine.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    fn register_compute_function(&self, name: &str, function: ComputeFunction);
    fn register_filter_function(&self, operator: &str, function: FilterFunction);
    fn register_compute_functions(&self, functions: Vec<(String, ComputeFunction)>);
    fn register_filter_functions(&self, functions: Vec<(String, FilterFunction)>);

    async fn query(&self, request: &Request) -> Result<QueryResult>;
    async fn update(&self, updates: &Record, filter: Option<&Filter>) -> Result<u64>;
    async fn insert(&self, records: &[Record]) -> Result<QueryResult>;
    async fn delete(&self, filter: Option<&Filter>, allow_unrestricted: bool) -> Result<u64>;
}

/// Pushes native predicates down to the backend and finishes the rest in-process.
pub struct HybridExecutor<B: Backend> {
    backend: B,
    generator: Box<dyn QueryGenerator>,
    normalizer: Box<dyn RowNormalizer>,
    registry: Arc<FunctionRegistry>,
    config: EngineConfig,
}

impl<B: Backend> HybridExecutor<B> {
    pub fn new(
        backend: B,
        generator: impl QueryGenerator + 'static,
        normalizer: impl RowNormalizer + 'static,
    ) -> Self {
        Self {
            backend,
            generator: Box::new(generator),
            normalizer: Box::new(normalizer),
            registry: Arc::new(FunctionRegistry::new()),
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a registry between several executors.
    pub fn with_registry(mut self, registry: Arc<FunctionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn log_statement(&self, operation: &str, statement: &Statement) {
        if self.config.log_parameters {
            debug!("Generated {}: {} with params {:?}", operation, statement.sql, statement.params);
        } else {
            debug!("Generated {}: {} ({} params)", operation, statement.sql, statement.params.len());
        }
    }

    // Dropping the backend future on timeout is what stops the statement.
    async fn with_timeout<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send,
    {
        match self.config.statement_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("Statement exceeded timeout of {:?}", limit);
                    Err(Error::Timeout(limit))
                }
            },
            None => call.await,
        }
    }

    fn validate_query(request: &Request) -> Result<()> {
        let unsupported = request.unsupported_features();
        if !unsupported.is_empty() {
            warn!("Ignoring unsupported request features: {:?}", unsupported);
        }
        if let Some(filter) = &request.filter {
            filter.validate()?;
        }
        if let Some(pagination) = &request.pagination {
            pagination.validate()?;
            if let Pagination::Cursor { .. } = pagination {
                warn!("Cursor pagination is not supported; returning unpaginated rows");
            }
        }
        Ok(())
    }

    // Mutations never reach the in-process stages, so a skipped custom
    // predicate would widen the affected set.
    fn validate_mutation_filter(filter: Option<&Filter>) -> Result<()> {
        let Some(filter) = filter else {
            return Ok(());
        };
        filter.validate()?;
        let custom = filter.custom_operators();
        if !custom.is_empty() {
            warn!("Rejected mutation filter with custom operators: {:?}", custom);
            return Err(Error::malformed(format!(
                "mutation filters cannot use custom operators: {}",
                custom.join(", ")
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl<B: Backend> QueryExecutor for HybridExecutor<B> {
    fn register_compute_function(&self, name: &str, function: ComputeFunction) {
        self.registry.register_compute_function(name, function);
    }

    fn register_filter_function(&self, operator: &str, function: FilterFunction) {
        self.registry.register_filter_function(operator, function);
    }

    fn register_compute_functions(&self, functions: Vec<(String, ComputeFunction)>) {
        self.registry.register_compute_functions(functions);
    }

    fn register_filter_functions(&self, functions: Vec<(String, FilterFunction)>) {
        self.registry.register_filter_functions(functions);
    }

    async fn query(&self, request: &Request) -> Result<QueryResult> {
        info!("Executing query");
        Self::validate_query(request)?;

        let functions = self.registry.resolve(request)?;
        let plan = FetchPlan::build(request, &functions)?;
        debug!("Fetch fields {:?}, residual filter: {}", plan.fields, plan.residual);

        let statement = self.generator.generate_select(&plan.select)?;
        self.log_statement("select", &statement);
        let result = self.with_timeout(self.backend.query(&statement)).await?;

        if let Some(limit) = self.config.max_fetch_rows {
            if result.len() > limit {
                warn!("Fetched {} rows, limit is {}", result.len(), limit);
                return Err(Error::ResultTooLarge { limit });
            }
        }

        let columns = Affinities::from_columns(&result.columns);
        let mut rows = self.normalizer.normalize_all(result)?;
        debug!("Fetched {} rows", rows.len());

        let strict = self.config.strict_dependencies;
        if let (true, Some(filter)) = (plan.residual, &request.filter) {
            rows = ResidualFilter::new(filter, &functions)
                .columns(&columns)
                .strict(strict)
                .apply(rows)?;
            debug!("{} rows after residual filter", rows.len());
        }
        rows = plan.apply_window(rows);

        if let Some(projection) = &request.projection {
            rows = ComputeOperator::new(&projection.computed, &functions)
                .columns(&columns)
                .strict(strict)
                .apply(rows)?;
        }
        let rows = ProjectOperator::new(request.projection.as_ref()).apply(rows);

        info!("Query returned {} rows", rows.len());
        Ok(QueryResult::new(rows))
    }

    async fn update(&self, updates: &Record, filter: Option<&Filter>) -> Result<u64> {
        info!("Executing update of {} fields", updates.len());
        Self::validate_mutation_filter(filter)?;

        let statement = self.generator.generate_update(updates, filter)?;
        self.log_statement("update", &statement);
        let affected = self.with_timeout(self.backend.execute(&statement)).await?;

        info!("Update affected {} rows", affected);
        Ok(affected)
    }

    async fn insert(&self, records: &[Record]) -> Result<QueryResult> {
        info!("Executing insert of {} records", records.len());

        let statement = self.generator.generate_insert(records)?;
        self.log_statement("insert", &statement);
        let result = self.with_timeout(self.backend.query(&statement)).await?;
        let rows = self.normalizer.normalize_all(result)?;

        if rows.len() != records.len() {
            return Err(Error::backend(
                "insert",
                format!("expected {} returned rows, got {}", records.len(), rows.len()),
            ));
        }
        Ok(QueryResult::new(rows))
    }

    async fn delete(&self, filter: Option<&Filter>, allow_unrestricted: bool) -> Result<u64> {
        info!("Executing delete");
        Self::validate_mutation_filter(filter)?;

        let statement = self.generator.generate_delete(filter, allow_unrestricted)?;
        self.log_statement("delete", &statement);
        let affected = self.with_timeout(self.backend.execute(&statement)).await?;

        info!("Delete affected {} rows", affected);
        Ok(affected)
    }
}
