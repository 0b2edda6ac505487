// Host-registered filter and compute functions

use parking_lot::RwLock;
use querydsl_core::{ComputedItem, Error, FunctionKind, Request, Result, Row, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

type ComputeFn = dyn Fn(&Row) -> anyhow::Result<Value> + Send + Sync;
type FilterFn = dyn Fn(&Row) -> anyhow::Result<bool> + Send + Sync;

/// Derives a value from a row. Cloning is cheap.
#[derive(Clone)]
pub struct ComputeFunction {
    func: Arc<ComputeFn>,
    dependencies: Vec<String>,
}

impl ComputeFunction {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&Row) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(func),
            dependencies: Vec::new(),
        }
    }

    /// Declare the row fields this function reads; they are always fetched when it is used.
    pub fn reads<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn call(&self, row: &Row) -> anyhow::Result<Value> {
        (self.func)(row)
    }
}

impl fmt::Debug for ComputeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputeFunction")
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// Decides whether a row passes a custom operator. Cloning is cheap.
#[derive(Clone)]
pub struct FilterFunction {
    func: Arc<FilterFn>,
    dependencies: Vec<String>,
}

impl FilterFunction {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&Row) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(func),
            dependencies: Vec::new(),
        }
    }

    /// Declare fields read besides the condition's own field.
    pub fn reads<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn call(&self, row: &Row) -> anyhow::Result<bool> {
        (self.func)(row)
    }
}

impl fmt::Debug for FilterFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterFunction")
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct Functions {
    compute: HashMap<String, ComputeFunction>,
    filter: HashMap<String, FilterFunction>,
}

/// Name → function maps for one engine instance.
///
/// Both maps sit behind a single read/write lock. Registration is additive and
/// last-write-wins per name. Queries never hold the lock while running user code:
/// they copy what they need into a [`ResolvedFunctions`] snapshot first.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: RwLock<Functions>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_compute_function(&self, name: impl Into<String>, function: ComputeFunction) {
        let name = name.into();
        debug!("Registered compute function: {}", name);
        self.functions.write().compute.insert(name, function);
    }

    pub fn register_filter_function(&self, operator: impl Into<String>, function: FilterFunction) {
        let operator = operator.into();
        debug!("Registered filter function: {}", operator);
        self.functions.write().filter.insert(operator, function);
    }

    /// Register a batch under one write lock.
    pub fn register_compute_functions<I, S>(&self, functions: I)
    where
        I: IntoIterator<Item = (S, ComputeFunction)>,
        S: Into<String>,
    {
        let mut guard = self.functions.write();
        for (name, function) in functions {
            let name = name.into();
            debug!("Registered compute function: {}", name);
            guard.compute.insert(name, function);
        }
    }

    /// Register a batch under one write lock.
    pub fn register_filter_functions<I, S>(&self, functions: I)
    where
        I: IntoIterator<Item = (S, FilterFunction)>,
        S: Into<String>,
    {
        let mut guard = self.functions.write();
        for (operator, function) in functions {
            let operator = operator.into();
            debug!("Registered filter function: {}", operator);
            guard.filter.insert(operator, function);
        }
    }

    pub fn unregister_compute_function(&self, name: &str) -> Option<ComputeFunction> {
        self.functions.write().compute.remove(name)
    }

    pub fn unregister_filter_function(&self, operator: &str) -> Option<FilterFunction> {
        self.functions.write().filter.remove(operator)
    }

    pub fn compute_function(&self, name: &str) -> Option<ComputeFunction> {
        self.functions.read().compute.get(name).cloned()
    }

    pub fn filter_function(&self, operator: &str) -> Option<FilterFunction> {
        self.functions.read().filter.get(operator).cloned()
    }

    pub fn compute_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.read().compute.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn filter_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.read().filter.keys().cloned().collect();
        names.sort();
        names
    }

    /// Copy of every registered function, taken under one read lock.
    pub fn snapshot(&self) -> ResolvedFunctions {
        let guard = self.functions.read();
        ResolvedFunctions {
            compute: guard.compute.clone(),
            filter: guard.filter.clone(),
        }
    }

    /// Look up every function `request` references, under one read lock.
    ///
    /// Fails with [`Error::UnregisteredFunction`] on the first name that is missing.
    pub fn resolve(&self, request: &Request) -> Result<ResolvedFunctions> {
        let guard = self.functions.read();
        let mut resolved = ResolvedFunctions::default();

        let mut operators: Vec<&str> = request
            .filter
            .as_ref()
            .map(|filter| filter.custom_operators())
            .unwrap_or_default();

        if let Some(projection) = &request.projection {
            for item in &projection.computed {
                match item {
                    ComputedItem::Computed { expression, .. } => {
                        let name = expression.function.as_str();
                        let function = guard.compute.get(name).ok_or_else(|| Error::UnregisteredFunction {
                            kind: FunctionKind::Compute,
                            name: name.to_string(),
                        })?;
                        resolved.compute.insert(name.to_string(), function.clone());
                    }
                    ComputedItem::Case { cases, .. } => {
                        for case in cases {
                            operators.extend(case.when.custom_operators());
                        }
                    }
                }
            }
        }

        for operator in operators {
            let function = guard.filter.get(operator).ok_or_else(|| Error::UnregisteredFunction {
                kind: FunctionKind::Filter,
                name: operator.to_string(),
            })?;
            resolved.filter.insert(operator.to_string(), function.clone());
        }

        Ok(resolved)
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("compute", &self.compute_names())
            .field("filter", &self.filter_names())
            .finish()
    }
}

/// The functions one query uses, detached from the registry lock.
#[derive(Debug, Clone, Default)]
pub struct ResolvedFunctions {
    compute: HashMap<String, ComputeFunction>,
    filter: HashMap<String, FilterFunction>,
}

impl ResolvedFunctions {
    pub fn compute(&self, name: &str) -> Result<&ComputeFunction> {
        self.compute.get(name).ok_or_else(|| Error::UnregisteredFunction {
            kind: FunctionKind::Compute,
            name: name.to_string(),
        })
    }

    pub fn filter(&self, operator: &str) -> Result<&FilterFunction> {
        self.filter.get(operator).ok_or_else(|| Error::UnregisteredFunction {
            kind: FunctionKind::Filter,
            name: operator.to_string(),
        })
    }
}
