use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub mod http_executor;
pub mod registry;

pub use http_executor::HttpSparqlExecutor;
pub use registry::{DatasetRegistry, ListQuery, NewDataset};

/// Mime type of the SPARQL 1.1 query results JSON format.
pub const SPARQL_RESULTS_JSON: &str = "application/sparql-results+json";

pub type DatasetId = u64;

/// Where a dataset's triples can be queried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "location", rename_all = "snake_case")]
pub enum StoreDescriptor {
    /// A named dataset hosted on the configured triple store server.
    Database(String),
    /// A remote SPARQL endpoint queried directly.
    Endpoint(Url),
}

impl fmt::Display for StoreDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreDescriptor::Database(name) => write!(f, "database:{}", name),
            StoreDescriptor::Endpoint(url) => write!(f, "endpoint:{}", url),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: DatasetId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Where the dataset came from, e.g. `url:https://...` or `lodc:<id>`.
    pub source: String,
    pub store: StoreDescriptor,
    pub created_at: DateTime<Utc>,
}

impl Dataset {
    /// Name of the store-hosted database, if the dataset lives on the store server.
    pub fn database(&self) -> Option<&str> {
        match &self.store {
            StoreDescriptor::Database(name) => Some(name),
            StoreDescriptor::Endpoint(_) => None,
        }
    }
}

/// One output of a query execution, keyed by mime type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutput {
    pub data: HashMap<String, String>,
}

impl ExecutionOutput {
    pub fn sparql_json(payload: impl Into<String>) -> Self {
        let mut data = HashMap::new();
        data.insert(SPARQL_RESULTS_JSON.to_string(), payload.into());
        Self { data }
    }
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("query timed out after {0:?}")]
    Timeout(Duration),
    #[error("triple store unreachable: {0}")]
    Unreachable(String),
    #[error("query rejected by the store ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// Runs SPARQL against a dataset's backing store.
///
/// Implementations must return within `timeout`, reporting an overrun as
/// [`ExecutionError::Timeout`], and must be safe to call concurrently.
#[async_trait]
pub trait SparqlExecutor: Send + Sync {
    async fn run_sparql(
        &self,
        dataset: &Dataset,
        query: &str,
        limit: usize,
        timeout: Duration,
    ) -> Result<Vec<ExecutionOutput>, ExecutionError>;
}
