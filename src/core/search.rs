use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::query_builder::{DiscoveryRequest, QueryOutcome, DEFAULT_ROW_LIMIT};
use crate::knowledge_graph::{
    Dataset, DatasetId, ExecutionError, ExecutionOutput, SparqlExecutor, SPARQL_RESULTS_JSON,
};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// One matched triple, rendered for display. Ids are fresh per search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermRecord {
    pub id: Uuid,
    pub dataset_id: DatasetId,
    pub dataset_name: String,
    pub term: String,
}

/// The execution interface returned something the projector cannot read.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("query execution returned no outputs")]
    NoOutput,
    #[error("query output has no application/sparql-results+json entry")]
    MissingResults,
    #[error("malformed SPARQL results: {0}")]
    MalformedResults(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct SparqlResults {
    results: ResultSet,
}

#[derive(Debug, Deserialize)]
struct ResultSet {
    bindings: Vec<Binding>,
}

#[derive(Debug, Deserialize)]
struct Binding {
    s: BindingValue,
    p: BindingValue,
    o: BindingValue,
}

#[derive(Debug, Deserialize)]
struct BindingValue {
    value: String,
}

/// Runs discovery queries against datasets and projects the bindings.
pub struct TermSearch {
    executor: Arc<dyn SparqlExecutor>,
    row_limit: usize,
    timeout: Duration,
}

impl TermSearch {
    pub fn new(executor: Arc<dyn SparqlExecutor>) -> Self {
        Self {
            executor,
            row_limit: DEFAULT_ROW_LIMIT,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_row_limit(mut self, row_limit: usize) -> Self {
        self.row_limit = row_limit;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the query for `request` and search `dataset` with it.
    pub async fn discover(
        &self,
        dataset: &Dataset,
        request: &DiscoveryRequest,
    ) -> Result<Vec<TermRecord>, SearchError> {
        self.search(dataset, &request.build_query()).await
    }

    /// Execute `outcome` against `dataset`.
    ///
    /// Rejected outcomes and execution failures yield an empty list. Only a
    /// malformed execution payload is an error.
    pub async fn search(
        &self,
        dataset: &Dataset,
        outcome: &QueryOutcome,
    ) -> Result<Vec<TermRecord>, SearchError> {
        let query = match outcome {
            QueryOutcome::Query(query) => query,
            QueryOutcome::Rejected => {
                debug!("Skipping rejected discovery query on dataset {}", dataset.id);
                return Ok(Vec::new());
            }
        };

        let execution = tokio::time::timeout(
            self.timeout,
            self.executor.run_sparql(dataset, query, self.row_limit, self.timeout),
        )
        .await
        .unwrap_or_else(|_| Err(ExecutionError::Timeout(self.timeout)));

        let outputs = match execution {
            Ok(outputs) => outputs,
            Err(e) => {
                warn!("Search on dataset {} ({}) failed: {}", dataset.id, dataset.name, e);
                return Ok(Vec::new());
            }
        };

        let terms = project_bindings(dataset, &outputs)?;
        info!("Search on dataset {} matched {} terms", dataset.id, terms.len());
        Ok(terms)
    }
}

/// Map the first output's SPARQL JSON bindings to term records, in order.
pub fn project_bindings(
    dataset: &Dataset,
    outputs: &[ExecutionOutput],
) -> Result<Vec<TermRecord>, SearchError> {
    let output = outputs.first().ok_or(SearchError::NoOutput)?;
    let raw_json = output
        .data
        .get(SPARQL_RESULTS_JSON)
        .ok_or(SearchError::MissingResults)?;

    let parsed: SparqlResults = serde_json::from_str(raw_json)?;

    Ok(parsed
        .results
        .bindings
        .into_iter()
        .map(|b| TermRecord {
            id: Uuid::new_v4(),
            dataset_id: dataset.id,
            dataset_name: dataset.name.clone(),
            term: format!("{} {} {}", b.s.value, b.p.value, b.o.value),
        })
        .collect())
}
