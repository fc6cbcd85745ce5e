use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use super::{Dataset, ExecutionError, ExecutionOutput, SparqlExecutor, StoreDescriptor, SPARQL_RESULTS_JSON};

/// Executes queries over the SPARQL 1.1 protocol.
///
/// Named databases resolve to `{base_url}/{name}/sparql` on the configured
/// store server; endpoint datasets are queried at their own URL.
pub struct HttpSparqlExecutor {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSparqlExecutor {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("kg_discovery/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint_for(&self, dataset: &Dataset) -> String {
        match &dataset.store {
            StoreDescriptor::Database(name) => format!("{}/{}/sparql", self.base_url, name),
            StoreDescriptor::Endpoint(url) => url.to_string(),
        }
    }
}

#[async_trait]
impl SparqlExecutor for HttpSparqlExecutor {
    async fn run_sparql(
        &self,
        dataset: &Dataset,
        query: &str,
        limit: usize,
        timeout: Duration,
    ) -> Result<Vec<ExecutionOutput>, ExecutionError> {
        let endpoint = self.endpoint_for(dataset);
        debug!("Executing SPARQL on {}: {}", endpoint, query);

        let transport_error = |e: reqwest::Error| {
            if e.is_timeout() {
                ExecutionError::Timeout(timeout)
            } else {
                ExecutionError::Unreachable(e.to_string())
            }
        };

        let response = self.client
            .post(&endpoint)
            .header(reqwest::header::ACCEPT, SPARQL_RESULTS_JSON)
            .form(&[("query", query)])
            .timeout(timeout)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(ExecutionError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(vec![ExecutionOutput::sparql_json(truncate_bindings(body, limit))])
    }
}

/// Cap `results.bindings` at `limit` rows. Bodies that are not SPARQL JSON
/// pass through unchanged.
fn truncate_bindings(body: String, limit: usize) -> String {
    let mut value: serde_json::Value = match serde_json::from_str(&body) {
        Ok(value) => value,
        Err(_) => return body,
    };

    let truncated = match value
        .pointer_mut("/results/bindings")
        .and_then(|bindings| bindings.as_array_mut())
    {
        Some(bindings) if bindings.len() > limit => {
            debug!("Truncating {} bindings to {}", bindings.len(), limit);
            bindings.truncate(limit);
            true
        }
        _ => false,
    };

    if truncated {
        serde_json::to_string(&value).unwrap_or(body)
    } else {
        body
    }
}
