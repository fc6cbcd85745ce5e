use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, info_span, Instrument};
use url::Url;

use crate::knowledge_graph::DatasetId;

pub mod graph_store;

pub use graph_store::GraphStoreImporter;

/// A request to fill a dataset's database from an external source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportJob {
    Url {
        url: Url,
        dataset_id: DatasetId,
        database: String,
    },
    /// A dataset listed in the linked open data catalog.
    Lodc {
        catalog_id: String,
        dataset_id: DatasetId,
        database: String,
    },
}

impl ImportJob {
    pub fn dataset_id(&self) -> DatasetId {
        match self {
            ImportJob::Url { dataset_id, .. } | ImportJob::Lodc { dataset_id, .. } => *dataset_id,
        }
    }

    pub fn database(&self) -> &str {
        match self {
            ImportJob::Url { database, .. } | ImportJob::Lodc { database, .. } => database,
        }
    }
}

#[async_trait]
pub trait Importer: Send + Sync {
    /// Run the import, returning the number of bytes loaded into the store.
    async fn import(&self, job: &ImportJob) -> Result<usize>;
}

/// Fire-and-forget runner for import jobs.
#[derive(Clone)]
pub struct TaskDispatcher {
    importer: Arc<dyn Importer>,
}

impl TaskDispatcher {
    pub fn new(importer: Arc<dyn Importer>) -> Self {
        Self { importer }
    }

    /// Spawn `job` on the runtime. Outcomes are only logged.
    pub fn dispatch(&self, job: ImportJob, name: String) {
        let importer = self.importer.clone();
        let span = info_span!("import", task = %name, dataset = job.dataset_id());

        info!(parent: &span, "Dispatching import into {}", job.database());

        tokio::spawn(
            async move {
                let start_time = Instant::now();
                match importer.import(&job).await {
                    Ok(bytes) => info!(
                        "Import completed: {} bytes in {:.2}s",
                        bytes,
                        start_time.elapsed().as_secs_f64()
                    ),
                    Err(e) => error!("Import failed: {:#}", e),
                }
            }
            .instrument(span),
        );
    }
}
