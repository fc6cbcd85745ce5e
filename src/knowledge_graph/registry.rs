use chrono::Utc;
use serde::Deserialize;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::info;

use super::{Dataset, DatasetId, StoreDescriptor};

/// Fields needed to register a dataset. When `store` is `None` the dataset is
/// given a fresh database named after its id, to be filled by an import.
#[derive(Debug, Clone)]
pub struct NewDataset {
    pub name: String,
    pub description: String,
    pub source: String,
    pub store: Option<StoreDescriptor>,
}

/// Listing parameters shared by the dataset and discovery endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    /// Case-insensitive match on name, source or description.
    pub search: Option<String>,
    /// `id`, `name` or `created_at`, prefixed with `-` for descending order.
    pub ordering: Option<String>,
}

#[derive(Default)]
struct Inner {
    next_id: DatasetId,
    datasets: BTreeMap<DatasetId, Dataset>,
}

/// In-memory dataset records.
#[derive(Default)]
pub struct DatasetRegistry {
    inner: RwLock<Inner>,
}

impl DatasetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, new: NewDataset) -> Dataset {
        let mut inner = self.inner.write().await;
        inner.next_id += 1;
        let id = inner.next_id;

        let dataset = Dataset {
            id,
            name: new.name,
            description: new.description,
            source: new.source,
            store: new
                .store
                .unwrap_or_else(|| StoreDescriptor::Database(format!("kg_{}", id))),
            created_at: Utc::now(),
        };

        inner.datasets.insert(id, dataset.clone());
        info!("Registered dataset {} ({}) backed by {}", id, dataset.name, dataset.store);
        dataset
    }

    pub async fn get(&self, id: DatasetId) -> Option<Dataset> {
        self.inner.read().await.datasets.get(&id).cloned()
    }

    pub async fn delete(&self, id: DatasetId) -> Option<Dataset> {
        let removed = self.inner.write().await.datasets.remove(&id);
        if removed.is_some() {
            info!("Deleted dataset {}", id);
        }
        removed
    }

    pub async fn list(&self, query: &ListQuery) -> Vec<Dataset> {
        let needle = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        let mut datasets: Vec<Dataset> = self
            .inner
            .read()
            .await
            .datasets
            .values()
            .filter(|d| match &needle {
                Some(needle) => [&d.name, &d.source, &d.description]
                    .iter()
                    .any(|field| field.to_lowercase().contains(needle.as_str())),
                None => true,
            })
            .cloned()
            .collect();

        sort_datasets(&mut datasets, query.ordering.as_deref());
        datasets
    }
}

fn sort_datasets(datasets: &mut [Dataset], ordering: Option<&str>) {
    let ordering = ordering.unwrap_or("-id");
    let (field, descending) = match ordering.strip_prefix('-') {
        Some(field) => (field, true),
        None => (ordering, false),
    };

    match field {
        "name" => datasets.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id))),
        "created_at" => datasets.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id))),
        // unknown fields fall back to id, like an ignored ordering parameter
        _ => datasets.sort_by_key(|d| d.id),
    }

    if descending {
        datasets.reverse();
    }
}
