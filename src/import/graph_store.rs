use anyhow::{Result, Context};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::{ImportJob, Importer};

const RDF_ACCEPT: &str =
    "text/turtle, application/n-triples;q=0.9, application/rdf+xml;q=0.8, application/ld+json;q=0.7, */*;q=0.1";
const DEFAULT_CONTENT_TYPE: &str = "text/turtle";

/// Downloads RDF documents and uploads them to the store through the SPARQL
/// Graph Store Protocol endpoint `{base_url}/{database}/data`.
pub struct GraphStoreImporter {
    client: reqwest::Client,
    store_url: String,
    catalog_url: Url,
}

impl GraphStoreImporter {
    pub fn new(store_url: &str, catalog_url: &str, timeout: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout))
            .user_agent(concat!("kg_discovery/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        let catalog_url = Url::parse(catalog_url)
            .with_context(|| format!("Invalid catalog URL: {}", catalog_url))?;

        Ok(Self {
            client,
            store_url: store_url.trim_end_matches('/').to_string(),
            catalog_url,
        })
    }

    /// Where the RDF document for `job` is downloaded from.
    pub fn source_url(&self, job: &ImportJob) -> Result<Url> {
        match job {
            ImportJob::Url { url, .. } => Ok(url.clone()),
            ImportJob::Lodc { catalog_id, .. } => {
                let mut url = self.catalog_url.clone();
                url.path_segments_mut()
                    .map_err(|_| anyhow::anyhow!("Catalog URL cannot hold a path: {}", self.catalog_url))?
                    .pop_if_empty()
                    .push(catalog_id);
                Ok(url)
            }
        }
    }
}

#[async_trait]
impl Importer for GraphStoreImporter {
    async fn import(&self, job: &ImportJob) -> Result<usize> {
        let source = self.source_url(job)?;
        info!("Downloading {}", source);

        let response = self.client
            .get(source.clone())
            .header(reqwest::header::ACCEPT, RDF_ACCEPT)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", source))?;

        if !response.status().is_success() {
            anyhow::bail!("Source {} returned {}", source, response.status());
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();

        let body = response.bytes().await
            .with_context(|| format!("Failed to read body of {}", source))?;
        let size = body.len();

        let target = format!("{}/{}/data", self.store_url, job.database());
        debug!("Uploading {} bytes of {} to {}", size, content_type, target);

        let upload = self.client
            .post(&target)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await
            .with_context(|| format!("Failed to upload to {}", target))?;

        if !upload.status().is_success() {
            let status = upload.status();
            let error_text = upload.text().await.unwrap_or_default();
            anyhow::bail!("Store rejected upload ({}): {}", status, error_text);
        }

        Ok(size)
    }
}
