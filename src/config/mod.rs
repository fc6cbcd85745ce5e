use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use anyhow::{Result, Context};
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    pub name: String,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub catalog: CatalogSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,
}

/// The triple store server holding imported and existing datasets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    #[serde(default = "default_store_url")]
    pub base_url: String,
    /// Per-query timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_row_limit")]
    pub row_limit: usize,
}

/// Linked open data catalog used to resolve catalog ids on import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSettings {
    #[serde(default = "default_catalog_url")]
    pub base_url: String,
    #[serde(default = "default_import_timeout")]
    pub import_timeout: u64,
}

fn default_bind() -> String { "127.0.0.1:8000".to_string() }
fn default_page_size() -> usize { 20 }
fn default_max_page_size() -> usize { 100 }
fn default_store_url() -> String { "http://localhost:3030".to_string() }
fn default_timeout() -> u64 { 20 }
fn default_row_limit() -> usize { 20 }
fn default_catalog_url() -> String { "https://lod-cloud.net/rdf".to_string() }
fn default_import_timeout() -> u64 { 300 }

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            base_url: default_store_url(),
            timeout: default_timeout(),
            row_limit: default_row_limit(),
        }
    }
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            base_url: default_catalog_url(),
            import_timeout: default_import_timeout(),
        }
    }
}

impl StoreSettings {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

impl Configuration {
    /// Load configuration from a YAML or JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = if path.extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.store.base_url)
            .with_context(|| format!("Invalid store URL: {}", self.store.base_url))?;
        Url::parse(&self.catalog.base_url)
            .with_context(|| format!("Invalid catalog URL: {}", self.catalog.base_url))?;

        if self.store.timeout == 0 {
            anyhow::bail!("Store timeout must be at least one second");
        }

        if self.store.row_limit == 0 {
            anyhow::bail!("Store row limit must be positive");
        }

        if self.server.page_size == 0 || self.server.page_size > self.server.max_page_size {
            anyhow::bail!(
                "Page size {} must be between 1 and {}",
                self.server.page_size,
                self.server.max_page_size
            );
        }

        Ok(())
    }

    /// Create an example configuration
    pub fn example() -> Self {
        Configuration {
            name: "Local KG discovery".to_string(),
            server: ServerSettings::default(),
            store: StoreSettings::default(),
            catalog: CatalogSettings::default(),
        }
    }
}
