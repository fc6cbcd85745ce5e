use anyhow::{Result, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;
use tracing_subscriber::EnvFilter;
use url::Url;

use kg_discovery::{
    api,
    config::Configuration,
    core::{DiscoveryRequest, QueryOutcome, TermRecord, TermSearch},
    knowledge_graph::{Dataset, HttpSparqlExecutor, StoreDescriptor},
};

#[derive(Parser)]
#[command(
    name = "kg_discovery",
    about = "Search and discover triples across SPARQL-backed datasets",
    long_about = None,
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(clap::Args, Clone)]
struct FilterArgs {
    /// Field to filter on (only "terms" is supported)
    #[arg(long)]
    filter_field: Option<String>,

    /// Filter operator (only "contains" is supported)
    #[arg(long)]
    filter_operator: Option<String>,

    /// Value to look for
    #[arg(long)]
    filter_value: Option<String>,

    /// Quick search text (accepted, currently unused)
    #[arg(long)]
    search: Option<String>,
}

impl From<FilterArgs> for DiscoveryRequest {
    fn from(args: FilterArgs) -> Self {
        DiscoveryRequest {
            filter_field: args.filter_field,
            filter_operator: args.filter_operator,
            filter_value: args.filter_value,
            filter_search: args.search,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the discovery HTTP API
    Serve {
        /// Configuration file path
        #[arg(short, long, env = "KG_DISCOVERY_CONFIG")]
        config: Option<PathBuf>,

        /// Address to listen on (overrides config)
        #[arg(long, env = "KG_DISCOVERY_BIND")]
        bind: Option<String>,

        /// Triple store server URL (overrides config)
        #[arg(long, env = "KG_DISCOVERY_STORE_URL")]
        store_url: Option<String>,
    },

    /// Search one dataset and print the matched terms
    Search {
        /// Triple store server URL
        #[arg(long, env = "KG_DISCOVERY_STORE_URL", default_value = "http://localhost:3030")]
        store_url: String,

        /// Database on the store server
        #[arg(long, conflicts_with = "endpoint", required_unless_present = "endpoint")]
        database: Option<String>,

        /// Remote SPARQL endpoint to query instead of a store database
        #[arg(long)]
        endpoint: Option<Url>,

        #[command(flatten)]
        filter: FilterArgs,

        /// Query timeout in seconds
        #[arg(long, default_value = "20")]
        timeout: u64,

        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: TermOutputFormat,
    },

    /// Print the SPARQL query a discovery request translates to
    BuildQuery {
        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Validate configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Generate example configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long)]
        output: PathBuf,

        /// Configuration format (yaml or json)
        #[arg(short, long, default_value = "yaml")]
        format: ConfigFormat,
    },
}

#[derive(clap::ValueEnum, Clone)]
enum ConfigFormat {
    Yaml,
    Json,
}

#[derive(clap::ValueEnum, Clone)]
enum TermOutputFormat {
    Table,
    Json,
    Csv,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        "warn"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Serve { config, bind, store_url } => serve_command(config, bind, store_url).await,
        Commands::Search {
            store_url,
            database,
            endpoint,
            filter,
            timeout,
            format,
        } => search_command(store_url, database, endpoint, filter, timeout, format).await,
        Commands::BuildQuery { filter } => build_query_command(filter),
        Commands::Validate { config } => validate_command(config).await,
        Commands::GenerateConfig { output, format } => generate_config_command(output, format).await,
    }
}

async fn serve_command(
    config_path: Option<PathBuf>,
    bind: Option<String>,
    store_url: Option<String>,
) -> Result<()> {
    let mut config = match config_path {
        Some(path) => Configuration::from_file(&path)?,
        None => Configuration::example(),
    };

    // Override settings if provided
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    if let Some(url) = store_url {
        config.store.base_url = url;
    }

    config.validate()?;

    println!("{}", "Starting discovery API...".bright_blue().bold());
    println!(" Configuration: {}", config.name.bright_green());
    println!(" Store: {}", config.store.base_url);
    println!(" Listening on: {}", config.server.bind.bright_green());

    api::serve(&config).await
}

async fn search_command(
    store_url: String,
    database: Option<String>,
    endpoint: Option<Url>,
    filter: FilterArgs,
    timeout: u64,
    format: TermOutputFormat,
) -> Result<()> {
    let store = match (database, endpoint) {
        (_, Some(url)) => StoreDescriptor::Endpoint(url),
        (Some(name), None) => StoreDescriptor::Database(name),
        (None, None) => anyhow::bail!("Either --database or --endpoint is required"),
    };

    let dataset = Dataset {
        id: 0,
        name: match &store {
            StoreDescriptor::Database(name) => name.clone(),
            StoreDescriptor::Endpoint(url) => url.host_str().unwrap_or("endpoint").to_string(),
        },
        description: String::new(),
        source: store.to_string(),
        store,
        created_at: Utc::now(),
    };

    let executor = HttpSparqlExecutor::new(&store_url).context("Failed to create SPARQL client")?;
    let search = TermSearch::new(Arc::new(executor)).with_timeout(Duration::from_secs(timeout));

    let terms = search
        .discover(&dataset, &DiscoveryRequest::from(filter))
        .await?;

    match format {
        TermOutputFormat::Table => display_terms_as_table(&terms),
        TermOutputFormat::Json => display_terms_as_json(&terms)?,
        TermOutputFormat::Csv => display_terms_as_csv(&terms),
    }

    Ok(())
}

fn build_query_command(filter: FilterArgs) -> Result<()> {
    match DiscoveryRequest::from(filter).build_query() {
        QueryOutcome::Query(query) => println!("{}", query),
        QueryOutcome::Rejected => {
            println!("{}", "Filter rejected: only terms/contains is supported".bright_yellow());
        }
    }

    Ok(())
}

async fn validate_command(config_path: PathBuf) -> Result<()> {
    println!("{}", " Validating configuration...".bright_blue().bold());

    match Configuration::from_file(&config_path) {
        Ok(config) => {
            match config.validate() {
                Ok(()) => {
                    println!(" Configuration is valid!");
                    println!(" Name: {}", config.name.bright_green());
                    println!(" Bind: {}", config.server.bind);
                    println!(" Store: {}", config.store.base_url);
                    println!(" Timeout: {}s, row limit: {}", config.store.timeout, config.store.row_limit);
                    println!(" Catalog: {}", config.catalog.base_url);
                    Ok(())
                }
                Err(e) => {
                    error!(" Configuration validation failed: {}", e);
                    Err(e)
                }
            }
        }
        Err(e) => {
            error!(" Failed to load configuration: {}", e);
            Err(e)
        }
    }
}

async fn generate_config_command(output_path: PathBuf, format: ConfigFormat) -> Result<()> {
    println!("{}", " Generating example configuration...".bright_blue().bold());

    let config = Configuration::example();

    let content = match format {
        ConfigFormat::Yaml => serde_yaml::to_string(&config)?,
        ConfigFormat::Json => serde_json::to_string_pretty(&config)?,
    };

    tokio::fs::write(&output_path, content).await?;

    println!(" Example configuration generated at: {}", output_path.display().to_string().bright_green());

    Ok(())
}

fn display_terms_as_table(terms: &[TermRecord]) {
    if terms.is_empty() {
        println!("{}", "No terms matched".bright_yellow());
        return;
    }

    println!("{}", "id | dataset | term".bright_cyan());
    println!("{}", "-".repeat(60));

    for term in terms {
        println!("{} | {} | {}", term.id, term.dataset_name, term.term);
    }
}

fn display_terms_as_json(terms: &[TermRecord]) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(terms)?);
    Ok(())
}

fn display_terms_as_csv(terms: &[TermRecord]) {
    println!("id,dataset_id,dataset_name,term");

    for term in terms {
        println!("{},{},{},{}", term.id, term.dataset_id, csv_field(&term.dataset_name), csv_field(&term.term));
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
