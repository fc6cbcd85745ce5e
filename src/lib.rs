pub mod api;
pub mod config;
pub mod core;
pub mod import;
pub mod knowledge_graph;

pub use config::Configuration;
pub use core::{DiscoveryRequest, QueryOutcome, TermRecord, TermSearch};
pub use import::TaskDispatcher;
pub use knowledge_graph::{Dataset, DatasetRegistry, SparqlExecutor};
