pub mod query_builder;
pub mod search;

pub use query_builder::{build_query, DiscoveryRequest, QueryOutcome};
pub use search::{SearchError, TermRecord, TermSearch};
