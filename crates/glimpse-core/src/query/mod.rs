//! Query execution.
//!
//! - [`QueryPipeline`] - waits for readiness, encodes, searches, ranks
//! - [`CancellationToken`] - cooperative cancellation of superseded queries
//! - [`SingleFlight`] - one live query per input channel
//! - [`debounce`] - quiet window for text input

mod cancel;
mod debounce;
mod pipeline;
mod single_flight;

pub use cancel::{CancellationToken, Cancelled};
pub use debounce::debounce;
pub use pipeline::QueryPipeline;
pub use single_flight::{Flight, SingleFlight};

use crate::embedding::QueryChannel;
use serde::Serialize;

/// One ranked (or, for "show all", unranked) result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// Matrix row and index key
    pub row: u64,
    /// Asset file name from the catalog
    pub identifier: String,
    /// Cosine similarity; `None` for the unranked catalog listing
    pub score: Option<f32>,
}

/// The latest published result set.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryResults {
    /// Generation of the query that produced these hits; 0 for the initial listing
    pub generation: u64,
    /// Channel of that query; `None` for the initial listing
    pub channel: Option<QueryChannel>,
    pub hits: Vec<SearchHit>,
}
