// Query pipeline: readiness wait -> encode -> search -> map to identifiers

use super::cancel::{CancellationToken, Cancelled};
use super::SearchHit;
use crate::blocking::run_blocking;
use crate::bootstrap::Bootstrap;
use crate::embedding::QueryInput;
use crate::error::{EmbeddingError, IndexError, QueryError};
use crate::similarity::sort_by_descending_score;
use tracing::{debug, instrument, warn};

/// Answers one query at a time against the bootstrapped resources.
///
/// Holds no per-query state; superseding is the caller's job through the
/// token passed to each call.
#[derive(Clone)]
pub struct QueryPipeline {
    bootstrap: Bootstrap,
    result_limit: usize,
}

impl QueryPipeline {
    pub fn new(bootstrap: Bootstrap, result_limit: usize) -> Self {
        Self {
            bootstrap,
            result_limit,
        }
    }

    pub fn result_limit(&self) -> usize {
        self.result_limit
    }

    /// The whole catalog in catalog order, unranked.
    pub fn show_all(&self) -> Vec<SearchHit> {
        self.bootstrap
            .corpus()
            .catalog
            .identifiers()
            .iter()
            .enumerate()
            .map(|(row, identifier)| SearchHit {
                row: row as u64,
                identifier: identifier.clone(),
                score: None,
            })
            .collect()
    }

    /// Runs a query, reporting every failure.
    ///
    /// Empty text returns [`QueryPipeline::show_all`] without waiting for
    /// readiness. An empty image returns no hits. Anything else waits for
    /// `ready_to_search`, encodes, searches and returns at most
    /// `result_limit` hits by descending similarity. The token is checked
    /// before encoding, before searching and before returning.
    #[instrument(skip_all, fields(channel = ?input.channel()))]
    pub async fn try_query(
        &self,
        input: QueryInput,
        token: &CancellationToken,
    ) -> Result<Vec<SearchHit>, QueryError> {
        match &input {
            QueryInput::Text(text) if text.is_empty() => {
                token.check()?;
                return Ok(self.show_all());
            }
            QueryInput::Image(image) if image.is_empty() => {
                token.check()?;
                return Ok(Vec::new());
            }
            _ => {}
        }

        token
            .run_until_cancelled(self.bootstrap.readiness().wait_for_search())
            .await?;
        let resources = self
            .bootstrap
            .resources()
            .cloned()
            .ok_or(QueryError::NotReady)?;

        token.check()?;
        let vector = match input {
            QueryInput::Text(text) => {
                let encoder = resources.text_encoder;
                run_blocking::<_, _, EmbeddingError>(move || encoder.embed_text(&text)).await?
            }
            QueryInput::Image(image) => {
                let encoder = resources.image_encoder;
                run_blocking::<_, _, EmbeddingError>(move || encoder.embed_image(&image)).await?
            }
        };

        token.check()?;
        let index = resources.index;
        let limit = self.result_limit;
        let mut ranked =
            run_blocking::<_, _, IndexError>(move || index.search(&vector, limit)).await?;
        sort_by_descending_score(&mut ranked);

        token.check()?;
        Ok(self.to_hits(ranked))
    }

    /// Runs a query, degrading encoding and search failures to no hits.
    pub async fn query(
        &self,
        input: QueryInput,
        token: &CancellationToken,
    ) -> Result<Vec<SearchHit>, Cancelled> {
        match self.try_query(input, token).await {
            Ok(hits) => Ok(hits),
            Err(QueryError::Cancelled) => {
                debug!("Query superseded");
                Err(Cancelled)
            }
            Err(e) => {
                warn!("Query failed, returning no results: {}", e);
                Ok(Vec::new())
            }
        }
    }

    fn to_hits(&self, ranked: Vec<(u64, f32)>) -> Vec<SearchHit> {
        let catalog = &self.bootstrap.corpus().catalog;
        ranked
            .into_iter()
            .take(self.result_limit)
            .filter_map(|(row, score)| {
                let identifier = usize::try_from(row).ok().and_then(|r| catalog.get(r))?;
                Some(SearchHit {
                    row,
                    identifier: identifier.to_string(),
                    score: Some(score),
                })
            })
            .collect()
    }
}
