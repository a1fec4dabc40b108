//! The UI-facing search engine.
//!
//! [`SearchEngine`] ties the pieces together: it loads the corpus at build
//! time, owns the [`Bootstrap`], and turns query submissions into published
//! results.
//!
//! # Query boundary
//!
//! - [`SearchEngine::submit_text_query`] / [`SearchEngine::submit_image_query`]
//!   start a query in the background. A new submission supersedes the running
//!   one on the same channel; text submissions are debounced.
//! - [`SearchEngine::current_results`] / [`SearchEngine::subscribe_results`]
//!   expose the latest published result set. Only the newest admitted query
//!   of a channel ever publishes.
//! - [`SearchEngine::ready_to_show`] / [`SearchEngine::ready_to_search`]
//!   expose the startup flags.
//!
//! # Usage
//!
//! ```ignore
//! let engine = EngineBuilder::new(config, text_loader, image_loader).build()?;
//! engine.start();
//!
//! let mut results = engine.subscribe_results();
//! engine.submit_text_query("a dog on a beach");
//! results.changed().await?;
//! for hit in &results.borrow().hits {
//!     println!("{}", hit.identifier);
//! }
//! ```

use crate::bootstrap::{Bootstrap, BootstrapAttempt, Loaders, ReadinessSnapshot};
use crate::config::EngineConfig;
use crate::corpus::Corpus;
use crate::embedding::{PixelBuffer, QueryChannel, QueryInput};
use crate::error::{BootstrapError, CorpusLoadError, QueryError};
use crate::loader::{ImageEncoderLoader, IndexLoader, PersistentIndexLoader, TextEncoderLoader};
use crate::query::{
    debounce, CancellationToken, Flight, QueryPipeline, QueryResults, SearchHit, SingleFlight,
};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Assembles a [`SearchEngine`].
pub struct EngineBuilder {
    config: EngineConfig,
    text: Arc<TextEncoderLoader>,
    image: Arc<ImageEncoderLoader>,
    index: Option<Arc<IndexLoader>>,
    corpus: Option<Corpus>,
}

impl EngineBuilder {
    pub fn new(
        config: EngineConfig,
        text: Arc<TextEncoderLoader>,
        image: Arc<ImageEncoderLoader>,
    ) -> Self {
        Self {
            config,
            text,
            image,
            index: None,
            corpus: None,
        }
    }

    /// CLIP encoders from one model directory.
    #[cfg(feature = "clip")]
    pub fn clip(config: EngineConfig, files: crate::embedding::ClipModelFiles) -> Self {
        use crate::loader::{ClipImageLoader, ClipTextLoader};
        Self::new(
            config,
            Arc::new(ClipTextLoader::new(files.clone())),
            Arc::new(ClipImageLoader::new(files)),
        )
    }

    /// Replaces the default [`PersistentIndexLoader`].
    pub fn index_loader(mut self, loader: Arc<IndexLoader>) -> Self {
        self.index = Some(loader);
        self
    }

    /// Uses an in-memory corpus instead of reading `config.paths`.
    pub fn corpus(mut self, corpus: Corpus) -> Self {
        self.corpus = Some(corpus);
        self
    }

    /// Loads the corpus (unless one was supplied) and builds the engine.
    ///
    /// Loading happens synchronously here; `ready_to_show` is raised on
    /// success. Resource loading only begins with [`SearchEngine::start`].
    pub fn build(self) -> Result<SearchEngine, CorpusLoadError> {
        let corpus = match self.corpus {
            Some(corpus) => corpus,
            None => Corpus::load(&self.config.paths)?,
        };

        let index = self.index.unwrap_or_else(|| {
            Arc::new(PersistentIndexLoader::new(
                Arc::clone(&corpus.matrix),
                self.config.paths.index.clone(),
                self.config.index,
            ))
        });

        let bootstrap = Bootstrap::new(
            corpus,
            Loaders {
                text: self.text,
                image: self.image,
                index,
            },
        );
        let pipeline = QueryPipeline::new(bootstrap.clone(), self.config.result_limit);

        let initial = QueryResults {
            generation: 0,
            channel: None,
            hits: pipeline.show_all(),
        };
        let (results, _) = watch::channel(initial);

        info!(
            "Corpus ready: {} identifiers, {} x {} matrix",
            bootstrap.corpus().catalog.len(),
            bootstrap.corpus().matrix.rows(),
            bootstrap.corpus().matrix.columns()
        );

        Ok(SearchEngine {
            inner: Arc::new(Inner {
                config: self.config,
                bootstrap,
                pipeline,
                flights: SingleFlight::new(),
                results,
            }),
        })
    }
}

/// Concurrent embedding search over one corpus.
///
/// Cheap to clone. Methods that spawn work must be called from within a
/// tokio runtime.
#[derive(Clone)]
pub struct SearchEngine {
    inner: Arc<Inner>,
}

struct Inner {
    config: EngineConfig,
    bootstrap: Bootstrap,
    pipeline: QueryPipeline,
    flights: SingleFlight,
    results: watch::Sender<QueryResults>,
}

impl SearchEngine {
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn corpus(&self) -> &Corpus {
        self.inner.bootstrap.corpus()
    }

    pub fn bootstrap(&self) -> &Bootstrap {
        &self.inner.bootstrap
    }

    /// Starts loading search resources. Idempotent.
    pub fn start(&self) -> BootstrapAttempt {
        self.inner.bootstrap.start()
    }

    /// Starts loading if needed and waits until bootstrap finishes.
    pub async fn wait_ready(&self) -> Result<(), BootstrapError> {
        self.inner.bootstrap.run().await
    }

    pub fn ready_to_show(&self) -> bool {
        self.inner.bootstrap.readiness().ready_to_show()
    }

    pub fn ready_to_search(&self) -> bool {
        self.inner.bootstrap.readiness().ready_to_search()
    }

    pub fn readiness(&self) -> ReadinessSnapshot {
        self.inner.bootstrap.readiness().snapshot()
    }

    /// Submits a text query, superseding any running text query.
    ///
    /// The query runs after the debounce window unless a newer submission
    /// arrives first. Empty text publishes the whole catalog.
    pub fn submit_text_query(&self, text: impl Into<String>) -> JoinHandle<()> {
        self.submit(QueryInput::Text(text.into()))
    }

    /// Submits an image query, superseding any running image query.
    pub fn submit_image_query(&self, image: PixelBuffer) -> JoinHandle<()> {
        self.submit(QueryInput::Image(image))
    }

    /// Publishes the whole catalog in catalog order.
    pub fn show_all(&self) -> JoinHandle<()> {
        self.submit_text_query(String::new())
    }

    fn submit(&self, input: QueryInput) -> JoinHandle<()> {
        self.start();
        let flight = self.inner.flights.begin(input.channel());
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.execute(flight, input).await })
    }

    /// Latest published results.
    pub fn current_results(&self) -> QueryResults {
        self.inner.results.borrow().clone()
    }

    /// Receiver notified whenever new results are published.
    pub fn subscribe_results(&self) -> watch::Receiver<QueryResults> {
        self.inner.results.subscribe()
    }

    /// Runs a query directly, outside the single-flight slots.
    ///
    /// Waits for bootstrap like any query, and reports failures instead of
    /// degrading them to an empty result. A failed bootstrap yields
    /// [`QueryError::NotReady`].
    pub async fn query(&self, input: impl Into<QueryInput>) -> Result<Vec<SearchHit>, QueryError> {
        let attempt = self.start();
        let token = CancellationToken::new();
        let query = self.inner.pipeline.try_query(input.into(), &token);

        tokio::select! {
            biased;
            result = query => result,
            Err(e) = attempt => {
                debug!("Query abandoned: {}", e);
                Err(QueryError::NotReady)
            }
        }
    }

    /// Cancels running submissions; their results are never published.
    pub fn cancel_pending(&self) {
        self.inner.flights.cancel_all();
    }
}

impl Inner {
    async fn execute(&self, flight: Flight, input: QueryInput) {
        if flight.channel == QueryChannel::Text
            && debounce(self.config.text_debounce, &flight.token)
                .await
                .is_err()
        {
            debug!(generation = flight.generation, "Debounced away");
            return;
        }

        match self.pipeline.query(input, &flight.token).await {
            Ok(hits) => self.publish(&flight, hits),
            Err(_) => debug!(generation = flight.generation, "Superseded"),
        }
    }

    fn publish(&self, flight: &Flight, hits: Vec<SearchHit>) {
        let published = self.flights.finish(flight, || {
            self.results.send_if_modified(|current| {
                if flight.generation <= current.generation {
                    return false;
                }
                *current = QueryResults {
                    generation: flight.generation,
                    channel: Some(flight.channel),
                    hits,
                };
                true
            })
        });

        match published {
            Some(true) => debug!(generation = flight.generation, "Published results"),
            _ => debug!(generation = flight.generation, "Dropped stale results"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CorpusPaths;
    use crate::corpus::{CorpusCatalog, EmbeddingMatrix};
    use crate::embedding::{ImageEncoder, TextEncoder};
    use crate::loader::Ready;
    use crate::error::LoadError;
    use crate::test_utils::{CountingLoader, MockImageEncoder, MockTextEncoder};
    use std::time::Duration;

    const WINDOW: Duration = Duration::from_millis(60);

    fn engine(text: Arc<MockTextEncoder>) -> SearchEngine {
        let text: Arc<dyn TextEncoder> = text;
        engine_with(Arc::new(Ready::new(text)))
    }

    fn engine_with(text: Arc<TextEncoderLoader>) -> SearchEngine {
        let catalog = CorpusCatalog::from_identifiers(
            vec!["item0.jpg".into(), "item1.jpg".into(), "item2.jpg".into()],
            "/images",
        );
        let matrix = EmbeddingMatrix::from_parts(3, 2, vec![1.0, 0.0, 0.0, 1.0, 0.7, 0.7]).unwrap();
        let config = EngineConfig::new(CorpusPaths::in_dir("/unused").without_index_file())
            .with_text_debounce(WINDOW);

        let image: Arc<dyn ImageEncoder> = Arc::new(MockImageEncoder::new(vec![0.0, 1.0]));
        EngineBuilder::new(config, text, Arc::new(Ready::new(image)))
            .corpus(Corpus::new(catalog, matrix))
            .build()
            .unwrap()
    }

    fn identifiers(results: &QueryResults) -> Vec<&str> {
        results.hits.iter().map(|h| h.identifier.as_str()).collect()
    }

    #[tokio::test]
    async fn test_initial_board_lists_catalog() {
        let engine = engine(Arc::new(MockTextEncoder::new(2)));
        assert!(engine.ready_to_show());
        assert!(!engine.ready_to_search());

        let results = engine.current_results();
        assert_eq!(results.generation, 0);
        assert_eq!(identifiers(&results), vec!["item0.jpg", "item1.jpg", "item2.jpg"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_burst_of_keystrokes_runs_one_query() {
        let encoder = Arc::new(MockTextEncoder::new(2).with_vector("cat", vec![0.0, 1.0]));
        let engine = engine(encoder.clone());
        engine.wait_ready().await.unwrap();

        let c = engine.submit_text_query("c");
        let ca = engine.submit_text_query("ca");
        let cat = engine.submit_text_query("cat");
        for handle in [c, ca, cat] {
            handle.await.unwrap();
        }

        assert_eq!(encoder.call_count(), 1);
        assert_eq!(encoder.seen.lock().as_slice(), ["cat".to_string()]);
        let results = engine.current_results();
        assert_eq!(identifiers(&results), vec!["item1.jpg", "item2.jpg", "item0.jpg"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_superseded_query_never_publishes() {
        // A is slow enough to finish after B was admitted
        let encoder = Arc::new(
            MockTextEncoder::new(2)
                .with_vector("a", vec![1.0, 0.0])
                .with_vector("b", vec![0.0, 1.0])
                .with_delay(Duration::from_millis(80)),
        );
        let engine = engine(encoder.clone());
        engine.wait_ready().await.unwrap();
        let mut rx = engine.subscribe_results();
        rx.borrow_and_update();

        let a = engine.submit_text_query("a");
        // Let A clear the debounce window and start encoding
        tokio::time::sleep(WINDOW + Duration::from_millis(20)).await;
        let b = engine.submit_text_query("b");
        a.await.unwrap();
        b.await.unwrap();

        // Exactly one publication, and it is B's
        assert!(rx.has_changed().unwrap());
        let results = rx.borrow_and_update().clone();
        assert_eq!(results.channel, Some(QueryChannel::Text));
        assert_eq!(identifiers(&results), vec!["item1.jpg", "item2.jpg", "item0.jpg"]);
        assert!(!rx.has_changed().unwrap());
        assert_eq!(encoder.call_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_image_query_publishes() {
        let engine = engine(Arc::new(MockTextEncoder::new(2)));
        let image = PixelBuffer::new(1, 1, vec![0, 0, 0]).unwrap();
        engine.submit_image_query(image).await.unwrap();

        let results = engine.current_results();
        assert_eq!(results.channel, Some(QueryChannel::Image));
        assert_eq!(results.hits[0].identifier, "item1.jpg");
        assert!(engine.ready_to_search());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_show_all_after_search() {
        let engine = engine(Arc::new(MockTextEncoder::new(2)));
        engine.submit_text_query("anything").await.unwrap();
        assert!(engine.current_results().hits[0].score.is_some());

        engine.show_all().await.unwrap();
        let results = engine.current_results();
        assert_eq!(identifiers(&results), vec!["item0.jpg", "item1.jpg", "item2.jpg"]);
        assert!(results.hits.iter().all(|h| h.score.is_none()));
    }

    #[tokio::test]
    async fn test_direct_query() {
        let engine = engine(Arc::new(MockTextEncoder::new(2)));
        let hits = engine.query("anything").await.unwrap();
        assert_eq!(hits[0].identifier, "item0.jpg");
        assert_eq!(hits.len(), 3);
    }

    #[tokio::test]
    async fn test_direct_query_after_failed_bootstrap() {
        let loader = CountingLoader::<dyn TextEncoder>::failing(LoadError::text("no weights"));
        let engine = engine_with(Arc::new(loader));

        let result = tokio::time::timeout(Duration::from_secs(5), engine.query("anything"))
            .await
            .expect("query should not hang");
        assert!(matches!(result, Err(QueryError::NotReady)));
        assert!(!engine.ready_to_search());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_pending_drops_results() {
        let engine = engine(Arc::new(MockTextEncoder::new(2)));
        let handle = engine.submit_text_query("anything");
        engine.cancel_pending();
        handle.await.unwrap();
        assert_eq!(engine.current_results().generation, 0);
    }
}
