//! Bootstrap orchestration and readiness.
//!
//! A [`Bootstrap`] owns the corpus and the three resource loaders. The corpus
//! is already loaded when it is constructed, so `ready_to_show` is raised
//! immediately. [`Bootstrap::start`] then runs the three loaders as
//! concurrent tasks; when all of them succeed, the handles are published as
//! [`SearchResources`] and `ready_to_search` is raised.
//!
//! There is exactly one attempt per `Bootstrap`. Every `start` call, whether
//! made while the attempt is running or after it finished, returns the same
//! shared future. A failed attempt stays failed.

use crate::corpus::Corpus;
use crate::embedding::{ImageEncoder, TextEncoder};
use crate::error::{BootstrapError, EncoderKind, LoadError};
use crate::index::VectorIndex;
use crate::loader::{ImageEncoderLoader, IndexLoader, LoadOnce, TextEncoderLoader};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, instrument};

/// Shared outcome of the bootstrap attempt.
pub type BootstrapAttempt = Shared<BoxFuture<'static, Result<(), BootstrapError>>>;

/// Two monotonic startup flags.
///
/// `ready_to_show` means the catalog can be displayed; `ready_to_search`
/// means every search resource is loaded. Neither ever goes back to false,
/// and `ready_to_search` is never raised before `ready_to_show`.
pub struct Readiness {
    show: AtomicBool,
    search: watch::Sender<bool>,
}

/// Both flags read at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessSnapshot {
    pub ready_to_show: bool,
    pub ready_to_search: bool,
}

impl Readiness {
    pub fn new() -> Self {
        let (search, _) = watch::channel(false);
        Self {
            show: AtomicBool::new(false),
            search,
        }
    }

    pub fn ready_to_show(&self) -> bool {
        self.show.load(Ordering::SeqCst)
    }

    pub fn ready_to_search(&self) -> bool {
        *self.search.borrow()
    }

    /// Reads `ready_to_search` first so a concurrent transition can never
    /// produce `search && !show`.
    pub fn snapshot(&self) -> ReadinessSnapshot {
        let ready_to_search = self.ready_to_search();
        let ready_to_show = self.ready_to_show();
        ReadinessSnapshot {
            ready_to_show,
            ready_to_search,
        }
    }

    pub(crate) fn mark_ready_to_show(&self) {
        self.show.store(true, Ordering::SeqCst);
    }

    pub(crate) fn mark_ready_to_search(&self) {
        self.mark_ready_to_show();
        self.search.send_if_modified(|ready| {
            if *ready {
                false
            } else {
                *ready = true;
                true
            }
        });
    }

    /// Suspends until `ready_to_search` is raised.
    ///
    /// Never returns if bootstrap fails; race it against a cancellation token.
    pub async fn wait_for_search(&self) {
        let mut rx = self.search.subscribe();
        // The sender lives as long as `self`, so this only resolves on `true`
        let _ = rx.wait_for(|ready| *ready).await.map(|_| ());
    }
}

impl Default for Readiness {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("Readiness")
            .field("ready_to_show", &snapshot.ready_to_show)
            .field("ready_to_search", &snapshot.ready_to_search)
            .finish()
    }
}

/// The three search handles, published together.
#[derive(Clone)]
pub struct SearchResources {
    pub text_encoder: Arc<dyn TextEncoder>,
    pub image_encoder: Arc<dyn ImageEncoder>,
    pub index: Arc<dyn VectorIndex>,
}

/// Resource loaders handed to [`Bootstrap::new`].
pub struct Loaders {
    pub text: Arc<TextEncoderLoader>,
    pub image: Arc<ImageEncoderLoader>,
    pub index: Arc<IndexLoader>,
}

/// Start-once, await-many bootstrap.
///
/// Cheap to clone; clones share the same attempt.
#[derive(Clone)]
pub struct Bootstrap {
    inner: Arc<Inner>,
}

struct Inner {
    corpus: Corpus,
    readiness: Readiness,
    text: LoadOnce<dyn TextEncoder>,
    image: LoadOnce<dyn ImageEncoder>,
    index: LoadOnce<dyn VectorIndex>,
    resources: once_cell::sync::OnceCell<SearchResources>,
    attempt: Mutex<Option<BootstrapAttempt>>,
}

impl Bootstrap {
    /// Takes an already loaded corpus and raises `ready_to_show`.
    pub fn new(corpus: Corpus, loaders: Loaders) -> Self {
        let readiness = Readiness::new();
        readiness.mark_ready_to_show();

        Self {
            inner: Arc::new(Inner {
                corpus,
                readiness,
                text: LoadOnce::new(loaders.text),
                image: LoadOnce::new(loaders.image),
                index: LoadOnce::new(loaders.index),
                resources: once_cell::sync::OnceCell::new(),
                attempt: Mutex::new(None),
            }),
        }
    }

    pub fn corpus(&self) -> &Corpus {
        &self.inner.corpus
    }

    pub fn readiness(&self) -> &Readiness {
        &self.inner.readiness
    }

    /// Published handles; `Some` exactly when `ready_to_search` is raised.
    pub fn resources(&self) -> Option<&SearchResources> {
        self.inner.resources.get()
    }

    /// Starts the attempt if it has not started, and returns it.
    ///
    /// Must be called from within a tokio runtime. The loaders run on spawned
    /// tasks, so the attempt makes progress even if the returned future is
    /// never polled.
    pub fn start(&self) -> BootstrapAttempt {
        let mut slot = self.inner.attempt.lock();
        if let Some(attempt) = slot.as_ref() {
            return attempt.clone();
        }

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(inner.run());
        let attempt = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => Err(BootstrapError::TaskFailed(e.to_string())),
            }
        }
        .boxed()
        .shared();

        *slot = Some(attempt.clone());
        attempt
    }

    /// Starts the attempt if needed and waits for its outcome.
    pub async fn run(&self) -> Result<(), BootstrapError> {
        self.start().await
    }

    /// Outcome of the attempt, if it has finished.
    pub fn outcome(&self) -> Option<Result<(), BootstrapError>> {
        self.inner
            .attempt
            .lock()
            .as_ref()
            .and_then(|attempt| attempt.peek().cloned())
    }
}

impl Inner {
    #[instrument(skip_all, fields(rows = self.corpus.matrix.rows()))]
    async fn run(self: Arc<Self>) -> Result<(), BootstrapError> {
        info!("Loading search resources");

        let text = tokio::spawn({
            let inner = Arc::clone(&self);
            async move { inner.text.get().await }
        });
        let image = tokio::spawn({
            let inner = Arc::clone(&self);
            async move { inner.image.get().await }
        });
        let index = tokio::spawn({
            let inner = Arc::clone(&self);
            async move { inner.index.get().await }
        });
        let (text, image, index) = tokio::join!(text, image, index);

        let mut errors = Vec::new();
        let text = flatten(text, LoadError::text).map_err(|e| errors.push(e)).ok();
        let image = flatten(image, LoadError::image).map_err(|e| errors.push(e)).ok();
        let index = flatten(index, LoadError::Index).map_err(|e| errors.push(e)).ok();

        if let (Some(text), Some(image), Some(index)) = (text, image, index) {
            let dims = index.dimensions();
            check_dims(EncoderKind::Text, text.embedding_dim(), dims, &mut errors);
            check_dims(EncoderKind::Image, image.embedding_dim(), dims, &mut errors);

            if errors.is_empty() {
                let _ = self.resources.set(SearchResources {
                    text_encoder: text,
                    image_encoder: image,
                    index,
                });
                self.readiness.mark_ready_to_search();
                info!("Ready to search");
                return Ok(());
            }
        }

        let err = BootstrapError::Load(errors);
        error!("Bootstrap failed: {}", err);
        Err(err)
    }
}

fn flatten<R: ?Sized>(
    joined: Result<Result<Arc<R>, LoadError>, tokio::task::JoinError>,
    on_panic: impl FnOnce(String) -> LoadError,
) -> Result<Arc<R>, LoadError> {
    joined.unwrap_or_else(|e| Err(on_panic(format!("loader task failed: {}", e))))
}

fn check_dims(kind: EncoderKind, encoder: usize, index: usize, errors: &mut Vec<LoadError>) {
    if encoder != index {
        errors.push(LoadError::Encoder {
            kind,
            reason: format!(
                "produces {}-dimensional vectors but the index holds {} dimensions",
                encoder, index
            ),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::{CorpusCatalog, EmbeddingMatrix};
    use crate::index::{CosineIndex, IndexOptions};
    use crate::test_utils::{CountingLoader, MockImageEncoder, MockTextEncoder};
    use std::time::Duration;

    struct Counters {
        text: Arc<CountingLoader<dyn TextEncoder>>,
        image: Arc<CountingLoader<dyn ImageEncoder>>,
        index: Arc<CountingLoader<dyn VectorIndex>>,
    }

    fn corpus() -> Corpus {
        let catalog = CorpusCatalog::from_identifiers(
            vec!["a.jpg".into(), "b.jpg".into(), "c.jpg".into()],
            "/images",
        );
        let matrix = EmbeddingMatrix::from_parts(3, 2, vec![1.0, 0.0, 0.0, 1.0, 0.7, 0.7]).unwrap();
        Corpus::new(catalog, matrix)
    }

    fn bootstrap_with(text_dim: usize, fail_index: bool) -> (Bootstrap, Counters) {
        let corpus = corpus();
        let delay = Duration::from_millis(30);

        let text: Arc<dyn TextEncoder> = Arc::new(MockTextEncoder::new(text_dim));
        let image: Arc<dyn ImageEncoder> = Arc::new(MockImageEncoder::new(vec![1.0, 0.0]));
        let index: Arc<dyn VectorIndex> = Arc::new(
            CosineIndex::from_matrix(&corpus.matrix, IndexOptions::exact()).unwrap(),
        );

        let counters = Counters {
            text: Arc::new(CountingLoader::new(text, delay)),
            image: Arc::new(CountingLoader::new(image, delay)),
            index: Arc::new(if fail_index {
                CountingLoader::failing(LoadError::Index("disk on fire".into()))
            } else {
                CountingLoader::new(index, delay)
            }),
        };

        let loaders = Loaders {
            text: counters.text.clone(),
            image: counters.image.clone(),
            index: counters.index.clone(),
        };
        (Bootstrap::new(corpus, loaders), counters)
    }

    #[tokio::test]
    async fn test_ready_to_show_before_start() {
        let (bootstrap, _) = bootstrap_with(2, false);
        let snapshot = bootstrap.readiness().snapshot();
        assert!(snapshot.ready_to_show);
        assert!(!snapshot.ready_to_search);
        assert!(bootstrap.resources().is_none());
        assert!(bootstrap.outcome().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_runs_load_each_resource_once() {
        let (bootstrap, counters) = bootstrap_with(2, false);

        let a = tokio::spawn({
            let b = bootstrap.clone();
            async move { b.run().await }
        });
        let b = tokio::spawn({
            let b = bootstrap.clone();
            async move { b.run().await }
        });
        assert!(a.await.unwrap().is_ok());
        assert!(b.await.unwrap().is_ok());
        assert!(bootstrap.run().await.is_ok());

        assert_eq!(counters.text.call_count(), 1);
        assert_eq!(counters.image.call_count(), 1);
        assert_eq!(counters.index.call_count(), 1);

        let snapshot = bootstrap.readiness().snapshot();
        assert!(snapshot.ready_to_show && snapshot.ready_to_search);
        assert!(bootstrap.resources().is_some());
        assert!(matches!(bootstrap.outcome(), Some(Ok(()))));
    }

    #[tokio::test]
    async fn test_failure_keeps_not_ready_and_never_retries() {
        let (bootstrap, counters) = bootstrap_with(2, true);

        let err = bootstrap.run().await.unwrap_err();
        assert!(matches!(&err, BootstrapError::Load(errors) if errors.len() == 1));
        assert!(!bootstrap.readiness().ready_to_search());
        assert!(bootstrap.resources().is_none());

        // Same attempt, loaders untouched
        assert!(bootstrap.run().await.is_err());
        assert_eq!(counters.index.call_count(), 1);
        assert_eq!(counters.text.call_count(), 1);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_fails_bootstrap() {
        let (bootstrap, _) = bootstrap_with(3, false);

        match bootstrap.run().await {
            Err(BootstrapError::Load(errors)) => {
                assert_eq!(errors.len(), 1);
                assert!(matches!(
                    errors[0],
                    LoadError::Encoder {
                        kind: EncoderKind::Text,
                        ..
                    }
                ));
            }
            other => panic!("expected load failure, got {:?}", other),
        }
        assert!(!bootstrap.readiness().ready_to_search());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_waiter_wakes_when_ready() {
        let (bootstrap, _) = bootstrap_with(2, false);

        let waiter = tokio::spawn({
            let b = bootstrap.clone();
            async move {
                b.readiness().wait_for_search().await;
                // Handles are visible by the time the flag is observed
                b.resources().is_some()
            }
        });

        bootstrap.start();
        let saw_resources = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(saw_resources);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_flags_never_observed_out_of_order() {
        let (bootstrap, _) = bootstrap_with(2, false);

        let observer = tokio::spawn({
            let b = bootstrap.clone();
            async move {
                loop {
                    let s = b.readiness().snapshot();
                    assert!(!s.ready_to_search || s.ready_to_show);
                    if s.ready_to_search {
                        break;
                    }
                    tokio::task::yield_now().await;
                }
            }
        });

        bootstrap.run().await.unwrap();
        observer.await.unwrap();
    }
}
