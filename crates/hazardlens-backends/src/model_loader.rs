//! Model artifact sources and the per-backend load guard

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt, Shared};
use hazardlens_core::BackendError;
use hf_hub::{api::sync::Api, Repo, RepoType};
use serde::{Deserialize, Serialize};
use parking_lot::Mutex;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Source location for model weights
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModelSource {
    /// Load from local file system
    Local { path: PathBuf },

    /// Download from Hugging Face Hub
    HuggingFace {
        repo_id: String,
        filename: String,
        #[serde(default)]
        revision: Option<String>,
    },
}

impl ModelSource {
    /// Read the raw artifact bytes
    pub async fn fetch(&self) -> Result<Bytes, BackendError> {
        match self {
            Self::Local { path } => {
                let bytes = tokio::fs::read(path).await.map_err(|e| {
                    BackendError::ModelLoadFailure(format!("cannot read {}: {e}", path.display()))
                })?;
                Ok(Bytes::from(bytes))
            }
            Self::HuggingFace {
                repo_id,
                filename,
                revision,
            } => {
                let repo_id = repo_id.clone();
                let filename = filename.clone();
                let revision = revision.clone().unwrap_or_else(|| "main".to_string());

                let path = tokio::task::spawn_blocking(move || {
                    let api = Api::new().map_err(|e| {
                        BackendError::ModelLoadFailure(format!("failed to initialize HF API: {e}"))
                    })?;
                    let repo = api.repo(Repo::with_revision(repo_id, RepoType::Model, revision));
                    repo.get(&filename).map_err(|e| {
                        BackendError::ModelLoadFailure(format!("failed to download {filename}: {e}"))
                    })
                })
                .await
                .map_err(|e| BackendError::ModelLoadFailure(format!("download task failed: {e}")))??;

                let bytes = tokio::fs::read(&path).await.map_err(|e| {
                    BackendError::ModelLoadFailure(format!("cannot read {}: {e}", path.display()))
                })?;
                Ok(Bytes::from(bytes))
            }
        }
    }
}

/// Lazily loaded, cached model with at most one load in flight.
///
/// The load runs as its own task owned by the slot, so a caller that gives
/// up (deadline or cancellation) does not stop it: later callers await the
/// same in-flight load, and the slot reports loading until it finishes.
pub struct ModelSlot<T: ?Sized, E = BackendError> {
    state: Arc<Mutex<SlotState<T, E>>>,
}

type InFlight<T, E> = Shared<BoxFuture<'static, Result<Arc<T>, E>>>;

enum SlotState<T: ?Sized, E> {
    Empty,
    Loading(InFlight<T, E>),
    Ready(Arc<T>),
}

impl<T, E> ModelSlot<T, E>
where
    T: ?Sized + Send + Sync + 'static,
    E: From<BackendError> + Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SlotState::Empty)),
        }
    }

    /// Return the cached model, join the in-flight load, or start one with `load`
    pub async fn get_or_load<F, Fut>(&self, load: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<T>, E>> + Send + 'static,
    {
        let in_flight = {
            let mut state = self.state.lock();
            match &*state {
                SlotState::Ready(model) => return Ok(model.clone()),
                SlotState::Loading(in_flight) => {
                    debug!("Joining in-flight model load");
                    in_flight.clone()
                }
                SlotState::Empty => {
                    debug!("Loading model into slot");
                    let in_flight = self.spawn_load(load());
                    *state = SlotState::Loading(in_flight.clone());
                    in_flight
                }
            }
        };
        in_flight.await
    }

    fn spawn_load<Fut>(&self, load: Fut) -> InFlight<T, E>
    where
        Fut: Future<Output = Result<Arc<T>, E>> + Send + 'static,
    {
        let state = self.state.clone();
        let task = tokio::spawn(async move {
            let result = load.await;
            *state.lock() = match &result {
                Ok(model) => SlotState::Ready(model.clone()),
                Err(_) => SlotState::Empty,
            };
            result
        });

        async move {
            task.await.unwrap_or_else(|e| {
                Err(BackendError::ModelLoadFailure(format!("load task failed: {e}")).into())
            })
        }
        .boxed()
        .shared()
    }

    /// Whether a load is in flight
    pub fn is_loading(&self) -> bool {
        matches!(*self.state.lock(), SlotState::Loading(_))
    }

    /// Whether a model is cached
    pub fn is_loaded(&self) -> bool {
        matches!(*self.state.lock(), SlotState::Ready(_))
    }

    /// Drop the cached model; returns whether one was present.
    ///
    /// An in-flight load is left to finish.
    pub fn evict(&self) -> bool {
        let mut state = self.state.lock();
        let evicted = matches!(*state, SlotState::Ready(_));
        if evicted {
            *state = SlotState::Empty;
            info!("Evicted cached model");
        }
        evicted
    }
}

impl<T, E> Default for ModelSlot<T, E>
where
    T: ?Sized + Send + Sync + 'static,
    E: From<BackendError> + Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
