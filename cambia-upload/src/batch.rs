//! Batch controller
//!
//! Owns the [`ResultStore`] and at most one live transport session. Starting
//! a new batch cancels the previous session before the store is reset, so
//! replies still in flight for the old batch are discarded.

use crate::error::UploadResult;
use crate::files::UploadFile;
use crate::protocol::endpoint_url;
use crate::store::{ResultStore, SessionScope};
use crate::transport::TransportSession;
use cambia_common::config::ClientConfig;
use cambia_common::events::SessionOutcome;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

struct LiveBatch {
    batch_id: Uuid,
    cancel: CancellationToken,
}

/// Starts and supersedes upload batches
pub struct BatchController {
    store: ResultStore,
    endpoint: Url,
    live: Option<LiveBatch>,
}

impl BatchController {
    /// Controller for the configured server
    pub fn new(config: &ClientConfig) -> UploadResult<Self> {
        let endpoint = endpoint_url(&config.server_url)?;
        Ok(Self::with_endpoint(
            endpoint,
            ResultStore::new(config.event_capacity),
        ))
    }

    /// Controller for an already resolved socket endpoint
    pub fn with_endpoint(endpoint: Url, store: ResultStore) -> Self {
        Self {
            store,
            endpoint,
            live: None,
        }
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Id of the most recently started batch whose session was not cancelled
    pub fn live_batch_id(&self) -> Option<Uuid> {
        self.live
            .as_ref()
            .filter(|live| !live.cancel.is_cancelled())
            .map(|live| live.batch_id)
    }

    /// Cancel the live session, if any
    ///
    /// The store keeps whatever the session produced so far.
    pub fn cancel(&mut self) -> bool {
        match self.live.take() {
            Some(live) => {
                info!(batch_id = %live.batch_id, "Cancelling batch");
                live.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Start a batch for `files`, superseding any live batch
    ///
    /// Rows are created in input order; duplicate content keeps one row per
    /// file.
    pub async fn start_new_batch(&mut self, files: Vec<UploadFile>) -> BatchHandle {
        self.cancel();

        let batch_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let filenames = files.iter().map(|f| f.name().to_string()).collect();
        self.store.start_batch(batch_id, filenames).await;

        let scope = SessionScope::new(batch_id, cancel.clone());
        let session =
            TransportSession::new(scope, self.endpoint.clone(), files, self.store.clone());
        let task = tokio::spawn(session.run());

        self.live = Some(LiveBatch {
            batch_id,
            cancel: cancel.clone(),
        });

        BatchHandle {
            batch_id,
            cancel,
            task,
        }
    }
}

impl Drop for BatchController {
    fn drop(&mut self) {
        if let Some(live) = self.live.take() {
            live.cancel.cancel();
        }
    }
}

/// Handle to a running batch session
pub struct BatchHandle {
    batch_id: Uuid,
    cancel: CancellationToken,
    task: JoinHandle<SessionOutcome>,
}

impl BatchHandle {
    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    /// Token that cancels this batch's session
    pub fn canceller(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the session to end
    pub async fn wait(self) -> SessionOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(batch_id = %self.batch_id, error = %e, "Session task did not finish");
                SessionOutcome::Failed {
                    message: format!("session task failed: {}", e),
                }
            }
        }
    }
}
