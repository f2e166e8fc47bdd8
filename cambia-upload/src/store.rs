//! Result store
//!
//! Holds the rows of the live batch, the aggregate counters and the
//! batch-wide error. Readers take consistent snapshots or subscribe to
//! [`StoreEvent`]s; only the batch controller and the transport session can
//! mutate it (the mutators are crate-private).
//!
//! Every mutation made on behalf of a session carries a [`SessionScope`].
//! The scope is checked under the write lock, so a cancelled or superseded
//! session can never touch the state of the batch that replaced it.

use crate::correlation::CorrelationIndex;
use crate::fingerprint::Fingerprint;
use crate::protocol::{CambiaError, CambiaResponse};
use crate::score::{classify_response, ScoreClass};
use cambia_common::events::{Counters, EventBus, RowStatus, SessionOutcome, StoreEvent};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Decoded payload attached to a finished row
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "payload", rename_all = "lowercase")]
pub enum RowContent {
    Result(CambiaResponse),
    Error(CambiaError),
}

/// One file's tracked state within a batch
#[derive(Debug, Clone, Serialize)]
pub struct UploadRow {
    pub filename: String,
    pub status: RowStatus,
    pub content: Option<RowContent>,
}

impl UploadRow {
    fn queued(filename: String) -> Self {
        Self {
            filename,
            status: RowStatus::Queued,
            content: None,
        }
    }
}

/// Consistent copy of the store
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreSnapshot {
    pub batch_id: Option<Uuid>,
    pub rows: Vec<UploadRow>,
    pub counters: Counters,
    /// Batch-wide transport failure
    pub session_error: Option<String>,
    /// Error replies that were not tied to any row
    pub unattributed_errors: Vec<CambiaError>,
}

/// Identity of the session allowed to mutate the live batch
#[derive(Debug, Clone)]
pub(crate) struct SessionScope {
    batch_id: Uuid,
    cancel: CancellationToken,
}

impl SessionScope {
    pub(crate) fn new(batch_id: Uuid, cancel: CancellationToken) -> Self {
        Self { batch_id, cancel }
    }

    pub(crate) fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[derive(Debug, Default)]
struct StoreState {
    batch_id: Option<Uuid>,
    rows: Vec<UploadRow>,
    counters: Counters,
    index: CorrelationIndex,
    session_error: Option<String>,
    unattributed_errors: Vec<CambiaError>,
}

impl StoreState {
    fn admits(&self, scope: &SessionScope) -> bool {
        !scope.is_cancelled() && self.batch_id == Some(scope.batch_id)
    }

    fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            batch_id: self.batch_id,
            rows: self.rows.clone(),
            counters: self.counters,
            session_error: self.session_error.clone(),
            unattributed_errors: self.unattributed_errors.clone(),
        }
    }
}

/// Observable state of the live batch
#[derive(Clone)]
pub struct ResultStore {
    state: Arc<RwLock<StoreState>>,
    events: EventBus,
}

impl ResultStore {
    pub fn new(event_capacity: usize) -> Self {
        Self::with_event_bus(EventBus::new(event_capacity))
    }

    pub fn with_event_bus(events: EventBus) -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState::default())),
            events,
        }
    }

    /// Subscribe to future store events
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        self.state.read().await.snapshot()
    }

    pub async fn counters(&self) -> Counters {
        self.state.read().await.counters
    }

    pub async fn batch_id(&self) -> Option<Uuid> {
        self.state.read().await.batch_id
    }

    // ========================================================================
    // Mutators (batch controller and transport session only)
    // ========================================================================

    /// Replace the row set with one queued row per filename
    ///
    /// Zeroes the counters, clears the correlation index and the
    /// batch-wide errors.
    pub(crate) async fn start_batch(&self, batch_id: Uuid, filenames: Vec<String>) {
        let mut state = self.state.write().await;
        let file_count = filenames.len();

        state.batch_id = Some(batch_id);
        state.rows = filenames.into_iter().map(UploadRow::queued).collect();
        state.counters = Counters::default();
        state.index.reset();
        state.session_error = None;
        state.unattributed_errors.clear();

        tracing::info!(batch_id = %batch_id, file_count, "Batch started");
        self.events.emit_lossy(StoreEvent::BatchStarted {
            batch_id,
            file_count,
            timestamp: cambia_common::time::now(),
        });
    }

    /// Record the fingerprint of `row`
    pub(crate) async fn record(&self, scope: &SessionScope, fingerprint: Fingerprint, row: usize) -> bool {
        let mut state = self.state.write().await;
        if !state.admits(scope) {
            return false;
        }
        if row >= state.rows.len() {
            tracing::error!(row, rows = state.rows.len(), "Row out of range, not recorded");
            return false;
        }
        state.index.record(fingerprint, row)
    }

    /// Mark `row` as sent unless a reply already finished it
    pub(crate) async fn mark_sent(&self, scope: &SessionScope, row: usize) -> bool {
        let mut state = self.state.write().await;
        if !state.admits(scope) {
            return false;
        }
        let Some(entry) = state.rows.get_mut(row) else {
            return false;
        };
        if entry.status != RowStatus::Queued {
            return false;
        }
        entry.status = RowStatus::Sent;
        let filename = entry.filename.clone();
        self.emit_row(scope.batch_id, row, filename, RowStatus::Sent);
        true
    }

    /// Apply a result reply to every row sharing `fingerprint`
    ///
    /// Counters are updated even when no row matches.
    pub(crate) async fn apply_result(
        &self,
        scope: &SessionScope,
        fingerprint: Fingerprint,
        response: CambiaResponse,
    ) -> bool {
        let mut state = self.state.write().await;
        if !state.admits(scope) {
            tracing::debug!(fingerprint = %fingerprint, "Dropping result for inactive session");
            return false;
        }

        let class = classify_response(&response);
        let rows = state.index.lookup(&fingerprint).map(<[usize]>::to_vec);
        match rows {
            Some(rows) => {
                for row in rows {
                    self.finish_row(
                        &mut state,
                        scope.batch_id,
                        row,
                        RowStatus::Processed,
                        RowContent::Result(response.clone()),
                    );
                }
            }
            None => self.unresolved(scope.batch_id, &fingerprint),
        }

        match class {
            ScoreClass::Bad => state.counters.bad += 1,
            ScoreClass::Warning => state.counters.warning += 1,
            ScoreClass::Perfect => state.counters.perfect += 1,
            ScoreClass::Unknown => state.counters.unknown += 1,
        }
        state.counters.processed += 1;
        tracing::debug!(fingerprint = %fingerprint, class = ?class, "Result applied");
        self.emit_counters(scope.batch_id, state.counters);
        true
    }

    /// Apply an error reply (server or local) to every row sharing
    /// `fingerprint`
    ///
    /// An error without a fingerprint is kept in the unattributed list.
    pub(crate) async fn apply_error(
        &self,
        scope: &SessionScope,
        fingerprint: Option<Fingerprint>,
        error: CambiaError,
    ) -> bool {
        let mut state = self.state.write().await;
        if !state.admits(scope) {
            tracing::debug!("Dropping error for inactive session");
            return false;
        }

        match fingerprint {
            Some(fingerprint) => {
                let rows = state.index.lookup(&fingerprint).map(<[usize]>::to_vec);
                match rows {
                    Some(rows) => {
                        for row in rows {
                            self.finish_row(
                                &mut state,
                                scope.batch_id,
                                row,
                                RowStatus::Errored,
                                RowContent::Error(error.clone()),
                            );
                        }
                    }
                    None => self.unresolved(scope.batch_id, &fingerprint),
                }
            }
            None => {
                tracing::warn!(message = %error.message, "Error reply not tied to any file");
                state.unattributed_errors.push(error);
            }
        }

        state.counters.unknown += 1;
        state.counters.processed += 1;
        self.emit_counters(scope.batch_id, state.counters);
        true
    }

    /// Count a reply that failed to decode
    pub(crate) async fn apply_malformed(&self, scope: &SessionScope) -> bool {
        let mut state = self.state.write().await;
        if !state.admits(scope) {
            return false;
        }
        state.counters.unknown += 1;
        state.counters.processed += 1;
        self.emit_counters(scope.batch_id, state.counters);
        true
    }

    /// Fail a single row whose file could not be read
    pub(crate) async fn apply_local_error(&self, scope: &SessionScope, row: usize, message: String) -> bool {
        let mut state = self.state.write().await;
        if !state.admits(scope) || row >= state.rows.len() {
            return false;
        }
        self.finish_row(
            &mut state,
            scope.batch_id,
            row,
            RowStatus::Errored,
            RowContent::Error(CambiaError::anonymous(&message)),
        );
        state.counters.unknown += 1;
        state.counters.processed += 1;
        self.emit_counters(scope.batch_id, state.counters);
        true
    }

    /// Set the batch-wide error
    pub(crate) async fn fail_session(&self, scope: &SessionScope, message: String) -> bool {
        let mut state = self.state.write().await;
        if !state.admits(scope) {
            return false;
        }
        tracing::error!(batch_id = %scope.batch_id, message = %message, "Session failed");
        state.session_error = Some(message.clone());
        self.events.emit_lossy(StoreEvent::SessionFailed {
            batch_id: scope.batch_id,
            message,
            timestamp: cambia_common::time::now(),
        });
        true
    }

    /// Announce the end of a session
    ///
    /// Only checks the batch id: a session cancelled without a successor
    /// still reports that it closed.
    pub(crate) async fn close_session(&self, scope: &SessionScope, outcome: SessionOutcome) {
        let state = self.state.read().await;
        if state.batch_id != Some(scope.batch_id) {
            return;
        }
        self.events.emit_lossy(StoreEvent::SessionClosed {
            batch_id: scope.batch_id,
            outcome,
            timestamp: cambia_common::time::now(),
        });
    }

    /// Whether one reply per row of the scope's batch has been handled
    pub(crate) async fn is_complete(&self, scope: &SessionScope) -> bool {
        let state = self.state.read().await;
        state.batch_id == Some(scope.batch_id) && state.counters.processed >= state.rows.len()
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn finish_row(
        &self,
        state: &mut StoreState,
        batch_id: Uuid,
        row: usize,
        status: RowStatus,
        content: RowContent,
    ) {
        let Some(entry) = state.rows.get_mut(row) else {
            tracing::error!(row, "Correlated row out of range");
            return;
        };
        entry.status = status;
        entry.content = Some(content);
        let filename = entry.filename.clone();
        self.emit_row(batch_id, row, filename, status);
    }

    fn unresolved(&self, batch_id: Uuid, fingerprint: &Fingerprint) {
        tracing::warn!(fingerprint = %fingerprint, "Reply matches no known file");
        self.events.emit_lossy(StoreEvent::ReplyUnresolved {
            batch_id,
            fingerprint: fingerprint.to_hex(),
            timestamp: cambia_common::time::now(),
        });
    }

    fn emit_row(&self, batch_id: Uuid, row: usize, filename: String, status: RowStatus) {
        self.events.emit_lossy(StoreEvent::RowUpdated {
            batch_id,
            row,
            filename,
            status,
            timestamp: cambia_common::time::now(),
        });
    }

    fn emit_counters(&self, batch_id: Uuid, counters: Counters) {
        self.events.emit_lossy(StoreEvent::CountersChanged {
            batch_id,
            counters,
            timestamp: cambia_common::time::now(),
        });
    }
}
