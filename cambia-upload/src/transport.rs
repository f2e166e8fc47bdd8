//! Transport session
//!
//! One WebSocket connection per batch. Once the socket is open every file is
//! read, fingerprinted, recorded and sent by its own task; a single writer
//! task owns the socket sink. Replies are decoded in the session task and
//! routed into the [`ResultStore`].
//!
//! State machine: `Connecting → Open → Closing → Closed`, with cancellation
//! possible from any state.

use crate::files::UploadFile;
use crate::fingerprint::Fingerprint;
use crate::protocol::{
    encode_upload, CambiaError, ServerReply, CONNECTION_FAILED_MESSAGE, MAX_UPLOAD_BYTES,
    OVERSIZE_MESSAGE,
};
use crate::store::{ResultStore, SessionScope};
use cambia_common::events::SessionOutcome;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Bound on every shutdown step: queueing the close frame, writing it and
/// waiting for the writer
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Frames queued between the upload tasks and the writer
const OUTGOING_QUEUE: usize = 16;

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Frame waiting for the writer task
struct OutgoingFrame {
    /// Row to mark as sent once the frame is on the socket
    row: Option<usize>,
    message: Message,
}

/// Transport for one batch
pub struct TransportSession {
    scope: SessionScope,
    endpoint: Url,
    files: Vec<UploadFile>,
    store: ResultStore,
    state: SessionState,
}

impl TransportSession {
    pub(crate) fn new(
        scope: SessionScope,
        endpoint: Url,
        files: Vec<UploadFile>,
        store: ResultStore,
    ) -> Self {
        Self {
            scope,
            endpoint,
            files,
            store,
            state: SessionState::Connecting,
        }
    }

    /// Drive the session to completion
    pub async fn run(mut self) -> SessionOutcome {
        let started = cambia_common::time::now();
        let outcome = self.drive().await;
        self.transition_to(SessionState::Closed);
        info!(
            batch_id = %self.scope.batch_id(),
            outcome = %outcome,
            elapsed_ms = cambia_common::time::elapsed_ms(started),
            "Transport session ended"
        );
        self.store.close_session(&self.scope, outcome.clone()).await;
        outcome
    }

    fn transition_to(&mut self, next: SessionState) {
        debug!(
            batch_id = %self.scope.batch_id(),
            from = ?self.state,
            to = ?next,
            "Session state transition"
        );
        self.state = next;
    }

    async fn drive(&mut self) -> SessionOutcome {
        if self.files.is_empty() {
            return SessionOutcome::Completed;
        }

        let token = self.scope.token().clone();
        info!(
            batch_id = %self.scope.batch_id(),
            endpoint = %self.endpoint,
            files = self.files.len(),
            "Connecting upload socket"
        );

        let connected = tokio::select! {
            _ = token.cancelled() => return SessionOutcome::Canceled,
            result = connect_async(self.endpoint.as_str()) => result,
        };
        let socket = match connected {
            Ok((socket, _response)) => socket,
            Err(e) => {
                let message = format!("{} ({})", CONNECTION_FAILED_MESSAGE, e);
                self.store.fail_session(&self.scope, message.clone()).await;
                return SessionOutcome::Failed { message };
            }
        };
        self.transition_to(SessionState::Open);

        let (sink, mut stream) = socket.split();
        let (outgoing, queued) = mpsc::channel(OUTGOING_QUEUE);
        let mut writer = tokio::spawn(write_frames(
            sink,
            queued,
            self.store.clone(),
            self.scope.clone(),
        ));
        let mut writer_done = false;

        let mut uploads = JoinSet::new();
        for (row, file) in self.files.drain(..).enumerate() {
            uploads.spawn(upload_file(
                row,
                file,
                self.store.clone(),
                self.scope.clone(),
                outgoing.clone(),
            ));
        }

        let outcome = loop {
            if self.store.is_complete(&self.scope).await {
                break SessionOutcome::Completed;
            }

            tokio::select! {
                _ = token.cancelled() => break SessionOutcome::Canceled,

                Some(joined) = uploads.join_next(), if !uploads.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "Upload task did not finish");
                    }
                }

                written = &mut writer, if !writer_done => {
                    writer_done = true;
                    // The writer also stops when it abandons a send on cancellation
                    if token.is_cancelled() {
                        break SessionOutcome::Canceled;
                    }
                    let cause = match written {
                        Ok(Ok(())) => "socket writer stopped".to_string(),
                        Ok(Err(e)) => e,
                        Err(e) => e.to_string(),
                    };
                    let message = format!("{} ({})", CONNECTION_FAILED_MESSAGE, cause);
                    self.store.fail_session(&self.scope, message.clone()).await;
                    break SessionOutcome::Failed { message };
                }

                incoming = stream.next() => match incoming {
                    Some(Ok(Message::Binary(data))) => self.handle_reply(&data).await,
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "Server closed the upload socket");
                        break SessionOutcome::Closed;
                    }
                    Some(Ok(other)) => {
                        debug!(kind = ?message_kind(&other), "Ignoring non-binary message");
                    }
                    Some(Err(e)) => {
                        let message = format!("{} ({})", CONNECTION_FAILED_MESSAGE, e);
                        self.store.fail_session(&self.scope, message.clone()).await;
                        break SessionOutcome::Failed { message };
                    }
                    None => break SessionOutcome::Closed,
                },
            }
        };

        self.transition_to(SessionState::Closing);
        uploads.abort_all();

        if !writer_done {
            if matches!(outcome, SessionOutcome::Completed | SessionOutcome::Canceled) {
                let close = OutgoingFrame {
                    row: None,
                    message: Message::Close(None),
                };
                match tokio::time::timeout(CLOSE_TIMEOUT, outgoing.send(close)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => debug!("Writer already gone, close frame not sent"),
                    Err(_) => warn!("Outgoing queue stayed full, close frame not sent"),
                }
            }
            drop(outgoing);
            if tokio::time::timeout(CLOSE_TIMEOUT, &mut writer).await.is_err() {
                warn!("Socket writer did not finish in time, aborting");
                writer.abort();
            }
        }

        // Dropping both halves closes the connection
        drop(stream);
        outcome
    }

    async fn handle_reply(&self, data: &[u8]) {
        if self.scope.is_cancelled() {
            return;
        }
        match ServerReply::decode(data) {
            Ok(ServerReply::Result {
                fingerprint,
                response,
            }) => {
                self.store
                    .apply_result(&self.scope, fingerprint, response)
                    .await;
            }
            Ok(ServerReply::Error { fingerprint, error }) => {
                debug!(
                    fingerprint = ?fingerprint.map(|f| f.to_hex()),
                    message = %error.message,
                    "Server reported an error"
                );
                self.store.apply_error(&self.scope, fingerprint, error).await;
            }
            Err(e) => {
                warn!(error = %e, bytes = data.len(), "Could not decode server reply");
                self.store.apply_malformed(&self.scope).await;
            }
        }
    }
}

/// Read, fingerprint, record and queue one file
///
/// The fingerprint is recorded before the frame is queued so a reply can
/// never arrive ahead of its index entry.
async fn upload_file(
    row: usize,
    file: UploadFile,
    store: ResultStore,
    scope: SessionScope,
    outgoing: mpsc::Sender<OutgoingFrame>,
) {
    let read = tokio::select! {
        _ = scope.token().cancelled() => return,
        result = file.read() => result,
    };
    let content = match read {
        Ok(content) => content,
        Err(e) => {
            warn!(row, file = %file.name(), error = %e, "Could not read file");
            let message = format!("Could not read {}: {}", file.name(), e);
            store.apply_local_error(&scope, row, message).await;
            return;
        }
    };

    let (fingerprint, content) = match Fingerprint::compute(content).await {
        Ok(computed) => computed,
        Err(e) => {
            store.apply_local_error(&scope, row, e.to_string()).await;
            return;
        }
    };
    if !store.record(&scope, fingerprint, row).await {
        return;
    }

    if content.len() > MAX_UPLOAD_BYTES {
        info!(
            row,
            file = %file.name(),
            bytes = content.len(),
            "File exceeds upload limit, not sent"
        );
        let error = CambiaError::for_fingerprint(&fingerprint, OVERSIZE_MESSAGE);
        store.apply_error(&scope, Some(fingerprint), error).await;
        return;
    }

    debug!(row, file = %file.name(), fingerprint = %fingerprint, bytes = content.len(), "Queueing upload");
    let frame = OutgoingFrame {
        row: Some(row),
        message: Message::Binary(encode_upload(&fingerprint, &content)),
    };
    if outgoing.send(frame).await.is_err() {
        debug!(row, "Socket writer gone, upload dropped");
    }
}

/// Sole owner of the socket sink
///
/// After cancellation queued uploads are dropped and an upload stuck on a
/// peer that stopped reading is abandoned along with the sink. The close
/// frame is only written while the socket is still writable.
async fn write_frames(
    mut sink: WsSink,
    mut queued: mpsc::Receiver<OutgoingFrame>,
    store: ResultStore,
    scope: SessionScope,
) -> Result<(), String> {
    while let Some(frame) = queued.recv().await {
        if matches!(frame.message, Message::Close(_)) {
            match tokio::time::timeout(CLOSE_TIMEOUT, sink.send(frame.message)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(error = %e, "Close frame not written"),
                Err(_) => {
                    warn!("Close frame not written in time, dropping socket");
                    return Ok(());
                }
            }
            break;
        }
        if scope.is_cancelled() {
            continue;
        }

        tokio::select! {
            _ = scope.token().cancelled() => {
                debug!(row = ?frame.row, "Upload abandoned on cancellation");
                return Ok(());
            }
            sent = sink.send(frame.message) => sent.map_err(|e| e.to_string())?,
        }
        if let Some(row) = frame.row {
            store.mark_sent(&scope, row).await;
        }
    }
    match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
        Ok(Err(e)) => debug!(error = %e, "Closing socket sink"),
        Err(_) => debug!("Socket sink did not close in time"),
        Ok(Ok(())) => {}
    }
    Ok(())
}

fn message_kind(message: &Message) -> &'static str {
    match message {
        Message::Text(_) => "text",
        Message::Binary(_) => "binary",
        Message::Ping(_) => "ping",
        Message::Pong(_) => "pong",
        Message::Close(_) => "close",
        Message::Frame(_) => "frame",
    }
}
