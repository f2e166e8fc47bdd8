//! Loopback upload server for integration tests
//!
//! Speaks the server side of the upload socket. The reply to each upload is
//! chosen from the uploaded content:
//!
//! | content prefix     | reply                                          |
//! |--------------------|------------------------------------------------|
//! | `score:N`          | result with OPS combined score `N`             |
//! | `error:MSG`        | error tied to the upload                       |
//! | `error-anon:MSG`   | error with an empty id                         |
//! | `garbage`          | a byte that is not MessagePack                 |
//! | `chatter:N`        | text and ping frames, then `score:N`           |
//! | `slow:N`           | `score:N` after [`SLOW_REPLY`]                 |
//! | `hold`             | nothing                                        |
//! | `close`            | close frame                                    |
//! | anything else      | result with OPS combined score `100`           |
//!
//! Replies are encoded with named fields, so ids travel as integer arrays.
//! [`MockOptions`] switches on reordering, a peer that never reads and a
//! connection dropped mid-batch.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use cambia_common::config::ClientConfig;
use cambia_common::events::{SessionOutcome, StoreEvent};
use cambia_upload::protocol::UPLOAD_PATH;
use cambia_upload::{BatchController, BatchHandle};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

pub const SLOW_REPLY: Duration = Duration::from_millis(300);

/// Upper bound for any batch in these tests
pub const BATCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct MockResponse {
    id: Vec<u8>,
    parsed: MockParsed,
    evaluation_combined: Vec<MockEvaluation>,
}

#[derive(Serialize)]
struct MockParsed {
    ripper: String,
    ripper_version: String,
}

#[derive(Serialize)]
struct MockEvaluation {
    evaluator: String,
    combined_score: String,
    evaluations: Vec<String>,
}

#[derive(Serialize)]
struct MockError {
    id: Vec<u8>,
    message: String,
}

/// Server behaviour switches
#[derive(Debug, Clone, Default)]
pub struct MockOptions {
    /// Hold replies until this many uploads arrived, then send them in
    /// reverse order
    pub reverse_after: Option<usize>,
    /// Upgrade the connection but never read from it
    pub never_read: bool,
    /// Drop the connection without a close handshake once this many
    /// uploads arrived
    pub drop_after: Option<usize>,
}

#[derive(Clone)]
struct MockState {
    options: MockOptions,
    received: Arc<Mutex<Vec<Vec<u8>>>>,
    connections: Arc<AtomicUsize>,
}

/// Running loopback server
pub struct MockServer {
    addr: SocketAddr,
    state: MockState,
}

impl MockServer {
    pub async fn start() -> Self {
        Self::start_with(MockOptions::default()).await
    }

    pub async fn start_with(options: MockOptions) -> Self {
        let state = MockState {
            options,
            received: Arc::new(Mutex::new(Vec::new())),
            connections: Arc::new(AtomicUsize::new(0)),
        };
        let app = Router::new()
            .route(UPLOAD_PATH, get(upgrade))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Upload frames received so far, in arrival order
    pub fn received(&self) -> Vec<Vec<u8>> {
        self.state.received.lock().unwrap().clone()
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn controller(&self) -> BatchController {
        BatchController::new(&client_config(&self.base_url())).unwrap()
    }
}

pub fn client_config(server_url: &str) -> ClientConfig {
    ClientConfig {
        server_url: server_url.to_string(),
        log_level: "debug".to_string(),
        event_capacity: 1024,
    }
}

/// Wait for a batch with a timeout
pub async fn finish(handle: BatchHandle) -> SessionOutcome {
    tokio::time::timeout(BATCH_TIMEOUT, handle.wait())
        .await
        .expect("batch did not finish in time")
}

/// Collect events up to and including the first `SessionClosed`
pub async fn collect_until_closed(rx: &mut broadcast::Receiver<StoreEvent>) -> Vec<StoreEvent> {
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(BATCH_TIMEOUT, rx.recv())
            .await
            .expect("no SessionClosed event")
            .unwrap();
        let closed = matches!(event, StoreEvent::SessionClosed { .. });
        events.push(event);
        if closed {
            return events;
        }
    }
}

/// Content of exactly `len` bytes starting with `prefix`
pub fn padded(prefix: &str, len: usize) -> Vec<u8> {
    let mut content = prefix.as_bytes().to_vec();
    content.push(b'\n');
    content.resize(len, b' ');
    content
}

async fn upgrade(ws: WebSocketUpgrade, State(state): State<MockState>) -> Response {
    ws.max_message_size(16 * 1024 * 1024)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: MockState) {
    state.connections.fetch_add(1, Ordering::SeqCst);
    if state.options.never_read {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        return;
    }
    let mut held: Vec<Vec<Message>> = Vec::new();

    while let Some(Ok(message)) = socket.recv().await {
        let frame = match message {
            Message::Binary(frame) => frame,
            Message::Close(_) => break,
            _ => continue,
        };
        let count = {
            let mut received = state.received.lock().unwrap();
            received.push(frame.clone());
            received.len()
        };
        if state.options.drop_after == Some(count) {
            return;
        }

        if frame.len() < 8 {
            let reply = error_reply(Vec::new(), "Upload frame too short");
            if socket.send(reply).await.is_err() {
                return;
            }
            continue;
        }
        let (id, content) = frame.split_at(8);
        let replies = replies_for(id, content).await;

        match state.options.reverse_after {
            Some(expected) => {
                held.push(replies);
                if held.len() == expected {
                    for message in held.drain(..).rev().flatten() {
                        if socket.send(message).await.is_err() {
                            return;
                        }
                    }
                }
            }
            None => {
                for message in replies {
                    if socket.send(message).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

async fn replies_for(id: &[u8], content: &[u8]) -> Vec<Message> {
    let text = String::from_utf8_lossy(content);
    let first_line = text.lines().next().unwrap_or("").trim_end();

    if let Some(score) = first_line.strip_prefix("score:") {
        vec![result_reply(id.to_vec(), score)]
    } else if let Some(message) = first_line.strip_prefix("error-anon:") {
        vec![error_reply(Vec::new(), message)]
    } else if let Some(message) = first_line.strip_prefix("error:") {
        vec![error_reply(id.to_vec(), message)]
    } else if first_line == "garbage" {
        vec![Message::Binary(vec![0xc1])]
    } else if let Some(score) = first_line.strip_prefix("chatter:") {
        vec![
            Message::Text("evaluating".to_string()),
            Message::Ping(b"still here".to_vec()),
            result_reply(id.to_vec(), score),
        ]
    } else if let Some(score) = first_line.strip_prefix("slow:") {
        tokio::time::sleep(SLOW_REPLY).await;
        vec![result_reply(id.to_vec(), score)]
    } else if first_line == "hold" {
        Vec::new()
    } else if first_line == "close" {
        vec![Message::Close(None)]
    } else {
        vec![result_reply(id.to_vec(), "100")]
    }
}

fn result_reply(id: Vec<u8>, ops_score: &str) -> Message {
    let response = MockResponse {
        id,
        parsed: MockParsed {
            ripper: "Exact Audio Copy".to_string(),
            ripper_version: "1.6".to_string(),
        },
        evaluation_combined: vec![
            MockEvaluation {
                evaluator: "Cambia".to_string(),
                combined_score: "-1000".to_string(),
                evaluations: Vec::new(),
            },
            MockEvaluation {
                evaluator: "OPS".to_string(),
                combined_score: ops_score.to_string(),
                evaluations: Vec::new(),
            },
        ],
    };
    Message::Binary(rmp_serde::to_vec_named(&response).unwrap())
}

fn error_reply(id: Vec<u8>, message: &str) -> Message {
    let error = MockError {
        id,
        message: message.to_string(),
    };
    Message::Binary(rmp_serde::to_vec_named(&error).unwrap())
}
