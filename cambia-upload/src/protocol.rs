//! Wire protocol for the multi-file upload socket
//!
//! Client to server: one binary message per file,
//! `[8-byte fingerprint][file content]`.
//!
//! Server to client: one MessagePack value per binary message. The value is
//! decoded without a schema and classified by shape:
//! - **Result**: non-empty `id`, a `parsed` marker and `evaluation_combined`
//! - **Error**: a `message` string and an `id` that may be empty
//!
//! The two shapes are mutually exclusive: a value carrying both `parsed`
//! and `message` is rejected as malformed.

use crate::error::{UploadError, UploadResult};
use crate::fingerprint::{Fingerprint, FINGERPRINT_LEN};
use rmpv::Value;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use url::Url;

/// Socket path appended to the server base URL
pub const UPLOAD_PATH: &str = "/ws/v1/upload_multi";

/// Largest file content accepted for upload (3 MiB)
pub const MAX_UPLOAD_BYTES: usize = 3_145_728;

/// Message of the local error synthesized for oversized files
pub const OVERSIZE_MESSAGE: &str = "Files over 3 MiB not allowed.";

/// Batch-wide message for connection failures
pub const CONNECTION_FAILED_MESSAGE: &str = "Connection to the API failed.";

/// Socket endpoint for a server base URL
///
/// The socket scheme mirrors the base scheme (`http` → `ws`,
/// `https` → `wss`); any base path is kept as a prefix.
pub fn endpoint_url(base: &str) -> UploadResult<Url> {
    let mut url = Url::parse(base.trim())
        .map_err(|e| UploadError::InvalidUrl(format!("{}: {}", base, e)))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(UploadError::InvalidUrl(format!(
                "unsupported scheme '{}' in {}",
                other, base
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| UploadError::InvalidUrl(format!("cannot use scheme {} for {}", scheme, base)))?;

    let path = format!("{}{}", url.path().trim_end_matches('/'), UPLOAD_PATH);
    url.set_path(&path);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// Build the upload frame for one file
pub fn encode_upload(fingerprint: &Fingerprint, content: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FINGERPRINT_LEN + content.len());
    frame.extend_from_slice(fingerprint.as_bytes());
    frame.extend_from_slice(content);
    frame
}

/// Split an upload frame into fingerprint and content
#[cfg(test)]
pub(crate) fn decode_upload(frame: &[u8]) -> UploadResult<(Fingerprint, &[u8])> {
    if frame.len() < FINGERPRINT_LEN {
        return Err(UploadError::InvalidFingerprint(format!(
            "upload frame is {} bytes, shorter than the fingerprint",
            frame.len()
        )));
    }
    let (id, content) = frame.split_at(FINGERPRINT_LEN);
    Ok((Fingerprint::from_wire(id)?, content))
}

// ============================================================================
// Reply payloads
// ============================================================================

/// Output of one server-side evaluator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationCombined {
    #[serde(default)]
    pub evaluator: String,
    #[serde(default)]
    pub combined_score: String,
    #[serde(default)]
    pub evaluations: Vec<Value>,
}

/// Successfully parsed log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CambiaResponse {
    pub id: ByteBuf,
    pub parsed: Value,
    #[serde(default)]
    pub evaluation_combined: Vec<EvaluationCombined>,
}

impl CambiaResponse {
    /// Combined score reported by `evaluator`, if present
    pub fn combined_score(&self, evaluator: &str) -> Option<&str> {
        self.evaluation_combined
            .iter()
            .find(|e| e.evaluator == evaluator)
            .map(|e| e.combined_score.as_str())
    }
}

/// Error reported by the server or synthesized locally
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CambiaError {
    #[serde(default)]
    pub id: ByteBuf,
    pub message: String,
}

impl CambiaError {
    /// Error tied to a specific upload
    pub fn for_fingerprint(fingerprint: &Fingerprint, message: &str) -> Self {
        Self {
            id: ByteBuf::from(fingerprint.as_bytes().to_vec()),
            message: message.to_string(),
        }
    }

    /// Error not tied to any upload
    pub fn anonymous(message: &str) -> Self {
        Self {
            id: ByteBuf::new(),
            message: message.to_string(),
        }
    }
}

impl std::fmt::Display for CambiaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Shape of a decoded reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Result,
    Error,
}

/// Decoded server reply, classified once at decode time
#[derive(Debug, Clone)]
pub enum ServerReply {
    Result {
        fingerprint: Fingerprint,
        response: CambiaResponse,
    },
    Error {
        /// `None` when the error is not tied to an upload
        fingerprint: Option<Fingerprint>,
        error: CambiaError,
    },
}

impl ServerReply {
    /// Decode one binary message
    pub fn decode(bytes: &[u8]) -> UploadResult<Self> {
        let mut reader = bytes;
        let value = rmpv::decode::read_value(&mut reader)
            .map_err(|e| UploadError::MalformedReply(format!("not MessagePack: {}", e)))?;
        if !reader.is_empty() {
            return Err(UploadError::MalformedReply(format!(
                "{} trailing bytes after reply",
                reader.len()
            )));
        }

        match classify_reply(&value) {
            Some(ReplyKind::Result) => {
                let response: CambiaResponse = rmpv::ext::from_value(value)
                    .map_err(|e| UploadError::MalformedReply(format!("bad result: {}", e)))?;
                let fingerprint = Fingerprint::from_wire(&response.id)?;
                Ok(ServerReply::Result {
                    fingerprint,
                    response,
                })
            }
            Some(ReplyKind::Error) => {
                let error: CambiaError = rmpv::ext::from_value(value)
                    .map_err(|e| UploadError::MalformedReply(format!("bad error: {}", e)))?;
                let fingerprint = if error.id.is_empty() {
                    None
                } else {
                    Some(Fingerprint::from_wire(&error.id)?)
                };
                Ok(ServerReply::Error { fingerprint, error })
            }
            None => Err(UploadError::MalformedReply(
                "reply is neither a result nor an error".to_string(),
            )),
        }
    }
}

/// Decide the reply shape by field presence
pub fn classify_reply(value: &Value) -> Option<ReplyKind> {
    let map = value.as_map()?;
    let has_message = field(map, "message").map_or(false, |v| v.is_str());
    let has_parsed = field(map, "parsed").map_or(false, |v| !v.is_nil());
    let has_id = field(map, "id").map_or(false, id_is_non_empty);

    match (has_id && has_parsed, has_message) {
        (true, false) => Some(ReplyKind::Result),
        (false, true) if !has_parsed => Some(ReplyKind::Error),
        _ => None,
    }
}

fn field<'a>(map: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    map.iter()
        .find(|(k, _)| k.as_str() == Some(key))
        .map(|(_, v)| v)
}

// The server may send ids as `bin` or as an array of integers
fn id_is_non_empty(id: &Value) -> bool {
    match id {
        Value::Binary(bytes) => !bytes.is_empty(),
        Value::Array(items) => !items.is_empty(),
        _ => false,
    }
}
