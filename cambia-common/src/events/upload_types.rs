//! Upload row and counter type definitions
//!
//! Supporting types carried by store events and store snapshots.

use serde::{Deserialize, Serialize};

/// Lifecycle of one uploaded file within a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowStatus {
    /// Created at batch start, nothing sent yet
    Queued,
    /// Frame handed to the socket, awaiting a reply
    Sent,
    /// Result reply applied
    Processed,
    /// Error reply (server or local) applied
    Errored,
}

impl RowStatus {
    /// Whether a reply has already been applied to the row
    pub fn is_final(&self) -> bool {
        matches!(self, RowStatus::Processed | RowStatus::Errored)
    }
}

impl std::fmt::Display for RowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RowStatus::Queued => write!(f, "queued"),
            RowStatus::Sent => write!(f, "sent"),
            RowStatus::Processed => write!(f, "processed"),
            RowStatus::Errored => write!(f, "errored"),
        }
    }
}

/// Running totals for the live batch
///
/// All five counters are independent and never decrease within a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub processed: usize,
    pub perfect: usize,
    pub warning: usize,
    pub bad: usize,
    pub unknown: usize,
}

/// How a transport session ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SessionOutcome {
    /// Every file of the batch was accounted for
    Completed,
    /// The server closed the connection first
    Closed,
    /// Superseded by a newer batch or cancelled by the user
    Canceled,
    /// Connection-level failure
    Failed { message: String },
}

impl std::fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionOutcome::Completed => write!(f, "completed"),
            SessionOutcome::Closed => write!(f, "closed by server"),
            SessionOutcome::Canceled => write!(f, "canceled"),
            SessionOutcome::Failed { message } => write!(f, "failed: {}", message),
        }
    }
}
