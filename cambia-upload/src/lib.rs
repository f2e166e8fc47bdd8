//! cambia-upload library interface
//!
//! Batch upload of rip logs to a Cambia server over a single WebSocket,
//! with replies correlated back to files by content fingerprint.
//!
//! The [`BatchController`] is the entry point: it starts batches, cancels
//! superseded ones and exposes the [`ResultStore`] that consumers observe.

pub mod batch;
pub mod correlation;
pub mod error;
pub mod files;
pub mod fingerprint;
pub mod protocol;
pub mod score;
pub mod store;
pub mod transport;

pub use crate::batch::{BatchController, BatchHandle};
pub use crate::error::{UploadError, UploadResult};
pub use crate::files::UploadFile;
pub use crate::fingerprint::Fingerprint;
pub use crate::store::{ResultStore, RowContent, StoreSnapshot, UploadRow};
