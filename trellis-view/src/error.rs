//! Error types for the view binding

use thiserror::Error;
use trellis_sync::SyncError;

#[derive(Error, Debug)]
pub enum BindingError {
    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("No {kind} {id} in the rendered tree")]
    UnknownNode { kind: &'static str, id: i64 },

    #[error("Position {index} is out of range for {len} nodes")]
    OutOfRange { index: usize, len: usize },
}
