use std::path::PathBuf;

use thiserror::Error;
use trellis_types::ObjectId;

/// Errors surfaced by [`ObjectContainer`](crate::ObjectContainer).
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("container is read-only")]
    ReadOnly,

    #[error("container is closed")]
    Closed,

    #[error("object not found: {0}")]
    NotFound(ObjectId),

    #[error("field not indexed: {0}")]
    NotIndexed(String),

    #[error(transparent)]
    Store(#[from] trellis_store::StoreError),

    #[error(transparent)]
    Ref(#[from] trellis_refs::RefError),

    #[error(transparent)]
    Cascade(#[from] trellis_cascade::CascadeError),

    #[error(transparent)]
    Commit(#[from] trellis_commit::CommitError),

    #[error(transparent)]
    Convert(#[from] trellis_convert::ConvertError),

    #[error(transparent)]
    Peer(#[from] trellis_peer::PeerError),
}

impl ContainerError {
    /// Returns `true` for a commit vetoed by a listener; the transaction is
    /// intact and may be fixed and retried.
    pub fn is_veto(&self) -> bool {
        matches!(self, Self::Commit(e) if e.is_veto())
    }
}

pub type ContainerResult<T> = Result<T, ContainerError>;
