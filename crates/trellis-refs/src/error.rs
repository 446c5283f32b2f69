use trellis_store::StoreError;
use trellis_types::ObjectId;

use crate::codec::CodecError;

/// Errors from reference and activation operations.
#[derive(Debug, thiserror::Error)]
pub enum RefError {
    /// The slot behind `id` could not be decoded.
    #[error("storage corruption in {id}: {reason}")]
    StorageCorruption { id: ObjectId, reason: String },

    /// No slot is stored under `id`.
    #[error("object not found: {0}")]
    NotFound(ObjectId),

    /// The reference carries uncommitted write intent.
    #[error("object {0} is dirty; commit or roll back first")]
    Dirty(ObjectId),

    /// Slot store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Codec failure outside of decoding a slot (e.g. encoding a value).
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Result alias for reference operations.
pub type RefResult<T> = Result<T, RefError>;
