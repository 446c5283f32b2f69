use trellis_store::StoreError;
use trellis_types::ObjectId;

/// Errors from cascade delete planning.
#[derive(Debug, thiserror::Error)]
pub enum CascadeError {
    /// The slot header of `id` could not be read.
    #[error("storage corruption in {id}: {reason}")]
    StorageCorruption { id: ObjectId, reason: String },

    /// Slot store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Result alias for cascade operations.
pub type CascadeResult<T> = Result<T, CascadeError>;
