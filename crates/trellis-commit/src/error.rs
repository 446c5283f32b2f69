use trellis_refs::RefError;
use trellis_store::StoreError;
use trellis_types::ObjectId;

/// Errors from the commit pipeline.
#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    /// A listener vetoed the commit. Nothing durable changed.
    #[error("constraint violation in {listener}: {reason}")]
    ConstraintViolation { listener: String, reason: String },

    /// A listener or observer with this name is already registered.
    #[error("duplicate listener: {0}")]
    DuplicateListener(String),

    /// A staged value could not be encoded.
    #[error("cannot encode {id}: {reason}")]
    Encode { id: ObjectId, reason: String },

    /// An index could not be rebuilt from stored slots.
    #[error("index rebuild failed at {id}: {reason}")]
    IndexRebuild { id: ObjectId, reason: String },

    /// Slot store failure. Fatal to the transaction.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Reference table or activation failure.
    #[error("reference error: {0}")]
    Ref(#[from] RefError),
}

impl CommitError {
    /// Returns `true` for a listener veto.
    pub fn is_veto(&self) -> bool {
        matches!(self, Self::ConstraintViolation { .. })
    }
}

/// Result alias for commit operations.
pub type CommitResult<T> = Result<T, CommitError>;
