use std::path::PathBuf;

use trellis_types::ObjectId;

/// Errors from slot store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CRC integrity check failed for a record that is not the file tail.
    #[error("CRC mismatch at offset {offset}: expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch {
        offset: u64,
        expected: u32,
        actual: u32,
    },

    /// The store data is malformed and cannot be decoded.
    #[error("corrupt store at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },

    /// The file is not a slot store.
    #[error("not a trellis store: {0}")]
    BadMagic(PathBuf),

    /// Attempted to write or free the null object id.
    #[error("cannot use the null object id as a slot")]
    NullObjectId,

    /// A slot's recorded location lies outside the file.
    #[error("slot for {id} is out of bounds")]
    SlotOutOfBounds { id: ObjectId },

    /// Storage backend is read-only.
    #[error("store is read-only")]
    ReadOnly,
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
