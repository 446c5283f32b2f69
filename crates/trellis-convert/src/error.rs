use trellis_store::StoreError;

/// Why a single conversion step refused to run.
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    /// The stored data does not have the shape the step expects.
    #[error("{0}")]
    Rejected(String),

    /// Reading the store from inside the step failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl ConversionError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }
}

/// Errors from schema conversion.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    /// A conversion is already registered for this version.
    #[error("conversion for version {0} already registered")]
    DuplicateConversion(u32),

    /// A conversion step failed. The store must not be opened.
    #[error("conversion to version {version} failed: {source}")]
    ConversionFailed {
        version: u32,
        #[source]
        source: ConversionError,
    },

    /// The store header is not valid system metadata.
    #[error("malformed system metadata: {0}")]
    Metadata(String),

    /// Slot store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl From<serde_json::Error> for ConvertError {
    fn from(err: serde_json::Error) -> Self {
        Self::Metadata(err.to_string())
    }
}

/// Result alias for conversion operations.
pub type ConvertResult<T> = Result<T, ConvertError>;
