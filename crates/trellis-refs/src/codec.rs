use trellis_types::{ActivationPurpose, FieldLink, OpaqueHandle};

/// Errors raised by an [`ObjectCodec`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The bytes are not a valid encoding.
    #[error("malformed slot: {0}")]
    Malformed(String),

    /// The handle does not hold a value this codec understands.
    #[error("value is not a {expected}")]
    ForeignValue { expected: &'static str },
}

impl From<bincode::Error> for CodecError {
    fn from(err: bincode::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

/// Output of [`ObjectCodec::decode`].
#[derive(Clone, Debug)]
pub struct Decoded {
    /// The live value.
    pub value: OpaqueHandle,
    /// Outgoing links found while decoding, in field order.
    pub children: Vec<FieldLink>,
}

/// Decode/encode capability supplied by the class-metadata layer.
///
/// The lifecycle core treats values as opaque: it never looks inside an
/// [`OpaqueHandle`] itself and reaches object contents only through this
/// trait.
pub trait ObjectCodec: Send + Sync {
    /// Decode slot bytes into a live value plus its outgoing links.
    fn decode(&self, bytes: &[u8], purpose: ActivationPurpose) -> Result<Decoded, CodecError>;

    /// Encode a live value into slot bytes.
    fn encode(&self, value: &OpaqueHandle) -> Result<Vec<u8>, CodecError>;

    /// Read only the outgoing links of an encoded slot, without building
    /// the value.
    fn scan_references(&self, bytes: &[u8]) -> Result<Vec<FieldLink>, CodecError>;

    /// Outgoing links of a live value.
    fn links(&self, value: &OpaqueHandle) -> Result<Vec<FieldLink>, CodecError>;

    /// Render one field of a live value as an index key. `None` if the
    /// value has no such field or the field is null.
    fn field_value(&self, value: &OpaqueHandle, field: &str) -> Option<String>;
}
