use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use trellis_types::ObjectId;

use crate::error::ConvertResult;

/// Persisted system metadata, stored as JSON in the slot store header.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemMetadata {
    /// Converter version the store was last brought up to.
    pub converter_version: u32,
    /// Text encoding of string fields.
    #[serde(default = "default_encoding")]
    pub string_encoding: String,
    /// Free-space management scheme identifier.
    #[serde(default)]
    pub freespace_system: u8,
    /// Slot holding the class collection, if any.
    #[serde(default = "ObjectId::null")]
    pub class_collection_id: ObjectId,
    /// Free-form properties set by conversions and tools.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

impl SystemMetadata {
    /// Metadata for a brand-new store at converter `version`.
    pub fn fresh(version: u32) -> Self {
        Self {
            converter_version: version,
            string_encoding: default_encoding(),
            freespace_system: 0,
            class_collection_id: ObjectId::null(),
            properties: BTreeMap::new(),
        }
    }

    /// Decode from header bytes.
    pub fn from_bytes(bytes: &[u8]) -> ConvertResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Encode to header bytes.
    pub fn to_bytes(&self) -> ConvertResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}
