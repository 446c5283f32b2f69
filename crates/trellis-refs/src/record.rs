use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use trellis_types::{ActivationPurpose, FieldLink, ObjectId, OpaqueHandle};

use crate::codec::{CodecError, Decoded, ObjectCodec};

/// A field value inside a [`Record`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    /// Link to an independently identified object.
    Ref(ObjectId),
    /// Link to a dependent, value-typed slot owned by this record.
    Embedded(ObjectId),
}

impl Value {
    /// Render as an index key. Null has no key.
    pub fn as_key(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Bool(b) => Some(b.to_string()),
            Self::Int(n) => Some(n.to_string()),
            Self::Float(x) => Some(x.to_string()),
            Self::Text(s) => Some(s.clone()),
            Self::Bytes(b) => Some(b.iter().map(|byte| format!("{byte:02x}")).collect()),
            Self::Ref(id) | Self::Embedded(id) => Some(id.to_string()),
        }
    }

    /// The link target, if this value is a link.
    pub fn target(&self) -> Option<ObjectId> {
        match self {
            Self::Ref(id) | Self::Embedded(id) => Some(*id),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// A named-field application object.
///
/// Records are what [`RecordCodec`] stores. Fields are kept sorted by name,
/// so the link header of an encoded record lists links in field order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Class name, informational only.
    pub class: String,
    /// Field values by name.
    pub fields: BTreeMap<String, Value>,
}

impl Record {
    /// Create an empty record of the given class.
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Set a field, returning the previous value.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(field.into(), value.into())
    }

    /// Get a field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Outgoing links, in field order. Null ids are skipped.
    pub fn links(&self) -> Vec<FieldLink> {
        self.fields
            .iter()
            .filter_map(|(name, value)| match value {
                Value::Ref(id) if !id.is_null() => Some(FieldLink::reference(name.clone(), *id)),
                Value::Embedded(id) if !id.is_null() => {
                    Some(FieldLink::embedded(name.clone(), *id))
                }
                _ => None,
            })
            .collect()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {{", self.class)?;
        for (i, (name, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            match value.as_key() {
                Some(key) => write!(f, " {name}: {key}")?,
                None => write!(f, " {name}: null")?,
            }
        }
        write!(f, " }}")
    }
}

impl From<Record> for OpaqueHandle {
    fn from(record: Record) -> Self {
        OpaqueHandle::new(record)
    }
}

/// [`ObjectCodec`] for [`Record`] values.
///
/// Slot layout is `bincode((Vec<FieldLink>, Record))`: the link header comes
/// first so [`ObjectCodec::scan_references`] decodes only the prefix.
#[derive(Clone, Copy, Debug, Default)]
pub struct RecordCodec;

impl RecordCodec {
    /// Create the codec.
    pub fn new() -> Self {
        Self
    }

    fn record(value: &OpaqueHandle) -> Result<&Record, CodecError> {
        value
            .downcast_ref::<Record>()
            .ok_or(CodecError::ForeignValue { expected: "Record" })
    }
}

impl ObjectCodec for RecordCodec {
    fn decode(&self, bytes: &[u8], _purpose: ActivationPurpose) -> Result<Decoded, CodecError> {
        let (children, record): (Vec<FieldLink>, Record) = bincode::deserialize(bytes)?;
        Ok(Decoded {
            value: OpaqueHandle::new(record),
            children,
        })
    }

    fn encode(&self, value: &OpaqueHandle) -> Result<Vec<u8>, CodecError> {
        let record = Self::record(value)?;
        Ok(bincode::serialize(&(record.links(), record))?)
    }

    fn scan_references(&self, bytes: &[u8]) -> Result<Vec<FieldLink>, CodecError> {
        // Trailing bytes (the record body) are left unread.
        Ok(bincode::deserialize(bytes)?)
    }

    fn links(&self, value: &OpaqueHandle) -> Result<Vec<FieldLink>, CodecError> {
        Ok(Self::record(value)?.links())
    }

    fn field_value(&self, value: &OpaqueHandle, field: &str) -> Option<String> {
        value
            .downcast_ref::<Record>()
            .and_then(|record| record.get(field))
            .and_then(Value::as_key)
    }
}
