use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::id::ObjectId;

/// Per-field cascade-on-delete policy.
///
/// A closed set: configuration picks one variant per field name.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldPolicy {
    /// Cascade exactly one more level through this field, whatever the
    /// remaining budget.
    ForceCascade,
    /// Never cascade through this field.
    ForceNoCascade,
    /// Pass the remaining budget through unchanged.
    #[default]
    Inherit,
}

impl std::fmt::Display for FieldPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ForceCascade => write!(f, "force_cascade"),
            Self::ForceNoCascade => write!(f, "force_no_cascade"),
            Self::Inherit => write!(f, "inherit"),
        }
    }
}

impl FromStr for FieldPolicy {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "force_cascade" => Ok(Self::ForceCascade),
            "force_no_cascade" => Ok(Self::ForceNoCascade),
            "inherit" => Ok(Self::Inherit),
            other => Err(TypeError::UnknownPolicy(other.to_string())),
        }
    }
}

/// How a field's target is stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    /// A reference to an independently identified object.
    Reference,
    /// A value-typed payload kept in a dependent slot owned by the parent.
    /// It has no identity of its own and always goes with its parent.
    Embedded,
}

/// One outgoing link recorded in a slot header.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldLink {
    /// Name of the field holding the link.
    pub field: String,
    /// Id of the target slot.
    pub target: ObjectId,
    /// Storage kind of the target.
    pub kind: FieldKind,
}

impl FieldLink {
    /// A link to an independently identified object.
    pub fn reference(field: impl Into<String>, target: ObjectId) -> Self {
        Self {
            field: field.into(),
            target,
            kind: FieldKind::Reference,
        }
    }

    /// A link to a dependent, value-typed slot.
    pub fn embedded(field: impl Into<String>, target: ObjectId) -> Self {
        Self {
            field: field.into(),
            target,
            kind: FieldKind::Embedded,
        }
    }

    /// Returns `true` if the target is value-typed.
    pub fn is_embedded(&self) -> bool {
        matches!(self.kind, FieldKind::Embedded)
    }
}
