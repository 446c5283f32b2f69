use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TypeError;

/// Identifier of one persisted object within a store.
///
/// Ids are allocated by the slot store, start at 1, and are reused after the
/// object's slot is freed. The id is the only handle the in-memory graph keeps
/// on a persisted object; the physical slot behind it may move.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(u64);

impl ObjectId {
    /// Wrap a raw id value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The null object id. Represents "no object".
    pub const fn null() -> Self {
        Self(0)
    }

    /// Returns `true` if this is the null object id.
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// The raw id value.
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl FromStr for ObjectId {
    type Err = TypeError;

    /// Parses `42` or `#42`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix('#').unwrap_or(s);
        digits
            .parse::<u64>()
            .map(Self)
            .map_err(|_| TypeError::InvalidObjectId(s.to_string()))
    }
}

impl From<u64> for ObjectId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

static NEXT_CONTAINER: AtomicU64 = AtomicU64::new(1);

/// Identity of one open container instance.
///
/// Assigned when a container is opened; never persisted. Object references
/// record the container that created them and never migrate between
/// containers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerId(u64);

impl ContainerId {
    /// Allocate a fresh, process-unique container id.
    pub fn next() -> Self {
        Self(NEXT_CONTAINER.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw id value.
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContainerId({})", self.0)
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Transaction token (UUID v7, so tokens sort by creation time).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Generate a new time-ordered transaction id.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId({})", self.0)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx:{}", self.0)
    }
}

/// Runtime identity of an in-memory object.
///
/// Keys are surrogates handed out in first-seen order by one container, so a
/// key is unique across containers and is never confused with an
/// [`ObjectId`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey {
    container: ContainerId,
    seq: u64,
}

impl IdentityKey {
    /// Create a key for the `seq`-th object first seen by `container`.
    pub const fn new(container: ContainerId, seq: u64) -> Self {
        Self { container, seq }
    }

    /// The container that assigned this key.
    pub fn container(&self) -> ContainerId {
        self.container
    }

    /// Position in the container's first-seen sequence.
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_object_id() {
        assert!(ObjectId::null().is_null());
        assert!(!ObjectId::new(1).is_null());
    }

    #[test]
    fn object_id_parse_accepts_hash_prefix() {
        assert_eq!("42".parse::<ObjectId>().unwrap(), ObjectId::new(42));
        assert_eq!("#7".parse::<ObjectId>().unwrap(), ObjectId::new(7));
        assert!("x7".parse::<ObjectId>().is_err());
    }

    #[test]
    fn object_id_display() {
        assert_eq!(format!("{}", ObjectId::new(9)), "#9");
        assert_eq!(format!("{:?}", ObjectId::new(9)), "ObjectId(9)");
    }

    #[test]
    fn container_ids_are_unique() {
        let a = ContainerId::next();
        let b = ContainerId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn transaction_ids_are_distinct() {
        let a = TransactionId::new();
        let b = TransactionId::new();
        assert_ne!(a, b);
        assert_eq!(a.as_uuid().get_version_num(), 7);
    }

    #[test]
    fn identity_keys_from_different_containers_differ() {
        let a = IdentityKey::new(ContainerId::next(), 1);
        let b = IdentityKey::new(ContainerId::next(), 1);
        assert_ne!(a, b);
        assert_eq!(a.seq(), b.seq());
    }

    #[test]
    fn object_id_serde_roundtrip() {
        let id = ObjectId::new(1234);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "1234");
        let parsed: ObjectId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }
}
