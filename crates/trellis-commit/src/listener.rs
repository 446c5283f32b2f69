use std::collections::BTreeMap;
use std::fmt;

use trellis_refs::{ActivationEngine, ObjectCodec, RefError, RefResult};
use trellis_types::{ActivationPurpose, ObjectId, OpaqueHandle};

use crate::set::CommitSet;
use crate::transaction::Transaction;

// ---------------------------------------------------------------------------
// VetoReason
// ---------------------------------------------------------------------------

/// Why a listener refused a commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VetoReason(String);

impl VetoReason {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VetoReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<RefError> for VetoReason {
    fn from(err: RefError) -> Self {
        Self(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// CommitContext
// ---------------------------------------------------------------------------

/// What a listener can see during Phase 2.
///
/// Values are post-mutation and pre-durability: an object staged in the
/// transaction reads as its staged value, a deleted object reads as absent,
/// everything else is activated from the store.
pub struct CommitContext<'a> {
    transaction: &'a Transaction,
    engine: &'a ActivationEngine,
}

impl<'a> CommitContext<'a> {
    pub(crate) fn new(transaction: &'a Transaction, engine: &'a ActivationEngine) -> Self {
        Self {
            transaction,
            engine,
        }
    }

    /// Current value of `id`, or `None` if it does not exist (or is deleted
    /// by this transaction).
    pub fn activate(&self, id: ObjectId) -> RefResult<Option<OpaqueHandle>> {
        if let Some(value) = self.transaction.pending_value(id) {
            return Ok(Some(value.clone()));
        }
        if self.transaction.is_deleted(id) {
            return Ok(None);
        }
        match self.engine.activate(id, ActivationPurpose::Read, 0) {
            Ok(value) => Ok(Some(value)),
            Err(RefError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// One field of the current value of `id`, rendered as an index key.
    pub fn field_value(&self, id: ObjectId, field: &str) -> RefResult<Option<String>> {
        Ok(self
            .activate(id)?
            .and_then(|value| self.engine.codec().field_value(&value, field)))
    }

    pub fn codec(&self) -> &dyn ObjectCodec {
        self.engine.codec().as_ref()
    }
}

// ---------------------------------------------------------------------------
// Committed
// ---------------------------------------------------------------------------

/// What an observer sees after Phase 3: the durable set and the values
/// that were written.
pub struct Committed<'a> {
    set: &'a CommitSet,
    values: &'a BTreeMap<ObjectId, OpaqueHandle>,
    codec: &'a dyn ObjectCodec,
}

impl<'a> Committed<'a> {
    pub(crate) fn new(
        set: &'a CommitSet,
        values: &'a BTreeMap<ObjectId, OpaqueHandle>,
        codec: &'a dyn ObjectCodec,
    ) -> Self {
        Self { set, values, codec }
    }

    pub fn set(&self) -> &CommitSet {
        self.set
    }

    /// The written value of an added or updated id.
    pub fn value(&self, id: ObjectId) -> Option<&OpaqueHandle> {
        self.values.get(&id)
    }

    pub fn codec(&self) -> &dyn ObjectCodec {
        self.codec
    }
}

// ---------------------------------------------------------------------------
// Listener traits
// ---------------------------------------------------------------------------

/// A pre-commit hook able to veto.
///
/// Listeners run synchronously, once per commit attempt, in registration
/// order. They receive the full [`CommitSet`] and may inspect any object's
/// current value through the [`CommitContext`], but cannot add mutations.
pub trait CommitListener: Send + Sync {
    /// Unique name within a pipeline.
    fn name(&self) -> &str;

    /// Inspect the pending commit. `Err` vetoes it.
    fn on_commit(&self, set: &CommitSet, context: &CommitContext<'_>) -> Result<(), VetoReason>;
}

/// A post-commit hook. Runs after the batch is durable and cannot veto.
pub trait CommitObserver: Send + Sync {
    /// Unique name within a pipeline.
    fn name(&self) -> &str;

    fn on_committed(&self, committed: &Committed<'_>);
}
