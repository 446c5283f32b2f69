use trellis_types::ObjectId;

use crate::error::StoreResult;

/// Physical location of one slot. Owned by the store; callers only see it
/// for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Slot {
    /// Byte offset of the slot data.
    pub offset: u64,
    /// Length of the slot data in bytes.
    pub length: u32,
}

impl Slot {
    /// Create a slot location.
    pub fn new(offset: u64, length: u32) -> Self {
        Self { offset, length }
    }

    /// Offset one past the last byte.
    pub fn end(&self) -> u64 {
        self.offset + u64::from(self.length)
    }
}

/// A single staged mutation inside a [`WriteBatch`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchOp {
    /// Replace the slot contents for `id`.
    Write { id: ObjectId, bytes: Vec<u8> },
    /// Release the slot for `id`; the id becomes reusable.
    Free { id: ObjectId },
    /// Replace the store header (system metadata).
    Header { bytes: Vec<u8> },
}

/// Ordered group of slot mutations applied all-or-nothing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a slot write.
    pub fn write(&mut self, id: ObjectId, bytes: Vec<u8>) -> &mut Self {
        self.ops.push(BatchOp::Write { id, bytes });
        self
    }

    /// Stage a slot free.
    pub fn free(&mut self, id: ObjectId) -> &mut Self {
        self.ops.push(BatchOp::Free { id });
        self
    }

    /// Stage a header replacement.
    pub fn header(&mut self, bytes: Vec<u8>) -> &mut Self {
        self.ops.push(BatchOp::Header { bytes });
        self
    }

    /// Staged operations in application order.
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    /// Number of staged operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns `true` if nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Total payload bytes staged for writing.
    pub fn payload_bytes(&self) -> usize {
        self.ops
            .iter()
            .map(|op| match op {
                BatchOp::Write { bytes, .. } | BatchOp::Header { bytes } => bytes.len(),
                BatchOp::Free { .. } => 0,
            })
            .sum()
    }
}

/// Slot store boundary.
///
/// All implementations must satisfy these invariants:
/// - `apply` is all-or-nothing: after a crash a batch is either fully
///   durable or fully absent on reopen. No partial slot is ever observable.
/// - `alloc` never hands out an id that is live or already reserved.
/// - The store never interprets slot contents.
/// - All I/O errors are propagated, never silently ignored.
pub trait SlotStore: Send + Sync {
    /// Read the slot contents for `id`.
    ///
    /// Returns `Ok(None)` if no slot is stored under `id`.
    fn read(&self, id: ObjectId) -> StoreResult<Option<Vec<u8>>>;

    /// Reserve a fresh id. The id holds no slot until written.
    fn alloc(&self) -> StoreResult<ObjectId>;

    /// Physical location of the slot for `id`, if any.
    fn slot(&self, id: ObjectId) -> StoreResult<Option<Slot>>;

    /// Read the store header (persisted system metadata).
    fn read_header(&self) -> StoreResult<Option<Vec<u8>>>;

    /// Apply a batch of mutations atomically.
    fn apply(&self, batch: &WriteBatch) -> StoreResult<()>;

    /// All ids currently holding a slot, ascending.
    fn ids(&self) -> StoreResult<Vec<ObjectId>>;

    /// Return a reserved, never-written id to the allocator.
    ///
    /// Ids that hold a slot are unaffected; free those with [`SlotStore::free`].
    fn release(&self, id: ObjectId) -> StoreResult<()>;

    /// Write a single slot durably.
    fn write(&self, id: ObjectId, bytes: &[u8]) -> StoreResult<()> {
        let mut batch = WriteBatch::new();
        batch.write(id, bytes.to_vec());
        self.apply(&batch)
    }

    /// Free a single slot durably. Returns `true` if a slot existed.
    fn free(&self, id: ObjectId) -> StoreResult<bool> {
        let existed = self.exists(id)?;
        let mut batch = WriteBatch::new();
        batch.free(id);
        self.apply(&batch)?;
        Ok(existed)
    }

    /// Replace the store header durably.
    fn write_header(&self, bytes: &[u8]) -> StoreResult<()> {
        let mut batch = WriteBatch::new();
        batch.header(bytes.to_vec());
        self.apply(&batch)
    }

    /// Check whether a slot is stored under `id`.
    fn exists(&self, id: ObjectId) -> StoreResult<bool> {
        Ok(self.slot(id)?.is_some())
    }
}
