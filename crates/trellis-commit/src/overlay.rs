use trellis_cascade::{CascadeError, CascadeResult, SlotReader};
use trellis_refs::ObjectCodec;
use trellis_store::SlotStore;
use trellis_types::ObjectId;

use crate::transaction::Transaction;

/// Slot view of a store with one transaction's staged values on top.
///
/// Staged adds and updates read as their encoded value; everything else
/// reads from the store. Deletes staged in the transaction still read from
/// the store, since deleting twice is harmless.
pub struct TransactionReader<'a> {
    transaction: &'a Transaction,
    store: &'a dyn SlotStore,
    codec: &'a dyn ObjectCodec,
}

impl<'a> TransactionReader<'a> {
    pub fn new(
        transaction: &'a Transaction,
        store: &'a dyn SlotStore,
        codec: &'a dyn ObjectCodec,
    ) -> Self {
        Self {
            transaction,
            store,
            codec,
        }
    }
}

impl SlotReader for TransactionReader<'_> {
    fn read_slot(&self, id: ObjectId) -> CascadeResult<Option<Vec<u8>>> {
        match self.transaction.pending_value(id) {
            Some(value) => self
                .codec
                .encode(value)
                .map(Some)
                .map_err(|e| CascadeError::StorageCorruption {
                    id,
                    reason: e.to_string(),
                }),
            None => Ok(self.store.read(id)?),
        }
    }
}
