use std::fmt;

use trellis_store::{SlotStore, WriteBatch};
use trellis_types::ObjectId;

use crate::metadata::SystemMetadata;

/// Point in store-open at which a conversion runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StageKind {
    /// Class metadata is readable; nothing else is up yet.
    ClassCollectionAvailable,
    /// The store is fully readable.
    SystemUp,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClassCollectionAvailable => write!(f, "class-collection-available"),
            Self::SystemUp => write!(f, "system-up"),
        }
    }
}

/// State handed to each conversion.
///
/// `from_version` is the version persisted when the store was opened; it is
/// the same in both stages. Conversions mutate the metadata in place and
/// may stage slot writes, which are persisted together with the header.
pub struct ConversionStage<'a> {
    kind: StageKind,
    from_version: u32,
    system: SystemMetadata,
    store: &'a dyn SlotStore,
    batch: WriteBatch,
}

impl<'a> ConversionStage<'a> {
    pub fn new(
        kind: StageKind,
        from_version: u32,
        system: SystemMetadata,
        store: &'a dyn SlotStore,
    ) -> Self {
        Self {
            kind,
            from_version,
            system,
            store,
            batch: WriteBatch::new(),
        }
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    pub fn from_version(&self) -> u32 {
        self.from_version
    }

    pub fn system(&self) -> &SystemMetadata {
        &self.system
    }

    pub fn system_mut(&mut self) -> &mut SystemMetadata {
        &mut self.system
    }

    /// Read access to the store being opened.
    pub fn store(&self) -> &dyn SlotStore {
        self.store
    }

    /// Stage a slot rewrite, persisted with the header.
    pub fn stage_write(&mut self, id: ObjectId, bytes: Vec<u8>) {
        self.batch.write(id, bytes);
    }

    /// Stage a slot free, persisted with the header.
    pub fn stage_free(&mut self, id: ObjectId) {
        self.batch.free(id);
    }

    /// Slot changes staged so far.
    pub fn staged(&self) -> &WriteBatch {
        &self.batch
    }

    /// Move on to the next stage, keeping metadata and staged writes.
    pub fn advance(self, kind: StageKind) -> Self {
        Self { kind, ..self }
    }

    /// Consume the stage.
    pub fn finish(self) -> (SystemMetadata, WriteBatch) {
        (self.system, self.batch)
    }
}

impl fmt::Debug for ConversionStage<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionStage")
            .field("kind", &self.kind)
            .field("from_version", &self.from_version)
            .field("system", &self.system)
            .field("staged", &self.batch.len())
            .finish()
    }
}
