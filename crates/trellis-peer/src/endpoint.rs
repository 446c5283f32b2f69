use std::sync::Arc;

use parking_lot::RwLock;
use trellis_types::{ContainerId, IdentityKey, OpaqueHandle};

use crate::link::PeerLink;
use crate::sequence::IdentitySequence;

/// One container's side of a peer link.
#[derive(Debug)]
pub struct PeerEndpoint {
    container: ContainerId,
    sequence: IdentitySequence,
    source: RwLock<Option<Arc<PeerLink>>>,
}

impl PeerEndpoint {
    pub fn new(container: ContainerId) -> Arc<Self> {
        Arc::new(Self {
            container,
            sequence: IdentitySequence::new(container),
            source: RwLock::new(None),
        })
    }

    pub fn container(&self) -> ContainerId {
        self.container
    }

    pub fn sequence(&self) -> &IdentitySequence {
        &self.sequence
    }

    /// Surrogate key for an object owned by this container.
    pub fn key_for(&self, obj: &OpaqueHandle) -> IdentityKey {
        self.sequence.key_for(obj)
    }

    /// The link this endpoint currently migrates through, if any.
    pub fn migration_source(&self) -> Option<Arc<PeerLink>> {
        self.source.read().clone()
    }

    pub(crate) fn set_migration_source(
        &self,
        link: Option<Arc<PeerLink>>,
    ) -> Option<Arc<PeerLink>> {
        std::mem::replace(&mut *self.source.write(), link)
    }

    /// Clear the migration source if it is `link`.
    pub(crate) fn detach(&self, link: &PeerLink) -> bool {
        let mut source = self.source.write();
        match source.as_deref() {
            Some(current) if std::ptr::eq(current, link) => {
                *source = None;
                true
            }
            _ => false,
        }
    }
}
