use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info};
use trellis_refs::SharedReference;
use trellis_types::{ContainerId, IdentityKey, OpaqueHandle};

use crate::endpoint::PeerEndpoint;
use crate::error::{PeerError, PeerResult};

struct Side {
    container: ContainerId,
    endpoint: Weak<PeerEndpoint>,
}

/// Identity maps shared by two paired containers.
///
/// Installed as the migration source of both endpoints by
/// [`PeerLink::establish`]. Call [`PeerLink::terminate`] before closing
/// either container; after that every map and lookup fails with
/// [`PeerError::Terminated`].
pub struct PeerLink {
    a: Side,
    b: Side,
    references: Mutex<HashMap<IdentityKey, SharedReference>>,
    identities: Mutex<HashMap<IdentityKey, OpaqueHandle>>,
    terminated: AtomicBool,
}

impl PeerLink {
    /// Pair `a` and `b`, terminating any link either was part of.
    pub fn establish(a: &Arc<PeerEndpoint>, b: &Arc<PeerEndpoint>) -> PeerResult<Arc<Self>> {
        if a.container() == b.container() {
            return Err(PeerError::SameContainer(a.container()));
        }
        for endpoint in [a, b] {
            if let Some(previous) = endpoint.migration_source() {
                previous.terminate();
            }
        }

        let link = Arc::new(Self {
            a: Side {
                container: a.container(),
                endpoint: Arc::downgrade(a),
            },
            b: Side {
                container: b.container(),
                endpoint: Arc::downgrade(b),
            },
            references: Mutex::new(HashMap::new()),
            identities: Mutex::new(HashMap::new()),
            terminated: AtomicBool::new(false),
        });
        a.set_migration_source(Some(link.clone()));
        b.set_migration_source(Some(link.clone()));
        info!(a = %a.container(), b = %b.container(), "peer link established");
        Ok(link)
    }

    /// Containers on both sides, in establishment order.
    pub fn containers(&self) -> (ContainerId, ContainerId) {
        (self.a.container, self.b.container)
    }

    /// The endpoint for `side`.
    pub fn endpoint(&self, side: ContainerId) -> PeerResult<Arc<PeerEndpoint>> {
        upgrade(self.side(side)?)
    }

    /// The other side of the link, given one side.
    pub fn peer(&self, side: ContainerId) -> PeerResult<Arc<PeerEndpoint>> {
        if side == self.a.container {
            upgrade(&self.b)
        } else if side == self.b.container {
            upgrade(&self.a)
        } else {
            Err(PeerError::UnknownPeer(side))
        }
    }

    /// Record that `obj`, owned by `side`, corresponds to `reference` in the
    /// peer. A second call for the same object replaces the first.
    pub fn map_reference(
        &self,
        side: ContainerId,
        obj: &OpaqueHandle,
        reference: SharedReference,
    ) -> PeerResult<()> {
        let key = self.key_for(side, obj)?;
        self.references.lock().insert(key, reference);
        debug!(%key, "mapped peer reference");
        Ok(())
    }

    /// Take the reference mapped for `obj`, if any. Each mapping is
    /// returned at most once.
    pub fn reference_for(
        &self,
        side: ContainerId,
        obj: &OpaqueHandle,
    ) -> PeerResult<Option<SharedReference>> {
        self.ensure_live()?;
        let Some(key) = self.endpoint(side)?.sequence().existing(obj) else {
            return Ok(None);
        };
        Ok(self.references.lock().remove(&key))
    }

    /// Like [`reference_for`](Self::reference_for), but a missing mapping
    /// is an error.
    pub fn claim_reference(
        &self,
        side: ContainerId,
        obj: &OpaqueHandle,
    ) -> PeerResult<SharedReference> {
        self.reference_for(side, obj)?
            .ok_or(PeerError::ReferenceNotMapped(side))
    }

    /// Record that `obj`, owned by `side`, is the same logical object as
    /// `other` in the peer.
    pub fn map_identity(
        &self,
        side: ContainerId,
        obj: &OpaqueHandle,
        other: OpaqueHandle,
    ) -> PeerResult<()> {
        let key = self.key_for(side, obj)?;
        self.identities.lock().insert(key, other);
        Ok(())
    }

    /// The peer object mapped to `obj`. Lookups do not consume the mapping.
    pub fn identity_for(
        &self,
        side: ContainerId,
        obj: &OpaqueHandle,
    ) -> PeerResult<Option<OpaqueHandle>> {
        self.ensure_live()?;
        let Some(key) = self.endpoint(side)?.sequence().existing(obj) else {
            return Ok(None);
        };
        Ok(self.identities.lock().get(&key).cloned())
    }

    /// Pending (unclaimed) reference mappings.
    pub fn pending_references(&self) -> usize {
        self.references.lock().len()
    }

    /// Sever both endpoints from this link and drop its tables.
    /// Idempotent.
    pub fn terminate(&self) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        let dropped = {
            let mut refs = self.references.lock();
            let n = refs.len();
            refs.clear();
            n
        };
        self.identities.lock().clear();
        for side in [&self.a, &self.b] {
            if let Some(endpoint) = side.endpoint.upgrade() {
                endpoint.detach(self);
            }
        }
        info!(
            a = %self.a.container,
            b = %self.b.container,
            unclaimed = dropped,
            "peer link terminated"
        );
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    fn side(&self, side: ContainerId) -> PeerResult<&Side> {
        if side == self.a.container {
            Ok(&self.a)
        } else if side == self.b.container {
            Ok(&self.b)
        } else {
            Err(PeerError::UnknownPeer(side))
        }
    }

    fn key_for(&self, side: ContainerId, obj: &OpaqueHandle) -> PeerResult<IdentityKey> {
        self.ensure_live()?;
        Ok(self.endpoint(side)?.key_for(obj))
    }

    fn ensure_live(&self) -> PeerResult<()> {
        if self.is_terminated() {
            Err(PeerError::Terminated)
        } else {
            Ok(())
        }
    }
}

fn upgrade(side: &Side) -> PeerResult<Arc<PeerEndpoint>> {
    side.endpoint
        .upgrade()
        .ok_or(PeerError::EndpointClosed(side.container))
}

impl fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerLink")
            .field("a", &self.a.container)
            .field("b", &self.b.container)
            .field("terminated", &self.is_terminated())
            .finish()
    }
}
