//! Cross-container identity maps for Trellis.
//!
//! When two containers are paired for migration or replication, a
//! [`PeerLink`] correlates objects living in one with references and
//! objects in the other. Each container contributes a [`PeerEndpoint`]
//! whose [`IdentitySequence`] hands out stable surrogate keys for
//! in-memory objects, so nothing is keyed on raw addresses.
//!
//! Two tables live on a link:
//!
//! - references, consumed on lookup ([`PeerLink::reference_for`])
//! - identities, queryable until the link is terminated
//!   ([`PeerLink::identity_for`])

pub mod endpoint;
pub mod error;
pub mod link;
pub mod sequence;

pub use endpoint::PeerEndpoint;
pub use error::{PeerError, PeerResult};
pub use link::PeerLink;
pub use sequence::IdentitySequence;
