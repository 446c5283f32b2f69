//! Foundation types for Trellis, an embedded object-graph store.
//!
//! Every other Trellis crate depends on `trellis-types`.
//!
//! # Key Types
//!
//! - [`ObjectId`]: Persisted object identifier; stable, reused after free
//! - [`ContainerId`]: Identity of one open container instance
//! - [`TransactionId`]: UUID v7 transaction token
//! - [`IdentityKey`]: Runtime identity of an in-memory object (never a persisted id)
//! - [`ActivationPurpose`] / [`ActivationState`]: Lifecycle of an object reference
//! - [`FieldPolicy`] / [`FieldLink`]: Per-field cascade configuration and slot header entries
//! - [`OpaqueHandle`]: Shared handle to a decoded application value

pub mod activation;
pub mod error;
pub mod field;
pub mod handle;
pub mod id;

pub use activation::{ActivationPurpose, ActivationState};
pub use error::TypeError;
pub use field::{FieldKind, FieldLink, FieldPolicy};
pub use handle::{OpaqueHandle, WeakHandle};
pub use id::{ContainerId, IdentityKey, ObjectId, TransactionId};
