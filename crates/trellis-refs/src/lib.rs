//! Object references and lazy activation for Trellis.
//!
//! The in-memory graph never holds a slot or a pointer to another persisted
//! object; it holds [`ObjectId`](trellis_types::ObjectId)s. Each id that has
//! been seen by a container gets one [`ObjectReference`] in that container's
//! [`ReferenceTable`], and the [`ActivationEngine`] is the only component
//! that moves a reference between lifecycle states.
//!
//! # Modules
//!
//! - [`error`]: Error types for reference and activation operations
//! - [`reference`]: [`ObjectReference`], one persisted object's in-memory state
//! - [`table`]: [`ReferenceTable`], the per-container id -> reference map
//! - [`codec`]: The [`ObjectCodec`] capability supplied by the class layer
//! - [`record`]: [`Record`] and [`RecordCodec`], a concrete named-field codec
//! - [`engine`]: [`ActivationEngine`]
//!
//! # Design Rules
//!
//! 1. A reference is `Active` iff it owns a value.
//! 2. Activation of one id serializes on that id's lock; different ids
//!    activate concurrently.
//! 3. No lock on one reference is held while another is activated, so
//!    cyclic graphs cannot deadlock.

pub mod codec;
pub mod engine;
pub mod error;
pub mod record;
pub mod reference;
pub mod table;

pub use codec::{CodecError, Decoded, ObjectCodec};
pub use engine::ActivationEngine;
pub use error::{RefError, RefResult};
pub use record::{Record, RecordCodec, Value};
pub use reference::ObjectReference;
pub use table::{ReferenceTable, SharedReference};
