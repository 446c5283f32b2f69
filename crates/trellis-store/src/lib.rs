//! Slot storage for Trellis.
//!
//! A slot store maps an integer [`ObjectId`](trellis_types::ObjectId) to a
//! byte range ("slot") on durable media. The lifecycle core above never
//! holds a slot directly, only the id, so a backend may relocate slots
//! (defragmentation) without invalidating live references.
//!
//! # Storage Backends
//!
//! All backends implement the [`SlotStore`] trait:
//!
//! - [`InMemorySlotStore`] -- map-based store for tests and embedding
//! - [`FileSlotStore`] -- append-only single file with CRC-framed batches
//!
//! # Design Rules
//!
//! 1. Ids start at 1 and are reused lowest-first after being freed.
//! 2. A [`WriteBatch`] is applied all-or-nothing: after a crash it is either
//!    fully visible on reopen or fully absent.
//! 3. The store never interprets slot contents.
//! 4. All I/O errors are propagated, never silently ignored.

pub mod alloc;
pub mod error;
pub mod file;
pub mod memory;
pub mod traits;

pub use alloc::IdAllocator;
pub use error::{StoreError, StoreResult};
pub use file::{CompactReport, FileSlotStore, FileStoreConfig, SyncMode};
pub use memory::InMemorySlotStore;
pub use traits::{BatchOp, Slot, SlotStore, WriteBatch};
