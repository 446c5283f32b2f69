//! Commit pipeline for Trellis.
//!
//! A [`Transaction`] collects mutations keyed by object id. Committing runs
//! three phases:
//!
//! 1. **Collect**: coalesce the log into a [`CommitSet`] and encode every
//!    added or updated value into one staged write batch.
//! 2. **Notify**: under the store-wide commit lock, call every registered
//!    [`CommitListener`] in registration order. Any veto stops here.
//! 3. **Apply**: write the batch atomically, refresh the reference table,
//!    notify [`CommitObserver`]s, and clear the log.
//!
//! A vetoed commit changes nothing durable and leaves the log intact, so the
//! caller can fix the offending mutation and commit again.
//!
//! # Key Types
//!
//! - [`Transaction`] / [`Mutation`]: last-state-wins mutation log
//! - [`CommitSet`]: the disjoint added / updated / deleted id sets
//! - [`CommitListener`] / [`CommitContext`]: veto-capable pre-commit hooks
//! - [`CommitObserver`] / [`Committed`]: post-commit notifications
//! - [`CommitPipeline`]: runs the phases
//! - [`UniqueFieldConstraint`] / [`FieldIndex`] / [`InMemoryFieldIndex`]
//! - [`TransactionReader`]: slot view including a transaction's staged values

pub mod error;
pub mod listener;
pub mod overlay;
pub mod pipeline;
pub mod set;
pub mod transaction;
pub mod unique;

pub use error::{CommitError, CommitResult};
pub use listener::{CommitContext, CommitListener, CommitObserver, Committed, VetoReason};
pub use overlay::TransactionReader;
pub use pipeline::{CommitPipeline, CommitReport};
pub use set::CommitSet;
pub use transaction::{Mutation, Rollback, Transaction};
pub use unique::{FieldIndex, InMemoryFieldIndex, UniqueFieldConstraint};
