//! Cascade delete for Trellis.
//!
//! Deleting a root object may delete the objects it references, depending
//! on a per-field [`FieldPolicy`](trellis_types::FieldPolicy) and a depth
//! budget. The walk reads only slot headers (the link list), never full
//! objects, and produces a [`DeletePlan`]. Nothing is freed here: the
//! commit pipeline applies the plan so a delete is part of its transaction.
//!
//! # Key Types
//!
//! - [`CascadePolicies`]: field name -> policy, with a default
//! - [`SlotReader`]: where the walk reads slot bytes
//! - [`CascadeDeleteEngine`]: plans the delete closure
//! - [`DeletePlan`]: ids to free, children before parents

pub mod engine;
pub mod error;
pub mod plan;
pub mod policy;

pub use engine::{CascadeDeleteEngine, SlotReader};
pub use error::{CascadeError, CascadeResult};
pub use plan::DeletePlan;
pub use policy::CascadePolicies;
