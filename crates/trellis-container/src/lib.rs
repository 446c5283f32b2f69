//! The Trellis object container.
//!
//! [`ObjectContainer`] wires the lifecycle components over one slot store:
//! the schema converter runs at open, then activation, cascade delete and
//! the commit pipeline serve transactions, and a peer endpoint lets two
//! containers be linked for migration.
//!
//! ```no_run
//! use trellis_container::{ContainerConfig, ObjectContainer};
//! use trellis_refs::Record;
//!
//! # fn main() -> Result<(), trellis_container::ContainerError> {
//! let db = ObjectContainer::open_file("app.trellis".as_ref(), ContainerConfig::default())?;
//! let mut tx = db.begin();
//! let id = db.store(&mut tx, Record::new("Person").with("name", "Ada").into())?;
//! db.commit(&mut tx)?;
//! # let _ = id;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod container;
pub mod error;

pub use config::ContainerConfig;
pub use container::ObjectContainer;
pub use error::{ContainerError, ContainerResult};
