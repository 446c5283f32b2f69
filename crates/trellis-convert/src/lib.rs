//! Schema conversion for Trellis.
//!
//! A store records the converter version it was last brought up to in its
//! [`SystemMetadata`] header. When an engine with a newer [`VERSION`] opens
//! an older store, [`open_metadata`] runs every registered [`Conversion`]
//! between the two versions, in two stages:
//!
//! 1. [`StageKind::ClassCollectionAvailable`]: class metadata is readable,
//!    nothing else is up yet.
//! 2. [`StageKind::SystemUp`]: the store is fully readable.
//!
//! The header and any slot writes staged by conversions are persisted in
//! one atomic batch after the second stage. A failing conversion persists
//! nothing and aborts the open.
//!
//! The [`Converter`] is an explicit instance owned by whoever opens the
//! store; there is no process-wide registry.

pub mod converter;
pub mod error;
pub mod metadata;
pub mod stage;

pub use converter::{
    open_metadata, Conversion, Converter, OpenReport, SystemUpConversion, VERSION,
};
pub use error::{ConversionError, ConvertError, ConvertResult};
pub use metadata::SystemMetadata;
pub use stage::{ConversionStage, StageKind};
