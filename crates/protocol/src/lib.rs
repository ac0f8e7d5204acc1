//! # MtpPipe Protocol Library
//!
//! This crate defines the vocabulary shared between the pipe core and the
//! collaborators it drives: the device-transfer-protocol client and the
//! document catalog.
//!
//! ## Overview
//!
//! - **Identifiers**: [`Identifier`] addresses a remote object and the
//!   catalog document that mirrors it
//! - **Object metadata**: [`ObjectInfo`] and the MTP [`OperationCode`]s a
//!   document supports
//! - **Device client**: the [`DeviceClient`] capability trait (stream,
//!   thumbnail, info, delete, create)
//! - **Catalog**: the [`Catalog`] trait used to re-point a document at a
//!   freshly uploaded object
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │               Pipe core                 │  pipes crate
//! ├────────────────────┬────────────────────┤
//! │    DeviceClient    │      Catalog       │  this crate
//! ├────────────────────┼────────────────────┤
//! │  MTP session / fs  │  database / json   │  implementations
//! └────────────────────┴────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`identifier`]: Object and document addressing
//! - [`object`]: Object metadata and operation codes
//! - [`device`]: Device client trait
//! - [`catalog`]: Catalog trait
//! - [`error`]: Error types

pub mod catalog;
pub mod device;
pub mod error;
pub mod identifier;
pub mod object;

pub use catalog::Catalog;
pub use device::{DeviceClient, DeviceSession};
pub use error::{CatalogError, DeviceError, Result};
pub use identifier::Identifier;
pub use object::{ObjectInfo, OperationCode, FORMAT_UNDEFINED};
