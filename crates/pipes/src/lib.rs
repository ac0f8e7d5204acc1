//! # MtpPipe Core Library
//!
//! This crate turns asynchronous device transfers into ordinary blocking
//! byte streams, so a host can expose remote objects through a plain
//! read/write file interface.
//!
//! ## Overview
//!
//! - **Pipes**: [`pipe`] creates a connected [`PipeReader`] / [`PipeWriter`]
//!   pair that carries bytes, a clean end-of-data or an error message
//! - **Serialized worker**: [`SerializedWorker`] runs every device operation
//!   on one dedicated thread, in submission order
//! - **Transfer tasks**: import, thumbnail and upload tasks bind one pipe
//!   end to a device operation
//! - **Manager**: [`PipeManager`] hands out pipe ends and queues the matching
//!   task without blocking
//! - **Local collaborators**: [`FolderDevice`] and [`JsonCatalog`] back the
//!   core with plain files
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐  begin_*   ┌──────────────┐  submit  ┌──────────────────┐
//! │  caller  │ ─────────▶ │ PipeManager  │ ───────▶ │ SerializedWorker │
//! └──────────┘            └──────────────┘          └──────────────────┘
//!      ▲                                                    │ run
//!      │ PipeReader / PipeWriter         ┌──────────────────┴──────┐
//!      └──────────────────────────────── │ Import / Thumbnail /    │
//!                                        │ Upload task             │
//!                                        └──────────┬──────────────┘
//!                                                   │
//!                                     DeviceClient + Catalog
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::io::Read;
//! use std::sync::Arc;
//!
//! use pipes::{Config, FolderDevice, JsonCatalog, PipeManager};
//! use pipes::protocol::Identifier;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     let catalog = Arc::new(JsonCatalog::open("catalog.json")?);
//!     let manager = PipeManager::new(catalog, &config)?;
//!
//!     let device = Arc::new(FolderDevice::new("device"));
//!     let mut reader = manager.begin_read(device, Identifier::new(1, 42, "doc-42"))?;
//!
//!     let bytes = tokio::task::spawn_blocking(move || {
//!         let mut bytes = Vec::new();
//!         reader.read_to_end(&mut bytes).map(|_| bytes)
//!     })
//!     .await??;
//!     println!("read {} bytes", bytes.len());
//!
//!     manager.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`channel`]: Reliable pipe pairs
//! - [`config`]: Configuration management
//! - [`local`]: Filesystem-backed device and catalog
//! - [`manager`]: Caller-facing pipe manager
//! - [`task`]: Transfer tasks
//! - [`worker`]: Serialized task worker

pub mod channel;
pub mod config;
pub mod local;
pub mod manager;
pub mod task;
pub mod worker;

pub use protocol;

pub use channel::{pipe, ChannelError, PipeReader, PipeWriter};
pub use config::{Config, ConfigError};
pub use local::{CatalogEntry, FolderDevice, JsonCatalog};
pub use manager::{PipeError, PipeManager};
pub use task::{TaskError, TaskKind, TaskState, TransferTask};
pub use worker::{PipeStats, SerializedWorker, TaskId};
