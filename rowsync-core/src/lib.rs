//! # rowsync-core - live synchronization of tabular data sources
//!
//! Turns the mutation events of an in-process table into JSON messages and
//! applies JSON mutation requests back to it. Transport-agnostic: outbound
//! messages go to a [`MessageSink`], inbound frames come in as strings.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  events   ┌─────────────┐  ServerMessage  ┌─────────────┐
//! │ TableModel  │ ────────► │ SyncAdapter │ ──────────────► │ MessageSink │
//! │ (source)    │ ◄──────── │             │ ◄────────────── │ (transport) │
//! └─────────────┘ mutations └──────┬──────┘  inbound JSON   └─────────────┘
//!                                  │
//!                        ┌─────────┴─────────┐
//!                        │ RowKeyCache       │
//!                        │ ChangeEncoder     │
//!                        │ applier           │
//!                        └───────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`model`] : data source traits and observer bookkeeping
//! - [`key_cache`] : logical key → row index resolution
//! - [`protocol`] : JSON wire messages
//! - [`encoder`] : key-addressed and row-based message rendering
//! - [`applier`] : inbound message validation and application
//! - [`adapter`] : binding of one source to one sink
//! - [`memory`] : vector-backed reference source

pub mod adapter;
pub mod applier;
pub mod encoder;
pub mod error;
pub mod key_cache;
pub mod memory;
pub mod model;
pub mod protocol;

pub use adapter::{AdapterConfig, CollectingSink, MessageSink, SyncAdapter};
pub use applier::{ApplyReport, Envelope, Operation};
pub use encoder::{encoder_for, ChangeEncoder, FieldTable, KeyAddressedEncoder, RowBasedEncoder};
pub use error::{ModelError, ProtocolError, Result, SyncError};
pub use key_cache::RowKeyCache;
pub use memory::MemoryTable;
pub use model::{
    key_string, share, AddressMode, FieldRef, ModelObserver, ObserverSet, SharedModel,
    SubscriptionId, TableModel, TableView,
};
pub use protocol::{ClientMessage, Protocol, ServerMessage};
