//! # rowsync-server - WebSocket transport for rowsync
//!
//! Serves any number of [`rowsync_core::TableModel`]s, one per request path,
//! and provides a client that mirrors a served table.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌─────────────┐
//! │ RemoteTable │ ◄────────────────► │ ModelServer │
//! │ (per user)  │     JSON text      │ (central)   │
//! └──────┬──────┘                    └──────┬──────┘
//!        │                                  │
//!        ▼                                  ▼
//! ┌─────────────┐                    ┌─────────────┐
//! │ TableMirror │                    │ SyncAdapter │
//! │ (replica)   │                    │ per path    │
//! └─────────────┘                    └──────┬──────┘
//!                                           │
//!                                   ┌───────┴───────┐
//!                                   │ BroadcastGroup│
//!                                   │ (fan-out)     │
//!                                   └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`broadcast`] : per-path fan-out with lag accounting
//! - [`server`] : path routing, handshake rejection, connection loop
//! - [`client`] : WebSocket client with a local mirror
//! - [`mirror`] : client-side replica of a served table

pub mod broadcast;
pub mod client;
pub mod error;
pub mod mirror;
pub mod server;

pub use broadcast::{BroadcastGroup, BroadcastStats, ClientInfo, Slot};
pub use client::{ConnectionState, RemoteTable, TableEvent};
pub use error::{ClientError, ServerError};
pub use mirror::TableMirror;
pub use server::{ListeningServer, ModelServer, ServerConfig, ServerHandle, ServerStats};
