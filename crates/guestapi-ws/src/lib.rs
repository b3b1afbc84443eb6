//! guestapi-ws: event stream client for the Incus guest API.
//!
//! # Features
//! - WebSocket subscription to `/1.0/events` over the guest Unix socket
//! - Server-side filtering by event type (`?type=config,device`)
//! - Cooperative cancellation via `CancellationToken`
//! - Fire-and-forget handler dispatch with optional concurrency bound
//! - Opt-in skipping of unknown event types and malformed metadata

pub mod client;
pub mod config;

pub use client::EventStream;
pub use config::EventStreamConfig;
pub use tokio_util::sync::CancellationToken;
