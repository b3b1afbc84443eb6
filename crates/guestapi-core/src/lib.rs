//! guestapi-core: foundation types for the Incus guest API client.
//!
//! # Overview
//!
//! Processes running inside an Incus instance can talk to the host through a
//! local Unix socket (`/dev/incus/sock`). The core crate defines:
//!
//! - [`Event`] / [`EventPayload`] / [`EventType`]: the tagged event model
//! - [`envelope`] module: wire frame → [`Event`] decoder
//! - [`Connector`]: the transport trait, with [`UnixConnector`]
//! - [`GuestError`] / [`DecodeError`]: structured error types
//! - [`paths`] module: versioned endpoint paths and config key rules
//! - [`InstanceInfo`] / [`Devices`]: request/response payloads

pub mod config;
pub mod envelope;
pub mod error;
pub mod event;
pub mod instance;
pub mod paths;
pub mod transport;

pub use config::ClientConfig;
pub use envelope::{decode_event, decode_event_str};
pub use error::{DecodeError, GuestError, InvalidEventType};
pub use event::{ConfigUpdate, DeviceConfig, DeviceUpdate, Event, EventPayload, EventType};
pub use instance::{Devices, InstanceInfo};
pub use transport::{is_inside_instance, probe, Connector, UnixConnector};
