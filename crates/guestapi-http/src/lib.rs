//! guestapi-http: request/response client for the Incus guest API.
//!
//! # Endpoints
//! - `GET /1.0`: instance info
//! - `GET /1.0/config`, `GET|HEAD /1.0/config/<key>`: config keys
//! - `GET /1.0/devices`: attached devices
//! - `GET /1.0/meta-data`: cloud-init meta-data

pub mod client;

pub use client::GuestClient;
