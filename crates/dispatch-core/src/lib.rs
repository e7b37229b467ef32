//! dispatch-core library.
//!
//! Keeps a cached issue collection in sync with the classification backend:
//! a REST snapshot plus a WebSocket stream of classification events, with
//! bounded reconnection and a single local edit folded in on top.
//!
//! # Conventions
//!
//! - **Errors**: `thiserror` enums with a stable [`error::ErrorCode`];
//!   binaries wrap them in `anyhow::Result`.
//! - **Logging**: `tracing` macros (`info!`, `warn!`, `error!`, `debug!`).
//! - **Threads**: all state lives on the [`session::Session`] loop thread.

pub mod config;
pub mod decode;
pub mod error;
pub mod gateway;
pub mod model;
pub mod reconnect;
pub mod session;
pub mod store;
pub mod transport;
