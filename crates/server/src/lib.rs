//! Axum HTTP surface for the Keystone inference gateway.
//!
//! Binds the [`keystone_gateway::Pipeline`] to the wire: request parsing,
//! bearer auth, SSE framing, and the JSON error envelope. All business
//! logic lives in `keystone-gateway`; this crate only translates HTTP in
//! and out of it.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod telemetry;
