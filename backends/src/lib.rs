//! Replica-group clients for Graphite-compatible storage backends.
//!
//! A replica group is a named set of interchangeable servers queried through
//! one [`types::ServerClient`]. Two transports are provided: protobuf
//! payloads over HTTP with per-server retries, and unary RPCs over a
//! load-balanced gRPC channel. The [`registry::ProtocolRegistry`] maps
//! protocol aliases from configuration onto the right constructor.

pub mod errors;
pub mod http_query;
pub mod limiter;
pub mod metrics_defs;
pub mod protocols;
pub mod registry;
pub mod types;

#[cfg(test)]
mod testutils;
