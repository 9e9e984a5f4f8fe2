//! Generated `carbonapi_v3` wire types and the `CarbonV1` RPC service.
//!
//! Everything in this crate comes out of `proto/carbonapi_v3.proto`; the
//! messages double as the protobuf payload format on the HTTP transport.

tonic::include_proto!("carbonapi_v3");

pub use prost::Message;
