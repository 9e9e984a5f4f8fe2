//! Merging of per-group responses into one consistent answer.
//!
//! Find responses union their glob matches; fetch responses are fused
//! per-metric with gap filling across replicas that may sample at different
//! resolutions. Both mergers prefer the first argument's data, so callers
//! merge in a fixed group order to get deterministic results.

pub mod errors;
pub mod fetch;
pub mod find;

pub use errors::MergeError;
pub use fetch::ServerFetchResponse;
pub use find::ServerFindResponse;
