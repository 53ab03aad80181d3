//! Sweeper components: the provider seam, the retrying client stack, and
//! the collection, sizing, filtering and deletion pipeline built on it.

pub mod age;
pub mod api;
pub mod client;
pub mod collector;
pub mod cost;
pub mod deletion;
pub mod export;
pub mod filter;
pub mod pool;
pub mod rate_limit;
pub mod region;
pub mod registry;
pub mod retry;
pub mod s3_api;
pub mod size;
pub mod sweep_service;

#[cfg(test)]
pub(crate) mod testing;
