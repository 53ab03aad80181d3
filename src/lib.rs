//! Finds, sizes, filters and aborts incomplete S3 multipart uploads across
//! every bucket and region an account can see.
//!
//! [`SweepService`] is the entry point. It is wired from a
//! [`ClientFactory`](services::registry::ClientFactory), so the same pipeline
//! runs against S3 or any other [`StorageApi`](services::api::StorageApi).

pub mod config;
pub mod errors;
pub mod models;
pub mod services;

pub use errors::{PartialFailure, SweepError, SweepResult};
pub use services::sweep_service::{Collaborators, SweepService};
