//! Object storage for job containers
//!
//! Each job owns one container named after the job. The customer's storage
//! key says which S3-compatible service (or the in-process memory store)
//! holds it.

mod memory;
mod s3_client;
mod store;
mod types;

pub use memory::MemoryObjectStore;
pub use s3_client::S3ObjectStore;
pub use store::{DefaultConnector, ObjectStore, StoreConnector};
pub use types::*;
