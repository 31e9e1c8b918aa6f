//! Licensing Server Library
//!
//! User, customer and job entitlements with realm scoping, plus parallel
//! file transfers between local folders and per-job storage containers.
//!
//! # Modules
//!
//! - `licensing`: entities and the grant normalizer
//! - `db`: SQLite persistence
//! - `storage`: object stores behind customer storage keys
//! - `transfer`: upload/download sessions and content classification
//! - `routes`: HTTP API

pub mod config;
pub mod db;
pub mod error;
pub mod inspect;
pub mod licensing;
pub mod routes;
pub mod state;
pub mod storage;
pub mod transfer;
