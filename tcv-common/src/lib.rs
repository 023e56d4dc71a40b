//! # TCV Common Library
//!
//! Shared code for the tiered content validation workspace:
//! - Common error and result types
//! - Bootstrap configuration loading and root folder resolution
//! - Database pool initialization
//! - Hashing, timestamp and UUID helpers

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod hashing;
pub mod time;
pub mod uuid_utils;

pub use error::{Error, Result};
