//! # trust-csi-common
//!
//! Shared types for the trust-csi node agent.
//!
//! This crate provides functionality used by every trust-csi component:
//! - The crate-wide error type
//! - Volume identifier validation
//! - The on-disk layout below the data root

#![warn(missing_docs)]

pub mod error;
pub mod id;
pub mod paths;

pub use error::{CsiError, CsiResult};
pub use id::VolumeId;
pub use paths::DriverPaths;
