//! # trust-csi
//!
//! Node agent that projects certificate trust bundles into pod volumes.
//!
//! ## Features
//!
//! - **Atomic projection**: every bundle update swaps a complete snapshot in with one `rename(2)`
//! - **Output formats**: concatenated PEM files and OpenSSL rehash directories
//! - **Crash recovery**: volume records persist on a tmpfs and reload on start
//! - **Reconcile**: volumes are re-rendered whenever their bundle changes
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use trust_csi::config::DriverConfig;
//! use trust_csi::driver::Driver;
//! use trust_csi::filesystem::SystemMounter;
//! use trust_csi::node::PublishRequest;
//! use trust_csi::source::DirectoryBundleSource;
//!
//! # fn example() -> trust_csi_common::CsiResult<()> {
//! let config = DriverConfig::default().with_node_id("node-a");
//! let source = Arc::new(DirectoryBundleSource::new(config.bundle_dir.clone()));
//! let driver = Driver::initialize(config, source, Arc::new(SystemMounter))?;
//!
//! let request = PublishRequest::ephemeral("csi-1", "/var/lib/kubelet/pods/p/volumes/v", "default", "roots")
//!     .with_attribute("trust.cert-manager.io/concatenated-files", "/ca.pem");
//! driver.node().publish(&request)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod driver;
pub mod filesystem;
pub mod identity;
pub mod metadata;
pub mod metrics;
pub mod node;
pub mod projection;
pub mod reconcile;
pub mod render;
pub mod source;
pub mod state;
pub mod sync;
pub mod watch;

pub use driver::Driver;
