//! Plugin identity.

use serde::Serialize;
use trust_csi_common::{CsiError, CsiResult};

use crate::config::DriverConfig;

/// Version reported to the container orchestrator.
pub const VENDOR_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name and version of the plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginInfo {
    /// Driver name.
    pub name: String,
    /// Vendor version.
    pub vendor_version: String,
}

/// Answers identity queries.
#[derive(Debug, Clone)]
pub struct IdentityServer {
    name: String,
    version: String,
}

impl IdentityServer {
    /// Identity for `config`.
    #[must_use]
    pub fn new(config: &DriverConfig) -> Self {
        Self {
            name: config.driver_name.clone(),
            version: VENDOR_VERSION.to_string(),
        }
    }

    /// Plugin name and version.
    ///
    /// # Errors
    ///
    /// Returns an error if the name or version is empty.
    pub fn plugin_info(&self) -> CsiResult<PluginInfo> {
        if self.name.is_empty() {
            return Err(CsiError::invalid_request("driver name not configured"));
        }
        if self.version.is_empty() {
            return Err(CsiError::invalid_request("driver is missing version"));
        }
        Ok(PluginInfo {
            name: self.name.clone(),
            vendor_version: self.version.clone(),
        })
    }

    /// Readiness. The agent is ready as soon as it is constructed.
    #[must_use]
    pub const fn probe(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_configured_name() {
        let identity = IdentityServer::new(&DriverConfig::default().with_driver_name("csi.example.com"));
        let info = identity.plugin_info().unwrap();
        assert_eq!(info.name, "csi.example.com");
        assert_eq!(info.vendor_version, env!("CARGO_PKG_VERSION"));
        assert!(identity.probe());
    }

    #[test]
    fn empty_name_is_unavailable() {
        let identity = IdentityServer::new(&DriverConfig::default().with_driver_name(""));
        assert!(identity.plugin_info().is_err());
    }
}
