//! Controller configuration
//!
//! Values come from CLI flags or environment variables in the binary and are
//! carried on the controller [`Context`](crate::controller::Context).

use std::time::Duration;

use crate::rpc::PluginAddress;
use crate::{Error, DEFAULT_DIAL_TIMEOUT, DEFAULT_PLUGIN_PORT, DEFAULT_RECONCILE_TIMEOUT};

/// Runtime configuration shared by both reconcilers
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Address (`host:port`) dialed for every plugin instead of the
    /// registration's host, e.g. when the plugin runs outside the cluster
    pub plugin_endpoint_override: Option<String>,
    /// Port used when a registration host carries none
    pub default_plugin_port: u16,
    /// Bound on establishing a plugin connection
    pub dial_timeout: Duration,
    /// Bound on one reconciliation, and on each RPC within it
    pub reconcile_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            plugin_endpoint_override: None,
            default_plugin_port: DEFAULT_PLUGIN_PORT,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            reconcile_timeout: DEFAULT_RECONCILE_TIMEOUT,
        }
    }
}

impl ControllerConfig {
    /// Check the configuration before any controller starts
    ///
    /// Misconfiguration here is the only thing allowed to stop the process.
    pub fn validate(&self) -> Result<(), Error> {
        if self.dial_timeout.is_zero() {
            return Err(Error::validation("dial timeout must be greater than zero"));
        }
        if self.reconcile_timeout.is_zero() {
            return Err(Error::validation(
                "reconcile timeout must be greater than zero",
            ));
        }
        if self.default_plugin_port == 0 {
            return Err(Error::validation("default plugin port must not be 0"));
        }
        if let Some(endpoint) = &self.plugin_endpoint_override {
            let address = PluginAddress::parse(endpoint)?;
            address.endpoint_uri(self.default_plugin_port)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_thirty_second_bounds() {
        let config = ControllerConfig::default();
        assert_eq!(config.dial_timeout, Duration::from_secs(30));
        assert_eq!(config.reconcile_timeout, Duration::from_secs(30));
        assert_eq!(config.default_plugin_port, DEFAULT_PLUGIN_PORT);
        assert!(config.plugin_endpoint_override.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let config = ControllerConfig {
            dial_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Validation(_))));

        let config = ControllerConfig {
            reconcile_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn endpoint_override_must_parse() {
        let config = ControllerConfig {
            plugin_endpoint_override: Some("127.0.0.1:9000".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        let config = ControllerConfig {
            plugin_endpoint_override: Some("plugin.local:notaport".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ControllerConfig {
            plugin_endpoint_override: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
