//! Configuration for broker reconciliation.

use std::fmt;
use std::time::Duration;

use mqop_command::ClientOptions;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration shared by every per-broker reconciliation state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerStateConfig {
    /// Deadline for a single management round trip.
    #[serde(with = "duration_secs", default = "default_request_timeout")]
    pub request_timeout: Duration,

    /// Deadline for establishing the management connection.
    #[serde(with = "duration_secs", default = "default_connect_timeout")]
    pub connect_timeout: Duration,

    /// Address management requests are sent to.
    #[serde(default = "default_command_address")]
    pub command_address: String,

    /// Address management replies are received on.
    #[serde(default = "default_response_address")]
    pub response_address: String,

    /// Managed resource name.
    #[serde(default = "default_resource_name")]
    pub resource_name: String,

    /// Product name advertised as a connection property.
    #[serde(default = "default_product")]
    pub product: String,
}

impl Default for BrokerStateConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
            connect_timeout: default_connect_timeout(),
            command_address: default_command_address(),
            response_address: default_response_address(),
            resource_name: default_resource_name(),
            product: default_product(),
        }
    }
}

impl BrokerStateConfig {
    /// Set the request timeout.
    #[must_use]
    pub const fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the connect timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the management addresses.
    #[must_use]
    pub fn addresses(
        mut self,
        command_address: impl Into<String>,
        response_address: impl Into<String>,
    ) -> Self {
        self.command_address = command_address.into();
        self.response_address = response_address.into();
        self
    }

    /// Set the advertised product name.
    #[must_use]
    pub fn product(mut self, product: impl Into<String>) -> Self {
        self.product = product.into();
        self
    }

    /// Load configuration from environment variables.
    ///
    /// Unset or unparsable variables keep their defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(secs) = env_secs("MQOP_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = secs;
        }

        if let Some(secs) = env_secs("MQOP_CONNECT_TIMEOUT_SECS") {
            config.connect_timeout = secs;
        }

        if let Ok(address) = std::env::var("MQOP_COMMAND_ADDRESS") {
            config.command_address = address;
        }

        if let Ok(address) = std::env::var("MQOP_RESPONSE_ADDRESS") {
            config.response_address = address;
        }

        if let Ok(product) = std::env::var("MQOP_PRODUCT") {
            config.product = product;
        }

        config
    }

    /// Load configuration from a file.
    ///
    /// # Errors
    /// Returns `Error::Io` if the file cannot be read, `Error::Json` or
    /// `Error::Config` if it cannot be parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;

        // Try JSON first, then TOML
        if path.extension().is_some_and(|e| e == "json") {
            Ok(serde_json::from_str(&content)?)
        } else {
            toml::from_str(&content)
                .map_err(|e| Error::config_error(format!("Failed to parse config: {e}")))
        }
    }

    /// Check the configuration is usable.
    ///
    /// # Errors
    /// Returns `Error::Config` for a zero timeout or an empty address.
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout.is_zero() {
            return Err(Error::config_error("request_timeout must be positive"));
        }
        if self.connect_timeout.is_zero() {
            return Err(Error::config_error("connect_timeout must be positive"));
        }
        if self.command_address.is_empty() || self.response_address.is_empty() {
            return Err(Error::config_error("management addresses must not be empty"));
        }
        if self.resource_name.is_empty() {
            return Err(Error::config_error("resource_name must not be empty"));
        }
        Ok(())
    }
}

/// Network identity of a broker host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Host {
    /// DNS name (for diagnostics).
    pub hostname: String,
    /// IP address used to connect.
    pub ip: String,
}

impl Host {
    /// Create a host.
    pub fn new(hostname: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            ip: ip.into(),
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hostname.is_empty() {
            write!(f, "{}", self.ip)
        } else {
            write!(f, "{}", self.hostname)
        }
    }
}

/// A target broker: host, management port, and whether to use TLS.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BrokerEndpoint {
    pub host: Host,
    pub port: u16,
    #[serde(default)]
    pub tls: bool,
}

impl BrokerEndpoint {
    /// Create a plain-text endpoint.
    pub const fn new(host: Host, port: u16) -> Self {
        Self {
            host,
            port,
            tls: false,
        }
    }

    /// Use TLS with client-certificate authentication.
    #[must_use]
    pub const fn with_tls(mut self) -> Self {
        self.tls = true;
        self
    }

    /// Management connection URL.
    pub fn url(&self) -> String {
        let scheme = if self.tls { "amqps" } else { "amqp" };
        format!("{scheme}://{}:{}", self.host.ip, self.port)
    }

    /// Connection options for a transport targeting this endpoint.
    pub fn client_options(&self, config: &BrokerStateConfig) -> ClientOptions {
        let options = ClientOptions::new(
            self.url(),
            config.command_address.as_str(),
            config.response_address.as_str(),
        )
        .connect_timeout(config.connect_timeout)
        .property("product", config.product.as_str());

        if self.tls { options.tls() } else { options }
    }
}

impl fmt::Display for BrokerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

fn env_secs(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

const fn default_request_timeout() -> Duration {
    crate::management::REQUEST_TIMEOUT
}

const fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_command_address() -> String {
    "activemq.management".to_string()
}

fn default_response_address() -> String {
    "activemq.management_broker_command_response".to_string()
}

fn default_resource_name() -> String {
    crate::management::BROKER_RESOURCE.to_string()
}

fn default_product() -> String {
    "controller-manager".to_string()
}

/// Serialization helper for Duration as seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]

    use std::io::Write;

    use super::*;

    #[test]
    fn test_default_config() {
        let config = BrokerStateConfig::default();
        assert_eq!(config.request_timeout, crate::management::REQUEST_TIMEOUT);
        assert_eq!(config.command_address, "activemq.management");
        assert_eq!(
            config.response_address,
            "activemq.management_broker_command_response"
        );
        assert_eq!(config.resource_name, "broker");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = BrokerStateConfig::default()
            .request_timeout(Duration::from_secs(3))
            .connect_timeout(Duration::from_secs(4))
            .addresses("mgmt", "mgmt.reply")
            .product("operator");

        assert_eq!(config.request_timeout, Duration::from_secs(3));
        assert_eq!(config.connect_timeout, Duration::from_secs(4));
        assert_eq!(config.command_address, "mgmt");
        assert_eq!(config.response_address, "mgmt.reply");
        assert_eq!(config.product, "operator");
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = BrokerStateConfig::default().request_timeout(Duration::ZERO);
        assert!(matches!(config.validate(), Err(Error::Config { .. })));
    }

    #[test]
    fn test_from_toml_file_fills_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "request_timeout = 5").unwrap();
        writeln!(file, "product = \"operator\"").unwrap();

        let config = BrokerStateConfig::from_file(file.path()).unwrap();
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.product, "operator");
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"command_address": "mgmt", "connect_timeout": 2}}"#).unwrap();

        let config = BrokerStateConfig::from_file(file.path()).unwrap();
        assert_eq!(config.command_address, "mgmt");
        assert_eq!(config.connect_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_from_file_rejects_garbage() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "request_timeout = [").unwrap();

        let result = BrokerStateConfig::from_file(file.path());
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_endpoint_url_and_options() {
        let plain = BrokerEndpoint::new(Host::new("broker-0", "10.0.0.4"), 5672);
        assert_eq!(plain.url(), "amqp://10.0.0.4:5672");
        assert_eq!(plain.to_string(), "broker-0:5672");

        let tls = plain.clone().with_tls();
        let options = tls.client_options(&BrokerStateConfig::default());
        assert_eq!(options.url, "amqps://10.0.0.4:5672");
        assert!(options.sasl_external);
        assert_eq!(options.command_address, "activemq.management");
        assert_eq!(
            options.properties.get("product").map(String::as_str),
            Some("controller-manager")
        );
    }

    #[test]
    fn test_host_display_falls_back_to_ip() {
        assert_eq!(Host::new("", "10.0.0.9").to_string(), "10.0.0.9");
    }
}
