//! Command client contract.
//!
//! A command client owns one durable connection to a broker's management
//! endpoint, correlates replies to requests, and reconnects on its own when
//! the link drops. The reconciliation core only ever talks to a broker
//! through this trait.
//!
//! # Thread Safety
//! - `Send + Sync`: the reconnect counter may be read by other tasks
//!   (metrics) while a reconciliation pass is in flight.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Message, TransportResult};

/// Request/response client for broker management commands.
#[async_trait]
pub trait CommandClient: Send + Sync {
    /// Open the connection. Idempotent.
    ///
    /// Each successful (re)connect increments [`CommandClient::reconnect_count`],
    /// including the first one.
    fn start(&self);

    /// Close the connection. Idempotent.
    fn stop(&self);

    /// Send a request and wait for its correlated reply.
    ///
    /// # Errors
    /// - `TransportError::Timeout` if no reply arrives within `timeout`
    /// - `TransportError::Disconnected` if the link drops mid-request
    /// - `TransportError::NotStarted` if the client is stopped
    async fn request_with_timeout(
        &self,
        request: Message,
        timeout: Duration,
    ) -> TransportResult<Message>;

    /// Number of times the underlying connection has been established.
    fn reconnect_count(&self) -> u64;

    /// Diagnostic identifier of the peer.
    fn addr(&self) -> &str;
}

/// Connection options handed to a transport implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientOptions {
    /// Connection URL, e.g. `amqps://10.0.0.4:5671`.
    pub url: String,
    /// Address management requests are sent to.
    pub command_address: String,
    /// Address replies are received on.
    pub response_address: String,
    /// Connect timeout.
    pub connect_timeout: Duration,
    /// Connection properties advertised to the peer.
    pub properties: BTreeMap<String, String>,
    /// Whether to use TLS.
    pub tls: bool,
    /// Whether to authenticate with SASL EXTERNAL (client certificate).
    pub sasl_external: bool,
}

impl ClientOptions {
    /// Create options for the given URL and management addresses.
    pub fn new(
        url: impl Into<String>,
        command_address: impl Into<String>,
        response_address: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            command_address: command_address.into(),
            response_address: response_address.into(),
            connect_timeout: Duration::from_secs(10),
            properties: BTreeMap::new(),
            tls: false,
            sasl_external: false,
        }
    }

    /// Set the connect timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Add a connection property.
    #[must_use]
    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Enable TLS with SASL EXTERNAL authentication.
    #[must_use]
    pub const fn tls(mut self) -> Self {
        self.tls = true;
        self.sasl_external = true;
        self
    }
}
