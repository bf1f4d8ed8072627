//! mqop-command - Request/response command transport for broker management
//!
//! This crate defines how the reconciliation core talks to a broker's
//! management endpoint: a durable connection that sends a request message,
//! correlates the reply, and counts how often it had to reconnect.
//!
//! # Contract
//!
//! - [`CommandClient::start`] / [`CommandClient::stop`]: idempotent lifecycle;
//!   a stop followed by a start yields a fresh session
//! - [`CommandClient::request_with_timeout`]: one round trip, bounded by a deadline
//! - [`CommandClient::reconnect_count`]: monotonically increasing, bumped on
//!   every (re)connect including the first
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//!
//! use mqop_command::{CommandClient, InMemoryCommandClient, Message, OPERATION_NAME_PROPERTY};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = InMemoryCommandClient::new("mem://broker-0");
//! client.seed_queue("orders");
//! client.start();
//!
//! let request = Message::new()
//!     .with_property(OPERATION_NAME_PROPERTY, "getQueueNames")
//!     .with_value("[]");
//! let reply = client
//!     .request_with_timeout(request, Duration::from_secs(10))
//!     .await?;
//! assert!(reply.value.is_some());
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

mod client;
mod error;
mod in_memory;
mod message;

pub use client::{ClientOptions, CommandClient};
pub use error::{TransportError, TransportResult};
pub use in_memory::{
    ADDRESS_SETTING_KEYS, CallEvent, FaultKind, InMemoryCommandClient, RecordedRequest,
};
pub use message::{
    ATTRIBUTE_PROPERTY, Message, OPERATION_NAME_PROPERTY, OPERATION_SUCCEEDED_PROPERTY,
    RESOURCE_NAME_PROPERTY,
};
