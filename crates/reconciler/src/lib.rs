//! Broker entity reconciliation.
//!
//! This crate keeps one broker's queues, addresses, diverts and address
//! settings converged with a desired set:
//!
//! - **Mirror**: a local copy of what exists on the broker, bootstrapped with
//!   bulk reads and updated as calls succeed
//! - **Diff**: only entities missing from the mirror are created, only
//!   mirrored entities are deleted
//! - **Ordering**: addresses, diverts and settings before queues on create;
//!   the reverse on delete
//! - **Recovery**: a transport or protocol failure reconnects and forces the
//!   next initialization to re-read the broker
//!
//! Updates are not supported. A desired entity that conflicts with a mirrored
//! one is rejected before any call is made.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use chrono::Utc;
//! use mqop_command::{CommandClient, InMemoryCommandClient};
//! use mqop_reconciler::{
//!     BrokerAddress, BrokerEndpoint, BrokerQueue, BrokerState, BrokerStateConfig, Host,
//!     RoutingType,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let endpoint = BrokerEndpoint::new(Host::new("broker-0", "10.0.0.1"), 5672);
//! let mut state = BrokerState::connect(endpoint, &BrokerStateConfig::default(), |options| {
//!     Arc::new(InMemoryCommandClient::new(options.url)) as Arc<dyn CommandClient>
//! })?;
//!
//! state.initialize(Utc::now()).await?;
//! state
//!     .ensure_entities(&[
//!         BrokerAddress::new("orders", RoutingType::Anycast).into(),
//!         BrokerQueue::new("orders")
//!             .on_address("orders", RoutingType::Anycast)
//!             .into(),
//!     ])
//!     .await?;
//! state.shutdown();
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod config;
pub mod entity;
pub mod error;
pub mod management;
pub mod state;

// Re-export main types
pub use config::{BrokerEndpoint, BrokerStateConfig, Host};
pub use entity::{
    BrokerAddress, BrokerAddressSetting, BrokerDivert, BrokerEntity, BrokerQueue, EntityKind,
    RoutingType, Tier,
};
pub use error::{Error, Result};
pub use management::{BROKER_RESOURCE, ManagementClient, ManagementRequest, REQUEST_TIMEOUT};
pub use state::{BrokerState, Mirror};
