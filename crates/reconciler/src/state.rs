//! Per-broker reconciliation state.
//!
//! [`BrokerState`] keeps a mirror of the entities that exist on one broker and
//! converges that broker toward a desired set with the fewest management calls.
//!
//! # Lifecycle
//!
//! 1. `initialize` bulk-reads queues, addresses, diverts and address settings
//! 2. `ensure_entities` / `delete_entities` create or remove what differs
//! 3. A transport or protocol failure calls `reset`, which reconnects and
//!    marks the mirror stale so the next `initialize` rebuilds it
//!
//! The mirror is owned by one instance and is not locked: callers drive one
//! broker from one task at a time.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use itertools::Itertools;
use mqop_command::CommandClient;
use tracing::{debug, info, warn};

use crate::config::{BrokerEndpoint, BrokerStateConfig, Host};
use crate::entity::{
    BrokerAddress, BrokerAddressSetting, BrokerDivert, BrokerEntity, BrokerQueue, EntityKind, Tier,
};
use crate::error::{Error, Result};
use crate::management::{self, ManagementClient};

/// Entities per kind, keyed by name.
pub type Mirror = HashMap<EntityKind, HashMap<String, BrokerEntity>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Create,
    Delete,
}

impl Action {
    const fn label(self) -> &'static str {
        match self {
            Self::Create => "EnsureEntities",
            Self::Delete => "DeleteEntities",
        }
    }
}

/// Reconciliation state for a single broker.
#[derive(Debug)]
pub struct BrokerState {
    endpoint: BrokerEndpoint,
    management: ManagementClient,
    initialized: bool,
    reconnect_count: u64,
    next_resync: Option<DateTime<Utc>>,
    entities: Mirror,
}

impl BrokerState {
    /// Build a transport for `endpoint`, start it, and wrap it in a new state.
    ///
    /// The factory receives the connection options derived from the endpoint
    /// and configuration.
    ///
    /// # Errors
    /// Returns `Error::Config` if the configuration is invalid.
    pub fn connect<F>(
        endpoint: BrokerEndpoint,
        config: &BrokerStateConfig,
        factory: F,
    ) -> Result<Self>
    where
        F: FnOnce(mqop_command::ClientOptions) -> Arc<dyn CommandClient>,
    {
        config.validate()?;
        let client = factory(endpoint.client_options(config));
        client.start();

        let mut state = Self::with_client(endpoint, client, config);
        state.reconnect_count = state.management.transport().reconnect_count();
        Ok(state)
    }

    /// Wrap an existing client without starting it.
    pub fn with_client(
        endpoint: BrokerEndpoint,
        client: Arc<dyn CommandClient>,
        config: &BrokerStateConfig,
    ) -> Self {
        Self {
            endpoint,
            management: ManagementClient::new(
                client,
                config.resource_name.as_str(),
                config.request_timeout,
            ),
            initialized: false,
            reconnect_count: 0,
            next_resync: None,
            entities: Mirror::new(),
        }
    }

    /// Target broker.
    pub const fn endpoint(&self) -> &BrokerEndpoint {
        &self.endpoint
    }

    /// Target host.
    pub const fn host(&self) -> &Host {
        &self.endpoint.host
    }

    /// Target management port.
    pub const fn port(&self) -> u16 {
        self.endpoint.port
    }

    /// Deadline recorded by the last initialization.
    pub const fn next_resync(&self) -> Option<DateTime<Utc>> {
        self.next_resync
    }

    /// Whether the mirror is trusted.
    pub const fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Mirrored entities of one kind.
    pub fn entities(&self, kind: EntityKind) -> Option<&HashMap<String, BrokerEntity>> {
        self.entities.get(&kind)
    }

    /// Whether the mirror holds `(kind, name)`.
    pub fn contains(&self, kind: EntityKind, name: &str) -> bool {
        self.entities
            .get(&kind)
            .is_some_and(|by_name| by_name.contains_key(name))
    }

    /// Bootstrap the mirror from the broker.
    ///
    /// A no-op when already initialized, unless the transport reconnected
    /// since the last successful run.
    ///
    /// # Errors
    /// Returns the first read failure; the mirror is left untouched.
    pub async fn initialize(&mut self, next_resync: DateTime<Utc>) -> Result<()> {
        let current = self.management.transport().reconnect_count();
        if self.reconnect_count != current {
            self.initialized = false;
        }

        if self.initialized {
            return Ok(());
        }

        self.next_resync = Some(next_resync);
        info!(broker = %self.endpoint, "Initializing...");

        self.reconnect_count = current;
        let mut staged = Mirror::new();
        for kind in EntityKind::ALL {
            let list = self.read_entities(kind, &staged).await?;
            staged.insert(kind, list);
        }

        let total: usize = staged.values().map(HashMap::len).sum();
        self.entities = staged;
        self.initialized = true;
        info!(broker = %self.endpoint, entities = total, "Initialized controller state");
        Ok(())
    }

    /// Bulk-read one kind. Address settings are read once per queue in `staged`.
    async fn read_entities(
        &self,
        kind: EntityKind,
        staged: &Mirror,
    ) -> Result<HashMap<String, BrokerEntity>> {
        let entities: HashMap<String, BrokerEntity> = match kind {
            EntityKind::Queue => self
                .read_names("getQueueNames")
                .await?
                .into_iter()
                .map(|name| (name.clone(), BrokerQueue::new(name).into()))
                .collect(),
            EntityKind::Address => self
                .read_names("getAddressNames")
                .await?
                .into_iter()
                .map(|name| (name.clone(), BrokerAddress::named(name).into()))
                .collect(),
            EntityKind::Divert => self
                .read_names("getDivertNames")
                .await?
                .into_iter()
                .map(|name| (name.clone(), BrokerDivert::named(name).into()))
                .collect(),
            EntityKind::AddressSetting => {
                let queues = staged
                    .get(&EntityKind::Queue)
                    .map(|q| q.keys().cloned().sorted().collect_vec())
                    .unwrap_or_default();

                let mut settings = HashMap::new();
                for queue in queues {
                    for setting in self.read_address_settings(&queue).await? {
                        settings.insert(queue.clone(), setting.into());
                    }
                }
                settings
            }
        };

        debug!(
            broker = %self.endpoint,
            kind = %kind,
            names = ?entities.keys().sorted().collect_vec(),
            "Found entities"
        );
        Ok(entities)
    }

    async fn read_names(&self, operation: &str) -> Result<Vec<String>> {
        let payload = self.management.invoke_for_string(operation, Vec::new()).await?;
        management::decode_name_lists(operation, &payload)
    }

    async fn read_address_settings(&self, queue: &str) -> Result<Vec<BrokerAddressSetting>> {
        let operation = "getAddressSettingsAsJSON";
        let payload = self
            .management
            .invoke_for_string(operation, vec![serde_json::json!(queue)])
            .await?;

        let settings = management::decode_setting_blobs(operation, &payload)?;
        Ok(settings
            .into_iter()
            .map(|setting| BrokerAddressSetting {
                name: queue.to_string(),
                ..setting
            })
            .collect())
    }

    fn lookup(&self, entity: &BrokerEntity) -> Option<&BrokerEntity> {
        self.entities
            .get(&entity.kind())
            .and_then(|by_name| by_name.get(entity.name()))
    }

    /// Create every desired entity missing from the mirror.
    ///
    /// Independent entities are created before dependent ones. Entities whose
    /// create succeeded are recorded even if a sibling failed, so a retry with
    /// the same desired set only re-attempts what is still missing.
    ///
    /// # Errors
    /// - `Error::NotInitialized` before a successful `initialize`
    /// - `Error::DivergentEntity` if a desired entity conflicts with a mirrored
    ///   one; nothing is created
    /// - the first create failure otherwise
    pub async fn ensure_entities(&mut self, desired: &[BrokerEntity]) -> Result<()> {
        if !self.initialized {
            return Err(Error::NotInitialized);
        }

        let mut seen = HashSet::new();
        let mut to_create = Vec::with_capacity(desired.len());
        for entity in desired {
            if !seen.insert((entity.kind(), entity.name())) {
                continue;
            }
            match self.lookup(entity) {
                Some(existing) if !existing.is_equivalent(entity) => {
                    info!(
                        broker = %self.endpoint,
                        existing = ?existing,
                        desired = ?entity,
                        "Refusing to update broker entity"
                    );
                    return Err(Error::divergent_entity(entity.kind(), entity.name()));
                }
                Some(_) => {}
                None => to_create.push(entity),
            }
        }

        let (completed, outcome) = self.run_tiers(Action::Create, &to_create).await;
        self.settle(Action::Create, &outcome);
        for entity in completed {
            self.entities
                .entry(entity.kind())
                .or_default()
                .insert(entity.name().to_string(), entity);
        }
        outcome
    }

    /// Delete every listed entity that is present in the mirror.
    ///
    /// Dependent entities are deleted before independent ones. Entities leave
    /// the mirror only once their delete succeeded.
    ///
    /// # Errors
    /// - `Error::NotInitialized` before a successful `initialize`
    /// - the first delete failure otherwise
    pub async fn delete_entities(&mut self, entities: &[BrokerEntity]) -> Result<()> {
        if !self.initialized {
            return Err(Error::NotInitialized);
        }

        let mut seen = HashSet::new();
        let to_delete = entities
            .iter()
            .filter(|e| seen.insert((e.kind(), e.name())))
            .filter(|e| self.contains(e.kind(), e.name()))
            .collect_vec();

        let (completed, outcome) = self.run_tiers(Action::Delete, &to_delete).await;
        self.settle(Action::Delete, &outcome);
        for entity in completed {
            if let Some(by_name) = self.entities.get_mut(&entity.kind()) {
                by_name.remove(entity.name());
            }
        }
        outcome
    }

    /// Run `action` tier by tier.
    ///
    /// Calls within a tier run concurrently and are drained in completion
    /// order; the first failure is the tier's error and stops later tiers.
    /// Returns every entity whose call succeeded alongside the outcome.
    async fn run_tiers(
        &self,
        action: Action,
        entities: &[&BrokerEntity],
    ) -> (Vec<BrokerEntity>, Result<()>) {
        let tiers = match action {
            Action::Create => Tier::ORDERED.iter().copied().collect_vec(),
            Action::Delete => Tier::ORDERED.iter().rev().copied().collect_vec(),
        };

        let mut completed = Vec::with_capacity(entities.len());
        for tier in tiers {
            let mut pending: FuturesUnordered<_> = entities
                .iter()
                .filter(|e| e.tier() == tier)
                .map(|&entity| async move {
                    let outcome = match action {
                        Action::Create => entity.create(&self.management).await,
                        Action::Delete => entity.delete(&self.management).await,
                    };
                    (entity, outcome)
                })
                .collect();

            let mut first_error = None;
            while let Some((entity, outcome)) = pending.next().await {
                match outcome {
                    Ok(()) => completed.push(entity.clone()),
                    Err(e) => {
                        warn!(
                            broker = %self.endpoint,
                            kind = %entity.kind(),
                            name = %entity.name(),
                            error = %e,
                            "Broker entity operation failed"
                        );
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                    }
                }
            }

            if let Some(e) = first_error {
                return (completed, Err(e));
            }
        }
        (completed, Ok(()))
    }

    fn settle(&mut self, action: Action, outcome: &Result<()>) {
        if let Err(e) = outcome {
            info!(
                broker = %self.endpoint,
                operation = action.label(),
                error = %e,
                "Reconciliation error"
            );
            if e.is_connection_error() {
                self.reset();
            }
        }
    }

    /// Reconnect and mark the mirror stale.
    ///
    /// Does nothing unless initialized. The mirror's contents are kept until
    /// the next `initialize` replaces them.
    pub fn reset(&mut self) {
        if self.initialized {
            info!(broker = %self.endpoint, "Resetting connection");
            let transport = self.management.transport();
            transport.stop();
            self.initialized = false;
            transport.start();
        }
    }

    /// Stop the transport for good.
    pub fn shutdown(&self) {
        info!(broker = %self.endpoint, "Shutting down");
        self.management.transport().stop();
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]
    #![allow(clippy::arithmetic_side_effects)]

    use super::*;
    use crate::entity::RoutingType;
    use mqop_command::{FaultKind, InMemoryCommandClient};

    fn setup() -> (BrokerState, Arc<InMemoryCommandClient>) {
        let client = Arc::new(InMemoryCommandClient::new("mem://broker-0"));
        client.start();
        let endpoint = BrokerEndpoint::new(Host::new("broker-0", "10.0.0.1"), 5671);
        let state = BrokerState::with_client(endpoint, client.clone(), &BrokerStateConfig::default());
        (state, client)
    }

    #[tokio::test]
    async fn test_ensure_requires_initialize() {
        let (mut state, client) = setup();
        let desired = vec![BrokerEntity::from(BrokerQueue::new("q1"))];

        let result = state.ensure_entities(&desired).await;
        assert!(matches!(result, Err(Error::NotInitialized)));

        let result = state.delete_entities(&desired).await;
        assert!(matches!(result, Err(Error::NotInitialized)));
        assert!(client.requests().is_empty());
    }

    #[tokio::test]
    async fn test_initialize_records_resync_deadline() {
        let (mut state, _client) = setup();
        let deadline = Utc::now();

        state.initialize(deadline).await.unwrap();
        assert!(state.is_initialized());
        assert_eq!(state.next_resync(), Some(deadline));
    }

    #[tokio::test]
    async fn test_duplicate_desired_entities_create_once() {
        let (mut state, client) = setup();
        state.initialize(Utc::now()).await.unwrap();

        let address = BrokerEntity::from(BrokerAddress::new("a1", RoutingType::Anycast));
        state
            .ensure_entities(&[address.clone(), address])
            .await
            .unwrap();
        assert_eq!(client.count("createAddress"), 1);
    }

    #[tokio::test]
    async fn test_divergence_does_not_reset() {
        let (mut state, client) = setup();
        state.initialize(Utc::now()).await.unwrap();
        state
            .ensure_entities(&[BrokerAddress::new("a1", RoutingType::Anycast).into()])
            .await
            .unwrap();
        let reconnects = client.reconnect_count();

        let result = state
            .ensure_entities(&[BrokerAddress::new("a1", RoutingType::Multicast).into()])
            .await;

        assert!(matches!(result, Err(Error::DivergentEntity { .. })));
        assert!(state.is_initialized());
        assert_eq!(client.reconnect_count(), reconnects);
    }

    #[tokio::test]
    async fn test_protocol_failure_resets_connection() {
        let (mut state, client) = setup();
        state.initialize(Utc::now()).await.unwrap();
        client.fail_operation("createQueue", FaultKind::Reject);
        let reconnects = client.reconnect_count();

        let result = state
            .ensure_entities(&[BrokerQueue::new("q1").into()])
            .await;

        assert!(matches!(result, Err(Error::ProtocolFailure { .. })));
        assert!(!state.is_initialized());
        assert!(client.is_started());
        assert_eq!(client.reconnect_count(), reconnects + 1);
    }

    #[tokio::test]
    async fn test_reset_is_noop_when_uninitialized() {
        let (mut state, client) = setup();
        let reconnects = client.reconnect_count();

        state.reset();
        assert_eq!(client.reconnect_count(), reconnects);
        assert!(client.is_started());
    }

    #[tokio::test]
    async fn test_shutdown_stops_transport() {
        let (state, client) = setup();
        state.shutdown();
        assert!(!client.is_started());
    }
}
