//! Broker entity model.
//!
//! Every broker-managed object is identified by `(kind, name)` and belongs to
//! an ordering [`Tier`]: addresses, diverts and address settings are
//! independent, queues depend on the address they bind to. Creates walk the
//! tiers forward, deletes walk them backward.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use crate::error::{Error, Result};
use crate::management::ManagementClient;

/// Kind of a broker entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Queue,
    Address,
    Divert,
    AddressSetting,
}

impl EntityKind {
    /// All kinds, in the order they are read during initialization.
    ///
    /// Address settings are looked up per queue name, so queues come first.
    pub const ALL: [Self; 4] = [Self::Queue, Self::Address, Self::Divert, Self::AddressSetting];

    /// Ordering tier of this kind.
    pub const fn tier(self) -> Tier {
        match self {
            Self::Queue => Tier::Dependent,
            Self::Address | Self::Divert | Self::AddressSetting => Tier::Independent,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queue => write!(f, "queue"),
            Self::Address => write!(f, "address"),
            Self::Divert => write!(f, "divert"),
            Self::AddressSetting => write!(f, "address setting"),
        }
    }
}

/// Ordering class for creates and deletes.
///
/// A tier is a full barrier: nothing in a later tier starts before every
/// call of the earlier tier has returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tier {
    /// No dependencies on other entities.
    Independent,
    /// Needs an independent entity (its address) to exist first.
    Dependent,
}

impl Tier {
    /// Tiers in creation order. Deletion walks this in reverse.
    pub const ORDERED: [Self; 2] = [Self::Independent, Self::Dependent];
}

/// Message routing semantics of an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RoutingType {
    /// Point-to-point.
    Anycast,
    /// Publish-subscribe.
    Multicast,
}

impl fmt::Display for RoutingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anycast => write!(f, "ANYCAST"),
            Self::Multicast => write!(f, "MULTICAST"),
        }
    }
}

impl FromStr for RoutingType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "anycast" => Ok(Self::Anycast),
            "multicast" => Ok(Self::Multicast),
            other => Err(Error::config_error(format!("unknown routing type '{other}'"))),
        }
    }
}

/// A queue. Serialized as the broker's queue configuration JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BrokerQueue {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routing_type: Option<RoutingType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_consumers: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub durable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purge_on_no_consumers: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_create_address: Option<bool>,
}

impl BrokerQueue {
    /// Create a queue with only a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Bind the queue to an address.
    #[must_use]
    pub fn on_address(mut self, address: impl Into<String>, routing_type: RoutingType) -> Self {
        self.address = Some(address.into());
        self.routing_type = Some(routing_type);
        self
    }

    /// Mark the queue durable.
    #[must_use]
    pub const fn durable(mut self, durable: bool) -> Self {
        self.durable = Some(durable);
        self
    }

    /// Limit consumers (-1 for unlimited).
    #[must_use]
    pub const fn max_consumers(mut self, max: i32) -> Self {
        self.max_consumers = Some(max);
        self
    }
}

/// An address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerAddress {
    pub name: String,
    /// Unknown for addresses discovered by a bulk read.
    pub routing_type: Option<RoutingType>,
}

impl BrokerAddress {
    /// Create an address with a routing type.
    pub fn new(name: impl Into<String>, routing_type: RoutingType) -> Self {
        Self {
            name: name.into(),
            routing_type: Some(routing_type),
        }
    }

    /// Create an address whose routing type is unknown.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            routing_type: None,
        }
    }
}

/// A divert forwarding messages from one address to another.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerDivert {
    pub name: String,
    pub routing_name: String,
    pub source_address: String,
    pub forwarding_address: String,
    pub exclusive: bool,
    pub filter_expression: Option<String>,
}

impl BrokerDivert {
    /// Create a non-exclusive divert without a filter.
    pub fn new(
        name: impl Into<String>,
        source_address: impl Into<String>,
        forwarding_address: impl Into<String>,
    ) -> Self {
        let name = name.into();
        Self {
            routing_name: name.clone(),
            name,
            source_address: source_address.into(),
            forwarding_address: forwarding_address.into(),
            exclusive: false,
            filter_expression: None,
        }
    }

    /// Create a divert known only by name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Make the divert exclusive.
    #[must_use]
    pub const fn exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    /// Only divert messages matching `filter`.
    #[must_use]
    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter_expression = Some(filter.into());
        self
    }
}

/// Address-level policy for a match pattern.
///
/// Field names follow the JSON the broker emits from `getAddressSettingsAsJSON`.
/// Missing and `null` fields both decode to the zero value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BrokerAddressSetting {
    /// Match pattern. Not part of the broker's JSON.
    #[serde(skip)]
    pub name: String,
    #[serde(rename = "DLA", deserialize_with = "null_as_default")]
    pub dead_letter_address: String,
    #[serde(deserialize_with = "null_as_default")]
    pub expiry_address: String,
    #[serde(deserialize_with = "null_as_default")]
    pub expiry_delay: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub last_value_queue: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub max_delivery_attempts: i32,
    #[serde(deserialize_with = "null_as_default")]
    pub max_size_bytes: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub page_size_bytes: i32,
    #[serde(deserialize_with = "null_as_default")]
    pub page_cache_max_size: i32,
    #[serde(deserialize_with = "null_as_default")]
    pub redelivery_delay: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub redelivery_multiplier: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub max_redelivery_delay: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub redistribution_delay: i64,
    #[serde(rename = "sendToDLAOnNoRoute", deserialize_with = "null_as_default")]
    pub send_to_dla_on_no_route: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub address_full_message_policy: String,
    #[serde(deserialize_with = "null_as_default")]
    pub slow_consumer_threshold: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub slow_consumer_check_period: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub slow_consumer_policy: String,
    #[serde(deserialize_with = "null_as_default")]
    pub auto_create_jms_queues: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub auto_delete_jms_queues: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub auto_create_jms_topics: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub auto_delete_jms_topics: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub auto_create_queues: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub auto_delete_queues: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub auto_create_addresses: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub auto_delete_addresses: bool,
}

impl BrokerAddressSetting {
    /// Create settings for a match with all policy fields at their zero value.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Positional arguments for `addAddressSettings`.
    fn arguments(&self) -> Vec<Value> {
        vec![
            json!(self.name),
            json!(self.dead_letter_address),
            json!(self.expiry_address),
            json!(self.expiry_delay),
            json!(self.last_value_queue),
            json!(self.max_delivery_attempts),
            json!(self.max_size_bytes),
            json!(self.page_size_bytes),
            json!(self.page_cache_max_size),
            json!(self.redelivery_delay),
            json!(self.redelivery_multiplier),
            json!(self.max_redelivery_delay),
            json!(self.redistribution_delay),
            json!(self.send_to_dla_on_no_route),
            json!(self.address_full_message_policy),
            json!(self.slow_consumer_threshold),
            json!(self.slow_consumer_check_period),
            json!(self.slow_consumer_policy),
            json!(self.auto_create_jms_queues),
            json!(self.auto_delete_jms_queues),
            json!(self.auto_create_jms_topics),
            json!(self.auto_delete_jms_topics),
            json!(self.auto_create_queues),
            json!(self.auto_delete_queues),
            json!(self.auto_create_addresses),
            json!(self.auto_delete_addresses),
        ]
    }
}

/// Decode `null` as the type's default.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Any broker-managed object.
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEntity {
    Queue(BrokerQueue),
    Address(BrokerAddress),
    Divert(BrokerDivert),
    AddressSetting(Box<BrokerAddressSetting>),
}

impl From<BrokerQueue> for BrokerEntity {
    fn from(queue: BrokerQueue) -> Self {
        Self::Queue(queue)
    }
}

impl From<BrokerAddress> for BrokerEntity {
    fn from(address: BrokerAddress) -> Self {
        Self::Address(address)
    }
}

impl From<BrokerDivert> for BrokerEntity {
    fn from(divert: BrokerDivert) -> Self {
        Self::Divert(divert)
    }
}

impl From<BrokerAddressSetting> for BrokerEntity {
    fn from(setting: BrokerAddressSetting) -> Self {
        Self::AddressSetting(Box::new(setting))
    }
}

impl BrokerEntity {
    /// Kind of this entity.
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::Queue(_) => EntityKind::Queue,
            Self::Address(_) => EntityKind::Address,
            Self::Divert(_) => EntityKind::Divert,
            Self::AddressSetting(_) => EntityKind::AddressSetting,
        }
    }

    /// Name, unique within the kind.
    pub fn name(&self) -> &str {
        match self {
            Self::Queue(q) => &q.name,
            Self::Address(a) => &a.name,
            Self::Divert(d) => &d.name,
            Self::AddressSetting(s) => &s.name,
        }
    }

    /// Ordering tier.
    pub const fn tier(&self) -> Tier {
        self.kind().tier()
    }

    /// Whether `other` counts as already converged with `self`.
    ///
    /// Identity must match. Addresses additionally compare routing types when
    /// both sides know theirs; bulk reads only return names, so a mirrored
    /// address with an unknown routing type matches any desired one.
    pub fn is_equivalent(&self, other: &Self) -> bool {
        if self.kind() != other.kind() || self.name() != other.name() {
            return false;
        }
        match (self, other) {
            (Self::Address(a), Self::Address(b)) => match (a.routing_type, b.routing_type) {
                (Some(left), Some(right)) => left == right,
                _ => true,
            },
            // TODO: compare setting fields once address settings support updates
            _ => true,
        }
    }

    fn create_call(&self) -> Result<(&'static str, Vec<Value>)> {
        Ok(match self {
            Self::Queue(q) => ("createQueue", vec![json!(serde_json::to_string(q)?)]),
            Self::Address(a) => (
                "createAddress",
                vec![
                    json!(a.name),
                    json!(a.routing_type.map(|r| r.to_string()).unwrap_or_default()),
                ],
            ),
            Self::Divert(d) => (
                "createDivert",
                vec![
                    json!(d.name),
                    json!(d.routing_name),
                    json!(d.source_address),
                    json!(d.forwarding_address),
                    json!(d.exclusive),
                    json!(d.filter_expression),
                    Value::Null,
                ],
            ),
            Self::AddressSetting(s) => ("addAddressSettings", s.arguments()),
        })
    }

    fn delete_call(&self) -> (&'static str, Vec<Value>) {
        match self {
            Self::Queue(q) => ("destroyQueue", vec![json!(q.name), json!(true)]),
            Self::Address(a) => ("deleteAddress", vec![json!(a.name), json!(true)]),
            Self::Divert(d) => ("destroyDivert", vec![json!(d.name)]),
            Self::AddressSetting(s) => ("removeAddressSettings", vec![json!(s.name)]),
        }
    }

    /// Create this entity on the broker.
    ///
    /// # Errors
    /// Returns the transport or protocol error of the management call.
    pub async fn create(&self, management: &ManagementClient) -> Result<()> {
        let (operation, arguments) = self.create_call()?;
        info!(
            broker = %management.addr(),
            kind = %self.kind(),
            name = %self.name(),
            "Creating broker entity"
        );

        management
            .invoke(&management.request(operation, arguments))
            .await?;

        info!(
            broker = %management.addr(),
            kind = %self.kind(),
            name = %self.name(),
            "Broker entity created"
        );
        Ok(())
    }

    /// Delete this entity from the broker.
    ///
    /// # Errors
    /// Returns the transport or protocol error of the management call.
    pub async fn delete(&self, management: &ManagementClient) -> Result<()> {
        let (operation, arguments) = self.delete_call();
        info!(
            broker = %management.addr(),
            kind = %self.kind(),
            name = %self.name(),
            "Deleting broker entity"
        );

        management
            .invoke(&management.request(operation, arguments))
            .await?;

        info!(
            broker = %management.addr(),
            kind = %self.kind(),
            name = %self.name(),
            "Broker entity deleted"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]
    #![allow(clippy::indexing_slicing)]

    use super::*;

    #[test]
    fn test_tiers() {
        assert_eq!(BrokerEntity::from(BrokerQueue::new("q1")).tier(), Tier::Dependent);
        assert_eq!(
            BrokerEntity::from(BrokerAddress::new("a1", RoutingType::Anycast)).tier(),
            Tier::Independent
        );
        assert_eq!(BrokerEntity::from(BrokerDivert::named("d1")).tier(), Tier::Independent);
        assert_eq!(
            BrokerEntity::from(BrokerAddressSetting::new("q1")).tier(),
            Tier::Independent
        );
        assert_eq!(Tier::ORDERED, [Tier::Independent, Tier::Dependent]);
    }

    #[test]
    fn test_identity_equivalence_ignores_fields() {
        let mirrored = BrokerEntity::from(BrokerQueue::new("q1"));
        let desired = BrokerEntity::from(BrokerQueue::new("q1").on_address("a1", RoutingType::Anycast));
        assert!(mirrored.is_equivalent(&desired));

        let mirrored = BrokerEntity::from(BrokerDivert::named("d1"));
        let desired = BrokerEntity::from(BrokerDivert::new("d1", "a1", "a2").exclusive(true));
        assert!(mirrored.is_equivalent(&desired));

        let mirrored = BrokerEntity::from(BrokerAddressSetting::new("q1"));
        let desired = BrokerEntity::from(BrokerAddressSetting {
            dead_letter_address: "dlq".to_string(),
            ..BrokerAddressSetting::new("q1")
        });
        assert!(mirrored.is_equivalent(&desired));
    }

    #[test]
    fn test_address_routing_type_divergence() {
        let anycast = BrokerEntity::from(BrokerAddress::new("a1", RoutingType::Anycast));
        let multicast = BrokerEntity::from(BrokerAddress::new("a1", RoutingType::Multicast));
        let discovered = BrokerEntity::from(BrokerAddress::named("a1"));

        assert!(!anycast.is_equivalent(&multicast));
        assert!(discovered.is_equivalent(&multicast));
        assert!(anycast.is_equivalent(&discovered));
    }

    #[test]
    fn test_different_kinds_never_equivalent() {
        let queue = BrokerEntity::from(BrokerQueue::new("x"));
        let address = BrokerEntity::from(BrokerAddress::named("x"));
        assert!(!queue.is_equivalent(&address));
    }

    #[test]
    fn test_queue_create_sends_configuration_json() {
        let queue = BrokerEntity::from(
            BrokerQueue::new("q1")
                .on_address("a1", RoutingType::Anycast)
                .durable(true),
        );
        let (operation, arguments) = queue.create_call().unwrap();

        assert_eq!(operation, "createQueue");
        assert_eq!(arguments.len(), 1);
        let config: Value = serde_json::from_str(arguments[0].as_str().unwrap()).unwrap();
        assert_eq!(
            config,
            json!({ "name": "q1", "address": "a1", "routing-type": "ANYCAST", "durable": true })
        );
    }

    #[test]
    fn test_divert_create_arguments_order() {
        let divert = BrokerEntity::from(BrokerDivert::new("d1", "src", "dst").filter("color='red'"));
        let (operation, arguments) = divert.create_call().unwrap();

        assert_eq!(operation, "createDivert");
        assert_eq!(
            arguments,
            vec![
                json!("d1"),
                json!("d1"),
                json!("src"),
                json!("dst"),
                json!(false),
                json!("color='red'"),
                Value::Null
            ]
        );
    }

    #[test]
    fn test_address_setting_arguments_follow_broker_keys() {
        let setting = BrokerAddressSetting {
            dead_letter_address: "dlq".to_string(),
            redelivery_multiplier: 1.5,
            auto_delete_addresses: true,
            ..BrokerAddressSetting::new("orders")
        };
        let arguments = setting.arguments();

        assert_eq!(arguments.len(), mqop_command::ADDRESS_SETTING_KEYS.len() + 1);
        assert_eq!(arguments[0], json!("orders"));

        let encoded = serde_json::to_value(&setting).unwrap();
        for (key, argument) in mqop_command::ADDRESS_SETTING_KEYS.iter().zip(&arguments[1..]) {
            assert_eq!(encoded.get(*key), Some(argument), "key {key}");
        }
    }

    #[test]
    fn test_delete_calls() {
        let queue = BrokerEntity::from(BrokerQueue::new("q1"));
        assert_eq!(queue.delete_call(), ("destroyQueue", vec![json!("q1"), json!(true)]));

        let setting = BrokerEntity::from(BrokerAddressSetting::new("q1"));
        assert_eq!(setting.delete_call(), ("removeAddressSettings", vec![json!("q1")]));
    }

    #[test]
    fn test_routing_type_parse() {
        assert_eq!("anycast".parse::<RoutingType>().unwrap(), RoutingType::Anycast);
        assert_eq!("MULTICAST".parse::<RoutingType>().unwrap(), RoutingType::Multicast);
        assert!("broadcast".parse::<RoutingType>().is_err());
    }
}
