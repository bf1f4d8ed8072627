//! In-process command client backed by a simulated broker.
//!
//! [`InMemoryCommandClient`] answers the broker management operations used by
//! the reconciler against an in-memory model of queues, addresses, diverts and
//! address settings. It records every request and lets callers inject faults,
//! which makes it the workhorse of the reconciler's tests.
//!
//! # Fault injection
//!
//! - [`FaultKind::Reject`]: the broker replies with the success marker unset
//! - [`FaultKind::Disconnect`]: the request fails with a transport error
//! - [`FaultKind::Stall`]: no reply arrives; the request times out
//!
//! Simulated latency counts against the request deadline, so a latency longer
//! than the timeout also fails with [`TransportError::Timeout`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use crate::{CommandClient, Message, TransportError, TransportResult};

/// Keys of an address-setting object, in the order `addAddressSettings`
/// takes them as positional arguments after the match name.
pub const ADDRESS_SETTING_KEYS: [&str; 25] = [
    "DLA",
    "expiryAddress",
    "expiryDelay",
    "lastValueQueue",
    "maxDeliveryAttempts",
    "maxSizeBytes",
    "pageSizeBytes",
    "pageCacheMaxSize",
    "redeliveryDelay",
    "redeliveryMultiplier",
    "maxRedeliveryDelay",
    "redistributionDelay",
    "sendToDLAOnNoRoute",
    "addressFullMessagePolicy",
    "slowConsumerThreshold",
    "slowConsumerCheckPeriod",
    "slowConsumerPolicy",
    "autoCreateJmsQueues",
    "autoDeleteJmsQueues",
    "autoCreateJmsTopics",
    "autoDeleteJmsTopics",
    "autoCreateQueues",
    "autoDeleteQueues",
    "autoCreateAddresses",
    "autoDeleteAddresses",
];

/// How an injected fault manifests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Reply without the success marker.
    Reject,
    /// Fail with a transport disconnect.
    Disconnect,
    /// Never reply; the request times out.
    Stall,
}

/// A request as seen by the simulated broker.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    /// Management operation name.
    pub operation: String,
    /// Decoded positional arguments.
    pub arguments: Vec<Value>,
}

/// Start/finish marker for a request, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    /// Request received.
    Started {
        /// Management operation name.
        operation: String,
        /// Entity the request targets, if any.
        entity: Option<String>,
    },
    /// Reply (or failure) produced.
    Finished {
        /// Management operation name.
        operation: String,
        /// Entity the request targets, if any.
        entity: Option<String>,
    },
}

#[derive(Debug, Clone)]
struct Fault {
    operation: String,
    entity: Option<String>,
    kind: FaultKind,
}

#[derive(Debug, Default)]
struct BrokerModel {
    queues: BTreeMap<String, Value>,
    addresses: BTreeMap<String, String>,
    diverts: BTreeMap<String, Vec<Value>>,
    address_settings: BTreeMap<String, Value>,
    faults: Vec<Fault>,
    requests: Vec<RecordedRequest>,
    events: Vec<CallEvent>,
}

/// In-process [`CommandClient`] simulating a broker management endpoint.
#[derive(Debug)]
pub struct InMemoryCommandClient {
    addr: String,
    latency: Duration,
    started: AtomicBool,
    reconnects: AtomicU64,
    model: Mutex<BrokerModel>,
}

impl InMemoryCommandClient {
    /// Create a stopped client for the given diagnostic address.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            latency: Duration::ZERO,
            started: AtomicBool::new(false),
            reconnects: AtomicU64::new(0),
            model: Mutex::new(BrokerModel::default()),
        }
    }

    /// Delay every reply by `latency`.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn lock(&self) -> MutexGuard<'_, BrokerModel> {
        self.model.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pre-populate a queue.
    pub fn seed_queue(&self, name: &str) {
        let config = serde_json::json!({ "name": name });
        self.lock().queues.insert(name.to_string(), config);
    }

    /// Pre-populate an address.
    pub fn seed_address(&self, name: &str, routing_type: &str) {
        self.lock()
            .addresses
            .insert(name.to_string(), routing_type.to_string());
    }

    /// Pre-populate a divert.
    pub fn seed_divert(&self, name: &str) {
        self.lock().diverts.insert(name.to_string(), Vec::new());
    }

    /// Pre-populate the settings returned for a match.
    pub fn seed_address_setting(&self, name: &str, setting: Value) {
        self.lock()
            .address_settings
            .insert(name.to_string(), setting);
    }

    /// Fail every request for `operation`.
    pub fn fail_operation(&self, operation: &str, kind: FaultKind) {
        self.lock().faults.push(Fault {
            operation: operation.to_string(),
            entity: None,
            kind,
        });
    }

    /// Fail requests for `operation` that target `entity`.
    pub fn fail_entity(&self, operation: &str, entity: &str, kind: FaultKind) {
        self.lock().faults.push(Fault {
            operation: operation.to_string(),
            entity: Some(entity.to_string()),
            kind,
        });
    }

    /// Remove all injected faults.
    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    /// Bump the reconnect counter as if the link dropped and came back.
    pub fn simulate_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
    }

    /// Whether the client is currently started.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// All requests received so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().requests.clone()
    }

    /// Number of requests received for `operation`.
    pub fn count(&self, operation: &str) -> usize {
        self.lock()
            .requests
            .iter()
            .filter(|r| r.operation == operation)
            .count()
    }

    /// Forget recorded requests and call events.
    pub fn clear_requests(&self) {
        let mut model = self.lock();
        model.requests.clear();
        model.events.clear();
    }

    /// Start/finish markers for every request, in order.
    pub fn events(&self) -> Vec<CallEvent> {
        self.lock().events.clone()
    }

    /// Names of the queues on the simulated broker.
    pub fn queue_names(&self) -> Vec<String> {
        self.lock().queues.keys().cloned().collect()
    }

    /// Addresses on the simulated broker with their routing type.
    pub fn addresses(&self) -> BTreeMap<String, String> {
        self.lock().addresses.clone()
    }

    /// Names of the diverts on the simulated broker.
    pub fn divert_names(&self) -> Vec<String> {
        self.lock().diverts.keys().cloned().collect()
    }

    /// Address settings on the simulated broker, keyed by match.
    pub fn address_settings(&self) -> BTreeMap<String, Value> {
        self.lock().address_settings.clone()
    }

    fn record_start(&self, operation: &str, arguments: Vec<Value>, entity: Option<String>) {
        let mut model = self.lock();
        model.requests.push(RecordedRequest {
            operation: operation.to_string(),
            arguments,
        });
        model.events.push(CallEvent::Started {
            operation: operation.to_string(),
            entity,
        });
    }

    fn record_finish(&self, operation: &str, entity: Option<String>) {
        self.lock().events.push(CallEvent::Finished {
            operation: operation.to_string(),
            entity,
        });
    }

    fn fault_for(&self, operation: &str, entity: Option<&str>) -> Option<FaultKind> {
        self.lock()
            .faults
            .iter()
            .find(|f| {
                f.operation == operation
                    && f.entity
                        .as_deref()
                        .is_none_or(|name| Some(name) == entity)
            })
            .map(|f| f.kind)
    }

    fn apply(&self, operation: &str, arguments: &[Value]) -> Message {
        let mut model = self.lock();
        let name = string_arg(arguments, 0);

        match operation {
            "getQueueNames" => names_reply(model.queues.keys()),
            "getAddressNames" => names_reply(model.addresses.keys()),
            "getDivertNames" => names_reply(model.diverts.keys()),
            "getAddressSettingsAsJSON" => {
                let entries: Vec<Value> = model
                    .address_settings
                    .get(&name)
                    .map(|setting| Value::String(setting.to_string()))
                    .into_iter()
                    .collect();
                Message::reply(true, Value::Array(entries).to_string())
            }
            "createQueue" => {
                let Some(config) = queue_config(arguments) else {
                    return Message::reply(false, "AMQ229000: invalid queue configuration");
                };
                let queue = config
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if model.queues.contains_key(&queue) {
                    return Message::reply(false, format!("AMQ229019: Queue {queue} already exists"));
                }
                model.queues.insert(queue, config);
                Message::reply(true, Value::Null)
            }
            "destroyQueue" => match model.queues.remove(&name) {
                Some(_) => Message::reply(true, Value::Null),
                None => Message::reply(false, format!("AMQ229017: Queue {name} does not exist")),
            },
            "createAddress" => {
                if model.addresses.contains_key(&name) {
                    return Message::reply(false, format!("AMQ229204: Address already exists: {name}"));
                }
                model.addresses.insert(name, string_arg(arguments, 1));
                Message::reply(true, Value::Null)
            }
            "deleteAddress" => match model.addresses.remove(&name) {
                Some(_) => Message::reply(true, Value::Null),
                None => Message::reply(false, format!("AMQ229203: Address Does Not Exist: {name}")),
            },
            "createDivert" => {
                if model.diverts.contains_key(&name) {
                    return Message::reply(false, format!("AMQ229034: Divert {name} already exists"));
                }
                model.diverts.insert(name, arguments.to_vec());
                Message::reply(true, Value::Null)
            }
            "destroyDivert" => match model.diverts.remove(&name) {
                Some(_) => Message::reply(true, Value::Null),
                None => Message::reply(false, format!("AMQ229038: Divert {name} does not exist")),
            },
            "addAddressSettings" => {
                let setting: Map<String, Value> = ADDRESS_SETTING_KEYS
                    .iter()
                    .zip(arguments.iter().skip(1))
                    .map(|(key, value)| ((*key).to_string(), value.clone()))
                    .collect();
                model.address_settings.insert(name, Value::Object(setting));
                Message::reply(true, Value::Null)
            }
            "removeAddressSettings" => {
                model.address_settings.remove(&name);
                Message::reply(true, Value::Null)
            }
            other => Message::reply(false, format!("unknown operation {other}")),
        }
    }
}

#[async_trait]
impl CommandClient for InMemoryCommandClient {
    fn start(&self) {
        if !self.started.swap(true, Ordering::SeqCst) {
            self.reconnects.fetch_add(1, Ordering::SeqCst);
            debug!(addr = %self.addr, "In-memory client started");
        }
    }

    fn stop(&self) {
        if self.started.swap(false, Ordering::SeqCst) {
            debug!(addr = %self.addr, "In-memory client stopped");
        }
    }

    async fn request_with_timeout(
        &self,
        request: Message,
        timeout: Duration,
    ) -> TransportResult<Message> {
        if !self.is_started() {
            return Err(TransportError::not_started(&self.addr));
        }

        let operation = request.operation_name().unwrap_or_default().to_string();
        let arguments = decode_arguments(&request)?;
        let entity = entity_name(&operation, &arguments);

        self.record_start(&operation, arguments.clone(), entity.clone());
        let fault = self.fault_for(&operation, entity.as_deref());

        let exchange = async {
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }

            match fault {
                Some(FaultKind::Stall) => std::future::pending::<TransportResult<Message>>().await,
                Some(FaultKind::Disconnect) => Err(TransportError::disconnected(
                    &self.addr,
                    "connection reset by peer",
                )),
                Some(FaultKind::Reject) => Ok(Message::reply(
                    false,
                    format!("AMQ229000: {operation} rejected"),
                )),
                None => Ok(self.apply(&operation, &arguments)),
            }
        };

        // A reply that misses the deadline is never applied.
        let reply = match tokio::time::timeout(timeout, exchange).await {
            Ok(reply) => reply,
            Err(_) => {
                let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                Err(TransportError::timeout(&self.addr, timeout_ms))
            }
        };

        self.record_finish(&operation, entity);
        reply
    }

    fn reconnect_count(&self) -> u64 {
        self.reconnects.load(Ordering::SeqCst)
    }

    fn addr(&self) -> &str {
        &self.addr
    }
}

fn decode_arguments(request: &Message) -> TransportResult<Vec<Value>> {
    match &request.value {
        None => Ok(Vec::new()),
        Some(Value::String(body)) => {
            serde_json::from_str(body).map_err(|e| TransportError::encode_failed(e.to_string()))
        }
        Some(other) => Err(TransportError::encode_failed(format!(
            "request body must be a JSON string, got {other}"
        ))),
    }
}

fn string_arg(arguments: &[Value], index: usize) -> String {
    arguments
        .get(index)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn queue_config(arguments: &[Value]) -> Option<Value> {
    arguments
        .first()
        .and_then(Value::as_str)
        .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
        .filter(Value::is_object)
}

fn entity_name(operation: &str, arguments: &[Value]) -> Option<String> {
    if operation == "createQueue" {
        return queue_config(arguments)
            .and_then(|config| config.get("name").and_then(Value::as_str).map(str::to_string));
    }
    arguments.first().and_then(Value::as_str).map(str::to_string)
}

fn names_reply<'a>(names: impl Iterator<Item = &'a String>) -> Message {
    let list: Vec<&String> = names.collect();
    let body = serde_json::json!([list]).to_string();
    Message::reply(true, body)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]

    use super::*;
    use crate::message::OPERATION_NAME_PROPERTY;

    fn request(operation: &str, arguments: Value) -> Message {
        Message::new()
            .with_property(OPERATION_NAME_PROPERTY, operation)
            .with_value(arguments.to_string())
    }

    #[tokio::test]
    async fn test_request_before_start_fails() {
        let client = InMemoryCommandClient::new("mem://b1");
        let result = client
            .request_with_timeout(request("getQueueNames", serde_json::json!([])), Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(TransportError::NotStarted { .. })));
    }

    #[tokio::test]
    async fn test_start_stop_bumps_reconnect_count() {
        let client = InMemoryCommandClient::new("mem://b1");
        assert_eq!(client.reconnect_count(), 0);

        client.start();
        client.start();
        assert_eq!(client.reconnect_count(), 1);

        client.stop();
        client.start();
        assert_eq!(client.reconnect_count(), 2);
    }

    #[tokio::test]
    async fn test_names_reply_is_nested_list() {
        let client = InMemoryCommandClient::new("mem://b1");
        client.seed_queue("q1");
        client.seed_queue("q2");
        client.start();

        let reply = client
            .request_with_timeout(request("getQueueNames", serde_json::json!([])), Duration::from_secs(1))
            .await
            .unwrap();

        let body = reply.value.and_then(|v| v.as_str().map(str::to_string)).unwrap();
        let names: Vec<Vec<String>> = serde_json::from_str(&body).unwrap();
        assert_eq!(names, vec![vec!["q1".to_string(), "q2".to_string()]]);
    }

    #[tokio::test]
    async fn test_duplicate_address_is_rejected() {
        let client = InMemoryCommandClient::new("mem://b1");
        client.seed_address("a1", "ANYCAST");
        client.start();

        let reply = client
            .request_with_timeout(
                request("createAddress", serde_json::json!(["a1", "ANYCAST"])),
                Duration::from_secs(1),
            )
            .await
            .unwrap();

        assert_eq!(
            reply.property(crate::message::OPERATION_SUCCEEDED_PROPERTY),
            Some(&Value::Bool(false))
        );
    }

    #[tokio::test]
    async fn test_entity_fault_only_hits_named_entity() {
        let client = InMemoryCommandClient::new("mem://b1");
        client.fail_entity("createAddress", "a2", FaultKind::Disconnect);
        client.start();

        let ok = client
            .request_with_timeout(
                request("createAddress", serde_json::json!(["a1", "ANYCAST"])),
                Duration::from_secs(1),
            )
            .await;
        assert!(ok.is_ok());

        let failed = client
            .request_with_timeout(
                request("createAddress", serde_json::json!(["a2", "ANYCAST"])),
                Duration::from_secs(1),
            )
            .await;
        assert!(matches!(failed, Err(TransportError::Disconnected { .. })));
        assert_eq!(client.addresses().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_times_out() {
        let client = InMemoryCommandClient::new("mem://b1");
        client.fail_operation("getAddressNames", FaultKind::Stall);
        client.start();

        let result = client
            .request_with_timeout(request("getAddressNames", serde_json::json!([])), Duration::from_secs(10))
            .await;
        assert_eq!(result, Err(TransportError::timeout("mem://b1", 10_000)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_beyond_deadline_times_out() {
        let client = InMemoryCommandClient::new("mem://b1").with_latency(Duration::from_secs(30));
        client.start();

        let result = client
            .request_with_timeout(
                request("createAddress", serde_json::json!(["a1", "ANYCAST"])),
                Duration::from_secs(2),
            )
            .await;
        assert_eq!(result, Err(TransportError::timeout("mem://b1", 2_000)));
        assert!(client.addresses().is_empty());

        let result = client
            .request_with_timeout(request("getQueueNames", serde_json::json!([])), Duration::from_secs(60))
            .await;
        assert!(result.is_ok());
    }
}
