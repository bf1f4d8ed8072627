//! Broker management protocol codec.
//!
//! A management call names a resource, an operation, an optional attribute,
//! and a JSON-encoded list of positional arguments. The reply counts as a
//! success only when it carries the `_AMQ_OperationSucceeded` marker set to
//! `true`; anything else surfaces the raw reply payload in the error.

use std::sync::Arc;
use std::time::Duration;

use mqop_command::{
    ATTRIBUTE_PROPERTY, CommandClient, Message, OPERATION_NAME_PROPERTY,
    OPERATION_SUCCEEDED_PROPERTY, RESOURCE_NAME_PROPERTY,
};
use serde_json::Value;
use tracing::debug;

use crate::entity::BrokerAddressSetting;
use crate::error::{Error, Result};

/// Resource name for broker-level operations.
pub const BROKER_RESOURCE: &str = "broker";

/// Deadline for a single management round trip.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A management operation invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagementRequest {
    /// Managed resource, usually [`BROKER_RESOURCE`].
    pub resource: String,
    /// Operation name, e.g. `createQueue`.
    pub operation: String,
    /// Attribute name for attribute reads.
    pub attribute: Option<String>,
    /// Positional arguments.
    pub arguments: Vec<Value>,
}

impl ManagementRequest {
    /// Create a request for `operation` on the broker resource with no arguments.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            resource: BROKER_RESOURCE.to_string(),
            operation: operation.into(),
            attribute: None,
            arguments: Vec::new(),
        }
    }

    /// Set the positional arguments.
    #[must_use]
    pub fn with_arguments(mut self, arguments: Vec<Value>) -> Self {
        self.arguments = arguments;
        self
    }

    /// Set the attribute name.
    #[must_use]
    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }

    /// Override the resource name.
    #[must_use]
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = resource.into();
        self
    }

    /// Encode into a wire message.
    ///
    /// # Errors
    /// Returns `Error::Json` if the arguments cannot be serialized.
    pub fn to_message(&self) -> Result<Message> {
        let body = if self.arguments.is_empty() {
            "[]".to_string()
        } else {
            serde_json::to_string(&self.arguments)?
        };

        let mut message =
            Message::new().with_property(RESOURCE_NAME_PROPERTY, self.resource.as_str());
        if !self.operation.is_empty() {
            message = message.with_property(OPERATION_NAME_PROPERTY, self.operation.as_str());
        }
        if let Some(attribute) = self.attribute.as_deref().filter(|a| !a.is_empty()) {
            message = message.with_property(ATTRIBUTE_PROPERTY, attribute);
        }
        Ok(message.with_value(body))
    }
}

/// Whether a reply carries the success marker set to `true`.
pub fn succeeded(reply: &Message) -> bool {
    reply
        .property(OPERATION_SUCCEEDED_PROPERTY)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Render a reply payload for diagnostics.
fn describe(value: Option<&Value>) -> String {
    match value {
        None => "<no value>".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Issues management calls against one broker.
#[derive(Clone)]
pub struct ManagementClient {
    client: Arc<dyn CommandClient>,
    resource: String,
    timeout: Duration,
}

impl std::fmt::Debug for ManagementClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagementClient")
            .field("addr", &self.client.addr())
            .field("resource", &self.resource)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ManagementClient {
    /// Create a management client over a command transport.
    pub fn new(
        client: Arc<dyn CommandClient>,
        resource: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            resource: resource.into(),
            timeout,
        }
    }

    /// The underlying transport.
    pub fn transport(&self) -> &Arc<dyn CommandClient> {
        &self.client
    }

    /// Diagnostic address of the broker.
    pub fn addr(&self) -> &str {
        self.client.addr()
    }

    /// Build a request for `operation` against this client's resource.
    pub fn request(&self, operation: &str, arguments: Vec<Value>) -> ManagementRequest {
        ManagementRequest::new(operation)
            .with_resource(self.resource.as_str())
            .with_arguments(arguments)
    }

    /// Send a request and return the reply payload.
    ///
    /// # Errors
    /// - `Error::Transport` if the round trip fails or times out
    /// - `Error::ProtocolFailure` if the reply lacks the success marker
    pub async fn invoke(&self, request: &ManagementRequest) -> Result<Option<Value>> {
        let message = request.to_message()?;
        debug!(
            broker = %self.addr(),
            operation = %request.operation,
            "Sending management request"
        );

        let reply = self
            .client
            .request_with_timeout(message, self.timeout)
            .await?;

        if !succeeded(&reply) {
            return Err(Error::protocol_failure(
                request.operation.as_str(),
                describe(reply.value.as_ref()),
            ));
        }
        Ok(reply.value)
    }

    /// Invoke `operation` and require a JSON string payload.
    ///
    /// # Errors
    /// As [`ManagementClient::invoke`], plus `Error::UnexpectedValueShape`
    /// when the payload is not a string.
    pub async fn invoke_for_string(
        &self,
        operation: &str,
        arguments: Vec<Value>,
    ) -> Result<String> {
        let value = self.invoke(&self.request(operation, arguments)).await?;
        string_value(operation, value)
    }
}

/// Require a reply payload to be a string.
///
/// # Errors
/// Returns `Error::UnexpectedValueShape` for any other payload.
pub fn string_value(operation: &str, value: Option<Value>) -> Result<String> {
    match value {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(Error::unexpected_value(
            operation,
            format!("expected a JSON string, got {}", type_name(&other)),
        )),
        None => Err(Error::unexpected_value(operation, "missing value")),
    }
}

/// Decode a bulk-listing payload (`[["a","b"],["c"]]`) into a flat name list.
///
/// # Errors
/// Returns `Error::UnexpectedValueShape` if the payload is not a nested string array.
pub fn decode_name_lists(operation: &str, payload: &str) -> Result<Vec<String>> {
    let lists: Vec<Vec<String>> = serde_json::from_str(payload)
        .map_err(|e| Error::unexpected_value(operation, e.to_string()))?;
    Ok(lists.into_iter().flatten().collect())
}

/// Decode an address-settings payload: an array of JSON-encoded setting objects.
///
/// # Errors
/// Returns `Error::UnexpectedValueShape` if the outer array or any blob fails to decode.
pub fn decode_setting_blobs(operation: &str, payload: &str) -> Result<Vec<BrokerAddressSetting>> {
    let blobs: Vec<String> = serde_json::from_str(payload)
        .map_err(|e| Error::unexpected_value(operation, e.to_string()))?;
    blobs
        .iter()
        .map(|blob| {
            serde_json::from_str::<BrokerAddressSetting>(blob)
                .map_err(|e| Error::unexpected_value(operation, e.to_string()))
        })
        .collect()
}

const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]
    #![allow(clippy::indexing_slicing)]

    use super::*;
    use mqop_command::{FaultKind, InMemoryCommandClient};
    use serde_json::json;

    #[test]
    fn test_request_without_arguments_encodes_empty_list() {
        let message = ManagementRequest::new("getQueueNames").to_message().unwrap();

        assert_eq!(message.value, Some(Value::String("[]".to_string())));
        assert_eq!(message.property(RESOURCE_NAME_PROPERTY), Some(&json!("broker")));
        assert_eq!(message.operation_name(), Some("getQueueNames"));
        assert_eq!(message.property(ATTRIBUTE_PROPERTY), None);
    }

    #[test]
    fn test_request_arguments_keep_order() {
        let message = ManagementRequest::new("destroyQueue")
            .with_arguments(vec![json!("q1"), json!(true)])
            .with_attribute("Version")
            .to_message()
            .unwrap();

        assert_eq!(message.value, Some(Value::String(r#"["q1",true]"#.to_string())));
        assert_eq!(message.property(ATTRIBUTE_PROPERTY), Some(&json!("Version")));
    }

    #[test]
    fn test_success_requires_true_marker() {
        assert!(succeeded(&Message::reply(true, "ok")));
        assert!(!succeeded(&Message::reply(false, "no")));
        assert!(!succeeded(&Message::new().with_value("ok")));
        assert!(!succeeded(
            &Message::new().with_property(OPERATION_SUCCEEDED_PROPERTY, "true")
        ));
    }

    #[test]
    fn test_decode_name_lists_flattens() {
        let names = decode_name_lists("getQueueNames", r#"[["q1","q2"],["q3"]]"#).unwrap();
        assert_eq!(names, vec!["q1", "q2", "q3"]);
    }

    #[test]
    fn test_decode_name_lists_rejects_flat_array() {
        let result = decode_name_lists("getQueueNames", r#"["q1"]"#);
        assert!(matches!(result, Err(Error::UnexpectedValueShape { .. })));
    }

    #[test]
    fn test_string_value_rejects_non_string() {
        let result = string_value("getAddressNames", Some(json!(42)));
        let err = result.unwrap_err();
        assert!(err.to_string().contains("number"));
    }

    #[test]
    fn test_decode_setting_blobs() {
        let blob = json!({ "DLA": "dlq", "expiryDelay": 1000, "autoCreateQueues": true }).to_string();
        let payload = json!([blob]).to_string();

        let settings = decode_setting_blobs("getAddressSettingsAsJSON", &payload).unwrap();
        assert_eq!(settings.len(), 1);
        assert_eq!(settings[0].dead_letter_address, "dlq");
        assert_eq!(settings[0].expiry_delay, 1000);
        assert!(settings[0].auto_create_queues);
    }

    #[test]
    fn test_decode_setting_blobs_treats_null_as_zero_value() {
        let blob = json!({
            "DLA": null,
            "expiryAddress": "exp",
            "expiryDelay": null,
            "redeliveryMultiplier": null,
            "autoCreateQueues": null
        })
        .to_string();
        let payload = json!([blob]).to_string();

        let settings = decode_setting_blobs("getAddressSettingsAsJSON", &payload).unwrap();
        assert_eq!(settings.len(), 1);
        assert_eq!(settings[0].dead_letter_address, "");
        assert_eq!(settings[0].expiry_address, "exp");
        assert_eq!(settings[0].expiry_delay, 0);
        assert!(settings[0].redelivery_multiplier.abs() < f64::EPSILON);
        assert!(!settings[0].auto_create_queues);
    }

    #[test]
    fn test_decode_setting_blobs_rejects_wrong_type() {
        let blob = json!({ "expiryDelay": "soon" }).to_string();
        let payload = json!([blob]).to_string();

        let result = decode_setting_blobs("getAddressSettingsAsJSON", &payload);
        assert!(matches!(result, Err(Error::UnexpectedValueShape { .. })));
    }

    #[tokio::test]
    async fn test_invoke_surfaces_reply_payload_on_failure() {
        let transport = Arc::new(InMemoryCommandClient::new("mem://b1"));
        transport.fail_operation("createAddress", FaultKind::Reject);
        transport.start();
        let client = ManagementClient::new(transport, BROKER_RESOURCE, REQUEST_TIMEOUT);

        let err = client
            .invoke(&client.request("createAddress", vec![json!("a1"), json!("ANYCAST")]))
            .await
            .unwrap_err();

        match err {
            Error::ProtocolFailure { operation, value } => {
                assert_eq!(operation, "createAddress");
                assert!(value.contains("rejected"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
