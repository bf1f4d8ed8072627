//! Management message envelope.
//!
//! Broker management requests and replies share one shape: a map of
//! application properties that addresses the operation, plus a body value.
//!
//! # Request
//!
//! ```text
//! application properties:
//!   _AMQ_ResourceName   = "broker"
//!   _AMQ_OperationName  = "createAddress"
//!   _AMQ_Attribute      = (optional)
//! body:
//!   "[\"a1\",\"ANYCAST\"]"      JSON-encoded positional arguments
//! ```
//!
//! # Reply
//!
//! ```text
//! application properties:
//!   _AMQ_OperationSucceeded = true | false
//! body:
//!   operation-dependent value (usually a JSON string)
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Property naming the managed resource.
pub const RESOURCE_NAME_PROPERTY: &str = "_AMQ_ResourceName";

/// Property naming the management operation.
pub const OPERATION_NAME_PROPERTY: &str = "_AMQ_OperationName";

/// Property naming the attribute for attribute reads.
pub const ATTRIBUTE_PROPERTY: &str = "_AMQ_Attribute";

/// Reply property carrying the boolean success marker.
pub const OPERATION_SUCCEEDED_PROPERTY: &str = "_AMQ_OperationSucceeded";

/// A management request or reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Application properties addressing the operation (request) or
    /// carrying its outcome (reply).
    pub application_properties: BTreeMap<String, Value>,
    /// Body value.
    pub value: Option<Value>,
}

impl Message {
    /// Create an empty message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an application property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.application_properties.insert(key.into(), value.into());
        self
    }

    /// Set the body value.
    #[must_use]
    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Look up an application property.
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.application_properties.get(key)
    }

    /// Operation name of a request, if present.
    pub fn operation_name(&self) -> Option<&str> {
        self.property(OPERATION_NAME_PROPERTY).and_then(Value::as_str)
    }

    /// Build a reply carrying the success marker and a string body.
    pub fn reply(succeeded: bool, value: impl Into<Value>) -> Self {
        Self::new()
            .with_property(OPERATION_SUCCEEDED_PROPERTY, succeeded)
            .with_value(value)
    }
}
