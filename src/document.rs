use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

pub const FIELD_ID: &str = "id";
pub const FIELD_PARTITION_KEY: &str = "partitionKey";
pub const FIELD_WRONG_PARTITION_KEY: &str = "wrongPartitionKey";
pub const FIELD_ORDER_ID: &str = "orderid";
pub const FIELD_DESCRIPTION: &str = "description";
pub const FIELD_NESTED: &str = "nestedproperty";
pub const FIELD_SUBPROPERTY: &str = "subproperty";

pub const ORDER_ID: &str = "123abc456def";
pub const DESCRIPTION: &str = "certification test item";
pub const SUBPROPERTY_VALUE: &str = "something of value for testing";
pub const PARTITION_KEY_VALUE: &str = "partitioniningOnThisValue";
pub const WRONG_PARTITION_KEY_VALUE: &str = "somepkvalue";

/// A record handed to the output binding, serialized as a flat JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the order document written by the certification flows.
    ///
    /// `generate_id` adds a fresh UUID under `id`; `include_partition_key` adds
    /// the fixed `partitionKey` value. Dropping either one drives the binding's
    /// validation error paths.
    pub fn certification(generate_id: bool, include_partition_key: bool) -> Self {
        let mut document = Self::new()
            .with_field(FIELD_ORDER_ID, ORDER_ID)
            .with_field(
                FIELD_NESTED,
                json!({ FIELD_SUBPROPERTY: SUBPROPERTY_VALUE }),
            )
            .with_field(FIELD_DESCRIPTION, DESCRIPTION);

        if generate_id {
            document.insert(FIELD_ID, Uuid::new_v4().to_string());
        }
        if include_partition_key {
            document.insert(FIELD_PARTITION_KEY, PARTITION_KEY_VALUE);
        }

        document
    }

    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.to_string(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Walks nested objects, e.g. `["nestedproperty", "subproperty"]`.
    pub fn get_path(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        rest.iter()
            .try_fold(self.0.get(*first)?, |value, key| value.get(*key))
    }

    pub fn id(&self) -> Option<&str> {
        self.get(FIELD_ID).and_then(Value::as_str)
    }

    pub fn partition_key(&self) -> Option<&str> {
        self.get(FIELD_PARTITION_KEY).and_then(Value::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.0)
    }
}

impl From<Map<String, Value>> for Document {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for Document {
    type Error = anyhow::Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(anyhow::anyhow!(
                "Expected a JSON object for a document, got: {other}"
            )),
        }
    }
}
