//! Tables with a Kinesis change feed
//!
//! Items are plain JSON objects. Every write emits a change record
//! (`INSERT`, `MODIFY`, `REMOVE`) to the table's Kinesis destination, keyed by
//! the item's partition key. Key attributes must carry the JSON type their
//! `AttributeDefinitions` entry declares: strings for `S`, numbers for `N`
//! and base64 strings for `B`.

use crate::error::{Result, SandboxError};
use crate::props::str_prop;
use crate::sandbox::{PhysicalResource, Sandbox};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use tracing::{debug, info};
use uuid::Uuid;

/// Scalar type of a key attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    String,
    Number,
    Binary,
}

impl KeyType {
    fn parse(code: &str) -> Option<Self> {
        match code {
            "S" => Some(Self::String),
            "N" => Some(Self::Number),
            "B" => Some(Self::Binary),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::String => "S",
            Self::Number => "N",
            Self::Binary => "B",
        }
    }

    /// Storage form of a key value, `None` when the value has the wrong type
    fn encode(self, value: &Value) -> Option<String> {
        match (self, value) {
            (Self::String, Value::String(s)) => Some(format!("S:{}", s)),
            (Self::Number, Value::Number(n)) => Some(format!("N:{}", n)),
            (Self::Binary, Value::String(s)) if STANDARD.decode(s).is_ok() => Some(format!("B:{}", s)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Table {
    pub name: String,
    pub arn: String,
    pub partition_key: String,
    pub sort_key: Option<String>,
    /// Declared type of each key attribute
    pub key_types: BTreeMap<String, KeyType>,
    /// Item key → item
    pub items: BTreeMap<String, Value>,
    /// Stream name of the Kinesis destination
    pub kinesis_destination: Option<String>,
}

impl Table {
    fn key_attributes(&self) -> Vec<&str> {
        std::iter::once(self.partition_key.as_str())
            .chain(self.sort_key.as_deref())
            .collect()
    }

    /// Storage key of an item or key object
    fn item_key(&self, item: &Value) -> Result<String> {
        let mut parts = Vec::new();
        for attr in self.key_attributes() {
            let Some(value) = item.get(attr) else {
                return Err(SandboxError::InvalidParameter(format!(
                    "One or more parameter values were invalid: Missing the key {} in the item",
                    attr
                )));
            };
            let key_type = self.key_types.get(attr).copied().unwrap_or(KeyType::String);
            let encoded = key_type.encode(value).ok_or_else(|| {
                SandboxError::InvalidParameter(format!(
                    "One or more parameter values were invalid: Type mismatch for key {} expected: {}",
                    attr,
                    key_type.code()
                ))
            })?;
            parts.push(encoded);
        }
        Ok(parts.join("\u{0}"))
    }

    fn keys_of(&self, item: &Value) -> Value {
        let keys: Map<String, Value> = self
            .key_attributes()
            .into_iter()
            .filter_map(|attr| item.get(attr).map(|v| (attr.to_string(), v.clone())))
            .collect();
        Value::Object(keys)
    }
}

impl Sandbox {
    pub(crate) fn create_table(
        &mut self,
        stack_name: &str,
        logical_id: &str,
        props: &Value,
    ) -> Result<PhysicalResource> {
        let name = match str_prop(props, "TableName") {
            Some(name) => name.to_string(),
            None => self.generate_name(stack_name, logical_id, 255),
        };
        if self.tables.contains_key(&name) {
            return Err(SandboxError::AlreadyExists(format!("table {}", name)));
        }

        let schema = props
            .get("KeySchema")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let key_of = |key_type: &str| {
            schema
                .iter()
                .find(|k| str_prop(k, "KeyType") == Some(key_type))
                .and_then(|k| str_prop(k, "AttributeName"))
                .map(String::from)
        };
        let partition_key = key_of("HASH")
            .ok_or_else(|| SandboxError::invalid(logical_id, "KeySchema needs a HASH key"))?;
        let sort_key = key_of("RANGE");

        let definitions = props
            .get("AttributeDefinitions")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut key_types = BTreeMap::new();
        for attr in std::iter::once(&partition_key).chain(sort_key.as_ref()) {
            let code = definitions
                .iter()
                .find(|d| str_prop(d, "AttributeName") == Some(attr.as_str()))
                .and_then(|d| str_prop(d, "AttributeType"))
                .ok_or_else(|| {
                    SandboxError::invalid(logical_id, format!("No AttributeDefinitions entry for key {}", attr))
                })?;
            let key_type = KeyType::parse(code).ok_or_else(|| {
                SandboxError::invalid(logical_id, format!("Unknown AttributeType {} for key {}", code, attr))
            })?;
            key_types.insert(attr.clone(), key_type);
        }

        let kinesis_destination = match props.pointer("/KinesisStreamSpecification/StreamArn") {
            Some(Value::String(arn)) => Some(
                self.stream_name_by_arn(arn)
                    .ok_or_else(|| SandboxError::not_found("Stream", arn.as_str()))?,
            ),
            _ => None,
        };

        let arn = format!(
            "arn:aws:dynamodb:{}:{}:table/{}",
            self.region, self.account_id, name
        );
        self.tables.insert(
            name.clone(),
            Table {
                name: name.clone(),
                arn: arn.clone(),
                partition_key,
                sort_key,
                key_types,
                items: BTreeMap::new(),
                kinesis_destination,
            },
        );
        info!(table = %name, "Table created");
        Ok(PhysicalResource::new("AWS::DynamoDB::Table", name).with_attribute("Arn", json!(arn)))
    }

    pub(crate) fn delete_table(&mut self, resource: &PhysicalResource) {
        self.tables.remove(&resource.physical_id);
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub(crate) fn table_arn(&self, name: &str) -> Result<String> {
        self.tables
            .get(name)
            .map(|t| t.arn.clone())
            .ok_or_else(|| SandboxError::not_found("Table", name))
    }

    /// Write an item, overwriting any item with the same key
    pub fn put_item(&mut self, table_name: &str, item: Value) -> Result<Option<Value>> {
        if !item.is_object() {
            return Err(SandboxError::InvalidParameter("Item must be an object".to_string()));
        }
        let table = self.table_mut(table_name)?;
        let key = table.item_key(&item)?;
        let keys = table.keys_of(&item);
        let old = table.items.insert(key, item.clone());

        let event_name = if old.is_some() { "MODIFY" } else { "INSERT" };
        debug!(table = %table_name, event = event_name, "Item written");
        self.emit_change(table_name, event_name, keys, Some(&item), old.as_ref())?;
        Ok(old)
    }

    pub fn get_item(&self, table_name: &str, key: &Value) -> Result<Option<Value>> {
        let table = self
            .tables
            .get(table_name)
            .ok_or_else(|| SandboxError::not_found("Table", table_name))?;
        Ok(table.items.get(&table.item_key(key)?).cloned())
    }

    pub fn delete_item(&mut self, table_name: &str, key: &Value) -> Result<Option<Value>> {
        let table = self.table_mut(table_name)?;
        let storage_key = table.item_key(key)?;
        let keys = table.keys_of(key);
        let old = table.items.remove(&storage_key);
        if old.is_some() {
            self.emit_change(table_name, "REMOVE", keys, None, old.as_ref())?;
        }
        Ok(old)
    }

    /// Items of a table in key order
    pub fn scan(&self, table_name: &str) -> Result<Vec<Value>> {
        self.tables
            .get(table_name)
            .map(|t| t.items.values().cloned().collect())
            .ok_or_else(|| SandboxError::not_found("Table", table_name))
    }

    fn emit_change(
        &mut self,
        table_name: &str,
        event_name: &str,
        keys: Value,
        new_image: Option<&Value>,
        old_image: Option<&Value>,
    ) -> Result<()> {
        let Some(table) = self.tables.get(table_name) else {
            return Ok(());
        };
        let Some(stream) = table.kinesis_destination.clone() else {
            return Ok(());
        };
        let partition_key = match keys.get(&table.partition_key) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };

        let now = self.now();
        let mut change = Map::new();
        change.insert(
            "ApproximateCreationDateTime".to_string(),
            json!(now.timestamp_millis()),
        );
        change.insert("Keys".to_string(), keys);
        if let Some(image) = new_image {
            change.insert("NewImage".to_string(), image.clone());
        }
        if let Some(image) = old_image {
            change.insert("OldImage".to_string(), image.clone());
        }
        let size = serde_json::to_vec(&change)?.len();
        change.insert("SizeBytes".to_string(), json!(size));

        let record = json!({
            "awsRegion": self.region,
            "eventID": Uuid::new_v4().to_string(),
            "eventName": event_name,
            "userIdentity": null,
            "recordFormat": "application/json",
            "tableName": table_name,
            "dynamodb": Value::Object(change),
            "eventSource": "aws:dynamodb",
        });
        self.put_record(&stream, &partition_key, serde_json::to_vec(&record)?)?;
        Ok(())
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| SandboxError::not_found("Table", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox() -> Sandbox {
        let mut sandbox = Sandbox::default();
        let stream = sandbox
            .create_stream("Test", "Stream", &json!({ "ShardCount": 1 }))
            .unwrap();
        let stream_arn = stream.attributes["Arn"].clone();
        sandbox
            .create_table(
                "Test",
                "CustomerTable",
                &json!({
                    "TableName": "customer-table",
                    "KeySchema": [{ "AttributeName": "customerName", "KeyType": "HASH" }],
                    "AttributeDefinitions": [{ "AttributeName": "customerName", "AttributeType": "S" }],
                    "KinesisStreamSpecification": { "StreamArn": stream_arn }
                }),
            )
            .unwrap();
        sandbox
    }

    fn change_events(sandbox: &mut Sandbox) -> Vec<Value> {
        let stream = sandbox.table("customer-table").unwrap().kinesis_destination.clone().unwrap();
        sandbox
            .stream_records(&stream)
            .iter()
            .map(|r| serde_json::from_slice(&r.data).unwrap())
            .collect()
    }

    #[test]
    fn test_same_key_overwrites() {
        let mut sandbox = sandbox();
        let first = sandbox
            .put_item("customer-table", json!({ "customerName": "acme", "tier": "free" }))
            .unwrap();
        assert!(first.is_none());
        let old = sandbox
            .put_item("customer-table", json!({ "customerName": "acme", "tier": "gold" }))
            .unwrap();
        assert_eq!(old.unwrap()["tier"], json!("free"));

        assert_eq!(sandbox.scan("customer-table").unwrap().len(), 1);
        let item = sandbox
            .get_item("customer-table", &json!({ "customerName": "acme" }))
            .unwrap()
            .unwrap();
        assert_eq!(item["tier"], json!("gold"));
    }

    #[test]
    fn test_change_feed_records_insert_modify_remove() {
        let mut sandbox = sandbox();
        sandbox
            .put_item("customer-table", json!({ "customerName": "acme" }))
            .unwrap();
        sandbox
            .put_item("customer-table", json!({ "customerName": "acme", "x": 1 }))
            .unwrap();
        sandbox
            .delete_item("customer-table", &json!({ "customerName": "acme" }))
            .unwrap();
        // Deleting a missing item emits nothing
        sandbox
            .delete_item("customer-table", &json!({ "customerName": "acme" }))
            .unwrap();

        let events = change_events(&mut sandbox);
        let names: Vec<&str> = events.iter().map(|e| e["eventName"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["INSERT", "MODIFY", "REMOVE"]);
        assert_eq!(events[1]["dynamodb"]["OldImage"], json!({ "customerName": "acme" }));
        assert_eq!(events[2]["dynamodb"]["Keys"], json!({ "customerName": "acme" }));
        assert!(events[2]["dynamodb"].get("NewImage").is_none());
    }

    #[test]
    fn test_missing_key_is_rejected() {
        let mut sandbox = sandbox();
        let err = sandbox
            .put_item("customer-table", json!({ "name": "acme" }))
            .unwrap_err();
        assert!(err.to_string().contains("customerName"));
    }

    #[test]
    fn test_key_type_must_match_definition() {
        let mut sandbox = sandbox();
        sandbox
            .put_item("customer-table", json!({ "customerName": "1", "tier": "free" }))
            .unwrap();
        let err = sandbox
            .put_item("customer-table", json!({ "customerName": 1, "tier": "gold" }))
            .unwrap_err();
        assert!(err.to_string().contains("Type mismatch"), "{err}");
        assert!(sandbox
            .get_item("customer-table", &json!({ "customerName": 1 }))
            .is_err());

        let item = sandbox
            .get_item("customer-table", &json!({ "customerName": "1" }))
            .unwrap()
            .unwrap();
        assert_eq!(item["tier"], json!("free"));
        assert_eq!(change_events(&mut sandbox).len(), 1);
    }

    #[test]
    fn test_number_and_sort_keys() {
        let mut sandbox = Sandbox::default();
        sandbox
            .create_table(
                "Test",
                "Events",
                &json!({
                    "TableName": "events",
                    "KeySchema": [
                        { "AttributeName": "customerName", "KeyType": "HASH" },
                        { "AttributeName": "createdAt", "KeyType": "RANGE" }
                    ],
                    "AttributeDefinitions": [
                        { "AttributeName": "customerName", "AttributeType": "S" },
                        { "AttributeName": "createdAt", "AttributeType": "N" }
                    ]
                }),
            )
            .unwrap();
        sandbox
            .put_item("events", json!({ "customerName": "acme", "createdAt": 1 }))
            .unwrap();
        sandbox
            .put_item("events", json!({ "customerName": "acme", "createdAt": 2 }))
            .unwrap();
        assert_eq!(sandbox.scan("events").unwrap().len(), 2);
        assert!(sandbox
            .put_item("events", json!({ "customerName": "acme", "createdAt": "1" }))
            .is_err());
        assert_eq!(sandbox.table("events").unwrap().key_types["createdAt"], KeyType::Number);
    }

    #[test]
    fn test_key_without_definition_is_rejected() {
        let mut sandbox = Sandbox::default();
        let err = sandbox
            .create_table(
                "Test",
                "Bare",
                &json!({ "KeySchema": [{ "AttributeName": "id", "KeyType": "HASH" }] }),
            )
            .unwrap_err();
        assert!(err.to_string().contains("AttributeDefinitions"), "{err}");
    }
}
