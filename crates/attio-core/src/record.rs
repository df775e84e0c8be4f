//! # Map-Backed Record
//!
//! A dynamic [`Entity`] for hosts whose records are already key/value maps,
//! and for tests.
//!
//! ```rust
//! use attio_core::{Entity, Record};
//! use serde_json::json;
//!
//! let mut user = Record::new("User", "42")
//!     .with_field("email", json!("ada@example.com"))
//!     .with_method("display_name", |record, _| {
//!         Ok(record.field("email"))
//!     });
//!
//! assert_eq!(user.field("email"), Some(json!("ada@example.com")));
//! user.write_remote_id("rec_1").unwrap();
//! assert_eq!(user.remote_id().as_deref(), Some("rec_1"));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::entity::{Entity, Payload};
use crate::error::{CoreError, CoreResult};

/// Named method attached to a [`Record`].
pub type RecordMethod =
    Arc<dyn Fn(&Record, Option<&Value>) -> CoreResult<Option<Value>> + Send + Sync>;

/// A map-backed entity with optional named methods.
#[derive(Clone)]
pub struct Record {
    entity_type: String,
    id: String,
    fields: Payload,
    remote_id: Option<String>,
    methods: HashMap<String, RecordMethod>,
    self_payload: Option<Payload>,
}

impl Record {
    /// Creates an empty record of the given type.
    pub fn new(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Record {
            entity_type: entity_type.into(),
            id: id.into(),
            fields: Payload::new(),
            remote_id: None,
            methods: HashMap::new(),
            self_payload: None,
        }
    }

    /// Sets a field value.
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Sets the remote id.
    pub fn with_remote_id(mut self, remote_id: impl Into<String>) -> Self {
        self.remote_id = Some(remote_id.into());
        self
    }

    /// Registers a named method, reachable through [`Entity::invoke`] and,
    /// when no field of that name exists, through [`Entity::field`].
    pub fn with_method<F>(mut self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(&Record, Option<&Value>) -> CoreResult<Option<Value>> + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Arc::new(method));
        self
    }

    /// Gives the record its own CRM serialization.
    pub fn with_serialized_payload(mut self, payload: Payload) -> Self {
        self.self_payload = Some(payload);
        self
    }

    /// Mutates a field in place.
    pub fn set_field(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }
}

impl Entity for Record {
    fn entity_type(&self) -> &str {
        &self.entity_type
    }

    fn id(&self) -> String {
        self.id.clone()
    }

    fn field(&self, name: &str) -> Option<Value> {
        if name == "id" {
            return Some(Value::String(self.id.clone()));
        }
        match self.fields.get(name) {
            Some(value) => Some(value.clone()),
            None => match self.methods.get(name) {
                Some(method) => method(self, None).ok().flatten(),
                None => None,
            },
        }
    }

    fn remote_id(&self) -> Option<String> {
        self.remote_id.clone()
    }

    fn write_remote_id(&mut self, remote_id: &str) -> CoreResult<()> {
        self.remote_id = Some(remote_id.to_string());
        Ok(())
    }

    fn invoke(&self, method: &str, arg: Option<&Value>) -> CoreResult<Option<Value>> {
        match self.methods.get(method) {
            Some(callable) => callable(self, arg),
            None => Err(CoreError::UnknownMethod {
                entity_type: self.entity_type.clone(),
                method: method.to_string(),
            }),
        }
    }

    fn serialize_payload(&self) -> Option<Payload> {
        self.self_payload.clone()
    }

    fn attributes(&self) -> Payload {
        let mut attributes = self.fields.clone();
        attributes.insert("id".into(), Value::String(self.id.clone()));
        attributes
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<&String> = self.methods.keys().collect();
        methods.sort();
        f.debug_struct("Record")
            .field("entity_type", &self.entity_type)
            .field("id", &self.id)
            .field("fields", &self.fields)
            .field("remote_id", &self.remote_id)
            .field("methods", &methods)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_falls_back_to_method() {
        let record = Record::new("User", "1")
            .with_field("first", json!("Ada"))
            .with_method("full_name", |r, _| {
                Ok(r.field("first").map(|v| json!(format!("{} Lovelace", v.as_str().unwrap_or("")))))
            });

        assert_eq!(record.field("full_name"), Some(json!("Ada Lovelace")));
        assert_eq!(record.field("missing"), None);
        assert_eq!(record.field("id"), Some(json!("1")));
    }

    #[test]
    fn test_unknown_method_is_error() {
        let record = Record::new("User", "1");
        let err = record.invoke("nope", None).unwrap_err();
        assert!(matches!(err, CoreError::UnknownMethod { .. }));
    }

    #[test]
    fn test_attributes_include_id() {
        let record = Record::new("User", "7").with_field("email", json!("a@b.com"));
        let attributes = record.attributes();
        assert_eq!(attributes.get("id"), Some(&json!("7")));
        assert_eq!(attributes.get("email"), Some(&json!("a@b.com")));
    }
}
