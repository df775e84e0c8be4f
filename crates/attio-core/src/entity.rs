//! # Entity Abstraction
//!
//! The host application's records, seen through the narrow window the sync
//! layer needs.
//!
//! ## What The Sync Layer Touches
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Entity Surface                                   │
//! │                                                                         │
//! │  READS                                WRITES                           │
//! │  ─────                                ──────                           │
//! │  • id()            local identifier   • write_remote_id()              │
//! │  • field(name)     mapped attributes    (once, after a remote create,  │
//! │  • remote_id()     CRM record id         bypassing validation and      │
//! │  • invoke(name)    named methods         change tracking)              │
//! │  • attributes()    raw field map                                       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde_json::Value;

use crate::error::{CoreError, CoreResult};

/// Flat key/value payload sent to the remote resource.
pub type Payload = serde_json::Map<String, Value>;

/// A host record that can be synchronized to the CRM.
pub trait Entity: Send + Sync {
    /// Type name used to route deferred tasks back to a registration.
    fn entity_type(&self) -> &str;

    /// Stable local identifier.
    fn id(&self) -> String;

    /// Reads a domain field. `None` and `Value::Null` both mean nil.
    fn field(&self, name: &str) -> Option<Value>;

    /// CRM record identifier, set once the record exists remotely.
    fn remote_id(&self) -> Option<String>;

    /// Persists the CRM record identifier without triggering lifecycle hooks.
    fn write_remote_id(&mut self, remote_id: &str) -> CoreResult<()>;

    /// Invokes a named method reference with an optional single argument.
    fn invoke(&self, method: &str, _arg: Option<&Value>) -> CoreResult<Option<Value>> {
        Err(CoreError::UnknownMethod {
            entity_type: self.entity_type().to_string(),
            method: method.to_string(),
        })
    }

    /// The entity's own CRM serialization, if it has one.
    fn serialize_payload(&self) -> Option<Payload> {
        None
    }

    /// Raw field map, the last-resort batch payload.
    fn attributes(&self) -> Payload;
}

impl<E: Entity + ?Sized> Entity for Box<E> {
    fn entity_type(&self) -> &str {
        (**self).entity_type()
    }

    fn id(&self) -> String {
        (**self).id()
    }

    fn field(&self, name: &str) -> Option<Value> {
        (**self).field(name)
    }

    fn remote_id(&self) -> Option<String> {
        (**self).remote_id()
    }

    fn write_remote_id(&mut self, remote_id: &str) -> CoreResult<()> {
        (**self).write_remote_id(remote_id)
    }

    fn invoke(&self, method: &str, arg: Option<&Value>) -> CoreResult<Option<Value>> {
        (**self).invoke(method, arg)
    }

    fn serialize_payload(&self) -> Option<Payload> {
        (**self).serialize_payload()
    }

    fn attributes(&self) -> Payload {
        (**self).attributes()
    }
}

// =============================================================================
// Value Helpers
// =============================================================================

/// Returns true when a resolved value counts as nil.
pub fn is_nil(value: &Option<Value>) -> bool {
    matches!(value, None | Some(Value::Null))
}

/// Truthiness of a named-condition result: everything except nil and `false`.
pub fn is_truthy(value: &Option<Value>) -> bool {
    !matches!(value, None | Some(Value::Null) | Some(Value::Bool(false)))
}

/// Returns the entity's remote id when it is present and non-empty.
pub fn present_remote_id(entity: &dyn Entity) -> Option<String> {
    entity.remote_id().filter(|id| !id.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nil_and_truthy() {
        assert!(is_nil(&None));
        assert!(is_nil(&Some(Value::Null)));
        assert!(!is_nil(&Some(json!(false))));

        assert!(!is_truthy(&Some(json!(false))));
        assert!(!is_truthy(&None));
        assert!(is_truthy(&Some(json!(0))));
        assert!(is_truthy(&Some(json!(""))));
    }
}
