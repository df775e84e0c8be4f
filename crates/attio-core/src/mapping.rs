//! # Attribute Mapping
//!
//! Resolves a [`SyncSpec`]'s mapping rules against an entity into the flat
//! payload sent to the remote resource.
//!
//! ## Resolution
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  for (remote_key, rule) in spec.attribute_mapping:                      │
//! │                                                                         │
//! │    Static(v)      ──► payload[remote_key] = v        (always)           │
//! │    Field(name)    ──► entity.field(name)    ──┐                         │
//! │    Computed(f)    ──► f(entity)             ──┴─► nil? omit : insert    │
//! │                                                                         │
//! │  then spec.transform(payload, entity) replaces the payload entirely     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The output never contains a key whose resolved accessor or computed
//! value was nil.

use serde_json::Value;

use crate::entity::{is_nil, Entity, Payload};
use crate::error::{CoreError, CoreResult};
use crate::spec::{Callback, MappingRule, SyncSpec};

/// Builds the remote payload for `entity` according to `spec`.
pub fn map_attributes(entity: &dyn Entity, spec: &SyncSpec) -> CoreResult<Payload> {
    let mut payload = Payload::new();

    for (key, rule) in &spec.attribute_mapping {
        if let Some(value) = resolve_rule(entity, rule) {
            payload.insert(key.clone(), value);
        }
    }

    match &spec.transform {
        Some(transform) => apply_transform(transform, payload, entity),
        None => Ok(payload),
    }
}

/// Resolves one rule. `None` means the key is omitted.
pub fn resolve_rule(entity: &dyn Entity, rule: &MappingRule) -> Option<Value> {
    match rule {
        MappingRule::Static(value) => Some(value.clone()),
        MappingRule::Field(name) => non_nil(entity.field(name)),
        MappingRule::Computed(compute) => non_nil(compute(entity)),
    }
}

/// Applies a post-mapping transform. Its result is final, not merged.
pub fn apply_transform(
    transform: &Callback<crate::spec::TransformFn>,
    payload: Payload,
    entity: &dyn Entity,
) -> CoreResult<Payload> {
    match transform {
        Callback::Closure(f) => Ok(f(payload, entity)),
        Callback::Named(method) => {
            let arg = Value::Object(payload);
            match entity.invoke(method, Some(&arg))? {
                Some(Value::Object(map)) => Ok(map),
                other => Err(CoreError::InvalidTransformResult {
                    name: method.clone(),
                    actual: describe(&other),
                }),
            }
        }
    }
}

fn non_nil(value: Option<Value>) -> Option<Value> {
    if is_nil(&value) {
        None
    } else {
        value
    }
}

fn describe(value: &Option<Value>) -> String {
    match value {
        None | Some(Value::Null) => "nil".to_string(),
        Some(Value::Bool(_)) => "boolean".to_string(),
        Some(Value::Number(_)) => "number".to_string(),
        Some(Value::String(_)) => "string".to_string(),
        Some(Value::Array(_)) => "array".to_string(),
        Some(Value::Object(_)) => "object".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use serde_json::json;

    fn user() -> Record {
        Record::new("User", "1")
            .with_field("email", json!("a@b.com"))
            .with_field("name", Value::Null)
            .with_field("plan", json!("pro"))
    }

    #[test]
    fn test_nil_fields_are_omitted() {
        let spec = SyncSpec::builder("people")
            .map_field("email", "email")
            .map_field("name", "name")
            .build();

        let payload = map_attributes(&user(), &spec).unwrap();
        assert_eq!(Value::Object(payload), json!({"email": "a@b.com"}));
    }

    #[test]
    fn test_missing_fields_are_omitted() {
        let spec = SyncSpec::builder("people").map_field("phone", "phone").build();
        let payload = map_attributes(&user(), &spec).unwrap();
        assert!(payload.is_empty());
    }

    #[test]
    fn test_static_values_are_always_included() {
        let spec = SyncSpec::builder("people")
            .map_value("source", json!("app"))
            .map_value("nothing", Value::Null)
            .build();

        let payload = map_attributes(&user(), &spec).unwrap();
        assert_eq!(payload.get("source"), Some(&json!("app")));
        assert_eq!(payload.get("nothing"), Some(&Value::Null));
    }

    #[test]
    fn test_computed_values() {
        let spec = SyncSpec::builder("people")
            .map_computed("tier", |e| e.field("plan").map(|p| json!(format!("tier:{}", p.as_str().unwrap_or("")))))
            .map_computed("empty", |_| None)
            .build();

        let payload = map_attributes(&user(), &spec).unwrap();
        assert_eq!(payload.get("tier"), Some(&json!("tier:pro")));
        assert!(!payload.contains_key("empty"));
    }

    #[test]
    fn test_transform_replaces_payload() {
        let spec = SyncSpec::builder("people")
            .map_field("email", "email")
            .transform(|_, entity| {
                let mut replaced = Payload::new();
                replaced.insert("record_id".into(), json!(entity.id()));
                replaced
            })
            .build();

        let payload = map_attributes(&user(), &spec).unwrap();
        assert_eq!(Value::Object(payload), json!({"record_id": "1"}));
    }

    #[test]
    fn test_transform_is_repeatable() {
        let spec = SyncSpec::builder("people")
            .map_field("email", "email")
            .transform(|mut payload, _| {
                payload.insert("normalized".into(), json!(true));
                payload
            })
            .build();

        let first = map_attributes(&user(), &spec).unwrap();
        let second = map_attributes(&user(), &spec).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_named_transform_receives_current_payload() {
        let record = user().with_method("to_crm", |_, arg| {
            let mut map = arg.and_then(|v| v.as_object().cloned()).unwrap_or_default();
            map.insert("wrapped".into(), json!(true));
            Ok(Some(Value::Object(map)))
        });
        let spec = SyncSpec::builder("people")
            .map_field("email", "email")
            .transform_method("to_crm")
            .build();

        let payload = map_attributes(&record, &spec).unwrap();
        assert_eq!(Value::Object(payload), json!({"email": "a@b.com", "wrapped": true}));
    }

    #[test]
    fn test_named_transform_must_return_object() {
        let record = user().with_method("bad", |_, _| Ok(Some(json!("oops"))));
        let spec = SyncSpec::builder("people")
            .map_field("email", "email")
            .transform_method("bad")
            .build();

        let err = map_attributes(&record, &spec).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransformResult { ref actual, .. } if actual == "string"));
    }

    #[test]
    fn test_empty_mapping_yields_empty_payload() {
        let spec = SyncSpec::builder("people").build();
        assert!(map_attributes(&user(), &spec).unwrap().is_empty());
    }
}
