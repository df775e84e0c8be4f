//! # Sync Policy
//!
//! Decides whether an entity should be synced or removed.
//!
//! ## Check Order (first failure short-circuits)
//! ```text
//! should_sync:   sync_enabled ─► object_type set ─► mapping non-empty ─► condition
//! should_remove: remote id present ─► sync_enabled
//! ```

use crate::entity::{is_truthy, present_remote_id, Entity};
use crate::error::CoreResult;
use crate::settings::SyncSettings;
use crate::spec::{Condition, SyncSpec};

/// Returns whether `entity` is eligible for sync.
///
/// A named condition that cannot be invoked is reported as an error; callers
/// treat that as "do not sync".
pub fn should_sync(entity: &dyn Entity, spec: &SyncSpec, settings: &SyncSettings) -> CoreResult<bool> {
    if !settings.sync_enabled {
        return Ok(false);
    }
    if spec.object_type.trim().is_empty() {
        return Ok(false);
    }
    if spec.attribute_mapping.is_empty() {
        return Ok(false);
    }
    match &spec.condition {
        None => Ok(true),
        Some(condition) => evaluate_condition(condition, entity),
    }
}

/// Returns whether the remote counterpart of `entity` should be deleted.
pub fn should_remove(entity: &dyn Entity, settings: &SyncSettings) -> bool {
    present_remote_id(entity).is_some() && settings.sync_enabled
}

/// Evaluates a sync condition against an entity.
pub fn evaluate_condition(condition: &Condition, entity: &dyn Entity) -> CoreResult<bool> {
    match condition {
        Condition::Literal(value) => Ok(*value),
        Condition::Predicate(predicate) => Ok(predicate(entity)),
        Condition::Named(method) => entity.invoke(method, None).map(|result| is_truthy(&result)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use serde_json::json;

    fn settings(enabled: bool) -> SyncSettings {
        SyncSettings {
            sync_enabled: enabled,
            ..Default::default()
        }
    }

    fn people_spec() -> SyncSpec {
        SyncSpec::builder("people").map_field("email", "email").build()
    }

    #[test]
    fn test_enabled_complete_spec_without_condition_syncs() {
        let record = Record::new("User", "1").with_field("email", json!("a@b.com"));
        assert!(should_sync(&record, &people_spec(), &settings(true)).unwrap());
    }

    #[test]
    fn test_disabled_never_syncs() {
        let record = Record::new("User", "1");
        let always = SyncSpec::builder("people")
            .map_field("email", "email")
            .condition(Condition::Literal(true))
            .build();

        assert!(!should_sync(&record, &people_spec(), &settings(false)).unwrap());
        assert!(!should_sync(&record, &always, &settings(false)).unwrap());
    }

    #[test]
    fn test_incomplete_spec_never_syncs() {
        let record = Record::new("User", "1");
        let no_object = SyncSpec::builder("  ").map_field("email", "email").build();
        let no_mapping = SyncSpec::builder("people").build();

        assert!(!should_sync(&record, &no_object, &settings(true)).unwrap());
        assert!(!should_sync(&record, &no_mapping, &settings(true)).unwrap());
    }

    #[test]
    fn test_condition_variants() {
        let active = Record::new("User", "1")
            .with_field("active", json!(true))
            .with_method("active?", |r, _| Ok(r.field("active")));
        let inactive = Record::new("User", "2")
            .with_field("active", json!(false))
            .with_method("active?", |r, _| Ok(r.field("active")));

        let literal = SyncSpec::builder("people")
            .map_field("email", "email")
            .condition(Condition::Literal(false))
            .build();
        assert!(!should_sync(&active, &literal, &settings(true)).unwrap());

        let predicate = SyncSpec::builder("people")
            .map_field("email", "email")
            .when(|e| e.field("active") == Some(json!(true)))
            .build();
        assert!(should_sync(&active, &predicate, &settings(true)).unwrap());
        assert!(!should_sync(&inactive, &predicate, &settings(true)).unwrap());

        let named = SyncSpec::builder("people")
            .map_field("email", "email")
            .when_method("active?")
            .build();
        assert!(should_sync(&active, &named, &settings(true)).unwrap());
        assert!(!should_sync(&inactive, &named, &settings(true)).unwrap());
    }

    #[test]
    fn test_missing_named_condition_is_error() {
        let record = Record::new("User", "1");
        let spec = SyncSpec::builder("people")
            .map_field("email", "email")
            .when_method("ghost?")
            .build();
        assert!(should_sync(&record, &spec, &settings(true)).is_err());
    }

    #[test]
    fn test_should_remove() {
        let linked = Record::new("User", "1").with_remote_id("rec_1");
        let blank = Record::new("User", "2").with_remote_id("");
        let unlinked = Record::new("User", "3");

        assert!(should_remove(&linked, &settings(true)));
        assert!(!should_remove(&linked, &settings(false)));
        assert!(!should_remove(&blank, &settings(true)));
        assert!(!should_remove(&unlinked, &settings(true)));
    }
}
