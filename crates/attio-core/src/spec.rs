//! # Sync Specification
//!
//! Per-entity-type sync configuration: which remote object to target, how
//! attributes map, when to sync, and which hooks to run.
//!
//! ## Building A Spec
//! ```rust
//! use attio_core::{MappingRule, SyncSpec};
//! use serde_json::json;
//!
//! let spec = SyncSpec::builder("people")
//!     .map_field("email_addresses", "email")
//!     .map_field("name", "full_name")
//!     .map("source", MappingRule::value(json!("app")))
//!     .when_method("crm_visible?")
//!     .build();
//!
//! assert_eq!(spec.object_type, "people");
//! assert_eq!(spec.attribute_mapping.len(), 3);
//! ```
//!
//! Specs are built once at registration time and shared as `Arc<SyncSpec>`.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::entity::{Entity, Payload};
use crate::error::{CoreError, CoreResult};
use crate::types::{ErrorInfo, SyncOutcome};

// =============================================================================
// Callable Shapes
// =============================================================================

/// Computes a mapped value from the entity.
pub type ComputeFn = dyn Fn(&dyn Entity) -> Option<Value> + Send + Sync;

/// Decides something about an entity.
pub type PredicateFn = dyn Fn(&dyn Entity) -> bool + Send + Sync;

/// Replaces the mapped payload.
pub type TransformFn = dyn Fn(Payload, &dyn Entity) -> Payload + Send + Sync;

/// Runs before a sync; an `Err` aborts it.
pub type HookFn = dyn Fn(&dyn Entity) -> CoreResult<()> + Send + Sync;

/// Runs after a sync with its outcome.
pub type AfterHookFn = dyn Fn(&dyn Entity, &SyncOutcome) -> CoreResult<()> + Send + Sync;

/// Owns a sync failure. Returning `Err` re-raises.
pub type ErrorHandlerFn = dyn Fn(&ErrorInfo, &dyn Entity) -> CoreResult<()> + Send + Sync;

/// Builds a partial update payload.
pub type PartialUpdateFn = dyn Fn(&dyn Entity) -> Payload + Send + Sync;

/// A method-name reference or a closure.
pub enum Callback<F: ?Sized> {
    /// Invoked through [`Entity::invoke`].
    Named(String),
    Closure(Arc<F>),
}

impl<F: ?Sized> Clone for Callback<F> {
    fn clone(&self) -> Self {
        match self {
            Callback::Named(name) => Callback::Named(name.clone()),
            Callback::Closure(f) => Callback::Closure(Arc::clone(f)),
        }
    }
}

impl<F: ?Sized> fmt::Debug for Callback<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callback::Named(name) => write!(f, "Named({:?})", name),
            Callback::Closure(_) => write!(f, "Closure(..)"),
        }
    }
}

// =============================================================================
// Mapping Rules
// =============================================================================

/// How one remote attribute gets its value.
#[derive(Clone)]
pub enum MappingRule {
    /// Literal value, always included.
    Static(Value),
    /// Entity accessor; nil results are omitted.
    Field(String),
    /// Closure over the entity; nil results are omitted.
    Computed(Arc<ComputeFn>),
}

impl MappingRule {
    pub fn value(value: Value) -> Self {
        MappingRule::Static(value)
    }

    pub fn field(name: impl Into<String>) -> Self {
        MappingRule::Field(name.into())
    }

    pub fn computed<F>(f: F) -> Self
    where
        F: Fn(&dyn Entity) -> Option<Value> + Send + Sync + 'static,
    {
        MappingRule::Computed(Arc::new(f))
    }
}

impl fmt::Debug for MappingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingRule::Static(value) => write!(f, "Static({})", value),
            MappingRule::Field(name) => write!(f, "Field({:?})", name),
            MappingRule::Computed(_) => write!(f, "Computed(..)"),
        }
    }
}

// =============================================================================
// Conditions
// =============================================================================

/// Gate evaluated before syncing.
#[derive(Clone)]
pub enum Condition {
    Literal(bool),
    Predicate(Arc<PredicateFn>),
    /// Method on the entity; its result is tested for truthiness.
    Named(String),
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Literal(value) => write!(f, "Literal({})", value),
            Condition::Predicate(_) => write!(f, "Predicate(..)"),
            Condition::Named(name) => write!(f, "Named({:?})", name),
        }
    }
}

// =============================================================================
// Transition Rules
// =============================================================================

/// A field transition that warrants an extra partial update, e.g. a deal
/// moving stage. Applied after a successful update, in declaration order.
#[derive(Clone)]
pub struct TransitionRule {
    pub name: String,
    predicate: Arc<PredicateFn>,
    update: Arc<PartialUpdateFn>,
}

impl TransitionRule {
    pub fn new<P, U>(name: impl Into<String>, predicate: P, update: U) -> Self
    where
        P: Fn(&dyn Entity) -> bool + Send + Sync + 'static,
        U: Fn(&dyn Entity) -> Payload + Send + Sync + 'static,
    {
        TransitionRule {
            name: name.into(),
            predicate: Arc::new(predicate),
            update: Arc::new(update),
        }
    }

    pub fn applies(&self, entity: &dyn Entity) -> bool {
        (self.predicate)(entity)
    }

    pub fn payload(&self, entity: &dyn Entity) -> Payload {
        (self.update)(entity)
    }
}

impl fmt::Debug for TransitionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionRule")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Sync Spec
// =============================================================================

/// Immutable per-entity-type sync configuration.
#[derive(Clone)]
pub struct SyncSpec {
    /// Remote resource category, e.g. "people" or "deals".
    pub object_type: String,

    /// Remote key → rule, in declaration order.
    pub attribute_mapping: Vec<(String, MappingRule)>,

    pub condition: Option<Condition>,

    /// Entity field used as the external-facing identifier.
    pub identifier_field: String,

    pub transform: Option<Callback<TransformFn>>,

    pub error_handler: Option<Arc<ErrorHandlerFn>>,

    pub before_sync: Option<Callback<HookFn>>,

    pub after_sync: Option<Callback<AfterHookFn>>,

    pub transition_rules: Vec<TransitionRule>,
}

impl SyncSpec {
    /// Starts a builder targeting the given remote object type.
    pub fn builder(object_type: impl Into<String>) -> SyncSpecBuilder {
        SyncSpecBuilder::new(object_type)
    }

    /// True when the spec has enough to ever sync anything.
    pub fn is_complete(&self) -> bool {
        !self.object_type.trim().is_empty() && !self.attribute_mapping.is_empty()
    }

    /// The entity's external-facing identifier, falling back to its id.
    pub fn identifier_for(&self, entity: &dyn Entity) -> String {
        if self.identifier_field == "id" {
            return entity.id();
        }
        match entity.field(&self.identifier_field) {
            Some(Value::String(s)) if !s.is_empty() => s,
            Some(Value::Number(n)) => n.to_string(),
            _ => entity.id(),
        }
    }

    /// Runs the before-sync hook, if any.
    pub fn run_before_sync(&self, entity: &dyn Entity) -> CoreResult<()> {
        match &self.before_sync {
            None => Ok(()),
            Some(Callback::Closure(hook)) => hook(entity),
            Some(Callback::Named(method)) => entity.invoke(method, None).map(|_| ()),
        }
    }

    /// Runs the after-sync hook, if any.
    pub fn run_after_sync(&self, entity: &dyn Entity, outcome: &SyncOutcome) -> CoreResult<()> {
        match &self.after_sync {
            None => Ok(()),
            Some(Callback::Closure(hook)) => hook(entity, outcome),
            Some(Callback::Named(method)) => {
                let arg = serde_json::to_value(outcome).map_err(|e| CoreError::Hook(e.to_string()))?;
                entity.invoke(method, Some(&arg)).map(|_| ())
            }
        }
    }
}

impl fmt::Debug for SyncSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncSpec")
            .field("object_type", &self.object_type)
            .field("attribute_mapping", &self.attribute_mapping)
            .field("condition", &self.condition)
            .field("identifier_field", &self.identifier_field)
            .field("transform", &self.transform)
            .field("error_handler", &self.error_handler.as_ref().map(|_| ".."))
            .field("before_sync", &self.before_sync)
            .field("after_sync", &self.after_sync)
            .field("transition_rules", &self.transition_rules)
            .finish()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`SyncSpec`].
pub struct SyncSpecBuilder {
    spec: SyncSpec,
}

impl SyncSpecBuilder {
    pub fn new(object_type: impl Into<String>) -> Self {
        SyncSpecBuilder {
            spec: SyncSpec {
                object_type: object_type.into(),
                attribute_mapping: Vec::new(),
                condition: None,
                identifier_field: "id".to_string(),
                transform: None,
                error_handler: None,
                before_sync: None,
                after_sync: None,
                transition_rules: Vec::new(),
            },
        }
    }

    /// Adds a mapping. Re-declaring a key replaces its rule in place.
    pub fn map(mut self, key: impl Into<String>, rule: MappingRule) -> Self {
        let key = key.into();
        match self.spec.attribute_mapping.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = rule,
            None => self.spec.attribute_mapping.push((key, rule)),
        }
        self
    }

    pub fn map_field(self, key: impl Into<String>, field: impl Into<String>) -> Self {
        self.map(key, MappingRule::field(field))
    }

    pub fn map_value(self, key: impl Into<String>, value: Value) -> Self {
        self.map(key, MappingRule::value(value))
    }

    pub fn map_computed<F>(self, key: impl Into<String>, f: F) -> Self
    where
        F: Fn(&dyn Entity) -> Option<Value> + Send + Sync + 'static,
    {
        self.map(key, MappingRule::computed(f))
    }

    pub fn condition(mut self, condition: Condition) -> Self {
        self.spec.condition = Some(condition);
        self
    }

    pub fn when<F>(self, predicate: F) -> Self
    where
        F: Fn(&dyn Entity) -> bool + Send + Sync + 'static,
    {
        self.condition(Condition::Predicate(Arc::new(predicate)))
    }

    pub fn when_method(self, method: impl Into<String>) -> Self {
        self.condition(Condition::Named(method.into()))
    }

    pub fn identifier_field(mut self, field: impl Into<String>) -> Self {
        self.spec.identifier_field = field.into();
        self
    }

    pub fn transform<F>(mut self, f: F) -> Self
    where
        F: Fn(Payload, &dyn Entity) -> Payload + Send + Sync + 'static,
    {
        self.spec.transform = Some(Callback::Closure(Arc::new(f)));
        self
    }

    pub fn transform_method(mut self, method: impl Into<String>) -> Self {
        self.spec.transform = Some(Callback::Named(method.into()));
        self
    }

    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ErrorInfo, &dyn Entity) -> CoreResult<()> + Send + Sync + 'static,
    {
        self.spec.error_handler = Some(Arc::new(handler));
        self
    }

    pub fn before_sync<F>(mut self, hook: F) -> Self
    where
        F: Fn(&dyn Entity) -> CoreResult<()> + Send + Sync + 'static,
    {
        self.spec.before_sync = Some(Callback::Closure(Arc::new(hook)));
        self
    }

    pub fn before_sync_method(mut self, method: impl Into<String>) -> Self {
        self.spec.before_sync = Some(Callback::Named(method.into()));
        self
    }

    pub fn after_sync<F>(mut self, hook: F) -> Self
    where
        F: Fn(&dyn Entity, &SyncOutcome) -> CoreResult<()> + Send + Sync + 'static,
    {
        self.spec.after_sync = Some(Callback::Closure(Arc::new(hook)));
        self
    }

    pub fn after_sync_method(mut self, method: impl Into<String>) -> Self {
        self.spec.after_sync = Some(Callback::Named(method.into()));
        self
    }

    pub fn transition(mut self, rule: TransitionRule) -> Self {
        self.spec.transition_rules.push(rule);
        self
    }

    pub fn build(self) -> SyncSpec {
        self.spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use serde_json::json;

    #[test]
    fn test_redeclared_key_replaces_in_place() {
        let spec = SyncSpec::builder("people")
            .map_field("email", "email")
            .map_field("name", "name")
            .map_field("email", "work_email")
            .build();

        let keys: Vec<&str> = spec.attribute_mapping.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["email", "name"]);
        assert!(matches!(&spec.attribute_mapping[0].1, MappingRule::Field(f) if f == "work_email"));
    }

    #[test]
    fn test_identifier_for_uses_configured_field() {
        let record = Record::new("User", "9").with_field("uuid", json!("u-9"));

        let default_spec = SyncSpec::builder("people").build();
        assert_eq!(default_spec.identifier_for(&record), "9");

        let uuid_spec = SyncSpec::builder("people").identifier_field("uuid").build();
        assert_eq!(uuid_spec.identifier_for(&record), "u-9");

        let missing = SyncSpec::builder("people").identifier_field("nope").build();
        assert_eq!(missing.identifier_for(&record), "9");
    }

    #[test]
    fn test_named_hooks_invoke_entity_methods() {
        let record = Record::new("User", "1")
            .with_method("prepare", |_, _| Ok(None))
            .with_method("explode", |_, _| {
                Err(CoreError::MethodFailed {
                    method: "explode".into(),
                    message: "nope".into(),
                })
            });

        let ok = SyncSpec::builder("people").before_sync_method("prepare").build();
        assert!(ok.run_before_sync(&record).is_ok());

        let failing = SyncSpec::builder("people").before_sync_method("explode").build();
        assert!(failing.run_before_sync(&record).is_err());

        let missing = SyncSpec::builder("people").after_sync_method("absent").build();
        assert!(missing
            .run_after_sync(&record, &SyncOutcome::skipped())
            .is_err());
    }

    #[test]
    fn test_completeness() {
        assert!(!SyncSpec::builder("people").build().is_complete());
        assert!(!SyncSpec::builder("").map_field("a", "a").build().is_complete());
        assert!(SyncSpec::builder("people").map_field("a", "a").build().is_complete());
    }
}
