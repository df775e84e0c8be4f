//! # Model Registry
//!
//! Maps entity type names to their sync spec and reaches the host's
//! persistence layer, so deferred tasks that only carry references can be
//! turned back into entities.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use attio_core::{Entity, SyncSpec};

use crate::error::{SyncError, SyncResult};

/// Host persistence lookup.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// First entity of `entity_type` whose `field` equals `value`.
    async fn find_by(&self, entity_type: &str, field: &str, value: &Value) -> SyncResult<Option<Box<dyn Entity>>>;
}

/// Registered entity types and their specs.
pub struct ModelRegistry {
    specs: RwLock<HashMap<String, Arc<SyncSpec>>>,
    store: Arc<dyn EntityStore>,
}

impl ModelRegistry {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        ModelRegistry {
            specs: RwLock::new(HashMap::new()),
            store,
        }
    }

    /// Registers (or replaces) the spec for an entity type.
    pub fn register(&self, entity_type: impl Into<String>, spec: SyncSpec) -> SyncResult<Arc<SyncSpec>> {
        let entity_type = entity_type.into();
        let spec = Arc::new(spec);

        debug!(entity_type = %entity_type, object_type = %spec.object_type, "Registering sync model");
        self.specs
            .write()
            .map_err(|_| SyncError::Internal("model registry lock poisoned".into()))?
            .insert(entity_type, Arc::clone(&spec));

        Ok(spec)
    }

    pub fn spec_for(&self, entity_type: &str) -> SyncResult<Arc<SyncSpec>> {
        self.specs
            .read()
            .map_err(|_| SyncError::Internal("model registry lock poisoned".into()))?
            .get(entity_type)
            .cloned()
            .ok_or_else(|| SyncError::UnknownEntityType(entity_type.to_string()))
    }

    pub fn is_registered(&self, entity_type: &str) -> bool {
        self.specs
            .read()
            .map(|specs| specs.contains_key(entity_type))
            .unwrap_or(false)
    }

    /// Registered entity type names, sorted.
    pub fn entity_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .specs
            .read()
            .map(|specs| specs.keys().cloned().collect())
            .unwrap_or_default();
        types.sort();
        types
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    /// Loads an entity by local id.
    pub async fn find(&self, entity_type: &str, id: &str) -> SyncResult<Box<dyn Entity>> {
        self.store
            .find_by(entity_type, "id", &Value::String(id.to_string()))
            .await?
            .ok_or_else(|| SyncError::EntityNotFound {
                entity_type: entity_type.to_string(),
                id: id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryStore;
    use attio_core::Record;
    use serde_json::json;

    fn registry() -> ModelRegistry {
        let store = MemoryStore::new();
        store.insert(Record::new("User", "1").with_field("email", json!("a@b.com")));
        ModelRegistry::new(Arc::new(store))
    }

    #[test]
    fn test_register_and_lookup() {
        let models = registry();
        models
            .register("User", SyncSpec::builder("people").map_field("email", "email").build())
            .unwrap();

        assert!(models.is_registered("User"));
        assert_eq!(models.spec_for("User").unwrap().object_type, "people");
        assert!(matches!(models.spec_for("Deal"), Err(SyncError::UnknownEntityType(_))));
        assert_eq!(models.entity_types(), vec!["User".to_string()]);
    }

    #[tokio::test]
    async fn test_find_by_id() {
        let models = registry();

        let user = models.find("User", "1").await.unwrap();
        assert_eq!(user.field("email"), Some(json!("a@b.com")));

        let missing = models.find("User", "2").await;
        assert!(matches!(missing, Err(SyncError::EntityNotFound { .. })));
    }
}
