//! # Workspace Helpers
//!
//! Read-only lookups against the remote workspace: object and attribute
//! metadata, and record queries by field value.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use attio_core::Payload;

use crate::config::ConfigurationRegistry;
use crate::error::SyncResult;

/// Metadata and query access to the configured workspace.
pub struct Workspace {
    config: Arc<ConfigurationRegistry>,
}

impl Workspace {
    pub fn new(config: Arc<ConfigurationRegistry>) -> Self {
        Workspace { config }
    }

    /// Objects defined in the workspace.
    pub async fn objects(&self) -> SyncResult<Vec<Value>> {
        let objects = self.config.client()?.list_objects().await?;
        debug!(count = objects.len(), "Listed workspace objects");
        Ok(objects)
    }

    /// Attributes of one object.
    pub async fn attributes(&self, object_type: &str) -> SyncResult<Vec<Value>> {
        let attributes = self.config.client()?.list_attributes(object_type).await?;
        debug!(object_type, count = attributes.len(), "Listed object attributes");
        Ok(attributes)
    }

    pub async fn list(&self, object_type: &str, filter: &Payload) -> SyncResult<Vec<Value>> {
        Ok(self.config.client()?.list(object_type, filter).await?)
    }

    /// First record of `object_type` whose `field` equals `value`.
    pub async fn find_by_field(&self, object_type: &str, field: &str, value: Value) -> SyncResult<Option<Value>> {
        let mut filter = Payload::new();
        filter.insert(field.to_string(), value);

        let found = self.list(object_type, &filter).await?.into_iter().next();
        debug!(object_type, field, found = found.is_some(), "Looked up record by field");
        Ok(found)
    }

    pub async fn exists(&self, object_type: &str, field: &str, value: Value) -> SyncResult<bool> {
        Ok(self.find_by_field(object_type, field, value).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AttioConfig;
    use crate::error::SyncError;
    use crate::testing::StubClient;
    use attio_core::RemoteError;
    use serde_json::json;

    fn workspace(stub: &Arc<StubClient>) -> Workspace {
        let mut config = AttioConfig::default();
        config.api.api_key = Some("sk_test".into());
        config.api.rate_limit_retries = false;
        Workspace::new(Arc::new(ConfigurationRegistry::new(config, stub.factory())))
    }

    #[tokio::test]
    async fn test_objects_and_attributes() {
        let stub = Arc::new(StubClient::new());
        stub.stub_objects(vec![json!({"api_slug": "people"}), json!({"api_slug": "deals"})]);
        stub.stub_attributes(vec![json!({"api_slug": "email_addresses"})]);
        let workspace = workspace(&stub);

        assert_eq!(workspace.objects().await.unwrap().len(), 2);
        let attributes = workspace.attributes("people").await.unwrap();
        assert_eq!(attributes, vec![json!({"api_slug": "email_addresses"})]);
        assert_eq!(stub.calls_to("list_attributes")[0].object_type, "people");
    }

    #[tokio::test]
    async fn test_find_by_field_returns_first_match() {
        let stub = Arc::new(StubClient::new());
        stub.stub_list(vec![json!({"id": "rec_1"}), json!({"id": "rec_2"})]);
        let workspace = workspace(&stub);

        let found = workspace
            .find_by_field("people", "email_addresses", json!("a@b.com"))
            .await
            .unwrap();

        assert_eq!(found, Some(json!({"id": "rec_1"})));
        assert_eq!(stub.calls_to("list")[0].payload, json!({"email_addresses": "a@b.com"}));
    }

    #[tokio::test]
    async fn test_exists() {
        let stub = Arc::new(StubClient::new());
        stub.stub_list(vec![json!({"id": "rec_1"})]);
        let workspace = workspace(&stub);

        assert!(workspace.exists("people", "email_addresses", json!("a@b.com")).await.unwrap());
        assert!(!workspace.exists("people", "email_addresses", json!("x@y.com")).await.unwrap());
    }

    #[tokio::test]
    async fn test_remote_errors_propagate() {
        let stub = Arc::new(StubClient::new());
        stub.stub_list_error(RemoteError::Authentication("revoked".into()));
        let workspace = workspace(&stub);

        let result = workspace.list("people", &Payload::new()).await;
        assert!(matches!(result, Err(ref e) if e.is_authentication()));
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let stub = Arc::new(StubClient::new());
        let workspace = Workspace::new(Arc::new(ConfigurationRegistry::new(AttioConfig::default(), stub.factory())));

        assert!(matches!(workspace.objects().await, Err(SyncError::MissingApiKey)));
    }
}
