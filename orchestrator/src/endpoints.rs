//! Endpoint lookup collaborator.

use std::collections::HashMap;

use async_trait::async_trait;
use shared_types::Endpoint;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum EndpointError {
    #[error("endpoint not found")]
    NotFound,
    #[error("invalid endpoint: {0}")]
    Invalid(String),
    #[error("endpoint store error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait EndpointStore: Send + Sync {
    async fn create(&self, endpoint: Endpoint) -> Result<Endpoint, EndpointError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Endpoint, EndpointError>;
}

#[derive(Default)]
pub struct InMemoryEndpointStore {
    endpoints: RwLock<HashMap<Uuid, Endpoint>>,
}

impl InMemoryEndpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EndpointStore for InMemoryEndpointStore {
    async fn create(&self, endpoint: Endpoint) -> Result<Endpoint, EndpointError> {
        endpoint
            .validate()
            .map_err(|e| EndpointError::Invalid(e.to_string()))?;
        self.endpoints
            .write()
            .await
            .insert(endpoint.id, endpoint.clone());
        info!(endpoint_id = %endpoint.id, url = %endpoint.url, "endpoint created");
        Ok(endpoint)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Endpoint, EndpointError> {
        self.endpoints
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(EndpointError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::Credential;

    #[tokio::test]
    async fn create_then_fetch() {
        let store = InMemoryEndpointStore::new();
        let endpoint = Endpoint::new(
            "staging",
            "https://app.test",
            vec![Credential {
                key: "username".to_string(),
                value: "qa".to_string(),
            }],
            Uuid::new_v4(),
        );
        let created = store.create(endpoint.clone()).await.unwrap();
        assert_eq!(store.get_by_id(created.id).await.unwrap(), endpoint);
    }

    #[tokio::test]
    async fn create_validates_and_lookup_reports_missing() {
        let store = InMemoryEndpointStore::new();
        let endpoint = Endpoint::new("staging", "", vec![], Uuid::new_v4());
        assert!(matches!(
            store.create(endpoint).await,
            Err(EndpointError::Invalid(_))
        ));
        assert_eq!(
            store.get_by_id(Uuid::new_v4()).await,
            Err(EndpointError::NotFound)
        );
    }
}
