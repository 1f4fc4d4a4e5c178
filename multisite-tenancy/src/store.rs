//! Registry store
//!
//! Tenant records live as `site` pieces in the dashboard's own content
//! repository. [`RegistryStore`] is the narrow seam the registry talks to;
//! [`PieceRegistryStore`] is the piece-backed implementation.

use crate::TenantError;
use crate::storage::{ContentRepository, PieceQuery};
use crate::tenant::TenantRecord;
use async_trait::async_trait;
use std::sync::Arc;

/// Piece type holding tenant records
pub const SITE_PIECE_TYPE: &str = "site";

/// Equality query over tenant records
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryQuery {
    pub id: Option<String>,
    pub short_name: Option<String>,
    /// A `tier:host` route claimed by the record
    pub route: Option<String>,
    pub published: Option<bool>,
}

impl RegistryQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn by_short_name(short_name: impl Into<String>) -> Self {
        Self {
            short_name: Some(short_name.into()),
            ..Default::default()
        }
    }

    pub fn by_route(route: impl Into<String>) -> Self {
        Self {
            route: Some(route.into()),
            ..Default::default()
        }
    }

    pub fn published_only(mut self) -> Self {
        self.published = Some(true);
        self
    }

    fn to_piece_query(&self) -> PieceQuery {
        let mut query = PieceQuery::new();
        if let Some(id) = &self.id {
            query = query.where_eq("_id", id.as_str());
        }
        if let Some(short_name) = &self.short_name {
            query = query.where_eq("shortName", short_name.as_str());
        }
        if let Some(route) = &self.route {
            query = query.where_eq("routes", route.as_str());
        }
        if let Some(published) = self.published {
            query = query.where_eq("published", published);
        }
        query
    }
}

/// Durable home of tenant records
#[async_trait]
pub trait RegistryStore: Send + Sync {
    async fn find(&self, query: &RegistryQuery) -> Result<Vec<TenantRecord>, TenantError>;

    async fn insert(&self, record: &TenantRecord) -> Result<TenantRecord, TenantError>;

    async fn update(&self, record: &TenantRecord) -> Result<TenantRecord, TenantError>;

    async fn remove(&self, id: &str) -> Result<bool, TenantError>;
}

/// Registry store backed by `site` pieces in a content repository
pub struct PieceRegistryStore {
    repository: Arc<dyn ContentRepository>,
}

impl PieceRegistryStore {
    pub fn new(repository: Arc<dyn ContentRepository>) -> Self {
        Self { repository }
    }
}

fn to_piece(record: &TenantRecord) -> Result<serde_json::Value, TenantError> {
    serde_json::to_value(record).map_err(|e| TenantError::Storage(e.to_string()))
}

fn from_piece(piece: serde_json::Value) -> Result<TenantRecord, TenantError> {
    serde_json::from_value(piece).map_err(|e| TenantError::Storage(format!("corrupt site piece: {}", e)))
}

#[async_trait]
impl RegistryStore for PieceRegistryStore {
    async fn find(&self, query: &RegistryQuery) -> Result<Vec<TenantRecord>, TenantError> {
        self.repository
            .find(SITE_PIECE_TYPE, &query.to_piece_query())
            .await?
            .into_iter()
            .map(from_piece)
            .collect()
    }

    async fn insert(&self, record: &TenantRecord) -> Result<TenantRecord, TenantError> {
        let piece = self.repository.insert(SITE_PIECE_TYPE, to_piece(record)?).await?;
        from_piece(piece)
    }

    async fn update(&self, record: &TenantRecord) -> Result<TenantRecord, TenantError> {
        let piece = self.repository.update(SITE_PIECE_TYPE, to_piece(record)?).await?;
        from_piece(piece)
    }

    async fn remove(&self, id: &str) -> Result<bool, TenantError> {
        self.repository.remove(SITE_PIECE_TYPE, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{InMemoryStorageProvider, StorageProvider};
    use crate::tenant::CreateTenantRequest;

    async fn store() -> PieceRegistryStore {
        let provider = InMemoryStorageProvider::new();
        PieceRegistryStore::new(provider.open("test-multi-dashboard").await.unwrap())
    }

    #[tokio::test]
    async fn test_insert_and_find_by_fields() {
        let store = store().await;
        let record = CreateTenantRequest::new("Site A")
            .with_short_name("aaa")
            .with_hostname("site.test")
            .into_record();
        store.insert(&record).await.unwrap();

        let by_id = store.find(&RegistryQuery::by_id(&record.id)).await.unwrap();
        let by_short = store.find(&RegistryQuery::by_short_name("aaa")).await.unwrap();
        let by_route = store.find(&RegistryQuery::by_route("prod:site.test")).await.unwrap();
        let missing = store.find(&RegistryQuery::by_short_name("zzz")).await.unwrap();

        assert_eq!(by_id, vec![record.clone()]);
        assert_eq!(by_short.len(), 1);
        assert_eq!(by_route.len(), 1);
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn test_published_filter() {
        let store = store().await;
        let record = CreateTenantRequest::new("Hidden")
            .with_short_name("hidden")
            .with_published(false)
            .into_record();
        store.insert(&record).await.unwrap();

        let query = RegistryQuery::by_short_name("hidden");
        assert_eq!(store.find(&query).await.unwrap().len(), 1);
        assert!(store.find(&query.published_only()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_and_remove() {
        let store = store().await;
        let mut record = TenantRecord::new("Site A").with_short_name("aaa");
        store.insert(&record).await.unwrap();

        record.short_name = "bbb".to_string();
        store.update(&record).await.unwrap();
        assert!(store.find(&RegistryQuery::by_short_name("aaa")).await.unwrap().is_empty());

        assert!(store.remove(&record.id).await.unwrap());
        assert!(store.find(&RegistryQuery::by_id(&record.id)).await.unwrap().is_empty());
    }
}
