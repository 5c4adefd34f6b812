use crate::context::CallContext;
use crate::pb::{Filter, Laptop};
use crate::storage::filter::matches_filter;
use crate::storage::{assign_id, Found, LaptopStore, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory laptop store.
///
/// Every laptop crossing the store boundary is cloned, so callers never hold
/// a reference into the map.
///
/// `search` keeps the read lock while the callback runs. A consumer that is
/// slow to accept results therefore blocks writers until the scan finishes.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLaptopStore {
    data: Arc<RwLock<HashMap<String, Laptop>>>,
}

impl InMemoryLaptopStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }
}

#[async_trait]
impl LaptopStore for InMemoryLaptopStore {
    async fn save(&self, laptop: &mut Laptop) -> Result<(), StoreError> {
        assign_id(laptop)?;

        let mut data = self.data.write().await;
        if data.contains_key(&laptop.id) {
            return Err(StoreError::AlreadyExists(laptop.id.clone()));
        }
        data.insert(laptop.id.clone(), laptop.clone());
        Ok(())
    }

    async fn find(&self, id: &str) -> Result<Option<Laptop>, StoreError> {
        let data = self.data.read().await;
        Ok(data.get(id).cloned())
    }

    async fn search(
        &self,
        ctx: &CallContext,
        filter: &Filter,
        found: Found<'_>,
    ) -> Result<(), StoreError> {
        let data = self.data.read().await;

        for laptop in data.values() {
            if let Err(e) = ctx.check() {
                tracing::debug!(laptop_id = %laptop.id, error = %e, "search interrupted");
                return Err(e.into());
            }

            if matches_filter(filter, laptop) {
                found(laptop.clone()).await?;
            }
        }
        Ok(())
    }
}
