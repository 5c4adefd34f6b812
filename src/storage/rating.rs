use crate::storage::{Rating, RatingStore, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory rating aggregates keyed by laptop id.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRatingStore {
    ratings: Arc<RwLock<HashMap<String, Rating>>>,
}

impl InMemoryRatingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, laptop_id: &str) -> Option<Rating> {
        self.ratings.read().await.get(laptop_id).copied()
    }
}

#[async_trait]
impl RatingStore for InMemoryRatingStore {
    async fn add(&self, laptop_id: &str, score: f64) -> Result<Rating, StoreError> {
        let mut ratings = self.ratings.write().await;
        let rating = ratings
            .entry(laptop_id.to_string())
            .and_modify(|r| {
                r.count += 1;
                r.sum += score;
            })
            .or_insert(Rating {
                count: 1,
                sum: score,
            });
        Ok(*rating)
    }
}
