use crate::context::{CallContext, ContextError};
use crate::pb::{Filter, Laptop};
use async_trait::async_trait;
use futures::future::BoxFuture;
use thiserror::Error;
use uuid::Uuid;

pub mod filter;
pub mod image;
pub mod in_memory;
pub mod rating;

/// Running aggregate of the scores submitted for one laptop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rating {
    pub count: u32,
    pub sum: f64,
}

impl Rating {
    pub fn average(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum / f64::from(self.count)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("laptop id is not a valid UUID: {0}")]
    InvalidId(String),
    #[error("record already exists: {0}")]
    AlreadyExists(String),
    #[error("search aborted: {0}")]
    Aborted(#[from] ContextError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("internal storage error: {0}")]
    Internal(String),
}

/// Future returned by a search callback for every matching laptop.
pub type FoundFuture = BoxFuture<'static, Result<(), StoreError>>;

/// Callback invoked once per laptop matching a search filter.
pub type Found<'a> = &'a mut (dyn FnMut(Laptop) -> FoundFuture + Send);

#[async_trait]
pub trait LaptopStore: Send + Sync + 'static {
    /// Stores a copy of `laptop`. An empty id is replaced with a fresh UUID,
    /// which is written back into `laptop`.
    async fn save(&self, laptop: &mut Laptop) -> Result<(), StoreError>;

    /// Returns a copy of the laptop, `None` when the id is unknown.
    async fn find(&self, id: &str) -> Result<Option<Laptop>, StoreError>;

    /// Invokes `found` with a copy of every laptop matching `filter`.
    ///
    /// `ctx` is checked before each candidate. An error returned by `found`
    /// stops the scan and is returned as-is.
    async fn search(
        &self,
        ctx: &CallContext,
        filter: &Filter,
        found: Found<'_>,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait RatingStore: Send + Sync + 'static {
    /// Adds `score` to the laptop's aggregate and returns the updated value.
    async fn add(&self, laptop_id: &str, score: f64) -> Result<Rating, StoreError>;
}

#[async_trait]
pub trait ImageStore: Send + Sync + 'static {
    /// Persists a complete image and returns the generated image id.
    async fn save(
        &self,
        laptop_id: &str,
        image_type: &str,
        data: bytes::Bytes,
    ) -> Result<String, StoreError>;
}

/// Validates a client supplied laptop id, or assigns a random one when empty.
pub fn assign_id(laptop: &mut Laptop) -> Result<(), StoreError> {
    if laptop.id.is_empty() {
        laptop.id = Uuid::new_v4().to_string();
        return Ok(());
    }
    Uuid::parse_str(&laptop.id)
        .map_err(|e| StoreError::InvalidId(format!("{}: {e}", laptop.id)))?;
    Ok(())
}
