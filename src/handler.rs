use crate::storage::{ImageStore, LaptopStore, RatingStore};
use std::sync::Arc;

/// Base handler implementation that holds the stores shared by every call.
/// The gRPC service wraps this; tests build it around in-memory stores.
#[derive(Clone)]
pub struct BaseHandler {
    pub laptops: Arc<dyn LaptopStore>,
    pub images: Arc<dyn ImageStore>,
    pub ratings: Arc<dyn RatingStore>,
}

impl BaseHandler {
    pub fn new(
        laptops: Arc<dyn LaptopStore>,
        images: Arc<dyn ImageStore>,
        ratings: Arc<dyn RatingStore>,
    ) -> Self {
        Self {
            laptops,
            images,
            ratings,
        }
    }
}
