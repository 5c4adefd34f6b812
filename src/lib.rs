pub mod auth;
pub mod client;
pub mod config;
pub mod context;
pub mod handler;
pub mod observability;
pub mod pb;
pub mod server;
pub mod service;
pub mod storage;

pub use auth::{AuthInterceptor, JwtManager, UserStore};
pub use context::CallContext;
pub use handler::BaseHandler;
pub use service::{AuthUserService, CatalogService};
pub use storage::{ImageStore, LaptopStore, RatingStore};
