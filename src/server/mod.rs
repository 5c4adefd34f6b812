// Copyright PingCAP Inc. 2025.
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; version 2 of the License.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use crate::auth::{accessible_roles, AuthInterceptor, AuthLayer, InMemoryUserStore, JwtManager};
use crate::config::Config;
use crate::handler::BaseHandler;
use crate::pb::auth_service_server::AuthServiceServer;
use crate::pb::laptop_service_server::LaptopServiceServer;
use crate::service::{AuthUserService, CatalogService};
use crate::storage::image::{DiskImageStore, InMemoryImageStore};
use crate::storage::in_memory::InMemoryLaptopStore;
use crate::storage::rating::InMemoryRatingStore;
use crate::storage::ImageStore;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::server::Router;
use tonic::transport::Server;
use tower::layer::util::{Identity, Stack};

#[async_trait]
pub trait ConnectionManager: Send + Sync + 'static {
    async fn serve(&self, addr: SocketAddr)
        -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// gRPC connection manager (tonic) hosting the laptop and auth services
/// behind the authorization layer.
#[derive(Clone)]
pub struct GrpcConnectionManager {
    catalog: CatalogService,
    auth: AuthUserService,
    interceptor: Arc<AuthInterceptor>,
}

impl GrpcConnectionManager {
    pub fn new(
        catalog: CatalogService,
        auth: AuthUserService,
        interceptor: Arc<AuthInterceptor>,
    ) -> Self {
        Self {
            catalog,
            auth,
            interceptor,
        }
    }

    /// Wires fresh stores, seeded users and the auth policy described by `cfg`.
    pub async fn from_config(
        cfg: &Config,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let users = InMemoryUserStore::new();
        for seed in &cfg.auth.users {
            users
                .create_user(&seed.username, &seed.password, &seed.role, cfg.auth.bcrypt_cost)
                .await?;
            tracing::info!(username = %seed.username, role = %seed.role, "seeded user");
        }

        let images: Arc<dyn ImageStore> = match cfg.images.backend.as_str() {
            "in-memory" => Arc::new(InMemoryImageStore::new()),
            _ => {
                let store = DiskImageStore::new(&cfg.images.folder).await?;
                tracing::info!(folder = %store.folder().display(), "storing images on disk");
                Arc::new(store)
            }
        };

        let handler = BaseHandler::new(
            Arc::new(InMemoryLaptopStore::new()),
            images,
            Arc::new(InMemoryRatingStore::new()),
        );
        let catalog = CatalogService::new(handler)
            .with_max_image_size(cfg.upload.max_image_size)
            .with_stream_buffer(cfg.server.stream_buffer);

        let jwt = Arc::new(JwtManager::new(&cfg.auth.secret_key, cfg.auth.token_duration()));
        let interceptor = if cfg.auth.enabled {
            AuthInterceptor::new(jwt.clone(), accessible_roles())
        } else {
            tracing::warn!("authorization disabled; every method is public");
            AuthInterceptor::allow_all(jwt.clone())
        };

        Ok(Self::new(
            catalog,
            AuthUserService::new(Arc::new(users), jwt),
            Arc::new(interceptor),
        ))
    }

    fn router(&self) -> Router<Stack<AuthLayer, Identity>> {
        Server::builder()
            .layer(AuthLayer::new(self.interceptor.clone()))
            .add_service(LaptopServiceServer::new(self.catalog.clone()))
            .add_service(AuthServiceServer::new(self.auth.clone()))
    }

    /// Serves on an already bound listener, e.g. one bound to port 0 in tests.
    pub async fn serve_with_listener(
        &self,
        listener: TcpListener,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        tracing::info!(addr = ?listener.local_addr().ok(), "Starting gRPC server");
        self.router()
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ConnectionManager for GrpcConnectionManager {
    async fn serve(
        &self,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        tracing::info!("Starting gRPC server on {}", addr);
        self.router().serve(addr).await?;
        Ok(())
    }
}
