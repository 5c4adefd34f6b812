#![allow(dead_code)]

use pcbook::auth::{accessible_roles, AuthInterceptor, InMemoryUserStore, JwtManager};
use pcbook::client::{connect, AuthClient, LaptopClient, TokenInterceptor};
use pcbook::handler::BaseHandler;
use pcbook::pb::{memory::Unit, Cpu, Laptop, Memory};
use pcbook::server::GrpcConnectionManager;
use pcbook::service::{AuthUserService, CatalogService};
use pcbook::storage::image::InMemoryImageStore;
use pcbook::storage::in_memory::InMemoryLaptopStore;
use pcbook::storage::rating::InMemoryRatingStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tonic::transport::Channel;

pub const SECRET: &str = "integration-secret";
pub const PASSWORD: &str = "secret";

/// A server bound to an ephemeral port, stopped when dropped.
pub struct TestServer {
    pub addr: String,
    pub laptops: Arc<InMemoryLaptopStore>,
    pub images: Arc<InMemoryImageStore>,
    pub ratings: Arc<InMemoryRatingStore>,
    handle: JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub async fn start_server(auth_enabled: bool) -> TestServer {
    let users = InMemoryUserStore::new();
    users.create_user("admin1", PASSWORD, "admin", 4).await.unwrap();
    users.create_user("user1", PASSWORD, "user", 4).await.unwrap();

    let jwt = Arc::new(JwtManager::new(SECRET, Duration::from_secs(60)));
    let interceptor = if auth_enabled {
        AuthInterceptor::new(jwt.clone(), accessible_roles())
    } else {
        AuthInterceptor::allow_all(jwt.clone())
    };

    let laptops = Arc::new(InMemoryLaptopStore::new());
    let images = Arc::new(InMemoryImageStore::new());
    let ratings = Arc::new(InMemoryRatingStore::new());
    let handler = BaseHandler::new(laptops.clone(), images.clone(), ratings.clone());

    let server = GrpcConnectionManager::new(
        CatalogService::new(handler),
        AuthUserService::new(Arc::new(users), jwt),
        Arc::new(interceptor),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = format!("http://{}", listener.local_addr().unwrap());
    let handle = tokio::spawn(async move {
        if let Err(e) = server.serve_with_listener(listener).await {
            eprintln!("test server stopped: {e}");
        }
    });

    TestServer {
        addr,
        laptops,
        images,
        ratings,
        handle,
    }
}

pub async fn channel(server: &TestServer) -> Channel {
    connect(server.addr.clone()).await.unwrap()
}

/// A laptop client carrying no token at all.
pub async fn anonymous_client(server: &TestServer) -> LaptopClient {
    LaptopClient::new(channel(server).await, TokenInterceptor::new())
}

/// A laptop client logged in as `username`.
pub async fn client_as(server: &TestServer, username: &str) -> LaptopClient {
    let channel = channel(server).await;
    let token = AuthClient::new(channel.clone(), username, PASSWORD)
        .login()
        .await
        .unwrap();
    let interceptor = TokenInterceptor::new();
    interceptor.set_token(token);
    LaptopClient::new(channel, interceptor)
}

pub fn sample_laptop(price: f64, cores: u32, ghz: f64, ram_gb: u64) -> Laptop {
    Laptop {
        brand: "Dell".to_string(),
        name: "XPS".to_string(),
        cpu: Some(Cpu {
            brand: "Intel".to_string(),
            name: "Core i9".to_string(),
            number_of_cores: cores,
            number_of_threads: cores * 2,
            minimum_frequency: ghz / 2.0,
            maximum_frequency: ghz,
        }),
        ram: Some(Memory {
            value: ram_gb,
            unit: Unit::Gigabyte as i32,
        }),
        price_usd: price,
        release_year: 2024,
        ..Default::default()
    }
}
