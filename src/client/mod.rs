//! Client helpers for talking to a pcbook server.
//!
//! `AuthClient` logs in, `TokenInterceptor` attaches the current access token
//! to every outgoing call, and `schedule_refresh` keeps that token fresh in the
//! background.

use crate::auth::AUTHORIZATION;
use crate::pb::{
    auth_service_client::AuthServiceClient, laptop_service_client::LaptopServiceClient,
    upload_image_request::Data, CreateLaptopRequest, Filter, ImageInfo, Laptop, LoginRequest,
    RateLaptopRequest, RateLaptopResponse, SearchLaptopRequest, UploadImageRequest,
    UploadImageResponse,
};
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tonic::service::interceptor::InterceptedService;
use tonic::service::Interceptor;
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Status};

/// Size of each chunk sent by `LaptopClient::upload_image`.
pub const UPLOAD_CHUNK_SIZE: usize = 1024;

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);
const LOGIN_RETRY_DELAY: Duration = Duration::from_secs(1);

pub async fn connect(addr: impl Into<String>) -> Result<Channel, tonic::transport::Error> {
    Endpoint::from_shared(addr.into())?.connect().await
}

#[derive(Debug, Clone)]
pub struct AuthClient {
    service: AuthServiceClient<Channel>,
    username: String,
    password: String,
}

impl AuthClient {
    pub fn new(channel: Channel, username: &str, password: &str) -> Self {
        Self {
            service: AuthServiceClient::new(channel),
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    /// Logs in with the stored credentials and returns a fresh access token.
    pub async fn login(&self) -> Result<String, Status> {
        let req = LoginRequest {
            username: self.username.clone(),
            password: self.password.clone(),
        };
        let res = self.service.clone().login(req).await?;
        Ok(res.into_inner().access_token)
    }
}

/// Attaches the current access token as `authorization` metadata.
#[derive(Debug, Clone, Default)]
pub struct TokenInterceptor {
    token: Arc<RwLock<String>>,
}

impl TokenInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_token(&self, token: String) {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = token;
    }

    pub fn token(&self) -> String {
        self.token.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Interceptor for TokenInterceptor {
    fn call(&mut self, mut req: Request<()>) -> Result<Request<()>, Status> {
        let token = self.token();
        if !token.is_empty() {
            let value = token
                .parse()
                .map_err(|_| Status::internal("access token is not valid metadata"))?;
            req.metadata_mut().insert(AUTHORIZATION, value);
        }
        Ok(req)
    }
}

/// Logs in once, then keeps renewing the token every `refresh_every`.
///
/// A failed renewal is retried after a second; the previous token stays in
/// use until it expires.
pub async fn schedule_refresh(
    auth: AuthClient,
    interceptor: TokenInterceptor,
    refresh_every: Duration,
) -> Result<JoinHandle<()>, Status> {
    interceptor.set_token(auth.login().await?);
    tracing::info!(username = %auth.username, "logged in");

    Ok(tokio::spawn(async move {
        let mut wait = refresh_every;
        loop {
            tokio::time::sleep(wait).await;
            match auth.login().await {
                Ok(token) => {
                    interceptor.set_token(token);
                    tracing::debug!(username = %auth.username, "access token refreshed");
                    wait = refresh_every;
                }
                Err(status) => {
                    tracing::warn!(
                        username = %auth.username,
                        code = ?status.code(),
                        reason = %status.message(),
                        "cannot refresh access token"
                    );
                    wait = LOGIN_RETRY_DELAY;
                }
            }
        }
    }))
}

pub type AuthedChannel = InterceptedService<Channel, TokenInterceptor>;

#[derive(Debug, Clone)]
pub struct LaptopClient {
    service: LaptopServiceClient<AuthedChannel>,
    timeout: Duration,
}

impl LaptopClient {
    pub fn new(channel: Channel, interceptor: TokenInterceptor) -> Self {
        Self {
            service: LaptopServiceClient::with_interceptor(channel, interceptor),
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Deadline sent with every call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn request<T>(&self, message: T) -> Request<T> {
        let mut req = Request::new(message);
        req.set_timeout(self.timeout);
        req
    }

    /// Creates a laptop and returns the id the server settled on.
    pub async fn create_laptop(&self, laptop: Laptop) -> Result<String, Status> {
        let req = self.request(CreateLaptopRequest {
            laptop: Some(laptop),
        });
        let res = self.service.clone().create_laptop(req).await?;
        Ok(res.into_inner().id)
    }

    /// Collects every laptop streamed back for `filter`.
    pub async fn search_laptop(&self, filter: Filter) -> Result<Vec<Laptop>, Status> {
        let req = self.request(SearchLaptopRequest {
            filter: Some(filter),
        });
        let mut stream = self.service.clone().search_laptop(req).await?.into_inner();

        let mut laptops = Vec::new();
        while let Some(res) = stream.message().await? {
            if let Some(laptop) = res.laptop {
                laptops.push(laptop);
            }
        }
        Ok(laptops)
    }

    /// Uploads `data` as one info message followed by fixed-size chunks.
    pub async fn upload_image(
        &self,
        laptop_id: &str,
        image_type: &str,
        data: &[u8],
    ) -> Result<UploadImageResponse, Status> {
        let mut messages = vec![UploadImageRequest {
            data: Some(Data::Info(ImageInfo {
                laptop_id: laptop_id.to_string(),
                image_type: image_type.to_string(),
            })),
        }];
        messages.extend(data.chunks(UPLOAD_CHUNK_SIZE).map(|chunk| UploadImageRequest {
            data: Some(Data::ChunkData(chunk.to_vec())),
        }));

        let req = self.request(tokio_stream::iter(messages));
        let res = self.service.clone().upload_image(req).await?;
        Ok(res.into_inner())
    }

    /// Uploads a file, using its extension (with the leading dot) as the image type.
    pub async fn upload_image_file(
        &self,
        laptop_id: &str,
        path: &Path,
    ) -> Result<UploadImageResponse, Status> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| Status::invalid_argument(format!("cannot read {}: {e}", path.display())))?;
        let image_type = path
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        self.upload_image(laptop_id, &image_type, &data).await
    }

    /// Rates each laptop in turn, waiting for each answer before sending the next score.
    pub async fn rate_laptops(
        &self,
        laptop_ids: &[String],
        scores: &[f64],
    ) -> Result<Vec<RateLaptopResponse>, Status> {
        if laptop_ids.len() != scores.len() {
            return Err(Status::invalid_argument(format!(
                "{} laptop ids but {} scores",
                laptop_ids.len(),
                scores.len()
            )));
        }

        let (tx, rx) = mpsc::channel(1);
        let req = self.request(ReceiverStream::new(rx));
        let mut stream = self.service.clone().rate_laptop(req).await?.into_inner();

        let mut responses = Vec::with_capacity(scores.len());
        for (laptop_id, score) in laptop_ids.iter().zip(scores) {
            tx.send(RateLaptopRequest {
                laptop_id: laptop_id.clone(),
                score: *score,
            })
            .await
            .map_err(|_| Status::unavailable("rating stream closed by the server"))?;

            let res = stream
                .message()
                .await?
                .ok_or_else(|| Status::unavailable("rating stream ended early"))?;
            tracing::debug!(
                laptop_id = %res.laptop_id,
                rated_count = res.rated_count,
                average_score = res.average_score,
                "received rating"
            );
            responses.push(res);
        }

        drop(tx);
        while stream.message().await?.is_some() {}
        Ok(responses)
    }
}
