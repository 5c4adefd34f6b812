use crate::context::CallContext;
use crate::handler::BaseHandler;
use crate::observability::metrics;
use crate::pb::{
    laptop_service_server::LaptopService, CreateLaptopRequest, CreateLaptopResponse, Laptop,
    RateLaptopRequest, RateLaptopResponse, SearchLaptopRequest, SearchLaptopResponse,
    UploadImageRequest, UploadImageResponse,
};
use crate::storage::{assign_id, FoundFuture, StoreError};
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tonic::{Request, Response, Status, Streaming};

pub mod auth;
pub mod rating;
pub mod upload;

pub use auth::AuthUserService;
pub use upload::{UploadSession, DEFAULT_MAX_IMAGE_SIZE};

pub const DEFAULT_STREAM_BUFFER: usize = 16;

type ResponseStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>;

/// gRPC service implementation wrapping BaseHandler
#[derive(Clone)]
pub struct CatalogService {
    handler: BaseHandler,
    max_image_size: usize,
    stream_buffer: usize,
}

impl CatalogService {
    pub fn new(handler: BaseHandler) -> Self {
        Self {
            handler,
            max_image_size: DEFAULT_MAX_IMAGE_SIZE,
            stream_buffer: DEFAULT_STREAM_BUFFER,
        }
    }

    pub fn with_max_image_size(mut self, max_image_size: usize) -> Self {
        self.max_image_size = max_image_size;
        self
    }

    /// Capacity of the channel feeding each server stream.
    pub fn with_stream_buffer(mut self, stream_buffer: usize) -> Self {
        self.stream_buffer = stream_buffer.max(1);
        self
    }
}

pub(crate) fn map_store_err(e: StoreError) -> Status {
    match e {
        StoreError::InvalidId(m) => Status::invalid_argument(format!("laptop ID is not a valid UUID: {m}")),
        StoreError::AlreadyExists(id) => Status::already_exists(format!("laptop {id} already exists")),
        StoreError::Aborted(reason) => reason.into(),
        StoreError::Io(e) => Status::internal(format!("io error: {e}")),
        StoreError::Internal(m) => Status::internal(m),
    }
}

#[tonic::async_trait]
impl LaptopService for CatalogService {
    type SearchLaptopStream = ResponseStream<SearchLaptopResponse>;
    type RateLaptopStream = ResponseStream<RateLaptopResponse>;

    #[tracing::instrument(skip(self, req), fields(method = "create_laptop"))]
    async fn create_laptop(
        &self,
        req: Request<CreateLaptopRequest>,
    ) -> Result<Response<CreateLaptopResponse>, Status> {
        let start_time = std::time::Instant::now();

        let result = async {
            let ctx = CallContext::from_metadata(req.metadata());
            let mut laptop = req
                .into_inner()
                .laptop
                .ok_or_else(|| Status::invalid_argument("laptop is required"))?;
            assign_id(&mut laptop).map_err(map_store_err)?;

            if let Err(reason) = ctx.check() {
                tracing::warn!(laptop_id = %laptop.id, %reason, "create abandoned");
                return Err(reason.into());
            }

            self.handler.laptops.save(&mut laptop).await.map_err(|e| {
                tracing::warn!(laptop_id = %laptop.id, error = %e, "cannot save laptop");
                map_store_err(e)
            })?;

            tracing::info!(laptop_id = %laptop.id, "laptop created");
            Ok(Response::new(CreateLaptopResponse { id: laptop.id }))
        }
        .await;

        metrics::record_grpc_call("create_laptop", result.is_ok(), start_time.elapsed().as_secs_f64());
        result
    }

    async fn search_laptop(
        &self,
        req: Request<SearchLaptopRequest>,
    ) -> Result<Response<Self::SearchLaptopStream>, Status> {
        let ctx = CallContext::from_metadata(req.metadata());
        let filter = req
            .into_inner()
            .filter
            .ok_or_else(|| Status::invalid_argument("filter is required"))?;
        tracing::info!(?filter, "search laptops");

        let (tx, rx) = mpsc::channel(self.stream_buffer);
        let laptops = self.handler.laptops.clone();

        tokio::spawn(async move {
            let start_time = std::time::Instant::now();
            let _watch = ctx.cancel_on_close(&tx);

            let mut matches = 0u64;
            let sender = tx.clone();
            let mut found = |laptop: Laptop| -> FoundFuture {
                matches += 1;
                let tx = sender.clone();
                Box::pin(async move {
                    tracing::debug!(laptop_id = %laptop.id, "found laptop");
                    tx.send(Ok(SearchLaptopResponse {
                        laptop: Some(laptop),
                    }))
                    .await
                    .map_err(|_| StoreError::Internal("cannot send laptop to the stream".to_string()))
                })
            };

            let result = laptops.search(&ctx, &filter, &mut found).await;
            metrics::increment_search_matches(matches);
            metrics::record_grpc_call("search_laptop", result.is_ok(), start_time.elapsed().as_secs_f64());

            if let Err(e) = result {
                let status = match e {
                    StoreError::Aborted(reason) => reason.into(),
                    other => Status::internal(format!("unexpected error: {other}")),
                };
                tracing::warn!(code = ?status.code(), reason = %status.message(), "search aborted");
                let _ = tx.send(Err(status)).await;
            } else {
                tracing::info!(matches, "search finished");
            }
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    #[tracing::instrument(skip(self, req), fields(method = "upload_image"))]
    async fn upload_image(
        &self,
        req: Request<Streaming<UploadImageRequest>>,
    ) -> Result<Response<UploadImageResponse>, Status> {
        let start_time = std::time::Instant::now();
        let ctx = CallContext::from_metadata(req.metadata());

        let result = UploadSession::new(
            self.handler.laptops.clone(),
            self.handler.images.clone(),
            self.max_image_size,
        )
        .run(&ctx, req.into_inner())
        .await
        .map(Response::new);

        metrics::record_grpc_call("upload_image", result.is_ok(), start_time.elapsed().as_secs_f64());
        result
    }

    async fn rate_laptop(
        &self,
        req: Request<Streaming<RateLaptopRequest>>,
    ) -> Result<Response<Self::RateLaptopStream>, Status> {
        let ctx = CallContext::from_metadata(req.metadata());
        let inbound = req.into_inner();
        let (tx, rx) = mpsc::channel(self.stream_buffer);
        let ratings = self.handler.ratings.clone();

        tokio::spawn(async move {
            let start_time = std::time::Instant::now();
            let _watch = ctx.cancel_on_close(&tx);

            let result = rating::rate_stream(&ctx, ratings.as_ref(), inbound, &tx).await;
            metrics::record_grpc_call("rate_laptop", result.is_ok(), start_time.elapsed().as_secs_f64());
            match result {
                Ok(rated) => tracing::info!(rated, "rating stream closed"),
                Err(status) => {
                    tracing::warn!(code = ?status.code(), reason = %status.message(), "rating stream failed");
                    let _ = tx.send(Err(status)).await;
                }
            }
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pb::{memory::Unit, Cpu, Filter, Memory};
    use crate::storage::image::InMemoryImageStore;
    use crate::storage::in_memory::InMemoryLaptopStore;
    use crate::storage::rating::InMemoryRatingStore;
    use crate::storage::LaptopStore;
    use std::sync::Arc;
    use tokio_stream::StreamExt;

    fn create_test_service() -> (CatalogService, Arc<InMemoryLaptopStore>) {
        let laptops = Arc::new(InMemoryLaptopStore::new());
        let handler = BaseHandler::new(
            laptops.clone(),
            Arc::new(InMemoryImageStore::new()),
            Arc::new(InMemoryRatingStore::new()),
        );
        (CatalogService::new(handler), laptops)
    }

    fn laptop(price: f64, cores: u32, ghz: f64, ram_gb: u64) -> Laptop {
        Laptop {
            brand: "Lenovo".to_string(),
            name: "Thinkpad X1".to_string(),
            cpu: Some(Cpu {
                brand: "Intel".to_string(),
                name: "Core i7".to_string(),
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
            release_year: 2025,
            ..Default::default()
        }
    }

    fn create_request(laptop: Option<Laptop>) -> Request<CreateLaptopRequest> {
        Request::new(CreateLaptopRequest { laptop })
    }

    #[tokio::test]
    async fn test_service_create_laptop_generates_id() {
        let (service, laptops) = create_test_service();
        let response = service
            .create_laptop(create_request(Some(laptop(1500.0, 4, 3.0, 16))))
            .await
            .unwrap();

        let id = response.into_inner().id;
        assert!(uuid::Uuid::parse_str(&id).is_ok());
        let stored = laptops.find(&id).await.unwrap().unwrap();
        assert_eq!(stored.price_usd, 1500.0);
    }

    #[tokio::test]
    async fn test_service_create_laptop_keeps_client_id() {
        let (service, _) = create_test_service();
        let id = uuid::Uuid::new_v4().to_string();
        let mut l = laptop(900.0, 2, 2.0, 8);
        l.id = id.clone();

        let response = service.create_laptop(create_request(Some(l))).await.unwrap();
        assert_eq!(response.into_inner().id, id);
    }

    #[tokio::test]
    async fn test_service_create_laptop_invalid_id() {
        let (service, laptops) = create_test_service();
        let mut l = laptop(900.0, 2, 2.0, 8);
        l.id = "invalid-uuid".to_string();

        let result = service.create_laptop(create_request(Some(l))).await;
        assert_eq!(result.unwrap_err().code(), tonic::Code::InvalidArgument);
        assert!(laptops.is_empty().await);
    }

    #[tokio::test]
    async fn test_service_create_laptop_duplicate_id() {
        let (service, _) = create_test_service();
        let mut l = laptop(900.0, 2, 2.0, 8);
        l.id = uuid::Uuid::new_v4().to_string();

        service.create_laptop(create_request(Some(l.clone()))).await.unwrap();
        let result = service.create_laptop(create_request(Some(l))).await;
        assert_eq!(result.unwrap_err().code(), tonic::Code::AlreadyExists);
    }

    #[tokio::test]
    async fn test_service_create_laptop_missing_laptop() {
        let (service, _) = create_test_service();
        let result = service.create_laptop(create_request(None)).await;
        assert_eq!(result.unwrap_err().code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_service_create_laptop_deadline_passed() {
        let (service, laptops) = create_test_service();
        let mut req = create_request(Some(laptop(900.0, 2, 2.0, 8)));
        req.metadata_mut().insert("grpc-timeout", "0m".parse().unwrap());

        let result = service.create_laptop(req).await;
        assert_eq!(result.unwrap_err().code(), tonic::Code::DeadlineExceeded);
        assert!(laptops.is_empty().await);
    }

    #[tokio::test]
    async fn test_service_search_laptop_streams_matches() {
        let (service, _) = create_test_service();
        let mut expected = Vec::new();
        for (i, l) in [
            laptop(2500.0, 8, 3.0, 16),
            laptop(1800.0, 2, 3.0, 16),
            laptop(1800.0, 4, 2.0, 16),
            laptop(1800.0, 4, 3.0, 4),
            laptop(1999.0, 4, 2.5, 8),
            laptop(2000.0, 6, 2.8, 64),
        ]
        .into_iter()
        .enumerate()
        {
            let id = service.create_laptop(create_request(Some(l))).await.unwrap().into_inner().id;
            if i >= 4 {
                expected.push(id);
            }
        }

        let req = Request::new(SearchLaptopRequest {
            filter: Some(Filter {
                max_price_usd: 2000.0,
                min_cpu_cores: 4,
                min_cpu_ghz: 2.2,
                min_ram: Some(Memory {
                    value: 8,
                    unit: Unit::Gigabyte as i32,
                }),
            }),
        });
        let mut stream = service.search_laptop(req).await.unwrap().into_inner();

        let mut found = Vec::new();
        while let Some(res) = stream.next().await {
            found.push(res.unwrap().laptop.unwrap().id);
        }
        found.sort();
        expected.sort();
        assert_eq!(found, expected);
    }

    #[tokio::test]
    async fn test_service_search_laptop_empty_result() {
        let (service, _) = create_test_service();
        let req = Request::new(SearchLaptopRequest {
            filter: Some(Filter::default()),
        });
        let stream = service.search_laptop(req).await.unwrap().into_inner();
        let results: Vec<_> = stream.collect().await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_service_search_laptop_missing_filter() {
        let (service, _) = create_test_service();
        let result = service
            .search_laptop(Request::new(SearchLaptopRequest { filter: None }))
            .await;
        assert_eq!(result.err().map(|s| s.code()), Some(tonic::Code::InvalidArgument));
    }

    #[tokio::test]
    async fn test_service_search_laptop_deadline_passed() {
        let (service, _) = create_test_service();
        service
            .create_laptop(create_request(Some(laptop(100.0, 4, 3.0, 16))))
            .await
            .unwrap();

        let mut req = Request::new(SearchLaptopRequest {
            filter: Some(Filter {
                max_price_usd: 1000.0,
                ..Default::default()
            }),
        });
        req.metadata_mut().insert("grpc-timeout", "0m".parse().unwrap());

        let results: Vec<_> = service.search_laptop(req).await.unwrap().into_inner().collect().await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].as_ref().unwrap_err().code(), tonic::Code::DeadlineExceeded);
    }

    #[test]
    fn test_map_store_err() {
        assert_eq!(
            map_store_err(StoreError::AlreadyExists("x".into())).code(),
            tonic::Code::AlreadyExists
        );
        assert_eq!(
            map_store_err(StoreError::InvalidId("x".into())).code(),
            tonic::Code::InvalidArgument
        );
        assert_eq!(
            map_store_err(StoreError::Aborted(crate::context::ContextError::Cancelled)).code(),
            tonic::Code::Cancelled
        );
        assert_eq!(
            map_store_err(StoreError::Internal("boom".into())).code(),
            tonic::Code::Internal
        );
    }
}
