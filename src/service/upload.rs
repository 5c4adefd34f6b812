//! Client-streaming image upload.
//!
//! An upload is one `info` message followed by any number of chunks and a
//! half-close. `UploadSession` walks `AwaitingInfo -> Receiving ->
//! (Finalizing | Rejected)` reading exactly one inbound message per step;
//! a rejected session never resumes.

use crate::context::CallContext;
use crate::observability::metrics;
use crate::pb::{upload_image_request::Data, ImageInfo, UploadImageRequest, UploadImageResponse};
use crate::storage::{ImageStore, LaptopStore};
use bytes::BytesMut;
use std::sync::Arc;
use tokio_stream::{Stream, StreamExt};
use tonic::Status;

/// Largest image accepted by default, in bytes.
pub const DEFAULT_MAX_IMAGE_SIZE: usize = 1 << 20;

#[derive(Debug)]
struct PendingImage {
    laptop_id: String,
    image_type: String,
    data: BytesMut,
}

#[derive(Debug)]
enum UploadState {
    AwaitingInfo,
    Receiving(PendingImage),
    Finalizing(PendingImage),
    Rejected(Status),
}

pub struct UploadSession {
    laptops: Arc<dyn LaptopStore>,
    images: Arc<dyn ImageStore>,
    max_size: usize,
}

impl UploadSession {
    pub fn new(laptops: Arc<dyn LaptopStore>, images: Arc<dyn ImageStore>, max_size: usize) -> Self {
        Self {
            laptops,
            images,
            max_size,
        }
    }

    /// Drives the upload to completion and returns the stored image id and size.
    pub async fn run<S>(self, ctx: &CallContext, mut inbound: S) -> Result<UploadImageResponse, Status>
    where
        S: Stream<Item = Result<UploadImageRequest, Status>> + Unpin + Send,
    {
        let mut state = UploadState::AwaitingInfo;
        let mut received = 0usize;

        loop {
            state = match state {
                UploadState::AwaitingInfo => self.await_info(ctx, &mut inbound).await,
                UploadState::Receiving(image) => {
                    let next = self.receive(ctx, &mut inbound, image).await;
                    if let UploadState::Receiving(image) | UploadState::Finalizing(image) = &next {
                        received = image.data.len();
                    }
                    next
                }
                UploadState::Finalizing(image) => return self.finalize(image).await,
                UploadState::Rejected(status) => {
                    tracing::warn!(
                        code = ?status.code(),
                        reason = %status.message(),
                        received,
                        "image upload rejected"
                    );
                    metrics::record_upload("rejected", received);
                    return Err(status);
                }
            };
        }
    }

    async fn await_info<S>(&self, ctx: &CallContext, inbound: &mut S) -> UploadState
    where
        S: Stream<Item = Result<UploadImageRequest, Status>> + Unpin + Send,
    {
        let info = match next_message(ctx, inbound).await {
            Ok(Some(UploadImageRequest {
                data: Some(Data::Info(info)),
            })) => info,
            Ok(Some(_)) => {
                return UploadState::Rejected(Status::invalid_argument(
                    "first upload message must be image info",
                ))
            }
            Ok(None) => {
                return UploadState::Rejected(Status::invalid_argument(
                    "upload stream closed before image info",
                ))
            }
            Err(status) => {
                let status = if status.code() == tonic::Code::Unknown {
                    Status::invalid_argument(format!("cannot receive image info: {}", status.message()))
                } else {
                    status
                };
                return UploadState::Rejected(status);
            }
        };

        let ImageInfo {
            laptop_id,
            image_type,
        } = info;

        match self.laptops.find(&laptop_id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                return UploadState::Rejected(Status::invalid_argument(format!(
                    "laptop {laptop_id} doesn't exist"
                )))
            }
            Err(e) => {
                tracing::error!(%laptop_id, error = %e, "cannot find laptop");
                return UploadState::Rejected(Status::internal(format!("cannot find laptop: {e}")));
            }
        }

        tracing::info!(%laptop_id, %image_type, "receiving image upload");
        UploadState::Receiving(PendingImage {
            laptop_id,
            image_type,
            data: BytesMut::new(),
        })
    }

    async fn receive<S>(&self, ctx: &CallContext, inbound: &mut S, mut image: PendingImage) -> UploadState
    where
        S: Stream<Item = Result<UploadImageRequest, Status>> + Unpin + Send,
    {
        match next_message(ctx, inbound).await {
            Ok(None) => UploadState::Finalizing(image),
            Ok(Some(UploadImageRequest {
                data: Some(Data::ChunkData(chunk)),
            })) => {
                let size = image.data.len() + chunk.len();
                if size > self.max_size {
                    return UploadState::Rejected(Status::invalid_argument(format!(
                        "image is too large: {size} > {}",
                        self.max_size
                    )));
                }
                image.data.extend_from_slice(&chunk);
                tracing::debug!(chunk = chunk.len(), size, "received image chunk");
                UploadState::Receiving(image)
            }
            Ok(Some(UploadImageRequest {
                data: Some(Data::Info(_)),
            })) => UploadState::Rejected(Status::invalid_argument(
                "image info may only be sent once",
            )),
            Ok(Some(UploadImageRequest { data: None })) => {
                UploadState::Rejected(Status::invalid_argument("upload message carries no data"))
            }
            Err(status) => UploadState::Rejected(status),
        }
    }

    async fn finalize(&self, image: PendingImage) -> Result<UploadImageResponse, Status> {
        let size = image.data.len();
        let size_u32 = u32::try_from(size)
            .map_err(|_| Status::internal(format!("image size {size} does not fit the response")))?;

        let id = self
            .images
            .save(&image.laptop_id, &image.image_type, image.data.freeze())
            .await
            .map_err(|e| {
                tracing::error!(laptop_id = %image.laptop_id, error = %e, "cannot save image");
                metrics::record_upload("failed", size);
                Status::internal(format!("cannot save image to the store: {e}"))
            })?;

        tracing::info!(laptop_id = %image.laptop_id, image_id = %id, size, "image stored");
        metrics::record_upload("stored", size);
        Ok(UploadImageResponse { id, size: size_u32 })
    }
}

/// Waits for the next inbound message unless the call is cancelled first.
async fn next_message<S>(ctx: &CallContext, inbound: &mut S) -> Result<Option<UploadImageRequest>, Status>
where
    S: Stream<Item = Result<UploadImageRequest, Status>> + Unpin + Send,
{
    ctx.check()?;
    tokio::select! {
        biased;
        reason = ctx.done() => Err(reason.into()),
        message = inbound.next() => match message {
            None => Ok(None),
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(status)) => Err(Status::unknown(format!(
                "cannot receive upload message: {}",
                status.message()
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::image::InMemoryImageStore;
    use crate::storage::in_memory::InMemoryLaptopStore;
    use crate::pb::Laptop;

    async fn setup() -> (Arc<InMemoryLaptopStore>, Arc<InMemoryImageStore>, String) {
        let laptops = Arc::new(InMemoryLaptopStore::new());
        let mut laptop = Laptop::default();
        laptops.save(&mut laptop).await.unwrap();
        (laptops, Arc::new(InMemoryImageStore::new()), laptop.id)
    }

    fn info(laptop_id: &str) -> Result<UploadImageRequest, Status> {
        Ok(UploadImageRequest {
            data: Some(Data::Info(ImageInfo {
                laptop_id: laptop_id.to_string(),
                image_type: ".jpg".to_string(),
            })),
        })
    }

    fn chunk(len: usize) -> Result<UploadImageRequest, Status> {
        Ok(UploadImageRequest {
            data: Some(Data::ChunkData(vec![7u8; len])),
        })
    }

    fn upload_of(laptop_id: &str, total: usize) -> Vec<Result<UploadImageRequest, Status>> {
        let mut messages = vec![info(laptop_id)];
        let mut left = total;
        while left > 0 {
            let n = left.min(1024);
            messages.push(chunk(n));
            left -= n;
        }
        messages
    }

    async fn run(
        laptops: &Arc<InMemoryLaptopStore>,
        images: &Arc<InMemoryImageStore>,
        ctx: &CallContext,
        messages: Vec<Result<UploadImageRequest, Status>>,
    ) -> Result<UploadImageResponse, Status> {
        UploadSession::new(laptops.clone(), images.clone(), DEFAULT_MAX_IMAGE_SIZE)
            .run(ctx, tokio_stream::iter(messages))
            .await
    }

    #[tokio::test]
    async fn test_upload_exactly_at_cap() {
        let (laptops, images, id) = setup().await;
        let res = run(&laptops, &images, &CallContext::new(), upload_of(&id, DEFAULT_MAX_IMAGE_SIZE))
            .await
            .unwrap();

        assert_eq!(res.size as usize, DEFAULT_MAX_IMAGE_SIZE);
        let stored = images.get(&res.id).await.unwrap();
        assert_eq!(stored.laptop_id, id);
        assert_eq!(stored.image_type, ".jpg");
        assert_eq!(stored.data.len(), DEFAULT_MAX_IMAGE_SIZE);
    }

    #[tokio::test]
    async fn test_upload_one_byte_over_cap() {
        let (laptops, images, id) = setup().await;
        let err = run(
            &laptops,
            &images,
            &CallContext::new(),
            upload_of(&id, DEFAULT_MAX_IMAGE_SIZE + 1),
        )
        .await
        .unwrap_err();

        assert_eq!(err.code(), tonic::Code::InvalidArgument);
        assert!(images.is_empty().await);
    }

    #[tokio::test]
    async fn test_empty_image_is_stored() {
        let (laptops, images, id) = setup().await;
        let res = run(&laptops, &images, &CallContext::new(), vec![info(&id)])
            .await
            .unwrap();
        assert_eq!(res.size, 0);
        assert_eq!(images.len().await, 1);
    }

    #[tokio::test]
    async fn test_first_message_must_be_info() {
        let (laptops, images, _) = setup().await;
        let err = run(&laptops, &images, &CallContext::new(), vec![chunk(16)])
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);

        let err = run(&laptops, &images, &CallContext::new(), vec![])
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
        assert!(images.is_empty().await);
    }

    #[tokio::test]
    async fn test_unknown_laptop_rejected() {
        let (laptops, images, _) = setup().await;
        let err = run(
            &laptops,
            &images,
            &CallContext::new(),
            vec![info("2a3ba6f4-3b47-4d7d-92a4-5ad52f3b6e0b"), chunk(8)],
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
        assert!(err.message().contains("doesn't exist"));
    }

    #[tokio::test]
    async fn test_second_info_rejected() {
        let (laptops, images, id) = setup().await;
        let err = run(
            &laptops,
            &images,
            &CallContext::new(),
            vec![info(&id), chunk(8), info(&id)],
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
        assert!(images.is_empty().await);
    }

    #[tokio::test]
    async fn test_transport_error_mid_stream_is_unknown() {
        let (laptops, images, id) = setup().await;
        let err = run(
            &laptops,
            &images,
            &CallContext::new(),
            vec![info(&id), chunk(8), Err(Status::internal("broken pipe"))],
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), tonic::Code::Unknown);
        assert!(images.is_empty().await);
    }

    #[tokio::test]
    async fn test_cancelled_upload_aborts() {
        let (laptops, images, id) = setup().await;
        let ctx = CallContext::new();
        ctx.cancel();
        let err = run(&laptops, &images, &ctx, upload_of(&id, 4096))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::Cancelled);
        assert!(images.is_empty().await);
    }
}
