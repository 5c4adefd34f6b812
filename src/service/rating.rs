use crate::context::CallContext;
use crate::observability::metrics;
use crate::pb::{RateLaptopRequest, RateLaptopResponse};
use crate::storage::RatingStore;
use tokio::sync::mpsc;
use tokio_stream::{Stream, StreamExt};
use tonic::Status;

pub type RateSender = mpsc::Sender<Result<RateLaptopResponse, Status>>;

/// Applies every inbound score and answers it before reading the next one.
///
/// Returns the number of scores applied once the client half-closes. Any
/// error ends the exchange; the caller forwards it to the client.
pub async fn rate_stream<S>(
    ctx: &CallContext,
    ratings: &dyn RatingStore,
    mut inbound: S,
    tx: &RateSender,
) -> Result<usize, Status>
where
    S: Stream<Item = Result<RateLaptopRequest, Status>> + Unpin + Send,
{
    let mut rated = 0;
    loop {
        ctx.check()?;
        let req = tokio::select! {
            biased;
            reason = ctx.done() => return Err(reason.into()),
            next = inbound.next() => match next {
                None => return Ok(rated),
                Some(Ok(req)) => req,
                Some(Err(status)) => {
                    return Err(Status::unknown(format!(
                        "cannot receive rating: {}",
                        status.message()
                    )))
                }
            },
        };

        let rating = ratings
            .add(&req.laptop_id, req.score)
            .await
            .map_err(|e| Status::internal(format!("cannot add rating to the store: {e}")))?;

        tracing::debug!(
            laptop_id = %req.laptop_id,
            score = req.score,
            count = rating.count,
            "rating recorded"
        );
        metrics::increment_ratings();

        let res = RateLaptopResponse {
            laptop_id: req.laptop_id,
            rated_count: rating.count,
            average_score: rating.average(),
        };
        tx.send(Ok(res))
            .await
            .map_err(|_| Status::internal("cannot send rating response"))?;
        rated += 1;
    }
}
