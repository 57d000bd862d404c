use std::time::Duration;

use futures_util::StreamExt;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicNackOptions};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use crate::error::{TranscodeError, TranscodeResult};
use crate::modules::transcoding::{JobOutcome, TranscodeDeps, TranscodeJob, TranscodeTask};
use crate::state::AppState;

const CONSUMER_TAG: &str = "transcoder_worker";

/// How a delivery is settled with the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    /// Nack and put back on the queue.
    Requeue,
    /// Nack without requeue, dead-lettering the message.
    Reject,
}

pub fn disposition_for(result: &TranscodeResult<JobOutcome>, shutting_down: bool) -> Disposition {
    match result {
        Ok(_) => Disposition::Ack,
        Err(TranscodeError::Cancelled) if shutting_down => Disposition::Requeue,
        Err(e) if e.is_retryable() => Disposition::Requeue,
        Err(_) => Disposition::Reject,
    }
}

pub async fn start_transcoder_worker(state: AppState, shutdown: CancellationToken) -> anyhow::Result<()> {
    info!("🎥 Starting Transcoder Worker...");

    let queue_name = state.config.queue_name.clone();
    let mut consumer = state.queue.consume(&queue_name, CONSUMER_TAG, 1).await?;

    info!("🎥 Transcoder Worker listening on '{}'", queue_name);

    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = consumer.next() => next,
        };

        let delivery = match next {
            Some(Ok(delivery)) => delivery,
            Some(Err(e)) => {
                error!("❌ Failed to receive delivery: {}", e);
                continue;
            }
            None => {
                warn!("Consumer stream closed");
                if shutdown.is_cancelled() {
                    break;
                }
                state.queue.reconnect().await?;
                consumer = state.queue.consume(&queue_name, CONSUMER_TAG, 1).await?;
                continue;
            }
        };

        info!("📦 Received transcoding job");
        let disposition = handle_delivery(&state, &delivery.data, &shutdown).await;
        settle(&delivery, disposition).await;
    }

    info!("🎥 Transcoder Worker stopped");
    Ok(())
}

async fn handle_delivery(state: &AppState, payload: &[u8], shutdown: &CancellationToken) -> Disposition {
    let job = match TranscodeJob::from_slice(payload) {
        Ok(job) => job,
        Err(e) => {
            error!("❌ Failed to parse job: {}", e);
            return Disposition::Reject;
        }
    };

    let span = info_span!(
        "transcode",
        project = %job.project_id(),
        video_id = %job.video_id,
        profile_id = %job.profile_id
    );
    let deps = state.transcode_deps(job.project_id());
    let result = process_job(deps, job, shutdown, state.config.job_timeout)
        .instrument(span)
        .await;

    disposition_for(&result, shutdown.is_cancelled())
}

/// Runs one job to completion under a deadline. Once `init` succeeds the
/// workspace and lease are released whatever the outcome.
pub async fn process_job(
    deps: TranscodeDeps,
    job: TranscodeJob,
    shutdown: &CancellationToken,
    timeout: Duration,
) -> TranscodeResult<JobOutcome> {
    let task = TranscodeTask::init(deps, job).await?;

    let cancel = shutdown.child_token();
    let deadline = {
        let cancel = cancel.clone();
        tokio::spawn(
            async move {
                tokio::time::sleep(timeout).await;
                warn!("⏰ Job deadline reached, cancelling");
                cancel.cancel();
            }
            .in_current_span(),
        )
    };

    let result = task.run(cancel).await;
    deadline.abort();
    task.shutdown().await;

    match &result {
        Ok(JobOutcome::Ready { rendition_id, path }) => {
            info!(outcome = "ready", rendition_id = %rendition_id, path = %path, "✅ Job completed successfully");
        }
        Ok(JobOutcome::Failed { rendition_id, code, .. }) => {
            warn!(outcome = "rendition_failed", rendition_id = %rendition_id, code = %code, "Job finished with failed rendition");
        }
        Err(e) => {
            error!(code = e.code(), retryable = e.is_retryable(), "❌ Failed to process job: {}", e);
        }
    }

    result
}

async fn settle(delivery: &Delivery, disposition: Disposition) {
    let settled = match disposition {
        Disposition::Ack => delivery.ack(BasicAckOptions::default()).await,
        Disposition::Requeue => {
            delivery
                .nack(BasicNackOptions {
                    requeue: true,
                    ..BasicNackOptions::default()
                })
                .await
        }
        Disposition::Reject => {
            delivery
                .nack(BasicNackOptions {
                    requeue: false,
                    ..BasicNackOptions::default()
                })
                .await
        }
    };

    if let Err(e) = settled {
        error!("Failed to settle message: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed() -> TranscodeResult<JobOutcome> {
        Ok(JobOutcome::Failed {
            rendition_id: "r1".into(),
            code: "encode_failed".into(),
            message: "boom".into(),
        })
    }

    #[test]
    fn test_dispositions() {
        assert_eq!(disposition_for(&failed(), false), Disposition::Ack);
        assert_eq!(
            disposition_for(&Err(TranscodeError::Busy("k".into())), false),
            Disposition::Requeue
        );
        assert_eq!(
            disposition_for(&Err(TranscodeError::VideoNotFound("v".into())), false),
            Disposition::Reject
        );
        assert_eq!(
            disposition_for(&Err(TranscodeError::Cancelled), false),
            Disposition::Reject
        );
        assert_eq!(
            disposition_for(&Err(TranscodeError::Cancelled), true),
            Disposition::Requeue
        );
    }
}
