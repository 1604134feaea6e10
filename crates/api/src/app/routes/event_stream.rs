//! Per-job progress stream over Server-Sent Events.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Extension, Path},
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse,
    },
};
use forgejobs_events::EventBus;
use forgejobs_jobs::{JobEvent, JobStatus};
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::app::{dto, errors};
use crate::app::services::AppServices;

const POLL_INTERVAL: Duration = Duration::from_millis(1000);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
/// How long to wait after `job.completed` for the worker's closing progress.
const CLOSING_GRACE: Duration = Duration::from_millis(500);

/// GET /jobs/:id/events
///
/// Opens with a `job.snapshot` event carrying the current job, then forwards
/// every notification published for this job, in sequence order. Each SSE
/// event is named after the notification type and its id is the per-job
/// sequence number.
///
/// The stream ends after `job.canceled`, or after `job.completed` plus the
/// final `job.progress` that follows it (when none arrives within a short
/// grace period the stream ends anyway). A job that is already finished or
/// cancelled gets the snapshot alone.
pub async fn stream_job_events(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match errors::parse_job_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    // Subscribe before the snapshot read so nothing published in between is lost.
    let subscription = services.bus.subscribe();

    let job = match services.jobs.get_by_id(id).await {
        Ok(Some(job)) => job,
        Ok(None) => return errors::not_found(id),
        Err(e) => return errors::service_error_to_response(e),
    };

    let (tx, rx) = unbounded_channel::<Result<SseEvent, std::convert::Infallible>>();

    let already_over = job.status.is_finished() || job.status == JobStatus::Cancelled;
    let snapshot = SseEvent::default()
        .event("job.snapshot")
        .json_data(dto::JobResponse::from(job));
    if let Ok(snapshot) = snapshot {
        let _ = tx.send(Ok(snapshot));
    }

    if already_over {
        drop(tx);
        return sse_response(rx);
    }

    tokio::task::spawn_blocking(move || {
        let mut last_heartbeat = Instant::now();
        // Set once `job.completed` is seen.
        let mut closing: Option<Instant> = None;

        loop {
            let wait = match closing {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    deadline - now
                }
                None => POLL_INTERVAL,
            };
            match subscription.recv_timeout(wait) {
                Ok(envelope) => {
                    if envelope.topic() != id {
                        continue;
                    }

                    let last = match envelope.payload() {
                        JobEvent::Canceled { .. } => true,
                        JobEvent::Completed { .. } => {
                            closing = Some(Instant::now() + CLOSING_GRACE);
                            false
                        }
                        JobEvent::Progress(_) => closing.is_some(),
                        _ => false,
                    };

                    let data = match serde_json::to_string(&envelope) {
                        Ok(s) => s,
                        Err(_) => continue,
                    };
                    let sse_event = SseEvent::default()
                        .event(envelope.event_type())
                        .id(envelope.sequence_number().to_string())
                        .data(data);

                    if tx.send(Ok(sse_event)).is_err() || last {
                        break;
                    }

                    last_heartbeat = Instant::now();
                }
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    if closing.is_some() || tx.is_closed() {
                        break; // Done, or the client went away
                    }
                    if last_heartbeat.elapsed() > HEARTBEAT_INTERVAL {
                        let heartbeat = SseEvent::default().event("heartbeat").data("{}");
                        if tx.send(Ok(heartbeat)).is_err() {
                            break;
                        }
                        last_heartbeat = Instant::now();
                    }
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    break; // Bus closed
                }
            }
        }
    });

    sse_response(rx)
}

fn sse_response(
    rx: UnboundedReceiver<Result<SseEvent, std::convert::Infallible>>,
) -> axum::response::Response {
    let stream = UnboundedReceiverStream::new(rx);
    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(HEARTBEAT_INTERVAL))
        .into_response()
}
