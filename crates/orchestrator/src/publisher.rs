//! Drains the outbox to the event broker.

use chrono::{Duration, Utc};
use tracing::{info, warn};

use saga_store::{OutboxEvent, OutboxRepository};

use crate::config::OrchestratorConfig;
use crate::error::Result;
use crate::metrics::{
    OUTBOX_PUBLISH_DURATION_SECONDS, OUTBOX_PUBLISH_FAILED_TOTAL, OUTBOX_PUBLISHED_TOTAL,
};
use crate::services::EventSink;

/// Per-attempt publish delay ladder, in seconds. Attempts beyond the
/// ladder reuse its last rung.
const BACKOFF_SECONDS: [i64; 5] = [5, 30, 120, 600, 3600];

/// Tally of one publisher cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub published: usize,
    pub failed: usize,
    pub exhausted: usize,
}

/// Pushes pending outbox rows to the broker, oldest first.
///
/// Delivery is at-least-once: a crash between the broker acknowledging
/// and `mark_sent` committing re-publishes the event on the next cycle.
/// Consumers deduplicate through the processed-message ledger.
pub struct OutboxPublisher<O, S> {
    outbox: O,
    sink: S,
    config: OrchestratorConfig,
}

impl<O, S> OutboxPublisher<O, S>
where
    O: OutboxRepository,
    S: EventSink,
{
    pub fn new(outbox: O, sink: S, config: OrchestratorConfig) -> Self {
        Self {
            outbox,
            sink,
            config,
        }
    }

    /// Publishes one batch of due events. A failing event is rescheduled
    /// (or exhausted at the ceiling) and never blocks the rest of the
    /// batch.
    pub async fn publish_pending(&self) -> Result<PublishReport> {
        let now = Utc::now();
        let due = self
            .outbox
            .fetch_pending(now, self.config.publish_batch_size)
            .await?;

        let mut report = PublishReport::default();
        for event in due {
            let started = std::time::Instant::now();
            match self.sink.publish(&event).await {
                Ok(()) => {
                    self.outbox.mark_sent(event.id).await?;
                    metrics::counter!(OUTBOX_PUBLISHED_TOTAL).increment(1);
                    metrics::histogram!(OUTBOX_PUBLISH_DURATION_SECONDS)
                        .record(started.elapsed().as_secs_f64());
                    report.published += 1;
                }
                Err(error) => {
                    metrics::counter!(OUTBOX_PUBLISH_FAILED_TOTAL).increment(1);
                    if event.attempt_count + 1 >= self.config.publish_max_retries {
                        self.outbox.mark_exhausted(event.id).await?;
                        report.exhausted += 1;
                        warn!(
                            event_id = %event.id,
                            event_type = %event.event_type,
                            attempts = event.attempt_count + 1,
                            %error,
                            "publish retries exhausted; event parked as FAILED"
                        );
                    } else {
                        let next = Utc::now() + Self::backoff_for(&event);
                        self.outbox.mark_attempt_failed(event.id, next).await?;
                        report.failed += 1;
                        warn!(
                            event_id = %event.id,
                            event_type = %event.event_type,
                            attempts = event.attempt_count + 1,
                            %error,
                            "publish failed; rescheduled"
                        );
                    }
                }
            }
        }

        if report.published + report.failed + report.exhausted > 0 {
            info!(
                published = report.published,
                failed = report.failed,
                exhausted = report.exhausted,
                "outbox publisher cycle finished"
            );
        }
        Ok(report)
    }

    fn backoff_for(event: &OutboxEvent) -> Duration {
        let rung = (event.attempt_count as usize).min(BACKOFF_SECONDS.len() - 1);
        Duration::seconds(BACKOFF_SECONDS[rung])
    }
}
