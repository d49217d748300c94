//! Effectively-once application of at-least-once deliveries.

use std::future::Future;

use tracing::info;
use uuid::Uuid;

use saga_store::ProcessedMessageLedger;

use crate::error::Result;

/// Runs `handler` unless `message_id` was already applied.
///
/// Returns `Ok(None)` for a duplicate delivery. The ledger is written only
/// after the handler succeeds, so a handler failure leaves the message
/// unclaimed and a redelivery will retry it. A crash after the handler but
/// before the ledger write re-runs the handler; handlers are expected to
/// tolerate that, same as every other consumer of an at-least-once stream.
pub async fn apply_once<P, F, Fut, T>(
    ledger: &P,
    message_id: Uuid,
    handler: F,
) -> Result<Option<T>>
where
    P: ProcessedMessageLedger,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if ledger.is_processed(message_id).await? {
        info!(%message_id, "duplicate delivery ignored");
        return Ok(None);
    }

    let out = handler().await?;

    // mark_processed returning false means another worker beat us to the
    // claim after our handler ran; the work itself must be idempotent, so
    // the duplicate application is harmless and we still report applied.
    ledger.mark_processed(message_id).await?;
    Ok(Some(out))
}
