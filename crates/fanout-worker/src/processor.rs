//! Batch processing logic for the fan-out worker (spec.md §4.F), factored
//! out of `main` so it can be exercised with fakes.

use event_bus::{EventBus, Message};
use futures::StreamExt;
use std::sync::Arc;
use timeline_cache::Cache;
use timeline_core::domain::{PostCreatedEvent, TimelineEntry};
use timeline_core::error::ServiceError;
use timeline_core::metrics;
use timeline_store::Store;
use tokio::sync::Semaphore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Acked,
    Poisoned,
    Nacked,
}

pub struct WorkerContext {
    pub store: Arc<dyn Store>,
    pub cache: Arc<dyn Cache>,
    pub bus: Arc<dyn EventBus>,
    pub timeline_cap: i64,
    pub follower_chunk: i64,
    pub worker_concurrency: usize,
}

/// Processes a single claimed message: parses it, re-checks the author's
/// celebrity status, and fans out to followers in chunks. Returns the
/// outcome so the caller can decide whether to ack.
pub async fn process_message(ctx: &WorkerContext, message: &Message) -> Outcome {
    let payload: PostCreatedEvent = match serde_json::from_value(message.payload.clone()) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::error!(error = %err, payload = %message.payload, "malformed post_created payload");
            metrics::FANOUT_POISON_MESSAGES_TOTAL.inc();
            return Outcome::Poisoned;
        }
    };

    let author = match ctx.store.get_user_by_id(payload.author_id).await {
        Ok(author) => author,
        Err(ServiceError::NotFound(_)) => {
            tracing::warn!(
                author_id = payload.author_id,
                "author no longer exists, skipping fan-out"
            );
            return Outcome::Acked;
        }
        Err(err) => {
            tracing::error!(
                error = %err,
                author_id = payload.author_id,
                "author lookup failed during fan-out, leaving unacked for redelivery"
            );
            return Outcome::Nacked;
        }
    };

    if author.is_celebrity {
        tracing::debug!(
            author_id = author.user_id,
            post_id = payload.post_id,
            "author became a celebrity since emit, skipping fan-out"
        );
        metrics::FANOUT_EVENTS_PROCESSED_TOTAL
            .with_label_values(&["skipped_celebrity"])
            .inc();
        return Outcome::Acked;
    }

    let entry = TimelineEntry {
        post_id: payload.post_id,
        score: payload.created_at_ms,
    };

    let mut follower_stream = ctx.store.followers_of(payload.author_id);
    let mut chunk = Vec::with_capacity(ctx.follower_chunk as usize);
    let semaphore = Arc::new(Semaphore::new(ctx.worker_concurrency));
    let mut join_set = tokio::task::JoinSet::new();

    loop {
        let next = follower_stream.next().await;
        match next {
            Some(Ok(follower_id)) => {
                chunk.push(follower_id);
                if chunk.len() as i64 >= ctx.follower_chunk {
                    spawn_chunk_write(&mut join_set, semaphore.clone(), ctx.cache.clone(), std::mem::take(&mut chunk), entry, ctx.timeline_cap);
                }
            }
            Some(Err(err)) => {
                tracing::error!(error = %err, author_id = payload.author_id, "follower enumeration failed");
                join_set.shutdown().await;
                return Outcome::Nacked;
            }
            None => break,
        }
    }
    if !chunk.is_empty() {
        spawn_chunk_write(&mut join_set, semaphore, ctx.cache.clone(), chunk, entry, ctx.timeline_cap);
    }

    let mut all_ok = true;
    while let Some(result) = join_set.join_next().await {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::error!(error = %err, post_id = payload.post_id, "fan-out chunk write failed");
                all_ok = false;
            }
            Err(join_err) => {
                tracing::error!(error = %join_err, "fan-out chunk task panicked");
                all_ok = false;
            }
        }
    }

    if all_ok {
        metrics::FANOUT_EVENTS_PROCESSED_TOTAL
            .with_label_values(&["fanned_out"])
            .inc();
        Outcome::Acked
    } else {
        Outcome::Nacked
    }
}

fn spawn_chunk_write(
    join_set: &mut tokio::task::JoinSet<Result<(), timeline_core::error::ServiceError>>,
    semaphore: Arc<Semaphore>,
    cache: Arc<dyn Cache>,
    chunk: Vec<i64>,
    entry: TimelineEntry,
    cap: i64,
) {
    join_set.spawn(async move {
        let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
        cache.fanout_add(&chunk, entry, cap).await
    });
}

/// Drives the receive/process/ack loop for one worker task. Runs until
/// `shutdown` resolves, at which point it stops polling for new batches
/// but still awaits any already-claimed batch to finish (spec.md §4.F.3).
pub async fn run_once(ctx: &WorkerContext, max_count: i64, wait_secs: u64) -> usize {
    let messages = match ctx.bus.receive(max_count, wait_secs).await {
        Ok(messages) => messages,
        Err(err) => {
            tracing::error!(error = %err, "event bus receive failed");
            return 0;
        }
    };

    let count = messages.len();
    for message in &messages {
        match process_message(ctx, message).await {
            Outcome::Acked | Outcome::Poisoned => {
                if let Err(err) = ctx.bus.ack(message.receipt_handle).await {
                    tracing::error!(error = %err, "failed to ack message");
                }
            }
            Outcome::Nacked => {
                tracing::warn!(
                    receive_count = message.receive_count,
                    "leaving message unacked for redelivery"
                );
            }
        }
    }
    count
}
