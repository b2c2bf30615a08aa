use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::time::timeout;

use crate::{
    booking::{book, BookingRequest},
    errors::BookingError,
    models::{Actor, Role},
    offline::queue::{QueueItem, WalkInPayload, WalkInQueue, RETRY_CEILING},
    schedule::parse_timestamp,
    state::AppState,
};

/// Failures the submitter can report. Only `Network` keeps an item eligible
/// for silent retry; a rejection means the server saw the request and said
/// no, which must reach the user instead.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("network failure: {0}")]
    Network(String),
    #[error("server rejected booking ({kind}): {message}")]
    Rejected { kind: String, message: String },
}

/// Server boundary of the sync engine. Implementations must honor the
/// idempotency key: repeated submissions with the same key return the
/// original appointment id, never a fresh create.
#[async_trait]
pub trait SubmitBooking: Send + Sync {
    async fn submit(
        &self,
        payload: &WalkInPayload,
        idempotency_key: &str,
    ) -> Result<String, SubmitError>;
}

/// Submitter for the embedded deployment where the device talks to a local
/// booking core directly.
pub struct InProcessSubmitter {
    state: AppState,
    worker_actor: Actor,
}

impl InProcessSubmitter {
    pub fn new(state: AppState, worker_id: impl Into<String>) -> Self {
        Self {
            state,
            worker_actor: Actor::new(worker_id, Role::Worker),
        }
    }
}

#[async_trait]
impl SubmitBooking for InProcessSubmitter {
    async fn submit(
        &self,
        payload: &WalkInPayload,
        idempotency_key: &str,
    ) -> Result<String, SubmitError> {
        let request = BookingRequest {
            requester: self.worker_actor.clone(),
            client_id: None,
            client_name: payload.client_name.clone(),
            client_phone: payload.client_phone.clone(),
            worker_id: payload.worker_id.clone(),
            service_ids: payload.service_ids.clone(),
            scheduled_start: payload.scheduled_start.clone(),
            notes: payload.notes.clone(),
            walk_in: true,
            skip_availability_check: false,
            idempotency_key: Some(idempotency_key.to_string()),
        };
        match book(&self.state, request).await {
            Ok(appointment) => Ok(appointment.id),
            Err(BookingError::Database(err)) => Err(SubmitError::Network(err.to_string())),
            Err(err) => Err(SubmitError::Rejected {
                kind: err.kind().to_string(),
                message: err.to_string(),
            }),
        }
    }
}

/// What the worker sees after recording a walk-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// The live attempt landed; the appointment exists server-side.
    Booked { appointment_id: String },
    /// The network was dead or slow; the record is captured locally and
    /// will sync. Presented to the user as success.
    Queued { local_id: String },
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub submitted: usize,
    pub failed: usize,
    pub remaining: usize,
}

/// Background drain of the walk-in queue. One pass at a time (single-flight),
/// one item at a time with a small delay between items, idle while offline.
pub struct SyncEngine<S: SubmitBooking> {
    queue: WalkInQueue,
    submitter: Arc<S>,
    online: watch::Receiver<bool>,
    inflight: Mutex<()>,
    live_timeout: Duration,
    inter_item_delay: Duration,
    sync_interval: Duration,
}

impl<S: SubmitBooking> SyncEngine<S> {
    pub fn new(queue: WalkInQueue, submitter: Arc<S>, online: watch::Receiver<bool>) -> Self {
        Self {
            queue,
            submitter,
            online,
            inflight: Mutex::new(()),
            live_timeout: Duration::from_secs(3),
            inter_item_delay: Duration::from_millis(150),
            sync_interval: Duration::from_secs(30),
        }
    }

    pub fn with_timings(
        mut self,
        live_timeout: Duration,
        inter_item_delay: Duration,
        sync_interval: Duration,
    ) -> Self {
        self.live_timeout = live_timeout;
        self.inter_item_delay = inter_item_delay;
        self.sync_interval = sync_interval;
        self
    }

    pub fn queue(&self) -> &WalkInQueue {
        &self.queue
    }

    fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    /// Record a walk-in. The payload is enqueued *before* the live attempt
    /// so its idempotency key exists no matter where the attempt dies, and
    /// so the record survives a crash mid-request. A timed-out or
    /// network-failed attempt is reported as queued success, never as an
    /// error.
    pub async fn submit_or_enqueue(
        &self,
        payload: WalkInPayload,
    ) -> Result<SubmissionOutcome, BookingError> {
        let item = self.queue.enqueue(&payload).await?;
        let key = self.queue.idempotency_key(&item.local_id);

        if !self.is_online() {
            return Ok(SubmissionOutcome::Queued {
                local_id: item.local_id,
            });
        }

        match timeout(self.live_timeout, self.submitter.submit(&payload, &key)).await {
            Ok(Ok(appointment_id)) => {
                self.queue.mark_synced(&item.local_id, &appointment_id).await?;
                Ok(SubmissionOutcome::Booked { appointment_id })
            }
            Ok(Err(SubmitError::Rejected { kind, message })) => {
                // The server answered; this is a real rejection, not a
                // connectivity problem. Drop the item and surface it.
                self.queue.discard(&item.local_id).await?;
                Err(BookingError::Sync(format!("{kind}: {message}")))
            }
            Ok(Err(SubmitError::Network(err))) => {
                log::info!("walk-in capture deferred to queue: {err}");
                Ok(SubmissionOutcome::Queued {
                    local_id: item.local_id,
                })
            }
            Err(_) => {
                // Timed out before the server's own deadline: the write may
                // or may not have landed. The queued replay with the same
                // key resolves it either way.
                log::info!("walk-in live attempt timed out, queued for sync");
                Ok(SubmissionOutcome::Queued {
                    local_id: item.local_id,
                })
            }
        }
    }

    /// One sync pass. Returns `None` when another pass is already in
    /// flight. Stops between items if connectivity drops; never interrupts
    /// an item mid-submission.
    pub async fn sync_now(&self) -> Result<Option<SyncReport>, BookingError> {
        let Ok(_guard) = self.inflight.try_lock() else {
            return Ok(None);
        };

        let mut report = SyncReport::default();
        let items = self.queue.retryable_items().await?;
        let total = items.len();
        for (index, item) in items.into_iter().enumerate() {
            if !self.is_online() {
                break;
            }
            self.drain_one(&item, &mut report).await?;
            if index + 1 < total {
                tokio::time::sleep(self.inter_item_delay).await;
            }
        }

        report.remaining = self.queue.retryable_items().await?.len()
            + self.queue.failed_items().await?.len();
        Ok(Some(report))
    }

    async fn drain_one(&self, item: &QueueItem, report: &mut SyncReport) -> Result<(), BookingError> {
        // The orchestrator only accepts future starts, so an item that sat
        // queued past its own start time can never sync. Surface it for
        // manual resolution instead of burning retries on it.
        let dated = parse_timestamp(&item.payload.scheduled_start)
            .map(|start| start <= Utc::now())
            .unwrap_or(true);
        if dated {
            self.queue.mark_exhausted(&item.local_id).await?;
            report.failed += 1;
            log::warn!(
                "walk-in {} start time has passed, needs manual resolution",
                item.local_id
            );
            return Ok(());
        }

        self.queue.mark_syncing(&item.local_id).await?;
        let key = self.queue.idempotency_key(&item.local_id);
        match self.submitter.submit(&item.payload, &key).await {
            Ok(appointment_id) => {
                self.queue.mark_synced(&item.local_id, &appointment_id).await?;
                report.submitted += 1;
            }
            Err(err) => {
                self.queue.mark_failed(&item.local_id).await?;
                report.failed += 1;
                if item.retry_count + 1 >= RETRY_CEILING {
                    log::warn!(
                        "walk-in {} exhausted retries, needs manual resolution: {err}",
                        item.local_id
                    );
                } else {
                    log::info!("walk-in {} submission failed, will retry: {err}", item.local_id);
                }
            }
        }
        Ok(())
    }

    /// Long-running drain loop: periodic while online, immediate on the
    /// offline-to-online edge. Intended for `tokio::spawn`.
    pub async fn run(self: Arc<Self>) {
        let mut online = self.online.clone();
        let mut ticker = tokio::time::interval(self.sync_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !self.is_online() {
                        continue;
                    }
                }
                changed = online.changed() => {
                    if changed.is_err() {
                        // Connectivity source dropped; shut down.
                        return;
                    }
                    if !*online.borrow_and_update() {
                        continue;
                    }
                }
            }
            if let Err(err) = self.sync_now().await {
                log::warn!("sync pass failed: {err}");
            }
        }
    }
}
