//! Device-local walk-in capture and background sync.
//!
//! A worker in the field records walk-ins against a private SQLite queue
//! that survives restarts; the sync engine drains it into the booking
//! orchestrator once connectivity returns, using per-item idempotency keys
//! so a replay after a lost response never double-books.

mod queue;
mod sync;

pub use queue::{QueueItem, QueueItemStatus, WalkInPayload, WalkInQueue, RETRY_CEILING};
pub use sync::{
    InProcessSubmitter, SubmitBooking, SubmitError, SubmissionOutcome, SyncEngine, SyncReport,
};
