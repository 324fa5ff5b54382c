//! cpool-scheduler — hands compiler workers out to requests.
//!
//! The coordinator keeps every idle worker in a [`WorkerQueue`] and a
//! [`SyncTracker`] per worker describing what that worker has cached:
//!
//! - `WorkerQueue` is the fair, cancel-safe hand-out of idle workers, with
//!   optional predicate and weighted selection
//! - `SyncTracker` decides which state fields to ship with each request and
//!   which databases the worker should evict
//!
//! # Architecture
//!
//! ```text
//! request ──► WorkerQueue::acquire_weighted(affinity)
//!               │
//!               ▼
//!            SyncTracker::plan ──► SyncArgs ──► worker
//!               │
//!               ▼
//!            SyncTracker::commit ──► WorkerQueue::release
//! ```

pub mod queue;
pub mod tracker;

pub use queue::{AcquirePolicy, WorkerQueue};
pub use tracker::{Affinity, DatabaseVersions, GlobalVersions, StateBlobs, SyncPlan, SyncTracker};
