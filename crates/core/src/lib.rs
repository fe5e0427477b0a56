//! Domain types shared across the commitcast pipeline.
//!
//! Pure data and classification logic only — no I/O, no HTTP, no database
//! handles. Everything here is serde-serializable so it can travel through
//! queue payloads and the persistent store.

pub mod commit;
pub mod error;
pub mod push;
pub mod task;
pub mod tenant;

pub use commit::{CommitData, CommitKind};
pub use error::PipelineError;
pub use push::{PushCommit, PushEvent, RepoInfo};
pub use task::{priority, QueueItem, TaskKind, TaskStatus};
pub use tenant::{RepoEnrollment, Tenant, Tier};
