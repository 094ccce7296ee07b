//! The placement engine: batch-sampled probe placement for jobs.
//!
//! A submitted job spawns one [`session::ProbeSession`], which probes an
//! oversampled set of candidate nodes from the registry, collects scalar
//! [`load::LoadSpec`] replies, and commits the least-loaded responders as
//! the job's task placements. [`engine::PlacementEngine`] owns the session
//! arena and serves placement reads.

pub mod engine;
pub mod job;
pub mod load;
pub mod session;

pub use engine::PlacementEngine;
pub use job::{Job, Placement, SchedulingRequest, TaskDescriptor};
pub use load::LoadSpec;
