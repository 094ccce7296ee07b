use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Resource and queue hints for one task within a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub cpus: u32,
    pub memory_mb: u64,
    pub queue_hint: String,
}

/// A placement request as received from a frontend.
#[derive(Debug, Clone)]
pub struct SchedulingRequest {
    pub frontend: String,
    pub tasks: Vec<TaskDescriptor>,
}

/// A job accepted by the scheduler. Immutable after creation; tasks are
/// identified by (job id, index into `tasks`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub frontend: String,
    pub tasks: Vec<TaskDescriptor>,
    pub submitted_at: DateTime<Utc>,
}

impl Job {
    pub fn new(frontend: String, tasks: Vec<TaskDescriptor>) -> Self {
        Self {
            id: Uuid::new_v4(),
            frontend,
            tasks,
            submitted_at: Utc::now(),
        }
    }

    /// Number of tasks, i.e. the `m` in batch sampling.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Hint forwarded with every probe for this job. Probes are per-job,
    /// not per-task, so the first descriptor stands in for the batch.
    pub fn probe_hint(&self) -> &TaskDescriptor {
        &self.tasks[0]
    }
}

/// A committed (task, node) assignment. Produced exactly once per task of a
/// successfully placed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub task_index: u32,
    pub node_addr: String,
}
