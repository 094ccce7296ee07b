use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, Mutex, RwLock};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerError};
use crate::placement::job::{Job, Placement, SchedulingRequest};
use crate::placement::session::{ProbeSession, SessionOutcome};
use crate::registry::Registry;
use crate::transport::ProbeTransport;

/// Orchestrates probe sessions across concurrently submitted jobs.
///
/// Probing starts eagerly on submit so that by the time the frontend asks
/// for its placement, replies are usually already in. The session arena
/// guarantees at most one session per job id: the first caller to claim a
/// job id creates the session, everyone else attaches as a waiter on its
/// outcome channel. Unrelated jobs share no locks beyond the registry's
/// per-node synchronization.
pub struct PlacementEngine {
    config: SchedulerConfig,
    registry: Arc<Registry>,
    transport: Arc<dyn ProbeTransport>,
    jobs: RwLock<HashMap<Uuid, Job>>,
    sessions: Mutex<HashMap<Uuid, watch::Receiver<Option<SessionOutcome>>>>,
}

impl PlacementEngine {
    pub fn new(
        config: SchedulerConfig,
        registry: Arc<Registry>,
        transport: Arc<dyn ProbeTransport>,
    ) -> Self {
        Self {
            config,
            registry,
            transport,
            jobs: RwLock::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Validate and store a job, then start probing immediately.
    ///
    /// Returns the assigned job id; the placement itself is read via
    /// [`get_job_placement`](Self::get_job_placement).
    pub async fn submit_job(&self, request: SchedulingRequest) -> Result<Uuid> {
        if request.tasks.is_empty() {
            return Err(SchedulerError::MalformedRequest(
                "job has no tasks".to_string(),
            ));
        }
        if !self.registry.is_frontend_registered(&request.frontend).await {
            return Err(SchedulerError::MalformedRequest(format!(
                "frontend '{}' is not registered",
                request.frontend
            )));
        }

        let job = Job::new(request.frontend, request.tasks);
        let job_id = job.id;
        {
            let mut jobs = self.jobs.write().await;
            if jobs.len() >= self.config.max_jobs {
                return Err(SchedulerError::AtCapacity(self.config.max_jobs));
            }
            jobs.insert(job_id, job.clone());
        }

        tracing::info!(job_id = %job_id, tasks = job.task_count(), frontend = %job.frontend, "Job submitted");

        // Eager probing: the session races the frontend's placement read.
        self.ensure_session(&job).await;
        Ok(job_id)
    }

    /// Block until the job's session reaches a terminal state and return
    /// its placements. Idempotent: repeated calls after PLACED observe the
    /// identical list, never a re-run of sampling.
    pub async fn get_job_placement(&self, job_id: Uuid) -> Result<Vec<Placement>> {
        let job = self
            .jobs
            .read()
            .await
            .get(&job_id)
            .cloned()
            .ok_or(SchedulerError::UnknownJob(job_id))?;

        let mut outcome_rx = self.ensure_session(&job).await;
        loop {
            let settled = outcome_rx.borrow_and_update().clone();
            if let Some(outcome) = settled {
                return outcome.map_err(SchedulerError::from);
            }
            outcome_rx.changed().await.map_err(|_| {
                SchedulerError::Internal("probe session dropped without an outcome".to_string())
            })?;
        }
    }

    /// Number of jobs currently tracked.
    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Claim or attach to the job's probe session. The arena lock is held
    /// only for the claim check, never while waiting.
    async fn ensure_session(&self, job: &Job) -> watch::Receiver<Option<SessionOutcome>> {
        let mut sessions = self.sessions.lock().await;
        if let Some(outcome_rx) = sessions.get(&job.id) {
            return outcome_rx.clone();
        }

        let (outcome_tx, outcome_rx) = watch::channel(None);
        let session = ProbeSession::new(
            job.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.transport),
            self.config.oversample,
            self.config.probe_deadline(),
            self.config.session_deadline(),
            outcome_tx,
        );
        tokio::spawn(session.run());

        sessions.insert(job.id, outcome_rx.clone());
        outcome_rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placement::job::TaskDescriptor;
    use crate::placement::load::LoadSpec;
    use crate::transport::{ProbeTransport, TransportError};
    use async_trait::async_trait;
    use std::time::Duration;

    struct IdleTransport;

    #[async_trait]
    impl ProbeTransport for IdleTransport {
        async fn probe(
            &self,
            node: &str,
            _job_id: Uuid,
            _hint: &TaskDescriptor,
        ) -> std::result::Result<LoadSpec, TransportError> {
            Err(TransportError::Rpc {
                addr: node.to_string(),
                reason: "unreachable".to_string(),
            })
        }

        async fn cancel_probe(
            &self,
            _node: &str,
            _job_id: Uuid,
        ) -> std::result::Result<(), TransportError> {
            Ok(())
        }
    }

    fn engine(max_jobs: usize) -> PlacementEngine {
        let config = SchedulerConfig {
            max_jobs,
            ..Default::default()
        };
        let registry = Arc::new(Registry::new(3, Duration::from_secs(10)));
        PlacementEngine::new(config, registry, Arc::new(IdleTransport))
    }

    fn request(frontend: &str, tasks: usize) -> SchedulingRequest {
        SchedulingRequest {
            frontend: frontend.to_string(),
            tasks: vec![TaskDescriptor::default(); tasks],
        }
    }

    #[tokio::test]
    async fn empty_task_list_is_malformed() {
        let engine = engine(10);
        engine.registry().register_frontend("app").await;
        let err = engine.submit_job(request("app", 0)).await.unwrap_err();
        assert!(matches!(err, SchedulerError::MalformedRequest(_)));
    }

    #[tokio::test]
    async fn unregistered_frontend_is_malformed() {
        let engine = engine(10);
        let err = engine.submit_job(request("ghost", 1)).await.unwrap_err();
        assert!(matches!(err, SchedulerError::MalformedRequest(_)));
    }

    #[tokio::test]
    async fn job_table_capacity_is_enforced() {
        let engine = engine(1);
        engine.registry().register_frontend("app").await;
        engine.submit_job(request("app", 1)).await.unwrap();
        let err = engine.submit_job(request("app", 1)).await.unwrap_err();
        assert!(matches!(err, SchedulerError::AtCapacity(1)));
    }

    #[tokio::test]
    async fn unknown_job_id_is_rejected() {
        let engine = engine(10);
        let err = engine.get_job_placement(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, SchedulerError::UnknownJob(_)));
    }

    #[tokio::test]
    async fn no_live_workers_fails_with_insufficient_capacity() {
        let engine = engine(10);
        engine.registry().register_frontend("app").await;
        let job_id = engine.submit_job(request("app", 2)).await.unwrap();
        let err = engine.get_job_placement(job_id).await.unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::InsufficientCapacity { needed: 2, live: 0 }
        ));
    }
}
