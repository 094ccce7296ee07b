use std::collections::HashSet;
use std::sync::Arc;

use rand::seq::SliceRandom;
use tokio::sync::{mpsc, watch};
use tokio::time::{timeout, Duration, Instant};

use crate::error::PlacementFailure;
use crate::placement::job::{Job, Placement};
use crate::placement::load::LoadSpec;
use crate::registry::Registry;
use crate::transport::ProbeTransport;

/// Terminal result of a probe session, observed by every waiter.
pub type SessionOutcome = Result<Vec<Placement>, PlacementFailure>;

/// Lifecycle of a probe session. Tracked for logging; the session only
/// moves forward, driven by inbox messages and timer expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Probing,
    Selecting,
    Placed,
    Failed,
}

/// A message delivered to the session's inbox by a probe dispatch task.
/// Transport failures arrive as `Timeout`: a worker we cannot reach is
/// indistinguishable from one that never answered.
#[derive(Debug)]
enum SessionMessage {
    Reply { node: String, spec: LoadSpec },
    Timeout { node: String },
}

/// One outstanding round of probes for one job.
///
/// The session samples `oversample * m` candidates, fires one probe per
/// candidate, and collects replies from its inbox in arrival order. It
/// moves to selection as soon as `m` replies are in, when the session
/// deadline expires, or when every probe has resolved, whichever comes
/// first. No thread ever blocks on a single probe.
pub struct ProbeSession {
    job: Job,
    registry: Arc<Registry>,
    transport: Arc<dyn ProbeTransport>,
    oversample: usize,
    probe_deadline: Duration,
    session_deadline: Duration,
    outcome_tx: watch::Sender<Option<SessionOutcome>>,
}

impl ProbeSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job: Job,
        registry: Arc<Registry>,
        transport: Arc<dyn ProbeTransport>,
        oversample: usize,
        probe_deadline: Duration,
        session_deadline: Duration,
        outcome_tx: watch::Sender<Option<SessionOutcome>>,
    ) -> Self {
        Self {
            job,
            registry,
            transport,
            oversample,
            probe_deadline,
            session_deadline,
            outcome_tx,
        }
    }

    /// Drive the session to a terminal state and publish the outcome.
    pub async fn run(self) {
        let job_id = self.job.id;
        let outcome = self.place().await;
        match &outcome {
            Ok(placements) => {
                tracing::info!(job_id = %job_id, tasks = placements.len(), "Job placed");
            }
            Err(failure) => {
                tracing::warn!(job_id = %job_id, %failure, "Placement failed");
            }
        }
        // Waiters may all have detached; the outcome is still retained for
        // later idempotent reads.
        let _ = self.outcome_tx.send(Some(outcome));
    }

    async fn place(&self) -> SessionOutcome {
        let mut state = SessionState::Created;
        let task_count = self.job.task_count();
        tracing::trace!(job_id = %self.job.id, ?state, "Session created");

        let candidates = self.registry.candidate_nodes().await;
        if candidates.len() < task_count {
            state = SessionState::Failed;
            tracing::debug!(job_id = %self.job.id, ?state, live = candidates.len(), "Too few candidates");
            return Err(PlacementFailure::InsufficientCapacity {
                needed: task_count,
                live: candidates.len(),
            });
        }

        let targets = self.sample_targets(&candidates, task_count);
        state = SessionState::Probing;
        tracing::debug!(
            job_id = %self.job.id,
            ?state,
            probes = targets.len(),
            tasks = task_count,
            "Dispatching probes"
        );

        let (inbox_tx, mut inbox_rx) = mpsc::channel(targets.len());
        for node in &targets {
            self.dispatch_probe(node.clone(), inbox_tx.clone());
        }
        drop(inbox_tx);

        // Collect replies in arrival order until we have enough, the
        // session deadline expires, or no probe is still outstanding.
        let deadline = Instant::now() + self.session_deadline;
        let mut outstanding: HashSet<String> = targets.iter().cloned().collect();
        let mut replies: Vec<(String, LoadSpec)> = Vec::new();

        while replies.len() < task_count && !outstanding.is_empty() {
            tokio::select! {
                msg = inbox_rx.recv() => {
                    match msg {
                        Some(SessionMessage::Reply { node, spec }) => {
                            if outstanding.remove(&node) {
                                self.registry.record_load_signal(&node, spec).await;
                                replies.push((node, spec));
                            }
                        }
                        Some(SessionMessage::Timeout { node }) => {
                            if outstanding.remove(&node) {
                                self.registry.record_probe_timeout(&node).await;
                            }
                        }
                        None => break,
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::debug!(job_id = %self.job.id, replies = replies.len(), "Session deadline reached");
                    break;
                }
            }
        }

        // Replies already queued when we stopped listening still carry
        // usable load signals; their probes stay uncommitted.
        while let Ok(msg) = inbox_rx.try_recv() {
            if let SessionMessage::Reply { node, spec } = msg {
                self.registry.record_load_signal(&node, spec).await;
            }
        }

        state = SessionState::Selecting;
        tracing::debug!(job_id = %self.job.id, ?state, replies = replies.len(), "Selecting placements");

        let outcome = if replies.len() < task_count {
            state = SessionState::Failed;
            Err(PlacementFailure::SessionTimeout {
                replies: replies.len(),
                needed: task_count,
            })
        } else {
            state = SessionState::Placed;
            Ok(select_placements(&replies, task_count))
        };

        // Every probed node that did not win a placement gets an advisory
        // cancellation so it can drop any reservation for this job.
        let committed: HashSet<&str> = outcome
            .as_deref()
            .map(|placements| placements.iter().map(|p| p.node_addr.as_str()).collect())
            .unwrap_or_default();
        for node in &targets {
            if !committed.contains(node.as_str()) {
                self.dispatch_cancel(node.clone());
            }
        }

        tracing::debug!(job_id = %self.job.id, ?state, "Session terminal");
        outcome
    }

    /// Uniform sample without replacement of `oversample * m` targets,
    /// capped at the candidate count. The caller has already checked that
    /// at least `m` candidates exist.
    fn sample_targets(&self, candidates: &[String], task_count: usize) -> Vec<String> {
        let sample_size = self
            .oversample
            .saturating_mul(task_count)
            .min(candidates.len());
        let mut rng = rand::thread_rng();
        candidates
            .choose_multiple(&mut rng, sample_size)
            .cloned()
            .collect()
    }

    /// Fire one probe without occupying the session. The dispatch task
    /// reports back through the inbox; a transport error or an expired
    /// probe deadline both count as a timeout for that node.
    fn dispatch_probe(&self, node: String, inbox_tx: mpsc::Sender<SessionMessage>) {
        let transport = Arc::clone(&self.transport);
        let job_id = self.job.id;
        let hint = self.job.probe_hint().clone();
        let probe_deadline = self.probe_deadline;

        tokio::spawn(async move {
            let msg = match timeout(probe_deadline, transport.probe(&node, job_id, &hint)).await {
                Ok(Ok(spec)) => SessionMessage::Reply { node, spec },
                Ok(Err(e)) => {
                    tracing::debug!(job_id = %job_id, worker = %node, error = %e, "Probe transport failure");
                    SessionMessage::Timeout { node }
                }
                Err(_) => {
                    tracing::debug!(job_id = %job_id, worker = %node, "Probe timed out");
                    SessionMessage::Timeout { node }
                }
            };
            let _ = inbox_tx.send(msg).await;
        });
    }

    /// Best-effort cancellation; a delivery failure is logged and dropped.
    fn dispatch_cancel(&self, node: String) {
        let transport = Arc::clone(&self.transport);
        let job_id = self.job.id;

        tokio::spawn(async move {
            if let Err(e) = transport.cancel_probe(&node, job_id).await {
                tracing::debug!(job_id = %job_id, worker = %node, error = %e, "Probe cancellation not delivered");
            }
        });
    }
}

/// Pick the `task_count` best responders: lowest load first, earliest
/// arrival breaking ties, assigned to tasks in task-index order.
fn select_placements(replies: &[(String, LoadSpec)], task_count: usize) -> Vec<Placement> {
    let mut order: Vec<usize> = (0..replies.len()).collect();
    order.sort_by(|&a, &b| {
        replies[a]
            .1
            .load()
            .total_cmp(&replies[b].1.load())
            .then(a.cmp(&b))
    });

    order
        .into_iter()
        .take(task_count)
        .enumerate()
        .map(|(task_index, reply_index)| Placement {
            task_index: task_index as u32,
            node_addr: replies[reply_index].0.clone(),
        })
        .collect()
}
