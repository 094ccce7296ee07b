use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::placement::LoadSpec;

/// Liveness state of a worker node as seen by this scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Active,
    Suspected,
    Dead,
}

impl std::fmt::Display for Liveness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Liveness::Active => write!(f, "active"),
            Liveness::Suspected => write!(f, "suspected"),
            Liveness::Dead => write!(f, "dead"),
        }
    }
}

/// Cached state for one worker node. The load signal may be stale; it is a
/// hint, not an authoritative queue length.
#[derive(Debug, Clone)]
pub struct WorkerNode {
    pub addr: String,
    pub load: Option<LoadSpec>,
    pub liveness: Liveness,
    pub consecutive_timeouts: u32,
    pub last_seen: Instant,
}

impl WorkerNode {
    fn new(addr: String) -> Self {
        Self {
            addr,
            load: None,
            liveness: Liveness::Active,
            consecutive_timeouts: 0,
            last_seen: Instant::now(),
        }
    }
}

/// A registered frontend application.
#[derive(Debug, Clone)]
pub struct Frontend {
    pub name: String,
    pub registered_at: DateTime<Utc>,
}

/// Tracks the frontends and worker nodes known to this scheduler instance.
///
/// Node state sits behind a per-node lock; the outer map lock is held only
/// long enough to clone the node's `Arc`. Probe replies for different nodes
/// therefore never contend with each other, which matters because every
/// reply of every in-flight session lands here.
pub struct Registry {
    frontends: RwLock<HashMap<String, Frontend>>,
    workers: RwLock<HashMap<String, Arc<RwLock<WorkerNode>>>>,
    suspect_after_timeouts: u32,
    dead_after: Duration,
}

impl Registry {
    pub fn new(suspect_after_timeouts: u32, dead_after: Duration) -> Self {
        Self {
            frontends: RwLock::new(HashMap::new()),
            workers: RwLock::new(HashMap::new()),
            suspect_after_timeouts,
            dead_after,
        }
    }

    /// Register a frontend application. Idempotent; re-registration keeps
    /// the original registration time. Returns false only for a blank name.
    pub async fn register_frontend(&self, name: &str) -> bool {
        if name.trim().is_empty() {
            return false;
        }
        let mut frontends = self.frontends.write().await;
        if !frontends.contains_key(name) {
            frontends.insert(
                name.to_string(),
                Frontend {
                    name: name.to_string(),
                    registered_at: Utc::now(),
                },
            );
            tracing::info!(frontend = name, "Frontend registered");
        }
        true
    }

    pub async fn is_frontend_registered(&self, name: &str) -> bool {
        self.frontends.read().await.contains_key(name)
    }

    /// Add a worker node, or revive it if it was previously degraded.
    pub async fn register_worker(&self, addr: &str) {
        let node = self.get_or_insert(addr).await;
        let mut node = node.write().await;
        node.liveness = Liveness::Active;
        node.consecutive_timeouts = 0;
        node.last_seen = Instant::now();
        tracing::info!(worker = addr, "Worker registered");
    }

    /// Record a load signal from a probe reply. Any reply restores ACTIVE;
    /// a signal with an older sequence number than the cached one refreshes
    /// liveness but does not overwrite the fresher cached load.
    pub async fn record_load_signal(&self, addr: &str, spec: LoadSpec) {
        let node = self.get_or_insert(addr).await;
        let mut node = node.write().await;
        let stale = node.load.is_some_and(|cached| spec.seq() < cached.seq());
        if !stale {
            node.load = Some(spec);
        }
        node.liveness = Liveness::Active;
        node.consecutive_timeouts = 0;
        node.last_seen = Instant::now();
        tracing::trace!(worker = addr, load = spec.load(), seq = spec.seq(), stale, "Load signal");
    }

    /// Record a probe timeout. Only timeout logic degrades liveness; enough
    /// consecutive misses move the node to SUSPECTED.
    pub async fn record_probe_timeout(&self, addr: &str) {
        let node = {
            let workers = self.workers.read().await;
            match workers.get(addr) {
                Some(node) => node.clone(),
                None => return,
            }
        };
        let mut node = node.write().await;
        node.consecutive_timeouts += 1;
        if node.consecutive_timeouts >= self.suspect_after_timeouts
            && node.liveness == Liveness::Active
        {
            node.liveness = Liveness::Suspected;
            tracing::warn!(
                worker = addr,
                timeouts = node.consecutive_timeouts,
                "Worker suspected after consecutive probe timeouts"
            );
        }
    }

    /// Addresses of all nodes whose liveness is not DEAD, in no particular
    /// order. Safe to call concurrently with reply traffic.
    pub async fn candidate_nodes(&self) -> Vec<String> {
        let workers: Vec<Arc<RwLock<WorkerNode>>> =
            self.workers.read().await.values().cloned().collect();

        let mut candidates = Vec::with_capacity(workers.len());
        for node in workers {
            let node = node.read().await;
            if node.liveness != Liveness::Dead {
                candidates.push(node.addr.clone());
            }
        }
        candidates
    }

    /// Snapshot of a single worker's state, for inspection and tests.
    pub async fn worker(&self, addr: &str) -> Option<WorkerNode> {
        let node = self.workers.read().await.get(addr)?.clone();
        let node = node.read().await;
        Some(node.clone())
    }

    /// Snapshot of every known worker.
    pub async fn all_workers(&self) -> Vec<WorkerNode> {
        let workers: Vec<Arc<RwLock<WorkerNode>>> =
            self.workers.read().await.values().cloned().collect();

        let mut snapshots = Vec::with_capacity(workers.len());
        for node in workers {
            snapshots.push(node.read().await.clone());
        }
        snapshots
    }

    /// Degrade nodes that have been silent past the dead window. Called
    /// periodically by the sweeper.
    pub async fn sweep_liveness(&self) {
        let workers: Vec<Arc<RwLock<WorkerNode>>> =
            self.workers.read().await.values().cloned().collect();

        for node in workers {
            let mut node = node.write().await;
            if node.liveness != Liveness::Dead && node.last_seen.elapsed() >= self.dead_after {
                node.liveness = Liveness::Dead;
                tracing::warn!(
                    worker = %node.addr,
                    silent_ms = node.last_seen.elapsed().as_millis(),
                    "Worker marked dead after silence window"
                );
            }
        }
    }

    /// Run the liveness sweeper until the token is cancelled.
    pub async fn run_sweeper(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_liveness().await;
                }
                _ = shutdown.cancelled() => {
                    tracing::debug!("Liveness sweeper stopped");
                    break;
                }
            }
        }
    }

    async fn get_or_insert(&self, addr: &str) -> Arc<RwLock<WorkerNode>> {
        {
            let workers = self.workers.read().await;
            if let Some(node) = workers.get(addr) {
                return node.clone();
            }
        }
        let mut workers = self.workers.write().await;
        workers
            .entry(addr.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(WorkerNode::new(addr.to_string()))))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        Registry::new(3, Duration::from_millis(100))
    }

    fn load(value: f64, seq: u64) -> LoadSpec {
        LoadSpec::new(value, seq).unwrap()
    }

    #[tokio::test]
    async fn frontend_registration_is_idempotent() {
        let reg = registry();
        assert!(reg.register_frontend("spark").await);
        assert!(reg.register_frontend("spark").await);
        assert!(reg.is_frontend_registered("spark").await);
        assert!(!reg.is_frontend_registered("flink").await);
    }

    #[tokio::test]
    async fn blank_frontend_name_is_rejected() {
        let reg = registry();
        assert!(!reg.register_frontend("").await);
        assert!(!reg.register_frontend("   ").await);
    }

    #[tokio::test]
    async fn load_signal_auto_registers_worker() {
        let reg = registry();
        reg.record_load_signal("10.0.0.1:7000", load(2.0, 1)).await;
        let node = reg.worker("10.0.0.1:7000").await.unwrap();
        assert_eq!(node.liveness, Liveness::Active);
        assert_eq!(node.load.unwrap().load(), 2.0);
    }

    #[tokio::test]
    async fn stale_signal_keeps_fresher_load_but_restores_liveness() {
        let reg = registry();
        reg.register_worker("w1").await;
        reg.record_load_signal("w1", load(1.0, 5)).await;

        // Degrade to suspected via timeouts
        for _ in 0..3 {
            reg.record_probe_timeout("w1").await;
        }
        assert_eq!(reg.worker("w1").await.unwrap().liveness, Liveness::Suspected);

        // An out-of-order signal still revives the node
        reg.record_load_signal("w1", load(9.0, 2)).await;
        let node = reg.worker("w1").await.unwrap();
        assert_eq!(node.liveness, Liveness::Active);
        assert_eq!(node.load.unwrap().seq(), 5);
        assert_eq!(node.load.unwrap().load(), 1.0);
    }

    #[tokio::test]
    async fn timeouts_below_threshold_keep_node_active() {
        let reg = registry();
        reg.register_worker("w1").await;
        reg.record_probe_timeout("w1").await;
        reg.record_probe_timeout("w1").await;
        assert_eq!(reg.worker("w1").await.unwrap().liveness, Liveness::Active);
        reg.record_probe_timeout("w1").await;
        assert_eq!(reg.worker("w1").await.unwrap().liveness, Liveness::Suspected);
    }

    #[tokio::test]
    async fn suspected_nodes_remain_candidates_dead_nodes_do_not() {
        let reg = registry();
        reg.register_worker("w1").await;
        reg.register_worker("w2").await;
        for _ in 0..3 {
            reg.record_probe_timeout("w2").await;
        }

        let mut candidates = reg.candidate_nodes().await;
        candidates.sort();
        assert_eq!(candidates, vec!["w1".to_string(), "w2".to_string()]);

        tokio::time::sleep(Duration::from_millis(120)).await;
        reg.sweep_liveness().await;
        // Both silent past the window now
        assert!(reg.candidate_nodes().await.is_empty());
    }

    #[tokio::test]
    async fn reply_revives_dead_worker() {
        let reg = registry();
        reg.register_worker("w1").await;
        tokio::time::sleep(Duration::from_millis(120)).await;
        reg.sweep_liveness().await;
        assert_eq!(reg.worker("w1").await.unwrap().liveness, Liveness::Dead);

        reg.record_load_signal("w1", load(0.0, 1)).await;
        assert_eq!(reg.worker("w1").await.unwrap().liveness, Liveness::Active);
        assert_eq!(reg.candidate_nodes().await.len(), 1);
    }

    #[tokio::test]
    async fn timeout_for_unknown_worker_is_ignored() {
        let reg = registry();
        reg.record_probe_timeout("nope").await;
        assert!(reg.worker("nope").await.is_none());
    }

    #[tokio::test]
    async fn concurrent_signals_are_not_lost() {
        let reg = Arc::new(registry());
        let mut handles = Vec::new();
        for i in 0..50 {
            let reg = reg.clone();
            handles.push(tokio::spawn(async move {
                let addr = format!("w{}", i % 10);
                reg.record_load_signal(&addr, load(i as f64, i)).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(reg.all_workers().await.len(), 10);
        for node in reg.all_workers().await {
            assert_eq!(node.liveness, Liveness::Active);
            assert!(node.load.is_some());
        }
    }
}
