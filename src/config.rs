use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for a scheduler instance.
///
/// All durations are wall-clock deadlines; the probe deadline bounds a single
/// probe round trip, the session deadline bounds an entire placement round
/// for one job.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Address the gRPC facade listens on.
    pub listen_addr: SocketAddr,
    /// Oversampling factor: a job with `m` tasks probes `oversample * m`
    /// candidate nodes.
    pub oversample: usize,
    /// Deadline for a single probe round trip.
    pub probe_deadline_ms: u64,
    /// Deadline for a whole probe session.
    pub session_deadline_ms: u64,
    /// Consecutive probe timeouts before a node is marked SUSPECTED.
    pub suspect_after_timeouts: u32,
    /// Silence window after which a node is marked DEAD by the sweeper.
    pub dead_after_ms: u64,
    /// How often the liveness sweeper scans the registry.
    pub sweep_interval_ms: u64,
    /// Maximum number of jobs retained in memory.
    pub max_jobs: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:50051"
                .parse()
                .expect("default listen address is valid"),
            oversample: 2,
            probe_deadline_ms: 100,
            session_deadline_ms: 500,
            suspect_after_timeouts: 3,
            dead_after_ms: 10_000,
            sweep_interval_ms: 1_000,
            max_jobs: 10_000,
        }
    }
}

impl SchedulerConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_oversample(mut self, oversample: usize) -> Self {
        self.oversample = oversample.max(1);
        self
    }

    pub fn with_probe_deadline_ms(mut self, ms: u64) -> Self {
        self.probe_deadline_ms = ms;
        self
    }

    pub fn with_session_deadline_ms(mut self, ms: u64) -> Self {
        self.session_deadline_ms = ms;
        self
    }

    pub fn probe_deadline(&self) -> Duration {
        Duration::from_millis(self.probe_deadline_ms)
    }

    pub fn session_deadline(&self) -> Duration {
        Duration::from_millis(self.session_deadline_ms)
    }

    pub fn dead_after(&self) -> Duration {
        Duration::from_millis(self.dead_after_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}
