use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::grpc::GrpcServer;
use crate::placement::PlacementEngine;
use crate::registry::Registry;
use crate::transport::GrpcProbeTransport;

/// A scheduler instance: registry, placement engine, and gRPC facade.
///
/// All state is in-memory by design. A restarted scheduler comes up with an
/// empty registry and no in-flight sessions; frontends and workers simply
/// re-register and retry.
pub struct SchedulerNode {
    pub config: SchedulerConfig,
    pub registry: Arc<Registry>,
    pub engine: Arc<PlacementEngine>,
}

impl SchedulerNode {
    pub fn new(config: SchedulerConfig) -> Self {
        let registry = Arc::new(Registry::new(
            config.suspect_after_timeouts,
            config.dead_after(),
        ));
        let transport = Arc::new(GrpcProbeTransport::new());
        let engine = Arc::new(PlacementEngine::new(
            config.clone(),
            Arc::clone(&registry),
            transport,
        ));

        Self {
            config,
            registry,
            engine,
        }
    }

    /// Run the scheduler until shutdown:
    /// 1. Spawns the registry liveness sweeper
    /// 2. Runs the gRPC server (blocking until the token is cancelled)
    ///
    /// # Errors
    ///
    /// Returns an error if the gRPC server fails to bind or encounters a
    /// fatal transport error.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), tonic::transport::Error> {
        tokio::spawn(
            Arc::clone(&self.registry).run_sweeper(self.config.sweep_interval(), shutdown.clone()),
        );

        let server = GrpcServer::new(self.config.listen_addr, Arc::clone(&self.engine));
        server.run(shutdown).await
    }
}
