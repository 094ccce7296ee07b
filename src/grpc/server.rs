use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

use crate::grpc::placement_service::PlacementGrpcService;
use crate::placement::PlacementEngine;
use crate::proto::placement_service_server::PlacementServiceServer;

pub struct GrpcServer {
    addr: SocketAddr,
    engine: Arc<PlacementEngine>,
}

impl GrpcServer {
    pub fn new(addr: SocketAddr, engine: Arc<PlacementEngine>) -> Self {
        Self { addr, engine }
    }

    /// Serve until the shutdown token is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), tonic::transport::Error> {
        let service = PlacementGrpcService::new(self.engine);

        tracing::info!(addr = %self.addr, "Starting gRPC server");

        Server::builder()
            .add_service(PlacementServiceServer::new(service))
            .serve_with_shutdown(self.addr, shutdown.cancelled())
            .await
    }
}
