use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tonic::transport::{Channel, Endpoint};
use uuid::Uuid;

use crate::placement::{LoadSpec, TaskDescriptor};
use crate::proto::worker_service_client::WorkerServiceClient;
use crate::proto::{CancelProbeRequest, ProbeRequest, TaskDescriptor as ProtoTaskDescriptor};

/// Failure to reach a worker or to parse its reply. The placement engine
/// treats any of these as an immediate probe timeout; they are never
/// surfaced to the frontend.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("Failed to connect to {addr}: {reason}")]
    Connect { addr: String, reason: String },

    #[error("Probe RPC to {addr} failed: {reason}")]
    Rpc { addr: String, reason: String },

    #[error("Malformed reply from {addr}: {reason}")]
    MalformedReply { addr: String, reason: String },
}

/// The wire seam to worker nodes. Sessions only ever talk to workers
/// through this trait, which keeps the engine testable with an in-process
/// implementation.
#[async_trait]
pub trait ProbeTransport: Send + Sync {
    /// Ask a worker for its current load on behalf of a job.
    async fn probe(
        &self,
        node: &str,
        job_id: Uuid,
        hint: &TaskDescriptor,
    ) -> Result<LoadSpec, TransportError>;

    /// Advise a worker that its probe lost the selection. Best-effort:
    /// callers fire-and-forget and never retry.
    async fn cancel_probe(&self, node: &str, job_id: Uuid) -> Result<(), TransportError>;
}

/// gRPC implementation of [`ProbeTransport`] with a cached per-worker
/// client pool. A failed RPC evicts the pooled client so the next probe
/// reconnects.
pub struct GrpcProbeTransport {
    pool: Mutex<HashMap<String, WorkerServiceClient<Channel>>>,
}

impl GrpcProbeTransport {
    pub fn new() -> Self {
        Self {
            pool: Mutex::new(HashMap::new()),
        }
    }

    /// Get or create a cached connection to a worker.
    async fn get_client(&self, addr: &str) -> Result<WorkerServiceClient<Channel>, TransportError> {
        let mut pool = self.pool.lock().await;

        if let Some(client) = pool.get(addr) {
            return Ok(client.clone());
        }

        let endpoint = Endpoint::from_shared(format!("http://{}", addr)).map_err(|e| {
            TransportError::Connect {
                addr: addr.to_string(),
                reason: e.to_string(),
            }
        })?;

        let channel = endpoint
            .connect()
            .await
            .map_err(|e| TransportError::Connect {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;

        let client = WorkerServiceClient::new(channel);
        pool.insert(addr.to_string(), client.clone());
        Ok(client)
    }

    async fn evict(&self, addr: &str) {
        self.pool.lock().await.remove(addr);
    }
}

impl Default for GrpcProbeTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProbeTransport for GrpcProbeTransport {
    async fn probe(
        &self,
        node: &str,
        job_id: Uuid,
        hint: &TaskDescriptor,
    ) -> Result<LoadSpec, TransportError> {
        let mut client = self.get_client(node).await?;

        let request = ProbeRequest {
            job_id: job_id.to_string(),
            hint: Some(ProtoTaskDescriptor {
                cpus: hint.cpus,
                memory_mb: hint.memory_mb,
                queue_hint: hint.queue_hint.clone(),
            }),
        };

        let reply = match client.probe(request).await {
            Ok(response) => response.into_inner(),
            Err(status) => {
                self.evict(node).await;
                return Err(TransportError::Rpc {
                    addr: node.to_string(),
                    reason: status.to_string(),
                });
            }
        };

        LoadSpec::new(reply.load, reply.seq).ok_or_else(|| TransportError::MalformedReply {
            addr: node.to_string(),
            reason: format!("invalid load {}", reply.load),
        })
    }

    async fn cancel_probe(&self, node: &str, job_id: Uuid) -> Result<(), TransportError> {
        let mut client = self.get_client(node).await?;

        client
            .cancel_probe(CancelProbeRequest {
                job_id: job_id.to_string(),
            })
            .await
            .map_err(|status| {
                TransportError::Rpc {
                    addr: node.to_string(),
                    reason: status.to_string(),
                }
            })?;
        Ok(())
    }
}
