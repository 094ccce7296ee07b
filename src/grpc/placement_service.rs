use std::sync::Arc;

use tonic::{Request, Response, Status};
use uuid::Uuid;

use crate::error::SchedulerError;
use crate::placement::{PlacementEngine, SchedulingRequest, TaskDescriptor};
use crate::proto::placement_service_server::PlacementService;
use crate::proto::{
    GetJobPlacementRequest, GetJobPlacementResponse, RegisterFrontendRequest,
    RegisterFrontendResponse, RegisterWorkerRequest, RegisterWorkerResponse, SubmitJobRequest,
    SubmitJobResponse, TaskPlacement,
};

/// gRPC service exposed to frontends and workers.
pub struct PlacementGrpcService {
    engine: Arc<PlacementEngine>,
}

impl PlacementGrpcService {
    pub fn new(engine: Arc<PlacementEngine>) -> Self {
        Self { engine }
    }
}

#[tonic::async_trait]
impl PlacementService for PlacementGrpcService {
    async fn register_frontend(
        &self,
        request: Request<RegisterFrontendRequest>,
    ) -> Result<Response<RegisterFrontendResponse>, Status> {
        let req = request.into_inner();
        let registered = self.engine.registry().register_frontend(&req.app_name).await;
        if !registered {
            return Err(Status::invalid_argument("App name cannot be empty"));
        }
        Ok(Response::new(RegisterFrontendResponse { registered }))
    }

    async fn register_worker(
        &self,
        request: Request<RegisterWorkerRequest>,
    ) -> Result<Response<RegisterWorkerResponse>, Status> {
        let req = request.into_inner();
        if req.addr.trim().is_empty() {
            return Err(Status::invalid_argument("Worker address cannot be empty"));
        }
        self.engine.registry().register_worker(&req.addr).await;
        Ok(Response::new(RegisterWorkerResponse {}))
    }

    async fn submit_job(
        &self,
        request: Request<SubmitJobRequest>,
    ) -> Result<Response<SubmitJobResponse>, Status> {
        let req = request.into_inner();

        let tasks: Vec<TaskDescriptor> = req
            .tasks
            .into_iter()
            .map(|t| TaskDescriptor {
                cpus: t.cpus,
                memory_mb: t.memory_mb,
                queue_hint: t.queue_hint,
            })
            .collect();

        let job_id = self
            .engine
            .submit_job(SchedulingRequest {
                frontend: req.frontend,
                tasks,
            })
            .await
            .map_err(status_from_error)?;

        Ok(Response::new(SubmitJobResponse {
            accepted: true,
            job_id: job_id.to_string(),
        }))
    }

    async fn get_job_placement(
        &self,
        request: Request<GetJobPlacementRequest>,
    ) -> Result<Response<GetJobPlacementResponse>, Status> {
        let req = request.into_inner();
        let job_id =
            Uuid::parse_str(&req.job_id).map_err(|_| Status::invalid_argument("Invalid job ID"))?;

        let placements = self
            .engine
            .get_job_placement(job_id)
            .await
            .map_err(status_from_error)?;

        Ok(Response::new(GetJobPlacementResponse {
            placements: placements
                .into_iter()
                .map(|p| TaskPlacement {
                    task_index: p.task_index,
                    node_addr: p.node_addr,
                })
                .collect(),
        }))
    }
}

/// Map engine failures to transport status codes. Capacity and timeout
/// failures come back `unavailable` so frontends know to retry.
fn status_from_error(err: SchedulerError) -> Status {
    match err {
        SchedulerError::MalformedRequest(msg) => Status::invalid_argument(msg),
        SchedulerError::UnknownJob(id) => Status::not_found(format!("Job not found: {id}")),
        SchedulerError::AtCapacity(limit) => {
            Status::resource_exhausted(format!("Job table at capacity ({limit})"))
        }
        err @ SchedulerError::InsufficientCapacity { .. }
        | err @ SchedulerError::SessionTimeout { .. } => Status::unavailable(err.to_string()),
        other => Status::internal(other.to_string()),
    }
}
