//! End-to-end tests over the real gRPC surface: a scheduler node, mock
//! worker servers, and a frontend client.


use std::time::Duration;

use tokio_util::sync::CancellationToken;

use probe_sched::config::SchedulerConfig;
use probe_sched::node::SchedulerNode;
use probe_sched::proto::placement_service_client::PlacementServiceClient;
use probe_sched::proto::{
    GetJobPlacementRequest, RegisterFrontendRequest, RegisterWorkerRequest, SubmitJobRequest,
    TaskDescriptor,
};
use test_harness::{assert_eventually, MockWorker, ProbeBehavior};

struct TestScheduler {
    addr: String,
    shutdown: CancellationToken,
}

impl TestScheduler {
    async fn spawn(port: u16) -> Self {
        let listen_addr = format!("127.0.0.1:{}", port).parse().unwrap();
        let config = SchedulerConfig::new(listen_addr)
            .with_probe_deadline_ms(200)
            .with_session_deadline_ms(1000);

        let node = SchedulerNode::new(config);
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        tokio::spawn(async move {
            let _ = node.run(token).await;
        });

        // Give the server a moment to bind
        tokio::time::sleep(Duration::from_millis(100)).await;

        Self {
            addr: format!("http://127.0.0.1:{}", port),
            shutdown,
        }
    }

    async fn client(&self) -> PlacementServiceClient<tonic::transport::Channel> {
        PlacementServiceClient::connect(self.addr.clone())
            .await
            .expect("failed to connect to scheduler")
    }
}

impl Drop for TestScheduler {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn submit_request(frontend: &str, tasks: usize) -> SubmitJobRequest {
    SubmitJobRequest {
        frontend: frontend.to_string(),
        tasks: vec![TaskDescriptor::default(); tasks],
    }
}

#[tokio::test]
async fn end_to_end_placement_selects_least_loaded_workers() {
    let scheduler = TestScheduler::spawn(19400).await;
    let high = MockWorker::spawn(19401, ProbeBehavior::load(5.0)).await;
    let low = MockWorker::spawn(19402, ProbeBehavior::load(1.0)).await;
    let mid = MockWorker::spawn(19403, ProbeBehavior::load(3.0)).await;

    let mut client = scheduler.client().await;
    client
        .register_frontend(RegisterFrontendRequest {
            app_name: "spark".to_string(),
        })
        .await
        .unwrap();
    for worker in [&high, &low, &mid] {
        client
            .register_worker(RegisterWorkerRequest {
                addr: worker.addr.clone(),
            })
            .await
            .unwrap();
    }

    let submit = client
        .submit_job(submit_request("spark", 2))
        .await
        .unwrap()
        .into_inner();
    assert!(submit.accepted);

    let placements = client
        .get_job_placement(GetJobPlacementRequest {
            job_id: submit.job_id.clone(),
        })
        .await
        .unwrap()
        .into_inner()
        .placements;

    assert_eq!(placements.len(), 2);
    assert_eq!(placements[0].task_index, 0);
    assert_eq!(placements[0].node_addr, low.addr);
    assert_eq!(placements[1].task_index, 1);
    assert_eq!(placements[1].node_addr, mid.addr);

    // A second read returns the identical committed placement.
    let again = client
        .get_job_placement(GetJobPlacementRequest {
            job_id: submit.job_id.clone(),
        })
        .await
        .unwrap()
        .into_inner()
        .placements;
    assert_eq!(placements, again);

    // The losing worker gets an advisory cancellation for this job.
    let job_id = submit.job_id;
    assert_eventually(
        || {
            let high = &high;
            let job_id = job_id.clone();
            async move { high.cancelled().await.contains(&job_id) }
        },
        Duration::from_secs(3),
        "losing worker should see a cancellation",
    )
    .await;
}

#[tokio::test]
async fn malformed_requests_are_rejected_synchronously() {
    let scheduler = TestScheduler::spawn(19410).await;
    let mut client = scheduler.client().await;

    // Empty app name
    let err = client
        .register_frontend(RegisterFrontendRequest {
            app_name: "  ".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), tonic::Code::InvalidArgument);

    // Unregistered frontend
    let err = client
        .submit_job(submit_request("ghost", 1))
        .await
        .unwrap_err();
    assert_eq!(err.code(), tonic::Code::InvalidArgument);

    // Empty task list
    client
        .register_frontend(RegisterFrontendRequest {
            app_name: "app".to_string(),
        })
        .await
        .unwrap();
    let err = client.submit_job(submit_request("app", 0)).await.unwrap_err();
    assert_eq!(err.code(), tonic::Code::InvalidArgument);
}

#[tokio::test]
async fn placement_without_capacity_is_a_retryable_failure() {
    let scheduler = TestScheduler::spawn(19420).await;
    let mut client = scheduler.client().await;

    client
        .register_frontend(RegisterFrontendRequest {
            app_name: "app".to_string(),
        })
        .await
        .unwrap();

    // No workers registered at all
    let submit = client
        .submit_job(submit_request("app", 1))
        .await
        .unwrap()
        .into_inner();

    let err = client
        .get_job_placement(GetJobPlacementRequest {
            job_id: submit.job_id,
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), tonic::Code::Unavailable);
}

#[tokio::test]
async fn silent_worker_does_not_stall_placement() {
    let scheduler = TestScheduler::spawn(19430).await;
    let mute = MockWorker::spawn(19431, ProbeBehavior::Silent).await;
    let fast = MockWorker::spawn(19432, ProbeBehavior::load(0.5)).await;
    let slow = MockWorker::spawn(19433, ProbeBehavior::load(4.0)).await;

    let mut client = scheduler.client().await;
    client
        .register_frontend(RegisterFrontendRequest {
            app_name: "app".to_string(),
        })
        .await
        .unwrap();
    for worker in [&mute, &fast, &slow] {
        client
            .register_worker(RegisterWorkerRequest {
                addr: worker.addr.clone(),
            })
            .await
            .unwrap();
    }

    let submit = client
        .submit_job(submit_request("app", 2))
        .await
        .unwrap()
        .into_inner();

    let placements = client
        .get_job_placement(GetJobPlacementRequest {
            job_id: submit.job_id,
        })
        .await
        .unwrap()
        .into_inner()
        .placements;

    assert_eq!(placements.len(), 2);
    assert!(placements.iter().all(|p| p.node_addr != mute.addr));
}
