use clap::Parser;
use serde::Serialize;
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

use probe_sched::config::SchedulerConfig;
use probe_sched::node::SchedulerNode;
use probe_sched::proto::placement_service_client::PlacementServiceClient;
use probe_sched::proto::{
    GetJobPlacementRequest, RegisterFrontendRequest, RegisterWorkerRequest, SubmitJobRequest,
    TaskDescriptor,
};
use probe_sched::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "probe-sched")]
#[command(version)]
#[command(about = "A decentralized task scheduler using batch-sampled probe placement")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start a scheduler instance
    Server(ServerArgs),

    /// Frontend management commands
    Frontend {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: FrontendCommands,
    },

    /// Worker management commands
    Worker {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: WorkerCommands,
    },

    /// Job management commands
    Job {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: JobCommands,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Address to listen on for gRPC
    #[arg(long, default_value = "127.0.0.1:50051")]
    listen: SocketAddr,

    /// Oversampling factor: probes per task
    #[arg(long, default_value = "2")]
    oversample: usize,

    /// Per-probe deadline in milliseconds
    #[arg(long, default_value = "100")]
    probe_deadline_ms: u64,

    /// Per-session deadline in milliseconds
    #[arg(long, default_value = "500")]
    session_deadline_ms: u64,

    /// Consecutive probe timeouts before a worker is suspected
    #[arg(long, default_value = "3")]
    suspect_after: u32,

    /// Silence window in milliseconds before a worker is declared dead
    #[arg(long, default_value = "10000")]
    dead_after_ms: u64,

    /// Maximum number of jobs kept in memory
    #[arg(long, default_value = "10000")]
    max_jobs: usize,
}

// =============================================================================
// Client Arguments (shared by frontend, worker and job commands)
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Scheduler address
    #[arg(long, short = 'a', default_value = "http://127.0.0.1:50051")]
    addr: String,
}

#[derive(clap::Subcommand, Debug)]
enum FrontendCommands {
    /// Register a frontend application
    Register {
        /// Application name
        #[arg(long)]
        app: String,
    },
}

#[derive(clap::Subcommand, Debug)]
enum WorkerCommands {
    /// Announce a worker node as a probe candidate
    Announce {
        /// host:port the scheduler should probe
        #[arg(long)]
        worker_addr: String,
    },
}

#[derive(clap::Subcommand, Debug)]
enum JobCommands {
    /// Submit a job and print its id
    Submit {
        /// Owning frontend (must be registered)
        #[arg(long)]
        frontend: String,

        /// Number of tasks in the job
        #[arg(long, default_value = "1")]
        tasks: u32,

        /// CPUs requested per task
        #[arg(long, default_value = "1")]
        cpus: u32,

        /// Memory requested per task, in MB
        #[arg(long, default_value = "256")]
        memory_mb: u64,

        /// Queue hint forwarded with probes
        #[arg(long, default_value = "")]
        queue_hint: String,
    },

    /// Wait for and print a job's placement
    Place {
        /// Job id returned by submit
        #[arg(long)]
        job_id: String,
    },
}

#[derive(Serialize)]
struct PlacementRow {
    task_index: u32,
    node_addr: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => run_server(server_args).await,
        Commands::Frontend { client, command } => run_frontend_command(client, command).await,
        Commands::Worker { client, command } => run_worker_command(client, command).await,
        Commands::Job { client, command } => run_job_command(client, command).await,
    }
}

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = SchedulerConfig {
        listen_addr: args.listen,
        oversample: args.oversample.max(1),
        probe_deadline_ms: args.probe_deadline_ms,
        session_deadline_ms: args.session_deadline_ms,
        suspect_after_timeouts: args.suspect_after,
        dead_after_ms: args.dead_after_ms,
        max_jobs: args.max_jobs,
        ..Default::default()
    };

    let shutdown = install_shutdown_handler();
    let node = SchedulerNode::new(config);
    node.run(shutdown).await?;
    Ok(())
}

async fn connect(addr: &str) -> Result<PlacementServiceClient<tonic::transport::Channel>, Box<dyn std::error::Error>> {
    Ok(PlacementServiceClient::connect(addr.to_string()).await?)
}

async fn run_frontend_command(
    client: ClientArgs,
    command: FrontendCommands,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut conn = connect(&client.addr).await?;
    match command {
        FrontendCommands::Register { app } => {
            conn.register_frontend(RegisterFrontendRequest { app_name: app.clone() })
                .await?;
            println!("Registered frontend '{app}'");
        }
    }
    Ok(())
}

async fn run_worker_command(
    client: ClientArgs,
    command: WorkerCommands,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut conn = connect(&client.addr).await?;
    match command {
        WorkerCommands::Announce { worker_addr } => {
            conn.register_worker(RegisterWorkerRequest {
                addr: worker_addr.clone(),
            })
            .await?;
            println!("Announced worker {worker_addr}");
        }
    }
    Ok(())
}

async fn run_job_command(
    client: ClientArgs,
    command: JobCommands,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut conn = connect(&client.addr).await?;
    match command {
        JobCommands::Submit {
            frontend,
            tasks,
            cpus,
            memory_mb,
            queue_hint,
        } => {
            let descriptors = (0..tasks)
                .map(|_| TaskDescriptor {
                    cpus,
                    memory_mb,
                    queue_hint: queue_hint.clone(),
                })
                .collect();
            let response = conn
                .submit_job(SubmitJobRequest {
                    frontend,
                    tasks: descriptors,
                })
                .await?
                .into_inner();
            println!("{}", response.job_id);
        }
        JobCommands::Place { job_id } => {
            let response = conn
                .get_job_placement(GetJobPlacementRequest { job_id })
                .await?
                .into_inner();
            let rows: Vec<PlacementRow> = response
                .placements
                .into_iter()
                .map(|p| PlacementRow {
                    task_index: p.task_index,
                    node_addr: p.node_addr,
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
    }
    Ok(())
}
