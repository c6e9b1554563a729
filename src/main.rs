use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

use matrix_broker::client::BrokerClient;
use matrix_broker::config::{
    BrokerConfig, SchedulerConfig, VerificationConfig, WorkerConfig, DEFAULT_MAX_MATRIX_CELLS,
    DEFAULT_MAX_VERIFY_CELLS,
};
use matrix_broker::node::Broker;
use matrix_broker::protocol::{
    ClientMessage, JobComplete, Role, ServerMessage, SubmitJobRequest,
};
use matrix_broker::shutdown::install_shutdown_handler;
use matrix_broker::worker::WorkerAgent;

#[derive(Parser, Debug)]
#[command(name = "matrix-broker")]
#[command(version)]
#[command(about = "Splits matrix multiplication jobs across volunteer workers")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the broker
    Server(ServerArgs),

    /// Run a volunteer worker
    Worker(WorkerArgs),

    /// Job management commands
    Job {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: JobCommands,
    },

    /// Show worker and queue counts
    Status {
        #[command(flatten)]
        client: ClientArgs,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Port for worker and client connections
    #[arg(long, env = "BROKER_PORT", default_value = "4000")]
    port: u16,

    /// Interface to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port for the web dashboard (optional)
    #[arg(long)]
    dashboard_port: Option<u16>,

    /// Cross-check small results against a reference product
    #[arg(long, env = "VERIFY_RESULTS")]
    verify: bool,

    /// Largest output (rows x cols) that will be verified
    #[arg(long, env = "MAX_VERIFY_CELLS", default_value_t = DEFAULT_MAX_VERIFY_CELLS)]
    max_verify_cells: usize,

    /// Abort a job once one of its chunks has been re-queued this many times
    #[arg(long)]
    max_chunk_redispatches: Option<u32>,

    /// Reject jobs whose operands or result exceed this many cells
    #[arg(long, env = "MAX_MATRIX_CELLS", default_value_t = DEFAULT_MAX_MATRIX_CELLS)]
    max_matrix_cells: usize,
}

// =============================================================================
// Worker Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct WorkerArgs {
    /// Broker address
    #[arg(long, short = 'a', default_value = "127.0.0.1:4000")]
    addr: SocketAddr,

    /// Heartbeat interval in milliseconds
    #[arg(long, default_value = "5000")]
    heartbeat_ms: u64,

    /// Disconnect after completing this many tasks
    #[arg(long)]
    max_tasks: Option<u64>,
}

// =============================================================================
// Client Arguments (shared by job and status commands)
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Broker address
    #[arg(long, short = 'a', default_value = "127.0.0.1:4000")]
    addr: SocketAddr,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// Job Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum JobCommands {
    /// Submit a job with random operands and wait for the product
    Submit {
        /// Rows of matrix A
        rows_a: i64,
        /// Columns of matrix A (rows of matrix B)
        cols_a: i64,
        /// Columns of matrix B
        cols_b: i64,

        /// Job ID (random if omitted)
        #[arg(long)]
        job_id: Option<String>,
    },
}

// =============================================================================
// Helper Functions
// =============================================================================

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

fn print_matrix_preview(values: &[f64], rows: usize, cols: usize) {
    const PREVIEW: usize = 6;
    for row in values.chunks(cols.max(1)).take(rows.min(PREVIEW)) {
        let cells: Vec<String> = row
            .iter()
            .take(PREVIEW)
            .map(|v| format!("{:>10.4}", v))
            .collect();
        let more = if cols > PREVIEW { " ..." } else { "" };
        println!("  {}{}", cells.join(" "), more);
    }
    if rows > PREVIEW {
        println!("  ... ({} more rows)", rows - PREVIEW);
    }
}

// =============================================================================
// Server / Worker Implementation
// =============================================================================

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let listen_addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let dashboard_addr: Option<SocketAddr> = match args.dashboard_port {
        Some(p) => Some(format!("{}:{}", args.host, p).parse()?),
        None => None,
    };

    let verification = if args.verify {
        VerificationConfig::enabled(args.max_verify_cells)
    } else {
        VerificationConfig::default()
    };
    let mut scheduler = SchedulerConfig::default()
        .with_verification(verification)
        .with_max_matrix_cells(args.max_matrix_cells);
    if let Some(limit) = args.max_chunk_redispatches {
        scheduler = scheduler.with_max_chunk_redispatches(limit);
    }

    let mut config = BrokerConfig::new(listen_addr).with_scheduler(scheduler);
    if let Some(addr) = dashboard_addr {
        config = config.with_dashboard(addr);
    }

    let shutdown = install_shutdown_handler()?;
    Broker::new(config).run(shutdown).await?;

    Ok(())
}

async fn run_worker(args: WorkerArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let mut config = WorkerConfig::new(args.addr).with_heartbeat_interval_ms(args.heartbeat_ms);
    if let Some(max_tasks) = args.max_tasks {
        config = config.with_max_tasks(max_tasks);
    }

    let shutdown = install_shutdown_handler()?;
    let report = WorkerAgent::new(config).run(shutdown).await?;
    tracing::info!(
        tasks_completed = report.tasks_completed,
        exit = ?report.exit,
        "Worker finished"
    );

    Ok(())
}

// =============================================================================
// Client Command Handlers
// =============================================================================

async fn handle_job_submit(
    client_args: &ClientArgs,
    request: SubmitJobRequest,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut client = BrokerClient::connect(client_args.addr, Role::Client).await?;
    let job_id = request.job_id.clone();
    client.send(&ClientMessage::SubmitJob(request)).await?;

    let complete: JobComplete = loop {
        match client.recv().await? {
            Some(ServerMessage::JobComplete(done)) if done.job_id == job_id => break done,
            Some(ServerMessage::JobError(e)) if e.job_id == job_id => {
                eprintln!("Error: Job {} failed: {}", e.job_id, e.message);
                std::process::exit(1);
            }
            Some(ServerMessage::ProtocolError(e)) => {
                eprintln!("Error: {}", e.message);
                std::process::exit(1);
            }
            Some(_) => continue,
            None => return Err("broker closed the connection before the job finished".into()),
        }
    };

    match client_args.output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&complete)?);
        }
        OutputFormat::Table => {
            println!("Job ID:       {}", complete.job_id);
            println!("Result:       {} x {}", complete.rows_a, complete.cols_b);
            println!("Total Time:   {:.2} ms", complete.total_time_ms);
            println!("Workers Used: {}", complete.workers_used);
            println!("Chunks:       {}", complete.chunks_count);
            match (complete.verified, &complete.verification_error) {
                (Some(true), _) => println!("Verified:     yes"),
                (Some(false), Some(reason)) => println!("Verified:     no ({})", reason),
                (Some(false), None) => println!("Verified:     no"),
                (None, _) => {}
            }
            println!("Product:");
            print_matrix_preview(&complete.result, complete.rows_a, complete.cols_b);
        }
    }
    Ok(())
}

async fn handle_status(client_args: &ClientArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut client = BrokerClient::connect(client_args.addr, Role::Client).await?;
    client.send(&ClientMessage::StatusQuery).await?;

    let status = loop {
        match client.recv().await? {
            Some(ServerMessage::StatusReply(status)) => break status,
            Some(_) => continue,
            None => return Err("broker closed the connection".into()),
        }
    };

    match client_args.output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        OutputFormat::Table => {
            println!("Broker Status");
            println!("{}", "=".repeat(30));
            println!("Active Workers:  {}", status.active_workers);
            println!("Pending Chunks:  {}", status.pending_queue_length);
            println!("Completed Jobs:  {}", status.completed_job_count);
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => {
            run_server(server_args).await?;
        }
        Commands::Worker(worker_args) => {
            run_worker(worker_args).await?;
        }
        Commands::Job { client, command } => match command {
            JobCommands::Submit {
                rows_a,
                cols_a,
                cols_b,
                job_id,
            } => {
                let job_id = job_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                let request = SubmitJobRequest::new(job_id, rows_a, cols_a, cols_b);
                handle_job_submit(&client, request).await?;
            }
        },
        Commands::Status { client } => {
            handle_status(&client).await?;
        }
    }

    Ok(())
}
