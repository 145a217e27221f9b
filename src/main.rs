use clap::Parser;
use tracing_subscriber::EnvFilter;

use flotilla::config::ServerConfig;
use flotilla::placement::{NodeSnapshot, Resources};
use flotilla::server::Server;
use flotilla::shutdown::install_shutdown_handler;
use flotilla::store::{SchedulerAlgorithm, SchedulerConfigPatch};

#[derive(Parser, Debug)]
#[command(name = "flotilla")]
#[command(version)]
#[command(about = "Control plane for a distributed workload orchestrator")]
struct Args {
    /// Number of concurrent scheduling workers
    #[arg(long, default_value = "4")]
    workers: usize,

    /// Static nodes to seed the catalog with, format: "id:cpu_mhz:memory_mb"
    /// (comma-separated)
    #[arg(long, default_value = "")]
    nodes: String,

    // === Initial scheduler configuration ===
    // The same knobs the operator set-config surface exposes; unset flags
    // keep their defaults.
    /// Whether the scheduler binpacks or spreads allocations ["binpack"|"spread"]
    #[arg(long)]
    scheduler_algorithm: Option<SchedulerAlgorithm>,

    /// Allow tasks to exceed reserved memory up to their declared ceiling
    #[arg(long)]
    memory_oversubscription: Option<bool>,

    /// Deny job registration, dispatch, and scale for non-management callers
    #[arg(long)]
    reject_job_registration: Option<bool>,

    /// Stop the eval broker from issuing new work to scheduling workers
    #[arg(long)]
    pause_eval_broker: Option<bool>,

    /// Enable preemption for system jobs
    #[arg(long)]
    preemption_system_scheduler: Option<bool>,

    /// Enable preemption for service jobs
    #[arg(long)]
    preemption_service_scheduler: Option<bool>,

    /// Enable preemption for batch jobs
    #[arg(long)]
    preemption_batch_scheduler: Option<bool>,

    /// Enable preemption for system batch jobs
    #[arg(long)]
    preemption_sysbatch_scheduler: Option<bool>,
}

impl Args {
    fn initial_patch(&self) -> SchedulerConfigPatch {
        SchedulerConfigPatch {
            scheduler_algorithm: self.scheduler_algorithm,
            memory_oversubscription_enabled: self.memory_oversubscription,
            reject_job_registration: self.reject_job_registration,
            pause_eval_broker: self.pause_eval_broker,
            preemption_system_scheduler: self.preemption_system_scheduler,
            preemption_service_scheduler: self.preemption_service_scheduler,
            preemption_batch_scheduler: self.preemption_batch_scheduler,
            preemption_sys_batch_scheduler: self.preemption_sysbatch_scheduler,
        }
    }
}

fn parse_nodes(spec: &str) -> Result<Vec<NodeSnapshot>, String> {
    let mut nodes = Vec::new();
    for part in spec.split(',').filter(|p| !p.is_empty()) {
        let fields: Vec<&str> = part.split(':').collect();
        let [id, cpu, memory] = fields.as_slice() else {
            return Err(format!("invalid node spec {part:?}, expected id:cpu_mhz:memory_mb"));
        };
        let cpu_mhz: u64 = cpu
            .parse()
            .map_err(|_| format!("invalid cpu in node spec {part:?}"))?;
        let memory_mb: u64 = memory
            .parse()
            .map_err(|_| format!("invalid memory in node spec {part:?}"))?;
        nodes.push(NodeSnapshot::new(*id, Resources::new(cpu_mhz, memory_mb)));
    }
    Ok(nodes)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let nodes = parse_nodes(&args.nodes)?;

    let mut initial = flotilla::store::SchedulerConfiguration::default();
    args.initial_patch().apply_to(&mut initial);
    tracing::info!(
        config = %serde_json::to_string(&initial)?,
        "Starting with scheduler configuration"
    );

    let server = Server::new(ServerConfig::default().with_workers(args.workers), initial);
    for node in nodes {
        server.register_node(node).await;
    }

    let cancel = install_shutdown_handler();
    server.run(cancel).await;
    Ok(())
}
