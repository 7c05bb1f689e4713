use clap::Parser;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

use netplane_core::config::NetplaneConfig;
use netplane_core::error::{NetplaneError, NetplaneResult};
use netplane_core::jobs::AsyncJob;
use netplane_core::lock::LockManager;
use netplane_core::types::VmInstance;
use netplane_core::vm::WorkRecord;
use netplane_core::Store;

#[derive(Parser)]
#[command(name = "netplane")]
#[command(about = "Inspect the netplane orchestration store", long_about = None)]
struct Cli {
    /// Configuration file (TOML); environment variables are used when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Configuration operations
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Async job inspection
    Jobs {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// Distributed lock inspection
    Locks {
        #[command(subcommand)]
        command: LockCommands,
    },
    /// VM inspection
    Vms {
        #[command(subcommand)]
        command: VmCommands,
    },
    /// VM work record inspection
    Work {
        #[command(subcommand)]
        command: WorkCommands,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Load and validate the configuration, then print it
    Check,
}

#[derive(clap::Subcommand)]
enum JobCommands {
    /// List jobs
    List {
        /// Only jobs that have not finished
        #[arg(long)]
        active: bool,
    },
    /// Show one job as JSON
    Show {
        #[arg(long)]
        id: u64,
    },
}

#[derive(clap::Subcommand)]
enum LockCommands {
    /// List lock rows
    List,
}

#[derive(clap::Subcommand)]
enum VmCommands {
    /// List VMs
    List,
}

#[derive(clap::Subcommand)]
enum WorkCommands {
    /// List work records
    List {
        /// Only records of this VM
        #[arg(long)]
        vm: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> NetplaneResult<()> {
    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(
        "netplane=info"
            .parse()
            .map_err(|e| NetplaneError::configuration("logging", format!("Invalid log directive: {}", e)))?,
    );
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => NetplaneConfig::from_file(path)?,
        None => NetplaneConfig::from_env()?,
    };

    match cli.command {
        Commands::Config {
            command: ConfigCommands::Check,
        } => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            println!("Configuration is valid");
        }
        Commands::Jobs { command } => handle_job_command(&config, command)?,
        Commands::Locks {
            command: LockCommands::List,
        } => handle_lock_list(&config)?,
        Commands::Vms {
            command: VmCommands::List,
        } => handle_vm_list(&config)?,
        Commands::Work {
            command: WorkCommands::List { vm },
        } => handle_work_list(&config, vm)?,
    }

    Ok(())
}

fn open_store(config: &NetplaneConfig) -> NetplaneResult<Store> {
    let path = config.storage.db_path();
    if !path.exists() {
        return Err(NetplaneError::not_found(format!(
            "store at {}",
            path.display()
        )));
    }
    debug!(path = %path.display(), "Opening store");
    Store::open(path)
}

fn handle_job_command(config: &NetplaneConfig, command: JobCommands) -> NetplaneResult<()> {
    let store = open_store(config)?;
    match command {
        JobCommands::List { active } => {
            let jobs: Vec<AsyncJob> = store
                .list::<AsyncJob>()?
                .into_iter()
                .filter(|job| !active || !job.status.is_terminal())
                .collect();
            if jobs.is_empty() {
                println!("No jobs");
                return Ok(());
            }
            println!(
                "{:<10} {:<24} {:<28} {:<22} {:<10} {}",
                "ID", "DISPATCHER", "COMMAND", "STATUS", "OWNER", "QUEUE"
            );
            for job in jobs {
                println!(
                    "{:<10} {:<24} {:<28} {:<22} {:<10} {}",
                    job.id.to_string(),
                    job.dispatcher,
                    job.command,
                    job.status.to_string(),
                    job.owner_node.map(|n| n.to_string()).unwrap_or_else(|| "-".into()),
                    job.queue.map(|q| q.to_string()).unwrap_or_else(|| "-".into()),
                );
            }
        }
        JobCommands::Show { id } => {
            let job: AsyncJob = store.get(id)?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
    }
    Ok(())
}

fn handle_lock_list(config: &NetplaneConfig) -> NetplaneResult<()> {
    let store = open_store(config)?;
    let locks = LockManager::new(config.node_id, store, config.lock.clone());
    let entries = locks.list()?;
    if entries.is_empty() {
        println!("No locks");
        return Ok(());
    }

    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    println!(
        "{:<32} {:<8} {:<48} {:<6} {}",
        "NAME", "HELD", "HOLDER", "COUNT", "FENCING"
    );
    for entry in entries {
        println!(
            "{:<32} {:<8} {:<48} {:<6} {}",
            entry.name,
            entry.is_held(now_ms),
            entry.holder.to_string(),
            entry.count,
            entry.fencing_token
        );
    }
    Ok(())
}

fn handle_vm_list(config: &NetplaneConfig) -> NetplaneResult<()> {
    let store = open_store(config)?;
    let vms = store.list::<VmInstance>()?;
    if vms.is_empty() {
        println!("No VMs");
        return Ok(());
    }
    println!(
        "{:<10} {:<24} {:<12} {:<10} {:<10} {}",
        "ID", "NAME", "STATE", "HOST", "LAST HOST", "UPDATED"
    );
    for vm in vms {
        println!(
            "{:<10} {:<24} {:<12} {:<10} {:<10} {}",
            vm.id.to_string(),
            vm.name,
            format!("{:?}", vm.state),
            vm.host_id.map(|h| h.to_string()).unwrap_or_else(|| "-".into()),
            vm.last_host_id.map(|h| h.to_string()).unwrap_or_else(|| "-".into()),
            vm.updated_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }
    Ok(())
}

fn handle_work_list(config: &NetplaneConfig, vm: Option<u64>) -> NetplaneResult<()> {
    let store = open_store(config)?;
    let records: Vec<WorkRecord> = store
        .list::<WorkRecord>()?
        .into_iter()
        .filter(|record| vm.map_or(true, |id| record.vm_id.value() == id))
        .collect();
    if records.is_empty() {
        println!("No work records");
        return Ok(());
    }
    println!(
        "{:<10} {:<10} {:<22} {:<12} {:<10} {}",
        "ID", "VM", "OPERATION", "STEP", "JOB", "DETAILS"
    );
    for record in records {
        println!(
            "{:<10} {:<10} {:<22} {:<12} {:<10} {}",
            record.id.to_string(),
            record.vm_id.to_string(),
            record.operation,
            record.step.to_string(),
            record.job_id.map(|j| j.to_string()).unwrap_or_else(|| "-".into()),
            record.details.unwrap_or_default(),
        );
    }
    Ok(())
}
