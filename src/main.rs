//! # OpsPilot — Task Execution & Delivery Pipeline
//!
//! Turns external triggers and user requests into executed, validated,
//! delivered work: scheduler polls the trigger source, a single worker runs
//! tasks through the reasoning engine, and the dispatcher sends validated
//! deliverables over the configured channels.
//!
//! Usage:
//!   opspilot serve                       # Run the full pipeline + gateway
//!   opspilot task list                   # List tasks
//!   opspilot task add "title" "do this"  # Create an immediate task

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use opspilot_core::config::OpsPilotConfig;
use opspilot_core::types::{CreatedBy, Task};
use opspilot_core::StatusHub;
use opspilot_dispatch::Dispatcher;
use opspilot_executor::worker::{spawn_worker, task_queue};
use opspilot_executor::Executor;
use opspilot_scheduler::sources::FileTriggerSource;
use opspilot_scheduler::{spawn_scheduler, Scheduler};
use opspilot_store::{TaskFilter, TaskStore, TriggerLedger};

#[derive(Parser)]
#[command(name = "opspilot", version, about = "OpsPilot — autonomous task pipeline")]
struct Cli {
    /// Path to config file (default: ~/.opspilot/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler, execution worker, and gateway
    Serve,
    /// Task operations against the local store
    Task {
        #[command(subcommand)]
        command: TaskCommand,
    },
}

#[derive(Subcommand)]
enum TaskCommand {
    /// List tasks (excludes soft-deleted)
    List {
        /// Filter by status (pending, running, completed, ...)
        #[arg(long)]
        status: Option<String>,
    },
    /// Create an immediate task
    Add {
        title: String,
        instructions: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "opspilot=debug,tower_http=debug"
    } else {
        "opspilot=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => OpsPilotConfig::load_from(std::path::Path::new(path))?,
        None => OpsPilotConfig::load()?,
    };

    let db_path = config.store.resolved_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = Arc::new(TaskStore::open(&db_path)?);

    match cli.command {
        Command::Serve => serve(config, store, &db_path).await,
        Command::Task { command } => match command {
            TaskCommand::List { status } => task_list(&store, status.as_deref()),
            TaskCommand::Add {
                title,
                instructions,
            } => task_add(&store, &title, &instructions),
        },
    }
}

/// Wire the whole pipeline and run until killed.
async fn serve(
    config: OpsPilotConfig,
    store: Arc<TaskStore>,
    db_path: &std::path::Path,
) -> Result<()> {
    println!("OpsPilot v{}", env!("CARGO_PKG_VERSION"));

    let ledger = Arc::new(TriggerLedger::open(db_path)?);
    let hub = Arc::new(StatusHub::new());
    let engine: Arc<dyn opspilot_core::traits::ReasoningEngine> =
        opspilot_providers::create_engine(&config)?.into();
    tracing::info!("Reasoning engine: {}", engine.name());

    let dispatcher = Dispatcher::from_config(&config.channels);
    let names = dispatcher.channel_names();
    if names.is_empty() {
        tracing::warn!("No delivery channels configured — only informational tasks can complete");
    } else {
        tracing::info!("Delivery channels: {}", names.join(", "));
    }

    let executor = Arc::new(Executor::new(
        engine,
        store.clone(),
        dispatcher,
        hub.clone(),
        config.scheduler.history_window,
    ));
    let (queue_tx, queue_rx) = task_queue();
    spawn_worker(executor, queue_rx);

    let events_path = OpsPilotConfig::home_dir().join("events.json");
    let source = Arc::new(FileTriggerSource::new(&events_path));
    let scheduler = Arc::new(Scheduler::new(
        source,
        ledger,
        store.clone(),
        hub.clone(),
        config.scheduler.clone(),
    ));
    tokio::spawn(spawn_scheduler(scheduler, queue_tx.clone()));
    tracing::info!(
        "Scheduler polling every {}s (lookahead {}m, events: {})",
        config.scheduler.poll_interval_secs,
        config.scheduler.lookahead_minutes,
        events_path.display()
    );

    opspilot_gateway::start(&config.gateway, store, hub, queue_tx).await
}

fn task_list(store: &TaskStore, status: Option<&str>) -> Result<()> {
    let mut filter = TaskFilter::default();
    if let Some(s) = status {
        filter.status = Some(s.parse().map_err(|e: String| anyhow::anyhow!(e))?);
    }
    let tasks = store.list(&filter)?;
    if tasks.is_empty() {
        println!("No tasks.");
        return Ok(());
    }
    for task in &tasks {
        println!(
            "{}  [{}]  {}  ({})",
            task.id,
            task.status.as_str(),
            task.title,
            task.created_at.format("%Y-%m-%d %H:%M")
        );
    }
    println!("{} task(s)", tasks.len());
    Ok(())
}

fn task_add(store: &TaskStore, title: &str, instructions: &str) -> Result<()> {
    let task = Task::immediate(title, instructions, CreatedBy::User);
    store.save(&task)?;
    println!("Created task {} — run `opspilot serve` to execute it.", task.id);
    Ok(())
}
