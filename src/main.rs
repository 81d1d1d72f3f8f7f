mod agent;
mod bus;
mod cli;
mod config;
mod engine;
mod error;
mod logging;
mod paths;
mod runner;
mod scheduler;
mod server;
mod thread;
mod time;
mod tools;
mod usage;
mod workspace;

use crate::agent::AgentStore;
use crate::bus::EventBus;
use crate::config::Config;
use crate::engine::stub::StubEngine;
use crate::engine::{Engine, ResumingEngine};
use crate::runner::AgentRunner;
use crate::scheduler::task::{TaskScheduler, TaskStore};
use crate::scheduler::trigger::{TriggerScheduler, TriggerStore};
use crate::thread::ThreadStore;
use crate::time::{Clock, SystemClock};
use crate::tools::ToolServerRegistry;
use crate::usage::UsageLog;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "conclaved", version)]
#[command(about = "Conclave — a long-running multi-agent orchestration daemon", long_about = None)]
struct Cli {
    /// Workspace root. If omitted, detects by walking up for .git.
    #[arg(long, global = true)]
    root: Option<std::path::PathBuf>,

    /// Port for the /healthz server.
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Run in the foreground (used internally by `start`'s spawned child).
    #[arg(long, default_value_t = false)]
    foreground: bool,

    #[command(subcommand)]
    cmd: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon in the background.
    Start,
    /// Stop the background daemon.
    Stop,
    /// Show whether the daemon is running.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("warning: failed to load conclave.toml, using defaults: {e}");
        Config::default()
    });

    let cli = Cli::parse();

    match &cli.cmd {
        Some(Command::Start) => return cli::daemon::start(&config, cli.port, cli.root.clone()).await,
        Some(Command::Stop) => return cli::daemon::stop().await,
        Some(Command::Status) => return cli::daemon::status(&config, cli.port).await,
        None => {}
    }

    let log_dir = logging::setup_tracing_with_settings(logging::LoggingSettings {
        level: config.logging.level.as_deref(),
        directory: config.logging.directory.as_deref(),
        retention_days: config.logging.retention_days,
        suppress_stdout: false,
    });
    match &log_dir {
        Ok(path) => tracing::info!("logging to {}", path.display()),
        Err(e) => eprintln!("failed to initialize logging: {e}"),
    }

    let ws_root = workspace::resolve_workspace_root(cli.root.clone())?;
    let port = cli.port.unwrap_or(config.server.port);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let agents = Arc::new(AgentStore::new(&ws_root));
    let threads = Arc::new(ThreadStore::new(&ws_root, clock.clone()));
    let usage_log = Arc::new(UsageLog::new(&ws_root, clock.clone()));
    let bus = Arc::new(EventBus::default());
    let tool_registry = Arc::new(ToolServerRegistry::default());

    // No external generative-model SDK is wired up yet; `StubEngine` stands
    // in as the `Engine` this core drives, wrapped the same way a real
    // adapter would be to get the session-resume-retry-once behavior for
    // free.
    let inner_engine = StubEngine::new("(no engine configured)");
    let engine: Arc<dyn Engine> = Arc::new(ResumingEngine::new(inner_engine));

    let runner = Arc::new(AgentRunner::new(
        agents.clone(),
        threads.clone(),
        usage_log,
        bus,
        tool_registry,
        engine,
        clock.clone(),
        ws_root.to_string_lossy().to_string(),
        config.delegation.max_depth,
    ));
    runner.install_self_reference();

    let trigger_store = Arc::new(TriggerStore::new(&ws_root));
    let trigger_scheduler = Arc::new(TriggerScheduler::new(
        trigger_store,
        runner.clone(),
        threads.clone(),
        clock.clone(),
    ));

    let task_store = Arc::new(TaskStore::new(&ws_root, clock.clone()));
    let task_scheduler = Arc::new(TaskScheduler::new(task_store, threads, runner));

    let trigger_tick = tokio::time::Duration::from_secs(config.scheduler.trigger_tick_secs);
    let trigger_handle = {
        let trigger_scheduler = trigger_scheduler.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(trigger_tick);
            loop {
                interval.tick().await;
                trigger_scheduler.tick().await;
            }
        })
    };

    let task_tick = tokio::time::Duration::from_secs(config.scheduler.task_tick_secs);
    let task_handle = {
        let task_scheduler = task_scheduler.clone();
        tokio::spawn(async move {
            // Anchored at `now + task_tick` so the first tick does not fire
            // immediately on daemon startup (spec: task tick never runs on start).
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + task_tick, task_tick);
            loop {
                interval.tick().await;
                task_scheduler.tick().await;
            }
        })
    };

    tracing::info!("workspace root: {}", ws_root.display());
    tracing::info!("agent definitions: {}", workspace::agents_dir(&ws_root).display());

    let server_result = server::serve(port).await;

    trigger_handle.abort();
    task_handle.abort();
    server_result
}
