// src/lib.rs

pub mod cli;
pub mod config;
pub mod cycling;
pub mod errors;
pub mod fs;
pub mod job;
pub mod logging;
pub mod persistence;
pub mod pool;
pub mod scheduler;
pub mod subproc;
pub mod task;
pub mod triggers;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::WorkflowConfig;
use crate::cycling::CyclePoint;
use crate::fs::{FileSystem, RealFileSystem};
use crate::job::TaskJobManager;
use crate::persistence::{FileStore, WorkflowDbManager};
use crate::pool::TaskPool;
use crate::scheduler::{Runtime, SchedulerCore, SchedulerEvent, SchedulerOptions};
use crate::subproc::SubProcPool;
use crate::triggers::ClockOracle;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and CLI overrides
/// - the state store (fresh start or restart)
/// - task pool, job manager and scheduler core
/// - the subprocess pool
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let mut cfg = load_and_validate(&config_path)?;
    apply_cli_overrides(&mut cfg, &args);

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let state_file = cfg.global.state_file.clone();
    if !args.restart && fs.is_file(&state_file) {
        bail!(
            "state file {:?} already exists; use --restart to continue that run",
            state_file
        );
    }
    if args.restart && !fs.is_file(&state_file) {
        bail!("cannot restart: no state file at {:?}", state_file);
    }
    let primary = FileStore::open(fs.clone(), &state_file)?;
    let public = FileStore::open(fs.clone(), cfg.global.run_dir.join("log").join("state.toml"))?;
    let db = WorkflowDbManager::new(
        Box::new(primary),
        Some(Box::new(public)),
        cfg.global.db_retries,
        cfg.global.db_retry_delay,
    );

    let tick = cfg.global.tick;
    let options = SchedulerOptions {
        abort_if_stalled: cfg.global.abort_if_stalled,
        hold_on_start: args.hold,
    };
    let pool_size = cfg.global.process_pool_size;
    let oracle = ClockOracle::new(cfg.clock);
    let jobs = TaskJobManager::new(&cfg, fs.clone());
    let pool = TaskPool::new(Arc::new(cfg), db);

    // The pure core holds every scheduling decision.
    let mut core = SchedulerCore::new(pool, jobs, Box::new(oracle), options);
    core.start(args.restart, Utc::now())?;

    let (rt_tx, rt_rx) = mpsc::channel::<SchedulerEvent>(256);
    let runner = SubProcPool::new(rt_tx.clone(), pool_size);

    // Ctrl-C → stop now, leaving jobs running.
    {
        let tx = rt_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            let _ = tx.send(SchedulerEvent::ShutdownRequested).await;
        });
    }

    let runtime = Runtime::new(core, rt_rx, runner, tick);
    let core = runtime.run().await?;
    info!(
        stop_mode = ?core.stop_mode(),
        remaining = core.pool().get_all_tasks().count(),
        "workflow stopped"
    );
    Ok(())
}

fn apply_cli_overrides(cfg: &mut WorkflowConfig, args: &CliArgs) {
    if let Some(mode) = args.run_mode {
        cfg.run_mode = mode;
    }
    if let Some(point) = args.stop_point {
        cfg.stop_point = Some(CyclePoint::new(point));
    }
    if let Some(point) = args.hold_point {
        cfg.hold_point = Some(CyclePoint::new(point));
    }
    if args.abort_if_stalled {
        cfg.global.abort_if_stalled = true;
    }
}

/// Simple dry-run output: print scheduling settings and task definitions.
fn print_dry_run(cfg: &WorkflowConfig) {
    println!("cycler dry-run: {}", cfg.global.workflow_name);
    println!("  initial_point = {}", cfg.initial_point);
    if let Some(p) = cfg.final_point {
        println!("  final_point = {p}");
    }
    if let Some(p) = cfg.stop_point {
        println!("  stop_point = {p}");
    }
    if let Some(p) = cfg.hold_point {
        println!("  hold_point = {p}");
    }
    println!("  runahead_limit = {:?}", cfg.runahead_limit);
    println!("  run_mode = {}", cfg.run_mode);
    println!();

    println!("queues ({}):", cfg.queues.len());
    for (name, queue) in &cfg.queues {
        let limit = if queue.limit == 0 {
            "unlimited".to_string()
        } else {
            queue.limit.to_string()
        };
        println!("  - {name} (limit {limit}): {:?}", queue.members);
    }
    println!();

    println!("tasks ({}):", cfg.taskdefs.len());
    for (name, tdef) in &cfg.taskdefs {
        println!("  - {name}");
        println!("      queue: {}", tdef.queue);
        if tdef.namespace_hierarchy.len() > 2 {
            println!("      inherits: {:?}", &tdef.namespace_hierarchy[1..]);
        }
        for group in &tdef.triggers {
            let sep = if group.conditional { " | " } else { " & " };
            let triggers: Vec<String> = group.triggers.iter().map(|t| t.to_string()).collect();
            println!("      after: {}", triggers.join(sep));
        }
        if !tdef.suicide_triggers.is_empty() {
            println!("      suicide triggers: {}", tdef.suicide_triggers.len());
        }
        if !tdef.outputs.is_empty() {
            println!("      outputs: {:?}", tdef.outputs.keys().collect::<Vec<_>>());
        }
        if !tdef.xtriggers.is_empty() {
            println!("      xtriggers: {:?}", tdef.xtriggers);
        }
        if let Some(offset) = tdef.clock_offset {
            println!("      clock offset: {offset}");
        }
        if let Some(offset) = tdef.expire_offset {
            println!("      expire offset: {offset}");
        }
        println!("      platform: {}", tdef.rtconfig.platform.as_deref().unwrap_or("localhost"));
    }

    debug!("dry-run complete (no execution)");
}
