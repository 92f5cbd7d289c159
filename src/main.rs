use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde_json::json;
use tokio::time::{interval, Duration};

use taotrade::config::Config;
use taotrade::logging::{log, log_run_id, obj, v_str, Domain, Level};
use taotrade::runner::{request_cancel, Runner};
use taotrade::scenario;
use taotrade::storage::{RunStatus, SnapshotSink, StateStore};

fn print_usage() {
    eprintln!("Usage: taotrade <command> [args]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  simulate [scenario]   Run a scenario (default: $SCENARIO)");
    eprintln!("  list                  Show recent simulations");
    eprintln!("  show <sim_id>         Dump a stored simulation as JSON");
    eprintln!("  scenarios             List registered scenarios");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let cfg = Config::from_env();

    let cmd = args.get(1).map(String::as_str).unwrap_or("simulate");
    match cmd {
        "simulate" => {
            let name = args.get(2).cloned().unwrap_or_else(|| cfg.scenario.clone());
            cmd_simulate(&cfg, &name).await
        }
        "list" => cmd_list(&cfg),
        "show" => {
            let Some(sim_id) = args.get(2) else {
                eprintln!("Usage: taotrade show <sim_id>");
                std::process::exit(1);
            };
            cmd_show(&cfg, sim_id)
        }
        "scenarios" => {
            for s in scenario::all() {
                println!("{:<14} {}", s.name, s.description);
            }
            Ok(())
        }
        "-h" | "--help" | "help" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage();
            std::process::exit(1);
        }
    }
}

async fn cmd_simulate(cfg: &Config, name: &str) -> Result<()> {
    if scenario::find(name).is_none() {
        return Err(anyhow!(
            "unknown scenario '{}' (available: {})",
            name,
            scenario::names().join(", ")
        ));
    }

    let mut store = StateStore::new(&cfg.sqlite_path)?;
    store.init()?;
    let sim_id = store.create_simulation(name)?;
    log(
        Level::Info,
        Domain::System,
        "startup",
        obj(&[
            ("sim_id", v_str(&sim_id)),
            ("scenario", v_str(name)),
            ("log_run_id", v_str(log_run_id())),
            ("sqlite_path", v_str(&cfg.sqlite_path)),
            ("check_invariants", json!(cfg.check_invariants)),
        ]),
    );

    // Progress is read through a second connection while the run writes.
    let mut monitor = StateStore::new(&cfg.sqlite_path)?;
    let cancel = Arc::new(AtomicBool::new(false));

    let mut runner = Runner::from_config(store, cfg);
    let run_name = name.to_string();
    let run_id = sim_id.clone();
    let run_cancel = cancel.clone();
    let mut handle = tokio::task::spawn_blocking(move || runner.run(&run_name, &run_id, &run_cancel));

    let mut ticker = interval(Duration::from_millis(cfg.progress_poll_ms.max(1)));
    let mut last_block = None;
    let result = loop {
        tokio::select! {
            joined = &mut handle => break joined?,
            _ = tokio::signal::ctrl_c() => {
                if request_cancel(&cancel) {
                    // second signal: the blocking run may be mid-block, stop now
                    monitor.update_status(&sim_id, RunStatus::Interrupted)?;
                    log(
                        Level::Error,
                        Domain::System,
                        "forced_exit",
                        obj(&[("sim_id", v_str(&sim_id))]),
                    );
                    std::process::exit(130);
                }
                log(
                    Level::Warn,
                    Domain::System,
                    "cancel_requested",
                    obj(&[("sim_id", v_str(&sim_id)), ("msg", v_str("press Ctrl-C again to exit"))]),
                );
            }
            _ = ticker.tick() => {
                if let Some(progress) = monitor.get_progress(&sim_id)? {
                    if last_block != Some(progress.current_block) {
                        last_block = Some(progress.current_block);
                        eprintln!("[{}] {} {:>6.2}%", progress.status, progress.label(), progress.percentage);
                    }
                }
            }
        }
    };

    let summary = result?;
    if let Some(progress) = monitor.progress(&sim_id)? {
        eprintln!("[{}] {} {:>6.2}%", progress.status, progress.label(), progress.percentage);
    }
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn cmd_list(cfg: &Config) -> Result<()> {
    let mut store = StateStore::new(&cfg.sqlite_path)?;
    store.init()?;
    let runs = store.list_simulations(cfg.list_limit)?;
    if runs.is_empty() {
        println!("no simulations in {}", cfg.sqlite_path);
        return Ok(());
    }
    println!("{:<22} {:<14} {:<12} {:>12}  {}", "id", "scenario", "status", "progress", "created");
    for run in runs {
        let progress = format!("{}/{}", run.current_block, run.total_blocks.unwrap_or(0));
        println!(
            "{:<22} {:<14} {:<12} {:>12}  {}",
            run.id, run.name, run.status, progress, run.created_at
        );
    }
    Ok(())
}

fn cmd_show(cfg: &Config, sim_id: &str) -> Result<()> {
    let mut store = StateStore::new(&cfg.sqlite_path)?;
    store.init()?;
    let record = store
        .get_simulation(sim_id)?
        .ok_or_else(|| anyhow!("simulation {} not found", sim_id))?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}
