//! `binpick` – headless simulated pick-and-place run.
//!
//! 1. Loads `~/.binpick/config.toml`, writing the defaults on first run.
//! 2. Builds the simulation rig: a box in the source bin, three RGB-D
//!    cameras and a gantry arm.
//! 3. Runs the [`PickLoop`] on a blocking worker while bus events are
//!    printed as they arrive.
//! 4. Intercepts **Ctrl-C** to stop the loop after the current tick.

mod config;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use binpick_grasp::{AntipodalOracle, GraspSampler};
use binpick_hal::sim::SimRigBuilder;
use binpick_middleware::{BusVisualizer, EventBus, Topic, TopicReceiver};
use binpick_planner::TaskPlanner;
use binpick_runtime::{
    ColorSegmenter, GantryDiffIk, GantryOptimizer, PerceptionGraspSource, PickLoop, RunOutcome, RunSummary,
    init_tracing,
};
use binpick_types::EventPayload;
use colored::Colorize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, warn};

#[tokio::main]
async fn main() {
    let _telemetry = init_tracing("binpick");

    print_banner();

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping after the current tick …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; the run can only end on its own");
    }

    // ── Configuration ─────────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!("  Config loaded from {}", config::config_path().display().to_string().bold());
            cfg
        }
        Ok(None) => {
            let mut cfg = config::Config::default();
            match config::save(&cfg) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".red(), e),
            }
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };
    println!(
        "  Target {}  ·  {} grasp trials  ·  {:.0} s limit\n",
        format!("'{}'", cfg.perception.prompt).bold(),
        cfg.perception.sampler.trials,
        cfg.run.max_duration
    );

    // ── Rig and pipeline ──────────────────────────────────────────────────
    let bus = EventBus::default();
    let status = bus.subscribe_to(Topic::PlannerStatus);
    let alerts = bus.subscribe_to(Topic::SystemAlerts);

    let rig = SimRigBuilder::new().with_default_cameras().build();
    let sampler = GraspSampler::from_params(Arc::new(AntipodalOracle::default()), &cfg.perception.sampler);
    let grasps = PerceptionGraspSource::new(
        rig.cameras,
        Box::new(ColorSegmenter::default()),
        sampler,
        cfg.perception.clone(),
    )
    .with_visualizer(Arc::new(BusVisualizer::new(bus.clone(), "binpick-runtime::grasp_source")))
    .with_bus(bus.clone());
    let planner = TaskPlanner::new(cfg.planner.clone(), Box::new(GantryOptimizer::default()))
        .with_visualizer(Arc::new(BusVisualizer::new(bus.clone(), "binpick-planner::task")));
    let mut pick_loop = PickLoop::new(
        cfg.run,
        planner,
        Box::new(grasps),
        Box::new(GantryDiffIk::default()),
        Box::new(rig.arm),
        bus,
    );

    // The printers finish once the loop, and with it every bus handle, is dropped.
    let printers = [tokio::spawn(print_events(status)), tokio::spawn(print_events(alerts))];

    let worker = tokio::task::spawn_blocking(move || pick_loop.run(&shutdown));
    let summary = match worker.await {
        Ok(summary) => summary,
        Err(e) => {
            error!(error = %e, "pick loop worker panicked");
            std::process::exit(1);
        }
    };
    for printer in printers {
        if let Err(e) = printer.await {
            warn!(error = %e, "event printer stopped abnormally");
        }
    }

    let scene = rig.scene.lock().map(|s| s.clone()).unwrap_or_else(|p| p.into_inner().clone());
    print_summary(&summary, scene.in_source_bin());
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

async fn print_events(mut rx: TopicReceiver) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(n)) => {
                println!("  {}", format!("… {n} event(s) skipped").dimmed());
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        match event.payload {
            EventPayload::ModeChanged { from, to, at } => {
                println!(
                    "  {}  {} → {}",
                    format!("t={at:>6.1}s").dimmed(),
                    from.to_string().dimmed(),
                    to.to_string().bold().cyan()
                );
            }
            EventPayload::GraspSelected { cost, pose } => {
                let p = pose.translation.vector;
                println!(
                    "  {}  grasp cost {:.3} at ({:.3}, {:.3}, {:.3})",
                    "◆".magenta(),
                    cost,
                    p.x,
                    p.y,
                    p.z
                );
            }
            EventPayload::TaskFailed(e) => {
                println!("  {} {}", "✗".red().bold(), e.to_string().red());
            }
            EventPayload::Markers(_) => {}
        }
    }
}

fn print_summary(summary: &RunSummary, still_in_bin: bool) {
    println!();
    let verdict = match &summary.outcome {
        RunOutcome::TaskFailed(e) => format!("task ended: {e}").yellow(),
        RunOutcome::Fault(e) => format!("fault: {e}").red().bold(),
        RunOutcome::TimeLimit => "time limit reached".yellow(),
        RunOutcome::Interrupted => "interrupted".yellow(),
    };
    println!("  {} {}", "Run finished –".bold(), verdict);
    println!(
        "  {} ticks  ·  {:.1} s simulated  ·  {} plan(s)  ·  final mode {}",
        summary.ticks,
        summary.sim_time,
        summary.plans,
        summary.final_mode.to_string().bold()
    );
    if summary.overruns > 0 {
        println!("  {}", format!("{} tick(s) overran the tick period", summary.overruns).yellow());
    }
    if still_in_bin {
        println!("  Object is {}", "still in the source bin".yellow());
    } else {
        println!("  Object is {}", "out of the source bin".green().bold());
    }
    println!();
}

fn print_banner() {
    println!();
    println!("{}", "  ┌─────────────────────────────┐".bold().cyan());
    println!("{}", "  │   binpick · pick-and-place  │".bold().cyan());
    println!("{}", "  └─────────────────────────────┘".bold().cyan());
    println!("  {}", format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!();
}
