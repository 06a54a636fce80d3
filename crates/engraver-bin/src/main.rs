//! Engraver entrypoint.
//!
//! Wires the long-lived components together — configuration, controller
//! link + monitor, orchestrator — and parks the main thread in the
//! orchestration loop. External collaborators (subscriber monitor, web
//! surface) attach through the engine's enqueue handle and query surface;
//! none of them are started here.

use std::path::PathBuf;
use std::sync::Once;

use anyhow::Result;
use clap::Parser;
use core_engine::{Engine, connection_settings};
use core_events::{EnqueueRequest, NoopOverlayHooks};
use core_stream::{LaserController, monitor};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "engraver", version, about = "GRBL/FluidNC text engraver")]
struct Args {
    /// Configuration file path (overrides discovery of `engraver.toml`).
    #[arg(long = "config")]
    config: Option<PathBuf>,
    /// Directory for persistent state (jobs, placements, artifacts).
    #[arg(long = "data-dir", default_value = "data")]
    data_dir: PathBuf,
    /// Queue a test string at startup.
    #[arg(long = "engrave")]
    engrave: Option<String>,
}

fn configure_logging() -> Option<WorkerGuard> {
    let file_appender = tracing_appender::rolling::never(".", "engraver.log");
    let (writer, guard) = tracing_appender::non_blocking(file_appender);
    match tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
    {
        Ok(()) => Some(guard),
        Err(_) => None, // subscriber already installed (tests)
    }
}

fn install_panic_hook() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            tracing::error!(target: "runtime", panic = %info, "panic");
            previous(info);
        }));
    });
}

fn main() -> Result<()> {
    let _log_guard = configure_logging();
    install_panic_hook();
    let args = Args::parse();

    info!(target: "runtime", "startup");
    let config = core_config::load_from(args.config.clone())?;

    // Controller link first: the monitor owns reconnection from here on.
    let controller = LaserController::new(connection_settings(&config));
    if let Err(err) = controller.connect() {
        warn!(target: "runtime", error = %err, "controller_offline_at_startup");
    }
    let monitor = monitor::spawn(controller.clone());

    std::fs::create_dir_all(&args.data_dir)?;
    let engine = Engine::new(
        config,
        &args.data_dir,
        controller,
        Box::new(NoopOverlayHooks),
    )?;

    if let Some(name) = &args.engrave {
        engine
            .enqueue_handle()
            .send(EnqueueRequest::new(name.clone(), "manual"))
            .ok();
        info!(target: "runtime", name = %name, "test_job_enqueued");
    }

    // The orchestrator owns the main thread until the process is killed;
    // interrupted jobs are demoted to `stopped` on the next startup.
    let (_shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
    engine.run(&shutdown_rx);

    monitor.shutdown();
    Ok(())
}
