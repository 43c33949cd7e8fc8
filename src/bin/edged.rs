//! edged - edge agent daemon
//!
//! This daemon:
//! 1. Loads configuration (file + environment)
//! 2. Opens the local outbox database
//! 3. Loads the remote camera list (fatal if required and unavailable)
//! 4. Runs detection, sync, and cleanup on one cooperative loop until Ctrl-C

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;

use edge_agent::{
    AgentConfig, FrameLayout, Scheduler, ShutdownFlag, SnapshotDetector, SqliteOutbox,
    UreqTransport,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (TOML, or JSON with a .json extension).
    #[arg(long, env = "EDGE_CONFIG")]
    config: Option<PathBuf>,
    /// Load and validate configuration, print it, and exit.
    #[arg(long)]
    check: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let cfg = AgentConfig::load_from(args.config.as_deref())?;
    if args.check {
        println!("{:#?}", cfg);
        return Ok(());
    }

    let store = SqliteOutbox::open(&cfg.db_path)
        .with_context(|| format!("open outbox {}", cfg.db_path))?;
    let transport = UreqTransport::new(cfg.http_timeout);
    let detector = SnapshotDetector::new(FrameLayout::new(&cfg.frame_root), cfg.http_timeout);

    let shutdown = ShutdownFlag::new();
    let handler_flag = shutdown.clone();
    ctrlc::set_handler(move || {
        log::warn!("stop signal received, finishing current tick...");
        handler_flag.trigger();
    })
    .context("error setting Ctrl-C handler")?;

    let mut scheduler = Scheduler::new(
        &cfg,
        Box::new(store),
        Box::new(transport),
        Box::new(detector),
        shutdown,
    );

    let cameras = match scheduler.start() {
        Ok(cameras) => cameras,
        Err(e) if e.is_fatal() => return Err(anyhow!("startup aborted: {}", e)),
        Err(e) => {
            log::warn!("startup: camera load failed ({:?}): {}", e.class(), e);
            scheduler.cameras().len()
        }
    };
    log::info!(
        "edged running. outbox={} frames={} cameras={}",
        cfg.db_path,
        cfg.frame_root.display(),
        cameras
    );

    scheduler.run()?;
    log::info!("edged exiting");
    Ok(())
}
