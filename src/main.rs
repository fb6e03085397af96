mod bridge;
mod cli;
mod error;
mod gpio;
mod midi;
mod monitor;
mod notes;
mod seq_boot;

use anyhow::{Context, Result, ensure};
use bridge::{Bridge, Exit};
use clap::Parser;
use env_logger::Target;
use signal_hook::consts::{SIGINT, SIGTERM};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use crate::cli::{Args, Config};
use crate::gpio::OutputSet;
use crate::monitor::Resolver;
use crate::seq_boot::{AlsaSequencer, Sequencer};

fn main() -> ExitCode {
    let cfg = match Args::try_parse() {
        Ok(args) => Config::from(args),
        Err(e) => {
            e.print().ok();
            return ExitCode::from(cli::exit_status(&e));
        }
    };

    env_logger::Builder::new()
        .filter_level(cfg.log_level())
        .target(Target::Stdout)
        .init();

    match run(&cfg) {
        Ok(Exit::Shutdown) => {
            log::info!("shutdown complete");
            ExitCode::SUCCESS
        }
        Ok(Exit::TransportFailed(e)) => {
            eprintln!("midi2gpio: event transport failed: {e}");
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("midi2gpio: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cfg: &Config) -> Result<Exit> {
    ensure!(
        cfg.notes.line_count() <= cfg.lines.len(),
        "note table drives {} lines but only {} are configured",
        cfg.notes.line_count(),
        cfg.lines.len()
    );

    // SIGINT/SIGTERM raise the flag, then poke the sequencer's wakeup pipe;
    // the loop notices the flag between batches.
    let stop = Arc::new(AtomicBool::new(false));
    for sig in [SIGINT, SIGTERM] {
        signal_hook::flag::register(sig, Arc::clone(&stop))
            .with_context(|| format!("install handler for signal {sig}"))?;
    }

    let mut seq = AlsaSequencer::open().context("ALSA sequencer setup failed")?;
    seq.wake_on(&[SIGINT, SIGTERM])
        .context("install signal wakeup")?;
    log::info!("🖖 Listening as {} for '{}'", seq.local(), cfg.portspec);

    let outputs = OutputSet::open(&cfg.chip, &cfg.lines).context("GPIO configuration failed")?;

    let mut bridge = Bridge::new(
        seq,
        outputs,
        cfg.notes.clone(),
        Resolver::new(cfg.portspec.clone()),
        stop,
    );
    bridge
        .start()
        .context("subscribing to system announcements failed")?;
    Ok(bridge.run())
}
