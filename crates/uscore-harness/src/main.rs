#![forbid(unsafe_code)]

//! Replay a history script and print one JSON report per step.
//!
//! # Running
//!
//! ```sh
//! cargo run -p uscore-harness -- scripts/sample.jsonl
//! cargo run -p uscore-harness -- scripts/sample.jsonl --config history.toml
//! RUST_LOG=uscore=debug cargo run -p uscore-harness -- scripts/sample.jsonl
//! ```
//!
//! Reports go to stdout, logs to stderr. A final summary line carries the
//! engine counters.

use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use uscore_harness::{Replay, load_script};

#[derive(Debug, Parser)]
#[command(
    name = "uscore-replay",
    about = "Replay a JSONL history script against the in-memory page",
    version
)]
struct Args {
    /// Script with one JSON step per line.
    script: PathBuf,

    /// TOML file with history settings.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_target(true)
                .compact(),
        )
        .try_init();
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let steps = load_script(&args.script)?;
    let mut replay = match &args.config {
        Some(path) => Replay::from_config_file(path)?,
        None => Replay::default(),
    };
    info!(script = %args.script.display(), steps = steps.len(), "replay started");

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for (n, step) in steps.iter().enumerate() {
        let report = replay.apply(n, step);
        if !report.accepted {
            warn!(step = n, op = report.op, "step not accepted");
        }
        serde_json::to_writer(&mut out, &report)?;
        writeln!(out)?;
    }

    let summary = serde_json::json!({
        "summary": replay.stats(),
        "page_hash": replay.page_hash(),
    });
    serde_json::to_writer(&mut out, &summary)?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("uscore-replay: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use clap::error::ErrorKind;

    #[test]
    fn script_and_config() {
        let parsed = Args::try_parse_from(["uscore-replay", "run.jsonl", "--config", "h.toml"])
            .expect("args");
        assert_eq!(parsed.script, PathBuf::from("run.jsonl"));
        assert_eq!(parsed.config, Some(PathBuf::from("h.toml")));

        let short = Args::try_parse_from(["uscore-replay", "-c", "h.toml", "run.jsonl"])
            .expect("args");
        assert_eq!(short.config, Some(PathBuf::from("h.toml")));
    }

    #[test]
    fn missing_script_is_usage_error() {
        let err = Args::try_parse_from(["uscore-replay"]).expect_err("no script");
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
        assert!(Args::try_parse_from(["uscore-replay", "a.jsonl", "--config"]).is_err());
        assert!(Args::try_parse_from(["uscore-replay", "a.jsonl", "b.jsonl"]).is_err());
    }

    #[test]
    fn command_definition_is_consistent() {
        Args::command().debug_assert();
    }
}
