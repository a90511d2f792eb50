use std::{error::Error, path::PathBuf};

use calib_guide::io::SessionConfig;
use calib_guide::simulate::run_simulation;
use clap::{Parser, Subcommand};

/// Guided ChArUco camera calibration.
#[derive(Debug, Parser)]
#[command(author, version, about = "Guided ChArUco camera calibration")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON logs (requires the `tracing` feature).
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write a session config with default values.
    InitConfig {
        /// Destination path.
        #[arg(long, default_value = "calib_guide.json")]
        out: PathBuf,
    },
    /// Run a guided session against a synthetic camera and write the
    /// calibration record.
    Simulate {
        /// Session config; defaults are used if omitted.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override the record path from the config.
        #[arg(long)]
        out: Option<PathBuf>,
        /// Override the frame budget.
        #[arg(long)]
        max_frames: Option<usize>,
    },
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_logging(cli: &Cli) {
    #[cfg(feature = "tracing")]
    {
        calib_guide::core::init_tracing(cli.json_logs);
        let _ = tracing_log::LogTracer::init();
    }
    #[cfg(not(feature = "tracing"))]
    {
        if cli.json_logs {
            eprintln!("warning: --json-logs needs the `tracing` feature");
        }
        let _ = calib_guide::core::init_with_level(calib_guide::core::level_from_verbosity(
            cli.verbose,
        ));
    }
}

fn try_main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(&cli);

    match cli.command {
        Command::InitConfig { out } => {
            SessionConfig::default().write_json(&out)?;
            println!("wrote {}", out.display());
        }
        Command::Simulate {
            config,
            out,
            max_frames,
        } => {
            let mut cfg = match config {
                Some(path) => SessionConfig::load_json(path)?,
                None => SessionConfig::default(),
            };
            if let Some(max_frames) = max_frames {
                cfg.simulation.max_frames = max_frames;
            }
            let report = run_simulation(&cfg)?;
            let out = out.unwrap_or_else(|| cfg.output_path());
            report.record.write_json(&out)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            eprintln!("wrote {}", out.display());
        }
    }
    Ok(())
}
