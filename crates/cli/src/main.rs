//! Directory MESI coherence simulator CLI.
//!
//! This binary provides the entry points for running the simulator. It performs:
//! 1. **Workload run:** Load a JSON config and access trace, run to quiescence, report.
//! 2. **Reference scenario:** Replay the three-reader trace on block `0x100` with two sharer slots.
//!
//! Logging goes through `tracing`; set `RUST_LOG` (for example
//! `RUST_LOG=coherence_core=debug`) or pass `--log`.

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use coherence_core::config::Config;
use coherence_core::sim::node::Observation;
use coherence_core::sim::workload::Workload;
use coherence_core::sim::{DirectoryEntryView, System};
use coherence_core::stats::SimStats;

#[derive(Parser, Debug)]
#[command(
    name = "cohsim",
    author,
    version,
    about = "Directory MESI coherence simulator",
    long_about = "Run access traces against a directory-based MESI coherence protocol.\n\nExamples:\n  cohsim run --trace workload.json\n  cohsim run --config system.json --trace workload.json --json\n  cohsim scenario"
)]
struct Cli {
    /// Log filter used when RUST_LOG is unset (e.g. "info", "coherence_core=trace").
    #[arg(long, global = true, default_value = "warn")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a workload trace to quiescence.
    Run {
        /// JSON configuration; built-in defaults when omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// JSON workload trace.
        #[arg(short, long)]
        trace: PathBuf,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,

        /// Statistics sections to print (summary, directory, nodes); all when omitted.
        #[arg(long, value_delimiter = ',')]
        sections: Vec<String>,
    },

    /// Replay the reference trace: nodes 3, 7, and 4 read block 0x100.
    Scenario {
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
}

/// Everything a run reports.
#[derive(Serialize)]
struct Report {
    stats: SimStats,
    directory: Vec<DirectoryEntryView>,
    observations: Vec<Observation>,
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log);

    let result = match cli.command {
        Commands::Run {
            config,
            trace,
            json,
            sections,
        } => cmd_run(config, &trace, json, &sections),
        Commands::Scenario { json } => cmd_scenario(json),
    };

    if let Err(msg) = result {
        eprintln!("error: {msg}");
        process::exit(1);
    }
}

fn init_logging(default: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Loads config and workload, runs the workload, and prints the report.
fn cmd_run(
    config: Option<PathBuf>,
    trace: &Path,
    json: bool,
    sections: &[String],
) -> Result<(), String> {
    let config = match config {
        Some(path) => Config::from_file(&path).map_err(|e| e.to_string())?,
        None => Config::default(),
    };
    let workload = Workload::from_file(trace).map_err(|e| e.to_string())?;
    info!(
        trace = %trace.display(),
        ops = workload.ops.len(),
        nodes = config.node.count,
        sequential = workload.sequential,
        "running workload"
    );

    let mut system = System::new(&config).map_err(|e| e.to_string())?;
    let cycles = system.run(&workload).map_err(|e| e.to_string())?;
    if let Err(e) = system.check_coherence() {
        warn!(%e, "coherence check failed");
        return Err(e.to_string());
    }
    info!(cycles, "workload finished coherent");
    report(&system, json, sections)
}

/// Replays the reference trace with two sharer slots and eight nodes.
fn cmd_scenario(json: bool) -> Result<(), String> {
    let mut config = Config::default();
    config.protocol.num_sharers_bits = 1;
    config.node.count = 8;

    info!(
        sharer_slots = config.protocol.sharer_slots(),
        "replaying reference scenario"
    );
    let mut system = System::new(&config).map_err(|e| e.to_string())?;
    let cycles = system
        .run(&Workload::reference_scenario())
        .map_err(|e| e.to_string())?;
    info!(cycles, "scenario finished");
    system.check_coherence().map_err(|e| e.to_string())?;
    report(&system, json, &[])
}

fn report(system: &System, json: bool, sections: &[String]) -> Result<(), String> {
    let report = Report {
        stats: system.stats(),
        directory: system.directory_snapshot(),
        observations: system.observations(),
    };

    if json {
        let text = serde_json::to_string_pretty(&report).map_err(|e| e.to_string())?;
        println!("{text}");
        return Ok(());
    }

    println!("DIRECTORY ({} entries)", report.directory.len());
    for entry in &report.directory {
        let sharers: Vec<String> = entry.sharers.iter().map(ToString::to_string).collect();
        println!(
            "  {:<12} {}  [{}]",
            entry.addr.to_string(),
            entry.class.letter(),
            sharers.join(", ")
        );
    }
    println!("READS");
    for obs in &report.observations {
        println!(
            "  cycle {:>6}  {} read {} = {:#x}",
            obs.cycle, obs.node, obs.addr, obs.value
        );
    }
    report.stats.print_sections(sections);
    Ok(())
}
