//! fleetscrape command line.
//!
//! # Usage
//!
//! ```bash
//! fleetscrape backup
//! fleetscrape --config lab.toml -j 8 logs
//! fleetscrape mac-table --locations interface_location.csv
//! ```
//!
//! Inventory (`iplist.txt`) and credentials (`credentials.txt`) are read
//! before any device is contacted; a problem with either aborts the run.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use fleetscrape::artifact::{ArtifactWriter, log_body};
use fleetscrape::fleet::FleetReport;
use fleetscrape::inventory::{load_credentials, load_inventory};
use fleetscrape::mac_table::{self, LocationMap, MAC_DIR};
use fleetscrape::runner::MAC_TABLE_COMMAND;
use fleetscrape::summarize::{ChatCompletionsSummarizer, Summarizer};
use fleetscrape::{
    FleetDispatcher, ProfileRegistry, RunOutcome, RunResult, Settings, SshConnector, Workflow,
};
use log::{info, warn};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[command(name = "fleetscrape", version, about = "Collect state from a fleet of switches over SSH")]
struct Cli {
    /// Settings file (missing file means defaults)
    #[arg(short, long, default_value = "fleetscrape.toml")]
    config: PathBuf,

    /// Inventory file, one address per line
    #[arg(long)]
    inventory: Option<PathBuf>,

    /// Credentials file, username then password
    #[arg(long)]
    credentials: Option<PathBuf>,

    /// Root directory for artifacts
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Maximum concurrent sessions (default: one per device)
    #[arg(short = 'j', long)]
    concurrency: Option<usize>,

    /// Overall deadline in seconds
    #[arg(long)]
    deadline: Option<u64>,

    #[command(subcommand)]
    workflow: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Save version, inventory, interfaces and running-config per device
    Backup,

    /// Capture device logs and save an AI analysis per device
    Logs,

    /// Build the MAC-to-location table
    MacTable {
        /// Interface location map (Device_name,interface,location)
        #[arg(long)]
        locations: Option<PathBuf>,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Backup => "config backup",
            Command::Logs => "log capture",
            Command::MacTable { .. } => "MAC table",
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let mut settings = Settings::load_or_default(&cli.config)?;
    if let Some(path) = cli.inventory {
        settings.paths.inventory = path;
    }
    if let Some(path) = cli.credentials {
        settings.paths.credentials = path;
    }
    if let Some(dir) = cli.output_dir {
        settings.paths.output_dir = dir;
    }
    if cli.concurrency.is_some() {
        settings.fleet.concurrency = cli.concurrency;
    }
    if cli.deadline.is_some() {
        settings.fleet.deadline_secs = cli.deadline;
    }

    // Everything fatal happens before the first connection.
    let credentials = Arc::new(load_credentials(&settings.paths.credentials)?);
    let devices = load_inventory(&settings.paths.inventory, credentials)?;
    let profile = ProfileRegistry::builtin()?.resolve(
        &settings.profile.platform,
        settings.profile.prompt_pattern.as_deref(),
    )?;

    let workflow = match &cli.workflow {
        Command::Backup => Workflow::config_backup(),
        Command::Logs => Workflow::log_capture(),
        Command::MacTable { .. } => Workflow::mac_table(),
    };
    let summarizer = match &cli.workflow {
        Command::Logs => Some(ChatCompletionsSummarizer::from_settings(&settings.summarizer)?),
        _ => None,
    };
    let locations = match &cli.workflow {
        Command::MacTable { locations } => Some(LocationMap::load(
            locations
                .as_deref()
                .unwrap_or(settings.paths.interface_locations.as_path()),
        )?),
        _ => None,
    };

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, closing sessions");
            on_interrupt.cancel();
        }
    });

    let mut dispatcher = FleetDispatcher::new(
        SshConnector::new(settings.ssh_options()),
        Arc::new(profile),
        Arc::new(settings.runner_settings()),
    )
    .with_cancellation(cancel);
    if let Some(deadline) = settings.deadline() {
        dispatcher = dispatcher.with_deadline(deadline);
    }

    info!(
        "running {} on {} device(s) as {}",
        cli.workflow.name(),
        devices.len(),
        settings.profile.platform
    );
    let report = dispatcher
        .run_all(&devices, &workflow, settings.fleet.concurrency)
        .await;

    let writer = ArtifactWriter::today(&settings.paths.output_dir);
    let mut artifact_errors = Vec::new();

    if let Some(summarizer) = &summarizer {
        for result in report.iter() {
            match log_body(result) {
                Some(log) => {
                    let saved = match summarizer.summarize(result.label(), log).await {
                        Ok(summary) => writer.write_log_analysis(result, log, &summary).map(drop),
                        Err(e) => Err(e),
                    };
                    if let Err(e) = saved {
                        artifact_errors.push((result.device.to_string(), e));
                    }
                }
                None if result.outcome.is_completed() => {
                    warn!("{}: no log content returned", result.device);
                }
                None => {}
            }
        }
    } else if let Some(locations) = &locations {
        let checked_at = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let records: Vec<_> = report
            .iter()
            .filter_map(|result| result.output(MAC_TABLE_COMMAND).map(|o| (result, o)))
            .flat_map(|(result, output)| {
                mac_table::parse_mac_table(result.label(), &output.result, locations, &checked_at)
            })
            .collect();

        if records.is_empty() {
            warn!("no MAC records were extracted");
        } else {
            let path = writer
                .root()
                .join(MAC_DIR)
                .join(format!("Check_location_{}.csv", writer.date_stamp()));
            match mac_table::append_csv(&path, &records) {
                Ok(()) => info!("{} MAC record(s) saved to {}", records.len(), path.display()),
                Err(e) => artifact_errors.push((path.display().to_string(), e)),
            }
        }
    } else {
        for result in report.iter().filter(|r| !r.outputs.is_empty()) {
            if let Err(e) = writer.write_config_dump(result) {
                artifact_errors.push((result.device.to_string(), e));
            }
        }
    }

    print_report(&report);
    for (target, e) in &artifact_errors {
        println!("artifact error for {}: {} ({})", target, e, e.kind());
    }
    Ok(())
}

fn print_report(report: &FleetReport) {
    println!();
    for result in report.iter() {
        println!("{}", report_line(result));
        for warning in &result.warnings {
            println!("    warning: {}", warning);
        }
    }
    println!("\n{} device(s): {}", report.len(), report.summary());
}

fn report_line(result: &RunResult) -> String {
    let status = match &result.outcome {
        RunOutcome::Completed => "OK".to_string(),
        RunOutcome::Failed(failure) => format!("FAILED {} - {}", failure.kind, failure.message),
        RunOutcome::Cancelled => "CANCELLED".to_string(),
    };
    format!(
        "{:<24} {:<40} {} ({:.1}s)",
        result.label(),
        result.device.address(),
        status,
        result.elapsed.as_secs_f64()
    )
}
