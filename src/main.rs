use clap::{Parser, Subcommand};
use serde::Serialize;
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use sqlite_backup::backup::coordinator::{RunCoordinator, RunOptions};
use sqlite_backup::backup::job_config::Profile;
use sqlite_backup::backup::report::RunResult;
use sqlite_backup::backup::result_error::result::Result;
use std::path::PathBuf;
use std::process::exit;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, warn, Level};

/// Back up SQLite databases on an interval, keep the newest few, restore them
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct CommonArgs {
    /// Location of the YAML profile
    #[arg(short, long)]
    profile: PathBuf,

    /// Only log warnings and errors
    #[arg(short, long)]
    quiet: bool,

    /// Print the results as JSON instead of status lines
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Back up every due job of the profile, or only JOB
    Backup {
        #[command(flatten)]
        common: CommonArgs,

        /// Job to run, all jobs when absent
        job: Option<String>,

        /// Jobs to run at once
        #[arg(short = 'j', long, default_value_t = 1)]
        parallelism: usize,
    },
    /// Restore JOB's database from a snapshot
    Restore {
        #[command(flatten)]
        common: CommonArgs,

        job: String,

        /// Snapshot file name or stamp, the latest when absent
        #[arg(short, long)]
        snapshot: Option<String>,
    },
}

impl Command {
    fn common(&self) -> &CommonArgs {
        match self {
            Command::Backup { common, .. } | Command::Restore { common, .. } => common,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let level = if cli.command.common().quiet {
        Level::WARN
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let cancel = Arc::new(AtomicBool::new(false));
    watch_signals(cancel.clone());

    match run(&cli.command, cancel) {
        Ok(code) => exit(code),
        Err(e) => {
            error!("{e}");
            exit(1);
        }
    }
}

fn run(command: &Command, cancel: Arc<AtomicBool>) -> Result<i32> {
    let common = command.common();
    let profile = Profile::load(&common.profile)?;

    match command {
        Command::Backup {
            job, parallelism, ..
        } => {
            let options = RunOptions::builder()
                .parallelism(*parallelism)
                .cancel(cancel)
                .build();
            let report = RunCoordinator::new(options).run_backup(&profile, job.as_deref())?;
            emit(common, &report, report.results())?;
            Ok(report.exit_code())
        }
        Command::Restore { job, snapshot, .. } => {
            let options = RunOptions::builder().cancel(cancel).build();
            let result =
                RunCoordinator::new(options).run_restore(&profile, job, snapshot.as_deref())?;
            emit(common, &result, std::iter::once(&result))?;
            Ok(if result.is_failed() { 1 } else { 0 })
        }
    }
}

fn emit<'a, T: Serialize>(
    common: &CommonArgs,
    value: &T,
    results: impl Iterator<Item = &'a RunResult>,
) -> Result<()> {
    if common.json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        results.for_each(|result| println!("{result}"));
    }
    Ok(())
}

/// First SIGINT/SIGTERM stops new jobs from starting, a second one exits.
fn watch_signals(cancel: Arc<AtomicBool>) {
    std::thread::spawn(move || {
        let mut signals = match Signals::new([SIGINT, SIGTERM]) {
            Ok(signals) => signals,
            Err(e) => {
                warn!("Signal handler setup failed: {e}");
                return;
            }
        };
        for signal in signals.forever() {
            if cancel.swap(true, Ordering::SeqCst) {
                error!("Received signal {signal} again, exiting");
                exit(130);
            }
            warn!("Received signal {signal}, finishing running jobs");
        }
    });
}
