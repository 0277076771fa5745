//! backup_manager CLI
//!
//! Builds one store per invocation from the global options and dispatches
//! to the engines. Reports go to stdout, logs to stderr.

use backup_manager::config::{CliArgs, Commands, LogFormat, OutputFormat};
use backup_manager::core::{list_versions, print_versions, BackupEngine, Pruner, RestoreEngine, Verifier};
use backup_manager::error::{BackupError, Result};
use backup_manager::progress::ProgressReporter;
use backup_manager::storage::{DatasetStore, LocalStore, RemoteStore, RetryingStore};
use clap::Parser;
use serde::Serialize;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() {
    let args = CliArgs::parse();
    init_logging(&args);

    match run(&args) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::debug!("{:?}", e);
            eprintln!("Error: {}", e);
            let failed = FailedRun::new(&args.command, &e);
            // Best effort: the error itself is already on stderr
            let _ = emit(args.output_format, &failed, || failed.print_summary());
            std::process::exit(failed.exit_code);
        }
    }
}

/// Summary for a run that stopped before producing its own report
#[derive(Serialize)]
struct FailedRun<'a> {
    command: &'static str,
    dataset: &'a str,
    error: String,
    exit_code: i32,
}

impl<'a> FailedRun<'a> {
    fn new(command: &'a Commands, error: &BackupError) -> Self {
        let name = match command {
            Commands::Backup { .. } => "backup",
            Commands::Restore { .. } => "restore",
            Commands::Verify { .. } => "verify",
            Commands::List { .. } => "list",
            Commands::Prune { .. } => "prune",
        };
        Self {
            command: name,
            dataset: command.dataset(),
            error: error.to_string(),
            exit_code: error.exit_code(),
        }
    }

    fn print_summary(&self) {
        println!("\n=== {} failed ===", self.command);
        println!("Dataset:         {}", self.dataset);
        println!("Error:           {}", self.error);
        println!("Exit code:       {}", self.exit_code);
    }
}

fn init_logging(args: &CliArgs) {
    let level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    match args.log_format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn run(args: &CliArgs) -> Result<i32> {
    let store = open_dataset(args)?;
    tracing::info!("Using {} for dataset {}", store.describe(), store.dataset());

    match &args.command {
        Commands::Backup { root, .. } => {
            let mut engine = BackupEngine::new(store, args.backup_config().unwrap_or_default());
            if let Some(progress) = progress(args) {
                engine = engine.with_progress(progress);
            }
            let report = engine.run(root)?;
            emit(args.output_format, &report, || report.print_summary())?;
            Ok(report.exit_code())
        }
        Commands::Restore { root, .. } => {
            let mut engine = RestoreEngine::new(store, args.restore_config().unwrap_or_default());
            if let Some(progress) = progress(args) {
                engine = engine.with_progress(progress);
            }
            let report = engine.run(root)?;
            emit(args.output_format, &report, || report.print_summary())?;
            Ok(report.exit_code())
        }
        Commands::Verify { root, .. } => {
            let verifier = Verifier::new(store, args.verify_scan_config().unwrap_or_default());
            let report = verifier.verify(root)?;
            emit(args.output_format, &report, || report.print_summary())?;
            Ok(report.exit_code())
        }
        Commands::List { dataset } => {
            let versions = list_versions(&store)?;
            emit(args.output_format, &versions, || print_versions(dataset, &versions))?;
            Ok(0)
        }
        Commands::Prune { .. } => {
            let pruner = Pruner::new(store, args.prune_config().unwrap_or_default())?;
            let report = pruner.prune()?;
            emit(args.output_format, &report, || report.print_summary())?;
            Ok(report.exit_code())
        }
    }
}

/// Open the dataset on the store selected by the global options
fn open_dataset(args: &CliArgs) -> Result<DatasetStore> {
    let inner = open_store(args)?;
    let remote: Arc<dyn RemoteStore> = Arc::new(RetryingStore::new(inner, args.retry_policy()));
    DatasetStore::new(remote, args.prefix.as_deref(), args.command.dataset())
}

fn open_store(args: &CliArgs) -> Result<Box<dyn RemoteStore>> {
    if let Some(dir) = &args.store_dir {
        let local = LocalStore::new(dir)
            .map_err(|e| BackupError::config(format!("Cannot open store directory: {}", e)))?;
        return Ok(Box::new(local));
    }
    open_s3(args)
}

#[cfg(feature = "native_s3")]
fn open_s3(args: &CliArgs) -> Result<Box<dyn RemoteStore>> {
    use backup_manager::storage::{S3Config, S3Store};

    let config = S3Config {
        region: args.region.clone(),
        endpoint: args.endpoint.clone(),
        bucket: args.bucket.clone().unwrap_or_default(),
        path_style: args.path_style,
        ..S3Config::from_env()
    };
    let s3 = S3Store::new(config).map_err(|e| BackupError::config(e.to_string()))?;
    Ok(Box::new(s3))
}

#[cfg(not(feature = "native_s3"))]
fn open_s3(_args: &CliArgs) -> Result<Box<dyn RemoteStore>> {
    Err(BackupError::config(
        "built without S3 support (enable the native_s3 feature or pass --store-dir)",
    ))
}

fn progress(args: &CliArgs) -> Option<ProgressReporter> {
    (args.progress && !args.quiet).then(ProgressReporter::new)
}

/// Print a report as text or JSON
fn emit<T: Serialize>(format: OutputFormat, report: &T, print_text: impl FnOnce()) -> Result<()> {
    match format {
        OutputFormat::Text => print_text(),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
    }
    Ok(())
}
