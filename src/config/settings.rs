//! Configuration settings for backup_manager
//!
//! Defines the CLI surface, environment fallbacks and the runtime
//! configuration structs handed to the engines.

use crate::fs::ScanConfig;
use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// backup_manager - content-addressed backups of a directory tree to object storage
#[derive(Parser, Debug, Clone)]
#[command(name = "backup_manager")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Back up, verify and restore a directory tree against S3-compatible storage")]
#[command(long_about = r#"
backup_manager stores a directory tree as content-addressed blobs plus a
manifest per dataset. Unchanged content is never uploaded twice.

Examples:
  backup_manager backup /data knowledge --verify
  backup_manager backup /data knowledge --keep 5
  backup_manager restore /data knowledge
  backup_manager verify /data knowledge
  backup_manager prune knowledge --keep 3
"#)]
pub struct CliArgs {
    /// Target bucket
    #[arg(long, env = "AWS_BUCKET_NAME", global = true, value_name = "BUCKET")]
    pub bucket: Option<String>,

    /// AWS region
    #[arg(long, env = "AWS_REGION", default_value = "us-east-1", global = true)]
    pub region: String,

    /// Custom endpoint URL (MinIO, Ceph, ...)
    #[arg(long, env = "AWS_ENDPOINT_URL", global = true, value_name = "URL")]
    pub endpoint: Option<String>,

    /// Use path-style bucket addressing
    #[arg(long, env = "S3_PATH_STYLE", global = true)]
    pub path_style: bool,

    /// Key prefix inside the bucket or store directory
    #[arg(long, env = "BACKUP_PREFIX", global = true, value_name = "PREFIX")]
    pub prefix: Option<String>,

    /// Use a local directory as the object store instead of S3
    #[arg(long, env = "BACKUP_STORE_DIR", global = true, value_name = "PATH")]
    pub store_dir: Option<PathBuf>,

    /// Number of worker threads (0 = auto-detect)
    #[arg(short = 't', long, default_value = "0", global = true, value_name = "NUM")]
    pub threads: usize,

    /// Attempt ceiling for remote operations
    #[arg(long, default_value = "5", global = true, value_name = "NUM")]
    pub retries: u32,

    /// Initial retry delay in milliseconds (doubles per attempt)
    #[arg(long, default_value = "200", global = true, value_name = "MS")]
    pub retry_delay_ms: u64,

    /// Digest algorithm for new manifests
    #[arg(long = "hash", value_enum, default_value = "blake3", global = true)]
    pub hash: HashAlgorithm,

    /// Show progress bars
    #[arg(short = 'p', long, global = true)]
    pub progress: bool,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (only errors are logged)
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Output format for reports
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub output_format: OutputFormat,

    /// Log line format
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Command to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Upload changed content and commit a new manifest
    Backup {
        /// Directory to back up
        root: PathBuf,
        /// Dataset name
        dataset: String,
        /// Compare against the last manifest before uploading
        #[arg(long)]
        verify: bool,
        /// With --verify, stop when files were removed since the last backup
        #[arg(long, requires = "verify")]
        block_on_removals: bool,
        /// Show what would be uploaded without writing anything
        #[arg(short = 'n', long)]
        dry_run: bool,
        /// Compress blobs with zstd
        #[arg(short = 'c', long)]
        compress: bool,
        /// zstd compression level
        #[arg(long, default_value = "3", value_name = "LEVEL")]
        compress_level: i32,
        /// Glob pattern to exclude (repeatable)
        #[arg(long, value_name = "PATTERN")]
        exclude: Vec<String>,
        /// After committing, keep only the newest N versions
        #[arg(long, value_name = "N", value_parser = parse_keep)]
        keep: Option<usize>,
    },

    /// Materialize the committed manifest into a directory
    Restore {
        /// Directory to restore into
        root: PathBuf,
        /// Dataset name
        dataset: String,
        /// Delete local files that are not in the manifest
        #[arg(long)]
        mirror: bool,
        /// Restore a retained manifest version instead of the current one
        #[arg(long, value_name = "ID")]
        version: Option<String>,
        /// Rename an existing root to <root>_snapshot_<timestamp> first
        #[arg(long, conflicts_with = "mirror")]
        snapshot_existing: bool,
    },

    /// Report drift between a directory and the committed manifest
    Verify {
        /// Directory to check
        root: PathBuf,
        /// Dataset name
        dataset: String,
        /// Glob pattern to exclude (repeatable)
        #[arg(long, value_name = "PATTERN")]
        exclude: Vec<String>,
    },

    /// List retained manifest versions
    List {
        /// Dataset name
        dataset: String,
    },

    /// Delete old manifest versions and unreferenced blobs
    Prune {
        /// Dataset name
        dataset: String,
        /// Number of versions to keep
        #[arg(long, default_value = "3", value_name = "NUM")]
        keep: usize,
        /// Show what would be deleted without deleting
        #[arg(short = 'n', long)]
        dry_run: bool,
    },
}

impl Commands {
    /// Dataset the command operates on
    pub fn dataset(&self) -> &str {
        match self {
            Self::Backup { dataset, .. }
            | Self::Restore { dataset, .. }
            | Self::Verify { dataset, .. }
            | Self::List { dataset }
            | Self::Prune { dataset, .. } => dataset,
        }
    }
}

/// Digest algorithm
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// BLAKE3 - fast and cryptographically secure
    #[default]
    #[value(name = "blake3")]
    Blake3,
    /// SHA-256 - standard cryptographic hash
    #[value(name = "sha256")]
    Sha256,
}

impl HashAlgorithm {
    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Blake3 => "BLAKE3",
            Self::Sha256 => "SHA-256",
        }
    }
}

/// How blob bodies are encoded in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Stored as is
    #[default]
    None,
    /// zstd frame
    Zstd,
}

/// What a `--verify` pre-check does with the drift it finds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerifyPolicy {
    /// Log the report and continue
    #[default]
    Advisory,
    /// Stop before uploading when the remote has paths missing locally
    BlockOnRemovals,
}

/// Output format for reports
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON format
    Json,
}

/// Log line format
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable text
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Backup engine configuration
#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// Worker threads (0 = auto-detect)
    pub threads: usize,
    /// Digest algorithm
    pub algorithm: HashAlgorithm,
    /// Run the verifier before uploading
    pub verify: bool,
    /// What to do with pre-check drift
    pub verify_policy: VerifyPolicy,
    /// Plan only
    pub dry_run: bool,
    /// Blob encoding
    pub compression: Compression,
    /// zstd level when compressing
    pub compression_level: i32,
    /// Exclude patterns
    pub exclude_patterns: Vec<String>,
    /// Versions to retain after a successful commit
    pub keep: Option<usize>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            algorithm: HashAlgorithm::Blake3,
            verify: false,
            verify_policy: VerifyPolicy::Advisory,
            dry_run: false,
            compression: Compression::None,
            compression_level: 3,
            exclude_patterns: Vec::new(),
            keep: None,
        }
    }
}

impl BackupConfig {
    /// Scanner configuration for this backup
    pub fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            threads: self.threads,
            algorithm: self.algorithm,
            exclude_patterns: self.exclude_patterns.clone(),
            ..Default::default()
        }
    }
}

/// Restore engine configuration
#[derive(Debug, Clone, Default)]
pub struct RestoreConfig {
    /// Worker threads (0 = auto-detect)
    pub threads: usize,
    /// Delete local files absent from the manifest
    pub mirror: bool,
    /// Retained version to restore instead of the current manifest
    pub version: Option<String>,
    /// Rename an existing root before restoring
    pub snapshot_existing: bool,
}

/// Retention configuration
#[derive(Debug, Clone)]
pub struct PruneConfig {
    /// Versions to keep
    pub keep: usize,
    /// Plan only
    pub dry_run: bool,
}

impl Default for PruneConfig {
    fn default() -> Self {
        Self {
            keep: 3,
            dry_run: false,
        }
    }
}

fn parse_keep(value: &str) -> std::result::Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(keep) => Ok(keep),
        Err(e) => Err(e.to_string()),
    }
}

/// Resolve a thread count, 0 meaning one per CPU
pub fn effective_threads(threads: usize) -> usize {
    if threads == 0 {
        num_cpus::get()
    } else {
        threads
    }
}

impl CliArgs {
    /// Retry schedule from the global options
    pub fn retry_policy(&self) -> crate::storage::RetryPolicy {
        crate::storage::RetryPolicy {
            max_attempts: self.retries.max(1),
            initial_delay: Duration::from_millis(self.retry_delay_ms),
            ..Default::default()
        }
    }

    /// Backup configuration, if the command is `backup`
    pub fn backup_config(&self) -> Option<BackupConfig> {
        match &self.command {
            Commands::Backup {
                verify,
                block_on_removals,
                dry_run,
                compress,
                compress_level,
                exclude,
                keep,
                ..
            } => Some(BackupConfig {
                threads: self.threads,
                algorithm: self.hash,
                verify: *verify,
                verify_policy: if *block_on_removals {
                    VerifyPolicy::BlockOnRemovals
                } else {
                    VerifyPolicy::Advisory
                },
                dry_run: *dry_run,
                compression: if *compress {
                    Compression::Zstd
                } else {
                    Compression::None
                },
                compression_level: *compress_level,
                exclude_patterns: exclude.clone(),
                keep: *keep,
            }),
            _ => None,
        }
    }

    /// Restore configuration, if the command is `restore`
    pub fn restore_config(&self) -> Option<RestoreConfig> {
        match &self.command {
            Commands::Restore {
                mirror,
                version,
                snapshot_existing,
                ..
            } => Some(RestoreConfig {
                threads: self.threads,
                mirror: *mirror,
                version: version.clone(),
                snapshot_existing: *snapshot_existing,
            }),
            _ => None,
        }
    }

    /// Scanner configuration for `verify`
    pub fn verify_scan_config(&self) -> Option<ScanConfig> {
        match &self.command {
            Commands::Verify { exclude, .. } => Some(ScanConfig {
                threads: self.threads,
                algorithm: self.hash,
                exclude_patterns: exclude.clone(),
                ..Default::default()
            }),
            _ => None,
        }
    }

    /// Retention configuration, if the command is `prune`
    pub fn prune_config(&self) -> Option<PruneConfig> {
        match &self.command {
            Commands::Prune { keep, dry_run, .. } => Some(PruneConfig {
                keep: *keep,
                dry_run: *dry_run,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_backup_command() {
        let args = CliArgs::try_parse_from([
            "backup_manager",
            "backup",
            "/data",
            "knowledge",
            "--verify",
            "--exclude",
            "*.tmp",
        ])
        .unwrap();

        assert_eq!(args.command.dataset(), "knowledge");
        let config = args.backup_config().unwrap();
        assert!(config.verify);
        assert_eq!(config.verify_policy, VerifyPolicy::Advisory);
        assert_eq!(config.compression, Compression::None);
        assert_eq!(config.exclude_patterns, vec!["*.tmp".to_string()]);
        assert!(args.restore_config().is_none());
    }

    #[test]
    fn test_backup_keep() {
        let args =
            CliArgs::try_parse_from(["backup_manager", "backup", "/data", "knowledge", "--keep", "2"]).unwrap();
        assert_eq!(args.backup_config().unwrap().keep, Some(2));

        let args = CliArgs::try_parse_from(["backup_manager", "backup", "/data", "knowledge"]).unwrap();
        assert_eq!(args.backup_config().unwrap().keep, None);

        let zero = CliArgs::try_parse_from(["backup_manager", "backup", "/data", "knowledge", "--keep", "0"]);
        assert!(zero.is_err());
    }

    #[test]
    fn test_block_on_removals_requires_verify() {
        let result = CliArgs::try_parse_from([
            "backup_manager",
            "backup",
            "/data",
            "knowledge",
            "--block-on-removals",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_restore_command() {
        let args = CliArgs::try_parse_from([
            "backup_manager",
            "--store-dir",
            "/tmp/store",
            "restore",
            "/data",
            "knowledge",
            "--mirror",
        ])
        .unwrap();

        let config = args.restore_config().unwrap();
        assert!(config.mirror);
        assert!(!config.snapshot_existing);
        assert_eq!(args.store_dir, Some(PathBuf::from("/tmp/store")));
    }

    #[test]
    fn test_mirror_conflicts_with_snapshot() {
        let result = CliArgs::try_parse_from([
            "backup_manager",
            "restore",
            "/data",
            "knowledge",
            "--mirror",
            "--snapshot-existing",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_retry_policy_from_args() {
        let args = CliArgs::try_parse_from([
            "backup_manager",
            "--retries",
            "0",
            "--retry-delay-ms",
            "50",
            "list",
            "knowledge",
        ])
        .unwrap();
        let policy = args.retry_policy();
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.initial_delay, Duration::from_millis(50));
    }

    #[test]
    fn test_hash_algorithm() {
        assert_eq!(HashAlgorithm::default(), HashAlgorithm::Blake3);
        assert_eq!(HashAlgorithm::Sha256.name(), "SHA-256");
    }
}
