/*!
 * s3push CLI - upload a directory to S3
 *
 * Version: 0.2.0
 */

use clap::{Parser, ValueEnum};
use s3push::{
    backend::{CannedAcl, MemoryBackend, ObjectStore, S3Backend},
    config::{LogLevel, RuntimeConfig, UploadConfig},
    core::{upload_directory, TransferLimits, UploadTarget},
    error::{Result, EXIT_SUCCESS},
    logging,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "s3push")]
#[command(version, about = "Upload every file in a directory to an S3 bucket", long_about = None)]
struct Cli {
    /// Source directory (only its direct children are uploaded)
    #[arg(short = 'd', long = "dir", value_name = "DIR")]
    dir: Option<PathBuf>,

    /// Destination bucket
    #[arg(short = 'b', long = "bucket", value_name = "BUCKET")]
    bucket: Option<String>,

    /// Key prefix for uploaded objects
    #[arg(short = 'p', long = "prefix", value_name = "PREFIX")]
    prefix: Option<String>,

    /// Canned ACL (private, public-read, bucket-owner-full-control, ...)
    #[arg(short = 'a', long = "acl", value_name = "ACL")]
    acl: Option<CannedAcl>,

    /// AWS region (empty = provider chain)
    #[arg(short = 'r', long = "region", value_name = "REGION")]
    region: Option<String>,

    /// Number of files uploaded at once
    #[arg(short = 'c', long = "concurrency", value_name = "N")]
    concurrency: Option<usize>,

    /// Custom S3 endpoint URL (MinIO, LocalStack, ...)
    #[arg(long, value_name = "URL")]
    endpoint: Option<String>,

    /// Use path-style bucket addressing
    #[arg(long)]
    force_path_style: bool,

    /// Per-request S3 timeout in seconds (default: none)
    #[arg(long = "timeout", value_name = "SECS")]
    timeout_seconds: Option<u64>,

    /// Cap on parts in flight per multipart file
    #[arg(long, value_name = "N")]
    part_concurrency: Option<usize>,

    /// Configuration file (TOML)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level [default: info]
    #[arg(long, value_enum)]
    log_level: Option<LogLevelArg>,

    /// Write JSON logs to this file instead of stdout
    #[arg(long = "log", value_name = "FILE")]
    log: Option<PathBuf>,

    /// Verbose output (debug level)
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Read and check every file without contacting S3
    #[arg(long)]
    dry_run: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

fn main() {
    let code = match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn run() -> Result<()> {
    let config = load_config(Cli::parse())?;

    logging::init_logging(&config)?;
    config.validate()?;

    let runtime = RuntimeConfig::from_env();
    debug!("Async runtime with {} worker threads", runtime.worker_threads);

    runtime.build_runtime()?.block_on(execute(config))
}

/// Start from the config file (or defaults) and layer the flags over it
fn load_config(cli: Cli) -> Result<UploadConfig> {
    let base = match cli.config {
        Some(ref path) => UploadConfig::from_file(path)?,
        None => UploadConfig::default(),
    };
    Ok(apply_cli(base, cli))
}

/// Layer command-line values over the file (or default) configuration
fn apply_cli(mut config: UploadConfig, cli: Cli) -> UploadConfig {
    if let Some(dir) = cli.dir {
        config.source_dir = dir;
    }
    if let Some(bucket) = cli.bucket {
        config.bucket = bucket;
    }
    if let Some(prefix) = cli.prefix {
        config.prefix = prefix;
    }
    if let Some(acl) = cli.acl {
        config.acl = acl;
    }
    if let Some(region) = cli.region {
        config.region = Some(region).filter(|r| !r.is_empty());
    }
    if let Some(concurrency) = cli.concurrency {
        config.concurrency = concurrency;
    }
    if cli.endpoint.is_some() {
        config.endpoint = cli.endpoint;
    }
    if cli.timeout_seconds.is_some() {
        config.timeout_seconds = cli.timeout_seconds;
    }
    if cli.part_concurrency.is_some() {
        config.part_concurrency = cli.part_concurrency;
    }
    if cli.log.is_some() {
        config.log_file = cli.log;
    }

    config.force_path_style |= cli.force_path_style;
    config.verbose |= cli.verbose;
    config.dry_run |= cli.dry_run;
    if let Some(level) = cli.log_level {
        config.log_level = level.into();
    }

    config
}

async fn execute(config: UploadConfig) -> Result<()> {
    let store: Arc<dyn ObjectStore> = if config.dry_run {
        info!("Dry run: files are read and checked, nothing is sent");
        Arc::new(MemoryBackend::recording_only())
    } else {
        Arc::new(S3Backend::connect(config.s3_settings()).await?)
    };

    info!(
        "Uploading {} to {} bucket {} with {} workers",
        config.source_dir.display(),
        store.name(),
        config.bucket,
        config.concurrency
    );

    let target = Arc::new(UploadTarget::new(store, config.prefix.clone(), config.acl));
    let stats = upload_directory(
        &config.source_dir,
        target,
        TransferLimits::from_config(&config),
        config.concurrency,
    )
    .await?;

    debug!(
        "{} of {} files uploaded",
        stats.succeeded, stats.discovered
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn parse(args: &[&str]) -> UploadConfig {
        let cli = Cli::try_parse_from(std::iter::once("s3push").chain(args.iter().copied()))
            .unwrap();
        load_config(cli).unwrap()
    }

    fn config_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    #[test]
    fn test_help() {
        let result = Cli::try_parse_from(["s3push", "--help"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]);
        assert_eq!(config.source_dir, PathBuf::from("."));
        assert_eq!(config.bucket, "");
        assert_eq!(config.prefix, "");
        assert_eq!(config.acl, CannedAcl::Private);
        assert!(config.region.is_none());
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.log_level, LogLevel::Info);
        assert!(config.timeout_seconds.is_none());
        assert!(!config.dry_run);
        // An empty bucket is rejected before anything runs
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_short_flags() {
        let config = parse(&[
            "-d", "/data/out", "-b", "photos", "-p", "2024/summer", "-a", "public-read", "-r",
            "eu-west-1", "-c", "8",
        ]);
        assert_eq!(config.source_dir, PathBuf::from("/data/out"));
        assert_eq!(config.bucket, "photos");
        assert_eq!(config.prefix, "2024/summer");
        assert_eq!(config.acl, CannedAcl::PublicRead);
        assert_eq!(config.region.as_deref(), Some("eu-west-1"));
        assert_eq!(config.concurrency, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_long_flags() {
        let config = parse(&[
            "--dir", "src", "--bucket", "b", "--prefix", "p", "--acl",
            "bucket-owner-full-control", "--region", "ap-south-1", "--concurrency", "3",
            "--endpoint", "http://localhost:9000", "--force-path-style", "--part-concurrency",
            "4", "--timeout", "600", "--dry-run", "-v",
        ]);
        assert_eq!(config.source_dir, PathBuf::from("src"));
        assert_eq!(config.acl, CannedAcl::BucketOwnerFullControl);
        assert_eq!(config.region.as_deref(), Some("ap-south-1"));
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.endpoint.as_deref(), Some("http://localhost:9000"));
        assert!(config.force_path_style);
        assert_eq!(config.part_concurrency, Some(4));
        assert_eq!(config.timeout_seconds, Some(600));
        assert!(config.dry_run);
        assert!(config.verbose);
    }

    #[test]
    fn test_empty_region_uses_provider_chain() {
        let config = parse(&["-b", "b", "-r", ""]);
        assert!(config.region.is_none());
    }

    #[test]
    fn test_unknown_acl_rejected() {
        assert!(Cli::try_parse_from(["s3push", "-b", "b", "-a", "everyone"]).is_err());
    }

    #[test]
    fn test_non_numeric_concurrency_rejected() {
        assert!(Cli::try_parse_from(["s3push", "-c", "many"]).is_err());
    }

    #[test]
    fn test_flags_override_config_file() {
        let file = config_file(
            "bucket = \"from-file\"\nprefix = \"nightly\"\nconcurrency = 4\nlog_level = \"debug\"\n",
        );
        let path = file.path().to_str().unwrap();

        let config = parse(&["--config", path, "-c", "2", "--log-level", "info"]);

        assert_eq!(config.bucket, "from-file");
        assert_eq!(config.prefix, "nightly");
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.log_level, LogLevel::Info);
    }

    #[test]
    fn test_config_file_log_level_kept_without_flag() {
        let file = config_file("bucket = \"b\"\nlog_level = \"debug\"\n");
        let path = file.path().to_str().unwrap();

        let config = parse(&["--config", path]);

        assert_eq!(config.log_level, LogLevel::Debug);
    }

    #[test]
    fn test_missing_config_file_is_error() {
        let cli = Cli::try_parse_from(["s3push", "--config", "/nonexistent/s3push.toml"]).unwrap();
        assert!(load_config(cli).is_err());
    }
}
