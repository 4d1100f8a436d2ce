use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use imagen_batch::collector::{next_output_folder, FolderSink};
use imagen_batch::config::BatchConfig;
use imagen_batch::providers::{ImagenClient, ImagenConfig, DEFAULT_BASE_URL, DEFAULT_MODEL};
use imagen_batch::{load_prompts, run_batch};

mod logging;

use logging::LogFormat;

/// Generate one image per prompt under a shared request quota
#[derive(Debug, Parser)]
#[command(name = "imagen-batch", version, about)]
struct Cli {
    /// Prompt file, one prompt per line
    #[arg(long, default_value = "prompts.txt")]
    prompts: PathBuf,

    /// Base output folder; numbered siblings are used when it exists
    #[arg(long, default_value = "images")]
    output: PathBuf,

    /// Highest numbered output folder to try
    #[arg(long, default_value_t = 100)]
    max_output_folders: usize,

    /// YAML config file
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    max_calls: Option<u32>,

    #[arg(long)]
    period_seconds: Option<f64>,

    #[arg(long)]
    concurrency: Option<usize>,

    /// Total attempts per prompt
    #[arg(long)]
    max_retries: Option<u32>,

    #[arg(long)]
    retry_backoff_seconds: Option<f64>,

    #[arg(long)]
    attempt_timeout_seconds: Option<f64>,

    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    #[arg(long, default_value = DEFAULT_BASE_URL)]
    base_url: String,

    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    /// Also write JSON logs to a daily rolling file in this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Write the run summary as JSON
    #[arg(long)]
    summary_json: Option<PathBuf>,
}

impl Cli {
    /// defaults → YAML → environment → flags
    fn batch_config(&self) -> Result<BatchConfig> {
        let mut config = match &self.config {
            Some(path) => BatchConfig::from_file(path)?,
            None => BatchConfig::default(),
        };
        config.apply_env_overrides()?;

        if let Some(v) = self.max_calls {
            config.rate_limit.max_calls = v;
        }
        if let Some(v) = self.period_seconds {
            config.rate_limit.period_seconds = v;
        }
        if let Some(v) = self.concurrency {
            config.pool.max_concurrency = v;
        }
        if let Some(v) = self.max_retries {
            config.retry.max_retries = v;
        }
        if let Some(v) = self.retry_backoff_seconds {
            config.retry.backoff_seconds = v;
        }
        if let Some(v) = self.attempt_timeout_seconds {
            config.attempt_timeout_seconds = v;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let _log_guard = logging::init(cli.log_format, cli.log_dir.as_deref())?;

    let config = cli.batch_config().context("invalid configuration")?;

    let prompts = load_prompts(&cli.prompts).await?;
    if prompts.is_empty() {
        println!("No prompts found in {}", cli.prompts.display());
        return Ok(());
    }

    let imagen = ImagenConfig::from_env()?
        .with_model(cli.model.clone())
        .with_base_url(cli.base_url.clone());
    let generator = Arc::new(ImagenClient::new(imagen)?);

    let folder = next_output_folder(&cli.output, cli.max_output_folders)?;
    tracing::info!(folder = %folder.display(), "writing images");

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, finishing in-flight prompts");
            on_signal.cancel();
        }
    });

    let summary = run_batch(
        &config,
        generator,
        FolderSink::new(&folder),
        prompts,
        cancel,
    )
    .await?;

    println!("{}", summary);
    println!("Images saved to {}", folder.display());

    if let Some(path) = &cli.summary_json {
        let json = summary.to_json().context("failed to serialize summary")?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("failed to write summary to {}", path.display()))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["imagen-batch"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    #[serial]
    fn test_defaults() {
        temp_env::with_vars_unset(
            [
                "IMAGEN_BATCH_MAX_CALLS",
                "IMAGEN_BATCH_PERIOD_SECONDS",
                "IMAGEN_BATCH_MAX_CONCURRENCY",
                "IMAGEN_BATCH_MAX_RETRIES",
                "IMAGEN_BATCH_RETRY_BACKOFF_SECONDS",
                "IMAGEN_BATCH_ATTEMPT_TIMEOUT_SECONDS",
            ],
            || {
                let cli = parse(&[]);
                assert_eq!(cli.prompts, PathBuf::from("prompts.txt"));
                assert_eq!(cli.output, PathBuf::from("images"));
                assert_eq!(cli.model, DEFAULT_MODEL);

                let config = cli.batch_config().unwrap();
                assert_eq!(config, BatchConfig::default());
            },
        );
    }

    #[test]
    #[serial]
    fn test_flags_override_file_and_env() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "rate_limit:\n  max_calls: 7\npool:\n  max_concurrency: 2").unwrap();
        let path = file.path().to_string_lossy().into_owned();

        temp_env::with_vars(
            [
                ("IMAGEN_BATCH_MAX_CALLS", Some("9")),
                ("IMAGEN_BATCH_MAX_CONCURRENCY", None),
            ],
            || {
                let config = parse(&["--config", &path]).batch_config().unwrap();
                assert_eq!(config.rate_limit.max_calls, 9);
                assert_eq!(config.pool.max_concurrency, 2);

                let config = parse(&["--config", &path, "--max-calls", "3", "--concurrency", "4"])
                    .batch_config()
                    .unwrap();
                assert_eq!(config.rate_limit.max_calls, 3);
                assert_eq!(config.pool.max_concurrency, 4);
            },
        );
    }

    #[test]
    #[serial]
    fn test_invalid_flag_value_is_rejected() {
        temp_env::with_vars_unset(
            ["IMAGEN_BATCH_PERIOD_SECONDS", "IMAGEN_BATCH_MAX_CONCURRENCY"],
            || {
                assert!(parse(&["--period-seconds", "0"]).batch_config().is_err());
                assert!(parse(&["--concurrency", "0"]).batch_config().is_err());
            },
        );
    }

    #[test]
    fn test_log_format_flag() {
        assert_eq!(parse(&["--log-format", "json"]).log_format, LogFormat::Json);
        assert!(Cli::try_parse_from(["imagen-batch", "--log-format", "xml"]).is_err());
    }
}
