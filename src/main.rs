use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sandboxed_upload::{
    InferSniffer, SecureFileUploader, UploadError, UploadRequest, UploadStrategy, build_uploader,
};
use secure_upload::{
    config::{UploadConfig, defaults},
    utils::format_bytes,
};

#[derive(Parser)]
#[command(name = "secure-upload")]
#[command(version)]
#[command(about = "Validate and store files against a content-type whitelist")]
#[command(long_about = None)]
struct Cli {
    /// Policy file path
    #[arg(short, long, global = true, env = defaults::CONFIG_FILE_ENV, default_value = defaults::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Whitelist file path
    #[arg(short, long, global = true, env = defaults::WHITELIST_FILE_ENV, default_value = defaults::DEFAULT_WHITELIST_FILE)]
    whitelist: PathBuf,

    /// Log level
    #[arg(short = 'v', long, global = true, default_value = defaults::DEFAULT_LOG_LEVEL)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a local file and store it
    Upload {
        /// File to upload
        path: PathBuf,

        /// Declared content type
        #[arg(short = 't', long, value_name = "TYPE")]
        content_type: String,

        /// File name to declare instead of the local one
        #[arg(short, long)]
        name: Option<String>,

        /// Upload strategy (pre-validate, post-validate), overrides the policy file
        #[arg(short, long)]
        strategy: Option<UploadStrategy>,
    },

    /// List stored files
    List,

    /// Re-validate a stored file and print its path
    Get {
        /// Stored file name
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let log_filter = format!(
        "secure_upload={0},sandboxed_upload={0}",
        cli.log_level
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting secure-upload v{}", env!("CARGO_PKG_VERSION"));

    let config = UploadConfig::load(&cli.config, &cli.whitelist);

    let strategy = match &cli.command {
        Command::Upload {
            strategy: Some(strategy),
            ..
        } => *strategy,
        _ => config.strategy,
    };
    let uploader = build_uploader(
        strategy,
        Arc::new(config.provider()),
        Arc::new(InferSniffer::new()),
    );

    match cli.command {
        Command::Upload {
            path,
            content_type,
            name,
            ..
        } => upload(uploader.as_ref(), path, content_type, name).await,
        Command::List => list(uploader.as_ref()).await,
        Command::Get { name } => get(uploader.as_ref(), &name).await,
    }
}

async fn upload(
    uploader: &dyn SecureFileUploader,
    path: PathBuf,
    content_type: String,
    name: Option<String>,
) -> Result<ExitCode> {
    let file_name = match name {
        Some(name) => name,
        None => path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .with_context(|| format!("Cannot derive a file name from {}", path.display()))?,
    };

    let file = tokio::fs::File::open(&path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;

    match uploader
        .upload(UploadRequest::new(file, file_name, content_type))
        .await
    {
        Ok(stored) => {
            println!("{}", stored.name());
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => Ok(report(&e)),
    }
}

async fn list(uploader: &dyn SecureFileUploader) -> Result<ExitCode> {
    let files = match uploader.list().await {
        Ok(files) => files,
        Err(e) => return Ok(report(&e)),
    };

    for file in files {
        let metadata = tokio::fs::metadata(file.path()).await;
        let (size, modified) = match metadata {
            Ok(metadata) => (
                format_bytes(metadata.len()),
                metadata
                    .modified()
                    .map(|t| DateTime::<Local>::from(t).format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|_| "-".to_string()),
            ),
            // Removed between listing and stat.
            Err(_) => continue,
        };
        println!("{:>10}  {}  {}", size, modified, file.name());
    }
    Ok(ExitCode::SUCCESS)
}

async fn get(uploader: &dyn SecureFileUploader, name: &str) -> Result<ExitCode> {
    match uploader.get(name).await {
        Ok(stored) => {
            println!("{}", stored.path().display());
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => Ok(report(&e)),
    }
}

fn report(err: &UploadError) -> ExitCode {
    eprintln!("{err}");
    match err {
        UploadError::Rejected => ExitCode::from(1),
        UploadError::NotFound { .. } => ExitCode::from(2),
    }
}
