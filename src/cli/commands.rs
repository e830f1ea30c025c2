//! CLI commands and argument parsing
//!
//! This module defines the command-line interface structure using clap,
//! including all commands, subcommands, and their arguments.

use crate::blob::manager::{commit_options, create_transfer_manager, format_size, TransferManager};
use crate::config::{init_default_config, Config};
use crate::error::{Result, TransferError};
use crate::transfer::{DownloadOptions, ProgressFn, UploadOptions, UploadStreamOptions, MIB};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "azx")]
#[command(about = "Parallel chunked transfers to Azure Blob Storage")]
#[command(version, author)]
pub struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Upload a local file as a block blob
    Upload {
        /// Local file path to upload
        file_path: PathBuf,
        /// Remote blob name (defaults to the file name)
        #[arg(short, long)]
        name: Option<String>,
        /// Block size in MiB (0 picks one from the file size)
        #[arg(long)]
        block_size_mb: Option<u64>,
        /// Maximum blocks staged at once
        #[arg(short, long)]
        parallelism: Option<u16>,
        /// Content type override
        #[arg(long)]
        content_type: Option<String>,
        /// Metadata key-value pairs
        #[arg(short, long, value_parser = parse_key_val::<String, String>)]
        metadata: Vec<(String, String)>,
        /// Show progress during upload
        #[arg(long)]
        progress: bool,
    },
    /// Upload standard input as a block blob
    UploadStream {
        /// Remote blob name
        #[arg(short, long)]
        name: String,
        /// Buffer size in MiB (at least 1)
        #[arg(long)]
        buffer_size_mb: Option<usize>,
        /// Buffers in flight at once
        #[arg(long)]
        max_buffers: Option<usize>,
        /// Content type of the uploaded blob
        #[arg(long)]
        content_type: Option<String>,
        /// Metadata key-value pairs
        #[arg(short, long, value_parser = parse_key_val::<String, String>)]
        metadata: Vec<(String, String)>,
    },
    /// Download a blob, or a range of it, to a local file
    Download {
        /// Remote blob name
        name: String,
        /// Local output path (defaults to the blob name)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// First byte to download
        #[arg(long, default_value_t = 0)]
        offset: u64,
        /// Bytes to download (defaults to the rest of the blob)
        #[arg(long)]
        count: Option<u64>,
        /// Chunk size in MiB
        #[arg(long)]
        block_size_mb: Option<u64>,
        /// Maximum ranged reads at once
        #[arg(short, long)]
        parallelism: Option<u16>,
        /// Force overwrite if file exists
        #[arg(short, long)]
        force: bool,
        /// Show progress during download
        #[arg(long)]
        progress: bool,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Write a default configuration file if none exists
    Init,
    /// Set a configuration value
    Set {
        /// Setting name
        key: String,
        /// Setting value
        value: String,
    },
    /// Show configuration file path
    Path,
}

impl Cli {
    pub async fn execute(self, config: Config) -> Result<()> {
        match self.command {
            Commands::Upload {
                file_path,
                name,
                block_size_mb,
                parallelism,
                content_type,
                metadata,
                progress,
            } => {
                let name = match name {
                    Some(name) => name,
                    None => default_blob_name(&file_path)?,
                };
                let manager = create_transfer_manager(&config, &name)?;
                let options = UploadOptions {
                    block_size: block_size_mb.unwrap_or(0).saturating_mul(MIB),
                    parallelism: parallelism.unwrap_or(0),
                    commit: commit_options(content_type, metadata),
                    ..Default::default()
                };
                execute_upload(&manager, &file_path, &name, options, progress).await
            }
            Commands::UploadStream {
                name,
                buffer_size_mb,
                max_buffers,
                content_type,
                metadata,
            } => {
                let manager = create_transfer_manager(&config, &name)?;
                let options = UploadStreamOptions {
                    buffer_size: buffer_size_mb.unwrap_or(0).saturating_mul(MIB as usize),
                    max_buffers: max_buffers.unwrap_or(0),
                    commit: commit_options(content_type, metadata),
                    ..Default::default()
                };
                execute_upload_stream(&manager, &name, options).await
            }
            Commands::Download {
                name,
                output,
                offset,
                count,
                block_size_mb,
                parallelism,
                force,
                progress,
            } => {
                let output = output.unwrap_or_else(|| PathBuf::from(&name));
                if output.exists() && !force {
                    return Err(TransferError::invalid_argument(format!(
                        "{} already exists. Use --force to overwrite",
                        output.display()
                    )));
                }
                let manager = create_transfer_manager(&config, &name)?;
                let options = DownloadOptions {
                    offset,
                    count,
                    block_size: block_size_mb.unwrap_or(0).saturating_mul(MIB),
                    parallelism: parallelism.unwrap_or(0),
                    ..Default::default()
                };
                execute_download(&manager, &name, &output, options, progress).await
            }
            Commands::Config { command } => execute_config_command(command, config).await,
        }
    }
}

fn default_blob_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| {
            TransferError::invalid_argument(format!("Cannot derive a blob name from {}", path.display()))
        })
}

/// Byte progress bar fed by transfer callbacks
fn progress_bar(total: u64, message: &str) -> ProgressBar {
    let bar = ProgressBar::new(total);
    let style = ProgressStyle::default_bar()
        .template("{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    bar.set_style(style);
    bar.set_message(message.to_string());
    bar
}

fn progress_callback(bar: &ProgressBar) -> ProgressFn {
    let bar = bar.clone();
    Arc::new(move |transferred: u64| bar.set_position(transferred))
}

async fn execute_upload(
    manager: &TransferManager,
    file_path: &Path,
    name: &str,
    mut options: UploadOptions,
    progress: bool,
) -> Result<()> {
    let metadata = tokio::fs::metadata(file_path).await.ok().filter(|m| m.is_file());
    let Some(metadata) = metadata else {
        return Err(TransferError::invalid_argument(format!(
            "File not found: {}",
            file_path.display()
        )));
    };

    let size = metadata.len();
    let bar = progress.then(|| progress_bar(size, "Uploading"));
    options.progress = bar.as_ref().map(progress_callback);

    println!("Uploading '{}' as '{name}'...", file_path.display());
    let result = manager.upload_file(file_path, options).await;
    if let Some(bar) = &bar {
        bar.finish_and_clear();
    }
    let response = result?;

    println!(
        "Uploaded '{name}' ({}, {} blocks, etag {})",
        format_size(response.size),
        response.block_count,
        response.etag
    );
    Ok(())
}

async fn execute_upload_stream(
    manager: &TransferManager,
    name: &str,
    options: UploadStreamOptions,
) -> Result<()> {
    info!(blob = name, "uploading standard input");
    let response = manager.upload_stream(tokio::io::stdin(), options).await?;
    eprintln!(
        "Uploaded '{name}' ({}, {} blocks, etag {})",
        format_size(response.size),
        response.block_count,
        response.etag
    );
    Ok(())
}

async fn execute_download(
    manager: &TransferManager,
    name: &str,
    output: &Path,
    options: DownloadOptions,
    progress: bool,
) -> Result<()> {
    // Resolve once so the progress bar and the transfer share one size lookup.
    let total = manager.resolve_download_count(&options).await?;
    let mut options = options.with_count(total);
    if total == 0 {
        tokio::fs::File::create(output).await?;
        println!("Downloaded '{name}' ({})", format_size(0));
        return Ok(());
    }

    let bar = progress.then(|| progress_bar(total, "Downloading"));
    options.progress = bar.as_ref().map(progress_callback);

    println!("Downloading '{name}' to '{}'...", output.display());
    let result = manager.download_file(output, options).await;
    if let Some(bar) = &bar {
        bar.finish_and_clear();
    }
    let written = result?;

    println!("Downloaded '{name}' ({})", format_size(written));
    Ok(())
}

async fn execute_config_command(command: ConfigCommands, mut config: Config) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            println!("{config}");
        }
        ConfigCommands::Init => {
            let path = init_default_config().await?;
            println!("Configuration file: {}", path.display());
        }
        ConfigCommands::Set { key, value } => {
            config.set(&key, &value)?;
            config.save().await?;
            println!("Set {key} = {value}");
        }
        ConfigCommands::Path => {
            println!("{}", Config::get_config_path()?.display());
        }
    }
    Ok(())
}

/// Parse a single key-value pair
fn parse_key_val<T, U>(
    s: &str,
) -> std::result::Result<(T, U), Box<dyn std::error::Error + Send + Sync + 'static>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    U: std::str::FromStr,
    U::Err: std::error::Error + Send + Sync + 'static,
{
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=value: no `=` found in `{s}`"))?;
    Ok((s[..pos].parse()?, s[pos + 1..].parse()?))
}
