//! MtpPipe command line
//!
//! Reads, thumbnails and replaces objects on a folder-backed device through
//! the pipe core.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pipes::protocol::{Identifier, OperationCode};
use pipes::{ChannelError, Config, FolderDevice, JsonCatalog, PipeManager, PipeReader, PipeWriter};

/// MtpPipe - stream device objects through blocking pipes.
#[derive(Parser, Debug)]
#[command(name = "mtp-pipe")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Root directory of the folder-backed device
    #[arg(long, global = true, value_name = "DIR", default_value = ".")]
    pub root: PathBuf,

    /// Path to the JSON catalog
    #[arg(long, global = true, value_name = "FILE", default_value = "catalog.json")]
    pub catalog: PathBuf,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Object selection shared by every command.
#[derive(clap::Args, Debug, Clone)]
pub struct ObjectArgs {
    /// Device id
    #[arg(long, short = 'd')]
    pub device: u32,

    /// Object handle
    #[arg(long = "handle", short = 'H')]
    pub handle: u32,

    /// Catalog document id (defaults to "<device>:<handle>")
    #[arg(long)]
    pub document: Option<String>,
}

impl ObjectArgs {
    fn identifier(&self) -> Identifier {
        let document = self
            .document
            .clone()
            .unwrap_or_else(|| format!("{}:{}", self.device, self.handle));
        Identifier::new(self.device, self.handle, document)
    }
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Copy an object's bytes out of the device
    Read {
        #[command(flatten)]
        object: ObjectArgs,

        /// Output file (defaults to stdout)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Copy an object's thumbnail out of the device
    Thumbnail {
        #[command(flatten)]
        object: ObjectArgs,

        /// Output file (defaults to stdout)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Replace a placeholder object with new content
    Write {
        #[command(flatten)]
        object: ObjectArgs,

        /// Input file (defaults to stdin)
        #[arg(long, short)]
        input: Option<PathBuf>,

        /// Operation codes supported on the new object (hex or decimal)
        #[arg(long = "operation", value_parser = parse_operation)]
        operations: Vec<OperationCode>,
    },
}

/// Parses an operation code such as `0x1009` or `4105`.
fn parse_operation(value: &str) -> Result<OperationCode, String> {
    let parsed = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => value.parse::<u16>(),
    };
    parsed
        .map(OperationCode::from)
        .map_err(|e| format!("invalid operation code '{value}': {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default()?
    };
    config.apply_env_overrides();
    config.validate()?;

    // Initialize tracing
    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        config.log.level.to_lowercase()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    if let Some(config_path) = &cli.config {
        tracing::info!("Using config file: {:?}", config_path);
    }

    let catalog = Arc::new(
        JsonCatalog::open(&cli.catalog)
            .with_context(|| format!("Failed to open catalog: {}", cli.catalog.display()))?,
    );
    let device = Arc::new(FolderDevice::new(&cli.root));
    let manager = PipeManager::new(catalog, &config)?;

    let outcome = run(&manager, device, cli.command).await;

    let drained = manager.shutdown().await;
    if !drained {
        tracing::warn!("Worker did not drain before the shutdown timeout");
    }

    outcome?;

    let stats = manager.stats();
    if stats.failed > 0 {
        anyhow::bail!("{} transfer task(s) failed, see log for details", stats.failed);
    }
    if !drained {
        anyhow::bail!("transfer still running at shutdown");
    }
    Ok(())
}

async fn run(manager: &PipeManager, device: Arc<FolderDevice>, command: Commands) -> Result<()> {
    match command {
        Commands::Read { object, output } => {
            let reader = manager.begin_read(device, object.identifier())?;
            let copied = copy_out(reader, output).await?;
            tracing::info!(bytes = copied, "Object read");
        }
        Commands::Thumbnail { object, output } => {
            let reader = manager.begin_read_thumbnail(device, object.identifier())?;
            let copied = copy_out(reader, output).await?;
            tracing::info!(bytes = copied, "Thumbnail read");
        }
        Commands::Write {
            object,
            input,
            operations,
        } => {
            let mut writer = manager.begin_write(device, object.identifier(), operations)?;
            let copied = tokio::task::spawn_blocking(move || -> Result<u64> {
                let mut source = open_input(input)?;
                match io::copy(&mut source, &mut writer) {
                    Ok(copied) => {
                        writer.close().context("Failed to finish upload")?;
                        Ok(copied)
                    }
                    Err(e) => {
                        abort_upload(writer, &e);
                        Err(e).context("Failed to read upload input")
                    }
                }
            })
            .await??;
            tracing::info!(bytes = copied, "Upload handed to worker");
        }
    }
    Ok(())
}

/// Error-closes an upload so the worker commits nothing.
fn abort_upload(writer: PipeWriter, cause: &io::Error) {
    if let Err(e) = writer.close_with_error(cause.to_string()) {
        tracing::warn!(error = %e, "Failed to abort upload");
    }
}

/// Drains `reader` into `output` (or stdout) on a blocking thread.
async fn copy_out(mut reader: PipeReader, output: Option<PathBuf>) -> Result<u64> {
    tokio::task::spawn_blocking(move || -> Result<u64> {
        let mut sink: Box<dyn Write> = match &output {
            Some(path) => Box::new(
                File::create(path)
                    .with_context(|| format!("Failed to create {}", path.display()))?,
            ),
            None => Box::new(io::stdout().lock()),
        };
        let copied = io::copy(&mut reader, &mut sink).map_err(|e| {
            match ChannelError::from_io(&e) {
                Some(ChannelError::Remote(message)) => anyhow::anyhow!("transfer failed: {message}"),
                Some(ChannelError::Detached) => anyhow::anyhow!("transfer ended unexpectedly"),
                None => anyhow::Error::new(e).context("Failed to write output"),
            }
        })?;
        sink.flush()?;
        Ok(copied)
    })
    .await?
}

fn open_input(input: Option<PathBuf>) -> Result<Box<dyn Read + Send>> {
    Ok(match input {
        Some(path) => Box::new(
            File::open(&path).with_context(|| format!("Failed to open {}", path.display()))?,
        ),
        None => Box::new(io::stdin()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_debug_assert() {
        // Verify the CLI structure is valid
        Cli::command().debug_assert();
    }

    #[test]
    fn test_read_command() {
        let cli = Cli::try_parse_from(["mtp-pipe", "read", "-d", "1", "-H", "42"]).unwrap();
        assert_eq!(cli.root, PathBuf::from("."));
        assert_eq!(cli.catalog, PathBuf::from("catalog.json"));
        match cli.command {
            Commands::Read { object, output } => {
                assert_eq!(object.identifier(), Identifier::new(1, 42, "1:42"));
                assert!(output.is_none());
            }
            _ => panic!("Expected Read command"),
        }
    }

    #[test]
    fn test_thumbnail_command_with_output() {
        let cli = Cli::try_parse_from([
            "mtp-pipe",
            "--root",
            "/media/phone",
            "thumbnail",
            "--device",
            "2",
            "--handle",
            "9",
            "--document",
            "doc-9",
            "--output",
            "thumb.jpg",
        ])
        .unwrap();
        assert_eq!(cli.root, PathBuf::from("/media/phone"));
        match cli.command {
            Commands::Thumbnail { object, output } => {
                assert_eq!(object.identifier(), Identifier::new(2, 9, "doc-9"));
                assert_eq!(output, Some(PathBuf::from("thumb.jpg")));
            }
            _ => panic!("Expected Thumbnail command"),
        }
    }

    #[test]
    fn test_write_command_operations() {
        let cli = Cli::try_parse_from([
            "mtp-pipe",
            "write",
            "-d",
            "1",
            "-H",
            "7",
            "--document",
            "doc-7",
            "--operation",
            "0x1009",
            "--operation",
            "4107",
        ])
        .unwrap();
        match cli.command {
            Commands::Write {
                object,
                input,
                operations,
            } => {
                assert_eq!(object.document.as_deref(), Some("doc-7"));
                assert!(input.is_none());
                assert_eq!(
                    operations,
                    vec![OperationCode::GET_OBJECT, OperationCode::DELETE_OBJECT]
                );
            }
            _ => panic!("Expected Write command"),
        }
    }

    #[test]
    fn test_parse_operation() {
        assert_eq!(parse_operation("0x100A"), Ok(OperationCode::GET_THUMB));
        assert_eq!(parse_operation("4104"), Ok(OperationCode::GET_OBJECT_INFO));
        assert!(parse_operation("0xZZZ").is_err());
        assert!(parse_operation("70000").is_err());
    }

    #[test]
    fn test_abort_upload_delivers_cause() {
        let (mut reader, writer) = pipes::pipe(4);
        abort_upload(writer, &io::Error::other("input truncated"));

        let err = reader.read(&mut [0u8; 8]).unwrap_err();
        assert_eq!(
            ChannelError::from_io(&err),
            Some(&ChannelError::Remote("input truncated".to_string()))
        );
    }

    #[test]
    fn test_abort_upload_survives_gone_reader() {
        let (reader, writer) = pipes::pipe(4);
        drop(reader);
        abort_upload(writer, &io::Error::other("input truncated"));
    }

    #[test]
    fn test_missing_handle_rejected() {
        assert!(Cli::try_parse_from(["mtp-pipe", "read", "-d", "1"]).is_err());
    }
}
