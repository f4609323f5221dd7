use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use futures::TryStreamExt;
use tokio::io::AsyncRead;
use tracing::info;
use tracing_subscriber::EnvFilter;
use upload_saver::conf::Conf;
use upload_saver::{
    Backend, MapRecord, Matches, MemoryConnector, ObjectStoreConnector, Saver,
};

#[derive(Parser, Debug)]
#[command(version, about = "Save files to local storage or an S3 bucket", long_about = None)]
pub struct Args {
    #[arg(long, default_value = "config.toml")]
    pub config_file: Vec<String>,

    /// Keep remote objects in memory instead of talking to S3 (dry run)
    #[arg(long, default_value = "false")]
    pub memory: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Store a file and print the stamped record as JSON
    Store {
        /// File to read, or `-` for stdin
        source: PathBuf,
        /// Logical filename, relative to the base path
        filename: String,
    },
    /// Delete a stored file
    Delete {
        filename: String,
        #[command(flatten)]
        location: Location,
    },
    /// List stored files starting with a path
    Find {
        path: String,
        #[command(flatten)]
        location: Location,
    },
}

#[derive(clap::Args, Debug)]
pub struct Location {
    /// Storage type of the object ("s3"); local storage when omitted
    #[arg(long)]
    pub storage_type: Option<String>,
    /// Bucket holding the object
    #[arg(long)]
    pub bucket: Option<String>,
}

fn setup_tracing(log_format: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match log_format {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    }
    .map_err(|err| anyhow!("installing subscriber: {err}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Conf::new(args.config_file).context("reading config file")?;

    setup_tracing(&config.log_format).context("setting up tracing")?;

    let saver_config = config.saver_config().context("validating storage settings")?;
    let connector: Arc<dyn ObjectStoreConnector> = if args.memory {
        let connector = MemoryConnector::new();
        if let Backend::Remote { container, .. } = &saver_config.backend {
            connector.create_container(container);
        }
        if let Command::Delete { location, .. } | Command::Find { location, .. } = &args.command
        {
            if let Some(bucket) = &location.bucket {
                connector.create_container(bucket);
            }
        }
        Arc::new(connector)
    } else {
        Arc::new(config.s3_connector())
    };
    info!(
        "Starting with backend {} via {}",
        saver_config.backend.name(),
        connector.name()
    );
    let saver = Saver::with_connector(saver_config, connector);

    match args.command {
        Command::Store { source, filename } => {
            let mut reader: Box<dyn AsyncRead + Unpin + Send> = if source.as_os_str() == "-" {
                Box::new(tokio::io::stdin())
            } else {
                Box::new(
                    tokio::fs::File::open(&source)
                        .await
                        .with_context(|| format!("opening {}", source.display()))?,
                )
            };
            let mut record = MapRecord::new();
            let stored = saver
                .store(&mut reader, &filename, &mut record)
                .await
                .with_context(|| format!("storing {filename}"))?;
            info!("Stored {}", stored);
            println!(
                "{}",
                serde_json::to_string_pretty(&record).context("serializing record")?
            );
        }
        Command::Delete { filename, location } => {
            saver
                .delete(
                    filename.as_str(),
                    location.storage_type.as_deref(),
                    location.bucket.as_deref(),
                )
                .await
                .with_context(|| format!("deleting {filename}"))?;
        }
        Command::Find { path, location } => {
            let matches = saver
                .find_by_path(
                    &path,
                    location.storage_type.as_deref(),
                    location.bucket.as_deref(),
                )
                .await
                .with_context(|| format!("looking up {path}"))?;
            match matches {
                Matches::Local(paths) => {
                    for path in paths {
                        println!("{}", path.display());
                    }
                }
                Matches::Remote(mut listing) => {
                    while let Some(object) =
                        listing.try_next().await.context("listing matches")?
                    {
                        println!("{}", object.key);
                    }
                }
            }
        }
    }

    Ok(())
}
