//! # cbfs CLI
//!
//! Command-line client for the cbfs callback file store.

use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use bytes::Bytes;
use cbfs_client::Session;
use cbfs_config::{logging::init_logging, Config};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;

/// cbfs - files cached locally, kept fresh by server callbacks
#[derive(Parser)]
#[command(name = "cbfs")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Server socket (default from config, then /tmp/cbfs.sock)
    #[arg(long, env = "CBFS_SOCKET")]
    socket: Option<PathBuf>,

    /// Client ID to register as (default: random)
    #[arg(long, env = "CBFS_CLIENT_ID")]
    client_id: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List file names on the server
    Ls,

    /// Print a file's contents
    Cat { name: String },

    /// Create a file from FILE, or stdin when omitted
    Put {
        name: String,
        #[arg(value_name = "FILE")]
        source: Option<PathBuf>,
    },

    /// Replace a file's contents from FILE, or stdin when omitted
    Edit {
        name: String,
        #[arg(value_name = "FILE")]
        source: Option<PathBuf>,
    },

    /// Remove a file
    Rm { name: String },

    /// Rename a file
    Mv { name: String, new_name: String },

    /// Open files and print invalidations until Ctrl-C
    Watch {
        #[arg(required = true)]
        names: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load().context("Failed to load config")?;
    init_logging(config.log.level);

    let socket = cli.socket.unwrap_or(config.client.socket);
    let client_id = cli
        .client_id
        .or(config.client.client_id)
        .unwrap_or_else(|| format!("client-{}", uuid::Uuid::new_v4()));

    let session = Session::connect(&socket, &client_id)
        .await
        .with_context(|| format!("Failed to connect to {}", socket.display()))?;

    let result = run(&session, cli.command).await;
    let unregistered = session.close().await;
    result?;
    unregistered.context("Failed to unregister")?;
    Ok(())
}

async fn run(session: &Session, command: Commands) -> Result<()> {
    match command {
        Commands::Ls => {
            for name in session.list_files().await? {
                println!("{}", name);
            }
        }

        Commands::Cat { name } => {
            let data = session.open_file(&name).await?;
            std::io::stdout().write_all(&data)?;
        }

        Commands::Put { name, source } => {
            let data = read_source(source.as_ref())?;
            session.create_file(&name, data).await?;
        }

        Commands::Edit { name, source } => {
            let data = read_source(source.as_ref())?;
            session.edit_file(&name, data).await?;
        }

        Commands::Rm { name } => session.remove_file(&name).await?,

        Commands::Mv { name, new_name } => session.rename_file(&name, &new_name).await?,

        Commands::Watch { names } => watch(session, &names).await?,
    }
    Ok(())
}

fn read_source(source: Option<&PathBuf>) -> Result<Bytes> {
    let data = match source {
        Some(path) => {
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?
        }
        None => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf)?;
            buf
        }
    };
    Ok(Bytes::from(data))
}

async fn watch(session: &Session, names: &[String]) -> Result<()> {
    let mut events = session.invalidations();
    for name in names {
        let data = session.open_file(name).await?;
        println!("watching {} ({} bytes)", name, data.len());
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(name) => println!("invalidated {}", name),
                Err(RecvError::Lagged(missed)) => println!("missed {} invalidations", missed),
                Err(RecvError::Closed) => anyhow::bail!("Server connection closed"),
            },
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}
