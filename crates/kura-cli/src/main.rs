//! kura command-line client.
//!
//! Usage:
//!   kura ls    mem:// /
//!   kura stat  file:///srv/data /logs/today.txt
//!   kura cat   "s3://bucket/prefix?region=eu-west-1" /report.csv
//!   kura put   "sftp://me:pw@host/?host_key=..." /upload.bin < local.bin
//!   kura mkdir -p file:///srv/data /a/b/c
//!   kura rm    gs://bucket/ /old.txt
//!
//! Set `RUST_LOG=debug` to see every backend call.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use kura::{Store, TracedStore};

/// Uniform file access over memory, local disk, S3, GCS and SFTP.
#[derive(Parser, Debug)]
#[command(name = "kura")]
#[command(about = "Read and write files on any kura store")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List a directory
    Ls { store: String, path: String },
    /// Print metadata as JSON
    Stat { store: String, path: String },
    /// Write a file's content to stdout
    Cat { store: String, path: String },
    /// Replace a file with stdin
    Put { store: String, path: String },
    /// Create a directory
    Mkdir {
        store: String,
        path: String,
        /// Create missing parents, succeed if it already exists
        #[arg(short, long)]
        parents: bool,
        /// Permission bits, octal
        #[arg(long, default_value = "755")]
        mode: String,
    },
    /// Remove a file or empty directory
    Rm { store: String, path: String },
}

impl Command {
    fn store(&self) -> &str {
        match self {
            Command::Ls { store, .. }
            | Command::Stat { store, .. }
            | Command::Cat { store, .. }
            | Command::Put { store, .. }
            | Command::Mkdir { store, .. }
            | Command::Rm { store, .. } => store,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let conn = args.command.store().to_string();
    let store = kura::open(&conn)
        .await
        .with_context(|| format!("opening {conn}"))?;
    let store = TracedStore::new(store);

    let result = run(&store, args.command).await;
    if let Err(e) = store.close().await {
        tracing::warn!(error = %e, "closing store");
    }
    result
}

async fn run(store: &TracedStore<Arc<dyn Store>>, command: Command) -> Result<()> {
    match command {
        Command::Ls { path, .. } => {
            for entry in store.readdir(&path).await? {
                let suffix = if entry.is_dir() { "/" } else { "" };
                println!("{:o}\t{:>10}\t{}{}", entry.perm, entry.size, entry.name, suffix);
            }
        }
        Command::Stat { path, .. } => {
            let meta = store.stat(&path).await?;
            println!("{}", serde_json::to_string_pretty(&meta)?);
        }
        Command::Cat { path, .. } => {
            let data = store.read_all(&path).await?;
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&data).await?;
            stdout.flush().await?;
        }
        Command::Put { path, .. } => {
            let mut data = Vec::new();
            tokio::io::stdin().read_to_end(&mut data).await?;
            store.write_all(&path, &data).await?;
            tracing::info!(%path, bytes = data.len(), "uploaded");
        }
        Command::Mkdir {
            path,
            parents,
            mode,
            ..
        } => {
            let perm = u32::from_str_radix(&mode, 8)
                .with_context(|| format!("mode {mode:?} is not octal"))?;
            if parents {
                kura::mkdir_all(store, &path, perm).await?;
            } else {
                store.mkdir(&path, perm).await?;
            }
        }
        Command::Rm { path, .. } => store.remove(&path).await?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mkdir_flags() {
        let args = Args::try_parse_from(["kura", "mkdir", "-p", "mem://", "/a/b", "--mode", "700"])
            .unwrap();
        match args.command {
            Command::Mkdir {
                store,
                path,
                parents,
                mode,
            } => {
                assert_eq!(store, "mem://");
                assert_eq!(path, "/a/b");
                assert!(parents);
                assert_eq!(mode, "700");
            }
            other => panic!("parsed as {other:?}"),
        }
    }

    #[test]
    fn test_store_argument_is_required() {
        assert!(Args::try_parse_from(["kura", "ls"]).is_err());
        let args = Args::try_parse_from(["kura", "cat", "file:///tmp", "/x"]).unwrap();
        assert_eq!(args.command.store(), "file:///tmp");
    }

    #[tokio::test]
    async fn test_put_then_stat_on_memory_store() {
        let store = TracedStore::new(kura::open("mem://").await.unwrap());
        run(
            &store,
            Command::Mkdir {
                store: "mem://".into(),
                path: "/a/b".into(),
                parents: true,
                mode: "750".into(),
            },
        )
        .await
        .unwrap();
        let meta = store.stat("/a/b").await.unwrap();
        assert!(meta.is_dir());
        assert_eq!(meta.perm, 0o750);

        let err = run(
            &store,
            Command::Mkdir {
                store: "mem://".into(),
                path: "/c".into(),
                parents: false,
                mode: "9z".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("not octal"));
    }
}
