//! drivekeeper - browse, diff, clone and rotate backups on a remote drive
//! across a pool of service accounts.

mod api;
mod cache;
mod ops;
mod session;

use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use tracing::{error, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use session::{IdentityPool, Session};

#[derive(Debug, Parser)]
#[command(name = "drivekeeper", version, about)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Credential file or directory of credential files
    #[arg(long, global = true, default_value = "secrets")]
    secrets: PathBuf,

    /// Take a single identity from DRIVE_OAUTH_EMAIL / DRIVE_OAUTH_TOKEN
    /// instead of credential files
    #[arg(long, global = true)]
    oauth: bool,

    /// 1-based identity index within the pool
    #[arg(short, long, global = true, default_value_t = 1)]
    account: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Browse the hierarchy interactively
    Browse {
        /// Folder id to start from; `root` lists everything the identity owns
        #[arg(default_value = "root")]
        root: String,
        /// Adopt unreachable nodes under the browse root
        #[arg(long)]
        orphans: bool,
    },
    /// Compare two subtrees
    Diff { first: String, second: String },
    /// Show the active identity's storage quota
    Quota,
    /// Create a shortcut to a node
    Link {
        target: String,
        /// Parent folder for the shortcut
        destination: Option<String>,
    },
    /// Delete nodes by id; the single id `all` deletes everything owned
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Copy a subtree under a new parent
    Clone {
        source: String,
        destination: String,
        /// Name for the copied root (defaults to a dated backup name)
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Make a new backup of a subtree, rotating across the identity pool
    Rotate {
        source: String,
        destination: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        dry_run: bool,
    },
}

fn default_backup_name() -> String {
    chrono::Local::now().format("drive_backup_%Y-%m-%d").to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.quiet {
        Level::WARN
    } else {
        match cli.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let pool = if cli.oauth {
        IdentityPool::from_env()
    } else {
        IdentityPool::load(&cli.secrets)
    };
    let pool = match pool {
        Ok(pool) => pool,
        Err(e) => {
            error!(error = %e, "Could not load credentials");
            std::process::exit(1);
        }
    };

    let mut session = Session::new(pool, cli.account)?;

    match cli.command {
        Command::Browse { root, orphans } => ops::browse::run(&session, &root, orphans).await,
        Command::Diff { first, second } => ops::diff::run(&mut session, &first, &second).await,
        Command::Quota => ops::quota::run(&session).await,
        Command::Link {
            target,
            destination,
        } => ops::link::run(&session, &target, destination.as_deref()).await,
        Command::Delete { ids, dry_run } => ops::clean::run(&session, &ids, dry_run).await,
        Command::Clone {
            source,
            destination,
            name,
            dry_run,
        } => {
            let name = name.unwrap_or_else(default_backup_name);
            ops::clone::run(&session, &source, &destination, &name, dry_run).await
        }
        Command::Rotate {
            source,
            destination,
            name,
            dry_run,
        } => {
            let name = name.unwrap_or_else(default_backup_name);
            ops::rotate::run(&mut session, &source, &destination, &name, dry_run).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_default_backup_name_is_dated() {
        let name = default_backup_name();
        assert!(name.starts_with("drive_backup_"));
        assert_eq!(name.len(), "drive_backup_2024-01-01".len());
    }
}
