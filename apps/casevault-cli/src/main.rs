mod commands;
mod config;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use storage_gateway::StorageError;

use crate::config::AppConfig;

/// Case Vault - confined access to the case document store
#[derive(Parser, Debug)]
#[command(name = "casevault")]
#[command(about = "Case Vault - confined access to the case document store")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print effective configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Print the URL that grants this app offline access
    AuthUrl {
        /// Opaque value echoed back to the redirect URI
        #[arg(long)]
        state: Option<String>,
    },
    /// Exchange an authorization code and store the credential
    Connect { code: String },
    /// Forget the stored credential
    Disconnect,
    /// Show whether the storage account is usable
    Status,
    /// List a folder
    Ls { path: String },
    /// Write a file to stdout
    Cat { path: String },
    /// Upload a local file
    Put {
        path: String,
        file: PathBuf,
        /// Fail instead of replacing an existing file
        #[arg(long)]
        no_overwrite: bool,
    },
    /// Create a folder and its parents
    Mkdir { path: String },
    /// Print whether a path exists
    Exists { path: String },
    /// Delete a file or folder
    Rm { path: String },
    /// Search file names and contents
    Search {
        query: String,
        /// Folder to search below (defaults to the root namespace)
        #[arg(long)]
        scope: Option<String>,
    },
    /// Write, read back and delete a probe file
    Selftest,
    /// Scan the root namespace for case folders once
    Scan,
    /// Scan on the configured interval until interrupted
    Poll,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            if err
                .downcast_ref::<StorageError>()
                .is_some_and(StorageError::requires_reconnect)
            {
                eprintln!("hint: reconnect required; run `casevault auth-url` and `casevault connect <code>`");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::load(cli.config.as_deref())?;
    logging::init(&config.logging, cli.verbose);
    tracing::debug!(file = ?cli.config, root = %config.gateway.root, "configuration loaded");

    if cli.print_config {
        print_config(&config);
        return Ok(());
    }

    let Some(command) = cli.command else {
        anyhow::bail!("no command given; see `casevault --help`");
    };
    commands::dispatch(&config, command).await
}

// Debug output keeps secrets redacted.
#[allow(clippy::use_debug)]
fn print_config(config: &AppConfig) {
    println!("Effective configuration:\n{config:#?}");
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn put_parses_flags() {
        let cli = Cli::try_parse_from([
            "casevault",
            "-vv",
            "put",
            "/CASES/C1/a.pdf",
            "a.pdf",
            "--no-overwrite",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(
            cli.command,
            Some(Commands::Put {
                path: "/CASES/C1/a.pdf".into(),
                file: PathBuf::from("a.pdf"),
                no_overwrite: true,
            })
        );
    }

    #[test]
    fn search_scope_is_optional() {
        let cli = Cli::try_parse_from(["casevault", "search", "umowa"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Commands::Search {
                query: "umowa".into(),
                scope: None,
            })
        );
    }

    #[test]
    fn connect_requires_a_code() {
        assert!(Cli::try_parse_from(["casevault", "connect"]).is_err());
    }
}
