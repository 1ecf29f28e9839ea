//! Subcommand handlers. Each builds only what it needs.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use casekit_auth::{CredentialBroker, FileTokenStore, OAuthFlow, TokenStore};
use casekit_http::HttpClient;
use storage_gateway::scanner::{CasePoller, CaseScanner, MemoryIngestSink, ScanReport};
use storage_gateway::{DropboxConnector, StorageGateway};
use storage_gateway_sdk::{Entry, OpContext, StorageApi, WriteOptions};

use crate::Commands;
use crate::config::AppConfig;

pub async fn dispatch(config: &AppConfig, command: Commands) -> Result<()> {
    match command {
        Commands::AuthUrl { state } => {
            println!("{}", oauth_flow(config)?.authorize_url(state.as_deref()));
            Ok(())
        }
        Commands::Connect { code } => connect(config, &code).await,
        Commands::Disconnect => {
            FileTokenStore::new(&config.auth.token_store)
                .clear()
                .await
                .context("failed to clear the stored credential")?;
            println!("disconnected");
            Ok(())
        }
        Commands::Status => status(config).await,
        Commands::Selftest => self_test(config).await,
        Commands::Scan => scan(config).await,
        Commands::Poll => poll(config).await,
        other => storage(config, other).await,
    }
}

/// Commands that map one-to-one onto a [`StorageApi`] call.
async fn storage(config: &AppConfig, command: Commands) -> Result<()> {
    let gateway = gateway(config)?;
    let ctx = OpContext::default();
    match command {
        Commands::Ls { path } => {
            for entry in gateway.list(&ctx, &path).await? {
                println!("{}", listing_line(&entry));
            }
        }
        Commands::Cat { path } => {
            let content = gateway.read(&ctx, &path).await?;
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&content.bytes)?;
            stdout.flush()?;
        }
        Commands::Put {
            path,
            file,
            no_overwrite,
        } => {
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            let options = WriteOptions {
                overwrite: !no_overwrite,
            };
            let entry = gateway
                .write(&ctx, &path, Bytes::from(bytes), options)
                .await?;
            println!("{}", listing_line(&entry));
        }
        Commands::Mkdir { path } => gateway.ensure_folder(&ctx, &path).await?,
        Commands::Exists { path } => println!("{}", gateway.exists(&ctx, &path).await?),
        Commands::Rm { path } => gateway.delete(&ctx, &path).await?,
        Commands::Search { query, scope } => {
            let scope = scope.unwrap_or_else(|| gateway.guard().root().to_owned());
            for hit in gateway.search(&ctx, &query, &scope).await? {
                println!("{}", listing_line(&hit.entry));
            }
        }
        _ => anyhow::bail!("not a storage command"),
    }
    Ok(())
}

async fn connect(config: &AppConfig, code: &str) -> Result<()> {
    let credential = oauth_flow(config)?.exchange_code(code).await?;
    let access = if credential.refresh_token.is_some() {
        "granted"
    } else {
        "not granted"
    };
    println!("connected; offline access {access}");
    Ok(())
}

async fn status(config: &AppConfig) -> Result<()> {
    let gateway = gateway(config)?;
    let status = gateway.connection_status().await;
    println!("connected: {}", status.connected);
    if let Some(account) = status.account {
        println!("account:   {account}");
    }
    if let Some(note) = status.note {
        println!("note:      {note}");
    }
    println!("root:      {}", gateway.guard().root());
    Ok(())
}

async fn self_test(config: &AppConfig) -> Result<()> {
    let report = gateway(config)?.self_test().await?;
    println!(
        "probe {}: wrote {} bytes, read back {}, cleaned up {}",
        report.path,
        report.bytes_written,
        if report.read_back_matches { "ok" } else { "MISMATCH" },
        report.cleaned_up,
    );
    if !report.read_back_matches {
        anyhow::bail!("self-test read back different bytes");
    }
    Ok(())
}

async fn scan(config: &AppConfig) -> Result<()> {
    let sink = Arc::new(MemoryIngestSink::new());
    let report = scanner(config, Arc::clone(&sink))?.scan().await?;
    for candidate in sink.queued() {
        println!(
            "{}\t{}\t{} files\t{}",
            candidate.case.case_id,
            candidate.folder_path,
            candidate.files.len(),
            candidate.content_hash,
        );
    }
    print_report(&report);
    Ok(())
}

async fn poll(config: &AppConfig) -> Result<()> {
    let scanner = scanner(config, Arc::new(MemoryIngestSink::new()))?;
    let poller = CasePoller::new(Arc::new(scanner), &config.poller);
    poller.start();
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    poller.stop().await;
    if let Some(report) = poller.last_report() {
        print_report(&report);
    }
    println!("{} scans", poller.runs());
    Ok(())
}

fn gateway(config: &AppConfig) -> Result<StorageGateway> {
    let http = HttpClient::builder()
        .build()
        .context("failed to build HTTP client")?;
    let broker = CredentialBroker::from_config(&config.auth, &http)?;
    let connector = DropboxConnector::new(&config.gateway.dropbox)
        .context("failed to build storage client")?;
    Ok(StorageGateway::new(
        &config.gateway,
        broker,
        Arc::new(connector),
    )?)
}

fn oauth_flow(config: &AppConfig) -> Result<OAuthFlow> {
    let oauth = config
        .auth
        .oauth
        .as_ref()
        .context("auth.oauth is not configured")?;
    let http = HttpClient::builder()
        .build()
        .context("failed to build HTTP client")?;
    let store = Arc::new(FileTokenStore::new(&config.auth.token_store));
    Ok(OAuthFlow::new(http, oauth, store)?)
}

fn scanner(config: &AppConfig, sink: Arc<MemoryIngestSink>) -> Result<CaseScanner> {
    let gateway = gateway(config)?;
    let root = gateway.guard().root().to_owned();
    Ok(CaseScanner::new(Arc::new(gateway), sink, root))
}

fn listing_line(entry: &Entry) -> String {
    let size = entry.size.map_or_else(|| "-".to_owned(), |s| s.to_string());
    format!("{:<6} {size:>10}  {}", entry.kind.as_str(), entry.path)
}

fn print_report(report: &ScanReport) {
    println!(
        "folders {}, enqueued {}, invalid {}, unchanged {}, errors {}",
        report.folders_seen,
        report.enqueued,
        report.skipped_invalid,
        report.skipped_known,
        report.errors.len(),
    );
    for err in &report.errors {
        eprintln!("  {err}");
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use storage_gateway_sdk::EntryKind;

    #[test]
    fn listing_line_marks_folders_without_size() {
        let entry = Entry {
            name: "portal".into(),
            path: "/CASES/C1/portal".into(),
            kind: EntryKind::Folder,
            size: None,
            modified_at: None,
            id: None,
        };
        let line = listing_line(&entry);
        assert!(line.starts_with(EntryKind::Folder.as_str()));
        assert!(line.contains(" -  /CASES/C1/portal"));
    }

    #[test]
    fn oauth_commands_need_oauth_config() {
        let err = oauth_flow(&AppConfig::default()).err().unwrap();
        assert!(err.to_string().contains("auth.oauth"));
    }
}
