//! Reconciliation CLI.
//!
//! `rolesync --config <file> check` reports users with no directory entry;
//! `rolesync --config <file> export` additionally provisions them and
//! repairs absent authentication-name mappings.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use rolesync::{
    AppConfig, CheckHandler, DirectoryOps, ExportHandler, IdentityLookup, JsonUserStore,
    LdapDirectory, LdapExportProvisioner, LdapIdentityLookup, ReconciliationScanner, ScanSummary,
    SyncResult, UserStore,
};

#[derive(Parser)]
#[command(name = "rolesync", version, about = "Reconcile local users against an LDAP directory")]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(short, long)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Report users with no directory entry; never writes.
    Check,
    /// Provision missing users and repair authentication-name mappings.
    Export,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(summary) => {
            println!("scanned: {}", summary.scanned);
            println!("found:   {}", summary.found);
            println!("missing: {}", summary.missing);
            println!("failed:  {}", summary.failed);
            if summary.missing > 0 {
                eprintln!(
                    "{} user(s) have no directory entry; rerun with RUST_LOG=debug for details",
                    summary.missing
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("rolesync: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> SyncResult<ScanSummary> {
    let config = AppConfig::load(&cli.config)?;
    config.validate()?;

    let directory: Arc<dyn DirectoryOps> = Arc::new(LdapDirectory::new(config.ldap.clone()));
    let sync = Arc::new(config.sync.clone());
    let store: Arc<dyn UserStore> = Arc::new(JsonUserStore::load(&config.user_inventory)?);
    let lookup: Arc<dyn IdentityLookup> =
        Arc::new(LdapIdentityLookup::new(directory.clone(), sync.clone()));

    let scanner = ReconciliationScanner::new(store.clone(), lookup);
    match cli.command {
        Command::Check => scanner.scan(&CheckHandler).await,
        Command::Export => {
            let provisioner = Arc::new(LdapExportProvisioner::new(directory, sync.clone()));
            let handler = ExportHandler::new(store, provisioner, sync);
            scanner.scan(&handler).await
        }
    }
}
