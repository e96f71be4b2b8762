//! Twin Anchor
//!
//! Anchors twin document digests onto the TwinRegistry contract.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use twin_anchor::{
    open_store, verify::verify_document, AlloyLedger, AnchorConfig, AnchorService, Canonicalizer,
    DocumentCollection, RegistryHandle,
};

#[derive(Debug, Parser)]
#[command(name = "twin-anchor", version, about = "Anchor twin document digests on a ledger")]
struct Cli {
    /// TOML configuration file; environment variables take precedence
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Anchor every changed document (default)
    Run,
    /// Compare one document folder with its anchors
    Verify {
        /// Folder name under the documents directory
        folder: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing();

    let cli = Cli::parse();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Twin anchor starting"
    );

    match execute(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!(error = %format!("{e:#}"), "Anchor run aborted");
            ExitCode::from(2)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,twin_anchor=debug"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(true)
            .init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_level(true)
            .with_ansi(true)
            .init();
    }
}

async fn execute(cli: Cli) -> Result<u8> {
    // Load configuration
    let config = AnchorConfig::load(cli.config.as_deref()).context("loading configuration")?;

    let registry = RegistryHandle::load(&config.contract_info_file, &config.contract_name)?;
    let endpoint = config
        .rpc_url
        .clone()
        .unwrap_or_else(|| registry.node.clone());

    info!(
        endpoint = %endpoint,
        contract = %registry.name,
        registry = %registry.address,
        docs_dir = %config.docs_dir.display(),
        digest_algorithm = %config.digest_algorithm,
        record_layout = ?config.record_layout,
        "Configuration loaded"
    );

    let collection = DocumentCollection::from_config(&config);
    let store = open_store(&config);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let documents = collection.load()?;

            let ledger = AlloyLedger::connect(&endpoint, config.connect_timeout())
                .await?
                .with_confirmation(config.confirmation_timeout(), config.confirmation_poll_interval());

            let mut service = AnchorService::new(config, ledger, store, registry)?;

            let cancel = service.cancellation_flag();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Received shutdown signal, stopping after the current document");
                    cancel.store(true, Ordering::SeqCst);
                }
            });

            let report = service.run(documents).await?;
            Ok(report.exit_code())
        }
        Command::Verify { folder } => {
            let document = collection.load_folder(&folder)?;

            let ledger = AlloyLedger::connect(&endpoint, config.connect_timeout()).await?;
            let canonicalizer = Canonicalizer::new(config.digest_algorithm);

            let verification =
                verify_document(&document, &canonicalizer, store.as_ref(), &ledger, &registry).await?;

            println!(
                "{} ({}): {}",
                verification.document_id, verification.digest, verification.verdict
            );
            if !verification.record_matches() {
                warn!(
                    document_id = %verification.document_id,
                    "Local anchor record does not match the document"
                );
            }

            Ok(if verification.is_verified() { 0 } else { 1 })
        }
    }
}
