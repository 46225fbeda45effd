//! clinexport CLI - clinical data export pipeline.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use clinexport_core::{ExportId, ExportOperationState, ExportRequest};
use clinexport_delivery::{
    FileDropTransport, LoggingEmergencyProtocol, RecipientMetadata, SecureSharingService,
};
use clinexport_export::{ExportConfig, ExportOrchestrator};
use clinexport_progress::InMemoryOperationRegistry;
use clinexport_storage::{JsonStorage, StoreBackedDataSource};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "clinexport")]
#[command(about = "Clinical data export pipeline", long_about = None)]
struct Cli {
    /// Data directory holding the JSON stores and export records
    #[arg(long, default_value = ".clinexport")]
    data: PathBuf,
    /// Export configuration (JSON)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Emit JSON log lines
    #[arg(long)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an export from a JSON request file
    Export {
        /// Request file
        request: PathBuf,
        /// Share the artifact with the recipient described in this JSON file
        #[arg(long)]
        share: Option<PathBuf>,
        /// Directory file-drop deliveries are written to
        #[arg(long, default_value = ".clinexport/outbox")]
        outbox: PathBuf,
    },
    /// Show recorded exports
    Status {
        /// Export ID; all exports when omitted
        id: Option<String>,
    },
    /// Remove expired artifacts from the temp directory
    Sweep,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json);

    let config = match &cli.config {
        Some(path) => load_json::<ExportConfig>(path).await?,
        None => ExportConfig::default(),
    };

    match cli.command {
        Commands::Export {
            request,
            share,
            outbox,
        } => {
            let request: ExportRequest = load_json(&request).await?;
            let recipient = match &share {
                Some(path) => Some(load_json::<RecipientMetadata>(path).await?),
                None => None,
            };
            let orchestrator = open_orchestrator(&cli.data, &outbox, config).await?;
            run_export(&orchestrator, &cli.data, request, recipient).await?;
        }
        Commands::Status { id } => {
            let states = match id {
                Some(id) => {
                    let id: ExportId = id.parse().map_err(|_| anyhow::anyhow!("Invalid export ID"))?;
                    let path = record_path(&cli.data, id);
                    if !path.exists() {
                        println!("Export not found");
                        return Ok(());
                    }
                    vec![load_json::<ExportOperationState>(&path).await?]
                }
                None => load_records(&cli.data).await?,
            };

            println!("Exports ({})", states.len());
            for state in states {
                print_state(&state);
            }
        }
        Commands::Sweep => {
            let outbox = cli.data.join("outbox");
            let orchestrator = open_orchestrator(&cli.data, &outbox, config).await?;
            let report = orchestrator.sweep().await;
            println!(
                "Removed {} files ({} bytes)",
                report.files_removed, report.total_size_freed
            );
            for error in &report.errors {
                println!("  error: {}", error);
            }
        }
    }

    Ok(())
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn open_orchestrator(
    data: &Path,
    outbox: &Path,
    config: ExportConfig,
) -> Result<ExportOrchestrator> {
    let storage = Arc::new(
        JsonStorage::new(data.join("store"))
            .await
            .with_context(|| format!("opening store under {}", data.display()))?,
    );
    let source = StoreBackedDataSource::new(storage.clone(), storage.clone(), storage);
    let sharing = SecureSharingService::new(
        Arc::new(FileDropTransport::new(outbox)),
        Arc::new(LoggingEmergencyProtocol::new()),
    );

    Ok(ExportOrchestrator::new(
        Arc::new(source),
        Arc::new(InMemoryOperationRegistry::new()),
        Arc::new(sharing),
    )
    .with_config(config))
}

async fn run_export(
    orchestrator: &ExportOrchestrator,
    data: &Path,
    request: ExportRequest,
    recipient: Option<RecipientMetadata>,
) -> Result<()> {
    let id = request.export_id.unwrap_or_default();
    let request = request.with_export_id(id);

    orchestrator
        .subscribe(
            id,
            Arc::new(|state: &ExportOperationState| {
                println!("  [{:>3}%] {}", state.progress, state.status_message);
            }),
        )
        .await;

    let result = orchestrator.generate_export(request).await;

    if let Some(state) = orchestrator.take_export_result(id).await {
        save_record(data, &state).await?;
    }

    if result.success {
        if let Some(artifact) = &result.artifact {
            println!("Export {} completed", id);
            println!("  Artifact: {}", artifact.path.display());
            println!("  Size: {} bytes", artifact.size);
            println!("  SHA-256: {}", artifact.checksum);
            if let Some(token) = &artifact.access_token {
                println!("  Access token: {}", token);
            }
            if let clinexport_core::EncryptionState::Encrypted { key } = &artifact.encryption {
                println!("  Decryption key: {}", key);
            }
        }
        for omission in &result.omissions {
            println!("  Omitted {}: {:?}", omission.category, omission.reason);
        }
        if !result.clinically_validated {
            println!("  Warning: data did not pass clinical validation");
        }
        if let Some(error) = &result.error {
            println!("  Warning: {} ({})", error, error.hint());
        }
    }

    if let Some(recipient) = recipient {
        match orchestrator.share_export(id, &recipient).await {
            Ok(shared) => println!(
                "Shared with {} via {} ({})",
                shared.recipient, shared.sharing_method, shared.sharing_id
            ),
            Err(e) => warn!("Sharing export {} failed: {}", id, e.code()),
        }
    }

    if let Some(error) = result.error.filter(|_| !result.success) {
        let stage = result
            .failed_stage
            .map(|s| s.to_string())
            .unwrap_or_default();
        bail!("export {} failed at {}: {} ({})", id, stage, error, error.hint());
    }

    info!("Export {} recorded", id);
    Ok(())
}

async fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn record_path(data: &Path, id: ExportId) -> PathBuf {
    data.join("exports").join(format!("{}.json", id))
}

async fn save_record(data: &Path, state: &ExportOperationState) -> Result<()> {
    let path = record_path(data, state.export_id);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, serde_json::to_vec_pretty(state)?).await?;
    Ok(())
}

async fn load_records(data: &Path) -> Result<Vec<ExportOperationState>> {
    let dir = data.join("exports");
    let mut states = Vec::new();
    let mut entries = match tokio::fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(states),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        if entry.path().extension().map_or(false, |ext| ext == "json") {
            states.push(load_json(&entry.path()).await?);
        }
    }
    states.sort_by_key(|s: &ExportOperationState| s.start_time);
    Ok(states)
}

fn print_state(state: &ExportOperationState) {
    println!(
        "  {} | {} | {} | {:>3}% - {}",
        state.export_id,
        state.status,
        state.operation_type,
        state.progress,
        state.status_message,
    );
    if let Some(error) = &state.error {
        println!("      {}: {}", error.code(), error);
    }
}
