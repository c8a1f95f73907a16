//! Shelf CLI: upload and manage library files from the command line.
//!
//! Configuration comes from the environment (see `ClientConfig::from_env`); at least
//! SHELF_API_KEY must be set.

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use shelf_api_client::ApiClient;
use shelf_cli::{format_bytes, init_tracing, progress_bar, truncate_string};
use shelf_core::models::{
    FileId, FileKey, FileSortColumn, PendingFile, ReprocessRequest, SortDirection,
};
use shelf_core::{BatchSummary, ClientConfig, ErrorMetadata};
use shelf_uploader::{
    HttpBackend, ReprocessConfig, ReprocessEvent, ReprocessOutcome, Reprocessor, SessionConfig,
    UploadEvent, UploadSession,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "shelf", about = "Shelf library file client")]
struct Cli {
    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload local files into a library. Ctrl-C cancels every transfer.
    Upload {
        /// Target library ID
        #[arg(long)]
        library: String,
        /// Files to upload
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Queue files for reprocessing
    Reprocess {
        #[arg(long)]
        library: String,
        /// File IDs
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// List the files of a library
    Files {
        #[arg(long)]
        library: String,
        /// Sort column: index, name, size, chunks, processedAt
        #[arg(long, default_value = "index")]
        sort: FileSortColumn,
        /// Sort direction: asc or desc
        #[arg(long, default_value = "asc")]
        direction: SortDirection,
        #[arg(long, default_value = "0")]
        page: u32,
        #[arg(long, default_value = "20")]
        per_page: u32,
    },
    /// Drop files from their library
    Drop {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Follow enrichment updates of a list until Ctrl-C
    WatchEnrichment {
        /// List ID
        #[arg(long)]
        list: String,
    },
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize response")?;
    println!("{}", out);
    Ok(())
}

/// Text rendering of upload events. File names are learned from `BatchStarted`.
#[derive(Default)]
struct EventPrinter {
    names: HashMap<FileKey, String>,
}

impl EventPrinter {
    fn print(&mut self, event: &UploadEvent) {
        match event {
            UploadEvent::BatchStarted {
                library_id, files, ..
            } => {
                let total: u64 = files.iter().map(|f| f.size).sum();
                println!(
                    "Uploading {} file(s) ({}) to library {}",
                    files.len(),
                    format_bytes(total),
                    library_id
                );
                for file in files {
                    self.names.insert(file.key, file.name.clone());
                }
            }
            UploadEvent::Prepared { .. } | UploadEvent::Reset { .. } => {}
            UploadEvent::StateChanged { key, state, .. } => {
                if !state.is_terminal() {
                    let name = self.names.get(key).map(String::as_str).unwrap_or("?");
                    println!("{:<40} {}", truncate_string(name, 40), progress_bar(state, 20));
                }
            }
            UploadEvent::Notice { notice, .. } => {
                if notice.is_error() {
                    eprintln!("{}", notice);
                } else {
                    println!("{}", notice);
                }
            }
            UploadEvent::Finished(summary) => print_summary("Finished", summary),
            UploadEvent::Aborted(summary) => print_summary("Cancelled", summary),
        }
    }
}

fn print_summary(label: &str, summary: &BatchSummary) {
    println!(
        "{}: {} completed, {} cancelled, {} failed (of {})",
        label,
        summary.completed.len(),
        summary.cancelled.len(),
        summary.failed.len(),
        summary.total
    );
}

fn print_reprocess_event(event: &ReprocessEvent, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(event);
    }
    match &event.outcome {
        ReprocessOutcome::Queued => println!("Queued for processing: {}", event.file_id),
        ReprocessOutcome::Failed { reason } => {
            eprintln!("Failed to reprocess {}: {}", event.file_id, reason)
        }
    }
    Ok(())
}

async fn upload(
    config: &ClientConfig,
    library: String,
    paths: Vec<PathBuf>,
    json: bool,
) -> anyhow::Result<()> {
    let files = paths
        .iter()
        .map(|path| {
            PendingFile::from_path(path).with_context(|| format!("Cannot upload {}", path.display()))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let backend = Arc::new(HttpBackend::from_config(config)?);
    let (reprocess_tx, mut reprocess_events) =
        Reprocessor::spawn(backend.clone(), ReprocessConfig::from(config));
    let (session, mut events) =
        UploadSession::spawn(backend, SessionConfig::from(config), Some(reprocess_tx));

    let interrupt = {
        let session = session.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted, cancelling uploads");
                if let Err(e) = session.cancel_all().await {
                    tracing::warn!(error = %e, "Failed to cancel uploads");
                }
            }
        })
    };
    let mut start = {
        let session = session.clone();
        tokio::spawn(async move { session.start(library, files).await })
    };

    let mut printer = EventPrinter::default();
    let mut summary = None;
    let mut started = None;
    loop {
        tokio::select! {
            result = &mut start, if started.is_none() => {
                let result = result.context("Upload task failed")?;
                let failed = result.is_err();
                started = Some(result);
                // a rejected batch produces no further events
                if failed {
                    break;
                }
            }
            event = events.recv() => {
                let Some(event) = event else {
                    break;
                };
                if json {
                    print_json(&event)?;
                } else {
                    printer.print(&event);
                }
                match event {
                    UploadEvent::Finished(s) | UploadEvent::Aborted(s) => summary = Some(s),
                    UploadEvent::Reset { .. } => break,
                    _ => {}
                }
            }
        }
    }

    let started = match started {
        Some(result) => result,
        None => start.await.context("Upload task failed")?,
    };
    interrupt.abort();
    drop(session);

    if let Err(e) = started {
        return Err(anyhow!("{} ({})", e.client_message(), e.error_code()));
    }

    // the worker stops once the session is gone and its requests are done
    while let Some(event) = reprocess_events.recv().await {
        print_reprocess_event(&event, json)?;
    }

    match summary {
        Some(summary) if !summary.failed.is_empty() => Err(anyhow!(
            "{} of {} file(s) failed to upload",
            summary.failed.len(),
            summary.total
        )),
        _ => Ok(()),
    }
}

async fn reprocess(
    config: &ClientConfig,
    library: String,
    ids: Vec<String>,
    json: bool,
) -> anyhow::Result<()> {
    let backend = Arc::new(HttpBackend::from_config(config)?);
    let (requests, mut events) = Reprocessor::spawn(backend, ReprocessConfig::from(config));

    requests
        .send(ReprocessRequest {
            library_id: library,
            file_ids: ids.into_iter().map(FileId::from).collect(),
        })
        .await
        .map_err(|_| anyhow!("Reprocessing worker stopped"))?;
    drop(requests);

    let mut failed = 0;
    while let Some(event) = events.recv().await {
        if matches!(event.outcome, ReprocessOutcome::Failed { .. }) {
            failed += 1;
        }
        print_reprocess_event(&event, json)?;
    }

    if failed > 0 {
        return Err(anyhow!("{} file(s) could not be reprocessed", failed));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = ClientConfig::from_env()
        .context("Failed to load configuration. Set SHELF_API_KEY and SHELF_BACKEND_URL")?;

    let cli = Cli::parse();
    let json = cli.json;

    match cli.command {
        Commands::Upload { library, files } => upload(&config, library, files, json).await?,
        Commands::Reprocess { library, ids } => reprocess(&config, library, ids, json).await?,
        Commands::Files {
            library,
            sort,
            direction,
            page,
            per_page,
        } => {
            let client = ApiClient::from_config(&config)?;
            let response = client
                .list_library_files(&library, sort, direction, page, per_page)
                .await
                .context("Failed to list library files")?;
            if json {
                print_json(&response)?;
            } else {
                println!(
                    "{:<24} {:<40} {:>10} {:>7}  STATUS",
                    "ID", "NAME", "SIZE", "CHUNKS"
                );
                for file in &response.files {
                    let status = match (&file.processing_error_message, file.processed_at) {
                        (Some(error), _) => format!("error: {}", truncate_string(error, 40)),
                        (None, Some(at)) => format!("processed {}", at.format("%Y-%m-%d %H:%M")),
                        (None, None) => "pending".to_string(),
                    };
                    println!(
                        "{:<24} {:<40} {:>10} {:>7}  {}",
                        truncate_string(&file.id, 24),
                        truncate_string(file.name.as_deref().unwrap_or("-"), 40),
                        file.size
                            .map(|s| format_bytes(s.max(0) as u64))
                            .unwrap_or_else(|| "-".to_string()),
                        file.chunks
                            .map(|c| c.to_string())
                            .unwrap_or_else(|| "-".to_string()),
                        status
                    );
                }
                println!(
                    "Page {} ({} of {} file(s))",
                    page,
                    response.files.len(),
                    response.total_count
                );
            }
        }
        Commands::Drop { ids } => {
            let client = ApiClient::from_config(&config)?;
            let ids: Vec<FileId> = ids.into_iter().map(FileId::from).collect();
            let results = client.drop_files(&ids).await;
            let report: Vec<serde_json::Value> = results
                .iter()
                .map(|(id, result)| match result {
                    Ok(_) => serde_json::json!({ "id": id, "dropped": true }),
                    Err(e) => serde_json::json!({ "id": id, "dropped": false, "error": e.client_message() }),
                })
                .collect();
            print_json(&report)?;
            let failed = results.iter().filter(|(_, r)| r.is_err()).count();
            if failed > 0 {
                return Err(anyhow!("{} file(s) could not be dropped", failed));
            }
        }
        Commands::WatchEnrichment { list } => {
            let client = ApiClient::from_config(&config)?;
            let token = CancellationToken::new();
            let interrupt = {
                let token = token.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        token.cancel();
                    }
                })
            };

            client
                .watch_enrichment(&list, token, |update| {
                    if json {
                        if let Err(e) = print_json(&update) {
                            tracing::warn!(error = %e, "Failed to print update");
                        }
                    } else {
                        println!(
                            "{} {} {:<10} {}",
                            update.file_id,
                            update.field_id,
                            update.status.to_string(),
                            update
                                .error
                                .clone()
                                .unwrap_or_else(|| update.display_value())
                        );
                    }
                })
                .await
                .context("Enrichment stream failed")?;
            interrupt.abort();
        }
    }

    Ok(())
}
