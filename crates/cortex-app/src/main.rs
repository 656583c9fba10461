//! Cortex client binary - composition root.
//!
//! Ties the Cortex crates together behind one command line:
//! 1. Load configuration from TOML and apply CLI/env overrides
//! 2. Install the tracing subscriber (stderr, so stdout stays clean)
//! 3. Build the HTTP knowledge-base client and the shared event bus
//! 4. Run one client flow per subcommand

mod cli;
mod lines;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::DateTime;
use clap::Parser;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::sync::broadcast;

use cortex_client::{HttpKnowledgeBase, KnowledgeBase};
use cortex_core::config::{CortexConfig, DocumentsConfig};
use cortex_core::{
    ClientEvent, DocumentSummary, DocumentWithChunks, EventBus, IngestSource, NotificationLevel,
    SessionId, SourceFilter, UploadJob, UploadStatus, WatcherSnapshot,
};
use cortex_dictation::{DictationController, DictationState, EditorSurface, TranscriptBuffer};
use cortex_session::{
    AskSession, AskSessionState, DocumentBrowser, DragController, DraggablePositionStore,
    DroppedFile, FilePreferences, PointerEvent, PreferenceStore, RecentDocuments, UploadDispatcher,
    Viewport, WatcherStatus, WatcherStatusPoller,
};

use cli::{CliArgs, Command, WatcherAction};
use lines::LineSource;

type AppResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Shared handles for the client flows.
struct App {
    config: CortexConfig,
    kb: Arc<dyn KnowledgeBase>,
    events: EventBus,
    data_dir: PathBuf,
}

impl App {
    fn recent(&self, documents: &DocumentsConfig) -> Arc<RecentDocuments> {
        Arc::new(RecentDocuments::new(
            Arc::clone(&self.kb),
            documents,
            self.events.clone(),
        ))
    }

    fn dispatcher(&self) -> UploadDispatcher {
        UploadDispatcher::new(
            Arc::clone(&self.kb),
            self.recent(&self.config.documents),
            self.events.clone(),
        )
    }

    fn browser(&self) -> DocumentBrowser {
        DocumentBrowser::new(
            Arc::clone(&self.kb),
            self.recent(&self.config.documents),
            self.events.clone(),
        )
    }
}

/// Expand ~ to home directory in a path string.
fn resolve_data_dir(data_dir: &str) -> PathBuf {
    if data_dir.starts_with("~/") || data_dir.starts_with("~\\") {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(&data_dir[2..])
    } else {
        PathBuf::from(data_dir)
    }
}

/// Format an epoch-millisecond timestamp, or "never" for 0.
fn format_epoch_millis(millis: i64) -> String {
    if millis <= 0 {
        return "never".to_string();
    }
    DateTime::from_timestamp_millis(millis)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| millis.to_string())
}

/// Print queued notifications. Returns true if any was an error.
fn print_notifications(rx: &mut broadcast::Receiver<ClientEvent>) -> bool {
    let mut failed = false;
    while let Ok(event) = rx.try_recv() {
        if let ClientEvent::Notification { level, message, .. } = event {
            match level {
                NotificationLevel::Error => {
                    failed = true;
                    eprintln!("{}", message);
                }
                _ => println!("{}", message),
            }
        }
    }
    failed
}

fn summary_of(document: &DocumentWithChunks) -> DocumentSummary {
    DocumentSummary {
        id: document.document.id,
        title: document.document.title.clone(),
        content_type: document.document.content_type.clone(),
        indexed_at: document.document.indexed_at,
    }
}

// =============================================================================
// Ask
// =============================================================================

async fn run_ask(
    app: &App,
    question: &str,
    fallback: bool,
    document: Option<i64>,
    stream: bool,
) -> AppResult {
    let filter = match document {
        Some(id) => {
            let document = app.browser().open(id).await?;
            Some(SourceFilter::for_document(&summary_of(&document)))
        }
        None => None,
    };

    let session = AskSession::new(
        Arc::clone(&app.kb),
        &app.config.ask,
        SessionId::process(),
        app.events.clone(),
    );
    let allow_fallback = fallback || app.config.ask.allow_fallback;
    let submitted = if stream {
        session.submit_streaming(question, allow_fallback, filter)
    } else {
        session.submit(question, allow_fallback, filter)
    };
    if submitted.is_none() {
        return Err("question cannot be empty".into());
    }

    let mut states = session.subscribe();
    let mut partial = session.subscribe_partial();
    let mut printed = 0;
    let state = loop {
        tokio::select! {
            state = states.wait_for(|s| !s.is_pending()) => break state?.clone(),
            changed = partial.changed(), if stream => {
                changed?;
                let text = partial.borrow_and_update().clone();
                printed = print_unseen(&text, printed)?;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ask cancelled");
                return Ok(());
            }
        }
    };

    match state {
        AskSessionState::Success(result) => {
            if printed > 0 {
                print_unseen(&session.partial_answer(), printed)?;
                println!();
            } else {
                println!("{}", result.answer);
            }
            println!();
            println!(
                "Confidence: {} ({:.2})",
                result.confidence_label, result.confidence
            );
            if !result.citations.is_empty() {
                println!("Sources:");
                for (i, citation) in result.citations.iter().enumerate() {
                    if citation.location.is_empty() {
                        println!("  [{}] {}", i + 1, citation.document_title);
                    } else {
                        println!(
                            "  [{}] {} ({})",
                            i + 1,
                            citation.document_title,
                            citation.location
                        );
                    }
                }
            }
            Ok(())
        }
        AskSessionState::Error(message) => {
            if printed > 0 {
                println!();
            }
            Err(message.into())
        }
        other => Err(format!("unexpected ask state: {}", other.name()).into()),
    }
}

/// Text appended since `printed` bytes were shown.
fn unseen_suffix(text: &str, printed: usize) -> &str {
    text.get(printed..).unwrap_or_default()
}

/// Print the unseen tail of a streamed answer; returns the new printed length.
fn print_unseen(text: &str, printed: usize) -> AppResult<usize> {
    let suffix = unseen_suffix(text, printed);
    if suffix.is_empty() {
        return Ok(printed);
    }
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(suffix.as_bytes())?;
    stdout.flush()?;
    Ok(printed + suffix.len())
}

// =============================================================================
// Ingestion
// =============================================================================

/// Await an ingestion job and print its notifications.
async fn finish_ingest(
    job: impl std::future::Future<Output = cortex_core::Result<Option<UploadJob>>>,
    rx: &mut broadcast::Receiver<ClientEvent>,
) -> AppResult {
    let job = job.await?;
    let notified_failure = print_notifications(rx);
    match job {
        Some(job) if job.status == UploadStatus::Failed || notified_failure => Err(job
            .error_message
            .unwrap_or_else(|| "upload failed".to_string())
            .into()),
        Some(job) => {
            tracing::debug!(job_id = %job.id, label = %job.label, "Ingestion finished");
            Ok(())
        }
        None => Ok(()),
    }
}

async fn run_upload(app: &App, paths: &[PathBuf]) -> AppResult {
    let Some(first) = paths.first() else {
        return Ok(());
    };
    if paths.len() > 1 {
        eprintln!("Only the first file is uploaded; ignoring {} more", paths.len() - 1);
    }
    let bytes = tokio::fs::read(first).await?;
    let file_name = first
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| first.display().to_string());

    let mut rx = app.events.subscribe();
    let dispatcher = app.dispatcher();
    finish_ingest(
        dispatcher.dispatch_drop(vec![DroppedFile { file_name, bytes }]),
        &mut rx,
    )
    .await
}

async fn run_source(app: &App, source: IngestSource) -> AppResult {
    let mut rx = app.events.subscribe();
    let dispatcher = app.dispatcher();
    finish_ingest(async { dispatcher.dispatch(source).await.map(Some) }, &mut rx).await
}

async fn read_stdin() -> AppResult<String> {
    let mut content = String::new();
    tokio::io::stdin().read_to_string(&mut content).await?;
    Ok(content)
}

// =============================================================================
// Documents
// =============================================================================

async fn run_recent(app: &App, limit: Option<u32>) -> AppResult {
    let config = DocumentsConfig {
        recent_limit: limit.unwrap_or(app.config.documents.recent_limit),
    };
    let documents = app.recent(&config).get().await?;
    if documents.is_empty() {
        println!("No documents yet.");
        return Ok(());
    }
    for doc in documents {
        println!(
            "{:>6}  {:<19}  {:<24}  {}",
            doc.id,
            doc.indexed_display(),
            doc.content_type,
            doc.title
        );
    }
    Ok(())
}

async fn run_show(app: &App, id: i64) -> AppResult {
    let document = app.browser().open(id).await?;
    let doc = &document.document;
    println!("{}", doc.title);
    println!("Type: {}", doc.content_type);
    if let Some(indexed) = doc.indexed_at {
        println!("Indexed: {}", indexed.format("%Y-%m-%d %H:%M:%S"));
    }
    println!("Chunks: {}", document.chunks.len());
    for chunk in &document.chunks {
        println!();
        let mut header = format!("--- #{}", chunk.chunk_index);
        if let Some(ref heading) = chunk.heading {
            header.push_str(&format!(" {}", heading));
        }
        if let Some(page) = chunk.page_number {
            header.push_str(&format!(" (page {})", page));
        }
        println!("{}", header);
        println!("{}", chunk.content);
    }
    Ok(())
}

async fn run_delete(app: &App, id: i64) -> AppResult {
    app.browser().delete(id).await?;
    println!("Document {} deleted", id);
    Ok(())
}

// =============================================================================
// Watcher
// =============================================================================

/// Human-readable lines describing a watcher snapshot.
fn snapshot_lines(snapshot: &WatcherSnapshot) -> Vec<String> {
    if !snapshot.enabled {
        return vec!["Watcher: disabled".to_string()];
    }
    let mut lines = vec![
        "Watcher: enabled".to_string(),
        format!("Root: {} (recursive: {})", snapshot.root, snapshot.recursive),
    ];
    if !snapshot.processed_root.is_empty() {
        lines.push(format!("Processed: {}", snapshot.processed_root));
    }
    if !snapshot.poll_interval.is_empty() {
        lines.push(format!("Interval: {}", snapshot.poll_interval));
    }
    if snapshot.is_scanning() {
        lines.push(format!(
            "Scan in progress since {}",
            format_epoch_millis(snapshot.last_scan_start)
        ));
    } else if snapshot.has_scanned() {
        lines.push(format!(
            "Last scan: {}",
            format_epoch_millis(snapshot.last_scan_end)
        ));
    } else {
        lines.push("No scan has completed yet".to_string());
    }
    lines.push(format!(
        "Scanned: {}  Ingested: {}  Failed: {}",
        snapshot.scanned, snapshot.ingested, snapshot.failed
    ));
    lines
}

fn print_snapshot(snapshot: &WatcherSnapshot) {
    for line in snapshot_lines(snapshot) {
        println!("{}", line);
    }
}

async fn run_watcher(app: &App, action: WatcherAction) -> AppResult {
    let poller = Arc::new(WatcherStatusPoller::new(
        Arc::clone(&app.kb),
        &app.config.watcher,
        app.events.clone(),
    ));

    match action {
        WatcherAction::Status => print_snapshot(&poller.fetch_status().await?),
        WatcherAction::Scan => {
            let snapshot = poller.trigger_scan().await?;
            println!("Scan requested");
            print_snapshot(&snapshot);
        }
        WatcherAction::Watch => {
            let mut rx = poller.subscribe();
            let runner = {
                let poller = Arc::clone(&poller);
                tokio::spawn(async move { poller.run().await })
            };
            loop {
                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        match rx.borrow_and_update().clone() {
                            WatcherStatus::Available(snapshot) => {
                                print_snapshot(&snapshot);
                                println!();
                            }
                            WatcherStatus::Unavailable(message) => eprintln!("{}", message),
                            WatcherStatus::Unknown => {}
                        }
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            poller.shutdown();
            runner.await?;
        }
    }
    Ok(())
}

// =============================================================================
// Dictation
// =============================================================================

async fn run_dictate(app: &App, save: bool, title: Option<String>) -> AppResult {
    let source = Arc::new(LineSource::new(BufReader::new(tokio::io::stdin())));
    let (controller, mut fragments) = DictationController::new(
        source,
        app.config.dictation.language.clone(),
        app.events.clone(),
    );
    let mut buffer = TranscriptBuffer::new(EditorSurface::VoiceTab);
    let mut states = controller.subscribe_state();
    let mut preview = controller.subscribe_preview();

    controller.start(EditorSurface::VoiceTab)?;
    loop {
        tokio::select! {
            Some(fragment) = fragments.recv() => {
                if buffer.apply(&fragment) {
                    eprintln!("> {}", buffer.text());
                }
            }
            Ok(()) = preview.changed() => {
                let interim = preview.borrow_and_update().clone();
                buffer.set_preview(interim);
                if !buffer.preview().is_empty() {
                    eprintln!("~ {}", buffer.display_text());
                }
            }
            changed = states.changed() => {
                if changed.is_err() || *states.borrow_and_update() != DictationState::Listening {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                controller.stop();
                break;
            }
        }
    }
    buffer.drain(&mut fragments);

    let transcript = buffer.take();
    if transcript.is_empty() {
        eprintln!("Nothing was dictated.");
        return Ok(());
    }
    println!("{}", transcript);

    if save {
        run_source(
            app,
            IngestSource::TextNote {
                title,
                content: transcript,
                tags: vec!["voice".to_string()],
            },
        )
        .await?;
    }
    Ok(())
}

// =============================================================================
// Widget
// =============================================================================

fn run_widget(app: &App, viewport: (f64, f64), reset: bool, drag: Option<(f64, f64)>) -> AppResult {
    let prefs: Arc<dyn PreferenceStore> =
        Arc::new(FilePreferences::new(app.data_dir.join("preferences.json")));
    let store = DraggablePositionStore::new(prefs, &app.config.widget);
    if reset {
        store.reset()?;
    }

    let viewport = Viewport {
        width: viewport.0,
        height: viewport.1,
    };
    let mut widget = DragController::mount(store, viewport);
    if let Some((dx, dy)) = drag {
        let start = widget.position();
        widget.pointer_down(PointerEvent {
            pointer_id: 1,
            x: start.x,
            y: start.y,
        });
        widget.pointer_up(PointerEvent {
            pointer_id: 1,
            x: start.x + dx,
            y: start.y + dy,
        })?;
    }

    let position = widget.position();
    println!("{:.0},{:.0}", position.x, position.y);
    Ok(())
}

fn ensure_dir(dir: &Path) -> AppResult {
    if let Err(e) = std::fs::create_dir_all(dir) {
        tracing::error!(path = %dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> AppResult {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let mut config = CortexConfig::load_or_default(&config_file);
    config.api.base_url = args.resolve_api_url(&config.api.base_url);

    // Tracing.
    let filter = args.resolve_log_filter(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&filter)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!("Starting Cortex v{}", env!("CARGO_PKG_VERSION"));
    tracing::debug!(path = %config_file.display(), base_url = %config.api.base_url, "Configuration loaded");

    let kb: Arc<dyn KnowledgeBase> = Arc::new(HttpKnowledgeBase::new(&config.api)?);
    let data_dir = resolve_data_dir(&config.general.data_dir);
    let app = App {
        config,
        kb,
        events: EventBus::default(),
        data_dir,
    };

    match args.command {
        Command::Ask {
            question,
            fallback,
            document,
            stream,
        } => run_ask(&app, &question, fallback, document, stream).await,
        Command::Upload { paths } => run_upload(&app, &paths).await,
        Command::IngestUrl { url } => run_source(&app, IngestSource::Url { url }).await,
        Command::Note {
            title,
            tags,
            content,
        } => {
            let content = match content {
                Some(content) => content,
                None => read_stdin().await?,
            };
            run_source(
                &app,
                IngestSource::TextNote {
                    title,
                    content,
                    tags,
                },
            )
            .await
        }
        Command::Recent { limit } => run_recent(&app, limit).await,
        Command::Show { id } => run_show(&app, id).await,
        Command::Delete { id } => run_delete(&app, id).await,
        Command::Watcher { action } => run_watcher(&app, action).await,
        Command::Dictate { save, title } => run_dictate(&app, save, title).await,
        Command::Widget {
            viewport,
            reset,
            drag,
        } => {
            ensure_dir(&app.data_dir)?;
            run_widget(&app, viewport, reset, drag)
        }
    }
}
