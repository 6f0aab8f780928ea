//! Photo Booth CLI
//!
//! Runs the kiosk loop or one-off maintenance commands against the booth
//! configured in a TOML file.

use clap::{Parser, Subcommand};
use photobooth::{
    capture::{shared, Camera, CameraError, PreviewStream, SharedCamera},
    compose::{FrameCompositor, FrameLibrary},
    config::{BoothConfig, LogConfig},
    metrics::{MetricsRegistry, MetricsSnapshot},
    printing::{backend_from_config, PrintJobManager},
    session::{SessionController, SessionEvent, SessionState},
    storage::{PhotoId, StorageManager, SyncWorker},
    SessionError,
};
use std::error::Error;
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

type BoxError = Box<dyn Error + Send + Sync>;

#[derive(Parser)]
#[command(name = "photobooth", version, about = "Kiosk photo booth")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "./config/settings.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the kiosk loop, reading commands from stdin (default).
    Run,
    /// Take one photo unattended and optionally print it.
    Capture {
        #[arg(long)]
        copies: Option<u32>,
    },
    /// Mirror unsynced photos to the sync target.
    Sync,
    /// List stored photos.
    List,
    /// List available frames.
    Frames,
    /// Validate the configuration and exit.
    CheckConfig,
    /// Cancel all outstanding print jobs.
    ClearQueue,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match BoothConfig::load_or_default(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration {}: {}", cli.config.display(), e);
            return ExitCode::from(1);
        }
    };

    init_logging(&config.logs);
    info!("Photo Booth v{}", photobooth::VERSION);

    let result = match cli.command.unwrap_or(Command::Run) {
        Command::CheckConfig => check_config(&cli.config, &config),
        Command::Frames => {
            list_frames(&config);
            Ok(())
        }
        Command::List => list_photos(&config),
        Command::Sync => sync_once(&config),
        Command::ClearQueue => clear_queue(&config).await,
        Command::Capture { copies } => capture_once(&config, copies).await,
        Command::Run => run_kiosk(config).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Fatal error");
            ExitCode::from(1)
        }
    }
}

/// Logs to stderr and, when possible, to the configured log file.
fn init_logging(config: &LogConfig) {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file = config
        .log_path
        .parent()
        .map_or(Ok(()), fs::create_dir_all)
        .and_then(|()| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&config.log_path)
        });

    let stderr = fmt::layer().with_writer(std::io::stderr);
    match file {
        Ok(file) => {
            tracing_subscriber::registry()
                .with(filter())
                .with(stderr)
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .init();
        }
        Err(e) => {
            tracing_subscriber::registry()
                .with(filter())
                .with(stderr)
                .init();
            warn!(path = %config.log_path.display(), error = %e, "Log file unavailable, logging to stderr only");
        }
    }
}

fn open_camera(config: &BoothConfig) -> Result<SharedCamera, CameraError> {
    #[cfg(feature = "camera")]
    {
        let mut camera = photobooth::capture::NokhwaCamera::new();
        camera.open(&config.camera)?;
        Ok(shared(camera))
    }
    #[cfg(not(feature = "camera"))]
    {
        warn!("Built without the camera feature, using a synthetic camera");
        let mut camera = photobooth::capture::MockCamera::new();
        camera.open(&config.camera)?;
        Ok(shared(camera))
    }
}

/// Everything a running booth owns.
struct Booth {
    config: BoothConfig,
    camera: SharedCamera,
    storage: Arc<StorageManager>,
    compositor: Arc<FrameCompositor>,
    printer: Arc<PrintJobManager>,
    controller: Arc<SessionController>,
    sync: Option<SyncWorker>,
}

impl Booth {
    fn open(config: BoothConfig, with_sync: bool) -> Result<Self, BoxError> {
        let storage = Arc::new(StorageManager::open(config.storage.clone())?);
        let compositor = Arc::new(FrameCompositor::new(FrameLibrary::new(
            &config.frames.frames_path,
        )));
        let camera = open_camera(&config)?;
        let printer = Arc::new(PrintJobManager::new(
            backend_from_config(&config.printing),
            storage.clone(),
            config.printing.clone(),
        ));

        let sync = (with_sync && config.storage.auto_sync).then(|| SyncWorker::spawn(storage.clone()));
        let mut controller = SessionController::new(
            camera.clone(),
            compositor.clone(),
            storage.clone(),
            &config,
        )
        .resume_after(storage.last_session_id());
        if let Some(worker) = &sync {
            controller = controller.with_sync(worker.handle());
        }

        Ok(Self {
            config,
            camera,
            storage,
            compositor,
            printer,
            controller: Arc::new(controller),
            sync,
        })
    }

    fn metrics(&self) -> MetricsSnapshot {
        snapshot(&self.controller, &self.storage, &self.printer)
    }

    fn console(&self, registry: Arc<MetricsRegistry>) -> Console {
        Console {
            controller: Arc::clone(&self.controller),
            storage: Arc::clone(&self.storage),
            compositor: Arc::clone(&self.compositor),
            printer: Arc::clone(&self.printer),
            default_copies: self.config.printing.default_copies,
            registry,
            last_photo: Arc::new(Mutex::new(None)),
        }
    }

    async fn shutdown(self) {
        if self.controller.state() != SessionState::Idle {
            if let Err(e) = self.controller.cancel().await {
                warn!(error = %e, "Failed to cancel session on shutdown");
            }
        }
        if let Some(sync) = self.sync {
            sync.shutdown().await;
        }
        self.camera
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .close();
    }
}

fn snapshot(
    controller: &SessionController,
    storage: &StorageManager,
    printer: &PrintJobManager,
) -> MetricsSnapshot {
    MetricsSnapshot::from_components(
        controller.state(),
        &controller.stats(),
        &storage.stats(),
        &printer.stats(),
    )
}

fn check_config(path: &std::path::Path, config: &BoothConfig) -> Result<(), BoxError> {
    println!("Configuration OK: {}", path.display());
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

fn list_frames(config: &BoothConfig) {
    let library = FrameLibrary::new(&config.frames.frames_path);
    for name in library.names() {
        let marker = if config.frames.default_frame.as_deref() == Some(name.as_str()) {
            " (default)"
        } else {
            ""
        };
        println!("{name}{marker}");
    }
}

fn list_photos(config: &BoothConfig) -> Result<(), BoxError> {
    let storage = StorageManager::open(config.storage.clone())?;
    for photo in storage.photos() {
        println!(
            "{}  {}  {}",
            photo.id,
            photo.created_at.format("%Y-%m-%d %H:%M:%S"),
            if photo.synced { "synced" } else { "local" }
        );
    }
    let stats = storage.stats();
    println!("{} stored, {} unsynced", stats.stored, stats.unsynced);
    Ok(())
}

fn sync_once(config: &BoothConfig) -> Result<(), BoxError> {
    let storage = StorageManager::open(config.storage.clone())?;
    let report = storage.sync_pending();
    println!("{} synced, {} failed", report.synced, report.failed);
    Ok(())
}

async fn clear_queue(config: &BoothConfig) -> Result<(), BoxError> {
    let storage = Arc::new(StorageManager::open(config.storage.clone())?);
    let printer = PrintJobManager::new(
        backend_from_config(&config.printing),
        storage,
        config.printing.clone(),
    );
    let cancelled = printer.clear_queue().await?;
    println!("{cancelled} print jobs cancelled");
    Ok(())
}

async fn capture_once(config: &BoothConfig, copies: Option<u32>) -> Result<(), BoxError> {
    let booth = Booth::open(config.clone(), false)?;
    if let Some(copies) = copies {
        booth.printer.validate_copies(copies)?;
    }

    booth.controller.start_session().await?;
    let state = match booth.controller.run_countdown().await {
        Err(SessionError::Compose(e)) => {
            warn!(error = %e, "Frame unavailable, keeping the original image");
            booth.controller.use_original().await?;
            SessionState::Review
        }
        other => other?,
    };
    if state != SessionState::Review {
        return Err(format!("session ended in state {state}").into());
    }

    let photo = booth.controller.accept().await?;
    println!("Saved {}", photo.framed_path.display());

    if booth.config.storage.auto_sync {
        let storage = booth.storage.clone();
        let report = tokio::task::spawn_blocking(move || storage.sync_pending()).await?;
        info!(synced = report.synced, failed = report.failed, "Sync finished");
    }

    if let Some(copies) = copies {
        let job = booth.printer.submit(&photo.id, copies).await?;
        println!("Print {} submitted ({} copies)", job.id, job.copies);
    }

    booth.shutdown().await;
    Ok(())
}

async fn run_kiosk(config: BoothConfig) -> Result<(), BoxError> {
    let booth = Booth::open(config, true)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    {
        let tx = Arc::clone(&shutdown_tx);
        ctrlc::set_handler(move || {
            let _ = tx.send(true);
        })?;
    }

    let preview = PreviewStream::spawn(booth.camera.clone(), &booth.config.camera)?;
    if let Err(e) = booth.printer.reconcile().await {
        warn!(error = %e, "Could not reconcile print jobs from a previous run");
    }
    let monitor = Arc::clone(&booth.printer).spawn_monitor(shutdown_rx.clone());

    let registry = Arc::new(MetricsRegistry::new()?);
    #[cfg(feature = "metrics")]
    let metrics_state = {
        use photobooth::metrics::{MetricsServer, MetricsServerConfig};
        let server = MetricsServer::new(
            MetricsServerConfig::with_port(booth.config.metrics.port),
            MetricsRegistry::new()?,
        );
        let state = server.state();
        if booth.config.metrics.port != 0 {
            let stop = shutdown_rx.clone();
            tokio::spawn(async move {
                if let Err(e) = server.run(stop).await {
                    error!(error = %e, "Metrics server failed");
                }
            });
        }
        state
    };

    let console = booth.console(Arc::clone(&registry));
    let mut commands = JoinSet::new();
    let mut events = booth.controller.subscribe();
    let mut shutdown = shutdown_rx.clone();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(5));

    info!("Booth ready; commands: start, retake, accept, cancel, frame <name|none>, print [copies], status, metrics, quit");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("Shutdown requested");
                break;
            }
            _ = ticker.tick() => {
                let snapshot = booth.metrics();
                registry.update(&snapshot);
                #[cfg(feature = "metrics")]
                metrics_state.write().await.update(&snapshot);
            }
            event = events.recv() => {
                if let Ok(event) = event {
                    print_event(&event);
                    if let SessionEvent::Committed { photo_id } = event {
                        console.remember(photo_id);
                    }
                }
            }
            Some(joined) = commands.join_next(), if !commands.is_empty() => {
                if let Err(e) = joined {
                    warn!(error = %e, "Command task failed");
                }
            }
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        error!(error = %e, "Failed to read command");
                        break;
                    }
                };
                let mut words = line.split_whitespace();
                match (words.next(), words.next()) {
                    (Some("quit"), _) => break,
                    (Some(command), arg) => {
                        // Commands run beside the loop so `cancel` and Ctrl-C
                        // stay responsive during a slow commit.
                        let console = console.clone();
                        let command = command.to_string();
                        let arg = arg.map(str::to_string);
                        commands.spawn(async move {
                            console.handle(&command, arg.as_deref()).await;
                        });
                    }
                    (None, _) => {}
                }
            }
        }
    }

    let _ = shutdown_tx.send(true);
    preview.stop();
    if booth.controller.state() != SessionState::Idle {
        if let Err(e) = booth.controller.cancel().await {
            warn!(error = %e, "Failed to cancel session on shutdown");
        }
    }
    while let Some(joined) = commands.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "Command task failed");
        }
    }
    if let Err(e) = monitor.await {
        warn!(error = %e, "Print monitor task failed");
    }
    booth.shutdown().await;
    info!("Booth stopped");
    Ok(())
}

/// Shared handles for commands read from stdin.
#[derive(Clone)]
struct Console {
    controller: Arc<SessionController>,
    storage: Arc<StorageManager>,
    compositor: Arc<FrameCompositor>,
    printer: Arc<PrintJobManager>,
    default_copies: u32,
    registry: Arc<MetricsRegistry>,
    last_photo: Arc<Mutex<Option<PhotoId>>>,
}

impl Console {
    fn remember(&self, photo_id: PhotoId) {
        *self
            .last_photo
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(photo_id);
    }

    fn last_photo(&self) -> Option<PhotoId> {
        self.last_photo
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    async fn handle(&self, command: &str, arg: Option<&str>) {
        if let Err(e) = self.run(command, arg).await {
            println!("error: {e}");
        }
    }

    async fn run(&self, command: &str, arg: Option<&str>) -> Result<(), BoxError> {
        let controller = &self.controller;
        match command {
            "start" => {
                controller.start_session().await?;
                if let Err(e) = controller.run_countdown().await {
                    warn!(error = %e, kind = ?e.kind(), "Capture did not reach review");
                }
            }
            "retake" => {
                controller.retake().await?;
            }
            "accept" => {
                let photo = controller.accept().await?;
                println!("saved {}", photo.id);
            }
            "cancel" => controller.cancel().await?,
            "retry" => match controller.state() {
                SessionState::Captured => {
                    controller.retry_compose().await?;
                }
                _ => {
                    controller.retry_commit().await?;
                }
            },
            "original" => controller.use_original().await?,
            "frame" => {
                let name = arg.filter(|name| *name != "none").map(str::to_string);
                controller.select_frame(name)?;
            }
            "frames" => {
                for name in self.compositor.library().names() {
                    println!("{name}");
                }
            }
            "print" => {
                let copies = match arg {
                    Some(arg) => arg.parse()?,
                    None => self.default_copies,
                };
                let photo = self.last_photo().ok_or("no photo committed yet")?;
                let job = self.printer.submit(&photo, copies).await?;
                println!("print {} {}", job.id, job.status);
            }
            "jobs" => {
                for job in self.printer.jobs() {
                    println!("{} {} x{} {}", job.id, job.source_photo_id, job.copies, job.status);
                }
            }
            "clear-queue" => {
                let cancelled = self.printer.clear_queue().await?;
                println!("{cancelled} print jobs cancelled");
            }
            "status" => {
                let snapshot = snapshot(controller, &self.storage, &self.printer);
                println!(
                    "state={} stored={} unsynced={} frame={}",
                    snapshot.session_state,
                    snapshot.stored_photos,
                    snapshot.unsynced_photos,
                    controller.selected_frame().as_deref().unwrap_or("none")
                );
            }
            "metrics" => {
                self.registry
                    .update(&snapshot(controller, &self.storage, &self.printer));
                print!("{}", self.registry.encode()?);
            }
            other => println!("unknown command: {other}"),
        }
        Ok(())
    }
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::StateChanged { from, to } => println!("state: {from} -> {to}"),
        SessionEvent::CountdownTick { remaining } => println!("countdown: {remaining}"),
        SessionEvent::ComposeFailed { reason } => {
            println!("compose failed: {reason} (retry or original)")
        }
        SessionEvent::CaptureFailed { reason } => println!("capture failed: {reason}"),
        SessionEvent::Committed { photo_id } => println!("committed: {photo_id}"),
        SessionEvent::CommitFailed { reason } => {
            println!("commit failed: {reason} (retry or cancel)")
        }
        SessionEvent::Cancelled => println!("cancelled"),
    }
}
