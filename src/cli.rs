use std::{
    fs,
    future::Future,
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use directories::ProjectDirs;
use log::{debug, info, warn};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::{
    db::Database,
    error::MonitorError,
    models::SessionRecord,
    monitor::{MonitorController, MonitorEvent},
    readings::{self, ExportArtifact, SummaryRow},
    sensing::{
        Classifier, CommandClassifier, DemoClassifier, FrameSource, ImageDirSource,
        SyntheticSource,
    },
    session::SessionRequest,
    settings::{
        MonitorSettings, SettingsStore, MAX_DURATION_MINUTES, MAX_INTERVAL_SECS,
        MIN_DURATION_MINUTES, MIN_INTERVAL_SECS,
    },
};

const DB_FILE: &str = "moodwatch.sqlite3";
const SETTINGS_FILE: &str = "settings.json";
const DEMO_FRAME_SIZE: (u32, u32) = (320, 240);
const DEMO_FPS: u32 = 15;

/// timed emotion sampling sessions with spreadsheet export
#[derive(Parser, Debug)]
#[clap(version, about)]
pub struct Cli {
    /// directory holding the session archive and settings
    #[clap(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// run one timed monitoring session
    Monitor(MonitorArgs),
    /// list archived sessions, newest first
    Sessions(SessionsArgs),
    /// write an archived session to an .xlsx file
    Export(ExportArgs),
    /// show or change settings
    Settings(SettingsArgs),
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// subject identifier, used in the export file name
    #[clap(short = 's', long)]
    pub subject: String,

    /// session length in minutes
    #[clap(short = 'd', long, value_parser = clap::value_parser!(u64).range(MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES))]
    pub duration: Option<u64>,

    /// seconds between two samples
    #[clap(short = 'i', long, value_parser = clap::value_parser!(u64).range(MIN_INTERVAL_SECS..=MAX_INTERVAL_SECS))]
    pub interval: Option<u64>,

    /// replay frames from a directory of images instead of synthetic frames
    #[clap(long)]
    pub images: Option<PathBuf>,

    /// start over when the image directory is exhausted
    #[clap(long = "loop", requires = "images")]
    pub looping: bool,

    /// frame rate used when replaying images
    #[clap(long, default_value_t = 30)]
    pub fps: u32,

    /// external classifier command: PNG on stdin, JSON on stdout
    #[clap(long)]
    pub classifier_cmd: Option<String>,

    /// seed for the built-in demo classifier
    #[clap(long, default_value_t = 42)]
    pub seed: u64,

    /// fraction of demo classifications that fail, between 0 and 1
    #[clap(long, default_value_t = 0.0)]
    pub failure_rate: f64,

    /// directory for the spreadsheet export
    #[clap(short = 'o', long)]
    pub out: Option<PathBuf>,

    /// skip the spreadsheet export
    #[clap(long)]
    pub no_export: bool,
}

#[derive(Args, Debug)]
pub struct SessionsArgs {
    /// only sessions of this subject
    #[clap(long)]
    pub subject: Option<String>,

    #[clap(long, default_value_t = 20)]
    pub limit: usize,

    #[clap(long, default_value_t = 0)]
    pub offset: usize,

    /// delete the archived session with this id instead of listing
    #[clap(long, conflicts_with_all = ["subject", "limit", "offset"])]
    pub delete: Option<String>,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// session id as printed by `sessions`
    #[clap(long)]
    pub session: String,

    /// output directory
    #[clap(short = 'o', long)]
    pub out: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct SettingsArgs {
    #[clap(long)]
    pub buffer_capacity: Option<usize>,

    /// default session length in minutes
    #[clap(long)]
    pub default_duration: Option<u64>,

    /// default seconds between samples
    #[clap(long)]
    pub default_interval: Option<u64>,

    #[clap(long)]
    pub classify_timeout: Option<u64>,

    #[clap(long)]
    pub downscale_factor: Option<f32>,

    #[clap(long)]
    pub export_dir: Option<PathBuf>,

    /// restore every setting to its default
    #[clap(long)]
    pub reset: bool,
}

impl SettingsArgs {
    fn is_empty(&self) -> bool {
        self.buffer_capacity.is_none()
            && self.default_duration.is_none()
            && self.default_interval.is_none()
            && self.classify_timeout.is_none()
            && self.downscale_factor.is_none()
            && self.export_dir.is_none()
            && !self.reset
    }

    fn apply(&self, current: MonitorSettings) -> MonitorSettings {
        let mut settings = if self.reset {
            MonitorSettings::default()
        } else {
            current
        };
        if let Some(value) = self.buffer_capacity {
            settings.buffer_capacity = value;
        }
        if let Some(value) = self.default_duration {
            settings.default_duration_minutes = value;
        }
        if let Some(value) = self.default_interval {
            settings.default_interval_secs = value;
        }
        if let Some(value) = self.classify_timeout {
            settings.classify_timeout_secs = value;
        }
        if let Some(value) = self.downscale_factor {
            settings.downscale_factor = value;
        }
        if let Some(dir) = &self.export_dir {
            settings.export_dir = Some(dir.clone());
        }
        settings
    }
}

/// Resolves the data directory: `--data-dir` first, then the platform default.
pub fn data_dir(cli_override: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = cli_override {
        return Ok(dir.to_path_buf());
    }
    ProjectDirs::from("", "", "moodwatch")
        .map(|dirs| dirs.data_local_dir().to_path_buf())
        .ok_or_else(|| anyhow!("could not determine a data directory; pass --data-dir"))
}

pub async fn execute(cli: Cli) -> Result<()> {
    let data_dir = data_dir(cli.data_dir.as_deref())?;
    fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;
    let store = SettingsStore::new(data_dir.join(SETTINGS_FILE))?;

    match cli.command {
        Command::Monitor(args) => {
            let db = open_database(&data_dir).await?;
            run_monitor(args, db, store.get()).await
        }
        Command::Sessions(args) => {
            let db = open_database(&data_dir).await?;
            list_sessions(args, &db).await
        }
        Command::Export(args) => {
            let db = open_database(&data_dir).await?;
            export_archived(args, &db, &store.get()).await
        }
        Command::Settings(args) => update_settings(args, &store),
    }
}

async fn open_database(data_dir: &Path) -> Result<Database> {
    let db = Database::new(data_dir.join(DB_FILE))?;
    recover_interrupted(&db).await?;
    Ok(db)
}

/// Closes sessions that were still Running when a previous process died.
pub async fn recover_interrupted(db: &Database) -> Result<usize> {
    let incomplete = db.get_incomplete_sessions().await?;
    let now = chrono::Utc::now();
    for session in &incomplete {
        warn!(
            "Recovered incomplete session {} for subject {}; marking as interrupted",
            session.id, session.subject_id
        );
        db.mark_session_interrupted(&session.id, now).await?;
    }
    Ok(incomplete.len())
}

async fn run_monitor(args: MonitorArgs, db: Database, settings: MonitorSettings) -> Result<()> {
    let request = SessionRequest {
        subject_id: args.subject.clone(),
        duration: Duration::from_secs(
            args.duration.unwrap_or(settings.default_duration_minutes) * 60,
        ),
        interval: Duration::from_secs(args.interval.unwrap_or(settings.default_interval_secs)),
    };
    let source = frame_source(&args)?;
    let classifier = classifier(&args, &settings)?;
    let export_dir = args
        .out
        .clone()
        .or_else(|| settings.export_dir.clone())
        .unwrap_or_else(|| PathBuf::from("."));

    let monitor = MonitorController::new(db, settings);
    let events = monitor.subscribe();

    let status = monitor.start(request, source, classifier).await?;
    println!(
        "Monitoring subject {} for {}s (Ctrl-C to stop early)",
        args.subject,
        status.remaining_ms / 1000
    );

    follow_session(&monitor, events, tokio::signal::ctrl_c()).await;

    match monitor.summary().await {
        Some(rows) => print_summary(&rows),
        None => println!("No readings were recorded."),
    }

    if !args.no_export {
        match monitor.export().await? {
            Some(artifact) => {
                let path = write_artifact(&artifact, &export_dir)?;
                println!("Exported {}", path.display());
            }
            None => warn!("{}", MonitorError::EmptyLog),
        }
    }
    Ok(())
}

/// Reports events until the session is archived. The first completion of
/// `interrupt` stops the session early.
async fn follow_session<F>(
    monitor: &MonitorController,
    mut events: broadcast::Receiver<MonitorEvent>,
    interrupt: F,
) where
    F: Future<Output = io::Result<()>>,
{
    tokio::pin!(interrupt);
    let mut interrupted = false;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    debug!("monitor event: {}", event.name());
                    if report_event(event) {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!("dropped {skipped} monitor events"),
                Err(RecvError::Closed) => break,
            },
            signal = &mut interrupt, if !interrupted => {
                interrupted = true;
                if let Err(err) = signal {
                    warn!("failed to listen for Ctrl-C: {err}");
                    continue;
                }
                info!("Interrupt received, stopping session");
                if let Err(err) = monitor.stop().await {
                    warn!("stop failed: {err:#}");
                }
            }
        }
    }
}

/// Prints one monitor event; true once the session has been archived.
fn report_event(event: MonitorEvent) -> bool {
    match event {
        MonitorEvent::SampleRecorded { reading, .. } => {
            println!(
                "{}  {} {:<8} {:>6.2}%",
                reading.timestamp.format("%H:%M:%S"),
                reading.dominant.emoji(),
                reading.dominant.as_str(),
                reading.scores.get(reading.dominant)
            );
        }
        MonitorEvent::SampleSkipped { reason, .. } => warn!("sample skipped: {reason}"),
        MonitorEvent::Heartbeat(status) => info!(
            "{} readings, {}s remaining",
            status.reading_count,
            status.remaining_ms / 1000
        ),
        MonitorEvent::SessionFinished(record) => {
            print_record(&record);
            return true;
        }
        MonitorEvent::StateChanged(_) => {}
    }
    false
}

fn frame_source(args: &MonitorArgs) -> Result<Box<dyn FrameSource>> {
    match &args.images {
        Some(dir) => Ok(Box::new(ImageDirSource::open(dir, args.looping, args.fps)?)),
        None => Ok(Box::new(SyntheticSource::new(
            DEMO_FRAME_SIZE.0,
            DEMO_FRAME_SIZE.1,
            DEMO_FPS,
        ))),
    }
}

fn classifier(args: &MonitorArgs, settings: &MonitorSettings) -> Result<Arc<dyn Classifier>> {
    match &args.classifier_cmd {
        Some(command) => {
            let classifier = CommandClassifier::from_command_line(command)
                .ok_or_else(|| MonitorError::InvalidConfig {
                    reason: "--classifier-cmd must not be empty".into(),
                })?
                .with_deadline(settings.classify_timeout());
            Ok(Arc::new(classifier))
        }
        None => {
            if !(0.0..=1.0).contains(&args.failure_rate) {
                return Err(MonitorError::InvalidConfig {
                    reason: "--failure-rate must be between 0 and 1".into(),
                }
                .into());
            }
            if args.images.is_some() {
                warn!("No --classifier-cmd given; replayed images are scored by the demo classifier");
            }
            Ok(Arc::new(
                DemoClassifier::new(args.seed).with_failure_rate(args.failure_rate),
            ))
        }
    }
}

async fn list_sessions(args: SessionsArgs, db: &Database) -> Result<()> {
    if let Some(id) = &args.delete {
        if db.delete_session(id).await? {
            println!("Deleted session {id}");
            return Ok(());
        }
        return Err(anyhow!("session {id} not found"));
    }

    let sessions = db
        .list_sessions(args.subject.as_deref(), args.limit, args.offset)
        .await?;
    if sessions.is_empty() {
        println!("No archived sessions.");
        return Ok(());
    }
    for session in &sessions {
        println!(
            "{}  {:<12} {}  {:<9} {:>4} readings  {}",
            session.id,
            session.subject_id,
            session.started_at.format("%Y-%m-%d %H:%M:%S"),
            session.status.as_str(),
            session.reading_count,
            session.end_reason.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

async fn export_archived(args: ExportArgs, db: &Database, settings: &MonitorSettings) -> Result<()> {
    let session = db
        .get_session(&args.session)
        .await?
        .ok_or_else(|| anyhow!("session {} not found", args.session))?;
    let artifact = export_record(db, &session)
        .await?
        .ok_or(MonitorError::EmptyLog)?;

    let out_dir = args
        .out
        .or_else(|| settings.export_dir.clone())
        .unwrap_or_else(|| PathBuf::from("."));
    let path = write_artifact(&artifact, &out_dir)?;
    println!("Exported {}", path.display());
    Ok(())
}

/// Rebuilds the spreadsheet of an archived session from its stored readings.
pub async fn export_record(db: &Database, session: &SessionRecord) -> Result<Option<ExportArtifact>> {
    let stored = db.get_readings_for_session(&session.id).await?;
    let Some(summary) = readings::summarize(&stored) else {
        return Ok(None);
    };
    readings::export(&session.subject_id, &stored, &summary)
}

fn update_settings(args: SettingsArgs, store: &SettingsStore) -> Result<()> {
    if !args.is_empty() {
        store.update(args.apply(store.get()))?;
        info!("Settings saved to {}", store.path().display());
    }
    println!("{}", serde_json::to_string_pretty(&store.get())?);
    Ok(())
}

pub fn write_artifact(artifact: &ExportArtifact, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create export directory {}", dir.display()))?;
    let path = dir.join(&artifact.filename);
    fs::write(&path, &artifact.bytes)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

fn print_record(record: &SessionRecord) {
    println!(
        "Session {} {} ({}) with {} readings",
        record.id,
        record.status.as_str(),
        record.end_reason.as_deref().unwrap_or("unknown"),
        record.reading_count
    );
}

fn print_summary(rows: &[SummaryRow]) {
    println!("{:<12} {:>6} {:>10}", "Emotion", "Count", "Percentage");
    for row in rows {
        println!(
            "{} {:<9} {:>6} {:>9.2}%",
            row.emotion.emoji(),
            row.emotion.as_str(),
            row.count,
            row.percentage
        );
    }
}
