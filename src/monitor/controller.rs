use std::{sync::Arc, time::Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use log::{error, info};
use tokio::{
    sync::{broadcast, watch, Mutex},
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};

use crate::{
    db::Database,
    error::MonitorError,
    models::{Reading, SessionRecord},
    readings::{Episode, ExportArtifact, SummaryRow},
    sensing::{Classifier, FrameSource, SensingContext, SensingController},
    session::{FinishReport, SessionController, SessionRequest, StatusReport},
    settings::MonitorSettings,
};

use super::MonitorEvent;

const EVENT_CAPACITY: usize = 256;

/// Async front of the session state machine: owns the ticker task and the
/// sensing loop, archives finished sessions and broadcasts events.
#[derive(Clone)]
pub struct MonitorController {
    session: Arc<Mutex<SessionController>>,
    db: Database,
    events: broadcast::Sender<MonitorEvent>,
    finished: Arc<watch::Sender<Option<SessionRecord>>>,
    ticker: Arc<Mutex<Option<JoinHandle<()>>>>,
    sensing: Arc<Mutex<SensingController>>,
    settings: MonitorSettings,
    heartbeat_every_ticks: u32,
}

impl MonitorController {
    pub fn new(db: Database, settings: MonitorSettings) -> Self {
        let debug_mode = std::env::var("MOODWATCH_DEBUG")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (finished, _) = watch::channel(None);

        Self {
            session: Arc::new(Mutex::new(SessionController::new(settings.buffer_capacity))),
            db,
            events,
            finished: Arc::new(finished),
            ticker: Arc::new(Mutex::new(None)),
            sensing: Arc::new(Mutex::new(SensingController::new())),
            heartbeat_every_ticks: if debug_mode {
                1
            } else {
                settings.heartbeat_every_ticks.max(1)
            },
            settings,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events.subscribe()
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub async fn status(&self) -> StatusReport {
        self.session.lock().await.status(Instant::now())
    }

    pub async fn start(
        &self,
        request: SessionRequest,
        source: Box<dyn FrameSource>,
        classifier: Arc<dyn Classifier>,
    ) -> Result<StatusReport> {
        let record = {
            let mut guard = self.session.lock().await;
            let session = guard.start(request, Instant::now())?;
            session.record(Utc::now())
        };

        if let Err(err) = self.db.insert_session(&record).await {
            self.abandon_start().await;
            return Err(err.context("failed to record session start"));
        }

        let ctx = SensingContext {
            session: self.session.clone(),
            classifier,
            events: self.events.clone(),
            classify_timeout: self.settings.classify_timeout(),
            downscale_factor: self.settings.downscale_factor,
        };
        if let Err(err) = self.sensing.lock().await.start_sensing(ctx, source) {
            let reason = format!("{err:#}");
            let mut guard = self.session.lock().await;
            guard.fail_source(&MonitorError::SourceUnavailable { reason }, Instant::now());
        }

        self.spawn_ticker().await;

        let status = self.status().await;
        self.emit(MonitorEvent::StateChanged(status.clone()));
        Ok(status)
    }

    /// Stops the running session immediately and archives it.
    pub async fn stop(&self) -> Result<StatusReport> {
        let (report, status) = {
            let mut guard = self.session.lock().await;
            let now = Instant::now();
            guard.stop(now)?;
            (guard.take_finish(), guard.status(now))
        };

        self.cancel_ticker().await;
        if let Err(err) = self.sensing.lock().await.stop_sensing().await {
            error!("Failed to stop sensing: {err:#}");
        }

        if let Some(report) = report {
            finalize(&self.db, &self.events, &self.finished, report, status.clone()).await;
        }
        Ok(status)
    }

    /// Clears a finished session so a new one can start.
    pub async fn reset(&self) -> Result<()> {
        self.session.lock().await.reset()?;
        self.emit(MonitorEvent::StateChanged(self.status().await));
        Ok(())
    }

    pub async fn snapshot(&self) -> Vec<Reading> {
        self.session.lock().await.snapshot()
    }

    pub async fn summary(&self) -> Option<Vec<SummaryRow>> {
        self.session.lock().await.summary()
    }

    pub async fn timeline(&self) -> Vec<Episode> {
        self.session.lock().await.timeline()
    }

    pub async fn export(&self) -> Result<Option<ExportArtifact>> {
        self.session.lock().await.export()
    }

    /// Resolves once the current session has been archived. Returns `None`
    /// when there is no session.
    pub async fn wait_finished(&self) -> Option<SessionRecord> {
        let mut finished = self.finished.subscribe();
        let session_id = self.status().await.session_id?;
        loop {
            let archived = finished
                .borrow_and_update()
                .as_ref()
                .filter(|record| record.id == session_id)
                .cloned();
            if archived.is_some() {
                return archived;
            }
            if finished.changed().await.is_err() {
                return None;
            }
        }
    }

    async fn abandon_start(&self) {
        let mut guard = self.session.lock().await;
        let _ = guard.stop(Instant::now());
        let _ = guard.take_finish();
        let _ = guard.reset();
    }

    async fn spawn_ticker(&self) {
        let mut ticker_guard = self.ticker.lock().await;
        if let Some(handle) = ticker_guard.take() {
            handle.abort();
        }

        let session = self.session.clone();
        let db = self.db.clone();
        let events = self.events.clone();
        let finished = self.finished.clone();
        let sensing = self.sensing.clone();
        let tick_interval = self.settings.tick_interval();
        let heartbeat_every = self.heartbeat_every_ticks;

        let handle = tokio::spawn(async move {
            let mut interval = time::interval(tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut ticks: u32 = 0;

            loop {
                interval.tick().await;

                let (report, status) = {
                    let mut guard = session.lock().await;
                    let now = Instant::now();
                    guard.tick(now);
                    (guard.take_finish(), guard.status(now))
                };

                if let Some(report) = report {
                    if let Err(err) = sensing.lock().await.stop_sensing().await {
                        error!("Failed to stop sensing on session end: {err:#}");
                    }
                    finalize(&db, &events, &finished, report, status).await;
                    break;
                }

                if !status.state.is_running() {
                    break;
                }

                ticks = ticks.wrapping_add(1);
                if ticks % heartbeat_every == 0 {
                    if let Some(session_id) = status.session_id.clone() {
                        tokio::spawn(record_progress(
                            db.clone(),
                            session_id,
                            status.reading_count as u64,
                        ));
                    }
                    let _ = events.send(MonitorEvent::Heartbeat(status));
                }
            }
        });

        *ticker_guard = Some(handle);
    }

    async fn cancel_ticker(&self) {
        if let Some(handle) = self.ticker.lock().await.take() {
            handle.abort();
        }
    }

    fn emit(&self, event: MonitorEvent) {
        let _ = self.events.send(event);
    }
}

async fn finalize(
    db: &Database,
    events: &broadcast::Sender<MonitorEvent>,
    finished: &watch::Sender<Option<SessionRecord>>,
    report: FinishReport,
    status: StatusReport,
) {
    let FinishReport { record, readings } = report;
    info!(
        "session {} {} ({}), {} readings",
        record.id,
        record.status.as_str(),
        record.end_reason.as_deref().unwrap_or("unknown"),
        readings.len()
    );

    if let Err(err) = db
        .archive_session(&record, &readings)
        .await
        .context("failed to archive session")
    {
        error!("{err:#}");
    }

    let _ = events.send(MonitorEvent::StateChanged(status));
    let _ = events.send(MonitorEvent::SessionFinished(record.clone()));
    finished.send_replace(Some(record));
}

async fn record_progress(db: Database, session_id: String, reading_count: u64) {
    if let Err(err) = db
        .update_session_progress(&session_id, reading_count, Utc::now())
        .await
        .context("failed to record session progress")
    {
        error!("{err:#}");
    }
}
