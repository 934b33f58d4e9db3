//! Synchronous session state machine.
//!
//! `Idle -> Running -> {Stopped, Completed}`. Every method takes the current
//! monotonic `Instant`, so callers decide where time comes from: the async
//! monitor passes `Instant::now()`, tests pass synthetic instants.
//!
//! Sampling is split into [`SessionController::admit_frame`] and
//! [`SessionController::record_sample`] so the classifier can run without
//! holding the controller. [`SessionController::on_frame`] chains both for
//! callers that classify inline.

use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;

use crate::{
    error::MonitorError,
    metrics::SamplingStats,
    models::{Emotion, Reading, SessionRecord, SessionStatus},
    readings::{self, Episode, ExportArtifact, SummaryRow, DEFAULT_CAPACITY},
    sensing::{classifier::classify_validated, Classification, Classifier, ClassifierError, Frame},
};

use super::state::{EndReason, Session, SessionRequest};

/// Upper bound accepted by [`SessionController::start`].
pub const MAX_SESSION_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Proof that a frame passed the sampling gate of a specific session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleTicket {
    session_id: String,
    admitted_at: Instant,
}

impl SampleTicket {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn admitted_at(&self) -> Instant {
        self.admitted_at
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Sample(SampleTicket),
    /// Sampling interval has not elapsed yet.
    Gated,
    /// No running session.
    Inactive,
    Invalid(MonitorError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    Recorded(Reading),
    Gated,
    Inactive,
    /// Sample-level failure; the session continues.
    Skipped(MonitorError),
    /// Result arrived after its session left Running.
    Discarded,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub session_id: Option<String>,
    pub subject_id: Option<String>,
    pub state: SessionStatus,
    pub elapsed_ms: u64,
    pub remaining_ms: u64,
    pub reading_count: usize,
    pub current: Option<Emotion>,
    pub end_reason: Option<EndReason>,
    pub stats: SamplingStats,
}

impl StatusReport {
    fn idle() -> Self {
        Self {
            session_id: None,
            subject_id: None,
            state: SessionStatus::Idle,
            elapsed_ms: 0,
            remaining_ms: 0,
            reading_count: 0,
            current: None,
            end_reason: None,
            stats: SamplingStats::default(),
        }
    }
}

/// Everything needed to archive a finished session.
#[derive(Debug, Clone)]
pub struct FinishReport {
    pub record: SessionRecord,
    pub readings: Vec<Reading>,
}

#[derive(Debug)]
pub struct SessionController {
    session: Option<Session>,
    capacity: usize,
}

impl Default for SessionController {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl SessionController {
    pub fn new(capacity: usize) -> Self {
        Self {
            session: None,
            capacity,
        }
    }

    pub fn status_kind(&self) -> SessionStatus {
        self.session
            .as_ref()
            .map(|session| session.status)
            .unwrap_or(SessionStatus::Idle)
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn start(&mut self, request: SessionRequest, now: Instant) -> Result<&Session, MonitorError> {
        self.start_at(request, Utc::now(), now)
    }

    /// `start` with an explicit wall-clock anchor for reading timestamps.
    pub fn start_at(
        &mut self,
        request: SessionRequest,
        started_at: DateTime<Utc>,
        now: Instant,
    ) -> Result<&Session, MonitorError> {
        if self.session.is_some() {
            return Err(MonitorError::AlreadyActive);
        }
        validate_request(&request)?;

        let session = Session::begin(&request, self.capacity, started_at, now)?;
        info!(
            "session {} started for subject {} ({}s, every {}ms)",
            session.id,
            session.subject_id,
            session.duration.as_secs(),
            session.interval.as_millis()
        );
        Ok(self.session.insert(session))
    }

    /// Completes the session once its deadline has passed. Returns true on
    /// that transition.
    pub fn tick(&mut self, now: Instant) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        if session.is_running() && session.deadline_reached(now) {
            session.finish(SessionStatus::Completed, EndReason::Deadline, now);
            info!(
                "session {} completed with {} readings",
                session.id,
                session.buffer().len()
            );
            return true;
        }
        false
    }

    pub fn stop(&mut self, now: Instant) -> Result<(), MonitorError> {
        match self.session.as_mut() {
            Some(session) if session.is_running() => {
                session.finish(SessionStatus::Stopped, EndReason::UserStop, now);
                info!(
                    "session {} stopped after {}s",
                    session.id,
                    session.elapsed(now).as_secs()
                );
                Ok(())
            }
            _ => Err(MonitorError::NotRunning),
        }
    }

    /// Ends a running session because its frame source failed. Returns true
    /// if this call ended the session.
    pub fn fail_source(&mut self, error: &MonitorError, now: Instant) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        if !session.is_running() {
            return false;
        }
        warn!("session {} ending: {}", session.id, error);
        let reason = match error {
            MonitorError::SourceUnavailable { reason } => reason.clone(),
            other => other.to_string(),
        };
        session.finish(
            SessionStatus::Stopped,
            EndReason::SourceUnavailable(reason),
            now,
        );
        true
    }

    /// Runs the deadline check and the sampling gate for one frame. An
    /// admitted frame resets the sample clock.
    pub fn admit_frame(&mut self, frame: &Frame, now: Instant) -> Admission {
        self.tick(now);

        let Some(session) = self.session.as_mut() else {
            return Admission::Inactive;
        };
        if !session.is_running() {
            return Admission::Inactive;
        }

        session.stats.frames_seen += 1;
        if !session.sample_due(now) {
            session.stats.frames_gated += 1;
            return Admission::Gated;
        }
        if let Err(err) = frame.validate() {
            session.stats.frames_invalid += 1;
            return Admission::Invalid(err);
        }

        session.mark_sampled(now);
        session.stats.samples_admitted += 1;
        Admission::Sample(SampleTicket {
            session_id: session.id.clone(),
            admitted_at: now,
        })
    }

    /// Applies a classifier outcome for an admitted frame. Results for a
    /// session that is no longer current or no longer Running are dropped.
    pub fn record_sample(
        &mut self,
        ticket: &SampleTicket,
        result: Result<Classification, ClassifierError>,
        now: Instant,
    ) -> FrameOutcome {
        self.tick(now);

        let Some(session) = self.session.as_mut() else {
            return FrameOutcome::Discarded;
        };
        if session.id != ticket.session_id {
            return FrameOutcome::Discarded;
        }
        if !session.is_running() {
            session.stats.results_discarded += 1;
            info!(
                "discarding late result for session {} ({})",
                session.id,
                session.status.as_str()
            );
            return FrameOutcome::Discarded;
        }

        match result {
            Ok(classification) => {
                let reading = Reading::new(
                    session.reading_timestamp(now),
                    classification.dominant,
                    classification.scores,
                );
                session.push_reading(reading.clone());
                session.stats.samples_recorded += 1;
                FrameOutcome::Recorded(reading)
            }
            Err(err) => {
                session.stats.classifier_failures += 1;
                warn!("sample skipped for session {}: {}", session.id, err);
                FrameOutcome::Skipped(MonitorError::Classifier(err))
            }
        }
    }

    /// Gate, classify inline, record.
    pub fn on_frame(
        &mut self,
        frame: &Frame,
        classifier: &dyn Classifier,
        now: Instant,
    ) -> FrameOutcome {
        match self.admit_frame(frame, now) {
            Admission::Sample(ticket) => {
                let result = classify_validated(classifier, frame.image());
                self.record_sample(&ticket, result, now)
            }
            Admission::Gated => FrameOutcome::Gated,
            Admission::Inactive => FrameOutcome::Inactive,
            Admission::Invalid(err) => FrameOutcome::Skipped(err),
        }
    }

    pub fn status(&self, now: Instant) -> StatusReport {
        let Some(session) = self.session.as_ref() else {
            return StatusReport::idle();
        };
        StatusReport {
            session_id: Some(session.id.clone()),
            subject_id: Some(session.subject_id.clone()),
            state: session.status,
            elapsed_ms: session.elapsed(now).as_millis() as u64,
            remaining_ms: session.remaining(now).as_millis() as u64,
            reading_count: session.buffer().len(),
            current: session.buffer().latest().map(|reading| reading.dominant),
            end_reason: session.end_reason.clone(),
            stats: session.stats,
        }
    }

    pub fn snapshot(&self) -> Vec<Reading> {
        self.session
            .as_ref()
            .map(Session::snapshot)
            .unwrap_or_default()
    }

    pub fn summary(&self) -> Option<Vec<SummaryRow>> {
        readings::summarize(&self.snapshot())
    }

    pub fn timeline(&self) -> Vec<Episode> {
        readings::build_timeline(&self.snapshot())
    }

    pub fn export(&self) -> Result<Option<ExportArtifact>> {
        let Some(session) = self.session.as_ref() else {
            return Ok(None);
        };
        let snapshot = session.snapshot();
        let summary = readings::summarize(&snapshot).unwrap_or_default();
        readings::export(&session.subject_id, &snapshot, &summary)
    }

    /// Hands out the archive payload once per finished session.
    pub fn take_finish(&mut self) -> Option<FinishReport> {
        let session = self.session.as_mut()?;
        if !session.take_finish() {
            return None;
        }
        Some(FinishReport {
            record: session.record(Utc::now()),
            readings: session.snapshot(),
        })
    }

    /// Returns to Idle, handing back the finished session. Rejected while Running.
    pub fn reset(&mut self) -> Result<Option<Session>, MonitorError> {
        if self.status_kind() == SessionStatus::Running {
            return Err(MonitorError::AlreadyActive);
        }
        Ok(self.session.take())
    }
}

fn validate_request(request: &SessionRequest) -> Result<(), MonitorError> {
    let invalid = |reason: &str| MonitorError::InvalidConfig {
        reason: reason.to_string(),
    };
    if request.subject_id.trim().is_empty() {
        return Err(invalid("subject id must not be empty"));
    }
    if request.duration == Duration::ZERO {
        return Err(invalid("duration must be greater than zero"));
    }
    if request.duration > MAX_SESSION_DURATION {
        return Err(invalid("duration must not exceed 24 hours"));
    }
    if request.interval == Duration::ZERO {
        return Err(invalid("sampling interval must be greater than zero"));
    }
    Ok(())
}
