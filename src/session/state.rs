use std::cmp;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::MonitorError,
    metrics::SamplingStats,
    models::{Reading, SessionRecord, SessionStatus},
    readings::ReadingBuffer,
};

/// Why a session left Running.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", tag = "kind", content = "detail")]
pub enum EndReason {
    Deadline,
    UserStop,
    SourceUnavailable(String),
}

impl EndReason {
    pub fn describe(&self) -> String {
        match self {
            EndReason::Deadline => "deadline".to_string(),
            EndReason::UserStop => "stopped by user".to_string(),
            EndReason::SourceUnavailable(reason) => format!("source unavailable: {reason}"),
        }
    }
}

/// Parameters of a `start` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub subject_id: String,
    pub duration: Duration,
    pub interval: Duration,
}

/// One timed monitoring run. Identity is the uuid plus subject and creation time.
///
/// Monotonic `Instant`s drive every timing decision; `started_at` only
/// anchors wall-clock timestamps for readings.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub subject_id: String,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub interval: Duration,
    pub end_reason: Option<EndReason>,
    pub stats: SamplingStats,
    start_instant: Instant,
    end_instant: Instant,
    finished_instant: Option<Instant>,
    last_sample: Option<Instant>,
    buffer: ReadingBuffer,
    finish_reported: bool,
}

impl Session {
    pub fn begin(
        request: &SessionRequest,
        capacity: usize,
        started_at: DateTime<Utc>,
        now: Instant,
    ) -> Result<Self, MonitorError> {
        let end_instant = now
            .checked_add(request.duration)
            .ok_or_else(|| MonitorError::InvalidConfig {
                reason: format!("duration of {}s is out of range", request.duration.as_secs()),
            })?;
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            subject_id: request.subject_id.clone(),
            status: SessionStatus::Running,
            started_at,
            duration: request.duration,
            interval: request.interval,
            end_reason: None,
            stats: SamplingStats::default(),
            start_instant: now,
            end_instant,
            finished_instant: None,
            last_sample: None,
            buffer: ReadingBuffer::new(capacity),
            finish_reported: false,
        })
    }

    pub fn is_running(&self) -> bool {
        self.status == SessionStatus::Running
    }

    pub fn deadline_reached(&self, now: Instant) -> bool {
        now >= self.end_instant
    }

    /// Elapsed running time, frozen once the session has finished.
    pub fn elapsed(&self, now: Instant) -> Duration {
        let until = self.finished_instant.unwrap_or(now);
        until.saturating_duration_since(self.start_instant)
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        if !self.is_running() {
            return Duration::ZERO;
        }
        self.end_instant.saturating_duration_since(now)
    }

    pub fn sample_due(&self, now: Instant) -> bool {
        match self.last_sample {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }

    pub fn mark_sampled(&mut self, now: Instant) {
        self.last_sample = Some(now);
    }

    /// Wall-clock timestamp for a reading completed at `now`, never earlier
    /// than the newest reading already logged.
    pub fn reading_timestamp(&self, now: Instant) -> DateTime<Utc> {
        let offset = now.saturating_duration_since(self.start_instant);
        let stamp = self.started_at
            + chrono::Duration::from_std(offset).unwrap_or_else(|_| chrono::Duration::zero());
        match self.buffer.latest() {
            Some(latest) => cmp::max(stamp, latest.timestamp),
            None => stamp,
        }
    }

    /// Appends while Running; returns false and leaves the log untouched otherwise.
    pub fn push_reading(&mut self, reading: Reading) -> bool {
        if !self.is_running() {
            return false;
        }
        self.buffer.push(reading);
        true
    }

    pub fn finish(&mut self, status: SessionStatus, reason: EndReason, now: Instant) {
        if !self.is_running() {
            return;
        }
        self.status = status;
        self.end_reason = Some(reason);
        self.finished_instant = Some(cmp::min(now, self.end_instant).max(self.start_instant));
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.finished_instant.map(|finished| {
            let offset = finished.saturating_duration_since(self.start_instant);
            self.started_at
                + chrono::Duration::from_std(offset).unwrap_or_else(|_| chrono::Duration::zero())
        })
    }

    /// Returns true exactly once after the session has finished.
    pub fn take_finish(&mut self) -> bool {
        if self.status.is_finished() && !self.finish_reported {
            self.finish_reported = true;
            return true;
        }
        false
    }

    pub fn buffer(&self) -> &ReadingBuffer {
        &self.buffer
    }

    pub fn snapshot(&self) -> Vec<Reading> {
        self.buffer.snapshot()
    }

    pub fn record(&self, updated_at: DateTime<Utc>) -> SessionRecord {
        SessionRecord {
            id: self.id.clone(),
            subject_id: self.subject_id.clone(),
            started_at: self.started_at,
            ended_at: self.ended_at(),
            status: self.status,
            duration_ms: self.duration.as_millis() as u64,
            interval_ms: self.interval.as_millis() as u64,
            reading_count: self.buffer.len() as u64,
            end_reason: self.end_reason.as_ref().map(EndReason::describe),
            created_at: self.started_at,
            updated_at,
        }
    }
}
