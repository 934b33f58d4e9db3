use serde::Serialize;

use crate::{
    models::{Reading, SessionRecord},
    session::StatusReport,
};

/// Broadcast to every `MonitorController::subscribe` receiver.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MonitorEvent {
    StateChanged(StatusReport),
    Heartbeat(StatusReport),
    #[serde(rename_all = "camelCase")]
    SampleRecorded {
        session_id: String,
        reading: Reading,
    },
    #[serde(rename_all = "camelCase")]
    SampleSkipped {
        session_id: Option<String>,
        reason: String,
    },
    SessionFinished(SessionRecord),
}

impl MonitorEvent {
    pub fn name(&self) -> &'static str {
        match self {
            MonitorEvent::StateChanged(_) => "state-changed",
            MonitorEvent::Heartbeat(_) => "heartbeat",
            MonitorEvent::SampleRecorded { .. } => "sample-recorded",
            MonitorEvent::SampleSkipped { .. } => "sample-skipped",
            MonitorEvent::SessionFinished(_) => "session-finished",
        }
    }
}
