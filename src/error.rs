// Error taxonomy for monitoring sessions
//
// Sample-level failures (classifier, frame) are recovered inside the session
// controller. Session-level failures (source) end the session. Control errors
// are returned to the caller of start/stop/reset.

use std::fmt;

use crate::sensing::ClassifierError;

#[derive(Debug, Clone, PartialEq)]
pub enum MonitorError {
    /// Classifier failed or returned malformed output; the sample is skipped
    Classifier(ClassifierError),

    /// Frame was empty or could not be decoded; the frame is skipped
    InvalidFrame { reason: String },

    /// Summary or export requested on a log with no readings
    EmptyLog,

    /// Frame source could not be opened or read; fatal to the session
    SourceUnavailable { reason: String },

    /// `start` called while a session is running or not yet reset
    AlreadyActive,

    /// `stop` called while no session is running
    NotRunning,

    /// Rejected session parameters or settings
    InvalidConfig { reason: String },
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorError::Classifier(err) => write!(f, "classification failed: {err}"),
            MonitorError::InvalidFrame { reason } => write!(f, "invalid frame: {reason}"),
            MonitorError::EmptyLog => write!(f, "no data: the reading log is empty"),
            MonitorError::SourceUnavailable { reason } => {
                write!(f, "frame source unavailable: {reason}")
            }
            MonitorError::AlreadyActive => write!(f, "a session is already active"),
            MonitorError::NotRunning => write!(f, "no session is running"),
            MonitorError::InvalidConfig { reason } => write!(f, "invalid configuration: {reason}"),
        }
    }
}

impl std::error::Error for MonitorError {}

impl From<ClassifierError> for MonitorError {
    fn from(err: ClassifierError) -> Self {
        MonitorError::Classifier(err)
    }
}
