use serde::{Deserialize, Serialize};

/// Per-session frame accounting.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SamplingStats {
    pub frames_seen: u64,
    /// Dropped because the sampling interval had not elapsed.
    pub frames_gated: u64,
    pub frames_invalid: u64,
    pub samples_admitted: u64,
    pub samples_recorded: u64,
    pub classifier_failures: u64,
    /// Results that arrived after the session left Running.
    pub results_discarded: u64,
}
