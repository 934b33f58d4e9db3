use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::emotion::{Emotion, EmotionScores};

/// One timestamped classification result. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    pub dominant: Emotion,
    pub scores: EmotionScores,
}

impl Reading {
    pub fn new(timestamp: DateTime<Utc>, dominant: Emotion, scores: EmotionScores) -> Self {
        Self {
            timestamp,
            dominant,
            scores,
        }
    }
}
