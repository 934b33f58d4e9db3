use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Emotion, Reading};

/// A run of consecutive readings sharing the same dominant emotion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    pub emotion: Emotion,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub reading_count: usize,
}

impl Episode {
    /// Span between the first and last reading of the run. A single-reading
    /// episode has zero duration.
    pub fn duration_secs(&self) -> i64 {
        (self.end - self.start).num_seconds()
    }
}

pub fn build_timeline(readings: &[Reading]) -> Vec<Episode> {
    let mut episodes: Vec<Episode> = Vec::new();

    for reading in readings {
        match episodes.last_mut() {
            Some(current) if current.emotion == reading.dominant => {
                current.end = reading.timestamp;
                current.reading_count += 1;
            }
            _ => episodes.push(Episode {
                emotion: reading.dominant,
                start: reading.timestamp,
                end: reading.timestamp,
                reading_count: 1,
            }),
        }
    }

    episodes
}
