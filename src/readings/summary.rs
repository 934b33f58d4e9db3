use serde::{Deserialize, Serialize};

use crate::models::{Emotion, Reading};

/// Occurrence count of one dominant emotion within a reading log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SummaryRow {
    pub emotion: Emotion,
    pub count: u64,
    pub percentage: f64,
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Groups readings by dominant emotion.
///
/// Returns `None` for an empty log. Rows are ordered by descending count;
/// equal counts keep the order in which the emotion first appeared.
pub fn summarize(readings: &[Reading]) -> Option<Vec<SummaryRow>> {
    if readings.is_empty() {
        return None;
    }

    let mut counts: Vec<(Emotion, u64)> = Vec::new();
    for reading in readings {
        match counts.iter_mut().find(|(emotion, _)| *emotion == reading.dominant) {
            Some((_, count)) => *count += 1,
            None => counts.push((reading.dominant, 1)),
        }
    }

    // sort_by is stable, so ties stay in first-seen order
    counts.sort_by(|a, b| b.1.cmp(&a.1));

    let total = readings.len() as f64;
    Some(
        counts
            .into_iter()
            .map(|(emotion, count)| SummaryRow {
                emotion,
                count,
                percentage: round2(count as f64 / total * 100.0),
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EmotionScores;
    use chrono::Utc;

    fn log_of(emotions: &[Emotion]) -> Vec<Reading> {
        emotions
            .iter()
            .map(|emotion| Reading::new(Utc::now(), *emotion, EmotionScores::pure(*emotion)))
            .collect()
    }

    #[test]
    fn empty_log_has_no_summary() {
        assert_eq!(summarize(&[]), None);
    }

    #[test]
    fn counts_and_percentages() {
        use Emotion::*;
        let readings = log_of(&[Sad, Happy, Angry, Happy, Sad, Happy]);
        let rows = summarize(&readings).unwrap();

        assert_eq!(
            rows,
            vec![
                SummaryRow { emotion: Happy, count: 3, percentage: 50.0 },
                SummaryRow { emotion: Sad, count: 2, percentage: 33.33 },
                SummaryRow { emotion: Angry, count: 1, percentage: 16.67 },
            ]
        );
        let total: f64 = rows.iter().map(|row| row.percentage).sum();
        assert!((total - 100.0).abs() <= 0.01 * rows.len() as f64);
    }

    #[test]
    fn ties_keep_first_seen_order() {
        use Emotion::*;
        let readings = log_of(&[Fear, Neutral, Neutral, Fear, Disgust]);
        let order: Vec<Emotion> = summarize(&readings)
            .unwrap()
            .into_iter()
            .map(|row| row.emotion)
            .collect();
        assert_eq!(order, vec![Fear, Neutral, Disgust]);
    }

    #[test]
    fn percentages_sum_to_hundred_within_rounding() {
        use Emotion::*;
        let readings = log_of(&[Happy, Sad, Angry, Fear, Surprise, Neutral, Disgust]);
        let rows = summarize(&readings).unwrap();
        let total: f64 = rows.iter().map(|row| row.percentage).sum();
        assert_eq!(rows.len(), 7);
        assert!((total - 100.0).abs() <= 0.01 * rows.len() as f64);
    }
}
