//! Emotion categories and the fixed-shape score distribution.
//!
//! The classifier boundary converts open-ended score maps into
//! [`EmotionScores`], so everything past that point can rely on all seven
//! categories being present.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Happy,
    Sad,
    Angry,
    Fear,
    Surprise,
    Neutral,
    Disgust,
}

impl Emotion {
    /// Every category in export column order.
    pub const ALL: [Emotion; 7] = [
        Emotion::Happy,
        Emotion::Sad,
        Emotion::Angry,
        Emotion::Fear,
        Emotion::Surprise,
        Emotion::Neutral,
        Emotion::Disgust,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Happy => "happy",
            Emotion::Sad => "sad",
            Emotion::Angry => "angry",
            Emotion::Fear => "fear",
            Emotion::Surprise => "surprise",
            Emotion::Neutral => "neutral",
            Emotion::Disgust => "disgust",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Emotion::Happy => "😊",
            Emotion::Sad => "😢",
            Emotion::Angry => "😠",
            Emotion::Fear => "😨",
            Emotion::Surprise => "😲",
            Emotion::Neutral => "😐",
            Emotion::Disgust => "🤢",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEmotion(pub String);

impl fmt::Display for UnknownEmotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown emotion '{}'", self.0)
    }
}

impl std::error::Error for UnknownEmotion {}

impl FromStr for Emotion {
    type Err = UnknownEmotion;

    /// Case-insensitive, surrounding whitespace ignored.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Emotion::ALL
            .into_iter()
            .find(|emotion| emotion.as_str() == normalized)
            .ok_or_else(|| UnknownEmotion(value.to_string()))
    }
}

/// Percentage score per category. Values are non-negative.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct EmotionScores {
    pub happy: f64,
    pub sad: f64,
    pub angry: f64,
    pub fear: f64,
    pub surprise: f64,
    pub neutral: f64,
    pub disgust: f64,
}

impl EmotionScores {
    pub fn get(&self, emotion: Emotion) -> f64 {
        match emotion {
            Emotion::Happy => self.happy,
            Emotion::Sad => self.sad,
            Emotion::Angry => self.angry,
            Emotion::Fear => self.fear,
            Emotion::Surprise => self.surprise,
            Emotion::Neutral => self.neutral,
            Emotion::Disgust => self.disgust,
        }
    }

    pub fn set(&mut self, emotion: Emotion, value: f64) {
        let slot = match emotion {
            Emotion::Happy => &mut self.happy,
            Emotion::Sad => &mut self.sad,
            Emotion::Angry => &mut self.angry,
            Emotion::Fear => &mut self.fear,
            Emotion::Surprise => &mut self.surprise,
            Emotion::Neutral => &mut self.neutral,
            Emotion::Disgust => &mut self.disgust,
        };
        *slot = value;
    }

    /// Scores in [`Emotion::ALL`] order.
    pub fn iter(&self) -> impl Iterator<Item = (Emotion, f64)> + '_ {
        Emotion::ALL.into_iter().map(move |emotion| (emotion, self.get(emotion)))
    }

    pub fn max_score(&self) -> f64 {
        self.iter().map(|(_, score)| score).fold(f64::MIN, f64::max)
    }

    /// Category with the highest score; ties go to the earlier column.
    pub fn dominant(&self) -> Emotion {
        let max = self.max_score();
        self.iter()
            .find(|(_, score)| *score == max)
            .map(|(emotion, _)| emotion)
            .unwrap_or(Emotion::Neutral)
    }

    /// Scores with a single category at 100%.
    pub fn pure(emotion: Emotion) -> Self {
        let mut scores = Self::default();
        scores.set(emotion, 100.0);
        scores
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("Happy".parse::<Emotion>().unwrap(), Emotion::Happy);
        assert_eq!(" surprise ".parse::<Emotion>().unwrap(), Emotion::Surprise);
        assert!("contempt".parse::<Emotion>().is_err());
    }

    #[test]
    fn dominant_prefers_earlier_column_on_ties() {
        let mut scores = EmotionScores::default();
        scores.sad = 40.0;
        scores.fear = 40.0;
        scores.neutral = 20.0;
        assert_eq!(scores.dominant(), Emotion::Sad);
    }

    #[test]
    fn iter_follows_export_order() {
        let names: Vec<&str> = EmotionScores::pure(Emotion::Disgust)
            .iter()
            .map(|(emotion, _)| emotion.as_str())
            .collect();
        assert_eq!(
            names,
            vec!["happy", "sad", "angry", "fear", "surprise", "neutral", "disgust"]
        );
    }
}
