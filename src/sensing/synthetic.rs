//! Stand-ins for a camera and a model. `moodwatch monitor` uses them when
//! no `--images` directory or `--classifier-cmd` is given; tests use them too.

use std::collections::HashMap;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::MonitorError;
use crate::models::Emotion;

use super::classifier::{Classifier, ClassifierError, RawClassification};
use super::frame::Frame;
use super::source::FrameSource;

/// Solid-colour frames at a fixed rate, optionally failing after a number of frames.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    frame_interval: Duration,
    produced: u64,
    fail_after: Option<u64>,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width,
            height,
            frame_interval: Duration::from_millis(1000 / u64::from(fps.max(1))),
            produced: 0,
            fail_after: None,
        }
    }

    /// Simulates a device disconnect after `frames` frames.
    pub fn fail_after(mut self, frames: u64) -> Self {
        self.fail_after = Some(frames);
        self
    }
}

impl FrameSource for SyntheticSource {
    fn name(&self) -> String {
        format!("synthetic:{}x{}", self.width, self.height)
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, MonitorError> {
        if self.fail_after.is_some_and(|limit| self.produced >= limit) {
            return Err(MonitorError::SourceUnavailable {
                reason: "synthetic device disconnected".into(),
            });
        }

        thread::sleep(self.frame_interval);
        let shade = (self.produced % 256) as u8;
        self.produced += 1;
        let image = RgbImage::from_pixel(self.width, self.height, Rgb([shade, 128, 255 - shade]));
        Ok(Some(Frame::new(image, Instant::now())))
    }
}

/// Produces plausible, slowly drifting emotion distributions from a seeded RNG.
pub struct DemoClassifier {
    state: Mutex<DemoState>,
    failure_rate: f64,
}

struct DemoState {
    rng: StdRng,
    mood: Emotion,
}

impl DemoClassifier {
    pub fn new(seed: u64) -> Self {
        Self {
            state: Mutex::new(DemoState {
                rng: StdRng::seed_from_u64(seed),
                mood: Emotion::Neutral,
            }),
            failure_rate: 0.0,
        }
    }

    /// Fraction of calls that fail with a transient error.
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }
}

impl Classifier for DemoClassifier {
    fn name(&self) -> &'static str {
        "demo"
    }

    fn classify(&self, _image: &RgbImage) -> Result<RawClassification, ClassifierError> {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let DemoState { rng, mood } = &mut *state;

        if rng.gen_bool(self.failure_rate) {
            return Err(ClassifierError::Failed {
                reason: "no face detected".into(),
            });
        }

        if rng.gen_bool(0.3) {
            *mood = Emotion::ALL[rng.gen_range(0..Emotion::ALL.len())];
        }

        // Keep the dominant share above anything the rest can reach.
        let dominant_score: f64 = rng.gen_range(55.0..95.0);
        let weights: Vec<f64> = (0..Emotion::ALL.len() - 1)
            .map(|_| rng.gen_range(0.05..1.0))
            .collect();
        let total: f64 = weights.iter().sum();
        let remainder = 100.0 - dominant_score;

        let mut others = weights.into_iter();
        let emotion: HashMap<String, f64> = Emotion::ALL
            .iter()
            .map(|candidate| {
                let score = if *candidate == *mood {
                    dominant_score
                } else {
                    others.next().unwrap_or(0.0) / total * remainder
                };
                (candidate.as_str().to_string(), score)
            })
            .collect();

        Ok(RawClassification {
            dominant_emotion: mood.as_str().to_string(),
            emotion,
        })
    }
}
