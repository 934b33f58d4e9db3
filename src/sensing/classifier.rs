//! Classifier seam.
//!
//! The model itself lives outside this crate. Implementations return the
//! open-ended shape most emotion models produce ([`RawClassification`]); the
//! session controller only ever sees the validated [`Classification`].

use std::collections::HashMap;
use std::fmt;
use std::io::{Cursor, Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use image::{ImageFormat, RgbImage};
use serde::Deserialize;

use crate::models::{Emotion, EmotionScores};
use crate::readings::summary::round2;

#[derive(Debug, Clone, PartialEq)]
pub enum ClassifierError {
    /// The model could not produce a result for this frame
    Failed { reason: String },

    /// Output did not match the fixed seven-category shape
    Malformed { reason: String },

    /// No result within the configured timeout
    TimedOut,
}

impl fmt::Display for ClassifierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassifierError::Failed { reason } => write!(f, "classifier failed: {reason}"),
            ClassifierError::Malformed { reason } => {
                write!(f, "malformed classifier output: {reason}")
            }
            ClassifierError::TimedOut => write!(f, "classifier timed out"),
        }
    }
}

impl std::error::Error for ClassifierError {}

fn malformed(reason: impl Into<String>) -> ClassifierError {
    ClassifierError::Malformed {
        reason: reason.into(),
    }
}

/// Unvalidated model output: a dominant label and a label → percentage map.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RawClassification {
    pub dominant_emotion: String,
    pub emotion: HashMap<String, f64>,
}

/// Validated result with the fixed seven-category distribution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub dominant: Emotion,
    pub scores: EmotionScores,
}

impl TryFrom<RawClassification> for Classification {
    type Error = ClassifierError;

    fn try_from(raw: RawClassification) -> Result<Self, Self::Error> {
        let mut scores = EmotionScores::default();
        let mut seen = [false; 7];

        for (label, value) in &raw.emotion {
            let emotion: Emotion = label.parse().map_err(|err| malformed(format!("{err}")))?;
            let slot = Emotion::ALL
                .iter()
                .position(|candidate| *candidate == emotion)
                .unwrap_or_default();
            if seen[slot] {
                return Err(malformed(format!("duplicate score for {emotion}")));
            }
            if !value.is_finite() || *value < 0.0 {
                return Err(malformed(format!("score for {emotion} is {value}")));
            }
            seen[slot] = true;
            scores.set(emotion, round2(*value));
        }

        if let Some(missing) = Emotion::ALL
            .iter()
            .zip(seen.iter())
            .find(|(_, present)| !**present)
            .map(|(emotion, _)| emotion)
        {
            return Err(malformed(format!("missing score for {missing}")));
        }

        let dominant: Emotion = raw
            .dominant_emotion
            .parse()
            .map_err(|err| malformed(format!("{err}")))?;
        if scores.get(dominant) < scores.max_score() {
            return Err(malformed(format!(
                "dominant {dominant} does not hold the highest score"
            )));
        }

        Ok(Self { dominant, scores })
    }
}

pub trait Classifier: Send + Sync {
    fn name(&self) -> &'static str;

    /// Classify one image. Frames without a detectable face should yield a
    /// best-effort low-confidence result rather than an error.
    fn classify(&self, image: &RgbImage) -> Result<RawClassification, ClassifierError>;
}

/// Validated classification of one image.
pub fn classify_validated(
    classifier: &dyn Classifier,
    image: &RgbImage,
) -> Result<Classification, ClassifierError> {
    classifier.classify(image).and_then(Classification::try_from)
}

/// Models commonly answer with either one object or a one-element list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CommandReply {
    Single(RawClassification),
    List(Vec<RawClassification>),
}

const DEFAULT_COMMAND_DEADLINE: Duration = Duration::from_secs(10);
const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Runs an external program per frame: PNG bytes on stdin, JSON on stdout.
///
/// The child is killed and reaped once `deadline` passes.
#[derive(Debug, Clone)]
pub struct CommandClassifier {
    program: String,
    args: Vec<String>,
    deadline: Duration,
}

impl CommandClassifier {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            deadline: DEFAULT_COMMAND_DEADLINE,
        }
    }

    /// Splits `command` on whitespace into a program and its arguments.
    pub fn from_command_line(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    fn encode_png(image: &RgbImage) -> Result<Vec<u8>, ClassifierError> {
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|err| ClassifierError::Failed {
                reason: format!("png encoding failed: {err}"),
            })?;
        Ok(bytes)
    }

    /// Polls the child until it exits or the deadline passes. On timeout the
    /// child is killed and waited on before returning.
    fn wait_until_deadline(
        &self,
        child: &mut Child,
        started: Instant,
    ) -> Result<ExitStatus, ClassifierError> {
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) if started.elapsed() >= self.deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ClassifierError::TimedOut);
                }
                Ok(None) => thread::sleep(CHILD_POLL_INTERVAL),
                Err(err) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ClassifierError::Failed {
                        reason: format!("failed to wait for {}: {err}", self.program),
                    });
                }
            }
        }
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut bytes = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut bytes);
        }
        bytes
    })
}

impl Classifier for CommandClassifier {
    fn name(&self) -> &'static str {
        "command"
    }

    fn classify(&self, image: &RgbImage) -> Result<RawClassification, ClassifierError> {
        let png = Self::encode_png(image)?;
        let failed = |reason: String| ClassifierError::Failed { reason };

        let started = Instant::now();
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| failed(format!("failed to spawn {}: {err}", self.program)))?;

        // Pipes are serviced on their own threads so a child that stops
        // reading or writing cannot block past the deadline.
        let stdin = child.stdin.take();
        let writer = thread::spawn(move || match stdin {
            Some(mut stdin) => stdin.write_all(&png),
            None => Ok(()),
        });
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = self.wait_until_deadline(&mut child, started)?;

        // A child may answer without consuming the whole frame; only its
        // exit status and reply matter.
        let _ = writer.join();
        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            return Err(failed(format!(
                "{} exited with {}: {}",
                self.program,
                status,
                stderr.trim()
            )));
        }

        let reply: CommandReply = serde_json::from_slice(&stdout)
            .map_err(|err| malformed(format!("invalid JSON: {err}")))?;
        match reply {
            CommandReply::Single(raw) => Ok(raw),
            CommandReply::List(list) => list
                .into_iter()
                .next()
                .ok_or_else(|| malformed("empty result list")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn raw(dominant: &str, pairs: &[(&str, f64)]) -> RawClassification {
        RawClassification {
            dominant_emotion: dominant.to_string(),
            emotion: pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }

    fn full(dominant: &str) -> Vec<(&'static str, f64)> {
        let mut pairs = vec![
            ("happy", 1.0),
            ("sad", 2.0),
            ("angry", 3.0),
            ("fear", 4.0),
            ("surprise", 5.0),
            ("neutral", 6.0),
            ("disgust", 0.5),
        ];
        for pair in pairs.iter_mut() {
            if pair.0 == dominant {
                pair.1 = 78.5;
            }
        }
        pairs
    }

    #[test]
    fn accepts_complete_distribution() {
        let result = Classification::try_from(raw("Fear", &full("fear"))).unwrap();
        assert_eq!(result.dominant, Emotion::Fear);
        assert_eq!(result.scores.fear, 78.5);
        assert_eq!(result.scores.disgust, 0.5);
    }

    #[test]
    fn rounds_scores_to_two_places() {
        let mut pairs = full("happy");
        pairs[0].1 = 90.12345;
        let result = Classification::try_from(raw("happy", &pairs)).unwrap();
        assert_eq!(result.scores.happy, 90.12);
    }

    #[test]
    fn rejects_partial_distribution() {
        let pairs = &full("happy")[..6];
        assert_matches!(
            Classification::try_from(raw("happy", pairs)),
            Err(ClassifierError::Malformed { .. })
        );
    }

    #[test]
    fn rejects_unknown_category() {
        let mut pairs = full("happy");
        pairs.push(("contempt", 1.0));
        assert_matches!(
            Classification::try_from(raw("happy", &pairs)),
            Err(ClassifierError::Malformed { .. })
        );
    }

    #[test]
    fn rejects_negative_or_nan_scores() {
        let mut pairs = full("happy");
        pairs[1].1 = -1.0;
        assert!(Classification::try_from(raw("happy", &pairs)).is_err());
        pairs[1].1 = f64::NAN;
        assert!(Classification::try_from(raw("happy", &pairs)).is_err());
    }

    #[test]
    fn rejects_dominant_that_is_not_the_max() {
        assert_matches!(
            Classification::try_from(raw("sad", &full("happy"))),
            Err(ClassifierError::Malformed { .. })
        );
    }

    #[test]
    fn parses_list_replies() {
        let json = r#"[{"dominant_emotion":"neutral","emotion":{"happy":0,"sad":0,"angry":0,"fear":0,"surprise":0,"neutral":100,"disgust":0}}]"#;
        let reply: CommandReply = serde_json::from_str(json).unwrap();
        assert_matches!(reply, CommandReply::List(list) if list.len() == 1);
    }

    #[test]
    fn command_line_split() {
        let classifier = CommandClassifier::from_command_line("python3 analyze.py --fast").unwrap();
        assert_eq!(classifier.program, "python3");
        assert_eq!(classifier.args, vec!["analyze.py", "--fast"]);
        assert!(CommandClassifier::from_command_line("   ").is_none());
    }

    fn shell(script: &str) -> CommandClassifier {
        CommandClassifier::new("sh", vec!["-c".into(), script.into()])
    }

    #[cfg(unix)]
    #[test]
    fn command_reply_is_parsed() {
        let classifier = shell(
            r#"cat > /dev/null; echo '{"dominant_emotion":"happy","emotion":{"happy":90,"sad":1,"angry":1,"fear":1,"surprise":1,"neutral":5,"disgust":1}}'"#,
        );
        let raw = classifier.classify(&RgbImage::new(4, 4)).unwrap();
        let result = Classification::try_from(raw).unwrap();
        assert_eq!(result.dominant, Emotion::Happy);
    }

    #[cfg(unix)]
    #[test]
    fn failing_command_reports_stderr() {
        let classifier = shell("cat > /dev/null; echo 'no face model' >&2; exit 3");
        match classifier.classify(&RgbImage::new(4, 4)) {
            Err(ClassifierError::Failed { reason }) => assert!(reason.contains("no face model")),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn hung_command_is_killed_at_the_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("child.pid");
        let classifier = shell(&format!("echo $$ > {}; exec sleep 7", pid_file.display()))
            .with_deadline(Duration::from_millis(200));

        let started = Instant::now();
        for _ in 0..3 {
            assert_matches!(
                classifier.classify(&RgbImage::new(4, 4)),
                Err(ClassifierError::TimedOut)
            );
            let pid = std::fs::read_to_string(&pid_file).unwrap();
            let proc_entry = std::path::Path::new("/proc").join(pid.trim());
            assert!(!proc_entry.exists(), "child {} still alive", pid.trim());
        }
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
