use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use log::{info, warn};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::error::MonitorError;

use super::frame::Frame;

/// Delivers frames at the device's own pace. `next_frame` may block.
pub trait FrameSource: Send + 'static {
    fn name(&self) -> String;

    /// `Ok(None)` once the source has no more frames. `InvalidFrame` errors
    /// are per-frame and the source stays usable; any other error is fatal.
    fn next_frame(&mut self) -> Result<Option<Frame>, MonitorError>;
}

/// What the pump thread forwards to the sensing loop.
#[derive(Debug)]
pub enum SourceEvent {
    Frame(Frame),
    Skipped(MonitorError),
    Failed(MonitorError),
    Ended,
}

const PUMP_QUEUE_DEPTH: usize = 2;

/// Runs `source` on a dedicated thread. Frames arriving while the queue is
/// full are dropped, like a camera dropping frames behind a slow consumer.
/// The thread exits once the receiver is dropped.
pub fn spawn_frame_pump(mut source: Box<dyn FrameSource>) -> mpsc::Receiver<SourceEvent> {
    let (tx, rx) = mpsc::channel(PUMP_QUEUE_DEPTH);
    let name = source.name();

    let spawned = thread::Builder::new()
        .name("moodwatch-frames".into())
        .spawn(move || {
            info!("frame pump started for {name}");
            loop {
                let event = match source.next_frame() {
                    Ok(Some(frame)) => SourceEvent::Frame(frame),
                    Ok(None) => {
                        let _ = tx.blocking_send(SourceEvent::Ended);
                        break;
                    }
                    Err(err @ MonitorError::InvalidFrame { .. }) => SourceEvent::Skipped(err),
                    Err(err) => {
                        let _ = tx.blocking_send(SourceEvent::Failed(err));
                        break;
                    }
                };

                match tx.try_send(event) {
                    Ok(()) | Err(TrySendError::Full(_)) => {}
                    Err(TrySendError::Closed(_)) => break,
                }
            }
            info!("frame pump for {name} stopped");
        });

    if let Err(err) = spawned {
        warn!("failed to spawn frame pump thread: {err}");
        let (fail_tx, fail_rx) = mpsc::channel(1);
        let _ = fail_tx.try_send(SourceEvent::Failed(MonitorError::SourceUnavailable {
            reason: format!("failed to spawn frame pump: {err}"),
        }));
        return fail_rx;
    }

    rx
}

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Replays still images from a directory in file-name order.
pub struct ImageDirSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    position: usize,
    looping: bool,
    frame_interval: Duration,
}

impl ImageDirSource {
    pub fn open(dir: &Path, looping: bool, fps: u32) -> Result<Self, MonitorError> {
        let unavailable = |reason: String| MonitorError::SourceUnavailable { reason };

        let entries = std::fs::read_dir(dir)
            .map_err(|err| unavailable(format!("cannot read {}: {err}", dir.display())))?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(unavailable(format!("no images in {}", dir.display())));
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            files,
            position: 0,
            looping,
            frame_interval: Duration::from_millis(1000 / u64::from(fps.max(1))),
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for ImageDirSource {
    fn name(&self) -> String {
        format!("images:{}", self.dir.display())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, MonitorError> {
        if self.position >= self.files.len() {
            if !self.looping {
                return Ok(None);
            }
            self.position = 0;
        }

        thread::sleep(self.frame_interval);

        let path = &self.files[self.position];
        self.position += 1;

        let decoded = image::open(path).map_err(|err| MonitorError::InvalidFrame {
            reason: format!("{}: {err}", path.display()),
        })?;
        Ok(Some(Frame::new(decoded.to_rgb8(), Instant::now())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use tempfile::tempdir;

    #[test]
    fn missing_directory_is_unavailable() {
        let err = ImageDirSource::open(Path::new("/nonexistent/frames"), false, 30)
            .err()
            .unwrap();
        assert!(matches!(err, MonitorError::SourceUnavailable { .. }));
    }

    #[test]
    fn replays_images_then_ends() {
        let dir = tempdir().unwrap();
        RgbImage::new(8, 6).save(dir.path().join("a.png")).unwrap();
        RgbImage::new(8, 6).save(dir.path().join("b.png")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "skip me").unwrap();

        let mut source = ImageDirSource::open(dir.path(), false, 1000).unwrap();
        assert_eq!(source.len(), 2);
        assert_eq!(source.next_frame().unwrap().unwrap().width(), 8);
        assert!(source.next_frame().unwrap().is_some());
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn corrupt_image_is_a_frame_level_error() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("broken.png"), b"not a png").unwrap();

        let mut source = ImageDirSource::open(dir.path(), true, 1000).unwrap();
        let err = source.next_frame().unwrap_err();
        assert!(matches!(err, MonitorError::InvalidFrame { .. }));
    }

    #[tokio::test]
    async fn pump_forwards_end_of_stream() {
        let dir = tempdir().unwrap();
        RgbImage::new(4, 4).save(dir.path().join("only.png")).unwrap();
        let source = ImageDirSource::open(dir.path(), false, 1000).unwrap();

        let mut rx = spawn_frame_pump(Box::new(source));
        assert!(matches!(rx.recv().await, Some(SourceEvent::Frame(_))));
        assert!(matches!(rx.recv().await, Some(SourceEvent::Ended)));
    }
}
