use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::{
    error::MonitorError,
    monitor::MonitorEvent,
    session::{Admission, FrameOutcome, SampleTicket, SessionController},
};

use super::classifier::{classify_validated, Classification, Classifier, ClassifierError};
use super::frame::Frame;
use super::source::SourceEvent;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Shared handles the sampling loop works against.
#[derive(Clone)]
pub struct SensingContext {
    pub session: Arc<Mutex<SessionController>>,
    pub classifier: Arc<dyn Classifier>,
    pub events: broadcast::Sender<MonitorEvent>,
    pub classify_timeout: Duration,
    pub downscale_factor: f32,
}

pub async fn sensing_loop(
    ctx: SensingContext,
    mut frames: mpsc::Receiver<SourceEvent>,
    cancel_token: CancellationToken,
) {
    log_info!("sensing loop started with classifier {}", ctx.classifier.name());

    loop {
        tokio::select! {
            event = frames.recv() => {
                match event {
                    Some(SourceEvent::Frame(frame)) => {
                        process_frame(&ctx, frame, &cancel_token).await;
                    }
                    Some(SourceEvent::Skipped(err)) => {
                        log_warn!("frame skipped: {err}");
                        emit_skipped(&ctx, None, &err);
                    }
                    Some(SourceEvent::Failed(err)) => {
                        end_session(&ctx, err).await;
                        break;
                    }
                    Some(SourceEvent::Ended) | None => {
                        end_session(&ctx, MonitorError::SourceUnavailable {
                            reason: "frame stream ended".into(),
                        })
                        .await;
                        break;
                    }
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("sensing loop shutting down");
                break;
            }
        }
    }
}

async fn process_frame(ctx: &SensingContext, frame: Frame, cancel_token: &CancellationToken) {
    let admission = {
        let mut guard = ctx.session.lock().await;
        guard.admit_frame(&frame, Instant::now())
    };

    let ticket = match admission {
        Admission::Sample(ticket) => ticket,
        Admission::Gated | Admission::Inactive => return,
        Admission::Invalid(err) => {
            log_warn!("invalid frame: {err}");
            emit_skipped(ctx, None, &err);
            return;
        }
    };

    let result = tokio::select! {
        result = classify(ctx, frame) => result,
        _ = cancel_token.cancelled() => {
            log_debug!("classification abandoned for session {}", ticket.session_id());
            return;
        }
    };
    log_debug!(
        "sample for session {} classified {}ms after admission",
        ticket.session_id(),
        ticket.admitted_at().elapsed().as_millis()
    );

    record(ctx, &ticket, result).await;
}

/// Runs the classifier on a blocking worker, bounded by the configured timeout.
async fn classify(ctx: &SensingContext, frame: Frame) -> Result<Classification, ClassifierError> {
    let classifier = Arc::clone(&ctx.classifier);
    let factor = ctx.downscale_factor;
    let job = tokio::task::spawn_blocking(move || {
        let image = frame.scaled(factor);
        classify_validated(classifier.as_ref(), &image)
    });

    match tokio::time::timeout(ctx.classify_timeout, job).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => {
            log_error!("classifier worker failed: {join_err}");
            Err(ClassifierError::Failed {
                reason: format!("classifier worker failed: {join_err}"),
            })
        }
        Err(_) => Err(ClassifierError::TimedOut),
    }
}

async fn record(
    ctx: &SensingContext,
    ticket: &SampleTicket,
    result: Result<Classification, ClassifierError>,
) {
    let outcome = {
        let mut guard = ctx.session.lock().await;
        guard.record_sample(ticket, result, Instant::now())
    };

    match outcome {
        FrameOutcome::Recorded(reading) => {
            log_debug!(
                "session {} recorded {} ({:.2})",
                ticket.session_id(),
                reading.dominant,
                reading.scores.get(reading.dominant)
            );
            let _ = ctx.events.send(MonitorEvent::SampleRecorded {
                session_id: ticket.session_id().to_string(),
                reading,
            });
        }
        FrameOutcome::Skipped(err) => emit_skipped(ctx, Some(ticket.session_id()), &err),
        FrameOutcome::Discarded => {
            log_info!("late result for session {} discarded", ticket.session_id());
        }
        FrameOutcome::Gated | FrameOutcome::Inactive => {}
    }
}

async fn end_session(ctx: &SensingContext, err: MonitorError) {
    let ended = {
        let mut guard = ctx.session.lock().await;
        guard.fail_source(&err, Instant::now())
    };
    if ended {
        log_warn!("frame source lost, session stopped: {err}");
    } else {
        log_info!("frame source closed after session end: {err}");
    }
}

fn emit_skipped(ctx: &SensingContext, session_id: Option<&str>, err: &MonitorError) {
    let _ = ctx.events.send(MonitorEvent::SampleSkipped {
        session_id: session_id.map(str::to_string),
        reason: err.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionStatus;
    use crate::sensing::{RawClassification, SyntheticSource};
    use crate::sensing::source::spawn_frame_pump;
    use crate::session::{EndReason, SessionRequest};
    use image::RgbImage;

    struct Stalled;

    impl Classifier for Stalled {
        fn name(&self) -> &'static str {
            "stalled"
        }

        fn classify(&self, _image: &RgbImage) -> Result<RawClassification, ClassifierError> {
            std::thread::sleep(std::time::Duration::from_millis(300));
            Err(ClassifierError::Failed {
                reason: "unreachable".into(),
            })
        }
    }

    struct Panicking;

    impl Classifier for Panicking {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn classify(&self, _image: &RgbImage) -> Result<RawClassification, ClassifierError> {
            panic!("model crashed");
        }
    }

    fn context(classifier: Arc<dyn Classifier>, timeout: Duration) -> SensingContext {
        let (events, _) = broadcast::channel(64);
        SensingContext {
            session: Arc::new(Mutex::new(SessionController::new(100))),
            classifier,
            events,
            classify_timeout: timeout,
            downscale_factor: 0.5,
        }
    }

    fn request() -> SessionRequest {
        SessionRequest {
            subject_id: "P1".into(),
            duration: Duration::from_secs(60),
            interval: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn timeout_counts_as_a_classifier_failure() {
        let ctx = context(Arc::new(Stalled), Duration::from_millis(20));
        ctx.session.lock().await.start(request(), Instant::now()).unwrap();
        let mut events = ctx.events.subscribe();

        process_frame(
            &ctx,
            Frame::new(RgbImage::new(8, 8), Instant::now()),
            &CancellationToken::new(),
        )
        .await;

        let status = ctx.session.lock().await.status(Instant::now());
        assert_eq!(status.stats.classifier_failures, 1);
        assert_eq!(status.reading_count, 0);
        match events.recv().await.unwrap() {
            MonitorEvent::SampleSkipped { reason, .. } => assert!(reason.contains("timed out")),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn crashed_worker_counts_as_a_classifier_failure() {
        let ctx = context(Arc::new(Panicking), Duration::from_secs(5));
        ctx.session.lock().await.start(request(), Instant::now()).unwrap();

        process_frame(
            &ctx,
            Frame::new(RgbImage::new(8, 8), Instant::now()),
            &CancellationToken::new(),
        )
        .await;

        let status = ctx.session.lock().await.status(Instant::now());
        assert_eq!(status.stats.classifier_failures, 1);
        assert_eq!(status.state, SessionStatus::Running);
    }

    #[tokio::test]
    async fn source_failure_stops_the_session() {
        let ctx = context(Arc::new(crate::sensing::DemoClassifier::new(3)), Duration::from_secs(5));
        ctx.session.lock().await.start(request(), Instant::now()).unwrap();

        let frames = spawn_frame_pump(Box::new(SyntheticSource::new(8, 8, 200).fail_after(3)));
        sensing_loop(ctx.clone(), frames, CancellationToken::new()).await;

        let status = ctx.session.lock().await.status(Instant::now());
        assert_eq!(status.state, SessionStatus::Stopped);
        assert!(matches!(status.end_reason, Some(EndReason::SourceUnavailable(_))));
        assert!(status.reading_count >= 1);
    }

    #[tokio::test]
    async fn cancellation_ends_the_loop() {
        let ctx = context(Arc::new(crate::sensing::DemoClassifier::new(3)), Duration::from_secs(5));
        ctx.session.lock().await.start(request(), Instant::now()).unwrap();

        let token = CancellationToken::new();
        let frames = spawn_frame_pump(Box::new(SyntheticSource::new(8, 8, 100)));
        let handle = tokio::spawn(sensing_loop(ctx.clone(), frames, token.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
        handle.await.unwrap();

        assert_eq!(
            ctx.session.lock().await.status_kind(),
            SessionStatus::Running
        );
    }
}
