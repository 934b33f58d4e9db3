use anyhow::{bail, Context, Result};
use log::info;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::loop_worker::{sensing_loop, SensingContext};
use super::source::{spawn_frame_pump, FrameSource};

/// Start/stop handle for the sampling loop of the current session.
pub struct SensingController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl Default for SensingController {
    fn default() -> Self {
        Self::new()
    }
}

impl SensingController {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    pub fn start_sensing(&mut self, ctx: SensingContext, source: Box<dyn FrameSource>) -> Result<()> {
        if self.is_active() {
            bail!("sensing already active");
        }

        info!("starting sensing from {}", source.name());
        let frames = spawn_frame_pump(source);

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(sensing_loop(ctx, frames, cancel_token.clone()));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    /// Cancels the loop and waits for it to exit. An in-flight classification
    /// is abandoned; its result never reaches the session.
    pub async fn stop_sensing(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("sensing loop task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}
