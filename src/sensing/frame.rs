use std::time::Instant;

use image::{imageops::FilterType, RgbImage};

use crate::error::MonitorError;

/// One captured video frame in RGB8.
#[derive(Debug, Clone)]
pub struct Frame {
    image: RgbImage,
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(image: RgbImage, captured_at: Instant) -> Self {
        Self { image, captured_at }
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn validate(&self) -> Result<(), MonitorError> {
        if self.image.width() == 0 || self.image.height() == 0 {
            return Err(MonitorError::InvalidFrame {
                reason: format!("empty frame {}x{}", self.width(), self.height()),
            });
        }
        Ok(())
    }

    /// Resized copy for classification. Factors outside (0, 1) keep the
    /// original size.
    pub fn scaled(&self, factor: f32) -> RgbImage {
        if !(factor > 0.0 && factor < 1.0) {
            return self.image.clone();
        }
        let width = ((self.width() as f32 * factor) as u32).max(1);
        let height = ((self.height() as f32 * factor) as u32).max(1);
        image::imageops::resize(&self.image, width, height, FilterType::Triangle)
    }
}
