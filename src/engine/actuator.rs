//! External collaborator interfaces: input injection and screen capture.
//!
//! The engine drives these traits; wiring them to an OS-level backend is the
//! embedder's concern. `LoggingActuator` stands in where no backend exists.

use crate::engine::error::Result;
use crate::engine::task::Point;
use image::GrayImage;
use log::debug;

/// Performs the actual input injection for each task type.
pub trait InputActuator: Send + Sync {
    fn click(&self, at: Point, count: u32, interval_ms: u64, hold_ms: u64) -> Result<()>;

    fn drag(&self, start: Point, end: Point, path: &[Point], duration_ms: u64) -> Result<()>;

    fn type_text(&self, text: &str, interval_ms: u64) -> Result<()>;

    fn swipe(&self, start: Point, end: Point, duration_ms: u64) -> Result<()>;
}

/// Supplies screen captures for match tasks and bounds for clamping.
pub trait ScreenSource: Send + Sync {
    fn capture(&self) -> Result<GrayImage>;

    /// Screen size in pixels, (width, height)
    fn dimensions(&self) -> (u32, u32);
}

/// Actuator that records every action through the `log` facade and reports
/// success. Useful for dry runs and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingActuator;

impl InputActuator for LoggingActuator {
    fn click(&self, at: Point, count: u32, interval_ms: u64, hold_ms: u64) -> Result<()> {
        debug!(
            "click at ({}, {}) x{count}, interval {interval_ms}ms, hold {hold_ms}ms",
            at.x, at.y
        );
        Ok(())
    }

    fn drag(&self, start: Point, end: Point, path: &[Point], duration_ms: u64) -> Result<()> {
        debug!(
            "drag ({}, {}) -> ({}, {}) over {} waypoints in {duration_ms}ms",
            start.x,
            start.y,
            end.x,
            end.y,
            path.len()
        );
        Ok(())
    }

    fn type_text(&self, text: &str, interval_ms: u64) -> Result<()> {
        debug!("type {} chars, interval {interval_ms}ms", text.chars().count());
        Ok(())
    }

    fn swipe(&self, start: Point, end: Point, duration_ms: u64) -> Result<()> {
        debug!(
            "swipe ({}, {}) -> ({}, {}) in {duration_ms}ms",
            start.x, start.y, end.x, end.y
        );
        Ok(())
    }
}

/// Screen source that always returns a fixed image. Intended for tests and
/// offline batch matching.
pub struct StaticScreen {
    image: GrayImage,
}

impl StaticScreen {
    pub fn new(image: GrayImage) -> Self {
        Self { image }
    }
}

impl ScreenSource for StaticScreen {
    fn capture(&self) -> Result<GrayImage> {
        Ok(self.image.clone())
    }

    fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}
