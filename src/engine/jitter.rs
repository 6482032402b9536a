//! Randomized offsets and delays used to emulate human timing.
//!
//! Jitter is a pure side-channel: it perturbs where and when input lands but
//! never participates in match results or task outcomes.

use crate::engine::task::Point;
use rand::Rng;

/// Source of randomized offsets and delays
pub trait JitterSource: Send + Sync {
    /// Offset a coordinate by up to `max_pixels` per axis, uniform, floored
    /// at zero.
    fn offset(&self, at: Point, max_pixels: i64) -> Point;

    /// Uniform delay in `[min_ms, max_ms]`
    fn delay(&self, min_ms: u64, max_ms: u64) -> u64;

    /// `base_ms` with a ±20% uniform variation
    fn scaled_delay(&self, base_ms: u64) -> u64;
}

/// Thread-rng backed jitter
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn offset(&self, at: Point, max_pixels: i64) -> Point {
        if max_pixels == 0 {
            return Point::new(at.x.max(0), at.y.max(0));
        }
        let mut rng = rand::thread_rng();
        let dx = rng.gen_range(-max_pixels..=max_pixels);
        let dy = rng.gen_range(-max_pixels..=max_pixels);
        Point::new((at.x + dx).max(0), (at.y + dy).max(0))
    }

    fn delay(&self, min_ms: u64, max_ms: u64) -> u64 {
        if min_ms >= max_ms {
            return min_ms;
        }
        rand::thread_rng().gen_range(min_ms..=max_ms)
    }

    fn scaled_delay(&self, base_ms: u64) -> u64 {
        let variation = rand::thread_rng().gen_range(0.8..=1.2);
        (base_ms as f64 * variation) as u64
    }
}

/// Identity jitter for tests and deterministic runs
#[derive(Debug, Default, Clone, Copy)]
pub struct NoJitter;

impl JitterSource for NoJitter {
    fn offset(&self, at: Point, _max_pixels: i64) -> Point {
        Point::new(at.x.max(0), at.y.max(0))
    }

    fn delay(&self, min_ms: u64, _max_ms: u64) -> u64 {
        min_ms
    }

    fn scaled_delay(&self, base_ms: u64) -> u64 {
        base_ms
    }
}

/// Clamp a coordinate into `[0, width) x [0, height)`
pub fn clamp_to_screen(at: Point, width: u32, height: u32) -> Point {
    Point::new(
        at.x.clamp(0, (width as i64 - 1).max(0)),
        at.y.clamp(0, (height as i64 - 1).max(0)),
    )
}

/// Whether a coordinate lies within the screen
pub fn in_bounds(at: Point, width: u32, height: u32) -> bool {
    at.x >= 0 && at.y >= 0 && at.x < width as i64 && at.y < height as i64
}
