//! # Image Matcher Module
//!
//! Locates a template image within a screen capture despite unknown scale.
//! The search resizes the template across a configurable scale range, scores
//! each candidate position with a normalized cross-correlation coefficient,
//! and keeps the single best hit. Scales are scored on a bounded worker pool;
//! the merge is deterministic regardless of worker completion order. Results
//! are cached by a fingerprint of the (screen, template) pair.

use crate::engine::cache::{CacheCost, MatchCache};
use crate::engine::error::{AutomationError, Result};
use crate::engine::jitter::JitterSource;
use image::GrayImage;
use image::imageops::{self, FilterType};
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Outcome of a successful template search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Top-left corner of the best-fit location on the screen
    pub location: (u32, u32),
    /// Width and height of the template at the matched scale
    pub footprint: (u32, u32),
    /// Normalized correlation score in [-1, 1]
    pub score: f64,
    /// Scale factor that produced the match
    pub scale: f64,
}

impl CacheCost for MatchResult {
    fn cost(&self) -> usize {
        self.location.cost() + self.footprint.cost() + self.score.cost() + self.scale.cost()
    }
}

/// Tuning knobs for the scale search
#[derive(Debug, Clone)]
pub struct MatcherConfig {
    /// Nominal acceptance threshold in [0, 1]
    pub threshold: f64,
    /// Inclusive range of scale factors to try
    pub scale_range: (f64, f64),
    /// Number of evenly spaced scales across the range
    pub steps: usize,
    /// Worker threads for scoring scales
    pub workers: usize,
    /// Optional randomized per-scale delay (min_ms, max_ms) to emulate human
    /// timing; never affects the chosen result
    pub scale_delay_ms: Option<(u64, u64)>,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            threshold: 0.8,
            scale_range: (0.5, 1.5),
            steps: 10,
            workers: 4,
            scale_delay_ms: None,
        }
    }
}

/// Multi-scale template search over a shared match cache
pub struct ImageMatcher {
    config: MatcherConfig,
    cache: Arc<MatchCache>,
    jitter: Option<Arc<dyn JitterSource>>,
}

impl ImageMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self {
            config,
            cache: Arc::new(MatchCache::default()),
            jitter: None,
        }
    }

    /// Share an externally owned cache (e.g. across matchers)
    pub fn with_cache(mut self, cache: Arc<MatchCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Install the jitter source used for per-scale delays
    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = Some(jitter);
        self
    }

    pub fn cache(&self) -> &Arc<MatchCache> {
        &self.cache
    }

    /// Set the acceptance threshold from a percentage in 0..100
    pub fn set_threshold(&mut self, percent: f64) {
        self.config.threshold = percent / 100.0;
    }

    pub fn set_scale_range(&mut self, min: f64, max: f64) {
        self.config.scale_range = (min, max);
    }

    /// Search `screen` for `template`.
    ///
    /// Returns `Ok(None)` when no scale produced a score of at least
    /// `threshold * 0.8` — the relaxed acceptance bar is kept verbatim from
    /// the observed behavior of this search. A cached result for the same
    /// (screen, template) pair is returned unconditionally, without
    /// rescoring. Negative outcomes are never cached.
    pub fn match_template(
        &self,
        screen: &GrayImage,
        template: Option<&GrayImage>,
    ) -> Result<Option<MatchResult>> {
        self.match_template_with(screen, template, None)
    }

    /// Same as [`match_template`](Self::match_template) with a one-off
    /// threshold override, e.g. from a task's parameters.
    pub fn match_template_with(
        &self,
        screen: &GrayImage,
        template: Option<&GrayImage>,
        threshold_override: Option<f64>,
    ) -> Result<Option<MatchResult>> {
        let template = template
            .ok_or_else(|| AutomationError::TemplateMissing("no template image supplied".into()))?;
        let threshold = threshold_override.unwrap_or(self.config.threshold);

        let key = fingerprint(screen, template);
        if let Some(hit) = self.cache.get(&key) {
            debug!("match cache hit for {key}");
            return Ok(Some(hit));
        }

        let best = self.search_scales(screen, template);

        match best {
            Some(result) if result.score >= threshold * 0.8 => {
                debug!(
                    "matched at ({}, {}) scale {:.2} score {:.3}",
                    result.location.0, result.location.1, result.scale, result.score
                );
                self.cache.put(key, result.clone());
                Ok(Some(result))
            }
            Some(result) => {
                debug!(
                    "best score {:.3} below bar {:.3}, no match",
                    result.score,
                    threshold * 0.8
                );
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Evenly spaced scale factors across the range, endpoints inclusive
    fn scales(&self) -> Vec<f64> {
        let (min, max) = self.config.scale_range;
        let steps = self.config.steps.max(1);
        if steps == 1 {
            return vec![min];
        }
        (0..steps)
            .map(|i| min + (max - min) * i as f64 / (steps - 1) as f64)
            .collect()
    }

    /// Score every scale on the worker pool and merge deterministically:
    /// maximum score wins, ties resolved to the scale first in ascending
    /// order.
    fn search_scales(&self, screen: &GrayImage, template: &GrayImage) -> Option<MatchResult> {
        let scales = self.scales();
        let workers = self.config.workers.clamp(1, scales.len());

        let (job_tx, job_rx) = crossbeam::channel::unbounded::<(usize, f64)>();
        let (res_tx, res_rx) = crossbeam::channel::unbounded::<(usize, f64, Option<ScaleHit>)>();

        thread::scope(|s| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let res_tx = res_tx.clone();
                s.spawn(move || {
                    while let Ok((idx, scale)) = job_rx.recv() {
                        if let Some((min_ms, max_ms)) = self.config.scale_delay_ms {
                            let ms = self
                                .jitter
                                .as_ref()
                                .map(|j| j.delay(min_ms, max_ms))
                                .unwrap_or(min_ms);
                            thread::sleep(Duration::from_millis(ms));
                        }
                        let hit = score_at_scale(screen, template, scale);
                        let _ = res_tx.send((idx, scale, hit));
                    }
                });
            }

            for (idx, scale) in scales.iter().enumerate() {
                let _ = job_tx.send((idx, *scale));
            }
            drop(job_tx);
        });
        drop(res_tx);

        let mut outcomes: Vec<_> = res_rx.try_iter().collect();
        outcomes.sort_by_key(|(idx, _, _)| *idx);

        let mut best: Option<MatchResult> = None;
        for (_, scale, hit) in outcomes {
            let Some(hit) = hit else { continue };
            // Strictly greater: on a tie the earlier (smaller) scale stands.
            if best.as_ref().is_none_or(|b| hit.score > b.score) {
                best = Some(MatchResult {
                    location: (hit.x, hit.y),
                    footprint: (hit.width, hit.height),
                    score: hit.score,
                    scale,
                });
            }
        }
        best
    }
}

struct ScaleHit {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    score: f64,
}

/// Resize the template to `scale` and find its best-fit location. `None` when
/// the scaled template does not fit inside the screen.
fn score_at_scale(screen: &GrayImage, template: &GrayImage, scale: f64) -> Option<ScaleHit> {
    let (tw, th) = template.dimensions();
    let width = ((tw as f64 * scale).round() as u32).max(1);
    let height = ((th as f64 * scale).round() as u32).max(1);

    let resized = if (width, height) == (tw, th) {
        template.clone()
    } else {
        imageops::resize(template, width, height, FilterType::Triangle)
    };

    best_correlation(screen, &resized).map(|(x, y, score)| ScaleHit {
        x,
        y,
        width,
        height,
        score,
    })
}

/// Best-fit location by normalized cross-correlation coefficient.
///
/// Scans positions in row-major order; the first position with the maximum
/// score wins, which keeps the search deterministic. Flat windows (zero
/// variance on either side) score 0.
fn best_correlation(screen: &GrayImage, template: &GrayImage) -> Option<(u32, u32, f64)> {
    let (sw, sh) = screen.dimensions();
    let (tw, th) = template.dimensions();
    if tw == 0 || th == 0 || tw > sw || th > sh {
        return None;
    }

    let n = (tw as f64) * (th as f64);
    let t_raw = template.as_raw();
    let t_mean = t_raw.iter().map(|&p| p as f64).sum::<f64>() / n;
    let t_centered: Vec<f64> = t_raw.iter().map(|&p| p as f64 - t_mean).collect();
    let t_var_sum: f64 = t_centered.iter().map(|v| v * v).sum();

    let s_raw = screen.as_raw();
    let sw_us = sw as usize;
    let tw_us = tw as usize;

    let mut best: Option<(u32, u32, f64)> = None;
    for y0 in 0..=(sh - th) {
        for x0 in 0..=(sw - tw) {
            let mut sum = 0.0f64;
            let mut sum_sq = 0.0f64;
            let mut cross = 0.0f64;

            for ty in 0..th as usize {
                let s_row = (y0 as usize + ty) * sw_us + x0 as usize;
                let t_row = ty * tw_us;
                for tx in 0..tw_us {
                    let sv = s_raw[s_row + tx] as f64;
                    sum += sv;
                    sum_sq += sv * sv;
                    cross += sv * t_centered[t_row + tx];
                }
            }

            let s_var_sum = sum_sq - sum * sum / n;
            let denom = (s_var_sum * t_var_sum).sqrt();
            let score = if denom > 1e-12 { cross / denom } else { 0.0 };

            if best.is_none_or(|(_, _, s)| score > s) {
                best = Some((x0, y0, score));
            }
        }
    }
    best
}

/// Identity of a (screen, template) pair, used as the cache key
pub fn fingerprint(screen: &GrayImage, template: &GrayImage) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&screen.width().to_le_bytes());
    hasher.update(&screen.height().to_le_bytes());
    hasher.update(screen.as_raw());
    hasher.update(&template.width().to_le_bytes());
    hasher.update(&template.height().to_le_bytes());
    hasher.update(template.as_raw());
    hasher.finalize().to_hex().to_string()
}
