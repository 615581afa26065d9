//! Speaking-indicator level from PCM samples.
//!
//! Samples are cut into 32-sample blocks. Each block is Blackman-windowed
//! and transformed; the 16 bin magnitudes are smoothed over time, mapped to
//! bytes over a fixed decibel range, and the level is the RMS of those bytes
//! scaled to `[0, 1]`.

use std::f32::consts::PI;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

pub const BLOCK_SIZE: usize = 32;
pub const BIN_COUNT: usize = BLOCK_SIZE / 2;

const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;
const DEFAULT_SMOOTHING: f32 = 0.8;

#[derive(Debug, Clone)]
pub struct VolumeMeter {
    window: [f32; BLOCK_SIZE],
    pending: Vec<f32>,
    magnitudes: [f32; BIN_COUNT],
    bytes: [u8; BIN_COUNT],
    smoothing: f32,
    level: f32,
}

impl Default for VolumeMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl VolumeMeter {
    pub fn new() -> Self {
        Self::with_smoothing(DEFAULT_SMOOTHING)
    }

    /// `smoothing` in `[0, 1)`; the fraction of the previous magnitude kept
    /// for each new block.
    pub fn with_smoothing(smoothing: f32) -> Self {
        let mut window = [0.0; BLOCK_SIZE];
        for (n, w) in window.iter_mut().enumerate() {
            let phase = 2.0 * PI * n as f32 / BLOCK_SIZE as f32;
            *w = 0.42 - 0.5 * phase.cos() + 0.08 * (2.0 * phase).cos();
        }
        Self {
            window,
            pending: Vec::with_capacity(BLOCK_SIZE),
            magnitudes: [0.0; BIN_COUNT],
            bytes: [0; BIN_COUNT],
            smoothing: smoothing.clamp(0.0, 0.99),
            level: 0.0,
        }
    }

    /// Feeds mono samples in `[-1, 1]`. The level changes once per
    /// completed block.
    pub fn push_samples(&mut self, samples: &[f32]) {
        for &sample in samples {
            self.pending.push(if sample.is_finite() { sample } else { 0.0 });
            if self.pending.len() == BLOCK_SIZE {
                self.analyse_block();
                self.pending.clear();
            }
        }
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn frequency_bytes(&self) -> &[u8; BIN_COUNT] {
        &self.bytes
    }

    pub fn reset(&mut self) {
        self.pending.clear();
        self.magnitudes = [0.0; BIN_COUNT];
        self.bytes = [0; BIN_COUNT];
        self.level = 0.0;
    }

    fn analyse_block(&mut self) {
        let n = BLOCK_SIZE as f32;
        for k in 0..BIN_COUNT {
            let (mut re, mut im) = (0.0f32, 0.0f32);
            for (i, (&x, &w)) in self.pending.iter().zip(self.window.iter()).enumerate() {
                let angle = -2.0 * PI * (k * i) as f32 / n;
                re += x * w * angle.cos();
                im += x * w * angle.sin();
            }
            let magnitude = (re * re + im * im).sqrt() / n;
            self.magnitudes[k] =
                self.smoothing * self.magnitudes[k] + (1.0 - self.smoothing) * magnitude;
        }

        let scale = 255.0 / (MAX_DECIBELS - MIN_DECIBELS);
        let mut sum_sq = 0.0f32;
        for (byte, &magnitude) in self.bytes.iter_mut().zip(self.magnitudes.iter()) {
            let db = 20.0 * magnitude.log10();
            let value = (scale * (db - MIN_DECIBELS)).clamp(0.0, 255.0);
            *byte = value as u8;
            sum_sq += value * value;
        }
        self.level = ((sum_sq / BIN_COUNT as f32).sqrt() / 255.0).clamp(0.0, 1.0);
    }
}

/// Level written by an audio task and read by the frame loop.
#[derive(Debug, Clone, Default)]
pub struct SharedLevel(Arc<AtomicU32>);

impl SharedLevel {
    pub fn store(&self, level: f32) {
        self.0.store(level.to_bits(), Ordering::Relaxed);
    }

    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }
}
