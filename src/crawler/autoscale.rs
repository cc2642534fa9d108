//! Memory-pressure concurrency control
//!
//! The desired concurrency starts at the configured maximum. When sampled memory use
//! rises above the high-water mark it is halved; below the low-water mark it grows
//! back by one per sample. It never leaves `[1, max-concurrency]`.

use crate::config::AutoscaleConfig;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use sysinfo::System;

struct Sampler {
    system: System,
    last_sample: Option<Instant>,
}

pub struct AutoscaleController {
    enabled: bool,
    max: usize,
    desired: AtomicUsize,
    high_water: f64,
    low_water: f64,
    interval: Duration,
    sampler: Mutex<Sampler>,
}

impl AutoscaleController {
    pub fn new(config: &AutoscaleConfig, max_concurrency: u32) -> Self {
        let max = (max_concurrency as usize).max(1);
        Self {
            enabled: config.enabled,
            max,
            desired: AtomicUsize::new(max),
            high_water: config.memory_high_water,
            low_water: config.memory_low_water,
            interval: Duration::from_millis(config.sample_interval_ms),
            sampler: Mutex::new(Sampler {
                system: System::new(),
                last_sample: None,
            }),
        }
    }

    /// Current desired concurrency
    pub fn desired(&self) -> usize {
        self.desired.load(Ordering::SeqCst)
    }

    /// Applies one memory sample and returns the new desired concurrency
    pub fn adjust(&self, memory_ratio: f64) -> usize {
        let current = self.desired();

        let next = if memory_ratio > self.high_water {
            (current / 2).max(1)
        } else if memory_ratio < self.low_water {
            (current + 1).min(self.max)
        } else {
            current
        };

        if next != current {
            tracing::info!(
                "Memory at {:.0}%, desired concurrency {} -> {}",
                memory_ratio * 100.0,
                current,
                next
            );
            self.desired.store(next, Ordering::SeqCst);
        }

        next
    }

    /// Samples memory if enabled and the sample interval has passed
    pub fn tick(&self) {
        if !self.enabled {
            return;
        }

        let ratio = {
            let mut sampler = self
                .sampler
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());

            let due = sampler
                .last_sample
                .map_or(true, |last| last.elapsed() >= self.interval);
            if !due {
                return;
            }
            sampler.last_sample = Some(Instant::now());

            sampler.system.refresh_memory();
            let total = sampler.system.total_memory();
            if total == 0 {
                return;
            }
            sampler.system.used_memory() as f64 / total as f64
        };

        self.adjust(ratio);
    }
}
