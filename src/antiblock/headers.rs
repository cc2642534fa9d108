//! Randomized request header synthesis

use super::reference::{DeviceClass, ACCEPT_LANGUAGES, REFERERS};
use crate::config::HeaderWeights;
use rand::Rng;

/// One internally consistent set of identity headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderSet {
    pub device: DeviceClass,
    pub user_agent: &'static str,
    pub referer: &'static str,
    pub accept_language: &'static str,
}

impl HeaderSet {
    /// Header name/value pairs in the order they are sent
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        vec![
            ("user-agent".to_string(), self.user_agent.to_string()),
            ("referer".to_string(), self.referer.to_string()),
            ("accept-language".to_string(), self.accept_language.to_string()),
            (
                "accept".to_string(),
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string(),
            ),
        ]
    }
}

/// Draws header sets: a weighted device class, then a uniform pick within each pool
#[derive(Debug, Clone)]
pub struct HeaderSynthesizer {
    weights: [(DeviceClass, f64); 3],
}

impl HeaderSynthesizer {
    pub fn new(weights: &HeaderWeights) -> Self {
        Self {
            weights: [
                (DeviceClass::Desktop, weights.desktop.max(0.0)),
                (DeviceClass::Mobile, weights.mobile.max(0.0)),
                (DeviceClass::Bot, weights.bot.max(0.0)),
            ],
        }
    }

    /// Picks a device class with probability proportional to its weight
    ///
    /// A class with weight zero is never chosen. If every weight is zero, desktop is used.
    pub fn draw_device<R: Rng + ?Sized>(&self, rng: &mut R) -> DeviceClass {
        let total: f64 = self.weights.iter().map(|(_, w)| w).sum();
        if total <= 0.0 || !total.is_finite() {
            return DeviceClass::Desktop;
        }

        let mut remaining = rng.random_range(0.0..total);
        let mut last_positive = DeviceClass::Desktop;

        for (device, weight) in self.weights {
            if weight <= 0.0 {
                continue;
            }
            last_positive = device;
            remaining -= weight;
            if remaining < 0.0 {
                return device;
            }
        }

        // Floating point leftovers land on the last class that can be drawn
        last_positive
    }

    pub fn synthesize<R: Rng + ?Sized>(&self, rng: &mut R) -> HeaderSet {
        let device = self.draw_device(rng);
        HeaderSet {
            device,
            user_agent: pick(device.user_agents(), rng),
            referer: pick(REFERERS, rng),
            accept_language: pick(ACCEPT_LANGUAGES, rng),
        }
    }
}

fn pick<R: Rng + ?Sized>(pool: &'static [&'static str], rng: &mut R) -> &'static str {
    pool[rng.random_range(0..pool.len())]
}
