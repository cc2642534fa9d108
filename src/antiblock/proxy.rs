//! Ordered proxy tiers and per-request escalation

use crate::config::ProxyTierConfig;
use rand::Rng;

/// Ordered escalation levels of proxy endpoints
///
/// A tier with no endpoints is a direct connection; it is stored as a single `None`
/// endpoint so every tier can be drawn from the same way.
#[derive(Debug, Clone)]
pub struct ProxyTiers {
    tiers: Vec<Vec<Option<String>>>,
}

impl ProxyTiers {
    pub fn from_config(tiers: &[ProxyTierConfig]) -> Self {
        let mut tiers: Vec<Vec<Option<String>>> = tiers
            .iter()
            .map(|tier| {
                if tier.endpoints.is_empty() {
                    vec![None]
                } else {
                    tier.endpoints.iter().cloned().map(Some).collect()
                }
            })
            .collect();

        if tiers.is_empty() {
            tiers.push(vec![None]);
        }

        Self { tiers }
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    pub fn top_tier(&self) -> usize {
        self.tiers.len().saturating_sub(1)
    }

    /// Draws one endpoint from a tier, clamping the tier to the highest configured
    pub fn pick_endpoint<R: Rng + ?Sized>(&self, tier: usize, rng: &mut R) -> Option<String> {
        let endpoints = &self.tiers[tier.min(self.top_tier())];
        endpoints[rng.random_range(0..endpoints.len())].clone()
    }
}

/// Escalation state carried by a request across its attempts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Escalation {
    /// Tier the next attempt will use
    pub tier: usize,

    /// Transport failures on the current tier since the last escalation
    pub consecutive_failures: u32,
}

/// Every tier has been tried and blocked; the request cannot continue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiersExhausted {
    pub tier: usize,
}

impl Escalation {
    /// Moves to the next tier
    ///
    /// With a single tier there is nothing to escalate to, and the request keeps
    /// retrying on it under the scheduler's retry ceiling. With several, asking to
    /// escalate past the last one is exhaustion.
    pub fn escalate(self, tiers: &ProxyTiers) -> Result<Escalation, TiersExhausted> {
        if tiers.len() <= 1 {
            return Ok(Escalation {
                tier: 0,
                consecutive_failures: 0,
            });
        }

        if self.tier >= tiers.top_tier() {
            return Err(TiersExhausted { tier: self.tier });
        }

        Ok(Escalation {
            tier: self.tier + 1,
            consecutive_failures: 0,
        })
    }
}
