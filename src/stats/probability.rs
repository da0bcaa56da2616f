//! Probability engine.
//!
//! Stateless derivations over the current `Histogram`: over/under
//! probabilities for a barrier digit, even/odd split, parity dominance
//! and the hottest/coldest digits.

use serde::Serialize;

use super::Histogram;
use crate::types::Dominance;

/// Parity imbalance (in ticks) required before a side is called dominant.
pub const DEFAULT_DOMINANCE_MARGIN: u64 = 5;

/// Over/under probabilities (0–100) for one prediction digit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OverUnder {
    pub over: f64,
    pub under: f64,
}

/// Even/odd split of the window (0–100).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EvenOdd {
    pub even: f64,
    pub odd: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct ProbabilityEngine {
    dominance_margin: u64,
}

impl Default for ProbabilityEngine {
    fn default() -> Self {
        Self::new(DEFAULT_DOMINANCE_MARGIN)
    }
}

impl ProbabilityEngine {
    pub fn new(dominance_margin: u64) -> Self {
        Self { dominance_margin }
    }

    /// Share of the window strictly above / strictly below `prediction`.
    pub fn over_under(&self, hist: &Histogram, prediction: u8) -> OverUnder {
        if hist.total == 0 {
            return OverUnder { over: 0.0, under: 0.0 };
        }
        let (mut over, mut under) = (0u64, 0u64);
        for stat in hist.stats.iter() {
            if stat.digit > prediction {
                over += stat.count;
            } else if stat.digit < prediction {
                under += stat.count;
            }
        }
        let total = hist.total as f64;
        OverUnder {
            over: over as f64 / total * 100.0,
            under: under as f64 / total * 100.0,
        }
    }

    pub fn even_odd(&self, hist: &Histogram) -> EvenOdd {
        if hist.total == 0 {
            return EvenOdd { even: 0.0, odd: 0.0 };
        }
        let (even, odd) = parity_counts(hist);
        let total = hist.total as f64;
        EvenOdd {
            even: even as f64 / total * 100.0,
            odd: odd as f64 / total * 100.0,
        }
    }

    pub fn dominance(&self, hist: &Histogram) -> Dominance {
        let (even, odd) = parity_counts(hist);
        if even > odd + self.dominance_margin {
            Dominance::Even
        } else if odd > even + self.dominance_margin {
            Dominance::Odd
        } else {
            Dominance::Neutral
        }
    }

    /// Most frequent digit (lowest digit wins ties). `None` if every bucket is equal.
    pub fn hottest(&self, hist: &Histogram) -> Option<u8> {
        if is_flat(hist) {
            return None;
        }
        hist.stats
            .iter()
            .rev()
            .max_by_key(|s| s.count)
            .map(|s| s.digit)
    }

    /// Least frequent digit (lowest digit wins ties). `None` if every bucket is equal.
    pub fn coldest(&self, hist: &Histogram) -> Option<u8> {
        if is_flat(hist) {
            return None;
        }
        hist.stats.iter().min_by_key(|s| s.count).map(|s| s.digit)
    }
}

fn parity_counts(hist: &Histogram) -> (u64, u64) {
    hist.stats.iter().fold((0, 0), |(even, odd), s| {
        if s.digit % 2 == 0 {
            (even + s.count, odd)
        } else {
            (even, odd + s.count)
        }
    })
}

fn is_flat(hist: &Histogram) -> bool {
    let first = hist.stats[0].count;
    hist.stats.iter().all(|s| s.count == first)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
