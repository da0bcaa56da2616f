//! Tick statistics: last-digit histogram over a rolling window.
//!
//! Quotes are reduced to their trailing digit and retained in a buffer as
//! large as the biggest supported sample size. Every update recomputes the
//! histogram over the last `sample_size` digits from scratch.

pub mod probability;

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

use crate::types::{DigitStat, EngineError, Quote};

// ---------------------------------------------------------------------------
// Sample size
// ---------------------------------------------------------------------------

/// Supported window sizes.
pub const SAMPLE_SIZES: [usize; 6] = [25, 50, 100, 500, 1000, 5000];

/// Retained digits; equal to the largest sample size.
pub const MAX_RETAINED: usize = 5000;

/// A window size from the supported set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct SampleSize(usize);

impl SampleSize {
    pub fn get(&self) -> usize {
        self.0
    }
}

impl Default for SampleSize {
    fn default() -> Self {
        SampleSize(100)
    }
}

impl TryFrom<usize> for SampleSize {
    type Error = EngineError;

    fn try_from(n: usize) -> Result<Self, Self::Error> {
        if SAMPLE_SIZES.contains(&n) {
            Ok(SampleSize(n))
        } else {
            Err(EngineError::InvalidSampleSize(n))
        }
    }
}

impl From<SampleSize> for usize {
    fn from(s: SampleSize) -> usize {
        s.0
    }
}

// ---------------------------------------------------------------------------
// Histogram
// ---------------------------------------------------------------------------

/// Ten-bucket digit distribution, indexed by digit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Histogram {
    pub stats: [DigitStat; 10],
    pub total: u64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self {
            stats: std::array::from_fn(|d| DigitStat::empty(d as u8)),
            total: 0,
        }
    }
}

impl Histogram {
    /// Build a histogram from a sequence of digits (values above 9 are ignored).
    pub fn from_digits<'a>(digits: impl IntoIterator<Item = &'a u8>) -> Self {
        let mut hist = Histogram::default();
        for &d in digits {
            if let Some(stat) = hist.stats.get_mut(d as usize) {
                stat.count += 1;
                hist.total += 1;
            }
        }
        if hist.total > 0 {
            let total = hist.total as f64;
            for stat in hist.stats.iter_mut() {
                stat.percentage = stat.count as f64 / total * 100.0;
            }
        }
        hist
    }

    pub fn count(&self, digit: u8) -> u64 {
        self.stats.get(digit as usize).map(|s| s.count).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

// ---------------------------------------------------------------------------
// Streak
// ---------------------------------------------------------------------------

/// Consecutive-parity run of the most recent digits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Streak {
    pub consecutive_even: u32,
    pub consecutive_odd: u32,
}

impl Streak {
    fn push(&mut self, digit: u8) {
        if digit % 2 == 0 {
            self.consecutive_even += 1;
            self.consecutive_odd = 0;
        } else {
            self.consecutive_odd += 1;
            self.consecutive_even = 0;
        }
    }
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

/// Trailing digit of a quote. Anything that does not end in an ASCII digit maps to 0.
pub fn last_digit(quote: &str) -> u8 {
    quote
        .chars()
        .last()
        .and_then(|c| c.to_digit(10))
        .map(|d| d as u8)
        .unwrap_or(0)
}

/// Rolling last-digit statistics for one symbol.
#[derive(Debug, Clone)]
pub struct TickAggregator {
    digits: VecDeque<u8>,
    sample_size: SampleSize,
    histogram: Histogram,
    streak: Streak,
    last_digit: Option<u8>,
    last_quote: Option<String>,
}

impl Default for TickAggregator {
    fn default() -> Self {
        Self::new(SampleSize::default())
    }
}

impl TickAggregator {
    pub fn new(sample_size: SampleSize) -> Self {
        Self {
            digits: VecDeque::with_capacity(MAX_RETAINED),
            sample_size,
            histogram: Histogram::default(),
            streak: Streak::default(),
            last_digit: None,
            last_quote: None,
        }
    }

    /// Ingest one quote and recompute the histogram. Returns the extracted digit.
    pub fn ingest(&mut self, quote: &Quote) -> u8 {
        let digit = self.push(quote);
        self.recompute();
        digit
    }

    /// Ingest many quotes (e.g. history priming) with a single recompute.
    pub fn ingest_batch(&mut self, quotes: &[Quote]) -> Option<u8> {
        if quotes.is_empty() {
            return None;
        }
        for quote in quotes {
            self.push(quote);
        }
        self.recompute();
        self.last_digit
    }

    /// Switch window size; recomputes immediately from the retained buffer.
    pub fn set_sample_size(&mut self, size: SampleSize) {
        self.sample_size = size;
        self.recompute();
        debug!(sample_size = size.get(), window = self.histogram.total, "Sample size changed");
    }

    /// Drop all retained ticks and derived state.
    pub fn reset(&mut self) {
        self.digits.clear();
        self.histogram = Histogram::default();
        self.streak = Streak::default();
        self.last_digit = None;
        self.last_quote = None;
    }

    pub fn histogram(&self) -> &Histogram {
        &self.histogram
    }

    pub fn streak(&self) -> Streak {
        self.streak
    }

    pub fn last_digit(&self) -> Option<u8> {
        self.last_digit
    }

    pub fn last_quote(&self) -> Option<&str> {
        self.last_quote.as_deref()
    }

    pub fn sample_size(&self) -> SampleSize {
        self.sample_size
    }

    /// Number of digits retained (may exceed the current window).
    pub fn retained(&self) -> usize {
        self.digits.len()
    }

    fn push(&mut self, quote: &Quote) -> u8 {
        let digit = last_digit(&quote.raw);
        if self.digits.len() == MAX_RETAINED {
            self.digits.pop_front();
        }
        self.digits.push_back(digit);
        self.streak.push(digit);
        self.last_digit = Some(digit);
        self.last_quote = Some(quote.raw.clone());
        digit
    }

    fn recompute(&mut self) {
        let skip = self.digits.len().saturating_sub(self.sample_size.get());
        self.histogram = Histogram::from_digits(self.digits.iter().skip(skip));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
