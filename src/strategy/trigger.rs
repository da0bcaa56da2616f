//! Trigger scheduler.
//!
//! Run once per histogram update. Every `Running` bot is evaluated on its
//! own: an Over bot looks at the share of the window above its prediction,
//! an Under bot at the share below. At or above the threshold the bot fires.

use serde::Serialize;
use tracing::debug;

use crate::stats::probability::ProbabilityEngine;
use crate::stats::Histogram;
use crate::types::{Bot, BotKind, BotStatus};

/// Minimum probability (percent) for a bot to fire.
pub const DEFAULT_TRIGGER_THRESHOLD: f64 = 65.0;

/// A bot selected to trade on this update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggerDecision {
    pub bot_id: String,
    pub kind: BotKind,
    pub prediction: u8,
    pub probability: f64,
}

#[derive(Debug, Clone)]
pub struct TriggerScheduler {
    probabilities: ProbabilityEngine,
    threshold: f64,
}

impl TriggerScheduler {
    pub fn new(probabilities: ProbabilityEngine, threshold: f64) -> Self {
        Self {
            probabilities,
            threshold,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn probabilities(&self) -> &ProbabilityEngine {
        &self.probabilities
    }

    /// Probability relevant to this bot's direction and barrier.
    pub fn probability_for(&self, hist: &Histogram, bot: &Bot) -> f64 {
        let ou = self.probabilities.over_under(hist, bot.prediction);
        match bot.kind {
            BotKind::Over => ou.over,
            BotKind::Under => ou.under,
        }
    }

    /// Bots that should fire on this histogram. Idle and Waiting bots never fire.
    pub fn evaluate(&self, hist: &Histogram, bots: &[Bot]) -> Vec<TriggerDecision> {
        bots.iter()
            .filter(|bot| bot.status == BotStatus::Running)
            .filter_map(|bot| {
                let probability = self.probability_for(hist, bot);
                if probability >= self.threshold {
                    debug!(
                        bot_id = %bot.id,
                        probability = format!("{probability:.1}%"),
                        "Trigger fired"
                    );
                    Some(TriggerDecision {
                        bot_id: bot.id.clone(),
                        kind: bot.kind,
                        prediction: bot.prediction,
                        probability,
                    })
                } else {
                    None
                }
            })
            .collect()
    }
}

impl Default for TriggerScheduler {
    fn default() -> Self {
        Self::new(ProbabilityEngine::default(), DEFAULT_TRIGGER_THRESHOLD)
    }
}
