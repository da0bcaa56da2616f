//! Strategy layer: trigger evaluation, stake sizing, session risk.
//!
//! Everything here is synchronous and free of shared state; the engine
//! feeds it snapshots and applies the results through the bot registry.

pub mod risk;
pub mod stake;
pub mod trigger;

pub use risk::{Breach, RiskGuard};
pub use stake::{StakeConfig, StakePolicy};
pub use trigger::{TriggerDecision, TriggerScheduler, DEFAULT_TRIGGER_THRESHOLD};
