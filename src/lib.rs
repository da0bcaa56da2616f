//! DIGITBOT — Autonomous multi-strategy digit trading engine.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod stats;
pub mod strategy;
pub mod engine;
pub mod platforms;
pub mod dashboard;
