//! Insight generation: rule-driven, ranked, deduplicated recommendations
//!
//! The generator runs a registry of independent rules over one analytics
//! pass (trend signals, anomaly events, and the record snapshot) and emits
//! `Insight` objects with estimated savings. Insight identity is a stable
//! hash, so regenerating from unchanged data replaces rather than duplicates.

mod generator;
mod rules;
mod types;

pub use generator::InsightGenerator;
pub use rules::{AnomalyRule, ConcentrationRule, InsightRule, RuleInput, SpreadRule, TrendRule};
pub use types::{Insight, InsightCategory, InsightFilter, Priority, SignalRef};
