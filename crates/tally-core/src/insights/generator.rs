//! Insight generator: runs the rule registry over one analytics pass
//!
//! Rules run in registration order. A failing rule is logged and skipped so
//! one bad rule never suppresses the others. Duplicate ids keep the
//! last-written insight, and the final set is deterministically ordered.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::config::InsightConfig;
use crate::models::{AnomalyEvent, CostRecord, TrendSignal};

use super::rules::{AnomalyRule, ConcentrationRule, InsightRule, RuleInput, SpreadRule, TrendRule};
use super::types::Insight;

pub struct InsightGenerator {
    rules: Vec<Box<dyn InsightRule>>,
}

impl Default for InsightGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl InsightGenerator {
    /// Generator with the built-in rule set
    pub fn new() -> Self {
        let mut generator = Self { rules: Vec::new() };
        generator.register(Box::new(AnomalyRule));
        generator.register(Box::new(TrendRule));
        generator.register(Box::new(ConcentrationRule));
        generator.register(Box::new(SpreadRule));
        generator
    }

    pub fn register(&mut self, rule: Box<dyn InsightRule>) {
        self.rules.push(rule);
    }

    /// Produce the ranked, deduplicated insight set for one pass.
    ///
    /// Ordering: potential savings descending, then priority, then signal
    /// score, then id. Fixed inputs yield an identical sequence every run.
    pub fn generate(
        &self,
        trends: &[TrendSignal],
        anomalies: &[AnomalyEvent],
        records: &[CostRecord],
        config: &InsightConfig,
    ) -> Vec<Insight> {
        let input = RuleInput {
            trends,
            anomalies,
            records,
        };

        let mut by_id: BTreeMap<String, Insight> = BTreeMap::new();
        for rule in &self.rules {
            match rule.evaluate(&input, config) {
                Ok(insights) => {
                    debug!(
                        rule = rule.name(),
                        count = insights.len(),
                        "Insight rule complete"
                    );
                    for insight in insights {
                        // Last write wins: a later rule's estimate replaces
                        // an earlier one for the same id, never adds to it
                        by_id.insert(insight.id.clone(), insight);
                    }
                }
                Err(e) => {
                    warn!(rule = rule.name(), error = %e, "Insight rule failed");
                }
            }
        }

        let mut insights: Vec<Insight> = by_id.into_values().collect();
        insights.sort_by(|a, b| {
            b.potential_savings
                .cmp(&a.potential_savings)
                .then_with(|| b.priority.rank().cmp(&a.priority.rank()))
                .then_with(|| {
                    b.source_signal
                        .score()
                        .partial_cmp(&a.source_signal.score())
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.id.cmp(&b.id))
        });

        insights
    }
}
