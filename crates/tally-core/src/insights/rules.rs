//! Built-in insight rules
//!
//! Each rule inspects one slice of the analytics output and emits zero or
//! more insights. Rules are independent: a failing rule is logged and
//! absorbed by the generator, never aborting the run.

use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::config::InsightConfig;
use crate::error::Result;
use crate::models::{AnomalyEvent, CostRecord, Severity, TrendDirection, TrendSignal};

use super::types::{Insight, InsightCategory, SignalRef};

/// Days in the billing period savings estimates are stated against
const FULL_BILLING_PERIOD_DAYS: i64 = 30;

/// Service-name markers that classify a service as storage-like
const STORAGE_MARKERS: &[&str] = &[
    "s3", "storage", "glacier", "ebs", "efs", "backup", "snapshot", "archive", "blob",
];

/// Analytics output handed to each rule
pub struct RuleInput<'a> {
    pub trends: &'a [TrendSignal],
    pub anomalies: &'a [AnomalyEvent],
    pub records: &'a [CostRecord],
}

/// One independently testable insight rule
pub trait InsightRule: Send + Sync {
    /// Rule name used in logs when evaluation fails
    fn name(&self) -> &'static str;

    fn evaluate(&self, input: &RuleInput<'_>, config: &InsightConfig) -> Result<Vec<Insight>>;
}

/// Anomalous observations of at least medium severity become cleanup or
/// optimization insights, with savings stated as the monthly run-rate excess.
pub struct AnomalyRule;

impl InsightRule for AnomalyRule {
    fn name(&self) -> &'static str {
        "anomaly"
    }

    fn evaluate(&self, input: &RuleInput<'_>, config: &InsightConfig) -> Result<Vec<Insight>> {
        let mut insights = Vec::new();

        for event in input.anomalies {
            if event.severity.rank() < Severity::Medium.rank() {
                continue;
            }

            let excess = (event.observed_amount - event.expected_amount).max(Decimal::ZERO);
            let savings = extrapolate_to_billing_period(excess, event.period_days);

            let (category, recommendation) = if is_storage_service(&event.service) {
                (
                    InsightCategory::ResourceCleanup,
                    "Audit stored objects and lifecycle policies; remove or archive data that is no longer needed.",
                )
            } else {
                (
                    InsightCategory::CostOptimization,
                    "Review recent usage changes and reverse any unintended scale-up.",
                )
            };

            let movement = if event.deviation_score >= 0.0 {
                "above"
            } else {
                "below"
            };
            insights.push(Insight::new(
                category,
                event.service.clone(),
                format!("Unusual spend on {}", event.service),
                format!(
                    "Spend of ${} for the period starting {} ran well {} the expected ${}",
                    event.observed_amount, event.observed_at, movement, event.expected_amount
                ),
                recommendation,
                savings,
                SignalRef::Anomaly {
                    service: event.service.clone(),
                    observed_at: event.observed_at,
                    deviation_score: event.deviation_score,
                },
                config,
            ));
        }

        Ok(insights)
    }
}

/// Sustained window-over-window growth becomes a right-sizing insight.
pub struct TrendRule;

impl InsightRule for TrendRule {
    fn name(&self) -> &'static str {
        "trend"
    }

    fn evaluate(&self, input: &RuleInput<'_>, config: &InsightConfig) -> Result<Vec<Insight>> {
        let mut insights = Vec::new();

        for signal in input.trends {
            if signal.direction != TrendDirection::Increasing
                || signal.delta_pct < config.trend_pct_threshold
            {
                continue;
            }

            let savings = (signal.delta_amount * config.right_sizing_fraction).round_dp(2);
            insights.push(Insight::new(
                InsightCategory::RightSizing,
                signal.service.clone(),
                format!("Rising spend on {}", signal.service),
                format!(
                    "Spend grew {:.1}% window over window, a ${} increase for the window starting {}",
                    signal.delta_pct, signal.delta_amount, signal.window_start
                ),
                "Right-size over-provisioned resources or add scaling limits before the growth compounds.",
                savings,
                SignalRef::Trend {
                    service: signal.service.clone(),
                    window_start: signal.window_start,
                    delta_pct: signal.delta_pct,
                },
                config,
            ));
        }

        Ok(insights)
    }
}

/// The single largest service by total spend is always worth a commitment
/// review.
pub struct ConcentrationRule;

impl InsightRule for ConcentrationRule {
    fn name(&self) -> &'static str {
        "concentration"
    }

    fn evaluate(&self, input: &RuleInput<'_>, config: &InsightConfig) -> Result<Vec<Insight>> {
        let totals = service_totals(input.records);
        let grand_total: Decimal = totals.values().sum();
        if grand_total <= Decimal::ZERO {
            return Ok(Vec::new());
        }

        // Ties resolve to the lexicographically first service
        let (service, total) = match totals.iter().max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0))) {
            Some((service, total)) => (service.clone(), *total),
            None => return Ok(Vec::new()),
        };

        let share_pct = (total / grand_total).to_f64().unwrap_or(0.0) * 100.0;
        let savings = (total * config.concentration_fraction).round_dp(2);

        Ok(vec![Insight::new(
            InsightCategory::CostOptimization,
            service.clone(),
            format!("{} dominates spend", service),
            format!(
                "{} accounts for {:.1}% of total spend (${})",
                service,
                share_pct,
                total.round_dp(2)
            ),
            format!(
                "Review {} usage and consider reserved instances or savings plans.",
                service
            ),
            savings,
            SignalRef::Concentration { service, share_pct },
            config,
        )])
    }
}

/// A service spread across many regions suggests consolidation savings.
pub struct SpreadRule;

impl InsightRule for SpreadRule {
    fn name(&self) -> &'static str {
        "spread"
    }

    fn evaluate(&self, input: &RuleInput<'_>, config: &InsightConfig) -> Result<Vec<Insight>> {
        let mut regions: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for record in input.records {
            if let Some(region) = record.region() {
                regions.entry(&record.service).or_default().insert(region);
            }
        }

        let totals = service_totals(input.records);
        let mut insights = Vec::new();

        for (service, service_regions) in regions {
            if service_regions.len() <= config.spread_region_threshold {
                continue;
            }

            let total = totals.get(service).copied().unwrap_or(Decimal::ZERO);
            let savings = (total * config.spread_fraction).round_dp(2);

            insights.push(Insight::new(
                InsightCategory::ArchitectureOptimization,
                service,
                format!("{} spans {} regions", service, service_regions.len()),
                format!(
                    "Multi-region deployment detected: {} runs in {} regions",
                    service,
                    service_regions.len()
                ),
                "Consolidate workloads into fewer regions to cut cross-region transfer and duplicate baseline costs.",
                savings,
                SignalRef::Spread {
                    service: service.to_string(),
                    regions: service_regions.len(),
                },
                config,
            ));
        }

        Ok(insights)
    }
}

/// Scale a per-period excess to the standard billing period
fn extrapolate_to_billing_period(excess: Decimal, period_days: i64) -> Decimal {
    if period_days > 0 && period_days < FULL_BILLING_PERIOD_DAYS {
        (excess * Decimal::from(FULL_BILLING_PERIOD_DAYS) / Decimal::from(period_days)).round_dp(2)
    } else {
        excess.round_dp(2)
    }
}

fn is_storage_service(service: &str) -> bool {
    let lower = service.to_lowercase();
    STORAGE_MARKERS.iter().any(|marker| lower.contains(marker))
}

fn service_totals(records: &[CostRecord]) -> BTreeMap<String, Decimal> {
    let mut totals: BTreeMap<String, Decimal> = BTreeMap::new();
    for record in records {
        *totals.entry(record.service.clone()).or_insert(Decimal::ZERO) += record.amount;
    }
    totals
}
