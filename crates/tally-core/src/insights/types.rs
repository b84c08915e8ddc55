//! Insight types: categories, priorities, signal back-references

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::InsightConfig;

/// Category of an optimization insight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InsightCategory {
    CostOptimization,
    RightSizing,
    ResourceCleanup,
    ArchitectureOptimization,
}

impl InsightCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CostOptimization => "cost-optimization",
            Self::RightSizing => "right-sizing",
            Self::ResourceCleanup => "resource-cleanup",
            Self::ArchitectureOptimization => "architecture-optimization",
        }
    }

    /// Human-readable label for reports and CLI output
    pub fn label(&self) -> &'static str {
        match self {
            Self::CostOptimization => "Cost Optimization",
            Self::RightSizing => "Right-Sizing",
            Self::ResourceCleanup => "Resource Cleanup",
            Self::ArchitectureOptimization => "Architecture Optimization",
        }
    }
}

impl std::str::FromStr for InsightCategory {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cost-optimization" => Ok(Self::CostOptimization),
            "right-sizing" => Ok(Self::RightSizing),
            "resource-cleanup" => Ok(Self::ResourceCleanup),
            "architecture-optimization" => Ok(Self::ArchitectureOptimization),
            _ => Err(format!("Unknown insight category: {}", s)),
        }
    }
}

impl std::fmt::Display for InsightCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Priority of an insight, derived from its savings estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    /// Numeric rank for ordering (higher = more urgent)
    pub fn rank(&self) -> u8 {
        match self {
            Self::High => 3,
            Self::Medium => 2,
            Self::Low => 1,
        }
    }

    /// Classify a savings estimate against the configured breakpoints
    pub fn for_savings(savings: Decimal, config: &InsightConfig) -> Self {
        if savings >= config.savings_high {
            Self::High
        } else if savings >= config.savings_medium {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            _ => Err(format!("Unknown priority: {}", s)),
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Non-owning back-reference to the signal that justified an insight.
///
/// Carries just enough to locate the signal in a fresh analytics pass and a
/// magnitude used as the ordering tie-break.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalRef {
    Anomaly {
        service: String,
        observed_at: NaiveDate,
        deviation_score: f64,
    },
    Trend {
        service: String,
        window_start: NaiveDate,
        delta_pct: f64,
    },
    Concentration {
        service: String,
        share_pct: f64,
    },
    Spread {
        service: String,
        regions: usize,
    },
}

impl SignalRef {
    /// Signal magnitude used to break ordering ties between equal savings
    pub fn score(&self) -> f64 {
        match self {
            Self::Anomaly {
                deviation_score, ..
            } => deviation_score.abs(),
            Self::Trend { delta_pct, .. } => delta_pct.abs(),
            Self::Concentration { share_pct, .. } => *share_pct,
            Self::Spread { regions, .. } => *regions as f64,
        }
    }
}

/// A ranked, explainable optimization recommendation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    /// Stable hash of `(category, service, description)`; identical inputs
    /// produce identical ids across runs
    pub id: String,
    pub category: InsightCategory,
    pub service: String,
    pub title: String,
    pub description: String,
    pub recommendation: String,
    /// Estimated monthly savings, never negative
    pub potential_savings: Decimal,
    pub priority: Priority,
    pub source_signal: SignalRef,
}

impl Insight {
    /// Build an insight, deriving its id and priority
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        category: InsightCategory,
        service: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        recommendation: impl Into<String>,
        potential_savings: Decimal,
        source_signal: SignalRef,
        config: &InsightConfig,
    ) -> Self {
        let service = service.into();
        let description = description.into();
        let id = compute_id(category, &service, &description);
        Self {
            id,
            category,
            service,
            title: title.into(),
            description,
            recommendation: recommendation.into(),
            potential_savings,
            priority: Priority::for_savings(potential_savings, config),
            source_signal,
        }
    }

    /// Text form embedded into the semantic index
    pub fn embedding_text(&self) -> String {
        format!(
            "{} insight for {}: {} {} Potential savings ${}",
            self.category.label(),
            self.service,
            self.title,
            self.description,
            self.potential_savings
        )
    }
}

fn compute_id(category: InsightCategory, service: &str, description: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(category.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(service.as_bytes());
    hasher.update(b"|");
    hasher.update(description.as_bytes());
    hex::encode(hasher.finalize())
}

/// Optional filters for `list_insights`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InsightFilter {
    pub category: Option<InsightCategory>,
    pub priority: Option<Priority>,
    pub service: Option<String>,
}

impl InsightFilter {
    pub fn matches(&self, insight: &Insight) -> bool {
        if let Some(category) = self.category {
            if insight.category != category {
                return false;
            }
        }
        if let Some(priority) = self.priority {
            if insight.priority != priority {
                return false;
            }
        }
        if let Some(ref service) = self.service {
            if !insight.service.eq_ignore_ascii_case(service) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_insight(savings: Decimal) -> Insight {
        Insight::new(
            InsightCategory::CostOptimization,
            "AmazonEC2",
            "Unusual spend on AmazonEC2",
            "Spend ran outside the baseline",
            "Review recent usage changes",
            savings,
            SignalRef::Concentration {
                service: "AmazonEC2".to_string(),
                share_pct: 42.0,
            },
            &InsightConfig::default(),
        )
    }

    #[test]
    fn test_id_stable_across_runs() {
        let a = sample_insight(dec!(50));
        let b = sample_insight(dec!(50));
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn test_id_ignores_savings() {
        // Identity is (category, service, description); a revised savings
        // estimate replaces the insight rather than duplicating it
        let a = sample_insight(dec!(50));
        let b = sample_insight(dec!(500));
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn test_priority_breakpoints() {
        let config = InsightConfig::default();
        assert_eq!(Priority::for_savings(dec!(100), &config), Priority::High);
        assert_eq!(Priority::for_savings(dec!(99.99), &config), Priority::Medium);
        assert_eq!(Priority::for_savings(dec!(25), &config), Priority::Medium);
        assert_eq!(Priority::for_savings(dec!(24.99), &config), Priority::Low);
        assert_eq!(Priority::for_savings(Decimal::ZERO, &config), Priority::Low);
    }

    #[test]
    fn test_category_round_trip() {
        for s in [
            "cost-optimization",
            "right-sizing",
            "resource-cleanup",
            "architecture-optimization",
        ] {
            let c: InsightCategory = s.parse().unwrap();
            assert_eq!(c.as_str(), s);
        }
    }

    #[test]
    fn test_category_serde_kebab_case() {
        let json = serde_json::to_string(&InsightCategory::RightSizing).unwrap();
        assert_eq!(json, "\"right-sizing\"");
    }

    #[test]
    fn test_filter_matching() {
        let insight = sample_insight(dec!(120));

        let all = InsightFilter::default();
        assert!(all.matches(&insight));

        let by_category = InsightFilter {
            category: Some(InsightCategory::CostOptimization),
            ..Default::default()
        };
        assert!(by_category.matches(&insight));

        let wrong_priority = InsightFilter {
            priority: Some(Priority::Low),
            ..Default::default()
        };
        assert!(!wrong_priority.matches(&insight));

        let by_service = InsightFilter {
            service: Some("amazonec2".to_string()),
            ..Default::default()
        };
        assert!(by_service.matches(&insight));
    }

    #[test]
    fn test_signal_score_uses_magnitude() {
        let drop = SignalRef::Anomaly {
            service: "AmazonEC2".to_string(),
            observed_at: NaiveDate::from_ymd_opt(2024, 1, 8).unwrap(),
            deviation_score: -3.2,
        };
        assert!((drop.score() - 3.2).abs() < 1e-9);
    }
}
