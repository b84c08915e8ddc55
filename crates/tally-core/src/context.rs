//! Context assembly for the ask flow
//!
//! Merges the account summary, retrieved record candidates, current insights
//! and conversation history into a bounded block of prompt text. Insights
//! always ride along; the character budget truncates retrieved records
//! lowest-score-first and history oldest-first.

use chrono::{DateTime, Utc};

use crate::index::SearchHit;
use crate::insights::{Insight, Priority};
use crate::models::{ChatMessage, CostSummary, ServiceForecast};

/// A retrieved record candidate that fit the budget
#[derive(Debug, Clone)]
pub struct ContextRecord {
    pub record_key: String,
    pub text: String,
    pub score: f64,
}

/// Everything the orchestrator hands to the prompt for one question
#[derive(Debug, Clone)]
pub struct AssembledContext {
    pub summary: String,
    pub records: Vec<ContextRecord>,
    pub insights: Vec<Insight>,
    /// Rendered `role: content` lines, oldest first
    pub history: Vec<String>,
    pub question: String,
}

impl AssembledContext {
    /// Record keys that made it into the context
    pub fn record_ids(&self) -> Vec<String> {
        self.records.iter().map(|r| r.record_key.clone()).collect()
    }

    /// Insight ids that made it into the context
    pub fn insight_ids(&self) -> Vec<String> {
        self.insights.iter().map(|i| i.id.clone()).collect()
    }

    /// Bullet list of retrieved records, or None when nothing fit
    pub fn records_block(&self) -> Option<String> {
        if self.records.is_empty() {
            return None;
        }
        Some(
            self.records
                .iter()
                .map(|r| record_line(&r.text, r.score))
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }

    /// Bullet list of insights, or None when there are none
    pub fn insights_block(&self) -> Option<String> {
        if self.insights.is_empty() {
            return None;
        }
        Some(
            self.insights
                .iter()
                .map(insight_line)
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }

    /// Conversation lines, or None for a fresh conversation
    pub fn history_block(&self) -> Option<String> {
        if self.history.is_empty() {
            return None;
        }
        Some(self.history.join("\n"))
    }
}

/// One-paragraph account rollup used as the fixed head of every context
pub fn render_summary(summary: &CostSummary) -> String {
    if summary.record_count == 0 {
        return format!(
            "No cost records ingested yet. Open optimization insights: {}.",
            summary.total_insights
        );
    }

    let mut lines = vec![format!(
        "Total spend: {} {} across {} records and {} services.",
        summary.total_spend, summary.currency, summary.record_count, summary.service_count
    )];

    if let (Some(start), Some(end)) = (summary.first_period_start, summary.last_period_end) {
        lines.push(format!("Coverage: {} to {}.", start, end));
    }

    if !summary.top_services.is_empty() {
        let top = summary
            .top_services
            .iter()
            .map(|s| format!("{} {} ({:.1}%)", s.service, s.total, s.share_pct))
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!("Top services by spend: {}.", top));
    }

    if !summary.regions.is_empty() {
        let regions = summary
            .regions
            .iter()
            .map(|r| format!("{} {}", r.region, r.total))
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!("Regions: {}.", regions));
    }

    lines.push(format!(
        "Open optimization insights: {} (potential savings {}/month).",
        summary.total_insights, summary.total_potential_savings
    ));

    lines.join("\n")
}

/// Assemble a bounded context for one question
///
/// `record_hits` must be sorted by score descending (the index returns them
/// that way); the cumulative budget then drops the lowest-scored candidates
/// first. History is walked newest-to-oldest so old turns fall off first.
pub fn assemble(
    summary: String,
    record_hits: &[SearchHit],
    insights: Vec<Insight>,
    history: &[ChatMessage],
    question: &str,
    budget_chars: usize,
) -> AssembledContext {
    let mut used = summary.len() + question.len();
    for insight in &insights {
        used += insight_line(insight).len();
    }

    let mut records = Vec::new();
    for hit in record_hits {
        let line = record_line(&hit.text, hit.score);
        if used + line.len() > budget_chars {
            break;
        }
        used += line.len();
        records.push(ContextRecord {
            record_key: hit.entity_id.clone(),
            text: hit.text.clone(),
            score: hit.score,
        });
    }

    let mut kept = Vec::new();
    for message in history.iter().rev() {
        let line = format!("{}: {}", message.role, message.content);
        if used + line.len() > budget_chars {
            break;
        }
        used += line.len();
        kept.push(line);
    }
    kept.reverse();

    AssembledContext {
        summary,
        records,
        insights,
        history: kept,
        question: question.to_string(),
    }
}

/// Bullet list form of an insight set, shared by the report narrative prompt
pub fn insight_bullets(insights: &[Insight]) -> String {
    insights
        .iter()
        .map(insight_line)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Deterministic markdown rollup behind `generate_report`.
///
/// Insights arrive in stored rank order and are grouped by priority;
/// forecasts are matched to the summary's top services by name. Fixed
/// data and a fixed timestamp render to an identical document every time.
pub fn render_report(
    summary: &CostSummary,
    insights: &[Insight],
    forecasts: &[ServiceForecast],
    generated_at: DateTime<Utc>,
) -> String {
    let mut report = String::new();
    report.push_str("# Cloud Cost Optimization Report\n\n");
    report.push_str(&format!(
        "Generated: {}\n\n",
        generated_at.format("%Y-%m-%d %H:%M UTC")
    ));

    report.push_str("## Summary\n\n");
    report.push_str(&format!(
        "- Total Spend: {} {}\n",
        summary.total_spend, summary.currency
    ));
    report.push_str(&format!("- Services: {}\n", summary.service_count));
    if let (Some(start), Some(end)) = (summary.first_period_start, summary.last_period_end) {
        report.push_str(&format!("- Coverage: {} to {}\n", start, end));
    }
    report.push_str(&format!("- Total Insights: {}\n", insights.len()));
    report.push_str(&format!(
        "- Total Potential Savings: ${}/month\n",
        summary.total_potential_savings
    ));

    if !summary.top_services.is_empty() {
        report.push_str("\n## Spend Forecast\n\n");
        for spend in &summary.top_services {
            match forecasts.iter().find(|f| f.service == spend.service) {
                Some(forecast) => report.push_str(&format!(
                    "- {}: ${} projected over the next {} periods\n",
                    forecast.service,
                    forecast.projected_total,
                    forecast.points.len()
                )),
                None => {
                    report.push_str(&format!("- {}: no forecast available\n", spend.service));
                }
            }
        }
    }

    if insights.is_empty() {
        report.push_str("\nNo optimization insights. Run a sync to analyze current spend.\n");
        return report;
    }

    for priority in [Priority::High, Priority::Medium, Priority::Low] {
        let matching: Vec<&Insight> = insights
            .iter()
            .filter(|i| i.priority == priority)
            .collect();
        if matching.is_empty() {
            continue;
        }

        report.push_str(&format!("\n## {} Priority Actions\n", priority_heading(priority)));
        for insight in matching {
            report.push_str(&format!("\n### {}\n\n", insight.title));
            report.push_str(&format!("- **Service**: {}\n", insight.service));
            report.push_str(&format!("- **Category**: {}\n", insight.category.label()));
            report.push_str(&format!("- **Description**: {}\n", insight.description));
            report.push_str(&format!(
                "- **Potential Savings**: ${}/month\n",
                insight.potential_savings
            ));
            report.push_str(&format!(
                "- **Recommendation**: {}\n",
                insight.recommendation
            ));
        }
    }

    report
}

fn priority_heading(priority: Priority) -> &'static str {
    match priority {
        Priority::High => "High",
        Priority::Medium => "Medium",
        Priority::Low => "Low",
    }
}

fn record_line(text: &str, score: f64) -> String {
    format!("- {} (relevance {:.2})", text, score)
}

fn insight_line(insight: &Insight) -> String {
    format!(
        "- [{}] {}: {} (est. monthly savings {})",
        insight.priority, insight.title, insight.description, insight.potential_savings
    )
}
