//! Summary, insight listing, and report commands

use std::path::Path;

use anyhow::{Context, Result};
use tally_core::{CostEngine, InsightFilter};

pub fn cmd_summary(engine: &CostEngine) -> Result<()> {
    let summary = engine.get_summary()?;

    println!();
    println!("📊 Cost Summary");
    println!("   ─────────────────────────────────────────────");

    if summary.record_count == 0 {
        println!("   No cost records yet.");
        println!("   Run 'tally sync' or 'tally import --file costs.csv' to get started.");
        println!();
        return Ok(());
    }

    println!(
        "   Total spend: {} {} ({} records, {} services)",
        summary.total_spend, summary.currency, summary.record_count, summary.service_count
    );
    if let (Some(start), Some(end)) = (summary.first_period_start, summary.last_period_end) {
        println!("   Coverage: {} to {}", start, end);
    }

    if !summary.top_services.is_empty() {
        println!();
        println!("   Top services:");
        for spend in &summary.top_services {
            println!(
                "     {:<28} {:>12}  ({:.1}%)",
                spend.service, spend.total, spend.share_pct
            );
        }
    }

    if !summary.regions.is_empty() {
        println!();
        println!("   Regions:");
        for region in &summary.regions {
            println!("     {:<28} {:>12}", region.region, region.total);
        }
    }

    println!();
    println!(
        "   💡 Insights: {} (potential savings ${}/month)",
        summary.total_insights, summary.total_potential_savings
    );
    println!();

    Ok(())
}

pub fn cmd_insights(
    engine: &CostEngine,
    category: Option<&str>,
    priority: Option<&str>,
    limit: Option<usize>,
) -> Result<()> {
    let filter = InsightFilter {
        category: category
            .map(|s| s.parse().map_err(|e: String| anyhow::anyhow!(e)))
            .transpose()?,
        priority: priority
            .map(|s| s.parse().map_err(|e: String| anyhow::anyhow!(e)))
            .transpose()?,
        service: None,
    };

    let insights = engine.list_insights(&filter, limit)?;

    println!();
    println!("💡 Optimization Insights ({})", insights.len());
    println!("   ─────────────────────────────────────────────");

    if insights.is_empty() {
        println!("   Nothing to show. Run 'tally sync' to analyze current spend.");
        println!();
        return Ok(());
    }

    for (i, insight) in insights.iter().enumerate() {
        println!();
        println!(
            "   {}. [{}] {}",
            i + 1,
            insight.priority.as_str().to_uppercase(),
            insight.title
        );
        println!(
            "      Service: {} | Category: {}",
            insight.service,
            insight.category.label()
        );
        println!(
            "      Potential savings: ${}/month",
            insight.potential_savings
        );
        println!("      {}", insight.description);
        println!("      → {}", insight.recommendation);
    }

    println!();
    Ok(())
}

pub async fn cmd_report(engine: &CostEngine, output: Option<&Path>) -> Result<()> {
    let mut report = engine.generate_report()?;

    // A reachable model gets to add a short narrative; its absence never
    // blocks the deterministic report
    if engine.ai_healthy().await {
        match engine.report_narrative().await {
            Ok(narrative) => {
                report.push_str("\n## Narrative\n\n");
                report.push_str(narrative.trim());
                report.push('\n');
            }
            Err(e) => {
                tracing::warn!(error = %e, "Report narrative unavailable");
            }
        }
    }

    match output {
        Some(path) => {
            std::fs::write(path, &report)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            println!("📄 Report written to {}", path.display());
        }
        None => {
            println!("{}", report);
        }
    }

    Ok(())
}
