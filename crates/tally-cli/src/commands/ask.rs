//! Natural-language question command

use anyhow::Result;
use tally_core::CostEngine;

/// Conversation id shared by all questions asked from this terminal.
/// Follow-ups in the same shell keep their history.
const CLI_CONVERSATION: &str = "cli";

pub async fn cmd_ask(engine: &CostEngine, question: &str) -> Result<()> {
    println!();
    println!("🤔 {}", question);
    println!();

    let response = engine.ask(question, CLI_CONVERSATION).await?;

    if response.degraded {
        println!("⚠️  Language model unavailable; answering from stored data only.");
        println!();
    }

    println!("{}", response.response_text.trim());
    println!();
    println!(
        "   (drawing on {} cost records and {} insights)",
        response.supporting_data.records.len(),
        response.supporting_data.insights.len()
    );
    println!();

    Ok(())
}
