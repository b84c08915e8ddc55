//! Query orchestrator: retrieval, context assembly, generation
//!
//! Drives one question through a fixed state machine:
//!
//! ```text
//! Received -> Retrieving -> ContextAssembled -> AwaitingGeneration
//!                                                 -> Completed | Failed
//! ```
//!
//! An unreachable index degrades retrieval to an insight-only context. A
//! failed or timed-out generation is retried once with a shortened context,
//! then answered deterministically from the retrieved data. A question never
//! hangs and never surfaces a raw error to the caller.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::ai::{AIBackend, AIClient};
use crate::analytics;
use crate::config::{EngineConfig, QueryConfig};
use crate::context::{assemble, render_summary, AssembledContext};
use crate::db::Database;
use crate::error::{Error, Result};
use crate::index::{EntryKind, SearchHit, SemanticIndex};
use crate::insights::Insight;
use crate::models::{ChatRole, CostSummary};
use crate::prompts::{PromptId, PromptLibrary};

/// Phases of one query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Received,
    Retrieving,
    ContextAssembled,
    AwaitingGeneration,
    Completed,
    Failed,
}

/// Ids of the records and insights that backed an answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportingData {
    pub records: Vec<String>,
    pub insights: Vec<String>,
}

/// Answer to one question
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskResponse {
    pub response_text: String,
    pub supporting_data: SupportingData,
    /// True when the language model could not be used and the answer was
    /// assembled deterministically from retrieved data
    pub degraded: bool,
}

/// Orchestrates one question against the index, storage and language model
pub struct QueryOrchestrator {
    db: Database,
    index: Arc<SemanticIndex>,
    ai: AIClient,
    prompts: Arc<RwLock<PromptLibrary>>,
    config: QueryConfig,
    reporting_currency: String,
}

impl QueryOrchestrator {
    pub fn new(
        db: Database,
        index: Arc<SemanticIndex>,
        ai: AIClient,
        prompts: Arc<RwLock<PromptLibrary>>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            db,
            index,
            ai,
            prompts,
            config: config.query.clone(),
            reporting_currency: config.ingestion.reporting_currency.clone(),
        }
    }

    /// Answer a question and persist the conversation turn
    pub async fn ask(&self, question: &str, conversation_id: &str) -> Result<AskResponse> {
        let mut state = QueryState::Received;
        debug!(conversation_id, "Query received");

        state = advance(state, QueryState::Retrieving);
        let hits = match self.retrieve(question).await {
            Ok(hits) => hits,
            Err(Error::IndexUnavailable(reason)) => {
                warn!(%reason, "Semantic index unavailable, using insight-only context");
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let summary = self.current_summary()?;
        let summary_text = render_summary(&summary);
        let history = self
            .db
            .recent_chat_messages(conversation_id, self.config.history_turns)?;
        let insights = self.merge_insights(&hits)?;
        let record_hits: Vec<SearchHit> = hits
            .into_iter()
            .filter(|h| h.kind == EntryKind::Record)
            .collect();

        state = advance(state, QueryState::ContextAssembled);
        let full = assemble(
            summary_text.clone(),
            &record_hits,
            insights.clone(),
            &history,
            question,
            self.config.context_budget_chars,
        );
        debug!(
            records = full.records.len(),
            insights = full.insights.len(),
            history = full.history.len(),
            "Context assembled"
        );

        state = advance(state, QueryState::AwaitingGeneration);
        let prompt = self.render_prompt(&full)?;

        let (answer, supporting_data, degraded) = match self.generate_with_timeout(&prompt).await {
            Ok(text) => {
                advance(state, QueryState::Completed);
                let supporting = SupportingData {
                    records: full.record_ids(),
                    insights: full.insight_ids(),
                };
                (text, supporting, false)
            }
            Err(first_err) => {
                warn!(error = %first_err, "Generation failed, retrying with shortened context");
                let short = assemble(
                    summary_text,
                    &record_hits,
                    insights,
                    &history,
                    question,
                    self.config.context_budget_chars / 2,
                );
                let short_prompt = self.render_prompt(&short)?;
                match self.generate_with_timeout(&short_prompt).await {
                    Ok(text) => {
                        advance(state, QueryState::Completed);
                        let supporting = SupportingData {
                            records: short.record_ids(),
                            insights: short.insight_ids(),
                        };
                        (text, supporting, false)
                    }
                    Err(second_err) => {
                        warn!(error = %second_err, "Generation failed twice, answering from retrieved data");
                        advance(state, QueryState::Failed);
                        let (text, supporting) = self.degraded_answer(&summary, &short, question);
                        (text, supporting, true)
                    }
                }
            }
        };

        self.db
            .append_chat_message(conversation_id, ChatRole::User, question)?;
        self.db
            .append_chat_message(conversation_id, ChatRole::Assistant, &answer)?;

        Ok(AskResponse {
            response_text: answer,
            supporting_data,
            degraded,
        })
    }

    /// Nearest neighbors for a question, or `IndexUnavailable`
    async fn retrieve(&self, question: &str) -> Result<Vec<SearchHit>> {
        let snapshot = self.index.snapshot();
        if snapshot.is_empty() {
            debug!("Semantic index empty");
            return Ok(Vec::new());
        }

        let embedding = self
            .ai
            .embed(question)
            .await
            .map_err(|e| Error::IndexUnavailable(format!("question embedding failed: {}", e)))?;

        Ok(snapshot.search(&embedding, self.config.retrieval_k))
    }

    /// Top-ranked insights plus any retrieved ones not already present
    fn merge_insights(&self, hits: &[SearchHit]) -> Result<Vec<Insight>> {
        let mut insights = self.db.top_insights(self.config.top_insights)?;

        for hit in hits.iter().filter(|h| h.kind == EntryKind::Insight) {
            if insights.iter().any(|i| i.id == hit.entity_id) {
                continue;
            }
            if let Some(insight) = self.db.get_insight(&hit.entity_id)? {
                insights.push(insight);
            }
        }

        Ok(insights)
    }

    fn current_summary(&self) -> Result<CostSummary> {
        let records = self.db.list_records()?;
        let total_insights = self.db.count_insights()? as usize;
        let total_savings = self.db.total_potential_savings()?;
        Ok(analytics::summarize(
            &records,
            total_insights,
            total_savings,
            &self.reporting_currency,
            self.config.top_insights,
        ))
    }

    fn render_prompt(&self, context: &AssembledContext) -> Result<String> {
        let mut prompts = self
            .prompts
            .write()
            .map_err(|_| Error::InvalidData("Failed to acquire prompt library lock".into()))?;
        let template = prompts.get(PromptId::Ask)?;

        let records_block = context.records_block();
        let insights_block = context.insights_block();
        let history_block = context.history_block();

        let mut vars: HashMap<&str, &str> = HashMap::new();
        vars.insert("summary", context.summary.as_str());
        vars.insert("question", context.question.as_str());
        if let Some(ref block) = records_block {
            vars.insert("records", block);
        }
        if let Some(ref block) = insights_block {
            vars.insert("insights", block);
        }
        if let Some(ref block) = history_block {
            vars.insert("history", block);
        }

        Ok(template.render(&vars))
    }

    /// Single awaited language-model call with an explicit timeout.
    ///
    /// No lock is held across this await; cancellation leaves the index and
    /// storage untouched.
    async fn generate_with_timeout(&self, prompt: &str) -> Result<String> {
        let timeout = self.config.generation_timeout;
        match tokio::time::timeout(timeout, self.ai.generate(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Generation(format!(
                "generation timed out after {}s",
                timeout.as_secs()
            ))),
        }
    }

    /// Deterministic answer used when generation failed twice.
    ///
    /// A highest-cost-services question with no insights in context is
    /// answered from raw spend; everything else gets the summary plus the
    /// insight list that was assembled for the prompt.
    fn degraded_answer(
        &self,
        summary: &CostSummary,
        context: &AssembledContext,
        question: &str,
    ) -> (String, SupportingData) {
        if context.insights.is_empty() && is_top_cost_question(question) {
            let mut lines = vec![
                "The language model is unavailable; answering from recorded spend.".to_string(),
                String::new(),
                "Highest-cost services:".to_string(),
            ];
            for (i, s) in summary.top_services.iter().enumerate() {
                lines.push(format!(
                    "{}. {}: {} {} ({:.1}% of total)",
                    i + 1,
                    s.service,
                    s.total,
                    summary.currency,
                    s.share_pct
                ));
            }
            return (
                lines.join("\n"),
                SupportingData {
                    records: Vec::new(),
                    insights: Vec::new(),
                },
            );
        }

        let mut text = format!(
            "The language model is unavailable; answering from the data at hand.\n\n{}",
            context.summary
        );
        if let Some(block) = context.insights_block() {
            text.push_str("\n\nCurrent optimization insights:\n");
            text.push_str(&block);
        }

        (
            text,
            SupportingData {
                records: context.record_ids(),
                insights: context.insight_ids(),
            },
        )
    }
}

fn advance(from: QueryState, to: QueryState) -> QueryState {
    debug!(?from, ?to, "Query state transition");
    to
}

fn is_top_cost_question(question: &str) -> bool {
    let superlative =
        Regex::new(r"(?i)\b(highest|top|biggest|largest|most expensive)\b").expect("valid regex");
    let subject = Regex::new(r"(?i)\b(cost|costs|spend|spending|service|services)\b")
        .expect("valid regex");
    superlative.is_match(question) && subject.is_match(question)
}
