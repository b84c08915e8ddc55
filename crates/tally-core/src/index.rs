//! Semantic index: cosine nearest-neighbor retrieval over records and insights
//!
//! The index is a derived cache. Every entry references exactly one live
//! CostRecord or Insight by id, and the whole structure is reconstructible by
//! re-embedding the stored entities. Readers clone an `Arc` snapshot; a pass
//! builds its replacement off to the side and swaps the pointer, so queries
//! observe either the old or the new index, never a partial one.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

/// What an index entry points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Record,
    Insight,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Record => "record",
            Self::Insight => "insight",
        }
    }
}

impl std::str::FromStr for EntryKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "record" => Ok(Self::Record),
            "insight" => Ok(Self::Insight),
            _ => Err(format!("Unknown index entry kind: {}", s)),
        }
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One embedded entity in the index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Record key or insight id this entry mirrors
    pub entity_id: String,
    pub kind: EntryKind,
    /// The text that was embedded, kept for context assembly
    pub text: String,
    pub embedding: Vec<f32>,
}

/// One retrieval result
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub entity_id: String,
    pub kind: EntryKind,
    pub text: String,
    pub score: f64,
}

/// An immutable view of the index at one point in time
#[derive(Debug, Default)]
pub struct IndexSnapshot {
    entries: Vec<IndexEntry>,
}

impl IndexSnapshot {
    pub fn new(entries: Vec<IndexEntry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Cosine nearest neighbors of `query`, best first, at most `k`
    pub fn search(&self, query: &[f32], k: usize) -> Vec<SearchHit> {
        let mut hits: Vec<SearchHit> = self
            .entries
            .iter()
            .map(|entry| SearchHit {
                entity_id: entry.entity_id.clone(),
                kind: entry.kind,
                text: entry.text.clone(),
                score: cosine_similarity(query, &entry.embedding),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
        hits
    }
}

/// Shared handle over the current snapshot
#[derive(Default)]
pub struct SemanticIndex {
    current: RwLock<Arc<IndexSnapshot>>,
}

impl SemanticIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clone the current snapshot pointer. Queries run against the clone, so
    /// a concurrent swap never changes results mid-search.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Atomically replace the current snapshot
    pub fn swap(&self, snapshot: IndexSnapshot) {
        let snapshot = Arc::new(snapshot);
        match self.current.write() {
            Ok(mut guard) => *guard = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
    }

    /// Insert or replace the entry for one entity (copy-on-write)
    pub fn upsert(&self, entry: IndexEntry) {
        let current = self.snapshot();
        let mut entries: Vec<IndexEntry> = current
            .entries
            .iter()
            .filter(|e| e.entity_id != entry.entity_id)
            .cloned()
            .collect();
        entries.push(entry);
        self.swap(IndexSnapshot::new(entries));
    }

    /// Drop the entry for one entity, if present (copy-on-write)
    pub fn remove(&self, entity_id: &str) {
        let current = self.snapshot();
        if !current.entries.iter().any(|e| e.entity_id == entity_id) {
            return;
        }
        let entries: Vec<IndexEntry> = current
            .entries
            .iter()
            .filter(|e| e.entity_id != entity_id)
            .cloned()
            .collect();
        self.swap(IndexSnapshot::new(entries));
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    pub fn search(&self, query: &[f32], k: usize) -> Vec<SearchHit> {
        self.snapshot().search(query, k)
    }
}

/// Cosine similarity with f64 accumulation.
///
/// Mismatched lengths and empty vectors score zero instead of failing; a
/// near-zero denominator also scores zero to avoid dividing by nothing.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }
    dot / denom
}
