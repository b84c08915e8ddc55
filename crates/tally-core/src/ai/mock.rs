//! Mock AI backend for testing
//!
//! Returns deterministic responses without any network calls. Generation can
//! be scripted with a reply queue to exercise retry and degraded-answer
//! paths; embeddings are derived from token hashes so texts sharing words
//! land near each other in the vector space.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

use super::AIBackend;

/// Dimension of mock embedding vectors
pub const MOCK_EMBEDDING_DIM: usize = 64;

/// Scripted reply for the mock backend
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Return this text
    Text(String),
    /// Fail with a generation error
    Failure(String),
    /// Sleep for the given duration, then return the text
    Slow(Duration, String),
}

/// Mock backend for testing
///
/// Replies are consumed front-to-front from the scripted queue; once the
/// queue is empty every call returns the default canned answer.
#[derive(Clone)]
pub struct MockBackend {
    /// Whether health_check reports the backend as available
    pub healthy: bool,
    replies: Arc<Mutex<VecDeque<MockReply>>>,
    canned: String,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// Create a healthy mock backend
    pub fn new() -> Self {
        Self {
            healthy: true,
            replies: Arc::new(Mutex::new(VecDeque::new())),
            canned: "Mock analysis: spending is stable across the reported services.".to_string(),
        }
    }

    /// Create a mock backend that reports as unhealthy
    pub fn unhealthy() -> Self {
        Self {
            healthy: false,
            ..Self::new()
        }
    }

    /// Set the default canned answer
    pub fn with_canned(mut self, canned: &str) -> Self {
        self.canned = canned.to_string();
        self
    }

    /// Queue a scripted reply
    pub fn push_reply(&self, reply: MockReply) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(reply);
        }
    }

    /// Queue a scripted text reply
    pub fn with_reply(self, text: &str) -> Self {
        self.push_reply(MockReply::Text(text.to_string()));
        self
    }

    /// Queue a scripted failure
    pub fn with_failure(self, message: &str) -> Self {
        self.push_reply(MockReply::Failure(message.to_string()));
        self
    }

    /// Mock has a single model, so this returns a copy of self
    pub fn with_model(&self, _model: &str) -> Self {
        self.clone()
    }

    /// Deterministic bag-of-tokens embedding
    ///
    /// Each token hashes to a bucket; texts sharing tokens share buckets and
    /// so have positive cosine similarity. Vectors are L2-normalized.
    pub fn deterministic_embedding(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; MOCK_EMBEDDING_DIM];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.as_bytes());
            let bucket = (usize::from(digest[0]) << 8 | usize::from(digest[1])) % MOCK_EMBEDDING_DIM;
            vector[bucket] += 1.0;
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl AIBackend for MockBackend {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        let next = {
            let mut replies = self
                .replies
                .lock()
                .map_err(|_| Error::InvalidData("Failed to acquire mock reply lock".into()))?;
            replies.pop_front()
        };

        match next {
            Some(MockReply::Text(text)) => Ok(text),
            Some(MockReply::Failure(message)) => Err(Error::Generation(message)),
            Some(MockReply::Slow(delay, text)) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            None => Ok(self.canned.clone()),
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(Self::deterministic_embedding(text))
    }

    async fn health_check(&self) -> bool {
        self.healthy
    }

    fn model(&self) -> &str {
        "mock"
    }

    fn host(&self) -> &str {
        "mock://localhost"
    }
}
