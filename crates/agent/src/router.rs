//! Semantic intent router.
//!
//! Intents are described by example utterances. Before the first round the
//! goal is embedded and compared with every example; the best intent above
//! the threshold may add to the system preamble and narrow the tool
//! catalog. The LLM is always consulted.

use rago_config::{IntentConfig, RouterConfig};
use rago_core::error::LlmError;
use rago_core::llm::Embedder;
use rago_memory::cosine_similarity;
use std::sync::Arc;
use tracing::{debug, warn};

pub const DEFAULT_THRESHOLD: f32 = 0.75;

struct Intent {
    name: String,
    preamble: Option<String>,
    tools: Vec<String>,
    examples: Vec<Vec<f32>>,
}

/// The intent chosen for a goal.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteMatch {
    pub intent: String,
    pub score: f32,
    pub preamble: Option<String>,
    /// Whitelist patterns; empty keeps the profile's catalog
    pub tools: Vec<String>,
}

pub struct SemanticRouter {
    embedder: Arc<dyn Embedder>,
    intents: Vec<Intent>,
    threshold: f32,
}

impl SemanticRouter {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            intents: Vec::new(),
            threshold: DEFAULT_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Build a router with every configured intent registered.
    pub async fn from_config(config: &RouterConfig, embedder: Arc<dyn Embedder>) -> Result<Self, LlmError> {
        let mut router = Self::new(embedder).with_threshold(config.threshold);
        for intent in &config.intents {
            router.register(intent).await?;
        }
        Ok(router)
    }

    /// Embed `intent`'s examples and add it.
    pub async fn register(&mut self, intent: &IntentConfig) -> Result<(), LlmError> {
        let mut examples = Vec::with_capacity(intent.examples.len());
        for example in &intent.examples {
            examples.push(self.embedder.embed(example).await?);
        }
        debug!(intent = %intent.name, examples = examples.len(), "Registered intent");
        self.intents.push(Intent {
            name: intent.name.clone(),
            preamble: intent.preamble.clone(),
            tools: intent.tools.clone(),
            examples,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.intents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }

    /// The best intent whose closest example scores at least the threshold.
    pub async fn route(&self, goal: &str) -> Option<RouteMatch> {
        if self.intents.is_empty() {
            return None;
        }
        let query = match self.embedder.embed(goal).await {
            Ok(query) => query,
            Err(e) => {
                warn!("Router embedding failed, skipping: {e}");
                return None;
            }
        };

        let (intent, score) = self
            .intents
            .iter()
            .map(|intent| {
                let best = intent
                    .examples
                    .iter()
                    .map(|example| cosine_similarity(&query, example))
                    .fold(f32::MIN, f32::max);
                (intent, best)
            })
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))?;

        if score < self.threshold {
            debug!(intent = %intent.name, score, "No intent above threshold");
            return None;
        }
        debug!(intent = %intent.name, score, "Routed goal");
        Some(RouteMatch {
            intent: intent.name.clone(),
            score,
            preamble: intent.preamble.clone(),
            tools: intent.tools.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rago_core::testing::HashEmbedder;

    fn intent(name: &str, examples: &[&str], tools: &[&str]) -> IntentConfig {
        IntentConfig {
            name: name.into(),
            examples: examples.iter().map(|s| s.to_string()).collect(),
            preamble: Some(format!("Focus on {name}.")),
            tools: tools.iter().map(|s| s.to_string()).collect(),
        }
    }

    async fn router() -> SemanticRouter {
        let config = RouterConfig {
            enabled: true,
            threshold: DEFAULT_THRESHOLD,
            intents: vec![
                intent("time", &["what time is it", "current time please"], &["mcp_clock_*"]),
                intent("files", &["list the files in the folder"], &["mcp_filesystem_*"]),
            ],
        };
        SemanticRouter::from_config(&config, Arc::new(HashEmbedder::default()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn close_goal_matches_intent() {
        let router = router().await;
        let matched = router.route("what time is it").await.unwrap();
        assert_eq!(matched.intent, "time");
        assert!(matched.score > 0.99);
        assert_eq!(matched.tools, ["mcp_clock_*"]);
        assert_eq!(matched.preamble.as_deref(), Some("Focus on time."));
    }

    #[tokio::test]
    async fn unrelated_goal_falls_below_threshold() {
        let router = router().await;
        assert!(router.route("bake sourdough bread").await.is_none());
    }

    #[tokio::test]
    async fn empty_router_never_matches() {
        let router = SemanticRouter::new(Arc::new(HashEmbedder::default()));
        assert!(router.is_empty());
        assert!(router.route("anything").await.is_none());
    }
}
