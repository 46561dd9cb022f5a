//! TTL cache for results of cacheable tools.

use rago_core::tool::ToolOutput;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// SHA-256 over the tool name and its canonical arguments.
///
/// `serde_json::Map` is ordered by key, so serializing the value yields
/// a canonical form.
pub fn cache_key(tool: &str, args: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tool.as_bytes());
    hasher.update([0u8]);
    hasher.update(args.to_string().as_bytes());
    let digest = hasher.finalize();
    digest.iter().fold(String::with_capacity(64), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

pub struct ResultCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, ToolOutput)>>,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<ToolOutput> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        match entries.get(key) {
            Some((stored, output)) if stored.elapsed() < self.ttl => Some(output.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: String, output: ToolOutput) {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.retain(|_, (stored, _)| stored.elapsed() < self.ttl);
        entries.insert(key, (Instant::now(), output));
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_ignores_argument_order() {
        let a = cache_key("mcp_web_fetch", &json!({"url": "x", "depth": 1}));
        let b = cache_key("mcp_web_fetch", &json!({"depth": 1, "url": "x"}));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, cache_key("mcp_web_other", &json!({"url": "x", "depth": 1})));
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire() {
        let cache = ResultCache::new(Duration::from_secs(60));
        cache.put("k".into(), ToolOutput::text("v"));
        assert_eq!(cache.get("k").unwrap().text, "v");

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get("k").is_none());
    }
}
