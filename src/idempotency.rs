use crate::models::AnalyzeResponse;
use redis::AsyncCommands;
use std::collections::{HashMap, VecDeque};

pub async fn redis_get(client: &redis::Client, key: &str) -> Option<AnalyzeResponse> {
    let mut conn = match client.get_multiplexed_async_connection().await {
        Ok(c) => c,
        Err(_) => return None,
    };
    let s: Option<String> = conn.get(key).await.ok();
    s.and_then(|v| serde_json::from_str(&v).ok())
}

pub async fn redis_set(
    client: &redis::Client,
    key: &str,
    value: &AnalyzeResponse,
    ttl_secs: usize,
) {
    if let Ok(mut conn) = client.get_multiplexed_async_connection().await
        && let Ok(json) = serde_json::to_string(value)
    {
        let _: Result<(), _> = conn.set_ex(key, json, ttl_secs as u64).await;
    }
}

/// In-process fallback when Redis is not configured. Bounded: the oldest
/// cached response is dropped once the cap is reached, so the map cannot
/// grow without limit on a long-lived process.
pub struct ReplayCache {
    entries: HashMap<String, AnalyzeResponse>,
    order: VecDeque<String>,
    cap: usize,
}

impl ReplayCache {
    pub fn from_env() -> Self {
        let cap = std::env::var("IDEMPOTENCY_CACHE_MAX")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(1024);
        Self::with_capacity(cap)
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            cap: cap.max(1),
        }
    }

    pub fn get(&self, key: &str) -> Option<AnalyzeResponse> {
        self.entries.get(key).cloned()
    }

    pub fn insert(&mut self, key: String, value: AnalyzeResponse) {
        if self.entries.insert(key.clone(), value).is_none() {
            self.order.push_back(key);
            while self.order.len() > self.cap {
                if let Some(old) = self.order.pop_front() {
                    self.entries.remove(&old);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::ActionPlaces;
    use crate::normalize::{Category, Confidence, Recommendation};
    use chrono::Utc;
    use uuid::Uuid;

    fn canned_response(item: &str) -> AnalyzeResponse {
        AnalyzeResponse {
            id: Uuid::new_v4(),
            item: item.into(),
            value: 42.0,
            eco_impact: "Saves 3.1 kg CO2".into(),
            confidence: Confidence::Medium,
            category: Category::Electronics,
            timestamp: Utc::now(),
            saved: true,
            is_guest: false,
            action_places: ActionPlaces::default(),
            recommendation: Recommendation::Sell,
            stages: Vec::new(),
        }
    }

    #[test]
    fn cache_replays_by_key() {
        let mut cache = ReplayCache::with_capacity(4);
        cache.insert("user:a:key-1".into(), canned_response("toaster"));
        assert_eq!(cache.get("user:a:key-1").map(|r| r.item), Some("toaster".into()));
        assert!(cache.get("user:b:key-1").is_none());
    }

    #[test]
    fn cache_evicts_oldest_key_at_capacity() {
        let mut cache = ReplayCache::with_capacity(2);
        cache.insert("k1".into(), canned_response("lamp"));
        cache.insert("k2".into(), canned_response("chair"));
        cache.insert("k3".into(), canned_response("radio"));
        assert!(cache.get("k1").is_none());
        assert!(cache.get("k2").is_some());
        assert!(cache.get("k3").is_some());
    }

    #[test]
    fn reinserting_a_key_does_not_evict() {
        let mut cache = ReplayCache::with_capacity(2);
        cache.insert("k1".into(), canned_response("lamp"));
        cache.insert("k2".into(), canned_response("chair"));
        cache.insert("k1".into(), canned_response("lamp"));
        assert!(cache.get("k1").is_some());
        assert!(cache.get("k2").is_some());
    }
}
