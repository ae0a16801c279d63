//! Greeting audio cache, filled in the background at start-up so a wake can answer
//! without a network round trip.

use crate::services::SpeechSynthesis;
use rand::seq::SliceRandom;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct GreetingCache {
    entries: Arc<RwLock<Vec<Vec<u8>>>>,
}

impl GreetingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Random cached greeting. Never waits: a cache being written counts as a miss.
    pub fn pick(&self) -> Option<Vec<u8>> {
        let entries = self.entries.try_read().ok()?;
        entries.choose(&mut rand::thread_rng()).cloned()
    }

    pub async fn insert(&self, audio: Vec<u8>) {
        if audio.is_empty() {
            return;
        }
        self.entries.write().await.push(audio);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Synthesize every greeting once, in the background.
    pub fn preload(&self, synthesis: Arc<dyn SpeechSynthesis>, texts: Vec<String>) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            for text in texts {
                match synthesis.synthesize(&text).await {
                    Ok(audio) => cache.insert(audio).await,
                    Err(e) => warn!(greeting = %text, "Greeting preload failed: {}", e),
                }
            }
            info!("👋 Greeting cache ready ({} entries)", cache.len().await);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_cache_misses() {
        let cache = GreetingCache::new();
        assert!(cache.pick().is_none());
        cache.insert(Vec::new()).await;
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn pick_returns_a_cached_entry() {
        let cache = GreetingCache::new();
        cache.insert(vec![1]).await;
        cache.insert(vec![2]).await;
        let picked = cache.pick().unwrap();
        assert!(picked == vec![1] || picked == vec![2]);
    }

    #[tokio::test]
    async fn pick_misses_while_writer_holds_lock() {
        let cache = GreetingCache::new();
        cache.insert(vec![1]).await;
        let guard = cache.entries.write().await;
        assert!(cache.pick().is_none());
        drop(guard);
        assert!(cache.pick().is_some());
    }
}
