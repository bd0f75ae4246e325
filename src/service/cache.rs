//! OCR 文本内存缓存, 键为 `文件 sha256|profile`

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use crate::config::CacheConfig;
use crate::models::OcrProfile;

struct CacheEntry {
    text: String,
    stored_at: Instant,
}

pub struct OcrCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Option<Duration>, // None = 不过期
}

impl OcrCache {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn from_config(cfg: &CacheConfig) -> Option<Self> {
        if !cfg.enabled {
            return None;
        }
        let ttl = (cfg.ttl_hours > 0).then(|| Duration::from_secs(cfg.ttl_hours * 3600));
        Some(Self::new(ttl))
    }

    pub fn key(file_sha256: &str, profile: OcrProfile) -> String {
        format!("{}|{}", file_sha256, profile.as_str())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        {
            let entry = self.entries.get(key)?;
            let fresh = self.ttl.map(|ttl| entry.stored_at.elapsed() <= ttl).unwrap_or(true);
            if fresh {
                debug!("OCR 缓存命中: {}", key);
                return Some(entry.text.clone());
            }
        }
        // 读锁释放后再删
        self.entries.remove(key);
        None
    }

    pub fn put(&self, key: String, text: String) {
        self.entries.insert(
            key,
            CacheEntry {
                text,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_and_profile_separation() {
        let cache = OcrCache::new(None);
        cache.put(OcrCache::key("abc", OcrProfile::Pdf), "发票".to_string());
        assert_eq!(cache.get("abc|pdf").as_deref(), Some("发票"));
        assert_eq!(cache.get(&OcrCache::key("abc", OcrProfile::Default)), None);
    }

    #[test]
    fn expired_entries_are_dropped() {
        let cache = OcrCache::new(Some(Duration::from_millis(1)));
        cache.put("k".to_string(), "v".to_string());
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn disabled_by_config() {
        let cfg = CacheConfig {
            enabled: false,
            ttl_hours: 0,
        };
        assert!(OcrCache::from_config(&cfg).is_none());
    }
}
