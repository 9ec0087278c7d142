// Process-local promo code cache

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::entities::promo_code;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: promo_code::Model,
    inserted_at: Instant,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Read-through cache for promo codes keyed by upper-cased code.
///
/// Bounded to `capacity` entries; when full, the oldest insertion is evicted.
/// Entries expire after `ttl` and are dropped the moment usage is incremented.
/// The capacity guard at settlement never trusts this cache.
#[derive(Debug)]
pub struct PromoCache {
    store: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
    capacity: usize,
}

impl PromoCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            store: RwLock::new(HashMap::new()),
            ttl,
            capacity: capacity.max(1),
        }
    }

    fn key(code: &str) -> String {
        code.trim().to_uppercase()
    }

    pub fn get(&self, code: &str) -> Option<promo_code::Model> {
        let key = Self::key(code);
        let now = Instant::now();
        {
            let store = self.store.read().unwrap_or_else(|e| e.into_inner());
            match store.get(&key) {
                Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        let mut store = self.store.write().unwrap_or_else(|e| e.into_inner());
        store.remove(&key);
        None
    }

    pub fn insert(&self, promo: promo_code::Model) {
        let key = Self::key(&promo.code);
        let now = Instant::now();
        let mut store = self.store.write().unwrap_or_else(|e| e.into_inner());

        store.retain(|_, entry| !entry.is_expired(now));
        if !store.contains_key(&key) && store.len() >= self.capacity {
            let oldest = store
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                store.remove(&oldest);
            }
        }

        store.insert(
            key,
            CacheEntry {
                value: promo,
                inserted_at: now,
                expires_at: now + self.ttl,
            },
        );
    }

    pub fn invalidate(&self, code: &str) {
        let mut store = self.store.write().unwrap_or_else(|e| e.into_inner());
        store.remove(&Self::key(code));
    }

    pub fn len(&self) -> usize {
        self.store.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
