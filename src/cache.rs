//! In-memory artifact cache with pin-aware LRU eviction.
//!
//! Artifacts are admitted first and eviction runs after, so a single
//! over-budget artifact can still be served. Entries handed out through
//! [`ModelCache::get`] are pinned by the returned guard and never evicted
//! while a pin is live; the pin is released when the guard drops. Pretrained
//! base models can be exempted from eviction entirely.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Cache capacity limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Total byte budget across all entries
    pub max_bytes: usize,
    /// Maximum number of resident entries
    pub max_entries: usize,
    /// Keep pretrained base models resident even under pressure
    pub protect_pretrained: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: 100 * 1024 * 1024,
            max_entries: 16,
            protect_pretrained: true,
        }
    }
}

/// Descriptive metadata stored alongside cached bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub version: String,
    /// Pretrained base model rather than a user-trained one
    pub pretrained: bool,
    pub accuracy: Option<f64>,
}

/// Hit/miss and occupancy counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub total_bytes: usize,
}

struct CacheEntry {
    bytes: Arc<Vec<u8>>,
    metadata: ArtifactMetadata,
    /// Recency tick; larger is more recently used
    last_used: u64,
    pins: Arc<AtomicUsize>,
}

/// RAII pin on a cached artifact.
///
/// While the guard lives, the entry cannot be evicted, so an inference call
/// holding it never loses its weights mid-flight.
pub struct PinnedArtifact {
    name: String,
    bytes: Arc<Vec<u8>>,
    metadata: ArtifactMetadata,
    pins: Arc<AtomicUsize>,
}

impl PinnedArtifact {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn metadata(&self) -> &ArtifactMetadata {
        &self.metadata
    }
}

impl Drop for PinnedArtifact {
    fn drop(&mut self) {
        self.pins.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Inner {
    config: CacheConfig,
    entries: HashMap<String, CacheEntry>,
    tick: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Thread-safe artifact cache keyed by model name.
pub struct ModelCache {
    inner: Mutex<Inner>,
}

impl ModelCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                config,
                entries: HashMap::new(),
                tick: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
        }
    }

    /// Inserts (or replaces) an artifact, then evicts until the cache fits
    /// its budget again. A replaced entry stays alive for existing pins
    /// through their guards.
    pub fn put(&self, name: impl Into<String>, bytes: Vec<u8>, metadata: ArtifactMetadata) {
        let name = name.into();
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;

        debug!("Caching artifact '{}' ({} bytes)", name, bytes.len());
        inner.entries.insert(
            name,
            CacheEntry {
                bytes: Arc::new(bytes),
                metadata,
                last_used: tick,
                pins: Arc::new(AtomicUsize::new(0)),
            },
        );

        inner.evict_to_budget();
    }

    /// Looks up an artifact. A hit bumps recency and returns a pinned guard;
    /// a miss is a value, not an error.
    pub fn get(&self, name: &str) -> Option<PinnedArtifact> {
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;

        match inner.entries.get_mut(name) {
            Some(entry) => {
                entry.last_used = tick;
                entry.pins.fetch_add(1, Ordering::SeqCst);
                let pinned = PinnedArtifact {
                    name: name.to_string(),
                    bytes: Arc::clone(&entry.bytes),
                    metadata: entry.metadata.clone(),
                    pins: Arc::clone(&entry.pins),
                };
                inner.hits += 1;
                Some(pinned)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.lock().entries.contains_key(name)
    }

    /// Removes an artifact by name. Pinned entries are left in place and
    /// `false` is returned.
    pub fn remove(&self, name: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.entries.get(name) {
            Some(entry) if entry.pins.load(Ordering::SeqCst) == 0 => {
                inner.entries.remove(name);
                true
            }
            _ => false,
        }
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            entries: inner.entries.len(),
            total_bytes: inner.total_bytes(),
        }
    }
}

impl Inner {
    fn total_bytes(&self) -> usize {
        self.entries.values().map(|e| e.bytes.len()).sum()
    }

    fn over_budget(&self) -> bool {
        self.total_bytes() > self.config.max_bytes || self.entries.len() > self.config.max_entries
    }

    /// Evicts least-recently-used unpinned entries until within budget or no
    /// candidate remains. Pretrained entries are skipped when protected.
    fn evict_to_budget(&mut self) {
        while self.over_budget() {
            let victim = self
                .entries
                .iter()
                .filter(|(_, e)| e.pins.load(Ordering::SeqCst) == 0)
                .filter(|(_, e)| !(self.config.protect_pretrained && e.metadata.pretrained))
                .min_by_key(|(_, e)| e.last_used)
                .map(|(name, _)| name.clone());

            match victim {
                Some(name) => {
                    info!("Evicting artifact '{}' from cache", name);
                    self.entries.remove(&name);
                    self.evictions += 1;
                }
                None => break,
            }
        }
    }
}
