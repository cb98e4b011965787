use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use taskgraph::cache::{CacheLifecycle, CachedResult, ResultCache};

/// In-memory cache counting every call made to it.
#[derive(Debug, Default)]
pub struct CountingCache {
    entries: Mutex<HashMap<String, CachedResult>>,
    fail_setup: bool,
    pub setups: AtomicUsize,
    pub teardowns: AtomicUsize,
    pub lookups: AtomicUsize,
    pub hits: AtomicUsize,
    pub stores: AtomicUsize,
}

impl CountingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache whose `setup` fails.
    pub fn failing_setup() -> Self {
        Self {
            fail_setup: true,
            ..Self::default()
        }
    }

    pub fn setups(&self) -> usize {
        self.setups.load(Ordering::SeqCst)
    }

    pub fn teardowns(&self) -> usize {
        self.teardowns.load(Ordering::SeqCst)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn stores(&self) -> usize {
        self.stores.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheLifecycle for CountingCache {
    fn setup(&self) -> anyhow::Result<()> {
        self.setups.fetch_add(1, Ordering::SeqCst);
        if self.fail_setup {
            anyhow::bail!("cache directory is not writable");
        }
        Ok(())
    }

    fn teardown(&self) {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
    }
}

impl ResultCache for CountingCache {
    fn lookup(&self, key: &str) -> Option<CachedResult> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let hit = self.entries.lock().get(key).cloned();
        if hit.is_some() {
            self.hits.fetch_add(1, Ordering::SeqCst);
        }
        hit
    }

    fn store(&self, key: &str, result: &CachedResult) -> anyhow::Result<()> {
        self.stores.fetch_add(1, Ordering::SeqCst);
        self.entries
            .lock()
            .insert(key.to_string(), result.clone());
        Ok(())
    }
}
