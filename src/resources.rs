use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::info;

struct Cached<T> {
    value: Arc<T>,
    created: Instant,
}

/// Process-wide memoized value with an expiry.
///
/// The first caller builds the value; everyone after shares it until it is
/// older than `max_age` or [`ResourceCache::invalidate`] is called, at which
/// point the next caller rebuilds it. Callers arriving during a build wait
/// for it rather than starting their own.
pub struct ResourceCache<T> {
    name: &'static str,
    max_age: Duration,
    slot: Mutex<Option<Cached<T>>>,
}

impl<T> ResourceCache<T> {
    pub fn new(name: &'static str, max_age: Duration) -> Self {
        ResourceCache {
            name,
            max_age,
            slot: Mutex::new(None),
        }
    }

    pub async fn get_or_init<F, Fut, E>(&self, init: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut slot = self.slot.lock().await;

        if let Some(cached) = slot.as_ref() {
            if cached.created.elapsed() < self.max_age {
                return Ok(Arc::clone(&cached.value));
            }
            info!(resource = self.name, "cached resource expired, rebuilding");
        }

        let value = Arc::new(init().await?);
        *slot = Some(Cached {
            value: Arc::clone(&value),
            created: Instant::now(),
        });
        info!(resource = self.name, "resource initialized");

        Ok(value)
    }

    /// Drops the cached value so the next [`ResourceCache::get_or_init`] rebuilds it.
    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }
}
