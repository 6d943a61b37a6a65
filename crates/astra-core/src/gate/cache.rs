use std::collections::HashMap;
use std::sync::Mutex;

use super::Fingerprint;
use crate::error::{CoreError, Result};

/// Fingerprint → similarity score, shared by every request.
///
/// Cleared wholesale on each upload; there is no eviction otherwise.  A
/// clear racing with another request's lookup/store pair can only cause a
/// recomputation, never a torn entry, because every operation takes the
/// lock for its whole duration.
#[derive(Debug, Default)]
pub struct SimilarityCache {
    inner: Mutex<HashMap<Fingerprint, f32>>,
}

impl SimilarityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Result<Option<f32>> {
        Ok(self.lock("read similarity cache")?.get(fingerprint).copied())
    }

    pub fn insert(&self, fingerprint: Fingerprint, score: f32) -> Result<()> {
        self.lock("write similarity cache")?.insert(fingerprint, score);
        Ok(())
    }

    /// Drop every entry.  Returns how many were removed.
    pub fn clear(&self) -> Result<usize> {
        let mut map = self.lock("clear similarity cache")?;
        let removed = map.len();
        map.clear();
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(
        &self,
        operation: &'static str,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<Fingerprint, f32>>> {
        self.inner
            .lock()
            .map_err(|_| CoreError::LockPoisoned { operation })
    }
}
