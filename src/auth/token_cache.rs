//! Shared OAuth access-token cache.
//!
//! Each key maps to the current *generation*: an `Arc<OnceCell>` that is filled
//! at most once. Concurrent cold callers all await the same cell, so only one
//! token request is in flight per key. A stale or rejected token is never
//! mutated; its generation is swapped for an empty cell instead. The map lock
//! is only held to look up or swap a generation, never across `.await`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::Instant;

use crate::error::Result;
use crate::shared::Secret;

/// A token is treated as expired this long before its actual expiry.
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(30);

/// Identifies the credentials a token was issued for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenKey {
    pub endpoint: String,
    pub client_id: String,
    pub audience: Option<String>,
    pub scope: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CachedToken {
    pub access_token: Secret,
    pub token_type: Option<String>,
    pub scope: Option<String>,
    /// `None` when the issuer did not state a lifetime; such a token is not reused.
    pub expires_at: Option<Instant>,
}

impl CachedToken {
    pub fn is_usable(&self, safety_margin: Duration) -> bool {
        self.expires_at
            .map(|expires_at| Instant::now() + safety_margin < expires_at)
            .unwrap_or(false)
    }
}

/// Where a returned token came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenOrigin {
    /// Issued earlier and still valid, or issued by a concurrent caller's request.
    Cached,
    /// Issued by the request this call made.
    Fresh,
}

type Slot = Arc<OnceCell<Arc<CachedToken>>>;

pub struct TokenCache {
    slots: Mutex<HashMap<TokenKey, Slot>>,
    safety_margin: Duration,
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCache")
            .field("safety_margin", &self.safety_margin)
            .finish_non_exhaustive()
    }
}

impl TokenCache {
    pub fn new() -> Self {
        Self::with_safety_margin(DEFAULT_SAFETY_MARGIN)
    }

    pub fn with_safety_margin(safety_margin: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            safety_margin,
        }
    }

    /// Returns a usable token for `key`, calling `fetch` only when none is cached.
    ///
    /// A failed fetch leaves the slot empty, so the next caller tries again.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &TokenKey,
        fetch: F,
    ) -> Result<(Arc<CachedToken>, TokenOrigin)>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<CachedToken>>,
    {
        loop {
            let slot = self.current(key);

            if let Some(token) = slot.get() {
                if token.is_usable(self.safety_margin) {
                    return Ok((Arc::clone(token), TokenOrigin::Cached));
                }
                tracing::debug!(endpoint = %key.endpoint, client_id = %key.client_id, "Cached token expired");
                self.retire(key, &slot);
                continue;
            }

            let mut fetched = false;
            let token = slot
                .get_or_try_init(|| {
                    fetched = true;
                    let pending = fetch();
                    async move { pending.await.map(Arc::new) }
                })
                .await?;

            let origin = if fetched {
                TokenOrigin::Fresh
            } else {
                TokenOrigin::Cached
            };
            return Ok((Arc::clone(token), origin));
        }
    }

    /// Drops `token` if it is still the current entry for `key`.
    pub fn invalidate(&self, key: &TokenKey, token: &Arc<CachedToken>) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let is_current = slots
            .get(key)
            .and_then(|slot| slot.get())
            .map(|current| Arc::ptr_eq(current, token))
            .unwrap_or(false);
        if is_current {
            tracing::debug!(endpoint = %key.endpoint, client_id = %key.client_id, "Invalidated cached token");
            slots.insert(key.clone(), Arc::new(OnceCell::new()));
        }
    }

    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn current(&self, key: &TokenKey) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(key.clone()).or_default())
    }

    fn retire(&self, key: &TokenKey, stale: &Slot) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if slots.get(key).is_some_and(|current| Arc::ptr_eq(current, stale)) {
            slots.insert(key.clone(), Arc::new(OnceCell::new()));
        }
    }
}
