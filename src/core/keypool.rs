use crate::core::settings::Settings;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn token(&self) -> &str {
        &self.0
    }
}

#[derive(Debug)]
struct UsageWindow {
    window_start: Instant,
    count: u32,
}

impl UsageWindow {
    fn new() -> Self {
        Self {
            window_start: Instant::now(),
            count: 0,
        }
    }

    fn reset_if_expired(&mut self, window: Duration) {
        if self.window_start.elapsed() >= window {
            self.window_start = Instant::now();
            self.count = 0;
        }
    }
}

#[derive(Default)]
struct PoolInner {
    credentials: Vec<Credential>,
    windows: HashMap<String, UsageWindow>,
    cursor: usize,
}

// Shared admission controller for the credential pool. Both scheduler loops
// consult it through the same mutex, so checking remaining quota and
// committing a use can never race between consumers: `acquire` selects a
// credential and records the use in one critical section.
pub struct KeyPool {
    inner: Mutex<PoolInner>,
    quota: u32,
    window: Duration,
    fallback_interval: Duration,
    changed_tx: watch::Sender<u64>,
}

impl KeyPool {
    pub fn new(settings: &Settings) -> Self {
        let (changed_tx, _) = watch::channel(0);
        Self {
            inner: Mutex::new(PoolInner::default()),
            quota: settings.quota_per_credential,
            window: settings.window(),
            fallback_interval: settings.fallback_interval(),
            changed_tx,
        }
    }

    // Replaces the pool wholesale. Usage state survives for tokens still
    // present; state for removed tokens is discarded and the round-robin
    // cursor starts over.
    pub async fn set_credentials(&self, tokens: Vec<String>) {
        {
            let mut inner = self.inner.lock().await;
            inner.credentials = tokens.iter().map(|t| Credential::new(t.as_str())).collect();
            inner
                .windows
                .retain(|token, _| tokens.iter().any(|t| t == token));
            inner.cursor = 0;
            tracing::info!(pool_size = inner.credentials.len(), "Credential pool replaced");
        }
        self.changed_tx.send_modify(|generation| *generation += 1);
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changed_tx.subscribe()
    }

    pub async fn has_credentials(&self) -> bool {
        !self.inner.lock().await.credentials.is_empty()
    }

    // Round-robin from the last successful index, checking at most pool_size
    // candidates. Returns None when every credential is exhausted; callers
    // treat that as "wait for the next tick", not an error.
    pub async fn acquire(&self) -> Option<Credential> {
        let mut inner = self.inner.lock().await;
        let inner = &mut *inner;
        let pool_size = inner.credentials.len();

        for offset in 0..pool_size {
            let idx = (inner.cursor + offset) % pool_size;
            let credential = inner.credentials[idx].clone();

            let window = inner
                .windows
                .entry(credential.token().to_string())
                .or_insert_with(UsageWindow::new);
            window.reset_if_expired(self.window);

            if window.count < self.quota {
                window.count += 1;
                inner.cursor = idx;
                return Some(credential);
            }
        }

        None
    }

    // Commits one use against a credential's window without going through
    // selection. `acquire` already records the uses it hands out; this is
    // for hosts spending quota out of band against the same budget.
    pub async fn record_use(&self, credential: &Credential) {
        let mut inner = self.inner.lock().await;
        let window = inner
            .windows
            .entry(credential.token().to_string())
            .or_insert_with(UsageWindow::new);
        window.reset_if_expired(self.window);
        window.count += 1;
    }

    // Minimum legal spacing between any two calls system-wide. Recomputed by
    // consumers whenever the pool changes.
    pub async fn effective_interval(&self) -> Duration {
        let pool_size = self.inner.lock().await.credentials.len() as u64;
        if pool_size == 0 {
            return self.fallback_interval;
        }

        let window_ms = self.window.as_millis() as u64;
        let budget = u64::from(self.quota) * pool_size;
        Duration::from_millis(window_ms.div_ceil(budget))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(quota: u32, window_secs: u64) -> Settings {
        Settings {
            quota_per_credential: quota,
            window_secs,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_acquire_from_empty_pool() {
        let pool = KeyPool::new(&Settings::default());
        assert!(pool.acquire().await.is_none());
        assert!(!pool.has_credentials().await);
    }

    #[tokio::test]
    async fn test_quota_enforced_within_window() {
        let pool = KeyPool::new(&settings(2, 60));
        pool.set_credentials(vec!["keyA".into()]).await;

        assert_eq!(pool.acquire().await.unwrap().token(), "keyA");
        assert_eq!(pool.acquire().await.unwrap().token(), "keyA");
        assert!(pool.acquire().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_reset_restores_quota() {
        let pool = KeyPool::new(&settings(2, 60));
        pool.set_credentials(vec!["keyA".into()]).await;

        assert!(pool.acquire().await.is_some());
        assert!(pool.acquire().await.is_some());
        assert!(pool.acquire().await.is_none());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(pool.acquire().await.unwrap().token(), "keyA");
    }

    #[tokio::test]
    async fn test_round_robin_spills_to_next_credential() {
        let pool = KeyPool::new(&settings(1, 60));
        pool.set_credentials(vec!["keyA".into(), "keyB".into()]).await;

        assert_eq!(pool.acquire().await.unwrap().token(), "keyA");
        assert_eq!(pool.acquire().await.unwrap().token(), "keyB");
        assert!(pool.acquire().await.is_none());
    }

    #[tokio::test]
    async fn test_replacing_pool_discards_removed_state() {
        let pool = KeyPool::new(&settings(1, 60));
        pool.set_credentials(vec!["keyA".into()]).await;
        assert!(pool.acquire().await.is_some());
        assert!(pool.acquire().await.is_none());

        // keyA is gone and back: its old window no longer applies
        pool.set_credentials(vec!["keyB".into()]).await;
        pool.set_credentials(vec!["keyA".into()]).await;
        assert_eq!(pool.acquire().await.unwrap().token(), "keyA");
    }

    #[tokio::test]
    async fn test_replacing_pool_keeps_surviving_state() {
        let pool = KeyPool::new(&settings(1, 60));
        pool.set_credentials(vec!["keyA".into()]).await;
        assert!(pool.acquire().await.is_some());

        pool.set_credentials(vec!["keyA".into(), "keyB".into()]).await;
        // keyA's window survived the replacement, so only keyB has quota
        assert_eq!(pool.acquire().await.unwrap().token(), "keyB");
        assert!(pool.acquire().await.is_none());
    }

    #[tokio::test]
    async fn test_record_use_consumes_quota() {
        let pool = KeyPool::new(&settings(2, 60));
        pool.set_credentials(vec!["keyA".into()]).await;

        pool.record_use(&Credential::new("keyA")).await;
        assert!(pool.acquire().await.is_some());
        assert!(pool.acquire().await.is_none());
    }

    #[tokio::test]
    async fn test_effective_interval() {
        let pool = KeyPool::new(&Settings::default());
        // Empty pool falls back to the configured interval
        assert_eq!(pool.effective_interval().await, Duration::from_millis(600));

        pool.set_credentials(vec!["keyA".into()]).await;
        assert_eq!(pool.effective_interval().await, Duration::from_millis(600));

        pool.set_credentials(vec!["a".into(), "b".into(), "c".into()])
            .await;
        assert_eq!(pool.effective_interval().await, Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_effective_interval_rounds_up() {
        let pool = KeyPool::new(&settings(7, 60));
        pool.set_credentials(vec!["keyA".into()]).await;
        // 60000 / 7 = 8571.42..., spacing must round up
        assert_eq!(pool.effective_interval().await, Duration::from_millis(8572));
    }

    #[tokio::test]
    async fn test_pool_change_notifies_subscribers() {
        let pool = KeyPool::new(&Settings::default());
        let rx = pool.subscribe();

        pool.set_credentials(vec!["keyA".into()]).await;
        assert!(rx.has_changed().unwrap());
    }
}
