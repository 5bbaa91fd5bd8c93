//! 请求级租约：同一时刻至多一个驱动者推进某个请求
//!
//! 租约带 TTL，持有者崩溃后过期的租约可被他人回收；LeaseGuard 离开作用域时释放。

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::core::PipelineError;

#[derive(Debug, Clone)]
struct LeaseEntry {
    token: Uuid,
    expires_at: Instant,
}

/// 租约表（进程内）
#[derive(Debug)]
pub struct LeaseManager {
    ttl: Duration,
    leases: Mutex<HashMap<String, LeaseEntry>>,
}

impl LeaseManager {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            leases: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// 获取租约；已被他人持有且未过期时返回 LeaseHeld
    pub fn acquire(&self, request_id: &str) -> Result<LeaseGuard<'_>, PipelineError> {
        let mut leases = self
            .leases
            .lock()
            .map_err(|_| PipelineError::Store("lease table poisoned".to_string()))?;
        let now = Instant::now();
        if let Some(existing) = leases.get(request_id) {
            if existing.expires_at > now {
                return Err(PipelineError::LeaseHeld(request_id.to_string()));
            }
            tracing::warn!(request_id = %request_id, "reclaiming expired lease");
        }
        let token = Uuid::new_v4();
        leases.insert(
            request_id.to_string(),
            LeaseEntry {
                token,
                expires_at: now + self.ttl,
            },
        );
        Ok(LeaseGuard {
            manager: self,
            request_id: request_id.to_string(),
            token,
        })
    }

    /// 租约被占用时退避重试，最多等待 `wait`；超过 TTL 的租约在此期间会被回收
    pub async fn acquire_within(&self, request_id: &str, wait: Duration) -> Result<LeaseGuard<'_>, PipelineError> {
        let deadline = Instant::now() + wait;
        let mut backoff = Duration::from_millis(5);
        loop {
            match self.acquire(request_id) {
                Err(PipelineError::LeaseHeld(_)) if Instant::now() < deadline => {
                    tracing::debug!(request_id = %request_id, backoff_ms = backoff.as_millis() as u64, "lease busy, waiting");
                    tokio::time::sleep(backoff.min(deadline.saturating_duration_since(Instant::now()))).await;
                    backoff = (backoff * 2).min(Duration::from_millis(200));
                }
                other => return other,
            }
        }
    }

    fn is_held(&self, request_id: &str, token: Uuid) -> bool {
        let Ok(leases) = self.leases.lock() else {
            return false;
        };
        leases
            .get(request_id)
            .map(|e| e.token == token && e.expires_at > Instant::now())
            .unwrap_or(false)
    }

    fn renew(&self, request_id: &str, token: Uuid) -> bool {
        let Ok(mut leases) = self.leases.lock() else {
            return false;
        };
        match leases.get_mut(request_id) {
            Some(entry) if entry.token == token => {
                entry.expires_at = Instant::now() + self.ttl;
                true
            }
            _ => false,
        }
    }

    fn release(&self, request_id: &str, token: Uuid) {
        if let Ok(mut leases) = self.leases.lock() {
            if leases.get(request_id).map(|e| e.token) == Some(token) {
                leases.remove(request_id);
            }
        }
    }
}

/// 已获取的租约；drop 时仅在令牌仍匹配时释放（已被回收的租约不会误删他人的）
#[derive(Debug)]
pub struct LeaseGuard<'a> {
    manager: &'a LeaseManager,
    request_id: String,
    token: Uuid,
}

impl LeaseGuard<'_> {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// 是否仍然有效（未过期且未被回收）
    pub fn is_valid(&self) -> bool {
        self.manager.is_held(&self.request_id, self.token)
    }

    pub fn renew(&self) -> bool {
        self.manager.renew(&self.request_id, self.token)
    }
}

impl Drop for LeaseGuard<'_> {
    fn drop(&mut self) {
        self.manager.release(&self.request_id, self.token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_exclusive() {
        let manager = LeaseManager::new(Duration::from_secs(30));
        let guard = manager.acquire("r1").unwrap();
        assert!(matches!(manager.acquire("r1"), Err(PipelineError::LeaseHeld(_))));
        assert!(manager.acquire("r2").is_ok());
        drop(guard);
        assert!(manager.acquire("r1").is_ok());
    }

    #[test]
    fn test_expired_lease_reclaimed() {
        let manager = LeaseManager::new(Duration::from_millis(5));
        let stale = manager.acquire("r1").unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(!stale.is_valid());
        let fresh = manager.acquire("r1").unwrap();
        assert!(fresh.is_valid());
        // 旧持有者释放不影响新持有者
        drop(stale);
        assert!(fresh.is_valid());
        assert!(!fresh.renew() || fresh.is_valid());
    }

    #[tokio::test]
    async fn test_acquire_within_waits_for_release() {
        let manager = LeaseManager::new(Duration::from_secs(30));
        let guard = manager.acquire("r1").unwrap();
        let (acquired, _) = tokio::join!(manager.acquire_within("r1", Duration::from_secs(5)), async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            drop(guard);
        });
        assert_eq!(acquired.unwrap().request_id(), "r1");
    }

    #[tokio::test]
    async fn test_acquire_within_gives_up() {
        let manager = LeaseManager::new(Duration::from_secs(30));
        let _guard = manager.acquire("r1").unwrap();
        assert!(matches!(
            manager.acquire_within("r1", Duration::from_millis(20)).await,
            Err(PipelineError::LeaseHeld(_))
        ));
    }
}
