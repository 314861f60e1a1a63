//! Per-tenant mutual exclusion for subscription read-modify-write sequences

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per tenant; tenants never share a lock
#[derive(Clone, Default)]
pub struct TenantLocks {
    inner: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl TenantLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the tenant's lock. Held until the guard drops.
    pub async fn lock(&self, tenant_id: &str) -> OwnedMutexGuard<()> {
        // Clone the Arc out so the shard lock is released before awaiting
        let mutex = self
            .inner
            .entry(tenant_id.to_string())
            .or_default()
            .clone();
        mutex.lock_owned().await
    }

    /// Drop locks nobody holds or waits on
    pub fn cleanup(&self) {
        self.inner.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_tenant_is_serialized() {
        let locks = TenantLocks::new();
        let guard = locks.lock("t1").await;

        let other = locks.clone();
        let waiter = tokio::spawn(async move {
            let _g = other.lock("t1").await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_tenants_do_not_block_each_other() {
        let locks = TenantLocks::new();
        let _t1 = locks.lock("t1").await;
        tokio::time::timeout(Duration::from_millis(100), locks.lock("t2"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_keeps_held_locks() {
        let locks = TenantLocks::new();
        let held = locks.lock("t1").await;
        drop(locks.lock("t2").await);

        locks.cleanup();
        assert_eq!(locks.len(), 1);

        drop(held);
        locks.cleanup();
        assert!(locks.is_empty());
    }
}
