//! Per-entity mutual exclusion.

use std::sync::Arc;

use common::AggregateId;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Entries beyond this are pruned on the next lock.
const PRUNE_THRESHOLD: usize = 1024;

/// Registry of async mutexes keyed by entity id.
///
/// Holders of the same id are serialized; different ids never contend.
#[derive(Clone, Default)]
pub struct EntityLocks {
    locks: Arc<DashMap<AggregateId, Arc<Mutex<()>>>>,
}

/// Proof that the lock for `id` is held. Released on drop.
pub struct EntityGuard {
    id: AggregateId,
    _guard: OwnedMutexGuard<()>,
}

impl EntityGuard {
    pub fn id(&self) -> AggregateId {
        self.id
    }
}

impl EntityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, id: AggregateId) -> EntityGuard {
        if self.locks.len() > PRUNE_THRESHOLD {
            self.prune();
        }

        let mutex = Arc::clone(self.locks.entry(id).or_default().value());
        EntityGuard {
            id,
            _guard: mutex.lock_owned().await,
        }
    }

    /// Drops entries nobody holds or waits on.
    pub fn prune(&self) {
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn same_id_is_serialized() {
        let locks = EntityLocks::new();
        let id = AggregateId::new();

        let guard = locks.lock(id).await;
        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.lock(id).await.id() })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        assert_eq!(contender.await.unwrap(), id);
    }

    #[tokio::test]
    async fn different_ids_do_not_contend() {
        let locks = EntityLocks::new();
        let _a = locks.lock(AggregateId::new()).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock(AggregateId::new())).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn prune_keeps_held_locks() {
        let locks = EntityLocks::new();
        let held = AggregateId::new();
        let _guard = locks.lock(held).await;
        drop(locks.lock(AggregateId::new()).await);

        locks.prune();
        assert_eq!(locks.len(), 1);
    }
}
