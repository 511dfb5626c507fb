//! Exclusive allocation of isolate box ids.
//!
//! Every concurrent sandboxed run needs its own box id, two runs sharing one would clobber each
//! other's box directory and meta file. The pool hands ids out as [`BoxLease`]s which give the
//! id back when dropped, so a panicking or cancelled evaluation cannot leak a box.

use log::debug;
use std::ops::Range;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::Semaphore;

#[derive(Error, Debug)]
pub enum BoxPoolError {
    #[error("box pool is closed")]
    Closed,
    #[error("box pool has {available} boxes, {requested} were requested at once")]
    TooSmall { available: u32, requested: u32 },
    #[error("box pool free list is out of sync with its permits")]
    Desynchronized,
}

struct Inner {
    free: Mutex<Vec<u32>>,
    permits: Semaphore,
    size: u32,
}

#[derive(Clone)]
pub struct BoxPool {
    inner: Arc<Inner>,
}

impl BoxPool {
    pub fn new(ids: Range<u32>) -> Self {
        // Reversed so that pop() hands out the lowest ids first
        let free: Vec<u32> = ids.rev().collect();
        let size = free.len() as u32;
        BoxPool {
            inner: Arc::new(Inner {
                permits: Semaphore::new(free.len()),
                free: Mutex::new(free),
                size,
            }),
        }
    }

    pub fn size(&self) -> u32 {
        self.inner.size
    }

    pub fn available(&self) -> usize {
        self.inner.permits.available_permits()
    }

    pub async fn acquire(&self) -> Result<BoxLease, BoxPoolError> {
        let mut leases = self.acquire_many(1).await?;
        leases.pop().ok_or(BoxPoolError::Desynchronized)
    }

    /// Acquires two boxes at once.
    ///
    /// Both permits are taken in a single step, two interactive evaluations competing for the
    /// last boxes can't each end up holding one and waiting forever for the other.
    pub async fn acquire_pair(&self) -> Result<(BoxLease, BoxLease), BoxPoolError> {
        let mut leases = self.acquire_many(2).await?;
        match (leases.pop(), leases.pop()) {
            (Some(second), Some(first)) => Ok((first, second)),
            _ => Err(BoxPoolError::Desynchronized),
        }
    }

    async fn acquire_many(&self, count: u32) -> Result<Vec<BoxLease>, BoxPoolError> {
        if count > self.inner.size {
            return Err(BoxPoolError::TooSmall {
                available: self.inner.size,
                requested: count,
            });
        }

        let permit = self
            .inner
            .permits
            .acquire_many(count)
            .await
            .map_err(|_| BoxPoolError::Closed)?;
        // Permits come back one by one as the leases drop
        permit.forget();

        let ids = {
            let mut free = self.inner.free.lock().map_err(|_| BoxPoolError::Desynchronized)?;
            let at = free.len().saturating_sub(count as usize);
            free.split_off(at)
        };

        if ids.len() != count as usize {
            self.inner.permits.add_permits(count as usize);
            return Err(BoxPoolError::Desynchronized);
        }

        Ok(ids
            .into_iter()
            .rev()
            .map(|id| {
                debug!("Leased box {}", id);
                BoxLease {
                    id,
                    pool: self.inner.clone(),
                }
            })
            .collect())
    }

    pub fn close(&self) {
        self.inner.permits.close();
    }
}

#[derive(Debug)]
pub struct BoxLease {
    id: u32,
    pool: Arc<Inner>,
}

impl BoxLease {
    pub fn id(&self) -> u32 {
        self.id
    }
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxPool").field("size", &self.size).finish()
    }
}

impl Drop for BoxLease {
    fn drop(&mut self) {
        // A poisoned lock only means another lease panicked mid push, the vector is still usable
        let mut free = match self.pool.free.lock() {
            Ok(free) => free,
            Err(poisoned) => poisoned.into_inner(),
        };
        free.push(self.id);
        drop(free);
        self.pool.permits.add_permits(1);
        debug!("Released box {}", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;

    #[tokio::test]
    async fn hands_out_lowest_ids_first() {
        let pool = BoxPool::new(10..13);
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        assert_eq!((a.id(), b.id()), (10, 11));
        assert_eq!(pool.available(), 1);
        drop(a);
        assert_eq!(pool.available(), 2);
        let c = pool.acquire().await.unwrap();
        assert_eq!(c.id(), 10);
    }

    #[tokio::test]
    async fn pair_larger_than_pool_is_rejected() {
        let pool = BoxPool::new(0..1);
        assert!(matches!(
            pool.acquire_pair().await,
            Err(BoxPoolError::TooSmall { available: 1, requested: 2 })
        ));
    }

    #[tokio::test]
    async fn closed_pool_refuses_leases() {
        let pool = BoxPool::new(0..2);
        pool.close();
        assert!(matches!(pool.acquire().await, Err(BoxPoolError::Closed)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn ids_are_never_leased_twice_concurrently() {
        let pool = BoxPool::new(0..3);
        let in_use = Arc::new(Mutex::new(HashSet::new()));

        let tasks: Vec<_> = (0..48)
            .map(|i| {
                let pool = pool.clone();
                let in_use = in_use.clone();
                tokio::spawn(async move {
                    let leases = if i % 3 == 0 {
                        let (a, b) = pool.acquire_pair().await.unwrap();
                        vec![a, b]
                    } else {
                        vec![pool.acquire().await.unwrap()]
                    };
                    for lease in &leases {
                        assert!(in_use.lock().unwrap().insert(lease.id()), "box {} double leased", lease.id());
                    }
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    for lease in &leases {
                        assert!(in_use.lock().unwrap().remove(&lease.id()));
                    }
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(pool.available(), 3);
    }
}
