//! Correlation slots
//!
//! A fixed arena of `N` slots, each with its own lock and wake primitive, plus
//! a queue of free slot indices. A sender owns a slot for as long as it holds
//! the [`SlotLease`] returned by [`SlotPool::acquire`]; dropping the lease,
//! whether the send finished or its future was cancelled, vacates the slot
//! and puts the index back. The pool bounds the number of requests in flight
//! to `N`.
//!
//! Two different slots never share a lock, so unrelated requests never
//! contend with each other. Slot locks are never held across an await.

use futures_util::FutureExt;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::{Notify, Semaphore};
use tracing::debug;

use crate::error::PacemakerError;
use crate::message::HeartbeatMessage;

/// What a slot currently holds.
#[derive(Debug)]
pub enum SlotState {
    /// Not owned by any sender
    Vacant,
    /// A request is in flight and no response has arrived
    Pending,
    /// The response for the in-flight request
    Answered(HeartbeatMessage),
    /// The connection carrying the request was torn down
    Cleared,
}

/// One correlation slot.
pub struct Slot {
    state: Mutex<SlotState>,
    wake: Notify,
}

impl Slot {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Vacant),
            wake: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        // Every critical section is a single assignment, so a poisoned lock
        // still holds a consistent state.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark a request as in flight on this slot.
    ///
    /// Also discards a wakeup left behind by the previous owner.
    pub fn begin(&self) {
        *self.lock() = SlotState::Pending;
        let _ = self.wake.notified().now_or_never();
    }

    /// Store a response if a request is pending. Returns false otherwise,
    /// leaving the slot untouched and waking nobody.
    pub fn answer(&self, response: HeartbeatMessage) -> bool {
        {
            let mut state = self.lock();
            if !matches!(*state, SlotState::Pending) {
                return false;
            }
            *state = SlotState::Answered(response);
        }
        self.wake.notify_one();
        true
    }

    /// Mark a pending request as cleared by a teardown and wake its sender.
    pub fn clear(&self) -> bool {
        {
            let mut state = self.lock();
            if !matches!(*state, SlotState::Pending) {
                return false;
            }
            *state = SlotState::Cleared;
        }
        self.wake.notify_one();
        true
    }

    /// Take whatever the slot holds, leaving it `Pending`.
    ///
    /// Only the owner of the slot calls this.
    pub fn take(&self) -> SlotState {
        std::mem::replace(&mut *self.lock(), SlotState::Pending)
    }

    fn vacate(&self) {
        *self.lock() = SlotState::Vacant;
    }

    #[cfg(test)]
    pub(crate) fn is_pending(&self) -> bool {
        matches!(*self.lock(), SlotState::Pending)
    }

    #[cfg(test)]
    pub(crate) fn is_vacant(&self) -> bool {
        matches!(*self.lock(), SlotState::Vacant)
    }

    /// Wait for this slot to be woken. A wake that arrived before the call is
    /// not lost.
    pub async fn woken(&self) {
        self.wake.notified().await;
    }

    /// Wake the owner without changing state.
    pub fn nudge(&self) {
        self.wake.notify_one();
    }
}

/// The slot arena and its free indices. Acquire blocks while all `N` are
/// leased.
pub struct SlotPool {
    slots: Vec<Slot>,
    /// Free indices, handed out first-in first-out
    free: Mutex<VecDeque<usize>>,
    /// One permit per queued index
    available: Semaphore,
}

impl SlotPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| Slot::new()).collect(),
            free: Mutex::new((0..capacity).collect()),
            available: Semaphore::new(capacity),
        }
    }

    fn free_list(&self) -> MutexGuard<'_, VecDeque<usize>> {
        self.free.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lease a free slot, waiting for one to be released if necessary.
    ///
    /// Fails with `Shutdown` once the pool is closed.
    pub async fn acquire(&self) -> Result<SlotLease<'_>, PacemakerError> {
        let permit = self
            .available
            .acquire()
            .await
            .map_err(|_| PacemakerError::Shutdown)?;
        permit.forget();

        let index = self
            .free_list()
            .pop_front()
            .expect("a permit is only added after its index is queued");

        Ok(SlotLease { pool: self, index })
    }

    fn release(&self, index: usize) {
        self.free_list().push_back(index);
        self.available.add_permits(1);
    }

    /// Fail all current and future acquires.
    pub fn close(&self) {
        self.available.close();
    }

    pub fn get(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of indices currently free.
    pub fn available(&self) -> usize {
        self.available.available_permits()
    }
}

/// Exclusive use of one slot. Dropping it vacates the slot and frees the
/// index.
pub struct SlotLease<'a> {
    pool: &'a SlotPool,
    index: usize,
}

impl SlotLease<'_> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn slot(&self) -> &Slot {
        &self.pool.slots[self.index]
    }
}

impl Drop for SlotLease<'_> {
    fn drop(&mut self) {
        self.slot().vacate();
        self.pool.release(self.index);
        debug!(slot = self.index, "Released slot");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_acquire_in_order() {
        let pool = SlotPool::new(3);
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        let c = pool.acquire().await.unwrap();
        assert_eq!((a.index(), b.index(), c.index()), (0, 1, 2));
        assert_eq!(pool.available(), 0);
    }

    #[tokio::test]
    async fn test_acquire_blocks_until_release() {
        let pool = Arc::new(SlotPool::new(1));
        let first = pool.acquire().await.unwrap();
        let first_index = first.index();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire().await.map(|lease| lease.index()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(first);
        let second = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(second, first_index);
    }

    #[tokio::test]
    async fn test_drop_vacates_and_frees() {
        let pool = SlotPool::new(2);
        {
            let lease = pool.acquire().await.unwrap();
            lease.slot().begin();
            assert!(pool.get(0).unwrap().is_pending());
            assert_eq!(pool.available(), 1);
        }
        assert!(pool.get(0).unwrap().is_vacant());
        assert_eq!(pool.available(), 2);

        // FIFO: the released index goes behind the never-used one
        assert_eq!(pool.acquire().await.unwrap().index(), 1);
    }

    #[tokio::test]
    async fn test_close_fails_waiters() {
        let pool = Arc::new(SlotPool::new(1));
        let _held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire().await.map(|lease| lease.index()) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        pool.close();
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(PacemakerError::Shutdown)));
    }

    #[test]
    fn test_answer_requires_pending() {
        let pool = SlotPool::new(2);
        let slot = pool.get(1).unwrap();

        assert!(!slot.answer(HeartbeatMessage::response(1, b"late".to_vec())));
        assert!(slot.is_vacant());

        slot.begin();
        assert!(slot.answer(HeartbeatMessage::response(1, b"ok".to_vec())));
        // A duplicate does not overwrite the first answer
        assert!(!slot.answer(HeartbeatMessage::response(1, b"dup".to_vec())));

        match slot.take() {
            SlotState::Answered(msg) => assert_eq!(msg.body(), b"ok"),
            other => panic!("unexpected slot state: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_clear_wakes_owner() {
        let pool = Arc::new(SlotPool::new(1));
        pool.get(0).unwrap().begin();

        let owner = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                let slot = pool.get(0).unwrap();
                slot.woken().await;
                slot.take()
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(pool.get(0).unwrap().clear());
        let state = tokio::time::timeout(Duration::from_secs(1), owner)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(state, SlotState::Cleared));
    }

    #[tokio::test]
    async fn test_begin_discards_stale_wakeup() {
        let pool = SlotPool::new(1);
        let slot = pool.get(0).unwrap();
        slot.nudge();

        slot.begin();
        let woke = tokio::time::timeout(Duration::from_millis(20), slot.woken()).await;
        assert!(woke.is_err());
    }
}
