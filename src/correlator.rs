//! Request/response correlation
//!
//! `send` stamps a request with the index of a free slot, hands it to the
//! connection once it is ready, and waits on that slot until the matching
//! response is delivered. `deliver` routes a response to its slot by
//! correlation id.
//!
//! # Send Loop
//!
//! ```text
//! lease slot ─► stamp id ─► ┌─► slot answered? ── yes ─► return (lease drop frees slot)
//!                           │        │ cleared? ──── yes ─► count resubmit (bounded)
//!                           │        ▼
//!                           │   wait ready (bounded) ── not ready ─┐
//!                           │        ▼                             │
//!                           │   transmit                           │
//!                           │        ▼                             │
//!                           └── wait on slot (bounded) ◄───────────┘
//! ```
//!
//! Every pass that finds the connection ready transmits again, so a request
//! the service dropped is repeated once per response wait. Duplicate answers
//! are discarded by the slot.

use std::time::Duration;
use tracing::{debug, error, warn};

use crate::connection::ConnectionStateMachine;
use crate::error::PacemakerError;
use crate::message::HeartbeatMessage;
use crate::slots::{SlotLease, SlotPool, SlotState};

#[derive(Debug, Clone)]
pub struct CorrelatorConfig {
    pub capacity: usize,
    pub response_wait: Duration,
    pub ready_wait: Duration,
    pub max_resubmits: u32,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            response_wait: Duration::from_millis(1000),
            ready_wait: Duration::from_millis(1000),
            max_resubmits: 5,
        }
    }
}

pub struct Correlator {
    pool: SlotPool,
    config: CorrelatorConfig,
}

impl Correlator {
    pub fn new(config: CorrelatorConfig) -> Self {
        Self {
            pool: SlotPool::new(config.capacity),
            config,
        }
    }

    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    /// Requests currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.pool.capacity() - self.pool.available()
    }

    /// Send `request` and wait for its response.
    ///
    /// Cancel safe: if the returned future is dropped, the slot is freed.
    pub async fn send(
        &self,
        mut request: HeartbeatMessage,
        link: &ConnectionStateMachine,
    ) -> Result<HeartbeatMessage, PacemakerError> {
        let lease = self.pool.acquire().await?;

        request.set_message_id(lease.index() as i32);
        lease.slot().begin();
        debug!(slot = lease.index(), "Put message in slot");

        let response = self.exchange(&lease, &request, link).await?;
        debug!(slot = lease.index(), len = response.body().len(), "Got response");
        Ok(response)
    }

    async fn exchange(
        &self,
        lease: &SlotLease<'_>,
        request: &HeartbeatMessage,
        link: &ConnectionStateMachine,
    ) -> Result<HeartbeatMessage, PacemakerError> {
        let index = lease.index();
        let slot = lease.slot();
        let mut resubmits: u32 = 0;

        loop {
            match slot.take() {
                SlotState::Answered(response) => return Ok(response),
                SlotState::Pending => {}
                SlotState::Cleared | SlotState::Vacant => {
                    resubmits += 1;
                    if resubmits > self.config.max_resubmits {
                        warn!(slot = index, resubmits = resubmits, "Giving up on request");
                        return Err(PacemakerError::ConnectionLost {
                            slot: index,
                            resubmits: resubmits - 1,
                        });
                    }
                    debug!(slot = index, resubmits = resubmits, "Connection torn down, resubmitting");
                }
            }

            if link.is_shutdown() {
                return Err(PacemakerError::Shutdown);
            }

            let connection = match link.wait_until_ready(self.config.ready_wait).await {
                Ok(connection) => connection,
                Err(e) if e.is_transient() => {
                    debug!(slot = index, error = %e, "Connection not ready");
                    continue;
                }
                Err(e) => return Err(e),
            };

            if let Err(e) = connection.send(request.clone()).await {
                error!(slot = index, connection_id = connection.id(), error = %e, "Error attempting to write to connection");
            }

            // Timing out here is normal: the loop re-checks the slot.
            let _ = tokio::time::timeout(self.config.response_wait, slot.woken()).await;
        }
    }

    /// Route a response to the slot named by its correlation id.
    ///
    /// Returns the slot index on success. Out-of-range ids and ids with no
    /// pending request are rejected without touching any slot.
    pub fn deliver(&self, response: HeartbeatMessage) -> Result<usize, PacemakerError> {
        let id = response.message_id();
        let (index, slot) = usize::try_from(id)
            .ok()
            .and_then(|i| self.pool.get(i).map(|slot| (i, slot)))
            .ok_or(PacemakerError::BadCorrelationId(id))?;

        if slot.answer(response) {
            Ok(index)
        } else {
            Err(PacemakerError::UnknownResponse(id))
        }
    }

    /// Mark every in-flight request as torn down and wake its sender.
    /// Slots stay leased to their senders.
    pub fn clear_in_flight(&self) -> usize {
        let cleared = self.pool.iter().filter(|slot| slot.clear()).count();
        if cleared > 0 {
            debug!(cleared = cleared, "Cleared in-flight requests");
        }
        cleared
    }

    /// Wake every sender and refuse new slot acquisitions.
    pub fn shutdown(&self) {
        self.pool.close();
        for slot in self.pool.iter() {
            slot.nudge();
        }
    }

    #[cfg(test)]
    pub(crate) fn is_vacant(&self, index: usize) -> bool {
        self.pool.get(index).is_some_and(|slot| slot.is_vacant())
    }
}
