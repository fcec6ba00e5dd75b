//! Incoming-call admission
//!
//! A push notification can make the platform show an incoming call before
//! the engine has delivered the call object. When the user answers from the
//! native UI in that window, the answer handler parks here until the engine
//! catches up or the bounded wait runs out.
//!
//! Only one waiter is held at a time. A newer waiter supersedes an older one,
//! and a signal that arrives after its waiter gave up finds an empty slot.
//! A cancel that arrives before its waiter parks is kept until that waiter
//! shows up.

use crate::error::{CallControlError, CallControlResult};
use crate::registry::CallRegistry;
use crate::types::{CallUuid, EngineCallId, IncomingCallHandle};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wake {
    Delivered,
    Cancelled,
}

#[derive(Debug)]
struct Waiter {
    call_uuid: CallUuid,
    ticket: u64,
    wake: oneshot::Sender<Wake>,
}

#[derive(Debug, Default)]
struct Slot {
    waiter: Option<Waiter>,
    cancelled: HashSet<CallUuid>,
}

/// Single-slot bounded wait for engine-delivered incoming calls
#[derive(Debug)]
pub struct IncomingCallAdmission {
    registry: Arc<CallRegistry>,
    timeout: Duration,
    slot: Mutex<Slot>,
    next_ticket: AtomicU64,
}

impl IncomingCallAdmission {
    /// Create an admission gate over the registry
    pub fn new(registry: Arc<CallRegistry>, timeout: Duration) -> Self {
        Self {
            registry,
            timeout,
            slot: Mutex::new(Slot::default()),
            next_ticket: AtomicU64::new(0),
        }
    }

    /// Configured bound on the wait
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether a waiter is parked
    #[must_use]
    pub fn has_waiter(&self) -> bool {
        self.slot.lock().waiter.is_some()
    }

    /// Resolve the incoming call for `call_uuid`, waiting for the engine if needed
    ///
    /// # Errors
    ///
    /// Returns `NoIncomingCallFound` if the engine does not deliver the call
    /// within the timeout, or if a newer waiter takes the slot, and
    /// `StaleTransaction` if the caller hung up before the engine delivered.
    #[tracing::instrument(skip(self), fields(call_id = %call_uuid))]
    pub async fn wait_for_incoming(
        &self,
        call_uuid: CallUuid,
    ) -> CallControlResult<IncomingCallHandle> {
        if let Some(call) = self.registry.get_incoming(&call_uuid) {
            return Ok(call);
        }

        let (wake, woken) = oneshot::channel();
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let superseded = {
            let mut slot = self.slot.lock();
            if slot.cancelled.remove(&call_uuid) {
                tracing::info!("Caller hung up before the answer arrived");
                return Err(CallControlError::StaleTransaction(call_uuid));
            }
            slot.waiter.replace(Waiter {
                call_uuid,
                ticket,
                wake,
            })
        };
        if let Some(previous) = superseded {
            tracing::warn!(
                superseded = %previous.call_uuid,
                "Replacing pending incoming-call waiter"
            );
        }

        // The engine may have delivered between the first lookup and parking.
        if let Some(call) = self.registry.get_incoming(&call_uuid) {
            self.release(ticket);
            return Ok(call);
        }

        tracing::debug!(timeout = ?self.timeout, "Waiting for engine to deliver incoming call");
        let outcome = tokio::time::timeout(self.timeout, woken).await;
        self.release(ticket);

        match outcome {
            Ok(Ok(Wake::Delivered)) => self
                .registry
                .get_incoming(&call_uuid)
                .ok_or(CallControlError::NoIncomingCallFound(call_uuid)),
            Ok(Ok(Wake::Cancelled)) => {
                tracing::info!("Caller hung up while the answer was waiting");
                Err(CallControlError::StaleTransaction(call_uuid))
            }
            Ok(Err(_)) => {
                tracing::warn!("Incoming-call waiter was superseded");
                Err(CallControlError::NoIncomingCallFound(call_uuid))
            }
            Err(_) => {
                tracing::warn!("Timed out waiting for incoming call");
                Err(CallControlError::NoIncomingCallFound(call_uuid))
            }
        }
    }

    /// Wake the waiter parked on `call_id`
    ///
    /// Call this after the incoming call is in the registry. Returns `true`
    /// if a waiter was woken.
    pub fn signal(&self, call_id: &EngineCallId) -> bool {
        let mut slot = self.slot.lock();
        let matches = slot
            .waiter
            .as_ref()
            .is_some_and(|w| EngineCallId::from(w.call_uuid) == *call_id);
        if !matches {
            return false;
        }
        slot.waiter
            .take()
            .is_some_and(|w| w.wake.send(Wake::Delivered).is_ok())
    }

    /// Fail the wait for `call_uuid` because the caller hung up
    ///
    /// Only call this while an answer or decline for the call is in flight:
    /// when no waiter is parked yet, the cancel is held for the next one.
    /// Returns `true` if a parked waiter was released.
    pub fn cancel(&self, call_uuid: CallUuid) -> bool {
        let mut slot = self.slot.lock();
        if slot.waiter.as_ref().is_some_and(|w| w.call_uuid == call_uuid) {
            return slot
                .waiter
                .take()
                .is_some_and(|w| w.wake.send(Wake::Cancelled).is_ok());
        }
        slot.cancelled.insert(call_uuid);
        false
    }

    /// Whether a cancel for `call_uuid` is held for a waiter that has not parked yet
    #[must_use]
    pub fn is_cancelled(&self, call_uuid: &CallUuid) -> bool {
        self.slot.lock().cancelled.contains(call_uuid)
    }

    fn release(&self, ticket: u64) {
        let mut slot = self.slot.lock();
        if slot.waiter.as_ref().is_some_and(|w| w.ticket == ticket) {
            slot.waiter.take();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::identity::Participant;

    fn incoming(uuid: CallUuid) -> IncomingCallHandle {
        IncomingCallHandle::new(
            EngineCallId::from(uuid),
            Participant::new("8:acs:caller"),
            None,
            false,
        )
    }

    #[tokio::test]
    async fn test_already_delivered() {
        let registry = Arc::new(CallRegistry::new());
        let admission = IncomingCallAdmission::new(registry.clone(), Duration::from_secs(10));
        let uuid = CallUuid::new();
        registry.add_incoming(incoming(uuid));

        let call = admission.wait_for_incoming(uuid).await.unwrap();
        assert_eq!(call.id, EngineCallId::from(uuid));
        assert!(!admission.has_waiter());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivered_while_waiting() {
        let registry = Arc::new(CallRegistry::new());
        let admission = Arc::new(IncomingCallAdmission::new(
            registry.clone(),
            Duration::from_secs(10),
        ));
        let uuid = CallUuid::new();

        let waiter = {
            let admission = admission.clone();
            tokio::spawn(async move { admission.wait_for_incoming(uuid).await })
        };
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(admission.has_waiter());

        registry.add_incoming(incoming(uuid));
        assert!(admission.signal(&EngineCallId::from(uuid)));

        assert!(waiter.await.unwrap().is_ok());
        assert!(!admission.has_waiter());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_then_late_signal() {
        let registry = Arc::new(CallRegistry::new());
        let admission = IncomingCallAdmission::new(registry.clone(), Duration::from_secs(10));
        let uuid = CallUuid::new();

        let result = admission.wait_for_incoming(uuid).await;
        assert_eq!(result, Err(CallControlError::NoIncomingCallFound(uuid)));
        assert!(!admission.has_waiter());

        registry.add_incoming(incoming(uuid));
        assert!(!admission.signal(&EngineCallId::from(uuid)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_for_other_call_is_ignored() {
        let registry = Arc::new(CallRegistry::new());
        let admission = Arc::new(IncomingCallAdmission::new(
            registry.clone(),
            Duration::from_secs(1),
        ));
        let uuid = CallUuid::new();
        let waiter = {
            let admission = admission.clone();
            tokio::spawn(async move { admission.wait_for_incoming(uuid).await })
        };
        tokio::task::yield_now().await;

        assert!(!admission.signal(&EngineCallId::from(CallUuid::new())));
        assert!(waiter.await.unwrap().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_releases_waiter_early() {
        let registry = Arc::new(CallRegistry::new());
        let admission = Arc::new(IncomingCallAdmission::new(
            registry.clone(),
            Duration::from_secs(10),
        ));
        let uuid = CallUuid::new();
        let started = tokio::time::Instant::now();

        let waiter = {
            let admission = admission.clone();
            tokio::spawn(async move { admission.wait_for_incoming(uuid).await })
        };
        tokio::task::yield_now().await;
        assert!(admission.has_waiter());

        assert!(admission.cancel(uuid));
        assert_eq!(
            waiter.await.unwrap(),
            Err(CallControlError::StaleTransaction(uuid))
        );
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!admission.has_waiter());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_waiter_parks() {
        let registry = Arc::new(CallRegistry::new());
        let admission = IncomingCallAdmission::new(registry, Duration::from_secs(10));
        let uuid = CallUuid::new();
        let started = tokio::time::Instant::now();

        assert!(!admission.cancel(uuid));
        assert!(admission.is_cancelled(&uuid));
        assert_eq!(
            admission.wait_for_incoming(uuid).await,
            Err(CallControlError::StaleTransaction(uuid))
        );
        assert!(started.elapsed() < Duration::from_secs(1));

        // The held cancel was consumed.
        assert_eq!(
            admission.wait_for_incoming(uuid).await,
            Err(CallControlError::NoIncomingCallFound(uuid))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_matches_upper_case_engine_id() {
        let registry = Arc::new(CallRegistry::new());
        let admission = Arc::new(IncomingCallAdmission::new(
            registry.clone(),
            Duration::from_secs(10),
        ));
        let uuid = CallUuid::new();
        let waiter = {
            let admission = admission.clone();
            tokio::spawn(async move { admission.wait_for_incoming(uuid).await })
        };
        tokio::task::yield_now().await;

        let upper = EngineCallId::new(uuid.to_string().to_uppercase());
        registry.add_incoming(IncomingCallHandle::new(
            upper.clone(),
            Participant::new("8:acs:caller"),
            None,
            false,
        ));
        assert!(admission.signal(&upper));
        assert_eq!(waiter.await.unwrap().unwrap().id.as_str(), upper.as_str());
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_waiter_supersedes() {
        let registry = Arc::new(CallRegistry::new());
        let admission = Arc::new(IncomingCallAdmission::new(
            registry.clone(),
            Duration::from_secs(10),
        ));
        let first = CallUuid::new();
        let second = CallUuid::new();

        let first_waiter = {
            let admission = admission.clone();
            tokio::spawn(async move { admission.wait_for_incoming(first).await })
        };
        tokio::task::yield_now().await;
        let second_waiter = {
            let admission = admission.clone();
            tokio::spawn(async move { admission.wait_for_incoming(second).await })
        };
        tokio::task::yield_now().await;

        assert_eq!(
            first_waiter.await.unwrap(),
            Err(CallControlError::NoIncomingCallFound(first))
        );

        registry.add_incoming(incoming(second));
        assert!(admission.signal(&EngineCallId::from(second)));
        assert!(second_waiter.await.unwrap().is_ok());
    }
}
