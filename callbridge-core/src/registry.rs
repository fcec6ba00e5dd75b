//! Call registry
//!
//! Shared store of incoming calls, active calls, pending transactions and id
//! correlations. Push delivery, engine callbacks and platform callbacks all
//! touch it concurrently, so every operation runs under one lock and
//! completes before the next starts. The lock is never held across an
//! `.await`.

use crate::error::CallControlResult;
use crate::types::{
    ActionId, ActionKind, CallHandle, CallUuid, EngineCallId, IncomingCallHandle,
    TransactionRequest,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tokio::sync::oneshot;

/// Registry errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Another call is already active
    #[error("Call {0} is already active")]
    CallAlreadyActive(CallUuid),
}

/// Result delivered to whoever requested a transaction
pub type TransactionOutcome = CallControlResult<Option<CallHandle>>;

/// A platform action waiting to be performed
#[derive(Debug)]
pub struct TransactionRecord {
    /// Platform action id
    pub action_id: ActionId,
    /// Reported id of the target call
    pub call_uuid: CallUuid,
    /// Original request parameters
    pub request: TransactionRequest,
    /// When the transaction was dispatched
    pub created_at: DateTime<Utc>,
    completion: oneshot::Sender<TransactionOutcome>,
}

impl TransactionRecord {
    /// Create a record and the receiver its completion is delivered to
    pub fn new(
        action_id: ActionId,
        call_uuid: CallUuid,
        request: TransactionRequest,
    ) -> (Self, oneshot::Receiver<TransactionOutcome>) {
        let (completion, rx) = oneshot::channel();
        let record = Self {
            action_id,
            call_uuid,
            request,
            created_at: Utc::now(),
            completion,
        };
        (record, rx)
    }

    /// Action kind
    pub fn kind(&self) -> ActionKind {
        self.request.kind()
    }

    /// Deliver the outcome to the caller
    ///
    /// Consumes the record, so a completion can fire at most once.
    pub fn complete(self, outcome: TransactionOutcome) {
        let action_id = self.action_id;
        if self.completion.send(outcome).is_err() {
            tracing::debug!(action_id = %action_id, "Transaction caller went away before completion");
        }
    }
}

/// Counts of what the registry currently tracks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistrySnapshot {
    /// Incoming calls not yet accepted
    pub incoming_calls: usize,
    /// Active calls
    pub active_calls: usize,
    /// Pending transactions
    pub transactions: usize,
    /// Reported-to-engine id correlations
    pub correlations: usize,
}

#[derive(Debug, Default)]
struct RegistryState {
    incoming: HashMap<EngineCallId, IncomingCallHandle>,
    calls: HashMap<EngineCallId, CallHandle>,
    transactions: HashMap<ActionId, TransactionRecord>,
    correlations: HashMap<CallUuid, EngineCallId>,
    reported: HashSet<CallUuid>,
}

impl RegistryState {
    fn resolve(&self, id: &CallUuid) -> EngineCallId {
        self.correlations
            .get(id)
            .cloned()
            .unwrap_or_else(|| EngineCallId::from(*id))
    }

    fn remove_call(&mut self, engine_id: &EngineCallId) -> Option<CallHandle> {
        let handle = self.calls.remove(engine_id)?;
        self.correlations.retain(|_, e| e != engine_id);
        self.reported.remove(&handle.reported_id);
        Some(handle)
    }
}

/// Serialized store shared by every component of the bridge
#[derive(Debug, Default)]
pub struct CallRegistry {
    state: Mutex<RegistryState>,
}

impl CallRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    // --- id correlation ---

    /// Map a reported id to an engine id
    ///
    /// Returns `false` when no active call has that engine id, since a
    /// correlation may only exist alongside its call.
    pub fn correlate(&self, reported: CallUuid, engine_id: EngineCallId) -> bool {
        let mut state = self.state.lock();
        if !state.calls.contains_key(&engine_id) {
            return false;
        }
        tracing::debug!(reported = %reported, engine_id = %engine_id, "Correlated call ids");
        state.correlations.insert(reported, engine_id);
        true
    }

    /// Engine id a reported id resolves to, if any call or incoming call uses it
    #[must_use]
    pub fn resolve(&self, reported: &CallUuid) -> Option<EngineCallId> {
        let state = self.state.lock();
        let engine_id = state.resolve(reported);
        (state.calls.contains_key(&engine_id) || state.incoming.contains_key(&engine_id))
            .then_some(engine_id)
    }

    /// Re-key a call whose engine id changed
    pub fn rekey_call(&self, old_id: &EngineCallId, new_id: EngineCallId) -> Option<CallHandle> {
        let mut state = self.state.lock();
        let mut handle = state.calls.remove(old_id)?;
        handle.engine_id = new_id.clone();
        for engine_id in state.correlations.values_mut() {
            if engine_id == old_id {
                *engine_id = new_id.clone();
            }
        }
        state.correlations.insert(handle.reported_id, new_id.clone());
        state.calls.insert(new_id, handle.clone());
        Some(handle)
    }

    // --- active calls ---

    /// Track a call the engine confirmed and correlate its reported id
    ///
    /// # Errors
    ///
    /// Returns error if a different call is already active
    pub fn insert_call(&self, handle: CallHandle) -> Result<(), RegistryError> {
        let mut state = self.state.lock();
        if let Some(existing) = state
            .calls
            .values()
            .find(|c| c.engine_id != handle.engine_id && c.state.is_live())
        {
            return Err(RegistryError::CallAlreadyActive(existing.reported_id));
        }
        state
            .correlations
            .insert(handle.reported_id, handle.engine_id.clone());
        state.calls.insert(handle.engine_id.clone(), handle);
        Ok(())
    }

    /// Move an incoming call to the active set
    ///
    /// # Errors
    ///
    /// Returns error if a different call is already active
    pub fn promote_incoming(&self, handle: CallHandle) -> Result<(), RegistryError> {
        let mut state = self.state.lock();
        if let Some(existing) = state
            .calls
            .values()
            .find(|c| c.engine_id != handle.engine_id && c.state.is_live())
        {
            return Err(RegistryError::CallAlreadyActive(existing.reported_id));
        }
        let incoming_id = EngineCallId::from(handle.reported_id);
        state.incoming.remove(&incoming_id);
        state.incoming.remove(&handle.engine_id);
        state
            .correlations
            .insert(handle.reported_id, handle.engine_id.clone());
        state.calls.insert(handle.engine_id.clone(), handle);
        Ok(())
    }

    /// Look up an active call by reported id
    #[must_use]
    pub fn get_call(&self, reported: &CallUuid) -> Option<CallHandle> {
        let state = self.state.lock();
        let engine_id = state.resolve(reported);
        state.calls.get(&engine_id).cloned()
    }

    /// Look up an active call by engine id
    #[must_use]
    pub fn get_call_by_engine_id(&self, engine_id: &EngineCallId) -> Option<CallHandle> {
        self.state.lock().calls.get(engine_id).cloned()
    }

    /// The live call, if one is tracked
    #[must_use]
    pub fn active_call(&self) -> Option<CallHandle> {
        self.state
            .lock()
            .calls
            .values()
            .find(|c| c.state.is_live())
            .cloned()
    }

    /// Mutate an active call in place
    pub fn update_call<F>(&self, engine_id: &EngineCallId, f: F) -> Option<CallHandle>
    where
        F: FnOnce(&mut CallHandle),
    {
        let mut state = self.state.lock();
        let handle = state.calls.get_mut(engine_id)?;
        f(handle);
        Some(handle.clone())
    }

    /// Remove a call by reported id, dropping its correlations
    pub fn remove_call(&self, reported: &CallUuid) -> Option<CallHandle> {
        let mut state = self.state.lock();
        let engine_id = state.resolve(reported);
        state.remove_call(&engine_id)
    }

    /// Remove a call by engine id, dropping its correlations
    pub fn remove_call_by_engine_id(&self, engine_id: &EngineCallId) -> Option<CallHandle> {
        self.state.lock().remove_call(engine_id)
    }

    // --- incoming calls ---

    /// Track an incoming call, returning any previous entry for the same id
    pub fn add_incoming(&self, call: IncomingCallHandle) -> Option<IncomingCallHandle> {
        self.state.lock().incoming.insert(call.id.clone(), call)
    }

    /// Look up an incoming call by reported id
    #[must_use]
    pub fn get_incoming(&self, reported: &CallUuid) -> Option<IncomingCallHandle> {
        let state = self.state.lock();
        let engine_id = state.resolve(reported);
        state.incoming.get(&engine_id).cloned()
    }

    /// Remove an incoming call by engine id
    pub fn remove_incoming(&self, engine_id: &EngineCallId) -> Option<IncomingCallHandle> {
        let mut state = self.state.lock();
        let removed = state.incoming.remove(engine_id);
        if let Some(uuid) = engine_id.as_call_uuid() {
            if !state.calls.contains_key(engine_id) {
                state.reported.remove(&uuid);
            }
        }
        removed
    }

    // --- reported incoming ids ---

    /// Remember that an incoming id was shown by the platform
    ///
    /// Returns `true` if it was not already marked.
    pub fn mark_reported(&self, id: CallUuid) -> bool {
        self.state.lock().reported.insert(id)
    }

    /// Whether an incoming id was already shown by the platform
    #[must_use]
    pub fn is_reported(&self, id: &CallUuid) -> bool {
        self.state.lock().reported.contains(id)
    }

    /// Forget a reported id
    pub fn clear_reported(&self, id: &CallUuid) -> bool {
        self.state.lock().reported.remove(id)
    }

    // --- transactions ---

    /// Store a pending transaction
    pub fn add_transaction(&self, record: TransactionRecord) {
        self.state
            .lock()
            .transactions
            .insert(record.action_id, record);
    }

    /// Remove a pending transaction so its completion can fire
    pub fn take_transaction(&self, action_id: &ActionId) -> Option<TransactionRecord> {
        self.state.lock().transactions.remove(action_id)
    }

    /// Request parameters of a pending transaction, leaving it in place
    #[must_use]
    pub fn transaction_request(&self, action_id: &ActionId) -> Option<TransactionRequest> {
        self.state
            .lock()
            .transactions
            .get(action_id)
            .map(|r| r.request.clone())
    }

    /// Whether a transaction is still pending
    #[must_use]
    pub fn has_transaction(&self, action_id: &ActionId) -> bool {
        self.state.lock().transactions.contains_key(action_id)
    }

    /// Remove every pending transaction on a call, except `keep`
    pub fn take_transactions_for_call(
        &self,
        call_uuid: &CallUuid,
        keep: Option<ActionId>,
    ) -> Vec<TransactionRecord> {
        self.take_transactions_where(|r| r.call_uuid == *call_uuid && Some(r.action_id) != keep)
    }

    /// Whether a transaction of `kind` on a call is pending
    #[must_use]
    pub fn has_transaction_for_call(&self, call_uuid: &CallUuid, kind: ActionKind) -> bool {
        self.state
            .lock()
            .transactions
            .values()
            .any(|r| r.call_uuid == *call_uuid && r.kind() == kind)
    }

    /// Remove every pending transaction matching `predicate`
    pub fn take_transactions_where<F>(&self, predicate: F) -> Vec<TransactionRecord>
    where
        F: Fn(&TransactionRecord) -> bool,
    {
        let mut state = self.state.lock();
        let ids: Vec<ActionId> = state
            .transactions
            .values()
            .filter(|r| predicate(*r))
            .map(|r| r.action_id)
            .collect();
        ids.iter()
            .filter_map(|id| state.transactions.remove(id))
            .collect()
    }

    /// Remove every pending transaction
    pub fn take_all_transactions(&self) -> Vec<TransactionRecord> {
        self.state
            .lock()
            .transactions
            .drain()
            .map(|(_, record)| record)
            .collect()
    }

    // --- whole registry ---

    /// Remove every call and incoming call
    pub fn drain_calls(&self) -> (Vec<CallHandle>, Vec<IncomingCallHandle>) {
        let mut state = self.state.lock();
        state.correlations.clear();
        state.reported.clear();
        let calls = state.calls.drain().map(|(_, c)| c).collect();
        let incoming = state.incoming.drain().map(|(_, c)| c).collect();
        (calls, incoming)
    }

    /// Current counts
    #[must_use]
    pub fn snapshot(&self) -> RegistrySnapshot {
        let state = self.state.lock();
        RegistrySnapshot {
            incoming_calls: state.incoming.len(),
            active_calls: state.calls.len(),
            transactions: state.transactions.len(),
            correlations: state.correlations.len(),
        }
    }
}
