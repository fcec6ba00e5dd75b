//! In-memory collaborators
//!
//! [`SimulatedEngine`] and [`SimulatedPlatform`] stand in for a real call
//! SDK and a real telephony subsystem. They record what the bridge asks of
//! them, can be told to fail, and drive the CLI demo and the integration
//! tests.

use crate::delegate::PlatformDelegateAdapter;
use crate::engine::{CallEngine, EngineError, EngineEvent};
use crate::identity::{MeetingLocator, Participant};
use crate::platform::{CallUpdate, PlatformAction, PlatformError, TelephonyPlatform};
use crate::types::{
    ActionId, CallDirection, CallOptions, CallState, CallUuid, EndReason, EngineCall,
    EngineCallId, IncomingCallHandle,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

/// Engine operations the simulation can count or fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineOperation {
    /// `place`
    Place,
    /// `join`
    Join,
    /// `accept`
    Accept,
    /// `reject`
    Reject,
    /// `end`
    End,
    /// `hold`
    Hold,
    /// `resume`
    Resume,
    /// `set_outgoing_muted`
    Mute,
    /// `start_audio`
    StartAudio,
    /// `stop_audio`
    StopAudio,
}

#[derive(Debug, Default)]
struct EngineState {
    calls: HashMap<EngineCallId, EngineCall>,
    ringing: HashSet<EngineCallId>,
    failures: HashSet<EngineOperation>,
    counts: HashMap<EngineOperation, usize>,
    audio_running: HashSet<EngineCallId>,
    options: Vec<CallOptions>,
    joined: Vec<MeetingLocator>,
}

/// In-memory call engine
#[derive(Debug)]
pub struct SimulatedEngine {
    state: Mutex<EngineState>,
    events: Option<mpsc::UnboundedSender<EngineEvent>>,
    connect_on_place: bool,
    operation_delay: Duration,
    hold_gate: Option<Arc<Notify>>,
    announce_removal_on_end: bool,
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedEngine {
    /// Engine whose events are only returned, never sent
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EngineState::default()),
            events: None,
            connect_on_place: false,
            operation_delay: Duration::ZERO,
            hold_gate: None,
            announce_removal_on_end: false,
        }
    }

    /// Engine that also sends its events on a channel
    #[must_use]
    pub fn with_events() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = Self {
            events: Some(tx),
            ..Self::new()
        };
        (engine, rx)
    }

    /// Outbound calls come back already connected
    #[must_use]
    pub fn connect_on_place(mut self) -> Self {
        self.connect_on_place = true;
        self
    }

    /// Every engine operation takes this long
    #[must_use]
    pub fn with_operation_delay(mut self, delay: Duration) -> Self {
        self.operation_delay = delay;
        self
    }

    /// `end` announces the removal on the event channel before it returns
    #[must_use]
    pub fn announce_removal_on_end(mut self) -> Self {
        self.announce_removal_on_end = true;
        self
    }

    /// Hold and resume block until the returned gate is notified
    pub fn gate_holds(&mut self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.hold_gate = Some(gate.clone());
        gate
    }

    /// Make the next call of `op` fail
    pub fn fail_next(&self, op: EngineOperation) {
        self.state.lock().failures.insert(op);
    }

    /// How often `op` was invoked
    #[must_use]
    pub fn count(&self, op: EngineOperation) -> usize {
        self.state.lock().counts.get(&op).copied().unwrap_or(0)
    }

    /// Whether local media runs for a call
    #[must_use]
    pub fn is_audio_running(&self, call_id: &EngineCallId) -> bool {
        self.state.lock().audio_running.contains(call_id)
    }

    /// Whether any local media runs
    #[must_use]
    pub fn any_audio_running(&self) -> bool {
        !self.state.lock().audio_running.is_empty()
    }

    /// Options passed to the most recent place, join or accept
    #[must_use]
    pub fn last_options(&self) -> Option<CallOptions> {
        self.state.lock().options.last().cloned()
    }

    /// Meetings joined so far
    #[must_use]
    pub fn joined(&self) -> Vec<MeetingLocator> {
        self.state.lock().joined.clone()
    }

    /// Current engine view of a call
    #[must_use]
    pub fn call(&self, call_id: &EngineCallId) -> Option<EngineCall> {
        self.state.lock().calls.get(call_id).cloned()
    }

    /// A remote party rings; returns the event announcing it
    pub fn ring(
        &self,
        call_uuid: CallUuid,
        caller: Participant,
        display_name: Option<String>,
        video: bool,
    ) -> EngineEvent {
        self.ring_with_id(EngineCallId::from(call_uuid), caller, display_name, video)
    }

    /// A remote party rings on a call id spelled the way the engine chose
    pub fn ring_with_id(
        &self,
        call_id: EngineCallId,
        caller: Participant,
        display_name: Option<String>,
        video: bool,
    ) -> EngineEvent {
        let call = IncomingCallHandle::new(call_id, caller, display_name, video);
        self.state.lock().ringing.insert(call.id.clone());
        self.send(EngineEvent::IncomingCallReceived { call })
    }

    /// The remote party gave up before the call was answered
    pub fn stop_ringing(&self, call_id: &EngineCallId) -> EngineEvent {
        self.state.lock().ringing.remove(call_id);
        self.send(EngineEvent::IncomingCallEnded {
            call_id: call_id.clone(),
        })
    }

    /// Move a call to `state`
    pub fn set_state(&self, call_id: &EngineCallId, state: CallState) -> EngineEvent {
        if let Some(call) = self.state.lock().calls.get_mut(call_id) {
            call.state = state;
        }
        self.send(EngineEvent::CallStateChanged {
            call_id: call_id.clone(),
            state,
        })
    }

    /// The remote party hung up
    pub fn hang_up_remote(&self, call_id: &EngineCallId) -> EngineEvent {
        {
            let mut state = self.state.lock();
            state.calls.remove(call_id);
            state.audio_running.remove(call_id);
        }
        self.send(EngineEvent::CallsUpdated {
            added: Vec::new(),
            removed: vec![call_id.clone()],
        })
    }

    fn send(&self, event: EngineEvent) -> EngineEvent {
        if let Some(tx) = &self.events {
            let _ = tx.send(event.clone());
        }
        event
    }

    async fn begin(&self, op: EngineOperation) -> Result<(), EngineError> {
        if !self.operation_delay.is_zero() {
            tokio::time::sleep(self.operation_delay).await;
        }
        let mut state = self.state.lock();
        *state.counts.entry(op).or_insert(0) += 1;
        if state.failures.remove(&op) {
            return Err(EngineError::Failed(format!("simulated {op:?} failure")));
        }
        Ok(())
    }

    fn new_call(&self, options: &CallOptions) -> EngineCall {
        let call = EngineCall {
            id: EngineCallId::new(format!("sim-{}", CallUuid::new())),
            direction: CallDirection::Outgoing,
            state: if self.connect_on_place {
                CallState::Connected
            } else {
                CallState::Connecting
            },
        };
        let mut state = self.state.lock();
        state.options.push(options.clone());
        state.calls.insert(call.id.clone(), call.clone());
        call
    }

    fn update(&self, call_id: &EngineCallId, state: CallState) -> Result<(), EngineError> {
        match self.state.lock().calls.get_mut(call_id) {
            Some(call) => {
                call.state = state;
                Ok(())
            }
            None => Err(EngineError::CallNotFound(call_id.to_string())),
        }
    }

    fn require(&self, call_id: &EngineCallId) -> Result<(), EngineError> {
        if self.state.lock().calls.contains_key(call_id) {
            Ok(())
        } else {
            Err(EngineError::CallNotFound(call_id.to_string()))
        }
    }

    async fn wait_for_gate(&self) {
        if let Some(gate) = &self.hold_gate {
            gate.notified().await;
        }
    }
}

#[async_trait]
impl CallEngine for SimulatedEngine {
    async fn place(
        &self,
        participants: &[Participant],
        options: &CallOptions,
    ) -> Result<EngineCall, EngineError> {
        self.begin(EngineOperation::Place).await?;
        if participants.is_empty() {
            return Err(EngineError::Failed("no participants".to_string()));
        }
        Ok(self.new_call(options))
    }

    async fn join(
        &self,
        locator: &MeetingLocator,
        options: &CallOptions,
    ) -> Result<EngineCall, EngineError> {
        self.begin(EngineOperation::Join).await?;
        self.state.lock().joined.push(locator.clone());
        Ok(self.new_call(options))
    }

    async fn accept(
        &self,
        call_id: &EngineCallId,
        options: &CallOptions,
    ) -> Result<EngineCall, EngineError> {
        self.begin(EngineOperation::Accept).await?;
        let mut state = self.state.lock();
        if !state.ringing.remove(call_id) {
            return Err(EngineError::CallNotFound(call_id.to_string()));
        }
        let call = EngineCall {
            id: call_id.clone(),
            direction: CallDirection::Incoming,
            state: CallState::Connected,
        };
        state.options.push(options.clone());
        state.calls.insert(call_id.clone(), call.clone());
        Ok(call)
    }

    async fn reject(&self, call_id: &EngineCallId) -> Result<(), EngineError> {
        self.begin(EngineOperation::Reject).await?;
        if self.state.lock().ringing.remove(call_id) {
            Ok(())
        } else {
            Err(EngineError::CallNotFound(call_id.to_string()))
        }
    }

    async fn end(&self, call_id: &EngineCallId) -> Result<(), EngineError> {
        self.begin(EngineOperation::End).await?;
        if self.announce_removal_on_end && self.events.is_some() {
            self.send(EngineEvent::CallsUpdated {
                added: Vec::new(),
                removed: vec![call_id.clone()],
            });
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let mut state = self.state.lock();
        state.audio_running.remove(call_id);
        state
            .calls
            .remove(call_id)
            .map(|_| ())
            .ok_or_else(|| EngineError::CallNotFound(call_id.to_string()))
    }

    async fn hold(&self, call_id: &EngineCallId) -> Result<(), EngineError> {
        self.begin(EngineOperation::Hold).await?;
        self.wait_for_gate().await;
        self.update(call_id, CallState::Held)
    }

    async fn resume(&self, call_id: &EngineCallId) -> Result<(), EngineError> {
        self.begin(EngineOperation::Resume).await?;
        self.wait_for_gate().await;
        self.update(call_id, CallState::Connected)
    }

    async fn set_outgoing_muted(
        &self,
        call_id: &EngineCallId,
        _muted: bool,
    ) -> Result<(), EngineError> {
        self.begin(EngineOperation::Mute).await?;
        self.require(call_id)
    }

    async fn start_audio(&self, call_id: &EngineCallId) -> Result<(), EngineError> {
        self.begin(EngineOperation::StartAudio).await?;
        self.state.lock().audio_running.insert(call_id.clone());
        Ok(())
    }

    async fn stop_audio(&self, call_id: &EngineCallId) -> Result<(), EngineError> {
        self.begin(EngineOperation::StopAudio).await?;
        self.state.lock().audio_running.remove(call_id);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct PlatformState {
    deny_next: Option<PlatformError>,
    refuse_reports: bool,
    requested: Vec<PlatformAction>,
    fulfilled: Vec<ActionId>,
    failed: Vec<ActionId>,
    reported_incoming: Vec<(CallUuid, CallUpdate)>,
    connecting: Vec<CallUuid>,
    connected: Vec<CallUuid>,
    ended: Vec<(CallUuid, EndReason)>,
}

/// In-memory telephony platform
///
/// Granted actions are forwarded on a channel; feed them to the delegate
/// with [`spawn_action_pump`].
#[derive(Debug)]
pub struct SimulatedPlatform {
    state: Mutex<PlatformState>,
    actions: mpsc::UnboundedSender<PlatformAction>,
}

impl SimulatedPlatform {
    /// Create a platform and the receiver of the actions it grants
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PlatformAction>) {
        let (actions, rx) = mpsc::unbounded_channel();
        let platform = Self {
            state: Mutex::new(PlatformState::default()),
            actions,
        };
        (platform, rx)
    }

    /// Deny the next requested transaction
    pub fn deny_next(&self, error: PlatformError) {
        self.state.lock().deny_next = Some(error);
    }

    /// Refuse to show incoming calls
    pub fn refuse_incoming_reports(&self, refuse: bool) {
        self.state.lock().refuse_reports = refuse;
    }

    /// Every transaction requested so far
    #[must_use]
    pub fn requested(&self) -> Vec<PlatformAction> {
        self.state.lock().requested.clone()
    }

    /// Actions reported as performed
    #[must_use]
    pub fn fulfilled(&self) -> Vec<ActionId> {
        self.state.lock().fulfilled.clone()
    }

    /// Actions reported as failed
    #[must_use]
    pub fn failed(&self) -> Vec<ActionId> {
        self.state.lock().failed.clone()
    }

    /// Incoming calls shown in the native UI
    #[must_use]
    pub fn reported_incoming(&self) -> Vec<(CallUuid, CallUpdate)> {
        self.state.lock().reported_incoming.clone()
    }

    /// Outbound calls reported as connecting
    #[must_use]
    pub fn connecting(&self) -> Vec<CallUuid> {
        self.state.lock().connecting.clone()
    }

    /// Outbound calls reported as connected
    #[must_use]
    pub fn connected(&self) -> Vec<CallUuid> {
        self.state.lock().connected.clone()
    }

    /// Calls reported as ended without a local end action
    #[must_use]
    pub fn ended(&self) -> Vec<(CallUuid, EndReason)> {
        self.state.lock().ended.clone()
    }
}

#[async_trait]
impl TelephonyPlatform for SimulatedPlatform {
    async fn request_transaction(&self, action: &PlatformAction) -> Result<(), PlatformError> {
        {
            let mut state = self.state.lock();
            state.requested.push(action.clone());
            if let Some(error) = state.deny_next.take() {
                return Err(error);
            }
        }
        self.actions
            .send(action.clone())
            .map_err(|_| PlatformError::Denied("platform is shut down".to_string()))
    }

    async fn report_new_incoming_call(
        &self,
        call_uuid: CallUuid,
        update: CallUpdate,
    ) -> Result<(), PlatformError> {
        let mut state = self.state.lock();
        if state.refuse_reports {
            return Err(PlatformError::Denied("incoming calls blocked".to_string()));
        }
        state.reported_incoming.push((call_uuid, update));
        Ok(())
    }

    fn report_outgoing_connecting(&self, call_uuid: CallUuid) {
        self.state.lock().connecting.push(call_uuid);
    }

    fn report_outgoing_connected(&self, call_uuid: CallUuid) {
        self.state.lock().connected.push(call_uuid);
    }

    fn report_call_ended(&self, call_uuid: CallUuid, reason: EndReason) {
        self.state.lock().ended.push((call_uuid, reason));
    }

    fn fulfill_action(&self, action_id: ActionId) {
        self.state.lock().fulfilled.push(action_id);
    }

    fn fail_action(&self, action_id: ActionId) {
        self.state.lock().failed.push(action_id);
    }
}

/// Perform every granted action on the delegate, each on its own task
pub fn spawn_action_pump(
    delegate: Arc<PlatformDelegateAdapter>,
    mut actions: mpsc::UnboundedReceiver<PlatformAction>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(action) = actions.recv().await {
            let delegate = delegate.clone();
            tokio::spawn(async move { delegate.perform_action(action).await });
        }
    })
}
