//! Call-control service orchestration
//!
//! [`CallControlService`] wires the registry, dispatcher, delegate,
//! admission gate and audio coordinator around one engine and one platform.
//! It is the single composition point: build it once and hand out the
//! delegate to whatever forwards platform callbacks.

use crate::admission::IncomingCallAdmission;
use crate::audio::AudioSessionCoordinator;
use crate::config::{CallControlConfig, ConfigError};
use crate::delegate::PlatformDelegateAdapter;
use crate::dispatcher::TransactionDispatcher;
use crate::engine::{CallEngine, EngineEvent};
use crate::error::{CallControlError, CallControlResult};
use crate::identity::CallTarget;
use crate::platform::{CallUpdate, TelephonyPlatform};
use crate::push::PushNotificationInfo;
use crate::registry::CallRegistry;
use crate::types::{
    ActionKind, BridgeEvent, CallDirection, CallHandle, CallOptions, CallState, CallUuid,
    EndReason, EngineCall, EngineCallId, IncomingCallHandle,
};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// Service errors
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Initialization error
    #[error("Initialization error: {0}")]
    InitError(#[from] ConfigError),
}

/// Main call-control service
pub struct CallControlService {
    config: CallControlConfig,
    registry: Arc<CallRegistry>,
    engine: Arc<dyn CallEngine>,
    platform: Arc<dyn TelephonyPlatform>,
    dispatcher: TransactionDispatcher,
    delegate: Arc<PlatformDelegateAdapter>,
    admission: Arc<IncomingCallAdmission>,
    audio: Arc<AudioSessionCoordinator>,
    event_sender: broadcast::Sender<BridgeEvent>,
}

impl CallControlService {
    /// Create a new service
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid
    pub fn new(
        engine: Arc<dyn CallEngine>,
        platform: Arc<dyn TelephonyPlatform>,
        config: CallControlConfig,
    ) -> Result<Self, ServiceError> {
        config.validate()?;
        let (event_sender, _) = broadcast::channel(1000);

        let registry = Arc::new(CallRegistry::new());
        let admission = Arc::new(IncomingCallAdmission::new(
            registry.clone(),
            config.admission_timeout(),
        ));
        let audio = Arc::new(AudioSessionCoordinator::new(
            engine.clone(),
            registry.clone(),
            event_sender.clone(),
        ));
        let dispatcher = TransactionDispatcher::new(registry.clone(), platform.clone());
        let delegate = Arc::new(PlatformDelegateAdapter::new(
            registry.clone(),
            engine.clone(),
            platform.clone(),
            admission.clone(),
            audio.clone(),
            event_sender.clone(),
            config.default_call_options(),
        ));

        tracing::info!(
            admission_timeout_ms = config.admission_timeout_ms,
            supports_video = config.provider.supports_video,
            "Call-control service created"
        );

        Ok(Self {
            config,
            registry,
            engine,
            platform,
            dispatcher,
            delegate,
            admission,
            audio,
            event_sender,
        })
    }

    /// Create a builder
    #[must_use]
    pub fn builder(
        engine: Arc<dyn CallEngine>,
        platform: Arc<dyn TelephonyPlatform>,
    ) -> CallControlServiceBuilder {
        CallControlServiceBuilder::new(engine, platform)
    }

    /// Place an outbound call
    ///
    /// # Errors
    ///
    /// Returns error if the platform denies the call or the engine fails to place it
    #[tracing::instrument(skip(self, options), fields(target = %target.handle_value()))]
    pub async fn place_call(
        &self,
        target: CallTarget,
        options: CallOptions,
    ) -> CallControlResult<CallHandle> {
        tracing::info!("Placing call");
        let handle = self.dispatcher.place_call(target, options).await?;
        tracing::info!(call_id = %handle.reported_id, engine_id = %handle.engine_id, "Call placed");
        Ok(handle)
    }

    /// Accept an incoming call
    ///
    /// # Errors
    ///
    /// Returns error if the incoming call never arrives or cannot be accepted
    #[tracing::instrument(skip(self, options), fields(call_id = %call_id))]
    pub async fn accept_call(
        &self,
        call_id: CallUuid,
        options: CallOptions,
    ) -> CallControlResult<CallHandle> {
        tracing::info!("Accepting call");
        let handle = self.dispatcher.accept_call(call_id, options).await?;
        tracing::info!("Call accepted");
        Ok(handle)
    }

    /// End an active call or decline an incoming one
    ///
    /// # Errors
    ///
    /// Returns error if no such call exists or the engine fails to end it
    #[tracing::instrument(skip(self), fields(call_id = %call_id))]
    pub async fn end_call(&self, call_id: CallUuid) -> CallControlResult<()> {
        tracing::info!("Ending call");
        self.dispatcher.end_call(call_id).await?;
        tracing::info!("Call ended");
        Ok(())
    }

    /// Hold (`true`) or resume (`false`) a call
    ///
    /// # Errors
    ///
    /// Returns error if the call is not active or the engine fails
    #[tracing::instrument(skip(self), fields(call_id = %call_id))]
    pub async fn hold_call(&self, call_id: CallUuid, on_hold: bool) -> CallControlResult<()> {
        self.dispatcher.hold_call(call_id, on_hold).await
    }

    /// Mute (`true`) or unmute (`false`) outgoing audio
    ///
    /// # Errors
    ///
    /// Returns error if the call is not active or the engine fails
    #[tracing::instrument(skip(self), fields(call_id = %call_id))]
    pub async fn mute_call(&self, call_id: CallUuid, muted: bool) -> CallControlResult<()> {
        self.dispatcher.mute_call(call_id, muted).await
    }

    /// Handle a push notification announcing an incoming call
    ///
    /// The call is shown by the platform right away, before the engine has
    /// delivered it. Returns the announced id.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPushPayload` if the payload cannot be parsed, or
    /// `PlatformDenied` if the platform will not show the call.
    #[tracing::instrument(skip(self, payload))]
    pub async fn handle_push(&self, payload: &Value) -> CallControlResult<CallUuid> {
        let info = PushNotificationInfo::from_json(payload)?;
        let call_id = info.call_id;

        if self.registry.get_call(&call_id).is_some() {
            tracing::debug!(call_id = %call_id, "Push for a call that is already active");
            return Ok(call_id);
        }
        if !self.registry.mark_reported(call_id) {
            tracing::debug!(call_id = %call_id, "Incoming call already reported");
            return Ok(call_id);
        }

        let update = info.call_update(None);
        if let Err(e) = self.platform.report_new_incoming_call(call_id, update).await {
            tracing::warn!(call_id = %call_id, error = %e, "Platform refused pushed incoming call");
            self.registry.clear_reported(&call_id);
            return Err(CallControlError::denied(ActionKind::Answer, &e));
        }
        tracing::info!(call_id = %call_id, caller = %info.caller, "Reported pushed incoming call");
        Ok(call_id)
    }

    /// Apply an event raised by the engine
    pub async fn handle_engine_event(&self, event: EngineEvent) {
        match event {
            EngineEvent::IncomingCallReceived { call } => self.on_incoming_call(call).await,
            EngineEvent::IncomingCallEnded { call_id } => self.on_incoming_call_ended(&call_id),
            EngineEvent::CallStateChanged { call_id, state } => {
                self.on_call_state_changed(&call_id, state).await;
            }
            EngineEvent::RemoteParticipantsUpdated {
                call_id,
                added,
                removed,
            } => {
                tracing::debug!(
                    call_id = %call_id,
                    added = added.len(),
                    removed = removed.len(),
                    "Remote participants updated"
                );
                self.emit(BridgeEvent::ParticipantsUpdated {
                    call_id,
                    added,
                    removed,
                });
            }
            EngineEvent::CallsUpdated { added, removed } => {
                for call_id in removed {
                    self.on_call_removed(&call_id, EndReason::RemoteEnded).await;
                }
                for call in added {
                    self.on_call_added(call).await;
                }
            }
            EngineEvent::CallIdChanged { old_id, new_id } => {
                if self.registry.rekey_call(&old_id, new_id.clone()).is_some() {
                    self.audio.on_call_rekeyed(&old_id, &new_id);
                    tracing::debug!(old_id = %old_id, new_id = %new_id, "Engine call id changed");
                }
            }
        }
    }

    /// Pump engine events into the service until the sender is dropped
    pub fn spawn_engine_event_loop(
        self: &Arc<Self>,
        mut events: mpsc::UnboundedReceiver<EngineEvent>,
    ) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                service.handle_engine_event(event).await;
            }
            tracing::debug!("Engine event stream closed");
        })
    }

    /// Delegate that platform callbacks must be forwarded to
    #[must_use]
    pub fn delegate(&self) -> Arc<PlatformDelegateAdapter> {
        self.delegate.clone()
    }

    /// Shared call registry
    #[must_use]
    pub fn registry(&self) -> &Arc<CallRegistry> {
        &self.registry
    }

    /// Effective configuration
    #[must_use]
    pub fn config(&self) -> &CallControlConfig {
        &self.config
    }

    /// The live call, if any
    #[must_use]
    pub fn active_call(&self) -> Option<CallHandle> {
        self.registry.active_call()
    }

    /// Whether the platform currently grants the audio session
    #[must_use]
    pub fn is_audio_session_active(&self) -> bool {
        self.audio.is_session_active()
    }

    /// Subscribe to events
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<BridgeEvent> {
        self.event_sender.subscribe()
    }

    async fn on_incoming_call(&self, call: IncomingCallHandle) {
        if self.registry.get_call_by_engine_id(&call.id).is_some() {
            tracing::debug!(call_id = %call.id, "Incoming call is already active");
            return;
        }

        tracing::info!(call_id = %call.id, caller = %call.caller, "Incoming call received");
        self.registry.add_incoming(call.clone());
        if self.admission.signal(&call.id) {
            tracing::debug!(call_id = %call.id, "Woke pending answer");
        }
        self.emit(BridgeEvent::IncomingCall { call: call.clone() });

        let Some(call_uuid) = call.id.as_call_uuid() else {
            tracing::warn!(call_id = %call.id, "Incoming call id is not reportable, leaving it unannounced");
            return;
        };
        if !self.registry.mark_reported(call_uuid) {
            return;
        }

        let update = CallUpdate::from_incoming(&call);
        if let Err(e) = self
            .platform
            .report_new_incoming_call(call_uuid, update)
            .await
        {
            tracing::warn!(call_id = %call.id, error = %e, "Platform refused incoming call, rejecting");
            self.registry.remove_incoming(&call.id);
            if let Err(e) = self.engine.reject(&call.id).await {
                tracing::warn!(call_id = %call.id, error = %e, "Failed to reject refused call");
            }
            self.emit(BridgeEvent::IncomingCallEnded { call_id: call.id });
        }
    }

    fn on_incoming_call_ended(&self, call_id: &EngineCallId) {
        let call_uuid = call_id.as_call_uuid();
        let was_reported = call_uuid.is_some_and(|id| self.registry.is_reported(&id));
        // Must run before the reported mark is cleared.
        if let Some(call_uuid) = call_uuid {
            self.release_pending_answers(call_uuid);
        }
        let removed = self.registry.remove_incoming(call_id);
        if removed.is_none() && !was_reported {
            return;
        }

        tracing::info!(call_id = %call_id, "Incoming call ended before answer");
        if let Some(call_uuid) = call_uuid.filter(|_| was_reported) {
            self.platform
                .report_call_ended(call_uuid, EndReason::RemoteEnded);
        }
        self.emit(BridgeEvent::IncomingCallEnded {
            call_id: call_id.clone(),
        });
    }

    fn release_pending_answers(&self, call_uuid: CallUuid) {
        let answers = self.registry.take_transactions_where(|r| {
            r.call_uuid == call_uuid && r.kind() == ActionKind::Answer
        });
        let declining = self
            .registry
            .has_transaction_for_call(&call_uuid, ActionKind::End);
        let waiting = (!answers.is_empty() || declining)
            && self.registry.get_incoming(&call_uuid).is_none();
        for record in answers {
            record.complete(Err(CallControlError::StaleTransaction(call_uuid)));
        }
        if waiting && self.admission.cancel(call_uuid) {
            tracing::debug!(call_id = %call_uuid, "Released answer waiting on the ended call");
        }
    }

    async fn on_call_state_changed(&self, call_id: &EngineCallId, state: CallState) {
        if state == CallState::Ended {
            self.on_call_removed(call_id, EndReason::RemoteEnded).await;
            return;
        }

        let Some(previous) = self.registry.get_call_by_engine_id(call_id) else {
            tracing::debug!(call_id = %call_id, ?state, "State change for untracked call");
            return;
        };
        if previous.state == state {
            return;
        }
        let Some(handle) = self.registry.update_call(call_id, |h| h.set_state(state)) else {
            return;
        };
        tracing::debug!(call_id = %handle.reported_id, from = ?previous.state, to = ?state, "Call state transition");

        if handle.direction == CallDirection::Outgoing
            && state == CallState::Connected
            && previous.connected_at.is_none()
        {
            self.platform.report_outgoing_connected(handle.reported_id);
        }
        self.emit(BridgeEvent::CallStateChanged {
            call_id: handle.reported_id,
            state,
        });
    }

    async fn on_call_added(&self, call: EngineCall) {
        if call.direction != CallDirection::Incoming
            || self.registry.get_call_by_engine_id(&call.id).is_some()
        {
            return;
        }
        let Some(call_uuid) = call.id.as_call_uuid() else {
            tracing::warn!(call_id = %call.id, "Engine added a call with an unreportable id");
            return;
        };
        if self
            .registry
            .has_transaction_for_call(&call_uuid, ActionKind::Answer)
        {
            // The pending answer registers it.
            return;
        }

        let incoming = self.registry.get_incoming(&call_uuid);
        let mut handle =
            CallHandle::from_engine(&call, call_uuid, &self.config.default_call_options());
        handle.video = incoming.as_ref().is_some_and(|c| c.video_enabled);
        if let Err(e) = self.registry.promote_incoming(handle.clone()) {
            tracing::warn!(call_id = %call.id, error = %e, "Ignoring call accepted elsewhere while another is active");
            return;
        }
        tracing::info!(call_id = %call.id, "Registered call accepted through the engine");

        if let Err(e) = self.audio.on_call_registered(&handle.engine_id).await {
            tracing::warn!(call_id = %call.id, error = %e, "Failed to start media for added call");
        }
        self.emit(BridgeEvent::CallStarted { call: handle });
    }

    async fn on_call_removed(&self, call_id: &EngineCallId, reason: EndReason) {
        let Some(handle) = self.registry.remove_call_by_engine_id(call_id) else {
            tracing::debug!(call_id = %call_id, "Removed call was not tracked");
            return;
        };
        let call_uuid = handle.reported_id;

        // A local end in flight completes on its own.
        for record in self.registry.take_transactions_where(|r| {
            r.call_uuid == call_uuid && r.kind() != ActionKind::End
        }) {
            tracing::debug!(cancelled = %record.action_id, kind = %record.kind(), "Cancelling transaction on removed call");
            record.complete(Err(CallControlError::StaleTransaction(call_uuid)));
        }

        self.audio.on_call_removed(call_id).await;
        let reason = if handle.direction == CallDirection::Outgoing && handle.connected_at.is_none()
        {
            EndReason::Failed
        } else {
            reason
        };
        self.platform.report_call_ended(call_uuid, reason);
        tracing::info!(call_id = %call_uuid, engine_id = %call_id, ?reason, "Call removed by engine");
        self.emit(BridgeEvent::CallEnded { call_id: call_uuid });
    }

    fn emit(&self, event: BridgeEvent) {
        let _ = self.event_sender.send(event);
    }
}

/// Call-control service builder
pub struct CallControlServiceBuilder {
    engine: Arc<dyn CallEngine>,
    platform: Arc<dyn TelephonyPlatform>,
    config: CallControlConfig,
}

impl CallControlServiceBuilder {
    /// Create new builder
    #[must_use]
    pub fn new(engine: Arc<dyn CallEngine>, platform: Arc<dyn TelephonyPlatform>) -> Self {
        Self {
            engine,
            platform,
            config: CallControlConfig::default(),
        }
    }

    /// Set configuration
    #[must_use]
    pub fn with_config(mut self, config: CallControlConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the service
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid
    pub fn build(self) -> Result<CallControlService, ServiceError> {
        CallControlService::new(self.engine, self.platform, self.config)
    }
}
