//! Platform delegate
//!
//! The platform calls back here to perform actions it granted, or actions
//! it started itself from the native call UI. Each action resolves its
//! target through the registry, runs the matching engine operation, and
//! reports the outcome to the platform and to the transaction's caller.
//!
//! ```text
//! outbound:  Dialing ─► StartGranted ─► Connecting ─► Active ⇄ Held ─► Ended
//! inbound:   Reported ─► AnswerGranted ─► Accepting ─► Active ─► Ended/Rejected
//! ```
//!
//! Calls always start with both audio directions muted; media only flows
//! after the platform activates the audio session.

use crate::admission::IncomingCallAdmission;
use crate::audio::AudioSessionCoordinator;
use crate::engine::CallEngine;
use crate::error::{CallControlError, CallControlResult};
use crate::identity::CallTarget;
use crate::platform::{ActionPayload, PlatformAction, TelephonyPlatform};
use crate::registry::{CallRegistry, TransactionOutcome};
use crate::types::{
    ActionKind, BridgeEvent, CallDirection, CallHandle, CallOptions, CallState, CallUuid,
    TransactionRequest,
};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Performs platform-granted actions against the engine
pub struct PlatformDelegateAdapter {
    registry: Arc<CallRegistry>,
    engine: Arc<dyn CallEngine>,
    platform: Arc<dyn TelephonyPlatform>,
    admission: Arc<IncomingCallAdmission>,
    audio: Arc<AudioSessionCoordinator>,
    event_sender: broadcast::Sender<BridgeEvent>,
    default_options: CallOptions,
}

impl PlatformDelegateAdapter {
    /// Create the delegate
    pub fn new(
        registry: Arc<CallRegistry>,
        engine: Arc<dyn CallEngine>,
        platform: Arc<dyn TelephonyPlatform>,
        admission: Arc<IncomingCallAdmission>,
        audio: Arc<AudioSessionCoordinator>,
        event_sender: broadcast::Sender<BridgeEvent>,
        default_options: CallOptions,
    ) -> Self {
        Self {
            registry,
            engine,
            platform,
            admission,
            audio,
            event_sender,
            default_options,
        }
    }

    /// Perform an action the platform granted or initiated
    #[tracing::instrument(skip(self, action), fields(call_id = %action.call_uuid, action_id = %action.id, kind = %action.kind()))]
    pub async fn perform_action(&self, action: PlatformAction) {
        let request = self.registry.transaction_request(&action.id);
        if request.is_none() {
            tracing::debug!("Platform-initiated action, using default options");
        }

        let outcome = match &action.payload {
            ActionPayload::Start { target, video } => {
                self.perform_start(&action, target, *video, request).await
            }
            ActionPayload::Answer => self.perform_answer(&action, request).await,
            ActionPayload::End => self.perform_end(&action).await,
            ActionPayload::Hold { on_hold } => self.perform_hold(&action, *on_hold).await,
            ActionPayload::Mute { muted } => self.perform_mute(&action, *muted).await,
        };
        self.finish(&action, outcome);
    }

    /// The platform granted the audio session
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationFailure` if local media cannot start
    pub async fn did_activate_audio_session(&self) -> CallControlResult<()> {
        self.audio.did_activate().await
    }

    /// The platform revoked the audio session
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationFailure` if local media cannot stop
    pub async fn did_deactivate_audio_session(&self) -> CallControlResult<()> {
        self.audio.did_deactivate().await
    }

    /// The platform reset; every call and pending transaction is gone
    #[tracing::instrument(skip(self))]
    pub async fn provider_did_reset(&self) {
        tracing::warn!("Platform reset, ending all calls");

        for record in self.registry.take_all_transactions() {
            let call_uuid = record.call_uuid;
            record.complete(Err(CallControlError::StaleTransaction(call_uuid)));
        }

        let (calls, incoming) = self.registry.drain_calls();
        let ends = calls.iter().map(|call| async move {
            if let Err(e) = self.engine.end(&call.engine_id).await {
                tracing::warn!(call_id = %call.engine_id, error = %e, "Failed to end call on reset");
            }
            self.audio.on_call_removed(&call.engine_id).await;
            self.emit(BridgeEvent::CallEnded {
                call_id: call.reported_id,
            });
        });
        let rejects = incoming.iter().map(|call| async move {
            if let Err(e) = self.engine.reject(&call.id).await {
                tracing::warn!(call_id = %call.id, error = %e, "Failed to reject call on reset");
            }
            self.emit(BridgeEvent::IncomingCallEnded {
                call_id: call.id.clone(),
            });
        });
        join_all(ends).await;
        join_all(rejects).await;
    }

    async fn perform_start(
        &self,
        action: &PlatformAction,
        target: &CallTarget,
        video: bool,
        request: Option<TransactionRequest>,
    ) -> TransactionOutcome {
        let options = match request {
            Some(TransactionRequest::Start { options, .. }) => options,
            _ => CallOptions {
                video,
                ..self.default_options.clone()
            },
        }
        .with_audio_muted();

        let placed = match target {
            CallTarget::Participants(participants) => {
                self.engine.place(participants, &options).await
            }
            CallTarget::Meeting(locator) => self.engine.join(locator, &options).await,
        };
        let call = placed.map_err(|e| CallControlError::engine(ActionKind::Start, &e))?;

        let handle = CallHandle::from_engine(&call, action.call_uuid, &options);
        if let Err(e) = self.registry.insert_call(handle.clone()) {
            tracing::warn!(error = %e, "Engine placed a call while another is active, hanging up");
            if let Err(end_err) = self.engine.end(&call.id).await {
                tracing::warn!(error = %end_err, "Failed to hang up untracked call");
            }
            return Err(CallControlError::PlatformDenied {
                kind: ActionKind::Start,
                reason: e.to_string(),
            });
        }
        tracing::info!(engine_id = %handle.engine_id, "Outbound call started");

        self.platform.report_outgoing_connecting(action.call_uuid);
        if handle.state == CallState::Connected {
            self.platform.report_outgoing_connected(action.call_uuid);
        }
        self.register_media(&handle).await;
        self.emit(BridgeEvent::CallStarted {
            call: handle.clone(),
        });
        Ok(Some(handle))
    }

    async fn perform_answer(
        &self,
        action: &PlatformAction,
        request: Option<TransactionRequest>,
    ) -> TransactionOutcome {
        let call_uuid = action.call_uuid;
        let options = match request {
            Some(TransactionRequest::Answer { options }) => options,
            _ => self.default_options.clone(),
        }
        .with_audio_muted();

        let incoming = match self.admission.wait_for_incoming(call_uuid).await {
            Ok(incoming) => incoming,
            Err(e) => {
                self.registry.clear_reported(&call_uuid);
                return Err(e);
            }
        };

        let call = self
            .engine
            .accept(&incoming.id, &options)
            .await
            .map_err(|e| CallControlError::engine(ActionKind::Answer, &e))?;

        let mut handle = CallHandle::from_engine(&call, call_uuid, &options);
        handle.direction = CallDirection::Incoming;
        handle.video = options.video || incoming.video_enabled;
        if let Err(e) = self.registry.promote_incoming(handle.clone()) {
            tracing::warn!(error = %e, "Accepted a call while another is active, hanging up");
            if let Err(end_err) = self.engine.end(&call.id).await {
                tracing::warn!(error = %end_err, "Failed to hang up untracked call");
            }
            self.registry.remove_incoming(&incoming.id);
            return Err(CallControlError::PlatformDenied {
                kind: ActionKind::Answer,
                reason: e.to_string(),
            });
        }
        tracing::info!(engine_id = %handle.engine_id, "Incoming call accepted");

        self.register_media(&handle).await;
        self.emit(BridgeEvent::CallStarted {
            call: handle.clone(),
        });
        Ok(Some(handle))
    }

    async fn perform_end(&self, action: &PlatformAction) -> TransactionOutcome {
        let call_uuid = action.call_uuid;

        // Anything still pending on this call can no longer succeed.
        for record in self
            .registry
            .take_transactions_for_call(&call_uuid, Some(action.id))
        {
            tracing::debug!(cancelled = %record.action_id, kind = %record.kind(), "Cancelling pending transaction");
            record.complete(Err(CallControlError::StaleTransaction(call_uuid)));
        }

        // Removed before hanging up: an engine removal raised during `end`
        // must find nothing left to report.
        if let Some(call) = self.registry.remove_call(&call_uuid) {
            let result = self.engine.end(&call.engine_id).await;
            self.audio.on_call_removed(&call.engine_id).await;
            self.emit(BridgeEvent::CallEnded { call_id: call_uuid });
            tracing::info!(engine_id = %call.engine_id, "Call ended");
            return result
                .map(|()| None)
                .map_err(|e| CallControlError::engine(ActionKind::End, &e));
        }

        let incoming = match self.registry.get_incoming(&call_uuid) {
            Some(incoming) => incoming,
            None if self.registry.is_reported(&call_uuid)
                || self.admission.is_cancelled(&call_uuid) =>
            {
                match self.admission.wait_for_incoming(call_uuid).await {
                    Ok(incoming) => incoming,
                    Err(CallControlError::StaleTransaction(_)) => {
                        tracing::debug!("Caller gave up before the decline reached the engine");
                        self.registry.clear_reported(&call_uuid);
                        return Ok(None);
                    }
                    Err(e) => {
                        self.registry.clear_reported(&call_uuid);
                        return Err(e);
                    }
                }
            }
            None => return Err(CallControlError::NoSuchCall(call_uuid)),
        };

        let result = self.engine.reject(&incoming.id).await;
        self.registry.remove_incoming(&incoming.id);
        self.emit(BridgeEvent::IncomingCallEnded {
            call_id: incoming.id.clone(),
        });
        tracing::info!(engine_id = %incoming.id, "Incoming call declined");
        result
            .map(|()| None)
            .map_err(|e| CallControlError::engine(ActionKind::End, &e))
    }

    async fn perform_hold(&self, action: &PlatformAction, on_hold: bool) -> TransactionOutcome {
        let call_uuid = action.call_uuid;
        let call = self
            .registry
            .get_call(&call_uuid)
            .ok_or(CallControlError::NoSuchCall(call_uuid))?;

        let result = if on_hold {
            self.engine.hold(&call.engine_id).await
        } else {
            self.engine.resume(&call.engine_id).await
        };
        result.map_err(|e| CallControlError::engine(ActionKind::Hold, &e))?;

        let state = if on_hold {
            CallState::Held
        } else {
            CallState::Connected
        };
        let handle = self
            .registry
            .update_call(&call.engine_id, |h| h.set_state(state))
            .ok_or(CallControlError::StaleTransaction(call_uuid))?;
        tracing::debug!(state = ?state, "Call state transition");
        self.emit(BridgeEvent::CallStateChanged {
            call_id: call_uuid,
            state,
        });
        Ok(Some(handle))
    }

    async fn perform_mute(&self, action: &PlatformAction, muted: bool) -> TransactionOutcome {
        let call_uuid = action.call_uuid;
        let call = self
            .registry
            .get_call(&call_uuid)
            .ok_or(CallControlError::NoSuchCall(call_uuid))?;

        self.engine
            .set_outgoing_muted(&call.engine_id, muted)
            .await
            .map_err(|e| CallControlError::engine(ActionKind::Mute, &e))?;

        self.registry
            .update_call(&call.engine_id, |h| h.muted = muted)
            .map(Some)
            .ok_or(CallControlError::StaleTransaction(call_uuid))
    }

    fn finish(&self, action: &PlatformAction, outcome: TransactionOutcome) {
        match &outcome {
            Ok(_) => self.platform.fulfill_action(action.id),
            Err(e) => {
                tracing::warn!(error = %e, "Action failed");
                self.platform.fail_action(action.id);
            }
        }
        match self.registry.take_transaction(&action.id) {
            Some(record) => record.complete(outcome),
            None => tracing::debug!("No pending transaction to complete"),
        }
    }

    async fn register_media(&self, handle: &CallHandle) {
        if let Err(e) = self.audio.on_call_registered(&handle.engine_id).await {
            tracing::warn!(engine_id = %handle.engine_id, error = %e, "Failed to start media for new call");
        }
    }

    fn emit(&self, event: BridgeEvent) {
        let _ = self.event_sender.send(event);
    }
}
