//! Transaction dispatch
//!
//! Every call-control request is turned into a platform action. The
//! transaction record is stored before the platform is asked, so the
//! delegate always finds it when the platform performs the action, however
//! quickly that happens. A denial completes the record immediately and the
//! engine is never touched.

use crate::error::{CallControlError, CallControlResult};
use crate::identity::CallTarget;
use crate::platform::{ActionPayload, PlatformAction, TelephonyPlatform};
use crate::registry::{CallRegistry, TransactionOutcome, TransactionRecord};
use crate::types::{ActionKind, CallHandle, CallOptions, CallUuid, TransactionRequest};
use std::sync::Arc;

/// Issues call-control requests to the platform and awaits their outcome
pub struct TransactionDispatcher {
    registry: Arc<CallRegistry>,
    platform: Arc<dyn TelephonyPlatform>,
}

impl TransactionDispatcher {
    /// Create a dispatcher
    pub fn new(registry: Arc<CallRegistry>, platform: Arc<dyn TelephonyPlatform>) -> Self {
        Self { registry, platform }
    }

    /// Place an outbound call
    ///
    /// Returns the call handle once the engine confirms the call.
    ///
    /// # Errors
    ///
    /// Returns `PlatformDenied` if a call is already active or the platform
    /// refuses, `EngineOperationFailed` if the engine cannot place the call.
    pub async fn place_call(
        &self,
        target: CallTarget,
        options: CallOptions,
    ) -> CallControlResult<CallHandle> {
        if let Some(active) = self.registry.active_call() {
            tracing::warn!(active = %active.reported_id, "Refusing to start a second call");
            return Err(CallControlError::PlatformDenied {
                kind: ActionKind::Start,
                reason: format!("call {} is already active", active.reported_id),
            });
        }

        let call_uuid = CallUuid::new();
        let payload = ActionPayload::Start {
            target: target.clone(),
            video: options.video,
        };
        let request = TransactionRequest::Start { target, options };
        self.dispatch(call_uuid, payload, request)
            .await?
            .ok_or(CallControlError::NoSuchCall(call_uuid))
    }

    /// Accept an incoming call
    ///
    /// # Errors
    ///
    /// Returns `NoIncomingCallFound` if the engine never delivers the call,
    /// `PlatformDenied` or `EngineOperationFailed` otherwise.
    pub async fn accept_call(
        &self,
        call_uuid: CallUuid,
        options: CallOptions,
    ) -> CallControlResult<CallHandle> {
        let request = TransactionRequest::Answer { options };
        self.dispatch(call_uuid, ActionPayload::Answer, request)
            .await?
            .ok_or(CallControlError::NoSuchCall(call_uuid))
    }

    /// End an active call or decline an incoming one
    ///
    /// # Errors
    ///
    /// Returns `NoSuchCall` if no active, incoming or announced call has this id
    pub async fn end_call(&self, call_uuid: CallUuid) -> CallControlResult<()> {
        if self.registry.get_call(&call_uuid).is_none()
            && self.registry.get_incoming(&call_uuid).is_none()
            && !self.registry.is_reported(&call_uuid)
        {
            return Err(CallControlError::NoSuchCall(call_uuid));
        }
        self.dispatch(call_uuid, ActionPayload::End, TransactionRequest::End)
            .await
            .map(|_| ())
    }

    /// Hold (`true`) or resume (`false`) an active call
    ///
    /// # Errors
    ///
    /// Returns `NoSuchCall` if the call is not active
    pub async fn hold_call(&self, call_uuid: CallUuid, on_hold: bool) -> CallControlResult<()> {
        self.require_call(call_uuid)?;
        self.dispatch(
            call_uuid,
            ActionPayload::Hold { on_hold },
            TransactionRequest::Hold { on_hold },
        )
        .await
        .map(|_| ())
    }

    /// Mute (`true`) or unmute (`false`) outgoing audio
    ///
    /// # Errors
    ///
    /// Returns `NoSuchCall` if the call is not active
    pub async fn mute_call(&self, call_uuid: CallUuid, muted: bool) -> CallControlResult<()> {
        self.require_call(call_uuid)?;
        self.dispatch(
            call_uuid,
            ActionPayload::Mute { muted },
            TransactionRequest::Mute { muted },
        )
        .await
        .map(|_| ())
    }

    fn require_call(&self, call_uuid: CallUuid) -> CallControlResult<CallHandle> {
        self.registry
            .get_call(&call_uuid)
            .ok_or(CallControlError::NoSuchCall(call_uuid))
    }

    #[tracing::instrument(skip(self, payload, request), fields(call_id = %call_uuid, kind = %request.kind()))]
    async fn dispatch(
        &self,
        call_uuid: CallUuid,
        payload: ActionPayload,
        request: TransactionRequest,
    ) -> TransactionOutcome {
        let action = PlatformAction::new(call_uuid, payload);
        let kind = action.kind();
        let (record, completion) = TransactionRecord::new(action.id, call_uuid, request);
        self.registry.add_transaction(record);
        tracing::debug!(action_id = %action.id, "Requesting platform transaction");

        if let Err(e) = self.platform.request_transaction(&action).await {
            tracing::warn!(action_id = %action.id, error = %e, "Platform denied transaction");
            if let Some(record) = self.registry.take_transaction(&action.id) {
                record.complete(Err(CallControlError::denied(kind, &e)));
            }
        }

        // A dropped sender means the record was discarded without an outcome.
        completion
            .await
            .unwrap_or(Err(CallControlError::StaleTransaction(call_uuid)))
    }
}
