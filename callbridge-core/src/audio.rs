//! Audio session coordination
//!
//! The platform owns the audio hardware. Local capture and rendering start
//! only after the platform activates the audio session and stop when it
//! deactivates it, including interruptions by other processes.

use crate::engine::CallEngine;
use crate::error::{CallControlError, CallControlResult};
use crate::registry::CallRegistry;
use crate::types::{BridgeEvent, EngineCallId};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Debug, Default)]
struct AudioState {
    session_active: bool,
    media_call: Option<EngineCallId>,
}

/// Starts and stops local media on platform audio-session notifications
pub struct AudioSessionCoordinator {
    engine: Arc<dyn CallEngine>,
    registry: Arc<CallRegistry>,
    state: Mutex<AudioState>,
    event_sender: broadcast::Sender<BridgeEvent>,
}

impl AudioSessionCoordinator {
    /// Create a coordinator
    pub fn new(
        engine: Arc<dyn CallEngine>,
        registry: Arc<CallRegistry>,
        event_sender: broadcast::Sender<BridgeEvent>,
    ) -> Self {
        Self {
            engine,
            registry,
            state: Mutex::new(AudioState::default()),
            event_sender,
        }
    }

    /// Whether the platform currently grants the audio session
    #[must_use]
    pub fn is_session_active(&self) -> bool {
        self.state.lock().session_active
    }

    /// Call whose local media is running
    #[must_use]
    pub fn media_call(&self) -> Option<EngineCallId> {
        self.state.lock().media_call.clone()
    }

    /// The platform activated the audio session
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationFailure` if the engine cannot start local media
    pub async fn did_activate(&self) -> CallControlResult<()> {
        self.state.lock().session_active = true;
        tracing::info!("Audio session activated");

        match self.registry.active_call() {
            Some(call) => self.start_media(call.engine_id).await,
            None => {
                tracing::debug!("No active call yet, media starts once one is registered");
                Ok(())
            }
        }
    }

    /// The platform deactivated the audio session
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationFailure` if the engine cannot stop local media
    pub async fn did_deactivate(&self) -> CallControlResult<()> {
        let media_call = {
            let mut state = self.state.lock();
            state.session_active = false;
            state.media_call.take()
        };
        tracing::info!("Audio session deactivated");

        if let Some(call_id) = media_call {
            self.engine
                .stop_audio(&call_id)
                .await
                .map_err(|e| CallControlError::ConfigurationFailure(e.to_string()))?;
            let _ = self
                .event_sender
                .send(BridgeEvent::AudioSession { active: false });
        }
        Ok(())
    }

    /// A call was registered; start media if the session is already active
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationFailure` if the engine cannot start local media
    pub async fn on_call_registered(&self, call_id: &EngineCallId) -> CallControlResult<()> {
        if !self.is_session_active() {
            return Ok(());
        }
        self.start_media(call_id.clone()).await
    }

    /// A call went away; stop its media if it was running
    pub async fn on_call_removed(&self, call_id: &EngineCallId) {
        let was_running = {
            let mut state = self.state.lock();
            if state.media_call.as_ref() == Some(call_id) {
                state.media_call = None;
                true
            } else {
                false
            }
        };
        if !was_running {
            return;
        }
        if let Err(e) = self.engine.stop_audio(call_id).await {
            tracing::warn!(call_id = %call_id, error = %e, "Failed to stop media for removed call");
        }
        let _ = self
            .event_sender
            .send(BridgeEvent::AudioSession { active: false });
    }

    /// The engine replaced a call's id
    pub fn on_call_rekeyed(&self, old_id: &EngineCallId, new_id: &EngineCallId) {
        let mut state = self.state.lock();
        if state.media_call.as_ref() == Some(old_id) {
            state.media_call = Some(new_id.clone());
        }
    }

    async fn start_media(&self, call_id: EngineCallId) -> CallControlResult<()> {
        if self.state.lock().media_call.as_ref() == Some(&call_id) {
            return Ok(());
        }

        self.engine
            .start_audio(&call_id)
            .await
            .map_err(|e| CallControlError::ConfigurationFailure(e.to_string()))?;

        let still_active = {
            let mut state = self.state.lock();
            if state.session_active {
                state.media_call = Some(call_id.clone());
            }
            state.session_active
        };
        if !still_active {
            // Deactivated while the engine was starting media.
            if let Err(e) = self.engine.stop_audio(&call_id).await {
                tracing::warn!(call_id = %call_id, error = %e, "Failed to stop media after deactivation");
            }
            return Ok(());
        }

        tracing::debug!(call_id = %call_id, "Local media started");
        let _ = self
            .event_sender
            .send(BridgeEvent::AudioSession { active: true });
        Ok(())
    }
}
