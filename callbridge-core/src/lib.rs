//! Callbridge - call-control coordination between a call engine and a platform telephony subsystem
//!
//! The platform owns the native call UI and the audio hardware; the engine
//! owns signaling and media. This crate sits between them:
//!
//! - **Transactions**: every start, answer, end, hold and mute is arbitrated
//!   by the platform before the engine is touched, and its result is
//!   delivered exactly once
//! - **Id correlation**: the id announced to the platform and the id the
//!   engine assigns both resolve to the same call
//! - **Incoming admission**: calls announced by push can be answered before
//!   the engine delivers them, within a bounded wait
//! - **Audio gating**: local media runs only while the platform grants the
//!   audio session
//!
//! # Examples
//!
//! ```rust,no_run
//! use callbridge_core::prelude::*;
//! use callbridge_core::sim::{spawn_action_pump, SimulatedEngine, SimulatedPlatform};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Arc::new(SimulatedEngine::new());
//! let (platform, actions) = SimulatedPlatform::new();
//!
//! let service = CallControlService::builder(engine, Arc::new(platform))
//!     .with_config(CallControlConfig::default())
//!     .build()?;
//! spawn_action_pump(service.delegate(), actions);
//!
//! let target: CallTarget = "8:acs:alice".parse()?;
//! let call = service.place_call(target, CallOptions::audio_only()).await?;
//! service.hold_call(call.reported_id, true).await?;
//! service.end_call(call.reported_id).await?;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::panic)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

/// Core call-control types and data structures
pub mod types;

/// Participant and call-target identities
pub mod identity;

/// Call-control errors
pub mod error;

/// Call engine boundary
pub mod engine;

/// Platform telephony boundary
pub mod platform;

/// Serialized call registry
pub mod registry;

/// Incoming-call admission
pub mod admission;

/// Audio session coordination
pub mod audio;

/// Transaction dispatch
pub mod dispatcher;

/// Platform delegate
pub mod delegate;

/// Push notification payloads
pub mod push;

/// Configuration
pub mod config;

/// Call-control service and builder
pub mod service;

/// In-memory engine and platform
#[cfg(feature = "test-utils")]
pub mod sim;

// Re-export main types at crate root
pub use admission::IncomingCallAdmission;
pub use audio::AudioSessionCoordinator;
pub use config::{CallControlConfig, ConfigError};
pub use delegate::PlatformDelegateAdapter;
pub use dispatcher::TransactionDispatcher;
pub use engine::{CallEngine, EngineError, EngineEvent};
pub use error::{CallControlError, CallControlResult};
pub use identity::{CallTarget, MeetingLocator, Participant, ParticipantKind, TargetParseError};
pub use platform::{
    ActionPayload, CallUpdate, HandleType, PlatformAction, PlatformError, ProviderConfiguration,
    TelephonyPlatform,
};
pub use push::PushNotificationInfo;
pub use registry::{CallRegistry, RegistryError, RegistrySnapshot, TransactionRecord};
pub use service::{CallControlService, CallControlServiceBuilder, ServiceError};
pub use types::*;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::CallControlConfig;
    pub use crate::engine::{CallEngine, EngineEvent};
    pub use crate::error::{CallControlError, CallControlResult};
    pub use crate::identity::{CallTarget, Participant};
    pub use crate::platform::{PlatformAction, TelephonyPlatform};
    pub use crate::service::{CallControlService, CallControlServiceBuilder};
    pub use crate::types::{
        BridgeEvent, CallHandle, CallOptions, CallState, CallUuid, EngineCallId,
        IncomingCallHandle,
    };
}
