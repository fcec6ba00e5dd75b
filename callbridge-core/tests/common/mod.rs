//! Shared wiring for the integration tests

#![allow(dead_code)]

use callbridge_core::sim::{spawn_action_pump, SimulatedEngine, SimulatedPlatform};
use callbridge_core::{CallControlConfig, CallControlService};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::task::JoinHandle;

pub struct Harness {
    pub service: Arc<CallControlService>,
    pub engine: Arc<SimulatedEngine>,
    pub platform: Arc<SimulatedPlatform>,
    _pump: JoinHandle<()>,
}

pub fn harness() -> Harness {
    harness_with(SimulatedEngine::new(), CallControlConfig::default())
}

pub fn harness_with(engine: SimulatedEngine, config: CallControlConfig) -> Harness {
    let engine = Arc::new(engine);
    let (platform, actions) = SimulatedPlatform::new();
    let platform = Arc::new(platform);
    let service = Arc::new(
        CallControlService::builder(engine.clone(), platform.clone())
            .with_config(config)
            .build()
            .unwrap(),
    );
    let pump = spawn_action_pump(service.delegate(), actions);
    Harness {
        service,
        engine,
        platform,
        _pump: pump,
    }
}

pub fn push_payload(call_id: &str) -> Value {
    json!({
        "aps": { "content-available": 1 },
        "data": {
            "callId": call_id,
            "callerId": "8:acs:caller",
            "displayName": "Caller",
            "videoCall": "false"
        }
    })
}

/// Yield until `condition` holds
pub async fn settle<F: Fn() -> bool>(condition: F) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never held");
}
