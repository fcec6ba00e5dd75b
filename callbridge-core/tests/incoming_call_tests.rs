//! Incoming calls announced by push or delivered by the engine

mod common;

use callbridge_core::sim::EngineOperation;
use callbridge_core::{
    ActionKind, BridgeEvent, CallControlError, CallDirection, CallOptions, CallState, CallUuid,
    EndReason, EngineCall, EngineCallId, EngineEvent, HandleType, Participant,
};
use common::{harness, push_payload, settle};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::Duration;

fn ring(h: &common::Harness, uuid: CallUuid, video: bool) -> EngineEvent {
    h.engine.ring(
        uuid,
        Participant::new("8:acs:caller"),
        Some("Caller".to_string()),
        video,
    )
}

#[tokio::test]
async fn test_engine_delivered_call_is_reported_and_accepted() {
    let h = harness();
    let uuid = CallUuid::new();

    h.service.handle_engine_event(ring(&h, uuid, true)).await;

    let reported = h.platform.reported_incoming();
    assert_eq!(reported.len(), 1);
    assert_eq!(reported[0].0, uuid);
    assert_eq!(reported[0].1.remote_handle, "8:acs:caller");
    assert_eq!(reported[0].1.handle_type, HandleType::Generic);
    assert_eq!(reported[0].1.display_name.as_deref(), Some("Caller"));
    assert!(reported[0].1.has_video);

    let call = h
        .service
        .accept_call(uuid, CallOptions::audio_only())
        .await
        .unwrap();
    assert_eq!(call.reported_id, uuid);
    assert_eq!(call.engine_id, EngineCallId::from(uuid));
    assert_eq!(call.direction, CallDirection::Incoming);
    assert_eq!(call.state, CallState::Connected);
    assert!(call.video);

    let registry = h.service.registry();
    assert!(registry.get_incoming(&uuid).is_none());
    assert_eq!(registry.get_call(&uuid), Some(call.clone()));
    assert_eq!(registry.get_call_by_engine_id(&call.engine_id), Some(call));
    assert!(h.engine.last_options().unwrap().incoming_audio_muted);
}

#[tokio::test(start_paused = true)]
async fn test_push_then_engine_within_timeout() {
    let h = harness();
    let uuid = CallUuid::new();

    assert_eq!(
        h.service
            .handle_push(&push_payload(&uuid.to_string()))
            .await
            .unwrap(),
        uuid
    );
    assert_eq!(h.platform.reported_incoming().len(), 1);

    // Answered from the native UI before the engine knows the call.
    let answer = {
        let service = h.service.clone();
        tokio::spawn(async move { service.accept_call(uuid, CallOptions::audio_only()).await })
    };

    tokio::time::sleep(Duration::from_secs(2)).await;
    h.service.handle_engine_event(ring(&h, uuid, false)).await;

    let call = answer.await.unwrap().unwrap();
    assert_eq!(call.reported_id, uuid);
    assert_eq!(call.direction, CallDirection::Incoming);

    // The engine event did not announce the call a second time.
    assert_eq!(h.platform.reported_incoming().len(), 1);
    assert_eq!(h.platform.fulfilled().len(), 1);
    assert!(h.service.registry().get_incoming(&uuid).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_push_without_engine_times_out() {
    let h = harness();
    let uuid = CallUuid::new();
    h.service
        .handle_push(&push_payload(&uuid.to_string()))
        .await
        .unwrap();

    let started = tokio::time::Instant::now();
    let result = h
        .service
        .accept_call(uuid, CallOptions::audio_only())
        .await;

    assert_eq!(result, Err(CallControlError::NoIncomingCallFound(uuid)));
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert_eq!(h.platform.failed().len(), 1);
    assert_eq!(h.engine.count(EngineOperation::Accept), 0);
    assert!(!h.service.registry().is_reported(&uuid));

    // A late delivery is registered as a fresh incoming call.
    h.service.handle_engine_event(ring(&h, uuid, false)).await;
    assert!(h.service.registry().get_incoming(&uuid).is_some());
    assert_eq!(h.engine.count(EngineOperation::Accept), 0);
}

#[tokio::test]
async fn test_configured_admission_timeout() {
    let config = callbridge_core::CallControlConfig {
        admission_timeout_ms: 250,
        ..Default::default()
    };
    let h = common::harness_with(callbridge_core::sim::SimulatedEngine::new(), config);
    let uuid = CallUuid::new();
    h.service
        .handle_push(&push_payload(&uuid.to_string()))
        .await
        .unwrap();

    let started = std::time::Instant::now();
    let result = h
        .service
        .accept_call(uuid, CallOptions::audio_only())
        .await;
    assert_eq!(result, Err(CallControlError::NoIncomingCallFound(uuid)));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_decline_engine_delivered_call() {
    let h = harness();
    let uuid = CallUuid::new();
    h.service.handle_engine_event(ring(&h, uuid, false)).await;

    h.service.end_call(uuid).await.unwrap();

    assert_eq!(h.engine.count(EngineOperation::Reject), 1);
    let registry = h.service.registry();
    assert!(registry.get_incoming(&uuid).is_none());
    assert!(!registry.is_reported(&uuid));
    assert_eq!(registry.snapshot().transactions, 0);
}

#[tokio::test(start_paused = true)]
async fn test_decline_before_engine_delivers() {
    let h = harness();
    let uuid = CallUuid::new();
    h.service
        .handle_push(&push_payload(&uuid.to_string()))
        .await
        .unwrap();

    let decline = {
        let service = h.service.clone();
        tokio::spawn(async move { service.end_call(uuid).await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    h.service.handle_engine_event(ring(&h, uuid, false)).await;

    decline.await.unwrap().unwrap();
    assert_eq!(h.engine.count(EngineOperation::Reject), 1);
    assert!(h.service.registry().get_incoming(&uuid).is_none());
}

#[tokio::test]
async fn test_caller_gives_up_before_answer() {
    let h = harness();
    let uuid = CallUuid::new();
    h.service.handle_engine_event(ring(&h, uuid, false)).await;
    let mut events = h.service.subscribe_events();

    let event = h.engine.stop_ringing(&EngineCallId::from(uuid));
    h.service.handle_engine_event(event).await;

    assert_eq!(h.platform.ended(), vec![(uuid, EndReason::RemoteEnded)]);
    assert!(h.service.registry().get_incoming(&uuid).is_none());
    match events.recv().await.unwrap() {
        BridgeEvent::IncomingCallEnded { call_id } => {
            assert_eq!(call_id, EngineCallId::from(uuid));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_caller_gives_up_while_answer_waits() {
    let h = harness();
    let uuid = CallUuid::new();
    h.service
        .handle_push(&push_payload(&uuid.to_string()))
        .await
        .unwrap();
    let started = tokio::time::Instant::now();

    let answer = {
        let service = h.service.clone();
        tokio::spawn(async move { service.accept_call(uuid, CallOptions::audio_only()).await })
    };
    let registry = h.service.registry().clone();
    settle(|| registry.snapshot().transactions == 1).await;

    h.service
        .handle_engine_event(EngineEvent::IncomingCallEnded {
            call_id: EngineCallId::from(uuid),
        })
        .await;

    assert_eq!(
        answer.await.unwrap(),
        Err(CallControlError::StaleTransaction(uuid))
    );
    assert_eq!(h.platform.ended(), vec![(uuid, EndReason::RemoteEnded)]);

    // The parked answer is released right away, not at the timeout.
    let platform = h.platform.clone();
    settle(|| platform.failed().len() == 1).await;
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(h.platform.fulfilled().is_empty());
    assert_eq!(h.engine.count(EngineOperation::Accept), 0);
}

#[tokio::test(start_paused = true)]
async fn test_caller_gives_up_while_decline_waits() {
    let h = harness();
    let uuid = CallUuid::new();
    h.service
        .handle_push(&push_payload(&uuid.to_string()))
        .await
        .unwrap();
    let started = tokio::time::Instant::now();

    let decline = {
        let service = h.service.clone();
        tokio::spawn(async move { service.end_call(uuid).await })
    };
    let platform = h.platform.clone();
    settle(|| platform.requested().len() == 1).await;

    h.service
        .handle_engine_event(EngineEvent::IncomingCallEnded {
            call_id: EngineCallId::from(uuid),
        })
        .await;

    decline.await.unwrap().unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(h.engine.count(EngineOperation::Reject), 0);
    assert_eq!(h.platform.fulfilled().len(), 1);
    assert_eq!(h.service.registry().snapshot().transactions, 0);
}

#[tokio::test]
async fn test_engine_id_in_upper_case() {
    let h = harness();
    let uuid = CallUuid::new();
    let raw = uuid.to_string().to_uppercase();

    let event = h.engine.ring_with_id(
        EngineCallId::new(raw.clone()),
        Participant::new("8:acs:caller"),
        None,
        false,
    );
    h.service.handle_engine_event(event).await;

    assert_eq!(h.platform.reported_incoming()[0].0, uuid);
    assert!(h.service.registry().get_incoming(&uuid).is_some());

    let call = h
        .service
        .accept_call(uuid, CallOptions::audio_only())
        .await
        .unwrap();
    assert_eq!(call.reported_id, uuid);
    assert_eq!(call.engine_id.as_str(), raw);
    assert_eq!(h.service.registry().get_call(&uuid), Some(call.clone()));
    assert_eq!(
        h.service
            .registry()
            .get_call_by_engine_id(&EngineCallId::from(uuid)),
        Some(call)
    );
}

#[tokio::test]
async fn test_platform_refusal_rejects_call() {
    let h = harness();
    h.platform.refuse_incoming_reports(true);
    let uuid = CallUuid::new();

    h.service.handle_engine_event(ring(&h, uuid, false)).await;

    assert_eq!(h.engine.count(EngineOperation::Reject), 1);
    assert_eq!(h.service.registry().snapshot().incoming_calls, 0);
    assert!(!h.service.registry().is_reported(&uuid));
}

#[tokio::test]
async fn test_answer_engine_failure() {
    let h = harness();
    let uuid = CallUuid::new();
    h.service.handle_engine_event(ring(&h, uuid, false)).await;
    h.engine.fail_next(EngineOperation::Accept);

    let err = h
        .service
        .accept_call(uuid, CallOptions::audio_only())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CallControlError::EngineOperationFailed {
            kind: ActionKind::Answer,
            ..
        }
    ));
    assert!(h.service.active_call().is_none());
    assert_eq!(h.platform.failed().len(), 1);
}

#[tokio::test]
async fn test_call_accepted_through_engine_is_registered() {
    let h = harness();
    let uuid = CallUuid::new();
    h.service.handle_engine_event(ring(&h, uuid, true)).await;

    h.service
        .handle_engine_event(EngineEvent::CallsUpdated {
            added: vec![EngineCall {
                id: EngineCallId::from(uuid),
                direction: CallDirection::Incoming,
                state: CallState::Connected,
            }],
            removed: Vec::new(),
        })
        .await;

    let registry = h.service.registry();
    let call = registry.get_call(&uuid).unwrap();
    assert_eq!(call.direction, CallDirection::Incoming);
    assert!(call.video);
    assert!(registry.get_incoming(&uuid).is_none());
}

#[tokio::test]
async fn test_push_is_reported_once() {
    let h = harness();
    let uuid = CallUuid::new();
    let payload = push_payload(&uuid.to_string());

    h.service.handle_push(&payload).await.unwrap();
    h.service.handle_push(&payload).await.unwrap();
    h.service.handle_engine_event(ring(&h, uuid, false)).await;

    assert_eq!(h.platform.reported_incoming().len(), 1);
    assert_eq!(h.service.registry().snapshot().incoming_calls, 1);
}

#[tokio::test]
async fn test_invalid_push() {
    let h = harness();
    assert!(matches!(
        h.service.handle_push(&json!({})).await,
        Err(CallControlError::InvalidPushPayload(_))
    ));
    assert!(matches!(
        h.service.handle_push(&json!({ "data": { "callerId": "8:acs:x" } })).await,
        Err(CallControlError::InvalidPushPayload(_))
    ));
    assert!(h.platform.reported_incoming().is_empty());
}

#[tokio::test]
async fn test_refused_push_is_forgotten() {
    let h = harness();
    h.platform.refuse_incoming_reports(true);
    let uuid = CallUuid::new();

    let err = h
        .service
        .handle_push(&push_payload(&uuid.to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, CallControlError::PlatformDenied { .. }));
    assert!(!h.service.registry().is_reported(&uuid));
}
