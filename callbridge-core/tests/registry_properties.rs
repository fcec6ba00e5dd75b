//! Property tests for registry lookups

use callbridge_core::{
    ActionId, CallControlError, CallDirection, CallHandle, CallOptions, CallRegistry, CallState,
    CallUuid, EngineCall, EngineCallId, TransactionRecord, TransactionRequest,
};
use proptest::prelude::*;

fn handle(engine_id: &str, state: CallState) -> CallHandle {
    let call = EngineCall {
        id: EngineCallId::new(engine_id),
        direction: CallDirection::Outgoing,
        state,
    };
    CallHandle::from_engine(&call, CallUuid::new(), &CallOptions::default())
}

proptest! {
    #[test]
    fn reported_and_engine_ids_resolve_to_same_call(engine_id in "[a-z0-9-]{1,32}") {
        let registry = CallRegistry::new();
        let call = handle(&engine_id, CallState::Connecting);
        registry.insert_call(call.clone()).unwrap();

        let by_reported = registry.get_call(&call.reported_id);
        let by_engine = registry.get_call_by_engine_id(&call.engine_id);
        prop_assert_eq!(by_reported.clone(), Some(call.clone()));
        prop_assert_eq!(by_reported, by_engine);
    }

    #[test]
    fn lookups_fail_after_removal(
        engine_id in "[a-z0-9-]{1,32}",
        by_engine_id in any::<bool>(),
    ) {
        let registry = CallRegistry::new();
        let call = handle(&engine_id, CallState::Connected);
        registry.insert_call(call.clone()).unwrap();

        let removed = if by_engine_id {
            registry.remove_call_by_engine_id(&call.engine_id)
        } else {
            registry.remove_call(&call.reported_id)
        };
        prop_assert!(removed.is_some());
        prop_assert!(registry.get_call(&call.reported_id).is_none());
        prop_assert!(registry.get_call_by_engine_id(&call.engine_id).is_none());
        prop_assert!(registry.resolve(&call.reported_id).is_none());
        prop_assert_eq!(registry.snapshot().correlations, 0);
    }

    #[test]
    fn only_one_live_call(first in "[a-z]{1,16}", second in "[0-9]{1,16}") {
        let registry = CallRegistry::new();
        registry.insert_call(handle(&first, CallState::Connected)).unwrap();
        prop_assert!(registry.insert_call(handle(&second, CallState::Connecting)).is_err());

        // An ended call no longer blocks a new one.
        registry.update_call(&EngineCallId::new(first.clone()), |c| c.set_state(CallState::Ended));
        prop_assert!(registry.insert_call(handle(&second, CallState::Connecting)).is_ok());
    }

    #[test]
    fn transactions_complete_once(count in 1usize..16) {
        tokio_test::block_on(async {
            let registry = CallRegistry::new();
            let call_uuid = CallUuid::new();
            let mut receivers = Vec::new();
            for _ in 0..count {
                let (record, rx) =
                    TransactionRecord::new(ActionId::new(), call_uuid, TransactionRequest::End);
                registry.add_transaction(record);
                receivers.push(rx);
            }

            for record in registry.take_transactions_for_call(&call_uuid, None) {
                record.complete(Err(CallControlError::StaleTransaction(call_uuid)));
            }
            assert!(registry.take_transactions_for_call(&call_uuid, None).is_empty());

            for rx in receivers {
                assert_eq!(rx.await.unwrap(), Err(CallControlError::StaleTransaction(call_uuid)));
            }
        });
    }
}
