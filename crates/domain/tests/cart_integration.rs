//! Integration tests for the Cart and TenantPolicy aggregates.
//!
//! These tests verify command execution against the in-memory store,
//! aggregate reconstruction from stored history, and concurrency handling.

use chrono::{TimeZone, Utc};
use common::{AggregateId, ErrorKind};
use domain::{
    AddItem, Aggregate, Cart, CartEvent, CartService, CartStatus, CreatePolicy, DomainEvent,
    ItemId, RecordedEvent, StreamEvent, SubmitCart, TenantPolicyService, UpdatePolicy, UserId,
    parse_time_of_day,
};
use event_store::{EventStore, InMemoryEventStore, Version};
use futures_util::StreamExt;

fn add_item(cart_id: AggregateId, user_id: UserId, tenant_id: AggregateId, price: i64) -> AddItem {
    AddItem {
        cart_id,
        user_id,
        tenant_id,
        item_id: ItemId::new(),
        name: format!("item-{price}"),
        price,
    }
}

mod cart_lifecycle {
    use super::*;

    #[tokio::test]
    async fn add_add_submit_then_reject() {
        let service = CartService::new(InMemoryEventStore::new());
        let (cart_id, user_id, tenant_id) = (AggregateId::new(), UserId::new(), AggregateId::new());

        let first = service
            .add_item(add_item(cart_id, user_id, tenant_id, 100))
            .await
            .unwrap();
        assert_eq!(first.events.len(), 2);
        assert_eq!(first.new_version, Version::new(2));
        assert_eq!(first.aggregate.total_amount(), 100);

        let second = service
            .add_item(add_item(cart_id, user_id, tenant_id, 50))
            .await
            .unwrap();
        assert_eq!(second.events.len(), 1);
        assert_eq!(second.new_version, Version::new(3));
        assert_eq!(second.aggregate.total_amount(), 150);
        assert_eq!(second.aggregate.items().len(), 2);

        let submitted = service.submit(SubmitCart::new(cart_id)).await.unwrap();
        assert_eq!(submitted.new_version, Version::new(4));
        assert_eq!(submitted.aggregate.status(), CartStatus::Submitted);

        let err = service
            .add_item(add_item(cart_id, user_id, tenant_id, 10))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnpermittedOp);

        let cart = service.get_cart(cart_id).await.unwrap().unwrap();
        assert_eq!(cart.version(), Version::new(4));
        assert_eq!(cart.items().len(), 2);
    }

    #[tokio::test]
    async fn version_equals_number_of_stored_events() {
        let store = InMemoryEventStore::new();
        let service = CartService::new(store.clone());
        let (cart_id, user_id, tenant_id) = (AggregateId::new(), UserId::new(), AggregateId::new());

        for price in [5, 10, 15, 20] {
            service
                .add_item(add_item(cart_id, user_id, tenant_id, price))
                .await
                .unwrap();
        }

        let stored = store.load_events(cart_id, "Cart").await.unwrap();
        let versions: Vec<i64> = stored.iter().map(|e| e.version.as_i64()).collect();
        assert_eq!(versions, vec![1, 2, 3, 4, 5]);

        let history: Vec<RecordedEvent<CartEvent>> = stored
            .iter()
            .map(|e| RecordedEvent::from_envelope(e).unwrap())
            .collect();
        let mut replayed = Cart::new(cart_id);
        replayed.hydrate(history.clone());
        replayed.hydrate(Vec::new());

        let loaded = service.get_cart(cart_id).await.unwrap().unwrap();
        assert_eq!(replayed.version(), Version::new(stored.len() as i64));
        assert_eq!(replayed.items(), loaded.items());
        assert_eq!(replayed.total_amount(), 50);
        assert_eq!(replayed.tenant_id(), Some(tenant_id));
    }

    #[tokio::test]
    async fn rejected_commands_store_nothing() {
        let store = InMemoryEventStore::new();
        let service = CartService::new(store.clone());
        let cart_id = AggregateId::new();

        let err = service.submit(SubmitCart::new(cart_id)).await.unwrap_err();
        assert_eq!(err.to_string(), "cannot purchase empty cart");

        let err = service
            .add_item(add_item(cart_id, UserId::new(), AggregateId::new(), 1_000_001))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);

        assert_eq!(store.event_count().await, 0);
        assert!(store.outbox_records().await.is_empty());
    }
}

mod concurrency {
    use super::*;
    use domain::RetryPolicy;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn racing_adds_are_all_kept() {
        let store = InMemoryEventStore::new();
        let service = Arc::new(
            CartService::new(store.clone()).with_retry_policy(
                RetryPolicy::default()
                    .with_max_attempts(20)
                    .with_backoff(Duration::from_millis(1)),
            ),
        );
        let (cart_id, user_id, tenant_id) = (AggregateId::new(), UserId::new(), AggregateId::new());
        service
            .add_item(add_item(cart_id, user_id, tenant_id, 1))
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for price in 2..=6 {
            let service = service.clone();
            tasks.push(tokio::spawn(async move {
                service
                    .add_item(add_item(cart_id, user_id, tenant_id, price))
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let cart = service.get_cart(cart_id).await.unwrap().unwrap();
        assert_eq!(cart.items().len(), 6);
        assert_eq!(cart.version(), Version::new(7));
        assert_eq!(cart.total_amount(), 21);
        assert_eq!(store.outbox_records().await.len(), 7);
    }
}

mod tenant_policy {
    use super::*;

    fn create(tenant_id: AggregateId) -> CreatePolicy {
        CreatePolicy {
            tenant_id,
            title: "Reminder".to_string(),
            abandoned_minutes: 30,
            quiet_from: parse_time_of_day("22:00").unwrap(),
            quiet_to: parse_time_of_day("08:00").unwrap(),
        }
    }

    #[tokio::test]
    async fn create_policy_and_check_quiet_hours() {
        let service = TenantPolicyService::new(InMemoryEventStore::new());
        let tenant_id = AggregateId::new();

        service.create(create(tenant_id)).await.unwrap();
        let policy = service.get_policy(tenant_id).await.unwrap().unwrap();

        let late = Utc.with_ymd_and_hms(2024, 6, 1, 23, 30, 0).unwrap();
        let morning = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();
        assert!(policy.is_within_quiet_time(late));
        assert!(!policy.is_within_quiet_time(morning));
    }

    #[tokio::test]
    async fn identical_update_keeps_version() {
        let service = TenantPolicyService::new(InMemoryEventStore::new());
        let tenant_id = AggregateId::new();
        let cmd = create(tenant_id);
        service.create(cmd.clone()).await.unwrap();

        let update = UpdatePolicy {
            tenant_id,
            title: cmd.title.clone(),
            abandoned_minutes: cmd.abandoned_minutes,
            quiet_from: cmd.quiet_from,
            quiet_to: cmd.quiet_to,
        };
        let unchanged = service.update(update.clone()).await.unwrap();
        assert!(unchanged.events.is_empty());
        assert_eq!(unchanged.new_version, Version::first());

        let changed = service
            .update(UpdatePolicy {
                abandoned_minutes: 60,
                ..update
            })
            .await
            .unwrap();
        assert_eq!(changed.new_version, Version::new(2));
    }
}

mod stream_decoding {
    use super::*;

    #[tokio::test]
    async fn every_stored_event_decodes_as_stream_event() {
        let store = InMemoryEventStore::new();
        let carts = CartService::new(store.clone());
        let policies = TenantPolicyService::new(store.clone());
        let tenant_id = AggregateId::new();
        let cart_id = AggregateId::new();

        policies.create(CreatePolicy {
            tenant_id,
            title: "Reminder".to_string(),
            abandoned_minutes: 15,
            quiet_from: parse_time_of_day("00:00").unwrap(),
            quiet_to: parse_time_of_day("00:00").unwrap(),
        })
        .await
        .unwrap();
        carts
            .add_item(add_item(cart_id, UserId::new(), tenant_id, 10))
            .await
            .unwrap();

        let mut stream = store.stream_all_events().await.unwrap();
        let mut tags = Vec::new();
        while let Some(envelope) = stream.next().await {
            let envelope = envelope.unwrap();
            let event = StreamEvent::registry().decode_envelope(&envelope).unwrap();
            assert_eq!(event.event_type(), envelope.event_type);
            tags.push(envelope.event_type);
        }
        assert_eq!(
            tags,
            vec![
                "TenantCartAbandonedPolicyCreatedEvent",
                "CartCreatedEvent",
                "ItemAddedToCartEvent"
            ]
        );
    }
}
