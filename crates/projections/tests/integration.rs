//! Integration tests: commands → outbox → broker → projectors, and rebuild.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::AggregateId;
use domain::{
    AddItem, CartService, CartStatus, CreatePolicy, ItemId, SubmitCart, TenantPolicyService,
    UpdatePolicy, UserId, parse_time_of_day,
};
use event_store::{InMemoryEventStore, InMemoryIdempotencyStore, OutboxStatus};
use messaging::{
    BrokerProducer, CART_EVENTS_TOPIC, ConsumerConfig, ConsumerGroup, InMemoryBroker, Message,
    MessageProducer, MessagingError, OutboxPublisher, PublisherConfig, TopicRouter,
    dead_letter_topic,
};
use projections::{
    CartProjector, CartViewStore, InMemoryCartViewStore, InMemoryTenantPolicyViewStore,
    ProjectionHandler, ProjectionProcessor, TenantPolicyProjector, TenantPolicyViewStore,
};

struct Harness {
    store: InMemoryEventStore,
    broker: InMemoryBroker,
    carts: InMemoryCartViewStore,
    policies: InMemoryTenantPolicyViewStore,
    publisher: OutboxPublisher,
    consumers: ConsumerGroup,
}

/// Fails the next `n` sends of a cart version, then passes through.
struct Failing {
    inner: BrokerProducer,
    remaining: Mutex<HashMap<i64, u32>>,
}

#[async_trait]
impl MessageProducer for Failing {
    async fn publish(&self, topic: &str, key: &str, message: &Message) -> messaging::Result<()> {
        {
            let mut remaining = self.remaining.lock().unwrap();
            if let Some(left) = remaining.get_mut(&message.version).filter(|left| **left > 0) {
                *left -= 1;
                return Err(MessagingError::Broker("ack timed out".into()));
            }
        }
        self.inner.publish(topic, key, message).await
    }
}

impl Harness {
    fn new() -> Self {
        Self::failing_sends(HashMap::new())
    }

    /// A harness whose producer fails the given versions the given number
    /// of times before sending them.
    fn failing_sends(failures: HashMap<i64, u32>) -> Self {
        let store = InMemoryEventStore::new();
        let broker = InMemoryBroker::new();
        let carts = InMemoryCartViewStore::new();
        let policies = InMemoryTenantPolicyViewStore::new();
        let idempotency = Arc::new(InMemoryIdempotencyStore::new());

        let producer = Failing {
            inner: BrokerProducer::new(Arc::new(broker.clone())),
            remaining: Mutex::new(failures),
        };
        let publisher = OutboxPublisher::new(
            Arc::new(store.clone()),
            Arc::new(producer),
            Arc::new(TopicRouter::new()),
            PublisherConfig::default(),
        );
        let consumers = ConsumerGroup::new(
            Arc::new(broker.clone()),
            ConsumerConfig::new("projector-group", [CART_EVENTS_TOPIC])
                .with_retry_backoff(Duration::from_millis(1)),
        )
        .with_handler(Arc::new(ProjectionHandler::new(
            Arc::new(CartProjector::new(Arc::new(carts.clone()))),
            idempotency.clone(),
        )))
        .with_handler(Arc::new(ProjectionHandler::new(
            Arc::new(TenantPolicyProjector::new(Arc::new(policies.clone()))),
            idempotency,
        )));

        Self {
            store,
            broker,
            carts,
            policies,
            publisher,
            consumers,
        }
    }

    async fn pump(&self) {
        self.publisher.publish_pending().await.unwrap();
        self.consumers.poll_once().await.unwrap();
    }
}

fn add(cart_id: AggregateId, user_id: UserId, tenant_id: AggregateId, price: i64) -> AddItem {
    AddItem {
        cart_id,
        user_id,
        tenant_id,
        item_id: ItemId::new(),
        name: format!("item-{price}"),
        price,
    }
}

#[tokio::test]
async fn test_cart_view_follows_commands() {
    let h = Harness::new();
    let service = CartService::new(h.store.clone());
    let (cart_id, user_id, tenant_id) = (AggregateId::new(), UserId::new(), AggregateId::new());

    service.add_item(add(cart_id, user_id, tenant_id, 100)).await.unwrap();
    h.pump().await;
    let view = h.carts.get(cart_id).await.unwrap().unwrap();
    assert_eq!(view.version, 2);
    assert_eq!(view.user_id, user_id);
    assert_eq!(view.tenant_id, tenant_id);

    service.add_item(add(cart_id, user_id, tenant_id, 50)).await.unwrap();
    service.submit(SubmitCart::new(cart_id)).await.unwrap();
    h.pump().await;

    let view = h.carts.get(cart_id).await.unwrap().unwrap();
    assert_eq!(view.status, CartStatus::Submitted);
    assert_eq!(view.total_amount, 150);
    assert_eq!(view.item_count, 2);
    assert_eq!(view.version, 4);
}

#[tokio::test]
async fn test_policy_view_follows_commands() {
    let h = Harness::new();
    let service = TenantPolicyService::new(h.store.clone());
    let tenant_id = AggregateId::new();

    service
        .create(CreatePolicy {
            tenant_id,
            title: "default".to_string(),
            abandoned_minutes: 30,
            quiet_from: parse_time_of_day("22:00").unwrap(),
            quiet_to: parse_time_of_day("07:00").unwrap(),
        })
        .await
        .unwrap();
    service
        .update(UpdatePolicy {
            tenant_id,
            title: "default".to_string(),
            abandoned_minutes: 45,
            quiet_from: parse_time_of_day("22:00").unwrap(),
            quiet_to: parse_time_of_day("07:00").unwrap(),
        })
        .await
        .unwrap();
    h.pump().await;

    let view = h.policies.get(tenant_id).await.unwrap().unwrap();
    assert_eq!(view.abandoned_minutes, 45);
    assert_eq!(view.version, 2);
}

#[tokio::test]
async fn test_redelivery_after_crash_does_not_double_count() {
    let h = Harness::new();
    let service = CartService::new(h.store.clone());
    let cart_id = AggregateId::new();
    service
        .add_item(add(cart_id, UserId::new(), AggregateId::new(), 100))
        .await
        .unwrap();
    h.pump().await;

    // A second group instance that never committed sees everything again.
    let replay = ConsumerGroup::new(
        Arc::new(h.broker.clone()),
        ConsumerConfig::new("projector-group-2", [CART_EVENTS_TOPIC]),
    )
    .with_handler(Arc::new(ProjectionHandler::new(
        Arc::new(CartProjector::new(Arc::new(h.carts.clone()))),
        Arc::new(InMemoryIdempotencyStore::new()),
    )));
    replay.poll_once().await.unwrap();

    let view = h.carts.get(cart_id).await.unwrap().unwrap();
    assert_eq!(view.item_count, 1);
    assert_eq!(view.total_amount, 100);
}

#[tokio::test]
async fn test_rebuild_matches_live_views() {
    let h = Harness::new();
    let service = CartService::new(h.store.clone());
    let mut cart_ids = Vec::new();
    for price in [10, 20, 30] {
        let cart_id = AggregateId::new();
        service
            .add_item(add(cart_id, UserId::new(), AggregateId::new(), price))
            .await
            .unwrap();
        cart_ids.push(cart_id);
    }
    service.submit(SubmitCart::new(cart_ids[0])).await.unwrap();
    h.pump().await;

    let mut live = Vec::new();
    for id in &cart_ids {
        live.push(h.carts.get(*id).await.unwrap().unwrap());
    }

    let rebuilt = InMemoryCartViewStore::new();
    let mut processor = ProjectionProcessor::new(h.store.clone());
    processor.register(Arc::new(CartProjector::new(Arc::new(rebuilt.clone()))));
    assert_eq!(processor.rebuild().await.unwrap(), 7);

    for view in live {
        assert_eq!(rebuilt.get(view.cart_id).await.unwrap(), Some(view));
    }
}

#[tokio::test]
async fn test_failed_send_is_retried_before_later_versions() {
    let h = Harness::failing_sends(HashMap::from([(2, 1)]));
    let service = CartService::new(h.store.clone());
    let (cart_id, user_id, tenant_id) = (AggregateId::new(), UserId::new(), AggregateId::new());

    service.add_item(add(cart_id, user_id, tenant_id, 100)).await.unwrap();
    service.add_item(add(cart_id, user_id, tenant_id, 50)).await.unwrap();

    h.pump().await;
    let view = h.carts.get(cart_id).await.unwrap().unwrap();
    assert_eq!(view.version, 1);
    assert_eq!(view.item_count, 0);

    h.pump().await;
    h.pump().await;

    let view = h.carts.get(cart_id).await.unwrap().unwrap();
    assert_eq!(view.item_count, 2);
    assert_eq!(view.total_amount, 150);
    assert_eq!(view.version, 3);
    assert!(h.broker.records(&dead_letter_topic(CART_EVENTS_TOPIC)).await.is_empty());
}

#[tokio::test]
async fn test_later_version_published_after_a_failed_send() {
    let h = Harness::failing_sends(HashMap::from([(2, 1)]));
    let service = CartService::new(h.store.clone());
    let (cart_id, user_id, tenant_id) = (AggregateId::new(), UserId::new(), AggregateId::new());

    service.add_item(add(cart_id, user_id, tenant_id, 100)).await.unwrap();
    h.pump().await;

    // v3 is committed while v2 waits for its next attempt.
    service.add_item(add(cart_id, user_id, tenant_id, 50)).await.unwrap();
    h.pump().await;

    let view = h.carts.get(cart_id).await.unwrap().unwrap();
    assert_eq!(view.item_count, 2);
    assert_eq!(view.total_amount, 150);
    assert_eq!(view.version, 3);
}

#[tokio::test]
async fn test_permanently_failed_send_does_not_silently_skip() {
    let h = Harness::failing_sends(HashMap::from([(2, u32::MAX)]));
    let service = CartService::new(h.store.clone());
    let (cart_id, user_id, tenant_id) = (AggregateId::new(), UserId::new(), AggregateId::new());

    service.add_item(add(cart_id, user_id, tenant_id, 100)).await.unwrap();
    for _ in 0..3 {
        h.pump().await;
    }
    let failed = h.store.outbox_records().await;
    assert_eq!(failed[1].status, OutboxStatus::Failed);

    service.add_item(add(cart_id, user_id, tenant_id, 50)).await.unwrap();
    h.pump().await;

    let view = h.carts.get(cart_id).await.unwrap().unwrap();
    assert_eq!(view.version, 1);
    assert_eq!(view.item_count, 0);

    let parked = h.broker.records(&dead_letter_topic(CART_EVENTS_TOPIC)).await;
    assert_eq!(parked.len(), 1);
    assert_eq!(Message::from_bytes(&parked[0].payload).unwrap().version, 3);
}
