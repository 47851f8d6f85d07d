//! Background workers and the stores they share with the HTTP layer.

use std::sync::Arc;

use domain::{CartService, RetryPolicy, TenantPolicyService};
use event_store::{
    EventStore, IdempotencyStore, InMemoryEventStore, InMemoryIdempotencyStore, OutboxStore,
    PostgresEventStore, PostgresIdempotencyStore,
};
use messaging::{
    Broker, BrokerProducer, CART_EVENTS_TOPIC, ConsumerConfig, ConsumerGroup, MessageProducer,
    OutboxPublisher, PublisherConfig, TopicRouter,
};
use projections::{
    CartProjector, CartViewStore, InMemoryCartViewStore, InMemoryTenantPolicyViewStore,
    PostgresCartViewStore, PostgresTenantPolicyViewStore, ProjectionHandler,
    TenantPolicyProjector, TenantPolicyViewStore,
};
use saga::{
    CHECK_TOPIC, CHECKER_GROUP, CartAbandonmentChecker, CartAbandonmentSubscriber,
    DelayScheduler, DelaySweeper, InMemoryDelayQueue, PostgresDelayQueue, SUBSCRIBER_GROUP,
    SweeperConfig,
};
use sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;

pub const CART_PROJECTOR_GROUP: &str = "cart-projector-group";
pub const TENANT_POLICY_PROJECTOR_GROUP: &str = "tenant-policy-projector-group";

/// Every store the process writes to or reads from.
pub struct Stores<S> {
    pub events: S,
    pub idempotency: Arc<dyn IdempotencyStore>,
    pub cart_views: Arc<dyn CartViewStore>,
    pub policy_views: Arc<dyn TenantPolicyViewStore>,
    pub delays: Arc<dyn DelayScheduler>,
}

impl Stores<InMemoryEventStore> {
    pub fn in_memory() -> Self {
        Self {
            events: InMemoryEventStore::new(),
            idempotency: Arc::new(InMemoryIdempotencyStore::new()),
            cart_views: Arc::new(InMemoryCartViewStore::new()),
            policy_views: Arc::new(InMemoryTenantPolicyViewStore::new()),
            delays: Arc::new(InMemoryDelayQueue::new()),
        }
    }
}

impl Stores<PostgresEventStore> {
    /// All stores on one pool. Migrations are not run here.
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            events: PostgresEventStore::new(pool.clone()),
            idempotency: Arc::new(PostgresIdempotencyStore::new(pool.clone())),
            cart_views: Arc::new(PostgresCartViewStore::new(pool.clone())),
            policy_views: Arc::new(PostgresTenantPolicyViewStore::new(pool.clone())),
            delays: Arc::new(PostgresDelayQueue::new(pool)),
        }
    }
}

/// The publisher, the consumer groups and the delay sweeper, ready to spawn.
pub struct Workers {
    publisher: OutboxPublisher,
    consumers: Vec<ConsumerGroup>,
    sweeper: DelaySweeper,
}

impl Workers {
    pub fn new<S>(stores: &Stores<S>, broker: Arc<dyn Broker>, config: &Config) -> Self
    where
        S: EventStore + OutboxStore + Clone + 'static,
    {
        let producer: Arc<dyn MessageProducer> = Arc::new(BrokerProducer::new(broker.clone()));
        let retry = RetryPolicy::default().with_max_attempts(config.command_max_attempts);

        let publisher = OutboxPublisher::new(
            Arc::new(stores.events.clone()),
            producer.clone(),
            Arc::new(TopicRouter::new()),
            PublisherConfig::default()
                .with_poll_interval(config.outbox_poll_interval)
                .with_batch_size(config.outbox_batch_size)
                .with_max_retries(config.outbox_max_retries)
                .with_stale_claim_after(config.outbox_stale_claim_after),
        );

        let cart_projector = ConsumerGroup::new(
            broker.clone(),
            ConsumerConfig::new(CART_PROJECTOR_GROUP, [CART_EVENTS_TOPIC]),
        )
        .with_handler(Arc::new(ProjectionHandler::new(
            Arc::new(CartProjector::new(stores.cart_views.clone())),
            stores.idempotency.clone(),
        )));

        let policy_projector = ConsumerGroup::new(
            broker.clone(),
            ConsumerConfig::new(TENANT_POLICY_PROJECTOR_GROUP, [CART_EVENTS_TOPIC]),
        )
        .with_handler(Arc::new(ProjectionHandler::new(
            Arc::new(TenantPolicyProjector::new(stores.policy_views.clone())),
            stores.idempotency.clone(),
        )));

        let subscriber = ConsumerGroup::new(
            broker.clone(),
            ConsumerConfig::new(SUBSCRIBER_GROUP, [CART_EVENTS_TOPIC]),
        )
        .with_handler(Arc::new(CartAbandonmentSubscriber::new(
            TenantPolicyService::new(stores.events.clone()).with_retry_policy(retry),
            stores.delays.clone(),
            stores.idempotency.clone(),
        )));

        let checker = ConsumerGroup::new(broker, ConsumerConfig::new(CHECKER_GROUP, [CHECK_TOPIC]))
            .with_handler(Arc::new(CartAbandonmentChecker::new(
                CartService::new(stores.events.clone()).with_retry_policy(retry),
                TenantPolicyService::new(stores.events.clone()).with_retry_policy(retry),
                stores.delays.clone(),
            )));

        let sweeper = DelaySweeper::new(
            stores.delays.clone(),
            producer,
            SweeperConfig::default().with_interval(config.delay_sweep_interval),
        );

        Self {
            publisher,
            consumers: vec![cart_projector, policy_projector, subscriber, checker],
            sweeper,
        }
    }

    /// Spawns every worker on the current runtime. They all stop when
    /// `shutdown` is cancelled.
    pub fn spawn(self, shutdown: CancellationToken) -> WorkersHandle {
        let mut tasks: Vec<JoinHandle<()>> = Vec::with_capacity(self.consumers.len() + 2);

        let publisher = self.publisher;
        let token = shutdown.clone();
        tasks.push(tokio::spawn(async move { publisher.run(token).await }));

        for group in self.consumers {
            let token = shutdown.clone();
            tasks.push(tokio::spawn(async move { group.run(token).await }));
        }

        let sweeper = self.sweeper;
        let token = shutdown.clone();
        tasks.push(tokio::spawn(async move { sweeper.run(token).await }));

        info!(workers = tasks.len(), "Background workers started");
        WorkersHandle {
            token: shutdown,
            tasks,
        }
    }
}

/// Running workers: cancel them and wait for their in-flight iteration.
pub struct WorkersHandle {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl WorkersHandle {
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub async fn join(mut self) {
        let tasks = std::mem::take(&mut self.tasks);
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Background worker panicked");
            }
        }
        info!("Background workers stopped");
    }
}

impl Drop for WorkersHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
