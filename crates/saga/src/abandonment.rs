//! Cart abandonment saga.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::AggregateId;
use domain::{
    Aggregate, CartEvent, CartService, DomainEvent, MarkAbandoned, StreamEvent,
    TenantPolicyService,
};
use event_store::{EventStore, EventStoreError, IdempotencyStore, Version};
use messaging::{HandlerOutcome, Message, MessageHandler};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::Result;
use crate::delay::DelayScheduler;

pub const CHECK_TOPIC: &str = "cart-abandonment-check";
pub const CHECK_MESSAGE_TYPE: &str = "CheckCartAbandonmentCommand";
pub const SUBSCRIBER_GROUP: &str = "cart-abandonment-group";
pub const CHECKER_GROUP: &str = "cart-abandonment-checker";

/// Payload of a scheduled abandonment check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckCartAbandonment {
    pub cart_id: AggregateId,
    pub tenant_id: AggregateId,
    pub item_added_event_id: Uuid,
    /// Unix seconds.
    pub item_added_at: i64,
    pub delay_minutes: i64,
}

/// Maps a handler error onto a consumer outcome.
fn outcome_for(error: crate::SagaError) -> HandlerOutcome {
    HandlerOutcome::from_error(error.kind(), error.to_string())
}

/// Schedules an abandonment check for every item added to a cart.
///
/// The check message reuses the item-added event id, so a redelivered
/// event never schedules a second check.
pub struct CartAbandonmentSubscriber<S: EventStore> {
    policies: TenantPolicyService<S>,
    scheduler: Arc<dyn DelayScheduler>,
    idempotency: Arc<dyn IdempotencyStore>,
}

impl<S: EventStore> CartAbandonmentSubscriber<S> {
    pub fn new(
        policies: TenantPolicyService<S>,
        scheduler: Arc<dyn DelayScheduler>,
        idempotency: Arc<dyn IdempotencyStore>,
    ) -> Self {
        Self {
            policies,
            scheduler,
            idempotency,
        }
    }

    async fn schedule_check(&self, message: &Message) -> Result<()> {
        let event = match StreamEvent::registry().decode(&message.message_type, message.data.clone())
        {
            Ok(StreamEvent::Cart(CartEvent::ItemAddedToCart(event))) => event,
            Ok(_) | Err(EventStoreError::UnknownEventType(_)) => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let event_id = message.event_id();
        if self
            .idempotency
            .is_processed(SUBSCRIBER_GROUP, event_id)
            .await?
        {
            debug!(%event_id, "Abandonment check already scheduled");
            return Ok(());
        }

        let cart_id = message.aggregate_id;
        let Some(policy) = self.policies.get_policy(event.tenant_id).await? else {
            info!(
                %cart_id,
                tenant_id = %event.tenant_id,
                "No abandonment policy for tenant, skipping check"
            );
            self.idempotency
                .mark_processed(SUBSCRIBER_GROUP, event_id)
                .await?;
            return Ok(());
        };

        let delay = policy.cart_abandoned_delay();
        let check = CheckCartAbandonment {
            cart_id,
            tenant_id: event.tenant_id,
            item_added_event_id: message.id,
            item_added_at: event.added_at.timestamp(),
            delay_minutes: policy.abandoned_minutes(),
        };
        let mut check_message = Message::new(
            CHECK_MESSAGE_TYPE,
            serde_json::to_value(&check)?,
            cart_id,
            message.version(),
        );
        check_message.id = message.id;

        let scheduled = self
            .scheduler
            .schedule_delayed(CHECK_TOPIC, &cart_id.to_string(), check_message, delay)
            .await?;
        self.idempotency
            .mark_processed(SUBSCRIBER_GROUP, event_id)
            .await?;

        if scheduled {
            info!(
                %cart_id,
                version = message.version,
                delay_minutes = check.delay_minutes,
                "Scheduled abandonment check"
            );
        } else {
            debug!(%cart_id, version = message.version, "Abandonment check already scheduled");
        }
        Ok(())
    }
}

#[async_trait]
impl<S: EventStore + 'static> MessageHandler for CartAbandonmentSubscriber<S> {
    fn name(&self) -> &str {
        "cart-abandonment-subscriber"
    }

    async fn handle(&self, message: &Message) -> HandlerOutcome {
        match self.schedule_check(message).await {
            Ok(()) => HandlerOutcome::Ack,
            Err(e) => outcome_for(e),
        }
    }
}

/// Marks a cart abandoned when its scheduled check fires and the cart has
/// not moved since the item was added.
///
/// Inside the tenant's quiet window the check is pushed to the end of the
/// window instead.
pub struct CartAbandonmentChecker<S: EventStore> {
    carts: CartService<S>,
    policies: TenantPolicyService<S>,
    scheduler: Arc<dyn DelayScheduler>,
    clock: fn() -> DateTime<Utc>,
}

impl<S: EventStore> CartAbandonmentChecker<S> {
    pub fn new(
        carts: CartService<S>,
        policies: TenantPolicyService<S>,
        scheduler: Arc<dyn DelayScheduler>,
    ) -> Self {
        Self {
            carts,
            policies,
            scheduler,
            clock: Utc::now,
        }
    }

    /// Replaces the wall clock used for quiet-window checks.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    async fn check(&self, message: &Message) -> Result<()> {
        if message.message_type != CHECK_MESSAGE_TYPE {
            return Ok(());
        }
        let check: CheckCartAbandonment = serde_json::from_value(message.data.clone())?;
        let observed = Version::new(message.version);

        let Some(cart) = self.carts.get_cart(check.cart_id).await? else {
            warn!(cart_id = %check.cart_id, "Abandonment check for unknown cart");
            return Ok(());
        };
        if !cart.is_open() || cart.version() != observed {
            debug!(
                cart_id = %check.cart_id,
                status = %cart.status(),
                version = %cart.version(),
                observed = %observed,
                "Cart moved on since the check was scheduled"
            );
            return Ok(());
        }

        if let Some(policy) = self.policies.get_policy(check.tenant_id).await? {
            if let Some(remaining) = policy.quiet_time_remaining((self.clock)()) {
                info!(
                    cart_id = %check.cart_id,
                    remaining_secs = remaining.as_secs(),
                    "Tenant in quiet time, postponing abandonment check"
                );
                // A fresh id: the fired check may still hold its own id
                // in the queue until the sweeper completes it.
                let postponed = Message {
                    id: Uuid::new_v4(),
                    ..message.clone()
                };
                self.scheduler
                    .schedule_delayed(
                        CHECK_TOPIC,
                        &check.cart_id.to_string(),
                        postponed,
                        remaining,
                    )
                    .await?;
                return Ok(());
            }
        }

        let result = self
            .carts
            .mark_abandoned(MarkAbandoned::new(check.cart_id, observed))
            .await?;
        if !result.events.is_empty() {
            metrics::counter!("cart_abandonments_detected_total").increment(1);
            info!(
                cart_id = %check.cart_id,
                tenant_id = %check.tenant_id,
                item_added_at = check.item_added_at,
                "Cart abandoned"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl<S: EventStore + 'static> MessageHandler for CartAbandonmentChecker<S> {
    fn name(&self) -> &str {
        "cart-abandonment-checker"
    }

    async fn handle(&self, message: &Message) -> HandlerOutcome {
        match self.check(message).await {
            Ok(()) => HandlerOutcome::Ack,
            Err(e) => outcome_for(e),
        }
    }
}
