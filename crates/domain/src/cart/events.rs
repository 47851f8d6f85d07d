//! Cart domain events.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use common::AggregateId;
use event_store::EventRegistry;
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

use super::{ItemId, Price, UserId};

pub const CART_CREATED: &str = "CartCreatedEvent";
pub const ITEM_ADDED_TO_CART: &str = "ItemAddedToCartEvent";
pub const CART_SUBMITTED: &str = "CartSubmittedEvent";
pub const CART_ABANDONED: &str = "CartAbandonedEvent";

/// Events that can occur on a cart aggregate.
///
/// Serializes as the variant's payload; the tag is [`DomainEvent::event_type`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CartEvent {
    /// Cart was opened by its first item.
    CartCreated(CartCreated),

    /// An item line was appended.
    ItemAddedToCart(ItemAddedToCart),

    /// Cart was submitted for purchase.
    CartSubmitted(CartSubmitted),

    /// Cart sat untouched past its tenant's abandonment delay.
    CartAbandoned(CartAbandoned),
}

static REGISTRY: LazyLock<EventRegistry<CartEvent>> = LazyLock::new(|| {
    let mut registry = EventRegistry::new();
    registry
        .register(CART_CREATED, CartEvent::CartCreated)
        .register(ITEM_ADDED_TO_CART, CartEvent::ItemAddedToCart)
        .register(CART_SUBMITTED, CartEvent::CartSubmitted)
        .register(CART_ABANDONED, CartEvent::CartAbandoned);
    registry
});

impl DomainEvent for CartEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CartEvent::CartCreated(_) => CART_CREATED,
            CartEvent::ItemAddedToCart(_) => ITEM_ADDED_TO_CART,
            CartEvent::CartSubmitted(_) => CART_SUBMITTED,
            CartEvent::CartAbandoned(_) => CART_ABANDONED,
        }
    }

    fn registry() -> &'static EventRegistry<Self> {
        &REGISTRY
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartCreated {
    pub cart_id: AggregateId,
    pub user_id: UserId,
    pub tenant_id: AggregateId,
    pub created_at: DateTime<Utc>,
}

/// Carries the tenant so subscribers need not load the cart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemAddedToCart {
    pub item_id: ItemId,
    pub name: String,
    pub price: Price,
    pub tenant_id: AggregateId,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartSubmitted {
    /// Sum of item prices at submission time.
    pub total_amount: i64,
    pub item_count: usize,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartAbandoned {
    pub abandoned_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_store::EventStoreError;

    #[test]
    fn test_event_payload_has_no_tag() {
        let event = CartEvent::CartSubmitted(CartSubmitted {
            total_amount: 150,
            item_count: 2,
            submitted_at: Utc::now(),
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["total_amount"], 150);
        assert!(json.get("CartSubmitted").is_none());
        assert_eq!(event.event_type(), "CartSubmittedEvent");
    }

    #[test]
    fn test_registry_decodes_by_tag() {
        let payload = serde_json::json!({
            "item_id": ItemId::new(),
            "name": "Widget",
            "price": 100,
            "tenant_id": AggregateId::new(),
            "added_at": Utc::now(),
        });

        let event = CartEvent::registry()
            .deserialize(ITEM_ADDED_TO_CART, &serde_json::to_vec(&payload).unwrap())
            .unwrap();

        match event {
            CartEvent::ItemAddedToCart(data) => {
                assert_eq!(data.name, "Widget");
                assert_eq!(data.price.amount(), 100);
            }
            other => panic!("expected ItemAddedToCart, got {other:?}"),
        }
    }

    #[test]
    fn test_registry_rejects_unknown_tag() {
        let result = CartEvent::registry().deserialize("GiftCardIssuedEvent", b"{}");
        assert!(matches!(result, Err(EventStoreError::UnknownEventType(t)) if t == "GiftCardIssuedEvent"));
    }
}
