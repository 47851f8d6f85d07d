//! The union of every domain event, as seen by stream consumers.

use std::sync::LazyLock;

use event_store::EventRegistry;
use serde::Serialize;

use crate::aggregate::DomainEvent;
use crate::cart::{
    CART_ABANDONED, CART_CREATED, CART_SUBMITTED, CartAbandoned, CartCreated, CartEvent,
    CartSubmitted, ITEM_ADDED_TO_CART, ItemAddedToCart,
};
use crate::tenant_policy::{
    POLICY_CREATED, POLICY_UPDATED, TenantPolicyCreated, TenantPolicyEvent, TenantPolicyUpdated,
};

/// Any event published by the domain.
///
/// Consumers that read mixed topics decode into this type and match on the
/// aggregate they care about.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StreamEvent {
    Cart(CartEvent),
    TenantPolicy(TenantPolicyEvent),
}

static REGISTRY: LazyLock<EventRegistry<StreamEvent>> = LazyLock::new(|| {
    let mut registry = EventRegistry::new();
    registry
        .register(CART_CREATED, |e: CartCreated| StreamEvent::Cart(CartEvent::CartCreated(e)))
        .register(ITEM_ADDED_TO_CART, |e: ItemAddedToCart| {
            StreamEvent::Cart(CartEvent::ItemAddedToCart(e))
        })
        .register(CART_SUBMITTED, |e: CartSubmitted| {
            StreamEvent::Cart(CartEvent::CartSubmitted(e))
        })
        .register(CART_ABANDONED, |e: CartAbandoned| {
            StreamEvent::Cart(CartEvent::CartAbandoned(e))
        })
        .register(POLICY_CREATED, |e: TenantPolicyCreated| {
            StreamEvent::TenantPolicy(TenantPolicyEvent::Created(e))
        })
        .register(POLICY_UPDATED, |e: TenantPolicyUpdated| {
            StreamEvent::TenantPolicy(TenantPolicyEvent::Updated(e))
        });
    registry
});

impl DomainEvent for StreamEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StreamEvent::Cart(event) => event.event_type(),
            StreamEvent::TenantPolicy(event) => event.event_type(),
        }
    }

    fn registry() -> &'static EventRegistry<Self> {
        &REGISTRY
    }
}
