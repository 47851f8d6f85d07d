//! Topic routing.

use std::collections::HashMap;

pub const CART_EVENTS_TOPIC: &str = "ec.cart-events";
pub const MISC_EVENTS_TOPIC: &str = "ec.misc-events";

/// Dead-letter topic paired with `topic`.
pub fn dead_letter_topic(topic: &str) -> String {
    format!("{topic}.dlq")
}

/// Maps an event's aggregate type to its destination topic.
///
/// Unmapped aggregate types go to the fallback topic. Mappings are meant to
/// be adjusted at startup, before the router is shared.
#[derive(Debug, Clone)]
pub struct TopicRouter {
    by_aggregate: HashMap<String, String>,
    fallback: String,
}

impl TopicRouter {
    /// Router with the cart and tenant policy aggregates on the cart topic.
    pub fn new() -> Self {
        let mut router = Self::empty(MISC_EVENTS_TOPIC);
        router
            .add_mapping("Cart", CART_EVENTS_TOPIC)
            .add_mapping("TenantCartAbandonedPolicy", CART_EVENTS_TOPIC);
        router
    }

    /// Router with no mappings at all.
    pub fn empty(fallback: impl Into<String>) -> Self {
        Self {
            by_aggregate: HashMap::new(),
            fallback: fallback.into(),
        }
    }

    pub fn add_mapping(
        &mut self,
        aggregate_type: impl Into<String>,
        topic: impl Into<String>,
    ) -> &mut Self {
        self.by_aggregate.insert(aggregate_type.into(), topic.into());
        self
    }

    /// Routing is by aggregate type; the event type is accepted so finer
    /// rules can be added without touching callers.
    pub fn topic_for(&self, _event_type: &str, aggregate_type: &str) -> &str {
        self.by_aggregate
            .get(aggregate_type)
            .map(String::as_str)
            .unwrap_or(&self.fallback)
    }
}

impl Default for TopicRouter {
    fn default() -> Self {
        Self::new()
    }
}
