//! Cart read model.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::AggregateId;
use domain::{CartEvent, CartStatus, ItemId, StreamEvent, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

use crate::Result;
use crate::projection::{ProjectedEvent, Projection, next_in_line};

/// One line of a cart view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartViewItem {
    pub item_id: ItemId,
    pub name: String,
    pub price: i64,
}

/// Denormalized cart as served by `GET /carts/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartView {
    pub cart_id: AggregateId,
    pub user_id: UserId,
    pub tenant_id: AggregateId,
    pub status: CartStatus,
    pub items: Vec<CartViewItem>,
    pub total_amount: i64,
    pub item_count: usize,
    /// Version of the last event folded in.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Storage for cart views.
#[async_trait]
pub trait CartViewStore: Send + Sync {
    async fn get(&self, cart_id: AggregateId) -> Result<Option<CartView>>;

    /// Inserts or replaces the view for `view.cart_id`.
    async fn upsert(&self, view: &CartView) -> Result<()>;

    async fn clear(&self) -> Result<()>;
}

/// Process-local cart views.
#[derive(Clone, Default)]
pub struct InMemoryCartViewStore {
    views: Arc<RwLock<HashMap<AggregateId, CartView>>>,
}

impl InMemoryCartViewStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.views.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.views.read().await.is_empty()
    }
}

#[async_trait]
impl CartViewStore for InMemoryCartViewStore {
    async fn get(&self, cart_id: AggregateId) -> Result<Option<CartView>> {
        Ok(self.views.read().await.get(&cart_id).cloned())
    }

    async fn upsert(&self, view: &CartView) -> Result<()> {
        self.views.write().await.insert(view.cart_id, view.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.views.write().await.clear();
        Ok(())
    }
}

/// Folds cart events into [`CartView`]s.
#[derive(Clone)]
pub struct CartProjector {
    store: Arc<dyn CartViewStore>,
}

impl CartProjector {
    pub fn new(store: Arc<dyn CartViewStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn CartViewStore> {
        &self.store
    }
}

#[async_trait]
impl Projection for CartProjector {
    fn name(&self) -> &'static str {
        "cart-projector"
    }

    async fn apply(&self, event: &ProjectedEvent) -> Result<()> {
        let StreamEvent::Cart(cart_event) = &event.event else {
            return Ok(());
        };
        let version = event.version.as_i64();
        let existing = self.store.get(event.aggregate_id).await?;
        if !next_in_line(
            event.aggregate_id,
            existing.as_ref().map(|view| view.version),
            version,
        )? {
            return Ok(());
        }

        let view = match (cart_event, existing) {
            (CartEvent::CartCreated(data), None) => CartView {
                cart_id: event.aggregate_id,
                user_id: data.user_id,
                tenant_id: data.tenant_id,
                status: CartStatus::Open,
                items: Vec::new(),
                total_amount: 0,
                item_count: 0,
                version,
                created_at: data.created_at,
                updated_at: data.created_at,
            },
            (CartEvent::CartCreated(_), Some(_)) => return Ok(()),
            (_, None) => {
                warn!(
                    cart_id = %event.aggregate_id,
                    version,
                    "Cart event before its creation, skipping"
                );
                return Ok(());
            }
            (CartEvent::ItemAddedToCart(data), Some(mut view)) => {
                view.items.push(CartViewItem {
                    item_id: data.item_id,
                    name: data.name.clone(),
                    price: data.price.amount(),
                });
                view.total_amount = view.items.iter().map(|item| item.price).sum();
                view.item_count = view.items.len();
                view.version = version;
                view.updated_at = data.added_at;
                view
            }
            (CartEvent::CartSubmitted(data), Some(mut view)) => {
                view.status = CartStatus::Submitted;
                view.version = version;
                view.updated_at = data.submitted_at;
                view
            }
            (CartEvent::CartAbandoned(data), Some(mut view)) => {
                view.status = CartStatus::Abandoned;
                view.version = version;
                view.updated_at = data.abandoned_at;
                view
            }
        };

        self.store.upsert(&view).await
    }

    async fn reset(&self) -> Result<()> {
        self.store.clear().await
    }
}
