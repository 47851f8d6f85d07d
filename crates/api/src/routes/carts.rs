//! Cart command and query endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::AggregateId;
use domain::{AddItem, ItemId, SubmitCart, UserId};
use event_store::EventStore;
use projections::CartView;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    /// Generated when omitted.
    pub item_id: Option<Uuid>,
    pub name: String,
    pub price: i64,
}

#[derive(Debug, Serialize)]
pub struct CartCommandResponse {
    pub cart_id: AggregateId,
    pub version: i64,
}

/// POST /carts/{id}/items
#[tracing::instrument(skip(state, req))]
pub async fn add_item<S: EventStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(cart_id): Path<AggregateId>,
    Json(req): Json<AddItemRequest>,
) -> Result<Json<CartCommandResponse>, ApiError> {
    let cmd = AddItem {
        cart_id,
        user_id: UserId::from_uuid(req.user_id),
        tenant_id: AggregateId::from_uuid(req.tenant_id),
        item_id: req.item_id.map(ItemId::from_uuid).unwrap_or_default(),
        name: req.name,
        price: req.price,
    };
    let result = state.carts.add_item(cmd).await?;

    Ok(Json(CartCommandResponse {
        cart_id,
        version: result.new_version.as_i64(),
    }))
}

/// POST /carts/{id}/submit
#[tracing::instrument(skip(state))]
pub async fn submit<S: EventStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(cart_id): Path<AggregateId>,
) -> Result<Json<CartCommandResponse>, ApiError> {
    let result = state.carts.submit(SubmitCart::new(cart_id)).await?;

    Ok(Json(CartCommandResponse {
        cart_id,
        version: result.new_version.as_i64(),
    }))
}

/// GET /carts/{id}
///
/// Served from the read model, so a cart appears once its events have been
/// projected.
#[tracing::instrument(skip(state))]
pub async fn get<S: EventStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(cart_id): Path<AggregateId>,
) -> Result<Json<CartView>, ApiError> {
    state
        .cart_views
        .get(cart_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("cart {cart_id} not found")))
}
