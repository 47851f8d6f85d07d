//! Tenant cart abandonment policy endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::AggregateId;
use domain::{CreatePolicy, DomainError, UpdatePolicy, parse_time_of_day};
use event_store::EventStore;
use projections::TenantPolicyView;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

/// Body of both create and update. Quiet bounds are `HH:MM`.
#[derive(Debug, Deserialize)]
pub struct PolicyRequest {
    pub title: String,
    pub abandoned_minutes: i64,
    pub quiet_from: String,
    pub quiet_to: String,
}

#[derive(Debug, Serialize)]
pub struct PolicyCommandResponse {
    pub tenant_id: AggregateId,
    pub version: i64,
}

/// POST /tenants/{id}/cart-abandoned-policies
#[tracing::instrument(skip(state, req))]
pub async fn create<S: EventStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(tenant_id): Path<AggregateId>,
    Json(req): Json<PolicyRequest>,
) -> Result<(StatusCode, Json<PolicyCommandResponse>), ApiError> {
    let cmd = CreatePolicy {
        tenant_id,
        title: req.title,
        abandoned_minutes: req.abandoned_minutes,
        quiet_from: parse_time_of_day(&req.quiet_from).map_err(DomainError::from)?,
        quiet_to: parse_time_of_day(&req.quiet_to).map_err(DomainError::from)?,
    };
    let result = state.policies.create(cmd).await?;

    Ok((
        StatusCode::CREATED,
        Json(PolicyCommandResponse {
            tenant_id,
            version: result.new_version.as_i64(),
        }),
    ))
}

/// PUT /tenants/{id}/cart-abandoned-policies
#[tracing::instrument(skip(state, req))]
pub async fn update<S: EventStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(tenant_id): Path<AggregateId>,
    Json(req): Json<PolicyRequest>,
) -> Result<Json<PolicyCommandResponse>, ApiError> {
    let cmd = UpdatePolicy {
        tenant_id,
        title: req.title,
        abandoned_minutes: req.abandoned_minutes,
        quiet_from: parse_time_of_day(&req.quiet_from).map_err(DomainError::from)?,
        quiet_to: parse_time_of_day(&req.quiet_to).map_err(DomainError::from)?,
    };
    let result = state.policies.update(cmd).await?;

    Ok(Json(PolicyCommandResponse {
        tenant_id,
        version: result.new_version.as_i64(),
    }))
}

/// GET /tenants/{id}/cart-abandoned-policies
#[tracing::instrument(skip(state))]
pub async fn get<S: EventStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(tenant_id): Path<AggregateId>,
) -> Result<Json<TenantPolicyView>, ApiError> {
    state
        .policy_views
        .get(tenant_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("policy for tenant {tenant_id} not found")))
}
