//! HTTP API server and process wiring for the cart event-sourcing system.
//!
//! Provides REST endpoints for carts and tenant abandonment policies, and
//! assembles the background workers (outbox publisher, consumer groups,
//! delay sweeper) that move events from the store to the read models and
//! the abandonment saga.

pub mod config;
pub mod error;
pub mod routes;
pub mod workers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use domain::{CartService, RetryPolicy, TenantPolicyService};
use event_store::EventStore;
use metrics_exporter_prometheus::PrometheusHandle;
use projections::{CartViewStore, TenantPolicyViewStore};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use workers::{Stores, Workers};

/// Shared application state accessible from all handlers.
pub struct AppState<S: EventStore> {
    pub carts: CartService<S>,
    pub policies: TenantPolicyService<S>,
    pub cart_views: Arc<dyn CartViewStore>,
    pub policy_views: Arc<dyn TenantPolicyViewStore>,
}

impl<S: EventStore + Clone> AppState<S> {
    /// Builds the command services and read-model handles over `stores`.
    pub fn new(stores: &Stores<S>, retry: RetryPolicy) -> Self {
        Self {
            carts: CartService::new(stores.events.clone()).with_retry_policy(retry),
            policies: TenantPolicyService::new(stores.events.clone()).with_retry_policy(retry),
            cart_views: stores.cart_views.clone(),
            policy_views: stores.policy_views.clone(),
        }
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: EventStore + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/carts/{id}", get(routes::carts::get::<S>))
        .route("/carts/{id}/items", post(routes::carts::add_item::<S>))
        .route("/carts/{id}/submit", post(routes::carts::submit::<S>))
        .route(
            "/tenants/{id}/cart-abandoned-policies",
            get(routes::tenant_policies::get::<S>)
                .post(routes::tenant_policies::create::<S>)
                .put(routes::tenant_policies::update::<S>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
