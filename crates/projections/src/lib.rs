//! Read models for the CQRS query side.
//!
//! This crate provides:
//! - [`Projection`] trait for folding domain events into a read model
//! - [`CartView`] and [`TenantPolicyView`] with in-memory and PostgreSQL stores
//! - [`ProjectionHandler`] to feed a projection from a consumer group, once
//!   per event
//! - [`ProjectionProcessor`] to rebuild every view from the event log

pub mod error;
pub mod handler;
pub mod postgres;
pub mod processor;
pub mod projection;
pub mod views;

pub use error::{ProjectionError, Result};
pub use handler::ProjectionHandler;
pub use postgres::{PostgresCartViewStore, PostgresTenantPolicyViewStore};
pub use processor::ProjectionProcessor;
pub use projection::{ProjectedEvent, Projection};
pub use views::{
    CartProjector, CartView, CartViewItem, CartViewStore, InMemoryCartViewStore,
    InMemoryTenantPolicyViewStore, TenantPolicyProjector, TenantPolicyView,
    TenantPolicyViewStore,
};
