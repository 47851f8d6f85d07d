//! Domain layer for the cart event-sourcing system.
//!
//! This crate provides the core domain abstractions including:
//! - Aggregate trait for event-sourced entities
//! - DomainEvent trait and the registries that decode stored events
//! - CommandHandler with optimistic-lock retry
//! - Cart and TenantPolicy aggregates with their services

pub mod aggregate;
pub mod cart;
pub mod command;
pub mod error;
pub mod events;
pub mod tenant_policy;

pub use aggregate::{Aggregate, DomainEvent, RecordedEvent};
pub use cart::{
    AddItem, Cart, CartCommand, CartError, CartEvent, CartItem, CartService, CartStatus, ItemId,
    MarkAbandoned, Price, SubmitCart, UserId,
};
pub use command::{Command, CommandHandler, CommandResult, RetryPolicy};
pub use error::DomainError;
pub use events::StreamEvent;
pub use tenant_policy::{
    CreatePolicy, QuietWindow, TenantPolicy, TenantPolicyCommand, TenantPolicyError,
    TenantPolicyEvent, TenantPolicyService, UpdatePolicy, parse_time_of_day,
};
