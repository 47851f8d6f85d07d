//! Read model views for the CQRS query side.

pub mod cart;
pub mod tenant_policy;

pub use cart::{CartProjector, CartView, CartViewItem, CartViewStore, InMemoryCartViewStore};
pub use tenant_policy::{
    InMemoryTenantPolicyViewStore, TenantPolicyProjector, TenantPolicyView,
    TenantPolicyViewStore,
};
