//! Tenant policy domain events.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveTime, Utc};
use common::AggregateId;
use event_store::EventRegistry;
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

use super::aggregate::hhmm;

pub const POLICY_CREATED: &str = "TenantCartAbandonedPolicyCreatedEvent";
pub const POLICY_UPDATED: &str = "TenantCartAbandonedPolicyUpdatedEvent";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TenantPolicyEvent {
    Created(TenantPolicyCreated),
    Updated(TenantPolicyUpdated),
}

static REGISTRY: LazyLock<EventRegistry<TenantPolicyEvent>> = LazyLock::new(|| {
    let mut registry = EventRegistry::new();
    registry
        .register(POLICY_CREATED, TenantPolicyEvent::Created)
        .register(POLICY_UPDATED, TenantPolicyEvent::Updated);
    registry
});

impl DomainEvent for TenantPolicyEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TenantPolicyEvent::Created(_) => POLICY_CREATED,
            TenantPolicyEvent::Updated(_) => POLICY_UPDATED,
        }
    }

    fn registry() -> &'static EventRegistry<Self> {
        &REGISTRY
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantPolicyCreated {
    pub tenant_id: AggregateId,
    pub title: String,
    pub abandoned_minutes: i64,
    #[serde(with = "hhmm")]
    pub quiet_from: NaiveTime,
    #[serde(with = "hhmm")]
    pub quiet_to: NaiveTime,
    pub created_at: DateTime<Utc>,
}

/// Full replacement of the policy fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantPolicyUpdated {
    pub title: String,
    pub abandoned_minutes: i64,
    #[serde(with = "hhmm")]
    pub quiet_from: NaiveTime,
    #[serde(with = "hhmm")]
    pub quiet_to: NaiveTime,
    pub updated_at: DateTime<Utc>,
}
