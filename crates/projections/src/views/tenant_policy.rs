//! Tenant policy read model.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use common::AggregateId;
use domain::tenant_policy::hhmm;
use domain::{StreamEvent, TenantPolicyEvent};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::Result;
use crate::projection::{ProjectedEvent, Projection, next_in_line};

/// Current abandonment policy of a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantPolicyView {
    pub tenant_id: AggregateId,
    pub title: String,
    pub abandoned_minutes: i64,
    #[serde(with = "hhmm")]
    pub quiet_from: NaiveTime,
    #[serde(with = "hhmm")]
    pub quiet_to: NaiveTime,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait TenantPolicyViewStore: Send + Sync {
    async fn get(&self, tenant_id: AggregateId) -> Result<Option<TenantPolicyView>>;

    async fn upsert(&self, view: &TenantPolicyView) -> Result<()>;

    async fn clear(&self) -> Result<()>;
}

#[derive(Clone, Default)]
pub struct InMemoryTenantPolicyViewStore {
    views: Arc<RwLock<HashMap<AggregateId, TenantPolicyView>>>,
}

impl InMemoryTenantPolicyViewStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TenantPolicyViewStore for InMemoryTenantPolicyViewStore {
    async fn get(&self, tenant_id: AggregateId) -> Result<Option<TenantPolicyView>> {
        Ok(self.views.read().await.get(&tenant_id).cloned())
    }

    async fn upsert(&self, view: &TenantPolicyView) -> Result<()> {
        self.views.write().await.insert(view.tenant_id, view.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.views.write().await.clear();
        Ok(())
    }
}

/// Folds tenant policy events into [`TenantPolicyView`]s.
#[derive(Clone)]
pub struct TenantPolicyProjector {
    store: Arc<dyn TenantPolicyViewStore>,
}

impl TenantPolicyProjector {
    pub fn new(store: Arc<dyn TenantPolicyViewStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Projection for TenantPolicyProjector {
    fn name(&self) -> &'static str {
        "tenant-policy-projector"
    }

    async fn apply(&self, event: &ProjectedEvent) -> Result<()> {
        let StreamEvent::TenantPolicy(policy_event) = &event.event else {
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

        let view = match (policy_event, existing) {
            (TenantPolicyEvent::Created(data), _) => TenantPolicyView {
                tenant_id: event.aggregate_id,
                title: data.title.clone(),
                abandoned_minutes: data.abandoned_minutes,
                quiet_from: data.quiet_from,
                quiet_to: data.quiet_to,
                version,
                created_at: data.created_at,
                updated_at: data.created_at,
            },
            (TenantPolicyEvent::Updated(data), Some(view)) => TenantPolicyView {
                title: data.title.clone(),
                abandoned_minutes: data.abandoned_minutes,
                quiet_from: data.quiet_from,
                quiet_to: data.quiet_to,
                version,
                updated_at: data.updated_at,
                ..view
            },
            (TenantPolicyEvent::Updated(_), None) => {
                tracing::warn!(
                    tenant_id = %event.aggregate_id,
                    version,
                    "Policy update before its creation, skipping"
                );
                return Ok(());
            }
        };

        self.store.upsert(&view).await
    }

    async fn reset(&self) -> Result<()> {
        self.store.clear().await
    }
}
