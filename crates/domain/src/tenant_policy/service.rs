//! Tenant policy service.

use common::AggregateId;
use event_store::EventStore;

use crate::command::{CommandHandler, CommandResult, RetryPolicy};
use crate::error::DomainError;

use super::{CreatePolicy, TenantPolicy, UpdatePolicy};

/// Service for managing tenant cart abandonment policies.
pub struct TenantPolicyService<S: EventStore> {
    handler: CommandHandler<S, TenantPolicy>,
}

impl<S: EventStore> TenantPolicyService<S> {
    pub fn new(store: S) -> Self {
        Self {
            handler: CommandHandler::new(store),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.handler = self.handler.with_retry_policy(retry);
        self
    }

    pub fn handler(&self) -> &CommandHandler<S, TenantPolicy> {
        &self.handler
    }

    #[tracing::instrument(skip(self), fields(tenant_id = %cmd.tenant_id))]
    pub async fn create(
        &self,
        cmd: CreatePolicy,
    ) -> Result<CommandResult<TenantPolicy>, DomainError> {
        self.handler.execute(cmd).await
    }

    #[tracing::instrument(skip(self), fields(tenant_id = %cmd.tenant_id))]
    pub async fn update(
        &self,
        cmd: UpdatePolicy,
    ) -> Result<CommandResult<TenantPolicy>, DomainError> {
        self.handler.execute(cmd).await
    }

    /// Loads a tenant's policy by replaying its history.
    ///
    /// Returns None if the tenant has no policy.
    #[tracing::instrument(skip(self))]
    pub async fn get_policy(
        &self,
        tenant_id: AggregateId,
    ) -> Result<Option<TenantPolicy>, DomainError> {
        self.handler.load_existing(tenant_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenant_policy::parse_time_of_day;
    use crate::Aggregate;
    use common::ErrorKind;
    use event_store::{InMemoryEventStore, Version};

    fn create(tenant_id: AggregateId) -> CreatePolicy {
        CreatePolicy {
            tenant_id,
            title: "Default".to_string(),
            abandoned_minutes: 30,
            quiet_from: parse_time_of_day("22:00").unwrap(),
            quiet_to: parse_time_of_day("08:00").unwrap(),
        }
    }

    fn update_from(cmd: &CreatePolicy) -> UpdatePolicy {
        UpdatePolicy {
            tenant_id: cmd.tenant_id,
            title: cmd.title.clone(),
            abandoned_minutes: cmd.abandoned_minutes,
            quiet_from: cmd.quiet_from,
            quiet_to: cmd.quiet_to,
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let service = TenantPolicyService::new(InMemoryEventStore::new());
        let tenant_id = AggregateId::new();

        assert!(service.get_policy(tenant_id).await.unwrap().is_none());

        service.create(create(tenant_id)).await.unwrap();
        let policy = service.get_policy(tenant_id).await.unwrap().unwrap();
        assert_eq!(policy.title(), "Default");
        assert_eq!(policy.version(), Version::first());
    }

    #[tokio::test]
    async fn test_second_create_is_unpermitted() {
        let service = TenantPolicyService::new(InMemoryEventStore::new());
        let tenant_id = AggregateId::new();
        service.create(create(tenant_id)).await.unwrap();

        let err = service.create(create(tenant_id)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnpermittedOp);
        assert_eq!(err.to_string(), "tenant policy already exists");
    }

    #[tokio::test]
    async fn test_unchanged_update_stores_nothing() {
        let store = InMemoryEventStore::new();
        let service = TenantPolicyService::new(store.clone());
        let tenant_id = AggregateId::new();
        let cmd = create(tenant_id);
        service.create(cmd.clone()).await.unwrap();

        let result = service.update(update_from(&cmd)).await.unwrap();

        assert!(result.events.is_empty());
        assert_eq!(result.new_version, Version::first());
        assert_eq!(store.event_count().await, 1);
    }

    #[tokio::test]
    async fn test_update_without_policy_fails() {
        let service = TenantPolicyService::new(InMemoryEventStore::new());
        let cmd = create(AggregateId::new());

        let err = service.update(update_from(&cmd)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnpermittedOp);
    }
}
