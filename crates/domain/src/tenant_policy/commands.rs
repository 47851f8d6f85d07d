//! Tenant policy commands.

use chrono::NaiveTime;
use common::AggregateId;

use crate::command::Command;

/// Creates the tenant's policy. Allowed once per tenant.
#[derive(Debug, Clone)]
pub struct CreatePolicy {
    pub tenant_id: AggregateId,
    pub title: String,
    pub abandoned_minutes: i64,
    pub quiet_from: NaiveTime,
    pub quiet_to: NaiveTime,
}

impl Command for CreatePolicy {
    fn aggregate_id(&self) -> AggregateId {
        self.tenant_id
    }
}

/// Replaces every policy field. Identical values raise no event.
#[derive(Debug, Clone)]
pub struct UpdatePolicy {
    pub tenant_id: AggregateId,
    pub title: String,
    pub abandoned_minutes: i64,
    pub quiet_from: NaiveTime,
    pub quiet_to: NaiveTime,
}

impl Command for UpdatePolicy {
    fn aggregate_id(&self) -> AggregateId {
        self.tenant_id
    }
}

#[derive(Debug, Clone)]
pub enum TenantPolicyCommand {
    Create(CreatePolicy),
    Update(UpdatePolicy),
}

impl From<CreatePolicy> for TenantPolicyCommand {
    fn from(cmd: CreatePolicy) -> Self {
        TenantPolicyCommand::Create(cmd)
    }
}

impl From<UpdatePolicy> for TenantPolicyCommand {
    fn from(cmd: UpdatePolicy) -> Self {
        TenantPolicyCommand::Update(cmd)
    }
}
