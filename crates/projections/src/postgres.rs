//! PostgreSQL view stores.

use async_trait::async_trait;
use common::AggregateId;
use domain::{CartStatus, UserId};
use sqlx::types::Json;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::views::{CartView, CartViewItem, CartViewStore, TenantPolicyView, TenantPolicyViewStore};
use crate::{ProjectionError, Result};

/// Cart views in `cart_views`, items as a JSONB array.
#[derive(Clone)]
pub struct PostgresCartViewStore {
    pool: PgPool,
}

impl PostgresCartViewStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_view(row: PgRow) -> Result<CartView> {
        let status: String = row.try_get("status")?;
        let status: CartStatus = serde_json::from_value(serde_json::Value::String(status))?;
        let Json(items): Json<Vec<CartViewItem>> = row.try_get("items")?;
        let item_count: i64 = row.try_get("item_count")?;

        Ok(CartView {
            cart_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("cart_id")?),
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
            tenant_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("tenant_id")?),
            status,
            items,
            total_amount: row.try_get("total_amount")?,
            item_count: usize::try_from(item_count)
                .map_err(|e| ProjectionError::Database(sqlx::Error::Decode(e.into())))?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl CartViewStore for PostgresCartViewStore {
    async fn get(&self, cart_id: AggregateId) -> Result<Option<CartView>> {
        let row = sqlx::query(
            "SELECT cart_id, user_id, tenant_id, status, items, total_amount, item_count, \
             version, created_at, updated_at FROM cart_views WHERE cart_id = $1",
        )
        .bind(cart_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_view).transpose()
    }

    async fn upsert(&self, view: &CartView) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cart_views
                (cart_id, user_id, tenant_id, status, items, total_amount, item_count,
                 version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (cart_id) DO UPDATE SET
                status = EXCLUDED.status,
                items = EXCLUDED.items,
                total_amount = EXCLUDED.total_amount,
                item_count = EXCLUDED.item_count,
                version = EXCLUDED.version,
                updated_at = EXCLUDED.updated_at
            WHERE cart_views.version < EXCLUDED.version
            "#,
        )
        .bind(view.cart_id.as_uuid())
        .bind(view.user_id.as_uuid())
        .bind(view.tenant_id.as_uuid())
        .bind(view.status.as_str())
        .bind(Json(&view.items))
        .bind(view.total_amount)
        .bind(view.item_count as i64)
        .bind(view.version)
        .bind(view.created_at)
        .bind(view.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM cart_views")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Tenant policy views in `tenant_policy_views`.
#[derive(Clone)]
pub struct PostgresTenantPolicyViewStore {
    pool: PgPool,
}

impl PostgresTenantPolicyViewStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_view(row: PgRow) -> Result<TenantPolicyView> {
        Ok(TenantPolicyView {
            tenant_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("tenant_id")?),
            title: row.try_get("title")?,
            abandoned_minutes: row.try_get("abandoned_minutes")?,
            quiet_from: row.try_get("quiet_from")?,
            quiet_to: row.try_get("quiet_to")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl TenantPolicyViewStore for PostgresTenantPolicyViewStore {
    async fn get(&self, tenant_id: AggregateId) -> Result<Option<TenantPolicyView>> {
        let row = sqlx::query(
            "SELECT tenant_id, title, abandoned_minutes, quiet_from, quiet_to, version, \
             created_at, updated_at FROM tenant_policy_views WHERE tenant_id = $1",
        )
        .bind(tenant_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_view).transpose()
    }

    async fn upsert(&self, view: &TenantPolicyView) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tenant_policy_views
                (tenant_id, title, abandoned_minutes, quiet_from, quiet_to, version,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (tenant_id) DO UPDATE SET
                title = EXCLUDED.title,
                abandoned_minutes = EXCLUDED.abandoned_minutes,
                quiet_from = EXCLUDED.quiet_from,
                quiet_to = EXCLUDED.quiet_to,
                version = EXCLUDED.version,
                updated_at = EXCLUDED.updated_at
            WHERE tenant_policy_views.version < EXCLUDED.version
            "#,
        )
        .bind(view.tenant_id.as_uuid())
        .bind(&view.title)
        .bind(view.abandoned_minutes)
        .bind(view.quiet_from)
        .bind(view.quiet_to)
        .bind(view.version)
        .bind(view.created_at)
        .bind(view.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM tenant_policy_views")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
