//! Read-only view of firewall metadata owned by the policy engine.
//!
//! Used for ownership checks on server-scoped lists and for decorating
//! operator views with server, policy, rule group and rule set names.

use crate::db::DbError;
use async_trait::async_trait;
use serde::Serialize;
use sqlx::SqlitePool;

/// Name rendered for a reference whose target no longer resolves.
pub const DELETED_PLACEHOLDER: &str = "[deleted]";

/// A firewall policy reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FirewallPolicy {
    pub id: i64,
    pub name: String,
    /// 0 when the policy is not bound to one server.
    pub server_id: i64,
}

/// An edge node reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRef {
    pub id: i64,
    pub name: String,
    pub cluster_id: i64,
}

/// Lookups against the firewall metadata tables.
#[async_trait]
pub trait PolicyDirectory: Send + Sync {
    /// Name of an enabled server.
    async fn server_name(&self, server_id: i64) -> Result<Option<String>, DbError>;

    async fn user_owns_server(&self, user_id: i64, server_id: i64) -> Result<bool, DbError>;

    /// Enabled servers owned by a tenant.
    async fn user_server_ids(&self, user_id: i64) -> Result<Vec<i64>, DbError>;

    async fn firewall_policy(&self, policy_id: i64) -> Result<Option<FirewallPolicy>, DbError>;

    /// The enabled policy that uses a list as its allow, deny or grey list.
    async fn policy_for_list(&self, list_id: i64) -> Result<Option<FirewallPolicy>, DbError>;

    async fn rule_group_name(&self, group_id: i64) -> Result<Option<String>, DbError>;

    async fn rule_set_name(&self, set_id: i64) -> Result<Option<String>, DbError>;

    async fn node(&self, node_id: i64) -> Result<Option<NodeRef>, DbError>;
}

/// [`PolicyDirectory`] over the metadata tables in the service database.
pub struct SqlDirectory {
    pool: SqlitePool,
}

impl SqlDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn name_in(&self, table: &str, id: i64) -> Result<Option<String>, DbError> {
        let query = format!("SELECT name FROM {} WHERE id = ? AND state = 1", table);
        let name = sqlx::query_scalar::<_, String>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(name)
    }
}

#[async_trait]
impl PolicyDirectory for SqlDirectory {
    async fn server_name(&self, server_id: i64) -> Result<Option<String>, DbError> {
        self.name_in("servers", server_id).await
    }

    async fn user_owns_server(&self, user_id: i64, server_id: i64) -> Result<bool, DbError> {
        let found = sqlx::query_scalar::<_, i64>(
            "SELECT 1 FROM servers WHERE id = ? AND user_id = ? AND state = 1",
        )
        .bind(server_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    async fn user_server_ids(&self, user_id: i64) -> Result<Vec<i64>, DbError> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM servers WHERE user_id = ? AND state = 1 ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn firewall_policy(&self, policy_id: i64) -> Result<Option<FirewallPolicy>, DbError> {
        let row = sqlx::query_as::<_, (i64, String, i64)>(
            "SELECT id, name, server_id FROM http_firewall_policies WHERE id = ? AND state = 1",
        )
        .bind(policy_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, name, server_id)| FirewallPolicy {
            id,
            name,
            server_id,
        }))
    }

    async fn policy_for_list(&self, list_id: i64) -> Result<Option<FirewallPolicy>, DbError> {
        let row = sqlx::query_as::<_, (i64, String, i64)>(
            r#"
            SELECT id, name, server_id FROM http_firewall_policies
            WHERE state = 1 AND (allow_list_id = ? OR deny_list_id = ? OR grey_list_id = ?)
            ORDER BY id LIMIT 1
            "#,
        )
        .bind(list_id)
        .bind(list_id)
        .bind(list_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, name, server_id)| FirewallPolicy {
            id,
            name,
            server_id,
        }))
    }

    async fn rule_group_name(&self, group_id: i64) -> Result<Option<String>, DbError> {
        self.name_in("http_firewall_rule_groups", group_id).await
    }

    async fn rule_set_name(&self, set_id: i64) -> Result<Option<String>, DbError> {
        self.name_in("http_firewall_rule_sets", set_id).await
    }

    async fn node(&self, node_id: i64) -> Result<Option<NodeRef>, DbError> {
        let row = sqlx::query_as::<_, (i64, String, i64)>(
            "SELECT id, name, cluster_id FROM nodes WHERE id = ? AND state = 1",
        )
        .bind(node_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, name, cluster_id)| NodeRef {
            id,
            name,
            cluster_id,
        }))
    }
}
