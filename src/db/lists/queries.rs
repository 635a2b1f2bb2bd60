//! IP list queries.

use super::models::{IpList, ListType, NewList};
use crate::db::{DbError, RowState};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

type ListRow = (
    i64,
    String,
    String,
    bool,
    bool,
    Option<i64>,
    Option<i64>,
    String,
    i64,
    i64,
);

const LIST_COLUMNS: &str =
    "id, name, type, is_public, is_global, server_id, user_id, description, state, created_at";

fn list_from_row(row: ListRow) -> Result<IpList, DbError> {
    let (id, name, list_type, is_public, is_global, server_id, user_id, description, state, created_at) =
        row;
    let list_type = ListType::parse(&list_type)
        .ok_or_else(|| DbError::InvalidRow(format!("ip list {} has type '{}'", id, list_type)))?;
    Ok(IpList {
        id,
        name,
        list_type,
        is_public,
        is_global,
        // 0 is how the policy engine writes "no scope"
        server_id: server_id.filter(|&s| s > 0),
        user_id: user_id.filter(|&u| u > 0),
        description,
        state: RowState::from_i64(state),
        created_at,
    })
}

/// Repository for list operations on one connection or transaction.
pub struct ListRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> ListRepository<'c> {
    /// Create a new list repository.
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    /// Insert a list in the enabled state.
    pub async fn create(&mut self, list: &NewList, now: i64) -> Result<i64, DbError> {
        let result = sqlx::query(
            r#"
            INSERT INTO ip_lists (name, type, is_public, is_global, server_id, user_id, description, state, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?)
            "#,
        )
        .bind(&list.name)
        .bind(list.list_type.as_str())
        .bind(list.is_public)
        .bind(list.is_global)
        .bind(list.server_id.filter(|&s| s > 0))
        .bind(list.user_id.filter(|&u| u > 0))
        .bind(&list.description)
        .bind(now)
        .execute(&mut *self.conn)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Find a list in any state.
    pub async fn find(&mut self, list_id: i64) -> Result<Option<IpList>, DbError> {
        let query = format!("SELECT {} FROM ip_lists WHERE id = ?", LIST_COLUMNS);
        let row = sqlx::query_as::<_, ListRow>(&query)
            .bind(list_id)
            .fetch_optional(&mut *self.conn)
            .await?;

        row.map(list_from_row).transpose()
    }

    /// Find a list only if it is enabled.
    pub async fn find_enabled(&mut self, list_id: i64) -> Result<Option<IpList>, DbError> {
        Ok(self.find(list_id).await?.filter(IpList::is_enabled))
    }

    /// Disable a list. Its items are left untouched; readers treat them as
    /// deleted through the list state.
    pub async fn disable(&mut self, list_id: i64) -> Result<bool, DbError> {
        let result = sqlx::query("UPDATE ip_lists SET state = 0 WHERE id = ? AND state = 1")
            .bind(list_id)
            .execute(&mut *self.conn)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Disable every enabled list scoped to a server. Returns the ids.
    pub async fn disable_with_server(&mut self, server_id: i64) -> Result<Vec<i64>, DbError> {
        let ids = sqlx::query_scalar::<_, i64>(
            "UPDATE ip_lists SET state = 0 WHERE server_id = ? AND state = 1 RETURNING id",
        )
        .bind(server_id)
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(ids)
    }

    /// Server the list is scoped to, if any.
    pub async fn find_server_id(&mut self, list_id: i64) -> Result<Option<i64>, DbError> {
        let server_id = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT server_id FROM ip_lists WHERE id = ? AND state = 1",
        )
        .bind(list_id)
        .fetch_optional(&mut *self.conn)
        .await?;

        Ok(server_id.flatten().filter(|&s| s > 0))
    }

    /// Ids of enabled lists owned by a tenant, directly or through one of
    /// their servers.
    pub async fn find_user_list_ids(
        &mut self,
        user_id: i64,
        server_ids: &[i64],
    ) -> Result<Vec<i64>, DbError> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT id FROM ip_lists WHERE state = 1 AND (user_id = ");
        qb.push_bind(user_id);
        if !server_ids.is_empty() {
            qb.push(" OR server_id IN (");
            let mut sep = qb.separated(", ");
            for id in server_ids {
                sep.push_bind(*id);
            }
            sep.push_unseparated(")");
        }
        qb.push(") ORDER BY id");

        let ids = qb
            .build_query_scalar::<i64>()
            .fetch_all(&mut *self.conn)
            .await?;
        Ok(ids)
    }
}
