//! IP item queries.
//!
//! Every write method allocates a version as its first statement. Under
//! SQLite that first `UPDATE` takes the database write lock, so the
//! read-before-write dedup that follows can't race another writer, and
//! versions come out in commit order.

use super::models::{
    IpItem, ItemFilter, ItemScope, ItemType, NewItem, Provenance, SearchFilter, StoredWrite,
    Tombstone,
};
use crate::db::{DbError, RowState};
use crate::security::range::{self, Family, IpRange};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};
use std::net::IpAddr;

const ITEM_COLUMNS: &str = "id, list_id, value, ip_from, ip_to, type, version, state, expired_at, \
     reason, event_level, node_id, server_id, source_node_id, source_server_id, \
     source_http_firewall_policy_id, source_http_firewall_rule_group_id, \
     source_http_firewall_rule_set_id, is_read, created_at";

const JOINED_ITEM_COLUMNS: &str = "i.id, i.list_id, i.value, i.ip_from, i.ip_to, i.type, i.version, \
     i.state, i.expired_at, i.reason, i.event_level, i.node_id, i.server_id, i.source_node_id, \
     i.source_server_id, i.source_http_firewall_policy_id, i.source_http_firewall_rule_group_id, \
     i.source_http_firewall_rule_set_id, i.is_read, i.created_at";

fn item_from_row(row: &SqliteRow) -> Result<IpItem, DbError> {
    let id: i64 = row.try_get("id")?;
    let raw_type: String = row.try_get("type")?;
    // Rows written before the type column existed carry an empty type
    let item_type = if raw_type.is_empty() {
        ItemType::Ipv4
    } else {
        ItemType::parse(&raw_type)
            .ok_or_else(|| DbError::InvalidRow(format!("ip item {} has type '{}'", id, raw_type)))?
    };

    Ok(IpItem {
        id,
        list_id: row.try_get("list_id")?,
        value: row.try_get("value")?,
        ip_from: row.try_get("ip_from")?,
        ip_to: row.try_get("ip_to")?,
        item_type,
        version: row.try_get("version")?,
        state: RowState::from_i64(row.try_get("state")?),
        expired_at: row.try_get("expired_at")?,
        reason: row.try_get("reason")?,
        event_level: row.try_get("event_level")?,
        node_id: row.try_get("node_id")?,
        server_id: row.try_get("server_id")?,
        source: Provenance {
            source_node_id: row.try_get("source_node_id")?,
            source_server_id: row.try_get("source_server_id")?,
            source_http_firewall_policy_id: row.try_get("source_http_firewall_policy_id")?,
            source_http_firewall_rule_group_id: row.try_get("source_http_firewall_rule_group_id")?,
            source_http_firewall_rule_set_id: row.try_get("source_http_firewall_rule_set_id")?,
        }
        .normalized(),
        is_read: row.try_get("is_read")?,
        created_at: row.try_get("created_at")?,
    })
}

fn items_from_rows(rows: &[SqliteRow]) -> Result<Vec<IpItem>, DbError> {
    rows.iter().map(item_from_row).collect()
}

/// Restrict a query to the lists in `scope`.
fn push_scope(qb: &mut QueryBuilder<'_, Sqlite>, column: &str, scope: &ItemScope) {
    let ItemScope::Lists(ids) = scope else {
        return;
    };
    if ids.is_empty() {
        qb.push(" AND 0");
        return;
    }
    qb.push(" AND ");
    qb.push(column);
    qb.push(" IN (");
    let mut sep = qb.separated(", ");
    for id in ids {
        sep.push_bind(*id);
    }
    sep.push_unseparated(")");
}

/// Items that are enabled and not lazily expired at `now`.
fn push_active(qb: &mut QueryBuilder<'_, Sqlite>, prefix: &str, now: i64) {
    qb.push(format!(
        " AND {p}state = 1 AND ({p}expired_at = 0 OR {p}expired_at > ",
        p = prefix
    ));
    qb.push_bind(now);
    qb.push(")");
}

/// Items whose range contains `ip`; `all` items contain everything.
fn push_contains(qb: &mut QueryBuilder<'_, Sqlite>, prefix: &str, ip: &IpAddr) {
    let key = range::key(ip);
    qb.push(format!(" AND ({p}family = 'all' OR ({p}family = ", p = prefix));
    qb.push_bind(Family::of(ip).as_str());
    qb.push(format!(" AND {}from_key <= ", prefix));
    qb.push_bind(key.clone());
    qb.push(format!(" AND {}to_key >= ", prefix));
    qb.push_bind(key);
    qb.push("))");
}

fn push_list_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &ItemFilter, now: i64) {
    qb.push(" WHERE list_id = ");
    qb.push_bind(filter.list_id);
    push_active(qb, "", now);
    if !filter.keyword.is_empty() {
        let pattern = format!("%{}%", filter.keyword);
        qb.push(" AND (value LIKE ");
        qb.push_bind(pattern.clone());
        qb.push(" OR ip_from LIKE ");
        qb.push_bind(pattern.clone());
        qb.push(" OR ip_to LIKE ");
        qb.push_bind(pattern.clone());
        qb.push(" OR reason LIKE ");
        qb.push_bind(pattern);
        qb.push(")");
    }
    if !filter.ip_from.is_empty() {
        qb.push(" AND ip_from = ");
        qb.push_bind(filter.ip_from.clone());
    }
    if !filter.ip_to.is_empty() {
        qb.push(" AND ip_to = ");
        qb.push_bind(filter.ip_to.clone());
    }
    if !filter.event_level.is_empty() {
        qb.push(" AND event_level = ");
        qb.push_bind(filter.event_level.clone());
    }
}

// The list join is a LEFT JOIN so items of vanished lists still surface and
// can be cleaned up by the caller.
fn push_search_filter(
    qb: &mut QueryBuilder<'_, Sqlite>,
    scope: &ItemScope,
    filter: &SearchFilter,
    now: i64,
) {
    qb.push(" FROM ip_items i LEFT JOIN ip_lists l ON l.id = i.list_id WHERE 1 = 1");
    push_active(qb, "i.", now);
    push_scope(qb, "i.list_id", scope);
    if !filter.keyword.is_empty() {
        let pattern = format!("%{}%", filter.keyword);
        qb.push(" AND (i.value LIKE ");
        qb.push_bind(pattern.clone());
        qb.push(" OR i.reason LIKE ");
        qb.push_bind(pattern);
        qb.push(")");
    }
    if let Some(ip) = &filter.ip {
        push_contains(qb, "i.", ip);
    }
    if filter.unread_only {
        qb.push(" AND i.is_read = 0");
    }
    if !filter.event_level.is_empty() {
        qb.push(" AND i.event_level = ");
        qb.push_bind(filter.event_level.clone());
    }
    if let Some(list_type) = filter.list_type {
        qb.push(" AND l.type = ");
        qb.push_bind(list_type.as_str());
    }
    if filter.global_only {
        qb.push(" AND l.is_public = 1 AND l.is_global = 1");
    }
}

/// Repository for item operations on one connection or transaction.
pub struct ItemRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> ItemRepository<'c> {
    /// Create a new item repository.
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    /// Allocate the next global version.
    pub async fn next_version(&mut self) -> Result<i64, DbError> {
        let version = sqlx::query_scalar::<_, i64>(
            "UPDATE ip_item_sequence SET value = value + 1 WHERE id = 1 RETURNING value",
        )
        .fetch_one(&mut *self.conn)
        .await?;
        Ok(version)
    }

    /// Use the version reserved at the start of the write, then fresh ones.
    async fn allocate(&mut self, reserved: &mut Option<i64>) -> Result<i64, DbError> {
        match reserved.take() {
            Some(v) => Ok(v),
            None => self.next_version().await,
        }
    }

    /// Enabled items in the list whose range overlaps `[from_key, to_key]`
    /// within one family.
    async fn find_overlapping(
        &mut self,
        list_id: i64,
        family: Family,
        from_key: &[u8],
        to_key: &[u8],
        exclude_id: i64,
    ) -> Result<Vec<i64>, DbError> {
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT id FROM ip_items
            WHERE list_id = ? AND state = 1 AND family = ?
              AND from_key <= ? AND to_key >= ? AND id != ?
            ORDER BY id
            "#,
        )
        .bind(list_id)
        .bind(family.as_str())
        .bind(to_key)
        .bind(from_key)
        .bind(exclude_id)
        .fetch_all(&mut *self.conn)
        .await?;
        Ok(ids)
    }

    async fn tombstone(&mut self, item_id: i64, version: i64) -> Result<(), DbError> {
        sqlx::query("UPDATE ip_items SET state = 0, version = ? WHERE id = ?")
            .bind(version)
            .bind(item_id)
            .execute(&mut *self.conn)
            .await?;
        Ok(())
    }

    /// Tombstone every enabled item overlapping `item` (except `exclude_id`).
    async fn replace_overlapping(
        &mut self,
        item: &NewItem,
        exclude_id: i64,
        reserved: &mut Option<i64>,
    ) -> Result<Vec<i64>, DbError> {
        let (from_key, to_key) = item.keys();
        let ids = self
            .find_overlapping(item.list_id, item.family(), &from_key, &to_key, exclude_id)
            .await?;
        for id in &ids {
            let version = self.allocate(reserved).await?;
            self.tombstone(*id, version).await?;
        }
        Ok(ids)
    }

    /// Insert an item after tombstoning whatever it overlaps in its list.
    ///
    /// The inserted row always carries the highest version of the write.
    pub async fn create(
        &mut self,
        item: &NewItem,
        is_read: bool,
        now: i64,
    ) -> Result<StoredWrite, DbError> {
        let mut reserved = Some(self.next_version().await?);
        let replaced = self.replace_overlapping(item, 0, &mut reserved).await?;
        let version = self.allocate(&mut reserved).await?;

        let (value, ip_from, ip_to) = item.columns();
        let (from_key, to_key) = item.keys();
        let source = &item.source;
        let result = sqlx::query(
            r#"
            INSERT INTO ip_items (
                list_id, value, ip_from, ip_to, family, from_key, to_key, type, version, state,
                expired_at, reason, event_level, node_id, server_id,
                source_node_id, source_server_id, source_http_firewall_policy_id,
                source_http_firewall_rule_group_id, source_http_firewall_rule_set_id,
                is_read, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(item.list_id)
        .bind(value)
        .bind(ip_from)
        .bind(ip_to)
        .bind(item.family().as_str())
        .bind(from_key)
        .bind(to_key)
        .bind(item.item_type.as_str())
        .bind(version)
        .bind(item.expired_at)
        .bind(&item.reason)
        .bind(&item.event_level)
        .bind(item.node_id)
        .bind(item.server_id)
        .bind(source.source_node_id)
        .bind(source.source_server_id)
        .bind(source.source_http_firewall_policy_id)
        .bind(source.source_http_firewall_rule_group_id)
        .bind(source.source_http_firewall_rule_set_id)
        .bind(is_read)
        .bind(now)
        .execute(&mut *self.conn)
        .await?;

        Ok(StoredWrite {
            item_id: result.last_insert_rowid(),
            version,
            replaced,
        })
    }

    /// Rewrite the address and metadata of an enabled item, re-running the
    /// overlap dedup against the rest of its list. `item.list_id` must be the
    /// item's current list. Returns `None` when the item is not enabled.
    pub async fn update(
        &mut self,
        item_id: i64,
        item: &NewItem,
    ) -> Result<Option<StoredWrite>, DbError> {
        let mut reserved = Some(self.next_version().await?);
        if !self.exists_enabled(item_id).await? {
            return Ok(None);
        }
        let replaced = self.replace_overlapping(item, item_id, &mut reserved).await?;
        let version = self.allocate(&mut reserved).await?;

        let (value, ip_from, ip_to) = item.columns();
        let (from_key, to_key) = item.keys();
        sqlx::query(
            r#"
            UPDATE ip_items
            SET value = ?, ip_from = ?, ip_to = ?, family = ?, from_key = ?, to_key = ?,
                type = ?, version = ?, expired_at = ?, reason = ?, event_level = ?
            WHERE id = ? AND state = 1
            "#,
        )
        .bind(value)
        .bind(ip_from)
        .bind(ip_to)
        .bind(item.family().as_str())
        .bind(from_key)
        .bind(to_key)
        .bind(item.item_type.as_str())
        .bind(version)
        .bind(item.expired_at)
        .bind(&item.reason)
        .bind(&item.event_level)
        .bind(item_id)
        .execute(&mut *self.conn)
        .await?;

        Ok(Some(StoredWrite {
            item_id,
            version,
            replaced,
        }))
    }

    /// Tombstone one enabled item. Returns its new version, or `None` when
    /// it was not enabled.
    pub async fn disable(&mut self, item_id: i64) -> Result<Option<i64>, DbError> {
        let version = self.next_version().await?;
        let result = sqlx::query("UPDATE ip_items SET state = 0, version = ? WHERE id = ? AND state = 1")
            .bind(version)
            .bind(item_id)
            .execute(&mut *self.conn)
            .await?;

        Ok((result.rows_affected() > 0).then_some(version))
    }

    /// Tombstone every enabled item in `scope` whose normalized bounds equal
    /// `target`'s.
    pub async fn disable_matching(
        &mut self,
        scope: &ItemScope,
        target: &IpRange,
    ) -> Result<Vec<Tombstone>, DbError> {
        let mut reserved = Some(self.next_version().await?);

        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT id, list_id FROM ip_items WHERE state = 1 AND ip_from = ");
        qb.push_bind(target.ip_from.clone());
        qb.push(" AND ip_to = ");
        qb.push_bind(target.ip_to.clone());
        push_scope(&mut qb, "list_id", scope);
        qb.push(" ORDER BY id");
        let rows = qb
            .build_query_as::<(i64, i64)>()
            .fetch_all(&mut *self.conn)
            .await?;

        let mut disabled = Vec::with_capacity(rows.len());
        for (item_id, list_id) in rows {
            let version = self.allocate(&mut reserved).await?;
            self.tombstone(item_id, version).await?;
            disabled.push(Tombstone {
                item_id,
                list_id,
                version,
            });
        }
        Ok(disabled)
    }

    /// Find an item in any state.
    pub async fn find(&mut self, item_id: i64) -> Result<Option<IpItem>, DbError> {
        let query = format!("SELECT {} FROM ip_items WHERE id = ?", ITEM_COLUMNS);
        let row = sqlx::query(&query)
            .bind(item_id)
            .fetch_optional(&mut *self.conn)
            .await?;
        row.as_ref().map(item_from_row).transpose()
    }

    pub async fn exists_enabled(&mut self, item_id: i64) -> Result<bool, DbError> {
        let found = sqlx::query_scalar::<_, i64>("SELECT 1 FROM ip_items WHERE id = ? AND state = 1")
            .bind(item_id)
            .fetch_optional(&mut *self.conn)
            .await?;
        Ok(found.is_some())
    }

    /// Find an item only if it is enabled and not expired at `now`.
    pub async fn find_active(&mut self, item_id: i64, now: i64) -> Result<Option<IpItem>, DbError> {
        Ok(self.find(item_id).await?.filter(|i| i.is_active(now)))
    }

    pub async fn exists_active(&mut self, item_id: i64, now: i64) -> Result<bool, DbError> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT 1 FROM ip_items WHERE id = ");
        qb.push_bind(item_id);
        push_active(&mut qb, "", now);
        let found = qb
            .build_query_scalar::<i64>()
            .fetch_optional(&mut *self.conn)
            .await?;
        Ok(found.is_some())
    }

    /// List that owns an item, in any state.
    pub async fn find_list_id(&mut self, item_id: i64) -> Result<Option<i64>, DbError> {
        let list_id = sqlx::query_scalar::<_, i64>("SELECT list_id FROM ip_items WHERE id = ?")
            .bind(item_id)
            .fetch_optional(&mut *self.conn)
            .await?;
        Ok(list_id)
    }

    /// Rows of every state with `version > after`, ascending.
    pub async fn list_after_version(
        &mut self,
        after: i64,
        size: i64,
    ) -> Result<Vec<IpItem>, DbError> {
        let query = format!(
            "SELECT {} FROM ip_items WHERE version > ? ORDER BY version ASC LIMIT ?",
            ITEM_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(after)
            .bind(size)
            .fetch_all(&mut *self.conn)
            .await?;
        items_from_rows(&rows)
    }

    /// The newest active item of a list whose range contains `ip`.
    pub async fn find_enabled_containing(
        &mut self,
        list_id: i64,
        ip: &IpAddr,
        now: i64,
    ) -> Result<Option<IpItem>, DbError> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM ip_items WHERE list_id = ",
            ITEM_COLUMNS
        ));
        qb.push_bind(list_id);
        push_active(&mut qb, "", now);
        push_contains(&mut qb, "", ip);
        qb.push(" ORDER BY version DESC LIMIT 1");

        let row = qb.build().fetch_optional(&mut *self.conn).await?;
        row.as_ref().map(item_from_row).transpose()
    }

    pub async fn count_in_list(&mut self, filter: &ItemFilter, now: i64) -> Result<i64, DbError> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT COUNT(*) FROM ip_items");
        push_list_filter(&mut qb, filter, now);
        let count = qb
            .build_query_scalar::<i64>()
            .fetch_one(&mut *self.conn)
            .await?;
        Ok(count)
    }

    /// Active items of one list, newest first.
    pub async fn list_in_list(
        &mut self,
        filter: &ItemFilter,
        now: i64,
        offset: i64,
        size: i64,
    ) -> Result<Vec<IpItem>, DbError> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM ip_items", ITEM_COLUMNS));
        push_list_filter(&mut qb, filter, now);
        qb.push(" ORDER BY id DESC LIMIT ");
        qb.push_bind(size);
        qb.push(" OFFSET ");
        qb.push_bind(offset);

        let rows = qb.build().fetch_all(&mut *self.conn).await?;
        items_from_rows(&rows)
    }

    pub async fn search_count(
        &mut self,
        scope: &ItemScope,
        filter: &SearchFilter,
        now: i64,
    ) -> Result<i64, DbError> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT COUNT(*)");
        push_search_filter(&mut qb, scope, filter, now);
        let count = qb
            .build_query_scalar::<i64>()
            .fetch_one(&mut *self.conn)
            .await?;
        Ok(count)
    }

    /// Active items across lists, newest first.
    pub async fn search(
        &mut self,
        scope: &ItemScope,
        filter: &SearchFilter,
        now: i64,
        offset: i64,
        size: i64,
    ) -> Result<Vec<IpItem>, DbError> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {}", JOINED_ITEM_COLUMNS));
        push_search_filter(&mut qb, scope, filter, now);
        qb.push(" ORDER BY i.id DESC LIMIT ");
        qb.push_bind(size);
        qb.push(" OFFSET ");
        qb.push_bind(offset);

        let rows = qb.build().fetch_all(&mut *self.conn).await?;
        items_from_rows(&rows)
    }

    pub async fn search_ids(
        &mut self,
        scope: &ItemScope,
        filter: &SearchFilter,
        now: i64,
        offset: i64,
        size: i64,
    ) -> Result<Vec<i64>, DbError> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT i.id");
        push_search_filter(&mut qb, scope, filter, now);
        qb.push(" ORDER BY i.id DESC LIMIT ");
        qb.push_bind(size);
        qb.push(" OFFSET ");
        qb.push_bind(offset);

        let ids = qb
            .build_query_scalar::<i64>()
            .fetch_all(&mut *self.conn)
            .await?;
        Ok(ids)
    }

    /// Acknowledge every enabled unread item in scope. Not versioned; the
    /// flag never reaches nodes.
    pub async fn mark_read(&mut self, scope: &ItemScope) -> Result<u64, DbError> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("UPDATE ip_items SET is_read = 1 WHERE state = 1 AND is_read = 0");
        push_scope(&mut qb, "list_id", scope);
        let result = qb.build().execute(&mut *self.conn).await?;
        Ok(result.rows_affected())
    }
}
