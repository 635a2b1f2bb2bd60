//! Version-cursor pull protocol.
//!
//! Nodes poll `list_after_version(cursor, size)` and persist the returned
//! version as their next cursor. Each row is projected against its list at
//! read time, so expiry, list deletion and grey lists never need a sweep.

use super::lists::ListService;
use super::unix_now;
use crate::config::SyncConfig;
use crate::db::{Database, IpItem, IpList, ItemRepository, ListType};
use crate::error::ServiceResult;
use crate::metrics;
use crate::security::identity::{Caller, CallerKind};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// One item as seen by a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncItem {
    pub id: i64,
    pub value: String,
    pub ip_from: String,
    pub ip_to: String,
    pub version: i64,
    pub created_at: i64,
    pub expired_at: i64,
    pub reason: String,
    pub list_id: i64,
    pub is_deleted: bool,
    #[serde(rename = "type")]
    pub item_type: String,
    pub event_level: String,
    pub list_type: String,
    pub is_global: bool,
    pub node_id: i64,
    pub server_id: i64,
}

/// One page of the cursor protocol.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPage {
    pub ip_items: Vec<SyncItem>,
    /// Next cursor: the highest version scanned, or the request cursor.
    pub version: i64,
    /// The page was full; poll again with `version`.
    pub has_more: bool,
}

/// Project a stored row for distribution. Rows of grey lists yield `None`.
///
/// The row is reported deleted when it is disabled or expired, or when its
/// list is gone or disabled.
pub fn project(item: &IpItem, list: Option<&IpList>, now: i64) -> Option<SyncItem> {
    if list.is_some_and(|l| l.list_type == ListType::Grey) {
        return None;
    }

    let list_alive = list.is_some_and(IpList::is_enabled);
    Some(SyncItem {
        id: item.id,
        value: item.compose_value(),
        ip_from: item.ip_from.clone(),
        ip_to: item.ip_to.clone(),
        version: item.version,
        created_at: item.created_at,
        expired_at: item.expired_at,
        reason: String::new(),
        list_id: item.list_id,
        is_deleted: !list_alive || !item.is_active(now),
        item_type: item.item_type.as_str().to_string(),
        event_level: item.event_level.clone(),
        list_type: list.map(|l| l.list_type.as_str().to_string()).unwrap_or_default(),
        is_global: list.is_some_and(IpList::is_network_wide),
        node_id: item.node_id,
        server_id: item.server_id,
    })
}

pub struct CursorSync {
    db: Database,
    lists: Arc<ListService>,
    config: SyncConfig,
}

impl CursorSync {
    pub fn new(db: Database, lists: Arc<ListService>, config: SyncConfig) -> Self {
        Self { db, lists, config }
    }

    /// Items with a version above `version`, ascending.
    pub async fn list_after_version(
        &self,
        caller: Caller,
        version: i64,
        size: i64,
    ) -> ServiceResult<SyncPage> {
        caller.require(&[CallerKind::Admin, CallerKind::Node])?;
        let cursor = version.max(0);
        // Any positive size is honored as given
        let size = if size <= 0 {
            self.config.default_page_size
        } else {
            size
        };

        let mut conn = self.db.pool().acquire().await?;
        let rows = ItemRepository::new(&mut conn)
            .list_after_version(cursor, size)
            .await?;
        drop(conn);

        let now = unix_now();
        let mut next = cursor;
        let mut ip_items = Vec::with_capacity(rows.len());
        for item in &rows {
            next = next.max(item.version);
            let list = match self.lists.cached_list(item.list_id).await {
                Ok(list) => list,
                Err(e) => {
                    // A list we can't resolve is treated like a deleted list
                    warn!(item_id = item.id, list_id = item.list_id, error = %e, "IP list lookup failed during sync");
                    None
                }
            };
            if let Some(projected) = project(item, list.as_ref(), now) {
                ip_items.push(projected);
            }
        }

        metrics::record_sync_served(ip_items.len());
        debug!(caller = %caller, cursor, next, served = ip_items.len(), scanned = rows.len(), "Sync page served");

        Ok(SyncPage {
            has_more: rows.len() as i64 == size,
            ip_items,
            version: next,
        })
    }
}
