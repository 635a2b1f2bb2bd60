//! Membership lookups and operator views.
//!
//! Operator-facing results are decorated with the firewall objects that
//! produced them. A reference that no longer resolves renders as
//! [`DELETED_PLACEHOLDER`]; the search view also disables items whose list
//! or policy is gone.

use super::directory::{DELETED_PLACEHOLDER, FirewallPolicy, NodeRef, PolicyDirectory};
use super::lists::ListService;
use super::notify::{ChangeNotifier, ItemChange};
use super::unix_now;
use crate::config::SyncConfig;
use crate::db::{
    Database, DbError, IpItem, IpList, ItemFilter, ItemRepository, ItemScope, ItemType, ListType,
    Provenance, SearchFilter,
};
use crate::error::{ServiceError, ServiceResult};
use crate::metrics;
use crate::security::identity::{Caller, CallerKind};
use crate::security::range;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// An item as shown to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemView {
    pub id: i64,
    #[serde(rename = "ipListId")]
    pub list_id: i64,
    pub value: String,
    pub ip_from: String,
    pub ip_to: String,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub version: i64,
    pub expired_at: i64,
    pub reason: String,
    pub event_level: String,
    pub node_id: i64,
    pub server_id: i64,
    #[serde(flatten)]
    pub source: Provenance,
    pub is_read: bool,
    pub created_at: i64,
}

impl From<&IpItem> for ItemView {
    fn from(item: &IpItem) -> Self {
        Self {
            id: item.id,
            list_id: item.list_id,
            value: item.compose_value(),
            ip_from: item.ip_from.clone(),
            ip_to: item.ip_to.clone(),
            item_type: item.item_type,
            version: item.version,
            expired_at: item.expired_at,
            reason: item.reason.clone(),
            event_level: item.event_level.clone(),
            node_id: item.node_id,
            server_id: item.server_id,
            source: item.source.clone(),
            is_read: item.is_read,
            created_at: item.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListView {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub list_type: ListType,
    pub is_public: bool,
    pub is_global: bool,
}

impl From<&IpList> for ListView {
    fn from(list: &IpList) -> Self {
        Self {
            id: list.id,
            name: list.name.clone(),
            list_type: list.list_type,
            is_public: list.is_public,
            is_global: list.is_global,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamedRef {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRef {
    pub id: i64,
    pub name: String,
    pub server_id: i64,
    pub server_name: String,
}

/// An item with its provenance resolved to names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecoratedItem {
    #[serde(flatten)]
    pub item: ItemView,
    pub source_server: Option<NamedRef>,
    pub source_http_firewall_policy: Option<PolicyRef>,
    pub source_http_firewall_rule_group: Option<NamedRef>,
    pub source_http_firewall_rule_set: Option<NamedRef>,
    pub source_node: Option<NodeRef>,
}

/// Result of a point membership check.
///
/// Bad input and a missing list are reported in-band with `is_ok = false`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCheck {
    pub is_ok: bool,
    pub error: String,
    pub is_found: bool,
    pub is_allowed: bool,
    #[serde(rename = "ipItem")]
    pub item: Option<ItemView>,
}

impl StatusCheck {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            ..Default::default()
        }
    }
}

/// Filters of the cross-list operator search.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchQuery {
    /// Admin only: restrict to one tenant's lists.
    pub user_id: i64,
    pub keyword: String,
    /// Only items whose range contains this address.
    pub ip: String,
    pub unread: bool,
    pub event_level: String,
    pub list_type: String,
    pub global_only: bool,
}

impl SearchQuery {
    fn filter(&self) -> ServiceResult<SearchFilter> {
        let ip = match self.ip.trim() {
            "" => None,
            ip => Some(
                range::parse_addr(ip)
                    .ok_or_else(|| ServiceError::Validation(format!("invalid 'ip': {}", ip)))?,
            ),
        };
        let list_type = match self.list_type.trim() {
            "" => None,
            t => Some(ListType::parse(t).ok_or_else(|| {
                ServiceError::Validation(format!("invalid 'listType': {}", t))
            })?),
        };
        Ok(SearchFilter {
            keyword: self.keyword.clone(),
            ip,
            unread_only: self.unread,
            event_level: self.event_level.clone(),
            list_type,
            global_only: self.global_only,
        })
    }
}

/// One row of the operator search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    #[serde(rename = "ipList")]
    pub list: ListView,
    #[serde(rename = "ipItem")]
    pub item: ItemView,
    pub server: Option<NamedRef>,
    #[serde(rename = "httpFirewallPolicy")]
    pub policy: Option<FirewallPolicy>,
}

fn name_or_placeholder(result: Result<Option<String>, DbError>, what: &str, id: i64) -> String {
    match result {
        Ok(Some(name)) => name,
        Ok(None) => DELETED_PLACEHOLDER.to_string(),
        Err(e) => {
            warn!(id, error = %e, "Failed to resolve {}", what);
            DELETED_PLACEHOLDER.to_string()
        }
    }
}

pub struct MembershipResolver {
    db: Database,
    lists: Arc<ListService>,
    notifier: Arc<ChangeNotifier>,
    config: SyncConfig,
}

impl MembershipResolver {
    pub fn new(
        db: Database,
        lists: Arc<ListService>,
        notifier: Arc<ChangeNotifier>,
        config: SyncConfig,
    ) -> Self {
        Self {
            db,
            lists,
            notifier,
            config,
        }
    }

    fn directory(&self) -> &Arc<dyn PolicyDirectory> {
        self.lists.directory()
    }

    /// Whether `ip` is covered by an active item of the list, and whether
    /// that membership lets traffic through.
    pub async fn check_status(
        &self,
        caller: Caller,
        list_id: i64,
        ip: &str,
    ) -> ServiceResult<StatusCheck> {
        caller.require(&[CallerKind::Admin])?;

        let Some(addr) = range::parse_addr(ip) else {
            return Ok(StatusCheck::failed("invalid ip"));
        };
        let list = match self.lists.find_list(list_id).await? {
            Some(list) if list.is_enabled() => list,
            _ => return Ok(StatusCheck::failed("ip list not found")),
        };

        let mut conn = self.db.pool().acquire().await?;
        let item = ItemRepository::new(&mut conn)
            .find_enabled_containing(list_id, &addr, unix_now())
            .await?;

        Ok(match item {
            Some(item) => StatusCheck {
                is_ok: true,
                is_found: true,
                is_allowed: list.list_type.is_allowing(),
                item: Some(ItemView::from(&item)),
                ..Default::default()
            },
            None => StatusCheck {
                is_ok: true,
                ..Default::default()
            },
        })
    }

    /// Enabled item by id; tenants only see items of lists they own.
    pub async fn find_item(&self, caller: Caller, item_id: i64) -> ServiceResult<Option<ItemView>> {
        let caller = caller.require(&[CallerKind::Admin, CallerKind::User])?;

        let mut conn = self.db.pool().acquire().await?;
        let item = ItemRepository::new(&mut conn)
            .find_active(item_id, unix_now())
            .await?;
        drop(conn);

        let Some(item) = item else {
            return Ok(None);
        };
        self.lists.check_caller_list(caller, item.list_id).await?;
        Ok(Some(ItemView::from(&item)))
    }

    pub async fn exists(&self, caller: Caller, item_id: i64) -> ServiceResult<bool> {
        caller.require(&[CallerKind::Admin])?;
        let mut conn = self.db.pool().acquire().await?;
        Ok(ItemRepository::new(&mut conn)
            .exists_active(item_id, unix_now())
            .await?)
    }

    pub async fn count_in_list(&self, caller: Caller, filter: &ItemFilter) -> ServiceResult<i64> {
        let caller = caller.require(&[CallerKind::Admin, CallerKind::User])?;
        self.lists.check_caller_list(caller, filter.list_id).await?;

        let mut conn = self.db.pool().acquire().await?;
        Ok(ItemRepository::new(&mut conn)
            .count_in_list(filter, unix_now())
            .await?)
    }

    /// One page of a list's active items, newest first, with provenance.
    pub async fn list_in_list(
        &self,
        caller: Caller,
        filter: &ItemFilter,
        offset: i64,
        size: i64,
    ) -> ServiceResult<Vec<DecoratedItem>> {
        let caller = caller.require(&[CallerKind::Admin, CallerKind::User])?;
        self.lists.check_caller_list(caller, filter.list_id).await?;

        let mut conn = self.db.pool().acquire().await?;
        let items = ItemRepository::new(&mut conn)
            .list_in_list(filter, unix_now(), offset.max(0), self.config.page_size(size))
            .await?;
        drop(conn);

        let mut decorated = Vec::with_capacity(items.len());
        for item in &items {
            decorated.push(self.decorate(item).await);
        }
        Ok(decorated)
    }

    async fn decorate(&self, item: &IpItem) -> DecoratedItem {
        let dir = self.directory();
        let source = &item.source;

        let source_server = match source.source_server_id {
            Some(id) => Some(NamedRef {
                id,
                name: name_or_placeholder(dir.server_name(id).await, "source server", id),
            }),
            None => None,
        };

        let source_http_firewall_policy = match source.source_http_firewall_policy_id {
            Some(id) => Some(self.policy_ref(id).await),
            None => None,
        };

        let source_http_firewall_rule_group = match source.source_http_firewall_rule_group_id {
            Some(id) => Some(NamedRef {
                id,
                name: name_or_placeholder(dir.rule_group_name(id).await, "rule group", id),
            }),
            None => None,
        };

        let source_http_firewall_rule_set = match source.source_http_firewall_rule_set_id {
            Some(id) => Some(NamedRef {
                id,
                name: name_or_placeholder(dir.rule_set_name(id).await, "rule set", id),
            }),
            None => None,
        };

        let source_node = match source.source_node_id {
            Some(id) => Some(match dir.node(id).await {
                Ok(Some(node)) => node,
                Ok(None) => NodeRef {
                    id,
                    name: DELETED_PLACEHOLDER.to_string(),
                    cluster_id: 0,
                },
                Err(e) => {
                    warn!(id, error = %e, "Failed to resolve source node");
                    NodeRef {
                        id,
                        name: DELETED_PLACEHOLDER.to_string(),
                        cluster_id: 0,
                    }
                }
            }),
            None => None,
        };

        DecoratedItem {
            item: ItemView::from(item),
            source_server,
            source_http_firewall_policy,
            source_http_firewall_rule_group,
            source_http_firewall_rule_set,
            source_node,
        }
    }

    async fn policy_ref(&self, policy_id: i64) -> PolicyRef {
        let dir = self.directory();
        let policy = match dir.firewall_policy(policy_id).await {
            Ok(policy) => policy,
            Err(e) => {
                warn!(id = policy_id, error = %e, "Failed to resolve firewall policy");
                None
            }
        };
        match policy {
            Some(p) => {
                let server_name = if p.server_id > 0 {
                    name_or_placeholder(dir.server_name(p.server_id).await, "policy server", p.server_id)
                } else {
                    String::new()
                };
                PolicyRef {
                    id: p.id,
                    name: p.name,
                    server_id: p.server_id,
                    server_name,
                }
            }
            None => PolicyRef {
                id: policy_id,
                name: DELETED_PLACEHOLDER.to_string(),
                server_id: 0,
                server_name: String::new(),
            },
        }
    }

    /// Lists a search may see: a tenant's own, or for admins every list
    /// unless a tenant is named.
    async fn search_scope(&self, caller: Caller, query: &SearchQuery) -> ServiceResult<ItemScope> {
        let caller = caller.require(&[CallerKind::Admin, CallerKind::User])?;
        let user_id = match caller.user_id() {
            Some(user_id) => Some(user_id),
            None if query.user_id > 0 => Some(query.user_id),
            None => None,
        };
        Ok(match user_id {
            Some(user_id) => ItemScope::Lists(self.lists.user_list_ids(user_id).await?),
            None => ItemScope::All,
        })
    }

    pub async fn count_all(&self, caller: Caller, query: &SearchQuery) -> ServiceResult<i64> {
        let filter = query.filter()?;
        let scope = self.search_scope(caller, query).await?;

        let mut conn = self.db.pool().acquire().await?;
        Ok(ItemRepository::new(&mut conn)
            .search_count(&scope, &filter, unix_now())
            .await?)
    }

    pub async fn list_ids(
        &self,
        caller: Caller,
        query: &SearchQuery,
        offset: i64,
        size: i64,
    ) -> ServiceResult<Vec<i64>> {
        let filter = query.filter()?;
        let scope = self.search_scope(caller, query).await?;

        let mut conn = self.db.pool().acquire().await?;
        Ok(ItemRepository::new(&mut conn)
            .search_ids(&scope, &filter, unix_now(), offset.max(0), self.config.page_size(size))
            .await?)
    }

    /// Operator search across lists. Items whose list is gone or disabled,
    /// or whose non-public list no policy references, are disabled here and
    /// left out of the page.
    pub async fn search_all(
        &self,
        caller: Caller,
        query: &SearchQuery,
        offset: i64,
        size: i64,
    ) -> ServiceResult<Vec<SearchResult>> {
        let filter = query.filter()?;
        let scope = self.search_scope(caller, query).await?;

        let mut conn = self.db.pool().acquire().await?;
        let items = ItemRepository::new(&mut conn)
            .search(&scope, &filter, unix_now(), offset.max(0), self.config.page_size(size))
            .await?;
        drop(conn);

        let mut results = Vec::with_capacity(items.len());
        for item in &items {
            let list = match self.lists.find_list(item.list_id).await? {
                Some(list) if list.is_enabled() => list,
                _ => {
                    self.disable_orphan(item, "ip list is gone").await?;
                    continue;
                }
            };

            let policy = if list.is_public {
                None
            } else {
                match self.directory().policy_for_list(list.id).await {
                    Ok(Some(policy)) => Some(policy),
                    Ok(None) => {
                        self.disable_orphan(item, "no firewall policy references the ip list")
                            .await?;
                        continue;
                    }
                    Err(e) => {
                        warn!(list_id = list.id, error = %e, "Failed to resolve firewall policy of ip list");
                        None
                    }
                }
            };

            let server = match &policy {
                Some(p) if p.server_id > 0 => Some(NamedRef {
                    id: p.server_id,
                    name: name_or_placeholder(
                        self.directory().server_name(p.server_id).await,
                        "policy server",
                        p.server_id,
                    ),
                }),
                _ => None,
            };

            results.push(SearchResult {
                list: ListView::from(&list),
                item: ItemView::from(item),
                server,
                policy,
            });
        }
        Ok(results)
    }

    async fn disable_orphan(&self, item: &IpItem, why: &str) -> ServiceResult<()> {
        let mut tx = self.db.begin().await?;
        let version = ItemRepository::new(&mut tx).disable(item.id).await?;
        let Some(version) = version else {
            tx.rollback().await?;
            return Ok(());
        };
        tx.commit().await?;

        metrics::record_orphan_disabled();
        self.notifier.notify(ItemChange {
            item_id: item.id,
            list_id: item.list_id,
            version,
        });
        info!(item_id = item.id, list_id = item.list_id, version, reason = why, "Orphaned IP item disabled");
        Ok(())
    }

    /// Server of the list that owns an item, 0 if the list has none.
    pub async fn find_server_id_with_item(&self, caller: Caller, item_id: i64) -> ServiceResult<i64> {
        let caller = caller.require(&[CallerKind::Admin, CallerKind::User])?;

        let mut conn = self.db.pool().acquire().await?;
        let list_id = ItemRepository::new(&mut conn).find_list_id(item_id).await?;
        drop(conn);
        let list_id = list_id.ok_or(ServiceError::ItemNotFound(item_id))?;

        let server_id = self
            .lists
            .find_list(list_id)
            .await?
            .and_then(|l| l.server_id)
            .unwrap_or(0);

        if let Some(user_id) = caller.user_id()
            && server_id > 0
            && !self.directory().user_owns_server(user_id, server_id).await?
        {
            return Err(ServiceError::PermissionDenied(format!(
                "server {} is not owned by user {}",
                server_id, user_id
            )));
        }
        Ok(server_id)
    }
}
