//! Write gateway: every item mutation enters here.
//!
//! Input is normalized and ownership-checked before anything is written.
//! Each logical write (one item create, update or delete) runs in its own
//! transaction; a batch is a sequence of such writes, not one transaction.

use super::lists::ListService;
use super::notify::{ChangeNotifier, ItemChange};
use super::unix_now;
use crate::db::{
    Database, ItemRepository, ItemScope, ItemType, NewItem, Provenance, StoredWrite, Tombstone,
};
use crate::error::{ServiceError, ServiceResult};
use crate::metrics;
use crate::security::identity::{Caller, CallerKind};
use crate::security::range::{self, IpRange};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Item fields as sent by admins, tenants and detectors.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ItemInput {
    #[serde(rename = "ipListId")]
    pub list_id: i64,
    /// Free-form address, range or CIDR. Takes precedence over the bounds.
    pub value: String,
    pub ip_from: String,
    pub ip_to: String,
    /// "ipv4", "ipv6", "all"; empty derives the type from the address.
    #[serde(rename = "type")]
    pub item_type: String,
    pub expired_at: i64,
    pub reason: String,
    pub event_level: String,
    pub node_id: i64,
    pub server_id: i64,
    #[serde(flatten)]
    pub source: Provenance,
}

impl ItemInput {
    /// Validate and normalize into a writable item.
    pub fn normalize(&self) -> ServiceResult<NewItem> {
        if self.list_id <= 0 {
            return Err(ServiceError::Validation("invalid 'ipListId'".to_string()));
        }
        if self.expired_at < 0 {
            return Err(ServiceError::Validation("invalid 'expiredAt'".to_string()));
        }

        let requested = match self.item_type.trim() {
            "" => None,
            t => Some(ItemType::parse(t).ok_or_else(|| {
                ServiceError::Validation(format!("invalid 'type': {}", self.item_type))
            })?),
        };

        let (range, item_type) = if requested == Some(ItemType::All) {
            (None, ItemType::All)
        } else {
            let parsed = if !self.value.trim().is_empty() {
                range::parse_value(&self.value)?
            } else {
                range::parse_bounds(&self.ip_from, &self.ip_to)?
            };
            let derived = ItemType::for_range(&parsed);
            if let Some(requested) = requested
                && requested != derived
            {
                return Err(ServiceError::Validation(format!(
                    "'type' {} does not match address {}",
                    requested.as_str(),
                    parsed.value
                )));
            }
            (Some(parsed), derived)
        };

        Ok(NewItem {
            list_id: self.list_id,
            range,
            item_type,
            expired_at: self.expired_at,
            reason: self.reason.clone(),
            event_level: self.event_level.clone(),
            node_id: self.node_id.max(0),
            server_id: self.server_id.max(0),
            source: self.source.clone().normalized(),
        })
    }
}

/// How a delete selects its targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteTarget {
    Id(i64),
    Value(String),
    Range { ip_from: String, ip_to: String },
}

/// Mutation entry point for IP items.
pub struct WriteGateway {
    db: Database,
    lists: Arc<ListService>,
    notifier: Arc<ChangeNotifier>,
}

impl WriteGateway {
    pub fn new(db: Database, lists: Arc<ListService>, notifier: Arc<ChangeNotifier>) -> Self {
        Self {
            db,
            lists,
            notifier,
        }
    }

    /// Store one item in its own transaction.
    async fn store(&self, item: &NewItem, is_read: bool) -> ServiceResult<StoredWrite> {
        let mut tx = self.db.begin().await?;
        let write = ItemRepository::new(&mut tx)
            .create(item, is_read, unix_now())
            .await?;
        tx.commit().await?;

        metrics::record_items_written("create", 1);
        if !write.replaced.is_empty() {
            metrics::record_items_written("replace", write.replaced.len());
            debug!(list_id = item.list_id, replaced = ?write.replaced, "Replaced overlapping IP items");
        }
        Ok(write)
    }

    fn signal(&self, item_id: i64, list_id: i64, version: i64) {
        self.notifier.notify(ItemChange {
            item_id,
            list_id,
            version,
        });
    }

    async fn prepare(&self, caller: Caller, input: &ItemInput) -> ServiceResult<NewItem> {
        let item = input.normalize()?;
        self.lists.check_writable(caller, item.list_id).await?;
        Ok(item)
    }

    /// Create one item, replacing whatever it overlaps in its list.
    pub async fn create_item(&self, caller: Caller, input: &ItemInput) -> ServiceResult<i64> {
        let caller =
            caller.require(&[CallerKind::Admin, CallerKind::User, CallerKind::Node])?;
        let item = self.prepare(caller, input).await?;

        let write = self.store(&item, is_read_on_create(&item)).await?;
        self.signal(write.item_id, item.list_id, write.version);

        info!(
            item_id = write.item_id,
            list_id = item.list_id,
            version = write.version,
            caller = %caller,
            "IP item created"
        );
        Ok(write.item_id)
    }

    /// Create items in order. Every item is validated before anything is
    /// written. A storage failure mid-batch keeps the earlier items.
    ///
    /// Signals once, for the last item written.
    pub async fn create_items(
        &self,
        caller: Caller,
        inputs: &[ItemInput],
    ) -> ServiceResult<Vec<i64>> {
        let caller =
            caller.require(&[CallerKind::Admin, CallerKind::User, CallerKind::Node])?;

        let mut items = Vec::with_capacity(inputs.len());
        for input in inputs {
            items.push(self.prepare(caller, input).await?);
        }

        let mut ids = Vec::with_capacity(items.len());
        let mut last: Option<(i64, i64, i64)> = None;
        for item in &items {
            match self.store(item, is_read_on_create(item)).await {
                Ok(write) => {
                    ids.push(write.item_id);
                    last = Some((write.item_id, item.list_id, write.version));
                }
                Err(e) => {
                    warn!(written = ids.len(), total = items.len(), error = %e, "IP item batch stopped");
                    if let Some((item_id, list_id, version)) = last {
                        self.signal(item_id, list_id, version);
                    }
                    return Err(e);
                }
            }
        }

        if let Some((item_id, list_id, version)) = last {
            self.signal(item_id, list_id, version);
        }
        info!(count = ids.len(), caller = %caller, "IP item batch created");
        Ok(ids)
    }

    /// Rewrite an item's address and metadata. The new range is deduped
    /// against the rest of the list exactly as on create.
    pub async fn update_item(
        &self,
        caller: Caller,
        item_id: i64,
        input: &ItemInput,
    ) -> ServiceResult<()> {
        let caller = caller.require(&[CallerKind::Admin, CallerKind::User])?;

        let list_id = self.item_list_id(item_id).await?;
        self.lists.check_caller_list(caller, list_id).await?;
        // The item stays in its list; only a positive id is required on input
        let mut input = input.clone();
        input.list_id = list_id;
        let item = input.normalize()?;

        let mut tx = self.db.begin().await?;
        let write = ItemRepository::new(&mut tx).update(item_id, &item).await?;
        let Some(write) = write else {
            tx.rollback().await?;
            return Err(ServiceError::ItemNotFound(item_id));
        };
        tx.commit().await?;

        metrics::record_items_written("update", 1);
        metrics::record_items_written("replace", write.replaced.len());
        self.signal(item_id, list_id, write.version);
        info!(item_id, list_id, version = write.version, caller = %caller, "IP item updated");
        Ok(())
    }

    /// Tombstone by id, or every match of a value or range. A value or range
    /// delete without `list_id` covers every list the caller may touch.
    /// Returns the number of items tombstoned.
    pub async fn delete_item(
        &self,
        caller: Caller,
        target: &DeleteTarget,
        list_id: Option<i64>,
    ) -> ServiceResult<usize> {
        let caller = caller.require(&[CallerKind::Admin, CallerKind::User])?;

        let range = match target {
            DeleteTarget::Id(item_id) => {
                let tombstone = self.delete_by_id(caller, *item_id).await?;
                self.signal(tombstone.item_id, tombstone.list_id, tombstone.version);
                return Ok(1);
            }
            DeleteTarget::Value(value) => range::parse_value(value)?,
            DeleteTarget::Range { ip_from, ip_to } => range::parse_bounds(ip_from, ip_to)?,
        };

        let scope = self.delete_scope(caller, list_id).await?;
        let tombstones = self.delete_matching(&scope, &range).await?;
        if let Some(last) = tombstones.last() {
            self.signal(last.item_id, last.list_id, last.version);
        }
        info!(value = %range, count = tombstones.len(), caller = %caller, "IP items deleted by value");
        Ok(tombstones.len())
    }

    /// Tombstone a batch of items by id. Ids that are already gone are
    /// skipped. Signals once after the last tombstone.
    pub async fn delete_items(&self, caller: Caller, item_ids: &[i64]) -> ServiceResult<usize> {
        let caller = caller.require(&[CallerKind::Admin, CallerKind::User])?;

        let mut targets = Vec::with_capacity(item_ids.len());
        for &item_id in item_ids {
            let mut conn = self.db.pool().acquire().await?;
            let list_id = ItemRepository::new(&mut conn).find_list_id(item_id).await?;
            drop(conn);
            if let Some(list_id) = list_id {
                self.lists.check_caller_list(caller, list_id).await?;
                targets.push((item_id, list_id));
            }
        }

        let mut last = None;
        let mut count = 0;
        for (item_id, list_id) in targets {
            let mut tx = self.db.begin().await?;
            let version = ItemRepository::new(&mut tx).disable(item_id).await?;
            match version {
                Some(version) => {
                    tx.commit().await?;
                    count += 1;
                    last = Some(Tombstone {
                        item_id,
                        list_id,
                        version,
                    });
                }
                None => tx.rollback().await?,
            }
        }

        metrics::record_items_written("delete", count);
        if let Some(last) = last {
            self.signal(last.item_id, last.list_id, last.version);
        }
        info!(count, caller = %caller, "IP item batch deleted");
        Ok(count)
    }

    /// Mark every visible unread item as acknowledged.
    pub async fn mark_read(&self, caller: Caller) -> ServiceResult<u64> {
        let caller = caller.require(&[CallerKind::Admin, CallerKind::User])?;
        let scope = match caller.user_id() {
            Some(user_id) => ItemScope::Lists(self.lists.user_list_ids(user_id).await?),
            None => ItemScope::All,
        };

        let mut conn = self.db.pool().acquire().await?;
        let count = ItemRepository::new(&mut conn).mark_read(&scope).await?;
        Ok(count)
    }

    async fn item_list_id(&self, item_id: i64) -> ServiceResult<i64> {
        let mut conn = self.db.pool().acquire().await?;
        ItemRepository::new(&mut conn)
            .find_list_id(item_id)
            .await?
            .ok_or(ServiceError::ItemNotFound(item_id))
    }

    async fn delete_by_id(&self, caller: Caller, item_id: i64) -> ServiceResult<Tombstone> {
        let list_id = self.item_list_id(item_id).await?;
        self.lists.check_caller_list(caller, list_id).await?;

        let mut tx = self.db.begin().await?;
        let version = ItemRepository::new(&mut tx).disable(item_id).await?;
        let Some(version) = version else {
            tx.rollback().await?;
            return Err(ServiceError::ItemNotFound(item_id));
        };
        tx.commit().await?;

        metrics::record_items_written("delete", 1);
        info!(item_id, list_id, version, caller = %caller, "IP item deleted");
        Ok(Tombstone {
            item_id,
            list_id,
            version,
        })
    }

    async fn delete_scope(&self, caller: Caller, list_id: Option<i64>) -> ServiceResult<ItemScope> {
        match (list_id.filter(|&id| id > 0), caller.user_id()) {
            (Some(list_id), _) => {
                self.lists.check_caller_list(caller, list_id).await?;
                Ok(ItemScope::Lists(vec![list_id]))
            }
            (None, Some(user_id)) => Ok(ItemScope::Lists(self.lists.user_list_ids(user_id).await?)),
            (None, None) => Ok(ItemScope::All),
        }
    }

    async fn delete_matching(
        &self,
        scope: &ItemScope,
        range: &IpRange,
    ) -> ServiceResult<Vec<Tombstone>> {
        let mut tx = self.db.begin().await?;
        let tombstones = ItemRepository::new(&mut tx)
            .disable_matching(scope, range)
            .await?;
        if tombstones.is_empty() {
            // Nothing matched; give the reserved version back
            tx.rollback().await?;
        } else {
            tx.commit().await?;
            metrics::record_items_written("delete", tombstones.len());
        }
        Ok(tombstones)
    }
}

/// Detector-written and node-pinned items start unread so operators notice
/// them; manual entries start acknowledged.
fn is_read_on_create(item: &NewItem) -> bool {
    !(item.source.is_automated() || item.node_id > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ListType, NewList};
    use crate::services::directory::SqlDirectory;
    use std::time::Duration;
    use tokio::sync::broadcast::Receiver;

    struct Fixture {
        db: Database,
        lists: Arc<ListService>,
        gateway: WriteGateway,
        rx: Receiver<ItemChange>,
    }

    async fn fixture() -> Fixture {
        let db = Database::new(":memory:").await.unwrap();
        sqlx::query("INSERT INTO servers (id, name, user_id) VALUES (10, 'shop', 5)")
            .execute(db.pool())
            .await
            .unwrap();
        let directory = Arc::new(SqlDirectory::new(db.pool().clone()));
        let lists = Arc::new(ListService::new(db.clone(), directory, Duration::from_secs(60)));
        let notifier = Arc::new(ChangeNotifier::new());
        let rx = notifier.subscribe();
        let gateway = WriteGateway::new(db.clone(), lists.clone(), notifier);
        Fixture {
            db,
            lists,
            gateway,
            rx,
        }
    }

    async fn list(f: &Fixture, is_public: bool, server_id: Option<i64>) -> i64 {
        f.lists
            .create_list(
                Caller::admin(1),
                NewList {
                    name: "l".to_string(),
                    list_type: ListType::Black,
                    is_public,
                    is_global: is_public,
                    server_id,
                    user_id: None,
                    description: String::new(),
                },
            )
            .await
            .unwrap()
    }

    fn input(list_id: i64, value: &str) -> ItemInput {
        ItemInput {
            list_id,
            value: value.to_string(),
            ..Default::default()
        }
    }

    fn drain(rx: &mut Receiver<ItemChange>) -> Vec<ItemChange> {
        let mut out = Vec::new();
        while let Ok(change) = rx.try_recv() {
            out.push(change);
        }
        out
    }

    async fn enabled(f: &Fixture, item_id: i64) -> bool {
        let mut conn = f.db.pool().acquire().await.unwrap();
        ItemRepository::new(&mut conn).exists_enabled(item_id).await.unwrap()
    }

    #[test]
    fn test_normalize_input() {
        let item = input(1, " 10.0.0.9-10.0.0.1 ").normalize().unwrap();
        let range = item.range.unwrap();
        assert_eq!(range.ip_from, "10.0.0.1");
        assert_eq!(range.ip_to, "10.0.0.9");
        assert_eq!(item.item_type, ItemType::Ipv4);

        let bounds = ItemInput {
            list_id: 1,
            ip_from: "2001:db8::1".to_string(),
            ..Default::default()
        };
        assert_eq!(bounds.normalize().unwrap().item_type, ItemType::Ipv6);

        let all = ItemInput {
            list_id: 1,
            item_type: "all".to_string(),
            ..Default::default()
        };
        let all = all.normalize().unwrap();
        assert!(all.range.is_none());
        assert_eq!(all.item_type, ItemType::All);

        let mixed = ItemInput {
            list_id: 1,
            ip_from: "1.1.1.1".to_string(),
            ip_to: "::1".to_string(),
            ..Default::default()
        };
        assert!(matches!(mixed.normalize(), Err(ServiceError::InvalidRange(_))));

        let typed = ItemInput {
            item_type: "ipv4".to_string(),
            ..input(1, "10.0.0.1")
        };
        assert_eq!(typed.normalize().unwrap().item_type, ItemType::Ipv4);
        let wrong = ItemInput {
            item_type: "ipv4".to_string(),
            ..input(1, "2001:db8::/64")
        };
        assert!(matches!(wrong.normalize(), Err(ServiceError::Validation(_))));
        let wrong = ItemInput {
            item_type: "ipv6".to_string(),
            ..input(1, "10.0.0.1")
        };
        assert!(matches!(wrong.normalize(), Err(ServiceError::Validation(_))));

        assert!(matches!(input(0, "1.1.1.1").normalize(), Err(ServiceError::Validation(_))));
        assert!(matches!(input(1, "1.1.1").normalize(), Err(ServiceError::InvalidRange(_))));
        assert!(matches!(ItemInput { list_id: 1, ..Default::default() }.normalize(), Err(ServiceError::InvalidRange(_))));
    }

    #[test]
    fn test_input_wire_names() {
        let input: ItemInput = serde_json::from_str(
            r#"{"ipListId": 3, "value": "1.2.3.4", "expiredAt": 9, "eventLevel": "critical",
                "sourceHTTPFirewallPolicyId": 4, "sourceServerId": 0}"#,
        )
        .unwrap();
        assert_eq!(input.list_id, 3);
        assert_eq!(input.expired_at, 9);
        assert_eq!(input.event_level, "critical");
        let item = input.normalize().unwrap();
        assert_eq!(item.source.source_http_firewall_policy_id, Some(4));
        assert_eq!(item.source.source_server_id, None);
        assert!(!is_read_on_create(&item));
    }

    #[tokio::test]
    async fn test_create_and_recreate() {
        let mut f = fixture().await;
        let list_id = list(&f, true, None).await;

        let first = f.gateway.create_item(Caller::admin(1), &input(list_id, "192.168.1.10")).await.unwrap();
        let second = f.gateway.create_item(Caller::node(2), &input(list_id, "192.168.1.10")).await.unwrap();

        assert_ne!(first, second);
        assert!(!enabled(&f, first).await);
        assert!(enabled(&f, second).await);
        assert_eq!(drain(&mut f.rx).len(), 2);
    }

    #[tokio::test]
    async fn test_create_rejects_missing_or_foreign_list() {
        let f = fixture().await;
        let foreign = list(&f, false, Some(99)).await;
        let owned = list(&f, false, Some(10)).await;

        let err = f.gateway.create_item(Caller::admin(1), &input(12345, "1.1.1.1")).await.unwrap_err();
        assert!(matches!(err, ServiceError::ListNotFound(12345)));

        let err = f.gateway.create_item(Caller::user(5), &input(foreign, "1.1.1.1")).await.unwrap_err();
        assert!(matches!(err, ServiceError::PermissionDenied(_)));

        assert!(f.gateway.create_item(Caller::user(5), &input(owned, "1.1.1.1")).await.is_ok());
    }

    #[tokio::test]
    async fn test_batch_validates_before_writing() {
        let mut f = fixture().await;
        let list_id = list(&f, true, None).await;

        let batch = vec![input(list_id, "10.0.0.1"), input(list_id, "not-an-ip")];
        assert!(f.gateway.create_items(Caller::admin(1), &batch).await.is_err());

        let mut conn = f.db.pool().acquire().await.unwrap();
        let rows = ItemRepository::new(&mut conn).list_after_version(0, 10).await.unwrap();
        assert!(rows.is_empty());
        drop(conn);
        assert!(drain(&mut f.rx).is_empty());
    }

    #[tokio::test]
    async fn test_batch_signals_once_for_last_item() {
        let mut f = fixture().await;
        let list_id = list(&f, true, None).await;

        let batch: Vec<ItemInput> = (1..=5)
            .map(|n| input(list_id, &format!("10.0.0.{}", n)))
            .collect();
        let ids = f.gateway.create_items(Caller::node(3), &batch).await.unwrap();
        assert_eq!(ids.len(), 5);

        let signals = drain(&mut f.rx);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].item_id, ids[4]);
        assert_eq!(signals[0].list_id, list_id);

        assert!(f.gateway.create_items(Caller::node(3), &[]).await.unwrap().is_empty());
        assert!(drain(&mut f.rx).is_empty());
    }

    #[tokio::test]
    async fn test_update_keeps_list_and_dedups() {
        let f = fixture().await;
        let list_id = list(&f, true, None).await;
        let other_list = list(&f, true, None).await;
        let admin = Caller::admin(1);

        let a = f.gateway.create_item(admin, &input(list_id, "10.0.0.1")).await.unwrap();
        let b = f.gateway.create_item(admin, &input(list_id, "10.0.0.2")).await.unwrap();

        f.gateway.update_item(admin, b, &input(other_list, "10.0.0.0/30")).await.unwrap();
        assert!(!enabled(&f, a).await);

        let mut conn = f.db.pool().acquire().await.unwrap();
        let updated = ItemRepository::new(&mut conn).find(b).await.unwrap().unwrap();
        assert_eq!(updated.list_id, list_id);
        assert_eq!(updated.value, "10.0.0.0/30");
        drop(conn);

        let err = f.gateway.update_item(admin, a, &input(list_id, "10.0.0.1")).await.unwrap_err();
        assert!(matches!(err, ServiceError::ItemNotFound(_)));
        let err = f.gateway.update_item(Caller::node(1), b, &input(list_id, "10.0.0.1")).await.unwrap_err();
        assert!(matches!(err, ServiceError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_delete_variants() {
        let mut f = fixture().await;
        let list_id = list(&f, true, None).await;
        let admin = Caller::admin(1);

        let a = f.gateway.create_item(admin, &input(list_id, "1.1.1.1")).await.unwrap();
        let b = f.gateway.create_item(admin, &input(list_id, "2.2.2.0-2.2.2.9")).await.unwrap();
        let c = f.gateway.create_item(admin, &input(list_id, "3.3.3.3")).await.unwrap();
        drain(&mut f.rx);

        assert_eq!(f.gateway.delete_item(admin, &DeleteTarget::Id(a), None).await.unwrap(), 1);
        assert!(matches!(
            f.gateway.delete_item(admin, &DeleteTarget::Id(a), None).await,
            Err(ServiceError::ItemNotFound(_))
        ));

        let by_range = DeleteTarget::Range {
            ip_from: "2.2.2.9".to_string(),
            ip_to: "2.2.2.0".to_string(),
        };
        assert_eq!(f.gateway.delete_item(admin, &by_range, Some(list_id)).await.unwrap(), 1);
        assert!(!enabled(&f, b).await);

        let by_value = DeleteTarget::Value("3.3.3.3/32".to_string());
        assert_eq!(f.gateway.delete_item(admin, &by_value, None).await.unwrap(), 1);
        assert_eq!(f.gateway.delete_item(admin, &by_value, None).await.unwrap(), 0);
        assert!(!enabled(&f, c).await);

        // One signal per delete that changed something
        assert_eq!(drain(&mut f.rx).len(), 3);
    }

    #[tokio::test]
    async fn test_user_delete_by_value_stays_in_owned_lists() {
        let f = fixture().await;
        let owned = list(&f, false, Some(10)).await;
        let foreign = list(&f, false, Some(99)).await;
        let admin = Caller::admin(1);

        let mine = f.gateway.create_item(admin, &input(owned, "4.4.4.4")).await.unwrap();
        let theirs = f.gateway.create_item(admin, &input(foreign, "4.4.4.4")).await.unwrap();

        let target = DeleteTarget::Value("4.4.4.4".to_string());
        assert_eq!(f.gateway.delete_item(Caller::user(5), &target, None).await.unwrap(), 1);
        assert!(!enabled(&f, mine).await);
        assert!(enabled(&f, theirs).await);

        assert!(f.gateway.delete_item(Caller::user(5), &target, Some(foreign)).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_items_signals_once() {
        let mut f = fixture().await;
        let list_id = list(&f, true, None).await;
        let admin = Caller::admin(1);

        let batch: Vec<ItemInput> = (1..=3)
            .map(|n| input(list_id, &format!("10.1.0.{}", n)))
            .collect();
        let ids = f.gateway.create_items(admin, &batch).await.unwrap();
        drain(&mut f.rx);

        let mut targets = ids.clone();
        targets.push(424242);
        assert_eq!(f.gateway.delete_items(admin, &targets).await.unwrap(), 3);
        let signals = drain(&mut f.rx);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].item_id, ids[2]);
    }

    #[tokio::test]
    async fn test_mark_read_scoped_to_user() {
        let f = fixture().await;
        let owned = list(&f, false, Some(10)).await;
        let foreign = list(&f, false, Some(99)).await;
        let detected = |list_id| ItemInput {
            node_id: 7,
            ..input(list_id, "5.5.5.5")
        };
        f.gateway.create_item(Caller::node(7), &detected(owned)).await.unwrap();
        f.gateway.create_item(Caller::node(7), &detected(foreign)).await.unwrap();

        assert_eq!(f.gateway.mark_read(Caller::user(5)).await.unwrap(), 1);
        assert_eq!(f.gateway.mark_read(Caller::admin(1)).await.unwrap(), 1);
        assert!(f.gateway.mark_read(Caller::node(7)).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_recreates_keep_one_active_row() {
        const WRITERS: usize = 16;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("edgelist.db");
        let db = Database::new(path.to_str().unwrap()).await.unwrap();
        let directory = Arc::new(SqlDirectory::new(db.pool().clone()));
        let lists = Arc::new(ListService::new(db.clone(), directory, Duration::from_secs(60)));
        let gateway = Arc::new(WriteGateway::new(db.clone(), lists.clone(), Arc::new(ChangeNotifier::new())));
        let list_id = lists
            .create_list(
                Caller::admin(1),
                NewList {
                    name: "l".to_string(),
                    list_type: ListType::Black,
                    is_public: true,
                    is_global: true,
                    server_id: None,
                    user_id: None,
                    description: String::new(),
                },
            )
            .await
            .unwrap();

        let mut writers = tokio::task::JoinSet::new();
        for _ in 0..WRITERS {
            let gateway = gateway.clone();
            writers.spawn(async move {
                gateway
                    .create_item(Caller::admin(1), &input(list_id, "203.0.113.9"))
                    .await
            });
        }
        while let Some(result) = writers.join_next().await {
            result.unwrap().unwrap();
        }

        let rows: Vec<(i64, i64)> =
            sqlx::query_as("SELECT version, state FROM ip_items WHERE list_id = ? ORDER BY version")
                .bind(list_id)
                .fetch_all(db.pool())
                .await
                .unwrap();
        assert_eq!(rows.len(), WRITERS);

        let mut versions: Vec<i64> = rows.iter().map(|(v, _)| *v).collect();
        versions.dedup();
        assert_eq!(versions.len(), WRITERS);

        let enabled: Vec<_> = rows.iter().filter(|(_, state)| *state == 1).collect();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].0, *versions.last().unwrap());
    }
}
