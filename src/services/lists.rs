//! List service: lifecycle, ownership checks and the list lookup cache.

use super::directory::PolicyDirectory;
use super::unix_now;
use crate::db::{Database, DbError, IpList, ListRepository, NewList};
use crate::error::{ServiceError, ServiceResult};
use crate::security::identity::{Caller, CallerKind};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

struct CachedList {
    list: Option<IpList>,
    fetched_at: Instant,
}

/// Owns list mutations so it can keep its lookup cache coherent.
pub struct ListService {
    db: Database,
    directory: Arc<dyn PolicyDirectory>,
    cache: DashMap<i64, CachedList>,
    ttl: Duration,
}

impl ListService {
    pub fn new(db: Database, directory: Arc<dyn PolicyDirectory>, ttl: Duration) -> Self {
        Self {
            db,
            directory,
            cache: DashMap::new(),
            ttl,
        }
    }

    pub fn directory(&self) -> &Arc<dyn PolicyDirectory> {
        &self.directory
    }

    /// Create a list. Admin only.
    pub async fn create_list(&self, caller: Caller, list: NewList) -> ServiceResult<i64> {
        caller.require(&[CallerKind::Admin])?;

        if !list.is_public && !list.has_owner_scope() {
            return Err(ServiceError::Validation(
                "a non-public list needs a 'serverId' or 'userId'".to_string(),
            ));
        }

        let mut conn = self.db.pool().acquire().await?;
        let list_id = ListRepository::new(&mut conn)
            .create(&list, unix_now())
            .await?;
        self.invalidate(list_id);

        info!(list_id, list_type = list.list_type.as_str(), is_public = list.is_public, "IP list created");
        Ok(list_id)
    }

    /// Find an enabled list the caller may see.
    pub async fn find_enabled_list(
        &self,
        caller: Caller,
        list_id: i64,
    ) -> ServiceResult<Option<IpList>> {
        let caller = caller.require(&[CallerKind::Admin, CallerKind::User])?;

        let mut conn = self.db.pool().acquire().await?;
        let list = ListRepository::new(&mut conn).find_enabled(list_id).await?;
        drop(conn);

        if let (Some(list), Some(user_id)) = (&list, caller.user_id()) {
            self.check_list_owner(user_id, list).await?;
        }
        Ok(list)
    }

    /// Disable a list. Its items leave distribution through the list state.
    pub async fn delete_list(&self, caller: Caller, list_id: i64) -> ServiceResult<()> {
        caller.require(&[CallerKind::Admin])?;

        let mut conn = self.db.pool().acquire().await?;
        let disabled = ListRepository::new(&mut conn).disable(list_id).await?;
        self.invalidate(list_id);
        if !disabled {
            return Err(ServiceError::ListNotFound(list_id));
        }

        info!(list_id, "IP list disabled");
        Ok(())
    }

    /// Disable every list scoped to a removed server.
    pub async fn delete_server_lists(
        &self,
        caller: Caller,
        server_id: i64,
    ) -> ServiceResult<Vec<i64>> {
        caller.require(&[CallerKind::Admin])?;
        if server_id <= 0 {
            return Err(ServiceError::Validation("invalid 'serverId'".to_string()));
        }

        let mut conn = self.db.pool().acquire().await?;
        let ids = ListRepository::new(&mut conn)
            .disable_with_server(server_id)
            .await?;
        for id in &ids {
            self.invalidate(*id);
        }

        info!(server_id, count = ids.len(), "IP lists of server disabled");
        Ok(ids)
    }

    /// Server the list is scoped to, 0 if none.
    pub async fn find_server_id(&self, caller: Caller, list_id: i64) -> ServiceResult<i64> {
        let caller = caller.require(&[CallerKind::Admin, CallerKind::User])?;
        if let Some(user_id) = caller.user_id() {
            self.check_user_list(user_id, list_id).await?;
        }

        let mut conn = self.db.pool().acquire().await?;
        let server_id = ListRepository::new(&mut conn)
            .find_server_id(list_id)
            .await?;
        Ok(server_id.unwrap_or(0))
    }

    /// A tenant may use a list that is public, names them directly, or is
    /// scoped to one of their servers.
    pub async fn check_user_list(&self, user_id: i64, list_id: i64) -> ServiceResult<()> {
        let mut conn = self.db.pool().acquire().await?;
        let list = ListRepository::new(&mut conn).find_enabled(list_id).await?;
        drop(conn);

        match list {
            Some(list) => self.check_list_owner(user_id, &list).await,
            None => Err(ServiceError::ListNotFound(list_id)),
        }
    }

    async fn check_list_owner(&self, user_id: i64, list: &IpList) -> ServiceResult<()> {
        if list.is_public || list.user_id == Some(user_id) {
            return Ok(());
        }
        if let Some(server_id) = list.server_id
            && self.directory.user_owns_server(user_id, server_id).await?
        {
            return Ok(());
        }
        Err(ServiceError::PermissionDenied(format!(
            "ip list {} is not owned by user {}",
            list.id, user_id
        )))
    }

    /// Check that new items may be written to a list: it must be enabled,
    /// and tenants must own it.
    pub async fn check_writable(&self, caller: Caller, list_id: i64) -> ServiceResult<()> {
        match caller.user_id() {
            Some(user_id) => self.check_user_list(user_id, list_id).await,
            None => {
                let mut conn = self.db.pool().acquire().await?;
                let list = ListRepository::new(&mut conn).find_enabled(list_id).await?;
                list.map(|_| ()).ok_or(ServiceError::ListNotFound(list_id))
            }
        }
    }

    /// Ownership check for reads and mutations of existing items. Admins
    /// and nodes pass; a missing list only matters to tenants.
    pub async fn check_caller_list(&self, caller: Caller, list_id: i64) -> ServiceResult<()> {
        match caller.user_id() {
            Some(user_id) => self.check_user_list(user_id, list_id).await,
            None => Ok(()),
        }
    }

    /// Enabled lists owned by a tenant, directly or through their servers.
    pub async fn user_list_ids(&self, user_id: i64) -> ServiceResult<Vec<i64>> {
        let server_ids = self.directory.user_server_ids(user_id).await?;
        let mut conn = self.db.pool().acquire().await?;
        let ids = ListRepository::new(&mut conn)
            .find_user_list_ids(user_id, &server_ids)
            .await?;
        Ok(ids)
    }

    /// Look up a list in any state, reusing results younger than the TTL.
    /// Used on the cursor path, where the same few lists repeat on every row.
    pub async fn cached_list(&self, list_id: i64) -> Result<Option<IpList>, DbError> {
        if let Some(entry) = self.cache.get(&list_id)
            && entry.fetched_at.elapsed() < self.ttl
        {
            return Ok(entry.list.clone());
        }

        let mut conn = self.db.pool().acquire().await?;
        let list = ListRepository::new(&mut conn).find(list_id).await?;
        self.cache.insert(
            list_id,
            CachedList {
                list: list.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(list)
    }

    /// Uncached lookup in any state.
    pub async fn find_list(&self, list_id: i64) -> Result<Option<IpList>, DbError> {
        let mut conn = self.db.pool().acquire().await?;
        ListRepository::new(&mut conn).find(list_id).await
    }

    pub fn invalidate(&self, list_id: i64) {
        self.cache.remove(&list_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ListType;
    use crate::services::directory::SqlDirectory;

    async fn setup() -> (Database, ListService) {
        let db = Database::new(":memory:").await.unwrap();
        sqlx::query("INSERT INTO servers (id, name, user_id) VALUES (10, 'shop', 5)")
            .execute(db.pool())
            .await
            .unwrap();
        let directory = Arc::new(SqlDirectory::new(db.pool().clone()));
        let service = ListService::new(db.clone(), directory, Duration::from_secs(60));
        (db, service)
    }

    fn new_list(is_public: bool, server_id: Option<i64>, user_id: Option<i64>) -> NewList {
        NewList {
            name: "list".to_string(),
            list_type: ListType::Black,
            is_public,
            is_global: false,
            server_id,
            user_id,
            description: String::new(),
        }
    }

    #[tokio::test]
    async fn test_create_requires_admin_and_scope() {
        let (_db, service) = setup().await;

        let err = service
            .create_list(Caller::user(5), new_list(true, None, None))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::PermissionDenied(_)));

        let err = service
            .create_list(Caller::admin(1), new_list(false, None, None))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        let id = service
            .create_list(Caller::admin(1), new_list(false, Some(10), None))
            .await
            .unwrap();
        assert_eq!(service.find_server_id(Caller::admin(1), id).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_user_ownership() {
        let (_db, service) = setup().await;
        let admin = Caller::admin(1);
        let via_server = service
            .create_list(admin, new_list(false, Some(10), None))
            .await
            .unwrap();
        let direct = service
            .create_list(admin, new_list(false, None, Some(6)))
            .await
            .unwrap();
        let public = service
            .create_list(admin, new_list(true, None, None))
            .await
            .unwrap();

        assert!(service.check_user_list(5, via_server).await.is_ok());
        assert!(service.check_user_list(5, public).await.is_ok());
        assert!(matches!(
            service.check_user_list(5, direct).await,
            Err(ServiceError::PermissionDenied(_))
        ));
        assert!(service.check_user_list(6, direct).await.is_ok());
        assert!(matches!(
            service.check_user_list(5, 999).await,
            Err(ServiceError::ListNotFound(999))
        ));

        assert_eq!(service.user_list_ids(5).await.unwrap(), vec![via_server]);
        assert!(service.find_enabled_list(Caller::user(6), direct).await.unwrap().is_some());
        assert!(service.find_enabled_list(Caller::user(5), direct).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_invalidates_cache() {
        let (_db, service) = setup().await;
        let admin = Caller::admin(1);
        let id = service
            .create_list(admin, new_list(true, None, None))
            .await
            .unwrap();

        assert!(service.cached_list(id).await.unwrap().unwrap().is_enabled());
        service.delete_list(admin, id).await.unwrap();
        assert!(!service.cached_list(id).await.unwrap().unwrap().is_enabled());
        assert!(matches!(
            service.delete_list(admin, id).await,
            Err(ServiceError::ListNotFound(_))
        ));
        assert!(matches!(
            service.check_writable(admin, id).await,
            Err(ServiceError::ListNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_server_lists() {
        let (_db, service) = setup().await;
        let admin = Caller::admin(1);
        let a = service
            .create_list(admin, new_list(false, Some(10), None))
            .await
            .unwrap();
        assert_eq!(service.cached_list(a).await.unwrap().unwrap().server_id, Some(10));

        assert_eq!(service.delete_server_lists(admin, 10).await.unwrap(), vec![a]);
        assert!(!service.cached_list(a).await.unwrap().unwrap().is_enabled());
    }
}
