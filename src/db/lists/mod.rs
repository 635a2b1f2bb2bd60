//! Repository for IP lists.

mod models;
mod queries;

pub use models::{IpList, ListType, NewList};
pub use queries::ListRepository;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn new_list(list_type: ListType) -> NewList {
        NewList {
            name: "test".to_string(),
            list_type,
            is_public: false,
            is_global: false,
            server_id: Some(10),
            user_id: None,
            description: String::new(),
        }
    }

    #[tokio::test]
    async fn test_create_find_disable() {
        let db = Database::new(":memory:").await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        let mut repo = ListRepository::new(&mut conn);

        let id = repo.create(&new_list(ListType::Black), 100).await.unwrap();
        let list = repo.find_enabled(id).await.unwrap().unwrap();
        assert_eq!(list.list_type, ListType::Black);
        assert_eq!(list.server_id, Some(10));
        assert!(list.has_owner_scope());
        assert!(!list.is_network_wide());
        assert_eq!(repo.find_server_id(id).await.unwrap(), Some(10));

        assert!(repo.disable(id).await.unwrap());
        assert!(!repo.disable(id).await.unwrap());
        assert!(repo.find_enabled(id).await.unwrap().is_none());

        // Disabled lists are still visible to readers that need the tombstone
        let disabled = repo.find(id).await.unwrap().unwrap();
        assert!(!disabled.is_enabled());
        assert_eq!(repo.find_server_id(id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_disable_with_server() {
        let db = Database::new(":memory:").await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        let mut repo = ListRepository::new(&mut conn);

        let a = repo.create(&new_list(ListType::White), 1).await.unwrap();
        let b = repo.create(&new_list(ListType::Black), 1).await.unwrap();
        let mut other = new_list(ListType::Black);
        other.server_id = Some(11);
        let c = repo.create(&other, 1).await.unwrap();

        let mut disabled = repo.disable_with_server(10).await.unwrap();
        disabled.sort();
        assert_eq!(disabled, vec![a, b]);
        assert!(repo.find_enabled(c).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_user_list_ids() {
        let db = Database::new(":memory:").await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        let mut repo = ListRepository::new(&mut conn);

        let mut direct = new_list(ListType::Black);
        direct.server_id = None;
        direct.user_id = Some(5);
        let direct_id = repo.create(&direct, 1).await.unwrap();
        let via_server = repo.create(&new_list(ListType::Black), 1).await.unwrap();
        let mut foreign = new_list(ListType::Black);
        foreign.server_id = Some(99);
        repo.create(&foreign, 1).await.unwrap();

        assert_eq!(
            repo.find_user_list_ids(5, &[10]).await.unwrap(),
            vec![direct_id, via_server]
        );
        assert_eq!(repo.find_user_list_ids(5, &[]).await.unwrap(), vec![direct_id]);
    }
}
