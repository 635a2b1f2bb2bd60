//! IP list services.
//!
//! - [`lists::ListService`]: list lifecycle, ownership checks, list cache
//! - [`gateway::WriteGateway`]: every item mutation
//! - [`sync::CursorSync`]: the version-cursor pull protocol for nodes
//! - [`resolver::MembershipResolver`]: point lookups and operator views
//!
//! Services share one [`Database`] and one [`notify::ChangeNotifier`].

pub mod directory;
pub mod gateway;
pub mod lists;
pub mod notify;
pub mod resolver;
pub mod sync;

use crate::config::SyncConfig;
use crate::db::Database;
use directory::PolicyDirectory;
use gateway::WriteGateway;
use lists::ListService;
use notify::ChangeNotifier;
use resolver::MembershipResolver;
use std::sync::Arc;
use std::time::Duration;
use sync::CursorSync;

/// Current unix time in seconds, the clock used for expiry.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// All services, wired to one database.
pub struct Services {
    pub lists: Arc<ListService>,
    pub gateway: WriteGateway,
    pub sync: CursorSync,
    pub resolver: MembershipResolver,
    pub notifier: Arc<ChangeNotifier>,
}

impl Services {
    pub fn new(db: Database, directory: Arc<dyn PolicyDirectory>, sync: &SyncConfig) -> Self {
        let notifier = Arc::new(ChangeNotifier::new());
        let lists = Arc::new(ListService::new(
            db.clone(),
            directory,
            Duration::from_secs(sync.list_cache_ttl_secs),
        ));

        Self {
            gateway: WriteGateway::new(db.clone(), lists.clone(), notifier.clone()),
            sync: CursorSync::new(db.clone(), lists.clone(), sync.clone()),
            resolver: MembershipResolver::new(db, lists.clone(), notifier.clone(), sync.clone()),
            lists,
            notifier,
        }
    }
}
