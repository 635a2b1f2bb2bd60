//! Default value functions for configuration.
//!
//! Separated into its own module for clarity and reuse.

use std::net::{Ipv4Addr, SocketAddr};

/// Returns `true` (for serde defaults).
pub fn default_true() -> bool {
    true
}

// =============================================================================
// Server Defaults
// =============================================================================

pub fn default_listen() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 8003))
}

pub fn default_database_path() -> String {
    "edgelist.db".to_string()
}

// =============================================================================
// Sync Defaults
// =============================================================================

pub fn default_page_size() -> i64 {
    100
}

pub fn default_max_page_size() -> i64 {
    1000
}

pub fn default_list_cache_ttl() -> u64 {
    60
}
