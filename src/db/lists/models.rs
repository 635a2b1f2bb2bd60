//! IP list models.

use crate::db::RowState;
use serde::{Deserialize, Serialize};

/// Role of a list in the edge firewall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListType {
    /// Allow list.
    White,
    /// Deny list.
    Black,
    /// Observe-only list; policy-internal and never distributed to nodes.
    Grey,
}

impl ListType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListType::White => "white",
            ListType::Black => "black",
            ListType::Grey => "grey",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "white" => Some(ListType::White),
            "black" => Some(ListType::Black),
            "grey" => Some(ListType::Grey),
            _ => None,
        }
    }

    /// Whether membership lets traffic through.
    pub fn is_allowing(&self) -> bool {
        matches!(self, ListType::White | ListType::Grey)
    }
}

/// A stored IP list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpList {
    pub id: i64,
    pub name: String,
    pub list_type: ListType,
    /// Usable across tenants without an ownership check.
    pub is_public: bool,
    /// Applies network-wide rather than to one server.
    pub is_global: bool,
    pub server_id: Option<i64>,
    pub user_id: Option<i64>,
    pub description: String,
    pub state: RowState,
    pub created_at: i64,
}

impl IpList {
    pub fn is_enabled(&self) -> bool {
        self.state.is_enabled()
    }

    /// Entries of this list apply to every server on every node.
    pub fn is_network_wide(&self) -> bool {
        self.is_public && self.is_global
    }
}

#[cfg(test)]
impl IpList {
    /// Whether the list names an owning server or tenant.
    pub fn has_owner_scope(&self) -> bool {
        self.server_id.is_some_and(|s| s > 0) || self.user_id.is_some_and(|u| u > 0)
    }
}

/// Input for creating a list.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewList {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub list_type: ListType,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub is_global: bool,
    #[serde(default)]
    pub server_id: Option<i64>,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub description: String,
}

impl NewList {
    /// Whether the list names an owning server or tenant.
    pub fn has_owner_scope(&self) -> bool {
        self.server_id.is_some_and(|s| s > 0) || self.user_id.is_some_and(|u| u > 0)
    }
}
