//! IP item models.

use crate::db::{ListType, RowState};
use crate::security::range::{Family, IpRange};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Kind of entry an item describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Ipv4,
    Ipv6,
    /// Matches every address; carries no bounds.
    All,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Ipv4 => "ipv4",
            ItemType::Ipv6 => "ipv6",
            ItemType::All => "all",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ipv4" => Some(ItemType::Ipv4),
            "ipv6" => Some(ItemType::Ipv6),
            "all" => Some(ItemType::All),
            _ => None,
        }
    }

    /// Type implied by a normalized range.
    pub fn for_range(range: &IpRange) -> Self {
        match range.family() {
            Family::V6 => ItemType::Ipv6,
            _ => ItemType::Ipv4,
        }
    }
}

/// Why an item exists. Back-references only; never part of the overlap check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Provenance {
    #[serde(rename = "sourceNodeId")]
    pub source_node_id: Option<i64>,
    #[serde(rename = "sourceServerId")]
    pub source_server_id: Option<i64>,
    #[serde(rename = "sourceHTTPFirewallPolicyId")]
    pub source_http_firewall_policy_id: Option<i64>,
    #[serde(rename = "sourceHTTPFirewallRuleGroupId")]
    pub source_http_firewall_rule_group_id: Option<i64>,
    #[serde(rename = "sourceHTTPFirewallRuleSetId")]
    pub source_http_firewall_rule_set_id: Option<i64>,
}

impl Provenance {
    /// Treat non-positive ids as absent, which is how nodes send "unset".
    pub fn normalized(self) -> Self {
        let f = |v: Option<i64>| v.filter(|&id| id > 0);
        Self {
            source_node_id: f(self.source_node_id),
            source_server_id: f(self.source_server_id),
            source_http_firewall_policy_id: f(self.source_http_firewall_policy_id),
            source_http_firewall_rule_group_id: f(self.source_http_firewall_rule_group_id),
            source_http_firewall_rule_set_id: f(self.source_http_firewall_rule_set_id),
        }
    }

    /// Items written by a detector start unread so operators see them.
    pub fn is_automated(&self) -> bool {
        self.source_node_id.is_some()
            || self.source_server_id.is_some()
            || self.source_http_firewall_policy_id.is_some()
    }
}

/// A stored IP item, in any state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpItem {
    pub id: i64,
    pub list_id: i64,
    pub value: String,
    pub ip_from: String,
    pub ip_to: String,
    pub item_type: ItemType,
    pub version: i64,
    pub state: RowState,
    /// Unix time; 0 means never.
    pub expired_at: i64,
    pub reason: String,
    pub event_level: String,
    pub node_id: i64,
    pub server_id: i64,
    pub source: Provenance,
    pub is_read: bool,
    pub created_at: i64,
}

impl IpItem {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expired_at > 0 && self.expired_at <= now
    }

    /// Enabled and not yet expired.
    pub fn is_active(&self, now: i64) -> bool {
        self.state.is_enabled() && !self.is_expired(now)
    }

    /// Display value; older rows may only carry bounds.
    pub fn compose_value(&self) -> String {
        if !self.value.is_empty() {
            return self.value.clone();
        }
        if self.ip_to.is_empty() {
            self.ip_from.clone()
        } else {
            format!("{}-{}", self.ip_from, self.ip_to)
        }
    }
}

/// A validated item ready to be written.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub list_id: i64,
    /// `None` for items of type `all`.
    pub range: Option<IpRange>,
    pub item_type: ItemType,
    pub expired_at: i64,
    pub reason: String,
    pub event_level: String,
    pub node_id: i64,
    pub server_id: i64,
    pub source: Provenance,
}

impl NewItem {
    pub fn family(&self) -> Family {
        self.range.as_ref().map_or(Family::All, IpRange::family)
    }

    /// Stored sort keys; `all` items use empty keys so they only ever
    /// overlap each other.
    pub(crate) fn keys(&self) -> (Vec<u8>, Vec<u8>) {
        match &self.range {
            Some(r) => (r.from_key(), r.to_key()),
            None => (Vec::new(), Vec::new()),
        }
    }

    pub(crate) fn columns(&self) -> (&str, &str, &str) {
        match &self.range {
            Some(r) => (r.value.as_str(), r.ip_from.as_str(), r.ip_to.as_str()),
            None => ("", "", ""),
        }
    }
}

/// Result of a write on the item table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredWrite {
    pub item_id: i64,
    pub version: i64,
    /// Previously enabled items that were tombstoned by this write.
    pub replaced: Vec<i64>,
}

/// An item tombstoned by a delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tombstone {
    pub item_id: i64,
    pub list_id: i64,
    pub version: i64,
}

/// Which lists a query may see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemScope {
    All,
    Lists(Vec<i64>),
}

/// Filters for browsing one list.
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    pub list_id: i64,
    pub keyword: String,
    pub ip_from: String,
    pub ip_to: String,
    pub event_level: String,
}

/// Filters for the cross-list operator search.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub keyword: String,
    /// Only items whose range contains this address.
    pub ip: Option<IpAddr>,
    pub unread_only: bool,
    pub event_level: String,
    pub list_type: Option<ListType>,
    pub global_only: bool,
}
