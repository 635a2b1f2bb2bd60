//! Caller identity resolution.
//!
//! The RPC layer resolves a bearer token into a [`Caller`] once per request.
//! Everything below the RPC layer only sees the caller class and its id.

use crate::config::TokenBlock;
use crate::error::ServiceError;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;

/// Class of an authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallerKind {
    /// Platform administrator.
    Admin,
    /// Tenant user; may only touch lists they own.
    User,
    /// Edge node or automated detector.
    Node,
}

impl CallerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallerKind::Admin => "admin",
            CallerKind::User => "user",
            CallerKind::Node => "node",
        }
    }
}

/// An authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub kind: CallerKind,
    pub id: i64,
}

#[cfg(test)]
impl Caller {
    pub fn admin(id: i64) -> Self {
        Self {
            kind: CallerKind::Admin,
            id,
        }
    }

    pub fn user(id: i64) -> Self {
        Self {
            kind: CallerKind::User,
            id,
        }
    }

    pub fn node(id: i64) -> Self {
        Self {
            kind: CallerKind::Node,
            id,
        }
    }
}

impl Caller {
    /// Tenant id when the caller is a tenant user.
    pub fn user_id(&self) -> Option<i64> {
        match self.kind {
            CallerKind::User => Some(self.id),
            _ => None,
        }
    }

    /// Reject callers whose class is not in `allowed`.
    pub fn require(self, allowed: &[CallerKind]) -> Result<Self, ServiceError> {
        if !allowed.contains(&self.kind) {
            return Err(ServiceError::PermissionDenied(format!(
                "{} callers may not use this operation",
                self.kind.as_str()
            )));
        }
        if self.kind == CallerKind::User && self.id <= 0 {
            return Err(ServiceError::Validation("invalid userId".to_string()));
        }
        Ok(self)
    }
}

impl fmt::Display for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

/// Resolves request credentials into a caller.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<Caller, ServiceError>;
}

/// Static bearer tokens loaded from the `[[token]]` config blocks.
pub struct TokenResolver {
    tokens: HashMap<String, Caller>,
}

impl TokenResolver {
    pub fn new(blocks: &[TokenBlock]) -> Self {
        let tokens = blocks
            .iter()
            .map(|b| {
                (
                    b.token.clone(),
                    Caller {
                        kind: b.kind,
                        id: b.id,
                    },
                )
            })
            .collect();
        Self { tokens }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }
}

#[async_trait]
impl IdentityResolver for TokenResolver {
    async fn resolve(&self, token: &str) -> Result<Caller, ServiceError> {
        self.tokens
            .get(token)
            .copied()
            .ok_or(ServiceError::Unauthenticated)
    }
}
