//! Configuration validation.
//!
//! Validates configuration at startup to catch common errors early.

use super::Config;
use crate::security::identity::CallerKind;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

/// Validation errors for configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("server.name is required")]
    MissingServerName,
    #[error("database.path parent directory does not exist: {0}")]
    DatabasePathInvalid(String),
    #[error("sync.max_page_size must be positive, got {0}")]
    InvalidMaxPageSize(i64),
    #[error("sync.default_page_size must be in 1..=max_page_size, got {0}")]
    InvalidDefaultPageSize(i64),
    #[error("at least one [[token]] block is required")]
    NoTokens,
    #[error("token #{0} is empty")]
    EmptyToken(usize),
    #[error("token #{0} duplicates an earlier token")]
    DuplicateToken(usize),
    #[error("token #{index} for a {kind} caller needs a positive id, got {id}")]
    InvalidTokenId {
        index: usize,
        kind: &'static str,
        id: i64,
    },
}

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    // Required fields
    if config.server.name.is_empty() {
        errors.push(ValidationError::MissingServerName);
    }

    // Database path validation
    let db_path = Path::new(&config.database.path);
    if config.database.path != ":memory:"
        && let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        errors.push(ValidationError::DatabasePathInvalid(
            config.database.path.clone(),
        ));
    }

    // Page sizes
    let sync = &config.sync;
    if sync.max_page_size <= 0 {
        errors.push(ValidationError::InvalidMaxPageSize(sync.max_page_size));
    } else if sync.default_page_size <= 0 || sync.default_page_size > sync.max_page_size {
        errors.push(ValidationError::InvalidDefaultPageSize(
            sync.default_page_size,
        ));
    }

    // Tokens
    if config.tokens.is_empty() {
        errors.push(ValidationError::NoTokens);
    }
    let mut seen = HashSet::new();
    for (index, block) in config.tokens.iter().enumerate() {
        if block.token.is_empty() {
            errors.push(ValidationError::EmptyToken(index));
            continue;
        }
        if !seen.insert(block.token.as_str()) {
            errors.push(ValidationError::DuplicateToken(index));
        }
        // Admin id 0 is the platform superuser
        if block.kind != CallerKind::Admin && block.id <= 0 {
            errors.push(ValidationError::InvalidTokenId {
                index,
                kind: block.kind.as_str(),
                id: block.id,
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
