//! Caller identity and address range handling.
//!
//! - **Identity**: bearer tokens resolved to admin, tenant user or node callers
//! - **Range**: normalization of single addresses, dashed ranges and CIDR blocks

pub mod identity;
pub mod range;
