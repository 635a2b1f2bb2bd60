//! Repository for IP items and the global version sequence.

mod models;
mod queries;

pub use models::{
    IpItem, ItemFilter, ItemScope, ItemType, NewItem, Provenance, SearchFilter, StoredWrite,
    Tombstone,
};
pub use queries::ItemRepository;
