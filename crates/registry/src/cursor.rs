//! Resume cursor for the indexer, persisted alongside the projection.
//!
//! The projector commits the cursor in the same batch as each applied event, so after a restart
//! the indexer resumes at the cursor's block. Logs of that block already applied are recognized
//! as duplicates by their event id.

use crate::abi::Provenance;
use crate::store::{load, Entity, EntityKind, Store, StoreError};
use serde::{Deserialize, Serialize};

/// Position of the last applied log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub block_number: u64,
    pub log_index: u64,
}

impl Cursor {
    pub const ID: &'static str = "cursor";

    pub fn new(block_number: u64, log_index: u64) -> Self {
        Self {
            block_number,
            log_index,
        }
    }

    pub fn at(provenance: &Provenance) -> Self {
        Self::new(provenance.block_number, provenance.log_index)
    }

    /// Stored cursor, if any event has been applied.
    pub fn load<S: Store + ?Sized>(store: &S) -> Result<Option<Self>, StoreError> {
        load(store, Self::ID)
    }

    /// Block to start fetching from: the cursor's own block (it may be partially applied),
    /// or `start_block` when nothing is stored yet.
    pub fn resume_block(cursor: Option<Self>, start_block: u64) -> u64 {
        cursor.map(|c| c.block_number.max(start_block)).unwrap_or(start_block)
    }
}

impl Entity for Cursor {
    const KIND: EntityKind = EntityKind::IndexerCursor;

    fn id(&self) -> String {
        Self::ID.to_string()
    }
}
