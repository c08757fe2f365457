//! Keyed entity store contract.
//!
//! Records are serialized to JSON and addressed by `(EntityKind, id)`. Writes are buffered in a
//! [WriteBatch] and applied all-or-nothing by [Store::commit]; a dropped batch applies nothing.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Every record type the projection persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    NewPubkeyRegistration,
    OperatorRegistered,
    OperatorDeregistered,
    OperatorSetParamsUpdated,
    OperatorSocketUpdate,
    OperatorStakeUpdate,
    Operator,
    OperatorMap,
    OperatorSocketMap,
    IndexerCursor,
}

/// A typed record with a stable key.
pub trait Entity: Serialize + DeserializeOwned {
    const KIND: EntityKind;

    fn id(&self) -> String;
}

/// Errors produced by a [Store] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("codec error for {kind:?}: {source}")]
    Codec {
        kind: EntityKind,
        #[source]
        source: serde_json::Error,
    },

    /// Transient; the caller may retry the whole event.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Buffered writes, committed atomically.
#[derive(Debug, Default)]
pub struct WriteBatch {
    writes: Vec<(EntityKind, String, Value)>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer an upsert of `entity`. A later save of the same key wins.
    pub fn save<E: Entity>(&mut self, entity: &E) -> Result<&mut Self, StoreError> {
        let value = serde_json::to_value(entity).map_err(|source| StoreError::Codec {
            kind: E::KIND,
            source,
        })?;
        self.writes.push((E::KIND, entity.id(), value));
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn into_writes(self) -> Vec<(EntityKind, String, Value)> {
        self.writes
    }
}

/// Keyed load/save backing store for the projection.
pub trait Store {
    fn get(&self, kind: EntityKind, id: &str) -> Result<Option<Value>, StoreError>;

    /// Apply every write in `batch`, or none of them.
    fn commit(&mut self, batch: WriteBatch) -> Result<(), StoreError>;
}

/// Load and decode one record.
pub fn load<E: Entity, S: Store + ?Sized>(store: &S, id: &str) -> Result<Option<E>, StoreError> {
    store
        .get(E::KIND, id)?
        .map(|value| {
            serde_json::from_value(value).map_err(|source| StoreError::Codec {
                kind: E::KIND,
                source,
            })
        })
        .transpose()
}

/// In-process store. Not persisted; process restarts start empty.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    records: BTreeMap<(EntityKind, String), Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records of `kind`.
    pub fn count(&self, kind: EntityKind) -> usize {
        self.records.keys().filter(|(k, _)| *k == kind).count()
    }

    /// All records of one type, ordered by id.
    pub fn entities<E: Entity>(&self) -> Result<Vec<E>, StoreError> {
        self.records
            .range((E::KIND, String::new())..)
            .take_while(|((kind, _), _)| *kind == E::KIND)
            .map(|(_, value)| {
                serde_json::from_value(value.clone()).map_err(|source| StoreError::Codec {
                    kind: E::KIND,
                    source,
                })
            })
            .collect()
    }
}

impl Store for MemoryStore {
    fn get(&self, kind: EntityKind, id: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.records.get(&(kind, id.to_string())).cloned())
    }

    fn commit(&mut self, batch: WriteBatch) -> Result<(), StoreError> {
        for (kind, id, value) in batch.into_writes() {
            self.records.insert((kind, id), value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: String,
        body: String,
    }

    impl Entity for Note {
        const KIND: EntityKind = EntityKind::OperatorSocketMap;

        fn id(&self) -> String {
            self.id.clone()
        }
    }

    fn note(id: &str, body: &str) -> Note {
        Note {
            id: id.into(),
            body: body.into(),
        }
    }

    #[test]
    fn dropped_batch_writes_nothing() {
        let store = MemoryStore::new();
        {
            let mut batch = WriteBatch::new();
            batch.save(&note("0x01", "a")).unwrap();
            assert_eq!(batch.len(), 1);
        }
        assert_eq!(store.count(EntityKind::OperatorSocketMap), 0);
    }

    #[test]
    fn later_save_in_batch_wins() {
        let mut store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.save(&note("0x01", "a")).unwrap();
        batch.save(&note("0x01", "b")).unwrap();
        store.commit(batch).unwrap();
        let loaded: Note = load(&store, "0x01").unwrap().unwrap();
        assert_eq!(loaded.body, "b");
        assert_eq!(store.count(EntityKind::OperatorSocketMap), 1);
    }

    #[test]
    fn load_missing_is_none() {
        let store = MemoryStore::new();
        assert!(load::<Note, _>(&store, "0x02").unwrap().is_none());
    }

    #[test]
    fn entities_lists_one_kind_only() {
        let mut store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.save(&note("0x02", "b")).unwrap();
        batch.save(&note("0x01", "a")).unwrap();
        store.commit(batch).unwrap();
        let mut other = WriteBatch::new();
        other.save(&crate::cursor::Cursor::default()).unwrap();
        store.commit(other).unwrap();

        let notes: Vec<Note> = store.entities().unwrap();
        assert_eq!(notes, vec![note("0x01", "a"), note("0x02", "b")]);
    }

    #[test]
    fn wrong_shape_is_codec_error() {
        let mut store = MemoryStore::new();
        store
            .records
            .insert((EntityKind::OperatorSocketMap, "0x01".into()), Value::Bool(true));
        let err = load::<Note, _>(&store, "0x01").unwrap_err();
        assert!(matches!(err, StoreError::Codec { kind: EntityKind::OperatorSocketMap, .. }));
    }
}
