//! Store snapshot and restore support.
//!
//! Provides [`StoreSnapshot`] -- a fully serializable copy of every record in
//! the store. The reverse reference index is not serialized; it is rebuilt on
//! restore from the records' own references.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::entity::{EntityKind, EntityRecord};
use crate::primitives::EntityKey;
use crate::store::Store;
use crate::StoreError;

/// A complete, serializable snapshot of the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// Every record, ordered by kind then key for deterministic output.
    pub records: Vec<EntityRecord>,
}

impl StoreSnapshot {
    /// Number of records in the snapshot.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the snapshot holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Store {
    /// Capture every record.
    pub fn capture_snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            records: self.records().cloned().collect(),
        }
    }

    /// Replace the store's contents with a snapshot.
    ///
    /// The snapshot is validated before anything is cleared, so a rejected
    /// snapshot leaves the store untouched.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::SnapshotRejected`] if the snapshot holds two
    /// records with the same kind and key.
    pub fn restore_from_snapshot(&mut self, snapshot: &StoreSnapshot) -> Result<(), StoreError> {
        let mut seen: HashSet<(EntityKind, &EntityKey)> = HashSet::new();
        for record in &snapshot.records {
            if !seen.insert((record.kind(), record.key())) {
                return Err(StoreError::SnapshotRejected {
                    details: format!("duplicate {} record {}", record.kind(), record.key()),
                });
            }
        }

        self.clear();
        for record in &snapshot.records {
            self.put(record.clone());
        }
        tracing::debug!(records = snapshot.len(), "store restored from snapshot");
        Ok(())
    }

    /// Build a new store from a snapshot.
    ///
    /// # Errors
    ///
    /// See [`restore_from_snapshot`](Self::restore_from_snapshot).
    pub fn from_snapshot(snapshot: &StoreSnapshot) -> Result<Self, StoreError> {
        let mut store = Store::new();
        store.restore_from_snapshot(snapshot)?;
        Ok(store)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
