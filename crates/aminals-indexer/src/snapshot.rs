//! Indexer-level snapshot and restore with BLAKE3 hashing.
//!
//! An [`IndexerSnapshot`] holds every materialized record, the positions of
//! the events applied so far and the running statistics, plus a BLAKE3
//! digest over all three. Two indexers that applied the same events in the
//! same order produce the same hash.
//!
//! ```
//! use aminals_indexer::prelude::*;
//!
//! let deployment = Deployment {
//!     factory: Address::from_low_u64(0xf1),
//!     auction: Address::from_low_u64(0xa1),
//!     gene_nft: Address::from_low_u64(0xe1),
//! };
//! let mut indexer = Indexer::new(IndexerConfig::new(deployment), StaticChainReader::new());
//!
//! let snapshot = indexer.capture_snapshot().unwrap();
//! assert_eq!(snapshot.hash.len(), 64);
//!
//! indexer.restore_from_snapshot(&snapshot).unwrap();
//! assert_eq!(indexer.state_hash().unwrap(), snapshot.hash);
//! ```
//!
//! The chain reader and the change journal are not part of a snapshot. The
//! journal is cleared on restore.

use std::collections::BTreeMap;

use aminals_store::primitives::TxHash;
use aminals_store::snapshot::StoreSnapshot;
use aminals_store::store::Store;
use serde::{Deserialize, Serialize};

use crate::chain::ChainReader;
use crate::dispatch::{Indexer, IndexerStats};
use crate::SnapshotError;

// ---------------------------------------------------------------------------
// IndexerSnapshot
// ---------------------------------------------------------------------------

/// A serializable snapshot of the indexer's materialized state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerSnapshot {
    pub store: StoreSnapshot,
    /// `(tx hash, log index, block)` of the applied events still tracked for
    /// dedupe, in ascending position order.
    pub processed: Vec<(TxHash, u32, u64)>,
    pub stats: IndexerStats,
    /// BLAKE3 hex digest of the fields above.
    pub hash: String,
}

impl IndexerSnapshot {
    /// Recompute the digest and compare it with the recorded one.
    pub fn verify(&self) -> Result<(), SnapshotError> {
        let recomputed = compute_hash(&self.store, &self.processed, &self.stats)?;
        if recomputed == self.hash {
            Ok(())
        } else {
            Err(SnapshotError::HashMismatch {
                recorded: self.hash.clone(),
                recomputed,
            })
        }
    }
}

fn compute_hash(
    store: &StoreSnapshot,
    processed: &[(TxHash, u32, u64)],
    stats: &IndexerStats,
) -> Result<String, SnapshotError> {
    #[derive(Serialize)]
    struct HashableState<'a> {
        store: &'a StoreSnapshot,
        processed: &'a [(TxHash, u32, u64)],
        stats: &'a IndexerStats,
    }

    let json = serde_json::to_vec(&HashableState {
        store,
        processed,
        stats,
    })?;
    Ok(blake3::hash(&json).to_hex().to_string())
}

fn processed_positions(processed: &BTreeMap<(TxHash, u32), u64>) -> Vec<(TxHash, u32, u64)> {
    processed
        .iter()
        .map(|(&(tx, log_index), &block)| (tx, log_index, block))
        .collect()
}

// ---------------------------------------------------------------------------
// Indexer snapshot/restore methods
// ---------------------------------------------------------------------------

impl<R: ChainReader> Indexer<R> {
    /// Capture the store, applied event positions and statistics.
    pub fn capture_snapshot(&self) -> Result<IndexerSnapshot, SnapshotError> {
        let store = self.store().capture_snapshot();
        let processed = processed_positions(self.processed());
        let stats = self.stats().clone();
        let hash = compute_hash(&store, &processed, &stats)?;
        Ok(IndexerSnapshot {
            store,
            processed,
            stats,
            hash,
        })
    }

    /// BLAKE3 digest of the current state.
    pub fn state_hash(&self) -> Result<String, SnapshotError> {
        let processed = processed_positions(self.processed());
        compute_hash(&self.store().capture_snapshot(), &processed, self.stats())
    }

    /// Replace the indexer's state with a snapshot.
    ///
    /// The hash is verified and the store rebuilt before anything is
    /// replaced, so a rejected snapshot leaves the indexer untouched. The
    /// change journal is cleared.
    ///
    /// # Errors
    ///
    /// [`SnapshotError::HashMismatch`] if the content does not match the
    /// recorded hash, or [`SnapshotError::Store`] if the records are
    /// inconsistent.
    pub fn restore_from_snapshot(&mut self, snapshot: &IndexerSnapshot) -> Result<(), SnapshotError> {
        snapshot.verify()?;
        let store = Store::from_snapshot(&snapshot.store)?;
        let processed: BTreeMap<(TxHash, u32), u64> = snapshot
            .processed
            .iter()
            .map(|&(tx, log_index, block)| ((tx, log_index), block))
            .collect();

        self.replace_state(store, processed, snapshot.stats.clone());
        tracing::info!(
            records = snapshot.store.len(),
            events = snapshot.processed.len(),
            hash = %snapshot.hash,
            "indexer restored from snapshot"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
