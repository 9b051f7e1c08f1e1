//! The event dispatcher.
//!
//! The [`Indexer`] drives materialization forward one event at a time:
//!
//! 1. Duplicate deliveries (same transaction hash and log index as an event
//!    already applied) are skipped when dedupe is enabled. Positions are kept
//!    for every applied event unless
//!    [`IndexerConfig::dedupe_window_blocks`] bounds them, in which case a
//!    redelivery older than the window is applied again.
//! 2. The event is routed: it must come from the contract its type belongs
//!    to.
//! 3. The handler runs against a fresh
//!    [`ChangeSet`](aminals_store::changeset::ChangeSet) over the store.
//! 4. On success the staged writes are committed in one step and recorded in
//!    the change journal. On failure nothing is committed; the event is
//!    logged and dropped.
//!
//! Events are applied strictly in the order they are given.
//!
//! # Example
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
//! // An auction event for an auction that was never opened is dropped.
//! let event = ChainEvent {
//!     meta: EventMeta {
//!         contract: deployment.auction,
//!         tx_hash: TxHash::from_low_u64(1),
//!         log_index: 0,
//!         block_number: 1,
//!         block_timestamp: 0,
//!     },
//!     payload: EventPayload::VotingSettled(VotingSettled { auction_id: 1, winner_ids: [0; 8] }),
//! };
//! assert!(matches!(indexer.process(&event), EventOutcome::Dropped(_)));
//! assert_eq!(indexer.stats().events_dropped, 1);
//! assert!(indexer.store().is_empty());
//! ```

use std::collections::BTreeMap;

use aminals_journal::journal::ChangeJournal;
use aminals_store::entity::{Aminal, GeneProposal, GeneVote};
use aminals_store::ids::address_key;
use aminals_store::primitives::{EntityKey, TxHash};
use aminals_store::store::Store;
use serde::{Deserialize, Serialize};

use crate::chain::{ChainReader, TimeoutChainReader};
use crate::config::IndexerConfig;
use crate::event::{ChainEvent, EventSource};
use crate::handlers::auction::{recompute_vote_totals, VoteTotals};
use crate::handlers::{self, HandlerContext};
use crate::HandlerError;

// ---------------------------------------------------------------------------
// EventOutcome
// ---------------------------------------------------------------------------

/// What happened to one event.
#[derive(Debug, Clone)]
pub enum EventOutcome {
    /// The handler succeeded; `writes` records were committed.
    Applied { writes: usize },
    /// The event was already applied and was skipped.
    Duplicate,
    /// The event could not be applied and was dropped.
    Dropped(HandlerError),
}

impl EventOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, EventOutcome::Applied { .. })
    }
}

// ---------------------------------------------------------------------------
// IndexerStats
// ---------------------------------------------------------------------------

/// Running counters over every processed event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexerStats {
    pub events_applied: u64,
    /// Events whose handler failed. Includes unroutable events.
    pub events_dropped: u64,
    pub events_duplicate: u64,
    /// Events from a contract they may not come from.
    pub events_unroutable: u64,
    pub writes_committed: u64,
    /// Block of the last applied event.
    pub last_block: Option<u64>,
}

impl IndexerStats {
    /// Total events seen.
    pub fn events_seen(&self) -> u64 {
        self.events_applied + self.events_dropped + self.events_duplicate
    }
}

// ---------------------------------------------------------------------------
// Indexer
// ---------------------------------------------------------------------------

/// Applies chain events to the store, one atomic change set per event.
pub struct Indexer<R> {
    store: Store,
    reader: R,
    config: IndexerConfig,
    journal: Option<ChangeJournal>,
    /// `(tx hash, log index)` of applied events, with their block number.
    processed: BTreeMap<(TxHash, u32), u64>,
    stats: IndexerStats,
}

impl<R: ChainReader> Indexer<R> {
    /// Create an indexer over an empty store.
    pub fn new(config: IndexerConfig, reader: R) -> Self {
        let journal =
            (config.journal_capacity > 0).then(|| ChangeJournal::bounded(config.journal_capacity));
        Self {
            store: Store::new(),
            reader,
            config,
            journal,
            processed: BTreeMap::new(),
            stats: IndexerStats::default(),
        }
    }

    /// Apply one event.
    pub fn process(&mut self, event: &ChainEvent) -> EventOutcome {
        let meta = &event.meta;
        let position = (meta.tx_hash, meta.log_index);

        if self.config.dedupe_events && self.processed.contains_key(&position) {
            tracing::debug!(
                event = event.payload.name(),
                tx = %meta.tx_hash,
                log_index = meta.log_index,
                "duplicate event skipped"
            );
            self.stats.events_duplicate += 1;
            return EventOutcome::Duplicate;
        }

        if let Err(e) = self.route(event) {
            tracing::error!(
                event = event.payload.name(),
                tx = %meta.tx_hash,
                log_index = meta.log_index,
                error = %e,
                "unroutable event dropped"
            );
            self.stats.events_unroutable += 1;
            self.stats.events_dropped += 1;
            return EventOutcome::Dropped(e);
        }

        let staged = {
            let mut ctx = HandlerContext::new(
                &self.store,
                &self.reader,
                &self.config.deployment,
                meta,
            );
            handlers::handle(&mut ctx, &event.payload).map(|()| ctx.into_writes())
        };

        let writes = match staged {
            Ok(writes) => writes,
            Err(e) => {
                tracing::error!(
                    event = event.payload.name(),
                    tx = %meta.tx_hash,
                    log_index = meta.log_index,
                    block = meta.block_number,
                    error = %e,
                    "event dropped"
                );
                self.stats.events_dropped += 1;
                return EventOutcome::Dropped(e);
            }
        };

        let committed = self.store.commit(writes);
        if let Some(journal) = &mut self.journal {
            journal.record_writes(&committed, event.payload.handler(), meta.event_ref());
        }
        self.processed.insert(position, meta.block_number);
        self.prune_processed(meta.block_number);

        self.stats.events_applied += 1;
        self.stats.writes_committed += committed.len() as u64;
        self.stats.last_block = Some(meta.block_number);

        tracing::debug!(
            event = event.payload.name(),
            tx = %meta.tx_hash,
            log_index = meta.log_index,
            writes = committed.len(),
            "event applied"
        );
        EventOutcome::Applied {
            writes: committed.len(),
        }
    }

    /// Apply events in order. Returns the statistics after the batch.
    pub fn process_all<'e>(&mut self, events: impl IntoIterator<Item = &'e ChainEvent>) -> &IndexerStats {
        let before = self.stats.clone();
        for event in events {
            self.process(event);
        }
        tracing::info!(
            applied = self.stats.events_applied - before.events_applied,
            dropped = self.stats.events_dropped - before.events_dropped,
            duplicate = self.stats.events_duplicate - before.events_duplicate,
            last_block = ?self.stats.last_block,
            "batch processed"
        );
        &self.stats
    }

    /// Forget positions that fell out of the dedupe window.
    fn prune_processed(&mut self, block: u64) {
        let window = self.config.dedupe_window_blocks;
        if window == 0 || self.stats.last_block.is_some_and(|last| last >= block) {
            return;
        }
        let cutoff = block.saturating_sub(window);
        let before = self.processed.len();
        self.processed.retain(|_, applied_at| *applied_at >= cutoff);
        let pruned = before - self.processed.len();
        if pruned > 0 {
            tracing::debug!(pruned, cutoff, "dedupe positions pruned");
        }
    }

    /// Check the emitting contract against the event's source.
    fn route(&self, event: &ChainEvent) -> Result<(), HandlerError> {
        let contract = event.meta.contract;
        let deployment = &self.config.deployment;
        let expected = match event.payload.source() {
            EventSource::Factory => deployment.factory,
            EventSource::Auction => deployment.auction,
            EventSource::GeneNft => deployment.gene_nft,
            EventSource::Aminal => {
                if self.store.contains::<Aminal>(&address_key(&contract)) {
                    return Ok(());
                }
                return Err(HandlerError::UnroutableSource {
                    contract,
                    details: format!("{} from a contract that is not an indexed aminal", event.payload.name()),
                });
            }
        };
        if contract == expected {
            Ok(())
        } else {
            Err(HandlerError::UnroutableSource {
                contract,
                details: format!("{} must come from {expected}", event.payload.name()),
            })
        }
    }

    // -- accessors ----------------------------------------------------------

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn stats(&self) -> &IndexerStats {
        &self.stats
    }

    /// The change journal, if enabled.
    pub fn journal(&self) -> Option<&ChangeJournal> {
        self.journal.as_ref()
    }

    /// Whether the event at this position has been applied.
    pub fn is_processed(&self, tx_hash: &TxHash, log_index: u32) -> bool {
        self.processed.contains_key(&(*tx_hash, log_index))
    }

    /// Swap in a different chain reader. Used by replay to answer each event
    /// from the reads recorded for it.
    pub(crate) fn reader_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Consume the indexer, returning its chain reader.
    pub fn into_reader(self) -> R {
        self.reader
    }

    /// Totals of a proposal recomputed from its vote log.
    ///
    /// Returns `None` if the proposal does not exist.
    pub fn recompute_vote_totals(&self, proposal: &EntityKey) -> Option<VoteTotals> {
        self.store.get::<GeneProposal>(proposal)?;
        Some(recompute_vote_totals(
            self.store.referencing::<GeneVote>("proposal", proposal),
        ))
    }

    // -- crate-internal state access used by snapshot restore ---------------

    pub(crate) fn processed(&self) -> &BTreeMap<(TxHash, u32), u64> {
        &self.processed
    }

    pub(crate) fn replace_state(
        &mut self,
        store: Store,
        processed: BTreeMap<(TxHash, u32), u64>,
        stats: IndexerStats,
    ) {
        self.store = store;
        self.processed = processed;
        self.stats = stats;
        if let Some(journal) = &mut self.journal {
            journal.clear();
        }
    }
}

impl<R: ChainReader + Send + Sync + 'static> Indexer<TimeoutChainReader<R>> {
    /// Create an indexer whose chain reads are bounded by
    /// [`IndexerConfig::chain_read_timeout`].
    pub fn with_read_timeout(config: IndexerConfig, reader: R) -> Self {
        let timeout = config.chain_read_timeout();
        tracing::debug!(timeout_ms = config.chain_read_timeout_ms, "chain reads bounded");
        Self::new(config, TimeoutChainReader::new(reader, timeout))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
