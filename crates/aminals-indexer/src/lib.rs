//! Aminals Indexer -- materializes game state from contract events.
//!
//! The indexer consumes an ordered stream of decoded log entries
//! ([`ChainEvent`](event::ChainEvent)) from the game's contracts and keeps a
//! queryable [`Store`](aminals_store::store::Store) of creatures, auctions,
//! proposals, votes, gene tokens and activity records up to date.
//!
//! Each event is handled in isolation: the handler stages its writes in a
//! [`ChangeSet`](aminals_store::changeset::ChangeSet) and the
//! [`Indexer`](dispatch::Indexer) commits them only if the handler succeeds.
//! A failing event is logged and dropped; the stream continues.
//!
//! # Quick Start
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
//! let event = ChainEvent {
//!     meta: EventMeta {
//!         contract: deployment.factory,
//!         tx_hash: TxHash::from_low_u64(1),
//!         log_index: 0,
//!         block_number: 100,
//!         block_timestamp: 1_700_000_000,
//!     },
//!     payload: EventPayload::AminalSpawned(AminalSpawned {
//!         aminal_id: 1,
//!         aminal: Address::from_low_u64(0x1000),
//!         mom: Address::ZERO,
//!         dad: Address::ZERO,
//!         auction_id: 0,
//!         gene_ids: [1, 2, 3, 4, 5, 6, 7, 8],
//!     }),
//! };
//!
//! assert!(indexer.process(&event).is_applied());
//! let aminal: &Aminal = indexer.store().get(&address_key(&Address::from_low_u64(0x1000))).unwrap();
//! assert_eq!(aminal.index, 1);
//! assert!(aminal.mom.is_none());
//! ```
//!
//! # Modules
//!
//! - [`event`]: Typed events and their routing.
//! - [`feed`]: Newline-delimited JSON event input.
//! - [`chain`]: Contract read calls, with static, recording and timeout
//!   implementations.
//! - [`handlers`]: Per-event materialization logic.
//! - [`dispatch`]: The [`Indexer`](dispatch::Indexer): routing, atomic commit,
//!   dedupe, journal and statistics.
//! - [`snapshot`]: Hashed indexer snapshots.
//! - [`replay`]: Recording and verifying event replays.
//! - [`config`], [`telemetry`]: Configuration and logging setup.

#![deny(unsafe_code)]

pub mod chain;
pub mod config;
pub mod dispatch;
pub mod event;
pub mod feed;
pub mod handlers;
pub mod replay;
pub mod snapshot;
pub mod telemetry;

use std::path::PathBuf;

use aminals_store::entity::EntityKind;
use aminals_store::primitives::{Address, EntityKey};
use aminals_store::{IdError, StoreError};

use crate::chain::ChainReadError;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Why an event could not be applied. The event is dropped.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HandlerError {
    /// The emitting contract is not one the event may come from.
    #[error("event from {contract} cannot be routed: {details}")]
    UnroutableSource { contract: Address, details: String },

    /// An entity the event depends on has not been indexed.
    #[error("{kind} {key} is not indexed")]
    MissingEntity { kind: EntityKind, key: EntityKey },

    /// A creature index could not be resolved to an address.
    #[error("creature index {index} could not be resolved")]
    CreatureResolution {
        index: u64,
        #[source]
        source: ChainReadError,
    },

    /// A gene category outside the creature's trait slots.
    #[error("gene category {category} is out of range")]
    InvalidCategory { category: u32 },

    /// A spawn for a creature that already exists.
    #[error("aminal {address} is already indexed")]
    DuplicateSpawn { address: Address },

    /// A transfer of a gene token that was never minted.
    #[error("transfer of unknown gene token {token_id} from {from}")]
    UnknownGeneTransfer { token_id: u32, from: Address },

    #[error(transparent)]
    Id(#[from] IdError),
}

/// Errors loading the indexer configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {details}")]
    Invalid { details: String },
}

/// Errors restoring an indexer snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// The snapshot's content does not match its recorded hash.
    #[error("snapshot hash mismatch: recorded {recorded} but recomputed {recomputed}")]
    HashMismatch { recorded: String, recomputed: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to serialize indexer state: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors that prevent a replay from running.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("replay log contains duplicate checkpoint at event {sequence}")]
    DuplicateCheckpoint { sequence: u64 },

    #[error("replay log has event {sequence} where event {expected} was expected")]
    EventOutOfOrder { sequence: u64, expected: u64 },

    #[error("replay log checkpoint at event {sequence} is past the last event ({total})")]
    CheckpointOutOfRange { sequence: u64, total: u64 },

    #[error("failed to restore initial snapshot: {0}")]
    Snapshot(#[from] SnapshotError),
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::chain::{
        ChainReadError, ChainReader, RecordingChainReader, StaticChainReader, TimeoutChainReader,
    };
    pub use crate::config::{Deployment, IndexerConfig};
    pub use crate::dispatch::{EventOutcome, Indexer, IndexerStats};
    pub use crate::event::{
        AminalSpawned, BreedingConsented, BulkVoted, ChainEvent, EnergyLost, EventMeta,
        EventPayload, EventSource, Fed, GeneCreatorPaid, GeneMinted, GeneProposed, GeneRemoved,
        RemoveVoted, SkillAdded, SkillUsedEvent, Squeaked, Transfer, Voted, VotingCreated,
        VotingSettled,
    };
    pub use crate::handlers::auction::{recompute_vote_totals, VoteTotals};
    pub use crate::replay::{replay, ReplayLog, ReplayRecorder, ReplayResult};
    pub use crate::snapshot::IndexerSnapshot;
    pub use crate::{ConfigError, HandlerError, ReplayError, SnapshotError};
    pub use aminals_journal::journal::{ChangeJournal, HandlerId};
    pub use aminals_store::prelude::*;
}
