//! Change journal for tracking every entity write with its causing event.
//!
//! The [`ChangeJournal`] records every record written to the store. Each entry
//! ([`EntityChange`]) captures the entity kind and key, the JSON image before
//! and after the write, which handler made it, and the chain event that
//! triggered it.
//!
//! The journal is populated by the indexer after each event's change set is
//! committed, via [`ChangeJournal::record_writes`]. A bounded journal keeps
//! only the most recent entries.
//!
//! # Query API
//!
//! - **Entity**: [`ChangeJournal::history`]
//! - **Entity type**: [`ChangeJournal::changes_for_kind`]
//! - **Handler**: [`ChangeJournal::changes_by_handler`]
//! - **Event**: [`ChangeJournal::changes_for_event`]
//! - **Block range**: [`ChangeJournal::changes_in_blocks`]
//!
//! # Example
//!
//! ```
//! use aminals_journal::journal::{ChangeJournal, EventRef, HandlerId};
//! use aminals_store::prelude::*;
//!
//! let mut store = Store::new();
//! let mut journal = ChangeJournal::new();
//!
//! let user = User::new(Address::from_low_u64(1), 7);
//! let writes = store.commit(vec![user.into_record()]);
//! let event = EventRef { tx_hash: TxHash::from_low_u64(1), log_index: 0, block_number: 7 };
//! journal.record_writes(&writes, HandlerId::Activity, event);
//!
//! assert_eq!(journal.len(), 1);
//! assert_eq!(journal.changes_for_kind(EntityKind::User).count(), 1);
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::ops::RangeInclusive;

use aminals_store::entity::EntityKind;
use aminals_store::primitives::{EntityKey, TxHash};
use aminals_store::store::CommittedWrite;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// HandlerId
// ---------------------------------------------------------------------------

/// Which event handler produced a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerId {
    /// Creature spawns and lineage links.
    Spawn,
    /// Global skill registration.
    SkillRegistry,
    /// Feeding, squeaks, skill use, energy loss.
    Activity,
    /// Breeding consent.
    Breeding,
    /// Auction opening and proposals.
    Auction,
    /// Regular, removal and bulk votes.
    Vote,
    /// Settlement and gene removal.
    Settlement,
    /// Gene creator payouts.
    Payout,
    /// Gene NFT mint and transfer.
    GeneNft,
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandlerId::Spawn => "spawn",
            HandlerId::SkillRegistry => "skill_registry",
            HandlerId::Activity => "activity",
            HandlerId::Breeding => "breeding",
            HandlerId::Auction => "auction",
            HandlerId::Vote => "vote",
            HandlerId::Settlement => "settlement",
            HandlerId::Payout => "payout",
            HandlerId::GeneNft => "gene_nft",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// EventRef
// ---------------------------------------------------------------------------

/// Position of the chain event that caused a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventRef {
    pub tx_hash: TxHash,
    pub log_index: u32,
    pub block_number: u64,
}

// ---------------------------------------------------------------------------
// EntityChange
// ---------------------------------------------------------------------------

/// A single recorded entity write.
///
/// # Value semantics
///
/// - **Create**: `old_value` is `None`.
/// - **Update**: `old_value` is `Some(...)` and differs from `new_value`.
///
/// Entities are never deleted, so `new_value` is always present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityChange {
    /// Monotonic position of this change across the journal's lifetime.
    pub sequence: u64,
    pub kind: EntityKind,
    pub key: EntityKey,
    pub old_value: Option<serde_json::Value>,
    pub new_value: serde_json::Value,
    pub handler: HandlerId,
    pub event: EventRef,
}

impl EntityChange {
    /// Whether this change created the entity.
    pub fn is_create(&self) -> bool {
        self.old_value.is_none()
    }
}

// ---------------------------------------------------------------------------
// ChangeJournal
// ---------------------------------------------------------------------------

/// Accumulates [`EntityChange`] entries and answers queries over them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeJournal {
    changes: VecDeque<EntityChange>,
    /// Maximum retained entries; `None` keeps everything.
    capacity: Option<usize>,
    next_sequence: u64,
    evicted: u64,
}

impl ChangeJournal {
    /// Create an unbounded journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a journal that retains only the latest `capacity` entries.
    pub fn bounded(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    /// Record one committed write.
    pub fn record(&mut self, write: &CommittedWrite, handler: HandlerId, event: EventRef) {
        let change = EntityChange {
            sequence: self.next_sequence,
            kind: write.kind,
            key: write.key.clone(),
            old_value: write.old.as_ref().map(|r| r.to_json()),
            new_value: write.new.to_json(),
            handler,
            event,
        };
        self.next_sequence += 1;
        self.changes.push_back(change);

        if let Some(capacity) = self.capacity {
            while self.changes.len() > capacity {
                self.changes.pop_front();
                self.evicted += 1;
            }
        }
    }

    /// Record every write of one committed change set.
    pub fn record_writes(&mut self, writes: &[CommittedWrite], handler: HandlerId, event: EventRef) {
        for write in writes {
            self.record(write, handler, event);
        }
    }

    /// Drop all entries. Sequence numbers keep increasing.
    pub fn clear(&mut self) {
        self.evicted += self.changes.len() as u64;
        self.changes.clear();
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Whether no entries are retained.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Number of entries dropped because of the capacity bound or `clear`.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// All retained entries, oldest first.
    pub fn all_changes(&self) -> impl Iterator<Item = &EntityChange> {
        self.changes.iter()
    }

    /// Retained writes to one entity, oldest first.
    pub fn history<'a>(
        &'a self,
        kind: EntityKind,
        key: &'a EntityKey,
    ) -> impl Iterator<Item = &'a EntityChange> {
        self.changes
            .iter()
            .filter(move |c| c.kind == kind && &c.key == key)
    }

    /// Retained writes to entities of one kind.
    pub fn changes_for_kind(&self, kind: EntityKind) -> impl Iterator<Item = &EntityChange> {
        self.changes.iter().filter(move |c| c.kind == kind)
    }

    /// Retained writes made by one handler.
    pub fn changes_by_handler(&self, handler: HandlerId) -> impl Iterator<Item = &EntityChange> {
        self.changes.iter().filter(move |c| c.handler == handler)
    }

    /// Retained writes caused by one log entry.
    pub fn changes_for_event<'a>(
        &'a self,
        tx_hash: &'a TxHash,
        log_index: u32,
    ) -> impl Iterator<Item = &'a EntityChange> {
        self.changes
            .iter()
            .filter(move |c| &c.event.tx_hash == tx_hash && c.event.log_index == log_index)
    }

    /// Retained writes caused by events in the given block range.
    pub fn changes_in_blocks(
        &self,
        blocks: RangeInclusive<u64>,
    ) -> impl Iterator<Item = &EntityChange> {
        self.changes
            .iter()
            .filter(move |c| blocks.contains(&c.event.block_number))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
