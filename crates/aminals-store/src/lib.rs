//! Aminals Store -- typed entity store for the materialized game state.
//!
//! This crate holds everything the indexer materializes from chain events:
//! creatures, auctions, proposals, votes, gene tokens and activity records.
//! Entities are keyed by deterministic byte keys derived in [`ids`], stored per
//! [`EntityKind`](entity::EntityKind), and cross-linked by key. A reverse
//! reference index answers traversals such as "all votes on a proposal".
//!
//! Mutations are staged in a [`ChangeSet`](changeset::ChangeSet) that reads
//! through to the committed [`Store`](store::Store) and is committed in one
//! step, so a handler that fails half-way leaves nothing behind.
//!
//! # Quick Start
//!
//! ```
//! use aminals_store::prelude::*;
//!
//! let mut store = Store::new();
//! let voter = Address::from_low_u64(7);
//!
//! let mut changes = ChangeSet::new(&store);
//! changes.save(User::new(voter, 100));
//! let writes = changes.into_writes();
//! store.commit(writes);
//!
//! let user: &User = store.get(&address_key(&voter)).unwrap();
//! assert_eq!(user.created_at_block, 100);
//! ```

#![deny(unsafe_code)]

pub mod changeset;
pub mod entity;
pub mod ids;
pub mod primitives;
pub mod query;
pub mod snapshot;
pub mod store;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced while parsing or deriving identifiers.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IdError {
    /// The input is not valid hex.
    #[error("'{input}' is not valid hex: {details}")]
    InvalidHex { input: String, details: String },

    /// The input decoded to the wrong number of bytes.
    #[error("'{input}' decodes to {actual} bytes, expected {expected}")]
    InvalidLength {
        input: String,
        expected: usize,
        actual: usize,
    },

    /// An auction id does not fit the auction key encoding.
    #[error("auction id {auction_id} exceeds the largest encodable auction number {max}")]
    AuctionOutOfRange { auction_id: u64, max: u64 },
}

/// Errors produced by store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A query or lookup named an entity type that does not exist.
    #[error("unknown entity type '{name}'")]
    UnknownEntityKind { name: String },

    /// A query was rejected before execution.
    #[error("invalid query: {details}")]
    InvalidQuery { details: String },

    /// A snapshot could not be restored.
    #[error("snapshot rejected: {details}")]
    SnapshotRejected { details: String },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::changeset::ChangeSet;
    pub use crate::entity::{
        Aminal, BreedingConsent, Entity, EntityKind, EntityRecord, Factory, FeedEvent,
        GeneAuction, GeneCreatorPayout, GeneNft, GeneProposal, GeneVote, GlobalSkill,
        Relationship, SkillUsed, Squeak, User,
    };
    pub use crate::ids::{
        address_key, auction_key, auction_key_for, bulk_vote_key, contract_event_key,
        decode_auction_key, event_key, gene_key, proposal_key, relationship_key,
        GENE_CATEGORIES,
    };
    pub use crate::primitives::{Address, EntityKey, TxHash};
    pub use crate::query::{OrderDirection, Predicate, Query};
    pub use crate::snapshot::StoreSnapshot;
    pub use crate::store::{CommittedWrite, Store};
    pub use crate::{IdError, StoreError};
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::prelude::*;

    fn proposal(auction: u8, category: u32, gene_id: u32, proposer: &Address) -> GeneProposal {
        let auction = auction_key(auction);
        GeneProposal {
            id: proposal_key(&auction, category, gene_id),
            gene: gene_key(&Address::from_low_u64(0xfeed), gene_id),
            auction,
            category: category as u8,
            gene_id,
            proposer: address_key(proposer),
            love_votes: 0,
            remove_votes: 0,
            removed: false,
            auto_created: false,
            created_at_block: 1,
        }
    }

    fn vote(n: u32, proposal: &GeneProposal, voter: &Address, weight: u128) -> GeneVote {
        let tx = TxHash::from_low_u64(u64::from(n));
        GeneVote {
            id: event_key(&tx, n),
            auction: proposal.auction.clone(),
            proposal: proposal.id.clone(),
            voter: address_key(voter),
            is_remove_vote: false,
            vote_weight: weight,
            block_number: u64::from(n),
            log_index: 0,
            block_timestamp: 0,
            tx_hash: tx,
        }
    }

    #[test]
    fn staged_writes_are_invisible_until_commit() {
        let mut store = Store::new();
        let voter = Address::from_low_u64(1);

        let mut changes = ChangeSet::new(&store);
        changes.save(User::new(voter, 5));
        assert!(changes.contains::<User>(&address_key(&voter)));
        assert!(!store.contains::<User>(&address_key(&voter)));

        let writes = changes.into_writes();
        store.commit(writes);
        assert!(store.contains::<User>(&address_key(&voter)));
    }

    #[test]
    fn dropped_changeset_commits_nothing() {
        let store = Store::new();
        {
            let mut changes = ChangeSet::new(&store);
            changes.save(User::new(Address::from_low_u64(1), 5));
        }
        assert!(store.is_empty());
    }

    #[test]
    fn reverse_traversal_sees_committed_and_staged_votes() {
        let mut store = Store::new();
        let alice = Address::from_low_u64(1);
        let bob = Address::from_low_u64(2);
        let p = proposal(1, 0, 7, &alice);

        let mut changes = ChangeSet::new(&store);
        changes.save(p.clone());
        changes.save(vote(1, &p, &alice, 10));
        let writes = changes.into_writes();
        store.commit(writes);

        let mut changes = ChangeSet::new(&store);
        changes.save(vote(2, &p, &bob, 20));
        let votes: Vec<GeneVote> = changes.referencing("proposal", &p.id);
        assert_eq!(votes.len(), 2);

        // The committed store still only knows the first vote.
        assert_eq!(store.referencing::<GeneVote>("proposal", &p.id).len(), 1);
    }

    #[test]
    fn overwriting_a_reference_moves_it_in_the_index() {
        let mut store = Store::new();
        let alice = Address::from_low_u64(1);
        let p1 = proposal(1, 0, 7, &alice);
        let p2 = proposal(1, 0, 8, &alice);
        let mut v = vote(1, &p1, &alice, 10);

        store.commit(vec![
            p1.clone().into_record(),
            p2.clone().into_record(),
            v.clone().into_record(),
        ]);
        v.proposal = p2.id.clone();
        store.commit(vec![v.into_record()]);

        assert!(store.referencing::<GeneVote>("proposal", &p1.id).is_empty());
        assert_eq!(store.referencing::<GeneVote>("proposal", &p2.id).len(), 1);
    }

    #[test]
    fn query_filters_by_relationship_and_sorts() {
        let mut store = Store::new();
        let alice = Address::from_low_u64(1);
        let bob = Address::from_low_u64(2);
        let p = proposal(1, 0, 7, &alice);
        store.commit(vec![
            p.clone().into_record(),
            vote(1, &p, &alice, 10).into_record(),
            vote(2, &p, &bob, 30).into_record(),
            vote(3, &p, &alice, 20).into_record(),
        ]);

        let query = Query::new(EntityKind::GeneVote)
            .referencing("proposal", p.id.clone())
            .where_eq("voter", serde_json::json!(address_key(&alice).to_hex()))
            .order_by("voteWeight", OrderDirection::Desc);
        let rows = store.query(&query).unwrap();
        let weights: Vec<&str> = rows
            .iter()
            .map(|r| r["voteWeight"].as_str().unwrap())
            .collect();
        assert_eq!(weights, vec!["20", "10"]);
    }

    #[test]
    fn snapshot_restores_reverse_index() {
        let mut store = Store::new();
        let alice = Address::from_low_u64(1);
        let p = proposal(1, 0, 7, &alice);
        store.commit(vec![p.clone().into_record(), vote(1, &p, &alice, 10).into_record()]);

        let snapshot = store.capture_snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        let snapshot: StoreSnapshot = serde_json::from_str(&json).unwrap();

        let mut restored = Store::new();
        restored.restore_from_snapshot(&snapshot).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.referencing::<GeneVote>("proposal", &p.id).len(), 1);
    }
}
