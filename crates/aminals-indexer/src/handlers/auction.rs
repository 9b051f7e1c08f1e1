//! Gene auctions: opening, proposals, voting and settlement.
//!
//! An auction decides the genes of a future child of two creatures. Anyone
//! may propose a gene per category; holders then vote with their current
//! voting weight. Each [`GeneProposal`] keeps two running totals,
//! `loveVotes` and `removeVotes`, updated incrementally as votes arrive.
//!
//! # Vote revision
//!
//! A voter's influence on a proposal total reflects only their latest vote
//! of that kind. When a new vote arrives the handler looks up the voter's
//! latest earlier vote of the same kind on the proposal (the "current
//! contribution"), appends the new immutable [`GeneVote`], and moves the
//! total by `new weight - current contribution`. Regular and removal votes
//! are tracked separately.
//!
//! Because vote records are never rewritten, totals can always be
//! recomputed from the log with [`recompute_vote_totals`].
//!
//! # Lifecycle
//!
//! `VotingCreated` opens the auction, `VotingSettled` finishes it, and the
//! child's spawn links it (see [`spawn`](super::spawn)).

use std::collections::BTreeMap;

use aminals_store::changeset::ChangeSet;
use aminals_store::entity::{Aminal, GeneAuction, GeneProposal, GeneVote};
use aminals_store::ids::{
    address_key, auction_key_for, bulk_vote_key, event_key, gene_key, proposal_key,
};
use aminals_store::primitives::{Address, EntityKey};
use serde::{Deserialize, Serialize};

use super::{category, HandlerContext};
use crate::event::{
    BulkVoted, GeneProposed, GeneRemoved, RemoveVoted, Voted, VotingCreated, VotingSettled,
};
use crate::HandlerError;

// ---------------------------------------------------------------------------
// Opening
// ---------------------------------------------------------------------------

/// `VotingCreated`: open an auction between two indexed creatures.
pub fn voting_created(ctx: &mut HandlerContext<'_>, e: &VotingCreated) -> Result<(), HandlerError> {
    let key = auction_key_for(e.auction_id)?;
    if ctx.changes.contains::<GeneAuction>(&key) {
        tracing::warn!(
            auction_id = e.auction_id,
            tx = %ctx.meta.tx_hash,
            "auction already open, ignoring repeated VotingCreated"
        );
        return Ok(());
    }

    let aminal_one = resolve_parent(ctx, e.aminal_one_index)?;
    let aminal_two = resolve_parent(ctx, e.aminal_two_index)?;

    ctx.changes.save(GeneAuction {
        id: key,
        auction_id: e.auction_id,
        aminal_one,
        aminal_two,
        total_love: e.total_love,
        finished: false,
        winner_ids: Vec::new(),
        child: None,
        created_at_block: ctx.meta.block_number,
        created_at_timestamp: ctx.meta.block_timestamp,
        settled_at_block: None,
    });
    Ok(())
}

fn resolve_parent(ctx: &HandlerContext<'_>, index: u64) -> Result<EntityKey, HandlerError> {
    let address = ctx
        .reader
        .resolve_creature_address(index)
        .map_err(|source| HandlerError::CreatureResolution { index, source })?;
    let key = address_key(&address);
    ctx.require::<Aminal>(&key)?;
    Ok(key)
}

// ---------------------------------------------------------------------------
// Proposals
// ---------------------------------------------------------------------------

/// `GeneProposed`: add a gene to one category of an open auction.
pub fn gene_proposed(ctx: &mut HandlerContext<'_>, e: &GeneProposed) -> Result<(), HandlerError> {
    let auction = auction_key_for(e.auction_id)?;
    ctx.require::<GeneAuction>(&auction)?;
    let category = category(e.category)?;
    let key = proposal_key(&auction, e.category, e.gene_id);
    let proposer = ctx.user(&e.proposer);

    if let Some(mut existing) = ctx.changes.get::<GeneProposal>(&key) {
        if existing.auto_created {
            // A bulk vote got here first; keep its totals, credit the real proposer.
            tracing::debug!(proposal = %key, "proposal arrived after bulk-vote repair");
            existing.proposer = proposer;
            ctx.changes.save(existing);
        } else {
            tracing::warn!(proposal = %key, tx = %ctx.meta.tx_hash, "gene already proposed");
        }
        return Ok(());
    }

    ctx.changes.save(GeneProposal {
        id: key,
        gene: gene_key(&ctx.deployment.gene_nft, e.gene_id),
        auction,
        category,
        gene_id: e.gene_id,
        proposer,
        love_votes: 0,
        remove_votes: 0,
        removed: false,
        auto_created: false,
        created_at_block: ctx.meta.block_number,
    });
    Ok(())
}

// ---------------------------------------------------------------------------
// Votes
// ---------------------------------------------------------------------------

/// `Voted`: a regular vote, weighted by the voter's current voting weight.
pub fn voted(ctx: &mut HandlerContext<'_>, e: &Voted) -> Result<(), HandlerError> {
    let auction = auction_key_for(e.auction_id)?;
    ctx.require::<GeneAuction>(&auction)?;
    let key = proposal_key(&auction, e.category, e.gene_id);
    let mut proposal = ctx.require::<GeneProposal>(&key)?;

    let weight = voting_weight(ctx, e.auction_id, &e.voter);
    let vote_id = event_key(&ctx.meta.tx_hash, ctx.meta.log_index);
    cast_vote(ctx, &mut proposal, &e.voter, weight, false, vote_id);
    ctx.changes.save(proposal);
    Ok(())
}

/// `RemoveVoted`: a removal vote carrying its own weight.
pub fn remove_voted(ctx: &mut HandlerContext<'_>, e: &RemoveVoted) -> Result<(), HandlerError> {
    let auction = auction_key_for(e.auction_id)?;
    ctx.require::<GeneAuction>(&auction)?;
    let key = proposal_key(&auction, e.category, e.gene_id);
    let mut proposal = ctx.require::<GeneProposal>(&key)?;

    let vote_id = event_key(&ctx.meta.tx_hash, ctx.meta.log_index);
    cast_vote(ctx, &mut proposal, &e.voter, e.weight, true, vote_id);
    ctx.changes.save(proposal);
    Ok(())
}

/// `BulkVoted`: one regular vote per non-zero category entry.
///
/// A proposal the vote references but nobody proposed is synthesized with
/// the voter as proposer.
pub fn bulk_voted(ctx: &mut HandlerContext<'_>, e: &BulkVoted) -> Result<(), HandlerError> {
    let auction = auction_key_for(e.auction_id)?;
    ctx.require::<GeneAuction>(&auction)?;

    let weight = voting_weight(ctx, e.auction_id, &e.voter);

    for (slot, &gene_id) in e.gene_ids.iter().enumerate() {
        if gene_id == 0 {
            continue;
        }
        let category = slot as u8;
        let key = proposal_key(&auction, u32::from(category), gene_id);
        let mut proposal = match ctx.changes.get::<GeneProposal>(&key) {
            Some(p) => p,
            None => {
                tracing::warn!(
                    auction_id = e.auction_id,
                    category,
                    gene_id,
                    voter = %e.voter,
                    tx = %ctx.meta.tx_hash,
                    "bulk vote references unknown proposal, creating it"
                );
                let proposer = ctx.user(&e.voter);
                GeneProposal {
                    id: key,
                    auction: auction.clone(),
                    category,
                    gene_id,
                    gene: gene_key(&ctx.deployment.gene_nft, gene_id),
                    proposer,
                    love_votes: 0,
                    remove_votes: 0,
                    removed: false,
                    auto_created: true,
                    created_at_block: ctx.meta.block_number,
                }
            }
        };

        let vote_id = bulk_vote_key(&ctx.meta.tx_hash, ctx.meta.log_index, category);
        cast_vote(ctx, &mut proposal, &e.voter, weight, false, vote_id);
        ctx.changes.save(proposal);
    }
    Ok(())
}

fn voting_weight(ctx: &HandlerContext<'_>, auction_id: u64, voter: &Address) -> u128 {
    match ctx.reader.current_voting_weight(auction_id, voter) {
        Ok(weight) => weight,
        Err(e) => {
            tracing::warn!(
                auction_id,
                voter = %voter,
                tx = %ctx.meta.tx_hash,
                error = %e,
                "voting weight unavailable, counting vote with zero weight"
            );
            0
        }
    }
}

/// Record a vote and revise the proposal's running total of its kind.
fn cast_vote(
    ctx: &mut HandlerContext<'_>,
    proposal: &mut GeneProposal,
    voter: &Address,
    weight: u128,
    is_remove_vote: bool,
    vote_id: EntityKey,
) {
    let voter_key = ctx.user(voter);

    if ctx.changes.contains::<GeneVote>(&vote_id) {
        tracing::warn!(vote = %vote_id, "vote already recorded, totals unchanged");
        return;
    }

    let previous = latest_vote(&ctx.changes, &proposal.id, &voter_key, is_remove_vote)
        .map_or(0, |v| v.vote_weight);

    ctx.changes.save(GeneVote {
        id: vote_id,
        auction: proposal.auction.clone(),
        proposal: proposal.id.clone(),
        voter: voter_key,
        is_remove_vote,
        vote_weight: weight,
        block_number: ctx.meta.block_number,
        log_index: ctx.meta.log_index,
        block_timestamp: ctx.meta.block_timestamp,
        tx_hash: ctx.meta.tx_hash,
    });

    let total = if is_remove_vote {
        &mut proposal.remove_votes
    } else {
        &mut proposal.love_votes
    };
    *total = revise_total(*total, previous, weight, &proposal.id);
}

/// The voter's latest vote of one kind on a proposal, staged or committed.
fn latest_vote(
    changes: &ChangeSet<'_>,
    proposal: &EntityKey,
    voter: &EntityKey,
    is_remove_vote: bool,
) -> Option<GeneVote> {
    changes
        .referencing::<GeneVote>("proposal", proposal)
        .into_iter()
        .filter(|v| &v.voter == voter && v.is_remove_vote == is_remove_vote)
        .max_by(|a, b| {
            a.chain_position()
                .cmp(&b.chain_position())
                .then_with(|| a.id.cmp(&b.id))
        })
}

fn revise_total(total: u128, previous: u128, weight: u128, proposal: &EntityKey) -> u128 {
    let base = match total.checked_sub(previous) {
        Some(base) => base,
        None => {
            tracing::warn!(
                proposal = %proposal,
                total,
                previous,
                "running total smaller than the voter's contribution, clamping"
            );
            0
        }
    };
    base.saturating_add(weight)
}

// ---------------------------------------------------------------------------
// Removal and settlement
// ---------------------------------------------------------------------------

/// `GeneRemoved`: mark a proposal removed. Totals are left alone.
pub fn gene_removed(ctx: &mut HandlerContext<'_>, e: &GeneRemoved) -> Result<(), HandlerError> {
    let auction = auction_key_for(e.auction_id)?;
    let key = proposal_key(&auction, e.category, e.gene_id);
    let mut proposal = ctx.require::<GeneProposal>(&key)?;
    proposal.removed = true;
    ctx.changes.save(proposal);
    Ok(())
}

/// `VotingSettled`: finish the auction and record the winners.
pub fn voting_settled(ctx: &mut HandlerContext<'_>, e: &VotingSettled) -> Result<(), HandlerError> {
    let key = auction_key_for(e.auction_id)?;
    let mut auction = ctx.require::<GeneAuction>(&key)?;
    if auction.finished {
        tracing::warn!(
            auction_id = e.auction_id,
            tx = %ctx.meta.tx_hash,
            "auction already settled, ignoring"
        );
        return Ok(());
    }

    auction.finished = true;
    auction.winner_ids = e.winner_ids.to_vec();
    auction.settled_at_block = Some(ctx.meta.block_number);
    ctx.changes.save(auction);
    Ok(())
}

// ---------------------------------------------------------------------------
// Recomputation
// ---------------------------------------------------------------------------

/// Proposal totals derived from the vote log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteTotals {
    pub love_votes: u128,
    pub remove_votes: u128,
}

/// Recompute a proposal's totals from its votes: the sum, per voter and
/// kind, of the weight of that voter's latest vote.
pub fn recompute_vote_totals<'v>(votes: impl IntoIterator<Item = &'v GeneVote>) -> VoteTotals {
    let mut latest: BTreeMap<(&EntityKey, bool), &GeneVote> = BTreeMap::new();
    for vote in votes {
        let slot = latest.entry((&vote.voter, vote.is_remove_vote)).or_insert(vote);
        if (vote.chain_position(), &vote.id) > (slot.chain_position(), &slot.id) {
            *slot = vote;
        }
    }

    let mut totals = VoteTotals::default();
    for ((_, is_remove_vote), vote) in latest {
        let total = if is_remove_vote {
            &mut totals.remove_votes
        } else {
            &mut totals.love_votes
        };
        *total = total.saturating_add(vote.vote_weight);
    }
    totals
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
