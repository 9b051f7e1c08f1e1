//! Gene creator payouts.

use aminals_store::entity::{GeneAuction, GeneCreatorPayout, GeneNft};
use aminals_store::ids::{auction_key_for, event_key, gene_key};

use super::HandlerContext;
use crate::event::GeneCreatorPaid;
use crate::HandlerError;

/// `GeneCreatorPaid`: record the payout and credit the gene's earnings.
pub fn gene_creator_paid(
    ctx: &mut HandlerContext<'_>,
    e: &GeneCreatorPaid,
) -> Result<(), HandlerError> {
    let auction = auction_key_for(e.auction_id)?;
    ctx.require::<GeneAuction>(&auction)?;
    let gene_id = gene_key(&ctx.deployment.gene_nft, e.gene_id);
    let mut gene = ctx.require::<GeneNft>(&gene_id)?;
    let creator = ctx.user(&e.creator);

    gene.earnings = gene.earnings.saturating_add(e.amount);
    ctx.changes.save(GeneCreatorPayout {
        id: event_key(&ctx.meta.tx_hash, ctx.meta.log_index),
        auction,
        gene: gene_id,
        creator,
        amount: e.amount,
        block_number: ctx.meta.block_number,
        tx_hash: ctx.meta.tx_hash,
    });
    ctx.changes.save(gene);
    Ok(())
}
