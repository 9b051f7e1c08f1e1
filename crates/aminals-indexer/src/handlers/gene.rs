//! Gene token mints and transfers.

use aminals_store::entity::GeneNft;
use aminals_store::ids::gene_key;

use super::{category, HandlerContext};
use crate::event::{GeneMinted, Transfer};
use crate::HandlerError;

/// `GeneMinted`: a new gene token, owned by its creator.
pub fn gene_minted(ctx: &mut HandlerContext<'_>, e: &GeneMinted) -> Result<(), HandlerError> {
    let category = category(e.category)?;
    let key = gene_key(&ctx.deployment.gene_nft, e.token_id);
    if ctx.changes.contains::<GeneNft>(&key) {
        tracing::warn!(token_id = e.token_id, tx = %ctx.meta.tx_hash, "gene already minted");
        return Ok(());
    }
    let creator = ctx.user(&e.creator);
    ctx.changes.save(GeneNft {
        id: key,
        contract: ctx.deployment.gene_nft,
        token_id: e.token_id,
        category,
        owner: creator.clone(),
        creator,
        content: e.content.clone(),
        earnings: 0,
        minted_at_block: ctx.meta.block_number,
    });
    Ok(())
}

/// `Transfer`: move a gene token to a new owner.
///
/// The token contract emits the mint transfer before `GeneMinted`, so a
/// transfer of an unknown token from the zero address is expected and
/// ignored.
pub fn transfer(ctx: &mut HandlerContext<'_>, e: &Transfer) -> Result<(), HandlerError> {
    let key = gene_key(&ctx.deployment.gene_nft, e.token_id);
    let Some(mut gene) = ctx.changes.get::<GeneNft>(&key) else {
        if e.from.is_zero() {
            tracing::debug!(token_id = e.token_id, "mint transfer ahead of GeneMinted");
            return Ok(());
        }
        return Err(HandlerError::UnknownGeneTransfer {
            token_id: e.token_id,
            from: e.from,
        });
    };
    gene.owner = ctx.user(&e.to);
    ctx.changes.save(gene);
    Ok(())
}
