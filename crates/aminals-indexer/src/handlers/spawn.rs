//! Creature spawns, lineage links and skill registration.

use aminals_store::entity::{Aminal, Factory, GeneAuction, GlobalSkill};
use aminals_store::ids::{address_key, auction_key_for, gene_key};
use aminals_store::primitives::{Address, EntityKey};

use super::HandlerContext;
use crate::event::{AminalSpawned, SkillAdded};
use crate::HandlerError;

/// `AminalSpawned`: create the creature and bump the factory counter.
///
/// A spawn that carries an auction id also back-fills that auction's
/// `child`, provided the auction exists and has settled.
pub fn aminal_spawned(ctx: &mut HandlerContext<'_>, e: &AminalSpawned) -> Result<(), HandlerError> {
    let key = address_key(&e.aminal);
    if ctx.changes.contains::<Aminal>(&key) {
        return Err(HandlerError::DuplicateSpawn { address: e.aminal });
    }

    let mut factory = load_factory(ctx);
    let factory_key = factory.id.clone();

    let mom = parent(ctx, &e.mom)?;
    let dad = parent(ctx, &e.dad)?;
    let genes = e
        .gene_ids
        .iter()
        .map(|&id| (id != 0).then(|| gene_key(&ctx.deployment.gene_nft, id)))
        .collect();

    let rendered = match ctx.reader.fetch_rendered_asset(&e.aminal) {
        Ok(asset) => Some(asset),
        Err(err) => {
            tracing::warn!(
                aminal = %e.aminal,
                tx = %ctx.meta.tx_hash,
                error = %err,
                "rendered asset unavailable"
            );
            None
        }
    };

    let auction = link_lineage(ctx, e.auction_id, &key);

    factory.aminal_count += 1;
    ctx.changes.save(factory);

    ctx.changes.save(Aminal {
        id: key,
        address: e.aminal,
        index: e.aminal_id,
        factory: factory_key,
        mom,
        dad,
        genes,
        energy: 0,
        total_love: 0,
        rendered,
        breeding_with: None,
        auction,
        created_at_block: ctx.meta.block_number,
        created_at_timestamp: ctx.meta.block_timestamp,
        tx_hash: ctx.meta.tx_hash,
    });
    Ok(())
}

fn load_factory(ctx: &HandlerContext<'_>) -> Factory {
    let key = ctx.source_key();
    ctx.changes.get::<Factory>(&key).unwrap_or_else(|| {
        tracing::info!(factory = %ctx.meta.contract, "first spawn, creating factory");
        Factory {
            id: key,
            address: ctx.meta.contract,
            aminal_count: 0,
            gene_nft: ctx.deployment.gene_nft,
            auction: ctx.deployment.auction,
            created_at_block: ctx.meta.block_number,
        }
    })
}

/// A zero address means no parent. Any other parent must already be indexed.
fn parent(ctx: &HandlerContext<'_>, address: &Address) -> Result<Option<EntityKey>, HandlerError> {
    if address.is_zero() {
        return Ok(None);
    }
    let key = address_key(address);
    ctx.require::<Aminal>(&key)?;
    Ok(Some(key))
}

/// Point a settled auction at its child. Returns the auction key when linked.
fn link_lineage(
    ctx: &mut HandlerContext<'_>,
    auction_id: u64,
    child: &EntityKey,
) -> Option<EntityKey> {
    if auction_id == 0 {
        return None;
    }

    let key = match auction_key_for(auction_id) {
        Ok(key) => key,
        Err(err) => {
            tracing::warn!(auction_id, error = %err, "spawn references an unencodable auction");
            return None;
        }
    };
    let Some(mut auction) = ctx.changes.get::<GeneAuction>(&key) else {
        tracing::warn!(auction_id, child = %child, "spawn references unknown auction, lineage not linked");
        return None;
    };
    if !auction.finished {
        tracing::warn!(auction_id, child = %child, "spawn references unsettled auction, lineage not linked");
        return None;
    }

    auction.child = Some(child.clone());
    ctx.changes.save(auction);
    Some(key)
}

/// `SkillAdded`: register a skill contract with the factory.
pub fn skill_added(ctx: &mut HandlerContext<'_>, e: &SkillAdded) -> Result<(), HandlerError> {
    let key = address_key(&e.skill);
    if ctx.changes.contains::<GlobalSkill>(&key) {
        tracing::debug!(skill = %e.skill, "skill already registered");
        return Ok(());
    }
    let creator = ctx.user(&e.creator);
    ctx.changes.save(GlobalSkill {
        id: key,
        address: e.skill,
        factory: ctx.source_key(),
        creator,
        usage_count: 0,
        registered_at_block: ctx.meta.block_number,
    });
    Ok(())
}
