//! Events emitted by creatures: feeding, squeaks, skills, energy, breeding.
//!
//! All of them require the emitting contract to be an indexed creature.

use aminals_store::entity::{
    Aminal, BreedingConsent, FeedEvent, GlobalSkill, Relationship, SkillUsed, Squeak,
};
use aminals_store::ids::{address_key, event_key, relationship_key};

use super::HandlerContext;
use crate::event::{BreedingConsented, EnergyLost, Fed, SkillUsedEvent, Squeaked};
use crate::HandlerError;

fn emitter(ctx: &HandlerContext<'_>) -> Result<Aminal, HandlerError> {
    ctx.require::<Aminal>(&ctx.source_key())
}

fn drain(aminal: &mut Aminal, amount: u128) {
    if amount > aminal.energy {
        tracing::debug!(aminal = %aminal.address, energy = aminal.energy, amount, "energy floored at zero");
    }
    aminal.energy = aminal.energy.saturating_sub(amount);
}

/// `Fed`: credit love to the feeder's relationship and the creature.
pub fn fed(ctx: &mut HandlerContext<'_>, e: &Fed) -> Result<(), HandlerError> {
    let mut aminal = emitter(ctx)?;
    let user = ctx.user(&e.sender);

    let key = relationship_key(&e.sender, &aminal.address);
    let mut relationship = ctx.changes.get::<Relationship>(&key).unwrap_or(Relationship {
        id: key,
        user: user.clone(),
        aminal: aminal.id.clone(),
        love: 0,
        last_fed_block: ctx.meta.block_number,
    });
    relationship.love = relationship.love.saturating_add(e.love);
    relationship.last_fed_block = ctx.meta.block_number;
    ctx.changes.save(relationship);

    aminal.total_love = aminal.total_love.saturating_add(e.love);
    aminal.energy = e.energy;

    ctx.changes.save(FeedEvent {
        id: event_key(&ctx.meta.tx_hash, ctx.meta.log_index),
        aminal: aminal.id.clone(),
        user,
        amount: e.amount,
        love: e.love,
        energy_after: aminal.energy,
        block_number: ctx.meta.block_number,
        block_timestamp: ctx.meta.block_timestamp,
        tx_hash: ctx.meta.tx_hash,
    });
    ctx.changes.save(aminal);
    Ok(())
}

/// `Squeaked`: the creature spends energy on a squeak.
pub fn squeaked(ctx: &mut HandlerContext<'_>, e: &Squeaked) -> Result<(), HandlerError> {
    let mut aminal = emitter(ctx)?;
    let user = ctx.user(&e.sender);
    drain(&mut aminal, e.energy_lost);

    ctx.changes.save(Squeak {
        id: event_key(&ctx.meta.tx_hash, ctx.meta.log_index),
        aminal: aminal.id.clone(),
        user,
        energy_lost: e.energy_lost,
        energy_after: aminal.energy,
        block_number: ctx.meta.block_number,
        block_timestamp: ctx.meta.block_timestamp,
        tx_hash: ctx.meta.tx_hash,
    });
    ctx.changes.save(aminal);
    Ok(())
}

/// `SkillUsed`: the creature calls a skill contract.
pub fn skill_used(ctx: &mut HandlerContext<'_>, e: &SkillUsedEvent) -> Result<(), HandlerError> {
    let mut aminal = emitter(ctx)?;
    let user = ctx.user(&e.sender);
    drain(&mut aminal, e.energy_cost);

    let skill = address_key(&e.skill);
    match ctx.changes.get::<GlobalSkill>(&skill) {
        Some(mut registered) => {
            registered.usage_count += 1;
            ctx.changes.save(registered);
        }
        None => tracing::debug!(skill = %e.skill, "skill used but not registered"),
    }

    ctx.changes.save(SkillUsed {
        id: event_key(&ctx.meta.tx_hash, ctx.meta.log_index),
        aminal: aminal.id.clone(),
        user,
        skill,
        energy_cost: e.energy_cost,
        data: format!("0x{}", hex::encode(&e.data)),
        block_number: ctx.meta.block_number,
        block_timestamp: ctx.meta.block_timestamp,
        tx_hash: ctx.meta.tx_hash,
    });
    ctx.changes.save(aminal);
    Ok(())
}

/// `EnergyLost`: passive energy decay.
pub fn energy_lost(ctx: &mut HandlerContext<'_>, e: &EnergyLost) -> Result<(), HandlerError> {
    let mut aminal = emitter(ctx)?;
    drain(&mut aminal, e.amount);
    ctx.changes.save(aminal);
    Ok(())
}

/// `BreedingConsented`: the creature agrees to breed with `partner`.
pub fn breeding_consented(
    ctx: &mut HandlerContext<'_>,
    e: &BreedingConsented,
) -> Result<(), HandlerError> {
    let mut aminal = emitter(ctx)?;
    let partner = address_key(&e.partner);
    ctx.require::<Aminal>(&partner)?;
    let user = ctx.user(&e.sender);

    ctx.changes.save(BreedingConsent {
        id: event_key(&ctx.meta.tx_hash, ctx.meta.log_index),
        aminal: aminal.id.clone(),
        partner: partner.clone(),
        user,
        block_number: ctx.meta.block_number,
        tx_hash: ctx.meta.tx_hash,
    });
    aminal.breeding_with = Some(partner);
    ctx.changes.save(aminal);
    Ok(())
}
