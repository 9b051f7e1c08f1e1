//! Event handlers.
//!
//! Every handler is a plain function taking the event's typed payload and a
//! [`HandlerContext`]. Handlers read and write only through the context's
//! [`ChangeSet`]; returning an error discards everything they staged.
//!
//! | Module | Events |
//! |---|---|
//! | [`spawn`] | `AminalSpawned`, `SkillAdded` |
//! | [`activity`] | `Fed`, `Squeaked`, `SkillUsed`, `EnergyLost`, `BreedingConsented` |
//! | [`auction`] | `VotingCreated`, `GeneProposed`, `Voted`, `RemoveVoted`, `BulkVoted`, `GeneRemoved`, `VotingSettled` |
//! | [`payout`] | `GeneCreatorPaid` |
//! | [`gene`] | `GeneMinted`, `Transfer` |

pub mod activity;
pub mod auction;
pub mod gene;
pub mod payout;
pub mod spawn;

use aminals_store::changeset::ChangeSet;
use aminals_store::entity::{Entity, EntityRecord, User};
use aminals_store::ids::{address_key, GENE_CATEGORIES};
use aminals_store::primitives::{Address, EntityKey};
use aminals_store::store::Store;

use crate::chain::ChainReader;
use crate::config::Deployment;
use crate::event::{EventMeta, EventPayload};
use crate::HandlerError;

// ---------------------------------------------------------------------------
// HandlerContext
// ---------------------------------------------------------------------------

/// Everything a handler may touch while processing one event.
pub struct HandlerContext<'a> {
    /// Staged writes over the committed store.
    pub changes: ChangeSet<'a>,
    pub reader: &'a dyn ChainReader,
    pub deployment: &'a Deployment,
    /// Position of the event being handled.
    pub meta: &'a EventMeta,
}

impl<'a> HandlerContext<'a> {
    pub fn new(
        store: &'a Store,
        reader: &'a dyn ChainReader,
        deployment: &'a Deployment,
        meta: &'a EventMeta,
    ) -> Self {
        Self {
            changes: ChangeSet::new(store),
            reader,
            deployment,
            meta,
        }
    }

    /// Key of the user at `address`, creating the user on first sight.
    pub fn user(&mut self, address: &Address) -> EntityKey {
        let key = address_key(address);
        if !self.changes.contains::<User>(&key) {
            self.changes
                .save(User::new(*address, self.meta.block_number));
        }
        key
    }

    /// Load an entity the event cannot be applied without.
    pub fn require<E: Entity>(&self, key: &EntityKey) -> Result<E, HandlerError> {
        self.changes
            .get::<E>(key)
            .ok_or_else(|| HandlerError::MissingEntity {
                kind: E::KIND,
                key: key.clone(),
            })
    }

    /// Key of the contract that emitted the event.
    pub fn source_key(&self) -> EntityKey {
        address_key(&self.meta.contract)
    }

    /// Consume the context, returning the staged writes.
    pub fn into_writes(self) -> Vec<EntityRecord> {
        self.changes.into_writes()
    }
}

/// Validate a gene category taken from an event.
pub(crate) fn category(category: u32) -> Result<u8, HandlerError> {
    match u8::try_from(category) {
        Ok(c) if usize::from(c) < GENE_CATEGORIES => Ok(c),
        _ => Err(HandlerError::InvalidCategory { category }),
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Run the handler for `payload`.
pub fn handle(ctx: &mut HandlerContext<'_>, payload: &EventPayload) -> Result<(), HandlerError> {
    match payload {
        EventPayload::AminalSpawned(e) => spawn::aminal_spawned(ctx, e),
        EventPayload::SkillAdded(e) => spawn::skill_added(ctx, e),
        EventPayload::Fed(e) => activity::fed(ctx, e),
        EventPayload::Squeaked(e) => activity::squeaked(ctx, e),
        EventPayload::SkillUsed(e) => activity::skill_used(ctx, e),
        EventPayload::EnergyLost(e) => activity::energy_lost(ctx, e),
        EventPayload::BreedingConsented(e) => activity::breeding_consented(ctx, e),
        EventPayload::VotingCreated(e) => auction::voting_created(ctx, e),
        EventPayload::GeneProposed(e) => auction::gene_proposed(ctx, e),
        EventPayload::Voted(e) => auction::voted(ctx, e),
        EventPayload::RemoveVoted(e) => auction::remove_voted(ctx, e),
        EventPayload::BulkVoted(e) => auction::bulk_voted(ctx, e),
        EventPayload::GeneRemoved(e) => auction::gene_removed(ctx, e),
        EventPayload::VotingSettled(e) => auction::voting_settled(ctx, e),
        EventPayload::GeneCreatorPaid(e) => payout::gene_creator_paid(ctx, e),
        EventPayload::GeneMinted(e) => gene::gene_minted(ctx, e),
        EventPayload::Transfer(e) => gene::transfer(ctx, e),
    }
}

// ---------------------------------------------------------------------------
// Test fixtures
// ---------------------------------------------------------------------------
