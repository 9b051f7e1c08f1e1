//! Typed entities held by the store.
//!
//! Each entity type is a plain serde struct identified by an [`EntityKey`] in
//! its `id` field. The [`Entity`] trait connects a struct to its
//! [`EntityKind`] and to the type-erased [`EntityRecord`] the store keeps.
//!
//! References between entities are ordinary `EntityKey` fields. Each entity
//! reports its outgoing references through [`Entity::references`] so that the
//! store can answer reverse traversals ("all votes on a proposal") without a
//! scan.
//!
//! Field names serialize in camelCase: that is the shape the query interface
//! exposes.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::primitives::{decimal, Address, EntityKey, TxHash};
use crate::StoreError;

// ---------------------------------------------------------------------------
// Entity trait
// ---------------------------------------------------------------------------

/// A typed entity that can be stored, loaded and traversed.
pub trait Entity: Clone + Serialize + DeserializeOwned + Sized + 'static {
    /// The kind tag of this entity type.
    const KIND: EntityKind;

    /// The entity's key.
    fn key(&self) -> &EntityKey;

    /// Outgoing references as `(field name, target key)` pairs.
    fn references(&self) -> Vec<(&'static str, &EntityKey)>;

    /// Wrap into the type-erased record.
    fn into_record(self) -> EntityRecord;

    /// Borrow the typed entity out of a record of the matching kind.
    fn from_record(record: &EntityRecord) -> Option<&Self>;
}

macro_rules! entity_types {
    ($($variant:ident => $name:literal),* $(,)?) => {
        /// Discriminant for every stored entity type.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub enum EntityKind {
            $(
                #[serde(rename = $name)]
                $variant,
            )*
        }

        impl EntityKind {
            /// Every kind, in declaration order.
            pub const ALL: &'static [EntityKind] = &[$(EntityKind::$variant),*];

            /// The type name exposed to queries.
            pub fn as_str(self) -> &'static str {
                match self {
                    $(EntityKind::$variant => $name,)*
                }
            }
        }

        impl FromStr for EntityKind {
            type Err = StoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(EntityKind::$variant),)*
                    other => Err(StoreError::UnknownEntityKind { name: other.to_owned() }),
                }
            }
        }

        /// Type-erased entity as kept by the store and written to snapshots.
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[serde(tag = "__typename")]
        pub enum EntityRecord {
            $(
                #[serde(rename = $name)]
                $variant($variant),
            )*
        }

        impl EntityRecord {
            /// The record's kind.
            pub fn kind(&self) -> EntityKind {
                match self {
                    $(EntityRecord::$variant(_) => EntityKind::$variant,)*
                }
            }

            /// The record's key.
            pub fn key(&self) -> &EntityKey {
                match self {
                    $(EntityRecord::$variant(e) => &e.id,)*
                }
            }

            /// Outgoing references of the wrapped entity.
            pub fn references(&self) -> Vec<(&'static str, &EntityKey)> {
                match self {
                    $(EntityRecord::$variant(e) => e.links(),)*
                }
            }

            /// The entity's fields as a JSON object (without the type tag).
            pub fn to_json(&self) -> serde_json::Value {
                let value = match self {
                    $(EntityRecord::$variant(e) => serde_json::to_value(e),)*
                };
                // Entity structs hold only strings, integers, booleans and
                // vectors of those, all of which serialize infallibly.
                value.unwrap_or(serde_json::Value::Null)
            }
        }

        $(
            impl Entity for $variant {
                const KIND: EntityKind = EntityKind::$variant;

                fn key(&self) -> &EntityKey {
                    &self.id
                }

                fn references(&self) -> Vec<(&'static str, &EntityKey)> {
                    self.links()
                }

                fn into_record(self) -> EntityRecord {
                    EntityRecord::$variant(self)
                }

                fn from_record(record: &EntityRecord) -> Option<&Self> {
                    match record {
                        EntityRecord::$variant(e) => Some(e),
                        #[allow(unreachable_patterns)]
                        _ => None,
                    }
                }
            }
        )*
    };
}

entity_types! {
    Factory => "Factory",
    Aminal => "Aminal",
    GeneAuction => "GeneAuction",
    GeneProposal => "GeneProposal",
    GeneVote => "GeneVote",
    GeneNft => "GeneNFT",
    GeneCreatorPayout => "GeneCreatorPayout",
    User => "User",
    Relationship => "Relationship",
    BreedingConsent => "BreedingConsent",
    GlobalSkill => "GlobalSkill",
    FeedEvent => "FeedEvent",
    Squeak => "Squeak",
    SkillUsed => "SkillUsed",
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn push_opt<'a>(
    refs: &mut Vec<(&'static str, &'a EntityKey)>,
    field: &'static str,
    key: &'a Option<EntityKey>,
) {
    if let Some(key) = key {
        refs.push((field, key));
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// The deployment singleton. Its counter is the next creature's index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Factory {
    pub id: EntityKey,
    pub address: Address,
    pub aminal_count: u64,
    /// Gene NFT contract of this deployment.
    pub gene_nft: Address,
    /// Visual auction contract of this deployment.
    pub auction: Address,
    pub created_at_block: u64,
}

impl Factory {
    fn links(&self) -> Vec<(&'static str, &EntityKey)> {
        Vec::new()
    }
}

// ---------------------------------------------------------------------------
// Aminal
// ---------------------------------------------------------------------------

/// A creature, keyed by its own contract address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Aminal {
    pub id: EntityKey,
    pub address: Address,
    pub index: u64,
    pub factory: EntityKey,
    /// `None` for genesis creatures.
    pub mom: Option<EntityKey>,
    pub dad: Option<EntityKey>,
    /// One gene reference per visual category; `None` where the category is
    /// empty.
    pub genes: Vec<Option<EntityKey>>,
    #[serde(with = "decimal")]
    pub energy: u128,
    #[serde(with = "decimal")]
    pub total_love: u128,
    pub rendered: Option<String>,
    pub breeding_with: Option<EntityKey>,
    /// The auction whose outcome produced this creature.
    pub auction: Option<EntityKey>,
    pub created_at_block: u64,
    pub created_at_timestamp: u64,
    pub tx_hash: TxHash,
}

impl Aminal {
    fn links(&self) -> Vec<(&'static str, &EntityKey)> {
        let mut refs = vec![("factory", &self.factory)];
        push_opt(&mut refs, "mom", &self.mom);
        push_opt(&mut refs, "dad", &self.dad);
        for gene in self.genes.iter().flatten() {
            refs.push(("genes", gene));
        }
        push_opt(&mut refs, "breedingWith", &self.breeding_with);
        push_opt(&mut refs, "auction", &self.auction);
        refs
    }
}

// ---------------------------------------------------------------------------
// GeneAuction
// ---------------------------------------------------------------------------

/// A voting round between two parents deciding their child's genes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneAuction {
    pub id: EntityKey,
    pub auction_id: u64,
    pub aminal_one: EntityKey,
    pub aminal_two: EntityKey,
    #[serde(with = "decimal")]
    pub total_love: u128,
    pub finished: bool,
    /// Winning gene id per category, filled at settlement.
    pub winner_ids: Vec<u32>,
    pub child: Option<EntityKey>,
    pub created_at_block: u64,
    pub created_at_timestamp: u64,
    pub settled_at_block: Option<u64>,
}

impl GeneAuction {
    fn links(&self) -> Vec<(&'static str, &EntityKey)> {
        let mut refs = vec![("aminalOne", &self.aminal_one), ("aminalTwo", &self.aminal_two)];
        push_opt(&mut refs, "child", &self.child);
        refs
    }
}

// ---------------------------------------------------------------------------
// GeneProposal
// ---------------------------------------------------------------------------

/// A gene put forward in one category of an auction, with running vote totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneProposal {
    pub id: EntityKey,
    pub auction: EntityKey,
    pub category: u8,
    pub gene_id: u32,
    pub gene: EntityKey,
    pub proposer: EntityKey,
    #[serde(with = "decimal")]
    pub love_votes: u128,
    #[serde(with = "decimal")]
    pub remove_votes: u128,
    pub removed: bool,
    /// Synthesized because a bulk vote referenced it before any proposal.
    pub auto_created: bool,
    pub created_at_block: u64,
}

impl GeneProposal {
    fn links(&self) -> Vec<(&'static str, &EntityKey)> {
        vec![
            ("auction", &self.auction),
            ("gene", &self.gene),
            ("proposer", &self.proposer),
        ]
    }
}

// ---------------------------------------------------------------------------
// GeneVote
// ---------------------------------------------------------------------------

/// One cast vote. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneVote {
    pub id: EntityKey,
    pub auction: EntityKey,
    pub proposal: EntityKey,
    pub voter: EntityKey,
    pub is_remove_vote: bool,
    #[serde(with = "decimal")]
    pub vote_weight: u128,
    pub block_number: u64,
    pub log_index: u32,
    pub block_timestamp: u64,
    pub tx_hash: TxHash,
}

impl GeneVote {
    fn links(&self) -> Vec<(&'static str, &EntityKey)> {
        vec![
            ("auction", &self.auction),
            ("proposal", &self.proposal),
            ("voter", &self.voter),
        ]
    }

    /// Position of this vote in chain order.
    pub fn chain_position(&self) -> (u64, u32) {
        (self.block_number, self.log_index)
    }
}

// ---------------------------------------------------------------------------
// GeneNft
// ---------------------------------------------------------------------------

/// A visual trait token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneNft {
    pub id: EntityKey,
    pub contract: Address,
    pub token_id: u32,
    pub category: u8,
    pub creator: EntityKey,
    pub owner: EntityKey,
    pub content: Option<String>,
    #[serde(with = "decimal")]
    pub earnings: u128,
    pub minted_at_block: u64,
}

impl GeneNft {
    fn links(&self) -> Vec<(&'static str, &EntityKey)> {
        vec![("creator", &self.creator), ("owner", &self.owner)]
    }
}

// ---------------------------------------------------------------------------
// GeneCreatorPayout
// ---------------------------------------------------------------------------

/// Proceeds attributed to a gene's creator. Immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneCreatorPayout {
    pub id: EntityKey,
    pub auction: EntityKey,
    pub gene: EntityKey,
    pub creator: EntityKey,
    #[serde(with = "decimal")]
    pub amount: u128,
    pub block_number: u64,
    pub tx_hash: TxHash,
}

impl GeneCreatorPayout {
    fn links(&self) -> Vec<(&'static str, &EntityKey)> {
        vec![
            ("auction", &self.auction),
            ("gene", &self.gene),
            ("creator", &self.creator),
        ]
    }
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// Any account that appeared in an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: EntityKey,
    pub address: Address,
    pub created_at_block: u64,
}

impl User {
    pub fn new(address: Address, block: u64) -> Self {
        Self {
            id: EntityKey::from(address),
            address,
            created_at_block: block,
        }
    }

    fn links(&self) -> Vec<(&'static str, &EntityKey)> {
        Vec::new()
    }
}

// ---------------------------------------------------------------------------
// Relationship
// ---------------------------------------------------------------------------

/// Love a user has given a creature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub id: EntityKey,
    pub user: EntityKey,
    pub aminal: EntityKey,
    #[serde(with = "decimal")]
    pub love: u128,
    pub last_fed_block: u64,
}

impl Relationship {
    fn links(&self) -> Vec<(&'static str, &EntityKey)> {
        vec![("user", &self.user), ("aminal", &self.aminal)]
    }
}

// ---------------------------------------------------------------------------
// BreedingConsent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreedingConsent {
    pub id: EntityKey,
    pub aminal: EntityKey,
    pub partner: EntityKey,
    pub user: EntityKey,
    pub block_number: u64,
    pub tx_hash: TxHash,
}

impl BreedingConsent {
    fn links(&self) -> Vec<(&'static str, &EntityKey)> {
        vec![
            ("aminal", &self.aminal),
            ("partner", &self.partner),
            ("user", &self.user),
        ]
    }
}

// ---------------------------------------------------------------------------
// GlobalSkill
// ---------------------------------------------------------------------------

/// A skill contract registered with the factory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSkill {
    pub id: EntityKey,
    pub address: Address,
    pub factory: EntityKey,
    pub creator: EntityKey,
    pub usage_count: u64,
    pub registered_at_block: u64,
}

impl GlobalSkill {
    fn links(&self) -> Vec<(&'static str, &EntityKey)> {
        vec![("factory", &self.factory), ("creator", &self.creator)]
    }
}

// ---------------------------------------------------------------------------
// Activity records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedEvent {
    pub id: EntityKey,
    pub aminal: EntityKey,
    pub user: EntityKey,
    #[serde(with = "decimal")]
    pub amount: u128,
    #[serde(with = "decimal")]
    pub love: u128,
    #[serde(with = "decimal")]
    pub energy_after: u128,
    pub block_number: u64,
    pub block_timestamp: u64,
    pub tx_hash: TxHash,
}

impl FeedEvent {
    fn links(&self) -> Vec<(&'static str, &EntityKey)> {
        vec![("aminal", &self.aminal), ("user", &self.user)]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Squeak {
    pub id: EntityKey,
    pub aminal: EntityKey,
    pub user: EntityKey,
    #[serde(with = "decimal")]
    pub energy_lost: u128,
    #[serde(with = "decimal")]
    pub energy_after: u128,
    pub block_number: u64,
    pub block_timestamp: u64,
    pub tx_hash: TxHash,
}

impl Squeak {
    fn links(&self) -> Vec<(&'static str, &EntityKey)> {
        vec![("aminal", &self.aminal), ("user", &self.user)]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillUsed {
    pub id: EntityKey,
    pub aminal: EntityKey,
    pub user: EntityKey,
    /// Address key of the skill contract; a [`GlobalSkill`] may or may not
    /// exist under it.
    pub skill: EntityKey,
    #[serde(with = "decimal")]
    pub energy_cost: u128,
    /// Hex-encoded call data passed to the skill.
    pub data: String,
    pub block_number: u64,
    pub block_timestamp: u64,
    pub tx_hash: TxHash,
}

impl SkillUsed {
    fn links(&self) -> Vec<(&'static str, &EntityKey)> {
        vec![
            ("aminal", &self.aminal),
            ("user", &self.user),
            ("skill", &self.skill),
        ]
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
