//! Decoded chain events consumed by the indexer.
//!
//! A [`ChainEvent`] is one log entry: its position on chain ([`EventMeta`])
//! plus a typed [`EventPayload`]. Events are produced by an upstream decoder
//! and arrive as JSON, one object per log entry:
//!
//! ```
//! use aminals_indexer::event::{ChainEvent, EventPayload};
//!
//! let json = r#"{
//!     "meta": {
//!         "contract": "0x00000000000000000000000000000000000000a1",
//!         "txHash": "0x0000000000000000000000000000000000000000000000000000000000000001",
//!         "logIndex": 0,
//!         "blockNumber": 10,
//!         "blockTimestamp": 1700000000
//!     },
//!     "payload": {
//!         "event": "Squeaked",
//!         "sender": "0x0000000000000000000000000000000000000007",
//!         "energyLost": "5"
//!     }
//! }"#;
//!
//! let event: ChainEvent = serde_json::from_str(json).unwrap();
//! assert!(matches!(event.payload, EventPayload::Squeaked(_)));
//! ```

use aminals_journal::journal::{EventRef, HandlerId};
use aminals_store::ids::GENE_CATEGORIES;
use aminals_store::primitives::{decimal, Address, TxHash};
use serde::{Deserialize, Serialize};

/// Gene ids per category, in category order. Zero means "no gene".
pub type GeneIds = [u32; GENE_CATEGORIES];

// ---------------------------------------------------------------------------
// EventMeta / ChainEvent
// ---------------------------------------------------------------------------

/// Where a log entry sits on chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMeta {
    /// The contract that emitted the log.
    pub contract: Address,
    pub tx_hash: TxHash,
    pub log_index: u32,
    pub block_number: u64,
    pub block_timestamp: u64,
}

impl EventMeta {
    /// Journal reference for writes caused by this event.
    pub fn event_ref(&self) -> EventRef {
        EventRef {
            tx_hash: self.tx_hash,
            log_index: self.log_index,
            block_number: self.block_number,
        }
    }
}

/// One decoded log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainEvent {
    pub meta: EventMeta,
    pub payload: EventPayload,
}

// ---------------------------------------------------------------------------
// EventSource
// ---------------------------------------------------------------------------

/// The kind of contract an event must come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventSource {
    /// The deployment's factory.
    Factory,
    /// Any indexed creature.
    Aminal,
    /// The deployment's visual auction.
    Auction,
    /// The deployment's gene token contract.
    GeneNft,
}

// ---------------------------------------------------------------------------
// EventPayload
// ---------------------------------------------------------------------------

/// Every event the indexer understands, tagged by its `event` name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum EventPayload {
    // -- factory ------------------------------------------------------------
    AminalSpawned(AminalSpawned),
    SkillAdded(SkillAdded),

    // -- aminal -------------------------------------------------------------
    Fed(Fed),
    Squeaked(Squeaked),
    SkillUsed(SkillUsedEvent),
    EnergyLost(EnergyLost),
    BreedingConsented(BreedingConsented),

    // -- auction ------------------------------------------------------------
    VotingCreated(VotingCreated),
    GeneProposed(GeneProposed),
    Voted(Voted),
    RemoveVoted(RemoveVoted),
    BulkVoted(BulkVoted),
    GeneRemoved(GeneRemoved),
    VotingSettled(VotingSettled),
    GeneCreatorPaid(GeneCreatorPaid),

    // -- gene nft -----------------------------------------------------------
    GeneMinted(GeneMinted),
    Transfer(Transfer),
}

impl EventPayload {
    /// The event's name as it appears in the feed.
    pub fn name(&self) -> &'static str {
        match self {
            EventPayload::AminalSpawned(_) => "AminalSpawned",
            EventPayload::SkillAdded(_) => "SkillAdded",
            EventPayload::Fed(_) => "Fed",
            EventPayload::Squeaked(_) => "Squeaked",
            EventPayload::SkillUsed(_) => "SkillUsed",
            EventPayload::EnergyLost(_) => "EnergyLost",
            EventPayload::BreedingConsented(_) => "BreedingConsented",
            EventPayload::VotingCreated(_) => "VotingCreated",
            EventPayload::GeneProposed(_) => "GeneProposed",
            EventPayload::Voted(_) => "Voted",
            EventPayload::RemoveVoted(_) => "RemoveVoted",
            EventPayload::BulkVoted(_) => "BulkVoted",
            EventPayload::GeneRemoved(_) => "GeneRemoved",
            EventPayload::VotingSettled(_) => "VotingSettled",
            EventPayload::GeneCreatorPaid(_) => "GeneCreatorPaid",
            EventPayload::GeneMinted(_) => "GeneMinted",
            EventPayload::Transfer(_) => "Transfer",
        }
    }

    /// Which contract is allowed to emit this event.
    pub fn source(&self) -> EventSource {
        match self {
            EventPayload::AminalSpawned(_) | EventPayload::SkillAdded(_) => EventSource::Factory,
            EventPayload::Fed(_)
            | EventPayload::Squeaked(_)
            | EventPayload::SkillUsed(_)
            | EventPayload::EnergyLost(_)
            | EventPayload::BreedingConsented(_) => EventSource::Aminal,
            EventPayload::VotingCreated(_)
            | EventPayload::GeneProposed(_)
            | EventPayload::Voted(_)
            | EventPayload::RemoveVoted(_)
            | EventPayload::BulkVoted(_)
            | EventPayload::GeneRemoved(_)
            | EventPayload::VotingSettled(_)
            | EventPayload::GeneCreatorPaid(_) => EventSource::Auction,
            EventPayload::GeneMinted(_) | EventPayload::Transfer(_) => EventSource::GeneNft,
        }
    }

    /// The handler responsible for this event, as recorded in the journal.
    pub fn handler(&self) -> HandlerId {
        match self {
            EventPayload::AminalSpawned(_) => HandlerId::Spawn,
            EventPayload::SkillAdded(_) => HandlerId::SkillRegistry,
            EventPayload::Fed(_)
            | EventPayload::Squeaked(_)
            | EventPayload::SkillUsed(_)
            | EventPayload::EnergyLost(_) => HandlerId::Activity,
            EventPayload::BreedingConsented(_) => HandlerId::Breeding,
            EventPayload::VotingCreated(_) | EventPayload::GeneProposed(_) => HandlerId::Auction,
            EventPayload::Voted(_) | EventPayload::RemoveVoted(_) | EventPayload::BulkVoted(_) => {
                HandlerId::Vote
            }
            EventPayload::GeneRemoved(_) | EventPayload::VotingSettled(_) => HandlerId::Settlement,
            EventPayload::GeneCreatorPaid(_) => HandlerId::Payout,
            EventPayload::GeneMinted(_) | EventPayload::Transfer(_) => HandlerId::GeneNft,
        }
    }
}

// ---------------------------------------------------------------------------
// Factory events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AminalSpawned {
    /// The creature's index within the factory.
    pub aminal_id: u64,
    pub aminal: Address,
    /// Zero for genesis creatures.
    pub mom: Address,
    pub dad: Address,
    /// The auction that produced this creature; zero when none did.
    pub auction_id: u64,
    pub gene_ids: GeneIds,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillAdded {
    pub skill: Address,
    pub creator: Address,
}

// ---------------------------------------------------------------------------
// Aminal events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fed {
    pub sender: Address,
    #[serde(with = "decimal")]
    pub amount: u128,
    #[serde(with = "decimal")]
    pub love: u128,
    /// The creature's energy after feeding.
    #[serde(with = "decimal")]
    pub energy: u128,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Squeaked {
    pub sender: Address,
    #[serde(with = "decimal")]
    pub energy_lost: u128,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillUsedEvent {
    pub sender: Address,
    pub skill: Address,
    #[serde(with = "decimal")]
    pub energy_cost: u128,
    #[serde(with = "hex_bytes", default)]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnergyLost {
    #[serde(with = "decimal")]
    pub amount: u128,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreedingConsented {
    pub sender: Address,
    pub partner: Address,
}

// ---------------------------------------------------------------------------
// Auction events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VotingCreated {
    pub auction_id: u64,
    pub aminal_one_index: u64,
    pub aminal_two_index: u64,
    #[serde(with = "decimal")]
    pub total_love: u128,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneProposed {
    pub auction_id: u64,
    pub category: u32,
    pub gene_id: u32,
    pub proposer: Address,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Voted {
    pub auction_id: u64,
    pub category: u32,
    pub gene_id: u32,
    pub voter: Address,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveVoted {
    pub auction_id: u64,
    pub category: u32,
    pub gene_id: u32,
    pub voter: Address,
    #[serde(with = "decimal")]
    pub weight: u128,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkVoted {
    pub auction_id: u64,
    pub voter: Address,
    /// One gene id per category; zero skips the category.
    pub gene_ids: GeneIds,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneRemoved {
    pub auction_id: u64,
    pub category: u32,
    pub gene_id: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VotingSettled {
    pub auction_id: u64,
    pub winner_ids: GeneIds,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneCreatorPaid {
    pub auction_id: u64,
    pub gene_id: u32,
    pub creator: Address,
    #[serde(with = "decimal")]
    pub amount: u128,
}

// ---------------------------------------------------------------------------
// Gene NFT events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneMinted {
    pub token_id: u32,
    pub creator: Address,
    pub category: u32,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    pub from: Address,
    pub to: Address,
    pub token_id: u32,
}

// ---------------------------------------------------------------------------
// Hex byte strings
// ---------------------------------------------------------------------------

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        let digits = s.strip_prefix("0x").unwrap_or(&s);
        hex::decode(digits).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
