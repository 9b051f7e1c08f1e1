//! Deterministic identifier derivation.
//!
//! Every entity key is a pure function of event fields. Handlers that need the
//! same entity derive its key independently through these functions; there is
//! no shared counter. All integers are encoded big-endian so that derived keys
//! sort in numeric order.
//!
//! ```
//! use aminals_store::ids::{auction_key, decode_auction_key, proposal_key};
//!
//! let auction = auction_key(3);
//! assert_eq!(auction.as_bytes(), &[0x03, 0x00, 0x00, 0x00]);
//! assert_eq!(decode_auction_key(&auction), Some(3));
//!
//! let proposal = proposal_key(&auction, 0, 7);
//! assert_eq!(proposal.len(), 12);
//! ```

use crate::primitives::{Address, EntityKey, TxHash};
use crate::IdError;

/// Multiplier that moves an auction number into the most significant byte of
/// a 32-bit word.
pub const AUCTION_KEY_UNIT: u32 = 0x100_0000;

/// Largest auction number that fits the auction key encoding.
pub const MAX_AUCTION_NUMBER: u64 = (u32::MAX / AUCTION_KEY_UNIT) as u64;

/// Number of visual trait categories a creature carries.
pub const GENE_CATEGORIES: usize = 8;

// ---------------------------------------------------------------------------
// Auctions and proposals
// ---------------------------------------------------------------------------

/// Key of the auction with ordinal `n`: `n * 0x1000000` as a 4-byte
/// big-endian word.
pub fn auction_key(n: u8) -> EntityKey {
    let word = u32::from(n) * AUCTION_KEY_UNIT;
    EntityKey::new(word.to_be_bytes().to_vec())
}

/// [`auction_key`] for an auction id taken from an event.
///
/// # Errors
///
/// Returns [`IdError::AuctionOutOfRange`] if the id does not fit the encoding.
pub fn auction_key_for(auction_id: u64) -> Result<EntityKey, IdError> {
    u8::try_from(auction_id)
        .map(auction_key)
        .map_err(|_| IdError::AuctionOutOfRange {
            auction_id,
            max: MAX_AUCTION_NUMBER,
        })
}

/// Recover the auction ordinal from an auction key.
///
/// Returns `None` if the key is not a well-formed auction key.
pub fn decode_auction_key(key: &EntityKey) -> Option<u8> {
    let bytes: [u8; 4] = key.as_bytes().try_into().ok()?;
    let word = u32::from_be_bytes(bytes);
    if word % AUCTION_KEY_UNIT != 0 {
        return None;
    }
    u8::try_from(word / AUCTION_KEY_UNIT).ok()
}

/// Key of a gene proposal: auction key, 4-byte category, 4-byte gene id.
pub fn proposal_key(auction: &EntityKey, category: u32, gene_id: u32) -> EntityKey {
    EntityKey::concat(&[
        auction.as_bytes(),
        &category.to_be_bytes(),
        &gene_id.to_be_bytes(),
    ])
}

// ---------------------------------------------------------------------------
// Genes
// ---------------------------------------------------------------------------

/// Canonical key of a gene NFT: contract address followed by a 4-byte token id.
pub fn gene_key(contract: &Address, token_id: u32) -> EntityKey {
    EntityKey::concat(&[contract.as_bytes(), &token_id.to_be_bytes()])
}

// ---------------------------------------------------------------------------
// Event-derived keys
// ---------------------------------------------------------------------------

/// Key for a record that is naturally unique per log entry.
pub fn event_key(tx: &TxHash, log_index: u32) -> EntityKey {
    EntityKey::concat(&[tx.as_bytes(), &log_index.to_be_bytes()])
}

/// [`event_key`] qualified by the emitting contract.
pub fn contract_event_key(tx: &TxHash, contract: &Address, log_index: u32) -> EntityKey {
    EntityKey::concat(&[tx.as_bytes(), contract.as_bytes(), &log_index.to_be_bytes()])
}

/// Vote key for one category of a bulk vote. Every category cast by the same
/// log entry stays individually addressable.
pub fn bulk_vote_key(tx: &TxHash, log_index: u32, category: u8) -> EntityKey {
    EntityKey::concat(&[tx.as_bytes(), &log_index.to_be_bytes(), &[category]])
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

/// Key for entities identified by a chain address (users, creatures, the
/// factory, skills).
pub fn address_key(address: &Address) -> EntityKey {
    EntityKey::from(address)
}

/// Key of the relationship between a user and a creature.
pub fn relationship_key(user: &Address, aminal: &Address) -> EntityKey {
    EntityKey::concat(&[user.as_bytes(), aminal.as_bytes()])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
