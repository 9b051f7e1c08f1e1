//! Contract read calls used to enrich events.
//!
//! Some events carry indices or references that only the chain can resolve:
//! the creature address behind an auction's parent index, a voter's current
//! voting weight, a creature's rendered image. Handlers reach the chain
//! through the [`ChainReader`] trait and treat every failure as a typed
//! [`ChainReadError`].
//!
//! # Implementations
//!
//! - [`StaticChainReader`]: answers from fixed tables. Serializable, so the
//!   answers of a live run can be stored with a replay log.
//! - [`RecordingChainReader`]: wraps another reader and captures every
//!   successful answer into a [`StaticChainReader`].
//! - [`TimeoutChainReader`]: bounds each call of another reader by a timeout.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use aminals_store::primitives::{decimal, Address};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ChainReadError
// ---------------------------------------------------------------------------

/// A failed contract read.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainReadError {
    /// The call did not answer in time.
    #[error("{call} timed out after {timeout_ms} ms")]
    Timeout { call: &'static str, timeout_ms: u64 },

    /// The contract reverted or has no value for the arguments.
    #[error("{call} reverted: {reason}")]
    Reverted { call: &'static str, reason: String },

    /// The chain data source could not be reached.
    #[error("{call} unavailable: {details}")]
    Unavailable { call: &'static str, details: String },
}

// ---------------------------------------------------------------------------
// ChainReader
// ---------------------------------------------------------------------------

/// Read-only contract calls the handlers depend on.
pub trait ChainReader {
    /// Address of the creature with factory index `index`.
    fn resolve_creature_address(&self, index: u64) -> Result<Address, ChainReadError>;

    /// Voting weight `voter` currently holds in auction `auction_id`.
    fn current_voting_weight(&self, auction_id: u64, voter: &Address)
        -> Result<u128, ChainReadError>;

    /// Rendered image of a creature.
    fn fetch_rendered_asset(&self, aminal: &Address) -> Result<String, ChainReadError>;
}

impl<R: ChainReader + ?Sized> ChainReader for &R {
    fn resolve_creature_address(&self, index: u64) -> Result<Address, ChainReadError> {
        (**self).resolve_creature_address(index)
    }

    fn current_voting_weight(
        &self,
        auction_id: u64,
        voter: &Address,
    ) -> Result<u128, ChainReadError> {
        (**self).current_voting_weight(auction_id, voter)
    }

    fn fetch_rendered_asset(&self, aminal: &Address) -> Result<String, ChainReadError> {
        (**self).fetch_rendered_asset(aminal)
    }
}

impl<R: ChainReader + ?Sized> ChainReader for Box<R> {
    fn resolve_creature_address(&self, index: u64) -> Result<Address, ChainReadError> {
        (**self).resolve_creature_address(index)
    }

    fn current_voting_weight(
        &self,
        auction_id: u64,
        voter: &Address,
    ) -> Result<u128, ChainReadError> {
        (**self).current_voting_weight(auction_id, voter)
    }

    fn fetch_rendered_asset(&self, aminal: &Address) -> Result<String, ChainReadError> {
        (**self).fetch_rendered_asset(aminal)
    }
}

// ---------------------------------------------------------------------------
// StaticChainReader
// ---------------------------------------------------------------------------

/// A recorded voting weight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedWeight {
    pub auction_id: u64,
    pub voter: Address,
    #[serde(with = "decimal")]
    pub weight: u128,
}

/// Answers read calls from fixed tables.
///
/// A lookup with no entry reverts, which is how a live contract answers an
/// unknown index or a missing asset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticChainReader {
    #[serde(default)]
    creatures: BTreeMap<u64, Address>,
    #[serde(default)]
    voting_weights: Vec<RecordedWeight>,
    #[serde(default)]
    rendered: BTreeMap<Address, String>,
}

impl StaticChainReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_creature(mut self, index: u64, address: Address) -> Self {
        self.set_creature(index, address);
        self
    }

    pub fn with_voting_weight(mut self, auction_id: u64, voter: Address, weight: u128) -> Self {
        self.set_voting_weight(auction_id, voter, weight);
        self
    }

    pub fn with_rendered(mut self, aminal: Address, asset: impl Into<String>) -> Self {
        self.rendered.insert(aminal, asset.into());
        self
    }

    pub fn set_creature(&mut self, index: u64, address: Address) {
        self.creatures.insert(index, address);
    }

    /// Set or replace the weight of `voter` in `auction_id`.
    pub fn set_voting_weight(&mut self, auction_id: u64, voter: Address, weight: u128) {
        match self
            .voting_weights
            .iter_mut()
            .find(|w| w.auction_id == auction_id && w.voter == voter)
        {
            Some(existing) => existing.weight = weight,
            None => self.voting_weights.push(RecordedWeight {
                auction_id,
                voter,
                weight,
            }),
        }
    }

    pub fn set_rendered(&mut self, aminal: Address, asset: String) {
        self.rendered.insert(aminal, asset);
    }

    /// Whether no answers are recorded.
    pub fn is_empty(&self) -> bool {
        self.creatures.is_empty() && self.voting_weights.is_empty() && self.rendered.is_empty()
    }
}

impl ChainReader for StaticChainReader {
    fn resolve_creature_address(&self, index: u64) -> Result<Address, ChainReadError> {
        self.creatures
            .get(&index)
            .copied()
            .ok_or_else(|| ChainReadError::Reverted {
                call: "getAminalByIndex",
                reason: format!("no creature at index {index}"),
            })
    }

    fn current_voting_weight(
        &self,
        auction_id: u64,
        voter: &Address,
    ) -> Result<u128, ChainReadError> {
        self.voting_weights
            .iter()
            .find(|w| w.auction_id == auction_id && &w.voter == voter)
            .map(|w| w.weight)
            .ok_or_else(|| ChainReadError::Reverted {
                call: "getVoterWeight",
                reason: format!("no weight for {voter} in auction {auction_id}"),
            })
    }

    fn fetch_rendered_asset(&self, aminal: &Address) -> Result<String, ChainReadError> {
        self.rendered
            .get(aminal)
            .cloned()
            .ok_or_else(|| ChainReadError::Reverted {
                call: "tokenURI",
                reason: format!("no rendered asset for {aminal}"),
            })
    }
}

// ---------------------------------------------------------------------------
// RecordingChainReader
// ---------------------------------------------------------------------------

/// Forwards calls to `inner` and keeps every successful answer.
///
/// Failed calls are not recorded: a [`StaticChainReader`] built from the
/// recording reverts on them, so a replay sees the same failures.
#[derive(Debug)]
pub struct RecordingChainReader<R> {
    inner: R,
    recorded: RefCell<StaticChainReader>,
}

impl<R: ChainReader> RecordingChainReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            recorded: RefCell::new(StaticChainReader::new()),
        }
    }

    /// A copy of the answers recorded so far.
    pub fn recorded(&self) -> StaticChainReader {
        self.recorded.borrow().clone()
    }

    /// Take the answers recorded so far, leaving the recording empty.
    ///
    /// Called after each event to capture the reads made for that event.
    pub fn take_recorded(&self) -> StaticChainReader {
        std::mem::take(&mut *self.recorded.borrow_mut())
    }

    /// Split into the wrapped reader and the recorded answers.
    pub fn into_parts(self) -> (R, StaticChainReader) {
        (self.inner, self.recorded.into_inner())
    }
}

impl<R: ChainReader> ChainReader for RecordingChainReader<R> {
    fn resolve_creature_address(&self, index: u64) -> Result<Address, ChainReadError> {
        let address = self.inner.resolve_creature_address(index)?;
        self.recorded.borrow_mut().set_creature(index, address);
        Ok(address)
    }

    fn current_voting_weight(
        &self,
        auction_id: u64,
        voter: &Address,
    ) -> Result<u128, ChainReadError> {
        let weight = self.inner.current_voting_weight(auction_id, voter)?;
        self.recorded
            .borrow_mut()
            .set_voting_weight(auction_id, *voter, weight);
        Ok(weight)
    }

    fn fetch_rendered_asset(&self, aminal: &Address) -> Result<String, ChainReadError> {
        let asset = self.inner.fetch_rendered_asset(aminal)?;
        self.recorded
            .borrow_mut()
            .set_rendered(*aminal, asset.clone());
        Ok(asset)
    }
}

// ---------------------------------------------------------------------------
// TimeoutChainReader
// ---------------------------------------------------------------------------

/// Runs each call of `inner` on a worker thread and gives up after `timeout`.
///
/// A call that times out keeps running on its thread; its answer is
/// discarded.
#[derive(Debug)]
pub struct TimeoutChainReader<R> {
    inner: Arc<R>,
    timeout: Duration,
}

impl<R> Clone for TimeoutChainReader<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            timeout: self.timeout,
        }
    }
}

impl<R: ChainReader + Send + Sync + 'static> TimeoutChainReader<R> {
    pub fn new(inner: R, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(inner),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn call<T, F>(&self, call: &'static str, f: F) -> Result<T, ChainReadError>
    where
        T: Send + 'static,
        F: FnOnce(&R) -> Result<T, ChainReadError> + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        let inner = Arc::clone(&self.inner);
        thread::Builder::new()
            .name(format!("chain-read-{call}"))
            .spawn(move || {
                // The receiver is gone if the caller already timed out.
                let _ = tx.send(f(&inner));
            })
            .map_err(|e| ChainReadError::Unavailable {
                call,
                details: format!("failed to spawn reader thread: {e}"),
            })?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(ChainReadError::Timeout {
                call,
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            Err(RecvTimeoutError::Disconnected) => Err(ChainReadError::Unavailable {
                call,
                details: "reader thread exited without answering".to_string(),
            }),
        }
    }
}

impl<R: ChainReader + Send + Sync + 'static> ChainReader for TimeoutChainReader<R> {
    fn resolve_creature_address(&self, index: u64) -> Result<Address, ChainReadError> {
        self.call("getAminalByIndex", move |r| r.resolve_creature_address(index))
    }

    fn current_voting_weight(
        &self,
        auction_id: u64,
        voter: &Address,
    ) -> Result<u128, ChainReadError> {
        let voter = *voter;
        self.call("getVoterWeight", move |r| {
            r.current_voting_weight(auction_id, &voter)
        })
    }

    fn fetch_rendered_asset(&self, aminal: &Address) -> Result<String, ChainReadError> {
        let aminal = *aminal;
        self.call("tokenURI", move |r| r.fetch_rendered_asset(&aminal))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Sleeps before answering every call.
    struct SlowReader(Duration);

    impl ChainReader for SlowReader {
        fn resolve_creature_address(&self, index: u64) -> Result<Address, ChainReadError> {
            thread::sleep(self.0);
            Ok(Address::from_low_u64(index))
        }

        fn current_voting_weight(&self, _: u64, _: &Address) -> Result<u128, ChainReadError> {
            thread::sleep(self.0);
            Ok(1)
        }

        fn fetch_rendered_asset(&self, _: &Address) -> Result<String, ChainReadError> {
            thread::sleep(self.0);
            Ok(String::new())
        }
    }

    #[test]
    fn static_reader_reverts_on_missing_entries() {
        let reader = StaticChainReader::new()
            .with_creature(1, Address::from_low_u64(0x10))
            .with_voting_weight(3, Address::from_low_u64(7), 40);

        assert_eq!(
            reader.resolve_creature_address(1).unwrap(),
            Address::from_low_u64(0x10)
        );
        assert!(matches!(
            reader.resolve_creature_address(2),
            Err(ChainReadError::Reverted { .. })
        ));
        assert_eq!(
            reader
                .current_voting_weight(3, &Address::from_low_u64(7))
                .unwrap(),
            40
        );
        assert!(reader
            .fetch_rendered_asset(&Address::from_low_u64(0x10))
            .is_err());
    }

    #[test]
    fn static_reader_serde_roundtrip() {
        let reader = StaticChainReader::new()
            .with_creature(1, Address::from_low_u64(0x10))
            .with_voting_weight(3, Address::from_low_u64(7), u128::MAX)
            .with_rendered(Address::from_low_u64(0x10), "<svg/>");
        let json = serde_json::to_string(&reader).unwrap();
        let back: StaticChainReader = serde_json::from_str(&json).unwrap();
        assert_eq!(back, reader);
    }

    #[test]
    fn set_voting_weight_replaces() {
        let mut reader = StaticChainReader::new();
        let voter = Address::from_low_u64(7);
        reader.set_voting_weight(1, voter, 5);
        reader.set_voting_weight(1, voter, 9);
        assert_eq!(reader.current_voting_weight(1, &voter).unwrap(), 9);
    }

    #[test]
    fn recording_reader_captures_successes_only() {
        let inner = StaticChainReader::new().with_creature(1, Address::from_low_u64(0x10));
        let recording = RecordingChainReader::new(inner);

        recording.resolve_creature_address(1).unwrap();
        assert!(recording.resolve_creature_address(2).is_err());

        let (_, recorded) = recording.into_parts();
        assert!(recorded.resolve_creature_address(1).is_ok());
        assert!(recorded.resolve_creature_address(2).is_err());
    }

    #[test]
    fn take_recorded_drains_the_recording() {
        let inner = StaticChainReader::new().with_rendered(Address::from_low_u64(0x10), "<svg/>");
        let recording = RecordingChainReader::new(inner);

        recording.fetch_rendered_asset(&Address::from_low_u64(0x10)).unwrap();
        let first = recording.take_recorded();
        assert!(!first.is_empty());
        assert!(recording.take_recorded().is_empty());
    }

    #[test]
    fn timeout_reader_times_out_slow_calls() {
        let reader =
            TimeoutChainReader::new(SlowReader(Duration::from_millis(500)), Duration::from_millis(20));
        let err = reader.resolve_creature_address(1).unwrap_err();
        assert!(matches!(
            err,
            ChainReadError::Timeout {
                call: "getAminalByIndex",
                timeout_ms: 20
            }
        ));
    }

    #[test]
    fn timeout_reader_passes_fast_answers_through() {
        let inner = StaticChainReader::new().with_voting_weight(1, Address::from_low_u64(7), 3);
        let reader = TimeoutChainReader::new(inner, Duration::from_secs(5));
        assert_eq!(
            reader
                .current_voting_weight(1, &Address::from_low_u64(7))
                .unwrap(),
            3
        );
        assert!(reader
            .current_voting_weight(1, &Address::from_low_u64(8))
            .is_err());
    }
}
