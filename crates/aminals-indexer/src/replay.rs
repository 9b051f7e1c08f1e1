//! Event replay recording and verification.
//!
//! A [`ReplayLog`] holds a starting [`IndexerSnapshot`], every event applied
//! after it, the contract reads each event made, and periodic state hashes.
//! [`replay`] re-applies the log on a fresh indexer that answers reads from
//! the recorded values and reports the first checkpoint whose hash differs.
//!
//! # Recording
//!
//! ```
//! use aminals_indexer::prelude::*;
//!
//! let deployment = Deployment {
//!     factory: Address::from_low_u64(0xf1),
//!     auction: Address::from_low_u64(0xa1),
//!     gene_nft: Address::from_low_u64(0xe1),
//! };
//! let config = IndexerConfig::new(deployment);
//! let reader = RecordingChainReader::new(StaticChainReader::new());
//! let mut indexer = Indexer::new(config.clone(), reader);
//!
//! let mut recorder = ReplayRecorder::new(indexer.capture_snapshot().unwrap(), 10);
//! let events: Vec<ChainEvent> = Vec::new();
//! for event in &events {
//!     indexer.process(event);
//!     let reads = indexer.reader().take_recorded();
//!     recorder.record_event(event, reads, Some(indexer.state_hash().unwrap()));
//! }
//! let log = recorder.finish(indexer.state_hash().unwrap());
//!
//! let result = replay(&log, config).unwrap();
//! assert!(result.is_faithful());
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::chain::StaticChainReader;
use crate::config::IndexerConfig;
use crate::dispatch::Indexer;
use crate::event::ChainEvent;
use crate::snapshot::IndexerSnapshot;
use crate::ReplayError;

// ---------------------------------------------------------------------------
// ReplayLog
// ---------------------------------------------------------------------------

/// A recorded run of the indexer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayLog {
    /// State before the first recorded event.
    pub initial_snapshot: IndexerSnapshot,
    /// Number of events recorded.
    pub total_events: u64,
    /// Events and checkpoints in recording order.
    pub entries: Vec<ReplayEntry>,
    /// State hash after the last event.
    pub final_state_hash: Option<String>,
}

/// A single entry in a replay log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ReplayEntry {
    /// The `sequence`-th event (1-based) and the reads it made.
    Event {
        sequence: u64,
        event: ChainEvent,
        #[serde(default, skip_serializing_if = "StaticChainReader::is_empty")]
        reads: StaticChainReader,
    },
    /// State hash after applying the first `sequence` events.
    Checkpoint { sequence: u64, state_hash: String },
}

// ---------------------------------------------------------------------------
// ReplayResult
// ---------------------------------------------------------------------------

/// The outcome of a replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayResult {
    /// Whether every event was re-applied. False if replay stopped at a
    /// checkpoint divergence.
    pub completed: bool,
    pub events_replayed: u64,
    pub first_divergence: Option<ReplayDivergence>,
}

impl ReplayResult {
    /// All events replayed and every hash matched.
    pub fn is_faithful(&self) -> bool {
        self.completed && self.first_divergence.is_none()
    }
}

/// Where a replay first produced a different state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayDivergence {
    /// Number of events applied when the hashes were compared.
    pub sequence: u64,
    pub expected_hash: String,
    pub actual_hash: String,
}

// ---------------------------------------------------------------------------
// ReplayRecorder
// ---------------------------------------------------------------------------

/// Builds a [`ReplayLog`] while events are processed.
pub struct ReplayRecorder {
    log: ReplayLog,
    checkpoint_interval: u64,
}

impl ReplayRecorder {
    /// Start recording from `snapshot`.
    ///
    /// A hash passed to [`record_event`](Self::record_event) is kept every
    /// `checkpoint_interval` events. An interval of zero keeps every hash.
    pub fn new(snapshot: IndexerSnapshot, checkpoint_interval: u64) -> Self {
        Self {
            log: ReplayLog {
                initial_snapshot: snapshot,
                total_events: 0,
                entries: Vec::new(),
                final_state_hash: None,
            },
            checkpoint_interval,
        }
    }

    /// Record an event after it was processed, whatever its outcome.
    ///
    /// `reads` are the contract answers the event received and `state_hash`
    /// the indexer's hash after it.
    pub fn record_event(
        &mut self,
        event: &ChainEvent,
        reads: StaticChainReader,
        state_hash: Option<String>,
    ) {
        self.log.total_events += 1;
        let sequence = self.log.total_events;
        self.log.entries.push(ReplayEntry::Event {
            sequence,
            event: event.clone(),
            reads,
        });

        if let Some(state_hash) = state_hash {
            if self.checkpoint_interval == 0 || sequence % self.checkpoint_interval == 0 {
                self.log.entries.push(ReplayEntry::Checkpoint {
                    sequence,
                    state_hash,
                });
            }
        }
    }

    /// Number of events recorded so far.
    pub fn events_recorded(&self) -> u64 {
        self.log.total_events
    }

    /// Finish recording with the hash after the last event.
    pub fn finish(mut self, final_state_hash: String) -> ReplayLog {
        self.log.final_state_hash = Some(final_state_hash);
        self.log
    }
}

// ---------------------------------------------------------------------------
// replay
// ---------------------------------------------------------------------------

/// Re-apply a replay log and compare state hashes.
///
/// The log is validated before anything runs. A checkpoint at sequence 0 is
/// compared against the restored initial state.
///
/// # Errors
///
/// Returns an error if events are out of order, a checkpoint is duplicated
/// or past the last event, or the initial snapshot cannot be restored.
pub fn replay(log: &ReplayLog, config: IndexerConfig) -> Result<ReplayResult, ReplayError> {
    let mut checkpoints: BTreeMap<u64, &str> = BTreeMap::new();
    let mut events: Vec<(&ChainEvent, &StaticChainReader)> = Vec::new();

    for entry in &log.entries {
        match entry {
            ReplayEntry::Event {
                sequence,
                event,
                reads,
            } => {
                let expected = events.len() as u64 + 1;
                if *sequence != expected {
                    return Err(ReplayError::EventOutOfOrder {
                        sequence: *sequence,
                        expected,
                    });
                }
                events.push((event, reads));
            }
            ReplayEntry::Checkpoint {
                sequence,
                state_hash,
            } => {
                if checkpoints.insert(*sequence, state_hash.as_str()).is_some() {
                    return Err(ReplayError::DuplicateCheckpoint {
                        sequence: *sequence,
                    });
                }
            }
        }
    }

    let total = events.len() as u64;
    if let Some((&sequence, _)) = checkpoints.range(total + 1..).next() {
        return Err(ReplayError::CheckpointOutOfRange { sequence, total });
    }
    if total != log.total_events {
        tracing::warn!(
            recorded = log.total_events,
            found = total,
            "replay log event count does not match its entries"
        );
    }

    let mut indexer = Indexer::new(config, StaticChainReader::new());
    indexer.restore_from_snapshot(&log.initial_snapshot)?;

    if let Some(divergence) = check(&indexer, &checkpoints, 0)? {
        return Ok(diverged(0, divergence));
    }

    let mut events_replayed = 0;
    for (event, reads) in events {
        *indexer.reader_mut() = reads.clone();
        indexer.process(event);
        events_replayed += 1;

        if let Some(divergence) = check(&indexer, &checkpoints, events_replayed)? {
            tracing::warn!(
                sequence = events_replayed,
                event = event.payload.name(),
                tx = %event.meta.tx_hash,
                "replay diverged"
            );
            return Ok(diverged(events_replayed, divergence));
        }
    }

    let mut first_divergence = None;
    if let Some(expected) = &log.final_state_hash {
        let actual = indexer.state_hash()?;
        if &actual != expected {
            tracing::warn!(sequence = events_replayed, "replay final state differs");
            first_divergence = Some(ReplayDivergence {
                sequence: events_replayed,
                expected_hash: expected.clone(),
                actual_hash: actual,
            });
        }
    }

    tracing::info!(events = events_replayed, "replay finished");
    Ok(ReplayResult {
        completed: true,
        events_replayed,
        first_divergence,
    })
}

fn check(
    indexer: &Indexer<StaticChainReader>,
    checkpoints: &BTreeMap<u64, &str>,
    sequence: u64,
) -> Result<Option<ReplayDivergence>, ReplayError> {
    let Some(&expected) = checkpoints.get(&sequence) else {
        return Ok(None);
    };
    let actual = indexer.state_hash()?;
    if actual == expected {
        return Ok(None);
    }
    Ok(Some(ReplayDivergence {
        sequence,
        expected_hash: expected.to_string(),
        actual_hash: actual,
    }))
}

fn diverged(events_replayed: u64, divergence: ReplayDivergence) -> ReplayResult {
    ReplayResult {
        completed: false,
        events_replayed,
        first_divergence: Some(divergence),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
