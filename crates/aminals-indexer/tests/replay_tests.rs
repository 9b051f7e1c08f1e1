//! Integration tests for snapshots, resumption and replay verification.

use std::time::Duration;

use aminals_indexer::prelude::*;
use aminals_indexer::replay::ReplayEntry;

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

fn deployment() -> Deployment {
    Deployment {
        factory: Address::from_low_u64(0xf1),
        auction: Address::from_low_u64(0xa1),
        gene_nft: Address::from_low_u64(0xe1),
    }
}

fn live_reader() -> StaticChainReader {
    StaticChainReader::new()
        .with_creature(1, Address::from_low_u64(0x1001))
        .with_creature(2, Address::from_low_u64(0x1002))
        .with_voting_weight(1, Address::from_low_u64(0x0a), 25)
        .with_voting_weight(1, Address::from_low_u64(0x0b), 75)
        .with_rendered(Address::from_low_u64(0x1001), "<svg/>")
}

fn at(contract: Address, n: u64, payload: EventPayload) -> ChainEvent {
    ChainEvent {
        meta: EventMeta {
            contract,
            tx_hash: TxHash::from_low_u64(n),
            log_index: 0,
            block_number: n,
            block_timestamp: 1_700_000_000 + n,
        },
        payload,
    }
}

/// A full round: two parents, an auction with votes and a payout, a child,
/// and some creature activity. Includes one event that is dropped.
fn stream() -> Vec<ChainEvent> {
    let d = deployment();
    let spawn = |n: u64, aminal: u64, auction_id: u64| {
        at(
            d.factory,
            n,
            EventPayload::AminalSpawned(AminalSpawned {
                aminal_id: aminal,
                aminal: Address::from_low_u64(0x1000 + aminal),
                mom: Address::ZERO,
                dad: Address::ZERO,
                auction_id,
                gene_ids: [0; 8],
            }),
        )
    };
    let mut winners = [0u32; 8];
    winners[2] = 9;
    vec![
        spawn(1, 1, 0),
        spawn(2, 2, 0),
        at(
            d.gene_nft,
            3,
            EventPayload::GeneMinted(GeneMinted {
                token_id: 9,
                creator: Address::from_low_u64(0x0c),
                category: 2,
                content: Some("<g/>".into()),
            }),
        ),
        at(
            d.auction,
            4,
            EventPayload::VotingCreated(VotingCreated {
                auction_id: 1,
                aminal_one_index: 1,
                aminal_two_index: 2,
                total_love: 100,
            }),
        ),
        at(
            d.auction,
            5,
            EventPayload::GeneProposed(GeneProposed {
                auction_id: 1,
                category: 2,
                gene_id: 9,
                proposer: Address::from_low_u64(0x0c),
            }),
        ),
        at(
            d.auction,
            6,
            EventPayload::Voted(Voted {
                auction_id: 1,
                category: 2,
                gene_id: 9,
                voter: Address::from_low_u64(0x0a),
            }),
        ),
        at(
            d.auction,
            7,
            EventPayload::BulkVoted(BulkVoted {
                auction_id: 1,
                voter: Address::from_low_u64(0x0b),
                gene_ids: winners,
            }),
        ),
        // Dropped: no such proposal.
        at(
            d.auction,
            8,
            EventPayload::Voted(Voted {
                auction_id: 1,
                category: 5,
                gene_id: 44,
                voter: Address::from_low_u64(0x0a),
            }),
        ),
        at(
            d.auction,
            9,
            EventPayload::VotingSettled(VotingSettled {
                auction_id: 1,
                winner_ids: winners,
            }),
        ),
        at(
            d.auction,
            10,
            EventPayload::GeneCreatorPaid(GeneCreatorPaid {
                auction_id: 1,
                gene_id: 9,
                creator: Address::from_low_u64(0x0c),
                amount: 1_000,
            }),
        ),
        spawn(11, 3, 1),
        at(
            Address::from_low_u64(0x1003),
            12,
            EventPayload::Fed(Fed {
                sender: Address::from_low_u64(0x0a),
                amount: 50,
                love: 5,
                energy: 40,
            }),
        ),
        at(
            Address::from_low_u64(0x1003),
            13,
            EventPayload::Squeaked(Squeaked {
                sender: Address::from_low_u64(0x0a),
                energy_lost: 15,
            }),
        ),
    ]
}

// ---------------------------------------------------------------------------
// 1. Resuming from a snapshot
// ---------------------------------------------------------------------------

#[test]
fn resumed_run_matches_uninterrupted_run() {
    let events = stream();
    let config = IndexerConfig::new(deployment());

    let mut full = Indexer::new(config.clone(), live_reader());
    full.process_all(&events);
    assert_eq!(full.stats().events_dropped, 1);

    let (first, rest) = events.split_at(6);
    let mut before = Indexer::new(config.clone(), live_reader());
    before.process_all(first);
    let saved = serde_json::to_string(&before.capture_snapshot().unwrap()).unwrap();

    let mut resumed = Indexer::new(config, live_reader());
    let snapshot: IndexerSnapshot = serde_json::from_str(&saved).unwrap();
    resumed.restore_from_snapshot(&snapshot).unwrap();
    resumed.process_all(rest);

    assert_eq!(resumed.state_hash().unwrap(), full.state_hash().unwrap());
    assert_eq!(resumed.stats(), full.stats());
}

#[test]
fn tampered_snapshot_is_refused() {
    let mut indexer = Indexer::new(IndexerConfig::new(deployment()), live_reader());
    indexer.process_all(&stream());
    let mut snapshot = indexer.capture_snapshot().unwrap();
    snapshot.store.records.pop();

    let mut target = Indexer::new(IndexerConfig::new(deployment()), live_reader());
    let err = target.restore_from_snapshot(&snapshot).unwrap_err();
    assert!(matches!(err, SnapshotError::HashMismatch { .. }));
    assert!(target.store().is_empty());
}

// ---------------------------------------------------------------------------
// 2. Record and replay
// ---------------------------------------------------------------------------

fn record(events: &[ChainEvent]) -> ReplayLog {
    let live = TimeoutChainReader::new(live_reader(), Duration::from_secs(5));
    let mut indexer = Indexer::new(
        IndexerConfig::new(deployment()),
        RecordingChainReader::new(live),
    );
    let mut recorder = ReplayRecorder::new(indexer.capture_snapshot().unwrap(), 4);
    for event in events {
        indexer.process(event);
        let reads = indexer.reader().take_recorded();
        recorder.record_event(event, reads, Some(indexer.state_hash().unwrap()));
    }
    assert_eq!(recorder.events_recorded(), events.len() as u64);
    recorder.finish(indexer.state_hash().unwrap())
}

#[test]
fn recorded_run_replays_without_divergence() {
    let log = record(&stream());
    let result = replay(&log, IndexerConfig::new(deployment())).unwrap();
    assert!(result.is_faithful(), "{result:?}");
    assert_eq!(result.events_replayed, 13);
}

#[test]
fn replay_detects_a_reordered_stream() {
    let mut log = record(&stream());

    // Swap the two votes while keeping their sequence numbers in place.
    let positions: Vec<usize> = log
        .entries
        .iter()
        .enumerate()
        .filter_map(|(i, e)| match e {
            ReplayEntry::Event { sequence: 6 | 7, .. } => Some(i),
            _ => None,
        })
        .collect();
    let (a, b) = (positions[0], positions[1]);
    let (event_a, reads_a) = match &log.entries[a] {
        ReplayEntry::Event { event, reads, .. } => (event.clone(), reads.clone()),
        ReplayEntry::Checkpoint { .. } => unreachable!(),
    };
    let (event_b, reads_b) = match &log.entries[b] {
        ReplayEntry::Event { event, reads, .. } => (event.clone(), reads.clone()),
        ReplayEntry::Checkpoint { .. } => unreachable!(),
    };
    log.entries[a] = ReplayEntry::Event {
        sequence: 6,
        event: event_b,
        reads: reads_b,
    };
    log.entries[b] = ReplayEntry::Event {
        sequence: 7,
        event: event_a,
        reads: reads_a,
    };

    let result = replay(&log, IndexerConfig::new(deployment())).unwrap();
    let divergence = result.first_divergence.expect("reordering should diverge");
    // The first checkpoint after the swap is at event 8.
    assert_eq!(divergence.sequence, 8);
    assert!(!result.completed);
}

#[test]
fn replay_needs_no_live_chain() {
    let log = record(&stream());
    let json = serde_json::to_string_pretty(&log).unwrap();
    let log: ReplayLog = serde_json::from_str(&json).unwrap();

    // Creature resolution answers are carried in the log.
    let opened = log.entries.iter().find_map(|e| match e {
        ReplayEntry::Event { sequence: 4, reads, .. } => Some(reads.clone()),
        _ => None,
    });
    let reads = opened.unwrap();
    assert_eq!(
        reads.resolve_creature_address(1).unwrap(),
        Address::from_low_u64(0x1001)
    );

    assert!(replay(&log, IndexerConfig::new(deployment()))
        .unwrap()
        .is_faithful());
}
