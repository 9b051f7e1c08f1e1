//! End-to-end tests: event streams through the indexer, checked against the
//! materialized store.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use aminals_indexer::feed::read_event_log;
use aminals_indexer::prelude::*;
use serde_json::json;

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

const FACTORY: u64 = 0xf1;
const AUCTION: u64 = 0xa1;
const GENE_NFT: u64 = 0xe1;

const VOTER_X: u64 = 0x0a;
const VOTER_Y: u64 = 0x0b;

/// Background is the first trait slot.
const BACKGROUND: u32 = 0;

fn deployment() -> Deployment {
    Deployment {
        factory: Address::from_low_u64(FACTORY),
        auction: Address::from_low_u64(AUCTION),
        gene_nft: Address::from_low_u64(GENE_NFT),
    }
}

fn aminal_address(n: u64) -> Address {
    Address::from_low_u64(0x1000 + n)
}

/// Builds events with increasing transaction hashes and block numbers.
struct Stream {
    next: u64,
}

impl Stream {
    fn new() -> Self {
        Self { next: 1 }
    }

    fn emit(&mut self, contract: Address, payload: EventPayload) -> ChainEvent {
        let n = self.next;
        self.next += 1;
        ChainEvent {
            meta: EventMeta {
                contract,
                tx_hash: TxHash::from_low_u64(n),
                log_index: 0,
                block_number: 100 + n,
                block_timestamp: 1_700_000_000 + n * 12,
            },
            payload,
        }
    }

    fn factory(&mut self, payload: EventPayload) -> ChainEvent {
        self.emit(deployment().factory, payload)
    }

    fn auction(&mut self, payload: EventPayload) -> ChainEvent {
        self.emit(deployment().auction, payload)
    }

    fn spawn(&mut self, n: u64, auction_id: u64) -> ChainEvent {
        self.factory(EventPayload::AminalSpawned(AminalSpawned {
            aminal_id: n,
            aminal: aminal_address(n),
            mom: if auction_id == 0 { Address::ZERO } else { aminal_address(1) },
            dad: if auction_id == 0 { Address::ZERO } else { aminal_address(2) },
            auction_id,
            gene_ids: [0; 8],
        }))
    }

    fn open_auction(&mut self, auction_id: u64) -> ChainEvent {
        self.auction(EventPayload::VotingCreated(VotingCreated {
            auction_id,
            aminal_one_index: 1,
            aminal_two_index: 2,
            total_love: 100,
        }))
    }

    fn propose(&mut self, auction_id: u64, gene_id: u32, proposer: u64) -> ChainEvent {
        self.auction(EventPayload::GeneProposed(GeneProposed {
            auction_id,
            category: BACKGROUND,
            gene_id,
            proposer: Address::from_low_u64(proposer),
        }))
    }

    fn vote(&mut self, auction_id: u64, gene_id: u32, voter: u64) -> ChainEvent {
        self.auction(EventPayload::Voted(Voted {
            auction_id,
            category: BACKGROUND,
            gene_id,
            voter: Address::from_low_u64(voter),
        }))
    }
}

fn reader() -> StaticChainReader {
    StaticChainReader::new()
        .with_creature(1, aminal_address(1))
        .with_creature(2, aminal_address(2))
        .with_voting_weight(3, Address::from_low_u64(VOTER_X), 40)
        .with_voting_weight(3, Address::from_low_u64(VOTER_Y), 60)
        .with_rendered(aminal_address(1), "<svg id=\"1\"/>")
}

fn indexer() -> Indexer<StaticChainReader> {
    Indexer::new(IndexerConfig::new(deployment()), reader())
}

/// In-memory sink for a scoped fmt subscriber.
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Run `f` with a thread-local subscriber and return what it logged.
fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, Vec<String>) {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&buffer);
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || LogBuffer(Arc::clone(&sink)))
        .with_ansi(false)
        .without_time()
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    let out = tracing::subscriber::with_default(subscriber, f);
    let text = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
    (out, text.lines().map(str::to_owned).collect())
}

fn warnings<'l>(lines: &'l [String]) -> impl Iterator<Item = &'l String> {
    lines.iter().filter(|line| line.contains("WARN"))
}

fn proposal(indexer: &Indexer<StaticChainReader>, auction_id: u8, gene_id: u32) -> GeneProposal {
    indexer
        .store()
        .get::<GeneProposal>(&proposal_key(&auction_key(auction_id), BACKGROUND, gene_id))
        .expect("proposal should be indexed")
        .clone()
}

// ---------------------------------------------------------------------------
// 1. The auction lifecycle
// ---------------------------------------------------------------------------

#[test]
fn auction_three_from_opening_to_child() {
    let mut s = Stream::new();
    let mut indexer = indexer();

    indexer.process_all(&[
        s.spawn(1, 0),
        s.spawn(2, 0),
        s.open_auction(3),
        s.propose(3, 7, VOTER_X),
        s.vote(3, 7, VOTER_X),
        s.vote(3, 7, VOTER_X),
    ]);
    assert_eq!(indexer.stats().events_dropped, 0);

    // Revoting replaces the earlier vote.
    assert_eq!(proposal(&indexer, 3, 7).love_votes, 40);

    indexer.process(&s.auction(EventPayload::RemoveVoted(RemoveVoted {
        auction_id: 3,
        category: BACKGROUND,
        gene_id: 7,
        voter: Address::from_low_u64(VOTER_Y),
        weight: 10,
    })));
    let p = proposal(&indexer, 3, 7);
    assert_eq!(p.remove_votes, 10);
    assert_eq!(p.love_votes, 40);

    let mut winners = [0u32; 8];
    winners[BACKGROUND as usize] = 7;
    indexer.process(&s.auction(EventPayload::VotingSettled(VotingSettled {
        auction_id: 3,
        winner_ids: winners,
    })));
    let auction: GeneAuction = indexer.store().get(&auction_key(3)).cloned().unwrap();
    assert!(auction.finished);
    assert_eq!(auction.winner_ids[0], 7);
    assert!(auction.child.is_none());

    indexer.process(&s.spawn(9, 3));
    let child_key = address_key(&aminal_address(9));
    let auction: &GeneAuction = indexer.store().get(&auction_key(3)).unwrap();
    assert_eq!(auction.child, Some(child_key.clone()));

    let child: &Aminal = indexer.store().get(&child_key).unwrap();
    assert_eq!(child.auction, Some(auction_key(3)));
    assert_eq!(child.mom, Some(address_key(&aminal_address(1))));
    assert_eq!(child.dad, Some(address_key(&aminal_address(2))));

    // The vote log keeps every vote.
    assert_eq!(
        indexer
            .store()
            .referencing::<GeneVote>("proposal", &p.id)
            .len(),
        3
    );
    assert_eq!(
        indexer.recompute_vote_totals(&p.id),
        Some(VoteTotals {
            love_votes: 40,
            remove_votes: 10
        })
    );
}

#[test]
fn weights_are_tracked_per_voter() {
    let mut s = Stream::new();
    let mut indexer = indexer();
    indexer.process_all(&[
        s.spawn(1, 0),
        s.spawn(2, 0),
        s.open_auction(3),
        s.propose(3, 7, VOTER_X),
        s.vote(3, 7, VOTER_X),
        s.vote(3, 7, VOTER_Y),
        s.vote(3, 7, VOTER_X),
    ]);
    assert_eq!(proposal(&indexer, 3, 7).love_votes, 100);
}

// ---------------------------------------------------------------------------
// 2. Lineage
// ---------------------------------------------------------------------------

#[test]
fn genesis_spawn_touches_no_auction() {
    let mut s = Stream::new();
    let reader = reader().with_rendered(aminal_address(5), "<svg id=\"5\"/>");
    let mut indexer = Indexer::new(IndexerConfig::new(deployment()), reader);
    indexer.process_all(&[s.spawn(1, 0), s.spawn(2, 0), s.open_auction(3)]);

    let before = indexer.store().get::<GeneAuction>(&auction_key(3)).cloned();
    let (outcome, logs) = capture_logs(|| indexer.process(&s.spawn(5, 0)));
    assert!(outcome.is_applied());
    assert_eq!(indexer.store().get::<GeneAuction>(&auction_key(3)).cloned(), before);
    assert_eq!(warnings(&logs).count(), 0, "{logs:#?}");
}

#[test]
fn unknown_auction_leaves_graph_unchanged() {
    let mut s = Stream::new();
    let mut indexer = indexer();
    indexer.process_all(&[s.spawn(1, 0), s.spawn(2, 0)]);

    let (outcome, logs) = capture_logs(|| indexer.process(&s.spawn(3, 44)));
    assert!(outcome.is_applied());
    assert_eq!(indexer.store().count(EntityKind::GeneAuction), 0);
    let child: &Aminal = indexer.store().get(&address_key(&aminal_address(3))).unwrap();
    assert!(child.auction.is_none());

    let unknown: Vec<_> = warnings(&logs)
        .filter(|line| line.contains("unknown auction"))
        .collect();
    assert_eq!(unknown.len(), 1, "{logs:#?}");
    assert!(unknown[0].contains("auction_id=44"));
}

#[test]
fn spawn_with_unindexed_parent_is_dropped() {
    let mut s = Stream::new();
    let mut indexer = indexer();
    indexer.process(&s.spawn(1, 0));

    // Dad (creature 2) was never spawned.
    let outcome = indexer.process(&s.spawn(9, 3));
    assert!(matches!(
        outcome,
        EventOutcome::Dropped(HandlerError::MissingEntity {
            kind: EntityKind::Aminal,
            ..
        })
    ));
    assert!(!indexer
        .store()
        .contains::<Aminal>(&address_key(&aminal_address(9))));
    let factory: &Factory = indexer
        .store()
        .get(&address_key(&deployment().factory))
        .unwrap();
    assert_eq!(factory.aminal_count, 1);
}

#[test]
fn out_of_range_auction_id_is_not_linked() {
    let mut s = Stream::new();
    let mut indexer = indexer();
    indexer.process_all(&[s.spawn(1, 0), s.spawn(2, 0)]);
    assert!(indexer.process(&s.spawn(3, 256)).is_applied());
    assert!(!indexer.process(&s.open_auction(256)).is_applied());
}

// ---------------------------------------------------------------------------
// 3. Bulk votes
// ---------------------------------------------------------------------------

#[test]
fn bulk_vote_repairs_missing_proposals() {
    let mut s = Stream::new();
    let mut indexer = indexer();
    indexer.process_all(&[s.spawn(1, 0), s.spawn(2, 0), s.open_auction(3)]);

    let mut gene_ids = [0u32; 8];
    gene_ids[0] = 7;
    gene_ids[4] = 12;
    let outcome = indexer.process(&s.auction(EventPayload::BulkVoted(BulkVoted {
        auction_id: 3,
        voter: Address::from_low_u64(VOTER_Y),
        gene_ids,
    })));
    // Two proposals, two votes and the voter.
    assert!(matches!(outcome, EventOutcome::Applied { writes: 5 }));

    let p = proposal(&indexer, 3, 7);
    assert!(p.auto_created);
    assert_eq!(p.proposer, address_key(&Address::from_low_u64(VOTER_Y)));
    assert_eq!(p.love_votes, 60);

    let slot_four: &GeneProposal = indexer
        .store()
        .get(&proposal_key(&auction_key(3), 4, 12))
        .unwrap();
    assert_eq!(slot_four.category, 4);
    assert_eq!(slot_four.love_votes, 60);

    // The real proposal arrives late and keeps the totals.
    indexer.process(&s.propose(3, 7, VOTER_X));
    let p = proposal(&indexer, 3, 7);
    assert_eq!(p.proposer, address_key(&Address::from_low_u64(VOTER_X)));
    assert_eq!(p.love_votes, 60);
}

#[test]
fn bulk_vote_repair_warns_once_per_synthesized_proposal() {
    let mut s = Stream::new();
    let mut indexer = indexer();
    indexer.process_all(&[
        s.spawn(1, 0),
        s.spawn(2, 0),
        s.open_auction(3),
        s.propose(3, 7, VOTER_X),
    ]);

    // Slot 0 is already proposed, slot 4 is not.
    let mut gene_ids = [0u32; 8];
    gene_ids[0] = 7;
    gene_ids[4] = 12;
    let bulk = s.auction(EventPayload::BulkVoted(BulkVoted {
        auction_id: 3,
        voter: Address::from_low_u64(VOTER_Y),
        gene_ids,
    }));
    let (outcome, logs) = capture_logs(|| indexer.process(&bulk));
    assert!(outcome.is_applied());

    let repairs: Vec<_> = warnings(&logs)
        .filter(|line| line.contains("unknown proposal"))
        .collect();
    assert_eq!(repairs.len(), 1, "{logs:#?}");
    assert!(repairs[0].contains("gene_id=12"));
    assert!(!proposal(&indexer, 3, 7).auto_created);
}

// ---------------------------------------------------------------------------
// 4. Integrity faults
// ---------------------------------------------------------------------------

#[test]
fn votes_for_unknown_proposals_are_dropped() {
    let mut s = Stream::new();
    let mut indexer = indexer();
    indexer.process_all(&[s.spawn(1, 0), s.spawn(2, 0), s.open_auction(3)]);
    let records = indexer.store().len();

    let outcome = indexer.process(&s.vote(3, 99, VOTER_X));
    assert!(matches!(
        outcome,
        EventOutcome::Dropped(HandlerError::MissingEntity {
            kind: EntityKind::GeneProposal,
            ..
        })
    ));
    let outcome = indexer.process(&s.propose(4, 7, VOTER_X));
    assert!(matches!(
        outcome,
        EventOutcome::Dropped(HandlerError::MissingEntity {
            kind: EntityKind::GeneAuction,
            ..
        })
    ));

    assert_eq!(indexer.store().len(), records);
    assert_eq!(indexer.stats().events_dropped, 2);

    // The stream continues after a dropped event.
    assert!(indexer.process(&s.propose(3, 7, VOTER_X)).is_applied());
}

#[test]
fn failed_handler_commits_nothing() {
    let mut s = Stream::new();
    let mut indexer = indexer();
    indexer.process_all(&[s.spawn(1, 0)]);
    let users = indexer.store().count(EntityKind::User);

    // Neither the sender nor the consent is recorded.
    let outcome = indexer.process(&s.emit(
        aminal_address(1),
        EventPayload::BreedingConsented(BreedingConsented {
            sender: Address::from_low_u64(0x77),
            partner: aminal_address(42),
        }),
    ));
    assert!(!outcome.is_applied());
    assert_eq!(indexer.store().count(EntityKind::User), users);
    assert_eq!(indexer.store().count(EntityKind::BreedingConsent), 0);
}

#[test]
fn creature_events_from_unknown_contracts_are_unroutable() {
    let mut s = Stream::new();
    let mut indexer = indexer();
    let outcome = indexer.process(&s.emit(
        aminal_address(5),
        EventPayload::Fed(Fed {
            sender: Address::from_low_u64(VOTER_X),
            amount: 10,
            love: 1,
            energy: 10,
        }),
    ));
    assert!(matches!(
        outcome,
        EventOutcome::Dropped(HandlerError::UnroutableSource { .. })
    ));
    assert_eq!(indexer.stats().events_unroutable, 1);
}

// ---------------------------------------------------------------------------
// 5. Redelivery
// ---------------------------------------------------------------------------

#[test]
fn redelivered_events_are_applied_once() {
    let mut s = Stream::new();
    let mut indexer = indexer();
    let events = vec![
        s.spawn(1, 0),
        s.spawn(2, 0),
        s.open_auction(3),
        s.propose(3, 7, VOTER_X),
        s.vote(3, 7, VOTER_X),
    ];
    indexer.process_all(&events);
    let hash = indexer.state_hash().unwrap();

    let stats = indexer.process_all(&events).clone();
    assert_eq!(stats.events_duplicate, 5);
    assert_eq!(stats.events_applied, 5);

    let factory: &Factory = indexer.store().get(&address_key(&deployment().factory)).unwrap();
    assert_eq!(factory.aminal_count, 2);
    assert_eq!(proposal(&indexer, 3, 7).love_votes, 40);

    // Duplicates only move the duplicate counter.
    let mut fresh = Indexer::new(IndexerConfig::new(deployment()), reader());
    fresh.process_all(&events);
    assert_eq!(
        indexer.capture_snapshot().unwrap().store,
        fresh.capture_snapshot().unwrap().store
    );
    assert_ne!(indexer.state_hash().unwrap(), hash);
}

// ---------------------------------------------------------------------------
// 6. Feed, journal and query
// ---------------------------------------------------------------------------

#[test]
fn events_from_ndjson_file() {
    let mut s = Stream::new();
    let events = vec![s.spawn(1, 0), s.spawn(2, 0), s.open_auction(3)];

    let mut file = tempfile::NamedTempFile::new().unwrap();
    for event in &events {
        writeln!(file, "{}", serde_json::to_string(event).unwrap()).unwrap();
    }
    file.flush().unwrap();

    let loaded = read_event_log(file.path()).unwrap();
    assert_eq!(loaded, events);

    let mut indexer = indexer();
    indexer.process_all(&loaded);
    assert_eq!(indexer.stats().events_applied, 3);
    assert_eq!(indexer.stats().last_block, Some(103));
}

#[test]
fn journal_tracks_proposal_history() {
    let mut s = Stream::new();
    let mut indexer = indexer();
    indexer.process_all(&[
        s.spawn(1, 0),
        s.spawn(2, 0),
        s.open_auction(3),
        s.propose(3, 7, VOTER_X),
        s.vote(3, 7, VOTER_X),
        s.vote(3, 7, VOTER_Y),
    ]);

    let key = proposal_key(&auction_key(3), BACKGROUND, 7);
    let journal = indexer.journal().unwrap();
    let history: Vec<_> = journal.history(EntityKind::GeneProposal, &key).collect();
    assert_eq!(history.len(), 3);
    assert!(history[0].is_create());
    assert_eq!(history[0].handler, HandlerId::Auction);
    assert_eq!(history[2].handler, HandlerId::Vote);
    assert_eq!(history[2].new_value["loveVotes"], json!("100"));
}

#[test]
fn proposals_are_queryable_by_auction() {
    let mut s = Stream::new();
    let mut indexer = indexer();
    indexer.process_all(&[
        s.spawn(1, 0),
        s.spawn(2, 0),
        s.open_auction(3),
        s.propose(3, 7, VOTER_X),
        s.propose(3, 2, VOTER_Y),
        s.propose(3, 5, VOTER_X),
    ]);

    let query = Query::new(EntityKind::GeneProposal)
        .referencing("auction", auction_key(3))
        .order_by("geneId", OrderDirection::Desc)
        .first(2);
    let rows = indexer.store().query(&query).unwrap();
    let genes: Vec<u64> = rows.iter().map(|r| r["geneId"].as_u64().unwrap()).collect();
    assert_eq!(genes, vec![7, 5]);
}
