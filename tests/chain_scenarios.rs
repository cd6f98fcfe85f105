//! End-to-end chain scenarios driven through the node facade.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use peg_core::alert::{AlertPayload, SignedAlert};
use peg_core::chain::ChainError;
use peg_core::config::{Network, NodeConfig};
use peg_core::crypto::PrivateKey;
use peg_core::node::{Node, NodeError, StatusPoller};
use peg_core::notify::{EventKind, NodeEvent};
use peg_core::peg::{PegProjection, PegVote, PegVotes};
use tokio::sync::watch;

#[test]
fn test_fresh_node_sits_at_genesis() {
    let params = regtest_params(10);
    let node = open_node(params.clone());
    let genesis = genesis_header(&params);

    assert_eq!(node.num_blocks(), 0);
    assert_eq!(node.best_block_hash(), genesis.hash());
    assert_eq!(node.peg_supply_index(), params.peg.initial_supply_index);
    assert_eq!(node.peg_votes(), PegVotes::default());
    assert_eq!(node.last_block_date(), params.genesis_timestamp);
    assert_eq!(node.peg_start_block_num(), params.peg.start_height);
}

#[test]
fn test_interval_vote_commits_then_reverts() {
    let params = regtest_params(100);
    let node = open_node(params.clone());

    let mut votes = nochange(40);
    votes.extend(vec![PegVote::Inflate; 60]);
    let blocks = mine_branch(&genesis_header(&params), 0, &votes, b"peg");
    submit_all(&node, &blocks);

    assert_eq!(node.num_blocks(), 100);
    assert_eq!(node.peg_votes().as_tuple(), (60, 0, 40));
    assert_eq!(node.peg_supply_index(), 0);
    assert_eq!(node.next_interval_peg_supply_index(), PegProjection::Committed(1));
    assert_eq!(
        node.next_next_interval_peg_supply_index(),
        PegProjection::Pending { provisional: 1 }
    );

    node.disconnect_to(&blocks[98].hash()).unwrap();
    assert_eq!(node.num_blocks(), 99);
    assert_eq!(node.peg_votes().as_tuple(), (59, 0, 40));
    assert_eq!(
        node.next_interval_peg_supply_index(),
        PegProjection::Pending { provisional: 1 }
    );

    assert_eq!(node.reconsider_best_tip().unwrap(), blocks[99].hash());
    assert_eq!(node.next_interval_peg_supply_index(), PegProjection::Committed(1));

    // The committed value takes effect when the next interval opens.
    let opener = mine(&blocks[99].header, 101, PegVote::Deflate, b"peg");
    node.submit_block(opener).unwrap();
    assert_eq!(node.peg_supply_index(), 1);
    assert_eq!(node.peg_votes().as_tuple(), (0, 1, 0));
}

#[test]
fn test_tied_interval_keeps_supply() {
    let params = regtest_params(10);
    let node = open_node(params.clone());

    let mut votes = vec![PegVote::Inflate; 5];
    votes.extend(vec![PegVote::Deflate; 5]);
    submit_all(&node, &mine_branch(&genesis_header(&params), 0, &votes, b"tie"));

    assert_eq!(node.next_interval_peg_supply_index(), PegProjection::Committed(0));
}

#[test]
fn test_reorg_across_interval_boundary_then_back_to_genesis() {
    let params = regtest_params(10);
    let node = open_node(params.clone());
    let genesis = genesis_header(&params);
    let initial = node.snapshot();

    // Heights 1..=10 vote inflate, so heights 11 and 12 run at supply 1.
    let mut votes = vec![PegVote::Inflate; 10];
    votes.extend(nochange(2));
    submit_all(&node, &mine_branch(&genesis, 0, &votes, b"inflate"));
    assert_eq!(node.num_blocks(), 12);
    assert_eq!(node.peg_supply_index(), 1);

    let flat = mine_branch(&genesis, 0, &nochange(13), b"flat");
    submit_all(&node, &flat);
    assert_eq!(node.best_block_hash(), flat[12].hash());
    assert_eq!(node.peg_supply_index(), 0);
    assert_eq!(node.peg_votes().as_tuple(), (0, 0, 3));

    node.disconnect_to(&genesis.hash()).unwrap();
    let mut rewound = node.snapshot();
    // The disconnected headers still count towards the best header.
    let flat_work = node.block_entry(&flat[12].hash()).unwrap().chain_work;
    assert_eq!(rewound.best_header_work, flat_work);
    rewound.best_header_work = initial.best_header_work;
    assert_eq!(rewound, initial);
    assert_eq!(node.peg_votes(), PegVotes::default());
}

#[test]
fn test_equal_work_forks_keep_first_seen() {
    let params = regtest_params(10);
    let node = open_node(params.clone());
    let genesis = genesis_header(&params);

    let first = mine_branch(&genesis, 0, &nochange(5), b"first");
    let second = mine_branch(&genesis, 0, &nochange(5), b"second");
    submit_all(&node, &first);
    for block in &second {
        let accepted = node.submit_block(block.clone()).unwrap();
        assert!(!accepted.on_active_chain);
    }
    assert_eq!(node.best_block_hash(), first[4].hash());

    // One more block on the second branch outweighs the first.
    let extra = mine(&second[4].header, 6, PegVote::NoChange, b"second");
    let accepted = node.submit_block(extra.clone()).unwrap();
    assert!(accepted.on_active_chain);
    assert_eq!(node.best_block_hash(), extra.hash());
    assert!(!node.is_on_active_chain(&first[0].hash()));
    assert_eq!(node.block_hash(1), Some(second[0].hash()));
}

#[test]
fn test_failed_reorg_leaves_tip_untouched() {
    let params = regtest_params(10);
    let genesis = genesis_header(&params);
    let main = mine_branch(&genesis, 0, &nochange(3), b"main");
    let fork = mine_branch(&genesis, 0, &vec![PegVote::Inflate; 4], b"fork");

    let node = open_node_with(params, Arc::new(RejectBlock(fork[1].hash())));
    submit_all(&node, &main);
    let before = node.snapshot();

    for block in &fork[..3] {
        node.submit_block(block.clone()).unwrap();
    }
    let result = node.submit_block(fork[3].clone());
    assert!(matches!(
        result,
        Err(NodeError::Chain(ChainError::ConsensusRejected { .. }))
    ));

    assert_eq!(node.snapshot(), before);
    assert!(node.is_on_active_chain(&main[2].hash()));
    assert!(!node.is_on_active_chain(&fork[0].hash()));
}

#[test]
fn test_peg_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let params = regtest_params(10);
    let config = NodeConfig {
        data_dir: Some(dir.path().to_path_buf()),
        ..config_for(params.clone())
    };
    let blocks = mine_branch(&genesis_header(&params), 0, &vec![PegVote::Inflate; 12], b"disk");

    let before = {
        let node = Node::open(&config).unwrap();
        submit_all(&node, &blocks);
        node.snapshot()
    };

    let node = Node::open(&config).unwrap();
    assert_eq!(node.snapshot(), before);
    assert_eq!(node.peg_supply_index(), 1);
    assert_eq!(node.num_blocks_at_startup(), 12);
}

#[test]
fn test_repeated_alert_notifies_once() {
    let key = PrivateKey::generate();
    let mut params = regtest_params(10);
    params.alert_keys = vec![key.public_key().to_hex()];
    let node = open_node(params);
    let mut alerts = node.bus().subscribe_to(&[EventKind::Alert]);

    let payload = AlertPayload {
        version: 1,
        expiration: u64::MAX,
        cancels: vec![],
        priority: 100,
        status_bar: "please upgrade".into(),
        comment: String::new(),
    };
    let signed = SignedAlert::sign(&payload, &key).unwrap();
    assert!(node.receive_alert(&signed).is_ok());
    assert!(node.receive_alert(&signed).is_err());

    assert!(matches!(
        alerts.try_recv().unwrap(),
        Some(NodeEvent::AlertChanged { priority: 100, .. })
    ));
    assert_eq!(alerts.try_recv().unwrap(), None);
    assert_eq!(node.status_bar_warnings(), "please upgrade");
}

#[tokio::test]
async fn test_poller_and_mutations_announce_each_height_once() {
    let params = regtest_params(10);
    let node = Arc::new(open_node(params.clone()));
    let mut heights = node.bus().subscribe_to(&[EventKind::BestHeight]);

    let (stop_tx, stop_rx) = watch::channel(false);
    let poller = StatusPoller::new(node.clone(), Duration::from_millis(1)).spawn(stop_rx);

    let blocks = mine_branch(&genesis_header(&params), 0, &nochange(8), b"poll");
    for block in blocks {
        node.submit_block(block).unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    stop_tx.send(true).unwrap();
    poller.await.unwrap();
    node.shutdown();

    let mut seen = Vec::new();
    while let Some(event) = heights.recv().await {
        if let NodeEvent::BestHeightChanged(height) = event {
            seen.push(height);
        }
    }
    assert_eq!(seen, (1..=8).collect::<Vec<u64>>());
}

#[test]
fn test_main_network_node_opens_in_memory() {
    let node = Node::open(&NodeConfig::for_network(Network::Main)).unwrap();
    assert_eq!(node.num_blocks(), 0);
    assert!(node.in_initial_block_download());
}
