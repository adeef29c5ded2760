//! Coordinator scenarios driven through the public API with a manual clock.

use super::*;
use crate::domain::{
    select_member_for_recovery, BatchedSigShares, LazySignature, RecoveredSig, SessionAnnounce,
    SharesInventory, SigShare,
};
use crate::test_utils::{
    recovered_signature, share_signature, test_quorum, valid_share, ManualClock, MockNetwork,
    MockQuorumManager, TEST_LLMQ_TYPE, TEST_QUORUM_HASH,
};
use std::sync::atomic::{AtomicUsize, Ordering};

const T0: u64 = 1_000_000;

type TestManager = SigSharesManager<MockQuorumManager, MockNetwork, ManualClock>;

struct Harness {
    manager: Arc<TestManager>,
    quorums: Arc<MockQuorumManager>,
    network: Arc<MockNetwork>,
    clock: Arc<ManualClock>,
    quorum: Arc<Quorum>,
}

fn harness(size: usize, threshold: usize) -> Harness {
    harness_with_config(size, threshold, SigSharesConfig::default())
}

fn harness_with_config(size: usize, threshold: usize, config: SigSharesConfig) -> Harness {
    let quorums = Arc::new(MockQuorumManager::new());
    let quorum = quorums.add_quorum(test_quorum(size, threshold));
    let network = Arc::new(MockNetwork::new());
    let clock = Arc::new(ManualClock::new(T0));
    let manager = Arc::new(
        SigSharesManager::new(
            config,
            Arc::clone(&quorums),
            Arc::clone(&network),
            Arc::clone(&clock),
        )
        .unwrap(),
    );
    Harness {
        manager,
        quorums,
        network,
        clock,
        quorum,
    }
}

impl Harness {
    fn deliver(&self, peer: u64, message: SigSharesMessage) {
        assert!(self
            .manager
            .process_message(PeerId(peer), message.command(), &message.encode()));
    }

    fn run_at(&self, now_ms: u64) -> bool {
        self.clock.set(now_ms);
        self.manager.run_iteration()
    }

    fn count_listener(&self) -> Arc<AtomicUsize> {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        self.manager.register_listener(Arc::new(move |_sig: &RecoveredSig| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        calls
    }
}

fn sign_id(n: u8) -> SignId {
    SignId::new(TEST_LLMQ_TYPE, TEST_QUORUM_HASH, [n; 32], [n.wrapping_add(100); 32])
}

fn announce(session_id: u32, sign_id: SignId) -> SigSharesMessage {
    SigSharesMessage::SessionAnnouncements(vec![SessionAnnounce {
        session_id,
        sign_id,
    }])
}

fn inventory(session_id: u32, size: usize, members: &[u16]) -> SharesInventory {
    let mut inv = SharesInventory::new(session_id, size);
    for member in members {
        inv.set(*member, true);
    }
    inv
}

fn direct(sign_id: &SignId, members: &[u16]) -> SigSharesMessage {
    SigSharesMessage::SigShares(members.iter().map(|m| valid_share(sign_id, *m)).collect())
}

fn getsigs_targets(sent: &[(PeerId, SigSharesMessage)]) -> Vec<PeerId> {
    sent.iter()
        .filter(|(_, m)| matches!(m, SigSharesMessage::GetSigShares(_)))
        .map(|(peer, _)| *peer)
        .collect()
}

// ===== RECOVERY =====

#[test]
fn test_batched_flow_recovers_and_notifies_exactly_once() {
    let h = harness(5, 3);
    let calls = h.count_listener();
    let id = sign_id(1);
    let sign_hash = id.sign_hash();
    h.network.connect(PeerId(1));

    h.deliver(1, announce(7, id));
    h.deliver(1, SigSharesMessage::Inventories(vec![inventory(7, 5, &[0, 1, 2])]));
    assert!(h.run_at(T0));

    let sent = h.network.take_sent();
    let requested: Vec<u16> = sent
        .iter()
        .filter_map(|(_, m)| match m {
            SigSharesMessage::GetSigShares(invs) => Some(invs[0].iter_set().collect::<Vec<_>>()),
            _ => None,
        })
        .flatten()
        .collect();
    assert_eq!(requested, vec![0, 1, 2]);
    assert!(sent.iter().any(|(_, m)| matches!(
        m,
        SigSharesMessage::SessionAnnouncements(anns) if anns[0].session_id == 1
    )));

    let batch = BatchedSigShares {
        session_id: 7,
        sig_shares: (0..3u16)
            .map(|m| (m, share_signature(&sign_hash, m)))
            .collect(),
    };
    h.deliver(1, SigSharesMessage::BatchedSigShares(vec![batch]));
    h.run_at(T0 + 100);

    assert!(h.manager.is_recovered(&sign_hash));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.quorums.recover_calls(), 1);
    assert_eq!(h.manager.session_footprint(&sign_hash), 0);

    // Late traffic for the completed sign hash is ignored.
    h.deliver(1, direct(&id, &[3, 4]));
    h.deliver(1, announce(8, id));
    h.run_at(T0 + 200);
    h.run_at(T0 + 3_000);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.manager.session_footprint(&sign_hash), 0);
    assert!(!h.manager.is_peer_banned(PeerId(1)));
}

#[test]
fn test_listener_receives_recovered_signature() {
    let h = harness(5, 3);
    let id = sign_id(2);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let listener = h.manager.register_listener(Arc::new(move |sig: &RecoveredSig| {
        sink.lock().push(sig.clone());
    }));
    h.network.connect(PeerId(1));

    h.deliver(1, direct(&id, &[0, 2, 4]));
    h.run_at(T0);

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].sign_hash(), id.sign_hash());
    assert_eq!(seen[0].sig, recovered_signature(&id.sign_hash()));
    assert!(h.manager.unregister_listener(listener));
    assert!(!h.manager.unregister_listener(listener));
}

#[test]
fn test_recovery_armed_only_at_threshold() {
    let h = harness(5, 3);
    let id = sign_id(3);
    let sign_hash = id.sign_hash();
    h.network.connect(PeerId(1));
    h.quorums.fail_next_recoveries(1);

    h.deliver(1, direct(&id, &[0, 1]));
    h.run_at(T0);
    assert_eq!(h.manager.sig_share_count(&sign_hash), 2);
    assert!(h.manager.recovery_schedule(&sign_hash).is_none());
    assert_eq!(h.quorums.recover_calls(), 0);

    h.deliver(1, direct(&id, &[4]));
    h.run_at(T0 + 10);
    assert_eq!(h.quorums.recover_calls(), 1);
    let schedule = h.manager.recovery_schedule(&sign_hash).unwrap();
    assert!(schedule.ready);
    assert_eq!(schedule.attempt, 1);
    assert_eq!(schedule.next_attempt_ms, T0 + 10 + 2_000);

    // No second attempt inside the window.
    h.run_at(T0 + 2_009);
    assert_eq!(h.quorums.recover_calls(), 1);

    h.run_at(T0 + 2_010);
    assert_eq!(h.quorums.recover_calls(), 2);
    assert!(h.manager.is_recovered(&sign_hash));
}

#[test]
fn test_recovery_backoff_is_capped() {
    let h = harness(5, 3);
    let id = sign_id(4);
    let sign_hash = id.sign_hash();
    h.network.connect(PeerId(1));
    h.quorums.fail_next_recoveries(3);

    h.deliver(1, direct(&id, &[0, 1, 2]));
    h.run_at(T0);
    assert_eq!(
        h.manager.recovery_schedule(&sign_hash).unwrap().next_attempt_ms,
        T0 + 2_000
    );
    h.run_at(T0 + 2_000);
    assert_eq!(
        h.manager.recovery_schedule(&sign_hash).unwrap().next_attempt_ms,
        T0 + 6_000
    );
    h.run_at(T0 + 6_000);
    assert_eq!(
        h.manager.recovery_schedule(&sign_hash).unwrap().next_attempt_ms,
        T0 + 14_000
    );
    assert_eq!(h.quorums.recover_calls(), 3);

    h.run_at(T0 + 14_000);
    assert_eq!(h.quorums.recover_calls(), 4);
    assert!(h.manager.is_recovered(&sign_hash));
    assert_eq!(h.manager.metrics().recovery_attempts, 4);
    assert_eq!(h.manager.metrics().signatures_recovered, 1);
}

#[test]
fn test_handle_new_recovered_sig_purges_state() {
    let h = harness(5, 3);
    let calls = h.count_listener();
    let id = sign_id(5);
    let sign_hash = id.sign_hash();
    h.network.connect(PeerId(1));

    h.deliver(1, direct(&id, &[0, 1]));
    h.run_at(T0);
    assert_eq!(h.manager.sig_share_count(&sign_hash), 2);

    h.manager.handle_new_recovered_sig(&sign_hash);
    assert_eq!(h.manager.session_footprint(&sign_hash), 0);

    h.deliver(1, direct(&id, &[2]));
    h.run_at(T0 + 100);
    assert_eq!(h.manager.sig_share_count(&sign_hash), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.quorums.recover_calls(), 0);
}

// ===== LOCAL SIGNING =====

#[test]
fn test_request_signature_requires_membership() {
    let h = harness(5, 3);
    h.quorums.set_local_member(None);
    let err = h
        .manager
        .request_signature(Arc::clone(&h.quorum), [1; 32], [2; 32])
        .unwrap_err();
    assert!(matches!(err, SigSharesError::NotAMember(_)));
}

#[test]
fn test_request_signature_rejects_inactive_quorum() {
    let h = harness(5, 3);
    h.quorums.set_local_member(Some(0));
    h.quorums.deactivate(&h.quorum);
    let err = h
        .manager
        .request_signature(Arc::clone(&h.quorum), [1; 32], [2; 32])
        .unwrap_err();
    assert!(matches!(err, SigSharesError::UnknownQuorum(_)));
}

#[test]
fn test_request_signature_staged_by_coordinator() {
    let h = harness(5, 3);
    h.quorums.set_local_member(Some(2));
    let key = h
        .manager
        .request_signature(Arc::clone(&h.quorum), [1; 32], [2; 32])
        .unwrap();
    assert_eq!(key.1, 2);
    assert!(!h.manager.has_sig_share(&key));
    assert_eq!(h.manager.next_wakeup_delay(), Duration::ZERO);

    h.run_at(T0);
    assert!(h.manager.has_sig_share(&key));
    let schedule = h.manager.recovery_schedule(&key.0).unwrap();
    assert!(!schedule.ready);
    assert_eq!(schedule.attempt, 1);
    assert_eq!(schedule.next_attempt_ms, T0 + 2_000);
}

#[test]
fn test_request_signature_rejects_recovered_sign_hash() {
    let h = harness(5, 3);
    h.quorums.set_local_member(Some(0));
    let sign_hash = SignId::new(TEST_LLMQ_TYPE, TEST_QUORUM_HASH, [1; 32], [2; 32]).sign_hash();
    h.manager.handle_new_recovered_sig(&sign_hash);
    let err = h
        .manager
        .request_signature(Arc::clone(&h.quorum), [1; 32], [2; 32])
        .unwrap_err();
    assert!(matches!(err, SigSharesError::AlreadyRecovered(_)));
}

#[test]
fn test_recovered_before_signing_leaves_no_record() {
    let h = harness(5, 3);
    h.quorums.set_local_member(Some(0));
    let key = h
        .manager
        .request_signature(Arc::clone(&h.quorum), [1; 32], [2; 32])
        .unwrap();
    h.manager.handle_new_recovered_sig(&key.0);

    h.run_at(T0);
    assert!(!h.manager.has_sig_share(&key));
    assert!(h.manager.recovery_schedule(&key.0).is_none());
    assert_eq!(h.manager.session_footprint(&key.0), 0);
}

#[test]
fn test_request_signature_async_signs_on_iteration() {
    let h = harness(5, 3);
    h.quorums.set_local_member(Some(1));
    h.manager
        .request_signature_async(Arc::clone(&h.quorum), [3; 32], [4; 32]);
    assert_eq!(h.manager.next_wakeup_delay(), Duration::ZERO);

    let sign_hash = SignId::new(TEST_LLMQ_TYPE, TEST_QUORUM_HASH, [3; 32], [4; 32]).sign_hash();
    assert!(!h.manager.has_sig_share(&(sign_hash, 1)));
    assert!(h.run_at(T0));
    assert!(h.manager.has_sig_share(&(sign_hash, 1)));
}

#[test]
fn test_own_share_pushed_to_recovery_member() {
    let h = harness(5, 3);
    let (id, msg_hash) = ([6u8; 32], [7u8; 32]);
    let sign_hash = SignId::new(TEST_LLMQ_TYPE, TEST_QUORUM_HASH, id, msg_hash).sign_hash();
    let target = select_member_for_recovery(&h.quorum, &sign_hash, 0).unwrap();
    let local = (target + 1) % 5;
    h.quorums.set_local_member(Some(local));
    h.network
        .map_member(h.quorum.members[usize::from(target)].pro_tx_hash, PeerId(2));
    h.network.connect(PeerId(2));

    h.manager
        .request_signature(Arc::clone(&h.quorum), id, msg_hash)
        .unwrap();
    h.run_at(T0);

    let pushed: Vec<SigShare> = h
        .network
        .take_sent()
        .into_iter()
        .filter(|(peer, _)| *peer == PeerId(2))
        .filter_map(|(_, m)| match m {
            SigSharesMessage::SigShares(shares) => Some(shares),
            _ => None,
        })
        .flatten()
        .collect();
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].quorum_member, local);
    assert_eq!(pushed[0].sign_hash(), sign_hash);
}

#[test]
fn test_inventories_only_sent_to_quorum_peers() {
    let h = harness(5, 3);
    h.quorums.set_local_member(Some(0));
    h.network.connect(PeerId(1));
    h.network.connect(PeerId(2));
    h.network.set_quorum_peers(&h.quorum, &[PeerId(1), PeerId(3)]);
    let key = h
        .manager
        .request_signature(Arc::clone(&h.quorum), [8; 32], [9; 32])
        .unwrap();

    h.run_at(T0);
    let sent = h.network.take_sent();
    assert!(sent.contains(&(
        PeerId(1),
        SigSharesMessage::Inventories(vec![inventory(1, 5, &[0])])
    )));
    assert!(sent.iter().all(|(peer, _)| *peer == PeerId(1)));
    assert_eq!(h.manager.tracked_peer_count(), 1);
    assert!(h.manager.has_sig_share(&key));
}

#[test]
fn test_force_reannouncement_uses_fresh_session() {
    let h = harness(5, 3);
    h.quorums.set_local_member(Some(0));
    h.network.connect(PeerId(1));
    h.manager
        .request_signature(Arc::clone(&h.quorum), [8; 32], [9; 32])
        .unwrap();

    h.run_at(T0);
    let first = h.network.take_sent();
    assert!(first.contains(&(
        PeerId(1),
        SigSharesMessage::Inventories(vec![inventory(1, 5, &[0])])
    )));

    h.run_at(T0 + 100);
    assert!(h.network.take_sent().is_empty());

    h.manager
        .force_reannouncement(Arc::clone(&h.quorum), [8; 32], [9; 32]);
    h.run_at(T0 + 200);
    let again = h.network.take_sent();
    assert!(again.iter().any(|(peer, m)| *peer == PeerId(1)
        && matches!(m, SigSharesMessage::SessionAnnouncements(anns) if anns[0].session_id == 2)));
    assert!(again.contains(&(
        PeerId(1),
        SigSharesMessage::Inventories(vec![inventory(2, 5, &[0])])
    )));
}

// ===== REQUESTS =====

#[test]
fn test_get_sig_shares_answered_with_held_shares() {
    let h = harness(5, 3);
    let id = sign_id(10);
    let sign_hash = id.sign_hash();
    h.network.connect(PeerId(1));
    h.network.connect(PeerId(2));

    h.deliver(2, direct(&id, &[0, 1]));
    h.run_at(T0);
    h.network.take_sent();

    h.deliver(1, announce(7, id));
    h.deliver(1, SigSharesMessage::GetSigShares(vec![inventory(7, 5, &[0, 1, 4])]));
    h.run_at(T0 + 100);

    let batches: Vec<BatchedSigShares> = h
        .network
        .take_sent()
        .into_iter()
        .filter(|(peer, _)| *peer == PeerId(1))
        .filter_map(|(_, m)| match m {
            SigSharesMessage::BatchedSigShares(batches) => Some(batches),
            _ => None,
        })
        .flatten()
        .collect();
    assert_eq!(batches.len(), 1);
    let members: Vec<u16> = batches[0].sig_shares.iter().map(|(m, _)| *m).collect();
    assert_eq!(members, vec![0, 1]);
    assert_eq!(batches[0].sig_shares[0].1, share_signature(&sign_hash, 0));
    assert!(!h.manager.is_peer_banned(PeerId(1)));
}

#[test]
fn test_timed_out_request_goes_to_other_peer() {
    let h = harness(5, 3);
    let id = sign_id(11);
    for peer in [1, 2] {
        h.network.connect(PeerId(peer));
        h.deliver(peer, announce(7, id));
        h.deliver(peer, SigSharesMessage::Inventories(vec![inventory(7, 5, &[0])]));
    }

    h.run_at(T0);
    let first = getsigs_targets(&h.network.take_sent());
    assert_eq!(first.len(), 1);

    h.run_at(T0 + 1_000);
    assert!(getsigs_targets(&h.network.take_sent()).is_empty());

    h.run_at(T0 + 5_000);
    let second = getsigs_targets(&h.network.take_sent());
    assert_eq!(second.len(), 1);
    assert_ne!(first[0], second[0]);
}

#[test]
fn test_requests_capped_per_peer() {
    let config = SigSharesConfig::default().with_max_requests_per_peer(2);
    let h = harness_with_config(5, 3, config);
    let id = sign_id(12);
    h.network.connect(PeerId(1));
    h.deliver(1, announce(7, id));
    h.deliver(1, SigSharesMessage::Inventories(vec![inventory(7, 5, &[0, 1, 2, 3])]));
    h.run_at(T0);

    let requested: usize = h
        .network
        .take_sent()
        .iter()
        .filter_map(|(_, m)| match m {
            SigSharesMessage::GetSigShares(invs) => Some(invs.iter().map(|i| i.count_set()).sum::<usize>()),
            _ => None,
        })
        .sum();
    assert_eq!(requested, 2);
}

#[test]
fn test_direct_pushes_capped_per_tick() {
    let h = harness(5, 3);
    h.network.connect(PeerId(2));
    let shares: Vec<SigShare> = (0..40u8).map(|n| valid_share(&sign_id(n), 0)).collect();
    h.manager.state.lock().to_push.insert(PeerId(2), shares);

    let pushed_sizes = |sent: Vec<(PeerId, SigSharesMessage)>| -> Vec<usize> {
        sent.into_iter()
            .filter_map(|(_, m)| match m {
                SigSharesMessage::SigShares(shares) => Some(shares.len()),
                _ => None,
            })
            .collect()
    };
    h.run_at(T0);
    assert_eq!(pushed_sizes(h.network.take_sent()), vec![32]);
    h.run_at(T0 + 100);
    assert_eq!(pushed_sizes(h.network.take_sent()), vec![8]);
    assert!(h.manager.state.lock().to_push.is_empty());
}

// ===== PIPELINE =====

#[test]
fn test_same_share_from_two_peers_merged_once() {
    let h = harness(5, 3);
    let id = sign_id(14);
    for peer in [1, 2] {
        h.network.connect(PeerId(peer));
        h.deliver(peer, direct(&id, &[0]));
    }
    h.run_at(T0);

    assert_eq!(h.manager.sig_share_count(&id.sign_hash()), 1);
    assert_eq!(h.manager.metrics().shares_accepted, 1);
    assert!(!h.manager.is_peer_banned(PeerId(1)));
    assert!(!h.manager.is_peer_banned(PeerId(2)));
}

#[test]
fn test_announcement_flood_keeps_session_timers_bounded() {
    let config = SigSharesConfig::default().with_max_sessions_per_peer(2);
    let h = harness_with_config(5, 3, config);
    h.network.connect(PeerId(1));
    let announcements = (0..100u8)
        .map(|n| SessionAnnounce {
            session_id: u32::from(n) + 1,
            sign_id: sign_id(n),
        })
        .collect();
    h.deliver(1, SigSharesMessage::SessionAnnouncements(announcements));
    h.run_at(T0);

    assert!(!h.manager.is_peer_banned(PeerId(1)));
    assert_eq!(h.manager.state.lock().time_seen.len(), 2);
    let live = (0..100u8)
        .filter(|n| h.manager.session_footprint(&sign_id(*n).sign_hash()) > 0)
        .count();
    assert_eq!(live, 2);
}

// ===== PROTOCOL VIOLATIONS =====

#[test]
fn test_inventory_size_mismatch_bans_peer() {
    let h = harness(5, 3);
    h.network.connect(PeerId(1));
    h.deliver(1, announce(7, sign_id(20)));
    h.deliver(1, SigSharesMessage::Inventories(vec![inventory(7, 4, &[0])]));
    h.run_at(T0);

    assert!(h.manager.is_peer_banned(PeerId(1)));
    assert_eq!(h.network.misbehaving_reports(), vec![(PeerId(1), 100)]);

    h.run_at(T0 + 100);
    assert_eq!(h.network.disconnected(), vec![PeerId(1)]);
    assert_eq!(h.manager.tracked_peer_count(), 0);
}

#[test]
fn test_oversized_batch_bans_without_merging() {
    let h = harness(5, 3);
    let id = sign_id(21);
    let sign_hash = id.sign_hash();
    h.network.connect(PeerId(1));
    h.deliver(1, announce(7, id));

    let sig = share_signature(&sign_hash, 0);
    let batch = |members: std::ops::Range<u16>| BatchedSigShares {
        session_id: 7,
        sig_shares: members.map(|m| (m, sig.clone())).collect(),
    };
    h.deliver(
        1,
        SigSharesMessage::BatchedSigShares(vec![batch(0..200), batch(200..401)]),
    );
    h.run_at(T0);

    assert!(h.manager.is_peer_banned(PeerId(1)));
    assert_eq!(h.manager.sig_share_count(&sign_hash), 0);
    assert_eq!(h.manager.metrics().shares_received, 0);
}

#[test]
fn test_batch_for_unknown_session_bans_peer() {
    let h = harness(5, 3);
    h.network.connect(PeerId(1));
    let sig = share_signature(&sign_id(22).sign_hash(), 0);
    h.deliver(
        1,
        SigSharesMessage::BatchedSigShares(vec![BatchedSigShares {
            session_id: 42,
            sig_shares: vec![(0, sig)],
        }]),
    );
    h.run_at(T0);
    assert!(h.manager.is_peer_banned(PeerId(1)));
}

#[test]
fn test_duplicate_batched_member_bans_peer() {
    let h = harness(5, 3);
    let id = sign_id(23);
    let sig = share_signature(&id.sign_hash(), 1);
    h.network.connect(PeerId(1));
    h.deliver(1, announce(7, id));
    h.deliver(
        1,
        SigSharesMessage::BatchedSigShares(vec![BatchedSigShares {
            session_id: 7,
            sig_shares: vec![(1, sig.clone()), (1, sig)],
        }]),
    );
    h.run_at(T0);
    assert!(h.manager.is_peer_banned(PeerId(1)));
}

#[test]
fn test_invalid_share_bans_peer_and_discards_batch() {
    let h = harness(5, 3);
    let calls = h.count_listener();
    let id = sign_id(24);
    h.quorums.mark_invalid(2);
    h.network.connect(PeerId(1));

    h.deliver(1, direct(&id, &[0, 1, 2]));
    h.run_at(T0);

    assert!(h.manager.is_peer_banned(PeerId(1)));
    assert_eq!(h.manager.sig_share_count(&id.sign_hash()), 0);
    assert_eq!(h.manager.metrics().shares_invalid, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_null_signature_bans_peer() {
    let h = harness(5, 3);
    let id = sign_id(25);
    h.network.connect(PeerId(1));
    let share = SigShare::new(&id, 0, LazySignature::from_bytes(vec![0; 96]));
    h.deliver(1, SigSharesMessage::SigShares(vec![share]));
    h.run_at(T0);
    assert!(h.manager.is_peer_banned(PeerId(1)));
}

#[test]
fn test_undecodable_payload_bans_peer() {
    let h = harness(5, 3);
    assert!(h.manager.process_message(PeerId(3), "qsigsinv", &[0xff]));
    h.run_at(T0);
    assert!(h.manager.is_peer_banned(PeerId(3)));
    assert_eq!(h.manager.metrics().peers_banned, 1);
}

#[test]
fn test_messages_from_banned_peer_dropped() {
    let h = harness(5, 3);
    let id = sign_id(26);
    h.network.connect(PeerId(1));
    h.deliver(1, announce(u32::MAX, id));
    h.deliver(1, direct(&id, &[0]));
    h.run_at(T0);

    assert!(h.manager.is_peer_banned(PeerId(1)));
    assert_eq!(h.manager.sig_share_count(&id.sign_hash()), 0);
    assert_eq!(h.network.misbehaving_reports().len(), 1);
}

// ===== BENIGN MISMATCHES =====

#[test]
fn test_unknown_quorum_announcement_ignored() {
    let h = harness(5, 3);
    let foreign = SignId::new(TEST_LLMQ_TYPE, [0xaa; 32], [1; 32], [2; 32]);
    h.network.connect(PeerId(1));
    h.deliver(1, announce(7, foreign));
    h.run_at(T0);

    assert!(!h.manager.is_peer_banned(PeerId(1)));
    assert!(h.network.misbehaving_reports().is_empty());
    assert_eq!(h.manager.session_footprint(&foreign.sign_hash()), 0);
}

#[test]
fn test_inventory_for_unknown_session_ignored() {
    let h = harness(5, 3);
    h.network.connect(PeerId(1));
    h.deliver(1, SigSharesMessage::Inventories(vec![inventory(99, 5, &[0])]));
    h.run_at(T0);
    assert!(!h.manager.is_peer_banned(PeerId(1)));
}

#[test]
fn test_foreign_command_not_consumed() {
    let h = harness(5, 3);
    assert!(!h.manager.process_message(PeerId(1), "inv", &[]));
    assert!(!h.run_at(T0));
}

// ===== CLEANUP =====

#[test]
fn test_idle_session_purged_after_timeout() {
    let h = harness(5, 3);
    let id = sign_id(30);
    let sign_hash = id.sign_hash();
    h.network.connect(PeerId(1));
    h.deliver(1, announce(7, id));
    h.deliver(1, SigSharesMessage::Inventories(vec![inventory(7, 5, &[3])]));
    h.run_at(T0);
    assert!(h.manager.session_footprint(&sign_hash) > 0);

    h.run_at(T0 + 59_000);
    assert!(h.manager.session_footprint(&sign_hash) > 0);

    h.run_at(T0 + 61_000);
    assert_eq!(h.manager.session_footprint(&sign_hash), 0);
    assert_eq!(h.manager.metrics().sessions_timed_out, 1);
}

#[test]
fn test_inactive_quorum_sessions_dropped() {
    let h = harness(5, 3);
    let id = sign_id(31);
    h.network.connect(PeerId(1));
    h.deliver(1, direct(&id, &[0]));
    h.run_at(T0);
    assert_eq!(h.manager.sig_share_count(&id.sign_hash()), 1);

    h.quorums.deactivate(&h.quorum);
    h.run_at(T0 + 5_000);
    assert_eq!(h.manager.session_footprint(&id.sign_hash()), 0);
}

#[test]
fn test_disconnected_peer_state_dropped() {
    let h = harness(5, 3);
    h.network.connect(PeerId(1));
    h.deliver(1, announce(7, sign_id(32)));
    h.run_at(T0);
    assert_eq!(h.manager.tracked_peer_count(), 1);

    h.network.drop_peer(PeerId(1));
    h.run_at(T0 + 5_000);
    assert_eq!(h.manager.tracked_peer_count(), 0);
}

#[test]
fn test_wakeup_delay_tracks_recovery_deadline() {
    let h = harness(5, 3);
    let id = sign_id(33);
    h.network.connect(PeerId(1));
    h.quorums.fail_next_recoveries(1);
    h.deliver(1, direct(&id, &[0, 1, 2]));
    h.run_at(T0);

    h.clock.set(T0 + 1_950);
    assert_eq!(h.manager.next_wakeup_delay(), Duration::from_millis(50));
}

#[test]
fn test_invalid_config_rejected() {
    let quorums = Arc::new(MockQuorumManager::new());
    let network = Arc::new(MockNetwork::new());
    let clock = Arc::new(ManualClock::new(T0));
    let config = SigSharesConfig::default().with_recovery_delays_ms(5_000, 1_000);
    assert!(matches!(
        SigSharesManager::new(config, quorums, network, clock),
        Err(SigSharesError::Config(_))
    ));
}
