//! Group state machine scenarios
//!
//! End-to-end walks over the handshake state machine: after every
//! operation all honest members' shared state must match exactly.

use mls_proto::credential::Credential;
use mls_proto::crypto::{CipherSuite, DhPrivateKey, Rng, SignaturePrivateKey, SignatureScheme};
use mls_proto::group::GroupState;
use mls_proto::messages::ClientInitKey;

const SUITE: CipherSuite = CipherSuite::P256Sha256Aes128Gcm;
const SCHEME: SignatureScheme = SignatureScheme::P256Sha256;
const GROUP_ID: [u8; 4] = [0x00, 0x01, 0x02, 0x03];
const USER_ID: [u8; 4] = [4, 5, 6, 7];

struct Member {
    cik: ClientInitKey,
    init_priv: DhPrivateKey,
}

fn member(seed: &[u8]) -> Member {
    let sig = SignaturePrivateKey::derive(SCHEME, seed).unwrap();
    let credential = Credential::basic_with_key(&USER_ID, sig);
    let init_priv = DhPrivateKey::derive(SUITE, seed).unwrap();
    let cik =
        ClientInitKey::from_private_keys(&[8, 9, 0xA, 0xB], vec![init_priv.clone()], &credential)
            .unwrap();
    Member { cik, init_priv }
}

fn check_all_equal(states: &[GroupState]) {
    for state in states {
        assert_eq!(state, &states[0]);
        assert_eq!(state.epoch_secret(), states[0].epoch_secret());
        assert_eq!(state.application_secret(), states[0].application_secret());
        assert_eq!(state.confirmation_key(), states[0].confirmation_key());
        assert_eq!(state.init_secret(), states[0].init_secret());
    }
}

fn check_everyone_can_send(states: &mut [GroupState], rng: &Rng) {
    let message = [0u8, 1, 2, 3];
    for sender in 0..states.len() {
        let encrypted = states[sender].protect(&message, rng).unwrap();
        for (receiver, state) in states.iter_mut().enumerate() {
            if receiver != sender {
                assert_eq!(state.unprotect(&encrypted).unwrap(), message);
            }
        }
    }
}

/// Group of five built by the creator inviting everyone
fn build_group(rng: &Rng, size: usize) -> Vec<GroupState> {
    let members: Vec<Member> = (0..size)
        .map(|i| member(format!("member-{i}").as_bytes()))
        .collect();
    let mut states = vec![GroupState::new(
        &GROUP_ID,
        SUITE,
        members[0].init_priv.clone(),
        members[0].cik.credential.clone(),
    )
    .unwrap()];

    for joiner in members.iter().skip(1) {
        let (welcome, add, next) = states[0].add(&joiner.cik, rng).unwrap();
        for (j, state) in states.iter_mut().enumerate() {
            if j == 0 {
                *state = next.clone();
            } else {
                *state = state.handle(&add).unwrap();
            }
        }
        states.push(GroupState::from_welcome(&joiner.cik, &welcome, &add).unwrap());
        check_all_equal(&states);
    }
    states
}

#[test]
fn test_two_person_scenario() {
    let rng = Rng::from_seed([101; 32]);
    let alice = member(b"alice");
    let bob = member(b"bob");

    let first = GroupState::new(
        &GROUP_ID,
        SUITE,
        alice.init_priv.clone(),
        alice.cik.credential.clone(),
    )
    .unwrap();

    let (welcome, add, mut first) = first.add(&bob.cik, &rng).unwrap();
    let mut second = GroupState::from_welcome(&bob.cik, &welcome, &add).unwrap();
    assert_eq!(first, second);

    let encrypted = first.protect(&[0x01, 0x02, 0x03, 0x04], &rng).unwrap();
    assert_eq!(second.unprotect(&encrypted).unwrap(), [0x01, 0x02, 0x03, 0x04]);

    let encrypted = second.protect(&[0x05], &rng).unwrap();
    assert_eq!(first.unprotect(&encrypted).unwrap(), [0x05]);
}

#[test]
fn test_growth_to_five() {
    let rng = Rng::from_seed([102; 32]);
    let mut states = build_group(&rng, 5);
    assert_eq!(states[0].epoch(), 4);
    assert_eq!(states[0].tree().leaf_count(), 5);
    check_everyone_can_send(&mut states, &rng);
}

#[test]
fn test_update_rotation_all_members() {
    let rng = Rng::from_seed([103; 32]);
    let mut states = build_group(&rng, 5);

    for i in 0..states.len() {
        let epoch_before = states[0].epoch();
        let secret_before = states[0].application_secret().to_vec();
        let leaf_secret = rng.random_vec(32).unwrap();
        let (message, next) = states[i].update(&leaf_secret, &rng).unwrap();

        for (j, state) in states.iter_mut().enumerate() {
            if j == i {
                *state = next.clone();
            } else {
                *state = state.handle(&message).unwrap();
            }
        }

        check_all_equal(&states);
        assert_eq!(states[0].epoch(), epoch_before + 1);
        assert_ne!(states[0].application_secret(), &secret_before[..]);
    }
    check_everyone_can_send(&mut states, &rng);
}

#[test]
fn test_remove_and_replace() {
    let rng = Rng::from_seed([104; 32]);
    let mut states = build_group(&rng, 5);

    // member 3 removes member 4; the tree keeps its span
    let evict_secret = rng.random_vec(32).unwrap();
    let (message, next) = states[3].remove(&evict_secret, 4, &rng).unwrap();
    assert_eq!(next.tree().leaf_count(), 5);

    states.pop();
    for (j, state) in states.iter_mut().enumerate() {
        if j == 3 {
            *state = next.clone();
        } else {
            *state = state.handle(&message).unwrap();
        }
    }
    check_all_equal(&states);

    // the next add lands in the blanked slot
    let replacement = member(b"replacement");
    let (welcome, add, next) = states[0].add(&replacement.cik, &rng).unwrap();
    for (j, state) in states.iter_mut().enumerate() {
        if j == 0 {
            *state = next.clone();
        } else {
            *state = state.handle(&add).unwrap();
        }
    }
    let joined = GroupState::from_welcome(&replacement.cik, &welcome, &add).unwrap();
    assert_eq!(joined.index(), 4);
    assert_eq!(joined.tree().leaf_count(), 5);
    states.push(joined);
    check_all_equal(&states);
    check_everyone_can_send(&mut states, &rng);
}

#[test]
fn test_private_key_invariant_held_by_every_member() {
    let rng = Rng::from_seed([105; 32]);
    let mut states = build_group(&rng, 4);

    // rotate everyone so no unmerged leaves remain
    for i in 0..states.len() {
        let leaf_secret = rng.random_vec(32).unwrap();
        let (message, next) = states[i].update(&leaf_secret, &rng).unwrap();
        for (j, state) in states.iter_mut().enumerate() {
            if j == i {
                *state = next.clone();
            } else {
                *state = state.handle(&message).unwrap();
            }
        }
    }

    for (i, state) in states.iter().enumerate() {
        assert!(state.tree().check_invariant(i as u32));
    }
}

#[test]
fn test_add_at_explicit_position() {
    let rng = Rng::from_seed([106; 32]);
    let states = build_group(&rng, 3);

    let newcomer = member(b"newcomer");
    let (_, add, next) = states[0].add_at(3, &newcomer.cik, &rng).unwrap();
    assert_eq!(next.tree().leaf_count(), 4);

    // placing onto an occupied leaf fails
    assert!(states[0].add_at(1, &newcomer.cik, &rng).is_err());
    // the broadcast message carries the chosen index
    let decoded = mls_proto::messages::MLSPlaintext::unmarshal(&add.marshal(), SUITE).unwrap();
    match decoded.operation().unwrap() {
        mls_proto::messages::GroupOperation::Add(add_op) => assert_eq!(add_op.index, 3),
        other => panic!("expected an Add, got {other:?}"),
    }
}
