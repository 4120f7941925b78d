//! Security property tests
//!
//! Convergence, forward secrecy within and across epochs, post-compromise
//! recovery through updates, and exclusion of removed members.

use mls_proto::credential::Credential;
use mls_proto::crypto::{CipherSuite, DhPrivateKey, Rng, SignaturePrivateKey, SignatureScheme};
use mls_proto::group::GroupState;
use mls_proto::messages::ClientInitKey;
use mls_proto::MlsError;

const SUITE: CipherSuite = CipherSuite::X25519Sha256Aes128Gcm;
const GROUP_ID: [u8; 4] = [0, 1, 2, 3];

struct Member {
    cik: ClientInitKey,
    init_priv: DhPrivateKey,
}

fn member(seed: &[u8]) -> Member {
    let sig = SignaturePrivateKey::derive(SignatureScheme::Ed25519, seed).unwrap();
    let credential = Credential::basic_with_key(seed, sig);
    let init_priv = DhPrivateKey::derive(SUITE, seed).unwrap();
    let cik =
        ClientInitKey::from_private_keys(&[1], vec![init_priv.clone()], &credential).unwrap();
    Member { cik, init_priv }
}

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
    }
    states
}

#[test]
fn test_epoch_secrets_converge() {
    let rng = Rng::from_seed([51; 32]);
    let states = build_group(&rng, 4);
    for state in &states {
        assert_eq!(state.epoch_secret(), states[0].epoch_secret());
        assert_eq!(state.init_secret(), states[0].init_secret());
    }
}

#[test]
fn test_secrets_rotate_every_epoch() {
    let rng = Rng::from_seed([52; 32]);
    let mut states = build_group(&rng, 3);

    let mut seen_secrets = vec![states[0].epoch_secret().to_vec()];
    for i in 0..3 {
        let leaf_secret = rng.random_vec(32).unwrap();
        let (message, next) = states[i].update(&leaf_secret, &rng).unwrap();
        for (j, state) in states.iter_mut().enumerate() {
            if j == i {
                *state = next.clone();
            } else {
                *state = state.handle(&message).unwrap();
            }
        }
        let fresh = states[0].epoch_secret().to_vec();
        assert!(!seen_secrets.contains(&fresh));
        seen_secrets.push(fresh);
    }
}

#[test]
fn test_forward_secrecy_within_epoch() {
    let rng = Rng::from_seed([53; 32]);
    let mut states = build_group(&rng, 2);

    let first = states[0].protect(b"first", &rng).unwrap();
    let second = states[0].protect(b"second", &rng).unwrap();

    // delivery in order, then replay: the consumed generation is gone
    let receiver = &mut states[1];
    assert_eq!(receiver.unprotect(&first).unwrap(), b"first");
    assert_eq!(receiver.unprotect(&second).unwrap(), b"second");
    assert!(matches!(
        receiver.unprotect(&first),
        Err(MlsError::MissingState(_))
    ));
}

#[test]
fn test_removed_member_is_locked_out() {
    let rng = Rng::from_seed([54; 32]);
    let mut states = build_group(&rng, 3);

    let evict_secret = rng.random_vec(32).unwrap();
    let (message, next) = states[0].remove(&evict_secret, 2, &rng).unwrap();

    let mut evicted = states.pop().unwrap();
    states[0] = next;
    states[1] = states[1].handle(&message).unwrap();
    assert_eq!(states[0], states[1]);

    // the evicted member can follow neither the handshake...
    assert!(evicted.handle(&message).is_err());

    // ...nor subsequent traffic, which is keyed to the next epoch
    let encrypted = states[0].protect(b"after eviction", &rng).unwrap();
    assert!(matches!(
        evicted.unprotect(&encrypted),
        Err(MlsError::MissingState(_))
    ));
}

#[test]
fn test_update_heals_a_compromised_leaf() {
    let rng = Rng::from_seed([55; 32]);
    let mut states = build_group(&rng, 3);

    // snapshot of everything member 1 held before rotating
    let before = states[1].clone();

    let leaf_secret = rng.random_vec(32).unwrap();
    let (message, next) = states[1].update(&leaf_secret, &rng).unwrap();
    for (j, state) in states.iter_mut().enumerate() {
        if j == 1 {
            *state = next.clone();
        } else {
            *state = state.handle(&message).unwrap();
        }
    }

    // the old snapshot shares nothing with the new epoch
    assert_ne!(before.epoch_secret(), states[1].epoch_secret());
    assert_ne!(before.application_secret(), states[1].application_secret());
    assert_ne!(before.init_secret(), states[1].init_secret());
}

#[test]
fn test_epoch_derivation_is_pure() {
    let secrets_a = GroupState::derive_epoch_secrets(SUITE, &[0; 32], &[9; 32], b"group context");
    let secrets_b = GroupState::derive_epoch_secrets(SUITE, &[0; 32], &[9; 32], b"group context");
    assert_eq!(secrets_a, secrets_b);

    let secrets_c = GroupState::derive_epoch_secrets(SUITE, &[1; 32], &[9; 32], b"group context");
    assert_ne!(secrets_a, secrets_c);
}

#[test]
fn test_failed_handle_leaves_state_usable() {
    let rng = Rng::from_seed([56; 32]);
    let mut states = build_group(&rng, 3);

    let leaf_secret = rng.random_vec(32).unwrap();
    let (message, next) = states[1].update(&leaf_secret, &rng).unwrap();

    // a tampered copy is rejected...
    let mut tampered = message.clone();
    tampered.signature[0] ^= 1;
    assert!(states[0].handle(&tampered).is_err());

    // ...and the untouched state still accepts the real one
    states[0] = states[0].handle(&message).unwrap();
    states[1] = next;
    assert_eq!(states[0], states[1]);
}
