//! Epoch secret derivation and per-sender application key chains
//!
//! Each epoch's secrets are a pure function of the previous epoch's init
//! secret, the update secret surfaced by the ratchet tree, and the group
//! context binding the transcript. Within an epoch, every sender ratchets
//! its own application key chain forward, erasing consumed chain keys for
//! forward secrecy.

use std::collections::HashMap;
use std::fmt;

use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::crypto::{self, CipherSuite};
use crate::error::{MlsError, MlsResult};
use crate::tree_math::LeafIndex;

/// The derived secrets of one epoch, erased when superseded
#[derive(Clone)]
pub struct EpochSecrets {
    pub epoch_secret: Zeroizing<Vec<u8>>,
    pub application_secret: Zeroizing<Vec<u8>>,
    pub handshake_secret: Zeroizing<Vec<u8>>,
    pub sender_data_secret: Zeroizing<Vec<u8>>,
    pub confirmation_key: Zeroizing<Vec<u8>>,
    pub init_secret: Zeroizing<Vec<u8>>,
}

impl EpochSecrets {
    /// The all-zero secrets of a freshly created group
    pub fn initial(suite: CipherSuite) -> Self {
        let zero = Zeroizing::new(crypto::zero_bytes(suite.hash_len()));
        Self {
            epoch_secret: zero.clone(),
            application_secret: zero.clone(),
            handshake_secret: zero.clone(),
            sender_data_secret: zero.clone(),
            confirmation_key: zero.clone(),
            init_secret: zero,
        }
    }
}

impl fmt::Debug for EpochSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EpochSecrets").field("value", &"***").finish()
    }
}

impl PartialEq for EpochSecrets {
    fn eq(&self, other: &Self) -> bool {
        bool::from(
            self.epoch_secret.ct_eq(&other.epoch_secret)
                & self.application_secret.ct_eq(&other.application_secret)
                & self.handshake_secret.ct_eq(&other.handshake_secret)
                & self.sender_data_secret.ct_eq(&other.sender_data_secret)
                & self.confirmation_key.ct_eq(&other.confirmation_key)
                & self.init_secret.ct_eq(&other.init_secret),
        )
    }
}

/// Advance the key schedule by one epoch
///
/// ```text
/// epoch_secret       = HKDF-Extract(init_secret_prev, update_secret)
/// application_secret = Derive-Secret(epoch_secret, "app",     group_context)
/// confirmation_key   = Derive-Secret(epoch_secret, "confirm", group_context)
/// init_secret_next   = Derive-Secret(epoch_secret, "init",    group_context)
/// ```
pub fn derive_epoch_secrets(
    suite: CipherSuite,
    init_secret: &[u8],
    update_secret: &[u8],
    group_context: &[u8],
) -> EpochSecrets {
    let epoch_secret = crypto::hkdf_extract(suite, init_secret, update_secret);
    let derive = |label| {
        Zeroizing::new(crypto::derive_secret(
            suite,
            &epoch_secret,
            label,
            group_context,
        ))
    };
    EpochSecrets {
        application_secret: derive("app"),
        handshake_secret: derive("handshake"),
        sender_data_secret: derive("sender-data"),
        confirmation_key: derive("confirm"),
        init_secret: derive("init"),
        epoch_secret: Zeroizing::new(epoch_secret),
    }
}

/// One step of a sender's application key chain
pub struct KeyChainGeneration {
    pub generation: u32,
    pub key: Zeroizing<Vec<u8>>,
    pub nonce: Zeroizing<Vec<u8>>,
}

#[derive(Clone)]
struct ChainState {
    next_generation: u32,
    chain_key: Zeroizing<Vec<u8>>,
}

/// Per-sender application key chains for one epoch
///
/// `chain_key[i, 0]` is seeded from the application secret and the sender
/// index; every exposed generation replaces the chain key in place, so a
/// generation behind the chain head is gone for good.
#[derive(Clone)]
pub struct KeyChain {
    suite: CipherSuite,
    application_secret: Zeroizing<Vec<u8>>,
    chains: HashMap<LeafIndex, ChainState>,
}

impl fmt::Debug for KeyChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyChain")
            .field("suite", &self.suite)
            .field("chains", &self.chains.len())
            .finish()
    }
}

impl KeyChain {
    pub fn new(suite: CipherSuite, application_secret: &[u8]) -> Self {
        Self {
            suite,
            application_secret: Zeroizing::new(application_secret.to_vec()),
            chains: HashMap::new(),
        }
    }

    /// The key and nonce for a sender's given generation; consumed chain
    /// keys cannot be revisited
    pub fn get(&mut self, sender: LeafIndex, generation: u32) -> MlsResult<KeyChainGeneration> {
        let suite = self.suite;
        let chain = self.chains.entry(sender).or_insert_with(|| ChainState {
            next_generation: 0,
            chain_key: Zeroizing::new(crypto::derive_secret(
                suite,
                &self.application_secret,
                &format!("app-sender-{sender}"),
                &[],
            )),
        });

        if generation < chain.next_generation {
            return Err(MlsError::MissingState(format!(
                "application key generation {generation} already consumed"
            )));
        }

        while chain.next_generation < generation {
            chain.chain_key = Zeroizing::new(crypto::derive_secret(
                suite,
                &chain.chain_key,
                "app-step",
                &[],
            ));
            chain.next_generation += 1;
        }

        let key = Zeroizing::new(crypto::hkdf_expand_label(
            suite,
            &chain.chain_key,
            "app-key",
            &[],
            suite.key_len(),
        ));
        let nonce = Zeroizing::new(crypto::hkdf_expand_label(
            suite,
            &chain.chain_key,
            "app-nonce",
            &[],
            suite.nonce_len(),
        ));

        // step past the exposed generation, erasing its chain key
        chain.chain_key = Zeroizing::new(crypto::derive_secret(
            suite,
            &chain.chain_key,
            "app-step",
            &[],
        ));
        chain.next_generation = generation + 1;

        Ok(KeyChainGeneration {
            generation,
            key,
            nonce,
        })
    }

    /// The next unexposed generation for a sender
    pub fn next(&mut self, sender: LeafIndex) -> MlsResult<KeyChainGeneration> {
        let generation = self
            .chains
            .get(&sender)
            .map(|chain| chain.next_generation)
            .unwrap_or(0);
        self.get(sender, generation)
    }
}
