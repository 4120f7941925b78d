//! Session
//!
//! A thin sequencer over group states. Handshake messages travel as
//! marshaled bytes; the session keeps one state per epoch and caches its
//! own pending operation so the next state survives the round-trip of the
//! sender's message through the broadcast channel.

use std::collections::HashMap;

use crate::crypto::{CipherSuite, Rng};
use crate::error::{MlsError, MlsResult};
use crate::group::GroupState;
use crate::messages::{ClientInitKey, MLSCiphertext, MLSPlaintext, Welcome};
use crate::tree_math::LeafIndex;

/// One member's connection to a group
#[derive(Debug)]
pub struct Session {
    states: HashMap<u32, GroupState>,
    current_epoch: u32,
    outbound_cache: Option<(Vec<u8>, GroupState)>,
    rng: Rng,
}

impl Session {
    /// Create a group with a peer: negotiate a suite, produce the Welcome
    /// and the marshaled Add for the peer
    pub fn start(
        group_id: &[u8],
        my_cik: &ClientInitKey,
        their_cik: &ClientInitKey,
        rng: Rng,
    ) -> MlsResult<(Session, Welcome, Vec<u8>)> {
        let (welcome, add, state) = GroupState::negotiate(group_id, my_cik, their_cik, &rng)?;
        let add_bytes = add.marshal();
        let mut session = Session {
            states: HashMap::new(),
            current_epoch: 0,
            outbound_cache: None,
            rng,
        };
        session.add_state(0, state);
        Ok((session, welcome, add_bytes))
    }

    /// Join a group from a Welcome and the matching marshaled Add
    pub fn join(
        my_cik: &ClientInitKey,
        welcome: &Welcome,
        add_bytes: &[u8],
        rng: Rng,
    ) -> MlsResult<Session> {
        let add = MLSPlaintext::unmarshal(add_bytes, welcome.cipher_suite)?;
        let state = GroupState::from_welcome(my_cik, welcome, &add)?;
        let mut session = Session {
            states: HashMap::new(),
            current_epoch: 0,
            outbound_cache: None,
            rng,
        };
        session.add_state(add.epoch, state);
        Ok(session)
    }

    pub fn current_epoch(&self) -> u32 {
        self.current_epoch
    }

    pub fn cipher_suite(&self) -> MlsResult<CipherSuite> {
        Ok(self.current_state()?.cipher_suite())
    }

    pub fn index(&self) -> MlsResult<LeafIndex> {
        Ok(self.current_state()?.index())
    }

    /// Invite a member: returns the Welcome for the joiner and the Add for
    /// the group
    pub fn add(&mut self, cik: &ClientInitKey) -> MlsResult<(Welcome, Vec<u8>)> {
        let (welcome, add, next) = self.current_state()?.add(cik, &self.rng)?;
        let add_bytes = add.marshal();
        self.outbound_cache = Some((add_bytes.clone(), next));
        Ok((welcome, add_bytes))
    }

    /// Refresh our own leaf
    pub fn update(&mut self, leaf_secret: &[u8]) -> MlsResult<Vec<u8>> {
        let (update, next) = self.current_state()?.update(leaf_secret, &self.rng)?;
        let update_bytes = update.marshal();
        self.outbound_cache = Some((update_bytes.clone(), next));
        Ok(update_bytes)
    }

    /// Evict another member
    pub fn remove(&mut self, evict_secret: &[u8], index: LeafIndex) -> MlsResult<Vec<u8>> {
        let (remove, next) = self.current_state()?.remove(evict_secret, index, &self.rng)?;
        let remove_bytes = remove.marshal();
        self.outbound_cache = Some((remove_bytes.clone(), next));
        Ok(remove_bytes)
    }

    /// Process a broadcast handshake message, our own included
    pub fn handle(&mut self, message: &[u8]) -> MlsResult<()> {
        let current = self.current_state()?;
        let suite = current.cipher_suite();
        let handshake = MLSPlaintext::unmarshal(message, suite)?;

        if handshake.sender == current.index() {
            let Some((cached_bytes, cached_state)) = self.outbound_cache.take() else {
                return Err(MlsError::ProtocolError(
                    "received own message without having sent one".into(),
                ));
            };
            if cached_bytes != message {
                self.outbound_cache = Some((cached_bytes, cached_state));
                return Err(MlsError::ProtocolError(
                    "received a different message than was sent".into(),
                ));
            }
            self.add_state(handshake.epoch, cached_state);
            return Ok(());
        }

        let next = current.handle(&handshake)?;
        self.add_state(handshake.epoch, next);
        Ok(())
    }

    /// Encrypt application data to the group
    pub fn protect(&mut self, plaintext: &[u8]) -> MlsResult<MLSCiphertext> {
        let epoch = self.current_epoch;
        let state = self
            .states
            .get_mut(&epoch)
            .ok_or_else(|| MlsError::MissingState("no state for current epoch".into()))?;
        state.protect(plaintext, &self.rng)
    }

    /// Decrypt application data from the group
    pub fn unprotect(&mut self, ciphertext: &MLSCiphertext) -> MlsResult<Vec<u8>> {
        let state = self
            .states
            .get_mut(&ciphertext.epoch)
            .ok_or_else(|| {
                MlsError::MissingState(format!("no state for epoch {}", ciphertext.epoch))
            })?;
        state.unprotect(ciphertext)
    }

    pub fn current_state(&self) -> MlsResult<&GroupState> {
        self.states
            .get(&self.current_epoch)
            .ok_or_else(|| MlsError::MissingState("no state for current epoch".into()))
    }

    fn add_state(&mut self, prior_epoch: u32, state: GroupState) {
        let epoch = state.epoch();
        self.states.insert(epoch, state);

        // the first successor of the head moves the head
        if prior_epoch == self.current_epoch || self.states.len() == 1 {
            self.current_epoch = epoch;
        }
    }
}

// Sessions agree when their overlapping epochs agree
impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        if self.current_epoch != other.current_epoch {
            return false;
        }
        self.states.iter().all(|(epoch, state)| {
            other
                .states
                .get(epoch)
                .map(|theirs| theirs == state)
                .unwrap_or(true)
        })
    }
}
