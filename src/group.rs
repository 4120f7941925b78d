//! Group state
//!
//! An epoch-indexed snapshot of one member's view: the ratchet tree, the
//! chained transcript hashes, and the epoch secrets. Every operation
//! produces a message plus a next state; handling a received operation
//! must land every honest member on byte-identical shared state.

use std::collections::BTreeSet;

use crate::codec::{self, Codec, Cursor, VecSize};
use crate::credential::Credential;
use crate::crypto::{self, CipherSuite, DhPrivateKey, Rng};
use crate::error::{MlsError, MlsResult};
use crate::key_schedule::{self, EpochSecrets, KeyChain};
use crate::messages::{
    frame_content, unframe_content, Add, ClientInitKey, ContentType, GroupOperation,
    MLSCiphertext, MLSPlaintext, Remove, SenderData, Update, Welcome, WelcomeInfo, MLS10_VERSION,
};
use crate::tree::RatchetTree;
use crate::tree_math::LeafIndex;

/// Zero padding boundary for protected application content
const PADDING_BLOCK: usize = 32;

// struct {
//   opaque group_id<0..255>;
//   uint32 epoch;
//   opaque tree_hash<0..255>;
//   opaque interim_transcript_hash<0..255>;
// } GroupContext;
struct GroupContext {
    group_id: Vec<u8>,
    epoch: u32,
    tree_hash: Vec<u8>,
    interim_transcript_hash: Vec<u8>,
}

impl GroupContext {
    fn marshal(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        codec::encode_vec_bytes(VecSize::VecU8, &mut buffer, &self.group_id);
        self.epoch.encode(&mut buffer);
        codec::encode_vec_bytes(VecSize::VecU8, &mut buffer, &self.tree_hash);
        codec::encode_vec_bytes(VecSize::VecU8, &mut buffer, &self.interim_transcript_hash);
        buffer
    }
}

/// One member's view of the group at one epoch
#[derive(Clone, Debug)]
pub struct GroupState {
    // shared confirmed state
    suite: CipherSuite,
    group_id: Vec<u8>,
    epoch: u32,
    tree: RatchetTree,
    confirmed_transcript_hash: Vec<u8>,
    interim_transcript_hash: Vec<u8>,

    // shared secret state
    secrets: EpochSecrets,

    // message protection
    application_keys: KeyChain,
    handshake_key_used: BTreeSet<LeafIndex>,

    // per-participant state
    index: LeafIndex,
    identity: Credential,
}

// Equality covers the shared attributes; the per-member half (index,
// identity key, consumed key state) legitimately differs.
impl PartialEq for GroupState {
    fn eq(&self, other: &Self) -> bool {
        self.suite == other.suite
            && self.group_id == other.group_id
            && self.epoch == other.epoch
            && self.tree == other.tree
            && self.confirmed_transcript_hash == other.confirmed_transcript_hash
            && self.interim_transcript_hash == other.interim_transcript_hash
            && self.secrets == other.secrets
    }
}

impl GroupState {
    /// Create a one-member group at epoch 0
    pub fn new(
        group_id: &[u8],
        suite: CipherSuite,
        init_priv: DhPrivateKey,
        credential: Credential,
    ) -> MlsResult<Self> {
        if credential.private_key().is_none() {
            return Err(MlsError::InvalidParameter(
                "creator credential must have a private key".into(),
            ));
        }
        if init_priv.cipher_suite() != suite {
            return Err(MlsError::InvalidParameter("cipher suite mismatch".into()));
        }

        let mut tree = RatchetTree::new(suite);
        tree.add_leaf_public(0, init_priv.public_key().clone(), credential.clone())?;
        tree.set_leaf_private_key(0, init_priv)?;

        let zero = crypto::zero_bytes(suite.hash_len());
        let secrets = EpochSecrets::initial(suite);
        let application_keys = KeyChain::new(suite, &secrets.application_secret);
        Ok(Self {
            suite,
            group_id: group_id.to_vec(),
            epoch: 0,
            tree,
            confirmed_transcript_hash: zero.clone(),
            interim_transcript_hash: zero,
            secrets,
            application_keys,
            handshake_key_used: BTreeSet::new(),
            index: 0,
            identity: credential,
        })
    }

    /// Join from a Welcome plus the Add that brought us in: install the
    /// pre-operation snapshot, then fast-forward through the Add
    pub fn from_welcome(
        my_cik: &ClientInitKey,
        welcome: &Welcome,
        add_plaintext: &MLSPlaintext,
    ) -> MlsResult<Self> {
        let suite = welcome.cipher_suite;
        let init_priv = my_cik.find_private_key(suite).ok_or_else(|| {
            MlsError::InvalidParameter("no private init key for the welcome suite".into())
        })?;
        if my_cik.credential.private_key().is_none() {
            return Err(MlsError::InvalidParameter(
                "joining credential must have a private key".into(),
            ));
        }

        let info = welcome.decrypt(init_priv)?;
        if info.version != MLS10_VERSION {
            return Err(MlsError::ProtocolError(format!(
                "unsupported protocol version {:#04x}",
                info.version
            )));
        }
        let Some(GroupOperation::Add(add)) = add_plaintext.operation() else {
            return Err(MlsError::InvalidParameter(
                "welcome must be accompanied by an Add".into(),
            ));
        };

        let mut secrets = EpochSecrets::initial(suite);
        secrets.init_secret = zeroize::Zeroizing::new(info.init_secret.clone());
        let application_keys = KeyChain::new(suite, &secrets.application_secret);
        let prior = Self {
            suite,
            group_id: info.group_id.clone(),
            epoch: info.epoch,
            tree: info.tree,
            confirmed_transcript_hash: crypto::zero_bytes(suite.hash_len()),
            interim_transcript_hash: info.interim_transcript_hash.clone(),
            secrets,
            application_keys,
            handshake_key_used: BTreeSet::new(),
            index: add.index,
            identity: my_cik.credential.clone(),
        };

        let mut next = prior.handle(add_plaintext)?;
        next.tree.set_leaf_private_key(add.index, init_priv.clone())?;
        Ok(next)
    }

    /// Negotiate an initial two-member group: the first of our suites the
    /// peer also supports wins
    pub fn negotiate(
        group_id: &[u8],
        my_cik: &ClientInitKey,
        their_cik: &ClientInitKey,
        rng: &Rng,
    ) -> MlsResult<(Welcome, MLSPlaintext, GroupState)> {
        let suite = my_cik
            .cipher_suites
            .iter()
            .copied()
            .find(|suite| their_cik.cipher_suites.contains(suite))
            .ok_or_else(|| MlsError::ProtocolError("no common cipher suite".into()))?;

        let init_priv = my_cik.find_private_key(suite).ok_or_else(|| {
            MlsError::InvalidParameter("no private init key for negotiated suite".into())
        })?;
        let state = Self::new(group_id, suite, init_priv.clone(), my_cik.credential.clone())?;
        state.add(their_cik, rng)
    }

    // ===== Accessors =====

    pub fn cipher_suite(&self) -> CipherSuite {
        self.suite
    }

    pub fn group_id(&self) -> &[u8] {
        &self.group_id
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    pub fn index(&self) -> LeafIndex {
        self.index
    }

    pub fn tree(&self) -> &RatchetTree {
        &self.tree
    }

    pub fn epoch_secret(&self) -> &[u8] {
        &self.secrets.epoch_secret
    }

    pub fn application_secret(&self) -> &[u8] {
        &self.secrets.application_secret
    }

    pub fn confirmation_key(&self) -> &[u8] {
        &self.secrets.confirmation_key
    }

    pub fn init_secret(&self) -> &[u8] {
        &self.secrets.init_secret
    }

    /// The epoch derivation, exposed for vector-style verification
    pub fn derive_epoch_secrets(
        suite: CipherSuite,
        init_secret: &[u8],
        update_secret: &[u8],
        group_context: &[u8],
    ) -> EpochSecrets {
        key_schedule::derive_epoch_secrets(suite, init_secret, update_secret, group_context)
    }

    // ===== Message factories =====

    /// Add a member at the first free leaf
    pub fn add(
        &self,
        cik: &ClientInitKey,
        rng: &Rng,
    ) -> MlsResult<(Welcome, MLSPlaintext, GroupState)> {
        self.add_at(self.tree.leftmost_free_leaf(), cik, rng)
    }

    /// Add a member at a specific leaf
    pub fn add_at(
        &self,
        index: LeafIndex,
        cik: &ClientInitKey,
        rng: &Rng,
    ) -> MlsResult<(Welcome, MLSPlaintext, GroupState)> {
        let init_pub = cik.find_init_key(self.suite).ok_or_else(|| {
            MlsError::InvalidParameter("client offers no init key for the group suite".into())
        })?;

        let welcome_info = self.welcome_info();
        let welcome = Welcome::new(&cik.client_init_key_id, &init_pub, &welcome_info, rng)?;
        let add = Add {
            index,
            init_key: cik.clone(),
            welcome_info_hash: welcome_info.hash(self.suite),
        };

        let mut next = self.clone();
        next.apply_add(&add)?;
        let update_secret = crypto::zero_bytes(self.suite.hash_len());
        let plaintext =
            next.commit_operation(self.index, GroupOperation::Add(add), &update_secret)?;
        Ok((welcome, plaintext, next))
    }

    /// Refresh our own leaf (post-compromise security)
    pub fn update(
        &self,
        leaf_secret: &[u8],
        rng: &Rng,
    ) -> MlsResult<(MLSPlaintext, GroupState)> {
        let mut next = self.clone();
        let (path, _) = next.tree.encrypt(self.index, leaf_secret, rng)?;
        let update_secret = next.tree.set_path(self.index, leaf_secret)?;
        let plaintext = next.commit_operation(
            self.index,
            GroupOperation::Update(Update { path }),
            &update_secret,
        )?;
        Ok((plaintext, next))
    }

    /// Evict another member: blank their subtree, then re-key our path
    pub fn remove(
        &self,
        evict_secret: &[u8],
        removed: LeafIndex,
        rng: &Rng,
    ) -> MlsResult<(MLSPlaintext, GroupState)> {
        if removed == self.index {
            return Err(MlsError::InvalidParameter(
                "a member cannot remove itself".into(),
            ));
        }
        let mut next = self.clone();
        next.tree.blank_path(removed)?;
        let (path, _) = next.tree.encrypt(self.index, evict_secret, rng)?;
        let update_secret = next.tree.set_path(self.index, evict_secret)?;
        let plaintext = next.commit_operation(
            self.index,
            GroupOperation::Remove(Remove { removed, path }),
            &update_secret,
        )?;
        Ok((plaintext, next))
    }

    // ===== Handshake handler =====

    /// Validate and apply a received handshake; failure leaves `self`
    /// untouched
    pub fn handle(&self, plaintext: &MLSPlaintext) -> MlsResult<GroupState> {
        if plaintext.group_id != self.group_id {
            return Err(MlsError::ProtocolError("message for another group".into()));
        }
        if plaintext.epoch != self.epoch {
            return Err(MlsError::MissingState(format!(
                "message is for epoch {}, state is at epoch {}",
                plaintext.epoch, self.epoch
            )));
        }
        if plaintext.sender == self.index {
            return Err(MlsError::ProtocolError(
                "cannot handle a message from ourselves".into(),
            ));
        }
        let operation = plaintext.operation().ok_or_else(|| {
            MlsError::InvalidParameter("handle expects a handshake message".into())
        })?;

        let sender_credential = self.tree.get_credential(plaintext.sender)?;
        if !plaintext.verify(sender_credential.public_key()) {
            return Err(MlsError::ProtocolError(
                "invalid signature on handshake message".into(),
            ));
        }

        let mut next = self.clone();
        let update_secret = match operation {
            GroupOperation::Add(add) => {
                next.apply_add(add)?;
                crypto::zero_bytes(self.suite.hash_len())
            }
            GroupOperation::Update(update) => {
                let decrypted = next.tree.decrypt(plaintext.sender, &update.path)?;
                next.tree.merge_path(plaintext.sender, &decrypted)?;
                decrypted.root_path_secret
            }
            GroupOperation::Remove(remove) => {
                if remove.removed == self.index {
                    return Err(MlsError::ProtocolError(
                        "cannot process our own removal".into(),
                    ));
                }
                next.tree.blank_path(remove.removed)?;
                let decrypted = next.tree.decrypt(plaintext.sender, &remove.path)?;
                next.tree.merge_path(plaintext.sender, &decrypted)?;
                decrypted.root_path_secret
            }
        };

        let confirmed = next.advance_epoch(plaintext, &update_secret)?;

        let expected = crypto::hmac_sign(next.suite, &next.secrets.confirmation_key, &confirmed);
        let received = plaintext.confirmation().unwrap_or(&[]);
        if !crypto::constant_time_eq(&expected, received) {
            return Err(MlsError::ProtocolError("confirmation tag mismatch".into()));
        }

        next.finish_transcript(confirmed, plaintext)?;
        Ok(next)
    }

    // ===== Application data protection =====

    /// Sign, frame, pad, and AEAD-encrypt application data under our next
    /// key generation; the sender index and generation are hidden in the
    /// encrypted sender data
    pub fn protect(&mut self, data: &[u8], rng: &Rng) -> MlsResult<MLSCiphertext> {
        let mut plaintext =
            MLSPlaintext::new_application(&self.group_id, self.epoch, self.index, data);
        plaintext.sign(&self.identity)?;

        let generation = self.application_keys.next(self.index)?;
        let framed = frame_content(data, &plaintext.signature, PADDING_BLOCK);

        let sender_data = SenderData {
            sender: self.index,
            generation: generation.generation,
        };
        let (sender_data_nonce, encrypted_sender_data) =
            self.seal_sender_data(sender_data, ContentType::Application, rng)?;

        let mut ciphertext = MLSCiphertext {
            group_id: self.group_id.clone(),
            epoch: self.epoch,
            content_type: ContentType::Application,
            sender_data_nonce,
            encrypted_sender_data,
            ciphertext: Vec::new(),
        };
        ciphertext.ciphertext = crypto::aead_seal(
            self.suite,
            &generation.key,
            &generation.nonce,
            &ciphertext.content_aad(),
            &framed,
        )?;
        Ok(ciphertext)
    }

    /// Reverse [`protect`]: recover sender data, decrypt, unframe, verify
    /// the sender's signature
    pub fn unprotect(&mut self, ciphertext: &MLSCiphertext) -> MlsResult<Vec<u8>> {
        if ciphertext.group_id != self.group_id {
            return Err(MlsError::ProtocolError("message for another group".into()));
        }
        if ciphertext.epoch != self.epoch {
            return Err(MlsError::MissingState(format!(
                "ciphertext is for epoch {}, state is at epoch {}",
                ciphertext.epoch, self.epoch
            )));
        }
        if ciphertext.content_type != ContentType::Application {
            return Err(MlsError::InvalidParameter(
                "expected an application ciphertext".into(),
            ));
        }

        let sender_data = self.open_sender_data(ciphertext)?;
        let generation = self
            .application_keys
            .get(sender_data.sender, sender_data.generation)?;
        let framed = crypto::aead_open(
            self.suite,
            &generation.key,
            &generation.nonce,
            &ciphertext.content_aad(),
            &ciphertext.ciphertext,
        )?;
        let (content, signature) = unframe_content(&framed)?;

        let mut plaintext = MLSPlaintext::new_application(
            &self.group_id,
            self.epoch,
            sender_data.sender,
            &content,
        );
        plaintext.signature = signature;
        let sender_credential = self.tree.get_credential(sender_data.sender)?;
        if !plaintext.verify(sender_credential.public_key()) {
            return Err(MlsError::ProtocolError(
                "invalid signature on application message".into(),
            ));
        }
        Ok(content)
    }

    /// Protect a signed handshake message the way [`protect`] protects
    /// application data; the handshake key admits one encryption per
    /// member and epoch
    pub fn protect_handshake(
        &mut self,
        plaintext: &MLSPlaintext,
        rng: &Rng,
    ) -> MlsResult<MLSCiphertext> {
        if plaintext.group_id != self.group_id || plaintext.epoch != self.epoch {
            return Err(MlsError::InvalidParameter(
                "handshake message does not belong to this epoch".into(),
            ));
        }
        let operation = plaintext
            .operation()
            .ok_or_else(|| MlsError::InvalidParameter("expected handshake content".into()))?;

        let mut content = Vec::new();
        operation.encode(&mut content);
        codec::encode_vec_bytes(
            VecSize::VecU8,
            &mut content,
            plaintext.confirmation().unwrap_or(&[]),
        );
        let framed = frame_content(&content, &plaintext.signature, PADDING_BLOCK);

        let (key, nonce) = self.handshake_keys(plaintext.sender, true)?;
        let sender_data = SenderData {
            sender: plaintext.sender,
            generation: 0,
        };
        let (sender_data_nonce, encrypted_sender_data) =
            self.seal_sender_data(sender_data, ContentType::Handshake, rng)?;

        let mut ciphertext = MLSCiphertext {
            group_id: self.group_id.clone(),
            epoch: self.epoch,
            content_type: ContentType::Handshake,
            sender_data_nonce,
            encrypted_sender_data,
            ciphertext: Vec::new(),
        };
        ciphertext.ciphertext = crypto::aead_seal(
            self.suite,
            &key,
            &nonce,
            &ciphertext.content_aad(),
            &framed,
        )?;
        Ok(ciphertext)
    }

    /// Reverse [`protect_handshake`]: recover the signed plaintext, ready
    /// for [`handle`]
    pub fn unprotect_handshake(&mut self, ciphertext: &MLSCiphertext) -> MlsResult<MLSPlaintext> {
        if ciphertext.group_id != self.group_id {
            return Err(MlsError::ProtocolError("message for another group".into()));
        }
        if ciphertext.epoch != self.epoch {
            return Err(MlsError::MissingState(format!(
                "ciphertext is for epoch {}, state is at epoch {}",
                ciphertext.epoch, self.epoch
            )));
        }
        if ciphertext.content_type != ContentType::Handshake {
            return Err(MlsError::InvalidParameter(
                "expected a handshake ciphertext".into(),
            ));
        }

        let sender_data = self.open_sender_data(ciphertext)?;
        if sender_data.generation != 0 {
            return Err(MlsError::ProtocolError(
                "handshake keys have a single generation".into(),
            ));
        }

        let (key, nonce) = self.handshake_keys(sender_data.sender, false)?;
        let framed = crypto::aead_open(
            self.suite,
            &key,
            &nonce,
            &ciphertext.content_aad(),
            &ciphertext.ciphertext,
        )?;
        let (content, signature) = unframe_content(&framed)?;

        let mut cursor = Cursor::new(&content);
        let operation = GroupOperation::decode(&mut cursor, self.suite)?;
        let confirmation = codec::decode_vec_bytes(VecSize::VecU8, &mut cursor)?;
        if !cursor.is_empty() {
            return Err(MlsError::InvalidTlsSyntax(
                "trailing bytes after handshake content".into(),
            ));
        }

        let mut plaintext = MLSPlaintext::new_handshake(
            &self.group_id,
            self.epoch,
            sender_data.sender,
            operation,
        );
        plaintext.set_confirmation(confirmation);
        plaintext.signature = signature;
        Ok(plaintext)
    }

    // ===== Internals =====

    // One handshake key generation per sender per epoch, bound to the
    // sender index
    fn handshake_keys(
        &mut self,
        sender: LeafIndex,
        encrypt: bool,
    ) -> MlsResult<(Vec<u8>, Vec<u8>)> {
        if encrypt && !self.handshake_key_used.insert(sender) {
            return Err(MlsError::ProtocolError(
                "handshake key for this epoch already used".into(),
            ));
        }
        let context = codec::marshal(&sender);
        let key = crypto::hkdf_expand_label(
            self.suite,
            &self.secrets.handshake_secret,
            "hs-key",
            &context,
            self.suite.key_len(),
        );
        let nonce = crypto::hkdf_expand_label(
            self.suite,
            &self.secrets.handshake_secret,
            "hs-nonce",
            &context,
            self.suite.nonce_len(),
        );
        Ok((key, nonce))
    }

    fn seal_sender_data(
        &self,
        sender_data: SenderData,
        content_type: ContentType,
        rng: &Rng,
    ) -> MlsResult<(Vec<u8>, Vec<u8>)> {
        let sender_data_nonce = rng.random_vec(self.suite.nonce_len())?;
        let sender_data_key = crypto::hkdf_expand_label(
            self.suite,
            &self.secrets.sender_data_secret,
            "sd-key",
            &sender_data_nonce,
            self.suite.key_len(),
        );
        let aad = MLSCiphertext::sender_data_aad(&self.group_id, self.epoch, content_type);
        let encrypted = crypto::aead_seal(
            self.suite,
            &sender_data_key,
            &sender_data_nonce,
            &aad,
            &codec::marshal(&sender_data),
        )?;
        Ok((sender_data_nonce, encrypted))
    }

    fn open_sender_data(&self, ciphertext: &MLSCiphertext) -> MlsResult<SenderData> {
        let sender_data_key = crypto::hkdf_expand_label(
            self.suite,
            &self.secrets.sender_data_secret,
            "sd-key",
            &ciphertext.sender_data_nonce,
            self.suite.key_len(),
        );
        let aad = MLSCiphertext::sender_data_aad(
            &self.group_id,
            self.epoch,
            ciphertext.content_type,
        );
        let raw = crypto::aead_open(
            self.suite,
            &sender_data_key,
            &ciphertext.sender_data_nonce,
            &aad,
            &ciphertext.encrypted_sender_data,
        )?;
        let sender_data: SenderData = codec::unmarshal(&raw)?;
        if sender_data.sender >= self.tree.leaf_count() {
            return Err(MlsError::InvalidIndex(format!(
                "sender {} out of range",
                sender_data.sender
            )));
        }
        Ok(sender_data)
    }

    fn welcome_info(&self) -> WelcomeInfo {
        WelcomeInfo::new(
            &self.group_id,
            self.epoch,
            self.tree.clone(),
            &self.interim_transcript_hash,
            &self.secrets.init_secret,
        )
    }

    /// Shared Add application: the adder, the other members, and the
    /// joiner replaying its own Add all run this
    fn apply_add(&mut self, add: &Add) -> MlsResult<()> {
        if add.welcome_info_hash != self.welcome_info().hash(self.suite) {
            return Err(MlsError::ProtocolError(
                "welcome info hash does not match the group".into(),
            ));
        }
        if !add.init_key.verify() {
            return Err(MlsError::InvalidParameter(
                "invalid signature on ClientInitKey".into(),
            ));
        }
        let init_pub = add.init_key.find_init_key(self.suite).ok_or_else(|| {
            MlsError::InvalidParameter("client offers no init key for the group suite".into())
        })?;
        self.tree
            .add_leaf_public(add.index, init_pub, add.init_key.credential.clone())
    }

    /// Ratchet the transcript and key schedule forward; `self` must
    /// already carry the post-operation tree
    fn advance_epoch(
        &mut self,
        plaintext: &MLSPlaintext,
        update_secret: &[u8],
    ) -> MlsResult<Vec<u8>> {
        let mut confirmed_input = self.interim_transcript_hash.clone();
        confirmed_input.extend_from_slice(&plaintext.transcript_content()?);
        let confirmed = crypto::digest(self.suite, &confirmed_input);

        self.epoch += 1;
        let context = GroupContext {
            group_id: self.group_id.clone(),
            epoch: self.epoch,
            tree_hash: self.tree.root_hash(),
            interim_transcript_hash: self.interim_transcript_hash.clone(),
        };
        self.secrets = key_schedule::derive_epoch_secrets(
            self.suite,
            &self.secrets.init_secret,
            update_secret,
            &context.marshal(),
        );
        self.application_keys = KeyChain::new(self.suite, &self.secrets.application_secret);
        self.handshake_key_used.clear();
        Ok(confirmed)
    }

    fn finish_transcript(
        &mut self,
        confirmed: Vec<u8>,
        plaintext: &MLSPlaintext,
    ) -> MlsResult<()> {
        let mut interim_input = confirmed.clone();
        interim_input.extend_from_slice(&plaintext.auth_data()?);
        self.interim_transcript_hash = crypto::digest(self.suite, &interim_input);
        self.confirmed_transcript_hash = confirmed;
        Ok(())
    }

    /// Sender side of an epoch transition: advance, confirm, sign
    fn commit_operation(
        &mut self,
        sender: LeafIndex,
        operation: GroupOperation,
        update_secret: &[u8],
    ) -> MlsResult<MLSPlaintext> {
        // self is the next state; the plaintext still carries the prior
        // epoch so peers at that epoch accept it
        let mut plaintext =
            MLSPlaintext::new_handshake(&self.group_id, self.epoch, sender, operation);

        let confirmed = self.advance_epoch(&plaintext, update_secret)?;
        let confirmation =
            crypto::hmac_sign(self.suite, &self.secrets.confirmation_key, &confirmed);
        plaintext.set_confirmation(confirmation);
        plaintext.sign(&self.identity)?;

        self.finish_transcript(confirmed, &plaintext)?;
        Ok(plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{SignaturePrivateKey, SignatureScheme};
    use crate::messages::PlaintextContent;

    const SUITE: CipherSuite = CipherSuite::X25519Sha256Aes128Gcm;
    const GROUP_ID: [u8; 4] = [0, 1, 2, 3];

    struct Member {
        cik: ClientInitKey,
        init_priv: DhPrivateKey,
    }

    fn member(name: &[u8]) -> Member {
        let sig = SignaturePrivateKey::derive(SignatureScheme::Ed25519, name).unwrap();
        let credential = Credential::basic_with_key(name, sig);
        let mut seed = b"init".to_vec();
        seed.extend_from_slice(name);
        let init_priv = DhPrivateKey::derive(SUITE, &seed).unwrap();
        let cik = ClientInitKey::from_private_keys(
            &[8, 9, 0xA, 0xB],
            vec![init_priv.clone()],
            &credential,
        )
        .unwrap();
        Member { cik, init_priv }
    }

    fn creator_state(m: &Member) -> GroupState {
        GroupState::new(
            &GROUP_ID,
            SUITE,
            m.init_priv.clone(),
            m.cik.credential.clone(),
        )
        .unwrap()
    }

    #[test]
    fn test_two_person_group() {
        let rng = Rng::from_seed([1; 32]);
        let alice = member(b"alice");
        let bob = member(b"bob");

        let first = creator_state(&alice);
        let (welcome, add, mut first) = first.add(&bob.cik, &rng).unwrap();
        let mut second = GroupState::from_welcome(&bob.cik, &welcome, &add).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.epoch(), 1);
        assert_eq!(second.index(), 1);

        let message = [1, 2, 3, 4];
        let encrypted = first.protect(&message, &rng).unwrap();
        assert_eq!(second.unprotect(&encrypted).unwrap(), message);

        let reply = [5];
        let encrypted = second.protect(&reply, &rng).unwrap();
        assert_eq!(first.unprotect(&encrypted).unwrap(), reply);
    }

    #[test]
    fn test_full_size_growth() {
        let rng = Rng::from_seed([2; 32]);
        let members: Vec<Member> = [b"a" as &[u8], b"b", b"c", b"d", b"e"]
            .iter()
            .map(|n| member(n))
            .collect();

        let mut states = vec![creator_state(&members[0])];

        // each member invites the next
        for i in 1..members.len() {
            let sender = i - 1;
            let (welcome, add, next) = states[sender].add(&members[i].cik, &rng).unwrap();

            for j in 0..states.len() {
                if j == sender {
                    states[j] = next.clone();
                } else {
                    states[j] = states[j].handle(&add).unwrap();
                }
            }
            states.push(GroupState::from_welcome(&members[i].cik, &welcome, &add).unwrap());

            for state in &states {
                assert_eq!(state, &states[0]);
            }

            // everyone can send to everyone
            let message = [0, 1, 2, 3];
            for k in 0..states.len() {
                let encrypted = states[k].protect(&message, &rng).unwrap();
                for (l, other) in states.iter_mut().enumerate() {
                    if l != k {
                        assert_eq!(other.unprotect(&encrypted).unwrap(), message);
                    }
                }
            }
        }
        assert_eq!(states[0].epoch(), 4);
    }

    fn running_group(rng: &Rng, size: usize) -> Vec<GroupState> {
        let members: Vec<Member> = (0..size)
            .map(|i| member(format!("member-{i}").as_bytes()))
            .collect();
        let mut states = vec![creator_state(&members[0])];
        for i in 1..size {
            let (welcome, add, next) = states[0].add(&members[i].cik, rng).unwrap();
            for j in 0..states.len() {
                if j == 0 {
                    states[j] = next.clone();
                } else {
                    states[j] = states[j].handle(&add).unwrap();
                }
            }
            states.push(GroupState::from_welcome(&members[i].cik, &welcome, &add).unwrap());
        }
        for state in &states {
            assert_eq!(state, &states[0]);
        }
        states
    }

    #[test]
    fn test_update_rotation() {
        let rng = Rng::from_seed([3; 32]);
        let mut states = running_group(&rng, 5);

        for i in 0..states.len() {
            let epoch_before = states[0].epoch();
            let leaf_secret = rng.random_vec(32).unwrap();
            let (message, next) = states[i].update(&leaf_secret, &rng).unwrap();

            for j in 0..states.len() {
                if j == i {
                    states[j] = next.clone();
                } else {
                    states[j] = states[j].handle(&message).unwrap();
                }
            }

            for state in &states {
                assert_eq!(state, &states[0]);
                assert_eq!(state.epoch(), epoch_before + 1);
            }
        }
    }

    #[test]
    fn test_remove_from_edge() {
        let rng = Rng::from_seed([4; 32]);
        let mut states = running_group(&rng, 5);

        // member 3 removes member 4
        let evict_secret = rng.random_vec(32).unwrap();
        let (message, next) = states[3].remove(&evict_secret, 4, &rng).unwrap();

        // the tree stays at 5 leaves, one blanked
        assert_eq!(next.tree().leaf_count(), 5);
        assert!(next.tree().get_credential(4).is_err());

        states.pop();
        for j in 0..states.len() {
            if j == 3 {
                states[j] = next.clone();
            } else {
                states[j] = states[j].handle(&message).unwrap();
            }
        }
        for state in &states {
            assert_eq!(state, &states[0]);
        }
    }

    #[test]
    fn test_removed_member_cannot_follow() {
        let rng = Rng::from_seed([5; 32]);
        let states = running_group(&rng, 3);

        let evict_secret = rng.random_vec(32).unwrap();
        let (message, _) = states[0].remove(&evict_secret, 2, &rng).unwrap();

        // the removed member cannot process its own eviction
        assert!(states[2].handle(&message).is_err());
    }

    #[test]
    fn test_negotiate_picks_common_suite() {
        let rng = Rng::from_seed([6; 32]);

        // Alice supports P-256 and X25519; Bob supports P-256 and P-521
        let sig_a = SignaturePrivateKey::derive(SignatureScheme::Ed25519, b"alice").unwrap();
        let cred_a = Credential::basic_with_key(b"alice", sig_a);
        let cik_a = ClientInitKey::fresh(
            &[1],
            &[
                CipherSuite::P256Sha256Aes128Gcm,
                CipherSuite::X25519Sha256Aes128Gcm,
            ],
            b"alice-init",
            &cred_a,
        )
        .unwrap();

        let sig_b = SignaturePrivateKey::derive(SignatureScheme::Ed25519, b"bob").unwrap();
        let cred_b = Credential::basic_with_key(b"bob", sig_b);
        let mut cik_b = ClientInitKey::from_private_keys(
            &[2],
            vec![DhPrivateKey::derive(CipherSuite::P256Sha256Aes128Gcm, b"bob-init").unwrap()],
            &cred_b,
        )
        .unwrap();
        // the P-521 tag is advertised without a usable binding
        cik_b.cipher_suites.push(CipherSuite::P521Sha512Aes256Gcm);
        cik_b
            .init_keys
            .push(vec![0; CipherSuite::P521Sha512Aes256Gcm.dh_len()]);
        cik_b.sign(&cred_b).unwrap();

        let (welcome, add, state_a) =
            GroupState::negotiate(&GROUP_ID, &cik_a, &cik_b, &rng).unwrap();
        assert_eq!(state_a.cipher_suite(), CipherSuite::P256Sha256Aes128Gcm);

        let state_b = GroupState::from_welcome(&cik_b, &welcome, &add).unwrap();
        assert_eq!(state_a, state_b);
    }

    #[test]
    fn test_negotiate_requires_common_suite() {
        let rng = Rng::from_seed([7; 32]);
        let sig_a = SignaturePrivateKey::derive(SignatureScheme::Ed25519, b"a").unwrap();
        let cred_a = Credential::basic_with_key(b"a", sig_a);
        let cik_a = ClientInitKey::fresh(
            &[1],
            &[CipherSuite::X25519Sha256Aes128Gcm],
            b"a-init",
            &cred_a,
        )
        .unwrap();

        let sig_b = SignaturePrivateKey::derive(SignatureScheme::Ed25519, b"b").unwrap();
        let cred_b = Credential::basic_with_key(b"b", sig_b);
        let cik_b = ClientInitKey::fresh(
            &[2],
            &[CipherSuite::P256Sha256Aes128Gcm],
            b"b-init",
            &cred_b,
        )
        .unwrap();

        assert!(matches!(
            GroupState::negotiate(&GROUP_ID, &cik_a, &cik_b, &rng),
            Err(MlsError::ProtocolError(_))
        ));
    }

    #[test]
    fn test_handle_rejects_bad_messages() {
        let rng = Rng::from_seed([8; 32]);
        let states = running_group(&rng, 3);

        let leaf_secret = rng.random_vec(32).unwrap();
        let (message, _) = states[1].update(&leaf_secret, &rng).unwrap();

        // own message
        assert!(matches!(
            states[1].handle(&message),
            Err(MlsError::ProtocolError(_))
        ));

        // wrong group
        let mut wrong_group = message.clone();
        wrong_group.group_id = vec![9, 9, 9];
        assert!(matches!(
            states[0].handle(&wrong_group),
            Err(MlsError::ProtocolError(_))
        ));

        // wrong epoch
        let mut wrong_epoch = message.clone();
        wrong_epoch.epoch += 1;
        assert!(matches!(
            states[0].handle(&wrong_epoch),
            Err(MlsError::MissingState(_))
        ));

        // tampered confirmation breaks the signature first; re-sign to
        // isolate the confirmation check
        let mut tampered = message.clone();
        if let PlaintextContent::Handshake { confirmation, .. } = &mut tampered.content {
            confirmation[0] ^= 1;
        }
        assert!(states[0].handle(&tampered).is_err());

        // tampered signature
        let mut bad_signature = message.clone();
        bad_signature.signature[0] ^= 1;
        assert!(matches!(
            states[0].handle(&bad_signature),
            Err(MlsError::ProtocolError(_))
        ));

        // the pristine message still applies: failures left no residue
        assert!(states[0].handle(&message).is_ok());
    }

    #[test]
    fn test_protect_hides_sender_and_ratchets() {
        let rng = Rng::from_seed([9; 32]);
        let mut states = running_group(&rng, 2);

        let first = states[0].protect(b"same message", &rng).unwrap();
        let second = states[0].protect(b"same message", &rng).unwrap();
        assert_ne!(first.ciphertext, second.ciphertext);
        assert_ne!(first.sender_data_nonce, second.sender_data_nonce);

        let mut receiver = states.remove(1);
        assert_eq!(receiver.unprotect(&first).unwrap(), b"same message");
        assert_eq!(receiver.unprotect(&second).unwrap(), b"same message");

        // consumed generations stay consumed
        assert!(matches!(
            receiver.unprotect(&first),
            Err(MlsError::MissingState(_))
        ));
    }

    #[test]
    fn test_handshake_protection_round_trip() {
        let rng = Rng::from_seed([12; 32]);
        let states = running_group(&rng, 3);

        let leaf_secret = rng.random_vec(32).unwrap();
        let (message, next) = states[1].update(&leaf_secret, &rng).unwrap();

        let mut sender_view = states[1].clone();
        let encrypted = sender_view.protect_handshake(&message, &rng).unwrap();
        assert_eq!(encrypted.content_type, ContentType::Handshake);

        // the handshake key admits a single encryption per epoch
        assert!(matches!(
            sender_view.protect_handshake(&message, &rng),
            Err(MlsError::ProtocolError(_))
        ));

        // a receiver recovers the exact signed plaintext and applies it
        let mut receiver = states[0].clone();
        let recovered = receiver.unprotect_handshake(&encrypted).unwrap();
        assert_eq!(recovered, message);
        assert_eq!(receiver.handle(&recovered).unwrap(), next);

        // tampering is caught by the AEAD
        let mut flipped = encrypted.clone();
        flipped.ciphertext[0] ^= 1;
        assert!(states[2].clone().unprotect_handshake(&flipped).is_err());

        // the application path refuses handshake ciphertexts
        assert!(matches!(
            states[2].clone().unprotect(&encrypted),
            Err(MlsError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_unprotect_rejects_tampering() {
        let rng = Rng::from_seed([10; 32]);
        let mut states = running_group(&rng, 2);

        let encrypted = states[0].protect(b"payload", &rng).unwrap();

        let mut flipped = encrypted.clone();
        flipped.ciphertext[0] ^= 1;
        assert!(states[1].unprotect(&flipped).is_err());

        let mut wrong_epoch = encrypted.clone();
        wrong_epoch.epoch += 1;
        assert!(matches!(
            states[1].unprotect(&wrong_epoch),
            Err(MlsError::MissingState(_))
        ));
    }

    #[test]
    fn test_welcome_info_hash_is_checked() {
        let rng = Rng::from_seed([11; 32]);
        let alice = member(b"alice");
        let bob = member(b"bob");
        let bob2 = member(b"bob-of-the-other-timeline");
        let carol = member(b"carol");

        // two groups sharing the creator but not the second member
        let (w1, add1, first) = creator_state(&alice).add(&bob.cik, &rng).unwrap();
        let _second = GroupState::from_welcome(&bob.cik, &w1, &add1).unwrap();
        let (w2, add2, _) = creator_state(&alice).add(&bob2.cik, &rng).unwrap();
        let second2 = GroupState::from_welcome(&bob2.cik, &w2, &add2).unwrap();

        // an Add built over the first group's tree replayed into the second
        let (_, add_carol, _) = first.add(&carol.cik, &rng).unwrap();
        assert!(matches!(
            second2.handle(&add_carol),
            Err(MlsError::ProtocolError(_))
        ));
    }
}
