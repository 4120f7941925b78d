//! Protocol messages
//!
//! Bit-exact wire structures: client init keys, the Welcome bootstrap
//! pair, the three handshake operations, and the two framing layers
//! (signed plaintext, AEAD ciphertext).

use crate::codec::{self, Codec, Cursor, VecSize};
use crate::credential::Credential;
use crate::crypto::{
    self, CipherSuite, DhPrivateKey, DhPublicKey, HpkeCiphertext, Rng, SignaturePublicKey,
};
use crate::error::{MlsError, MlsResult};
use crate::tree::RatchetTree;
use crate::tree_math::LeafIndex;

/// Protocol version tag
pub const MLS10_VERSION: u8 = 0xFF;

// struct {
//    DHPublicKey public_key;
//    HPKECiphertext node_secrets<0..2^16-1>;
// } RatchetNode;
#[derive(Clone, Debug, PartialEq)]
pub struct RatchetNode {
    pub public_key: DhPublicKey,
    pub node_secrets: Vec<HpkeCiphertext>,
}

impl RatchetNode {
    pub fn encode(&self, buffer: &mut Vec<u8>) {
        codec::encode_vec_bytes(VecSize::VecU8, buffer, self.public_key.as_bytes());
        let mut inner = Vec::new();
        for sealed in &self.node_secrets {
            sealed.encode(&mut inner);
        }
        codec::encode_vec_bytes(VecSize::VecU16, buffer, &inner);
    }

    pub fn decode(cursor: &mut Cursor, suite: CipherSuite) -> MlsResult<Self> {
        let key_data = codec::decode_vec_bytes(VecSize::VecU8, cursor)?;
        let public_key = DhPublicKey::from_bytes(suite, &key_data)?;
        let raw = codec::decode_vec_bytes(VecSize::VecU16, cursor)?;
        let mut inner = Cursor::new(&raw);
        let mut node_secrets = Vec::new();
        while !inner.is_empty() {
            node_secrets.push(HpkeCiphertext::decode(&mut inner, suite)?);
        }
        Ok(Self {
            public_key,
            node_secrets,
        })
    }
}

// struct {
//    RatchetNode nodes<0..2^16-1>;
// } DirectPath;
#[derive(Clone, Debug, PartialEq)]
pub struct DirectPath {
    pub nodes: Vec<RatchetNode>,
}

impl DirectPath {
    pub fn encode(&self, buffer: &mut Vec<u8>) {
        let mut inner = Vec::new();
        for node in &self.nodes {
            node.encode(&mut inner);
        }
        codec::encode_vec_bytes(VecSize::VecU16, buffer, &inner);
    }

    pub fn decode(cursor: &mut Cursor, suite: CipherSuite) -> MlsResult<Self> {
        let raw = codec::decode_vec_bytes(VecSize::VecU16, cursor)?;
        let mut inner = Cursor::new(&raw);
        let mut nodes = Vec::new();
        while !inner.is_empty() {
            nodes.push(RatchetNode::decode(&mut inner, suite)?);
        }
        Ok(Self { nodes })
    }
}

// struct {
//     opaque client_init_key_id<0..255>;
//     ProtocolVersion supported_versions<0..255>;
//     CipherSuite cipher_suites<0..255>;
//     HPKEPublicKey init_keys<0..2^16-1>;
//     Credential credential;
//     opaque signature<0..2^16-1>;
// } ClientInitKey;
//
/// A short-lived invitation: one init key per supported suite, bound to
/// an identity by the credential's signature. The holder's copy retains
/// the matching private keys; they never travel.
#[derive(Clone, Debug)]
pub struct ClientInitKey {
    pub client_init_key_id: Vec<u8>,
    pub supported_versions: Vec<u8>,
    pub cipher_suites: Vec<CipherSuite>,
    pub init_keys: Vec<Vec<u8>>,
    pub credential: Credential,
    pub signature: Vec<u8>,
    private_keys: Vec<(CipherSuite, DhPrivateKey)>,
}

impl ClientInitKey {
    /// Invitation offering every given suite, all init keys derived from
    /// one init secret.
    //
    // Deriving every suite's key from the same secret is questionable;
    // the suite tag should probably enter the derivation. The "dh-key"
    // expansion at least separates the curves by scalar derivation.
    pub fn fresh(
        client_init_key_id: &[u8],
        suites: &[CipherSuite],
        init_secret: &[u8],
        credential: &Credential,
    ) -> MlsResult<Self> {
        let mut cik = Self {
            client_init_key_id: client_init_key_id.to_vec(),
            supported_versions: vec![MLS10_VERSION],
            cipher_suites: Vec::new(),
            init_keys: Vec::new(),
            credential: credential.clone(),
            signature: Vec::new(),
            private_keys: Vec::new(),
        };
        for suite in suites {
            let private_key = DhPrivateKey::derive(*suite, init_secret)?;
            cik.add_init_key(private_key);
        }
        cik.sign(credential)?;
        Ok(cik)
    }

    /// Invitation from explicit key pairs, one per suite
    pub fn from_private_keys(
        client_init_key_id: &[u8],
        private_keys: Vec<DhPrivateKey>,
        credential: &Credential,
    ) -> MlsResult<Self> {
        let mut cik = Self {
            client_init_key_id: client_init_key_id.to_vec(),
            supported_versions: vec![MLS10_VERSION],
            cipher_suites: Vec::new(),
            init_keys: Vec::new(),
            credential: credential.clone(),
            signature: Vec::new(),
            private_keys: Vec::new(),
        };
        for private_key in private_keys {
            cik.add_init_key(private_key);
        }
        cik.sign(credential)?;
        Ok(cik)
    }

    pub fn add_init_key(&mut self, private_key: DhPrivateKey) {
        let suite = private_key.cipher_suite();
        self.cipher_suites.push(suite);
        self.init_keys
            .push(private_key.public_key().as_bytes().to_vec());
        self.private_keys.push((suite, private_key));
    }

    pub fn find_init_key(&self, suite: CipherSuite) -> Option<DhPublicKey> {
        self.cipher_suites
            .iter()
            .position(|s| *s == suite)
            .and_then(|i| DhPublicKey::from_bytes(suite, &self.init_keys[i]).ok())
    }

    pub fn find_private_key(&self, suite: CipherSuite) -> Option<&DhPrivateKey> {
        self.private_keys
            .iter()
            .find(|(s, _)| *s == suite)
            .map(|(_, key)| key)
    }

    pub fn sign(&mut self, credential: &Credential) -> MlsResult<()> {
        if credential.private_key().is_none() {
            return Err(MlsError::InvalidParameter(
                "credential must have a private key".into(),
            ));
        }
        if self.cipher_suites.len() != self.init_keys.len() {
            return Err(MlsError::InvalidParameter("mal-formed ClientInitKey".into()));
        }
        self.credential = credential.clone();
        let tbs = self.to_be_signed();
        self.signature = credential.sign(&tbs)?;
        Ok(())
    }

    pub fn verify(&self) -> bool {
        if self.cipher_suites.len() != self.init_keys.len() {
            return false;
        }
        self.credential.verify(&self.to_be_signed(), &self.signature)
    }

    pub fn to_be_signed(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        codec::encode_vec(VecSize::VecU8, &mut buffer, &self.cipher_suites);
        let mut keys = Vec::new();
        for key in &self.init_keys {
            codec::encode_vec_bytes(VecSize::VecU16, &mut keys, key);
        }
        codec::encode_vec_bytes(VecSize::VecU16, &mut buffer, &keys);
        self.credential.encode(&mut buffer);
        buffer
    }
}

impl PartialEq for ClientInitKey {
    fn eq(&self, other: &Self) -> bool {
        self.client_init_key_id == other.client_init_key_id
            && self.supported_versions == other.supported_versions
            && self.cipher_suites == other.cipher_suites
            && self.init_keys == other.init_keys
            && self.credential == other.credential
            && self.signature == other.signature
    }
}

impl Codec for ClientInitKey {
    fn encode(&self, buffer: &mut Vec<u8>) {
        codec::encode_vec_bytes(VecSize::VecU8, buffer, &self.client_init_key_id);
        codec::encode_vec_bytes(VecSize::VecU8, buffer, &self.supported_versions);
        codec::encode_vec(VecSize::VecU8, buffer, &self.cipher_suites);
        let mut keys = Vec::new();
        for key in &self.init_keys {
            codec::encode_vec_bytes(VecSize::VecU16, &mut keys, key);
        }
        codec::encode_vec_bytes(VecSize::VecU16, buffer, &keys);
        self.credential.encode(buffer);
        codec::encode_vec_bytes(VecSize::VecU16, buffer, &self.signature);
    }

    fn decode(cursor: &mut Cursor) -> MlsResult<Self> {
        let client_init_key_id = codec::decode_vec_bytes(VecSize::VecU8, cursor)?;
        let supported_versions = codec::decode_vec_bytes(VecSize::VecU8, cursor)?;
        let cipher_suites = codec::decode_vec::<CipherSuite>(VecSize::VecU8, cursor)?;
        let raw_keys = codec::decode_vec_bytes(VecSize::VecU16, cursor)?;
        let mut inner = Cursor::new(&raw_keys);
        let mut init_keys = Vec::new();
        while !inner.is_empty() {
            init_keys.push(codec::decode_vec_bytes(VecSize::VecU16, &mut inner)?);
        }
        let credential = Credential::decode(cursor)?;
        let signature = codec::decode_vec_bytes(VecSize::VecU16, cursor)?;

        if cipher_suites.len() != init_keys.len() {
            return Err(MlsError::InvalidParameter("mal-formed ClientInitKey".into()));
        }
        Ok(Self {
            client_init_key_id,
            supported_versions,
            cipher_suites,
            init_keys,
            credential,
            signature,
            private_keys: Vec::new(),
        })
    }
}

// struct {
//   ProtocolVersion version;
//   opaque group_id<0..255>;
//   uint32 epoch;
//   optional<Node> tree<0..2^16-1>;
//   opaque interim_transcript_hash<0..255>;
//   opaque init_secret<0..255>;
// } WelcomeInfo;
//
/// Everything a new joiner needs: the pre-operation group snapshot.
#[derive(Clone, Debug, PartialEq)]
pub struct WelcomeInfo {
    pub version: u8,
    pub group_id: Vec<u8>,
    pub epoch: u32,
    pub tree: RatchetTree,
    pub interim_transcript_hash: Vec<u8>,
    pub init_secret: Vec<u8>,
}

impl WelcomeInfo {
    pub fn new(
        group_id: &[u8],
        epoch: u32,
        tree: RatchetTree,
        interim_transcript_hash: &[u8],
        init_secret: &[u8],
    ) -> Self {
        Self {
            version: MLS10_VERSION,
            group_id: group_id.to_vec(),
            epoch,
            tree,
            interim_transcript_hash: interim_transcript_hash.to_vec(),
            init_secret: init_secret.to_vec(),
        }
    }

    pub fn encode(&self, buffer: &mut Vec<u8>) {
        self.version.encode(buffer);
        codec::encode_vec_bytes(VecSize::VecU8, buffer, &self.group_id);
        self.epoch.encode(buffer);
        self.tree.encode(buffer);
        codec::encode_vec_bytes(VecSize::VecU8, buffer, &self.interim_transcript_hash);
        codec::encode_vec_bytes(VecSize::VecU8, buffer, &self.init_secret);
    }

    pub fn decode(cursor: &mut Cursor, suite: CipherSuite) -> MlsResult<Self> {
        let version = u8::decode(cursor)?;
        let group_id = codec::decode_vec_bytes(VecSize::VecU8, cursor)?;
        let epoch = u32::decode(cursor)?;
        let tree = RatchetTree::decode(cursor, suite)?;
        let interim_transcript_hash = codec::decode_vec_bytes(VecSize::VecU8, cursor)?;
        let init_secret = codec::decode_vec_bytes(VecSize::VecU8, cursor)?;
        Ok(Self {
            version,
            group_id,
            epoch,
            tree,
            interim_transcript_hash,
            init_secret,
        })
    }

    pub fn marshal(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        self.encode(&mut buffer);
        buffer
    }

    pub fn hash(&self, suite: CipherSuite) -> Vec<u8> {
        crypto::digest(suite, &self.marshal())
    }
}

// struct {
//   opaque client_init_key_id<0..255>;
//   CipherSuite cipher_suite;
//   HPKECiphertext encrypted_welcome_info;
// } Welcome;
#[derive(Clone, Debug, PartialEq)]
pub struct Welcome {
    pub client_init_key_id: Vec<u8>,
    pub cipher_suite: CipherSuite,
    pub encrypted_welcome_info: HpkeCiphertext,
}

impl Welcome {
    /// Seal a WelcomeInfo to the joiner's init public key
    pub fn new(
        client_init_key_id: &[u8],
        init_key: &DhPublicKey,
        info: &WelcomeInfo,
        rng: &Rng,
    ) -> MlsResult<Self> {
        Ok(Self {
            client_init_key_id: client_init_key_id.to_vec(),
            cipher_suite: init_key.cipher_suite(),
            encrypted_welcome_info: init_key.seal(rng, &[], &info.marshal())?,
        })
    }

    pub fn decrypt(&self, init_private_key: &DhPrivateKey) -> MlsResult<WelcomeInfo> {
        let raw = init_private_key.open(&self.encrypted_welcome_info, &[])?;
        let mut cursor = Cursor::new(&raw);
        let info = WelcomeInfo::decode(&mut cursor, self.cipher_suite)?;
        if !cursor.is_empty() {
            return Err(MlsError::InvalidTlsSyntax(
                "trailing bytes after WelcomeInfo".into(),
            ));
        }
        Ok(info)
    }
}

impl Codec for Welcome {
    fn encode(&self, buffer: &mut Vec<u8>) {
        codec::encode_vec_bytes(VecSize::VecU8, buffer, &self.client_init_key_id);
        self.cipher_suite.encode(buffer);
        self.encrypted_welcome_info.encode(buffer);
    }

    fn decode(cursor: &mut Cursor) -> MlsResult<Self> {
        let client_init_key_id = codec::decode_vec_bytes(VecSize::VecU8, cursor)?;
        let cipher_suite = CipherSuite::decode(cursor)?;
        let encrypted_welcome_info = HpkeCiphertext::decode(cursor, cipher_suite)?;
        Ok(Self {
            client_init_key_id,
            cipher_suite,
            encrypted_welcome_info,
        })
    }
}

// struct {
//     uint32 index;
//     ClientInitKey init_key;
//     opaque welcome_info_hash<0..255>;
// } Add;
#[derive(Clone, Debug, PartialEq)]
pub struct Add {
    pub index: LeafIndex,
    pub init_key: ClientInitKey,
    pub welcome_info_hash: Vec<u8>,
}

// struct {
//     DirectPath path;
// } Update;
#[derive(Clone, Debug, PartialEq)]
pub struct Update {
    pub path: DirectPath,
}

// struct {
//     uint32 removed;
//     DirectPath path;
// } Remove;
#[derive(Clone, Debug, PartialEq)]
pub struct Remove {
    pub removed: LeafIndex,
    pub path: DirectPath,
}

const OPERATION_TYPE_ADD: u8 = 1;
const OPERATION_TYPE_UPDATE: u8 = 2;
const OPERATION_TYPE_REMOVE: u8 = 3;

/// A group-changing operation. The wire tag 0 ("none") of the original
/// encoding is not a value of this type; an unknown tag fails to decode.
#[derive(Clone, Debug, PartialEq)]
pub enum GroupOperation {
    Add(Add),
    Update(Update),
    Remove(Remove),
}

impl GroupOperation {
    pub fn encode(&self, buffer: &mut Vec<u8>) {
        match self {
            GroupOperation::Add(add) => {
                OPERATION_TYPE_ADD.encode(buffer);
                add.index.encode(buffer);
                add.init_key.encode(buffer);
                codec::encode_vec_bytes(VecSize::VecU8, buffer, &add.welcome_info_hash);
            }
            GroupOperation::Update(update) => {
                OPERATION_TYPE_UPDATE.encode(buffer);
                update.path.encode(buffer);
            }
            GroupOperation::Remove(remove) => {
                OPERATION_TYPE_REMOVE.encode(buffer);
                remove.removed.encode(buffer);
                remove.path.encode(buffer);
            }
        }
    }

    pub fn decode(cursor: &mut Cursor, suite: CipherSuite) -> MlsResult<Self> {
        match u8::decode(cursor)? {
            OPERATION_TYPE_ADD => Ok(GroupOperation::Add(Add {
                index: u32::decode(cursor)?,
                init_key: ClientInitKey::decode(cursor)?,
                welcome_info_hash: codec::decode_vec_bytes(VecSize::VecU8, cursor)?,
            })),
            OPERATION_TYPE_UPDATE => Ok(GroupOperation::Update(Update {
                path: DirectPath::decode(cursor, suite)?,
            })),
            OPERATION_TYPE_REMOVE => Ok(GroupOperation::Remove(Remove {
                removed: u32::decode(cursor)?,
                path: DirectPath::decode(cursor, suite)?,
            })),
            tag => Err(MlsError::InvalidTlsSyntax(format!(
                "unknown group operation type {tag}"
            ))),
        }
    }
}

/// Content discriminator of the two framing layers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentType {
    Handshake,
    Application,
}

impl Codec for ContentType {
    fn encode(&self, buffer: &mut Vec<u8>) {
        let tag: u8 = match self {
            ContentType::Handshake => 1,
            ContentType::Application => 2,
        };
        tag.encode(buffer);
    }

    fn decode(cursor: &mut Cursor) -> MlsResult<Self> {
        match u8::decode(cursor)? {
            1 => Ok(ContentType::Handshake),
            2 => Ok(ContentType::Application),
            tag => Err(MlsError::InvalidTlsSyntax(format!(
                "unknown content type {tag}"
            ))),
        }
    }
}

/// Content variants of a signed plaintext
#[derive(Clone, Debug, PartialEq)]
pub enum PlaintextContent {
    Handshake {
        operation: GroupOperation,
        confirmation: Vec<u8>,
    },
    Application {
        application_data: Vec<u8>,
    },
}

// struct {
//     opaque group_id<0..255>;
//     uint32 epoch;
//     uint32 sender;
//     ContentType content_type;
//     select (content_type) { ... };
//     opaque signature<0..2^16-1>;
// } MLSPlaintext;
#[derive(Clone, Debug, PartialEq)]
pub struct MLSPlaintext {
    pub group_id: Vec<u8>,
    pub epoch: u32,
    pub sender: LeafIndex,
    pub content: PlaintextContent,
    pub signature: Vec<u8>,
}

impl MLSPlaintext {
    pub fn new_handshake(
        group_id: &[u8],
        epoch: u32,
        sender: LeafIndex,
        operation: GroupOperation,
    ) -> Self {
        Self {
            group_id: group_id.to_vec(),
            epoch,
            sender,
            content: PlaintextContent::Handshake {
                operation,
                confirmation: Vec::new(),
            },
            signature: Vec::new(),
        }
    }

    pub fn new_application(
        group_id: &[u8],
        epoch: u32,
        sender: LeafIndex,
        application_data: &[u8],
    ) -> Self {
        Self {
            group_id: group_id.to_vec(),
            epoch,
            sender,
            content: PlaintextContent::Application {
                application_data: application_data.to_vec(),
            },
            signature: Vec::new(),
        }
    }

    pub fn content_type(&self) -> ContentType {
        match &self.content {
            PlaintextContent::Handshake { .. } => ContentType::Handshake,
            PlaintextContent::Application { .. } => ContentType::Application,
        }
    }

    pub fn operation(&self) -> Option<&GroupOperation> {
        match &self.content {
            PlaintextContent::Handshake { operation, .. } => Some(operation),
            PlaintextContent::Application { .. } => None,
        }
    }

    pub fn confirmation(&self) -> Option<&[u8]> {
        match &self.content {
            PlaintextContent::Handshake { confirmation, .. } => Some(confirmation),
            PlaintextContent::Application { .. } => None,
        }
    }

    pub fn set_confirmation(&mut self, tag: Vec<u8>) {
        if let PlaintextContent::Handshake { confirmation, .. } = &mut self.content {
            *confirmation = tag;
        }
    }

    /// Everything the signature covers: header plus content tail
    pub fn to_be_signed(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        codec::encode_vec_bytes(VecSize::VecU8, &mut buffer, &self.group_id);
        self.epoch.encode(&mut buffer);
        self.sender.encode(&mut buffer);
        self.content_type().encode(&mut buffer);
        match &self.content {
            PlaintextContent::Handshake {
                operation,
                confirmation,
            } => {
                operation.encode(&mut buffer);
                codec::encode_vec_bytes(VecSize::VecU8, &mut buffer, confirmation);
            }
            PlaintextContent::Application { application_data } => {
                codec::encode_vec_bytes(VecSize::VecU32, &mut buffer, application_data);
            }
        }
        buffer
    }

    pub fn sign(&mut self, credential: &Credential) -> MlsResult<()> {
        self.signature = credential.sign(&self.to_be_signed())?;
        Ok(())
    }

    pub fn verify(&self, public_key: &SignaturePublicKey) -> bool {
        public_key.verify(&self.to_be_signed(), &self.signature)
    }

    // struct {
    //   opaque group_id<0..255>;
    //   uint32 epoch;
    //   uint32 sender;
    //   ContentType content_type = handshake;
    //   GroupOperation operation;
    // } MLSPlaintextOpContent;
    //
    /// The transcript-hash content segment: the operation without its
    /// authentication
    pub fn transcript_content(&self) -> MlsResult<Vec<u8>> {
        let operation = self.operation().ok_or_else(|| {
            MlsError::InvalidParameter("application data has no transcript content".into())
        })?;
        let mut buffer = Vec::new();
        codec::encode_vec_bytes(VecSize::VecU8, &mut buffer, &self.group_id);
        self.epoch.encode(&mut buffer);
        self.sender.encode(&mut buffer);
        self.content_type().encode(&mut buffer);
        operation.encode(&mut buffer);
        Ok(buffer)
    }

    // struct {
    //   opaque confirmation<0..255>;
    //   opaque signature<0..2^16-1>;
    // } MLSPlaintextOpAuthData;
    pub fn auth_data(&self) -> MlsResult<Vec<u8>> {
        let confirmation = self.confirmation().ok_or_else(|| {
            MlsError::InvalidParameter("application data has no auth segment".into())
        })?;
        let mut buffer = Vec::new();
        codec::encode_vec_bytes(VecSize::VecU8, &mut buffer, confirmation);
        codec::encode_vec_bytes(VecSize::VecU16, &mut buffer, &self.signature);
        Ok(buffer)
    }

    pub fn encode(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&self.to_be_signed());
        codec::encode_vec_bytes(VecSize::VecU16, buffer, &self.signature);
    }

    pub fn decode(cursor: &mut Cursor, suite: CipherSuite) -> MlsResult<Self> {
        let group_id = codec::decode_vec_bytes(VecSize::VecU8, cursor)?;
        let epoch = u32::decode(cursor)?;
        let sender = u32::decode(cursor)?;
        let content = match ContentType::decode(cursor)? {
            ContentType::Handshake => {
                let operation = GroupOperation::decode(cursor, suite)?;
                let confirmation = codec::decode_vec_bytes(VecSize::VecU8, cursor)?;
                PlaintextContent::Handshake {
                    operation,
                    confirmation,
                }
            }
            ContentType::Application => PlaintextContent::Application {
                application_data: codec::decode_vec_bytes(VecSize::VecU32, cursor)?,
            },
        };
        let signature = codec::decode_vec_bytes(VecSize::VecU16, cursor)?;
        Ok(Self {
            group_id,
            epoch,
            sender,
            content,
            signature,
        })
    }

    pub fn marshal(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        self.encode(&mut buffer);
        buffer
    }

    pub fn unmarshal(bytes: &[u8], suite: CipherSuite) -> MlsResult<Self> {
        let mut cursor = Cursor::new(bytes);
        let plaintext = Self::decode(&mut cursor, suite)?;
        if !cursor.is_empty() {
            return Err(MlsError::InvalidTlsSyntax(
                "trailing bytes after MLSPlaintext".into(),
            ));
        }
        Ok(plaintext)
    }
}

// struct {
//     opaque content[L];
//     opaque signature[S];
//     uint16 sig_len = S;
//     uint8  marker  = 0x01;
//     uint8  zero_padding[P];
// } MLSContentPlaintext;
//
/// Frame content and signature for AEAD protection, zero-padded up to a
/// multiple of the block size
pub fn frame_content(content: &[u8], signature: &[u8], block_size: usize) -> Vec<u8> {
    let mut framed = content.to_vec();
    framed.extend_from_slice(signature);
    (signature.len() as u16).encode(&mut framed);
    framed.push(0x01);
    if block_size > 0 {
        let remainder = framed.len() % block_size;
        if remainder != 0 {
            framed.extend(std::iter::repeat(0u8).take(block_size - remainder));
        }
    }
    framed
}

/// Undo [`frame_content`]: strip padding, check the marker, split content
/// from signature
pub fn unframe_content(framed: &[u8]) -> MlsResult<(Vec<u8>, Vec<u8>)> {
    let mut cut = framed.len();
    while cut > 0 && framed[cut - 1] == 0 {
        cut -= 1;
    }
    if cut == 0 || framed[cut - 1] != 0x01 {
        return Err(MlsError::ProtocolError("invalid framing marker".into()));
    }
    cut -= 1;
    if cut < 2 {
        return Err(MlsError::ProtocolError("framed content too short".into()));
    }
    let sig_len = u16::from_be_bytes([framed[cut - 2], framed[cut - 1]]) as usize;
    cut -= 2;
    if sig_len > cut {
        return Err(MlsError::ProtocolError("invalid signature size".into()));
    }
    let content = framed[..cut - sig_len].to_vec();
    let signature = framed[cut - sig_len..cut].to_vec();
    Ok((content, signature))
}

// struct {
//     uint32 sender;
//     uint32 generation;
// } MLSSenderData;
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SenderData {
    pub sender: LeafIndex,
    pub generation: u32,
}

impl Codec for SenderData {
    fn encode(&self, buffer: &mut Vec<u8>) {
        self.sender.encode(buffer);
        self.generation.encode(buffer);
    }

    fn decode(cursor: &mut Cursor) -> MlsResult<Self> {
        Ok(Self {
            sender: u32::decode(cursor)?,
            generation: u32::decode(cursor)?,
        })
    }
}

// struct {
//     opaque group_id<0..255>;
//     uint32 epoch;
//     ContentType content_type;
//     opaque sender_data_nonce<0..255>;
//     opaque encrypted_sender_data<0..255>;
//     opaque ciphertext<0..2^32-1>;
// } MLSCiphertext;
#[derive(Clone, Debug, PartialEq)]
pub struct MLSCiphertext {
    pub group_id: Vec<u8>,
    pub epoch: u32,
    pub content_type: ContentType,
    pub sender_data_nonce: Vec<u8>,
    pub encrypted_sender_data: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

impl MLSCiphertext {
    /// The additional data binding the content encryption to the header
    pub fn content_aad(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        codec::encode_vec_bytes(VecSize::VecU8, &mut buffer, &self.group_id);
        self.epoch.encode(&mut buffer);
        self.content_type.encode(&mut buffer);
        codec::encode_vec_bytes(VecSize::VecU8, &mut buffer, &self.sender_data_nonce);
        codec::encode_vec_bytes(VecSize::VecU8, &mut buffer, &self.encrypted_sender_data);
        buffer
    }

    /// The additional data for the sender-data encryption
    pub fn sender_data_aad(group_id: &[u8], epoch: u32, content_type: ContentType) -> Vec<u8> {
        let mut buffer = Vec::new();
        codec::encode_vec_bytes(VecSize::VecU8, &mut buffer, group_id);
        epoch.encode(&mut buffer);
        content_type.encode(&mut buffer);
        buffer
    }
}

impl Codec for MLSCiphertext {
    fn encode(&self, buffer: &mut Vec<u8>) {
        codec::encode_vec_bytes(VecSize::VecU8, buffer, &self.group_id);
        self.epoch.encode(buffer);
        self.content_type.encode(buffer);
        codec::encode_vec_bytes(VecSize::VecU8, buffer, &self.sender_data_nonce);
        codec::encode_vec_bytes(VecSize::VecU8, buffer, &self.encrypted_sender_data);
        codec::encode_vec_bytes(VecSize::VecU32, buffer, &self.ciphertext);
    }

    fn decode(cursor: &mut Cursor) -> MlsResult<Self> {
        Ok(Self {
            group_id: codec::decode_vec_bytes(VecSize::VecU8, cursor)?,
            epoch: u32::decode(cursor)?,
            content_type: ContentType::decode(cursor)?,
            sender_data_nonce: codec::decode_vec_bytes(VecSize::VecU8, cursor)?,
            encrypted_sender_data: codec::decode_vec_bytes(VecSize::VecU8, cursor)?,
            ciphertext: codec::decode_vec_bytes(VecSize::VecU32, cursor)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{SignaturePrivateKey, SignatureScheme};

    const SUITE: CipherSuite = CipherSuite::X25519Sha256Aes128Gcm;

    fn test_credential(name: &[u8]) -> Credential {
        let key = SignaturePrivateKey::derive(SignatureScheme::Ed25519, name).unwrap();
        Credential::basic_with_key(name, key)
    }

    fn test_cik(name: &[u8]) -> ClientInitKey {
        ClientInitKey::fresh(
            &[8, 9, 0xA, 0xB],
            &[SUITE, CipherSuite::P256Sha256Aes128Gcm],
            name,
            &test_credential(name),
        )
        .unwrap()
    }

    #[test]
    fn test_client_init_key_signature() {
        let cik = test_cik(b"alice");
        assert!(cik.verify());
        assert_eq!(cik.cipher_suites.len(), cik.init_keys.len());
        assert!(cik.find_init_key(SUITE).is_some());
        assert!(cik.find_private_key(SUITE).is_some());
        assert!(cik.find_init_key(CipherSuite::X448Sha512Aes256Gcm).is_none());

        let mut tampered = cik.clone();
        tampered.client_init_key_id = vec![0xFF];
        // the id is outside the signed content
        assert!(tampered.verify());
        tampered.init_keys[0][0] ^= 1;
        assert!(!tampered.verify());
    }

    #[test]
    fn test_client_init_key_round_trip() {
        let cik = test_cik(b"bob");
        let decoded: ClientInitKey = codec::unmarshal(&codec::marshal(&cik)).unwrap();
        assert_eq!(decoded, cik);
        assert!(decoded.verify());
        // private keys never travel
        assert!(decoded.find_private_key(SUITE).is_none());
    }

    #[test]
    fn test_welcome_round_trip() {
        let rng = Rng::from_seed([11; 32]);
        let tree = RatchetTree::from_secrets(
            SUITE,
            &[vec![1; 32], vec![2; 32]],
            &[test_credential(b"a"), test_credential(b"b")],
        )
        .unwrap();
        let info = WelcomeInfo::new(&[0, 1, 2, 3], 7, tree, &[0xAA; 32], &[0xBB; 32]);

        let joiner = DhPrivateKey::derive(SUITE, b"joiner").unwrap();
        let welcome = Welcome::new(&[9], joiner.public_key(), &info, &rng).unwrap();

        let decoded: Welcome = codec::unmarshal(&codec::marshal(&welcome)).unwrap();
        assert_eq!(decoded, welcome);

        let opened = decoded.decrypt(&joiner).unwrap();
        assert_eq!(opened, info);
        assert_eq!(opened.hash(SUITE), info.hash(SUITE));

        let stranger = DhPrivateKey::derive(SUITE, b"stranger").unwrap();
        assert!(decoded.decrypt(&stranger).is_err());
    }

    #[test]
    fn test_handshake_plaintext_round_trips() {
        let rng = Rng::from_seed([12; 32]);
        let tree = RatchetTree::from_secrets(
            SUITE,
            &[vec![1; 32], vec![2; 32], vec![3; 32], vec![4; 32]],
            &[
                test_credential(b"a"),
                test_credential(b"b"),
                test_credential(b"c"),
                test_credential(b"d"),
            ],
        )
        .unwrap();
        let (path, _) = tree.encrypt(0, &[9; 32], &rng).unwrap();

        let operations = [
            GroupOperation::Add(Add {
                index: 3,
                init_key: test_cik(b"new"),
                welcome_info_hash: vec![0xCC; 32],
            }),
            GroupOperation::Update(Update { path: path.clone() }),
            GroupOperation::Remove(Remove { removed: 2, path }),
        ];

        let credential = test_credential(b"sender");
        for operation in operations {
            let mut plaintext = MLSPlaintext::new_handshake(&[0, 1, 2, 3], 5, 1, operation);
            plaintext.set_confirmation(vec![0xDD; 32]);
            plaintext.sign(&credential).unwrap();
            assert!(plaintext.verify(credential.public_key()));

            let decoded = MLSPlaintext::unmarshal(&plaintext.marshal(), SUITE).unwrap();
            assert_eq!(decoded, plaintext);
            assert!(decoded.verify(credential.public_key()));
        }
    }

    #[test]
    fn test_application_plaintext_round_trip() {
        let credential = test_credential(b"sender");
        let mut plaintext = MLSPlaintext::new_application(&[0, 1, 2, 3], 5, 2, &[1, 2, 3, 4]);
        plaintext.sign(&credential).unwrap();

        let decoded = MLSPlaintext::unmarshal(&plaintext.marshal(), SUITE).unwrap();
        assert_eq!(decoded, plaintext);
        assert!(decoded.transcript_content().is_err());
        assert!(decoded.auth_data().is_err());
    }

    #[test]
    fn test_transcript_segments_exclude_authentication() {
        let credential = test_credential(b"sender");
        let mut plaintext = MLSPlaintext::new_handshake(
            &[0, 1, 2, 3],
            5,
            1,
            GroupOperation::Add(Add {
                index: 3,
                init_key: test_cik(b"new"),
                welcome_info_hash: vec![0xCC; 32],
            }),
        );
        let content_before = plaintext.transcript_content().unwrap();
        plaintext.set_confirmation(vec![0xDD; 32]);
        plaintext.sign(&credential).unwrap();

        // confirmation and signature do not alter the content segment
        assert_eq!(plaintext.transcript_content().unwrap(), content_before);
        // but they are the auth segment
        let auth = plaintext.auth_data().unwrap();
        assert!(auth.len() >= 32 + plaintext.signature.len());
    }

    #[test]
    fn test_content_framing() {
        let framed = frame_content(b"hello", &[0xEE; 64], 32);
        assert_eq!(framed.len() % 32, 0);

        let (content, signature) = unframe_content(&framed).unwrap();
        assert_eq!(content, b"hello");
        assert_eq!(signature, vec![0xEE; 64]);
    }

    #[test]
    fn test_content_framing_rejects_garbage() {
        // all zeros: no marker
        assert!(unframe_content(&[0u8; 16]).is_err());
        // marker present but sig_len exceeds the content
        let mut framed = vec![0u8; 4];
        framed.extend_from_slice(&[0xFF, 0xFF, 0x01]);
        assert!(unframe_content(&framed).is_err());
    }

    #[test]
    fn test_ciphertext_round_trip() {
        let ciphertext = MLSCiphertext {
            group_id: vec![0, 1, 2, 3],
            epoch: 3,
            content_type: ContentType::Application,
            sender_data_nonce: vec![7; 12],
            encrypted_sender_data: vec![8; 24],
            ciphertext: vec![9; 100],
        };
        let decoded: MLSCiphertext = codec::unmarshal(&codec::marshal(&ciphertext)).unwrap();
        assert_eq!(decoded, ciphertext);
    }

    #[test]
    fn test_unknown_tags_fail() {
        // unknown group operation tag
        let mut cursor = Cursor::new(&[9]);
        assert!(GroupOperation::decode(&mut cursor, SUITE).is_err());

        // content type 0 is not a wire value
        let mut cursor = Cursor::new(&[0]);
        assert!(ContentType::decode(&mut cursor).is_err());
    }
}
