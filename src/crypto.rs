//! Cipher-suite facade
//!
//! Abstracts the five primitives (hash, KDF, AEAD, Diffie-Hellman,
//! signature) behind a suite tag. Every cryptographic value carries its
//! suite; mixing suites in one operation fails.
//!
//! The P-256 and X25519 suites are fully bound. The P-521 and X448 tags
//! are understood on the wire (negotiation and decoding work) but their
//! curve operations report `UnsupportedSuite`.

use std::fmt;
use std::sync::Mutex;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand_chacha::rand_core::{SeedableRng, TryRngCore};
use sha2::{Digest, Sha256, Sha512};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::codec::{self, Codec, Cursor, VecSize};
use crate::error::{MlsError, MlsResult};

/// Label prefix shared by every key derivation in the protocol
const LABEL_PREFIX: &[u8] = b"mls10 ";

/// A vector of zero bytes, used as the initial secret and the update
/// secret of member additions
pub fn zero_bytes(length: usize) -> Vec<u8> {
    vec![0u8; length]
}

/// Constant-time byte string comparison
pub fn constant_time_eq(lhs: &[u8], rhs: &[u8]) -> bool {
    bool::from(lhs.ct_eq(rhs))
}

/// Cryptographically secure random number generator (ChaCha20)
///
/// Entropy enters the core only through a handle of this type, so tests
/// can substitute a seeded generator instead of flipping a global switch.
#[derive(Debug)]
pub struct Rng {
    inner: Mutex<rand_chacha::ChaCha20Rng>,
}

impl Default for Rng {
    fn default() -> Self {
        Self {
            inner: Mutex::new(rand_chacha::ChaCha20Rng::from_os_rng()),
        }
    }
}

impl Rng {
    /// Deterministic generator for reproducible protocol runs
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            inner: Mutex::new(rand_chacha::ChaCha20Rng::from_seed(seed)),
        }
    }

    pub fn random_array<const N: usize>(&self) -> MlsResult<[u8; N]> {
        let mut rng = self
            .inner
            .lock()
            .map_err(|_| MlsError::RngFailure("rng lock poisoned".into()))?;
        let mut out = [0u8; N];
        rng.try_fill_bytes(&mut out)
            .map_err(|_| MlsError::RngFailure("not enough randomness".into()))?;
        Ok(out)
    }

    pub fn random_vec(&self, length: usize) -> MlsResult<Vec<u8>> {
        let mut rng = self
            .inner
            .lock()
            .map_err(|_| MlsError::RngFailure("rng lock poisoned".into()))?;
        let mut out = vec![0u8; length];
        rng.try_fill_bytes(&mut out)
            .map_err(|_| MlsError::RngFailure("not enough randomness".into()))?;
        Ok(out)
    }
}

/// Cipher suite selector
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CipherSuite {
    P256Sha256Aes128Gcm,
    P521Sha512Aes256Gcm,
    X25519Sha256Aes128Gcm,
    X448Sha512Aes256Gcm,
}

impl CipherSuite {
    pub fn tag(self) -> u16 {
        match self {
            CipherSuite::P256Sha256Aes128Gcm => 0x0000,
            CipherSuite::P521Sha512Aes256Gcm => 0x0001,
            CipherSuite::X25519Sha256Aes128Gcm => 0x0002,
            CipherSuite::X448Sha512Aes256Gcm => 0x0003,
        }
    }

    pub fn from_tag(tag: u16) -> MlsResult<Self> {
        match tag {
            0x0000 => Ok(CipherSuite::P256Sha256Aes128Gcm),
            0x0001 => Ok(CipherSuite::P521Sha512Aes256Gcm),
            0x0002 => Ok(CipherSuite::X25519Sha256Aes128Gcm),
            0x0003 => Ok(CipherSuite::X448Sha512Aes256Gcm),
            _ => Err(MlsError::ProtocolError(format!(
                "unknown cipher suite {tag:#06x}"
            ))),
        }
    }

    /// Output size of the suite hash, also the size of derived secrets
    pub fn hash_len(self) -> usize {
        match self {
            CipherSuite::P256Sha256Aes128Gcm | CipherSuite::X25519Sha256Aes128Gcm => 32,
            CipherSuite::P521Sha512Aes256Gcm | CipherSuite::X448Sha512Aes256Gcm => 64,
        }
    }

    /// AEAD key size
    pub fn key_len(self) -> usize {
        match self {
            CipherSuite::P256Sha256Aes128Gcm | CipherSuite::X25519Sha256Aes128Gcm => 16,
            CipherSuite::P521Sha512Aes256Gcm | CipherSuite::X448Sha512Aes256Gcm => 32,
        }
    }

    /// AEAD nonce size
    pub fn nonce_len(self) -> usize {
        12
    }

    /// Serialized DH public key size (SEC1 uncompressed for NIST curves)
    pub fn dh_len(self) -> usize {
        match self {
            CipherSuite::P256Sha256Aes128Gcm => 65,
            CipherSuite::P521Sha512Aes256Gcm => 133,
            CipherSuite::X25519Sha256Aes128Gcm => 32,
            CipherSuite::X448Sha512Aes256Gcm => 56,
        }
    }

    fn ensure_bound(self) -> MlsResult<()> {
        match self {
            CipherSuite::P256Sha256Aes128Gcm | CipherSuite::X25519Sha256Aes128Gcm => Ok(()),
            other => Err(MlsError::UnsupportedSuite(format!("{other:?}"))),
        }
    }
}

impl Codec for CipherSuite {
    fn encode(&self, buffer: &mut Vec<u8>) {
        self.tag().encode(buffer);
    }

    fn decode(cursor: &mut Cursor) -> MlsResult<Self> {
        CipherSuite::from_tag(u16::decode(cursor)?)
    }
}

/// Signature scheme selector
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SignatureScheme {
    P256Sha256,
    P521Sha512,
    Ed25519,
    Ed448,
}

impl SignatureScheme {
    pub fn tag(self) -> u16 {
        match self {
            SignatureScheme::P256Sha256 => 0x0403,
            SignatureScheme::P521Sha512 => 0x0603,
            SignatureScheme::Ed25519 => 0x0807,
            SignatureScheme::Ed448 => 0x0808,
        }
    }

    pub fn from_tag(tag: u16) -> MlsResult<Self> {
        match tag {
            0x0403 => Ok(SignatureScheme::P256Sha256),
            0x0603 => Ok(SignatureScheme::P521Sha512),
            0x0807 => Ok(SignatureScheme::Ed25519),
            0x0808 => Ok(SignatureScheme::Ed448),
            _ => Err(MlsError::ProtocolError(format!(
                "unknown signature scheme {tag:#06x}"
            ))),
        }
    }

    fn ensure_bound(self) -> MlsResult<()> {
        match self {
            SignatureScheme::P256Sha256 | SignatureScheme::Ed25519 => Ok(()),
            other => Err(MlsError::UnsupportedSuite(format!("{other:?}"))),
        }
    }
}

impl Codec for SignatureScheme {
    fn encode(&self, buffer: &mut Vec<u8>) {
        self.tag().encode(buffer);
    }

    fn decode(cursor: &mut Cursor) -> MlsResult<Self> {
        SignatureScheme::from_tag(u16::decode(cursor)?)
    }
}

// ===== Hash, HMAC, HKDF =====

/// Suite hash of a byte string
pub fn digest(suite: CipherSuite, data: &[u8]) -> Vec<u8> {
    match suite.hash_len() {
        32 => Sha256::digest(data).to_vec(),
        _ => Sha512::digest(data).to_vec(),
    }
}

/// HMAC under the suite hash
pub fn hmac_sign(suite: CipherSuite, key: &[u8], data: &[u8]) -> Vec<u8> {
    match suite.hash_len() {
        32 => {
            let mut mac =
                <Hmac<Sha256> as Mac>::new_from_slice(key).expect("hmac accepts any key length");
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
        _ => {
            let mut mac =
                <Hmac<Sha512> as Mac>::new_from_slice(key).expect("hmac accepts any key length");
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
    }
}

/// HKDF-Extract under the suite hash
pub fn hkdf_extract(suite: CipherSuite, salt: &[u8], ikm: &[u8]) -> Vec<u8> {
    match suite.hash_len() {
        32 => Hkdf::<Sha256>::extract(Some(salt), ikm).0.to_vec(),
        _ => Hkdf::<Sha512>::extract(Some(salt), ikm).0.to_vec(),
    }
}

/// Bare HKDF-Expand with a literal info string, no label wrapping
pub fn hkdf_expand(
    suite: CipherSuite,
    prk: &[u8],
    info: &[u8],
    length: usize,
) -> MlsResult<Vec<u8>> {
    let short_prk = || MlsError::InvalidParameter("HKDF PRK shorter than the suite hash".into());
    let bad_length = || MlsError::InvalidParameter("HKDF output length out of bounds".into());
    let mut okm = vec![0u8; length];
    match suite.hash_len() {
        32 => Hkdf::<Sha256>::from_prk(prk)
            .map_err(|_| short_prk())?
            .expand(info, &mut okm)
            .map_err(|_| bad_length())?,
        _ => Hkdf::<Sha512>::from_prk(prk)
            .map_err(|_| short_prk())?
            .expand(info, &mut okm)
            .map_err(|_| bad_length())?,
    }
    Ok(okm)
}

// struct {
//     uint16 length;
//     opaque label<6..255> = "mls10 " + Label;
//     opaque context<0..255>;
// } HKDFLabel;
fn hkdf_label(label: &str, context: &[u8], length: usize) -> Vec<u8> {
    let mut full_label = LABEL_PREFIX.to_vec();
    full_label.extend_from_slice(label.as_bytes());

    let mut info = Vec::new();
    (length as u16).encode(&mut info);
    codec::encode_vec_bytes(VecSize::VecU8, &mut info, &full_label);
    codec::encode_vec_bytes(VecSize::VecU8, &mut info, context);
    info
}

/// HKDF-Expand-Label following the TLS 1.3 convention
pub fn hkdf_expand_label(
    suite: CipherSuite,
    secret: &[u8],
    label: &str,
    context: &[u8],
    length: usize,
) -> Vec<u8> {
    hkdf_expand(suite, secret, &hkdf_label(label, context, length), length)
        .expect("derived secrets are full-size PRKs")
}

/// Derive-Secret(S, L, C) = HKDF-Expand-Label(S, L, hash(C), hash_len)
pub fn derive_secret(suite: CipherSuite, secret: &[u8], label: &str, context: &[u8]) -> Vec<u8> {
    let hashed = digest(suite, context);
    hkdf_expand_label(suite, secret, label, &hashed, suite.hash_len())
}

// ===== AEAD =====

/// AEAD encryption under the suite algorithm
pub fn aead_seal(
    suite: CipherSuite,
    key: &[u8],
    nonce: &[u8],
    aad: &[u8],
    plaintext: &[u8],
) -> MlsResult<Vec<u8>> {
    let payload = Payload {
        msg: plaintext,
        aad,
    };
    let sealed = match suite.key_len() {
        16 => {
            let cipher = Aes128Gcm::new_from_slice(key)
                .map_err(|_| MlsError::InvalidParameter("bad AEAD key length".into()))?;
            cipher.encrypt(aes_gcm::Nonce::from_slice(nonce), payload)
        }
        _ => {
            let cipher = Aes256Gcm::new_from_slice(key)
                .map_err(|_| MlsError::InvalidParameter("bad AEAD key length".into()))?;
            cipher.encrypt(aes_gcm::Nonce::from_slice(nonce), payload)
        }
    };
    sealed.map_err(|_| MlsError::ProtocolError("AEAD encryption failed".into()))
}

/// AEAD decryption under the suite algorithm
pub fn aead_open(
    suite: CipherSuite,
    key: &[u8],
    nonce: &[u8],
    aad: &[u8],
    ciphertext: &[u8],
) -> MlsResult<Vec<u8>> {
    let payload = Payload {
        msg: ciphertext,
        aad,
    };
    let opened = match suite.key_len() {
        16 => {
            let cipher = Aes128Gcm::new_from_slice(key)
                .map_err(|_| MlsError::InvalidParameter("bad AEAD key length".into()))?;
            cipher.decrypt(aes_gcm::Nonce::from_slice(nonce), payload)
        }
        _ => {
            let cipher = Aes256Gcm::new_from_slice(key)
                .map_err(|_| MlsError::InvalidParameter("bad AEAD key length".into()))?;
            cipher.decrypt(aes_gcm::Nonce::from_slice(nonce), payload)
        }
    };
    opened.map_err(|_| MlsError::ProtocolError("AEAD decryption failed".into()))
}

// ===== Diffie-Hellman keys =====

/// A DH public key under some suite
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DhPublicKey {
    suite: CipherSuite,
    data: Vec<u8>,
}

impl DhPublicKey {
    pub fn from_bytes(suite: CipherSuite, data: &[u8]) -> MlsResult<Self> {
        if data.len() != suite.dh_len() {
            return Err(MlsError::InvalidParameter(format!(
                "DH public key must be {} bytes, got {}",
                suite.dh_len(),
                data.len()
            )));
        }
        Ok(Self {
            suite,
            data: data.to_vec(),
        })
    }

    pub fn cipher_suite(&self) -> CipherSuite {
        self.suite
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// HPKE Setup + Seal: encrypt to this public key
    pub fn seal(&self, rng: &Rng, aad: &[u8], plaintext: &[u8]) -> MlsResult<HpkeCiphertext> {
        let ephemeral = DhPrivateKey::generate(self.suite, rng)?;
        let shared = ephemeral.shared_secret(self)?;
        let enc = ephemeral.public_key().as_bytes().to_vec();
        let (key, nonce) = hpke_key_nonce(self.suite, &shared, &enc, &self.data);
        let ciphertext = aead_seal(self.suite, &key, &nonce, aad, plaintext)?;
        Ok(HpkeCiphertext { enc, ciphertext })
    }
}

/// A DH private key; the scalar is erased on drop
#[derive(Clone)]
pub struct DhPrivateKey {
    suite: CipherSuite,
    data: Zeroizing<Vec<u8>>,
    public_key: DhPublicKey,
}

impl fmt::Debug for DhPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DhPrivateKey")
            .field("suite", &self.suite)
            .field("data", &"***")
            .finish()
    }
}

impl PartialEq for DhPrivateKey {
    fn eq(&self, other: &Self) -> bool {
        self.suite == other.suite && bool::from(self.data.ct_eq(&other.data))
    }
}

impl DhPrivateKey {
    /// Fresh random key pair
    pub fn generate(suite: CipherSuite, rng: &Rng) -> MlsResult<Self> {
        suite.ensure_bound()?;
        loop {
            let candidate = rng.random_array::<32>()?;
            if let Ok(key) = Self::from_scalar(suite, &candidate) {
                return Ok(key);
            }
        }
    }

    /// Deterministic key pair from a seed secret
    pub fn derive(suite: CipherSuite, seed: &[u8]) -> MlsResult<Self> {
        suite.ensure_bound()?;
        let prk = hkdf_extract(suite, &[], seed);
        // Counter rejection sampling: the first candidate is virtually
        // always a valid scalar, but P-256 admits a negligible failure set.
        for counter in 0u8..=255 {
            let candidate = hkdf_expand_label(suite, &prk, "dh-key", &[counter], 32);
            let candidate: [u8; 32] = match candidate.try_into() {
                Ok(arr) => arr,
                Err(_) => continue,
            };
            if let Ok(key) = Self::from_scalar(suite, &candidate) {
                return Ok(key);
            }
        }
        Err(MlsError::InvalidParameter(
            "could not derive a DH scalar from seed".into(),
        ))
    }

    /// Key pair for a ratchet-tree node: one derive-secret step, then the
    /// usual seed derivation
    pub fn node_derive(suite: CipherSuite, secret: &[u8]) -> MlsResult<Self> {
        let node_secret = derive_secret(suite, secret, "node", &[]);
        Self::derive(suite, &node_secret)
    }

    fn from_scalar(suite: CipherSuite, scalar: &[u8; 32]) -> MlsResult<Self> {
        let public_data = match suite {
            CipherSuite::X25519Sha256Aes128Gcm => {
                let secret = x25519_dalek::StaticSecret::from(*scalar);
                x25519_dalek::PublicKey::from(&secret).as_bytes().to_vec()
            }
            CipherSuite::P256Sha256Aes128Gcm => {
                let secret = p256::SecretKey::from_slice(scalar)
                    .map_err(|_| MlsError::InvalidParameter("scalar out of range".into()))?;
                secret.public_key().to_encoded_point(false).as_bytes().to_vec()
            }
            other => return Err(MlsError::UnsupportedSuite(format!("{other:?}"))),
        };
        Ok(Self {
            suite,
            data: Zeroizing::new(scalar.to_vec()),
            public_key: DhPublicKey {
                suite,
                data: public_data,
            },
        })
    }

    pub fn cipher_suite(&self) -> CipherSuite {
        self.suite
    }

    pub fn public_key(&self) -> &DhPublicKey {
        &self.public_key
    }

    /// Raw DH shared secret with a peer public key
    pub fn shared_secret(&self, peer: &DhPublicKey) -> MlsResult<Zeroizing<Vec<u8>>> {
        if peer.suite != self.suite {
            return Err(MlsError::InvalidParameter("cipher suite mismatch".into()));
        }
        match self.suite {
            CipherSuite::X25519Sha256Aes128Gcm => {
                let mut scalar = [0u8; 32];
                scalar.copy_from_slice(&self.data);
                let secret = x25519_dalek::StaticSecret::from(scalar);
                let mut peer_bytes = [0u8; 32];
                peer_bytes.copy_from_slice(&peer.data);
                let peer_key = x25519_dalek::PublicKey::from(peer_bytes);
                Ok(Zeroizing::new(
                    secret.diffie_hellman(&peer_key).as_bytes().to_vec(),
                ))
            }
            CipherSuite::P256Sha256Aes128Gcm => {
                let secret = p256::SecretKey::from_slice(&self.data)
                    .map_err(|_| MlsError::InvalidParameter("corrupt private key".into()))?;
                let peer_key = p256::PublicKey::from_sec1_bytes(&peer.data)
                    .map_err(|_| MlsError::InvalidParameter("bad P-256 point".into()))?;
                let shared = p256::ecdh::diffie_hellman(
                    secret.to_nonzero_scalar(),
                    peer_key.as_affine(),
                );
                Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
            }
            other => Err(MlsError::UnsupportedSuite(format!("{other:?}"))),
        }
    }

    /// HPKE Setup + Open: decrypt a ciphertext sealed to our public key
    pub fn open(&self, sealed: &HpkeCiphertext, aad: &[u8]) -> MlsResult<Vec<u8>> {
        let ephemeral = DhPublicKey::from_bytes(self.suite, &sealed.enc)?;
        let shared = self.shared_secret(&ephemeral)?;
        let (key, nonce) = hpke_key_nonce(self.suite, &shared, &sealed.enc, &self.public_key.data);
        aead_open(self.suite, &key, &nonce, aad, &sealed.ciphertext)
    }
}

/// HPKE ciphertext: the ephemeral public key and the sealed payload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HpkeCiphertext {
    pub enc: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

impl HpkeCiphertext {
    // The ephemeral key has a suite-fixed length, so it travels raw,
    // back-to-back with the length-prefixed payload.
    pub fn encode(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&self.enc);
        codec::encode_vec_bytes(VecSize::VecU32, buffer, &self.ciphertext);
    }

    pub fn decode(cursor: &mut Cursor, suite: CipherSuite) -> MlsResult<Self> {
        let enc = cursor.take(suite.dh_len())?.to_vec();
        let ciphertext = codec::decode_vec_bytes(VecSize::VecU32, cursor)?;
        Ok(Self { enc, ciphertext })
    }
}

fn hpke_key_nonce(
    suite: CipherSuite,
    shared: &[u8],
    enc: &[u8],
    recipient: &[u8],
) -> (Vec<u8>, Vec<u8>) {
    let mut context = enc.to_vec();
    context.extend_from_slice(recipient);
    let prk = hkdf_extract(suite, &[], shared);
    let key = hkdf_expand_label(suite, &prk, "hpke-key", &context, suite.key_len());
    let nonce = hkdf_expand_label(suite, &prk, "hpke-nonce", &context, suite.nonce_len());
    (key, nonce)
}

// ===== Signature keys =====

/// A signature verification key under some scheme
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignaturePublicKey {
    scheme: SignatureScheme,
    data: Vec<u8>,
}

impl SignaturePublicKey {
    pub fn from_bytes(scheme: SignatureScheme, data: &[u8]) -> Self {
        Self {
            scheme,
            data: data.to_vec(),
        }
    }

    pub fn scheme(&self) -> SignatureScheme {
        self.scheme
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        match self.scheme {
            SignatureScheme::Ed25519 => {
                let Ok(key_bytes) = <[u8; 32]>::try_from(self.data.as_slice()) else {
                    return false;
                };
                let Ok(key) = ed25519_dalek::VerifyingKey::from_bytes(&key_bytes) else {
                    return false;
                };
                let Ok(sig) = ed25519_dalek::Signature::from_slice(signature) else {
                    return false;
                };
                use ed25519_dalek::Verifier;
                key.verify(message, &sig).is_ok()
            }
            SignatureScheme::P256Sha256 => {
                let Ok(key) = p256::ecdsa::VerifyingKey::from_sec1_bytes(&self.data) else {
                    return false;
                };
                let Ok(sig) = p256::ecdsa::Signature::from_der(signature) else {
                    return false;
                };
                use p256::ecdsa::signature::Verifier;
                key.verify(message, &sig).is_ok()
            }
            _ => false,
        }
    }
}

/// A signing key; the seed is erased on drop
#[derive(Clone)]
pub struct SignaturePrivateKey {
    scheme: SignatureScheme,
    data: Zeroizing<Vec<u8>>,
    public_key: SignaturePublicKey,
}

impl fmt::Debug for SignaturePrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignaturePrivateKey")
            .field("scheme", &self.scheme)
            .field("data", &"***")
            .finish()
    }
}

impl PartialEq for SignaturePrivateKey {
    fn eq(&self, other: &Self) -> bool {
        self.scheme == other.scheme && bool::from(self.data.ct_eq(&other.data))
    }
}

impl SignaturePrivateKey {
    /// Fresh random signing key
    pub fn generate(scheme: SignatureScheme, rng: &Rng) -> MlsResult<Self> {
        scheme.ensure_bound()?;
        loop {
            let candidate = rng.random_array::<32>()?;
            if let Ok(key) = Self::from_seed_bytes(scheme, &candidate) {
                return Ok(key);
            }
        }
    }

    /// Deterministic signing key from a seed secret
    pub fn derive(scheme: SignatureScheme, seed: &[u8]) -> MlsResult<Self> {
        scheme.ensure_bound()?;
        let hashed = Sha256::digest(seed);
        for counter in 0u8..=255 {
            let mut candidate = [0u8; 32];
            candidate.copy_from_slice(&hashed);
            candidate[0] ^= counter;
            if let Ok(key) = Self::from_seed_bytes(scheme, &candidate) {
                return Ok(key);
            }
        }
        Err(MlsError::InvalidParameter(
            "could not derive a signing key from seed".into(),
        ))
    }

    fn from_seed_bytes(scheme: SignatureScheme, seed: &[u8; 32]) -> MlsResult<Self> {
        let public_data = match scheme {
            SignatureScheme::Ed25519 => {
                let key = ed25519_dalek::SigningKey::from_bytes(seed);
                key.verifying_key().as_bytes().to_vec()
            }
            SignatureScheme::P256Sha256 => {
                let key = p256::ecdsa::SigningKey::from_slice(seed)
                    .map_err(|_| MlsError::InvalidParameter("scalar out of range".into()))?;
                key.verifying_key().to_encoded_point(false).as_bytes().to_vec()
            }
            other => return Err(MlsError::UnsupportedSuite(format!("{other:?}"))),
        };
        Ok(Self {
            scheme,
            data: Zeroizing::new(seed.to_vec()),
            public_key: SignaturePublicKey {
                scheme,
                data: public_data,
            },
        })
    }

    pub fn scheme(&self) -> SignatureScheme {
        self.scheme
    }

    pub fn public_key(&self) -> &SignaturePublicKey {
        &self.public_key
    }

    pub fn sign(&self, message: &[u8]) -> MlsResult<Vec<u8>> {
        match self.scheme {
            SignatureScheme::Ed25519 => {
                let mut seed = [0u8; 32];
                seed.copy_from_slice(&self.data);
                let key = ed25519_dalek::SigningKey::from_bytes(&seed);
                use ed25519_dalek::Signer;
                Ok(key.sign(message).to_bytes().to_vec())
            }
            SignatureScheme::P256Sha256 => {
                let key = p256::ecdsa::SigningKey::from_slice(&self.data)
                    .map_err(|_| MlsError::InvalidParameter("corrupt signing key".into()))?;
                use p256::ecdsa::signature::Signer;
                let sig: p256::ecdsa::Signature = key.sign(message);
                Ok(sig.to_der().as_bytes().to_vec())
            }
            other => Err(MlsError::UnsupportedSuite(format!("{other:?}"))),
        }
    }
}
