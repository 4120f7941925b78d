//! Member identity credentials
//!
//! A credential binds a user identity to a signature public key. Only the
//! basic variant exists for now: an opaque identity plus a raw key. When
//! the credential belongs to the local member it also carries the signing
//! key, which never touches the wire.

use crate::codec::{self, Codec, Cursor, VecSize};
use crate::crypto::{SignaturePrivateKey, SignaturePublicKey, SignatureScheme};
use crate::error::{MlsError, MlsResult};

const CREDENTIAL_TYPE_BASIC: u8 = 0;

/// An identity bound to a signature key
#[derive(Clone, Debug)]
pub enum Credential {
    Basic(BasicCredential),
}

#[derive(Clone, Debug)]
pub struct BasicCredential {
    pub identity: Vec<u8>,
    pub public_key: SignaturePublicKey,
    private_key: Option<SignaturePrivateKey>,
}

impl Credential {
    /// Public credential, e.g. reconstructed from the wire or describing a
    /// remote member
    pub fn basic(identity: &[u8], public_key: SignaturePublicKey) -> Self {
        Credential::Basic(BasicCredential {
            identity: identity.to_vec(),
            public_key,
            private_key: None,
        })
    }

    /// Local credential that can produce signatures
    pub fn basic_with_key(identity: &[u8], private_key: SignaturePrivateKey) -> Self {
        Credential::Basic(BasicCredential {
            identity: identity.to_vec(),
            public_key: private_key.public_key().clone(),
            private_key: Some(private_key),
        })
    }

    pub fn identity(&self) -> &[u8] {
        match self {
            Credential::Basic(basic) => &basic.identity,
        }
    }

    pub fn public_key(&self) -> &SignaturePublicKey {
        match self {
            Credential::Basic(basic) => &basic.public_key,
        }
    }

    pub fn private_key(&self) -> Option<&SignaturePrivateKey> {
        match self {
            Credential::Basic(basic) => basic.private_key.as_ref(),
        }
    }

    /// Sign with the retained private key
    pub fn sign(&self, message: &[u8]) -> MlsResult<Vec<u8>> {
        let key = self.private_key().ok_or_else(|| {
            MlsError::InvalidParameter("credential has no private key".into())
        })?;
        key.sign(message)
    }

    /// Verify a signature under the credential's public key
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        self.public_key().verify(message, signature)
    }
}

// Two credentials are equal iff their serializations are equal; the
// private half is excluded.
impl PartialEq for Credential {
    fn eq(&self, other: &Self) -> bool {
        codec::marshal(self) == codec::marshal(other)
    }
}

impl Eq for Credential {}

impl Codec for Credential {
    fn encode(&self, buffer: &mut Vec<u8>) {
        match self {
            Credential::Basic(basic) => {
                CREDENTIAL_TYPE_BASIC.encode(buffer);
                codec::encode_vec_bytes(VecSize::VecU8, buffer, &basic.identity);
                basic.public_key.scheme().encode(buffer);
                codec::encode_vec_bytes(VecSize::VecU16, buffer, basic.public_key.as_bytes());
            }
        }
    }

    fn decode(cursor: &mut Cursor) -> MlsResult<Self> {
        match u8::decode(cursor)? {
            CREDENTIAL_TYPE_BASIC => {
                let identity = codec::decode_vec_bytes(VecSize::VecU8, cursor)?;
                let scheme = SignatureScheme::decode(cursor)?;
                let key_data = codec::decode_vec_bytes(VecSize::VecU16, cursor)?;
                Ok(Credential::Basic(BasicCredential {
                    identity,
                    public_key: SignaturePublicKey::from_bytes(scheme, &key_data),
                    private_key: None,
                }))
            }
            tag => Err(MlsError::InvalidTlsSyntax(format!(
                "unknown credential type {tag}"
            ))),
        }
    }
}
