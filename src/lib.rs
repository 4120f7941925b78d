//! mls-proto - a group messaging core implementing a draft MLS design
//!
//! Every member of a dynamic group shares a forward-secret,
//! post-compromise-secure symmetric key schedule that evolves as members
//! are added, updated, or removed. Three subsystems carry the weight: the
//! ratchet tree of Diffie-Hellman key pairs over the membership, the
//! epoch key schedule, and the handshake state machine that keeps every
//! honest member in byte-identical state.

pub mod codec;
pub mod credential;
pub mod crypto;
pub mod error;
pub mod group;
pub mod key_schedule;
pub mod messages;
pub mod session;
pub mod tree;
pub mod tree_math;

// Re-export main types for convenience
pub use credential::Credential;
pub use crypto::{CipherSuite, DhPrivateKey, DhPublicKey, Rng, SignaturePrivateKey, SignatureScheme};
pub use error::{MlsError, MlsResult};
pub use group::GroupState;
pub use key_schedule::{derive_epoch_secrets, EpochSecrets, KeyChain};
pub use messages::{
    ClientInitKey, GroupOperation, MLSCiphertext, MLSPlaintext, Welcome, WelcomeInfo,
};
pub use session::Session;
pub use tree::RatchetTree;
pub use tree_math::{LeafIndex, NodeIndex};
