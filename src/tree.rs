//! Ratchet tree
//!
//! The tree owns a vector of `2n - 1` optional nodes over the group's
//! members, leaves at even indices. Each member's view carries private
//! keys exactly for the nodes on its own direct path; path updates are
//! exchanged by HPKE-encrypting the fresh path secrets to the resolution
//! of each copath sibling.

use crate::codec::{self, Codec, Cursor, VecSize};
use crate::credential::Credential;
use crate::crypto::{
    self, CipherSuite, DhPrivateKey, DhPublicKey, Rng,
};
use crate::error::{MlsError, MlsResult};
use crate::messages::{DirectPath, RatchetNode};
use crate::tree_math::{self, LeafIndex, NodeIndex};

/// One occupied node: a DH key pair (public half always, private half for
/// nodes on our own direct path), a credential at leaves, and the set of
/// leaves added below this node since its key was last refreshed.
#[derive(Clone, Debug)]
pub struct RatchetTreeNode {
    public_key: DhPublicKey,
    private_key: Option<DhPrivateKey>,
    credential: Option<Credential>,
    unmerged_leaves: Vec<LeafIndex>,
}

impl RatchetTreeNode {
    pub fn from_public_key(public_key: DhPublicKey) -> Self {
        Self {
            public_key,
            private_key: None,
            credential: None,
            unmerged_leaves: Vec::new(),
        }
    }

    pub fn from_private_key(private_key: DhPrivateKey) -> Self {
        Self {
            public_key: private_key.public_key().clone(),
            private_key: Some(private_key),
            credential: None,
            unmerged_leaves: Vec::new(),
        }
    }

    pub fn public_key(&self) -> &DhPublicKey {
        &self.public_key
    }

    pub fn private_key(&self) -> Option<&DhPrivateKey> {
        self.private_key.as_ref()
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    pub fn unmerged_leaves(&self) -> &[LeafIndex] {
        &self.unmerged_leaves
    }

    /// Install a new public key; a changed key invalidates the old private
    /// key and the unmerged set
    fn merge_public(&mut self, public_key: DhPublicKey) {
        if public_key != self.public_key {
            self.private_key = None;
            self.public_key = public_key;
        }
        self.unmerged_leaves.clear();
    }

    /// Install a private key that must match the installed public key
    fn merge_private(&mut self, private_key: DhPrivateKey) -> MlsResult<()> {
        if *private_key.public_key() != self.public_key {
            return Err(MlsError::IncompatibleNode(
                "private key does not match node public key".into(),
            ));
        }
        self.private_key = Some(private_key);
        Ok(())
    }

    fn add_unmerged(&mut self, leaf: LeafIndex) {
        if let Err(position) = self.unmerged_leaves.binary_search(&leaf) {
            self.unmerged_leaves.insert(position, leaf);
        }
    }
}

// Views compare by public content; private keys differ per member.
impl PartialEq for RatchetTreeNode {
    fn eq(&self, other: &Self) -> bool {
        self.public_key == other.public_key
            && self.credential == other.credential
            && self.unmerged_leaves == other.unmerged_leaves
    }
}

/// A tree slot: either blank or occupied, plus the cached subtree hash
#[derive(Clone, Debug)]
pub struct OptionalNode {
    node: Option<RatchetTreeNode>,
    hash: Vec<u8>,
}

impl OptionalNode {
    fn blank() -> Self {
        Self {
            node: None,
            hash: Vec::new(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.node.is_none()
    }

    pub fn node(&self) -> Option<&RatchetTreeNode> {
        self.node.as_ref()
    }

    pub fn hash(&self) -> &[u8] {
        &self.hash
    }
}

impl PartialEq for OptionalNode {
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node
    }
}

/// Output of decrypting a received direct path: the new public keys for
/// `[leaf] + direct_path`, the private keys this member can now derive,
/// and the path secret that reached the root.
#[derive(Debug)]
pub struct DecryptedPath {
    pub public_keys: Vec<DhPublicKey>,
    pub private_keys: Vec<Option<DhPrivateKey>>,
    pub root_path_secret: Vec<u8>,
}

/// The ratchet tree itself
#[derive(Clone, Debug)]
pub struct RatchetTree {
    suite: CipherSuite,
    nodes: Vec<OptionalNode>,
}

impl PartialEq for RatchetTree {
    fn eq(&self, other: &Self) -> bool {
        self.suite == other.suite && self.nodes == other.nodes
    }
}

impl RatchetTree {
    /// Empty tree
    pub fn new(suite: CipherSuite) -> Self {
        Self {
            suite,
            nodes: Vec::new(),
        }
    }

    /// Bulk construction: sequential add + path update for each leaf
    pub fn from_secrets(
        suite: CipherSuite,
        leaf_secrets: &[Vec<u8>],
        credentials: &[Credential],
    ) -> MlsResult<Self> {
        if leaf_secrets.len() != credentials.len() {
            return Err(MlsError::InvalidParameter(
                "one credential required per leaf secret".into(),
            ));
        }
        let mut tree = Self::new(suite);
        for (i, (secret, credential)) in leaf_secrets.iter().zip(credentials).enumerate() {
            tree.add_leaf_secret(i as LeafIndex, secret, credential.clone())?;
            tree.set_path(i as LeafIndex, secret)?;
        }
        Ok(tree)
    }

    pub fn cipher_suite(&self) -> CipherSuite {
        self.suite
    }

    pub fn leaf_count(&self) -> u32 {
        tree_math::leaf_width(self.nodes.len() as u32)
    }

    pub fn node_count(&self) -> u32 {
        self.nodes.len() as u32
    }

    pub fn nodes(&self) -> &[OptionalNode] {
        &self.nodes
    }

    fn node_at(&self, index: NodeIndex) -> MlsResult<&OptionalNode> {
        self.nodes
            .get(index as usize)
            .ok_or_else(|| MlsError::InvalidIndex(format!("node {index} out of range")))
    }

    fn occupied_at(&self, index: NodeIndex) -> MlsResult<&RatchetTreeNode> {
        self.node_at(index)?
            .node()
            .ok_or_else(|| MlsError::MissingNode(format!("node {index} is blank")))
    }

    fn check_leaf_index(&self, leaf: LeafIndex) -> MlsResult<()> {
        if leaf >= self.leaf_count() {
            return Err(MlsError::InvalidIndex(format!(
                "leaf {leaf} out of range for {} leaves",
                self.leaf_count()
            )));
        }
        Ok(())
    }

    /// Install a new leaf holding only a public key (a remote member)
    pub fn add_leaf_public(
        &mut self,
        leaf: LeafIndex,
        public_key: DhPublicKey,
        credential: Credential,
    ) -> MlsResult<()> {
        let mut node = RatchetTreeNode::from_public_key(public_key);
        node.credential = Some(credential);
        self.add_leaf_inner(leaf, node)
    }

    /// Install a new leaf whose key pair is derived from a secret (our own
    /// leaf, or bulk test construction)
    pub fn add_leaf_secret(
        &mut self,
        leaf: LeafIndex,
        secret: &[u8],
        credential: Credential,
    ) -> MlsResult<()> {
        self.check_leaf_secret(secret)?;
        let private_key = DhPrivateKey::node_derive(self.suite, secret)?;
        let mut node = RatchetTreeNode::from_private_key(private_key);
        node.credential = Some(credential);
        self.add_leaf_inner(leaf, node)
    }

    fn add_leaf_inner(&mut self, leaf: LeafIndex, node: RatchetTreeNode) -> MlsResult<()> {
        let count = self.leaf_count();
        if leaf > count {
            return Err(MlsError::InvalidIndex(format!(
                "cannot add leaf {leaf} to a tree of {count} leaves"
            )));
        }
        if leaf < count && !self.node_at(tree_math::leaf_to_node(leaf))?.is_blank() {
            return Err(MlsError::InvalidParameter(format!(
                "leaf {leaf} is already occupied"
            )));
        }

        let width = tree_math::node_width(leaf + 1) as usize;
        while self.nodes.len() < width {
            self.nodes.push(OptionalNode::blank());
        }

        let node_index = tree_math::leaf_to_node(leaf) as usize;
        self.nodes[node_index].node = Some(node);

        // Ancestors that keep their keys must advertise the new leaf until
        // a path update refreshes them.
        for ancestor in tree_math::direct_path(leaf, self.leaf_count()) {
            if let Some(parent) = self.nodes[ancestor as usize].node.as_mut() {
                parent.add_unmerged(leaf);
            }
        }

        self.rehash_all();
        Ok(())
    }

    /// Install our own private key at a leaf added from a public key
    pub fn set_leaf_private_key(
        &mut self,
        leaf: LeafIndex,
        private_key: DhPrivateKey,
    ) -> MlsResult<()> {
        self.check_leaf_index(leaf)?;
        let node_index = tree_math::leaf_to_node(leaf) as usize;
        let node = self.nodes[node_index]
            .node
            .as_mut()
            .ok_or_else(|| MlsError::MissingNode(format!("leaf {leaf} is blank")))?;
        node.merge_private(private_key)
    }

    pub fn get_credential(&self, leaf: LeafIndex) -> MlsResult<&Credential> {
        self.check_leaf_index(leaf)?;
        self.occupied_at(tree_math::leaf_to_node(leaf))?
            .credential()
            .ok_or_else(|| MlsError::MissingNode(format!("leaf {leaf} has no credential")))
    }

    pub fn get_public_key(&self, node: NodeIndex) -> MlsResult<&DhPublicKey> {
        Ok(self.occupied_at(node)?.public_key())
    }

    /// The ordered public-key set needed to encrypt to every non-blank
    /// descendant of a node
    pub fn resolution(&self, node: NodeIndex) -> Vec<NodeIndex> {
        match self.nodes[node as usize].node() {
            Some(occupied) => {
                let mut out = vec![node];
                out.extend(
                    occupied
                        .unmerged_leaves()
                        .iter()
                        .map(|leaf| tree_math::leaf_to_node(*leaf)),
                );
                out
            }
            None if tree_math::is_leaf(node) => Vec::new(),
            None => {
                let left = tree_math::left(node).expect("internal node has children");
                let right =
                    tree_math::right(node, self.leaf_count()).expect("internal node has children");
                let mut out = self.resolution(left);
                out.extend(self.resolution(right));
                out
            }
        }
    }

    /// Regenerate our own direct path from a fresh leaf secret; returns
    /// the update secret (the path secret at the root)
    pub fn set_path(&mut self, from: LeafIndex, leaf_secret: &[u8]) -> MlsResult<Vec<u8>> {
        self.check_leaf_index(from)?;
        self.check_leaf_secret(leaf_secret)?;
        let leaf_node = tree_math::leaf_to_node(from) as usize;

        let leaf_priv = DhPrivateKey::node_derive(self.suite, leaf_secret)?;
        match self.nodes[leaf_node].node.as_mut() {
            Some(node) => {
                node.public_key = leaf_priv.public_key().clone();
                node.private_key = Some(leaf_priv);
                node.unmerged_leaves.clear();
            }
            None => {
                return Err(MlsError::MissingNode(format!("leaf {from} is blank")));
            }
        }

        let direct = tree_math::direct_path(from, self.leaf_count());
        let path_secrets = self.derive_path_secrets(leaf_secret, direct.len())?;
        for (node_index, path_secret) in direct.iter().zip(&path_secrets) {
            let node_priv = DhPrivateKey::node_derive(self.suite, path_secret)?;
            self.nodes[*node_index as usize].node =
                Some(RatchetTreeNode::from_private_key(node_priv));
        }

        self.rehash_path(from);
        Ok(path_secrets
            .last()
            .cloned()
            .unwrap_or_else(|| leaf_secret.to_vec()))
    }

    /// As [`set_path`], but without mutating: produce the wire path, with
    /// each level's path secret sealed to the resolution of the copath
    /// sibling at that level
    pub fn encrypt(
        &self,
        from: LeafIndex,
        leaf_secret: &[u8],
        rng: &Rng,
    ) -> MlsResult<(DirectPath, Vec<u8>)> {
        self.check_leaf_index(from)?;
        self.check_leaf_secret(leaf_secret)?;
        let count = self.leaf_count();

        let leaf_priv = DhPrivateKey::node_derive(self.suite, leaf_secret)?;
        let mut nodes = vec![RatchetNode {
            public_key: leaf_priv.public_key().clone(),
            node_secrets: Vec::new(),
        }];

        let copath = tree_math::copath(from, count);
        let path_secrets = self.derive_path_secrets(leaf_secret, copath.len())?;
        for (copath_index, path_secret) in copath.iter().zip(&path_secrets) {
            let node_priv = DhPrivateKey::node_derive(self.suite, path_secret)?;

            let mut node_secrets = Vec::new();
            for target in self.resolution(*copath_index) {
                let target_key = self.get_public_key(target)?;
                node_secrets.push(target_key.seal(rng, &[], path_secret)?);
            }

            nodes.push(RatchetNode {
                public_key: node_priv.public_key().clone(),
                node_secrets,
            });
        }

        let update_secret = path_secrets
            .last()
            .cloned()
            .unwrap_or_else(|| leaf_secret.to_vec());
        Ok((DirectPath { nodes }, update_secret))
    }

    /// Process a received direct path: open the lowest ciphertext we hold
    /// a key for, re-derive the path secrets above it, and verify every
    /// re-derived public key against the received one
    pub fn decrypt(&self, from: LeafIndex, path: &DirectPath) -> MlsResult<DecryptedPath> {
        self.check_leaf_index(from)?;
        let count = self.leaf_count();
        let direct = tree_math::direct_path(from, count);
        let copath = tree_math::copath(from, count);

        if path.nodes.len() != direct.len() + 1 {
            return Err(MlsError::InvalidPath(format!(
                "path carries {} nodes, expected {}",
                path.nodes.len(),
                direct.len() + 1
            )));
        }

        // Find the lowest level whose resolution contains a node we own.
        let mut found: Option<(usize, Vec<u8>)> = None;
        for (level, copath_index) in copath.iter().enumerate() {
            let resolution = self.resolution(*copath_index);
            if resolution.is_empty() {
                continue;
            }
            let ciphertexts = &path.nodes[level + 1].node_secrets;
            if ciphertexts.len() != resolution.len() {
                return Err(MlsError::InvalidPath(format!(
                    "level {level} carries {} ciphertexts for {} resolution entries",
                    ciphertexts.len(),
                    resolution.len()
                )));
            }
            for (position, target) in resolution.iter().enumerate() {
                let Some(occupied) = self.nodes[*target as usize].node() else {
                    continue;
                };
                if let Some(private_key) = occupied.private_key() {
                    let path_secret = private_key.open(&ciphertexts[position], &[])?;
                    found = Some((level, path_secret));
                    break;
                }
            }
            if found.is_some() {
                break;
            }
        }

        let (start, mut path_secret) = found.ok_or_else(|| {
            MlsError::InvalidPath("no resolution entry can be opened".into())
        })?;

        let mut public_keys = Vec::with_capacity(path.nodes.len());
        let mut private_keys: Vec<Option<DhPrivateKey>> = Vec::with_capacity(path.nodes.len());
        public_keys.push(path.nodes[0].public_key.clone());
        private_keys.push(None);

        for level in 0..direct.len() {
            public_keys.push(path.nodes[level + 1].public_key.clone());
            if level < start {
                private_keys.push(None);
                continue;
            }
            if level > start {
                path_secret = self.path_step(&path_secret);
            }
            let node_priv = DhPrivateKey::node_derive(self.suite, &path_secret)?;
            if node_priv.public_key() != &path.nodes[level + 1].public_key {
                return Err(MlsError::IncompatibleNode(format!(
                    "re-derived key disagrees with path node at level {level}"
                )));
            }
            private_keys.push(Some(node_priv));
        }

        Ok(DecryptedPath {
            public_keys,
            private_keys,
            root_path_secret: path_secret,
        })
    }

    /// Install a decrypted path: new public keys everywhere, the private
    /// keys we could derive, and nothing else
    pub fn merge_path(&mut self, from: LeafIndex, decrypted: &DecryptedPath) -> MlsResult<()> {
        self.check_leaf_index(from)?;
        let count = self.leaf_count();
        let direct = tree_math::direct_path(from, count);
        if decrypted.public_keys.len() != direct.len() + 1 {
            return Err(MlsError::InvalidPath("merge does not fit the tree".into()));
        }

        let leaf_node = tree_math::leaf_to_node(from) as usize;
        match self.nodes[leaf_node].node.as_mut() {
            Some(node) => node.merge_public(decrypted.public_keys[0].clone()),
            None => {
                return Err(MlsError::MissingNode(format!("leaf {from} is blank")));
            }
        }

        for (position, node_index) in direct.iter().enumerate() {
            let slot = &mut self.nodes[*node_index as usize];
            let public_key = decrypted.public_keys[position + 1].clone();
            match slot.node.as_mut() {
                Some(node) => node.merge_public(public_key),
                None => slot.node = Some(RatchetTreeNode::from_public_key(public_key)),
            }
            if let Some(private_key) = decrypted.private_keys[position + 1].clone() {
                slot.node
                    .as_mut()
                    .expect("slot populated above")
                    .merge_private(private_key)?;
            }
        }

        self.rehash_path(from);
        Ok(())
    }

    /// Clear a leaf and every node on its direct path
    pub fn blank_path(&mut self, leaf: LeafIndex) -> MlsResult<()> {
        self.check_leaf_index(leaf)?;
        let leaf_node = tree_math::leaf_to_node(leaf) as usize;
        self.nodes[leaf_node].node = None;
        for node_index in tree_math::direct_path(leaf, self.leaf_count()) {
            self.nodes[node_index as usize].node = None;
        }
        self.rehash_path(leaf);
        Ok(())
    }

    /// First blank leaf if any, otherwise the append position
    pub fn leftmost_free_leaf(&self) -> LeafIndex {
        let count = self.leaf_count();
        for leaf in 0..count {
            if self.nodes[tree_math::leaf_to_node(leaf) as usize].is_blank() {
                return leaf;
            }
        }
        count
    }

    /// True iff this view holds private keys exactly along `from`'s direct
    /// path (nodes still awaiting a refresh below `from` excepted)
    pub fn check_invariant(&self, from: LeafIndex) -> bool {
        if self.check_leaf_index(from).is_err() {
            return false;
        }
        let mut on_path = vec![tree_math::leaf_to_node(from)];
        on_path.extend(tree_math::direct_path(from, self.leaf_count()));

        for (index, slot) in self.nodes.iter().enumerate() {
            let Some(node) = slot.node() else { continue };
            let has_private = node.private_key().is_some();
            if on_path.contains(&(index as NodeIndex)) {
                let pending = node.unmerged_leaves().contains(&from);
                if !has_private && !pending {
                    return false;
                }
            } else if has_private {
                return false;
            }
        }
        true
    }

    /// Merkle hash at the root
    pub fn root_hash(&self) -> Vec<u8> {
        if self.nodes.is_empty() {
            return crypto::digest(self.suite, &[]);
        }
        self.nodes[tree_math::root(self.leaf_count()) as usize]
            .hash
            .clone()
    }

    // The first path secret is a bare expand of the leaf secret; every
    // later one is a full Derive-Secret of its predecessor.
    fn derive_path_secrets(&self, leaf_secret: &[u8], count: usize) -> MlsResult<Vec<Vec<u8>>> {
        let mut secrets = Vec::with_capacity(count);
        if count > 0 {
            secrets.push(crypto::hkdf_expand(
                self.suite,
                leaf_secret,
                b"path",
                self.suite.hash_len(),
            )?);
            for level in 1..count {
                secrets.push(self.path_step(&secrets[level - 1]));
            }
        }
        Ok(secrets)
    }

    fn path_step(&self, path_secret: &[u8]) -> Vec<u8> {
        crypto::derive_secret(self.suite, path_secret, "path", &[])
    }

    fn check_leaf_secret(&self, leaf_secret: &[u8]) -> MlsResult<()> {
        if leaf_secret.len() < self.suite.hash_len() {
            return Err(MlsError::InvalidParameter(format!(
                "leaf secret must be at least {} bytes",
                self.suite.hash_len()
            )));
        }
        Ok(())
    }

    // ===== Hash maintenance =====

    // struct {
    //     optional<LeafNodeInfo> info;   // public_key + credential
    // } LeafNodeHashInput;
    fn leaf_hash(&self, index: NodeIndex) -> Vec<u8> {
        let mut input = Vec::new();
        match self.nodes[index as usize].node() {
            Some(node) => {
                input.push(1);
                codec::encode_vec_bytes(VecSize::VecU8, &mut input, node.public_key().as_bytes());
                codec::encode_option(&mut input, &node.credential().cloned());
            }
            None => input.push(0),
        }
        crypto::digest(self.suite, &input)
    }

    // struct {
    //     optional<ParentNodeInfo> info; // public_key + unmerged leaves
    //     opaque left_hash<0..255>;
    //     opaque right_hash<0..255>;
    // } ParentNodeHashInput;
    fn parent_hash(&self, index: NodeIndex) -> Vec<u8> {
        let mut input = Vec::new();
        match self.nodes[index as usize].node() {
            Some(node) => {
                input.push(1);
                codec::encode_vec_bytes(VecSize::VecU8, &mut input, node.public_key().as_bytes());
                codec::encode_vec(VecSize::VecU16, &mut input, node.unmerged_leaves());
            }
            None => input.push(0),
        }
        let left = tree_math::left(index).expect("parent node has children");
        let right = tree_math::right(index, self.leaf_count()).expect("parent node has children");
        codec::encode_vec_bytes(VecSize::VecU8, &mut input, &self.nodes[left as usize].hash);
        codec::encode_vec_bytes(VecSize::VecU8, &mut input, &self.nodes[right as usize].hash);
        crypto::digest(self.suite, &input)
    }

    fn update_hash(&mut self, index: NodeIndex) {
        let hash = if tree_math::is_leaf(index) {
            self.leaf_hash(index)
        } else {
            self.parent_hash(index)
        };
        self.nodes[index as usize].hash = hash;
    }

    fn rehash_path(&mut self, leaf: LeafIndex) {
        self.update_hash(tree_math::leaf_to_node(leaf));
        for node_index in tree_math::direct_path(leaf, self.leaf_count()) {
            self.update_hash(node_index);
        }
    }

    fn rehash_all(&mut self) {
        let width = self.nodes.len() as NodeIndex;
        let mut level = 0;
        loop {
            let mut touched = false;
            for index in 0..width {
                if tree_math::level(index) == level {
                    self.update_hash(index);
                    touched = true;
                }
            }
            if !touched {
                break;
            }
            level += 1;
        }
    }

    // ===== Wire encoding (public view only) =====

    pub fn encode(&self, buffer: &mut Vec<u8>) {
        let mut inner = Vec::new();
        for slot in &self.nodes {
            match slot.node() {
                Some(node) => {
                    inner.push(1);
                    codec::encode_vec_bytes(VecSize::VecU8, &mut inner, node.public_key().as_bytes());
                    codec::encode_option(&mut inner, &node.credential().cloned());
                    codec::encode_vec(VecSize::VecU16, &mut inner, node.unmerged_leaves());
                }
                None => inner.push(0),
            }
        }
        codec::encode_vec_bytes(VecSize::VecU16, buffer, &inner);
    }

    pub fn decode(cursor: &mut Cursor, suite: CipherSuite) -> MlsResult<Self> {
        let raw = codec::decode_vec_bytes(VecSize::VecU16, cursor)?;
        let mut inner = Cursor::new(&raw);
        let mut nodes = Vec::new();
        while !inner.is_empty() {
            match u8::decode(&mut inner)? {
                0 => nodes.push(OptionalNode::blank()),
                1 => {
                    let key_data = codec::decode_vec_bytes(VecSize::VecU8, &mut inner)?;
                    let public_key = DhPublicKey::from_bytes(suite, &key_data)?;
                    let credential = codec::decode_option::<Credential>(&mut inner)?;
                    let unmerged = codec::decode_vec::<u32>(VecSize::VecU16, &mut inner)?;
                    let mut node = RatchetTreeNode::from_public_key(public_key);
                    node.credential = credential;
                    node.unmerged_leaves = unmerged;
                    nodes.push(OptionalNode {
                        node: Some(node),
                        hash: Vec::new(),
                    });
                }
                flag => {
                    return Err(MlsError::InvalidTlsSyntax(format!(
                        "bad node presence flag {flag}"
                    )));
                }
            }
        }

        let mut tree = Self { suite, nodes };
        if tree.node_count() > 0 && tree.node_count() % 2 == 0 {
            return Err(MlsError::InvalidTlsSyntax(
                "tree node vector must hold 2n - 1 nodes".into(),
            ));
        }
        tree.rehash_all();
        Ok(tree)
    }
}
