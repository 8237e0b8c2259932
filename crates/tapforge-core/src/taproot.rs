//! Taproot script trees, output key tweaking and control blocks (BIP341).
//!
//! Leaves are paired bottom-up in insertion order. At each level a node
//! without a partner is carried up unchanged, so `n` leaves produce a tree
//! of depth `ceil(log2 n)`. Sibling hashes are sorted before hashing as
//! BIP341 requires, which makes the root independent of left/right order
//! within a pair.

use secp256k1::{Parity, SECP256K1, Scalar, XOnlyPublicKey};

use crate::address::{Address, Network};
use crate::constants::{TAPROOT_CONTROL_MAX_NODE_COUNT, TAPROOT_LEAF_TAPSCRIPT};
use crate::encode::write_compact_size;
use crate::error::TaprootError;
use crate::hashes::tagged_hash;
use crate::script::Script;
use crate::types::Hash256;

/// Size of the fixed control block prefix: version/parity byte plus internal key.
pub const CONTROL_BLOCK_BASE_SIZE: usize = 33;

/// One spending condition in a Taproot tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaprootLeaf {
    script: Script,
    version: u8,
}

impl TaprootLeaf {
    /// Leaf with an explicit version; odd versions are rejected.
    pub fn new(script: Script, version: u8) -> Result<Self, TaprootError> {
        if version & 0xfe != version {
            return Err(TaprootError::InvalidLeafVersion(version));
        }
        Ok(Self { script, version })
    }

    /// BIP342 tapscript leaf (version `0xc0`).
    pub fn tapscript(script: Script) -> Self {
        Self { script, version: TAPROOT_LEAF_TAPSCRIPT }
    }

    pub fn script(&self) -> &Script {
        &self.script
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn leaf_hash(&self) -> Hash256 {
        tap_leaf_hash(self.version, &self.script)
    }
}

/// `TapLeaf` tagged hash over `version || compact_size(len) || script`.
pub fn tap_leaf_hash(version: u8, script: &Script) -> Hash256 {
    let mut prefix = Vec::with_capacity(10);
    prefix.push(version);
    write_compact_size(&mut prefix, script.len() as u64);
    Hash256(tagged_hash("TapLeaf", &[&prefix, script.as_bytes()]))
}

/// `TapBranch` tagged hash of two children, lexicographically sorted.
pub fn tap_branch_hash(a: &Hash256, b: &Hash256) -> Hash256 {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    Hash256(tagged_hash("TapBranch", &[lo.as_bytes(), hi.as_bytes()]))
}

/// `TapTweak` tagged hash; key-only outputs (BIP86) commit to the internal key alone.
pub fn tap_tweak_hash(internal_key: &XOnlyPublicKey, merkle_root: Option<&Hash256>) -> Hash256 {
    let key = internal_key.serialize();
    let hash = match merkle_root {
        Some(root) => tagged_hash("TapTweak", &[&key, root.as_bytes()]),
        None => tagged_hash("TapTweak", &[&key]),
    };
    Hash256(hash)
}

/// Output key `Q = P + t·G` and its parity.
pub fn tweak_public_key(
    internal_key: &XOnlyPublicKey,
    merkle_root: Option<&Hash256>,
) -> Result<(XOnlyPublicKey, Parity), TaprootError> {
    let tweak = tap_tweak_hash(internal_key, merkle_root);
    let scalar = Scalar::from_be_bytes(tweak.0).map_err(|_| TaprootError::InvalidTweak)?;
    internal_key
        .add_tweak(SECP256K1, &scalar)
        .map_err(|_| TaprootError::InvalidTweak)
}

/// Builds a Taproot tree over an internal key.
///
/// Errors from [`add_leaf`](Self::add_leaf) are deferred to
/// [`finalize`](Self::finalize) so calls can be chained.
///
/// # Examples
///
/// ```
/// use secp256k1::XOnlyPublicKey;
/// use tapforge_core::script::Script;
/// use tapforge_core::taproot::TaprootTreeBuilder;
///
/// let key: XOnlyPublicKey =
///     "187791b6f712a8ea41c8ecdd0ee77fab3e85263b37e1ec18a3651926b3a6cf27".parse().unwrap();
/// let leaf_key: XOnlyPublicKey =
///     "d85a959b0290bf19bb89ed43c916be835475d013da4b362117393e25a48229b8".parse().unwrap();
/// let info = TaprootTreeBuilder::new(key)
///     .add_tapscript(Script::tap_checksig(&leaf_key))
///     .finalize()
///     .unwrap();
/// assert_eq!(info.leaves().len(), 1);
/// assert!(info.merkle_root().is_some());
/// ```
#[derive(Debug, Clone)]
pub struct TaprootTreeBuilder {
    internal_key: XOnlyPublicKey,
    leaves: Vec<TaprootLeaf>,
    error: Option<TaprootError>,
}

impl TaprootTreeBuilder {
    pub fn new(internal_key: XOnlyPublicKey) -> Self {
        Self { internal_key, leaves: Vec::new(), error: None }
    }

    pub fn add_leaf(&mut self, script: Script, leaf_version: u8) -> &mut Self {
        match TaprootLeaf::new(script, leaf_version) {
            Ok(leaf) => self.leaves.push(leaf),
            Err(e) => {
                self.error.get_or_insert(e);
            }
        }
        self
    }

    pub fn add_tapscript(&mut self, script: Script) -> &mut Self {
        self.leaves.push(TaprootLeaf::tapscript(script));
        self
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Compute the merkle root, output key and every leaf's merkle path.
    pub fn finalize(&self) -> Result<TaprootSpendInfo, TaprootError> {
        if let Some(e) = &self.error {
            return Err(e.clone());
        }

        let mut paths: Vec<Vec<Hash256>> = vec![Vec::new(); self.leaves.len()];
        // (node hash, indices of the leaves below it)
        let mut level: Vec<(Hash256, Vec<usize>)> = self
            .leaves
            .iter()
            .enumerate()
            .map(|(i, leaf)| (leaf.leaf_hash(), vec![i]))
            .collect();

        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len().div_ceil(2));
            let mut nodes = level.into_iter();
            while let Some((left, mut left_leaves)) = nodes.next() {
                match nodes.next() {
                    Some((right, right_leaves)) => {
                        for &i in &left_leaves {
                            paths[i].push(right);
                        }
                        for &i in &right_leaves {
                            paths[i].push(left);
                        }
                        left_leaves.extend(right_leaves);
                        next.push((tap_branch_hash(&left, &right), left_leaves));
                    }
                    None => next.push((left, left_leaves)),
                }
            }
            level = next;
        }

        if let Some(depth) = paths.iter().map(Vec::len).max() {
            if depth > TAPROOT_CONTROL_MAX_NODE_COUNT {
                return Err(TaprootError::TreeTooDeep(depth));
            }
        }

        let merkle_root = level.pop().map(|(root, _)| root);
        let (output_key, output_parity) = tweak_public_key(&self.internal_key, merkle_root.as_ref())?;

        Ok(TaprootSpendInfo {
            internal_key: self.internal_key,
            merkle_root,
            output_key,
            output_parity,
            leaves: self.leaves.iter().cloned().zip(paths).collect(),
        })
    }
}

/// Everything needed to pay to and spend a Taproot output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaprootSpendInfo {
    internal_key: XOnlyPublicKey,
    merkle_root: Option<Hash256>,
    output_key: XOnlyPublicKey,
    output_parity: Parity,
    leaves: Vec<(TaprootLeaf, Vec<Hash256>)>,
}

impl TaprootSpendInfo {
    /// Key-path-only output with no script commitment (BIP86).
    pub fn key_spend_only(internal_key: XOnlyPublicKey) -> Result<Self, TaprootError> {
        TaprootTreeBuilder::new(internal_key).finalize()
    }

    pub fn internal_key(&self) -> XOnlyPublicKey {
        self.internal_key
    }

    pub fn merkle_root(&self) -> Option<Hash256> {
        self.merkle_root
    }

    pub fn output_key(&self) -> XOnlyPublicKey {
        self.output_key
    }

    pub fn output_parity(&self) -> Parity {
        self.output_parity
    }

    /// The tweak added to the internal key.
    pub fn tap_tweak(&self) -> Hash256 {
        tap_tweak_hash(&self.internal_key, self.merkle_root.as_ref())
    }

    /// Leaves in insertion order with their merkle paths (leaf to root).
    pub fn leaves(&self) -> &[(TaprootLeaf, Vec<Hash256>)] {
        &self.leaves
    }

    pub fn control_block(&self, leaf: &TaprootLeaf) -> Result<ControlBlock, TaprootError> {
        let (leaf, path) = self
            .leaves
            .iter()
            .find(|(l, _)| l == leaf)
            .ok_or(TaprootError::LeafNotFound)?;
        Ok(ControlBlock {
            leaf_version: leaf.version,
            output_parity: self.output_parity,
            internal_key: self.internal_key,
            merkle_branch: path.clone(),
        })
    }

    pub fn script_pubkey(&self) -> Script {
        Script::p2tr(&self.output_key.serialize())
    }

    pub fn address(&self, network: Network) -> Address {
        Address::p2tr_tweaked(&self.output_key, network)
    }
}

/// Script-path spending proof placed last on the witness stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlBlock {
    pub leaf_version: u8,
    pub output_parity: Parity,
    pub internal_key: XOnlyPublicKey,
    pub merkle_branch: Vec<Hash256>,
}

impl ControlBlock {
    pub fn depth(&self) -> usize {
        self.merkle_branch.len()
    }

    pub fn size(&self) -> usize {
        CONTROL_BLOCK_BASE_SIZE + 32 * self.merkle_branch.len()
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size());
        out.push(self.leaf_version | self.output_parity.to_u8());
        out.extend_from_slice(&self.internal_key.serialize());
        for node in &self.merkle_branch {
            out.extend_from_slice(node.as_bytes());
        }
        out
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, TaprootError> {
        if bytes.len() < CONTROL_BLOCK_BASE_SIZE
            || (bytes.len() - CONTROL_BLOCK_BASE_SIZE) % 32 != 0
        {
            return Err(TaprootError::InvalidControlBlock(format!(
                "bad length {}",
                bytes.len()
            )));
        }
        let depth = (bytes.len() - CONTROL_BLOCK_BASE_SIZE) / 32;
        if depth > TAPROOT_CONTROL_MAX_NODE_COUNT {
            return Err(TaprootError::TreeTooDeep(depth));
        }
        let output_parity = Parity::from_u8(bytes[0] & 1)
            .map_err(|e| TaprootError::InvalidControlBlock(e.to_string()))?;
        let internal_key = XOnlyPublicKey::from_slice(&bytes[1..CONTROL_BLOCK_BASE_SIZE])
            .map_err(|_| TaprootError::InvalidInternalKey)?;
        let merkle_branch = bytes[CONTROL_BLOCK_BASE_SIZE..]
            .chunks_exact(32)
            .map(|chunk| {
                let mut node = [0u8; 32];
                node.copy_from_slice(chunk);
                Hash256(node)
            })
            .collect();
        Ok(Self {
            leaf_version: bytes[0] & 0xfe,
            output_parity,
            internal_key,
            merkle_branch,
        })
    }

    /// Check that this block proves `script` is committed to by `output_key`.
    pub fn verify(&self, output_key: &XOnlyPublicKey, script: &Script) -> bool {
        let root = self
            .merkle_branch
            .iter()
            .fold(tap_leaf_hash(self.leaf_version, script), |node, sibling| {
                tap_branch_hash(&node, sibling)
            });
        let tweak = tap_tweak_hash(&self.internal_key, Some(&root));
        let Ok(scalar) = Scalar::from_be_bytes(tweak.0) else {
            return false;
        };
        self.internal_key
            .tweak_add_check(SECP256K1, output_key, self.output_parity, scalar)
    }
}
