//! # Configuration Tree
//!
//! Weighted, threshold, hierarchical signer configuration of a wallet.
//!
//! A [`Config`] pairs a threshold with a [`Topology`]: a binary tree whose leaves
//! are signers, sapient signers (verified by another contract), pre-authorized
//! digests, opaque subtree hashes, or nested sub-threshold groups. The image hash
//! of a configuration is what the wallet contract stores on chain.
//!
//! ## Example
//!
//! ```rust,ignore
//! use wallet_auth_core::config::{Config, Topology};
//!
//! let topology = Topology::node(
//!     Topology::signer(alice, 1),
//!     Topology::signer(bob, 1),
//! );
//! let config = Config::new(2, 0, topology);
//! config.evaluate_safety()?;
//! let image_hash = config.image_hash();
//! ```

mod json;

use crate::types::{keccak256_concat, word_address, word_u64};
use crate::{Error, Result};
use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};

/// Largest weight a signer or nested leaf may carry
pub const MAX_WEIGHT: u64 = u8::MAX as u64;

/// Largest threshold a configuration or nested leaf may require
pub const MAX_THRESHOLD: u64 = u16::MAX as u64;

/// Largest checkpoint expressible in the signature header (56 bits)
pub const MAX_CHECKPOINT: u64 = (1 << 56) - 1;

/// Deepest tree the on-chain verifier is asked to recurse through
pub const MAX_DEPTH: usize = 30;

const SIGNER_PREFIX: &[u8] = b"Sequence signer:\n";
const SAPIENT_PREFIX: &[u8] = b"Sequence sapient config:\n";
const SUBDIGEST_PREFIX: &[u8] = b"Sequence static digest:\n";
const ANY_ADDRESS_SUBDIGEST_PREFIX: &[u8] = b"Sequence any address subdigest:\n";
const NESTED_PREFIX: &[u8] = b"Sequence nested config:\n";

/// Recursive signer topology
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "json::TopologyJson", into = "json::TopologyJson")]
pub enum Topology {
    /// ECDSA signer contributing `weight`
    Signer { address: Address, weight: u64 },
    /// Signer whose validity is decided by a contract returning `image_hash`
    SapientSigner {
        address: Address,
        weight: u64,
        image_hash: B256,
    },
    /// Pre-authorizes one exact digest for this wallet
    Subdigest { digest: B256 },
    /// Pre-authorizes one exact digest regardless of wallet address
    AnyAddressSubdigest { digest: B256 },
    /// Opaque hash of a subtree whose contents are unknown
    NodeLeaf(B256),
    /// Sub-threshold group contributing `weight` once `threshold` is met inside
    Nested {
        weight: u64,
        threshold: u64,
        tree: Box<Topology>,
    },
    /// Binary branch
    Node(Box<Topology>, Box<Topology>),
}

impl Topology {
    /// Create a signer leaf
    pub fn signer(address: Address, weight: u64) -> Self {
        Topology::Signer { address, weight }
    }

    /// Create a sapient signer leaf
    pub fn sapient_signer(address: Address, weight: u64, image_hash: B256) -> Self {
        Topology::SapientSigner {
            address,
            weight,
            image_hash,
        }
    }

    /// Create a nested leaf
    pub fn nested(weight: u64, threshold: u64, tree: Topology) -> Self {
        Topology::Nested {
            weight,
            threshold,
            tree: Box::new(tree),
        }
    }

    /// Create a branch
    pub fn node(left: Topology, right: Topology) -> Self {
        Topology::Node(Box::new(left), Box::new(right))
    }

    /// Check if this is a leaf (anything but a branch)
    pub fn is_leaf(&self) -> bool {
        !matches!(self, Topology::Node(..))
    }

    /// Canonical hash of this topology
    pub fn hash(&self) -> B256 {
        hash_configuration(self)
    }

    /// Reachable signer weight and maximum weight, see [`get_weight`]
    pub fn weight<F>(&self, can_sign: F) -> (u64, u64)
    where
        F: Fn(&Topology) -> bool,
    {
        get_weight(self, &can_sign)
    }
}

/// Wallet configuration: a topology plus the threshold it must reach
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Minimum aggregate weight required to authorize an action
    #[serde(with = "crate::types::serde_dec::u64")]
    pub threshold: u64,
    /// Monotonic configuration version
    #[serde(with = "crate::types::serde_dec::u64")]
    pub checkpoint: u64,
    /// Optional contract allowed to vouch for newer checkpoints
    #[serde(
        default,
        with = "crate::types::serde_hex::opt_address",
        skip_serializing_if = "Option::is_none"
    )]
    pub checkpointer: Option<Address>,
    /// Signer tree
    pub topology: Topology,
}

impl Config {
    /// Create a configuration without checkpointer
    pub fn new(threshold: u64, checkpoint: u64, topology: Topology) -> Self {
        Self {
            threshold,
            checkpoint,
            checkpointer: None,
            topology,
        }
    }

    /// Set the checkpointer
    pub fn with_checkpointer(mut self, checkpointer: Address) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    /// Image hash stored by the wallet contract
    ///
    /// `h = hash(topology)`, then threshold, checkpoint and checkpointer are
    /// folded in one 32-byte word at a time.
    pub fn image_hash(&self) -> B256 {
        let root = hash_configuration(&self.topology);
        let root = keccak256_concat(&[root.as_slice(), &word_u64(self.threshold)]);
        let root = keccak256_concat(&[root.as_slice(), &word_u64(self.checkpoint)]);
        let checkpointer = self.checkpointer.unwrap_or(Address::ZERO);
        keccak256_concat(&[root.as_slice(), &word_address(&checkpointer)])
    }

    /// Check for out-of-range threshold, checkpoint or leaf values
    pub fn has_invalid_values(&self) -> bool {
        self.threshold > MAX_THRESHOLD
            || self.checkpoint > MAX_CHECKPOINT
            || has_invalid_values(&self.topology)
    }

    /// See [`evaluate_configuration_safety`]
    pub fn evaluate_safety(&self) -> Result<()> {
        evaluate_configuration_safety(self)
    }
}

/// Signers reachable in a topology
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignerSet {
    /// ECDSA signer addresses
    pub signers: Vec<Address>,
    /// Sapient signers with the image hash they must return
    pub sapient_signers: Vec<(Address, B256)>,
    /// False when an opaque node hides part of the tree
    pub is_complete: bool,
}

/// Recursive canonical hash of a topology
pub fn hash_configuration(topology: &Topology) -> B256 {
    match topology {
        Topology::Signer { address, weight } => {
            keccak256_concat(&[SIGNER_PREFIX, address.as_slice(), &word_u64(*weight)])
        }
        Topology::SapientSigner {
            address,
            weight,
            image_hash,
        } => keccak256_concat(&[
            SAPIENT_PREFIX,
            address.as_slice(),
            &word_u64(*weight),
            image_hash.as_slice(),
        ]),
        Topology::Subdigest { digest } => keccak256_concat(&[SUBDIGEST_PREFIX, digest.as_slice()]),
        Topology::AnyAddressSubdigest { digest } => {
            keccak256_concat(&[ANY_ADDRESS_SUBDIGEST_PREFIX, digest.as_slice()])
        }
        Topology::NodeLeaf(hash) => *hash,
        Topology::Nested {
            weight,
            threshold,
            tree,
        } => keccak256_concat(&[
            NESTED_PREFIX,
            hash_configuration(tree).as_slice(),
            &word_u64(*threshold),
            &word_u64(*weight),
        ]),
        Topology::Node(left, right) => keccak256_concat(&[
            hash_configuration(left).as_slice(),
            hash_configuration(right).as_slice(),
        ]),
    }
}

/// Weight reachable with the signers `can_sign` accepts, and the maximum weight
///
/// A nested leaf contributes its weight only when its subtree reaches the
/// nested threshold. Opaque nodes and digest leaves contribute nothing.
pub fn get_weight<F>(topology: &Topology, can_sign: &F) -> (u64, u64)
where
    F: Fn(&Topology) -> bool,
{
    match topology {
        Topology::Signer { weight, .. } | Topology::SapientSigner { weight, .. } => {
            let signed = if can_sign(topology) { *weight } else { 0 };
            (signed, *weight)
        }
        Topology::Subdigest { .. }
        | Topology::AnyAddressSubdigest { .. }
        | Topology::NodeLeaf(_) => (0, 0),
        Topology::Nested {
            weight,
            threshold,
            tree,
        } => {
            let (inner, inner_max) = get_weight(tree, can_sign);
            let signed = if inner >= *threshold { *weight } else { 0 };
            let max = if inner_max >= *threshold { *weight } else { 0 };
            (signed, max)
        }
        Topology::Node(left, right) => {
            let (lw, lm) = get_weight(left, can_sign);
            let (rw, rm) = get_weight(right, can_sign);
            (lw.saturating_add(rw), lm.saturating_add(rm))
        }
    }
}

/// Enumerate the signers reachable without crossing an opaque node
pub fn get_signers(topology: &Topology) -> SignerSet {
    let mut set = SignerSet {
        is_complete: true,
        ..Default::default()
    };
    collect_signers(topology, &mut set);
    set
}

fn collect_signers(topology: &Topology, set: &mut SignerSet) {
    match topology {
        Topology::Signer { address, weight } => {
            if *weight > 0 && !set.signers.contains(address) {
                set.signers.push(*address);
            }
        }
        Topology::SapientSigner {
            address,
            weight,
            image_hash,
        } => {
            let entry = (*address, *image_hash);
            if *weight > 0 && !set.sapient_signers.contains(&entry) {
                set.sapient_signers.push(entry);
            }
        }
        Topology::NodeLeaf(_) => set.is_complete = false,
        Topology::Subdigest { .. } | Topology::AnyAddressSubdigest { .. } => {}
        Topology::Nested { tree, .. } => collect_signers(tree, set),
        Topology::Node(left, right) => {
            collect_signers(left, set);
            collect_signers(right, set);
        }
    }
}

/// Find the signer or sapient signer leaf for `address`
pub fn find_signer_leaf<'a>(topology: &'a Topology, address: &Address) -> Option<&'a Topology> {
    match topology {
        Topology::Signer { address: a, .. } | Topology::SapientSigner { address: a, .. } => {
            (a == address).then_some(topology)
        }
        Topology::Nested { tree, .. } => find_signer_leaf(tree, address),
        Topology::Node(left, right) => {
            find_signer_leaf(left, address).or_else(|| find_signer_leaf(right, address))
        }
        _ => None,
    }
}

/// Merge two representations of the same topology
///
/// Opaque nodes are replaced by the concrete subtree of the other side when the
/// hashes agree.
pub fn merge_topology(a: &Topology, b: &Topology) -> Result<Topology> {
    match (a, b) {
        (Topology::NodeLeaf(hash), other) | (other, Topology::NodeLeaf(hash)) => {
            if hash_configuration(other) == *hash {
                Ok(other.clone())
            } else {
                Err(Error::TopologyMismatch)
            }
        }
        (Topology::Node(al, ar), Topology::Node(bl, br)) => Ok(Topology::node(
            merge_topology(al, bl)?,
            merge_topology(ar, br)?,
        )),
        (
            Topology::Nested {
                weight: aw,
                threshold: at,
                tree: a_tree,
            },
            Topology::Nested {
                weight: bw,
                threshold: bt,
                tree: b_tree,
            },
        ) => {
            if aw != bw || at != bt {
                return Err(Error::TopologyMismatch);
            }
            Ok(Topology::nested(*aw, *at, merge_topology(a_tree, b_tree)?))
        }
        (a, b) if a.is_leaf() && a == b => Ok(a.clone()),
        _ => Err(Error::TopologyMismatch),
    }
}

/// True if any weight, threshold or checkpoint exceeds its field width
pub fn has_invalid_values(topology: &Topology) -> bool {
    match topology {
        Topology::Signer { weight, .. } | Topology::SapientSigner { weight, .. } => {
            *weight > MAX_WEIGHT
        }
        Topology::Nested {
            weight,
            threshold,
            tree,
        } => *weight > MAX_WEIGHT || *threshold > MAX_THRESHOLD || has_invalid_values(tree),
        Topology::Node(left, right) => has_invalid_values(left) || has_invalid_values(right),
        Topology::Subdigest { .. }
        | Topology::AnyAddressSubdigest { .. }
        | Topology::NodeLeaf(_) => false,
    }
}

/// Depth of the tree: 0 for a leaf, otherwise one more than the deepest child
pub fn maximum_depth(topology: &Topology) -> usize {
    match topology {
        Topology::Node(left, right) => 1 + maximum_depth(left).max(maximum_depth(right)),
        Topology::Nested { tree, .. } => 1 + maximum_depth(tree),
        _ => 0,
    }
}

/// Reject configurations that are trivially satisfiable or unusable
pub fn evaluate_configuration_safety(config: &Config) -> Result<()> {
    if config.threshold == 0 {
        return Err(Error::UnsafeConfiguration("unsafe-threshold-0".into()));
    }
    if config.has_invalid_values() {
        return Err(Error::UnsafeConfiguration("unsafe-invalid-values".into()));
    }
    if maximum_depth(&config.topology) > MAX_DEPTH {
        return Err(Error::UnsafeConfiguration("unsafe-depth".into()));
    }
    let (_, max_weight) = get_weight(&config.topology, &|_: &Topology| true);
    if max_weight < config.threshold {
        return Err(Error::UnsafeConfiguration("unsafe-threshold".into()));
    }
    Ok(())
}

/// Build a balanced topology from an ordered list of leaves
pub fn flat_leaves_to_topology(mut leaves: Vec<Topology>) -> Result<Topology> {
    match leaves.len() {
        0 => Err(Error::EmptyTopology),
        1 => Ok(leaves.remove(0)),
        n => {
            let right = leaves.split_off(n / 2);
            Ok(Topology::node(
                flat_leaves_to_topology(leaves)?,
                flat_leaves_to_topology(right)?,
            ))
        }
    }
}
