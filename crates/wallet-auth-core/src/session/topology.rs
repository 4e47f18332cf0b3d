//! Session topology
//!
//! An n-ary tree whose leaves are explicit session permissions, the implicit
//! session blacklist, identity signers and opaque hashed nodes. The root hash
//! is the image hash the wallet configuration commits to for the sessions
//! sapient signer.
//!
//! Every operation returns a new tree; inputs are never mutated.

use super::permission::SessionPermissions;
use crate::types::{
    ByteReader, be_bytes, keccak256_concat, keccak256_hash, min_bytes_for, serde_hex,
};
use crate::{Error, Result};
use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};

/// Leaf tag of explicit session permissions
pub const FLAG_PERMISSIONS: u8 = 0;
/// Leaf tag of an opaque hashed node
pub const FLAG_NODE: u8 = 1;
/// Tag of a branch
pub const FLAG_BRANCH: u8 = 2;
/// Leaf tag of the implicit session blacklist
pub const FLAG_BLACKLIST: u8 = 3;
/// Leaf tag of an identity signer
pub const FLAG_IDENTITY_SIGNER: u8 = 4;

/// Largest blacklist the 2-byte count can express
pub const MAX_BLACKLIST: usize = u16::MAX as usize;

/// Deepest branch nesting the decoder accepts
pub const MAX_SESSION_DEPTH: usize = 32;

/// Session topology tree
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "SessionsTopologyJson", into = "SessionsTopologyJson")]
pub enum SessionsTopology {
    /// Explicit session permissions
    Permissions(SessionPermissions),
    /// Addresses implicit sessions may not sign for or call, sorted ascending
    Blacklist(Vec<Address>),
    /// Signer whose attestations authorize implicit sessions
    IdentitySigner(Address),
    /// Precomputed hash of a pruned subtree
    Node(B256),
    /// Two or more children
    Branch(Vec<SessionsTopology>),
}

impl SessionsTopology {
    /// Check if this is a leaf (anything but a branch)
    pub fn is_leaf(&self) -> bool {
        !matches!(self, SessionsTopology::Branch(_))
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a SessionsTopology>) {
        match self {
            SessionsTopology::Branch(children) => {
                for child in children {
                    child.collect_leaves(out);
                }
            }
            leaf => out.push(leaf),
        }
    }

    /// All leaves in depth-first order
    pub fn leaves(&self) -> Vec<&SessionsTopology> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    /// At least one reachable identity signer and exactly one reachable blacklist
    pub fn is_complete(&self) -> bool {
        let leaves = self.leaves();
        let identities = leaves
            .iter()
            .filter(|l| matches!(l, SessionsTopology::IdentitySigner(_)))
            .count();
        let blacklists = leaves
            .iter()
            .filter(|l| matches!(l, SessionsTopology::Blacklist(_)))
            .count();
        identities >= 1 && blacklists == 1
    }

    /// Reachable identity signers
    pub fn identity_signers(&self) -> Vec<Address> {
        self.leaves()
            .into_iter()
            .filter_map(|l| match l {
                SessionsTopology::IdentitySigner(address) => Some(*address),
                _ => None,
            })
            .collect()
    }

    /// The implicit session blacklist, if reachable
    pub fn implicit_blacklist(&self) -> Option<&[Address]> {
        self.leaves().into_iter().find_map(|l| match l {
            SessionsTopology::Blacklist(list) => Some(list.as_slice()),
            _ => None,
        })
    }

    /// Permissions of an explicit session signer
    pub fn session_permissions(&self, signer: &Address) -> Option<&SessionPermissions> {
        self.leaves().into_iter().find_map(|l| match l {
            SessionsTopology::Permissions(sp) if &sp.signer == signer => Some(sp),
            _ => None,
        })
    }

    /// Signers of all reachable explicit sessions
    pub fn explicit_signers(&self) -> Vec<Address> {
        self.leaves()
            .into_iter()
            .filter_map(|l| match l {
                SessionsTopology::Permissions(sp) => Some(sp.signer),
                _ => None,
            })
            .collect()
    }

    /// Payload hashed for a leaf: `flag ‖ body`
    fn leaf_preimage(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        match self {
            SessionsTopology::Permissions(sp) => {
                out.push(FLAG_PERMISSIONS);
                sp.encode_into(&mut out)?;
            }
            SessionsTopology::Blacklist(list) => {
                out.push(FLAG_BLACKLIST);
                for address in list {
                    out.extend_from_slice(address.as_slice());
                }
            }
            SessionsTopology::IdentitySigner(address) => {
                out.push(FLAG_IDENTITY_SIGNER);
                out.extend_from_slice(address.as_slice());
            }
            SessionsTopology::Node(_) | SessionsTopology::Branch(_) => {
                return Err(Error::malformed("not a hashable leaf"));
            }
        }
        Ok(out)
    }

    /// Root hash
    ///
    /// Leaves hash as `keccak(flag ‖ body)`, opaque nodes are their own hash
    /// and branches fold their children left to right as
    /// `acc = keccak(acc ‖ child)`.
    pub fn hash(&self) -> Result<B256> {
        match self {
            SessionsTopology::Node(hash) => Ok(*hash),
            SessionsTopology::Branch(children) => {
                let mut iter = children.iter();
                let first = iter
                    .next()
                    .ok_or_else(|| Error::malformed("empty branch"))?
                    .hash()?;
                iter.try_fold(first, |acc, child| {
                    Ok(keccak256_concat(&[acc.as_slice(), child.hash()?.as_slice()]))
                })
            }
            leaf => Ok(B256::from(keccak256_hash(&leaf.leaf_preimage()?))),
        }
    }

    /// Image hash committed to by the wallet configuration; same as [`hash`](Self::hash)
    pub fn image_hash(&self) -> Result<B256> {
        self.hash()
    }

    /// See [`encode_sessions_topology`]
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.encode_into(&mut out)?;
        Ok(out)
    }

    fn encode_into(&self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            SessionsTopology::Permissions(sp) => {
                out.push(FLAG_PERMISSIONS << 4);
                sp.encode_into(out)?;
            }
            SessionsTopology::Node(hash) => {
                out.push(FLAG_NODE << 4);
                out.extend_from_slice(hash.as_slice());
            }
            SessionsTopology::Branch(children) => {
                let mut content = Vec::new();
                for child in children {
                    child.encode_into(&mut content)?;
                }
                let size = min_bytes_for(content.len() as u64);
                if size > 15 {
                    return Err(Error::capacity("Branch too large"));
                }
                out.push((FLAG_BRANCH << 4) | size as u8);
                out.extend_from_slice(&be_bytes(content.len() as u64, size));
                out.extend_from_slice(&content);
            }
            SessionsTopology::Blacklist(list) => {
                if list.len() > MAX_BLACKLIST {
                    return Err(Error::capacity(format!(
                        "Blacklist too large: {} (max {})",
                        list.len(),
                        MAX_BLACKLIST
                    )));
                }
                if list.len() < 0x0f {
                    out.push((FLAG_BLACKLIST << 4) | list.len() as u8);
                } else {
                    out.push((FLAG_BLACKLIST << 4) | 0x0f);
                    out.extend_from_slice(&(list.len() as u16).to_be_bytes());
                }
                for address in list {
                    out.extend_from_slice(address.as_slice());
                }
            }
            SessionsTopology::IdentitySigner(address) => {
                out.push(FLAG_IDENTITY_SIGNER << 4);
                out.extend_from_slice(address.as_slice());
            }
        }
        Ok(())
    }

    fn decode_from(reader: &mut ByteReader<'_>, depth: usize) -> Result<Self> {
        let tag = reader.u8()?;
        let flag = tag >> 4;
        let size = tag & 0x0f;
        let require_no_size = || {
            if size != 0 {
                Err(Error::malformed(format!("unexpected size bits in tag {:#04x}", tag)))
            } else {
                Ok(())
            }
        };
        match flag {
            FLAG_PERMISSIONS => {
                require_no_size()?;
                Ok(SessionsTopology::Permissions(SessionPermissions::decode_from(reader)?))
            }
            FLAG_NODE => {
                require_no_size()?;
                Ok(SessionsTopology::Node(reader.b256()?))
            }
            FLAG_BRANCH => {
                if depth >= MAX_SESSION_DEPTH {
                    return Err(Error::malformed(format!(
                        "branches nested deeper than {}",
                        MAX_SESSION_DEPTH
                    )));
                }
                let len = reader.uint(size as usize)? as usize;
                let mut inner = ByteReader::new(reader.take(len)?);
                let children = decode_items(&mut inner, depth + 1)?;
                if children.len() < 2 {
                    return Err(Error::malformed("branch must have at least two children"));
                }
                Ok(SessionsTopology::Branch(children))
            }
            FLAG_BLACKLIST => {
                let count = if size == 0x0f {
                    reader.uint(2)? as usize
                } else {
                    size as usize
                };
                let list = (0..count)
                    .map(|_| reader.address())
                    .collect::<Result<Vec<_>>>()?;
                Ok(SessionsTopology::Blacklist(list))
            }
            FLAG_IDENTITY_SIGNER => {
                require_no_size()?;
                Ok(SessionsTopology::IdentitySigner(reader.address()?))
            }
            _ => Err(Error::InvalidFlag(tag)),
        }
    }

    /// See [`decode_sessions_topology`]
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(bytes);
        let mut items = decode_items(&mut reader, 0)?;
        match items.len() {
            0 => Err(Error::malformed("empty session topology")),
            1 => Ok(items.remove(0)),
            _ => Ok(SessionsTopology::Branch(items)),
        }
    }
}

fn decode_items(reader: &mut ByteReader<'_>, depth: usize) -> Result<Vec<SessionsTopology>> {
    let mut items = Vec::new();
    while !reader.is_empty() {
        items.push(SessionsTopology::decode_from(reader, depth)?);
    }
    Ok(items)
}

// ============================================================================
// Tree operations
// ============================================================================

/// Topology with an empty blacklist and one identity signer
pub fn empty_sessions_topology(identity_signer: Address) -> SessionsTopology {
    SessionsTopology::Branch(vec![
        SessionsTopology::Blacklist(Vec::new()),
        SessionsTopology::IdentitySigner(identity_signer),
    ])
}

/// Join two topologies under a new branch
pub fn merge_sessions_topology(a: SessionsTopology, b: SessionsTopology) -> SessionsTopology {
    SessionsTopology::Branch(vec![a, b])
}

/// Rebuild the tree as a balanced binary tree over its leaves
///
/// Leaves keep their depth-first order; opaque nodes count as leaves.
pub fn balance_sessions_topology(topology: &SessionsTopology) -> SessionsTopology {
    fn build(mut leaves: Vec<SessionsTopology>) -> SessionsTopology {
        if leaves.len() <= 1 {
            return leaves
                .pop()
                .unwrap_or_else(|| SessionsTopology::Branch(Vec::new()));
        }
        let right = leaves.split_off(leaves.len() / 2);
        SessionsTopology::Branch(vec![build(leaves), build(right)])
    }
    build(topology.leaves().into_iter().cloned().collect())
}

/// Insert an explicit session and rebalance
pub fn add_explicit_session(
    topology: &SessionsTopology,
    session: SessionPermissions,
) -> Result<SessionsTopology> {
    if topology.session_permissions(&session.signer).is_some() {
        return Err(Error::DuplicateSession(crate::types::address_hex(&session.signer)));
    }
    let merged = merge_sessions_topology(topology.clone(), SessionsTopology::Permissions(session));
    Ok(balance_sessions_topology(&merged))
}

/// Remove the explicit session of `signer` and rebalance
///
/// Returns `None` when nothing is left.
pub fn remove_explicit_session(
    topology: &SessionsTopology,
    signer: &Address,
) -> Option<SessionsTopology> {
    fn remove(topology: &SessionsTopology, signer: &Address) -> Option<SessionsTopology> {
        match topology {
            SessionsTopology::Permissions(sp) if &sp.signer == signer => None,
            SessionsTopology::Branch(children) => {
                collapse(children.iter().filter_map(|c| remove(c, signer)).collect())
            }
            other => Some(other.clone()),
        }
    }
    remove(topology, signer).map(|t| balance_sessions_topology(&t))
}

/// Drop explicit sessions expired at `now`
///
/// Blacklist, identity and opaque leaves are kept. Branches left empty vanish
/// and branches left with one child are replaced by it.
pub fn clean_sessions_topology(topology: &SessionsTopology, now: u64) -> Option<SessionsTopology> {
    match topology {
        SessionsTopology::Permissions(sp) if sp.is_expired(now) => None,
        SessionsTopology::Branch(children) => collapse(
            children
                .iter()
                .filter_map(|c| clean_sessions_topology(c, now))
                .collect(),
        ),
        other => Some(other.clone()),
    }
}

fn collapse(mut children: Vec<SessionsTopology>) -> Option<SessionsTopology> {
    match children.len() {
        0 => None,
        1 => children.pop(),
        _ => Some(SessionsTopology::Branch(children)),
    }
}

/// Prune everything a signature does not need
///
/// Permission leaves survive only for `explicit_signers`, the blacklist only
/// when `implicit_signers` is non-empty and identity leaves only when equal to
/// `identity_signer`. Pruned leaves become opaque nodes and branches made only
/// of nodes collapse into one, so the root hash is unchanged.
pub fn minimise_sessions_topology(
    topology: &SessionsTopology,
    explicit_signers: &[Address],
    implicit_signers: &[Address],
    identity_signer: Option<&Address>,
) -> Result<SessionsTopology> {
    let keep = match topology {
        SessionsTopology::Permissions(sp) => explicit_signers.contains(&sp.signer),
        SessionsTopology::Blacklist(_) => !implicit_signers.is_empty(),
        SessionsTopology::IdentitySigner(address) => identity_signer == Some(address),
        SessionsTopology::Node(_) => true,
        SessionsTopology::Branch(children) => {
            let minimised = children
                .iter()
                .map(|c| {
                    minimise_sessions_topology(c, explicit_signers, implicit_signers, identity_signer)
                })
                .collect::<Result<Vec<_>>>()?;
            if minimised
                .iter()
                .all(|c| matches!(c, SessionsTopology::Node(_)))
            {
                return Ok(SessionsTopology::Node(topology.hash()?));
            }
            return Ok(SessionsTopology::Branch(minimised));
        }
    };
    if keep {
        Ok(topology.clone())
    } else {
        Ok(SessionsTopology::Node(topology.hash()?))
    }
}

fn edit_blacklist(
    topology: &SessionsTopology,
    edit: &impl Fn(&[Address]) -> Vec<Address>,
) -> Result<SessionsTopology> {
    fn walk(
        topology: &SessionsTopology,
        edit: &impl Fn(&[Address]) -> Vec<Address>,
        found: &mut bool,
    ) -> SessionsTopology {
        match topology {
            SessionsTopology::Blacklist(list) if !*found => {
                *found = true;
                SessionsTopology::Blacklist(edit(list))
            }
            SessionsTopology::Branch(children) => SessionsTopology::Branch(
                children.iter().map(|c| walk(c, edit, found)).collect(),
            ),
            other => other.clone(),
        }
    }
    let mut found = false;
    let edited = walk(topology, edit, &mut found);
    if !found {
        return Err(Error::NoBlacklist);
    }
    Ok(edited)
}

/// Add an address to the implicit blacklist, keeping it sorted
pub fn add_to_implicit_blacklist(
    topology: &SessionsTopology,
    address: Address,
) -> Result<SessionsTopology> {
    edit_blacklist(topology, &|list: &[Address]| {
        let mut next = list.to_vec();
        if let Err(pos) = next.binary_search(&address) {
            next.insert(pos, address);
        }
        next
    })
}

/// Remove an address from the implicit blacklist
pub fn remove_from_implicit_blacklist(
    topology: &SessionsTopology,
    address: &Address,
) -> Result<SessionsTopology> {
    edit_blacklist(topology, &|list: &[Address]| {
        list.iter().filter(|a| *a != address).copied().collect()
    })
}

/// Tagged binary encoding consumed by the sessions verifier
///
/// Each element starts with `(flag << 4) | size`. Branches carry their byte
/// length in `size` big-endian bytes; blacklists carry their count in `size`,
/// or `0x0f` followed by a 2-byte count from 15 entries up.
pub fn encode_sessions_topology(topology: &SessionsTopology) -> Result<Vec<u8>> {
    topology.encode()
}

/// Inverse of [`encode_sessions_topology`]
///
/// Several top-level elements decode as one branch.
pub fn decode_sessions_topology(bytes: &[u8]) -> Result<SessionsTopology> {
    SessionsTopology::decode(bytes)
}

// ============================================================================
// JSON
// ============================================================================

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum SessionsTopologyJson {
    Branch(Vec<SessionsTopologyJson>),
    Node(#[serde(with = "serde_hex::b256")] B256),
    Leaf(SessionLeafJson),
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum SessionLeafJson {
    SessionPermissions(SessionPermissions),
    ImplicitBlacklist {
        #[serde(with = "serde_hex::address_vec")]
        blacklist: Vec<Address>,
    },
    IdentitySigner {
        #[serde(rename = "identitySigner", with = "serde_hex::address")]
        identity_signer: Address,
    },
}

impl From<SessionsTopology> for SessionsTopologyJson {
    fn from(topology: SessionsTopology) -> Self {
        match topology {
            SessionsTopology::Permissions(sp) => {
                SessionsTopologyJson::Leaf(SessionLeafJson::SessionPermissions(sp))
            }
            SessionsTopology::Blacklist(blacklist) => {
                SessionsTopologyJson::Leaf(SessionLeafJson::ImplicitBlacklist { blacklist })
            }
            SessionsTopology::IdentitySigner(identity_signer) => {
                SessionsTopologyJson::Leaf(SessionLeafJson::IdentitySigner { identity_signer })
            }
            SessionsTopology::Node(hash) => SessionsTopologyJson::Node(hash),
            SessionsTopology::Branch(children) => {
                SessionsTopologyJson::Branch(children.into_iter().map(Into::into).collect())
            }
        }
    }
}

impl TryFrom<SessionsTopologyJson> for SessionsTopology {
    type Error = Error;

    fn try_from(json: SessionsTopologyJson) -> Result<Self> {
        Ok(match json {
            SessionsTopologyJson::Branch(children) => {
                if children.len() < 2 {
                    return Err(Error::malformed("branch must have at least two children"));
                }
                SessionsTopology::Branch(
                    children
                        .into_iter()
                        .map(SessionsTopology::try_from)
                        .collect::<Result<Vec<_>>>()?,
                )
            }
            SessionsTopologyJson::Node(hash) => SessionsTopology::Node(hash),
            SessionsTopologyJson::Leaf(SessionLeafJson::SessionPermissions(sp)) => {
                SessionsTopology::Permissions(sp)
            }
            SessionsTopologyJson::Leaf(SessionLeafJson::ImplicitBlacklist { blacklist }) => {
                SessionsTopology::Blacklist(blacklist)
            }
            SessionsTopologyJson::Leaf(SessionLeafJson::IdentitySigner { identity_signer }) => {
                SessionsTopology::IdentitySigner(identity_signer)
            }
        })
    }
}
