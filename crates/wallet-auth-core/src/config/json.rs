//! JSON shape of a topology
//!
//! Branches are two-element arrays, opaque nodes are bare hex strings and every
//! other leaf is an object tagged by `type`.

use super::Topology;
use crate::types::{serde_dec, serde_hex};
use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum TopologyJson {
    Node(Box<TopologyJson>, Box<TopologyJson>),
    Hash(#[serde(with = "serde_hex::b256")] B256),
    Leaf(LeafJson),
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub(crate) enum LeafJson {
    Signer {
        #[serde(with = "serde_hex::address")]
        address: Address,
        #[serde(with = "serde_dec::u64")]
        weight: u64,
    },
    SapientSigner {
        #[serde(with = "serde_hex::address")]
        address: Address,
        #[serde(with = "serde_dec::u64")]
        weight: u64,
        #[serde(rename = "imageHash", with = "serde_hex::b256")]
        image_hash: B256,
    },
    Subdigest {
        #[serde(with = "serde_hex::b256")]
        digest: B256,
    },
    AnyAddressSubdigest {
        #[serde(with = "serde_hex::b256")]
        digest: B256,
    },
    Nested {
        #[serde(with = "serde_dec::u64")]
        weight: u64,
        #[serde(with = "serde_dec::u64")]
        threshold: u64,
        tree: Box<TopologyJson>,
    },
}

impl From<Topology> for TopologyJson {
    fn from(topology: Topology) -> Self {
        match topology {
            Topology::Signer { address, weight } => {
                TopologyJson::Leaf(LeafJson::Signer { address, weight })
            }
            Topology::SapientSigner {
                address,
                weight,
                image_hash,
            } => TopologyJson::Leaf(LeafJson::SapientSigner {
                address,
                weight,
                image_hash,
            }),
            Topology::Subdigest { digest } => TopologyJson::Leaf(LeafJson::Subdigest { digest }),
            Topology::AnyAddressSubdigest { digest } => {
                TopologyJson::Leaf(LeafJson::AnyAddressSubdigest { digest })
            }
            Topology::NodeLeaf(hash) => TopologyJson::Hash(hash),
            Topology::Nested {
                weight,
                threshold,
                tree,
            } => TopologyJson::Leaf(LeafJson::Nested {
                weight,
                threshold,
                tree: Box::new((*tree).into()),
            }),
            Topology::Node(left, right) => {
                TopologyJson::Node(Box::new((*left).into()), Box::new((*right).into()))
            }
        }
    }
}

impl From<TopologyJson> for Topology {
    fn from(json: TopologyJson) -> Self {
        match json {
            TopologyJson::Node(left, right) => Topology::node((*left).into(), (*right).into()),
            TopologyJson::Hash(hash) => Topology::NodeLeaf(hash),
            TopologyJson::Leaf(LeafJson::Signer { address, weight }) => {
                Topology::Signer { address, weight }
            }
            TopologyJson::Leaf(LeafJson::SapientSigner {
                address,
                weight,
                image_hash,
            }) => Topology::SapientSigner {
                address,
                weight,
                image_hash,
            },
            TopologyJson::Leaf(LeafJson::Subdigest { digest }) => Topology::Subdigest { digest },
            TopologyJson::Leaf(LeafJson::AnyAddressSubdigest { digest }) => {
                Topology::AnyAddressSubdigest { digest }
            }
            TopologyJson::Leaf(LeafJson::Nested {
                weight,
                threshold,
                tree,
            }) => Topology::nested(weight, threshold, (*tree).into()),
        }
    }
}
