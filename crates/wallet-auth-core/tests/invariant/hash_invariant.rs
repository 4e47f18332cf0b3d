//! Hash invariants
//!
//! Root and image hashes are what wallets commit to on chain. These tests
//! verify they survive every representation change the crate performs:
//! - Pruning subtrees into opaque nodes
//! - JSON round trips
//! - Minimisation inside signature payloads

use alloy_primitives::{Address, B256, U256};
use proptest::prelude::*;
use wallet_auth_core::config::{Config, Topology, hash_configuration, merge_topology};
use wallet_auth_core::session::{
    Call, Permission, SessionCallSignature, SessionPermissions, SessionsTopology,
    add_explicit_session, decode_session_call_signatures, empty_sessions_topology,
    encode_session_call_signatures,
};
use wallet_auth_core::types::RsySignature;

// ============================================================================
// Strategies
// ============================================================================

fn address_strategy() -> impl Strategy<Value = Address> {
    any::<[u8; 20]>().prop_map(Address::from)
}

fn hash_strategy() -> impl Strategy<Value = B256> {
    any::<[u8; 32]>().prop_map(B256::from)
}

fn config_leaf_strategy() -> impl Strategy<Value = Topology> {
    prop_oneof![
        (address_strategy(), 0u64..=255).prop_map(|(a, w)| Topology::signer(a, w)),
        (address_strategy(), 0u64..=255, hash_strategy())
            .prop_map(|(a, w, h)| Topology::sapient_signer(a, w, h)),
        hash_strategy().prop_map(|digest| Topology::Subdigest { digest }),
        hash_strategy().prop_map(|digest| Topology::AnyAddressSubdigest { digest }),
    ]
}

fn config_topology_strategy() -> impl Strategy<Value = Topology> {
    config_leaf_strategy().prop_recursive(5, 32, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(l, r)| Topology::node(l, r)),
            (0u64..=255, 0u64..=65_535, inner)
                .prop_map(|(w, t, tree)| Topology::nested(w, t, tree)),
        ]
    })
}

/// Replace every subtree whose path bit is set in `seed` by its hash
fn prune(topology: &Topology, seed: u64, path: u32) -> Topology {
    if path < 64 && seed >> path & 1 == 1 {
        return Topology::NodeLeaf(topology.hash());
    }
    let next = (path * 2 + 1) % 64;
    match topology {
        Topology::Node(left, right) => {
            Topology::node(prune(left, seed, next), prune(right, seed, next + 1))
        }
        Topology::Nested {
            weight,
            threshold,
            tree,
        } => Topology::nested(*weight, *threshold, prune(tree, seed, next)),
        leaf => leaf.clone(),
    }
}

fn session_tree_strategy() -> impl Strategy<Value = SessionsTopology> {
    (
        address_strategy(),
        prop::collection::vec((address_strategy(), any::<u64>()), 1..6),
    )
        .prop_map(|(identity, sessions)| {
            sessions
                .into_iter()
                .fold(empty_sessions_topology(identity), |topology, (signer, deadline)| {
                    let session = SessionPermissions {
                        signer,
                        chain_id: U256::from(1),
                        value_limit: U256::from(deadline),
                        deadline,
                        permissions: vec![Permission::new(identity, vec![])],
                    };
                    add_explicit_session(&topology, session).unwrap_or(topology)
                })
        })
}

// ============================================================================
// Configuration Trees
// ============================================================================

proptest! {
    /// Pruning any set of subtrees keeps the image hash, and merging restores the tree
    #[test]
    fn pruning_keeps_image_hash(
        topology in config_topology_strategy(),
        seed in any::<u64>(),
        threshold in 1u64..10,
    ) {
        let pruned = prune(&topology, seed, 1);
        prop_assert_eq!(hash_configuration(&pruned), hash_configuration(&topology));
        prop_assert_eq!(
            Config::new(threshold, 0, pruned.clone()).image_hash(),
            Config::new(threshold, 0, topology.clone()).image_hash()
        );
        prop_assert_eq!(merge_topology(&pruned, &topology).unwrap(), topology);
    }

    /// Different thresholds never share an image hash
    #[test]
    fn threshold_is_bound(
        topology in config_topology_strategy(),
        a in 0u64..1_000,
        b in 0u64..1_000,
    ) {
        prop_assume!(a != b);
        prop_assert_ne!(
            Config::new(a, 0, topology.clone()).image_hash(),
            Config::new(b, 0, topology).image_hash()
        );
    }

    /// JSON round trips keep the configuration and its image hash
    #[test]
    fn config_json_keeps_image_hash(
        topology in config_topology_strategy(),
        checkpoint in any::<u64>(),
    ) {
        let config = Config::new(2, checkpoint, topology);
        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(parsed.image_hash(), config.image_hash());
        prop_assert_eq!(parsed, config);
    }
}

// ============================================================================
// Session Trees
// ============================================================================

proptest! {
    /// JSON round trips keep the session tree and its root
    #[test]
    fn session_json_keeps_root(topology in session_tree_strategy()) {
        let json = serde_json::to_string(&topology).unwrap();
        let parsed: SessionsTopology = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(parsed.hash().unwrap(), topology.hash().unwrap());
        prop_assert_eq!(parsed, topology);
    }

    /// The topology carried by a signature payload commits to the full root
    #[test]
    fn signature_payload_keeps_root(
        topology in session_tree_strategy(),
        pick in any::<prop::sample::Index>(),
    ) {
        let signers = topology.explicit_signers();
        let signer = signers[pick.index(signers.len())];
        let signature = SessionCallSignature::Explicit {
            permission_index: 0,
            session_signature: RsySignature::new(
                B256::repeat_byte(1),
                B256::repeat_byte(2),
                false,
            ),
        };
        let encoded =
            encode_session_call_signatures(&[signature], &topology, &[signer], &[], None).unwrap();
        let decoded = decode_session_call_signatures(&encoded).unwrap();
        prop_assert_eq!(decoded.topology.hash().unwrap(), topology.hash().unwrap());
        prop_assert_eq!(decoded.topology.explicit_signers(), vec![signer]);
    }
}

// ============================================================================
// Call Digests
// ============================================================================

proptest! {
    /// Replay protection binds chain, space, nonce and position
    #[test]
    fn call_digest_binds_context(
        to in address_strategy(),
        data in prop::collection::vec(any::<u8>(), 0..64),
        chain in 1u64..1_000,
        nonce in any::<u64>(),
        index in 0usize..16,
    ) {
        let call = Call::new(to, U256::ZERO, data);
        let (chain, nonce) = (U256::from(chain), U256::from(nonce));
        let digest = call.hash_with_replay_protection(chain, U256::ZERO, nonce, index);

        let one = U256::from(1);
        let digest_with = |call: &Call, chain: U256, space: U256, nonce: U256, index: usize| {
            call.hash_with_replay_protection(chain, space, nonce, index)
        };
        prop_assert_ne!(digest, digest_with(&call, chain + one, U256::ZERO, nonce, index));
        prop_assert_ne!(digest, digest_with(&call, chain, one, nonce, index));
        prop_assert_ne!(digest, digest_with(&call, chain, U256::ZERO, nonce + one, index));
        prop_assert_ne!(digest, digest_with(&call, chain, U256::ZERO, nonce, index + 1));
        let delegated = call.clone().with_delegate_call(true);
        prop_assert_ne!(digest, digest_with(&delegated, chain, U256::ZERO, nonce, index));
    }
}
