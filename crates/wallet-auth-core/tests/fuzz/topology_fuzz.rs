//! Fuzz tests for session topologies
//!
//! Generates arbitrary n-ary trees and checks balancing, cleaning,
//! minimisation and the binary encoding against them.

use alloy_primitives::{Address, B256, U256};
use proptest::prelude::*;
use wallet_auth_core::session::{
    Permission, SessionPermissions, SessionsTopology, add_to_implicit_blacklist,
    balance_sessions_topology, clean_sessions_topology, decode_sessions_topology,
    empty_sessions_topology, encode_sessions_topology, minimise_sessions_topology,
};

// ============================================================================
// Strategies for generating test data
// ============================================================================

fn address_strategy() -> impl Strategy<Value = Address> {
    any::<[u8; 20]>().prop_map(Address::from)
}

fn session_strategy() -> impl Strategy<Value = SessionPermissions> {
    (address_strategy(), 0u64..1_000, 1usize..3).prop_map(|(signer, deadline, count)| {
        SessionPermissions {
            signer,
            chain_id: U256::from(1),
            value_limit: U256::ZERO,
            deadline,
            permissions: vec![Permission::new(signer, vec![]); count],
        }
    })
}

fn blacklist_strategy() -> impl Strategy<Value = Vec<Address>> {
    prop::collection::vec(address_strategy(), 0..20).prop_map(|mut list| {
        list.sort();
        list.dedup();
        list
    })
}

fn leaf_strategy() -> impl Strategy<Value = SessionsTopology> {
    prop_oneof![
        3 => session_strategy().prop_map(SessionsTopology::Permissions),
        1 => blacklist_strategy().prop_map(SessionsTopology::Blacklist),
        1 => address_strategy().prop_map(SessionsTopology::IdentitySigner),
        1 => any::<[u8; 32]>().prop_map(|hash| SessionsTopology::Node(B256::from(hash))),
    ]
}

fn topology_strategy() -> impl Strategy<Value = SessionsTopology> {
    leaf_strategy().prop_recursive(4, 48, 4, |inner| {
        prop::collection::vec(inner, 2..=4).prop_map(SessionsTopology::Branch)
    })
}

fn depth(topology: &SessionsTopology) -> usize {
    match topology {
        SessionsTopology::Branch(children) => 1 + children.iter().map(depth).max().unwrap_or(0),
        _ => 0,
    }
}

fn ceil_log2(n: usize) -> usize {
    if n <= 1 {
        0
    } else {
        (usize::BITS - (n - 1).leading_zeros()) as usize
    }
}

/// Pick the items whose position bit is set in `seed`
fn pick(items: Vec<Address>, seed: u64) -> Vec<Address> {
    items
        .into_iter()
        .enumerate()
        .filter(|(i, _)| seed >> (i % 64) & 1 == 1)
        .map(|(_, item)| item)
        .collect()
}

// ============================================================================
// Balancing
// ============================================================================

proptest! {
    /// Balancing keeps the leaves in order and bounds the depth
    #[test]
    fn balance_keeps_leaves(topology in topology_strategy()) {
        let balanced = balance_sessions_topology(&topology);
        prop_assert_eq!(balanced.leaves(), topology.leaves());

        let n = topology.leaves().len();
        prop_assert!(depth(&balanced) <= ceil_log2(n) + 1);

        let again = balance_sessions_topology(&balanced);
        prop_assert_eq!(again, balanced);
    }
}

// ============================================================================
// Cleaning
// ============================================================================

proptest! {
    /// Cleaning removes exactly the expired sessions
    #[test]
    fn clean_removes_expired_sessions(topology in topology_strategy(), now in 0u64..1_200) {
        let expected: Vec<SessionsTopology> = topology
            .leaves()
            .into_iter()
            .filter(|leaf| !matches!(leaf, SessionsTopology::Permissions(sp) if sp.deadline < now))
            .cloned()
            .collect();

        match clean_sessions_topology(&topology, now) {
            Some(cleaned) => {
                let leaves: Vec<SessionsTopology> = cleaned.leaves().into_iter().cloned().collect();
                prop_assert_eq!(leaves, expected);
            }
            None => prop_assert!(expected.is_empty()),
        }
    }
}

// ============================================================================
// Minimisation
// ============================================================================

proptest! {
    /// Any minimisation keeps the root hash
    #[test]
    fn minimise_keeps_hash(
        topology in topology_strategy(),
        explicit_seed in any::<u64>(),
        implicit in prop::collection::vec(address_strategy(), 0..2),
        identity_seed in any::<u64>(),
    ) {
        let explicit = pick(topology.explicit_signers(), explicit_seed);
        let identity = pick(topology.identity_signers(), identity_seed).into_iter().next();

        let minimised =
            minimise_sessions_topology(&topology, &explicit, &implicit, identity.as_ref()).unwrap();
        prop_assert_eq!(minimised.hash().unwrap(), topology.hash().unwrap());

        let mut kept = minimised.explicit_signers();
        kept.sort();
        let mut wanted: Vec<Address> = topology
            .explicit_signers()
            .into_iter()
            .filter(|s| explicit.contains(s))
            .collect();
        wanted.sort();
        prop_assert_eq!(kept, wanted);
    }
}

// ============================================================================
// Encoding
// ============================================================================

proptest! {
    /// Encoded topologies decode to the same tree
    #[test]
    fn encode_decode_round_trip(topology in topology_strategy()) {
        let encoded = encode_sessions_topology(&topology).unwrap();
        let decoded = decode_sessions_topology(&encoded).unwrap();
        prop_assert_eq!(decoded.hash().unwrap(), topology.hash().unwrap());
        prop_assert_eq!(decoded, topology);
    }

    /// Decoding arbitrary bytes never panics
    #[test]
    fn decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = decode_sessions_topology(&bytes);
    }

    /// Decoding random bytes behind a valid tag never panics
    #[test]
    fn decode_tagged_never_panics(
        tag in 0u8..0x50,
        body in prop::collection::vec(any::<u8>(), 0..256),
    ) {
        let mut bytes = vec![tag];
        bytes.extend(body);
        let _ = decode_sessions_topology(&bytes);
    }
}

// ============================================================================
// Blacklist
// ============================================================================

proptest! {
    /// Blacklist additions keep the list sorted and free of duplicates
    #[test]
    fn blacklist_stays_sorted(additions in prop::collection::vec(address_strategy(), 0..30)) {
        let mut topology = empty_sessions_topology(Address::repeat_byte(0x1d));
        for address in &additions {
            topology = add_to_implicit_blacklist(&topology, *address).unwrap();
        }
        let list = topology.implicit_blacklist().unwrap();
        prop_assert!(list.windows(2).all(|w| w[0] < w[1]));
        prop_assert!(additions.iter().all(|a| list.contains(a)));

        let encoded = encode_sessions_topology(&topology).unwrap();
        prop_assert_eq!(decode_sessions_topology(&encoded).unwrap(), topology);
    }
}
