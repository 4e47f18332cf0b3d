//! Integration tests for the session signing flow
//!
//! Builds a topology with explicit and implicit sessions, signs call batches
//! with local keys and checks the decoded payload against the calls.

use alloy_primitives::{Address, B256, U256};
use alloy_sol_types::{SolCall, sol};
use std::sync::Arc;
use wallet_auth_core::Error;
use wallet_auth_core::session::{
    Attestation, AuthData, Call, Erc20PermissionBuilder, ExplicitSession, ImplicitSession,
    Permission, SessionCallSignature, SessionPermissions, SessionSigner, SessionSignerConfig,
    SessionsTopology, add_explicit_session, add_to_implicit_blacklist,
    decode_session_call_signatures, empty_sessions_topology,
};
use wallet_auth_core::signer::{LocalSigner, Signer, recover_address};

sol! {
    function transfer(address to, uint256 value);
}

const WALLET: Address = Address::new([0xaa; 20]);
const TOKEN: Address = Address::new([0x70; 20]);
const DAPP: Address = Address::new([0xda; 20]);
const NOW: u64 = 1_700_000_000;

struct Wallet {
    identity: LocalSigner,
    explicit: LocalSigner,
    implicit: LocalSigner,
    topology: SessionsTopology,
}

fn setup() -> Wallet {
    let identity = LocalSigner::random();
    let explicit = LocalSigner::random();
    let implicit = LocalSigner::random();

    let session = SessionPermissions {
        signer: explicit.address(),
        chain_id: U256::from(1),
        value_limit: U256::from(1_000),
        deadline: NOW + 3_600,
        permissions: vec![
            Erc20PermissionBuilder::build_transfer(TOKEN, U256::from(100)).unwrap(),
            Permission::new(DAPP, vec![]),
        ],
    };
    let topology =
        add_explicit_session(&empty_sessions_topology(identity.address()), session).unwrap();

    Wallet {
        identity,
        explicit,
        implicit,
        topology,
    }
}

fn config() -> SessionSignerConfig {
    SessionSignerConfig::new(WALLET, U256::from(1))
        .with_space(U256::from(3))
        .with_nonce(U256::from(9))
        .with_now(NOW)
}

fn attestation(signer: Address) -> Attestation {
    Attestation {
        approved_signer: signer,
        identity_type: *b"OIDC",
        issuer_hash: B256::repeat_byte(0x01),
        audience_hash: B256::repeat_byte(0x02),
        application_data: Vec::new(),
        auth_data: AuthData {
            redirect_url: "https://app.example".to_string(),
            issued_at: NOW,
        },
    }
}

fn implicit_session(wallet: &Wallet) -> ImplicitSession {
    let attestation = attestation(wallet.implicit.address());
    let identity_signature = wallet
        .identity
        .sign_digest(&attestation.hash().unwrap())
        .unwrap();
    ImplicitSession::new(
        Arc::new(wallet.implicit.clone()),
        attestation,
        identity_signature,
    )
    .unwrap()
}

fn signer(wallet: &Wallet) -> SessionSigner {
    SessionSigner::new(wallet.topology.clone(), config())
        .unwrap()
        .with_explicit_session(ExplicitSession::new(Arc::new(wallet.explicit.clone())))
        .unwrap()
        .with_implicit_session(implicit_session(wallet))
        .unwrap()
}

fn transfer(value: u64) -> Call {
    let data = transferCall {
        to: Address::repeat_byte(1),
        value: U256::from(value),
    }
    .abi_encode();
    Call::new(TOKEN, U256::ZERO, data)
}

fn recover_session_key(calls: &[Call], index: usize, signature: &SessionCallSignature) -> Address {
    let config = config();
    let digest =
        calls[index].hash_with_replay_protection(config.chain_id, config.space, config.nonce, index);
    recover_address(&digest, signature.session_signature()).unwrap()
}

// ============================================================================
// Signing Flow
// ============================================================================

#[tokio::test]
async fn test_mixed_batch() {
    let wallet = setup();
    let signer = signer(&wallet);
    let other = Address::repeat_byte(0x0c);
    let calls = vec![
        transfer(40),
        Call::new(DAPP, U256::from(5), vec![1, 2, 3]),
        Call::new(other, U256::ZERO, vec![]),
    ];

    let payload = signer.sign_calls(&calls).await.unwrap();
    let decoded = decode_session_call_signatures(&payload).unwrap();
    assert_eq!(decoded.topology.hash().unwrap(), wallet.topology.hash().unwrap());
    assert_eq!(decoded.call_signatures.len(), 3);

    match &decoded.call_signatures[0] {
        SessionCallSignature::Explicit {
            permission_index, ..
        } => assert_eq!(*permission_index, 0),
        other => panic!("expected explicit signature, got {:?}", other),
    }
    match &decoded.call_signatures[1] {
        SessionCallSignature::Explicit {
            permission_index, ..
        } => assert_eq!(*permission_index, 1),
        other => panic!("expected explicit signature, got {:?}", other),
    }
    match &decoded.call_signatures[2] {
        SessionCallSignature::Implicit {
            attestation,
            identity_signature,
            ..
        } => {
            assert_eq!(attestation.approved_signer, wallet.implicit.address());
            let identity = recover_address(&attestation.hash().unwrap(), identity_signature);
            assert_eq!(identity.unwrap(), wallet.identity.address());
        }
        other => panic!("expected implicit signature, got {:?}", other),
    }

    assert_eq!(
        recover_session_key(&calls, 0, &decoded.call_signatures[0]),
        wallet.explicit.address()
    );
    assert_eq!(
        recover_session_key(&calls, 2, &decoded.call_signatures[2]),
        wallet.implicit.address()
    );
}

#[tokio::test]
async fn test_budget_is_shared_across_batch() {
    let wallet = setup();
    let signer = SessionSigner::new(wallet.topology.clone(), config())
        .unwrap()
        .with_explicit_session(ExplicitSession::new(Arc::new(wallet.explicit.clone())))
        .unwrap();

    assert!(signer.sign_calls(&[transfer(60), transfer(40)]).await.is_ok());

    let err = signer
        .sign_calls(&[transfer(60), transfer(41)])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedCall { index: 1, .. }));
}

#[tokio::test]
async fn test_value_call_cannot_fall_back_to_implicit() {
    let wallet = setup();
    let signer = signer(&wallet);
    let err = signer
        .sign_calls(&[Call::new(Address::repeat_byte(0x0c), U256::from(1), vec![])])
        .await
        .unwrap_err();
    match err {
        Error::UnsupportedCall { index, reason } => {
            assert_eq!(index, 0);
            assert!(reason.contains("value"));
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_blacklisted_target_is_rejected() {
    let mut wallet = setup();
    let blocked = Address::repeat_byte(0x0b);
    wallet.topology = add_to_implicit_blacklist(&wallet.topology, blocked).unwrap();
    let signer = signer(&wallet);

    let err = signer
        .sign_calls(&[Call::new(blocked, U256::ZERO, vec![])])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("blacklisted"));
}

#[tokio::test]
async fn test_expired_session_is_skipped() {
    let wallet = setup();
    let late = config().with_now(NOW + 3_601);
    let signer = SessionSigner::new(wallet.topology.clone(), late)
        .unwrap()
        .with_explicit_session(ExplicitSession::new(Arc::new(wallet.explicit.clone())))
        .unwrap();
    let err = signer.sign_calls(&[transfer(1)]).await.unwrap_err();
    assert!(matches!(err, Error::UnsupportedCall { index: 0, .. }));
}

// ============================================================================
// Setup Errors
// ============================================================================

#[test]
fn test_signer_requires_complete_topology() {
    let wallet = setup();
    let incomplete = SessionsTopology::Blacklist(vec![]);
    assert!(matches!(
        SessionSigner::new(incomplete, config()),
        Err(Error::IncompleteTopology)
    ));

    let stranger = LocalSigner::random();
    let result = SessionSigner::new(wallet.topology.clone(), config())
        .unwrap()
        .with_explicit_session(ExplicitSession::new(Arc::new(stranger)));
    assert!(result.is_err());
}

#[test]
fn test_implicit_session_checks_attestation() {
    let wallet = setup();
    let attestation = attestation(Address::repeat_byte(0x33));
    let identity_signature = wallet
        .identity
        .sign_digest(&attestation.hash().unwrap())
        .unwrap();
    // attestation approves a different key
    assert!(
        ImplicitSession::new(
            Arc::new(wallet.implicit.clone()),
            attestation,
            identity_signature
        )
        .is_err()
    );

    // identity signer outside the topology
    let rogue = LocalSigner::random();
    let attestation = self::attestation(wallet.implicit.address());
    let rogue_signature = rogue.sign_digest(&attestation.hash().unwrap()).unwrap();
    let session = ImplicitSession::new(
        Arc::new(wallet.implicit.clone()),
        attestation,
        rogue_signature,
    )
    .unwrap();
    assert_eq!(session.identity_signer(), rogue.address());
    let result = SessionSigner::new(wallet.topology.clone(), config())
        .unwrap()
        .with_implicit_session(session);
    assert!(result.is_err());
}
