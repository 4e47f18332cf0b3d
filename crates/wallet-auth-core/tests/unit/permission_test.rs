//! Unit tests for permission rules
//!
//! Tests cover:
//! - Masked comparisons on call data words
//! - Cumulative budgets across calls
//! - Session-level chain, deadline and value checks
//! - Binary encoding and its error paths

use alloy_primitives::{Address, B256, U256};
use alloy_sol_types::{SolCall, sol};
use wallet_auth_core::Error;
use wallet_auth_core::session::{
    Call, ParameterOperation, ParameterRule, Permission, PermissionUsage, SessionPermissions,
    decode_session_permissions, encode_permission, encode_session_permissions, mask,
};
use wallet_auth_core::session::permission::{MAX_PERMISSIONS, MAX_RULES, RULE_SIZE};

sol! {
    function transfer(address to, uint256 value);
}

const TOKEN: Address = Address::new([0x70; 20]);
const SIGNER: Address = Address::new([0x5e; 20]);

fn transfer_data(to: Address, value: u64) -> Vec<u8> {
    transferCall {
        to,
        value: U256::from(value),
    }
    .abi_encode()
}

fn selector_rule() -> ParameterRule {
    let mut value = [0u8; 32];
    value[..4].copy_from_slice(&transferCall::SELECTOR);
    ParameterRule::new(ParameterOperation::Equal, B256::new(value), 0, mask::SELECTOR)
}

fn budget_rule(limit: u64) -> ParameterRule {
    ParameterRule {
        cumulative: true,
        ..ParameterRule::new(
            ParameterOperation::LessThanOrEqual,
            B256::from(U256::from(limit)),
            36,
            mask::UINT256,
        )
    }
}

fn transfer_permission(limit: u64) -> Permission {
    Permission::new(TOKEN, vec![selector_rule(), budget_rule(limit)])
}

fn session(permissions: Vec<Permission>) -> SessionPermissions {
    SessionPermissions {
        signer: SIGNER,
        chain_id: U256::from(1),
        value_limit: U256::from(1_000),
        deadline: 2_000,
        permissions,
    }
}

// ============================================================================
// Rule Tests
// ============================================================================

#[test]
fn test_masks() {
    assert_eq!(&mask::SELECTOR[..4], &[0xff; 4]);
    assert!(mask::SELECTOR[4..].iter().all(|b| *b == 0));
    assert_eq!(mask::ADDRESS, mask::UINT160);
    assert_eq!(mask::BOOL, mask::UINT8);
    assert_eq!(mask::BYTES32, B256::repeat_byte(0xff));
    assert_eq!(mask::INT64, mask::right(8));
}

#[test]
fn test_masked_word_reads_absolute_offset() {
    let data = transfer_data(Address::repeat_byte(1), 1234);
    let rule = ParameterRule::new(ParameterOperation::Equal, B256::ZERO, 36, mask::UINT256);
    assert_eq!(rule.masked_word(&data), B256::from(U256::from(1234)));

    let rule = ParameterRule::new(ParameterOperation::Equal, B256::ZERO, 4, mask::ADDRESS);
    assert_eq!(
        rule.masked_word(&data),
        Address::repeat_byte(1).into_word()
    );
}

#[test]
fn test_masked_word_zero_pads_past_end() {
    let rule = ParameterRule::new(ParameterOperation::Equal, B256::ZERO, 2, mask::BYTES32);
    let word = rule.masked_word(&[0xaa, 0xbb, 0xcc, 0xdd]);
    assert_eq!(word[0], 0xcc);
    assert_eq!(word[1], 0xdd);
    assert!(word[2..].iter().all(|b| *b == 0));

    let far = ParameterRule::new(ParameterOperation::Equal, B256::ZERO, 1_000, mask::BYTES32);
    assert_eq!(far.masked_word(&[0xff; 8]), B256::ZERO);
}

#[test]
fn test_operations() {
    let small = B256::from(U256::from(5));
    let large = B256::from(U256::from(500));
    assert!(ParameterOperation::Equal.compare(small, small));
    assert!(!ParameterOperation::Equal.compare(small, large));
    assert!(ParameterOperation::NotEqual.compare(small, large));
    assert!(ParameterOperation::GreaterThanOrEqual.compare(large, small));
    assert!(!ParameterOperation::GreaterThanOrEqual.compare(small, large));
    assert!(ParameterOperation::LessThanOrEqual.compare(small, small));
    assert!(!ParameterOperation::LessThanOrEqual.compare(large, small));
}

#[test]
fn test_operation_wire_bytes() {
    for op in [
        ParameterOperation::Equal,
        ParameterOperation::NotEqual,
        ParameterOperation::GreaterThanOrEqual,
        ParameterOperation::LessThanOrEqual,
    ] {
        assert_eq!(ParameterOperation::from_u8(op as u8).unwrap(), op);
    }
    assert!(ParameterOperation::from_u8(4).is_err());
}

// ============================================================================
// Validation Tests
// ============================================================================

#[test]
fn test_permission_rejects_other_target() {
    let permission = transfer_permission(100);
    let call = Call::new(Address::repeat_byte(1), U256::ZERO, transfer_data(SIGNER, 1));
    assert!(!permission.validate(&SIGNER, &call, &mut PermissionUsage::new()));
}

#[test]
fn test_permission_rejects_other_selector() {
    let permission = transfer_permission(100);
    let mut data = transfer_data(SIGNER, 1);
    data[0] ^= 0xff;
    let call = Call::new(TOKEN, U256::ZERO, data);
    assert!(!permission.validate(&SIGNER, &call, &mut PermissionUsage::new()));
}

#[test]
fn test_empty_rules_allow_any_call() {
    let permission = Permission::new(TOKEN, vec![]);
    let call = Call::new(TOKEN, U256::ZERO, vec![1, 2, 3]);
    let mut usage = PermissionUsage::new();
    assert!(permission.validate(&SIGNER, &call, &mut usage));
    assert!(usage.is_empty());
}

#[test]
fn test_cumulative_budget_spans_calls() {
    let permission = transfer_permission(100);
    let mut usage = PermissionUsage::new();

    let first = Call::new(TOKEN, U256::ZERO, transfer_data(SIGNER, 60));
    assert!(permission.validate(&SIGNER, &first, &mut usage));
    assert_eq!(usage.len(), 1);

    let second = Call::new(TOKEN, U256::ZERO, transfer_data(SIGNER, 40));
    assert!(permission.validate(&SIGNER, &second, &mut usage));

    let third = Call::new(TOKEN, U256::ZERO, transfer_data(SIGNER, 1));
    let before = usage.clone();
    assert!(!permission.validate(&SIGNER, &third, &mut usage));
    assert_eq!(usage, before);
}

#[test]
fn test_budgets_are_tracked_per_signer() {
    let permission = transfer_permission(100);
    let mut usage = PermissionUsage::new();
    let call = Call::new(TOKEN, U256::ZERO, transfer_data(SIGNER, 100));

    assert!(permission.validate(&SIGNER, &call, &mut usage));
    assert!(!permission.validate(&SIGNER, &call, &mut usage));
    assert!(permission.validate(&Address::repeat_byte(0x01), &call, &mut usage));
}

// ============================================================================
// Session Tests
// ============================================================================

#[test]
fn test_find_supported_permission_returns_first_match() {
    let session = session(vec![
        Permission::new(Address::repeat_byte(0x01), vec![]),
        transfer_permission(100),
        Permission::new(TOKEN, vec![]),
    ]);
    let call = Call::new(TOKEN, U256::ZERO, transfer_data(SIGNER, 10));
    let mut usage = PermissionUsage::new();
    assert_eq!(
        session.find_supported_permission(&call, U256::from(1), 1_000, &mut usage),
        Some(1)
    );

    // over budget falls through to the unrestricted permission
    let big = Call::new(TOKEN, U256::ZERO, transfer_data(SIGNER, 1_000));
    assert_eq!(
        session.find_supported_permission(&big, U256::from(1), 1_000, &mut usage),
        Some(2)
    );
}

#[test]
fn test_session_chain_and_deadline() {
    let session = session(vec![Permission::new(TOKEN, vec![])]);
    let call = Call::new(TOKEN, U256::ZERO, vec![]);
    let mut usage = PermissionUsage::new();

    assert!(session
        .find_supported_permission(&call, U256::from(2), 1_000, &mut usage)
        .is_none());
    assert!(session
        .find_supported_permission(&call, U256::from(1), 2_001, &mut usage)
        .is_none());
    // valid through the deadline itself
    assert!(session
        .find_supported_permission(&call, U256::from(1), 2_000, &mut usage)
        .is_some());

    let any_chain = SessionPermissions {
        chain_id: U256::ZERO,
        ..session.clone()
    };
    assert!(any_chain
        .find_supported_permission(&call, U256::from(42), 1_000, &mut usage)
        .is_some());
}

#[test]
fn test_session_value_limit() {
    let session = session(vec![Permission::new(TOKEN, vec![])]);
    let mut usage = PermissionUsage::new();

    let pay = |value: u64| Call::new(TOKEN, U256::from(value), vec![]);
    assert!(session
        .find_supported_permission(&pay(700), U256::from(1), 0, &mut usage)
        .is_some());
    assert_eq!(usage.value_used(&SIGNER), U256::from(700));
    assert!(session
        .find_supported_permission(&pay(301), U256::from(1), 0, &mut usage)
        .is_none());
    assert!(session
        .find_supported_permission(&pay(300), U256::from(1), 0, &mut usage)
        .is_some());
    assert_eq!(usage.value_used(&SIGNER), U256::from(1_000));
}

#[test]
fn test_session_rejects_delegate_call() {
    let session = session(vec![Permission::new(TOKEN, vec![])]);
    let call = Call::new(TOKEN, U256::ZERO, vec![]).with_delegate_call(true);
    assert!(session
        .find_supported_permission(&call, U256::from(1), 0, &mut PermissionUsage::new())
        .is_none());
}

// ============================================================================
// Encoding Tests
// ============================================================================

#[test]
fn test_permission_encoding_layout() {
    let permission = transfer_permission(100);
    let encoded = encode_permission(&permission).unwrap();
    assert_eq!(encoded.len(), 20 + 1 + 2 * RULE_SIZE);
    assert_eq!(&encoded[..20], TOKEN.as_slice());
    assert_eq!(encoded[20], 2);

    let budget = &encoded[21 + RULE_SIZE..];
    assert_eq!(budget[0], 1);
    assert_eq!(budget[1], ParameterOperation::LessThanOrEqual as u8);
    assert_eq!(U256::from_be_slice(&budget[2..34]), U256::from(100));
    assert_eq!(U256::from_be_slice(&budget[34..66]), U256::from(36));
    assert_eq!(&budget[66..98], mask::UINT256.as_slice());
}

#[test]
fn test_session_permissions_round_trip() {
    let session = SessionPermissions {
        chain_id: U256::MAX,
        value_limit: U256::MAX,
        deadline: u64::MAX,
        ..session(vec![transfer_permission(100), Permission::new(TOKEN, vec![])])
    };
    let encoded = encode_session_permissions(&session).unwrap();
    assert_eq!(encoded.len(), 20 + 32 + 32 + 8 + 1 + (21 + 2 * RULE_SIZE) + 21);
    assert_eq!(decode_session_permissions(&encoded).unwrap(), session);
}

#[test]
fn test_too_many_rules() {
    let rules = vec![selector_rule(); MAX_RULES + 1];
    let err = Permission::new(TOKEN, rules).encode().unwrap_err();
    assert!(matches!(err, Error::CapacityExceeded(_)));
}

#[test]
fn test_too_many_permissions() {
    let permissions = vec![Permission::new(TOKEN, vec![]); MAX_PERMISSIONS + 1];
    let err = session(permissions).encode().unwrap_err();
    assert!(matches!(err, Error::CapacityExceeded(_)));
}

#[test]
fn test_decode_rejects_empty_permission_list() {
    let mut encoded = encode_session_permissions(&session(vec![Permission::new(TOKEN, vec![])]))
        .unwrap();
    // drop the permission and zero the count
    encoded.truncate(20 + 32 + 32 + 8 + 1);
    *encoded.last_mut().unwrap() = 0;
    assert!(matches!(
        decode_session_permissions(&encoded),
        Err(Error::NoPermissions)
    ));
}

#[test]
fn test_decode_rejects_truncated_and_trailing_bytes() {
    let encoded = encode_session_permissions(&session(vec![transfer_permission(5)])).unwrap();
    assert!(decode_session_permissions(&encoded[..encoded.len() - 1]).is_err());

    let mut padded = encoded.clone();
    padded.push(0);
    assert!(decode_session_permissions(&padded).is_err());
}

#[test]
fn test_decode_rejects_bad_rule_bytes() {
    let encoded = encode_session_permissions(&session(vec![transfer_permission(5)])).unwrap();
    let rule_start = 20 + 32 + 32 + 8 + 1 + 21;

    let mut bad_flag = encoded.clone();
    bad_flag[rule_start] = 2;
    assert!(decode_session_permissions(&bad_flag).is_err());

    let mut bad_op = encoded;
    bad_op[rule_start + 1] = 9;
    assert!(decode_session_permissions(&bad_op).is_err());
}

#[test]
fn test_session_permissions_json() {
    let session = session(vec![transfer_permission(100)]);
    let json = serde_json::to_value(&session).unwrap();
    assert_eq!(json["chainId"], "1");
    assert_eq!(json["deadline"], "2000");
    assert_eq!(json["permissions"][0]["rules"][1]["operation"], "LESS_THAN_OR_EQUAL");
    let parsed: SessionPermissions = serde_json::from_value(json).unwrap();
    assert_eq!(parsed, session);
}
