//! Permission rules and session permissions
//!
//! A [`Permission`] authorizes calls to one target contract. Each
//! [`ParameterRule`] reads a 32-byte word from the call data at `offset`,
//! applies `mask`, and compares the result against `value`. Cumulative rules
//! add the masked value to a running total kept in [`PermissionUsage`], which
//! turns a comparison into a budget across calls.

use super::call::Call;
use crate::types::{ByteReader, keccak256_concat, serde_dec, serde_hex};
use crate::{Error, Result};
use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Maximum number of rules in one permission
pub const MAX_RULES: usize = 255;

/// Maximum number of permissions in one session
pub const MAX_PERMISSIONS: usize = 127;

/// Byte size of an encoded rule
pub const RULE_SIZE: usize = 1 + 1 + 32 + 32 + 32;

/// 32-byte masks that project one ABI-encoded field out of a call data word
///
/// Addresses, booleans and integers are right-aligned in their word; `bytesN`
/// values are left-aligned.
pub mod mask {
    use alloy_primitives::B256;

    /// Mask keeping the first `n` bytes of a word
    pub const fn left(n: usize) -> B256 {
        let mut word = [0u8; 32];
        let mut i = 0;
        while i < n && i < 32 {
            word[i] = 0xff;
            i += 1;
        }
        B256::new(word)
    }

    /// Mask keeping the last `n` bytes of a word
    pub const fn right(n: usize) -> B256 {
        let mut word = [0u8; 32];
        let mut i = 0;
        while i < n && i < 32 {
            word[31 - i] = 0xff;
            i += 1;
        }
        B256::new(word)
    }

    /// Mask for `bytesN`
    pub const fn bytes(n: usize) -> B256 {
        left(n)
    }

    /// Mask for `uintN`
    pub const fn uint(bits: usize) -> B256 {
        right(bits / 8)
    }

    /// Mask for `intN`
    pub const fn int(bits: usize) -> B256 {
        right(bits / 8)
    }

    pub const SELECTOR: B256 = left(4);
    pub const ADDRESS: B256 = right(20);
    pub const BOOL: B256 = right(1);

    macro_rules! masks {
        ($f:ident: $($name:ident = $n:expr),* $(,)?) => {
            $(pub const $name: B256 = $f($n);)*
        };
    }

    masks!(bytes:
        BYTES1 = 1, BYTES2 = 2, BYTES3 = 3, BYTES4 = 4, BYTES5 = 5, BYTES6 = 6, BYTES7 = 7,
        BYTES8 = 8, BYTES9 = 9, BYTES10 = 10, BYTES11 = 11, BYTES12 = 12, BYTES13 = 13,
        BYTES14 = 14, BYTES15 = 15, BYTES16 = 16, BYTES17 = 17, BYTES18 = 18, BYTES19 = 19,
        BYTES20 = 20, BYTES21 = 21, BYTES22 = 22, BYTES23 = 23, BYTES24 = 24, BYTES25 = 25,
        BYTES26 = 26, BYTES27 = 27, BYTES28 = 28, BYTES29 = 29, BYTES30 = 30, BYTES31 = 31,
        BYTES32 = 32,
    );

    masks!(uint:
        UINT8 = 8, UINT16 = 16, UINT24 = 24, UINT32 = 32, UINT40 = 40, UINT48 = 48,
        UINT56 = 56, UINT64 = 64, UINT72 = 72, UINT80 = 80, UINT88 = 88, UINT96 = 96,
        UINT104 = 104, UINT112 = 112, UINT120 = 120, UINT128 = 128, UINT136 = 136,
        UINT144 = 144, UINT152 = 152, UINT160 = 160, UINT168 = 168, UINT176 = 176,
        UINT184 = 184, UINT192 = 192, UINT200 = 200, UINT208 = 208, UINT216 = 216,
        UINT224 = 224, UINT232 = 232, UINT240 = 240, UINT248 = 248, UINT256 = 256,
    );

    masks!(int:
        INT8 = 8, INT16 = 16, INT24 = 24, INT32 = 32, INT40 = 40, INT48 = 48, INT56 = 56,
        INT64 = 64, INT72 = 72, INT80 = 80, INT88 = 88, INT96 = 96, INT104 = 104,
        INT112 = 112, INT120 = 120, INT128 = 128, INT136 = 136, INT144 = 144, INT152 = 152,
        INT160 = 160, INT168 = 168, INT176 = 176, INT184 = 184, INT192 = 192, INT200 = 200,
        INT208 = 208, INT216 = 216, INT224 = 224, INT232 = 232, INT240 = 240, INT248 = 248,
        INT256 = 256,
    );
}

/// Comparison applied between the masked call data word and the rule value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum ParameterOperation {
    Equal = 0,
    NotEqual = 1,
    GreaterThanOrEqual = 2,
    LessThanOrEqual = 3,
}

impl ParameterOperation {
    /// Decode from the wire byte
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(ParameterOperation::Equal),
            1 => Ok(ParameterOperation::NotEqual),
            2 => Ok(ParameterOperation::GreaterThanOrEqual),
            3 => Ok(ParameterOperation::LessThanOrEqual),
            other => Err(Error::malformed(format!("unknown parameter operation {}", other))),
        }
    }

    /// Compare `actual` (masked call data) against `expected` (rule value)
    pub fn compare(&self, actual: B256, expected: B256) -> bool {
        match self {
            ParameterOperation::Equal => actual == expected,
            ParameterOperation::NotEqual => actual != expected,
            ParameterOperation::GreaterThanOrEqual => {
                U256::from_be_bytes(actual.0) >= U256::from_be_bytes(expected.0)
            }
            ParameterOperation::LessThanOrEqual => {
                U256::from_be_bytes(actual.0) <= U256::from_be_bytes(expected.0)
            }
        }
    }
}

/// Constraint on one 32-byte word of the call data
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParameterRule {
    /// Track the matched value across calls instead of checking it once
    pub cumulative: bool,
    /// Comparison to apply
    pub operation: ParameterOperation,
    /// Expected value
    #[serde(with = "serde_hex::b256")]
    pub value: B256,
    /// Absolute byte offset of the word in the call data
    #[serde(with = "serde_dec::u256")]
    pub offset: U256,
    /// Mask applied to the word before comparing
    #[serde(with = "serde_hex::b256")]
    pub mask: B256,
}

impl ParameterRule {
    /// Create a non-cumulative rule
    pub fn new(operation: ParameterOperation, value: B256, offset: u64, mask: B256) -> Self {
        Self {
            cumulative: false,
            operation,
            value,
            offset: U256::from(offset),
            mask,
        }
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.cumulative as u8);
        out.push(self.operation as u8);
        out.extend_from_slice(self.value.as_slice());
        out.extend_from_slice(&self.offset.to_be_bytes::<32>());
        out.extend_from_slice(self.mask.as_slice());
    }

    fn decode_from(reader: &mut ByteReader<'_>) -> Result<Self> {
        let cumulative = match reader.u8()? {
            0 => false,
            1 => true,
            other => {
                return Err(Error::malformed(format!("invalid cumulative flag {}", other)));
            }
        };
        let operation = ParameterOperation::from_u8(reader.u8()?)?;
        Ok(Self {
            cumulative,
            operation,
            value: reader.b256()?,
            offset: reader.u256()?,
            mask: reader.b256()?,
        })
    }

    /// Check the rule against `call_data`
    ///
    /// `previous` is the running total of a cumulative rule and is ignored
    /// otherwise. Returns the new running total when the rule holds.
    pub fn check(&self, call_data: &[u8], previous: U256) -> Option<U256> {
        let mut value = self.masked_word(call_data);
        let mut total = U256::from_be_bytes(value.0);
        if self.cumulative {
            total = previous.saturating_add(total);
            value = B256::from(total.to_be_bytes::<32>());
        }
        self.operation.compare(value, self.value).then_some(total)
    }

    /// Masked word of `call_data` at this rule's offset
    ///
    /// Bytes past the end of the call data read as zero.
    pub fn masked_word(&self, call_data: &[u8]) -> B256 {
        let mut word = [0u8; 32];
        if let Ok(start) = usize::try_from(self.offset) {
            if start < call_data.len() {
                let end = call_data.len().min(start.saturating_add(32));
                word[..end - start].copy_from_slice(&call_data[start..end]);
            }
        }
        B256::new(word) & self.mask
    }
}

/// Authorization for calls to a single target
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permission {
    /// Contract the calls must go to
    #[serde(with = "serde_hex::address")]
    pub target: Address,
    /// Rules that must all hold; empty means any call to `target`
    pub rules: Vec<ParameterRule>,
}

impl Permission {
    /// Create a permission
    pub fn new(target: Address, rules: Vec<ParameterRule>) -> Self {
        Self { target, rules }
    }

    /// See [`encode_permission`]
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(21 + self.rules.len() * RULE_SIZE);
        self.encode_into(&mut out)?;
        Ok(out)
    }

    fn encode_into(&self, out: &mut Vec<u8>) -> Result<()> {
        if self.rules.len() > MAX_RULES {
            return Err(Error::capacity(format!(
                "Too many rules: {} (max {})",
                self.rules.len(),
                MAX_RULES
            )));
        }
        out.extend_from_slice(self.target.as_slice());
        out.push(self.rules.len() as u8);
        for rule in &self.rules {
            rule.encode_into(out);
        }
        Ok(())
    }

    fn decode_from(reader: &mut ByteReader<'_>) -> Result<Self> {
        let target = reader.address()?;
        let count = reader.u8()? as usize;
        let rules = (0..count)
            .map(|_| ParameterRule::decode_from(reader))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { target, rules })
    }

    /// Check `call` against every rule, updating cumulative usage on success
    ///
    /// `usage` is left untouched when any rule fails.
    pub fn validate(&self, signer: &Address, call: &Call, usage: &mut PermissionUsage) -> bool {
        if call.to != self.target {
            return false;
        }
        let mut pending = Vec::new();
        for (index, rule) in self.rules.iter().enumerate() {
            let key = usage_key(signer, self, index);
            match rule.check(&call.data, usage.get(&key)) {
                Some(total) if rule.cumulative => pending.push((key, total)),
                Some(_) => {}
                None => return false,
            }
        }
        for (key, total) in pending {
            usage.set(key, total);
        }
        true
    }
}

/// Usage key for a cumulative rule: one per signer, permission and rule index
fn usage_key(signer: &Address, permission: &Permission, rule_index: usize) -> B256 {
    let mut encoded = Vec::new();
    // oversized permissions key on their partial encoding
    let _ = permission.encode_into(&mut encoded);
    keccak256_concat(&[
        signer.as_slice(),
        &encoded,
        &crate::types::word_u64(rule_index as u64),
    ])
}

fn value_usage_key(signer: &Address) -> B256 {
    keccak256_concat(&[signer.as_slice(), b"value"])
}

/// Running totals of cumulative rules and native value spent per session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionUsage {
    totals: HashMap<B256, U256>,
}

impl PermissionUsage {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Current total for a usage key
    pub fn get(&self, key: &B256) -> U256 {
        self.totals.get(key).copied().unwrap_or(U256::ZERO)
    }

    fn set(&mut self, key: B256, total: U256) {
        self.totals.insert(key, total);
    }

    /// Native value already spent by a session signer
    pub fn value_used(&self, signer: &Address) -> U256 {
        self.get(&value_usage_key(signer))
    }

    fn add_value(&mut self, signer: &Address, value: U256) {
        let key = value_usage_key(signer);
        let total = self.get(&key).saturating_add(value);
        self.set(key, total);
    }

    /// Number of tracked totals
    pub fn len(&self) -> usize {
        self.totals.len()
    }

    /// Check if nothing has been tracked yet
    pub fn is_empty(&self) -> bool {
        self.totals.is_empty()
    }
}

/// Permissions granted to one explicit session signer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPermissions {
    /// Session key
    #[serde(with = "serde_hex::address")]
    pub signer: Address,
    /// Chain the session is valid on (0 for any chain)
    #[serde(with = "serde_dec::u256")]
    pub chain_id: U256,
    /// Total native value the session may send
    #[serde(with = "serde_dec::u256")]
    pub value_limit: U256,
    /// Unix timestamp after which the session is expired
    #[serde(with = "serde_dec::u64")]
    pub deadline: u64,
    /// Call permissions, addressed by index in explicit signatures
    pub permissions: Vec<Permission>,
}

impl SessionPermissions {
    /// See [`encode_session_permissions`]
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.encode_into(&mut out)?;
        Ok(out)
    }

    pub(crate) fn encode_into(&self, out: &mut Vec<u8>) -> Result<()> {
        if self.permissions.len() > MAX_PERMISSIONS {
            return Err(Error::capacity(format!(
                "Too many permissions: {} (max {})",
                self.permissions.len(),
                MAX_PERMISSIONS
            )));
        }
        out.extend_from_slice(self.signer.as_slice());
        out.extend_from_slice(&self.chain_id.to_be_bytes::<32>());
        out.extend_from_slice(&self.value_limit.to_be_bytes::<32>());
        out.extend_from_slice(&self.deadline.to_be_bytes());
        out.push(self.permissions.len() as u8);
        for permission in &self.permissions {
            permission.encode_into(out)?;
        }
        Ok(())
    }

    pub(crate) fn decode_from(reader: &mut ByteReader<'_>) -> Result<Self> {
        let signer = reader.address()?;
        let chain_id = reader.u256()?;
        let value_limit = reader.u256()?;
        let deadline = reader.uint(8)?;
        let count = reader.u8()? as usize;
        if count == 0 {
            return Err(Error::NoPermissions);
        }
        if count > MAX_PERMISSIONS {
            return Err(Error::malformed(format!(
                "permission count {} exceeds {}",
                count, MAX_PERMISSIONS
            )));
        }
        let permissions = (0..count)
            .map(|_| Permission::decode_from(reader))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            signer,
            chain_id,
            value_limit,
            deadline,
            permissions,
        })
    }

    /// Check if the session is expired at `now`
    pub fn is_expired(&self, now: u64) -> bool {
        self.deadline < now
    }

    /// Index of the first permission authorizing `call`
    ///
    /// Enforces chain, deadline and the cumulative value limit. On success the
    /// usage ledger records the call's value and any cumulative rule totals.
    pub fn find_supported_permission(
        &self,
        call: &Call,
        chain_id: U256,
        now: u64,
        usage: &mut PermissionUsage,
    ) -> Option<usize> {
        if !self.chain_id.is_zero() && self.chain_id != chain_id {
            return None;
        }
        if self.is_expired(now) {
            return None;
        }
        if call.delegate_call {
            return None;
        }
        let spent = usage.value_used(&self.signer).saturating_add(call.value);
        if spent > self.value_limit {
            return None;
        }
        let index = self
            .permissions
            .iter()
            .position(|p| p.validate(&self.signer, call, usage))?;
        usage.add_value(&self.signer, call.value);
        Some(index)
    }
}

/// Encode a permission: `target(20) ‖ count(1) ‖ rules…`
pub fn encode_permission(permission: &Permission) -> Result<Vec<u8>> {
    permission.encode()
}

/// Encode session permissions:
/// `signer(20) ‖ chainId(32) ‖ valueLimit(32) ‖ deadline(8) ‖ count(1) ‖ permissions…`
pub fn encode_session_permissions(permissions: &SessionPermissions) -> Result<Vec<u8>> {
    permissions.encode()
}

/// Exact inverse of [`encode_session_permissions`]
pub fn decode_session_permissions(bytes: &[u8]) -> Result<SessionPermissions> {
    let mut reader = ByteReader::new(bytes);
    let decoded = SessionPermissions::decode_from(&mut reader)?;
    if !reader.is_empty() {
        return Err(Error::malformed(format!(
            "{} trailing bytes after session permissions",
            reader.remaining()
        )));
    }
    Ok(decoded)
}
