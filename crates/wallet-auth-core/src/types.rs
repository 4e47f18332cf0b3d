//! Core types for the wallet authorization core
//!
//! This module defines the small shared building blocks used by the
//! configuration tree and the session modules: keccak hashing, compact
//! ECDSA signatures, byte helpers for the wire formats and the serde adapters
//! that give the JSON interchange its lowercase-hex / decimal-string shape.

use crate::{Error, Result};
use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Compute Keccak256 hash of data
pub fn keccak256_hash(data: &[u8]) -> [u8; 32] {
    use tiny_keccak::{Hasher, Keccak};
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut hash = [0u8; 32];
    hasher.finalize(&mut hash);
    hash
}

/// Keccak256 over the concatenation of several byte slices
pub fn keccak256_concat(parts: &[&[u8]]) -> B256 {
    use tiny_keccak::{Hasher, Keccak};
    let mut hasher = Keccak::v256();
    for part in parts {
        hasher.update(part);
    }
    let mut hash = [0u8; 32];
    hasher.finalize(&mut hash);
    B256::from(hash)
}

/// Left-pad an unsigned integer to a 32-byte big-endian word
pub fn word_u64(value: u64) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Left-pad an address to a 32-byte word
pub fn word_address(address: &Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_slice());
    word
}

/// Minimum number of big-endian bytes needed to represent `value`
pub fn min_bytes_for(value: u64) -> usize {
    if value == 0 {
        return 0;
    }
    8 - (value.leading_zeros() as usize / 8)
}

/// Big-endian encoding of `value` in exactly `size` bytes
pub(crate) fn be_bytes(value: u64, size: usize) -> Vec<u8> {
    let full = value.to_be_bytes();
    if size >= 8 {
        let mut out = vec![0u8; size - 8];
        out.extend_from_slice(&full);
        out
    } else {
        full[8 - size..].to_vec()
    }
}

/// Format an address as `0x`-prefixed lowercase hex
pub fn address_hex(address: &Address) -> String {
    format!("0x{}", hex::encode(address.as_slice()))
}

/// Parse a `0x`-prefixed (or bare) 20-byte hex address
pub fn parse_address(s: &str) -> Result<Address> {
    let raw = decode_hex(s)?;
    if raw.len() != 20 {
        return Err(Error::malformed(format!(
            "address must be 20 bytes, got {}",
            raw.len()
        )));
    }
    Ok(Address::from_slice(&raw))
}

/// Parse a `0x`-prefixed (or bare) 32-byte hex word
pub fn parse_b256(s: &str) -> Result<B256> {
    let raw = decode_hex(s)?;
    if raw.len() != 32 {
        return Err(Error::malformed(format!(
            "expected 32 bytes, got {}",
            raw.len()
        )));
    }
    Ok(B256::from_slice(&raw))
}

/// Decode hex text with an optional `0x` prefix
pub fn decode_hex(s: &str) -> Result<Vec<u8>> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    Ok(hex::decode(s)?)
}

/// Sequential reader over a byte slice used by the binary decoders
#[derive(Debug)]
pub(crate) struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::malformed(format!(
                "unexpected end of input: needed {} bytes at offset {}, {} left",
                n,
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Read a big-endian unsigned integer of `n` bytes (n <= 8)
    pub(crate) fn uint(&mut self, n: usize) -> Result<u64> {
        if n > 8 {
            return Err(Error::malformed(format!("{}-byte integer does not fit in 64 bits", n)));
        }
        let bytes = self.take(n)?;
        Ok(bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64))
    }

    pub(crate) fn address(&mut self) -> Result<Address> {
        Ok(Address::from_slice(self.take(20)?))
    }

    pub(crate) fn b256(&mut self) -> Result<B256> {
        Ok(B256::from_slice(self.take(32)?))
    }

    pub(crate) fn u256(&mut self) -> Result<U256> {
        Ok(U256::from_be_slice(self.take(32)?))
    }
}

/// ECDSA signature in `(r, s, yParity)` form
///
/// Packs to 64 bytes using EIP-2098: the parity bit is stored in the highest
/// bit of `s`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RsySignature {
    /// R component
    #[serde(with = "serde_hex::b256")]
    pub r: B256,
    /// S component (low-s)
    #[serde(with = "serde_hex::b256")]
    pub s: B256,
    /// Parity of the recovered point's y coordinate
    pub y_parity: bool,
}

impl RsySignature {
    /// Create a new signature
    pub fn new(r: B256, s: B256, y_parity: bool) -> Self {
        Self { r, s, y_parity }
    }

    /// Parse a 65-byte `r ‖ s ‖ v` signature (v in {0, 1, 27, 28})
    pub fn from_rsv(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 65 {
            return Err(Error::InvalidSignature(format!(
                "expected 65 bytes, got {}",
                bytes.len()
            )));
        }
        let y_parity = match bytes[64] {
            0 | 27 => false,
            1 | 28 => true,
            v => return Err(Error::InvalidSignature(format!("invalid v value {}", v))),
        };
        Ok(Self {
            r: B256::from_slice(&bytes[..32]),
            s: B256::from_slice(&bytes[32..64]),
            y_parity,
        })
    }

    /// EIP-2098 compact encoding (`r ‖ yParityAndS`)
    pub fn pack(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(self.r.as_slice());
        out[32..].copy_from_slice(self.s.as_slice());
        if self.y_parity {
            out[32] |= 0x80;
        }
        out
    }

    /// Inverse of [`RsySignature::pack`]
    pub fn unpack(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 64 {
            return Err(Error::InvalidSignature(format!(
                "compact signature must be 64 bytes, got {}",
                bytes.len()
            )));
        }
        let mut s = [0u8; 32];
        s.copy_from_slice(&bytes[32..]);
        let y_parity = s[0] & 0x80 != 0;
        s[0] &= 0x7f;
        Ok(Self {
            r: B256::from_slice(&bytes[..32]),
            s: B256::from(s),
            y_parity,
        })
    }

    /// Get v value for legacy Ethereum signatures
    pub fn v(&self) -> u8 {
        self.y_parity as u8 + 27
    }
}

impl fmt::Display for RsySignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.pack()))
    }
}

/// Serde adapters for the JSON interchange format
pub mod serde_hex {
    /// `0x`-prefixed lowercase address
    pub mod address {
        use alloy_primitives::Address;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(a: &Address, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.serialize_str(&crate::types::address_hex(a))
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Address, D::Error> {
            let s = String::deserialize(deserializer)?;
            crate::types::parse_address(&s).map_err(serde::de::Error::custom)
        }
    }

    /// Optional address, `null` when absent
    pub mod opt_address {
        use alloy_primitives::Address;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            a: &Option<Address>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match a {
                Some(a) => serializer.serialize_str(&crate::types::address_hex(a)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Address>, D::Error> {
            let s = Option::<String>::deserialize(deserializer)?;
            s.map(|s| crate::types::parse_address(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }

    /// List of addresses
    pub mod address_vec {
        use alloy_primitives::Address;
        use serde::{Deserialize, Deserializer, Serializer, ser::SerializeSeq};

        pub fn serialize<S: Serializer>(v: &[Address], serializer: S) -> Result<S::Ok, S::Error> {
            let mut seq = serializer.serialize_seq(Some(v.len()))?;
            for a in v {
                seq.serialize_element(&crate::types::address_hex(a))?;
            }
            seq.end()
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Vec<Address>, D::Error> {
            Vec::<String>::deserialize(deserializer)?
                .iter()
                .map(|s| crate::types::parse_address(s).map_err(serde::de::Error::custom))
                .collect()
        }
    }

    /// 32-byte word
    pub mod b256 {
        use alloy_primitives::B256;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(b: &B256, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.serialize_str(&format!("0x{}", hex::encode(b.as_slice())))
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<B256, D::Error> {
            let s = String::deserialize(deserializer)?;
            crate::types::parse_b256(&s).map_err(serde::de::Error::custom)
        }
    }

    /// Arbitrary byte string
    pub mod bytes {
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
            serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
            let s = String::deserialize(deserializer)?;
            crate::types::decode_hex(&s).map_err(serde::de::Error::custom)
        }
    }
}

/// Decimal-string adapters for integers that may exceed 53 bits
pub mod serde_dec {
    use serde::Deserialize;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrStr {
        Num(u64),
        Str(String),
    }

    /// `u64` as a decimal string; numbers are accepted on input
    pub mod u64 {
        use super::NumOrStr;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(v: &u64, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.serialize_str(&v.to_string())
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
            match NumOrStr::deserialize(deserializer)? {
                NumOrStr::Num(n) => Ok(n),
                NumOrStr::Str(s) => s.parse().map_err(serde::de::Error::custom),
            }
        }
    }

    /// `U256` as a decimal string; numbers are accepted on input
    pub mod u256 {
        use super::NumOrStr;
        use alloy_primitives::U256;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(v: &U256, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.serialize_str(&v.to_string())
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
            match NumOrStr::deserialize(deserializer)? {
                NumOrStr::Num(n) => Ok(U256::from(n)),
                NumOrStr::Str(s) => U256::from_str_radix(&s, 10).map_err(serde::de::Error::custom),
            }
        }
    }
}
