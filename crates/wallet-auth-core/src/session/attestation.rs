//! Attestations backing implicit sessions
//!
//! An identity signer approves a session key for an audience by signing the
//! hash of an [`Attestation`]. Target contracts accept implicit calls by
//! returning [`Attestation::implicit_request_magic`].

use crate::types::{ByteReader, be_bytes, keccak256_concat, keccak256_hash, serde_dec, serde_hex};
use crate::{Error, Result};
use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};

/// Largest value a 3-byte length prefix can hold
pub const MAX_LENGTH_3: usize = 0xff_ffff;

/// Authentication context of an attestation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthData {
    pub redirect_url: String,
    #[serde(with = "serde_dec::u64")]
    pub issued_at: u64,
}

/// Identity signer's approval of a session key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attestation {
    /// Session key being approved
    #[serde(with = "serde_hex::address")]
    pub approved_signer: Address,
    #[serde(with = "identity_type_hex")]
    pub identity_type: [u8; 4],
    #[serde(with = "serde_hex::b256")]
    pub issuer_hash: B256,
    #[serde(with = "serde_hex::b256")]
    pub audience_hash: B256,
    #[serde(with = "serde_hex::bytes")]
    pub application_data: Vec<u8>,
    pub auth_data: AuthData,
}

impl Attestation {
    /// Packed encoding:
    /// `approvedSigner(20) ‖ identityType(4) ‖ issuerHash(32) ‖ audienceHash(32) ‖
    /// appDataLen(3) ‖ appData ‖ redirectUrlLen(3) ‖ redirectUrl ‖ issuedAt(8)`
    pub fn encode(&self) -> Result<Vec<u8>> {
        let redirect = self.auth_data.redirect_url.as_bytes();
        for (what, len) in [
            ("application data", self.application_data.len()),
            ("redirect url", redirect.len()),
        ] {
            if len > MAX_LENGTH_3 {
                return Err(Error::capacity(format!("Attestation {} is too large", what)));
            }
        }
        let mut out =
            Vec::with_capacity(98 + self.application_data.len() + redirect.len());
        out.extend_from_slice(self.approved_signer.as_slice());
        out.extend_from_slice(&self.identity_type);
        out.extend_from_slice(self.issuer_hash.as_slice());
        out.extend_from_slice(self.audience_hash.as_slice());
        out.extend_from_slice(&be_bytes(self.application_data.len() as u64, 3));
        out.extend_from_slice(&self.application_data);
        out.extend_from_slice(&be_bytes(redirect.len() as u64, 3));
        out.extend_from_slice(redirect);
        out.extend_from_slice(&self.auth_data.issued_at.to_be_bytes());
        Ok(out)
    }

    /// Decode an attestation with no trailing bytes
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(bytes);
        let attestation = Self::decode_from(&mut reader)?;
        if !reader.is_empty() {
            return Err(Error::malformed("trailing bytes after attestation"));
        }
        Ok(attestation)
    }

    pub(crate) fn decode_from(reader: &mut ByteReader<'_>) -> Result<Self> {
        let approved_signer = reader.address()?;
        let mut identity_type = [0u8; 4];
        identity_type.copy_from_slice(reader.take(4)?);
        let issuer_hash = reader.b256()?;
        let audience_hash = reader.b256()?;
        let app_len = reader.uint(3)? as usize;
        let application_data = reader.take(app_len)?.to_vec();
        let url_len = reader.uint(3)? as usize;
        let redirect_url = String::from_utf8(reader.take(url_len)?.to_vec())
            .map_err(|e| Error::malformed(format!("redirect url is not utf-8: {}", e)))?;
        let issued_at = reader.uint(8)?;
        Ok(Self {
            approved_signer,
            identity_type,
            issuer_hash,
            audience_hash,
            application_data,
            auth_data: AuthData {
                redirect_url,
                issued_at,
            },
        })
    }

    /// Digest signed by the identity signer
    pub fn hash(&self) -> Result<B256> {
        Ok(B256::from(keccak256_hash(&self.encode()?)))
    }

    /// Value a target returns from `acceptImplicitRequest` to accept calls
    /// from `wallet` under this attestation
    pub fn implicit_request_magic(&self, wallet: &Address) -> B256 {
        let prefix = keccak256_hash(b"acceptImplicitRequest");
        keccak256_concat(&[
            &prefix,
            wallet.as_slice(),
            self.audience_hash.as_slice(),
            self.issuer_hash.as_slice(),
        ])
    }
}

mod identity_type_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &[u8; 4], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(v)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 4], D::Error> {
        let s = String::deserialize(deserializer)?;
        let raw = crate::types::decode_hex(&s).map_err(serde::de::Error::custom)?;
        raw.as_slice()
            .try_into()
            .map_err(|_| serde::de::Error::custom("identity type must be 4 bytes"))
    }
}
