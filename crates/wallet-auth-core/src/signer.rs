//! Signer and provider interfaces
//!
//! The authorization core never talks to keys or to the chain directly.
//! Session keys, identity signers and sapient signers are injected through
//! the traits in this module; [`LocalSigner`] is an in-process secp256k1
//! implementation for session keys held by the application.
//!
//! ## Example
//!
//! ```rust,ignore
//! use wallet_auth_core::signer::{LocalSigner, Signer};
//!
//! let key = LocalSigner::random();
//! let signature = key.sign(wallet, chain_id, digest).await?;
//! assert_eq!(recover_address(&digest, &signature)?, key.address());
//! ```

use crate::types::{RsySignature, address_hex, decode_hex, keccak256_hash};
use crate::{Error, Result};
use alloy_primitives::{Address, B256, Bytes, U256};
use alloy_sol_types::{SolCall, sol};
use async_trait::async_trait;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde_json::json;
use tracing::{debug, instrument};

sol! {
    /// Compact recovery entry point of sapient signers
    interface ISapientCompact {
        function recoverSapientSignatureCompact(bytes32 digest, bytes signature)
            external
            view
            returns (bytes32 imageHash);
    }
}

/// Signer producing ECDSA signatures over wallet digests
#[async_trait]
pub trait Signer: Send + Sync {
    /// Address of the signing key
    fn address(&self) -> Address;

    /// Sign `digest` on behalf of `wallet` on `chain_id`
    async fn sign(&self, wallet: Address, chain_id: U256, digest: B256) -> Result<RsySignature>;
}

/// Contract signer that validates signatures by recovering an image hash
#[async_trait]
pub trait SapientSigner: Send + Sync {
    /// Address of the signer contract
    fn address(&self) -> Address;

    /// Image hash the signer recovers for valid signatures
    fn image_hash(&self) -> B256;

    /// Produce the signer-specific signature bytes
    async fn sign_sapient(&self, wallet: Address, chain_id: U256, digest: B256)
    -> Result<Vec<u8>>;
}

/// JSON-RPC transport
#[async_trait]
pub trait Provider: Send + Sync {
    /// Perform a JSON-RPC request and return its `result`
    async fn request(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value>;
}

/// Secp256k1 key held in process
#[derive(Clone)]
pub struct LocalSigner {
    key: SigningKey,
    address: Address,
}

impl std::fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSigner")
            .field("address", &address_hex(&self.address))
            .finish_non_exhaustive()
    }
}

impl LocalSigner {
    /// Generate a fresh random key
    pub fn random() -> Self {
        Self::from_key(SigningKey::random(&mut OsRng))
    }

    /// Load a key from its 32-byte secret scalar
    pub fn from_bytes(secret: &[u8]) -> Result<Self> {
        let key = SigningKey::from_slice(secret)
            .map_err(|e| Error::Signer(format!("invalid secret key: {}", e)))?;
        Ok(Self::from_key(key))
    }

    fn from_key(key: SigningKey) -> Self {
        let address = verifying_key_address(key.verifying_key());
        Self { key, address }
    }

    /// Sign a prehashed digest
    pub fn sign_digest(&self, digest: &B256) -> Result<RsySignature> {
        let (signature, recid) = self
            .key
            .sign_prehash_recoverable(digest.as_slice())
            .map_err(|e| Error::Signer(e.to_string()))?;
        let bytes = signature.to_bytes();
        Ok(RsySignature::new(
            B256::from_slice(&bytes[..32]),
            B256::from_slice(&bytes[32..]),
            recid.is_y_odd(),
        ))
    }
}

#[async_trait]
impl Signer for LocalSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign(&self, _wallet: Address, _chain_id: U256, digest: B256) -> Result<RsySignature> {
        self.sign_digest(&digest)
    }
}

/// Ethereum address of a public key: last 20 bytes of `keccak(x ‖ y)`
fn verifying_key_address(key: &VerifyingKey) -> Address {
    let encoded = key.to_encoded_point(false);
    let hash = keccak256_hash(&encoded.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

/// Recover the address that signed `digest`
pub fn recover_address(digest: &B256, signature: &RsySignature) -> Result<Address> {
    let sig = Signature::from_scalars(
        *k256::FieldBytes::from_slice(signature.r.as_slice()),
        *k256::FieldBytes::from_slice(signature.s.as_slice()),
    )
    .map_err(|e| Error::InvalidSignature(e.to_string()))?;
    let recid = RecoveryId::new(signature.y_parity, false);
    let key = VerifyingKey::recover_from_prehash(digest.as_slice(), &sig, recid)
        .map_err(|e| Error::InvalidSignature(e.to_string()))?;
    Ok(verifying_key_address(&key))
}

/// Ask a sapient signer contract which image hash `signature` recovers to
///
/// Issues an `eth_call` to `recoverSapientSignatureCompact(bytes32,bytes)`
/// through the injected provider.
#[instrument(skip_all, fields(sapient = %address_hex(sapient), digest = %digest))]
pub async fn recover_sapient_image_hash(
    provider: &dyn Provider,
    sapient: &Address,
    digest: B256,
    signature: &[u8],
) -> Result<B256> {
    let call = ISapientCompact::recoverSapientSignatureCompactCall {
        digest,
        signature: Bytes::copy_from_slice(signature),
    };
    let params = json!([
        {
            "to": address_hex(sapient),
            "data": format!("0x{}", hex::encode(call.abi_encode())),
        },
        "latest"
    ]);
    let result = provider.request("eth_call", params).await?;
    let text = result
        .as_str()
        .ok_or_else(|| Error::Provider(format!("unexpected eth_call result: {}", result)))?;
    let returned = decode_hex(text)?;
    let decoded =
        ISapientCompact::recoverSapientSignatureCompactCall::abi_decode_returns(&returned, true)
            .map_err(|e| Error::Provider(format!("invalid return data: {}", e)))?;
    debug!(image_hash = %decoded.imageHash, "Recovered sapient image hash");
    Ok(decoded.imageHash)
}

/// Check that `signature` recovers to the image hash a sapient leaf commits to
pub async fn verify_sapient_signature(
    provider: &dyn Provider,
    sapient: &Address,
    expected_image_hash: B256,
    digest: B256,
    signature: &[u8],
) -> Result<bool> {
    let recovered = recover_sapient_image_hash(provider, sapient, digest, signature).await?;
    Ok(recovered == expected_image_hash)
}
