//! Wallet calls and their signing digests

use crate::types::{keccak256_concat, keccak256_hash, serde_dec, serde_hex, word_address, word_u64};
use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

/// EIP-712 type string of [`Call`]
pub const CALL_TYPE: &str = "Call(address to,uint256 value,bytes data,uint256 gasLimit,bool delegateCall,bool onlyFallback,uint256 behaviorOnError)";

/// What the wallet does when a call reverts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum BehaviorOnError {
    /// Continue with the next call
    #[default]
    Ignore = 0,
    /// Revert the whole batch
    Revert = 1,
    /// Stop executing without reverting
    Abort = 2,
}

/// A single call executed by the wallet
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Call {
    #[serde(with = "serde_hex::address")]
    pub to: Address,
    #[serde(with = "serde_dec::u256")]
    pub value: U256,
    #[serde(with = "serde_hex::bytes")]
    pub data: Vec<u8>,
    #[serde(with = "serde_dec::u256")]
    pub gas_limit: U256,
    pub delegate_call: bool,
    pub only_fallback: bool,
    pub behavior_on_error: BehaviorOnError,
}

impl Call {
    /// Create a plain call with no gas limit and default flags
    pub fn new(to: Address, value: U256, data: Vec<u8>) -> Self {
        Self {
            to,
            value,
            data,
            gas_limit: U256::ZERO,
            delegate_call: false,
            only_fallback: false,
            behavior_on_error: BehaviorOnError::Ignore,
        }
    }

    /// Set the gas limit
    pub fn with_gas_limit(mut self, gas_limit: U256) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    /// Execute as a delegate call
    pub fn with_delegate_call(mut self, delegate_call: bool) -> Self {
        self.delegate_call = delegate_call;
        self
    }

    /// Set the revert behavior
    pub fn with_behavior_on_error(mut self, behavior: BehaviorOnError) -> Self {
        self.behavior_on_error = behavior;
        self
    }

    /// Call selector, if the data carries one
    pub fn selector(&self) -> Option<[u8; 4]> {
        self.data.get(..4).and_then(|s| s.try_into().ok())
    }

    /// EIP-712 struct hash of the call
    pub fn hash(&self) -> B256 {
        let type_hash = keccak256_hash(CALL_TYPE.as_bytes());
        let data_hash = keccak256_hash(&self.data);
        keccak256_concat(&[
            &type_hash,
            &word_address(&self.to),
            &self.value.to_be_bytes::<32>(),
            &data_hash,
            &self.gas_limit.to_be_bytes::<32>(),
            &word_u64(self.delegate_call as u64),
            &word_u64(self.only_fallback as u64),
            &word_u64(self.behavior_on_error as u64),
        ])
    }

    /// Digest a session key signs for the call at `index` of a batch
    ///
    /// Binds the call hash to the chain, nonce space, nonce and position so a
    /// session signature cannot be replayed elsewhere.
    pub fn hash_with_replay_protection(
        &self,
        chain_id: U256,
        space: U256,
        nonce: U256,
        index: usize,
    ) -> B256 {
        keccak256_concat(&[
            &chain_id.to_be_bytes::<32>(),
            &space.to_be_bytes::<32>(),
            &nonce.to_be_bytes::<32>(),
            &word_u64(index as u64),
            self.hash().as_slice(),
        ])
    }
}
