//! Session signing orchestration
//!
//! [`SessionSigner`] picks, for every call of a batch, a session allowed to
//! authorize it, collects the session signatures through the injected
//! [`Signer`]s and encodes the result with the call signature codec.
//!
//! ## Selection
//!
//! 1. Explicit sessions are tried first, in registration order. A session
//!    supports a call when one of its permissions validates against it; the
//!    cumulative usage of earlier calls in the batch is taken into account.
//! 2. Implicit sessions are tried next. They never send value or delegate
//!    call, and neither the session key nor the target may be blacklisted.

use super::attestation::Attestation;
use super::call::Call;
use super::permission::PermissionUsage;
use super::signature::{SessionCallSignature, encode_session_call_signatures};
use super::topology::SessionsTopology;
use crate::signer::{Signer, recover_address};
use crate::types::{RsySignature, address_hex, serde_dec, serde_hex};
use crate::{Error, Result};
use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Replay-protection context of a signed batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSignerConfig {
    /// Wallet the calls are executed from
    #[serde(with = "serde_hex::address")]
    pub wallet: Address,
    /// Chain the batch is valid on
    #[serde(with = "serde_dec::u256")]
    pub chain_id: U256,
    /// Nonce space
    #[serde(with = "serde_dec::u256")]
    pub space: U256,
    /// Nonce within the space
    #[serde(with = "serde_dec::u256")]
    pub nonce: U256,
    /// Timestamp used for deadline checks; the system clock when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub now: Option<u64>,
}

impl SessionSignerConfig {
    /// Create a config for `wallet` on `chain_id`, nonce 0 in space 0
    pub fn new(wallet: Address, chain_id: U256) -> Self {
        Self {
            wallet,
            chain_id,
            space: U256::ZERO,
            nonce: U256::ZERO,
            now: None,
        }
    }

    /// Set the nonce space
    pub fn with_space(mut self, space: U256) -> Self {
        self.space = space;
        self
    }

    /// Set the nonce
    pub fn with_nonce(mut self, nonce: U256) -> Self {
        self.nonce = nonce;
        self
    }

    /// Pin the timestamp used for deadline checks
    pub fn with_now(mut self, now: u64) -> Self {
        self.now = Some(now);
        self
    }

    fn timestamp(&self) -> u64 {
        self.now
            .unwrap_or_else(|| u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0))
    }
}

/// Session key with explicit permissions in the topology
#[derive(Clone)]
pub struct ExplicitSession {
    signer: Arc<dyn Signer>,
}

impl ExplicitSession {
    /// Wrap a session key
    pub fn new(signer: Arc<dyn Signer>) -> Self {
        Self { signer }
    }

    /// Session key address
    pub fn address(&self) -> Address {
        self.signer.address()
    }
}

/// Session key approved by an identity signer's attestation
#[derive(Clone)]
pub struct ImplicitSession {
    signer: Arc<dyn Signer>,
    attestation: Attestation,
    identity_signature: RsySignature,
    identity_signer: Address,
}

impl ImplicitSession {
    /// Wrap a session key with its attestation
    ///
    /// The attestation must approve the key, and the identity signer is
    /// recovered from `identity_signature`.
    pub fn new(
        signer: Arc<dyn Signer>,
        attestation: Attestation,
        identity_signature: RsySignature,
    ) -> Result<Self> {
        if attestation.approved_signer != signer.address() {
            return Err(Error::Signer(format!(
                "attestation approves {}, not {}",
                address_hex(&attestation.approved_signer),
                address_hex(&signer.address())
            )));
        }
        let identity_signer = recover_address(&attestation.hash()?, &identity_signature)?;
        Ok(Self {
            signer,
            attestation,
            identity_signature,
            identity_signer,
        })
    }

    /// Session key address
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Identity signer that issued the attestation
    pub fn identity_signer(&self) -> Address {
        self.identity_signer
    }

    /// Attestation backing the session
    pub fn attestation(&self) -> &Attestation {
        &self.attestation
    }

    /// Reason the session cannot sign `call`, if any
    pub fn rejection(&self, call: &Call, blacklist: &[Address]) -> Option<&'static str> {
        if call.delegate_call {
            Some("implicit sessions cannot delegate call")
        } else if !call.value.is_zero() {
            Some("implicit sessions cannot send value")
        } else if blacklist.contains(&self.address()) {
            Some("session signer is blacklisted")
        } else if blacklist.contains(&call.to) {
            Some("call target is blacklisted")
        } else {
            None
        }
    }
}

/// Signs call batches with the sessions of one topology
pub struct SessionSigner {
    topology: SessionsTopology,
    config: SessionSignerConfig,
    explicit: Vec<ExplicitSession>,
    implicit: Vec<ImplicitSession>,
}

impl SessionSigner {
    /// Create a signer over a complete topology
    pub fn new(topology: SessionsTopology, config: SessionSignerConfig) -> Result<Self> {
        if !topology.is_complete() {
            return Err(Error::IncompleteTopology);
        }
        Ok(Self {
            topology,
            config,
            explicit: Vec::new(),
            implicit: Vec::new(),
        })
    }

    /// Register an explicit session key; its permissions must be in the topology
    pub fn with_explicit_session(mut self, session: ExplicitSession) -> Result<Self> {
        if self.topology.session_permissions(&session.address()).is_none() {
            return Err(Error::Signer(format!(
                "no explicit session for {}",
                address_hex(&session.address())
            )));
        }
        self.explicit.push(session);
        Ok(self)
    }

    /// Register an implicit session; its identity signer must be in the topology
    pub fn with_implicit_session(mut self, session: ImplicitSession) -> Result<Self> {
        if !self
            .topology
            .identity_signers()
            .contains(&session.identity_signer())
        {
            return Err(Error::Signer(format!(
                "identity signer {} is not part of the topology",
                address_hex(&session.identity_signer())
            )));
        }
        self.implicit.push(session);
        Ok(self)
    }

    /// Topology the signer works on
    pub fn topology(&self) -> &SessionsTopology {
        &self.topology
    }

    /// Sign every call and encode the session signature payload
    #[instrument(skip_all, fields(wallet = %address_hex(&self.config.wallet), calls = calls.len()))]
    pub async fn sign_calls(&self, calls: &[Call]) -> Result<Vec<u8>> {
        let now = self.config.timestamp();
        let blacklist = self.topology.implicit_blacklist().unwrap_or(&[]);
        let mut usage = PermissionUsage::new();
        let mut signatures = Vec::with_capacity(calls.len());
        let mut explicit_used: Vec<Address> = Vec::new();
        let mut implicit_used: Vec<Address> = Vec::new();
        let mut identity_signer: Option<Address> = None;

        info!(now, "Signing session calls");

        for (index, call) in calls.iter().enumerate() {
            let digest = call.hash_with_replay_protection(
                self.config.chain_id,
                self.config.space,
                self.config.nonce,
                index,
            );

            let explicit = self.explicit.iter().find_map(|session| {
                let permissions = self.topology.session_permissions(&session.address())?;
                permissions
                    .find_supported_permission(call, self.config.chain_id, now, &mut usage)
                    .map(|permission_index| (session, permission_index))
            });

            if let Some((session, permission_index)) = explicit {
                debug!(
                    index,
                    signer = %address_hex(&session.address()),
                    permission_index,
                    "Call authorized by explicit session"
                );
                let session_signature = session
                    .signer
                    .sign(self.config.wallet, self.config.chain_id, digest)
                    .await?;
                if !explicit_used.contains(&session.address()) {
                    explicit_used.push(session.address());
                }
                signatures.push(SessionCallSignature::Explicit {
                    permission_index,
                    session_signature,
                });
                continue;
            }

            let mut reasons = Vec::new();
            let implicit = self.implicit.iter().find(|session| {
                match session.rejection(call, blacklist) {
                    Some(reason) => {
                        reasons.push(reason);
                        false
                    }
                    None => true,
                }
            });

            let Some(session) = implicit else {
                let reason = if reasons.is_empty() {
                    "no session permission matches".to_string()
                } else {
                    reasons.join(", ")
                };
                warn!(index, to = %address_hex(&call.to), reason = %reason, "Unsupported call");
                return Err(Error::UnsupportedCall { index, reason });
            };

            match identity_signer {
                Some(existing) if existing != session.identity_signer() => {
                    return Err(Error::Signer(
                        "implicit sessions in one batch must share an identity signer".into(),
                    ));
                }
                _ => identity_signer = Some(session.identity_signer()),
            }

            debug!(
                index,
                signer = %address_hex(&session.address()),
                "Call authorized by implicit session"
            );
            let session_signature = session
                .signer
                .sign(self.config.wallet, self.config.chain_id, digest)
                .await?;
            if !implicit_used.contains(&session.address()) {
                implicit_used.push(session.address());
            }
            signatures.push(SessionCallSignature::Implicit {
                attestation: session.attestation.clone(),
                identity_signature: session.identity_signature,
                session_signature,
            });
        }

        let encoded = encode_session_call_signatures(
            &signatures,
            &self.topology,
            &explicit_used,
            &implicit_used,
            identity_signer.as_ref(),
        )?;

        info!(
            explicit = explicit_used.len(),
            implicit = implicit_used.len(),
            bytes = encoded.len(),
            "Session calls signed"
        );

        Ok(encoded)
    }
}
