//! Session call signature codec
//!
//! Serializes the per-call signatures of a batch together with the minimal
//! session topology the verifier needs:
//!
//! ```text
//! topologyLength(3) ‖ topology
//! attestationCount(1) ‖ [attestation ‖ identitySignature(64)]…
//! per call: (0x80 | attestationIndex) ‖ sessionSignature(64)   implicit
//!           permissionIndex ‖ sessionSignature(64)             explicit
//! ```

use super::attestation::{Attestation, MAX_LENGTH_3};
use super::topology::{SessionsTopology, minimise_sessions_topology};
use crate::types::{ByteReader, RsySignature, be_bytes};
use crate::{Error, Result};
use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

/// Highest bit of a call entry marks an implicit signature
pub const IMPLICIT_FLAG: u8 = 0x80;

/// Permission indexes must stay below the implicit flag range
pub const MAX_PERMISSION_INDEX: usize = 126;

/// Attestation table indexes share the low seven bits
pub const MAX_ATTESTATIONS: usize = 127;

/// Signature of one call in a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SessionCallSignature {
    /// Signed by a session key approved through an attestation
    #[serde(rename_all = "camelCase")]
    Implicit {
        attestation: Attestation,
        identity_signature: RsySignature,
        session_signature: RsySignature,
    },
    /// Signed by an explicit session key under one of its permissions
    #[serde(rename_all = "camelCase")]
    Explicit {
        permission_index: usize,
        session_signature: RsySignature,
    },
}

impl SessionCallSignature {
    /// Signature produced by the session key
    pub fn session_signature(&self) -> &RsySignature {
        match self {
            SessionCallSignature::Implicit {
                session_signature, ..
            }
            | SessionCallSignature::Explicit {
                session_signature, ..
            } => session_signature,
        }
    }
}

/// Encode the signatures of a batch of calls
///
/// The topology is minimised to `explicit_signers`, `implicit_signers` and
/// `identity_signer` before encoding. Attestations are deduplicated in
/// first-seen order.
pub fn encode_session_call_signatures(
    call_signatures: &[SessionCallSignature],
    topology: &SessionsTopology,
    explicit_signers: &[Address],
    implicit_signers: &[Address],
    identity_signer: Option<&Address>,
) -> Result<Vec<u8>> {
    if !topology.is_complete() {
        return Err(Error::IncompleteTopology);
    }
    let minimised =
        minimise_sessions_topology(topology, explicit_signers, implicit_signers, identity_signer)?;
    let encoded_topology = minimised.encode()?;
    if encoded_topology.len() > MAX_LENGTH_3 {
        return Err(Error::capacity("Session topology is too large"));
    }

    let mut out = Vec::new();
    out.extend_from_slice(&be_bytes(encoded_topology.len() as u64, 3));
    out.extend_from_slice(&encoded_topology);

    // attestation table, keyed by encoding
    let mut table: Vec<Vec<u8>> = Vec::new();
    let mut table_bytes = Vec::new();
    let mut entries = Vec::with_capacity(call_signatures.len());
    for signature in call_signatures {
        match signature {
            SessionCallSignature::Implicit {
                attestation,
                identity_signature,
                session_signature,
            } => {
                let encoded = attestation.encode()?;
                let index = match table.iter().position(|a| *a == encoded) {
                    Some(index) => index,
                    None => {
                        if table.len() >= MAX_ATTESTATIONS {
                            return Err(Error::capacity("Too many attestations"));
                        }
                        table_bytes.extend_from_slice(&encoded);
                        table_bytes.extend_from_slice(&identity_signature.pack());
                        table.push(encoded);
                        table.len() - 1
                    }
                };
                entries.push(IMPLICIT_FLAG | index as u8);
                entries.extend_from_slice(&session_signature.pack());
            }
            SessionCallSignature::Explicit {
                permission_index,
                session_signature,
            } => {
                if *permission_index > MAX_PERMISSION_INDEX {
                    return Err(Error::PermissionIndexTooLarge);
                }
                entries.push(*permission_index as u8);
                entries.extend_from_slice(&session_signature.pack());
            }
        }
    }

    out.push(table.len() as u8);
    out.extend_from_slice(&table_bytes);
    out.extend_from_slice(&entries);
    Ok(out)
}

/// Decoded form of [`encode_session_call_signatures`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedSessionSignatures {
    /// Minimised topology carried by the signature
    pub topology: SessionsTopology,
    /// One signature per call, in call order
    pub call_signatures: Vec<SessionCallSignature>,
}

/// Decode a session signature payload
pub fn decode_session_call_signatures(bytes: &[u8]) -> Result<DecodedSessionSignatures> {
    let mut reader = ByteReader::new(bytes);
    let topology_len = reader.uint(3)? as usize;
    let topology = SessionsTopology::decode(reader.take(topology_len)?)?;

    let count = reader.u8()? as usize;
    if count > MAX_ATTESTATIONS {
        return Err(Error::malformed(format!("attestation count {} out of range", count)));
    }
    let mut table = Vec::with_capacity(count);
    for _ in 0..count {
        let attestation = Attestation::decode_from(&mut reader)?;
        let identity_signature = RsySignature::unpack(reader.take(64)?)?;
        table.push((attestation, identity_signature));
    }

    let mut call_signatures = Vec::new();
    while !reader.is_empty() {
        let flag = reader.u8()?;
        let session_signature = RsySignature::unpack(reader.take(64)?)?;
        if flag & IMPLICIT_FLAG != 0 {
            let index = (flag & !IMPLICIT_FLAG) as usize;
            let (attestation, identity_signature) = table
                .get(index)
                .cloned()
                .ok_or_else(|| Error::malformed(format!("unknown attestation index {}", index)))?;
            call_signatures.push(SessionCallSignature::Implicit {
                attestation,
                identity_signature,
                session_signature,
            });
        } else {
            let permission_index = flag as usize;
            if permission_index > MAX_PERMISSION_INDEX {
                return Err(Error::PermissionIndexTooLarge);
            }
            call_signatures.push(SessionCallSignature::Explicit {
                permission_index,
                session_signature,
            });
        }
    }

    Ok(DecodedSessionSignatures {
        topology,
        call_signatures,
    })
}
