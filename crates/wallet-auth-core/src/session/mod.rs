//! Session-scoped call permissions
//!
//! Sessions let short-lived keys sign calls for a wallet without touching its
//! main signer configuration:
//!
//! - **Explicit sessions** carry [`SessionPermissions`]: per-target rules over
//!   raw call data, a value limit and a deadline.
//! - **Implicit sessions** are approved off-chain by an identity signer's
//!   [`Attestation`] and restricted by a shared blacklist.
//!
//! Everything lives in one [`SessionsTopology`] whose root hash the wallet
//! configuration commits to. Signatures ship a minimised copy of that tree
//! together with one entry per call.

pub mod attestation;
pub mod builder;
pub mod call;
pub mod manager;
pub mod permission;
pub mod signature;
pub mod topology;

pub use attestation::{Attestation, AuthData};
pub use builder::{
    Erc20PermissionBuilder, Erc721PermissionBuilder, Erc1155PermissionBuilder, ParamRef,
    PermissionBuilder,
};
pub use call::{BehaviorOnError, Call};
pub use manager::{ExplicitSession, ImplicitSession, SessionSigner, SessionSignerConfig};
pub use permission::{
    ParameterOperation, ParameterRule, Permission, PermissionUsage, SessionPermissions,
    decode_session_permissions, encode_permission, encode_session_permissions, mask,
};
pub use signature::{
    DecodedSessionSignatures, SessionCallSignature, decode_session_call_signatures,
    encode_session_call_signatures,
};
pub use topology::{
    SessionsTopology, add_explicit_session, add_to_implicit_blacklist, balance_sessions_topology,
    clean_sessions_topology, decode_sessions_topology, empty_sessions_topology,
    encode_sessions_topology, merge_sessions_topology, minimise_sessions_topology,
    remove_explicit_session, remove_from_implicit_blacklist,
};
