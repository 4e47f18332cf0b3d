//! # Wallet Auth Core
//!
//! Authorization core for smart-contract wallets: who may sign, and which
//! calls short-lived session keys may make.
//!
//! ## Architecture
//!
//! This crate provides:
//! - **Configuration Tree**: weighted, threshold, nested signer trees with
//!   canonical image hashing and safety evaluation
//! - **Session Topology**: the tree of explicit sessions, identity signers and
//!   the implicit blacklist, with balancing, cleaning and minimisation
//! - **Permission Rules**: masked call data comparisons, a builder DSL over
//!   ABI signatures and canned ERC-20/721/1155 recipes
//! - **Signature Codec**: the binary payload an on-chain verifier consumes for
//!   a batch of session-signed calls
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use wallet_auth_core::session::{
//!     add_explicit_session, empty_sessions_topology, Erc20PermissionBuilder,
//!     ExplicitSession, SessionPermissions, SessionSigner, SessionSignerConfig,
//! };
//!
//! let permission = Erc20PermissionBuilder::build_transfer(usdc, limit)?;
//! let topology = add_explicit_session(
//!     &empty_sessions_topology(identity),
//!     SessionPermissions { signer: session_key.address(), permissions: vec![permission], .. },
//! )?;
//!
//! let signer = SessionSigner::new(topology, SessionSignerConfig::new(wallet, chain_id))?
//!     .with_explicit_session(ExplicitSession::new(session_key))?;
//! let signature = signer.sign_calls(&calls).await?;
//! ```
//!
//! All tree operations are pure and return new values. Keys, chain access and
//! storage are injected through the traits in [`signer`] and [`state`].

pub mod config;
pub mod error;
pub mod session;
pub mod signer;
pub mod state;
pub mod types;

pub use config::{Config, SignerSet, Topology};
pub use error::{Error, Result};
pub use session::{Permission, SessionCallSignature, SessionPermissions, SessionsTopology};
pub use signer::{LocalSigner, Provider, SapientSigner, Signer};
pub use state::StateProvider;
#[cfg(feature = "runtime")]
pub use state::MemoryStateProvider;
pub use types::{RsySignature, keccak256_hash};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
