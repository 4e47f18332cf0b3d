//! Configuration and session tree storage interface
//!
//! Wallets commit only to image hashes on chain. A [`StateProvider`] maps
//! those hashes back to the full configurations and session trees needed to
//! build signatures. Persistent backends live outside this crate; the
//! in-memory store is provided for tests and short-lived tools.
//!
//! ## Example
//!
//! ```rust,ignore
//! use wallet_auth_core::state::{MemoryStateProvider, StateProvider};
//!
//! let state = MemoryStateProvider::new();
//! let image_hash = state.save_configuration(&config).await?;
//! let loaded = state.get_configuration(&image_hash).await?;
//! ```

use crate::config::{Config, Topology, merge_topology};
use crate::session::SessionsTopology;
use crate::{Error, Result};
use alloy_primitives::B256;
use async_trait::async_trait;

#[cfg(feature = "runtime")]
use std::collections::HashMap;
#[cfg(feature = "runtime")]
use std::sync::Arc;
#[cfg(feature = "runtime")]
use tokio::sync::RwLock;
#[cfg(feature = "runtime")]
use tracing::{debug, instrument};

/// Trait for configuration and session tree storage backends
#[async_trait]
pub trait StateProvider: Send + Sync {
    /// Load a configuration by image hash
    async fn get_configuration(&self, image_hash: &B256) -> Result<Option<Config>>;

    /// Load a session tree by root hash
    async fn get_tree(&self, root: &B256) -> Result<Option<SessionsTopology>>;

    /// Store a configuration, returning its image hash
    async fn save_configuration(&self, config: &Config) -> Result<B256>;

    /// Store a session tree, returning its root hash
    async fn save_tree(&self, tree: &SessionsTopology) -> Result<B256>;
}

/// Expand a partially pruned configuration with the stored full version
///
/// The stored configuration under the same image hash is merged into
/// `config`, so opaque nodes are replaced by their known subtrees.
pub async fn resolve_configuration(
    state: &dyn StateProvider,
    config: &Config,
) -> Result<Config> {
    let image_hash = config.image_hash();
    let stored = state
        .get_configuration(&image_hash)
        .await?
        .ok_or_else(|| Error::State(format!("unknown configuration {}", image_hash)))?;
    let topology: Topology = merge_topology(&config.topology, &stored.topology)?;
    Ok(Config {
        topology,
        ..config.clone()
    })
}

/// In-memory state provider
#[cfg(feature = "runtime")]
#[derive(Debug, Default)]
pub struct MemoryStateProvider {
    configurations: Arc<RwLock<HashMap<B256, Config>>>,
    trees: Arc<RwLock<HashMap<B256, SessionsTopology>>>,
}

#[cfg(feature = "runtime")]
impl MemoryStateProvider {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored configurations
    pub async fn configuration_count(&self) -> usize {
        self.configurations.read().await.len()
    }
}

#[cfg(feature = "runtime")]
#[async_trait]
impl StateProvider for MemoryStateProvider {
    async fn get_configuration(&self, image_hash: &B256) -> Result<Option<Config>> {
        let configurations = self.configurations.read().await;
        Ok(configurations.get(image_hash).cloned())
    }

    async fn get_tree(&self, root: &B256) -> Result<Option<SessionsTopology>> {
        let trees = self.trees.read().await;
        Ok(trees.get(root).cloned())
    }

    #[instrument(skip_all)]
    async fn save_configuration(&self, config: &Config) -> Result<B256> {
        let image_hash = config.image_hash();
        let mut configurations = self.configurations.write().await;
        // keep the most expanded version seen for this hash
        let merged = match configurations.get(&image_hash) {
            Some(existing) => Config {
                topology: merge_topology(&existing.topology, &config.topology)?,
                ..config.clone()
            },
            None => config.clone(),
        };
        configurations.insert(image_hash, merged);
        debug!(image_hash = %image_hash, "Saved configuration");
        Ok(image_hash)
    }

    #[instrument(skip_all)]
    async fn save_tree(&self, tree: &SessionsTopology) -> Result<B256> {
        let root = tree.hash()?;
        let mut trees = self.trees.write().await;
        trees.insert(root, tree.clone());
        debug!(root = %root, "Saved session tree");
        Ok(root)
    }
}
