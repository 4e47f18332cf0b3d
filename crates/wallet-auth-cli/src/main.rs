//! Wallet Auth CLI
//!
//! Command-line tool for inspecting wallet configurations, session
//! topologies and session signature payloads stored as JSON or hex.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{Level, debug, info};
use tracing_subscriber::FmtSubscriber;
use wallet_auth_core::config::{Config, Topology, get_signers, get_weight};
use wallet_auth_core::session::{
    SessionPermissions, SessionsTopology, balance_sessions_topology, clean_sessions_topology,
    decode_session_call_signatures, encode_session_permissions,
};
use wallet_auth_core::types::{address_hex, decode_hex};

#[derive(Parser)]
#[command(name = "wallet-auth")]
#[command(about = "Wallet authorization toolkit", version)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the image hash of a configuration
    ImageHash {
        /// Configuration JSON file
        config: PathBuf,
    },

    /// Run the safety evaluation and list the signers of a configuration
    Check {
        /// Configuration JSON file
        config: PathBuf,
    },

    /// Print the root hash and summary of a session topology
    SessionHash {
        /// Session topology JSON file
        topology: PathBuf,
    },

    /// Drop expired sessions and rebalance a session topology
    Clean {
        /// Session topology JSON file
        topology: PathBuf,

        /// Unix timestamp to clean at (defaults to now)
        #[arg(long)]
        now: Option<u64>,
    },

    /// Encode session permissions for the on-chain verifier
    EncodePermissions {
        /// Session permissions JSON file
        permissions: PathBuf,
    },

    /// Decode a session call signature payload
    DecodeSignature {
        /// Hex-encoded payload
        payload: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::ImageHash { config } => image_hash(&config),
        Commands::Check { config } => check(&config),
        Commands::SessionHash { topology } => session_hash(&topology),
        Commands::Clean { topology, now } => clean(&topology, now),
        Commands::EncodePermissions { permissions } => encode_permissions(&permissions),
        Commands::DecodeSignature { payload } => decode_signature(&payload),
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let value = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    debug!(path = %path.display(), "Loaded JSON input");
    Ok(value)
}

fn image_hash(path: &Path) -> Result<()> {
    let config: Config = read_json(path)?;
    println!("{}", config.image_hash());
    Ok(())
}

fn check(path: &Path) -> Result<()> {
    let config: Config = read_json(path)?;
    let (_, max_weight) = get_weight(&config.topology, &|_: &Topology| true);
    let signers = get_signers(&config.topology);

    println!("Image hash:  {}", config.image_hash());
    println!("Threshold:   {}", config.threshold);
    println!("Max weight:  {}", max_weight);
    println!("Checkpoint:  {}", config.checkpoint);
    println!("\nSigners:");
    for signer in &signers.signers {
        println!("  - {}", address_hex(signer));
    }
    for (signer, image_hash) in &signers.sapient_signers {
        println!("  - {} (sapient, {})", address_hex(signer), image_hash);
    }
    if !signers.is_complete {
        println!("  (some subtrees are opaque)");
    }

    match config.evaluate_safety() {
        Ok(()) => {
            println!("\nConfiguration is safe");
            Ok(())
        }
        Err(e) => bail!("configuration is unsafe: {}", e),
    }
}

fn session_hash(path: &Path) -> Result<()> {
    let topology: SessionsTopology = read_json(path)?;
    println!("Root hash:  {}", topology.hash()?);
    println!("Complete:   {}", topology.is_complete());
    println!("Leaves:     {}", topology.leaves().len());
    for identity in topology.identity_signers() {
        println!("Identity:   {}", address_hex(&identity));
    }
    if let Some(blacklist) = topology.implicit_blacklist() {
        println!("Blacklist:  {} entries", blacklist.len());
    }
    for signer in topology.explicit_signers() {
        println!("Session:    {}", address_hex(&signer));
    }
    Ok(())
}

fn clean(path: &Path, now: Option<u64>) -> Result<()> {
    let topology: SessionsTopology = read_json(path)?;
    let now = match now {
        Some(now) => now,
        None => u64::try_from(chrono::Utc::now().timestamp()).context("clock before epoch")?,
    };
    let before = topology.explicit_signers().len();
    let Some(cleaned) = clean_sessions_topology(&topology, now) else {
        bail!("no leaves left after cleaning at {}", now);
    };
    let cleaned = balance_sessions_topology(&cleaned);
    info!(
        now,
        removed = before - cleaned.explicit_signers().len(),
        "Cleaned session topology"
    );
    println!("{}", serde_json::to_string_pretty(&cleaned)?);
    Ok(())
}

fn encode_permissions(path: &Path) -> Result<()> {
    let permissions: SessionPermissions = read_json(path)?;
    let encoded = encode_session_permissions(&permissions)?;
    println!("0x{}", hex::encode(encoded));
    Ok(())
}

fn decode_signature(payload: &str) -> Result<()> {
    let bytes = decode_hex(payload)?;
    let decoded = decode_session_call_signatures(&bytes)?;
    let output = serde_json::json!({
        "topology": decoded.topology,
        "root": decoded.topology.hash()?.to_string(),
        "callSignatures": decoded.call_signatures,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
