use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "shardsync",
    about = "Keep a sharded blob store consistent with its ledger",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show the effective storage manager configuration
    Config(ConfigArgs),
    /// Run a sync against an in-memory ledger and shard store
    Simulate(SimulateArgs),
}

#[derive(Args)]
pub struct ConfigArgs {
    /// TOML file to load; defaults apply to missing keys
    #[arg(short, long)]
    pub file: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum EncodingArg {
    Plain,
    Masked,
}

#[derive(Args, Clone, Debug)]
pub struct SimulateArgs {
    /// Manager configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Number of local shards, starting at shard 0
    #[arg(long, default_value = "2")]
    pub shards: u64,
    /// log2 of slots per shard
    #[arg(long, default_value = "6")]
    pub kv_entries_bits: u32,
    /// log2 of slot size in bytes
    #[arg(long, default_value = "10")]
    pub kv_size_bits: u32,
    #[arg(long, default_value = "2")]
    pub chunks_per_kv_bits: u32,
    /// Blobs already finalized when the node starts
    #[arg(long, default_value = "48")]
    pub finalized: u64,
    /// Blobs finalized while the node is running
    #[arg(long, default_value = "16")]
    pub advance: u64,
    /// Every n-th blob is empty (0 disables)
    #[arg(long, default_value = "5")]
    pub empty_every: u64,
    /// Peer blobs delivered with tampered content
    #[arg(long, default_value = "3")]
    pub tampered: u64,
    #[arg(long, value_enum, default_value = "masked")]
    pub encoding: EncodingArg,
    #[arg(long, default_value = "7")]
    pub seed: u64,
}
