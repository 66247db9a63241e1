use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use colored::Colorize;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use shardsync_ledger::{blob_commitment, InMemoryLedger};
use shardsync_manager::{LedgerView, ManagerConfig, StorageManager};
use shardsync_shard::MemoryShardStore;
use shardsync_types::{Address, Commitment, EncodingType, ShardParams, SlotState};
use tracing::info;

use crate::cli::*;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Config(args) => cmd_config(args, cli.format),
        Command::Simulate(args) => cmd_simulate(args, cli.format).await,
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ManagerConfig> {
    match path {
        Some(path) => ManagerConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(ManagerConfig::default()),
    }
}

fn cmd_config(args: ConfigArgs, format: OutputFormat) -> anyhow::Result<()> {
    let config = load_config(args.file.as_deref())?;
    match format {
        OutputFormat::Text => print!("{}", config.to_toml_string()?),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
    }
    Ok(())
}

async fn cmd_simulate(args: SimulateArgs, format: OutputFormat) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    let report = simulate(&args, config).await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_report(&report),
    }
    Ok(())
}

/// Outcome of one simulated sync.
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub view: LedgerView,
    pub capacity: u64,
    pub downloaded: u64,
    pub synthesized: u64,
    pub peer_offered: usize,
    pub peer_committed: usize,
    pub empty_filled: u64,
    pub fill_next: u64,
    pub advanced: u64,
    pub filled_slots: u64,
    pub empty_slots: u64,
    pub unsynced_slots: u64,
    pub verified_reads: u64,
}

/// Drive a node through bootstrap, metadata download, peer sync, empty
/// fill and one finality advance, then check every local slot.
pub async fn simulate(
    args: &SimulateArgs,
    config: ManagerConfig,
) -> anyhow::Result<SimulationReport> {
    anyhow::ensure!(args.shards > 0, "at least one shard is required");
    let params = ShardParams {
        kv_entries_bits: args.kv_entries_bits,
        kv_size_bits: args.kv_size_bits,
        chunks_per_kv_bits: args.chunks_per_kv_bits,
    };
    params.validate()?;
    let capacity = args
        .shards
        .checked_mul(params.kv_entries())
        .context("shard count overflows the slot space")?;
    anyhow::ensure!(
        args.finalized + args.advance <= capacity,
        "{} blobs do not fit in {} slots",
        args.finalized + args.advance,
        capacity
    );

    let mut rng = StdRng::seed_from_u64(args.seed);
    let contract = Address::from_bytes(rng.gen());
    let owner = Address::from_bytes(rng.gen());
    let encoding = match args.encoding {
        EncodingArg::Plain => EncodingType::Plain,
        EncodingArg::Masked => EncodingType::Masked,
    };

    let store = MemoryShardStore::new(params, contract)?;
    for shard in 0..args.shards {
        store.add_shard(shard, owner, encoding)?;
    }
    let store = Arc::new(store);
    let ledger = Arc::new(InMemoryLedger::new());

    let initial = random_blobs(&mut rng, 0, args.finalized, params.kv_size(), args.empty_every);
    let start_block = ledger.push_blobs(&initial);
    ledger.finalize(start_block)?;

    let manager = StorageManager::new(Arc::clone(&store), Arc::clone(&ledger), config)?;
    manager.bootstrap(start_block).await?;
    let download = manager.download_all_metas().await?;

    // Peers deliver the finalized blobs; tampered ones carry their own
    // commitment and must be rejected.
    let mut delivered = initial.clone();
    for blob in delivered
        .iter_mut()
        .filter(|b| !b.is_empty())
        .take(args.tampered as usize)
    {
        blob[0] ^= 0xff;
    }
    let slots: Vec<u64> = (0..args.finalized).collect();
    let commitments: Vec<Commitment> = delivered.iter().map(|b| blob_commitment(b)).collect();
    let committed = manager.commit_blobs(&slots, &delivered, &commitments)?;
    info!(
        offered = slots.len(),
        committed = committed.len(),
        "peer blobs committed"
    );

    let fill = manager.commit_empty_blobs(args.finalized, capacity - 1)?;

    let fresh = random_blobs(
        &mut rng,
        args.finalized,
        args.advance,
        params.kv_size(),
        args.empty_every,
    );
    let block = ledger.push_blobs(&fresh);
    ledger.finalize(block)?;
    let fresh_slots: Vec<u64> = (args.finalized..args.finalized + args.advance).collect();
    let fresh_commitments: Vec<Commitment> = fresh.iter().map(|b| blob_commitment(b)).collect();
    manager
        .advance_to(block, fresh_slots.clone(), fresh.clone(), fresh_commitments)
        .await?;

    let expected: HashMap<u64, &Vec<u8>> = slots
        .iter()
        .copied()
        .zip(&initial)
        .chain(fresh_slots.iter().copied().zip(&fresh))
        .collect();

    let mut report = SimulationReport {
        view: manager.view().context("view lost after advance")?,
        capacity,
        downloaded: download.downloaded,
        synthesized: download.synthesized,
        peer_offered: slots.len(),
        peer_committed: committed.len(),
        empty_filled: fill.inserted,
        fill_next: fill.next,
        advanced: args.advance,
        filled_slots: 0,
        empty_slots: 0,
        unsynced_slots: 0,
        verified_reads: 0,
    };
    for slot in 0..capacity {
        match manager.slot_state(slot)? {
            SlotState::Unsynced => report.unsynced_slots += 1,
            SlotState::EmptyFilled => report.empty_slots += 1,
            SlotState::Filled => {
                report.filled_slots += 1;
                let blob = expected
                    .get(&slot)
                    .with_context(|| format!("slot {slot} filled without a ledger blob"))?;
                let data = manager.read(slot, blob.len(), &blob_commitment(blob))?;
                anyhow::ensure!(
                    data.as_deref() == Some(blob.as_slice()),
                    "slot {slot} reads back different content"
                );
                report.verified_reads += 1;
            }
        }
    }
    manager.close()?;
    Ok(report)
}

fn random_blobs(
    rng: &mut StdRng,
    first: u64,
    count: u64,
    kv_size: u64,
    empty_every: u64,
) -> Vec<Vec<u8>> {
    (first..first + count)
        .map(|slot| {
            if empty_every > 0 && (slot + 1) % empty_every == 0 {
                return Vec::new();
            }
            let mut blob = vec![0u8; rng.gen_range(1..=kv_size as usize)];
            rng.fill(blob.as_mut_slice());
            blob
        })
        .collect()
}

fn print_report(report: &SimulationReport) {
    println!("{} Simulation complete", "✓".green().bold());
    println!(
        "  View: block {}, {} slots assigned",
        report.view.block.to_string().yellow(),
        report.view.last_kv_index
    );
    println!(
        "  Metas: {} downloaded, {} synthesized",
        report.downloaded.to_string().bold(),
        report.synthesized
    );
    let rejected = report.peer_offered - report.peer_committed;
    let rejected = if rejected == 0 {
        "0 rejected".green()
    } else {
        format!("{rejected} rejected").red()
    };
    println!(
        "  Peer sync: {}/{} committed ({})",
        report.peer_committed.to_string().bold(),
        report.peer_offered,
        rejected
    );
    println!(
        "  Empty fill: {} slots, next {}",
        report.empty_filled, report.fill_next
    );
    println!("  Advance: {} blobs finalized", report.advanced);
    println!(
        "  Slots: {} filled, {} empty, {} unsynced (of {})",
        report.filled_slots.to_string().green(),
        report.empty_slots.to_string().cyan(),
        report.unsynced_slots.to_string().yellow(),
        report.capacity
    );
    println!("  Reads verified: {}", report.verified_reads.to_string().green());
}
