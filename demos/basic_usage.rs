// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic shard-cache usage example.
//!
//! Demonstrates, with two simulated servers in one process:
//! 1. Building repositories over shared storage and an in-process bus
//! 2. Writing entities (instant, local) and reading them back
//! 3. Write-back and propagation to the peer server
//! 4. Contexts, observers and deletes
//! 5. Displaying metrics
//! 6. Clean shutdown
//!
//! Swap `MemoryStorage`/`MemorySync` for `RedisStorage`/`RedisSync` over a
//! connected `RedisTransport` to run the same flow across real servers.
//!
//! # Run
//!
//! ```bash
//! RUST_LOG=shard_cache=debug cargo run --example basic_usage
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serde::{Deserialize, Serialize};
use shard_cache::{CachedRepository, Entity, MemoryBus, MemoryStorage, MemorySync, RepoConfig};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Town {
    id: String,
    mayor: String,
    residents: u32,
}

impl Entity for Town {
    fn id(&self) -> &str {
        &self.id
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install metrics recorder
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("shard_cache=info")))
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║             shard-cache: Basic Usage Example                  ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Two servers sharing one store and one bus
    // ─────────────────────────────────────────────────────────────────────────
    println!("📦 Building repositories for survival-1 and survival-2...");

    let bus = MemoryBus::new();
    let storage = Arc::new(MemoryStorage::<Town>::new());
    let config = RepoConfig {
        // Write back quickly for the demo
        save_interval_ms: 250,
        entity_timeout_ms: 60_000,
        ..RepoConfig::new("towns")
    };

    let towns_one = CachedRepository::with_sync(
        config.clone(),
        storage.clone(),
        Arc::new(MemorySync::<Town>::new(bus.clone(), "survival-1", config.update_channel.clone())),
    )?;
    let towns_two = CachedRepository::with_sync(
        config.clone(),
        storage.clone(),
        Arc::new(MemorySync::<Town>::new(bus, "survival-2", config.update_channel.clone())),
    )?;

    towns_one.init().await?;
    towns_two.init().await?;
    println!("   ✅ Both running. State: {}", towns_one.state());

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Local writes and reads
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 Saving 3 towns on survival-1...");
    for (id, mayor) in [("town.oak", "Alice"), ("town.elm", "Bob"), ("town.ash", "Carol")] {
        let start = Instant::now();
        towns_one.save(Town {
            id: id.into(),
            mayor: mayor.into(),
            residents: 1,
        })?;
        println!("   └─ Saved {} ({:?}, dirty={})", id, start.elapsed(), towns_one.is_dirty(id));
    }

    let start = Instant::now();
    let oak = towns_one.get("town.oak").await?;
    println!("   ⚡ get('town.oak') → {:?} ({:?})", oak.map(|t| t.mayor), start.elapsed());

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Write-back and propagation
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n⏳ Waiting for the write-back job...");
    tokio::time::sleep(Duration::from_millis(400)).await;
    println!("   └─ Stored entities: {}", storage.len());

    // survival-2 loads the town, then follows survival-1's changes
    let mut watch_oak = towns_two.observe("town.oak");
    towns_two.get("town.oak").await?;
    watch_oak.borrow_and_update();

    let oak = towns_one.get("town.oak").await?.ok_or("town.oak missing")?;
    towns_one.save(Town {
        residents: oak.residents + 41,
        ..oak
    })?;
    towns_one.save_dirty().await?;

    tokio::time::timeout(Duration::from_secs(1), watch_oak.changed()).await??;
    if let Some(town) = watch_oak.borrow().as_ref() {
        println!("   └─ survival-2 sees town.oak with {} residents", town.residents);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Contexts and deletes
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📍 Marking town.elm as active on survival-2...");
    towns_two.add_context("town.elm");
    println!("   └─ Contexts: {:?}", towns_two.get_contexts());

    println!("\n🗑️  Deleting town.ash from survival-1...");
    towns_one.delete("town.ash").await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    println!("   └─ exists on survival-2: {}", towns_two.exists("town.ash").await?);

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📊 Repository stats:");
    println!("   ├─ survival-1: {:?}", towns_one.stats());
    println!("   └─ survival-2: {:?}", towns_two.stats());

    println!("\n📈 Raw Metrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Clean shutdown
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🛑 Shutting down...");
    towns_one.shutdown().await?;
    towns_two.shutdown().await?;
    println!("   ✅ Shutdown complete! State: {}", towns_one.state());

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Example complete!                          ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    Ok(())
}

/// Dump all captured metrics, grouped by kind
fn dump_metrics(snapshotter: &Snapshotter) {
    let snapshot = snapshotter.snapshot();

    let mut counters: Vec<_> = vec![];
    let mut gauges: Vec<_> = vec![];
    let mut histograms: Vec<_> = vec![];

    for (composite_key, _, _, value) in snapshot.into_vec() {
        let (_, key) = composite_key.into_parts();
        let name = key.name().to_string();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };

        match value {
            DebugValue::Counter(v) => counters.push((name, label_str, v)),
            DebugValue::Gauge(v) => gauges.push((name, label_str, v.into_inner())),
            DebugValue::Histogram(samples) => {
                let count = samples.len();
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                histograms.push((name, label_str, count, sum));
            }
        }
    }

    counters.sort_by(|a, b| a.0.cmp(&b.0));
    gauges.sort_by(|a, b| a.0.cmp(&b.0));
    histograms.sort_by(|a, b| a.0.cmp(&b.0));

    if !counters.is_empty() {
        println!("   ┌─ Counters (cumulative)");
        for (name, labels, value) in &counters {
            println!("   │  └─ {}{} = {}", name, labels, value);
        }
    }

    if !gauges.is_empty() {
        println!("   ├─ Gauges (current value)");
        for (name, labels, value) in &gauges {
            println!("   │  └─ {}{} = {:.0}", name, labels, value);
        }
    }

    if !histograms.is_empty() {
        println!("   └─ Histograms (distributions)");
        for (name, labels, count, sum) in &histograms {
            let avg = if *count > 0 { sum / *count as f64 } else { 0.0 };
            println!("      └─ {}{} count={} avg={:.6}", name, labels, count, avg);
        }
    }

    if counters.is_empty() && gauges.is_empty() && histograms.is_empty() {
        println!("   └─ (no metrics recorded)");
    }
}
