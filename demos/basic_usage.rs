// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic goal-sync usage example.
//!
//! Demonstrates:
//! 1. Two devices (a phone on SQLite, a laptop in memory) sharing one remote
//! 2. Creating and updating goals offline
//! 3. Pushing and pulling to converge
//! 4. A concurrent edit settled by last-write-wins
//! 5. Displaying metrics
//! 6. Clean shutdown
//!
//! No server is needed: the remote is the in-memory implementation.
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use std::sync::Arc;

use goal_sync::{
    EngineState, GoalEdit, InMemoryRemote, InMemoryStore, SqlStore, SyncEngine, SyncEngineConfig,
};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use tokio::sync::watch;

const DEMO_DB: &str = "./goal_sync_demo.db";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║             goal-sync: Basic Usage Example                    ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. One remote, two devices
    // ─────────────────────────────────────────────────────────────────────────
    println!("📦 Setting up a shared remote and two devices...");

    let remote = Arc::new(InMemoryRemote::new());
    let config = SyncEngineConfig::default();

    let (_phone_tx, phone_rx) = watch::channel(config.clone());
    let phone_store = SqlStore::new(&format!("sqlite://{}?mode=rwc", DEMO_DB)).await?;
    let phone = SyncEngine::new(config.clone(), phone_rx, Arc::new(phone_store), remote.clone());

    let (_laptop_tx, laptop_rx) = watch::channel(config.clone());
    let laptop = SyncEngine::new(config, laptop_rx, Arc::new(InMemoryStore::new()), remote.clone());

    phone.start().await?;
    laptop.start().await?;
    assert_eq!(phone.state(), EngineState::Ready);
    println!("   ✅ Phone ready (SQLite at {}), laptop ready (memory)", DEMO_DB);

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Offline writes on the phone
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 Phone goes offline and logs progress...");
    remote.set_offline(true);

    let books = phone.create_goal("Read 12 books", 12).await?;
    let run = phone.create_goal("Run 50km", 50).await?;
    for _ in 0..3 {
        phone.increment_goal(books.id(), 1).await?;
    }
    phone.increment_goal(run.id(), 8).await?;

    let books = phone.goal(books.id()).await?.ok_or("goal vanished on phone")?;
    println!("   └─ {} → {}/{}", books.name(), books.current_value(), books.target_value());
    println!("   └─ Pending pushes: {} (one per goal, collapsed)", phone.pending_pushes().await?);

    match phone.drain_outbox().await {
        Ok(_) => println!("   └─ Unexpected: drain succeeded offline"),
        Err(e) => println!("   └─ Drain while offline: {} (entries kept)", e),
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Back online: push, then pull on the laptop
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔄 Back online, syncing both devices...");
    remote.set_offline(false);

    let phone_report = phone.sync_now().await?;
    println!("   └─ Phone pull: {} received, {} applied", phone_report.received, phone_report.applied());
    let laptop_report = laptop.sync_now().await?;
    println!("   └─ Laptop pull: {} received, {} inserted", laptop_report.received, laptop_report.inserted);

    for goal in laptop.goals().await? {
        println!(
            "   └─ Laptop sees '{}' at {:.0}% (complete: {})",
            goal.name(),
            goal.progress() * 100.0,
            goal.is_complete()
        );
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Concurrent edit, last writer wins
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n⚔️  Both devices edit the same goal...");
    phone.edit_goal(run.id(), GoalEdit::default().target_value(40)).await?;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    laptop
        .edit_goal(run.id(), GoalEdit::default().name("Run 60km").target_value(60))
        .await?;

    phone.drain_outbox().await?;
    laptop.drain_outbox().await?;
    phone.pull().await?;
    laptop.pull().await?;

    let on_phone = phone.goal(run.id()).await?.ok_or("goal vanished on phone")?;
    let on_laptop = laptop.goal(run.id()).await?.ok_or("goal vanished on laptop")?;
    println!("   └─ Phone:  '{}' target {}", on_phone.name(), on_phone.target_value());
    println!("   └─ Laptop: '{}' target {}", on_laptop.name(), on_laptop.target_value());
    if on_phone.to_dto() == on_laptop.to_dto() {
        println!("   └─ ✅ Converged on the later edit");
    } else {
        println!("   └─ ⚠️  Devices differ");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Dump raw metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📈 Raw Metrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Clean shutdown
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🛑 Shutting down...");
    phone.shutdown().await;
    laptop.shutdown().await;
    println!("   ✅ Shutdown complete! State: {:?}", phone.state());

    println!("\n🧹 Cleaning up demo database...");
    for path in [DEMO_DB.to_string(), format!("{}-shm", DEMO_DB), format!("{}-wal", DEMO_DB)] {
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                println!("   └─ Warning: could not remove {}: {}", path, e);
            }
        }
    }

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Example complete!                          ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    Ok(())
}

/// Dump all captured metrics, sorted by name
fn dump_metrics(snapshotter: &Snapshotter) {
    let mut counters = vec![];
    let mut gauges = vec![];
    let mut histograms = vec![];

    for (composite_key, _, _, value) in snapshotter.snapshot().into_vec() {
        let (_, key) = composite_key.into_parts();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };
        let name = format!("{}{}", key.name(), label_str);

        match value {
            DebugValue::Counter(v) => counters.push((name, v)),
            DebugValue::Gauge(v) => gauges.push((name, v.into_inner())),
            DebugValue::Histogram(samples) => {
                let count = samples.len();
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                histograms.push((name, count, sum));
            }
        }
    }

    counters.sort();
    gauges.sort_by(|a, b| a.0.cmp(&b.0));
    histograms.sort_by(|a, b| a.0.cmp(&b.0));

    if !counters.is_empty() {
        println!("   ┌─ Counters (cumulative)");
        for (name, value) in &counters {
            println!("   │  └─ {} = {}", name, value);
        }
    }
    if !gauges.is_empty() {
        println!("   ├─ Gauges (current value)");
        for (name, value) in &gauges {
            println!("   │  └─ {} = {:.2}", name, value);
        }
    }
    if !histograms.is_empty() {
        println!("   └─ Histograms (distributions)");
        for (name, count, sum) in &histograms {
            let avg = if *count > 0 { sum / *count as f64 } else { 0.0 };
            println!("   │  └─ {} count={} avg={:.4}", name, count, avg);
        }
    }
    if counters.is_empty() && gauges.is_empty() && histograms.is_empty() {
        println!("   └─ (no metrics recorded)");
    }
}
