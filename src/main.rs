use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use gigslot::config::Config;
use gigslot::engine::Engine;
use gigslot::notify::NotifyHub;

/// Replay the booking journal, audit the rebuilt indexes, and compact the
/// journal when it has grown past the threshold.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    std::fs::create_dir_all(&config.data_dir)?;
    let path = config.journal_path();

    let engine = Engine::open(&path, Arc::new(NotifyHub::new()))?;
    info!("gigslot journal: {}", path.display());
    info!("  bookings: {}", engine.store().len());
    info!("  indexed resources: {}", engine.conflicts.resource_count());

    let overlaps = engine.audit();
    for o in &overlaps {
        warn!(
            resource = %o.resource,
            first = %o.first,
            second = %o.second,
            "overlapping bookings in journal"
        );
    }

    let compacted = engine.journal_appends_since_compact() >= config.compact_threshold;
    if compacted {
        engine.compact_journal()?;
    }

    let summary = json!({
        "journal": path.display().to_string(),
        "bookings": engine.store().len(),
        "released": engine.store().released_ids().len(),
        "indexed_entries": engine.conflicts.entry_count(),
        "overlaps": overlaps
            .iter()
            .map(|o| json!({
                "resource": o.resource.to_string(),
                "first": o.first.to_string(),
                "second": o.second.to_string(),
            }))
            .collect::<Vec<_>>(),
        "compacted": compacted,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if overlaps.is_empty() {
        Ok(())
    } else {
        Err(format!("{} overlapping booking pair(s)", overlaps.len()).into())
    }
}
