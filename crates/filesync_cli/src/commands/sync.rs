//! Sync command implementation.

use super::{config, connect, controller, prepare};
use crate::Target;
use filesync_engine::Reconcile;

/// Runs one reconciliation pass and reports what changed.
pub fn run(target: &Target, fetch_timeout_secs: u64) -> Result<(), Box<dyn std::error::Error>> {
    let source = connect(target)?;
    let key = source.key_for(&target.manifest)?;
    let reconciler = controller(source, config(target, fetch_timeout_secs))?;
    let _lock = prepare(target)?;

    println!("Syncing {} into {}", key, target.download_path.display());
    let outcome = reconciler.reconcile(&key)?;

    for name in &outcome.deleted {
        println!("  - {name}");
    }
    for name in &outcome.downloaded {
        println!("  + {name}");
    }
    if outcome.is_noop() {
        println!("Already in sync");
    } else {
        println!(
            "✓ Deleted {}, downloaded {} ({} bytes) in {:?}",
            outcome.deleted.len(),
            outcome.downloaded.len(),
            outcome.bytes,
            outcome.duration
        );
    }

    Ok(())
}
