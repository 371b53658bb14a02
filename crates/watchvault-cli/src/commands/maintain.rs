use crate::output::Output;
use chrono::Utc;
use color_eyre::Result;
use serde_json::json;
use watchvault_config::Config;
use watchvault_core::{
    migrate_legacy, CycleOutcome, ImportPolicy, LifecycleManager, MigrationOutcome, Partition,
    QuotaOutcome, RecordStore, SkipReason,
};
use watchvault_models::{RetentionPolicy, StoreSnapshot};

/// Show or change the retention policy. `days` of 0 turns retention off.
pub async fn run_retention(
    store: &RecordStore,
    days: Option<u32>,
    off: bool,
    output: &Output,
) -> Result<()> {
    if off || days == Some(0) {
        store
            .set_retention_policy(RetentionPolicy::Off)
            .await
            .map_err(|e| color_eyre::eyre::eyre!("Failed to update retention: {}", e))?;
        output.success("Retention disabled; history is kept indefinitely");
        return Ok(());
    }

    if let Some(days) = days {
        store
            .set_retention_policy(RetentionPolicy::Days(days))
            .await
            .map_err(|e| color_eyre::eyre::eyre!("Failed to update retention: {}", e))?;
        output.success(format!("History retention set to {} day(s)", days));
        return Ok(());
    }

    let settings = store
        .settings()
        .await
        .map_err(|e| color_eyre::eyre::eyre!("Failed to read settings: {}", e))?;
    match settings.retention_policy {
        RetentionPolicy::Off => output.info("Retention is off"),
        RetentionPolicy::Days(days) => {
            output.info(format!("History is retained for {} day(s)", days))
        }
    }
    Ok(())
}

/// Run one cleanup cycle immediately, optionally followed by a quota check.
pub async fn run_cleanup(
    store: &RecordStore,
    config: &Config,
    quota: bool,
    output: &Output,
) -> Result<()> {
    let manager = LifecycleManager::new(config.lifecycle.clone());
    let now = Utc::now();

    let outcome = manager
        .run_cleanup_cycle(store, now)
        .await
        .map_err(|e| color_eyre::eyre::eyre!("Cleanup cycle failed: {}", e))?;
    match outcome {
        CycleOutcome::Skipped(SkipReason::RetentionOff) => {
            output.info("Cleanup skipped: retention is off");
        }
        CycleOutcome::Skipped(SkipReason::RanRecently) => {
            output.info("Cleanup skipped: a cycle ran recently");
        }
        CycleOutcome::AgeEvicted { removed } => {
            output.success(format!("Evicted {} expired history record(s)", removed));
        }
    }

    if quota {
        let outcome = manager
            .run_quota_check(store, now)
            .await
            .map_err(|e| color_eyre::eyre::eyre!("Quota check failed: {}", e))?;
        match outcome {
            QuotaOutcome::NoQuotaConfigured => {
                output.info("No storage quota configured; quota check skipped");
            }
            QuotaOutcome::BelowHighWater => {
                output.info("Storage usage is below the high-water mark");
            }
            QuotaOutcome::Evicted { removed } => {
                output.success(format!("Quota pressure evicted {} record(s)", removed));
            }
        }
    }
    Ok(())
}

/// Collapse duplicates, then repair cross references. Sweeps both
/// partitions unless one is named.
pub async fn run_sweep(
    store: &RecordStore,
    partition: Option<String>,
    output: &Output,
) -> Result<()> {
    let (sweep_history, sweep_library) = match partition.as_deref() {
        None => (true, true),
        Some("history") => (true, false),
        Some("library") => (false, true),
        Some(other) => {
            return Err(color_eyre::eyre::eyre!(
                "Invalid partition {:?}. Use 'history' or 'library'",
                other
            ))
        }
    };

    let mut history = 0;
    if sweep_history {
        history = store
            .dedupe_sweep(Partition::History)
            .await
            .map_err(|e| color_eyre::eyre::eyre!("History sweep failed: {}", e))?;
    }
    let mut library = 0;
    if sweep_library {
        library = store
            .dedupe_sweep(Partition::Library)
            .await
            .map_err(|e| color_eyre::eyre::eyre!("Library sweep failed: {}", e))?;
    }
    let repairs = store
        .repair_references()
        .await
        .map_err(|e| color_eyre::eyre::eyre!("Reference repair failed: {}", e))?;

    output.success(format!(
        "Removed {} duplicate(s) from history, {} from library; {} reference repair(s)",
        history, library, repairs
    ));
    Ok(())
}

pub async fn run_migrate(store: &RecordStore, output: &Output) -> Result<()> {
    match migrate_legacy(store)
        .await
        .map_err(|e| color_eyre::eyre::eyre!("Migration failed: {}", e))?
    {
        MigrationOutcome::Skipped => {
            output.info("Nothing to migrate");
        }
        MigrationOutcome::Migrated { history, library } => {
            output.success(format!(
                "Migrated {} history and {} library record(s) from the legacy layout",
                history, library
            ));
        }
    }
    Ok(())
}

pub async fn run_export(store: &RecordStore, file: Option<String>, output: &Output) -> Result<()> {
    let snapshot = store
        .export()
        .await
        .map_err(|e| color_eyre::eyre::eyre!("Export failed: {}", e))?;

    match file {
        Some(path) => {
            let content = serde_json::to_string_pretty(&snapshot)?;
            std::fs::write(&path, content)
                .map_err(|e| color_eyre::eyre::eyre!("Failed to write {}: {}", path, e))?;
            output.success(format!(
                "Exported {} history and {} library record(s) to {}",
                snapshot.history.len(),
                snapshot.library.len(),
                path
            ));
        }
        None => {
            output.json(&json!(snapshot));
        }
    }
    Ok(())
}

pub async fn run_import(
    store: &RecordStore,
    file: &str,
    prefer: &str,
    output: &Output,
) -> Result<()> {
    let policy = match prefer {
        "existing" => ImportPolicy::KeepExisting,
        "incoming" => ImportPolicy::KeepIncoming,
        other => {
            return Err(color_eyre::eyre::eyre!(
                "Invalid --prefer {:?}. Use 'existing' or 'incoming'",
                other
            ))
        }
    };

    let content = std::fs::read_to_string(file)
        .map_err(|e| color_eyre::eyre::eyre!("Failed to read {}: {}", file, e))?;
    let snapshot: StoreSnapshot = serde_json::from_str(&content)
        .map_err(|e| color_eyre::eyre::eyre!("Invalid snapshot file {}: {}", file, e))?;

    let incoming = snapshot.history.len() + snapshot.library.len();
    store
        .import(snapshot, policy)
        .await
        .map_err(|e| color_eyre::eyre::eyre!("Import failed: {}", e))?;

    // Colliding content can arrive under different ids; collapse it.
    let removed = store
        .dedupe_sweep(Partition::History)
        .await
        .map_err(|e| color_eyre::eyre::eyre!("Post-import sweep failed: {}", e))?;

    output.success(format!(
        "Imported {} record(s); post-import sweep removed {} duplicate(s)",
        incoming, removed
    ));
    Ok(())
}
