use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};
use watchvault_config::LifecycleConfig;
use watchvault_models::RetentionPolicy;

use crate::store::{Partition, RecordStore, StoreError};

/// Outcome of one age-based cleanup cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Skipped(SkipReason),
    AgeEvicted { removed: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    RetentionOff,
    RanRecently,
}

/// Outcome of one quota pressure check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaOutcome {
    BelowHighWater,
    NoQuotaConfigured,
    Evicted { removed: usize },
}

/// Floor for one quota eviction batch; below this the churn is not worth it.
const QUOTA_EVICTION_MIN: usize = 10;
/// Fraction of the unprotected population evicted under quota pressure.
const QUOTA_EVICTION_FRACTION: f64 = 0.3;

/// Periodic and quota-triggered eviction from the history partition.
///
/// Only ever removes history keys. The protected set (every id referenced
/// by any playlist) is computed once per cycle; a playlist edited mid-cycle
/// is picked up by the next one.
pub struct LifecycleManager {
    config: LifecycleConfig,
}

impl LifecycleManager {
    pub fn new(config: LifecycleConfig) -> Self {
        Self { config }
    }

    /// One age-based cleanup cycle: Evaluating, then Skipped or AgeEvicting.
    pub async fn run_cleanup_cycle(
        &self,
        store: &RecordStore,
        now: DateTime<Utc>,
    ) -> Result<CycleOutcome, StoreError> {
        let mut settings = store.settings().await?;

        let retention_days = match settings.retention_policy {
            RetentionPolicy::Off => {
                debug!("Cleanup skipped: retention policy is off");
                return Ok(CycleOutcome::Skipped(SkipReason::RetentionOff));
            }
            RetentionPolicy::Days(days) => days,
        };

        // Guards against cleanup storms from rapid repeated triggers.
        if let Some(last) = settings.last_cleanup_at {
            let min_gap = Duration::seconds(self.config.min_cleanup_interval_secs as i64);
            if now - last < min_gap {
                debug!(
                    "Cleanup skipped: last cycle ran {} ago",
                    format_gap(now - last)
                );
                return Ok(CycleOutcome::Skipped(SkipReason::RanRecently));
            }
        }

        let cutoff = now - Duration::days(i64::from(retention_days));
        let playlists = store.read_playlists().await?;
        let protected = playlists.referenced_ids();
        let library_before = store.read_partition(Partition::Library).await?.len();

        let mut history = store.read_partition(Partition::History).await?;
        let expired: Vec<String> = history
            .iter()
            .filter(|(id, record)| record.watched_at < cutoff && !protected.contains(*id))
            .map(|(id, _)| id.clone())
            .collect();

        let removed = expired.len();
        if removed > 0 {
            for id in &expired {
                history.remove(id);
            }
            store.write_partition(Partition::History, &history).await?;
        }

        // The age path never writes the library; verify rather than trust.
        let library_after = store.read_partition(Partition::Library).await?.len();
        if library_before != library_after {
            error!(
                operation = "age_cleanup",
                library_before,
                library_after,
                "Library size changed during a history-only eviction; concurrent writer suspected"
            );
        }

        settings.last_cleanup_at = Some(now);
        store.write_settings(&settings).await?;

        info!(
            operation = "age_cleanup",
            retention_days,
            removed,
            protected = protected.len(),
            "Age-based cleanup cycle complete"
        );
        Ok(CycleOutcome::AgeEvicted { removed })
    }

    /// Quota pressure check, independent of the age policy. Evicts the
    /// oldest unprotected history records when usage crosses the
    /// high-water mark.
    pub async fn run_quota_check(
        &self,
        store: &RecordStore,
        now: DateTime<Utc>,
    ) -> Result<QuotaOutcome, StoreError> {
        let usage = store.backend().usage().await?;
        let fraction = match usage.fraction_used() {
            Some(fraction) => fraction,
            None => return Ok(QuotaOutcome::NoQuotaConfigured),
        };
        if fraction < self.config.quota_high_water {
            return Ok(QuotaOutcome::BelowHighWater);
        }

        warn!(
            operation = "quota_eviction",
            used_bytes = usage.used_bytes,
            fraction = format!("{:.2}", fraction),
            "Storage usage crossed high-water mark, evicting oldest history"
        );

        let playlists = store.read_playlists().await?;
        let protected = playlists.referenced_ids();

        let mut history = store.read_partition(Partition::History).await?;
        let mut unprotected: Vec<(String, DateTime<Utc>)> = history
            .iter()
            .filter(|(id, _)| !protected.contains(*id))
            .map(|(id, record)| (id.clone(), record.watched_at))
            .collect();
        unprotected.sort_by_key(|(_, watched_at)| *watched_at);

        let count = quota_eviction_count(unprotected.len());
        if count == 0 {
            return Ok(QuotaOutcome::Evicted { removed: 0 });
        }

        for (id, _) in unprotected.iter().take(count) {
            history.remove(id);
        }
        store.write_partition(Partition::History, &history).await?;

        info!(
            operation = "quota_eviction",
            removed = count,
            at = %now,
            "Quota pressure eviction complete"
        );
        Ok(QuotaOutcome::Evicted { removed: count })
    }
}

/// `min(U, max(10, floor(0.3 * U)))` for U unprotected records.
fn quota_eviction_count(unprotected: usize) -> usize {
    let fractional = (unprotected as f64 * QUOTA_EVICTION_FRACTION).floor() as usize;
    fractional.max(QUOTA_EVICTION_MIN).min(unprotected)
}

fn format_gap(gap: Duration) -> String {
    format!("{}m{}s", gap.num_minutes(), gap.num_seconds() % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use chrono::TimeZone;
    use std::sync::Arc;
    use watchvault_config::default_lifecycle_config;
    use watchvault_models::Detection;

    fn store() -> RecordStore {
        RecordStore::new(Arc::new(MemoryBackend::new()))
    }

    fn manager() -> LifecycleManager {
        LifecycleManager::new(default_lifecycle_config())
    }

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    const DAY_MS: i64 = 86_400_000;

    async fn seed_records(store: &RecordStore, count: usize, ms: i64) -> Vec<String> {
        let mut ids = Vec::new();
        for i in 0..count {
            let detection = Detection::new(
                format!("https://example.com/videos/clip-{}", i),
                format!("Clip Number {}", i),
            );
            let id = store
                .submit_detection_at(&detection, at(ms + i as i64))
                .await
                .unwrap()
                .unwrap();
            ids.push(id);
        }
        ids
    }

    #[test]
    fn test_quota_eviction_count_floor_and_clamp() {
        assert_eq!(quota_eviction_count(0), 0);
        assert_eq!(quota_eviction_count(5), 5); // clamped to available
        assert_eq!(quota_eviction_count(10), 10);
        assert_eq!(quota_eviction_count(20), 10); // floor(6) < min 10
        assert_eq!(quota_eviction_count(100), 30);
        assert_eq!(quota_eviction_count(101), 30); // floor(30.3)
    }

    #[tokio::test]
    async fn test_retention_off_skips() {
        let store = store();
        let outcome = manager()
            .run_cleanup_cycle(&store, at(DAY_MS * 10))
            .await
            .unwrap();
        assert_eq!(outcome, CycleOutcome::Skipped(SkipReason::RetentionOff));
        // Skipped cycles must not record a cleanup timestamp.
        assert!(store.settings().await.unwrap().last_cleanup_at.is_none());
    }

    #[tokio::test]
    async fn test_protection_invariant_exact_counts() {
        let store = store();
        let ids = seed_records(&store, 8, 1_000).await;
        for id in &ids[..3] {
            store.add_to_playlist(id, "keep").await.unwrap();
        }
        store
            .set_retention_policy(RetentionPolicy::Days(1))
            .await
            .unwrap();

        // All records are backdated far past the 1-day cutoff.
        let outcome = manager()
            .run_cleanup_cycle(&store, at(DAY_MS * 30))
            .await
            .unwrap();
        assert_eq!(outcome, CycleOutcome::AgeEvicted { removed: 5 });

        let history = store.read_partition(Partition::History).await.unwrap();
        let library = store.read_partition(Partition::Library).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(library.len(), 3);
        for id in &ids[..3] {
            assert!(history.contains_key(id), "protected id evicted: {}", id);
            assert!(library.contains_key(id));
        }
    }

    #[tokio::test]
    async fn test_library_size_unchanged_by_age_eviction() {
        let store = store();
        let ids = seed_records(&store, 6, 1_000).await;
        store.add_to_playlist(&ids[0], "keep").await.unwrap();
        store
            .set_retention_policy(RetentionPolicy::Days(7))
            .await
            .unwrap();

        let before = store.read_partition(Partition::Library).await.unwrap().len();
        manager()
            .run_cleanup_cycle(&store, at(DAY_MS * 365))
            .await
            .unwrap();
        let after = store.read_partition(Partition::Library).await.unwrap().len();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_fresh_records_survive_age_eviction() {
        let store = store();
        seed_records(&store, 4, DAY_MS * 29).await;
        store
            .set_retention_policy(RetentionPolicy::Days(7))
            .await
            .unwrap();

        let outcome = manager()
            .run_cleanup_cycle(&store, at(DAY_MS * 30))
            .await
            .unwrap();
        assert_eq!(outcome, CycleOutcome::AgeEvicted { removed: 0 });
        // A cycle that evicts nothing still records its timestamp.
        assert_eq!(
            store.settings().await.unwrap().last_cleanup_at,
            Some(at(DAY_MS * 30))
        );
    }

    #[tokio::test]
    async fn test_cleanup_guard_one_evaluated_cycle_per_hour() {
        let store = store();
        seed_records(&store, 3, 1_000).await;
        store
            .set_retention_policy(RetentionPolicy::Days(1))
            .await
            .unwrap();

        let manager = manager();
        let first = manager
            .run_cleanup_cycle(&store, at(DAY_MS * 10))
            .await
            .unwrap();
        assert!(matches!(first, CycleOutcome::AgeEvicted { .. }));

        // 30 minutes later: skipped, and the recorded timestamp is kept.
        let second = manager
            .run_cleanup_cycle(&store, at(DAY_MS * 10 + 1_800_000))
            .await
            .unwrap();
        assert_eq!(second, CycleOutcome::Skipped(SkipReason::RanRecently));
        assert_eq!(
            store.settings().await.unwrap().last_cleanup_at,
            Some(at(DAY_MS * 10))
        );

        // Just past the hour: evaluated again.
        let third = manager
            .run_cleanup_cycle(&store, at(DAY_MS * 10 + 3_600_001))
            .await
            .unwrap();
        assert!(matches!(third, CycleOutcome::AgeEvicted { .. }));
    }

    #[tokio::test]
    async fn test_quota_eviction_oldest_first_skips_protected() {
        let backend = Arc::new(MemoryBackend::with_quota(1));
        let store = RecordStore::new(backend);
        let ids = seed_records(&store, 15, 1_000).await;
        // Protect the three oldest so eviction has to reach past them.
        for id in &ids[..3] {
            store.add_to_playlist(id, "keep").await.unwrap();
        }

        let outcome = manager()
            .run_quota_check(&store, at(DAY_MS))
            .await
            .unwrap();
        // U = 12 unprotected, max(10, floor(3.6)) = 10 evicted.
        assert_eq!(outcome, QuotaOutcome::Evicted { removed: 10 });

        let history = store.read_partition(Partition::History).await.unwrap();
        assert_eq!(history.len(), 5);
        for id in &ids[..3] {
            assert!(history.contains_key(id));
        }
        // The two newest unprotected records survive.
        assert!(history.contains_key(&ids[13]));
        assert!(history.contains_key(&ids[14]));
    }

    #[tokio::test]
    async fn test_quota_check_without_quota_is_noop() {
        let store = store();
        seed_records(&store, 3, 1_000).await;
        let outcome = manager().run_quota_check(&store, at(DAY_MS)).await.unwrap();
        assert_eq!(outcome, QuotaOutcome::NoQuotaConfigured);
        assert_eq!(
            store.read_partition(Partition::History).await.unwrap().len(),
            3
        );
    }

    #[tokio::test]
    async fn test_quota_eviction_runs_with_retention_off() {
        let backend = Arc::new(MemoryBackend::with_quota(1));
        let store = RecordStore::new(backend);
        seed_records(&store, 4, 1_000).await;
        // Retention stays off; pressure relief is independent.
        let outcome = manager().run_quota_check(&store, at(DAY_MS)).await.unwrap();
        assert_eq!(outcome, QuotaOutcome::Evicted { removed: 4 });
    }
}
