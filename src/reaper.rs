use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::{Engine, SweepOptions, now_ms};

/// Background task that periodically deletes reservations whose retention
/// window has passed, together with their slot entries. With `dry_run` set
/// it only reports what a real sweep would remove.
pub async fn run_reaper(engine: Arc<Engine>, every: Duration, opts: SweepOptions) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        match engine.sweep_expired(now_ms(), &opts).await {
            Ok(report) if report.matched > 0 => {
                if opts.dry_run {
                    info!("retention sweep (dry run): {} expired", report.matched);
                } else {
                    info!("retention sweep: deleted {} expired", report.deleted);
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("retention sweep failed: {e}"),
        }
    }
}

/// Background task that compacts the WAL once enough appends have
/// accumulated since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends >= threshold {
            match engine.compact_wal().await {
                Ok(()) => info!("WAL compacted after {appends} appends"),
                Err(e) => tracing::warn!("WAL compaction failed: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Minutes, ReservationDraft, ReservationKind};
    use crate::notify::NotifyHub;
    use chrono::NaiveDate;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("zakazi_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn draft(date_s: &str, start: Minutes) -> ReservationDraft {
        ReservationDraft {
            kind: ReservationKind::Break,
            date: NaiveDate::parse_from_str(date_s, "%Y-%m-%d").unwrap(),
            start,
            duration_min: 30,
            card_color: None,
        }
    }

    #[tokio::test]
    async fn sweep_cycle_reaps_only_expired() {
        let path = test_wal_path("reap_expired.wal");
        let engine = Arc::new(Engine::new(&path, 90, Arc::new(NotifyHub::new())).unwrap());

        // 2020-01-02 (Thursday) is far past its retention window.
        let old = engine
            .create_reservation(Ulid::new(), draft("2020-01-02", 600))
            .await
            .unwrap();
        let fresh = engine
            .create_reservation(Ulid::new(), draft("2031-06-12", 600))
            .await
            .unwrap();

        let report = engine
            .sweep_expired(now_ms(), &SweepOptions::default())
            .await
            .unwrap();
        assert_eq!(report.deleted, 1);
        assert!(engine.get_reservation(old).await.is_none());
        assert!(engine.get_reservation(fresh).await.is_some());

        // Re-running is safe and finds nothing.
        let report = engine
            .sweep_expired(now_ms(), &SweepOptions::default())
            .await
            .unwrap();
        assert_eq!(report.matched, 0);
    }

    #[tokio::test]
    async fn compactor_threshold_respected() {
        let path = test_wal_path("compact_threshold.wal");
        let engine = Arc::new(Engine::new(&path, 90, Arc::new(NotifyHub::new())).unwrap());

        engine
            .create_reservation(Ulid::new(), draft("2031-06-12", 600))
            .await
            .unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 1);

        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);
    }
}
