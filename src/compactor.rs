use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;

pub const COMPACT_INTERVAL: Duration = Duration::from_secs(30);

/// Background task: rewrite the WAL whenever enough appends have piled up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_due(&engine, threshold).await;
    }
}

/// One compactor check. Returns true if the WAL was rewritten.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        debug!("compactor: {appends} appends since last compaction, below {threshold}");
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            info!("compactor: compacted after {appends} appends");
            true
        }
        Err(e) => {
            warn!("compactor: compaction failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::parse_date;
    use crate::wal::Wal;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("sharebnb_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn below_threshold_is_left_alone() {
        let path = test_wal_path("below.wal");
        let engine = Engine::new(path.clone(), Duration::from_secs(1)).unwrap();
        engine
            .register_property(Ulid::new(), Ulid::new(), 10)
            .await
            .unwrap();

        assert!(!compact_if_due(&engine, 5).await);
        assert_eq!(engine.wal_appends_since_compact().await, 1);
    }

    #[tokio::test]
    async fn churn_is_compacted_away() {
        let path = test_wal_path("churn.wal");
        let engine = Engine::new(path.clone(), Duration::from_secs(1)).unwrap();
        let pid = Ulid::new();
        engine.register_property(pid, Ulid::new(), 10).await.unwrap();
        let day = parse_date("2024-09-01").unwrap();
        for _ in 0..5 {
            let b = engine
                .create_booking(pid, Ulid::new(), day, day)
                .await
                .unwrap();
            engine.delete_booking(b.id).await.unwrap();
        }

        assert!(compact_if_due(&engine, 10).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        assert_eq!(Wal::replay(&path).unwrap().len(), 1);
    }

    #[test]
    fn zero_threshold_compacts_empty_log() {
        let path = test_wal_path("empty.wal");
        tokio_test::block_on(async {
            let engine = Engine::new(path.clone(), Duration::from_secs(1)).unwrap();
            assert!(compact_if_due(&engine, 0).await);
        });
        assert!(Wal::replay(&path).unwrap().is_empty());
    }
}
