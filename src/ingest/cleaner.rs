use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::storage::{timed, Database};

/// Periodic removal of read articles past their retention.
#[derive(Clone)]
pub struct ReadArticleCleaner {
    db: Database,
    retention_days: u64,
    interval: std::time::Duration,
}

impl ReadArticleCleaner {
    pub fn new(db: Database, config: &Config) -> Self {
        Self {
            db,
            retention_days: config.read_article_retention_days,
            interval: config.gc_interval(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.retention_days > 0
    }

    /// Delete read articles retrieved more than the retention ago.
    pub async fn run_once(&self) -> u64 {
        let cutoff = i64::try_from(self.retention_days)
            .ok()
            .and_then(ChronoDuration::try_days)
            .and_then(|retention| Utc::now().checked_sub_signed(retention))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        match timed(self.db.delete_read_articles_before(cutoff)).await {
            Ok(deleted) => {
                if deleted > 0 {
                    tracing::info!(deleted, cutoff = %cutoff, "Removed old read articles");
                }
                deleted
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to remove old read articles");
                0
            }
        }
    }

    /// Sweep every interval until cancelled. Returns immediately when
    /// retention is disabled.
    pub async fn run(self, cancel: CancellationToken) {
        if !self.is_enabled() {
            tracing::debug!("Read article cleanup disabled");
            return;
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.run_once().await;
                }
            }
        }
    }
}
