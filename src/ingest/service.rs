use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{ReadArticleCleaner, Supervisor};
use crate::cache::BloomCache;
use crate::config::Config;
use crate::storage::Database;

/// The long-running background tasks of a feedpump process.
///
/// Fetching and cleanup share one token; the retrieval cache writer has its
/// own so that its final flush runs only after every feed loop has finished
/// writing.
pub struct IngestService {
    fetch_cancel: CancellationToken,
    persist_cancel: CancellationToken,
    fetching: JoinHandle<()>,
    cleaner: JoinHandle<()>,
    persist: JoinHandle<()>,
}

impl IngestService {
    /// Start the cache writer, the read article cleaner and `supervisor`.
    pub fn spawn(
        db: &Database,
        cache: Arc<BloomCache>,
        supervisor: Supervisor,
        config: &Config,
    ) -> Self {
        let fetch_cancel = CancellationToken::new();
        let persist_cancel = CancellationToken::new();

        let persist = tokio::spawn(cache.run_persist_loop(
            db.clone(),
            config.retrieval_cache_write_interval(),
            persist_cancel.clone(),
        ));
        let cleaner =
            tokio::spawn(ReadArticleCleaner::new(db.clone(), config).run(fetch_cancel.clone()));
        let fetching = tokio::spawn(supervisor.run(fetch_cancel.clone()));

        Self {
            fetch_cancel,
            persist_cancel,
            fetching,
            cleaner,
            persist,
        }
    }

    /// Stop fetching, wait for every loop to exit, then write the retrieval
    /// cache one last time.
    pub async fn shutdown(self) {
        self.fetch_cancel.cancel();
        for (name, task) in [("supervisor", self.fetching), ("cleaner", self.cleaner)] {
            if let Err(e) = task.await {
                tracing::error!(task = name, error = %e, "Task failed during shutdown");
            }
        }

        self.persist_cancel.cancel();
        if let Err(e) = self.persist.await {
            tracing::error!(task = "cache", error = %e, "Task failed during shutdown");
        }
    }
}
