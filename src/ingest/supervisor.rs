use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::feed_loop::{FeedLoop, FetchEvent, LoopContext};
use super::pipeline::Ingestor;
use crate::cache::RetrievalCache;
use crate::config::Config;
use crate::content::ArticleParser;
use crate::feed::{dates, FaviconFinder, FeedSource};
use crate::storage::{timed, Database};

#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The supervisor has returned or was never started
    #[error("fetch supervisor is not running")]
    Stopped,
}

enum Command {
    Pause(oneshot::Sender<()>),
    Resume(oneshot::Sender<()>),
}

/// Pauses and resumes a running [`Supervisor`].
///
/// Requests sent before [`Supervisor::run`] starts are queued and served once
/// it does.
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    commands: mpsc::Sender<Command>,
}

impl SupervisorHandle {
    /// Stop every feed loop; returns once all of them have exited.
    pub async fn pause(&self) -> Result<(), SupervisorError> {
        self.request(Command::Pause).await
    }

    /// Re-enumerate users and feeds and start a loop for each.
    pub async fn resume(&self) -> Result<(), SupervisorError> {
        self.request(Command::Resume).await
    }

    async fn request(
        &self,
        command: impl FnOnce(oneshot::Sender<()>) -> Command,
    ) -> Result<(), SupervisorError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.commands
            .send(command(ack_tx))
            .await
            .map_err(|_| SupervisorError::Stopped)?;
        ack_rx.await.map_err(|_| SupervisorError::Stopped)
    }
}

/// One set of feed loops sharing a cancellation token.
struct Generation {
    cancel: CancellationToken,
    tasks: JoinSet<()>,
}

impl Generation {
    /// Cancel every loop and wait for all of them to exit.
    async fn drain(mut self) {
        self.cancel.cancel();
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                if e.is_panic() {
                    tracing::error!(error = %e, "Feed loop panicked");
                }
            }
        }
    }
}

/// Starts one [`FeedLoop`] per (user, feed) and stops them on pause or
/// shutdown.
pub struct Supervisor {
    db: Database,
    ctx: LoopContext,
    commands: mpsc::Receiver<Command>,
    handle: SupervisorHandle,
}

impl Supervisor {
    pub fn new(
        db: Database,
        cache: Arc<dyn RetrievalCache>,
        source: Arc<dyn FeedSource>,
        favicons: Arc<dyn FaviconFinder>,
        parser: Option<Arc<dyn ArticleParser>>,
        config: Arc<Config>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(8);
        let ingestor = Ingestor::new(db.clone(), cache, parser, config);
        Self {
            db,
            ctx: LoopContext {
                source,
                favicons,
                ingestor,
                events: None,
            },
            commands: rx,
            handle: SupervisorHandle { commands: tx },
        }
    }

    /// Report pipeline runs and fetch failures on `events`.
    ///
    /// Events are dropped when the channel is full.
    pub fn with_events(mut self, events: mpsc::Sender<FetchEvent>) -> Self {
        self.ctx.events = Some(events);
        self
    }

    pub fn handle(&self) -> SupervisorHandle {
        self.handle.clone()
    }

    /// Run until `cancel` fires, then drain the running generation.
    pub async fn run(self, cancel: CancellationToken) {
        let Self {
            db,
            ctx,
            mut commands,
            handle,
        } = self;
        // Handles only ever send; dropping ours lets `recv` see the last one go.
        drop(handle);

        dates::register_extra_formats();

        let mut running = Some(start_generation(&db, &ctx, &cancel).await);
        tracing::info!("Fetch supervisor started");

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                command = commands.recv() => {
                    let Some(command) = command else {
                        // Every handle is gone; keep running until cancelled.
                        cancel.cancelled().await;
                        break;
                    };
                    match command {
                        Command::Pause(ack) => {
                            match running.take() {
                                Some(generation) => {
                                    tracing::info!("Pausing fetching");
                                    generation.drain().await;
                                    tracing::info!("Fetching paused");
                                }
                                None => tracing::debug!("Pause requested while already paused"),
                            }
                            let _ = ack.send(());
                        }
                        Command::Resume(ack) => {
                            if running.is_some() {
                                tracing::debug!("Resume requested while running");
                            } else {
                                tracing::info!("Resuming fetching");
                                running = Some(start_generation(&db, &ctx, &cancel).await);
                            }
                            let _ = ack.send(());
                        }
                    }
                }
            }
        }

        if let Some(generation) = running {
            generation.drain().await;
        }
        tracing::info!("Fetch supervisor stopped");
    }
}

/// Enumerate users and feeds fresh from storage and spawn their loops.
///
/// Storage failures are logged and leave the affected users without loops.
async fn start_generation(db: &Database, ctx: &LoopContext, parent: &CancellationToken) -> Generation {
    let mut generation = Generation {
        cancel: parent.child_token(),
        tasks: JoinSet::new(),
    };

    let users = match timed(db.get_users()).await {
        Ok(users) => users,
        Err(e) => {
            tracing::error!(error = %e, "Failed to enumerate users");
            return generation;
        }
    };

    for user in users {
        ctx.ingestor.cache().register_user(&user.id);

        let tree = match timed(db.get_folder_tree(&user.id)).await {
            Ok(tree) => tree,
            Err(e) => {
                tracing::error!(user_id = %user.id, error = %e, "Failed to load folder tree");
                continue;
            }
        };

        let mut started = 0usize;
        for feed in tree.feeds() {
            let feed_loop = FeedLoop::new(user.id.clone(), feed.clone(), ctx.clone());
            generation.tasks.spawn(feed_loop.run(generation.cancel.clone()));
            started += 1;
        }
        tracing::debug!(user_id = %user.id, feeds = started, "Started feed loops");
    }

    generation
}
