//! Service container: wires every component for one channel and owns
//! their lifecycle.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::status::StatusService;
use crate::Result;
use crate::catalog::{CatalogSource, CatalogSync, HelixClient, LiveStatusSource};
use crate::chat::{ChatRecorder, TwitchChatRecorder};
use crate::config::ArchiverConfig;
use crate::database::repositories::{
    RecordingRepository, SqlxChatRepository, SqlxRecordingRepository, SqlxStateStore, StateStore,
};
use crate::database::{DbPool, init_pool, run_migrations};
use crate::engine::{
    CircuitBreaker, ConcurrencyLimiter, EmaTracker, Orchestrator, OrchestratorDeps,
};
use crate::executors::{
    CommandPublishExecutor, FetchExecutor, PublishExecutor, YtDlpFetchExecutor,
};
use crate::live::{LivePoller, ReconciliationEngine};

/// External collaborators. Swapped for fakes in tests.
pub struct Collaborators {
    pub catalog: Arc<dyn CatalogSource>,
    pub live_status: Arc<dyn LiveStatusSource>,
    pub fetcher: Arc<dyn FetchExecutor>,
    pub publisher: Option<Arc<dyn PublishExecutor>>,
    pub chat: Arc<dyn ChatRecorder>,
}

/// All services for one channel.
pub struct ServiceContainer {
    pub pool: DbPool,
    pub config: ArchiverConfig,
    pub orchestrator: Arc<Orchestrator>,
    pub catalog_sync: Arc<CatalogSync>,
    pub status: Arc<StatusService>,
    poller: Mutex<Option<LivePoller>>,
    tasks: Mutex<JoinSet<()>>,
    cancellation_token: CancellationToken,
}

impl ServiceContainer {
    /// Open the database and build the default collaborators from `config`.
    pub async fn new(config: ArchiverConfig) -> Result<Self> {
        let pool = init_pool(&config.database_url).await?;
        run_migrations(&pool).await?;

        let mut helix = HelixClient::new(config.helix.clone())?;
        if let Some(user_id) = &config.helix.user_id {
            helix = helix.with_known_user(config.channel.clone(), user_id.clone());
        }
        let helix = Arc::new(helix);

        let chat_repo = Arc::new(SqlxChatRepository::new(pool.clone()));
        let collaborators = Collaborators {
            catalog: helix.clone(),
            live_status: helix,
            fetcher: Arc::new(YtDlpFetchExecutor::new(config.fetch.clone())),
            publisher: config.publish.clone().map(|publish| {
                Arc::new(CommandPublishExecutor::new(publish)) as Arc<dyn PublishExecutor>
            }),
            chat: Arc::new(TwitchChatRecorder::new(config.chat.clone(), chat_repo)),
        };

        Self::with_collaborators(pool, config, collaborators).await
    }

    /// Build on an already migrated pool with the given collaborators.
    pub async fn with_collaborators(
        pool: DbPool,
        config: ArchiverConfig,
        collaborators: Collaborators,
    ) -> Result<Self> {
        info!(channel = %config.channel, "Initializing service container");
        let channel = config.channel.clone();

        let repo: Arc<dyn RecordingRepository> =
            Arc::new(SqlxRecordingRepository::new(pool.clone()));
        let store: Arc<dyn StateStore> = Arc::new(SqlxStateStore::new(pool.clone()));

        let breaker =
            Arc::new(CircuitBreaker::load(channel.clone(), config.breaker.clone(), store.clone()).await);
        let stats = Arc::new(EmaTracker::load(channel.clone(), store).await);
        let limiter = ConcurrencyLimiter::new(config.orchestrator.max_concurrent_downloads);

        let orchestrator = Arc::new(Orchestrator::new(
            channel.clone(),
            config.orchestrator.clone(),
            config.retry.clone(),
            OrchestratorDeps {
                repo: repo.clone(),
                breaker: breaker.clone(),
                limiter: limiter.clone(),
                stats: stats.clone(),
                fetcher: collaborators.fetcher,
                publisher: collaborators.publisher,
            },
        ));

        let catalog_sync = Arc::new(CatalogSync::new(
            channel.clone(),
            config.catalog_sync.clone(),
            collaborators.catalog.clone(),
            repo.clone(),
        ));

        let reconciler = Arc::new(ReconciliationEngine::new(
            channel.clone(),
            config.reconcile.clone(),
            collaborators.catalog,
            pool.clone(),
        ));
        let poller = LivePoller::new(
            channel.clone(),
            config.poller.clone(),
            collaborators.live_status,
            repo.clone(),
            collaborators.chat,
            reconciler,
        );

        let status = Arc::new(StatusService::new(channel, repo, breaker, limiter, stats));

        Ok(Self {
            pool,
            config,
            orchestrator,
            catalog_sync,
            status,
            poller: Mutex::new(Some(poller)),
            tasks: Mutex::new(JoinSet::new()),
            cancellation_token: CancellationToken::new(),
        })
    }

    /// Start the orchestrator, catalog sync and live poller loops.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();

        let orchestrator = self.orchestrator.clone();
        let token = self.cancellation_token.child_token();
        tasks.spawn(async move { orchestrator.run(token).await });

        let sync = self.catalog_sync.clone();
        let token = self.cancellation_token.child_token();
        tasks.spawn(async move { sync.run(token).await });

        match self.poller.lock().take() {
            Some(poller) => {
                let token = self.cancellation_token.child_token();
                tasks.spawn(async move { poller.run(token).await });
            }
            None => warn!("Live poller already started"),
        }

        info!(channel = %self.config.channel, "Services started");
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Cancel every loop and wait for them, bounded by the shutdown timeout.
    pub async fn shutdown(&self) {
        info!("Shutting down services");
        self.cancellation_token.cancel();

        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        // Loops drain their own work first, so allow a little beyond their timeout.
        let timeout = Duration::from_secs(self.config.orchestrator.shutdown_timeout_secs + 5);
        let joined = tokio::time::timeout(timeout, async {
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    warn!(error = %e, "Service task failed");
                }
            }
        })
        .await;

        if joined.is_err() {
            warn!("Timed out waiting for services, aborting the rest");
            tasks.abort_all();
        }
        self.pool.close().await;
        info!("Services stopped");
    }
}
