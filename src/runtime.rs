//! Process wiring: handlers, worker pools and the recurring scheduler.

use crate::config::AppConfig;
use crate::content_store::ContentStore;
use crate::import::{ImportHandler, RecipeLookup};
use crate::job_store::{with_job_store, JobStore};
use crate::job_types;
use crate::maintenance::PruneJobsHandler;
use crate::recommendations::{EmailSender, RecommendationDispatcher, RecommendationFanout};
use crate::scheduler::RecurringScheduler;
use crate::service::JobsService;
use crate::trending::{TrendingAggregator, TrendingCache};
use crate::workers::{JobHandler, WorkerPool};
use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// External collaborators the handlers talk to.
pub struct Collaborators {
    pub content_store: Arc<dyn ContentStore>,
    pub lookup: Arc<dyn RecipeLookup>,
    pub email_sender: Arc<dyn EmailSender>,
}

/// A running set of workers and the scheduler feeding them.
pub struct JobsRuntime {
    pub service: JobsService,
    pub trending_cache: Arc<TrendingCache>,
    pool: WorkerPool,
    scheduler_handle: JoinHandle<()>,
    shutdown_token: CancellationToken,
}

impl JobsRuntime {
    /// Recover jobs interrupted by a previous run, register the configured
    /// recurring jobs and start one worker pool per job type.
    pub async fn start(
        config: &AppConfig,
        job_store: Arc<dyn JobStore>,
        collaborators: Collaborators,
        shutdown_token: CancellationToken,
    ) -> Result<Self> {
        let boot = Utc::now();
        let recovered = with_job_store(&job_store, move |s| s.recover_interrupted(boot))
            .await
            .context("Failed to recover interrupted jobs")?;
        if recovered > 0 {
            warn!("Recovered {} jobs interrupted by a previous run", recovered);
        }

        let trending_cache = Arc::new(TrendingCache::new());
        let handlers = build_handlers(config, &job_store, &collaborators, &trending_cache);

        let pool = WorkerPool::new(
            Arc::clone(&job_store),
            config.workers.clone(),
            shutdown_token.child_token(),
        );
        for (job_type, handler) in handlers {
            pool.start_configured(job_type, handler)?;
        }

        let scheduler = Arc::new(RecurringScheduler::new(
            Arc::clone(&job_store),
            config.workers.max_tick_interval(),
        ));
        scheduler
            .schedule_async(&config.recurring)
            .await
            .context("Failed to register recurring jobs")?;

        let ticker = Arc::clone(&scheduler);
        let ticker_token = shutdown_token.child_token();
        let scheduler_handle = tokio::spawn(async move { ticker.run(ticker_token).await });

        let service = JobsService::new(job_store, scheduler, Arc::clone(&trending_cache));
        info!("Job runtime started");

        Ok(Self {
            service,
            trending_cache,
            pool,
            scheduler_handle,
            shutdown_token,
        })
    }

    /// Stop the scheduler, then drain the worker pools.
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();
        if let Err(e) = self.scheduler_handle.await {
            warn!("Scheduler task ended abnormally: {}", e);
        }
        self.pool.shutdown().await;
    }
}

fn build_handlers(
    config: &AppConfig,
    job_store: &Arc<dyn JobStore>,
    collaborators: &Collaborators,
    trending_cache: &Arc<TrendingCache>,
) -> Vec<(&'static str, Arc<dyn JobHandler>)> {
    let content_store = &collaborators.content_store;
    vec![
        (
            job_types::IMPORT_RECIPE,
            Arc::new(ImportHandler::new(
                Arc::clone(&collaborators.lookup),
                Arc::clone(content_store),
            )) as Arc<dyn JobHandler>,
        ),
        (
            job_types::TRENDING_AGGREGATE,
            Arc::new(TrendingAggregator::new(
                Arc::clone(content_store),
                Arc::clone(trending_cache),
                config.trending.clone(),
            )),
        ),
        (
            job_types::RECOMMENDATIONS_FANOUT,
            Arc::new(RecommendationFanout::new(
                Arc::clone(content_store),
                Arc::clone(job_store),
            )),
        ),
        (
            job_types::RECOMMENDATIONS_SEND,
            Arc::new(RecommendationDispatcher::new(
                Arc::clone(content_store),
                Arc::clone(trending_cache),
                Arc::clone(&collaborators.email_sender),
                config.recommendations.clone(),
                config.trending.clone(),
            )),
        ),
        (
            job_types::PRUNE_JOBS,
            Arc::new(PruneJobsHandler::new(
                Arc::clone(job_store),
                config.retention.clone(),
            )),
        ),
    ]
}
