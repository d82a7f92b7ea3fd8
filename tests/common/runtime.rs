//! In-process job runtime for end-to-end tests.
//!
//! Each test gets its own database directory, fake lookup service and
//! recording email sender. Timings are shrunk so retries and polling
//! happen in milliseconds.

use super::constants::*;
use super::fakes::RecordingSender;
use super::mealdb::FakeMealDb;
use recipe_jobs_server::config::{
    AppConfig, CliConfig, FileConfig, ImportConfig, RecurringJobConfig, RetryConfig,
    WorkersConfig,
};
use recipe_jobs_server::content_store::SqliteContentStore;
use recipe_jobs_server::import::MealDbClient;
use recipe_jobs_server::job_store::{
    Job, JobKey, JobStatus, JobStore, RetryPolicy, SqliteJobStore,
};
use recipe_jobs_server::{Collaborators, JobsRuntime, JobsService};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

type Seed = Box<dyn FnOnce(&SqliteJobStore, &SqliteContentStore)>;

pub struct TestRuntimeBuilder {
    file_config: FileConfig,
    seed: Option<Seed>,
}

impl TestRuntimeBuilder {
    /// Register recurring jobs instead of none.
    pub fn recurring(mut self, entries: &[(&str, &str, &str)]) -> Self {
        self.file_config.recurring = Some(
            entries
                .iter()
                .map(|(job_id, job_type, cron)| RecurringJobConfig {
                    job_id: job_id.to_string(),
                    job_type: job_type.to_string(),
                    cron: cron.to_string(),
                    payload: None,
                })
                .collect(),
        );
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        if let Some(retry) = self.file_config.retry.as_mut() {
            retry.max_attempts = Some(max_attempts);
        }
        self
    }

    /// Write to the stores before the runtime starts.
    pub fn seed(
        mut self,
        seed: impl FnOnce(&SqliteJobStore, &SqliteContentStore) + 'static,
    ) -> Self {
        self.seed = Some(Box::new(seed));
        self
    }

    pub async fn spawn(self) -> TestRuntime {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mealdb = FakeMealDb::spawn().await;

        let mut file_config = self.file_config;
        file_config.import = Some(ImportConfig {
            base_url: Some(mealdb.base_url.clone()),
            timeout_secs: Some(2),
        });
        let cli = CliConfig {
            db_dir: Some(temp_dir.path().to_path_buf()),
            metrics_port: 0,
            ..Default::default()
        };
        let config = AppConfig::resolve(&cli, Some(file_config)).expect("Invalid test config");

        let job_store = Arc::new(
            SqliteJobStore::new(config.jobs_db_path(), RetryPolicy::new(&config.retry))
                .expect("Failed to open job store"),
        );
        let content_store = Arc::new(
            SqliteContentStore::new(config.content_db_path())
                .expect("Failed to open content store"),
        );
        seed_content(&content_store);
        if let Some(seed) = self.seed {
            seed(&job_store, &content_store);
        }

        let emails = Arc::new(RecordingSender::default());
        let mut test_runtime = TestRuntime {
            runtime: None,
            config,
            job_store,
            content_store,
            emails,
            mealdb,
            _temp_dir: temp_dir,
        };
        test_runtime.start().await;
        test_runtime
    }
}

fn seed_content(store: &SqliteContentStore) {
    store
        .add_user(USER_WITH_CONTACT, Some("Ada"), Some(USER_WITH_CONTACT_EMAIL))
        .unwrap();
    store.add_user(USER_WITHOUT_CONTACT, Some("Bob"), None).unwrap();
    for (id, title) in [
        (ITEM_A_ID, ITEM_A_TITLE),
        (ITEM_B_ID, ITEM_B_TITLE),
        (ITEM_C_ID, ITEM_C_TITLE),
    ] {
        store.add_item(id, title).unwrap();
    }
}

/// A running job runtime backed by throwaway databases.
pub struct TestRuntime {
    runtime: Option<JobsRuntime>,
    pub config: AppConfig,
    pub job_store: Arc<SqliteJobStore>,
    pub content_store: Arc<SqliteContentStore>,
    pub emails: Arc<RecordingSender>,
    pub mealdb: FakeMealDb,
    _temp_dir: TempDir,
}

impl TestRuntime {
    pub fn builder() -> TestRuntimeBuilder {
        TestRuntimeBuilder {
            file_config: FileConfig {
                retry: Some(RetryConfig {
                    max_attempts: Some(3),
                    initial_backoff_ms: Some(20),
                    max_backoff_ms: Some(200),
                    multiplier: Some(2.0),
                    jitter_ratio: Some(0.0),
                }),
                workers: Some(WorkersConfig {
                    poll_interval_ms: Some(20),
                    shutdown_grace_secs: Some(2),
                    max_tick_interval_secs: Some(1),
                    job_types: None,
                }),
                recurring: Some(Vec::new()),
                ..Default::default()
            },
            seed: None,
        }
    }

    pub async fn spawn() -> Self {
        Self::builder().spawn().await
    }

    async fn start(&mut self) {
        let lookup = MealDbClient::new(
            &self.config.import.base_url,
            Duration::from_secs(self.config.import.timeout_secs),
        )
        .expect("Failed to build lookup client");

        let runtime = JobsRuntime::start(
            &self.config,
            self.job_store.clone(),
            Collaborators {
                content_store: self.content_store.clone(),
                lookup: Arc::new(lookup),
                email_sender: self.emails.clone(),
            },
            CancellationToken::new(),
        )
        .await
        .expect("Failed to start job runtime");
        self.runtime = Some(runtime);
    }

    pub fn service(&self) -> &JobsService {
        &self.runtime.as_ref().expect("Runtime not running").service
    }

    /// Stop the runtime and start a fresh one over the same databases, as a
    /// process restart would.
    pub async fn restart(&mut self) {
        self.stop().await;
        self.start().await;
    }

    pub async fn stop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown().await;
        }
    }

    pub fn job(&self, key: &JobKey) -> Option<Job> {
        self.job_store.get_job(key).unwrap()
    }

    /// Poll until the job reaches `status`.
    ///
    /// # Panics
    ///
    /// Panics if it does not get there within `JOB_WAIT_TIMEOUT_MS`.
    pub async fn wait_for_status(&self, key: &JobKey, status: JobStatus) -> Job {
        let deadline = std::time::Instant::now() + Duration::from_millis(JOB_WAIT_TIMEOUT_MS);
        loop {
            let job = self.job(key);
            if let Some(job) = &job {
                if job.status == status {
                    return job.clone();
                }
            }
            if std::time::Instant::now() > deadline {
                panic!(
                    "Job {} did not reach {:?} in time, last seen: {:#?}",
                    key, status, job
                );
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Poll until `condition` holds.
    pub async fn wait_until(&self, what: &str, mut condition: impl FnMut(&Self) -> bool) {
        let deadline = std::time::Instant::now() + Duration::from_millis(JOB_WAIT_TIMEOUT_MS);
        while !condition(self) {
            if std::time::Instant::now() > deadline {
                panic!("Timed out waiting for {}", what);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}
