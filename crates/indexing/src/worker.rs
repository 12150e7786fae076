//! Job polling worker
//!
//! Claims Pending jobs from the job table one at a time and runs them to
//! completion. Jobs survive restarts: on startup, Running jobs with no
//! progress for longer than the recovery lease are failed and stale claims
//! on Pending jobs are released. Jobs other live workers hold are untouched.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, instrument, warn};

use secondbrain_common::cancel::CancelSignal;
use secondbrain_common::models::IndexingJob;
use secondbrain_common::store::JobStore;

use crate::errors::Result;
use crate::pipeline::IndexingPipeline;

const MAX_FAILURES: u32 = 5;
const CIRCUIT_BREAK_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_RECOVERY_LEASE: Duration = Duration::from_secs(900);

pub struct IndexingWorker {
    pipeline: Arc<IndexingPipeline>,
    jobs: Arc<dyn JobStore>,
    poll_interval: Duration,
    recovery_lease: Duration,
}

impl IndexingWorker {
    pub fn new(pipeline: Arc<IndexingPipeline>, jobs: Arc<dyn JobStore>, poll_interval: Duration) -> Self {
        Self {
            pipeline,
            jobs,
            poll_interval,
            recovery_lease: DEFAULT_RECOVERY_LEASE,
        }
    }

    /// How long a job may go without progress before it counts as abandoned
    pub fn with_recovery_lease(mut self, lease: Duration) -> Self {
        self.recovery_lease = lease;
        self
    }

    /// Fail jobs a dead worker left Running; returns how many
    pub async fn recover(&self) -> Result<u64> {
        let abandoned = self
            .jobs
            .abandon_stale_jobs("worker stopped while the job was running", self.recovery_lease)
            .await?;
        if abandoned > 0 {
            warn!(
                abandoned,
                lease_secs = self.recovery_lease.as_secs(),
                "Failed jobs abandoned by a previous worker"
            );
        }
        Ok(abandoned)
    }

    /// Claim and run the oldest Pending job, if any
    #[instrument(skip(self))]
    pub async fn poll_once(&self) -> Result<Option<IndexingJob>> {
        let Some(job) = self.jobs.claim_next_pending().await? else {
            return Ok(None);
        };
        info!(job_id = %job.id, user_id = %job.user_id, "Claimed indexing job");

        // shutdown waits for the running job; only a cancel request stops it early
        let job = self.pipeline.run_job(job, &CancelSignal::never()).await?;
        Ok(Some(job))
    }

    /// Poll until `shutdown` fires
    pub async fn run(&self, shutdown: CancelSignal) -> Result<()> {
        info!(poll_interval_ms = self.poll_interval.as_millis() as u64, "Indexing worker ready");
        let mut consecutive_failures = 0;

        loop {
            if consecutive_failures >= MAX_FAILURES {
                warn!(failures = consecutive_failures, "Circuit breaker open, pausing...");
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(CIRCUIT_BREAK_DURATION) => {}
                }
                consecutive_failures = 0;
                info!("Circuit breaker reset, resuming...");
            }

            if shutdown.is_cancelled() {
                break;
            }

            match self.poll_once().await {
                Ok(Some(_)) => {
                    consecutive_failures = 0;
                    // more work may be queued
                    continue;
                }
                Ok(None) => consecutive_failures = 0,
                Err(e) => {
                    consecutive_failures += 1;
                    error!(error = %e, failures = consecutive_failures, "Indexing poll failed");
                }
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!("Indexing worker stopped");
        Ok(())
    }
}
