//! Scrape job execution shared by the scheduler and the job poller.

pub mod schedule;
pub mod slots;

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, error, info, warn};

use self::schedule::Shutdown;
use self::slots::save_slots;
use crate::config::WorkerConfig;
use crate::db::{
    DatabaseError, DatabaseManager, JobCompletion, JobStatus, JobStore, MunicipalityStore,
    SlotStore,
};
use crate::matcher::Matcher;
use crate::sites::{Registry, ScrapeResult, ScrapeStatus};

/// How a single job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub job_id: String,
    pub municipality_id: String,
    pub status: JobStatus,
    pub scrape_status: String,
    pub slots_found: usize,
    pub slots_saved: usize,
    pub matches: usize,
}

pub struct Worker {
    registry: Arc<Registry>,
    municipalities: Arc<dyn MunicipalityStore>,
    slots: Arc<dyn SlotStore>,
    jobs: Arc<dyn JobStore>,
    matcher: Matcher,
    config: WorkerConfig,
    shutdown: Shutdown,
}

impl Worker {
    pub fn new(
        registry: Arc<Registry>,
        db: &DatabaseManager,
        matcher: Matcher,
        config: WorkerConfig,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            registry,
            municipalities: db.municipality_store(),
            slots: db.slot_store(),
            jobs: db.job_store(),
            matcher,
            config,
            shutdown,
        }
    }

    /// Creates and runs one job per enabled municipality, one after another.
    pub async fn run_sweep(&self) -> Vec<JobOutcome> {
        let municipalities = match self.municipalities.list_enabled().await {
            Ok(municipalities) => municipalities,
            Err(e) => {
                error!(error = %e, "Failed to list municipalities");
                return Vec::new();
            }
        };
        info!(count = municipalities.len(), "Starting scrape sweep");

        let mut outcomes = Vec::with_capacity(municipalities.len());
        for municipality in &municipalities {
            if self.shutdown.is_triggered() {
                info!("Sweep interrupted by shutdown");
                break;
            }
            match self
                .process_municipality(&municipality.id, &municipality.scraper_type)
                .await
            {
                Ok(Some(outcome)) => outcomes.push(outcome),
                Ok(None) => {}
                Err(e) => error!(
                    municipality_id = %municipality.id,
                    scraper_type = %municipality.scraper_type,
                    error = %e,
                    "Failed to process municipality"
                ),
            }
        }
        outcomes
    }

    pub async fn process_municipality(
        &self,
        municipality_id: &str,
        scraper_type: &str,
    ) -> Result<Option<JobOutcome>, DatabaseError> {
        let job_id = self.jobs.create_job(municipality_id).await?;
        self.execute_job(&job_id, municipality_id, scraper_type).await
    }

    /// Executes up to `job_batch_size` of the oldest pending jobs.
    pub async fn run_pending_jobs(&self) -> Vec<JobOutcome> {
        let pending = match self.jobs.pending_jobs(self.config.job_batch_size).await {
            Ok(pending) => pending,
            Err(e) => {
                error!(error = %e, "Failed to load pending jobs");
                return Vec::new();
            }
        };
        if pending.is_empty() {
            return Vec::new();
        }
        info!(count = pending.len(), "Processing pending jobs");

        let mut outcomes = Vec::with_capacity(pending.len());
        for job in &pending {
            if self.shutdown.is_triggered() {
                break;
            }
            match self
                .execute_job(&job.job_id, &job.municipality_id, &job.scraper_type)
                .await
            {
                Ok(Some(outcome)) => outcomes.push(outcome),
                Ok(None) => {}
                Err(e) => error!(
                    job_id = %job.job_id,
                    municipality_id = %job.municipality_id,
                    error = %e,
                    "Failed to execute job"
                ),
            }
        }
        outcomes
    }

    /// Runs a pending job to a terminal state. `None` means another executor
    /// already claimed it.
    pub async fn execute_job(
        &self,
        job_id: &str,
        municipality_id: &str,
        scraper_type: &str,
    ) -> Result<Option<JobOutcome>, DatabaseError> {
        if !self.jobs.mark_running(job_id).await? {
            debug!(job_id, "Job is no longer pending, skipping");
            return Ok(None);
        }
        info!(job_id, municipality_id, scraper_type, "Job started");

        let mut outcome = JobOutcome {
            job_id: job_id.to_string(),
            municipality_id: municipality_id.to_string(),
            status: JobStatus::Failed,
            scrape_status: ScrapeStatus::UnknownError.as_str().to_string(),
            slots_found: 0,
            slots_saved: 0,
            matches: 0,
        };

        let Some(scraper) = self.registry.get(scraper_type) else {
            let message = format!("no scraper registered for type {scraper_type:?}");
            warn!(job_id, municipality_id, scraper_type, "Unknown scraper type");
            return self
                .fail(outcome, ScrapeStatus::UnknownError, message, None)
                .await;
        };

        let mut shutdown = self.shutdown.clone();
        let scraped = tokio::select! {
            scraped = scraper.scrape() => scraped,
            _ = shutdown.triggered() => {
                warn!(job_id, municipality_id, "Scrape cancelled by shutdown");
                return self
                    .fail(outcome, ScrapeStatus::UnknownError, "cancelled by shutdown".to_string(), None)
                    .await;
            }
        };

        let result = match scraped {
            Ok(result) => result.normalized(),
            Err(e) => {
                error!(job_id, municipality_id, scraper_type, error = %e, "Scraper execution failed");
                outcome.scrape_status = ScrapeStatus::ExecutionError.as_str().to_string();
                return self
                    .fail(outcome, ScrapeStatus::ExecutionError, format!("{e:#}"), None)
                    .await;
            }
        };
        outcome.scrape_status = result.status.as_str().to_string();
        outcome.slots_found = result.slots.len();

        if !result.success {
            warn!(
                job_id,
                municipality_id,
                scraper_type,
                status = %result.status,
                error = %result.error,
                "Scrape failed"
            );
            return self
                .fail(
                    outcome,
                    result.status,
                    result.error.clone(),
                    result.diagnostics_json(),
                )
                .await;
        }

        self.complete(outcome, result).await
    }

    async fn complete(
        &self,
        mut outcome: JobOutcome,
        mut result: ScrapeResult,
    ) -> Result<Option<JobOutcome>, DatabaseError> {
        let report = match save_slots(
            self.municipalities.as_ref(),
            self.slots.as_ref(),
            &outcome.municipality_id,
            &result.slots,
            result.scraped_at,
        )
        .await
        {
            Ok(report) => report,
            Err(e) => {
                error!(
                    job_id = %outcome.job_id,
                    municipality_id = %outcome.municipality_id,
                    error = %e,
                    "Failed to save slots"
                );
                return self
                    .fail(
                        outcome,
                        result.status,
                        format!("failed to save slots: {e}"),
                        result.diagnostics_json(),
                    )
                    .await;
            }
        };

        outcome.slots_saved = report.saved;
        result.diagnostic("slots_saved", report.saved);
        result.diagnostic("slots_duplicate", report.duplicates);
        if report.undated > 0 {
            result.diagnostic("slots_undated_dropped", report.undated);
        }
        if report.failed > 0 {
            result.diagnostic("slots_failed", report.failed);
        }

        let completion = JobCompletion {
            status: JobStatus::Completed,
            scrape_status: outcome.scrape_status.clone(),
            slots_found: outcome.slots_found as i32,
            error_message: None,
            diagnostics: result.diagnostics_json(),
        };
        if !self.jobs.finish_job(&outcome.job_id, &completion).await? {
            warn!(job_id = %outcome.job_id, "Job left running state before completion");
            return Ok(None);
        }
        outcome.status = JobStatus::Completed;

        let since = Utc::now() - Duration::hours(self.config.match_window_hours);
        match self
            .matcher
            .process_municipality(&outcome.municipality_id, since)
            .await
        {
            Ok(matches) => outcome.matches = matches,
            Err(e) => warn!(
                job_id = %outcome.job_id,
                municipality_id = %outcome.municipality_id,
                error = %e,
                "Matching failed"
            ),
        }

        info!(
            job_id = %outcome.job_id,
            municipality_id = %outcome.municipality_id,
            scrape_status = %outcome.scrape_status,
            slots_found = outcome.slots_found,
            slots_saved = outcome.slots_saved,
            matches = outcome.matches,
            "Job completed"
        );
        Ok(Some(outcome))
    }

    /// Records the failure. `None` when the job had already left `running`.
    async fn fail(
        &self,
        outcome: JobOutcome,
        status: ScrapeStatus,
        message: String,
        diagnostics: Option<String>,
    ) -> Result<Option<JobOutcome>, DatabaseError> {
        let completion = JobCompletion {
            status: JobStatus::Failed,
            scrape_status: status.as_str().to_string(),
            slots_found: outcome.slots_found as i32,
            error_message: Some(message),
            diagnostics,
        };
        if !self.jobs.finish_job(&outcome.job_id, &completion).await? {
            warn!(job_id = %outcome.job_id, "Job left running state before failing");
            return Ok(None);
        }
        Ok(Some(outcome))
    }
}
