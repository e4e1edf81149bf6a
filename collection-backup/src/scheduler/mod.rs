//! Cron-driven backups followed by a retention pass.

pub mod cron;

use crate::models::{BackupStatus, SchedulerConfig, SchedulerConfigUpdate};
use crate::service::BackupService;
use crate::{BackupError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Stopped,
    Running,
}

/// Outcome of one scheduled (or manually triggered) run.
#[derive(Debug, Clone, Serialize)]
pub struct LastRun {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<BackupStatus>,
    pub pruned: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub config: SchedulerConfig,
    pub in_flight: bool,
    pub last_run: Option<LastRun>,
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// A previous run was still going; nothing was done.
    Skipped,
    Finished(LastRun),
}

/// Load a persisted scheduler configuration, `None` when never saved.
pub async fn load_config(path: &Path) -> Result<Option<SchedulerConfig>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub async fn save_config(path: &Path, config: &SchedulerConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_vec_pretty(config)?;
    tokio::fs::write(path, json).await?;
    Ok(())
}

fn scheduler_err(e: impl std::fmt::Display) -> BackupError {
    BackupError::Scheduler(e.to_string())
}

/// Clears the in-flight flag however the run ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct Runner {
    service: Arc<BackupService>,
    in_flight: AtomicBool,
    last_run: RwLock<Option<LastRun>>,
}

impl Runner {
    async fn fire(&self, config: &SchedulerConfig) -> RunOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Skipping scheduled run: previous run still in progress");
            return RunOutcome::Skipped;
        }
        let _guard = InFlight(&self.in_flight);

        let run = self.run(config).await;
        *self.last_run.write().await = Some(run.clone());
        RunOutcome::Finished(run)
    }

    async fn run(&self, config: &SchedulerConfig) -> LastRun {
        let started_at = Utc::now();
        info!(schedule = %config.schedule, "Starting scheduled backup");

        let mut run = LastRun {
            started_at,
            finished_at: started_at,
            backup_id: None,
            status: None,
            pruned: Vec::new(),
            error: None,
        };

        match self.service.create_backup(config.collections.clone()).await {
            Ok(report) => {
                run.backup_id = Some(report.metadata.id.clone());
                run.status = Some(report.metadata.status);
                match self.service.prune(&config.retention).await {
                    Ok(pruned) => run.pruned = pruned,
                    Err(e) => {
                        warn!(error = %e, "Scheduled retention pass failed");
                        run.error = Some(format!("retention: {}", e));
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Scheduled backup failed");
                run.error = Some(e.to_string());
            }
        }

        run.finished_at = Utc::now();
        info!(
            backup_id = run.backup_id.as_deref().unwrap_or("-"),
            pruned = run.pruned.len(),
            "Scheduled run finished"
        );
        run
    }
}

pub struct BackupScheduler {
    config: Mutex<SchedulerConfig>,
    scheduler: Mutex<Option<JobScheduler>>,
    runner: Arc<Runner>,
    state_path: Option<PathBuf>,
}

impl BackupScheduler {
    pub fn new(service: Arc<BackupService>, config: SchedulerConfig) -> Self {
        Self {
            config: Mutex::new(config),
            scheduler: Mutex::new(None),
            runner: Arc::new(Runner {
                service,
                in_flight: AtomicBool::new(false),
                last_run: RwLock::new(None),
            }),
            state_path: None,
        }
    }

    /// Write every configuration change to `path`.
    pub fn persist_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_path = Some(path.into());
        self
    }

    pub async fn state(&self) -> SchedulerState {
        if self.scheduler.lock().await.is_some() {
            SchedulerState::Running
        } else {
            SchedulerState::Stopped
        }
    }

    pub async fn config(&self) -> SchedulerConfig {
        self.config.lock().await.clone()
    }

    /// Start firing on the configured schedule. Does nothing when disabled
    /// or already running.
    pub async fn start(&self) -> Result<()> {
        let mut slot = self.scheduler.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        let config = self.config.lock().await.clone();
        if !config.enabled {
            info!("Scheduler disabled, not starting");
            return Ok(());
        }

        let expression = cron::to_job_schedule(&config.schedule)?;
        let runner = self.runner.clone();
        let job_config = config.clone();
        let job = Job::new_async(expression.as_str(), move |_uuid, _lock| {
            let runner = runner.clone();
            let config = job_config.clone();
            Box::pin(async move {
                // detached so stopping the scheduler never cuts a run short
                tokio::spawn(async move {
                    runner.fire(&config).await;
                });
            })
        })
        .map_err(|e| {
            BackupError::Configuration(format!("invalid schedule {:?}: {}", config.schedule, e))
        })?;

        let mut scheduler = JobScheduler::new().await.map_err(scheduler_err)?;
        scheduler.add(job).await.map_err(scheduler_err)?;
        if let Err(e) = scheduler.start().await {
            let _ = scheduler.shutdown().await;
            return Err(scheduler_err(e));
        }

        *slot = Some(scheduler);
        info!(schedule = %config.schedule, cron = %expression, "Scheduler started");
        Ok(())
    }

    /// Stop firing. A run already in progress finishes on its own.
    pub async fn stop(&self) -> Result<()> {
        let taken = self.scheduler.lock().await.take();
        if let Some(mut scheduler) = taken {
            scheduler.shutdown().await.map_err(scheduler_err)?;
            info!("Scheduler stopped");
        }
        Ok(())
    }

    /// Merge `update` into the configuration, restarting when running. An
    /// invalid schedule leaves the configuration untouched.
    pub async fn update_config(&self, update: SchedulerConfigUpdate) -> Result<SchedulerConfig> {
        let next = {
            let mut config = self.config.lock().await;
            let mut next = config.clone();
            next.merge(update);
            cron::to_job_schedule(&next.schedule)?;
            *config = next.clone();
            next
        };

        if let Some(path) = &self.state_path {
            save_config(path, &next).await?;
        }
        info!(enabled = next.enabled, schedule = %next.schedule, "Scheduler configuration updated");

        if self.state().await == SchedulerState::Running {
            self.stop().await?;
            self.start().await?;
        }
        Ok(next)
    }

    /// One run with the current configuration, outside the schedule.
    pub async fn run_now(&self) -> RunOutcome {
        let config = self.config().await;
        self.runner.fire(&config).await
    }

    pub async fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            state: self.state().await,
            config: self.config().await,
            in_flight: self.runner.in_flight.load(Ordering::SeqCst),
            last_run: self.runner.last_run.read().await.clone(),
        }
    }
}
