// src/scheduler.rs - Job scheduler module
use std::sync::Arc;

use chrono::{Datelike, Duration as ChronoDuration, Local, NaiveDateTime, NaiveTime, Weekday};
use log::{debug, error, info};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};

use crate::{week_range, Config, DigestJob, JournalError, ReminderJob, Result};

/// When a job fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Every week on `weekday` at `hour:00` local time
    Weekly { weekday: Weekday, hour: u32 },
    /// Every day at `hour:00` local time
    Daily { hour: u32 },
}

impl Schedule {
    /// First firing time strictly after `after`.
    pub fn next_fire(&self, after: NaiveDateTime) -> NaiveDateTime {
        let (hour, weekday) = match *self {
            Schedule::Weekly { weekday, hour } => (hour, Some(weekday)),
            Schedule::Daily { hour } => (hour, None),
        };
        let at = NaiveTime::from_hms_opt(hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN);

        (0..=7)
            .map(|offset| NaiveDateTime::new(after.date() + ChronoDuration::days(offset), at))
            .find(|candidate| {
                *candidate > after && weekday.map_or(true, |w| candidate.weekday() == w)
            })
            .unwrap_or_else(|| NaiveDateTime::new(after.date() + ChronoDuration::days(7), at))
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerStatus {
    /// Whether the scheduler is running
    pub is_running: bool,
}

#[derive(Debug, Clone)]
pub enum SchedulerCommand {
    /// Generate the digest for the current week immediately
    RunDigestNow,
    /// Send the reminder immediately
    RunReminderNow,
    /// Stop the scheduler
    Stop,
}

pub struct JobScheduler {
    /// Configuration for the scheduler
    config: Config,

    /// Channel to send commands to the scheduler task
    command_tx: mpsc::Sender<SchedulerCommand>,

    /// Handle to the scheduler task
    scheduler_task: Option<JoinHandle<()>>,

    /// Current status of the scheduler
    status: SchedulerStatus,

    digest: Arc<DigestJob>,
    reminder: Arc<ReminderJob>,
}

impl JobScheduler {
    /// Create a new scheduler running the given jobs
    pub fn new(config: Config, digest: Arc<DigestJob>, reminder: Arc<ReminderJob>) -> Self {
        info!(
            "Initializing job scheduler: digest {:?} {}:00, reminder {}:00",
            config.digest_weekday, config.digest_hour, config.reminder_hour
        );
        let (command_tx, _) = mpsc::channel(10);

        Self {
            config,
            command_tx,
            scheduler_task: None,
            status: SchedulerStatus { is_running: false },
            digest,
            reminder,
        }
    }

    pub fn digest_schedule(&self) -> Schedule {
        Schedule::Weekly {
            weekday: self.config.digest_weekday,
            hour: self.config.digest_hour,
        }
    }

    pub fn reminder_schedule(&self) -> Schedule {
        Schedule::Daily {
            hour: self.config.reminder_hour,
        }
    }

    /// Start the scheduler task
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting job scheduler...");
        if !self.config.scheduler_enabled {
            return Ok(()); // Nothing to do when scheduling is disabled
        }
        if self.scheduler_task.is_some() {
            debug!("Job scheduler already running");
            return Ok(());
        }

        let (command_tx, mut command_rx) = mpsc::channel(10);
        self.command_tx = command_tx;

        let digest_schedule = self.digest_schedule();
        let reminder_schedule = self.reminder_schedule();
        let digest = Arc::clone(&self.digest);
        let reminder = Arc::clone(&self.reminder);

        let task = tokio::spawn(async move {
            loop {
                let now = Local::now().naive_local();
                let next_digest = digest_schedule.next_fire(now);
                let next_reminder = reminder_schedule.next_fire(now);
                debug!("Next digest at {}, next reminder at {}", next_digest, next_reminder);

                tokio::select! {
                    _ = time::sleep(until(now, next_digest)) => {
                        run_digest(&digest).await;
                    }
                    _ = time::sleep(until(now, next_reminder)) => {
                        run_reminder(&reminder).await;
                    }
                    cmd = command_rx.recv() => match cmd {
                        Some(SchedulerCommand::RunDigestNow) => run_digest(&digest).await,
                        Some(SchedulerCommand::RunReminderNow) => run_reminder(&reminder).await,
                        Some(SchedulerCommand::Stop) | None => {
                            info!("Job scheduler stopping...");
                            break;
                        }
                    }
                }
            }
        });

        self.scheduler_task = Some(task);
        self.status.is_running = true;

        Ok(())
    }

    /// Stop the scheduler if it's running
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.scheduler_task.take() {
            if let Err(e) = self.command_tx.send(SchedulerCommand::Stop).await {
                error!("Failed to send stop command to job scheduler: {}", e);
            }

            if let Err(e) = task.await {
                let message = format!("Failed to stop job scheduler: {}", e);
                error!("{}", message);
                return Err(JournalError::SchedulerError { message });
            }

            self.status.is_running = false;
            info!("Job scheduler stopped");
        } else {
            debug!("Job scheduler is not running");
        }

        Ok(())
    }

    /// Generate the digest now, regardless of the schedule
    pub async fn run_digest_now(&self) -> Result<()> {
        self.send(SchedulerCommand::RunDigestNow).await
    }

    /// Send the reminder now, regardless of the schedule
    pub async fn run_reminder_now(&self) -> Result<()> {
        self.send(SchedulerCommand::RunReminderNow).await
    }

    async fn send(&self, command: SchedulerCommand) -> Result<()> {
        if !self.status.is_running {
            return Err(JournalError::SchedulerError {
                message: "Job scheduler is not running".to_string(),
            });
        }

        self.command_tx
            .send(command)
            .await
            .map_err(|e| JournalError::SchedulerError {
                message: format!("Failed to send scheduler command: {}", e),
            })
    }

    /// Get the current status of the scheduler
    pub fn get_status(&self) -> SchedulerStatus {
        self.status.clone()
    }
}

fn until(now: NaiveDateTime, at: NaiveDateTime) -> Duration {
    (at - now).to_std().unwrap_or(Duration::ZERO)
}

async fn run_digest(job: &DigestJob) {
    let (start, end) = week_range(Local::now().date_naive(), 0);
    match job.run(start, end).await {
        Ok(Some(report)) => info!("Digest completed at {}", report.path.display()),
        Ok(None) => info!("Digest skipped, no notes this week"),
        Err(e) => error!("Digest failed: {}", e),
    }
}

async fn run_reminder(job: &ReminderJob) {
    match job.run(Local::now().date_naive()).await {
        Ok(Some(reminder)) => info!("Reminder sent for {}", reminder.date),
        Ok(None) => debug!("No reminder to send"),
        Err(e) => error!("Reminder failed: {}", e),
    }
}
