use crate::config::{ConfigSource, PipelineConfig};
use crate::errors::ConfigError;
use crate::services::pipeline::{PipelineRunner, RunSummary};
use crate::util::new_run_id;
use chrono::Utc;
use log::{error, info, warn};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    /// The last tick exhausted its attempts. Does not stop later ticks.
    Failed,
}

#[derive(Debug)]
pub enum TickOutcome {
    Completed(RunSummary),
    Failed { attempts: u32, error: String },
    /// A run was already in progress.
    Skipped,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 定时调度器
///
/// Idle → Running → Idle | Failed. Only one run is in flight at a time;
/// a tick that finds the scheduler Running is skipped.
pub struct Scheduler {
    source: ConfigSource,
    runner: Arc<dyn PipelineRunner>,
    config: Mutex<PipelineConfig>,
    state: Mutex<SchedulerState>,
}

impl Scheduler {
    /// The initial configuration must load; later reload errors keep the
    /// last good one.
    pub fn new(source: ConfigSource, runner: Arc<dyn PipelineRunner>) -> Result<Self, ConfigError> {
        let config = source.load()?;
        Ok(Self {
            source,
            runner,
            config: Mutex::new(config),
            state: Mutex::new(SchedulerState::Idle),
        })
    }

    pub fn state(&self) -> SchedulerState {
        *lock(&self.state)
    }

    pub fn current_config(&self) -> PipelineConfig {
        lock(&self.config).clone()
    }

    /// Idle/Failed → Running in one step; false when already Running.
    fn begin(&self) -> bool {
        let mut state = lock(&self.state);
        if *state == SchedulerState::Running {
            return false;
        }
        *state = SchedulerState::Running;
        true
    }

    fn finish(&self, next: SchedulerState) {
        *lock(&self.state) = next;
    }

    fn reload(&self) -> PipelineConfig {
        match self.source.load() {
            Ok(config) => {
                *lock(&self.config) = config.clone();
                config
            }
            Err(e) => {
                error!("Config reload failed, keeping previous configuration: {}", e);
                self.current_config()
            }
        }
    }

    /// One tick: reload config and run with up to `run_attempts` attempts.
    pub async fn try_run_once(&self) -> TickOutcome {
        if !self.begin() {
            info!("Previous run still in progress, skipping this tick");
            return TickOutcome::Skipped;
        }

        let config = self.reload();
        let max_attempts = config.schedule.run_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let run_id = new_run_id(Utc::now());
            match self.runner.run(&config, &run_id).await {
                Ok(summary) => {
                    self.finish(SchedulerState::Idle);
                    return TickOutcome::Completed(summary);
                }
                Err(e) if attempt < max_attempts => {
                    let delay = config.schedule.retry_delay();
                    warn!(
                        "Run {} failed (attempt {}/{}): {}; retrying in {:?}",
                        run_id, attempt, max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!("Run {} failed after {} attempt(s): {}", run_id, attempt, e);
                    if config.schedule.notify_on_failure {
                        self.runner.report_failure(&config, &run_id, &e).await;
                    }
                    self.finish(SchedulerState::Failed);
                    return TickOutcome::Failed {
                        attempts: attempt,
                        error: e.to_string(),
                    };
                }
            }
        }
    }

    /// Tick on the configured cadence until `shutdown` resolves, then wait
    /// for in-flight runs to finish. Runs are never cancelled, also not when
    /// the next tick cannot be computed.
    pub async fn run_forever<F>(self: Arc<Self>, shutdown: F) -> Result<(), ConfigError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut in_flight: Vec<JoinHandle<TickOutcome>> = Vec::new();
        let mut stopped_by = None;
        loop {
            let cadence = self.current_config().schedule.cadence;
            let now = Utc::now();
            let next = match cadence.next_after(now) {
                Ok(next) => next,
                Err(e) => {
                    error!("Cannot compute the next tick, stopping: {}", e);
                    stopped_by = Some(e);
                    break;
                }
            };
            let wait = (next - now).to_std().unwrap_or_default();
            info!("Next run at {} ({})", next.format("%Y-%m-%d %H:%M:%S UTC"), cadence.describe());

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
            }

            in_flight.retain(|h| !h.is_finished());
            let this = Arc::clone(&self);
            in_flight.push(tokio::spawn(async move {
                let outcome = this.try_run_once().await;
                match &outcome {
                    TickOutcome::Completed(s) => info!("Tick completed: run {}", s.run_id),
                    TickOutcome::Failed { attempts, error } => {
                        warn!("Tick failed after {} attempt(s): {}", attempts, error)
                    }
                    TickOutcome::Skipped => {}
                }
                outcome
            }));
        }

        if !in_flight.is_empty() {
            info!("Waiting for in-flight run to finish");
        }
        for handle in in_flight {
            if let Err(e) = handle.await {
                error!("Scheduled run task ended abnormally: {}", e);
            }
        }
        match stopped_by {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
