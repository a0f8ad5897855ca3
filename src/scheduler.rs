//! Keyed periodic jobs on the tokio runtime
//!
//! Each job runs on its own task but acquires a shared run lock before its
//! action, so at most one action executes at any moment. A job fires for the
//! first time one interval after it was registered.

use log::{debug, info};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::errors::SchedulerError;

struct ScheduledJob {
    interval: Duration,
    cancel: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
pub struct Scheduler {
    jobs: Mutex<HashMap<String, ScheduledJob>>,
    run_lock: Arc<tokio::sync::Mutex<()>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<String, ScheduledJob>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `action` to run every `interval` under `key`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule_interval<F, Fut>(
        &self,
        key: &str,
        interval: Duration,
        action: F,
    ) -> Result<(), SchedulerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if interval.is_zero() {
            return Err(SchedulerError::InvalidInterval(key.to_string()));
        }

        let mut jobs = self.jobs();
        if jobs.contains_key(key) {
            return Err(SchedulerError::AlreadyScheduled(key.to_string()));
        }

        let (cancel, mut cancelled) = oneshot::channel::<()>();
        let run_lock = Arc::clone(&self.run_lock);
        let job_key = key.to_string();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut cancelled => break,
                    _ = ticker.tick() => {}
                }

                let _running = run_lock.lock().await;
                // Unscheduled while waiting for another job to finish
                if !matches!(cancelled.try_recv(), Err(oneshot::error::TryRecvError::Empty)) {
                    break;
                }
                debug!("Running job `{}`", job_key);
                action().await;
            }
            debug!("Job `{}` stopped", job_key);
        });

        jobs.insert(
            key.to_string(),
            ScheduledJob {
                interval,
                cancel,
                handle,
            },
        );
        debug!("Scheduled job `{}` every {:?}", key, interval);
        Ok(())
    }

    /// Stop the job under `key`. An action that is currently executing runs to completion.
    pub fn unschedule(&self, key: &str) -> Result<(), SchedulerError> {
        let job = self
            .jobs()
            .remove(key)
            .ok_or_else(|| SchedulerError::NotFound(key.to_string()))?;
        let _ = job.cancel.send(());
        debug!("Unscheduled job `{}`", key);
        Ok(())
    }

    /// Replace any job under `key` with a fresh one
    pub fn reschedule_interval<F, Fut>(
        &self,
        key: &str,
        interval: Duration,
        action: F,
    ) -> Result<(), SchedulerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if let Err(e) = self.unschedule(key) {
            debug!("{}", e);
        }
        self.schedule_interval(key, interval, action)
    }

    pub fn is_scheduled(&self, key: &str) -> bool {
        self.jobs().contains_key(key)
    }

    pub fn interval_of(&self, key: &str) -> Option<Duration> {
        self.jobs().get(key).map(|job| job.interval)
    }

    pub fn job_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.jobs().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Abort every job. Jobs hold handles to the components that scheduled
    /// them, so this also releases those components.
    pub fn shutdown(&self) {
        let jobs: Vec<(String, ScheduledJob)> = self.jobs().drain().collect();
        for (key, job) in jobs {
            job.handle.abort();
            debug!("Aborted job `{}`", key);
        }
        info!("Scheduler stopped");
    }
}
