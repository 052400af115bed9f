//! Node-wide registry of job execution contexts and the idle-job reaper.
//!
//! Responsibilities:
//! - create exactly one [`JobExecutionContext`] per job id on this node;
//! - hand contexts to executors and stamp their access time;
//! - periodically close and drop contexts whose idle time exceeds their
//!   keep-alive, as decided by an injected [`ReapPolicy`].
//!
//! The registry is an ordinary value owned by the node runtime; the reaper
//! runs only between [`JobContextRegistry::start`] and
//! [`JobContextRegistry::stop`].

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use dqe_common::metrics::{CloseReason, MetricsRegistry, global_metrics};
use dqe_common::{DqeError, JobId, JobsConfig, Result};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::job_context::JobExecutionContext;

/// Decides whether a context may be reaped at `now_ms`.
pub trait ReapPolicy: Send + Sync + fmt::Debug {
    fn is_expired(&self, context: &JobExecutionContext, now_ms: i64) -> bool;
}

/// Reap once idle for longer than the context's keep-alive.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepAlivePolicy;

impl ReapPolicy for KeepAlivePolicy {
    fn is_expired(&self, context: &JobExecutionContext, now_ms: i64) -> bool {
        let keep_alive_ms = i64::try_from(context.keep_alive().as_millis()).unwrap_or(i64::MAX);
        now_ms.saturating_sub(context.last_access_time()) > keep_alive_ms
    }
}

/// Source of "now" in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0)
    }
}

pub struct JobContextRegistry {
    inner: Arc<RegistryInner>,
    reaper: Mutex<Option<ReaperHandle>>,
}

struct RegistryInner {
    config: JobsConfig,
    contexts: DashMap<JobId, Arc<JobExecutionContext>>,
    policy: Arc<dyn ReapPolicy>,
    clock: Arc<dyn Clock>,
    metrics: MetricsRegistry,
}

struct ReaperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl JobContextRegistry {
    pub fn new(config: JobsConfig) -> Self {
        Self::with_policy(config, Arc::new(KeepAlivePolicy), Arc::new(SystemClock))
    }

    pub fn with_policy(
        config: JobsConfig,
        policy: Arc<dyn ReapPolicy>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_metrics(config, policy, clock, global_metrics().clone())
    }

    /// Like [`JobContextRegistry::with_policy`], reporting to `metrics`
    /// instead of the process-global registry.
    pub fn with_metrics(
        config: JobsConfig,
        policy: Arc<dyn ReapPolicy>,
        clock: Arc<dyn Clock>,
        metrics: MetricsRegistry,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                contexts: DashMap::new(),
                policy,
                clock,
                metrics,
            }),
            reaper: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &JobsConfig {
        &self.inner.config
    }

    /// Create the context for `job_id` with the configured keep-alive.
    pub fn create_context(&self, job_id: JobId) -> Result<Arc<JobExecutionContext>> {
        self.create_context_with_keep_alive(job_id, self.inner.config.keep_alive())
    }

    pub fn create_context_with_keep_alive(
        &self,
        job_id: JobId,
        keep_alive: Duration,
    ) -> Result<Arc<JobExecutionContext>> {
        match self.inner.contexts.entry(job_id) {
            Entry::Occupied(_) => Err(DqeError::IllegalState(format!(
                "job execution context for job {job_id} already exists"
            ))),
            Entry::Vacant(slot) => {
                let context = Arc::new(JobExecutionContext::new(job_id, keep_alive));
                context.accessed(self.inner.clock.now_ms());
                slot.insert(Arc::clone(&context));
                self.inner.metrics.job_created();
                info!(job_id = %job_id, keep_alive_ms = millis(keep_alive), "job execution context created");
                Ok(context)
            }
        }
    }

    /// Look up a context and mark it as accessed now.
    pub fn get(&self, job_id: JobId) -> Option<Arc<JobExecutionContext>> {
        let context = self.inner.contexts.get(&job_id).map(|c| Arc::clone(c.value()))?;
        context.accessed(self.inner.clock.now_ms());
        Some(context)
    }

    /// Remove and close the context of a finished or failed job.
    ///
    /// Returns `Ok(false)` if no context was registered.
    pub fn remove(&self, job_id: JobId) -> Result<bool> {
        let Some((_, context)) = self.inner.contexts.remove(&job_id) else {
            return Ok(false);
        };
        self.inner.metrics.job_closed(CloseReason::Explicit);
        context.close()?;
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.inner.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.contexts.is_empty()
    }

    pub fn job_ids(&self) -> Vec<JobId> {
        self.inner.contexts.iter().map(|e| *e.key()).collect()
    }

    /// Close and drop every context the policy considers expired at `now_ms`.
    pub fn reap(&self, now_ms: i64) -> Vec<JobId> {
        self.inner.reap(now_ms)
    }

    /// Close every context, e.g. on node shutdown. All are closed; the first
    /// failure is returned.
    pub fn close_all(&self) -> Result<()> {
        let ids = self.job_ids();
        let mut first_err = None;
        for id in ids {
            if let Err(e) = self.remove(id) {
                error!(job_id = %id, error = %e, "failed to close job execution context");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Spawn the background reaper on the current tokio runtime.
    pub fn start(&self) -> Result<()> {
        let mut reaper = self.reaper.lock();
        if reaper.is_some() {
            return Err(DqeError::IllegalState(
                "job context reaper is already running".to_string(),
            ));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            DqeError::InvalidConfig(format!("job context reaper needs a tokio runtime: {e}"))
        })?;
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let inner = Arc::clone(&self.inner);
        let interval = inner.config.reap_interval();
        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let now = inner.clock.now_ms();
                        inner.reap(now);
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("job context reaper stopped");
        });
        info!(interval_ms = millis(interval), "job context reaper started");
        *reaper = Some(ReaperHandle { shutdown, task });
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.reaper.lock().is_some()
    }

    /// Stop the background reaper and wait for it to exit. No-op if not started.
    pub async fn stop(&self) -> Result<()> {
        let handle = self.reaper.lock().take();
        let Some(handle) = handle else {
            return Ok(());
        };
        let _ = handle.shutdown.send(true);
        handle
            .task
            .await
            .map_err(|e| DqeError::Execution(format!("job context reaper join error: {e}")))
    }
}

impl Drop for JobContextRegistry {
    fn drop(&mut self) {
        if let Some(handle) = self.reaper.get_mut().take() {
            handle.task.abort();
        }
    }
}

impl fmt::Debug for JobContextRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContextRegistry")
            .field("config", &self.inner.config)
            .field("contexts", &self.inner.contexts.len())
            .field("policy", &self.inner.policy)
            .field("running", &self.is_running())
            .finish()
    }
}

impl RegistryInner {
    fn reap(&self, now_ms: i64) -> Vec<JobId> {
        let started = Instant::now();
        let candidates = self
            .contexts
            .iter()
            .filter(|e| self.policy.is_expired(e.value(), now_ms))
            .map(|e| *e.key())
            .collect::<Vec<_>>();

        let mut reaped = Vec::with_capacity(candidates.len());
        for job_id in candidates {
            // re-check under the shard lock: the job may have been touched since
            let Some((_, context)) = self
                .contexts
                .remove_if(&job_id, |_, c| self.policy.is_expired(c, now_ms))
            else {
                continue;
            };
            self.metrics.job_closed(CloseReason::Reaped);
            info!(
                job_id = %job_id,
                last_access_time = context.last_access_time(),
                keep_alive_ms = millis(context.keep_alive()),
                "reaping idle job execution context"
            );
            if let Err(e) = context.close() {
                error!(job_id = %job_id, error = %e, "failed to close reaped job execution context");
            }
            reaped.push(job_id);
        }
        self.metrics
            .observe_reaper_sweep(started.elapsed().as_secs_f64());
        reaped
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
