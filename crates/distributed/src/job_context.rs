//! Per-node state of one distributed job.
//!
//! A [`JobExecutionContext`] tracks the page downstream contexts registered
//! for the job's execution nodes on this node and lets producers and
//! consumers meet regardless of which side shows up first:
//!
//! - the receiving side registers its context with
//!   [`JobExecutionContext::set_page_downstream_context`];
//! - the sending side asks for it with
//!   [`JobExecutionContext::get_page_downstream_context`] and gets a future
//!   that is either already resolved or resolved by the later registration.
//!
//! Registered contexts live in a sharded concurrent map; only the pending
//! lookup table sits behind a mutex, and registration resolves a pending
//! future after that mutex is released.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use dqe_common::metrics::global_metrics;
use dqe_common::{DqeError, ExecutionNodeId, JobId, Result};
use futures::FutureExt;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::collect::JobCollectContext;
use crate::future::{SettableFuture, SharedValue};
use crate::page_downstream::PageDownstreamContext;

/// `last_access_time` of a context nobody has touched yet.
pub const NEVER_ACCESSED: i64 = -1;

pub type SharedPageDownstream = Arc<dyn PageDownstreamContext>;

pub struct JobExecutionContext {
    job_id: JobId,
    keep_alive: Duration,
    collect_context: JobCollectContext,
    closed: AtomicBool,
    last_access_time: AtomicI64,
    page_downstreams: DashMap<ExecutionNodeId, SharedPageDownstream>,
    pending_page_downstreams: Mutex<HashMap<ExecutionNodeId, SettableFuture<SharedPageDownstream>>>,
}

impl JobExecutionContext {
    pub fn new(job_id: JobId, keep_alive: Duration) -> Self {
        Self::with_collect_context(job_id, keep_alive, JobCollectContext::new(job_id))
    }

    pub fn with_collect_context(
        job_id: JobId,
        keep_alive: Duration,
        collect_context: JobCollectContext,
    ) -> Self {
        Self {
            job_id,
            keep_alive,
            collect_context,
            closed: AtomicBool::new(false),
            last_access_time: AtomicI64::new(NEVER_ACCESSED),
            page_downstreams: DashMap::new(),
            pending_page_downstreams: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> JobId {
        self.job_id
    }

    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    /// Record activity at `time_ms` (milliseconds since the Unix epoch).
    pub fn accessed(&self, time_ms: i64) {
        self.last_access_time.store(time_ms, Ordering::Release);
    }

    /// Last recorded activity, or [`NEVER_ACCESSED`].
    pub fn last_access_time(&self) -> i64 {
        self.last_access_time.load(Ordering::Acquire)
    }

    /// The job's local collect state. Released by [`JobExecutionContext::close`] only.
    pub fn collect_context(&self) -> &JobCollectContext {
        &self.collect_context
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Register the page downstream context of `execution_node_id` and hand it
    /// to every lookup that was already waiting for it.
    pub fn set_page_downstream_context(
        &self,
        execution_node_id: ExecutionNodeId,
        context: SharedPageDownstream,
    ) -> Result<()> {
        if self.is_closed() {
            return Err(self.closed_error(execution_node_id));
        }
        match self.page_downstreams.entry(execution_node_id) {
            Entry::Occupied(_) => {
                global_metrics().page_downstream_duplicate();
                warn!(
                    job_id = %self.job_id,
                    execution_node_id = execution_node_id.0,
                    "duplicate page downstream registration"
                );
                return Err(DqeError::IllegalState(format!(
                    "there is already a page downstream set for execution node {execution_node_id}"
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&context));
            }
        }

        let waiting = {
            let mut pending = self.pending_page_downstreams.lock();
            if self.is_closed() {
                // raced with close(): it may already have drained the registry
                drop(pending);
                if let Some((_, ctx)) = self.page_downstreams.remove(&execution_node_id) {
                    ctx.kill(&format!("job {} closed", self.job_id));
                }
                return Err(self.closed_error(execution_node_id));
            }
            pending.remove(&execution_node_id)
        };

        global_metrics().page_downstream_registered();
        debug!(
            job_id = %self.job_id,
            execution_node_id = execution_node_id.0,
            name = context.name(),
            resolves_waiter = waiting.is_some(),
            "page downstream registered"
        );
        if let Some(promise) = waiting {
            promise.set(context);
        }
        Ok(())
    }

    /// Future of the page downstream context for `execution_node_id`.
    ///
    /// Resolved immediately when the context is registered; otherwise it
    /// resolves once it gets registered. Concurrent lookups for the same
    /// unregistered id share one pending future. Never blocks.
    pub fn get_page_downstream_context(
        &self,
        execution_node_id: ExecutionNodeId,
    ) -> PageDownstreamFuture {
        if let Some(ctx) = self.page_downstreams.get(&execution_node_id) {
            global_metrics().page_downstream_lookup(true);
            return PageDownstreamFuture::ready(self.job_id, Arc::clone(ctx.value()));
        }

        let mut pending = self.pending_page_downstreams.lock();
        // registration may have happened between the check above and the lock
        if let Some(ctx) = self.page_downstreams.get(&execution_node_id) {
            global_metrics().page_downstream_lookup(true);
            return PageDownstreamFuture::ready(self.job_id, Arc::clone(ctx.value()));
        }
        if self.is_closed() {
            return PageDownstreamFuture::closed(self.job_id);
        }
        global_metrics().page_downstream_lookup(false);
        let waiter = pending
            .entry(execution_node_id)
            .or_insert_with(|| {
                debug!(
                    job_id = %self.job_id,
                    execution_node_id = execution_node_id.0,
                    "waiting for page downstream registration"
                );
                SettableFuture::new()
            })
            .future();
        PageDownstreamFuture::pending(self.job_id, waiter)
    }

    /// Drop the registered context of a drained execution node. Unknown ids are ignored.
    pub fn close_page_downstream_context(&self, execution_node_id: ExecutionNodeId) -> bool {
        let removed = self.page_downstreams.remove(&execution_node_id).is_some();
        if removed {
            debug!(
                job_id = %self.job_id,
                execution_node_id = execution_node_id.0,
                "page downstream closed"
            );
        }
        removed
    }

    pub fn num_page_downstreams(&self) -> usize {
        self.page_downstreams.len()
    }

    pub fn num_pending_lookups(&self) -> usize {
        self.pending_page_downstreams.lock().len()
    }

    /// Release the job's resources. Only the first call does anything.
    ///
    /// Pending lookups fail with [`DqeError::JobClosed`], still registered
    /// page downstream contexts are killed, then the collect context is
    /// released; its failure is returned to this caller only.
    pub fn close(&self) -> Result<()> {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        let abandoned = {
            let mut pending = self.pending_page_downstreams.lock();
            pending.drain().map(|(_, promise)| promise).collect::<Vec<_>>()
        };
        for promise in &abandoned {
            promise.abandon();
        }

        let ids = self
            .page_downstreams
            .iter()
            .map(|e| *e.key())
            .collect::<Vec<_>>();
        let reason = format!("job {} closed", self.job_id);
        let mut killed = 0usize;
        for id in ids {
            if let Some((_, ctx)) = self.page_downstreams.remove(&id) {
                ctx.kill(&reason);
                killed += 1;
            }
        }

        info!(
            job_id = %self.job_id,
            abandoned_lookups = abandoned.len(),
            killed_page_downstreams = killed,
            "job execution context closed"
        );
        self.collect_context.close()
    }

    fn closed_error(&self, execution_node_id: ExecutionNodeId) -> DqeError {
        DqeError::IllegalState(format!(
            "cannot register page downstream for execution node {execution_node_id}: job {} is closed",
            self.job_id
        ))
    }
}

impl fmt::Debug for JobExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobExecutionContext")
            .field("job_id", &self.job_id)
            .field("keep_alive", &self.keep_alive)
            .field("closed", &self.is_closed())
            .field("last_access_time", &self.last_access_time())
            .field("page_downstreams", &self.page_downstreams.len())
            .finish_non_exhaustive()
    }
}

/// Result of [`JobExecutionContext::get_page_downstream_context`].
#[derive(Clone, Debug)]
pub struct PageDownstreamFuture {
    job_id: JobId,
    state: FutureState,
}

#[derive(Clone, Debug)]
enum FutureState {
    Ready(SharedPageDownstream),
    Pending(SharedValue<SharedPageDownstream>),
    Closed,
}

impl PageDownstreamFuture {
    fn ready(job_id: JobId, ctx: SharedPageDownstream) -> Self {
        Self {
            job_id,
            state: FutureState::Ready(ctx),
        }
    }

    fn pending(job_id: JobId, waiter: SharedValue<SharedPageDownstream>) -> Self {
        Self {
            job_id,
            state: FutureState::Pending(waiter),
        }
    }

    fn closed(job_id: JobId) -> Self {
        Self {
            job_id,
            state: FutureState::Closed,
        }
    }

    /// True when the lookup had to wait for a registration.
    pub fn is_waiting_for_registration(&self) -> bool {
        matches!(self.state, FutureState::Pending(_))
    }

    /// True when both futures wait on the same pending registration.
    pub fn shares_registration_with(&self, other: &PageDownstreamFuture) -> bool {
        match (&self.state, &other.state) {
            (FutureState::Pending(a), FutureState::Pending(b)) => a.same_as(b),
            _ => false,
        }
    }
}

impl Future for PageDownstreamFuture {
    type Output = Result<SharedPageDownstream>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let job_id = this.job_id;
        match &mut this.state {
            FutureState::Ready(ctx) => Poll::Ready(Ok(Arc::clone(ctx))),
            FutureState::Pending(waiter) => waiter
                .poll_unpin(cx)
                .map(|r| r.map_err(|_| DqeError::JobClosed(job_id))),
            FutureState::Closed => Poll::Ready(Err(DqeError::JobClosed(job_id))),
        }
    }
}

#[cfg(test)]
#[path = "job_context_tests.rs"]
mod tests;
