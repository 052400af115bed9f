//! Local collect (scan/filter) state of one job on this node.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dqe_common::{DqeError, ExecutionNodeId, JobId, Result};
use parking_lot::Mutex;
use tracing::{debug, warn};

/// A running local collect operation that can be released.
pub trait CollectOperation: Send + Sync + fmt::Debug {
    /// Stop the operation and release what it holds.
    fn kill(&self) -> Result<()>;
}

/// Collect operations a job runs locally, keyed by execution node.
///
/// Owned by exactly one job execution context, which is the only caller of
/// [`JobCollectContext::close`].
#[derive(Debug)]
pub struct JobCollectContext {
    job_id: JobId,
    state: Mutex<CollectState>,
}

#[derive(Debug, Default)]
struct CollectState {
    closed: bool,
    operations: HashMap<ExecutionNodeId, Arc<dyn CollectOperation>>,
}

impl JobCollectContext {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            state: Mutex::new(CollectState::default()),
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn register_collector(
        &self,
        execution_node_id: ExecutionNodeId,
        operation: Arc<dyn CollectOperation>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(DqeError::IllegalState(format!(
                "collect context of job {} is closed",
                self.job_id
            )));
        }
        if state.operations.contains_key(&execution_node_id) {
            return Err(DqeError::IllegalState(format!(
                "there is already a collect operation for execution node {execution_node_id}"
            )));
        }
        state.operations.insert(execution_node_id, operation);
        debug!(job_id = %self.job_id, execution_node_id = execution_node_id.0, "collector registered");
        Ok(())
    }

    /// Forget a finished collect operation without killing it.
    pub fn remove_collector(
        &self,
        execution_node_id: ExecutionNodeId,
    ) -> Option<Arc<dyn CollectOperation>> {
        self.state.lock().operations.remove(&execution_node_id)
    }

    pub fn active_collectors(&self) -> usize {
        self.state.lock().operations.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Kill every still-registered operation. All are attempted; the first
    /// failure is returned.
    pub(crate) fn close(&self) -> Result<()> {
        let operations = {
            let mut state = self.state.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            std::mem::take(&mut state.operations)
        };

        let mut first_err = None;
        for (id, op) in operations {
            if let Err(e) = op.kill() {
                warn!(job_id = %self.job_id, execution_node_id = id.0, error = %e, "collect operation failed to release");
                first_err.get_or_insert((id, e));
            }
        }
        match first_err {
            None => Ok(()),
            Some((id, e)) => Err(DqeError::Execution(format!(
                "failed to release collect operation {id} of job {}: {e}",
                self.job_id
            ))),
        }
    }
}
