//! Receiving side of the page exchange between execution nodes.

use std::fmt;

use arrow::record_batch::RecordBatch;
use dqe_common::{DqeError, Result};
use parking_lot::Mutex;
use tracing::debug;

/// Receiver of result pages for one execution node of one job on this node.
///
/// Pages arrive per upstream bucket; each upstream marks its final page with
/// `is_last`. Implementations own buffering/merging and must be callable from
/// any thread.
pub trait PageDownstreamContext: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Accept one page from upstream `bucket_idx`.
    fn set_page(&self, bucket_idx: usize, page: RecordBatch, is_last: bool) -> Result<()>;

    /// Mark the receiver as complete; no further pages are accepted.
    fn finish(&self);

    /// Abort the receiver and drop anything buffered.
    fn kill(&self, reason: &str);
}

/// Page downstream that buffers every page in arrival order.
#[derive(Debug)]
pub struct BufferedPageDownstream {
    name: String,
    state: Mutex<BufferState>,
}

#[derive(Debug)]
struct BufferState {
    pages: Vec<RecordBatch>,
    last_seen: Vec<bool>,
    finished: bool,
    killed: Option<String>,
}

impl BufferedPageDownstream {
    pub fn new(name: impl Into<String>, num_buckets: usize) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(BufferState {
                pages: Vec::new(),
                last_seen: vec![false; num_buckets],
                finished: num_buckets == 0,
                killed: None,
            }),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    pub fn is_killed(&self) -> bool {
        self.state.lock().killed.is_some()
    }

    pub fn kill_reason(&self) -> Option<String> {
        self.state.lock().killed.clone()
    }

    pub fn buffered_rows(&self) -> usize {
        self.state.lock().pages.iter().map(|p| p.num_rows()).sum()
    }

    /// Drain the buffered pages.
    pub fn take_pages(&self) -> Vec<RecordBatch> {
        std::mem::take(&mut self.state.lock().pages)
    }
}

impl PageDownstreamContext for BufferedPageDownstream {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_page(&self, bucket_idx: usize, page: RecordBatch, is_last: bool) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(reason) = &state.killed {
            return Err(DqeError::IllegalState(format!(
                "page downstream {} was killed: {reason}",
                self.name
            )));
        }
        if state.finished {
            return Err(DqeError::IllegalState(format!(
                "page downstream {} is already finished",
                self.name
            )));
        }
        let Some(seen_last) = state.last_seen.get(bucket_idx).copied() else {
            return Err(DqeError::InvalidArgument(format!(
                "bucket {bucket_idx} out of range for page downstream {} with {} buckets",
                self.name,
                state.last_seen.len()
            )));
        };
        if seen_last {
            return Err(DqeError::IllegalState(format!(
                "bucket {bucket_idx} of page downstream {} already sent its last page",
                self.name
            )));
        }
        if page.num_rows() > 0 {
            state.pages.push(page);
        }
        if is_last {
            state.last_seen[bucket_idx] = true;
            if state.last_seen.iter().all(|s| *s) {
                state.finished = true;
                debug!(name = %self.name, "all upstream buckets finished");
            }
        }
        Ok(())
    }

    fn finish(&self) {
        self.state.lock().finished = true;
    }

    fn kill(&self, reason: &str) {
        let mut state = self.state.lock();
        if state.killed.is_none() {
            state.killed = Some(reason.to_string());
            state.pages.clear();
            debug!(name = %self.name, reason, "page downstream killed");
        }
    }
}
