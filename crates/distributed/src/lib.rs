//! Node-local runtime state for distributed jobs.
//!
//! - [`JobExecutionContext`]: per-job registry of page downstream contexts
//!   with a lookup/registration rendezvous;
//! - [`JobCollectContext`]: local collect operations released when the job
//!   context closes;
//! - [`JobContextRegistry`]: one context per job id plus the idle-job reaper.

pub mod collect;
pub mod future;
pub mod job_context;
pub mod page_downstream;
pub mod registry;

pub use collect::{CollectOperation, JobCollectContext};
pub use future::{Abandoned, SettableFuture, SharedValue};
pub use job_context::{
    JobExecutionContext, NEVER_ACCESSED, PageDownstreamFuture, SharedPageDownstream,
};
pub use page_downstream::{BufferedPageDownstream, PageDownstreamContext};
pub use registry::{Clock, JobContextRegistry, KeepAlivePolicy, ReapPolicy, SystemClock};
