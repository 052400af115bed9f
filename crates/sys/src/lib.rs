//! Read-only node introspection exposed to the SQL layer as `sys` expressions.
//!
//! Expressions form a tree of named objects whose leaves sample a counter
//! each time they are read; nothing is cached between reads.

pub mod expression;
pub mod network;
pub mod tcp;

pub use expression::{SysExpression, SysValue};
pub use network::{NetworkStatsSource, ProcNetSnmp, StaticNetworkStats, TcpStats};
pub use tcp::tcp_expression;
