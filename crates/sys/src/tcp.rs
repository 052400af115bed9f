//! `sys.nodes.network.tcp` expression.

use std::sync::Arc;

use tracing::warn;

use crate::expression::SysExpression;
use crate::network::{NetworkStatsSource, TcpStats};

pub const TCP: &str = "tcp";
pub const CONNECTIONS: &str = "connections";
pub const PACKETS: &str = "packets";

/// Build the `tcp` object: `connections.*` and `packets.*` counters sampled
/// from `source` at read time.
pub fn tcp_expression(source: Arc<dyn NetworkStatsSource>) -> SysExpression {
    let counter = |field: fn(&TcpStats) -> i64| {
        let source = Arc::clone(&source);
        SysExpression::leaf(move || sample(source.as_ref(), field))
    };

    let connections = SysExpression::object([
        ("initiated", counter(|s| s.active_opens)),
        ("accepted", counter(|s| s.passive_opens)),
        ("curr_established", counter(|s| s.curr_estab)),
        ("dropped", counter(|s| s.estab_resets)),
        ("embryonic_dropped", counter(|s| s.attempt_fails)),
    ]);
    let packets = SysExpression::object([
        ("sent", counter(|s| s.out_segs)),
        ("received", counter(|s| s.in_segs)),
        ("retransmitted", counter(|s| s.retrans_segs)),
        ("errors_received", counter(|s| s.in_errs)),
        ("rst_sent", counter(|s| s.out_rsts)),
    ]);
    SysExpression::object([(CONNECTIONS, connections), (PACKETS, packets)])
}

fn sample(source: &dyn NetworkStatsSource, field: fn(&TcpStats) -> i64) -> i64 {
    match source.tcp_stats() {
        Ok(stats) => field(&stats),
        Err(e) => {
            warn!(error = %e, "tcp stats unavailable");
            field(&TcpStats::UNAVAILABLE)
        }
    }
}
