//! TCP counters of the local network stack.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use dqe_common::{DqeError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Snapshot of the kernel's TCP MIB counters.
///
/// A counter the platform does not report is `-1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpStats {
    pub active_opens: i64,
    pub passive_opens: i64,
    pub curr_estab: i64,
    pub estab_resets: i64,
    pub attempt_fails: i64,
    pub out_segs: i64,
    pub in_segs: i64,
    pub retrans_segs: i64,
    pub in_errs: i64,
    pub out_rsts: i64,
}

impl TcpStats {
    pub const UNAVAILABLE: TcpStats = TcpStats {
        active_opens: -1,
        passive_opens: -1,
        curr_estab: -1,
        estab_resets: -1,
        attempt_fails: -1,
        out_segs: -1,
        in_segs: -1,
        retrans_segs: -1,
        in_errs: -1,
        out_rsts: -1,
    };
}

impl Default for TcpStats {
    fn default() -> Self {
        Self::UNAVAILABLE
    }
}

pub trait NetworkStatsSource: Send + Sync + fmt::Debug {
    /// Sample the current TCP counters.
    fn tcp_stats(&self) -> Result<TcpStats>;
}

/// Reads TCP counters from a Linux `/proc/net/snmp` style file.
#[derive(Debug, Clone)]
pub struct ProcNetSnmp {
    path: PathBuf,
}

impl ProcNetSnmp {
    pub const DEFAULT_PATH: &'static str = "/proc/net/snmp";

    pub fn new() -> Self {
        Self::with_path(Self::DEFAULT_PATH)
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl Default for ProcNetSnmp {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkStatsSource for ProcNetSnmp {
    fn tcp_stats(&self) -> Result<TcpStats> {
        let text = std::fs::read_to_string(&self.path)?;
        parse_snmp_tcp(&text)
    }
}

/// Parse the `Tcp:` header/value line pair of `/proc/net/snmp`.
pub fn parse_snmp_tcp(text: &str) -> Result<TcpStats> {
    let mut rows = text.lines().filter_map(|l| l.strip_prefix("Tcp:"));
    let (Some(header), Some(values)) = (rows.next(), rows.next()) else {
        return Err(DqeError::Codec(
            "snmp table has no Tcp header/value rows".to_string(),
        ));
    };

    let names = header.split_whitespace().collect::<Vec<_>>();
    let raw = values.split_whitespace().collect::<Vec<_>>();
    if names.len() != raw.len() {
        return Err(DqeError::Codec(format!(
            "snmp Tcp row has {} values for {} columns",
            raw.len(),
            names.len()
        )));
    }
    let mut fields = HashMap::with_capacity(names.len());
    for (name, value) in names.into_iter().zip(raw) {
        let parsed = value
            .parse::<i64>()
            .map_err(|e| DqeError::Codec(format!("snmp Tcp {name}={value:?}: {e}")))?;
        fields.insert(name, parsed);
    }
    let field = |name: &str| fields.get(name).copied().unwrap_or(-1);

    Ok(TcpStats {
        active_opens: field("ActiveOpens"),
        passive_opens: field("PassiveOpens"),
        curr_estab: field("CurrEstab"),
        estab_resets: field("EstabResets"),
        attempt_fails: field("AttemptFails"),
        out_segs: field("OutSegs"),
        in_segs: field("InSegs"),
        retrans_segs: field("RetransSegs"),
        in_errs: field("InErrs"),
        out_rsts: field("OutRsts"),
    })
}

/// Fixed counters that can be replaced between reads.
#[derive(Debug, Default)]
pub struct StaticNetworkStats {
    stats: Mutex<TcpStats>,
}

impl StaticNetworkStats {
    pub fn new(stats: TcpStats) -> Self {
        Self {
            stats: Mutex::new(stats),
        }
    }

    pub fn set(&self, stats: TcpStats) {
        *self.stats.lock() = stats;
    }
}

impl NetworkStatsSource for StaticNetworkStats {
    fn tcp_stats(&self) -> Result<TcpStats> {
        Ok(*self.stats.lock())
    }
}
