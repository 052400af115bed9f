use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DqeError, Result};

pub const ENV_KEEP_ALIVE_MS: &str = "DQE_JOBS_KEEP_ALIVE_MS";
pub const ENV_REAP_INTERVAL_MS: &str = "DQE_JOBS_REAP_INTERVAL_MS";

/// Job context lifecycle knobs for one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Idle time after which a job execution context may be reaped.
    pub default_keep_alive_ms: u64,
    /// Period of the background reaper sweep.
    pub reap_interval_ms: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            default_keep_alive_ms: 5 * 60 * 1000,
            reap_interval_ms: 1000,
        }
    }
}

impl JobsConfig {
    /// Build from `DQE_JOBS_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (environment, test map, ...).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let cfg = Self {
            default_keep_alive_ms: parse_u64(
                &lookup,
                ENV_KEEP_ALIVE_MS,
                defaults.default_keep_alive_ms,
            )?,
            reap_interval_ms: parse_u64(&lookup, ENV_REAP_INTERVAL_MS, defaults.reap_interval_ms)?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.reap_interval_ms == 0 {
            return Err(DqeError::InvalidConfig(
                "reap_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.default_keep_alive_ms)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms)
    }
}

fn parse_u64(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<u64> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|e| DqeError::InvalidConfig(format!("{key}={raw:?}: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::{ENV_KEEP_ALIVE_MS, ENV_REAP_INTERVAL_MS, JobsConfig};
    use crate::DqeError;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn falls_back_to_defaults() {
        let cfg = JobsConfig::from_lookup(lookup(&[])).expect("config");
        assert_eq!(cfg, JobsConfig::default());
        assert_eq!(cfg.keep_alive(), Duration::from_secs(300));
    }

    #[test]
    fn reads_overrides() {
        let cfg = JobsConfig::from_lookup(lookup(&[
            (ENV_KEEP_ALIVE_MS, "30000"),
            (ENV_REAP_INTERVAL_MS, " 250 "),
        ]))
        .expect("config");
        assert_eq!(cfg.keep_alive(), Duration::from_secs(30));
        assert_eq!(cfg.reap_interval(), Duration::from_millis(250));
    }

    #[test]
    fn rejects_garbage_and_zero_interval() {
        let err = JobsConfig::from_lookup(lookup(&[(ENV_KEEP_ALIVE_MS, "soon")]))
            .expect_err("garbage");
        assert!(matches!(err, DqeError::InvalidConfig(msg) if msg.contains(ENV_KEEP_ALIVE_MS)));

        let err = JobsConfig::from_lookup(lookup(&[(ENV_REAP_INTERVAL_MS, "0")]))
            .expect_err("zero");
        assert!(matches!(err, DqeError::InvalidConfig(_)));
    }

    #[test]
    fn partial_json_uses_defaults() {
        let cfg: JobsConfig =
            serde_json::from_str(r#"{"reap_interval_ms": 10}"#).expect("decode");
        assert_eq!(cfg.reap_interval_ms, 10);
        assert_eq!(cfg.default_keep_alive_ms, 300_000);
    }
}
