//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::trace::CHUNK_SIZE;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid value for {var}: {value}")]
pub struct ConfigError {
    pub var: String,
    pub value: String,
}

/// Trace chunk storage settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Capacity of a single chunk in bytes.
    pub chunk_size: usize,
    /// Attempts made to obtain a chunk's write lease.
    pub write_lock_retries: u32,
    /// Pause between lease attempts (milliseconds).
    pub write_lock_sleep_ms: u64,
    /// Lease lifetime, after which a crashed writer's lease lapses (seconds).
    pub write_lock_ttl_secs: u64,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            write_lock_retries: 10,
            write_lock_sleep_ms: 10,
            write_lock_ttl_secs: 60,
        }
    }
}

impl TraceConfig {
    pub fn write_lock_sleep(&self) -> Duration {
        Duration::from_millis(self.write_lock_sleep_ms)
    }

    pub fn write_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.write_lock_ttl_secs)
    }
}

/// Resource group coordination settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceGroupConfig {
    /// Finished holders untouched for this long lose their resource.
    pub stale_threshold_secs: u64,
    /// How often the stale sweep runs.
    pub sweep_interval_secs: u64,
}

impl Default for ResourceGroupConfig {
    fn default() -> Self {
        Self {
            stale_threshold_secs: 5 * 60,
            sweep_interval_secs: 60,
        }
    }
}

/// Job lifecycle settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Project-wide job timeout (seconds).
    pub project_timeout_secs: u64,
    /// Reload-and-recompute attempts after an optimistic lock conflict.
    pub transition_retries: u32,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            project_timeout_secs: 60 * 60,
            transition_retries: 5,
        }
    }
}

/// Top-level configuration shared by the engine services.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub trace: TraceConfig,
    pub resource_groups: ResourceGroupConfig,
    pub jobs: JobConfig,
    /// Buffered outbox events per subscriber.
    pub outbox_capacity: Option<usize>,
}

impl EngineConfig {
    pub const DEFAULT_OUTBOX_CAPACITY: usize = 1024;

    pub fn outbox_capacity(&self) -> usize {
        self.outbox_capacity
            .unwrap_or(Self::DEFAULT_OUTBOX_CAPACITY)
            .max(1)
    }

    /// Set the trace chunk capacity.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.trace.chunk_size = chunk_size;
        self
    }

    /// Set the stale resource threshold.
    pub fn with_stale_threshold(mut self, secs: u64) -> Self {
        self.resource_groups.stale_threshold_secs = secs;
        self
    }

    /// Build a config from defaults overridden by environment variables.
    ///
    /// - `CI_TRACE_CHUNK_SIZE`
    /// - `CI_TRACE_WRITE_LOCK_RETRIES`, `CI_TRACE_WRITE_LOCK_SLEEP_MS`, `CI_TRACE_WRITE_LOCK_TTL_SECS`
    /// - `CI_RESOURCE_STALE_THRESHOLD_SECS`, `CI_RESOURCE_SWEEP_INTERVAL_SECS`
    /// - `CI_PROJECT_TIMEOUT_SECS`, `CI_TRANSITION_RETRIES`
    /// - `CI_OUTBOX_CAPACITY`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like [`EngineConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        let trace = &mut cfg.trace;
        override_from(&lookup, "CI_TRACE_CHUNK_SIZE", &mut trace.chunk_size)?;
        override_from(&lookup, "CI_TRACE_WRITE_LOCK_RETRIES", &mut trace.write_lock_retries)?;
        override_from(&lookup, "CI_TRACE_WRITE_LOCK_SLEEP_MS", &mut trace.write_lock_sleep_ms)?;
        override_from(&lookup, "CI_TRACE_WRITE_LOCK_TTL_SECS", &mut trace.write_lock_ttl_secs)?;

        let groups = &mut cfg.resource_groups;
        override_from(
            &lookup,
            "CI_RESOURCE_STALE_THRESHOLD_SECS",
            &mut groups.stale_threshold_secs,
        )?;
        override_from(
            &lookup,
            "CI_RESOURCE_SWEEP_INTERVAL_SECS",
            &mut groups.sweep_interval_secs,
        )?;

        override_from(&lookup, "CI_PROJECT_TIMEOUT_SECS", &mut cfg.jobs.project_timeout_secs)?;
        override_from(&lookup, "CI_TRANSITION_RETRIES", &mut cfg.jobs.transition_retries)?;

        let mut capacity = cfg.outbox_capacity();
        override_from(&lookup, "CI_OUTBOX_CAPACITY", &mut capacity)?;
        cfg.outbox_capacity = Some(capacity);

        if cfg.trace.chunk_size == 0 {
            return Err(ConfigError {
                var: "CI_TRACE_CHUNK_SIZE".into(),
                value: "0".into(),
            });
        }
        Ok(cfg)
    }
}

fn override_from<F, T>(lookup: &F, var: &str, slot: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let Some(raw) = lookup(var) else {
        return Ok(());
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(());
    }
    *slot = trimmed.parse().map_err(|_| ConfigError {
        var: var.to_string(),
        value: raw.clone(),
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.trace.chunk_size, 128 * 1024);
        assert_eq!(cfg.trace.write_lock_retries, 10);
        assert_eq!(cfg.trace.write_lock_sleep(), Duration::from_millis(10));
        assert_eq!(cfg.trace.write_lock_ttl(), Duration::from_secs(60));
        assert_eq!(cfg.resource_groups.stale_threshold_secs, 300);
        assert_eq!(cfg.outbox_capacity(), 1024);
    }

    #[test]
    fn partial_json_keeps_defaults() -> Result<(), serde_json::Error> {
        let cfg: EngineConfig =
            serde_json::from_str(r#"{"resource_groups": {"stale_threshold_secs": 30}}"#)?;
        assert_eq!(cfg.resource_groups.stale_threshold_secs, 30);
        assert_eq!(cfg.resource_groups.sweep_interval_secs, 60);
        assert_eq!(cfg.trace, TraceConfig::default());
        Ok(())
    }

    #[test]
    fn lookup_overrides() -> Result<(), ConfigError> {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("CI_TRACE_CHUNK_SIZE", "10"),
            ("CI_RESOURCE_STALE_THRESHOLD_SECS", " 120 "),
            ("CI_TRANSITION_RETRIES", ""),
        ]);
        let cfg = EngineConfig::from_lookup(|var| vars.get(var).map(|v| v.to_string()))?;
        assert_eq!(cfg.trace.chunk_size, 10);
        assert_eq!(cfg.resource_groups.stale_threshold_secs, 120);
        assert_eq!(cfg.jobs.transition_retries, 5);
        Ok(())
    }

    #[test]
    fn lookup_rejects_garbage() {
        let err = EngineConfig::from_lookup(|var| {
            (var == "CI_TRACE_WRITE_LOCK_RETRIES").then(|| "ten".to_string())
        });
        assert_eq!(
            err,
            Err(ConfigError {
                var: "CI_TRACE_WRITE_LOCK_RETRIES".into(),
                value: "ten".into()
            })
        );
    }
}
