//! Bridge tuning knobs.
//!
//! Every value has a serde default so partial configs deserialize, and
//! `from_env` overlays `DEVTOOLS_BRIDGE_*` variables on top of the defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const ENV_PREFIX: &str = "DEVTOOLS_BRIDGE_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Idle-callback timeout while the peer has not paused us.
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,
    /// Idle-callback timeout while paused.
    #[serde(default = "default_paused_flush_timeout_ms")]
    pub paused_flush_timeout_ms: u64,
    #[serde(default = "default_chunk_count")]
    pub chunk_count: usize,
    #[serde(default = "default_paused_chunk_count")]
    pub paused_chunk_count: usize,
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,
    #[serde(default = "default_paused_min_chunk_size")]
    pub paused_min_chunk_size: usize,
    /// Fail outstanding calls after this long. `None` waits forever.
    #[serde(default)]
    pub call_timeout_ms: Option<u64>,
    #[serde(default)]
    pub polyfill: PolyfillConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolyfillConfig {
    /// Budget reported by each synthesized deadline.
    #[serde(default = "default_frame_budget_ms")]
    pub frame_budget_ms: u64,
    /// Assumed duration of the previous callback before any has run.
    #[serde(default = "default_initial_run_ms")]
    pub initial_run_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: u32,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_flush_timeout_ms() -> u64 {
    500
}

fn default_paused_flush_timeout_ms() -> u64 {
    5000
}

fn default_chunk_count() -> usize {
    10
}

fn default_paused_chunk_count() -> usize {
    20
}

fn default_min_chunk_size() -> usize {
    100
}

fn default_paused_min_chunk_size() -> usize {
    50
}

fn default_frame_budget_ms() -> u64 {
    50
}

fn default_initial_run_ms() -> u64 {
    50
}

fn default_backoff_factor() -> u32 {
    3
}

fn default_max_delay_ms() -> u64 {
    500
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            flush_timeout_ms: default_flush_timeout_ms(),
            paused_flush_timeout_ms: default_paused_flush_timeout_ms(),
            chunk_count: default_chunk_count(),
            paused_chunk_count: default_paused_chunk_count(),
            min_chunk_size: default_min_chunk_size(),
            paused_min_chunk_size: default_paused_min_chunk_size(),
            call_timeout_ms: None,
            polyfill: PolyfillConfig::default(),
        }
    }
}

impl Default for PolyfillConfig {
    fn default() -> Self {
        Self {
            frame_budget_ms: default_frame_budget_ms(),
            initial_run_ms: default_initial_run_ms(),
            backoff_factor: default_backoff_factor(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl BridgeConfig {
    /// Defaults overlaid with any `DEVTOOLS_BRIDGE_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        let read = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        overlay(&mut cfg.flush_timeout_ms, "FLUSH_TIMEOUT_MS", read("FLUSH_TIMEOUT_MS"));
        overlay(
            &mut cfg.paused_flush_timeout_ms,
            "PAUSED_FLUSH_TIMEOUT_MS",
            read("PAUSED_FLUSH_TIMEOUT_MS"),
        );
        overlay(&mut cfg.chunk_count, "CHUNK_COUNT", read("CHUNK_COUNT"));
        overlay(&mut cfg.paused_chunk_count, "PAUSED_CHUNK_COUNT", read("PAUSED_CHUNK_COUNT"));
        overlay(&mut cfg.min_chunk_size, "MIN_CHUNK_SIZE", read("MIN_CHUNK_SIZE"));
        overlay(
            &mut cfg.paused_min_chunk_size,
            "PAUSED_MIN_CHUNK_SIZE",
            read("PAUSED_MIN_CHUNK_SIZE"),
        );
        if let Some(raw) = read("CALL_TIMEOUT_MS") {
            let mut timeout = 0u64;
            overlay(&mut timeout, "CALL_TIMEOUT_MS", Some(raw));
            cfg.call_timeout_ms = (timeout > 0).then_some(timeout);
        }

        overlay(&mut cfg.polyfill.frame_budget_ms, "FRAME_BUDGET_MS", read("FRAME_BUDGET_MS"));
        overlay(&mut cfg.polyfill.initial_run_ms, "INITIAL_RUN_MS", read("INITIAL_RUN_MS"));
        overlay(&mut cfg.polyfill.backoff_factor, "BACKOFF_FACTOR", read("BACKOFF_FACTOR"));
        overlay(&mut cfg.polyfill.max_delay_ms, "MAX_DELAY_MS", read("MAX_DELAY_MS"));
        cfg
    }

    pub fn flush_timeout(&self, paused: bool) -> Duration {
        if paused {
            Duration::from_millis(self.paused_flush_timeout_ms)
        } else {
            Duration::from_millis(self.flush_timeout_ms)
        }
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }
}

impl PolyfillConfig {
    pub fn frame_budget(&self) -> Duration {
        Duration::from_millis(self.frame_budget_ms)
    }

    pub fn initial_run(&self) -> Duration {
        Duration::from_millis(self.initial_run_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

fn overlay<T: std::str::FromStr>(slot: &mut T, name: &str, raw: Option<String>) {
    let Some(raw) = raw else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!("ignoring invalid {ENV_PREFIX}{name}={raw:?}, keeping default"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_protocol_constants() {
        let cfg = BridgeConfig::default();
        assert_eq!(cfg.flush_timeout(false), Duration::from_millis(500));
        assert_eq!(cfg.flush_timeout(true), Duration::from_millis(5000));
        assert_eq!((cfg.chunk_count, cfg.paused_chunk_count), (10, 20));
        assert_eq!((cfg.min_chunk_size, cfg.paused_min_chunk_size), (100, 50));
        assert_eq!(cfg.call_timeout(), None);
        assert_eq!(cfg.polyfill.frame_budget(), Duration::from_millis(50));
        assert_eq!(cfg.polyfill.max_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg: BridgeConfig =
            serde_json::from_str(r#"{"chunk_count": 4, "polyfill": {"max_delay_ms": 250}}"#)
                .unwrap();
        assert_eq!(cfg.chunk_count, 4);
        assert_eq!(cfg.min_chunk_size, 100);
        assert_eq!(cfg.polyfill.max_delay_ms, 250);
        assert_eq!(cfg.polyfill.backoff_factor, 3);
    }

    #[test]
    fn test_env_overlay() {
        let cfg = BridgeConfig::from_lookup(lookup_from(&[
            ("DEVTOOLS_BRIDGE_FLUSH_TIMEOUT_MS", "250"),
            ("DEVTOOLS_BRIDGE_CALL_TIMEOUT_MS", "1000"),
            ("DEVTOOLS_BRIDGE_BACKOFF_FACTOR", "2"),
        ]));
        assert_eq!(cfg.flush_timeout_ms, 250);
        assert_eq!(cfg.call_timeout(), Some(Duration::from_secs(1)));
        assert_eq!(cfg.polyfill.backoff_factor, 2);
        assert_eq!(cfg.paused_flush_timeout_ms, 5000);
    }

    #[test]
    fn test_env_overlay_ignores_garbage() {
        let cfg = BridgeConfig::from_lookup(lookup_from(&[
            ("DEVTOOLS_BRIDGE_CHUNK_COUNT", "many"),
            ("DEVTOOLS_BRIDGE_CALL_TIMEOUT_MS", "0"),
        ]));
        assert_eq!(cfg.chunk_count, 10);
        assert_eq!(cfg.call_timeout(), None);
    }
}
