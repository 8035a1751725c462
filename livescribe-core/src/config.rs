//! Session tuning knobs.
//!
//! Every field has a default and an environment override
//! (`LIVESCRIBE_<FIELD>`), clamped to a sane range. Hosts normally build the
//! config once via [`SessionConfig::from_env`].

/// Sample rate used when a caller does not specify one.
pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;

/// Capture buffers are never smaller than this, whatever the device reports.
pub const MIN_CAPTURE_BUFFER_BYTES: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Floor applied to the device's minimum buffer size. Default: 4096.
    pub min_buffer_bytes: usize,
    /// Sleep after a read that returned no data. Default: 5 ms.
    pub empty_read_sleep_ms: u64,
    /// Sleep after a failed read before retrying. Default: 20 ms.
    pub read_error_backoff_ms: u64,
    /// Consecutive failed reads (no successful read in between) after which
    /// the device is declared failed. Default: 50 (~1 s of backoff).
    pub max_consecutive_read_errors: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            min_buffer_bytes: MIN_CAPTURE_BUFFER_BYTES,
            empty_read_sleep_ms: 5,
            read_error_backoff_ms: 20,
            max_consecutive_read_errors: 50,
        }
    }
}

impl SessionConfig {
    /// Defaults overlaid with `LIVESCRIBE_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parse = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            min_buffer_bytes: parse("LIVESCRIBE_MIN_BUFFER_BYTES")
                .map(|v| (v as usize).clamp(MIN_CAPTURE_BUFFER_BYTES, 1 << 20))
                .unwrap_or(defaults.min_buffer_bytes),
            empty_read_sleep_ms: parse("LIVESCRIBE_EMPTY_READ_SLEEP_MS")
                .map(|v| v.clamp(1, 20))
                .unwrap_or(defaults.empty_read_sleep_ms),
            read_error_backoff_ms: parse("LIVESCRIBE_READ_ERROR_BACKOFF_MS")
                .map(|v| v.clamp(1, 1_000))
                .unwrap_or(defaults.read_error_backoff_ms),
            max_consecutive_read_errors: parse("LIVESCRIBE_MAX_CONSECUTIVE_READ_ERRORS")
                .map(|v| v.clamp(1, 10_000) as u32)
                .unwrap_or(defaults.max_consecutive_read_errors),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_environment_is_empty() {
        assert_eq!(SessionConfig::from_lookup(|_| None), SessionConfig::default());
    }

    #[test]
    fn overrides_are_parsed_and_clamped() {
        let cfg = SessionConfig::from_lookup(lookup(&[
            ("LIVESCRIBE_MIN_BUFFER_BYTES", "1024"),
            ("LIVESCRIBE_EMPTY_READ_SLEEP_MS", "500"),
            ("LIVESCRIBE_READ_ERROR_BACKOFF_MS", " 40 "),
            ("LIVESCRIBE_MAX_CONSECUTIVE_READ_ERRORS", "3"),
        ]));
        assert_eq!(cfg.min_buffer_bytes, MIN_CAPTURE_BUFFER_BYTES);
        assert_eq!(cfg.empty_read_sleep_ms, 20);
        assert_eq!(cfg.read_error_backoff_ms, 40);
        assert_eq!(cfg.max_consecutive_read_errors, 3);
    }

    #[test]
    fn unparsable_values_fall_back_to_defaults() {
        let cfg = SessionConfig::from_lookup(lookup(&[("LIVESCRIBE_EMPTY_READ_SLEEP_MS", "fast")]));
        assert_eq!(cfg.empty_read_sleep_ms, SessionConfig::default().empty_read_sleep_ms);
    }
}
