//! Configuration types.

use std::time::Duration;

use crate::error::ConfigError;

/// Hard ceiling on ids per batch-status request imposed by the transport.
pub const MAX_CHUNK_SIZE: usize = 50;

/// Monitor configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Base URL of the remote task API (submit, status, cancel).
    pub api_url: String,
    /// Interval between batch-status ticks.
    pub poll_interval: Duration,
    /// Maximum ids per batch-status request.
    pub chunk_size: usize,
    /// Delay between a job becoming ready and its automatic removal.
    pub grace_period: Duration,
    /// Interval between polls of a single long-running bulk operation.
    pub bulk_poll_interval: Duration,
    /// Give up on a bulk operation after this long.
    pub bulk_timeout: Duration,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000/api/tasks/".to_string(),
            poll_interval: Duration::from_secs(3),
            chunk_size: MAX_CHUNK_SIZE,
            grace_period: Duration::from_secs(5),
            bulk_poll_interval: Duration::from_secs(10),
            bulk_timeout: Duration::from_secs(24 * 60 * 60), // 24 hours
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl MonitorConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `EXTRACTION_API_URL` | `http://localhost:8000/api/tasks/` | Remote task API |
    /// | `EXTRACTION_POLL_INTERVAL_MS` | `3000` | Batch-status tick |
    /// | `EXTRACTION_CHUNK_SIZE` | `50` | Ids per status request (1..=50) |
    /// | `EXTRACTION_GRACE_PERIOD_MS` | `5000` | Ready → removal delay |
    /// | `EXTRACTION_BULK_POLL_INTERVAL_MS` | `10000` | Bulk monitor tick |
    /// | `EXTRACTION_BULK_TIMEOUT_SECS` | `86400` | Bulk monitor timeout |
    /// | `EXTRACTION_REQUEST_TIMEOUT_SECS` | `30` | HTTP request timeout |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup. `from_env` delegates here.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let api_url = lookup("EXTRACTION_API_URL").unwrap_or(defaults.api_url);
        if !api_url.starts_with("http://") && !api_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                key: "EXTRACTION_API_URL".to_string(),
                message: format!("expected an http(s) URL, got {api_url:?}"),
            });
        }

        let chunk_size = parse_u64(&lookup, "EXTRACTION_CHUNK_SIZE")?
            .map(|n| n as usize)
            .unwrap_or(defaults.chunk_size)
            .clamp(1, MAX_CHUNK_SIZE);

        Ok(Self {
            api_url,
            poll_interval: parse_interval_ms(
                &lookup,
                "EXTRACTION_POLL_INTERVAL_MS",
                defaults.poll_interval,
            )?,
            chunk_size,
            grace_period: parse_u64(&lookup, "EXTRACTION_GRACE_PERIOD_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.grace_period),
            bulk_poll_interval: parse_interval_ms(
                &lookup,
                "EXTRACTION_BULK_POLL_INTERVAL_MS",
                defaults.bulk_poll_interval,
            )?,
            bulk_timeout: parse_u64(&lookup, "EXTRACTION_BULK_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.bulk_timeout),
            request_timeout: parse_u64(&lookup, "EXTRACTION_REQUEST_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
        })
    }
}

/// A timer period in milliseconds. Zero is rejected: a timer cannot tick
/// every 0ms.
fn parse_interval_ms<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match parse_u64(lookup, key)? {
        None => Ok(default),
        Some(0) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "interval must be greater than zero".to_string(),
        }),
        Some(ms) => Ok(Duration::from_millis(ms)),
    }
}

fn parse_u64<F>(lookup: &F, key: &str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{raw:?}: {e}"),
            }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_reference_timings() {
        let cfg = MonitorConfig::from_lookup(|_| None).unwrap();
        assert_eq!(cfg.poll_interval, Duration::from_secs(3));
        assert_eq!(cfg.grace_period, Duration::from_secs(5));
        assert_eq!(cfg.bulk_poll_interval, Duration::from_secs(10));
        assert_eq!(cfg.bulk_timeout, Duration::from_secs(86_400));
        assert_eq!(cfg.chunk_size, 50);
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = MonitorConfig::from_lookup(lookup_from(&[
            ("EXTRACTION_API_URL", "https://geo.example.org/api/tasks/"),
            ("EXTRACTION_POLL_INTERVAL_MS", "1500"),
            ("EXTRACTION_GRACE_PERIOD_MS", "0"),
        ]))
        .unwrap();
        assert_eq!(cfg.api_url, "https://geo.example.org/api/tasks/");
        assert_eq!(cfg.poll_interval, Duration::from_millis(1500));
        assert_eq!(cfg.grace_period, Duration::ZERO);
    }

    #[test]
    fn chunk_size_is_clamped_to_transport_limit() {
        let cfg =
            MonitorConfig::from_lookup(lookup_from(&[("EXTRACTION_CHUNK_SIZE", "500")])).unwrap();
        assert_eq!(cfg.chunk_size, MAX_CHUNK_SIZE);

        let cfg =
            MonitorConfig::from_lookup(lookup_from(&[("EXTRACTION_CHUNK_SIZE", "0")])).unwrap();
        assert_eq!(cfg.chunk_size, 1);
    }

    #[test]
    fn invalid_number_is_rejected() {
        let err = MonitorConfig::from_lookup(lookup_from(&[("EXTRACTION_POLL_INTERVAL_MS", "fast")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "EXTRACTION_POLL_INTERVAL_MS"));
    }

    #[test]
    fn non_http_url_is_rejected() {
        let err = MonitorConfig::from_lookup(lookup_from(&[("EXTRACTION_API_URL", "ftp://x")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn zero_intervals_are_rejected() {
        for key in ["EXTRACTION_POLL_INTERVAL_MS", "EXTRACTION_BULK_POLL_INTERVAL_MS"] {
            let err = MonitorConfig::from_lookup(lookup_from(&[(key, "0")])).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidValue { key: ref k, .. } if k == key),
                "{key} accepted zero"
            );
        }
    }
}
