//! Client configuration

use chrono::{FixedOffset, Offset, Utc};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::time::Duration;

/// Client configuration for talking to the dispatch backend
///
/// # 环境变量
///
/// | 环境变量 | 默认值 | 说明 |
/// |----------|--------|------|
/// | PEDICAB_API_URL | http://localhost:8000/api | Backend base URL |
/// | PEDICAB_REQUEST_TIMEOUT_SECS | 30 | Request timeout |
/// | PEDICAB_PRESENCE_INTERVAL_SECS | 30 | Heartbeat and location interval |
/// | PEDICAB_ORDER_POLL_SECS | (off) | Optional order auto-refresh |
/// | PEDICAB_SESSION_DIR | ./.pedicab | Session storage directory |
/// | PEDICAB_UTC_OFFSET_HOURS | 7 | Offset for "today" / "this month" |
/// | PEDICAB_MIN_WITHDRAWAL | 10000 | Minimum withdrawal amount |
/// | PEDICAB_LOG_LEVEL | info | Log level |
/// | PEDICAB_LOG_DIR | (none) | Rolling log directory |
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server base URL (e.g., "http://localhost:8000/api")
    pub base_url: String,

    /// Request timeout in seconds
    pub timeout: u64,

    /// Presence heartbeat and location push interval
    pub presence_interval: Duration,

    /// Order auto-refresh interval; `None` keeps refresh manual
    pub order_poll_interval: Option<Duration>,

    /// Directory holding the persisted session
    pub session_dir: PathBuf,

    /// Offset used to bucket earnings by local day and month
    pub utc_offset: FixedOffset,

    /// Smallest withdrawal the backend accepts
    pub min_withdrawal: Decimal,

    /// Log level for [`crate::logger::init_logger`]
    pub log_level: String,

    /// Rolling log directory
    pub log_dir: Option<String>,
}

const DEFAULT_OFFSET_SECS: i32 = 7 * 3600;

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl ClientConfig {
    /// Create a new client configuration
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: 30,
            presence_interval: Duration::from_secs(30),
            order_poll_interval: None,
            session_dir: PathBuf::from(".pedicab"),
            utc_offset: FixedOffset::east_opt(DEFAULT_OFFSET_SECS).unwrap_or_else(|| Utc.fix()),
            min_withdrawal: Decimal::from(10_000),
            log_level: "info".to_string(),
            log_dir: None,
        }
    }

    /// 从环境变量加载配置
    ///
    /// Reads a `.env` file first when one exists; unset or unparsable
    /// variables keep their defaults.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let mut config = Self::new(
            std::env::var("PEDICAB_API_URL").unwrap_or_else(|_| "http://localhost:8000/api".into()),
        );
        if let Some(timeout) = env_parse("PEDICAB_REQUEST_TIMEOUT_SECS") {
            config.timeout = timeout;
        }
        if let Some(secs) = env_parse::<u64>("PEDICAB_PRESENCE_INTERVAL_SECS").filter(|s| *s > 0) {
            config.presence_interval = Duration::from_secs(secs);
        }
        config.order_poll_interval = env_parse::<u64>("PEDICAB_ORDER_POLL_SECS")
            .filter(|s| *s > 0)
            .map(Duration::from_secs);
        if let Ok(dir) = std::env::var("PEDICAB_SESSION_DIR") {
            config.session_dir = PathBuf::from(dir);
        }
        if let Some(offset) = env_parse::<i32>("PEDICAB_UTC_OFFSET_HOURS")
            .and_then(|h| FixedOffset::east_opt(h * 3600))
        {
            config.utc_offset = offset;
        }
        if let Some(min) = env_parse("PEDICAB_MIN_WITHDRAWAL") {
            config.min_withdrawal = min;
        }
        if let Ok(level) = std::env::var("PEDICAB_LOG_LEVEL") {
            config.log_level = level;
        }
        config.log_dir = std::env::var("PEDICAB_LOG_DIR").ok();
        config
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout = seconds;
        self
    }

    /// Set the presence interval
    pub fn with_presence_interval(mut self, interval: Duration) -> Self {
        self.presence_interval = interval;
        self
    }

    /// Enable automatic order refresh
    pub fn with_order_poll_interval(mut self, interval: Duration) -> Self {
        self.order_poll_interval = Some(interval);
        self
    }

    /// Set the session storage directory
    pub fn with_session_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.session_dir = dir.into();
        self
    }

    /// Set the offset used for local day / month
    pub fn with_utc_offset(mut self, offset: FixedOffset) -> Self {
        self.utc_offset = offset;
        self
    }

    /// Set the minimum withdrawal amount
    pub fn with_min_withdrawal(mut self, amount: Decimal) -> Self {
        self.min_withdrawal = amount;
        self
    }

    /// Create an HTTP client from this configuration
    pub fn build_http_client(&self) -> crate::ClientResult<crate::NetworkHttpClient> {
        crate::NetworkHttpClient::new(self)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("http://localhost:8000/api")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.timeout, 30);
        assert_eq!(config.presence_interval, Duration::from_secs(30));
        assert!(config.order_poll_interval.is_none());
        assert_eq!(config.utc_offset.local_minus_utc(), 7 * 3600);
        assert_eq!(config.min_withdrawal, Decimal::from(10_000));
    }

    #[test]
    fn test_builders() {
        let config = ClientConfig::new("http://dispatch.test/api")
            .with_timeout(5)
            .with_presence_interval(Duration::from_millis(50))
            .with_order_poll_interval(Duration::from_secs(60))
            .with_min_withdrawal(Decimal::from(50_000));
        assert_eq!(config.base_url, "http://dispatch.test/api");
        assert_eq!(config.timeout, 5);
        assert_eq!(config.presence_interval, Duration::from_millis(50));
        assert_eq!(config.order_poll_interval, Some(Duration::from_secs(60)));
        assert_eq!(config.min_withdrawal, Decimal::from(50_000));
    }
}
