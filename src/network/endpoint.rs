//! Endpoint records and their health.

use serde::Serialize;
use time::OffsetDateTime;
use url::Url;

/// Health of one endpoint as last observed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointHealth {
    /// Whether this endpoint holds the active connection.
    pub connected: bool,
    /// Last failure seen on this endpoint.
    pub last_error: Option<String>,
    /// Last time the endpoint was contacted.
    pub last_checked: Option<OffsetDateTime>,
    /// Failures since the last success.
    pub consecutive_failures: u32,
}

/// A remote network access point.
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// Stable identifier.
    pub id: String,
    /// RPC URL. May embed an API key; log [`Endpoint::display_host`] instead.
    pub url: Url,
    /// Rank; lower is tried first.
    pub priority: usize,
    /// Last observed health.
    pub health: EndpointHealth,
}

impl Endpoint {
    /// Create a disconnected endpoint.
    pub fn new(id: impl Into<String>, url: Url, priority: usize) -> Self {
        Self {
            id: id.into(),
            url,
            priority,
            health: EndpointHealth::default(),
        }
    }

    /// Host part of the URL, safe to log.
    pub fn display_host(&self) -> String {
        self.url.host_str().unwrap_or("unknown").to_string()
    }

    pub(crate) fn mark_connected(&mut self) {
        self.health.connected = true;
        self.health.last_error = None;
        self.health.consecutive_failures = 0;
        self.health.last_checked = Some(OffsetDateTime::now_utc());
    }

    pub(crate) fn mark_failed(&mut self, error: impl ToString) {
        self.health.connected = false;
        self.health.last_error = Some(error.to_string());
        self.health.consecutive_failures = self.health.consecutive_failures.saturating_add(1);
        self.health.last_checked = Some(OffsetDateTime::now_utc());
    }

    /// Serializable view.
    pub fn snapshot(&self) -> EndpointSnapshot {
        EndpointSnapshot {
            id: self.id.clone(),
            host: self.display_host(),
            priority: self.priority,
            connected: self.health.connected,
            last_error: self.health.last_error.clone(),
            last_checked: self.health.last_checked.map(|t| t.unix_timestamp()),
            consecutive_failures: self.health.consecutive_failures,
        }
    }
}

/// Endpoint health as exposed on the status API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointSnapshot {
    /// Identifier.
    pub id: String,
    /// Host name.
    pub host: String,
    /// Rank.
    pub priority: usize,
    /// Holds the active connection.
    pub connected: bool,
    /// Last failure.
    pub last_error: Option<String>,
    /// Last contact (unix seconds).
    pub last_checked: Option<i64>,
    /// Failures since the last success.
    pub consecutive_failures: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_host_hides_path_key() {
        let ep = Endpoint::new(
            "endpoint-0",
            Url::parse("https://polygon-mainnet.g.alchemy.com/v2/secret").unwrap(),
            0,
        );
        assert_eq!(ep.display_host(), "polygon-mainnet.g.alchemy.com");
        assert!(!ep.snapshot().host.contains("secret"));
    }

    #[test]
    fn failures_accumulate_until_success() {
        let mut ep = Endpoint::new("e", Url::parse("http://localhost:8545").unwrap(), 0);
        ep.mark_failed("refused");
        ep.mark_failed("refused");
        assert_eq!(ep.health.consecutive_failures, 2);
        assert!(!ep.health.connected);

        ep.mark_connected();
        assert_eq!(ep.health.consecutive_failures, 0);
        assert!(ep.health.connected);
        assert_eq!(ep.health.last_error, None);
    }
}
