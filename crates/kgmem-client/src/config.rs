//! Client configuration: carrier selection plus session deadlines.

use kgmem_session::SessionConfig;
use kgmem_transport::TransportConfig;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub transport: TransportConfig,
    pub session: SessionConfig,
}

impl ClientConfig {
    pub fn new(transport: TransportConfig) -> Self {
        Self {
            transport,
            session: SessionConfig::default(),
        }
    }

    /// Transport settings from the environment (see [`TransportConfig::from_env`]) plus
    /// `MCP_REQUEST_TIMEOUT_SECS`; `0` disables the per-request deadline.
    pub fn from_env() -> Self {
        let mut config = Self::new(TransportConfig::from_env());
        if let Ok(raw) = std::env::var("MCP_REQUEST_TIMEOUT_SECS") {
            match parse_timeout(&raw) {
                Some(timeout) => config.session.request_timeout = timeout,
                None => warn!(value = %raw, "ignoring non-numeric MCP_REQUEST_TIMEOUT_SECS"),
            }
        }
        config
    }

    /// Per-request deadline; `None` waits for as long as the session lives.
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.session.request_timeout = timeout;
        self
    }
}

/// `Some(None)` means "no deadline".
fn parse_timeout(raw: &str) -> Option<Option<Duration>> {
    match raw.trim().parse::<u64>().ok()? {
        0 => Some(None),
        secs => Some(Some(Duration::from_secs(secs))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_disables_the_deadline() {
        assert_eq!(parse_timeout("0"), Some(None));
        assert_eq!(parse_timeout(" 45 "), Some(Some(Duration::from_secs(45))));
        assert_eq!(parse_timeout("soon"), None);
    }

    #[test]
    fn defaults_use_thirty_second_requests() {
        let c = ClientConfig::default();
        assert_eq!(c.session.request_timeout, Some(Duration::from_secs(30)));
        let c = c.with_request_timeout(None);
        assert_eq!(c.session.request_timeout, None);
    }
}
