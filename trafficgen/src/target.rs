//! The validated target of a run.
//!
//! When a DNS override is configured every request connects to the override
//! address directly, keeping the original scheme and any non-default port,
//! and carries a `Host` header naming the original host.

use std::{net::IpAddr, num::NonZeroU32, time::Duration};

use http::{HeaderName, HeaderValue};
use url::{Position, Url};

use crate::config::{TargetConfig, ValidationError};

/// Where traffic goes and how much of it.
#[derive(Debug, Clone)]
pub struct Target {
    url: Url,
    origin: String,
    host_header: Option<HeaderValue>,
    forwarded_for: HeaderName,
    rate_limit: NonZeroU32,
    sim_users: u32,
    min_session_length: u32,
    max_session_length: u32,
    seed: Option<[u8; 32]>,
    stop_timeout: Duration,
}

impl TryFrom<TargetConfig> for Target {
    type Error = ValidationError;

    fn try_from(config: TargetConfig) -> Result<Self, Self::Error> {
        let raw = config.traffic_target_url.trim();
        let url = Url::parse(raw).map_err(|source| ValidationError::InvalidUrl {
            url: raw.to_string(),
            source,
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ValidationError::UnsupportedScheme(raw.to_string()));
        }
        let Some(host) = url.host_str().map(str::to_string) else {
            return Err(ValidationError::MissingHost(raw.to_string()));
        };

        let (origin, host_header) = match config.traffic_target_dns_override.as_deref() {
            None => (url[..Position::BeforePath].to_string(), None),
            Some(dns_override) => {
                let ip: IpAddr = dns_override
                    .trim()
                    .parse()
                    .map_err(|_| ValidationError::InvalidDnsOverride(dns_override.to_string()))?;
                let authority = match ip {
                    IpAddr::V4(v4) => v4.to_string(),
                    IpAddr::V6(v6) => format!("[{v6}]"),
                };
                // `Url::port` is `None` when the port is the scheme default.
                let origin = match url.port() {
                    Some(port) => format!("{}://{authority}:{port}", url.scheme()),
                    None => format!("{}://{authority}", url.scheme()),
                };
                let host_header = HeaderValue::from_str(&host)
                    .map_err(|_| ValidationError::InvalidHeaderValue("host".to_string()))?;
                (origin, Some(host_header))
            }
        };

        let forwarded_for = HeaderName::from_bytes(config.xff_header_name.trim().as_bytes())
            .map_err(|_| ValidationError::InvalidHeaderName(config.xff_header_name.clone()))?;

        let rate_limit = NonZeroU32::new(config.rate_limit).ok_or(ValidationError::ZeroRateLimit)?;

        if config.max_session_length == 0 {
            return Err(ValidationError::ZeroSessionLength);
        }
        if config.min_session_length > config.max_session_length {
            return Err(ValidationError::SessionBounds {
                min: config.min_session_length,
                max: config.max_session_length,
            });
        }

        Ok(Self {
            url,
            origin,
            host_header,
            forwarded_for,
            rate_limit,
            sim_users: config.sim_users,
            min_session_length: config.min_session_length,
            max_session_length: config.max_session_length,
            seed: config.seed,
            stop_timeout: Duration::from_secs(config.stop_timeout_seconds),
        })
    }
}

impl Target {
    /// The full URL for `path`, connecting through the DNS override if one
    /// is configured.
    #[must_use]
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.origin)
        } else {
            format!("{}/{path}", self.origin)
        }
    }

    /// The configured target URL.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The `Host` header to send, present only under a DNS override.
    #[must_use]
    pub fn host_header(&self) -> Option<&HeaderValue> {
        self.host_header.as_ref()
    }

    /// Header carrying each simulated user's address.
    #[must_use]
    pub fn forwarded_for(&self) -> &HeaderName {
        &self.forwarded_for
    }

    /// Maximum requests in flight across all users.
    #[must_use]
    pub fn rate_limit(&self) -> NonZeroU32 {
        self.rate_limit
    }

    /// Number of simulated users.
    #[must_use]
    pub fn sim_users(&self) -> u32 {
        self.sim_users
    }

    /// Inclusive session length bounds, in seconds.
    #[must_use]
    pub fn session_bounds(&self) -> (u32, u32) {
        (self.min_session_length, self.max_session_length)
    }

    /// Seed of the run's random decisions.
    #[must_use]
    pub fn seed(&self) -> Option<[u8; 32]> {
        self.seed
    }

    /// Time allowed for tasks to wind down on stop.
    #[must_use]
    pub fn stop_timeout(&self) -> Duration {
        self.stop_timeout
    }
}

#[cfg(test)]
pub(crate) mod test {
    use crate::config::TargetConfig;

    pub(crate) fn config(url: &str) -> TargetConfig {
        TargetConfig {
            traffic_target_url: url.to_string(),
            traffic_target_dns_override: None,
            xff_header_name: "X-Forwarded-For".to_string(),
            rate_limit: 4,
            sim_users: 2,
            min_session_length: 1,
            max_session_length: 5,
            debug: false,
            seed: Some([3; 32]),
            stop_timeout_seconds: 5,
        }
    }
}
