//! IP geolocation collaborator used by the proxy check.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Default lookup service.
pub const IP_API_BASE_URL: &str = "http://ip-api.com";

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Location of an IP address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LocationInfo {
    Known {
        country: String,
        region: String,
        city: String,
        isp: String,
    },
    /// Private, loopback or link-local address.
    Private,
    Unknown,
}

impl LocationInfo {
    /// Human-readable form: non-empty parts joined by `-`.
    #[must_use]
    pub fn display(&self) -> String {
        match self {
            Self::Known {
                country,
                region,
                city,
                isp,
            } => {
                let mut parts: Vec<&str> = Vec::new();
                for part in [country, region, city, isp] {
                    let part = part.trim();
                    if !part.is_empty() && parts.last() != Some(&part) {
                        parts.push(part);
                    }
                }
                if parts.is_empty() {
                    "unknown".to_string()
                } else {
                    parts.join("-")
                }
            }
            Self::Private => "private network".to_string(),
            Self::Unknown => "unknown".to_string(),
        }
    }
}

/// Looks up where an IP address is.
#[async_trait]
pub trait IpLocator: Send + Sync {
    /// Never fails; lookup problems yield [`LocationInfo::Unknown`].
    async fn locate(&self, ip: &str) -> LocationInfo;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpApiResponse {
    status: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    region_name: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    isp: String,
}

/// [`IpLocator`] backed by the ip-api.com JSON endpoint.
#[derive(Debug, Clone)]
pub struct IpApiLocator {
    client: reqwest::Client,
    base_url: String,
}

impl IpApiLocator {
    /// Creates a locator against `base_url` (no trailing slash needed).
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(LOOKUP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

impl Default for IpApiLocator {
    fn default() -> Self {
        Self::new(IP_API_BASE_URL)
    }
}

#[async_trait]
impl IpLocator for IpApiLocator {
    #[instrument(skip(self))]
    async fn locate(&self, ip: &str) -> LocationInfo {
        let Ok(addr) = ip.trim().parse::<IpAddr>() else {
            return LocationInfo::Unknown;
        };
        if is_private(addr) {
            return LocationInfo::Private;
        }

        let url = format!(
            "{}/json/{addr}?fields=status,country,regionName,city,isp",
            self.base_url
        );
        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!(error = %e, "IP lookup request failed");
                return LocationInfo::Unknown;
            }
        };
        match response.json::<IpApiResponse>().await {
            Ok(body) if body.status == "success" => LocationInfo::Known {
                country: body.country,
                region: body.region_name,
                city: body.city,
                isp: body.isp,
            },
            Ok(body) => {
                debug!(status = %body.status, "IP lookup returned no data");
                LocationInfo::Unknown
            }
            Err(e) => {
                debug!(error = %e, "IP lookup response was not JSON");
                LocationInfo::Unknown
            }
        }
    }
}

fn is_private(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified(),
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified() || (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}
