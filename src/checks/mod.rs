//! Thin adapters over the probe engine for the proxy and stream checks.
//!
//! - [`ProxyChecker`] - connectivity and anonymity of a SOCKS5 proxy via an IP-echo endpoint
//! - [`check_stream`] - redirect-following playlist validation through a proxy

mod proxy;
mod stream;

pub use proxy::{DEFAULT_ECHO_URL, ProxyCheckReport, ProxyChecker};
pub use stream::{StreamCheckReport, check_stream, looks_like_m3u8};

use std::time::Duration;

/// Milliseconds, rounded, as reported in `response_time`.
fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
