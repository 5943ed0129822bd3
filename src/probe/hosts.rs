//! Per-request hostname override table, a scoped equivalent of `/etc/hosts`.

use std::collections::HashMap;
use std::net::IpAddr;

use tracing::trace;

/// Hostname to literal address map.
///
/// Keys are stored lower-cased; lookups ignore ASCII case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostsOverrideMap {
    entries: HashMap<String, IpAddr>,
}

impl HostsOverrideMap {
    /// Parses a newline-delimited override blob.
    ///
    /// Each line must hold exactly two whitespace-separated tokens, exactly one
    /// of which is an IP literal; either order is accepted. Blank lines, `#`
    /// comments and malformed lines are skipped. A later line for the same host
    /// replaces an earlier one.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut map = Self::default();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let [first, second] = tokens.as_slice() else {
                trace!(line, "Skipping hosts line without exactly two tokens");
                continue;
            };
            match (first.parse::<IpAddr>(), second.parse::<IpAddr>()) {
                (Ok(addr), Err(_)) => map.insert(second, addr),
                (Err(_), Ok(addr)) => map.insert(first, addr),
                _ => trace!(line, "Skipping hosts line without exactly one address"),
            }
        }
        map
    }

    /// Adds or replaces an override.
    pub fn insert(&mut self, host: &str, addr: IpAddr) {
        self.entries.insert(host.to_ascii_lowercase(), addr);
    }

    /// Returns the override for `host`, if any.
    #[must_use]
    pub fn get(&self, host: &str) -> Option<IpAddr> {
        self.entries.get(&host.to_ascii_lowercase()).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
