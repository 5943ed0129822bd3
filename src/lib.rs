//! Streamprobe Core Library
//!
//! HTTP and IPTV endpoint diagnostics: follows redirect chains hop by hop
//! (optionally through a SOCKS5 proxy and with per-request hostname
//! overrides), classifies failures into a fixed taxonomy, and shapes the final
//! response for display.
//!
//! # Architecture
//!
//! - [`probe`] - the engine: request model, resolver, transport, redirect loop, classifiers
//! - [`cache`] - short-lived, read-once storage for bodies too large to inline
//! - [`playlist`] - M3U/HLS validation and summary
//! - [`checks`] - proxy connectivity and stream validation adapters
//! - [`batch`] - bounded-concurrency orchestration with retry and stop/pause
//! - [`wire`] - JSON request parsing and the result envelope
//! - [`server`] - axum HTTP service
//! - [`geo`] - IP geolocation lookups
//! - [`clock`] - injectable time source

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod batch;
pub mod cache;
pub mod checks;
pub mod clock;
pub mod geo;
pub mod playlist;
pub mod probe;
pub mod server;
pub mod wire;

// Re-export commonly used types
pub use batch::{BatchConfig, BatchControl, BatchError, BatchItem, BatchResult, BatchRunner, BatchStats};
pub use cache::{ArtifactCache, CacheEntry, CacheError, DEFAULT_TTL as DEFAULT_CACHE_TTL};
pub use checks::{ProxyCheckReport, ProxyChecker, StreamCheckReport, check_stream};
pub use clock::{Clock, SystemClock};
pub use geo::{IpApiLocator, IpLocator, LocationInfo};
pub use playlist::PlaylistSummary;
pub use probe::{
    DnsResolver, ErrorTaxonomy, HostResolver, HostsOverrideMap, ProbeEngine, ProbeMethod,
    ProbeOutcome, ProbeProfile, ProbeReport, ProxyDescriptor, RedirectHop, ReqwestTransport,
    RequestSpec, Transport,
};
pub use wire::{ProbeRequestBody, ResultRecord, WireError};
