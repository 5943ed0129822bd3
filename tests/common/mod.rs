//! Shared fakes for engine-level integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use streamprobe_core::clock::Clock;
use streamprobe_core::probe::{
    HostResolver, ProbeEngine, ProbeProfile, RawOutcome, ResolvedTarget, ResponseHeaders, Timing,
    Transport, TransportErrorKind, TransportFailure, TransportRequest,
};

/// Resolver answering every lookup with one address, counting calls.
#[derive(Debug, Default)]
pub struct FixedResolver {
    pub answer: Option<Ipv4Addr>,
    pub lookups: Mutex<Vec<String>>,
}

impl FixedResolver {
    pub fn answering(addr: Ipv4Addr) -> Self {
        Self {
            answer: Some(addr),
            lookups: Mutex::new(Vec::new()),
        }
    }

    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().unwrap().clone()
    }
}

#[async_trait]
impl HostResolver for FixedResolver {
    async fn lookup_ipv4(&self, host: &str) -> Option<Ipv4Addr> {
        self.lookups.lock().unwrap().push(host.to_string());
        self.answer
    }
}

/// What the engine asked the transport to do on one hop.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub url: String,
    pub target: Option<ResolvedTarget>,
    pub proxy: Option<String>,
    pub timeout: Duration,
}

/// Transport replaying scripted outcomes in order.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    outcomes: Mutex<VecDeque<RawOutcome>>,
    seen: Mutex<Vec<SeenRequest>>,
}

impl ScriptedTransport {
    pub fn new(outcomes: impl IntoIterator<Item = RawOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn invoke(&self, request: &TransportRequest<'_>) -> RawOutcome {
        self.seen.lock().unwrap().push(SeenRequest {
            url: request.url.to_string(),
            target: request.target,
            proxy: request.proxy.map(|p| p.address().to_string()),
            timeout: request.timeout,
        });
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| response(200, &[], b""))
    }
}

/// Clock frozen at a fixed instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub SystemTime);

impl Clock for FixedClock {
    fn now(&self) -> SystemTime {
        self.0
    }
}

pub fn response(status: u16, headers: &[(&str, &str)], body: &[u8]) -> RawOutcome {
    let headers: ResponseHeaders = headers
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), (*v).to_string()))
        .collect();
    RawOutcome {
        status,
        headers,
        body: body.to_vec(),
        timing: Timing {
            connect: Duration::from_millis(5),
            pretransfer: Duration::from_millis(5),
            total: Duration::from_millis(10),
        },
        ..RawOutcome::default()
    }
}

pub fn failure(kind: TransportErrorKind, message: &str, timing: Timing) -> RawOutcome {
    RawOutcome::failed(TransportFailure::new(kind, message), timing, false)
}

pub fn engine(
    profile: ProbeProfile,
    resolver: Arc<FixedResolver>,
    transport: Arc<ScriptedTransport>,
) -> ProbeEngine {
    ProbeEngine::new(
        profile,
        resolver,
        transport,
        Arc::new(FixedClock(SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000))),
    )
}
