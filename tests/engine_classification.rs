//! Engine behaviour pinned with scripted transports and resolvers.
//!
//! These tests exercise the redirect loop and the error classifier without a
//! network: every hop's outcome is scripted.

mod common;

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use common::{FixedResolver, ScriptedTransport, engine, failure, response};
use streamprobe_core::probe::{
    ErrorTaxonomy, HostsOverrideMap, ProbeProfile, ProxyDescriptor, RequestSpec, TargetSource,
    Timing, TransportErrorKind,
};
use streamprobe_core::wire::ResultRecord;
use tokio_util::sync::CancellationToken;

fn proxied_spec(url: &str) -> RequestSpec {
    RequestSpec::builder(url)
        .proxy(Some(ProxyDescriptor::new("10.1.1.1:1080")))
        .build(&ProbeProfile::diagnostics())
}

fn direct_spec(url: &str) -> RequestSpec {
    RequestSpec::builder(url).build(&ProbeProfile::diagnostics())
}

#[tokio::test]
async fn test_could_not_connect_through_proxy_is_proxy_timeout() {
    let resolver = Arc::new(FixedResolver::answering(Ipv4Addr::new(93, 184, 216, 34)));
    let transport = Arc::new(ScriptedTransport::new([failure(
        TransportErrorKind::CouldNotConnect,
        "connection refused",
        Timing::default(),
    )]));
    let engine = engine(ProbeProfile::diagnostics(), resolver, transport);

    let report = engine.execute(&proxied_spec("http://origin.test/live")).await;

    assert_eq!(report.taxonomy(), Some(ErrorTaxonomy::ProxyTimeout));
    let failure = report.failure().unwrap();
    assert!(failure.proxy_error);
    assert_eq!(failure.status, 504);
    assert!(
        failure.detail.contains("10.1.1.1:1080"),
        "Expected proxy address in: {}",
        failure.detail
    );
    assert_eq!(report.hops.len(), 1);
    assert_eq!(report.hops[0].error_code, Some("could_not_connect"));
}

#[tokio::test]
async fn test_could_not_connect_direct_is_url_timeout() {
    let transport = Arc::new(ScriptedTransport::new([failure(
        TransportErrorKind::CouldNotConnect,
        "connection refused",
        Timing::default(),
    )]));
    let engine = engine(
        ProbeProfile::diagnostics(),
        Arc::new(FixedResolver::default()),
        transport,
    );

    let report = engine.execute(&direct_spec("http://origin.test/live")).await;

    assert_eq!(report.taxonomy(), Some(ErrorTaxonomy::UrlTimeout));
    assert!(!report.failure().unwrap().proxy_error);
}

#[tokio::test]
async fn test_proxy_timeout_after_connect_before_transfer() {
    let transport = Arc::new(ScriptedTransport::new([failure(
        TransportErrorKind::OperationTimedOut,
        "operation timed out",
        Timing {
            connect: Duration::from_millis(40),
            pretransfer: Duration::ZERO,
            total: Duration::from_secs(30),
        },
    )]));
    let engine = engine(
        ProbeProfile::diagnostics(),
        Arc::new(FixedResolver::answering(Ipv4Addr::new(1, 2, 3, 4))),
        transport,
    );

    let report = engine.execute(&proxied_spec("http://origin.test/")).await;

    assert_eq!(report.taxonomy(), Some(ErrorTaxonomy::ProxyTimeout));
    let detail = &report.failure().unwrap().detail;
    assert!(detail.contains("accepted the connection"), "Expected phase in: {detail}");
}

#[tokio::test]
async fn test_socks5_auth_marker_on_502_wins() {
    let page = b"<html><body><h1>502</h1><p>SOCKS5 authentication failed for user bob</p></body></html>";
    let transport = Arc::new(ScriptedTransport::new([response(502, &[], page)]));
    let engine = engine(
        ProbeProfile::diagnostics(),
        Arc::new(FixedResolver::answering(Ipv4Addr::new(1, 2, 3, 4))),
        transport,
    );

    let report = engine.execute(&proxied_spec("http://origin.test/")).await;

    assert_eq!(report.taxonomy(), Some(ErrorTaxonomy::ProxyAuthFailed));
    let failure = report.failure().unwrap();
    assert!(failure.proxy_auth_failed);
    assert_eq!(failure.status, 502);
    assert_eq!(
        failure.detail,
        "SOCKS5 proxy authentication failed: SOCKS5 authentication failed for user bob"
    );
}

#[tokio::test]
async fn test_fast_504_is_advisory_on_completed_probe() {
    let transport = Arc::new(ScriptedTransport::new([response(504, &[], b"gateway")]));
    let engine = engine(
        ProbeProfile::diagnostics(),
        Arc::new(FixedResolver::default()),
        transport,
    );

    let report = engine.execute(&direct_spec("http://origin.test/")).await;

    assert_eq!(report.status(), 504);
    assert_eq!(report.taxonomy(), Some(ErrorTaxonomy::ServerFast504));
    assert!(report.success().is_some());
    assert!(!report.is_success());
    assert_eq!(report.body_text(), "gateway");
}

#[tokio::test]
async fn test_proxied_hostname_is_resolved_and_substituted() {
    let resolver = Arc::new(FixedResolver::answering(Ipv4Addr::new(93, 184, 216, 34)));
    let transport = Arc::new(ScriptedTransport::new([response(200, &[], b"ok")]));
    let engine = engine(
        ProbeProfile::diagnostics(),
        Arc::clone(&resolver),
        Arc::clone(&transport),
    );

    let report = engine.execute(&proxied_spec("http://origin.test/a")).await;

    assert!(report.is_success());
    assert!(report.dns_resolved);
    assert_eq!(
        report.resolved_ip,
        Some(IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34)))
    );
    assert_eq!(resolver.lookups(), vec!["origin.test".to_string()]);
    let seen = transport.seen();
    assert_eq!(seen[0].target.unwrap().source, TargetSource::Dns);
    assert_eq!(seen[0].proxy.as_deref(), Some("10.1.1.1:1080"));
}

#[tokio::test]
async fn test_direct_hostname_is_not_resolved() {
    let resolver = Arc::new(FixedResolver::answering(Ipv4Addr::new(1, 1, 1, 1)));
    let transport = Arc::new(ScriptedTransport::new([response(200, &[], b"ok")]));
    let engine = engine(
        ProbeProfile::diagnostics(),
        Arc::clone(&resolver),
        Arc::clone(&transport),
    );

    let report = engine.execute(&direct_spec("http://origin.test/a")).await;

    assert!(!report.dns_resolved);
    assert!(resolver.lookups().is_empty());
    assert!(transport.seen()[0].target.is_none());
}

#[tokio::test]
async fn test_override_applies_to_redirect_hosts() {
    let resolver = Arc::new(FixedResolver::answering(Ipv4Addr::new(8, 8, 8, 8)));
    let transport = Arc::new(ScriptedTransport::new([
        response(302, &[("Location", "http://cdn.test/b")], b""),
        response(200, &[], b"done"),
    ]));
    let engine = engine(
        ProbeProfile::diagnostics(),
        Arc::clone(&resolver),
        Arc::clone(&transport),
    );
    let spec = RequestSpec::builder("http://origin.test/a")
        .proxy(Some(ProxyDescriptor::new("10.1.1.1:1080")))
        .hosts(HostsOverrideMap::parse("10.0.0.7 cdn.test"))
        .build(&ProbeProfile::diagnostics());

    let report = engine.execute(&spec).await;

    let seen = transport.seen();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].target.unwrap().source, TargetSource::Dns);
    let second = seen[1].target.unwrap();
    assert_eq!(second.source, TargetSource::Override);
    assert_eq!(second.addr, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)));
    assert_eq!(resolver.lookups(), vec!["origin.test".to_string()]);
    assert!(!report.dns_resolved, "last hop came from the override map");
    assert_eq!(report.final_url, "http://cdn.test/b");
}

#[tokio::test]
async fn test_cancelled_token_stops_following_redirects() {
    let transport = Arc::new(ScriptedTransport::new([
        response(302, &[("Location", "/next")], b""),
        response(200, &[], b"never"),
    ]));
    let engine = engine(
        ProbeProfile::diagnostics(),
        Arc::new(FixedResolver::default()),
        Arc::clone(&transport),
    );
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = engine
        .execute_until(&direct_spec("http://origin.test/start"), &cancel)
        .await;

    assert_eq!(report.status(), 302);
    assert_eq!(report.redirect_count, 0);
    assert_eq!(transport.seen().len(), 1);
}

#[tokio::test]
async fn test_invalid_redirect_target_is_url_invalid() {
    let transport = Arc::new(ScriptedTransport::new([response(
        302,
        &[("Location", "http://")],
        b"",
    )]));
    let engine = engine(
        ProbeProfile::diagnostics(),
        Arc::new(FixedResolver::default()),
        transport,
    );

    let report = engine.execute(&direct_spec("http://origin.test/start")).await;

    assert_eq!(report.taxonomy(), Some(ErrorTaxonomy::UrlInvalid));
    assert_eq!(report.redirect_count, 1);
    assert_eq!(report.hops.len(), 1);
}

#[tokio::test]
async fn test_invalid_input_url_never_reaches_transport() {
    let transport = Arc::new(ScriptedTransport::new([]));
    let engine = engine(
        ProbeProfile::diagnostics(),
        Arc::new(FixedResolver::default()),
        Arc::clone(&transport),
    );

    let report = engine.execute(&direct_spec("not a url")).await;

    assert_eq!(report.taxonomy(), Some(ErrorTaxonomy::UrlInvalid));
    assert_eq!(report.status(), 400);
    assert!(report.hops.is_empty());
    assert!(transport.seen().is_empty());
}

#[tokio::test]
async fn test_scan_profile_clamps_timeout_and_keeps_playlist_inline_cap() {
    let mut playlist = String::from("#EXTM3U\n");
    while playlist.len() < 5000 {
        playlist.push_str("#EXTINF:10,\nseg.ts\n");
    }
    let transport = Arc::new(ScriptedTransport::new([response(
        200,
        &[("Content-Type", "application/vnd.apple.mpegurl")],
        playlist.as_bytes(),
    )]));
    let engine = engine(
        ProbeProfile::scan(),
        Arc::new(FixedResolver::default()),
        Arc::clone(&transport),
    );
    let spec = RequestSpec::builder("http://origin.test/live.m3u8")
        .timeout_secs(300)
        .build(&ProbeProfile::scan());

    let report = engine.execute(&spec).await;

    assert_eq!(spec.timeout(), Duration::from_secs(30));
    assert_eq!(report.body_text().len(), 2048);
    let record = ResultRecord::from(&report);
    assert_eq!(record.size, playlist.len() as u64);
    assert!(record.is_m3u8);
}
