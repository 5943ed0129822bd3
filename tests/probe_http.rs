//! Integration tests for the probe engine over real HTTP.
//!
//! These tests drive the reqwest transport against wiremock servers.

use std::sync::Arc;

use streamprobe_core::cache::ArtifactCache;
use streamprobe_core::clock::{Clock, SystemClock};
use streamprobe_core::probe::{
    DnsResolver, ErrorTaxonomy, HostsOverrideMap, INLINE_BODY_LIMIT, OVERSIZED_BODY_BYTES,
    ProbeBody, ProbeEngine, ProbeProfile, ReqwestTransport, RequestSpec, TRUNCATION_NOTICE,
    TransportErrorKind,
};
use streamprobe_core::wire::ResultRecord;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn diagnostics_engine(cache_dir: Option<&TempDir>) -> ProbeEngine {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let engine = ProbeEngine::new(
        ProbeProfile::diagnostics(),
        Arc::new(DnsResolver::new()),
        Arc::new(ReqwestTransport),
        Arc::clone(&clock),
    );
    match cache_dir {
        Some(dir) => engine.with_cache(ArtifactCache::new(dir.path(), clock)),
        None => engine,
    }
}

fn spec(url: &str) -> RequestSpec {
    RequestSpec::builder(url).build(&ProbeProfile::diagnostics())
}

async fn mount_body(server: &MockServer, route: &str, template: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(template)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_redirect_chain_records_every_hop() {
    let server = MockServer::start().await;
    mount_body(
        &server,
        "/start",
        ResponseTemplate::new(302).insert_header("Location", "/dir/middle"),
    )
    .await;
    mount_body(
        &server,
        "/dir/middle",
        ResponseTemplate::new(301).insert_header("Location", "end"),
    )
    .await;
    mount_body(&server, "/dir/end", ResponseTemplate::new(200).set_body_string("done")).await;

    let report = diagnostics_engine(None)
        .execute(&spec(&format!("{}/start", server.uri())))
        .await;

    assert!(report.is_success(), "Expected success: {report:?}");
    assert_eq!(report.redirect_count, 2);
    assert_eq!(report.hops.len(), 3);
    assert_eq!(report.hops[0].status, 302);
    assert_eq!(report.hops[1].status, 301);
    assert_eq!(report.final_url, format!("{}/dir/end", server.uri()));
    assert_eq!(report.body_text(), "done");
}

#[tokio::test]
async fn test_redirect_limit_leaves_last_redirect_final() {
    let server = MockServer::start().await;
    mount_body(
        &server,
        "/loop",
        ResponseTemplate::new(302).insert_header("Location", "/loop"),
    )
    .await;
    let spec = RequestSpec::builder(format!("{}/loop", server.uri()))
        .max_redirects(2)
        .build(&ProbeProfile::diagnostics());

    let report = diagnostics_engine(None).execute(&spec).await;

    assert_eq!(report.status(), 302);
    assert_eq!(report.redirect_count, 2);
    assert_eq!(report.hops.len(), 3);
    assert!(report.taxonomy().is_none());
}

#[tokio::test]
async fn test_follow_disabled_returns_first_response() {
    let server = MockServer::start().await;
    mount_body(
        &server,
        "/start",
        ResponseTemplate::new(302).insert_header("Location", "/elsewhere"),
    )
    .await;
    let spec = RequestSpec::builder(format!("{}/start", server.uri()))
        .follow_redirects(false)
        .build(&ProbeProfile::diagnostics());

    let report = diagnostics_engine(None).execute(&spec).await;

    assert_eq!(report.status(), 302);
    assert_eq!(report.hops.len(), 1);
    assert_eq!(report.headers().get("location").map(String::as_str), Some("/elsewhere"));
}

#[tokio::test]
async fn test_body_at_inline_limit_is_not_truncated() {
    let server = MockServer::start().await;
    let body = "a".repeat(INLINE_BODY_LIMIT);
    mount_body(&server, "/exact", ResponseTemplate::new(200).set_body_string(body.clone())).await;
    let dir = TempDir::new().expect("failed to create temp dir");

    let report = diagnostics_engine(Some(&dir))
        .execute(&spec(&format!("{}/exact", server.uri())))
        .await;

    let success = report.success().expect("probe should complete");
    assert_eq!(success.body, ProbeBody::Full(body));
    assert!(success.download_id.is_none());
}

#[tokio::test]
async fn test_body_over_inline_limit_is_truncated_and_cached() {
    let server = MockServer::start().await;
    let body = "b".repeat(INLINE_BODY_LIMIT + 1);
    mount_body(&server, "/over", ResponseTemplate::new(200).set_body_string(body.clone())).await;
    let dir = TempDir::new().expect("failed to create temp dir");
    let engine = diagnostics_engine(Some(&dir));

    let report = engine
        .execute(&spec(&format!("{}/over", server.uri())))
        .await;

    let record = ResultRecord::from(&report);
    assert!(record.truncated);
    assert!(record.download_available);
    assert_eq!(
        record.body,
        format!("{}{TRUNCATION_NOTICE}", "b".repeat(INLINE_BODY_LIMIT))
    );
    let id = report.success().unwrap().download_id.clone().unwrap();
    assert_eq!(record.download_url, Some(format!("/api/download/{id}")));

    let cache = engine.cache().unwrap();
    let entry = cache.take(&id).await.unwrap().expect("entry should exist");
    assert_eq!(entry.body, body.as_bytes());
    assert!(cache.take(&id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_large_playlist_is_returned_whole_and_cached() {
    let server = MockServer::start().await;
    let mut playlist = String::from("#EXTM3U\n#EXT-X-TARGETDURATION:10\n");
    while playlist.len() < 50_000 {
        playlist.push_str("#EXTINF:10.0,\nsegment.ts\n");
    }
    playlist.truncate(50_000);
    mount_body(
        &server,
        "/live/index",
        ResponseTemplate::new(200).set_body_string(playlist.clone()),
    )
    .await;
    let dir = TempDir::new().expect("failed to create temp dir");

    let report = diagnostics_engine(Some(&dir))
        .execute(&spec(&format!("{}/live/index", server.uri())))
        .await;

    let success = report.success().expect("probe should complete");
    assert_eq!(success.body, ProbeBody::Full(playlist));
    assert!(success.is_playlist);
    assert!(success.download_id.is_some());
    assert!(success.playlist.as_ref().unwrap().extinf_count > 0);
}

#[tokio::test]
async fn test_video_content_type_skips_body() {
    let server = MockServer::start().await;
    mount_body(
        &server,
        "/clip",
        ResponseTemplate::new(200).set_body_raw(vec![0_u8; 64], "video/mp4"),
    )
    .await;

    let report = diagnostics_engine(None)
        .execute(&spec(&format!("{}/clip", server.uri())))
        .await;

    let record = ResultRecord::from(&report);
    assert!(record.skip_body);
    assert_eq!(record.body, "");
    assert_eq!(record.file_type, "media");
    let summary = record.body_summary.unwrap();
    assert!(summary.contains("video/mp4"), "Expected MIME in: {summary}");
}

#[tokio::test]
async fn test_media_suffix_is_probed_with_head() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/movie.mp4"))
        .respond_with(ResponseTemplate::new(200).insert_header("Content-Type", "video/mp4"))
        .expect(1)
        .mount(&server)
        .await;

    let report = diagnostics_engine(None)
        .execute(&spec(&format!("{}/movie.mp4", server.uri())))
        .await;

    assert_eq!(report.status(), 200);
    assert!(ResultRecord::from(&report).skip_body);
}

#[tokio::test]
async fn test_hosts_override_pins_hostname() {
    let server = MockServer::start().await;
    mount_body(&server, "/pinned", ResponseTemplate::new(200).set_body_string("pinned")).await;
    let port = server.address().port();
    let spec = RequestSpec::builder(format!("http://streamprobe.test:{port}/pinned"))
        .hosts(HostsOverrideMap::parse("127.0.0.1 streamprobe.test"))
        .build(&ProbeProfile::diagnostics());

    let report = diagnostics_engine(None).execute(&spec).await;

    assert!(report.is_success(), "Expected success: {report:?}");
    assert_eq!(report.body_text(), "pinned");
    assert_eq!(report.resolved_ip.map(|ip| ip.to_string()).as_deref(), Some("127.0.0.1"));
    assert!(!report.dns_resolved);
}

#[tokio::test]
async fn test_connection_refused_is_could_not_connect() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let report = diagnostics_engine(None)
        .execute(&spec(&format!("http://127.0.0.1:{port}/")))
        .await;

    assert_eq!(report.taxonomy(), Some(ErrorTaxonomy::UrlTimeout));
    let failure = report.failure().unwrap();
    assert_eq!(
        failure.transport.as_ref().map(|t| t.kind),
        Some(TransportErrorKind::CouldNotConnect)
    );
    assert_eq!(failure.status, 504);
}

#[tokio::test]
async fn test_scan_profile_aborts_oversized_playlist() {
    let server = MockServer::start().await;
    mount_body(
        &server,
        "/big.m3u8",
        ResponseTemplate::new(200).set_body_string(format!("#EXTM3U\n{}", "x".repeat(20_000))),
    )
    .await;
    let engine = ProbeEngine::with_defaults(ProbeProfile::scan());
    let spec = RequestSpec::builder(format!("{}/big.m3u8", server.uri()))
        .build(&ProbeProfile::scan());

    let report = engine.execute(&spec).await;

    assert_eq!(report.taxonomy(), Some(ErrorTaxonomy::CallbackAborted));
    assert_eq!(report.status(), 200);
}

/// An `#EXTM3U` channel list larger than the oversize threshold.
fn big_channel_list() -> String {
    let mut list = String::from("#EXTM3U\n");
    let mut channel = 0_u32;
    while (list.len() as u64) <= OVERSIZED_BODY_BYTES + 1024 * 1024 {
        channel += 1;
        list.push_str(&format!(
            "#EXTINF:-1 tvg-id=\"ch{channel}\" group-title=\"News\",Channel {channel}\nhttp://live.example/ch/{channel}.ts\n"
        ));
    }
    list
}

/// Serves one response without `Content-Length`, then closes the connection.
async fn serve_unsized_body(content_type: &'static str, body: Vec<u8>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0_u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => request.extend_from_slice(&buf[..n]),
            }
        }
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\nConnection: close\r\n\r\n"
        );
        // The client may hang up once it has read enough.
        let _ = socket.write_all(head.as_bytes()).await;
        let _ = socket.write_all(&body).await;
        let _ = socket.shutdown().await;
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn test_playlist_over_oversize_threshold_is_returned_whole() {
    let server = MockServer::start().await;
    let list = big_channel_list();
    mount_body(
        &server,
        "/channels.m3u",
        ResponseTemplate::new(200).set_body_raw(list.clone(), "audio/x-mpegurl"),
    )
    .await;
    let dir = TempDir::new().expect("failed to create temp dir");
    let engine = diagnostics_engine(Some(&dir));

    let report = engine
        .execute(&spec(&format!("{}/channels.m3u", server.uri())))
        .await;

    let success = report.success().expect("request should complete");
    assert_eq!(success.size, list.len() as u64);
    assert_eq!(success.body, ProbeBody::Full(list.clone()));
    let record = ResultRecord::from(&report);
    assert!(!record.truncated);
    assert!(!record.skip_body);
    assert!(record.is_m3u8);

    let id = success.download_id.clone().expect("playlist should be cached");
    let entry = engine.cache().unwrap().take(&id).await.unwrap().unwrap();
    assert_eq!(entry.body.len(), list.len());
}

#[tokio::test]
async fn test_playlist_found_by_marker_is_refetched_past_read_cap() {
    let server = MockServer::start().await;
    let list = big_channel_list();
    mount_body(
        &server,
        "/get.php",
        ResponseTemplate::new(200).set_body_raw(list.clone(), "text/plain"),
    )
    .await;
    let dir = TempDir::new().expect("failed to create temp dir");
    let engine = diagnostics_engine(Some(&dir));

    let report = engine
        .execute(&spec(&format!("{}/get.php", server.uri())))
        .await;

    let success = report.success().expect("request should complete");
    assert_eq!(success.body.text().len(), list.len());
    assert!(success.is_playlist);
    assert_eq!(report.hops.len(), 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
    let id = success.download_id.clone().unwrap();
    let entry = engine.cache().unwrap().take(&id).await.unwrap().unwrap();
    assert_eq!(entry.body, list.as_bytes());
}

#[tokio::test]
async fn test_unsized_large_body_is_skipped_with_lower_bound_size() {
    let base = serve_unsized_body("text/plain", vec![b'x'; 3 * 1024 * 1024]).await;

    let report = diagnostics_engine(None)
        .execute(&spec(&format!("{base}/dump")))
        .await;

    let record = ResultRecord::from(&report);
    assert_eq!(record.status_code, 200);
    assert!(record.skip_body);
    assert_eq!(record.file_type, "large_file");
    assert_eq!(record.body, "");
    assert_eq!(record.size, OVERSIZED_BODY_BYTES + 1);
    let summary = record.body_summary.unwrap();
    assert!(summary.contains("Size: at least 2.00 MB"), "Expected lower bound in: {summary}");
}
