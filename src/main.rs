//! CLI entry point for streamprobe.

use std::fs;
use std::io::{self, IsTerminal, Read, Write};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use streamprobe_core::{
    ArtifactCache, BatchConfig, BatchControl, BatchRunner, Clock, DEFAULT_CACHE_TTL, DnsResolver,
    HostsOverrideMap, IpApiLocator, ProbeEngine, ProbeProfile, ProxyDescriptor, ReqwestTransport,
    RequestSpec, ResultRecord, SystemClock,
    server::{self, AppState},
};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

mod cli;
mod config;

use cli::{Args, Command, ProbeArgs, ProxyArgs, ScanArgs, ServeArgs, parse_header_flag};
use config::{FileConfig, VerbositySetting};

const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_SCAN_CONCURRENCY: u8 = 5;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();
    let file_config = config::load_file_config(args.config.as_deref())?;

    // Priority: RUST_LOG env var > quiet flag > verbose flag > config verbosity > info
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => file_config
                .verbosity
                .map_or("info", VerbositySetting::filter),
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    match args.command {
        Command::Serve(serve_args) => run_serve(serve_args, &file_config).await,
        Command::Probe(probe_args) => run_probe(probe_args).await,
        Command::Scan(scan_args) => run_scan(scan_args, &file_config, args.quiet).await,
    }
}

async fn run_serve(args: ServeArgs, file_config: &FileConfig) -> Result<ExitCode> {
    let listen = args
        .listen
        .or_else(|| file_config.listen_addr.clone())
        .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());
    let cache_dir = args
        .cache_dir
        .or_else(|| file_config.cache_dir.clone())
        .unwrap_or_else(|| std::env::temp_dir().join("streamprobe-cache"));
    let ttl = file_config
        .cache_ttl_secs
        .map_or(DEFAULT_CACHE_TTL, Duration::from_secs);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let cache = ArtifactCache::new(&cache_dir, Arc::clone(&clock)).with_ttl(ttl);
    let engine = ProbeEngine::new(
        ProbeProfile::diagnostics(),
        Arc::new(DnsResolver::new()),
        Arc::new(ReqwestTransport),
        clock,
    )
    .with_cache(cache);
    let state = AppState::new(engine, Arc::new(IpApiLocator::default()));

    let listener = TcpListener::bind(&listen)
        .await
        .with_context(|| format!("Failed to bind '{listen}'"))?;
    info!(cache_dir = %cache_dir.display(), ttl_secs = ttl.as_secs(), "Cache configured");

    server::serve(listener, state, shutdown_signal()).await?;
    Ok(ExitCode::SUCCESS)
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        warn!("Failed to listen for Ctrl-C; shutting down");
        return;
    }
    info!("Shutting down");
}

fn proxy_from(args: &ProxyArgs) -> Option<ProxyDescriptor> {
    let address = args.proxy.as_deref()?;
    Some(ProxyDescriptor::new(address).with_credentials(
        args.proxy_user.as_deref().unwrap_or_default(),
        args.proxy_pass.as_deref().unwrap_or_default(),
    ))
}

async fn run_probe(args: ProbeArgs) -> Result<ExitCode> {
    let profile = ProbeProfile::diagnostics();
    let mut builder = RequestSpec::builder(args.url.as_str())
        .proxy(proxy_from(&args.proxy))
        .follow_redirects(!args.no_follow);
    if let Some(timeout) = args.timeout {
        builder = builder.timeout_secs(timeout);
    }
    if let Some(max) = args.max_redirects {
        builder = builder.max_redirects(max);
    }
    for raw in &args.headers {
        let (name, value) = parse_header_flag(raw)
            .with_context(|| format!("Invalid header '{raw}': expected 'Name: value'"))?;
        builder = builder.header(name, value);
    }
    if let Some(path) = &args.hosts {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read hosts file '{}'", path.display()))?;
        builder = builder.hosts(HostsOverrideMap::parse(&text));
    }
    let spec = builder.build(&profile);

    let engine = ProbeEngine::with_defaults(profile);
    let report = engine.execute(&spec).await;
    println!(
        "{}",
        serde_json::to_string_pretty(&ResultRecord::from(&report))?
    );

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) if path != Path::new("-") => fs::read_to_string(path)
            .with_context(|| format!("Failed to read input file '{}'", path.display())),
        _ => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            Ok(buffer)
        }
    }
}

async fn run_scan(args: ScanArgs, file_config: &FileConfig, quiet: bool) -> Result<ExitCode> {
    let input = read_input(args.input.as_deref())?;
    let urls: Vec<&str> = input
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect();
    if urls.is_empty() {
        info!("No URLs to scan");
        return Ok(ExitCode::SUCCESS);
    }

    let profile = ProbeProfile::scan();
    let proxy = proxy_from(&args.proxy);
    let specs: Vec<RequestSpec> = urls
        .iter()
        .map(|url| {
            let mut builder = RequestSpec::builder(*url).proxy(proxy.clone());
            if let Some(timeout) = args.timeout {
                builder = builder.timeout_secs(timeout);
            }
            builder.build(&profile)
        })
        .collect();

    let config = BatchConfig {
        concurrency: usize::from(
            args.concurrency
                .or(file_config.concurrency)
                .unwrap_or(DEFAULT_SCAN_CONCURRENCY),
        ),
        delay: Duration::from_millis(args.delay.or(file_config.delay_ms).unwrap_or(0)),
        retry_count: u32::from(args.retries.or(file_config.retry_count).unwrap_or(0)),
    };
    let runner = BatchRunner::new(Arc::new(ProbeEngine::with_defaults(profile)), config)?;

    let control = BatchControl::new();
    {
        let control = control.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted; waiting for in-flight probes");
                control.stop();
            }
        });
    }

    let bar = if quiet || !io::stderr().is_terminal() {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(specs.len() as u64);
        bar.set_style(
            ProgressStyle::with_template("{bar:40} {pos}/{len} {wide_msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar
    };
    let progress = bar.clone();
    let result = runner
        .run(specs, &control, move |item| {
            progress.inc(1);
            progress.set_message(item.url.clone());
        })
        .await?;
    bar.finish_and_clear();

    let mut out = io::stdout().lock();
    for item in &result.items {
        let line = match &item.report {
            Some(report) => serde_json::to_string(&ResultRecord::from(report))?,
            None => serde_json::to_string(&serde_json::json!({
                "url": item.url,
                "cancelled": true,
            }))?,
        };
        writeln!(out, "{line}")?;
    }

    let stats = &result.stats;
    info!(
        total = stats.total(),
        succeeded = stats.succeeded(),
        failed = stats.failed(),
        retried = stats.retried(),
        cancelled = stats.cancelled(),
        "Scan complete"
    );

    Ok(if stats.failed() == 0 && stats.cancelled() == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
