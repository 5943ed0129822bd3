//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

/// Probe HTTP and IPTV endpoints through optional SOCKS5 proxies.
#[derive(Parser, Debug)]
#[command(name = "streamprobe")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (defaults to $XDG_CONFIG_HOME/streamprobe/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the JSON HTTP service
    Serve(ServeArgs),
    /// Probe one URL and print the result record
    Probe(ProbeArgs),
    /// Probe a list of URLs, one JSON line per URL
    Scan(ScanArgs),
}

#[derive(ClapArgs, Debug)]
pub struct ServeArgs {
    /// Listen address (default 127.0.0.1:8080)
    #[arg(long)]
    pub listen: Option<String>,

    /// Directory for cached response bodies (default: system temp dir)
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,
}

/// Proxy flags shared by `probe` and `scan`.
#[derive(ClapArgs, Debug, Default)]
pub struct ProxyArgs {
    /// SOCKS5 proxy as host:port
    #[arg(long)]
    pub proxy: Option<String>,

    /// Proxy username
    #[arg(long, requires = "proxy")]
    pub proxy_user: Option<String>,

    /// Proxy password
    #[arg(long, requires = "proxy")]
    pub proxy_pass: Option<String>,
}

#[derive(ClapArgs, Debug)]
pub struct ProbeArgs {
    /// URL to probe
    pub url: String,

    #[command(flatten)]
    pub proxy: ProxyArgs,

    /// Request timeout in seconds (clamped to 1-120)
    #[arg(long)]
    pub timeout: Option<i64>,

    /// Do not follow redirects
    #[arg(long)]
    pub no_follow: bool,

    /// Maximum redirects to follow (clamped to 0-50)
    #[arg(long)]
    pub max_redirects: Option<i64>,

    /// Extra request header as 'Name: value' (repeatable)
    #[arg(long = "header", short = 'H')]
    pub headers: Vec<String>,

    /// Hostname override file with 'ip host' lines
    #[arg(long)]
    pub hosts: Option<PathBuf>,
}

#[derive(ClapArgs, Debug)]
pub struct ScanArgs {
    /// File with one URL per line, or '-' for stdin (default: stdin)
    pub input: Option<PathBuf>,

    /// Maximum probes in flight (1-64)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=64))]
    pub concurrency: Option<u8>,

    /// Delay between dispatches in milliseconds (0-60000)
    #[arg(short = 'd', long, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub delay: Option<u64>,

    /// Extra attempts for transient failures (0-10)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub retries: Option<u8>,

    /// Request timeout in seconds (clamped to 1-30)
    #[arg(long)]
    pub timeout: Option<i64>,

    #[command(flatten)]
    pub proxy: ProxyArgs,
}

/// Splits a `Name: value` header flag.
pub fn parse_header_flag(raw: &str) -> Option<(String, String)> {
    let (name, value) = raw.split_once(':')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}
