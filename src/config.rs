//! File configuration for CLI defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

/// Defaults loaded from `config.toml`. Every field is optional; CLI flags win.
#[derive(Debug, Clone, Default)]
pub struct FileConfig {
    /// Address the HTTP service binds to.
    pub listen_addr: Option<String>,
    /// Directory for cached response bodies.
    pub cache_dir: Option<PathBuf>,
    /// Cache entry lifetime in seconds.
    pub cache_ttl_secs: Option<u64>,
    /// Probes in flight during a scan.
    pub concurrency: Option<u8>,
    /// Delay between scan dispatches in milliseconds.
    pub delay_ms: Option<u64>,
    /// Extra attempts for transient scan failures.
    pub retry_count: Option<u8>,
    pub verbosity: Option<VerbositySetting>,
}

impl FileConfig {
    /// Validates config values against CLI constraints.
    pub fn validate(&self) -> Result<()> {
        if let Some(ttl) = self.cache_ttl_secs
            && !(1..=3600).contains(&ttl)
        {
            bail!("Invalid config value for `cache_ttl_secs`: {ttl}. Expected range: 1..=3600");
        }
        if let Some(concurrency) = self.concurrency
            && !(1..=64).contains(&concurrency)
        {
            bail!("Invalid config value for `concurrency`: {concurrency}. Expected range: 1..=64");
        }
        if let Some(delay) = self.delay_ms
            && delay > 60_000
        {
            bail!("Invalid config value for `delay_ms`: {delay}. Expected range: 0..=60000");
        }
        if let Some(retries) = self.retry_count
            && retries > 10
        {
            bail!("Invalid config value for `retry_count`: {retries}. Expected range: 0..=10");
        }
        if let Some(addr) = &self.listen_addr
            && addr.parse::<std::net::SocketAddr>().is_err()
        {
            bail!("Invalid config value for `listen_addr`: '{addr}'. Expected ip:port");
        }
        Ok(())
    }
}

/// Supported config verbosity labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbositySetting {
    Default,
    Verbose,
    Quiet,
    Debug,
}

impl VerbositySetting {
    /// Log filter used when neither `RUST_LOG` nor a CLI flag decides.
    #[must_use]
    pub fn filter(self) -> &'static str {
        match self {
            Self::Default => "info",
            Self::Verbose => "debug",
            Self::Quiet => "error",
            Self::Debug => "trace",
        }
    }
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/streamprobe/config.toml`
/// 2. `$HOME/.config/streamprobe/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("streamprobe")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("streamprobe")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads the config at `path`, or the default path when `None`.
///
/// A missing file yields an empty config.
pub fn load_file_config(path: Option<&Path>) -> Result<FileConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match resolve_default_config_path() {
            Some(path) => path,
            None => return Ok(FileConfig::default()),
        },
    };
    if !path.exists() {
        return Ok(FileConfig::default());
    }

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        let line_no = line_index + 1;

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_no}: expected key = value");
        };

        let key = raw_key.trim();
        let value = raw_value.trim();
        let context = || format!("Invalid `{key}` value on line {line_no}");

        match key {
            "listen_addr" => {
                cfg.listen_addr = Some(parse_string_literal(value).with_context(context)?);
            }
            "cache_dir" => {
                cfg.cache_dir = Some(PathBuf::from(
                    parse_string_literal(value).with_context(context)?,
                ));
            }
            "cache_ttl_secs" => {
                cfg.cache_ttl_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "concurrency" => {
                cfg.concurrency = Some(parse_integer_u8(value).with_context(context)?);
            }
            "delay_ms" => {
                cfg.delay_ms = Some(parse_integer_u64(value).with_context(context)?);
            }
            "retry_count" => {
                cfg.retry_count = Some(parse_integer_u8(value).with_context(context)?);
            }
            "verbosity" => {
                let parsed = parse_string_literal(value).with_context(context)?;
                cfg.verbosity = Some(parse_verbosity(&parsed).with_context(|| {
                    format!("Invalid `verbosity` value '{parsed}' on line {line_no}")
                })?);
            }
            unknown => {
                bail!("Unknown configuration key: '{unknown}' on line {line_no}");
            }
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_u8(raw_value: &str) -> Result<u8> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<u16>()?;
    u8::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u8"))
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}

fn parse_verbosity(value: &str) -> Result<VerbositySetting> {
    match value {
        "default" => Ok(VerbositySetting::Default),
        "verbose" => Ok(VerbositySetting::Verbose),
        "quiet" => Ok(VerbositySetting::Quiet),
        "debug" => Ok(VerbositySetting::Debug),
        _ => bail!("Expected one of: default, verbose, quiet, debug"),
    }
}
