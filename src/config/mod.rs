//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, num::NonZeroU64, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "svgsnap";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8544;
const DEFAULT_BOOTSTRAP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_ENGINE_ENDPOINT: &str = "http://127.0.0.1:9222";
const DEFAULT_UPLOAD_REQUEST_LIMIT_BYTES: u64 = 10 * 1024 * 1024;

/// Command-line arguments for the svgsnap binary.
#[derive(Debug, Parser)]
#[command(name = "svgsnap", version, about = "SVG-to-PNG rendering bridge")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "SVGSNAP_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the rendering-engine endpoint URLs (comma separated).
    #[arg(long = "engine-endpoints", value_name = "URLS")]
    pub engine_endpoints: Option<String>,

    /// Override the hostnames resolved to rendering-engine endpoints,
    /// one pool slot per resolved address (comma separated host:port).
    #[arg(long = "engine-resolve-hosts", value_name = "HOSTS")]
    pub engine_resolve_hosts: Option<String>,

    /// Override the bootstrap connection deadline.
    #[arg(long = "engine-bootstrap-timeout-seconds", value_name = "SECONDS")]
    pub engine_bootstrap_timeout_seconds: Option<u64>,

    /// Override the externally reachable base URL used to build bridge
    /// URLs the rendering engine fetches.
    #[arg(long = "bridge-base-url", value_name = "URL")]
    pub bridge_base_url: Option<String>,

    /// Override the maximum upload body size in bytes.
    #[arg(long = "uploads-max-request-bytes", value_name = "BYTES")]
    pub uploads_max_request_bytes: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub engine: EngineSettings,
    pub bridge: BridgeSettings,
    pub uploads: UploadSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub listen_addr: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub targets: EngineTargets,
    pub bootstrap_timeout: Duration,
}

/// The two mutually exclusive ways of naming rendering-engine targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineTargets {
    /// DevTools endpoint URLs, one pool slot each.
    Endpoints(Vec<String>),
    /// `host:port` names resolved at bootstrap, one pool slot per
    /// A/AAAA record.
    ResolveHosts(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct BridgeSettings {
    /// Always carries a trailing slash so keys join as path segments.
    pub base_url: Url,
}

#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub max_request_bytes: NonZeroU64,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("SVGSNAP").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);
    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    engine: RawEngineSettings,
    bridge: RawBridgeSettings,
    uploads: RawUploadSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(endpoints) = overrides.engine_endpoints.as_ref() {
            self.engine.endpoints = Some(endpoints.clone());
        }
        if let Some(hosts) = overrides.engine_resolve_hosts.as_ref() {
            self.engine.resolve_hosts = Some(hosts.clone());
        }
        if let Some(seconds) = overrides.engine_bootstrap_timeout_seconds {
            self.engine.bootstrap_timeout_seconds = Some(seconds);
        }
        if let Some(url) = overrides.bridge_base_url.as_ref() {
            self.bridge.base_url = Some(url.clone());
        }
        if let Some(limit) = overrides.uploads_max_request_bytes {
            self.uploads.max_request_bytes = Some(limit);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            engine,
            bridge,
            uploads,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let engine = build_engine_settings(engine)?;
        let bridge = build_bridge_settings(bridge, &server)?;
        let uploads = build_upload_settings(uploads)?;

        Ok(Self {
            server,
            logging,
            engine,
            bridge,
            uploads,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let candidate = format!("{host}:{port}");
    let listen_addr = candidate
        .parse()
        .map_err(|err| LoadError::invalid("server.host", format!("invalid `{candidate}`: {err}")))?;

    Ok(ServerSettings { listen_addr })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_engine_settings(engine: RawEngineSettings) -> Result<EngineSettings, LoadError> {
    let endpoints = split_csv(engine.endpoints.as_deref());
    let resolve_hosts = split_csv(engine.resolve_hosts.as_deref());

    let targets = match (endpoints.is_empty(), resolve_hosts.is_empty()) {
        (false, false) => {
            return Err(LoadError::invalid(
                "engine.endpoints",
                "endpoints and resolve_hosts are mutually exclusive",
            ));
        }
        (false, true) => EngineTargets::Endpoints(endpoints),
        (true, false) => EngineTargets::ResolveHosts(resolve_hosts),
        (true, true) => EngineTargets::Endpoints(vec![DEFAULT_ENGINE_ENDPOINT.to_string()]),
    };

    let timeout_secs = engine
        .bootstrap_timeout_seconds
        .unwrap_or(DEFAULT_BOOTSTRAP_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "engine.bootstrap_timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(EngineSettings {
        targets,
        bootstrap_timeout: Duration::from_secs(timeout_secs),
    })
}

fn build_bridge_settings(
    bridge: RawBridgeSettings,
    server: &ServerSettings,
) -> Result<BridgeSettings, LoadError> {
    let raw_url = bridge
        .base_url
        .unwrap_or_else(|| format!("http://{}/", server.listen_addr));

    let mut base_url = Url::parse(&raw_url)
        .map_err(|err| LoadError::invalid("bridge.base_url", format!("invalid URL: {err}")))?;
    if base_url.cannot_be_a_base() {
        return Err(LoadError::invalid(
            "bridge.base_url",
            "URL must be an absolute http(s) base",
        ));
    }
    if !base_url.path().ends_with('/') {
        let path = format!("{}/", base_url.path());
        base_url.set_path(&path);
    }

    Ok(BridgeSettings { base_url })
}

fn build_upload_settings(uploads: RawUploadSettings) -> Result<UploadSettings, LoadError> {
    let max_request_bytes_value = uploads
        .max_request_bytes
        .unwrap_or(DEFAULT_UPLOAD_REQUEST_LIMIT_BYTES);
    let max_request_bytes = NonZeroU64::new(max_request_bytes_value).ok_or_else(|| {
        LoadError::invalid("uploads.max_request_bytes", "must be greater than zero")
    })?;
    usize::try_from(max_request_bytes_value).map_err(|_| {
        LoadError::invalid(
            "uploads.max_request_bytes",
            "value exceeds supported range for usize",
        )
    })?;

    Ok(UploadSettings { max_request_bytes })
}

fn split_csv(value: Option<&str>) -> Vec<String> {
    value
        .map(|csv| {
            csv.split(',')
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawEngineSettings {
    endpoints: Option<String>,
    resolve_hosts: Option<String>,
    bootstrap_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBridgeSettings {
    base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawUploadSettings {
    max_request_bytes: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve_to_local_service() {
        let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

        assert_eq!(settings.server.listen_addr.port(), DEFAULT_PORT);
        assert_eq!(
            settings.engine.targets,
            EngineTargets::Endpoints(vec![DEFAULT_ENGINE_ENDPOINT.to_string()])
        );
        assert_eq!(
            settings.engine.bootstrap_timeout,
            Duration::from_secs(DEFAULT_BOOTSTRAP_TIMEOUT_SECS)
        );
        assert_eq!(
            settings.bridge.base_url.as_str(),
            "http://127.0.0.1:8544/"
        );
        assert_eq!(
            settings.uploads.max_request_bytes.get(),
            DEFAULT_UPLOAD_REQUEST_LIMIT_BYTES
        );
    }

    #[test]
    fn cli_overrides_take_highest_precedence() {
        let mut raw = RawSettings::default();
        raw.server.port = Some(4000);
        raw.logging.level = Some("info".to_string());

        let overrides = Overrides {
            server_port: Some(4321),
            log_level: Some("debug".to_string()),
            ..Default::default()
        };

        raw.apply_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert_eq!(settings.server.listen_addr.port(), 4321);
        assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    }

    #[test]
    fn endpoint_csv_is_trimmed_and_split() {
        let mut raw = RawSettings::default();
        raw.engine.endpoints = Some("http://a:9222, http://b:9222 ,".to_string());

        let settings = Settings::from_raw(raw).expect("valid settings");
        assert_eq!(
            settings.engine.targets,
            EngineTargets::Endpoints(vec![
                "http://a:9222".to_string(),
                "http://b:9222".to_string()
            ])
        );
    }

    #[test]
    fn resolve_hosts_form_is_accepted() {
        let mut raw = RawSettings::default();
        raw.engine.resolve_hosts = Some("chrome:9222".to_string());

        let settings = Settings::from_raw(raw).expect("valid settings");
        assert_eq!(
            settings.engine.targets,
            EngineTargets::ResolveHosts(vec!["chrome:9222".to_string()])
        );
    }

    #[test]
    fn endpoints_and_resolve_hosts_are_mutually_exclusive() {
        let mut raw = RawSettings::default();
        raw.engine.endpoints = Some("http://a:9222".to_string());
        raw.engine.resolve_hosts = Some("chrome:9222".to_string());

        let result = Settings::from_raw(raw);
        assert!(matches!(result, Err(LoadError::Invalid { .. })));
    }

    #[test]
    fn bridge_base_url_gains_trailing_slash() {
        let mut raw = RawSettings::default();
        raw.bridge.base_url = Some("http://svgsnap:8544".to_string());

        let settings = Settings::from_raw(raw).expect("valid settings");
        assert_eq!(settings.bridge.base_url.as_str(), "http://svgsnap:8544/");
    }

    #[test]
    fn zero_bootstrap_timeout_is_rejected() {
        let mut raw = RawSettings::default();
        raw.engine.bootstrap_timeout_seconds = Some(0);

        let result = Settings::from_raw(raw);
        assert!(matches!(result, Err(LoadError::Invalid { .. })));
    }

    #[test]
    fn cli_json_logging_enforces_format() {
        let mut raw = RawSettings::default();
        let overrides = Overrides {
            log_json: Some(true),
            ..Default::default()
        };

        raw.apply_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert!(matches!(settings.logging.format, LogFormat::Json));
    }

    #[test]
    fn parse_engine_cli_arguments() {
        let args = CliArgs::parse_from([
            "svgsnap",
            "--engine-endpoints",
            "http://chrome-0:9222,http://chrome-1:9222",
            "--engine-bootstrap-timeout-seconds",
            "10",
        ]);

        assert_eq!(
            args.overrides.engine_endpoints.as_deref(),
            Some("http://chrome-0:9222,http://chrome-1:9222")
        );
        assert_eq!(args.overrides.engine_bootstrap_timeout_seconds, Some(10));
    }
}
