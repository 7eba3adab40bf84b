//! Server configuration: a single configuration URL, optionally layered
//! with a TOML file, then CLI overrides — same merge order the reference
//! stack uses for its own config file.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use revtun_proto::{TunnelError, TunnelResult};
use serde::Deserialize;
use tracing::info;
use url::Url;

/// `[tunables]` section of the config TOML.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TunablesSection {
    pub semaphore_limit: Option<usize>,
    pub reload_interval_secs: Option<u64>,
    pub report_interval_secs: Option<u64>,
    pub udp_buf_size: Option<usize>,
    pub service_cooldown_secs: Option<u64>,
    pub shutdown_timeout_secs: Option<u64>,
}

/// `[tls]` section of the config TOML.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TlsSection {
    pub cert: Option<String>,
    pub key: Option<String>,
}

/// Top-level config file structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ConfigFile {
    pub url: Option<String>,
    #[serde(default)]
    pub tls: TlsSection,
    #[serde(default)]
    pub tunables: TunablesSection,
}

/// The three addresses and the TLS mode code packed into the configuration
/// URL: `<scheme>://<tunnel-host>:<tunnel-port>/<target-tcp-port>/<target-udp-port>#<tlsCode>`.
///
/// `<scheme>` carries no meaning of its own; it exists only because `url`
/// requires one. Target ports are resolved against the tunnel host's IP
/// unless an explicit `host:port` pair is given for a path segment instead
/// of a bare port.
#[derive(Debug, Clone)]
pub struct UrlConfig {
    pub tunnel_addr: SocketAddr,
    pub target_tcp_addr: SocketAddr,
    pub target_udp_addr: SocketAddr,
    pub tls_code: String,
}

/// Parse the configuration URL into its four components.
pub fn parse_configuration_url(raw: &str) -> TunnelResult<UrlConfig> {
    let url = Url::parse(raw).map_err(|e| {
        TunnelError::Config(format!("invalid configuration url {raw:?}: {e}"))
    })?;

    let host = url
        .host_str()
        .ok_or_else(|| TunnelError::Config(format!("configuration url missing host: {raw:?}")))?;
    let tunnel_ip: IpAddr = host
        .parse()
        .map_err(|_| TunnelError::Config(format!("tunnel host must be an IP address: {host:?}")))?;
    let tunnel_port = url
        .port()
        .ok_or_else(|| TunnelError::Config(format!("configuration url missing tunnel port: {raw:?}")))?;
    let tunnel_addr = SocketAddr::new(tunnel_ip, tunnel_port);

    let mut segments = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect::<Vec<_>>())
        .unwrap_or_default();
    if segments.len() < 2 {
        return Err(TunnelError::Config(format!(
            "configuration url must carry /<target-tcp-port>/<target-udp-port>: {raw:?}"
        )));
    }
    let udp_segment = segments.pop().unwrap();
    let tcp_segment = segments.pop().unwrap();

    let target_tcp_addr = parse_target_segment(tcp_segment, tunnel_ip)?;
    let target_udp_addr = parse_target_segment(udp_segment, tunnel_ip)?;

    let tls_code = url.fragment().unwrap_or_default().to_string();

    Ok(UrlConfig {
        tunnel_addr,
        target_tcp_addr,
        target_udp_addr,
        tls_code,
    })
}

/// A target path segment is either a bare port (bound on the tunnel host's
/// IP) or a full `host:port` pair.
fn parse_target_segment(segment: &str, default_ip: IpAddr) -> TunnelResult<SocketAddr> {
    if let Ok(port) = segment.parse::<u16>() {
        return Ok(SocketAddr::new(default_ip, port));
    }
    segment
        .parse::<SocketAddr>()
        .map_err(|_| TunnelError::Config(format!("invalid target address segment: {segment:?}")))
}

/// Resolved, merged server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub tunnel_addr: SocketAddr,
    pub target_tcp_addr: SocketAddr,
    pub target_udp_addr: SocketAddr,
    pub tls_code: String,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    pub generate_cert: bool,
    pub semaphore_limit: usize,
    pub reload_interval: Duration,
    pub report_interval: Duration,
    pub udp_buf_size: usize,
    pub service_cooldown: Duration,
    pub shutdown_timeout: Duration,
}

fn default_semaphore_limit() -> usize {
    256
}
fn default_reload_interval_secs() -> u64 {
    90
}
fn default_report_interval_secs() -> u64 {
    5
}
fn default_udp_buf_size() -> usize {
    4096
}
fn default_service_cooldown_secs() -> u64 {
    3
}
fn default_shutdown_timeout_secs() -> u64 {
    5
}

#[allow(clippy::too_many_arguments)]
pub struct CliOverrides<'a> {
    pub url: Option<&'a str>,
    pub tunnel: Option<&'a str>,
    pub target_tcp: Option<&'a str>,
    pub target_udp: Option<&'a str>,
    pub tls_code: Option<&'a str>,
    pub cert: Option<&'a str>,
    pub key: Option<&'a str>,
    pub generate_cert: bool,
    pub semaphore_limit: Option<usize>,
    pub reload_interval_secs: Option<u64>,
    pub report_interval_secs: Option<u64>,
    pub udp_buf_size: Option<usize>,
    pub service_cooldown_secs: Option<u64>,
    pub shutdown_timeout_secs: Option<u64>,
}

impl ServerConfig {
    /// Load configuration from an optional TOML file, then apply CLI
    /// overrides. If `config_path` doesn't exist, file defaults are used
    /// silently — CLI values (when `Some`) always win.
    pub fn load(config_path: Option<&Path>, cli: CliOverrides<'_>) -> TunnelResult<Self> {
        let file_config = match config_path {
            Some(path) if path.exists() => {
                info!(path = %path.display(), "loading config file");
                let content = std::fs::read_to_string(path)?;
                toml::from_str::<ConfigFile>(&content)
                    .map_err(|e| TunnelError::Config(format!("config parse error: {e}")))?
            }
            Some(path) => {
                info!(path = %path.display(), "config file not found, using defaults");
                ConfigFile::default()
            }
            None => ConfigFile::default(),
        };

        let url_str = cli
            .url
            .map(|s| s.to_string())
            .or(file_config.url)
            .ok_or_else(|| {
                TunnelError::Config(
                    "no configuration url given (--url, --tunnel/--target-tcp/--target-udp, or config file)".into(),
                )
            })?;
        let mut url_config = parse_configuration_url(&url_str)?;

        if let Some(tunnel) = cli.tunnel {
            url_config.tunnel_addr = tunnel
                .parse()
                .map_err(|_| TunnelError::Config(format!("invalid --tunnel address: {tunnel:?}")))?;
        }
        if let Some(target_tcp) = cli.target_tcp {
            url_config.target_tcp_addr = parse_target_segment(target_tcp, url_config.tunnel_addr.ip())?;
        }
        if let Some(target_udp) = cli.target_udp {
            url_config.target_udp_addr = parse_target_segment(target_udp, url_config.tunnel_addr.ip())?;
        }
        if let Some(tls_code) = cli.tls_code {
            url_config.tls_code = tls_code.to_string();
        }

        let cert_str = cli.cert.map(|s| s.to_string()).or(file_config.tls.cert);
        let key_str = cli.key.map(|s| s.to_string()).or(file_config.tls.key);

        let tunables = file_config.tunables;
        let semaphore_limit = cli
            .semaphore_limit
            .or(tunables.semaphore_limit)
            .unwrap_or_else(default_semaphore_limit);
        let reload_interval = Duration::from_secs(
            cli.reload_interval_secs
                .or(tunables.reload_interval_secs)
                .unwrap_or_else(default_reload_interval_secs),
        );
        let report_interval = Duration::from_secs(
            cli.report_interval_secs
                .or(tunables.report_interval_secs)
                .unwrap_or_else(default_report_interval_secs),
        );
        let udp_buf_size = cli
            .udp_buf_size
            .or(tunables.udp_buf_size)
            .unwrap_or_else(default_udp_buf_size);
        let service_cooldown = Duration::from_secs(
            cli.service_cooldown_secs
                .or(tunables.service_cooldown_secs)
                .unwrap_or_else(default_service_cooldown_secs),
        );
        let shutdown_timeout = Duration::from_secs(
            cli.shutdown_timeout_secs
                .or(tunables.shutdown_timeout_secs)
                .unwrap_or_else(default_shutdown_timeout_secs),
        );

        Ok(Self {
            tunnel_addr: url_config.tunnel_addr,
            target_tcp_addr: url_config.target_tcp_addr,
            target_udp_addr: url_config.target_udp_addr,
            tls_code: url_config.tls_code,
            cert_path: cert_str.map(expand_tilde_str),
            key_path: key_str.map(expand_tilde_str),
            generate_cert: cli.generate_cert,
            semaphore_limit,
            reload_interval,
            report_interval,
            udp_buf_size,
            service_cooldown,
            shutdown_timeout,
        })
    }
}

fn expand_tilde_str(s: String) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_configuration_url() {
        let cfg = parse_configuration_url("revtun://127.0.0.1:8000/9000/9001#AES").unwrap();
        assert_eq!(cfg.tunnel_addr, "127.0.0.1:8000".parse().unwrap());
        assert_eq!(cfg.target_tcp_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(cfg.target_udp_addr, "127.0.0.1:9001".parse().unwrap());
        assert_eq!(cfg.tls_code, "AES");
    }

    #[test]
    fn target_segment_can_override_host() {
        let cfg =
            parse_configuration_url("revtun://127.0.0.1:8000/10.0.0.5:9000/9001#").unwrap();
        assert_eq!(cfg.target_tcp_addr, "10.0.0.5:9000".parse().unwrap());
        assert_eq!(cfg.target_udp_addr, "127.0.0.1:9001".parse().unwrap());
    }

    #[test]
    fn missing_target_segments_is_an_error() {
        assert!(parse_configuration_url("revtun://127.0.0.1:8000/9000#AES").is_err());
    }

    #[test]
    fn missing_port_is_an_error() {
        assert!(parse_configuration_url("revtun://127.0.0.1/9000/9001#AES").is_err());
    }
}
