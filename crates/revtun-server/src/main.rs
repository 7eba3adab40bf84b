use std::path::PathBuf;

use clap::Parser;
use revtun_server::{tls, CliOverrides, Server, ServerConfig};
use tracing_subscriber::EnvFilter;

/// Server half of a reverse TCP/UDP tunneling relay.
#[derive(Parser, Debug)]
#[command(name = "revtun-server", version, about)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Full configuration URL: scheme://tunnel-host:tunnel-port/tcp-port/udp-port#tlsCode
    #[arg(long)]
    url: Option<String>,

    /// Tunnel listen address, overriding the URL's host:port.
    #[arg(long)]
    tunnel: Option<String>,

    /// Target TCP listen address or bare port, overriding the URL.
    #[arg(long = "target-tcp")]
    target_tcp: Option<String>,

    /// Target UDP listen address or bare port, overriding the URL.
    #[arg(long = "target-udp")]
    target_udp: Option<String>,

    /// TLS mode code sent in the handshake fragment, overriding the URL.
    #[arg(long = "tls-code")]
    tls_code: Option<String>,

    /// TLS certificate PEM path.
    #[arg(long)]
    cert: Option<String>,

    /// TLS private key PEM path.
    #[arg(long)]
    key: Option<String>,

    /// Generate a self-signed cert/key pair at --cert/--key before loading them.
    #[arg(long)]
    generate_cert: bool,

    /// Maximum concurrent in-flight dispatches.
    #[arg(long)]
    semaphore_limit: Option<usize>,

    /// Seconds between forced idle-channel flushes.
    #[arg(long)]
    reload_interval_secs: Option<u64>,

    /// Seconds between health-loop ticks and stats reports.
    #[arg(long)]
    report_interval_secs: Option<u64>,

    /// UDP datagram buffer size in bytes.
    #[arg(long)]
    udp_buf_size: Option<usize>,

    /// Seconds to sleep between restart attempts.
    #[arg(long)]
    service_cooldown_secs: Option<u64>,

    /// Seconds allowed for graceful shutdown before abandoning tasks.
    #[arg(long)]
    shutdown_timeout_secs: Option<u64>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let config = match ServerConfig::load(
        cli.config.as_deref(),
        CliOverrides {
            url: cli.url.as_deref(),
            tunnel: cli.tunnel.as_deref(),
            target_tcp: cli.target_tcp.as_deref(),
            target_udp: cli.target_udp.as_deref(),
            tls_code: cli.tls_code.as_deref(),
            cert: cli.cert.as_deref(),
            key: cli.key.as_deref(),
            generate_cert: cli.generate_cert,
            semaphore_limit: cli.semaphore_limit,
            reload_interval_secs: cli.reload_interval_secs,
            report_interval_secs: cli.report_interval_secs,
            udp_buf_size: cli.udp_buf_size,
            service_cooldown_secs: cli.service_cooldown_secs,
            shutdown_timeout_secs: cli.shutdown_timeout_secs,
        },
    ) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let tls_config = match tls::resolve_tls_config(
        config.cert_path.as_ref(),
        config.key_path.as_ref(),
        config.generate_cert,
    ) {
        Ok(tls_config) => tls_config,
        Err(e) => {
            tracing::error!(error = %e, "failed to resolve tls configuration");
            std::process::exit(1);
        }
    };

    tracing::info!(tls = tls_config.is_some(), "starting revtun-server");

    let server = Server::new(config, tls_config);
    server.manage().await;
}
