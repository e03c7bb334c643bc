//! sshping-exporter - Prometheus exporter that pings from network devices over SSH.
//!
//! Each scrape logs into the configured devices, runs `ping` on them and
//! exposes loss, latency, jitter and reachability. Configuration comes from
//! flags or a YAML document and is reloaded on SIGHUP or `POST /-/reload`.

mod background;
mod handlers;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use clap::Parser;
use tower_http::compression::CompressionLayer;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

use sshping_core::config::{ExporterConfig, Feature, FeatureToggles, PingSettings, ScrapeSettings};
use sshping_core::scrape::ScrapeOrchestrator;
use sshping_core::state::{ConfigSource, ExporterState};
use sshping_core::transport::SshConnector;

use state::AppState;

const RELOAD_PATH: &str = "/-/reload";

// ============================================================
// CLI
// ============================================================

#[derive(Parser, Debug)]
#[command(
    name = "sshping-exporter",
    about = "Prometheus exporter probing reachability from network devices over SSH",
    version = sshping_core::VERSION
)]
struct Args {
    /// Address on which to expose metrics and web interface.
    #[arg(long = "web.listen-address", default_value = "0.0.0.0:9362", env = "SSHPING_LISTEN")]
    listen_address: String,

    /// Path under which to expose metrics.
    #[arg(long = "web.telemetry-path", default_value = "/metrics")]
    telemetry_path: String,

    /// Comma separated list of devices to scrape (host[:port]).
    #[arg(long = "ssh.targets", default_value = "", env = "SSHPING_TARGETS")]
    targets: String,

    /// Username for SSH connections.
    #[arg(long = "ssh.user", default_value = "sshping_exporter", env = "SSHPING_USER")]
    user: String,

    /// Password for SSH connections.
    #[arg(long = "ssh.password", env = "SSHPING_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Private key file for SSH connections. Takes precedence over the password.
    #[arg(long = "ssh.keyfile", env = "SSHPING_KEYFILE")]
    keyfile: Option<PathBuf>,

    /// SSH connect timeout in seconds.
    #[arg(long = "ssh.timeout", default_value = "5")]
    timeout: u64,

    /// SSH response batch size: command output buffers grow by this many bytes.
    #[arg(long = "ssh.batch-size", default_value = "10000")]
    batch_size: usize,

    /// Destination pinged when the scrape does not pass `dest`.
    #[arg(long = "ssh.ping-dest", default_value = "baidu.com")]
    ping_dest: String,

    /// Echo requests per probe.
    #[arg(long = "ssh.ping-count", default_value = "5")]
    ping_count: u32,

    /// Log every remote command and its raw output.
    #[arg(long)]
    debug: bool,

    /// Allow legacy CBC ciphers and key exchange algorithms.
    #[arg(long = "legacy.ciphers")]
    legacy_ciphers: bool,

    /// Scrape ICMP reachability metrics.
    #[arg(long = "icmp.enabled", default_value_t = true, action = clap::ArgAction::Set)]
    icmp_enabled: bool,

    /// Scrape BGP metrics (no collector available yet).
    #[arg(long = "bgp.enabled", default_value_t = true, action = clap::ArgAction::Set)]
    bgp_enabled: bool,

    /// Scrape environment metrics (no collector available yet).
    #[arg(long = "environment.enabled", default_value_t = true, action = clap::ArgAction::Set)]
    environment_enabled: bool,

    /// Scrape system facts (no collector available yet).
    #[arg(long = "facts.enabled", default_value_t = true, action = clap::ArgAction::Set)]
    facts_enabled: bool,

    /// Scrape interface metrics (no collector available yet).
    #[arg(long = "interfaces.enabled", default_value_t = true, action = clap::ArgAction::Set)]
    interfaces_enabled: bool,

    /// Scrape optics metrics (no collector available yet).
    #[arg(long = "optics.enabled", default_value_t = true, action = clap::ArgAction::Set)]
    optics_enabled: bool,

    /// Maximum number of devices probed at the same time per scrape.
    #[arg(long = "scrape.max-concurrency", default_value = "16")]
    max_concurrency: usize,

    /// Upper bound in seconds for one device's collection.
    #[arg(long = "scrape.device-timeout", default_value = "30")]
    device_timeout: u64,

    /// Run `show version` before collecting and log the detected OS family.
    #[arg(long = "identify-os")]
    identify_os: bool,

    /// YAML config document. When set, all device and SSH flags are ignored.
    #[arg(long = "config.file", env = "SSHPING_CONFIG")]
    config_file: Option<PathBuf>,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    /// Configuration assembled from flags, used when no config file is given.
    fn to_config(&self) -> ExporterConfig {
        let mut features = FeatureToggles::default();
        for (feature, enabled) in [
            (Feature::Icmp, self.icmp_enabled),
            (Feature::Bgp, self.bgp_enabled),
            (Feature::Environment, self.environment_enabled),
            (Feature::Facts, self.facts_enabled),
            (Feature::Interfaces, self.interfaces_enabled),
            (Feature::Optics, self.optics_enabled),
        ] {
            features.set(feature, enabled);
        }

        ExporterConfig {
            debug: self.debug,
            legacy_ciphers: self.legacy_ciphers,
            timeout: self.timeout,
            batch_size: self.batch_size,
            username: self.user.clone(),
            password: self.password.clone().filter(|p| !p.is_empty()),
            key_file: self.keyfile.clone(),
            identify_os: self.identify_os,
            ping: PingSettings {
                destination: self.ping_dest.clone(),
                count: self.ping_count,
                ..PingSettings::default()
            },
            scrape: ScrapeSettings {
                max_concurrency: self.max_concurrency,
                device_timeout: self.device_timeout,
            },
            features,
            devices: ExporterConfig::devices_from_targets(&self.targets),
        }
    }

    fn config_source(&self) -> ConfigSource {
        match &self.config_file {
            Some(path) => ConfigSource::File(path.clone()),
            None => ConfigSource::Static(self.to_config()),
        }
    }
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Default level is INFO. Use -q for quiet mode (errors only).
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["sshping_exporter", "sshping_core"] {
        if let Ok(directive) = format!("{}={}", target, level).parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Telemetry path must be absolute and must not shadow the other routes.
fn validate_telemetry_path(path: &str) -> Result<(), String> {
    if !path.starts_with('/') {
        return Err(format!("telemetry path {:?} must start with '/'", path));
    }
    if path == "/" || path == RELOAD_PATH {
        return Err(format!("telemetry path {:?} is reserved", path));
    }
    Ok(())
}

fn build_router(state: AppState) -> Router {
    let telemetry_path = state.telemetry_path.to_string();
    Router::new()
        .route("/", get(handlers::handle_root))
        .route(&telemetry_path, get(handlers::handle_metrics))
        .route(RELOAD_PATH, post(handlers::handle_reload))
        .with_state(state)
        .layer(CompressionLayer::new())
}

// ============================================================
// Main
// ============================================================

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
        .block_on(async_main(args));
}

async fn async_main(args: Args) {
    info!(version = sshping_core::VERSION, "starting sshping-exporter");

    if let Err(e) = validate_telemetry_path(&args.telemetry_path) {
        error!(error = %e, "invalid --web.telemetry-path");
        process::exit(1);
    }

    let exporter = match ExporterState::new(args.config_source()) {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            process::exit(1);
        }
    };

    tokio::spawn(background::reload_on_sighup(exporter.clone()));

    let orchestrator = ScrapeOrchestrator::new(exporter, Arc::new(SshConnector::new()));
    let app = build_router(AppState::new(orchestrator, &args.telemetry_path));

    let addr: SocketAddr = match args.listen_address.parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!(address = %args.listen_address, error = %e, "invalid listen address");
            process::exit(1);
        }
    };

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(%addr, error = %e, "failed to bind");
            process::exit(1);
        }
    };
    info!(%addr, path = %args.telemetry_path, "listening");

    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "server error");
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use std::io::{Seek, Write};
    use tower::ServiceExt;

    use sshping_core::transport::mock::MockConnector;

    const OK_OUTPUT: &str = "--- baidu.com ping statistics ---
5 packets transmitted, 5 received, 0% packet loss, time 4005ms
rtt min/avg/max/mdev = 1.0/2.0/3.5/0.5 ms
";

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["sshping-exporter"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    fn app_with(source: ConfigSource, connector: MockConnector) -> Router {
        let exporter = Arc::new(ExporterState::new(source).unwrap());
        let orchestrator = ScrapeOrchestrator::new(exporter, Arc::new(connector));
        build_router(AppState::new(orchestrator, "/metrics"))
    }

    fn app() -> Router {
        let connector = MockConnector::new()
            .with_response("sw1", "ping -c 5 baidu.com", OK_OUTPUT)
            .with_response("sw2", "ping -c 5 baidu.com", OK_OUTPUT);
        app_with(
            args(&["--ssh.targets", "sw1,sw2"]).config_source(),
            connector,
        )
    }

    async fn send(app: Router, method: &str, uri: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[test]
    fn test_flag_defaults() {
        let config = args(&["--ssh.targets", "sw1, sw2:2222"]).to_config();
        assert_eq!(config.devices.len(), 2);
        assert_eq!(config.devices[1].port, Some(2222));
        assert_eq!(config.ping.destination, "baidu.com");
        assert_eq!(config.ping.count, 5);
        assert_eq!(config.timeout, 5);
        assert_eq!(config.batch_size, 10000);
        assert_eq!(config.scrape.max_concurrency, 16);
        assert!(config.features.is_enabled(Feature::Icmp));
        assert!(config.password.is_none());
    }

    #[test]
    fn test_feature_flags_take_values() {
        let config = args(&["--icmp.enabled", "false", "--bgp.enabled=false"]).to_config();
        assert!(!config.features.is_enabled(Feature::Icmp));
        assert!(!config.features.is_enabled(Feature::Bgp));
        assert!(config.features.is_enabled(Feature::Optics));
    }

    #[test]
    fn test_config_file_wins_over_flags() {
        let args = args(&["--ssh.targets", "sw1", "--config.file", "/etc/sshping.yaml"]);
        assert!(matches!(args.config_source(), ConfigSource::File(_)));
    }

    #[test]
    fn test_validate_telemetry_path() {
        assert!(validate_telemetry_path("/metrics").is_ok());
        assert!(validate_telemetry_path("/probe/ssh").is_ok());
        assert!(validate_telemetry_path("metrics").is_err());
        assert!(validate_telemetry_path("/").is_err());
        assert!(validate_telemetry_path("/-/reload").is_err());
    }

    #[tokio::test]
    async fn test_root_page_links_metrics() {
        let (status, body) = send(app(), "GET", "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("href=\"/metrics\""));
        assert!(body.contains(sshping_core::VERSION));
    }

    #[tokio::test]
    async fn test_metrics_for_all_devices() {
        let (status, body) = send(app(), "GET", "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains(r#"sshping_up{source="sw1"} 1"#));
        assert!(body.contains(r#"sshping_up{source="sw2"} 1"#));
        assert!(body.contains("sshping_icmp_jitter_ms"));
        assert!(body.contains("sshping_collector_duration_seconds"));
    }

    #[tokio::test]
    async fn test_metrics_for_one_target() {
        let (status, body) = send(app(), "GET", "/metrics?target=sw2").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains(r#"sshping_up{source="sw2"} 1"#));
        assert!(!body.contains(r#"source="sw1""#));
    }

    #[tokio::test]
    async fn test_huge_scrape_timeout_header_is_clamped() {
        for value in ["1e20", "inf"] {
            let request = Request::builder()
                .uri("/metrics")
                .header(handlers::SCRAPE_TIMEOUT_HEADER, value)
                .body(Body::empty())
                .unwrap();
            let response = app().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let body = String::from_utf8(body.to_vec()).unwrap();
            assert!(body.contains(r#"sshping_up{source="sw1"} 1"#));
        }
    }

    #[tokio::test]
    async fn test_unknown_target_is_404() {
        let (status, body) = send(app(), "GET", "/metrics?target=sw9").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "ERROR - not found target: sw9");
    }

    #[tokio::test]
    async fn test_invalid_dest_is_400() {
        let (status, body) = send(app(), "GET", "/metrics?dest=1.1.1.1%3Breboot").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.starts_with("ERROR - invalid destination"));
    }

    #[tokio::test]
    async fn test_reload_requires_post() {
        let (status, _) = send(app(), "GET", "/-/reload").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

        let (status, body) = send(app(), "POST", "/-/reload").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
    }

    #[tokio::test]
    async fn test_reload_failure_reports_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"devices:\n  - host: sw1\n").unwrap();
        file.flush().unwrap();
        let connector = MockConnector::new().with_response("sw1", "ping -c 5 baidu.com", OK_OUTPUT);
        let app = app_with(ConfigSource::File(file.path().to_path_buf()), connector);

        let f = file.as_file_mut();
        f.set_len(0).unwrap();
        f.rewind().unwrap();
        f.write_all(b"devices: []\n").unwrap();
        f.flush().unwrap();

        let (status, body) = send(app.clone(), "POST", "/-/reload").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.starts_with("failed to reload config: "));
        assert!(body.contains("no devices configured"));

        // The previous generation keeps serving.
        let (status, body) = send(app, "GET", "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains(r#"sshping_up{source="sw1"} 1"#));
    }
}
