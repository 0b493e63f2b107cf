//! Nodewatch Agent
//!
//! Node and service health-monitoring agent.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Nodewatch Agent                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │   Observers  │───▶│    Health    │    │  Telemetry   │       │
//! │  │  (sampling)  │    │   Reporter   │    │    Sender    │       │
//! │  │              │───────────────────────▶│   (signed)   │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use nodewatch::adapters::{HttpTelemetryTransport, LoggingHealthReporter, SysinfoCounterProvider};
use nodewatch::error::{Error, Result};
use nodewatch::observer::{ObserverContext, ObserverSupervisor, StatusMap};
use nodewatch::process::{build_enumerator, EnumeratorKind, ProcessFamilyResolver};
use nodewatch::stats::stats;
use nodewatch::telemetry::SignedTelemetrySender;
use nodewatch::AgentConfig;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Nodewatch - node and service health monitoring
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Agent configuration file (YAML)
    #[arg(long, env = "NODEWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Node name stamped on health signals and telemetry
    #[arg(long, env = "NODE_NAME")]
    node_name: Option<String>,

    /// Process enumerator (auto, native, text-tool)
    #[arg(long, env = "NODEWATCH_ENUMERATOR", default_value = "auto")]
    enumerator: EnumeratorKind,

    /// Run one cycle of every observer, then exit
    #[arg(long)]
    once: bool,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:9464")]
    metrics_addr: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:9465")]
    health_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    let mut config = match &args.config {
        Some(path) => AgentConfig::load(path)?,
        None => {
            warn!("No configuration file given, using defaults");
            AgentConfig::default()
        }
    };
    if let Some(node_name) = &args.node_name {
        config.node_name = node_name.clone();
    }

    info!("Starting Nodewatch agent");
    info!("  Node: {}", config.node_name);
    info!("  Enumerator: {:?}", args.enumerator);
    info!("  Observers: {}", config.enabled_observers().count());
    info!("  Telemetry: {}", config.telemetry.enabled);

    if config.enabled_observers().next().is_none() {
        warn!("No observers enabled, nothing to do");
        return Ok(());
    }

    let ctx = build_context(&config, args.enumerator)?;
    let supervisor = ObserverSupervisor::from_config(&config, ctx);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Shutdown requested");
        shutdown.cancel();
    });

    if args.once {
        let mut first_error = None;
        for (name, result) in supervisor.run_once(cancel).await {
            match result {
                Ok(report) => info!(
                    observer = %name,
                    evaluated = report.evaluated,
                    signals = report.signals,
                    "Cycle complete"
                ),
                Err(e) if e.is_cancelled() => {}
                Err(e) => {
                    error!(observer = %name, "Cycle failed: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }
        return first_error.map_or(Ok(()), Err);
    }

    // Start health server
    let health_addr = args.health_addr.clone();
    let status = supervisor.status();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr, status).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr).await {
            error!("Metrics server error: {}", e);
        }
    });

    supervisor.run(cancel).await?;

    info!("Agent shutdown complete");
    Ok(())
}

/// Select platform adapters once and wire them together.
fn build_context(config: &AgentConfig, enumerator: EnumeratorKind) -> Result<ObserverContext> {
    let enumerator = build_enumerator(enumerator, config.denylist());
    info!("Using {} process enumerator", enumerator.name());

    let sender = if config.telemetry.enabled {
        let transport = HttpTelemetryTransport::new(config.telemetry.timeout())?;
        let sender = SignedTelemetrySender::new(config.telemetry.clone(), Arc::new(transport))?;
        info!("Telemetry endpoint: {}", config.telemetry.endpoint());
        Some(Arc::new(sender))
    } else {
        None
    };

    let resolver = ProcessFamilyResolver::with_limits(enumerator, config.resolver_limits());
    let limits = resolver.limits();
    info!(
        max_descendants = limits.max_descendants,
        max_depth = limits.max_depth,
        "Process family limits"
    );

    Ok(ObserverContext {
        node_name: config.node_name.clone(),
        counters: Arc::new(SysinfoCounterProvider::new()),
        resolver,
        reporter: Arc::new(LoggingHealthReporter::new()),
        sender,
    })
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// HTTP Servers
// =============================================================================

fn respond(
    status: hyper::StatusCode,
    body: impl Into<hyper::body::Bytes>,
) -> hyper::Response<http_body_util::Full<hyper::body::Bytes>> {
    let mut response = hyper::Response::new(http_body_util::Full::new(body.into()));
    *response.status_mut() = status;
    response
}

async fn run_health_server(addr: &str, status: StatusMap) -> Result<()> {
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Internal(format!("Invalid health server address: {}", e)))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind health server: {}", e)))?;

    info!("Health server listening on {}", addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .map_err(|e| Error::Internal(format!("Health server accept error: {}", e)))?;

        let io = TokioIo::new(stream);
        let status = status.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let ready = ObserverSupervisor::is_ready(&status);
                async move {
                    let response = match req.uri().path() {
                        "/healthz" | "/livez" => respond(StatusCode::OK, "ok"),
                        "/readyz" if ready => respond(StatusCode::OK, "ok"),
                        "/readyz" => respond(StatusCode::SERVICE_UNAVAILABLE, "waiting for first cycle"),
                        _ => respond(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::error!("Health server connection error: {}", e);
            }
        });
    }
}

async fn run_metrics_server(addr: &str) -> Result<()> {
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    async fn metrics_handler(
        req: Request<hyper::body::Incoming>,
    ) -> std::result::Result<
        Response<http_body_util::Full<hyper::body::Bytes>>,
        std::convert::Infallible,
    > {
        let response = match req.uri().path() {
            "/metrics" => {
                let mut response = respond(StatusCode::OK, stats().encode());
                response.headers_mut().insert(
                    hyper::header::CONTENT_TYPE,
                    hyper::header::HeaderValue::from_static("text/plain; version=0.0.4"),
                );
                response
            }
            _ => respond(StatusCode::NOT_FOUND, "not found"),
        };
        Ok(response)
    }

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Internal(format!("Invalid metrics server address: {}", e)))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind metrics server: {}", e)))?;

    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .map_err(|e| Error::Internal(format!("Metrics server accept error: {}", e)))?;

        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(metrics_handler))
                .await
            {
                tracing::error!("Metrics server connection error: {}", e);
            }
        });
    }
}
