use air_quality_sidecar::config::Config;
use air_quality_sidecar::http::{self, HttpState};
use air_quality_sidecar::poller::PollerService;
use air_quality_sidecar::position::FileTrackStore;
use air_quality_sidecar::session::DashboardSession;
use air_quality_sidecar::source::ApiClient;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

fn init_tracing(config: &Config) -> Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::{runtime::Tokio, trace::Config as OTelTraceConfig, Resource};
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,air_quality_sidecar=info".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true);

    if let Some(endpoint) = &config.otlp_endpoint {
        let endpoint = normalize_otlp_http_endpoint(endpoint);
        let exporter = opentelemetry_otlp::new_exporter()
            .http()
            .with_endpoint(endpoint);
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(exporter)
            .with_trace_config(OTelTraceConfig::default().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "air-quality-sidecar"),
            ])))
            .install_batch(Tokio)?;

        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(otel_layer)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}

fn normalize_otlp_http_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.contains("/v1/traces") {
        return trimmed.to_string();
    }
    format!("{}/v1/traces", trimmed.trim_end_matches('/'))
}

async fn bind_listener(addr: SocketAddr) -> Result<TcpListener> {
    match TcpListener::bind(addr).await {
        Ok(listener) => Ok(listener),
        Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
            anyhow::bail!("failed to bind {addr}: port already in use; set AQ_HTTP_BIND to another address");
        }
        Err(err) => Err(err).with_context(|| format!("failed to bind {addr}")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config)?;

    let store = FileTrackStore::open(&config.state_dir)
        .with_context(|| format!("failed to open state dir {}", config.state_dir.display()))?;
    let client = ApiClient::new(&config.api_base, config.request_timeout())
        .with_context(|| format!("invalid AQ_API_BASE {:?}", config.api_base))?;
    let session = Arc::new(DashboardSession::new(
        Arc::new(client),
        Arc::new(store),
        config.session_options(),
    ));

    tracing::info!(
        api_base = %config.api_base,
        devices = ?config.devices,
        poll_interval_ms = config.poll_interval_ms,
        state_dir = %config.state_dir.display(),
        "air-quality sidecar starting"
    );

    let cancel = CancellationToken::new();
    let poller = PollerService::new(session.clone(), config.devices.clone(), config.poll_interval())
        .start(cancel.clone());

    let app = http::router(HttpState {
        session,
        default_history_hours: config.default_history_hours,
    });
    let listener = bind_listener(config.http_bind).await?;
    tracing::info!(addr = %config.http_bind, "http listening");

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutdown signal received");
                }
            }
        })
        .await?;

    cancel.cancel();
    if let Err(err) = poller.await {
        tracing::warn!(error = %err, "poller task failed");
    }
    Ok(())
}
