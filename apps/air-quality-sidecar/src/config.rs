use crate::aqi::AggregatePolicy;
use crate::session::SessionOptions;
use anyhow::{Context, Result};
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_STATE_DIR: &str = "state";
const DEFAULT_HTTP_BIND: &str = "127.0.0.1:9110";

#[derive(Debug, Clone, Default, Deserialize)]
struct SetupConfigOverrides {
    #[serde(default)]
    api_base: Option<String>,
    #[serde(default)]
    devices: Option<Vec<String>>,
    #[serde(default)]
    poll_interval_ms: Option<u64>,
    #[serde(default)]
    aggregate_timeout_ms: Option<u64>,
    #[serde(default)]
    state_dir: Option<String>,
    #[serde(default)]
    http_bind: Option<String>,
    #[serde(default)]
    min_quality_score: Option<f64>,
    #[serde(default)]
    min_completeness_pct: Option<f64>,
}

fn setup_config_path(var: &impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
    var("AQ_SETUP_CONFIG_PATH").map(PathBuf::from)
}

fn load_setup_config_overrides(path: &Path) -> Option<SetupConfigOverrides> {
    if !path.exists() {
        return None;
    }
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to read setup config; using env defaults"
            );
            return None;
        }
    };
    let mut bytes = contents.into_bytes();
    match simd_json::serde::from_slice(&mut bytes) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to parse setup config; using env defaults"
            );
            None
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub api_base: String,
    /// Empty means discover devices from upstream on every poll.
    pub devices: Vec<String>,
    pub poll_interval_ms: u64,
    pub aggregate_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub history_limit: u32,
    pub default_history_hours: u32,
    pub state_dir: PathBuf,
    pub http_bind: SocketAddr,
    pub min_quality_score: f64,
    pub min_completeness_pct: f64,
    pub otlp_endpoint: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Self::from_vars(|key| {
            env::var(key)
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        })
    }

    /// Environment values win; the setup file fills in whatever is unset.
    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let overrides = setup_config_path(&var)
            .and_then(|path| load_setup_config_overrides(&path))
            .unwrap_or_default();

        let parsed = |key: &str| -> Result<Option<u64>> {
            var(key)
                .map(|v| v.parse::<u64>().with_context(|| format!("{key} must be an integer, got {v:?}")))
                .transpose()
        };
        let parsed_f64 = |key: &str| -> Result<Option<f64>> {
            var(key)
                .map(|v| v.parse::<f64>().with_context(|| format!("{key} must be a number, got {v:?}")))
                .transpose()
        };

        let api_base = var("AQ_API_BASE")
            .or_else(|| {
                overrides
                    .api_base
                    .as_deref()
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
            })
            .context("AQ_API_BASE is required (or present as api_base in the setup config)")?;

        let devices = match var("AQ_DEVICES") {
            Some(raw) => split_devices(&raw),
            None => overrides
                .devices
                .clone()
                .unwrap_or_default()
                .into_iter()
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .collect(),
        };

        let poll_interval_ms = parsed("AQ_POLL_INTERVAL_MS")?
            .or(overrides.poll_interval_ms.filter(|v| *v != 0))
            .unwrap_or(20_000);
        let aggregate_timeout_ms = parsed("AQ_AGGREGATE_TIMEOUT_MS")?
            .or(overrides.aggregate_timeout_ms.filter(|v| *v != 0))
            .unwrap_or(3_000);
        let request_timeout_ms = parsed("AQ_REQUEST_TIMEOUT_MS")?.unwrap_or(10_000);
        let history_limit = parsed("AQ_HISTORY_LIMIT")?.unwrap_or(100).min(u32::MAX as u64) as u32;
        let default_history_hours =
            parsed("AQ_DEFAULT_HISTORY_HOURS")?.unwrap_or(24).clamp(1, u32::MAX as u64) as u32;

        let state_dir = var("AQ_STATE_DIR")
            .or_else(|| overrides.state_dir.clone())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR));
        let http_bind_raw = var("AQ_HTTP_BIND")
            .or_else(|| overrides.http_bind.clone())
            .unwrap_or_else(|| DEFAULT_HTTP_BIND.to_string());
        let http_bind = http_bind_raw
            .parse::<SocketAddr>()
            .with_context(|| format!("AQ_HTTP_BIND is not a socket address: {http_bind_raw:?}"))?;

        let defaults = AggregatePolicy::default();
        let min_quality_score = parsed_f64("AQ_MIN_QUALITY_SCORE")?
            .or(overrides.min_quality_score)
            .unwrap_or(defaults.min_quality_score);
        let min_completeness_pct = parsed_f64("AQ_MIN_COMPLETENESS_PCT")?
            .or(overrides.min_completeness_pct)
            .unwrap_or(defaults.min_completeness_pct);

        Ok(Self {
            api_base,
            devices,
            poll_interval_ms: poll_interval_ms.max(1),
            aggregate_timeout_ms,
            request_timeout_ms,
            history_limit,
            default_history_hours,
            state_dir,
            http_bind,
            min_quality_score,
            min_completeness_pct,
            otlp_endpoint: var("OTEL_EXPORTER_OTLP_ENDPOINT"),
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn aggregate_timeout(&self) -> Duration {
        Duration::from_millis(self.aggregate_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            policy: AggregatePolicy {
                min_quality_score: self.min_quality_score,
                min_completeness_pct: self.min_completeness_pct,
            },
            aggregate_timeout: self.aggregate_timeout(),
            history_limit: self.history_limit,
        }
    }
}

fn split_devices(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}
