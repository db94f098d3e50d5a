use crate::error::{AppError, AppResult};
use crate::history::{self, Metric, RouteSummary, SeriesPoint, StatusThresholds};
use crate::position::StableLocation;
use crate::session::{ApiStatus, DashboardSession, DeviceSnapshot};
use crate::source::DeviceDirectory;
use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone)]
pub struct HttpState {
    pub session: Arc<DashboardSession>,
    pub default_history_hours: u32,
}

#[derive(Debug, Deserialize)]
struct WindowQuery {
    hours: Option<u32>,
    metric: Option<String>,
}

impl WindowQuery {
    fn hours(&self, state: &HttpState) -> AppResult<u32> {
        match self.hours {
            Some(0) => Err(AppError::bad_request("hours must be positive")),
            Some(hours) => Ok(hours),
            None => Ok(state.default_history_hours),
        }
    }

    fn metric(&self) -> AppResult<Metric> {
        match self.metric.as_deref() {
            None => Ok(Metric::Pm25),
            Some(raw) => raw.parse().map_err(AppError::bad_request),
        }
    }
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
    device_id: String,
    metric: Metric,
    hours: u32,
    thresholds: Option<StatusThresholds>,
    points: Vec<SeriesPoint>,
}

async fn healthz() -> &'static str {
    "ok"
}

async fn get_status(State(state): State<HttpState>) -> Json<ApiStatus> {
    Json(state.session.api_status().await)
}

async fn list_devices(State(state): State<HttpState>) -> AppResult<Json<DeviceDirectory>> {
    let directory = state.session.devices().await.map_err(AppError::upstream)?;
    Ok(Json(directory))
}

async fn list_snapshots(State(state): State<HttpState>) -> Json<Vec<DeviceSnapshot>> {
    Json(state.session.snapshots().await)
}

async fn get_snapshot(
    State(state): State<HttpState>,
    Path(device_id): Path<String>,
) -> AppResult<Json<DeviceSnapshot>> {
    state
        .session
        .snapshot(&device_id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("no snapshot for {device_id}")))
}

async fn get_location(
    State(state): State<HttpState>,
    Path(device_id): Path<String>,
) -> AppResult<Json<StableLocation>> {
    state
        .session
        .current_stable_location(&device_id)
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("no committed location for {device_id}")))
}

async fn get_history(
    State(state): State<HttpState>,
    Path(device_id): Path<String>,
    Query(query): Query<WindowQuery>,
) -> AppResult<Json<HistoryResponse>> {
    let hours = query.hours(&state)?;
    let metric = query.metric()?;
    let records = state
        .session
        .history(&device_id, hours)
        .await
        .map_err(AppError::upstream)?;
    Ok(Json(HistoryResponse {
        thresholds: metric.pollutant().map(history::thresholds),
        points: history::series(&records, metric),
        device_id,
        metric,
        hours,
    }))
}

async fn get_route(
    State(state): State<HttpState>,
    Path(device_id): Path<String>,
    Query(query): Query<WindowQuery>,
) -> AppResult<Json<RouteSummary>> {
    let hours = query.hours(&state)?;
    let metric = query.metric()?;
    let records = state
        .session
        .history(&device_id, hours)
        .await
        .map_err(AppError::upstream)?;
    history::route_summary(&records, metric)
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("not enough GPS fixes for {device_id}")))
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/status", get(get_status))
        .route("/v1/devices", get(list_devices))
        .route("/v1/snapshots", get(list_snapshots))
        .route("/v1/devices/{device_id}/snapshot", get(get_snapshot))
        .route("/v1/devices/{device_id}/location", get(get_location))
        .route("/v1/devices/{device_id}/history", get(get_history))
        .route("/v1/devices/{device_id}/route", get(get_route))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::MemoryTrackStore;
    use crate::session::SessionOptions;
    use crate::test_support::{fixed_reading, mobile_reading, ts, ScriptedSource, BASE_TS};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use serde_json::Value;
    use tower::ServiceExt;

    fn state(source: &Arc<ScriptedSource>) -> HttpState {
        HttpState {
            session: Arc::new(DashboardSession::new(
                source.clone(),
                Arc::new(MemoryTrackStore::new()),
                SessionOptions::default(),
            )),
            default_history_hours: 24,
        }
    }

    async fn get(state: &HttpState, uri: &str) -> Response {
        router(state.clone())
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn json(resp: Response) -> Value {
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let source = Arc::new(ScriptedSource::new());
        let resp = get(&state(&source), "/healthz").await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn snapshot_is_404_until_refreshed() {
        let source = Arc::new(ScriptedSource::new());
        source.set_latest(fixed_reading("SMAA_001"));
        let state = state(&source);

        let resp = get(&state, "/v1/devices/SMAA_001/snapshot").await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        state.session.refresh("SMAA_001").await.unwrap();
        let resp = get(&state, "/v1/devices/SMAA_001/snapshot").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json(resp).await;
        assert_eq!(body["aqi"]["value"], 115);
        assert_eq!(body["reading"]["device_id"], "SMAA_001");
    }

    #[tokio::test]
    async fn devices_upstream_failure_is_bad_gateway() {
        let source = Arc::new(ScriptedSource::new());
        let state = state(&source);
        let resp = get(&state, "/v1/devices").await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

        let status = json(get(&state, "/v1/status").await).await;
        assert_eq!(status["online"], false);
    }

    #[tokio::test]
    async fn location_is_served_after_a_commit() {
        let source = Arc::new(ScriptedSource::new());
        let state = state(&source);
        let resp = get(&state, "/v1/devices/SMAA_002/location").await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        for fix in ["0,0", "3,0", "0,3"] {
            state.session.process_reading(mobile_reading("SMAA_002", fix)).await;
        }
        state.session.process_reading(fixed_reading("SMAA_002")).await;

        let body = json(get(&state, "/v1/devices/SMAA_002/location").await).await;
        assert_eq!(body["coordinate"]["lat"], 1.0);
        assert_eq!(body["trigger"], "transition");
    }

    #[tokio::test]
    async fn history_rejects_unknown_metrics() {
        let source = Arc::new(ScriptedSource::new());
        let resp = get(&state(&source), "/v1/devices/SMAA_001/history?metric=wind").await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn history_returns_an_ascending_series_with_thresholds() {
        let source = Arc::new(ScriptedSource::new());
        let mut later = fixed_reading("SMAA_001");
        later.timestamp = ts(BASE_TS + 60);
        later.pollutants.pm10 = Some(20.0);
        source.set_history(vec![later, fixed_reading("SMAA_001")]);

        let resp = get(&state(&source), "/v1/devices/SMAA_001/history?hours=6&metric=pm10").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json(resp).await;
        assert_eq!(body["hours"], 6);
        assert_eq!(body["metric"], "pm10");
        assert_eq!(body["thresholds"]["good"], 54.0);
        let values: Vec<f64> = body["points"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["value"].as_f64().unwrap())
            .collect();
        assert_eq!(values, vec![100.0, 20.0]);
    }

    #[tokio::test]
    async fn route_needs_two_fixes() {
        let source = Arc::new(ScriptedSource::new());
        source.set_history(vec![mobile_reading("SMAA_002", "0,0")]);
        let state = state(&source);
        let resp = get(&state, "/v1/devices/SMAA_002/route").await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let mut next = mobile_reading("SMAA_002", "0,1");
        next.timestamp = ts(BASE_TS + 60);
        source.set_history(vec![mobile_reading("SMAA_002", "0,0"), next]);
        let body = json(get(&state, "/v1/devices/SMAA_002/route?metric=pm25").await).await;
        assert_eq!(body["points"].as_array().unwrap().len(), 2);
        assert_eq!(body["hotspots"].as_array().unwrap().len(), 2);
    }
}
