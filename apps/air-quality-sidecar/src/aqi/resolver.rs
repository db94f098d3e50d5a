use super::breakpoints::{compute_realtime, AQI_CEILING};
use super::{AqiResult, AqiSource};
use crate::reading::{DeviceMode, HourlyAggregate, SensorReading};
use crate::source::DataSource;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;

/// When an hourly rollup is trusted over the live reading. Either threshold
/// on its own is sufficient.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregatePolicy {
    pub min_quality_score: f64,
    pub min_completeness_pct: f64,
}

impl Default for AggregatePolicy {
    fn default() -> Self {
        Self {
            min_quality_score: 70.0,
            min_completeness_pct: 75.0,
        }
    }
}

impl AggregatePolicy {
    pub fn trusts(&self, aggregate: &HourlyAggregate) -> bool {
        aggregate.quality_score >= self.min_quality_score
            || aggregate.data_completeness_pct >= self.min_completeness_pct
    }
}

#[derive(Clone)]
pub struct AqiResolver {
    source: Arc<dyn DataSource>,
    policy: AggregatePolicy,
    fetch_timeout: Duration,
}

impl AqiResolver {
    pub fn new(source: Arc<dyn DataSource>, policy: AggregatePolicy, fetch_timeout: Duration) -> Self {
        Self {
            source,
            policy,
            fetch_timeout,
        }
    }

    /// Best-effort AQI for `reading`. Never fails: every problem with the
    /// hourly rollup degrades to the live computation.
    pub async fn resolve(&self, reading: &SensorReading) -> AqiResult {
        // A moving device's hourly average mixes locations.
        if reading.mode == DeviceMode::Mobile {
            return compute_realtime(&reading.pollutants);
        }

        match self.latest_aggregate(reading).await {
            Some(aggregate) if self.policy.trusts(&aggregate) => AqiResult {
                value: aggregate.aqi.min(AQI_CEILING),
                category: aggregate.aqi_category,
                dominant_pollutant: aggregate.aqi_pollutant,
                source: AqiSource::Hourly,
            },
            Some(aggregate) => {
                tracing::debug!(
                    device_id = %reading.device_id,
                    quality_score = aggregate.quality_score,
                    completeness_pct = aggregate.data_completeness_pct,
                    "hourly aggregate below quality floor; using live reading"
                );
                compute_realtime(&reading.pollutants)
            }
            None => compute_realtime(&reading.pollutants),
        }
    }

    async fn latest_aggregate(&self, reading: &SensorReading) -> Option<HourlyAggregate> {
        let hour = hour_start(reading.timestamp);
        let fetch = self.source.fetch_hourly_aggregate(&reading.device_id, hour);
        match tokio::time::timeout(self.fetch_timeout, fetch).await {
            Ok(Ok(aggregate)) => aggregate,
            Ok(Err(err)) => {
                tracing::warn!(device_id = %reading.device_id, error = %err, "hourly aggregate fetch failed");
                None
            }
            Err(_) => {
                tracing::warn!(
                    device_id = %reading.device_id,
                    timeout_ms = self.fetch_timeout.as_millis() as u64,
                    "hourly aggregate fetch timed out"
                );
                None
            }
        }
    }
}

pub(crate) fn hour_start(ts: DateTime<Utc>) -> DateTime<Utc> {
    let secs = ts.timestamp();
    let bucket = secs.div_euclid(3600) * 3600;
    Utc.timestamp_opt(bucket, 0).single().unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aqi::AqiCategory;
    use crate::reading::Pollutant;
    use crate::test_support::{aggregate, fixed_reading, mobile_reading, AggregateScript, ScriptedSource};

    fn resolver(source: &Arc<ScriptedSource>) -> AqiResolver {
        AqiResolver::new(source.clone(), AggregatePolicy::default(), Duration::from_millis(500))
    }

    #[tokio::test]
    async fn mobile_readings_never_consult_the_aggregate() {
        let source = Arc::new(ScriptedSource::new());
        source.set_aggregate(AggregateScript::Present(aggregate(95.0, 95.0, 42)));
        let result = resolver(&source).resolve(&mobile_reading("SMAA_002", "1,1")).await;
        assert_eq!(result.source, AqiSource::Realtime);
        assert_eq!(source.aggregate_calls(), 0);
    }

    #[tokio::test]
    async fn quality_score_alone_is_sufficient() {
        let source = Arc::new(ScriptedSource::new());
        source.set_aggregate(AggregateScript::Present(aggregate(80.0, 10.0, 42)));
        let result = resolver(&source).resolve(&fixed_reading("SMAA_001")).await;
        assert_eq!(result.source, AqiSource::Hourly);
        assert_eq!(result.value, 42);
        assert_eq!(result.category, AqiCategory::Good);
        assert_eq!(result.dominant_pollutant, Pollutant::Pm10);
        assert_eq!(source.aggregate_calls(), 1);
    }

    #[tokio::test]
    async fn completeness_alone_is_sufficient() {
        let source = Arc::new(ScriptedSource::new());
        source.set_aggregate(AggregateScript::Present(aggregate(10.0, 75.0, 42)));
        let result = resolver(&source).resolve(&fixed_reading("SMAA_001")).await;
        assert_eq!(result.source, AqiSource::Hourly);
    }

    #[tokio::test]
    async fn low_quality_aggregate_falls_back_to_realtime() {
        let source = Arc::new(ScriptedSource::new());
        source.set_aggregate(AggregateScript::Present(aggregate(50.0, 50.0, 42)));
        let reading = fixed_reading("SMAA_001");
        let result = resolver(&source).resolve(&reading).await;
        assert_eq!(result.source, AqiSource::Realtime);
        assert_eq!(result, compute_realtime(&reading.pollutants));
    }

    #[tokio::test]
    async fn missing_or_failed_aggregate_falls_back_to_realtime() {
        let source = Arc::new(ScriptedSource::new());
        let resolver = resolver(&source);
        let reading = fixed_reading("SMAA_001");

        source.set_aggregate(AggregateScript::Missing);
        assert_eq!(resolver.resolve(&reading).await.source, AqiSource::Realtime);

        source.set_aggregate(AggregateScript::Fail);
        assert_eq!(resolver.resolve(&reading).await.source, AqiSource::Realtime);
        assert_eq!(source.aggregate_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_aggregate_fetch_times_out_to_realtime() {
        let source = Arc::new(ScriptedSource::new());
        source.set_aggregate(AggregateScript::Hang);
        let result = resolver(&source).resolve(&fixed_reading("SMAA_001")).await;
        assert_eq!(result.source, AqiSource::Realtime);
    }

    #[tokio::test]
    async fn aggregate_index_is_clamped_to_ceiling() {
        let source = Arc::new(ScriptedSource::new());
        source.set_aggregate(AggregateScript::Present(aggregate(99.0, 99.0, 612)));
        let result = resolver(&source).resolve(&fixed_reading("SMAA_001")).await;
        assert_eq!(result.value, 500);
    }

    #[tokio::test]
    async fn resolve_is_idempotent() {
        let source = Arc::new(ScriptedSource::new());
        source.set_aggregate(AggregateScript::Present(aggregate(80.0, 10.0, 77)));
        let resolver = resolver(&source);
        let reading = fixed_reading("SMAA_001");
        let first = resolver.resolve(&reading).await;
        let second = resolver.resolve(&reading).await;
        assert_eq!(first, second);

        let mobile = mobile_reading("SMAA_002", "0,0");
        assert_eq!(resolver.resolve(&mobile).await, resolver.resolve(&mobile).await);
    }

    #[tokio::test]
    async fn aggregate_is_requested_for_the_reading_hour() {
        let source = Arc::new(ScriptedSource::new());
        let reading = fixed_reading("SMAA_001");
        resolver(&source).resolve(&reading).await;
        let requested = source.last_aggregate_hour().unwrap();
        assert_eq!(requested.timestamp() % 3600, 0);
        assert!(requested <= reading.timestamp);
        assert!(reading.timestamp.timestamp() - requested.timestamp() < 3600);
    }

    #[test]
    fn hour_start_aligns_down() {
        let ts = Utc.timestamp_opt(7_199, 0).single().unwrap();
        assert_eq!(hour_start(ts).timestamp(), 3_600);
        let ts = Utc.timestamp_opt(7_200, 0).single().unwrap();
        assert_eq!(hour_start(ts).timestamp(), 7_200);
    }
}
