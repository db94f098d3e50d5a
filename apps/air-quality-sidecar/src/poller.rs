use crate::session::DashboardSession;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub refreshed: Vec<String>,
    pub failed: Vec<String>,
}

/// Periodically refreshes every tracked device through the session.
pub struct PollerService {
    session: Arc<DashboardSession>,
    devices: Vec<String>,
    interval: Duration,
}

impl PollerService {
    /// An empty `devices` list means "whatever upstream lists on each tick".
    pub fn new(session: Arc<DashboardSession>, devices: Vec<String>, interval: Duration) -> Self {
        Self {
            session,
            devices,
            interval,
        }
    }

    pub fn start(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let summary = self.poll_once().await;
                        tracing::debug!(
                            refreshed = summary.refreshed.len(),
                            failed = summary.failed.len(),
                            "poll tick complete"
                        );
                    }
                }
            }
            tracing::info!("poller stopped");
        })
    }

    pub async fn poll_once(&self) -> PollSummary {
        let devices = match self.targets().await {
            Some(devices) => devices,
            None => return PollSummary::default(),
        };

        let results = join_all(devices.iter().map(|id| self.session.refresh(id))).await;
        let mut summary = PollSummary::default();
        for (device_id, result) in devices.into_iter().zip(results) {
            match result {
                Ok(_) => summary.refreshed.push(device_id),
                Err(err) => {
                    tracing::warn!(device_id = %device_id, error = %err, "device refresh failed");
                    summary.failed.push(device_id);
                }
            }
        }
        summary
    }

    async fn targets(&self) -> Option<Vec<String>> {
        if !self.devices.is_empty() {
            return Some(self.devices.clone());
        }
        match self.session.devices().await {
            Ok(directory) => Some(
                directory
                    .devices
                    .into_iter()
                    .map(|device| device.device_id)
                    .collect(),
            ),
            Err(err) => {
                tracing::warn!(error = %err, "device discovery failed");
                None
            }
        }
    }
}
