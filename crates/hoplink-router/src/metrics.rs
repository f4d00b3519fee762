//! Prometheus metrics for the router.
//!
//! Metric names live here as constants. `RouterMetrics` owns its own recorder
//! rather than installing a process-wide one, so every router instance (and
//! every test) has an isolated registry.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::collateral::channel_snapshots;
use crate::error::EngineError;
use crate::traits::ChannelEngine;

/// Forwards attempted, labelled by inbound transfer id (counter).
pub const FORWARD_ATTEMPTS: &str = "forward_attempts_total";
/// Forwards that completed (counter).
pub const FORWARD_SUCCESS: &str = "forward_success_total";
/// Forwards that returned an error (counter).
pub const FORWARD_FAILED: &str = "forward_failed_total";
/// Events the validation gate filtered out before forwarding (counter).
pub const FORWARD_SKIPPED: &str = "forward_skipped_total";
/// Time spent handling one forward, in seconds (histogram).
pub const FORWARD_DURATION: &str = "forward_duration_seconds";
/// Channels the router participates in (gauge).
pub const CHANNELS_TOTAL: &str = "router_channels_total";
/// Router-side balance per asset and channel, in raw units (gauge).
pub const CHANNEL_COLLATERAL: &str = "router_channels_collateral";

/// Default refresh period of the channel gauges.
pub const DEFAULT_COLLECT_INTERVAL: Duration = Duration::from_secs(30);

pub struct RouterMetrics {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
}

impl RouterMetrics {
    pub fn new() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        Self { recorder, handle }
    }

    fn record<T>(&self, f: impl FnOnce() -> T) -> T {
        metrics::with_local_recorder(&self.recorder, f)
    }

    pub fn record_attempt(&self, transfer_id: &str) {
        self.record(|| counter!(FORWARD_ATTEMPTS, "transfer_id" => transfer_id.to_string()).increment(1));
    }

    pub fn record_success(&self, transfer_id: &str) {
        self.record(|| counter!(FORWARD_SUCCESS, "transfer_id" => transfer_id.to_string()).increment(1));
    }

    pub fn record_failure(&self, transfer_id: &str) {
        self.record(|| counter!(FORWARD_FAILED, "transfer_id" => transfer_id.to_string()).increment(1));
    }

    pub fn record_skipped(&self, transfer_id: &str) {
        self.record(|| counter!(FORWARD_SKIPPED, "transfer_id" => transfer_id.to_string()).increment(1));
    }

    pub fn record_latency(&self, elapsed: Duration) {
        self.record(|| histogram!(FORWARD_DURATION).record(elapsed.as_secs_f64()));
    }

    pub fn set_channel_count(&self, count: usize) {
        self.record(|| gauge!(CHANNELS_TOTAL).set(count as f64));
    }

    pub fn set_collateral(&self, asset_id: &str, channel_address: &str, amount: f64) {
        self.record(|| {
            gauge!(
                CHANNEL_COLLATERAL,
                "asset_id" => asset_id.to_string(),
                "channel_address" => channel_address.to_string()
            )
            .set(amount)
        });
    }

    /// Prometheus text exposition of everything recorded so far.
    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Current value of a transfer-labelled counter, 0 if never incremented.
    pub fn counter_for(&self, name: &str, transfer_id: &str) -> u64 {
        let prefix = format!("{name}{{transfer_id=\"{transfer_id}\"}} ");
        self.render()
            .lines()
            .find_map(|line| line.strip_prefix(prefix.as_str()))
            .and_then(|value| value.trim().parse::<f64>().ok())
            .map(|value| value as u64)
            .unwrap_or(0)
    }
}

impl Default for RouterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RouterMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterMetrics").finish_non_exhaustive()
    }
}

/// Refresh the channel count and per-channel collateral gauges once.
///
/// A channel that cannot be read is skipped; only a failure to list channels
/// aborts the pass. Returns the number of channels seen.
pub async fn collect_channel_metrics(
    metrics: &RouterMetrics,
    engine: &dyn ChannelEngine,
    public_identifier: &str,
) -> Result<usize, EngineError> {
    let addresses = engine.get_state_channels().await?;
    metrics.set_channel_count(addresses.len());

    for address in &addresses {
        match engine.get_state_channel(address).await {
            Ok(Some(channel)) => {
                for snapshot in channel_snapshots(&channel, public_identifier) {
                    metrics.set_collateral(
                        &snapshot.asset_id,
                        &snapshot.channel_address,
                        snapshot.available as f64,
                    );
                }
            }
            Ok(None) => tracing::debug!(channel_address = %address, "channel vanished during collection"),
            Err(e) => tracing::warn!(channel_address = %address, error = %e, "failed to read channel for metrics"),
        }
    }

    Ok(addresses.len())
}

/// Periodically refresh the channel gauges until the task is aborted.
pub fn spawn_channel_collector(
    metrics: Arc<RouterMetrics>,
    engine: Arc<dyn ChannelEngine>,
    public_identifier: String,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if let Err(e) = collect_channel_metrics(&metrics, engine.as_ref(), &public_identifier).await {
                tracing::warn!(error = %e, "channel metrics collection failed");
            }
        }
    })
}
