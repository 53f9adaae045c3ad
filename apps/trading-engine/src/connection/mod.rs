//! Broker connection monitoring.
//!
//! [`ConnectionMonitor`] wraps a broker client with liveness probing,
//! latency-based health classification, and bounded auto-reconnect. Two
//! background loops drive it: the heartbeat loop detects dead connections
//! and triggers reconnect; the health loop samples probe latency into a
//! ring buffer and reclassifies health from the rolling average.
//!
//! Auto-reconnect stops after the configured attempt budget; recovery
//! from that point requires [`ConnectionMonitor::force_reconnect`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::{BrokerClient, BrokerError, RetryPolicy};
use crate::observability::metrics;

/// Connection state for a monitored broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// No session with the broker.
    Disconnected,
    /// Initial connect in progress.
    Connecting,
    /// Session established.
    Connected,
    /// Reconnect in progress after a detected drop.
    Reconnecting,
    /// Reconnect budget exhausted; waiting for manual intervention.
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Reconnecting => "RECONNECTING",
            Self::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Health classification from rolling probe latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionHealth {
    /// Rolling average below 100ms.
    Excellent,
    /// Rolling average below 300ms.
    Good,
    /// Rolling average below 1s.
    Fair,
    /// Rolling average at or above 1s.
    Poor,
    /// No latency samples yet.
    Unknown,
}

impl ConnectionHealth {
    /// Numeric value for the metrics gauge.
    #[must_use]
    pub const fn gauge_value(&self) -> f64 {
        match self {
            Self::Excellent => metrics::connection_health::EXCELLENT,
            Self::Good => metrics::connection_health::GOOD,
            Self::Fair => metrics::connection_health::FAIR,
            Self::Poor => metrics::connection_health::POOR,
            Self::Unknown => metrics::connection_health::UNKNOWN,
        }
    }
}

impl std::fmt::Display for ConnectionHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Excellent => "EXCELLENT",
            Self::Good => "GOOD",
            Self::Fair => "FAIR",
            Self::Poor => "POOR",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Monitor configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Interval between heartbeat probes.
    pub heartbeat_interval: Duration,
    /// Interval between health (latency) probes.
    pub health_interval: Duration,
    /// Latency ring buffer capacity.
    pub latency_samples: usize,
    /// Reconnect automatically when the heartbeat detects a drop.
    pub auto_reconnect: bool,
    /// Backoff schedule and attempt budget for reconnects.
    pub reconnect: RetryPolicy,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            health_interval: Duration::from_secs(10),
            latency_samples: 20,
            auto_reconnect: true,
            reconnect: RetryPolicy::new(
                10,
                Duration::from_secs(1),
                Duration::from_secs(60),
                2.0,
                0.2,
            ),
        }
    }
}

/// Point-in-time snapshot of connection status.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    /// Broker adapter name.
    pub broker: &'static str,
    /// Current state.
    pub state: ConnectionState,
    /// Current health classification.
    pub health: ConnectionHealth,
    /// Rolling average probe latency, if any samples exist.
    pub average_latency_ms: Option<u64>,
    /// Reconnect attempts made in the current recovery cycle.
    pub reconnect_attempts: u32,
    /// Total disconnects observed since construction.
    pub disconnects: u64,
    /// Accumulated connected time across all sessions.
    pub uptime: Duration,
}

/// Monitors one broker connection: state, health, reconnects, uptime.
pub struct ConnectionMonitor {
    broker: Arc<dyn BrokerClient>,
    config: MonitorConfig,
    state: RwLock<ConnectionState>,
    latencies: RwLock<VecDeque<Duration>>,
    reconnect_attempts: AtomicU32,
    // Epoch millis of the current session start; 0 when not connected.
    connected_since_ms: AtomicU64,
    uptime_accum_ms: AtomicU64,
    disconnects: AtomicU64,
    reconnect_gate: tokio::sync::Mutex<()>,
}

impl ConnectionMonitor {
    /// Create a monitor over `broker`.
    #[must_use]
    pub fn new(broker: Arc<dyn BrokerClient>, config: MonitorConfig) -> Self {
        Self {
            broker,
            config,
            state: RwLock::new(ConnectionState::Disconnected),
            latencies: RwLock::new(VecDeque::new()),
            reconnect_attempts: AtomicU32::new(0),
            connected_since_ms: AtomicU64::new(0),
            uptime_accum_ms: AtomicU64::new(0),
            disconnects: AtomicU64::new(0),
            reconnect_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// The monitored broker client.
    #[must_use]
    pub fn broker(&self) -> &Arc<dyn BrokerClient> {
        &self.broker
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self
            .state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Health classification from the rolling latency average.
    #[must_use]
    pub fn health(&self) -> ConnectionHealth {
        self.average_latency()
            .map_or(ConnectionHealth::Unknown, classify_latency)
    }

    /// Rolling average of probe latency over the ring buffer.
    #[must_use]
    pub fn average_latency(&self) -> Option<Duration> {
        let ring = self
            .latencies
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if ring.is_empty() {
            return None;
        }
        let total: Duration = ring.iter().sum();
        Some(total / u32::try_from(ring.len()).unwrap_or(u32::MAX))
    }

    /// Accumulated connected time across all sessions, including the
    /// current one.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        let accum = self.uptime_accum_ms.load(Ordering::SeqCst);
        let since = self.connected_since_ms.load(Ordering::SeqCst);
        let current = if since == 0 {
            0
        } else {
            now_ms().saturating_sub(since)
        };
        Duration::from_millis(accum + current)
    }

    /// Snapshot of state, health, and counters.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            broker: self.broker.name(),
            state: self.state(),
            health: self.health(),
            average_latency_ms: self
                .average_latency()
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::SeqCst),
            disconnects: self.disconnects.load(Ordering::SeqCst),
            uptime: self.uptime(),
        }
    }

    /// Establish the initial connection.
    ///
    /// # Errors
    ///
    /// Propagates the broker's connect failure; state is left in `Error`.
    pub async fn connect(&self) -> Result<(), BrokerError> {
        self.set_state(ConnectionState::Connecting);
        match self.broker.connect().await {
            Ok(()) => {
                info!(broker = self.broker.name(), "broker connected");
                self.mark_connected();
                Ok(())
            }
            Err(e) => {
                warn!(broker = self.broker.name(), error = %e, "broker connect failed");
                self.set_state(ConnectionState::Error);
                Err(e)
            }
        }
    }

    /// Disconnect gracefully, folding the session into accumulated uptime.
    ///
    /// # Errors
    ///
    /// Propagates the broker's disconnect failure; uptime accounting is
    /// applied regardless.
    pub async fn disconnect(&self) -> Result<(), BrokerError> {
        let result = self.broker.disconnect().await;
        self.mark_disconnected();
        result
    }

    /// Reconnect with backoff, up to the configured attempt budget.
    ///
    /// Concurrent callers serialize on an internal gate; a caller that
    /// finds the connection already restored returns immediately.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::NotConnected`] once the attempt budget is
    /// exhausted. State is then `Error` until [`Self::force_reconnect`].
    pub async fn reconnect(&self) -> Result<(), BrokerError> {
        let _gate = self.reconnect_gate.lock().await;
        if self.state() == ConnectionState::Connected {
            return Ok(());
        }
        self.set_state(ConnectionState::Reconnecting);

        let mut backoff = self.config.reconnect.backoff();
        loop {
            let Some(delay) = backoff.next_delay() else {
                warn!(
                    broker = self.broker.name(),
                    attempts = backoff.attempts(),
                    "reconnect attempts exhausted"
                );
                self.set_state(ConnectionState::Error);
                return Err(BrokerError::NotConnected);
            };
            self.reconnect_attempts
                .store(backoff.attempts(), Ordering::SeqCst);
            metrics::record_reconnect_attempt(self.broker.name());

            debug!(
                broker = self.broker.name(),
                attempt = backoff.attempts(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "reconnect attempt scheduled"
            );
            tokio::time::sleep(delay).await;

            let _ = self.broker.disconnect().await;
            match self.broker.connect().await {
                Ok(()) => {
                    info!(
                        broker = self.broker.name(),
                        attempts = backoff.attempts(),
                        "reconnect succeeded"
                    );
                    self.mark_connected();
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        broker = self.broker.name(),
                        attempt = backoff.attempts(),
                        error = %e,
                        "reconnect attempt failed"
                    );
                }
            }
        }
    }

    /// Manually retry after the automatic budget is exhausted.
    ///
    /// Resets the attempt counter and tries once immediately; if that
    /// fails and auto-reconnect is enabled, the backoff schedule runs
    /// again from the start.
    ///
    /// # Errors
    ///
    /// Returns the final connect failure when recovery does not succeed.
    pub async fn force_reconnect(&self) -> Result<(), BrokerError> {
        info!(broker = self.broker.name(), "forced reconnect requested");
        self.reconnect_attempts.store(0, Ordering::SeqCst);
        self.mark_disconnected();

        let _ = self.broker.disconnect().await;
        self.set_state(ConnectionState::Reconnecting);
        match self.broker.connect().await {
            Ok(()) => {
                self.mark_connected();
                Ok(())
            }
            Err(e) if self.config.auto_reconnect => {
                warn!(broker = self.broker.name(), error = %e, "immediate retry failed");
                self.reconnect().await
            }
            Err(e) => {
                self.set_state(ConnectionState::Error);
                Err(e)
            }
        }
    }

    /// Spawn the heartbeat loop: probe liveness, trigger reconnect on
    /// failure.
    pub fn spawn_heartbeat(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(monitor.config.heartbeat_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => {
                        debug!("heartbeat loop stopping");
                        break;
                    }
                    _ = interval.tick() => monitor.heartbeat_once().await,
                }
            }
        })
    }

    /// Spawn the health loop: sample probe latency, reclassify health.
    pub fn spawn_health(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(monitor.config.health_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => {
                        debug!("health loop stopping");
                        break;
                    }
                    _ = interval.tick() => monitor.health_once().await,
                }
            }
        })
    }

    /// One heartbeat cycle. Public for callers that drive probing
    /// themselves instead of spawning the loop.
    pub async fn heartbeat_once(&self) {
        match self.state() {
            ConnectionState::Connected => match self.probe().await {
                Ok(latency) => {
                    debug!(
                        broker = self.broker.name(),
                        latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                        "heartbeat ok"
                    );
                }
                Err(e) => {
                    warn!(broker = self.broker.name(), error = %e, "heartbeat probe failed");
                    self.mark_disconnected();
                    if self.config.auto_reconnect {
                        if let Err(e) = self.reconnect().await {
                            warn!(broker = self.broker.name(), error = %e, "auto-reconnect failed");
                        }
                    }
                }
            },
            ConnectionState::Disconnected if self.config.auto_reconnect => {
                if let Err(e) = self.reconnect().await {
                    warn!(broker = self.broker.name(), error = %e, "auto-reconnect failed");
                }
            }
            // Connecting/Reconnecting are in progress elsewhere; Error
            // waits for force_reconnect.
            _ => {}
        }
    }

    /// One health-sampling cycle.
    pub async fn health_once(&self) {
        if self.state() != ConnectionState::Connected {
            return;
        }
        match self.probe().await {
            Ok(latency) => {
                self.record_latency(latency);
                let health = self.health();
                metrics::update_connection_health(self.broker.name(), health.gauge_value());
                debug!(
                    broker = self.broker.name(),
                    latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                    health = %health,
                    "health sample"
                );
            }
            Err(e) => {
                debug!(broker = self.broker.name(), error = %e, "health probe failed");
            }
        }
    }

    /// Timed liveness probe (account-info fetch).
    async fn probe(&self) -> Result<Duration, BrokerError> {
        let start = Instant::now();
        self.broker.get_account().await?;
        Ok(start.elapsed())
    }

    fn record_latency(&self, latency: Duration) {
        let mut ring = self
            .latencies
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        ring.push_back(latency);
        while ring.len() > self.config.latency_samples {
            ring.pop_front();
        }
    }

    fn set_state(&self, state: ConnectionState) {
        *self
            .state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = state;
    }

    fn mark_connected(&self) {
        self.reconnect_attempts.store(0, Ordering::SeqCst);
        self.connected_since_ms.store(now_ms(), Ordering::SeqCst);
        self.set_state(ConnectionState::Connected);
    }

    fn mark_disconnected(&self) {
        // swap(0) so concurrent callers fold the session in exactly once.
        let since = self.connected_since_ms.swap(0, Ordering::SeqCst);
        if since != 0 {
            let elapsed = now_ms().saturating_sub(since);
            self.uptime_accum_ms.fetch_add(elapsed, Ordering::SeqCst);
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            metrics::record_disconnect(self.broker.name());
        }
        self.set_state(ConnectionState::Disconnected);
    }
}

impl std::fmt::Debug for ConnectionMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionMonitor")
            .field("broker", &self.broker.name())
            .field("state", &self.state())
            .field("health", &self.health())
            .finish_non_exhaustive()
    }
}

const fn classify_latency(avg: Duration) -> ConnectionHealth {
    if avg.as_millis() < 100 {
        ConnectionHealth::Excellent
    } else if avg.as_millis() < 300 {
        ConnectionHealth::Good
    } else if avg.as_millis() < 1000 {
        ConnectionHealth::Fair
    } else {
        ConnectionHealth::Poor
    }
}

fn now_ms() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}
