//! Endpoint failover manager.
//!
//! This module handles:
//! - Connecting to the highest-priority live endpoint
//! - Falling through the ranked list when an endpoint refuses
//! - Exponential backoff between full rounds, with an attempt ceiling
//! - Periodic health probes of the active endpoint
//!
//! The active handle sits behind a lock and is swapped in one write, so
//! callers never observe a half-switched connection.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use strum::{AsRefStr, Display};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::backoff::BackoffPolicy;
use super::endpoint::{Endpoint, EndpointSnapshot};
use super::source::{ConnectionHandle, Connector};
use crate::error::{NetworkError, SourceError};
use crate::metrics;

/// Endpoint manager settings.
#[derive(Debug, Clone)]
pub struct EndpointSettings {
    /// Backoff between connection rounds.
    pub backoff: BackoffPolicy,
    /// Timeout for connect and probe calls.
    pub request_timeout: Duration,
    /// Interval between health probes.
    pub health_probe_interval: Duration,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            request_timeout: Duration::from_secs(10),
            health_probe_interval: Duration::from_secs(30),
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    /// No active endpoint.
    Disconnected,
    /// An endpoint is active.
    Connected,
    /// Every endpoint failed; waiting before the next round.
    Backoff,
    /// Attempt ceiling reached. Terminal for the run.
    Unavailable,
}

/// Owns the endpoint list and the single active connection.
pub struct EndpointManager {
    endpoints: RwLock<Vec<Endpoint>>,
    connector: Arc<dyn Connector>,
    settings: EndpointSettings,
    active: RwLock<Option<ConnectionHandle>>,
    state: RwLock<ConnectionState>,
    /// Serializes connection rounds so concurrent callers share one attempt.
    connect_lock: Mutex<()>,
    /// Failed rounds since the last successful connection.
    failed_rounds: AtomicU32,
    exhausted: AtomicBool,
}

impl EndpointManager {
    /// Create a manager. Endpoints are tried in ascending `priority`.
    pub fn new(
        mut endpoints: Vec<Endpoint>,
        connector: Arc<dyn Connector>,
        settings: EndpointSettings,
    ) -> Result<Self, NetworkError> {
        if endpoints.is_empty() {
            return Err(NetworkError::NoEndpoints);
        }
        endpoints.sort_by_key(|e| e.priority);

        Ok(Self {
            endpoints: RwLock::new(endpoints),
            connector,
            settings,
            active: RwLock::new(None),
            state: RwLock::new(ConnectionState::Disconnected),
            connect_lock: Mutex::new(()),
            failed_rounds: AtomicU32::new(0),
            exhausted: AtomicBool::new(false),
        })
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the attempt ceiling was reached.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::SeqCst)
    }

    /// Identifier of the active endpoint.
    pub fn active_endpoint(&self) -> Option<String> {
        self.current().map(|h| h.endpoint_id)
    }

    /// Health of every endpoint, in priority order.
    pub fn endpoint_snapshots(&self) -> Vec<EndpointSnapshot> {
        self.endpoints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(Endpoint::snapshot)
            .collect()
    }

    /// Request timeout shared with callers that query through the handle.
    pub fn request_timeout(&self) -> Duration {
        self.settings.request_timeout
    }

    /// Configured interval between health probes.
    pub fn health_probe_interval(&self) -> Duration {
        self.settings.health_probe_interval
    }

    fn current(&self) -> Option<ConnectionHandle> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn unavailable(&self) -> NetworkError {
        NetworkError::NetworkUnavailable {
            attempts: self.failed_rounds.load(Ordering::SeqCst),
        }
    }

    /// Return the active connection, connecting first if there is none.
    ///
    /// Blocks through backoff until an endpoint answers or the attempt
    /// ceiling is reached. Once the ceiling is reached every later call
    /// fails immediately with [`NetworkError::NetworkUnavailable`].
    pub async fn get_connection(&self) -> Result<ConnectionHandle, NetworkError> {
        if self.is_exhausted() {
            return Err(self.unavailable());
        }
        if let Some(handle) = self.current() {
            return Ok(handle);
        }

        let _guard = self.connect_lock.lock().await;

        // Another caller may have finished a round while we waited.
        if self.is_exhausted() {
            return Err(self.unavailable());
        }
        if let Some(handle) = self.current() {
            return Ok(handle);
        }

        self.connect_with_backoff().await
    }

    #[instrument(skip(self))]
    async fn connect_with_backoff(&self) -> Result<ConnectionHandle, NetworkError> {
        let policy = self.settings.backoff;

        loop {
            self.set_state(ConnectionState::Disconnected);

            if let Some(handle) = self.try_endpoints().await {
                self.failed_rounds.store(0, Ordering::SeqCst);
                *self.active.write().unwrap_or_else(PoisonError::into_inner) = Some(handle.clone());
                self.set_state(ConnectionState::Connected);
                metrics::inc_endpoint_connects();
                info!(endpoint = %handle.endpoint_id, "Endpoint connected");
                return Ok(handle);
            }

            let failed = self.failed_rounds.fetch_add(1, Ordering::SeqCst) + 1;
            if policy.exhausted(failed) {
                self.exhausted.store(true, Ordering::SeqCst);
                self.set_state(ConnectionState::Unavailable);
                error!(attempts = failed, "All endpoints exhausted, network unavailable");
                return Err(NetworkError::NetworkUnavailable { attempts: failed });
            }

            let delay = policy.delay(failed - 1);
            self.set_state(ConnectionState::Backoff);
            metrics::inc_endpoint_backoffs();
            warn!(
                attempt = failed,
                max_attempts = policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "All endpoints failed, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// One round over the ranked list. Returns the first endpoint that
    /// connects and answers a block-height probe.
    async fn try_endpoints(&self) -> Option<ConnectionHandle> {
        let endpoints: Vec<Endpoint> = self
            .endpoints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let timeout = self.settings.request_timeout;

        for endpoint in &endpoints {
            debug!(endpoint = %endpoint.id, host = %endpoint.display_host(), "Trying endpoint");

            let connected = match tokio::time::timeout(timeout, self.connector.connect(endpoint)).await {
                Ok(result) => result,
                Err(_) => Err(SourceError::Timeout {
                    operation: "connect",
                    after_ms: timeout.as_millis() as u64,
                }),
            };

            let probed = match connected {
                Ok(client) => match tokio::time::timeout(timeout, client.get_block_height()).await {
                    Ok(Ok(height)) => Ok((client, height)),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(SourceError::Timeout {
                        operation: "get_block_height",
                        after_ms: timeout.as_millis() as u64,
                    }),
                },
                Err(e) => Err(e),
            };

            match probed {
                Ok((client, height)) => {
                    self.update_health(&endpoint.id, |ep| ep.mark_connected());
                    debug!(endpoint = %endpoint.id, block = height, "Endpoint answered probe");
                    return Some(ConnectionHandle {
                        endpoint_id: endpoint.id.clone(),
                        client,
                    });
                }
                Err(e) => {
                    warn!(endpoint = %endpoint.id, error = %e, "Endpoint failed");
                    self.update_health(&endpoint.id, |ep| ep.mark_failed(&e));
                }
            }
        }

        None
    }

    fn update_health(&self, endpoint_id: &str, f: impl FnOnce(&mut Endpoint)) {
        let mut endpoints = self.endpoints.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(ep) = endpoints.iter_mut().find(|e| e.id == endpoint_id) {
            f(ep);
        }
    }

    /// Drop `handle` as the active connection after a transport failure.
    ///
    /// A stale handle (already replaced) is ignored.
    pub fn report_failure(&self, handle: &ConnectionHandle, error: &SourceError) {
        let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
        let is_active = active.as_ref().is_some_and(|h| h.same_as(handle));
        if !is_active {
            return;
        }
        *active = None;
        drop(active);

        self.update_health(&handle.endpoint_id, |ep| ep.mark_failed(error));
        if !self.is_exhausted() {
            self.set_state(ConnectionState::Disconnected);
        }
        metrics::inc_endpoint_failovers();
        warn!(endpoint = %handle.endpoint_id, error = %error, "Active endpoint dropped");
    }

    /// Probe the active endpoint once; reconnect if it fails or if there is
    /// no active connection.
    pub async fn probe(&self) {
        if self.is_exhausted() {
            return;
        }

        if let Some(handle) = self.current() {
            let timeout = self.settings.request_timeout;
            let result = match tokio::time::timeout(timeout, handle.client.get_block_height()).await {
                Ok(result) => result,
                Err(_) => Err(SourceError::Timeout {
                    operation: "get_block_height",
                    after_ms: timeout.as_millis() as u64,
                }),
            };
            match result {
                Ok(height) => {
                    self.update_health(&handle.endpoint_id, |ep| ep.mark_connected());
                    debug!(endpoint = %handle.endpoint_id, block = height, "Health probe ok");
                    return;
                }
                Err(e) => {
                    metrics::inc_endpoint_probe_failures();
                    self.report_failure(&handle, &e);
                }
            }
        }

        if let Err(e) = self.get_connection().await {
            error!(error = %e, "Reconnect after failed probe gave up");
        }
    }

    /// Spawn the periodic health probe. Runs until `stop` flips to true or
    /// its sender is dropped.
    pub fn spawn_health_probe(
        self: &Arc<Self>,
        interval: Duration,
        mut stop: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; the loop connects on demand.
            ticker.tick().await;

            loop {
                if *stop.borrow() || manager.is_exhausted() {
                    break;
                }
                tokio::select! {
                    biased;
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        tokio::select! {
                            biased;
                            _ = stop.changed() => break,
                            _ = manager.probe() => {}
                        }
                    }
                }
            }
            debug!("Health probe stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::mock::{MockChain, MockConnector};
    use url::Url;

    fn endpoints(n: usize) -> Vec<Endpoint> {
        (0..n)
            .map(|i| {
                Endpoint::new(
                    format!("endpoint-{}", i),
                    Url::parse(&format!("http://node{}.local:8545", i)).unwrap(),
                    i,
                )
            })
            .collect()
    }

    fn settings(max_attempts: u32) -> EndpointSettings {
        EndpointSettings {
            backoff: BackoffPolicy {
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(60),
                max_attempts,
            },
            request_timeout: Duration::from_secs(5),
            health_probe_interval: Duration::from_secs(30),
        }
    }

    #[test]
    fn new_rejects_empty_endpoint_list() {
        let connector = Arc::new(MockConnector::new());
        assert!(matches!(
            EndpointManager::new(vec![], connector, settings(3)),
            Err(NetworkError::NoEndpoints)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn connects_to_highest_priority_live_endpoint() {
        let connector = Arc::new(MockConnector::new());
        connector.refuse("endpoint-0");
        connector.accept("endpoint-1", MockChain::new());
        connector.accept("endpoint-2", MockChain::new());

        let manager = EndpointManager::new(endpoints(3), connector.clone(), settings(3)).unwrap();
        let handle = manager.get_connection().await.unwrap();

        assert_eq!(handle.endpoint_id, "endpoint-1");
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(connector.attempts("endpoint-0"), 1);
        assert_eq!(connector.attempts("endpoint-2"), 0);

        let snapshots = manager.endpoint_snapshots();
        assert!(!snapshots[0].connected);
        assert!(snapshots[0].last_error.is_some());
        assert!(snapshots[1].connected);
    }

    #[tokio::test(start_paused = true)]
    async fn reuses_active_connection() {
        let connector = Arc::new(MockConnector::new());
        connector.accept("endpoint-0", MockChain::new());
        let manager = EndpointManager::new(endpoints(1), connector.clone(), settings(3)).unwrap();

        let a = manager.get_connection().await.unwrap();
        let b = manager.get_connection().await.unwrap();
        assert!(a.same_as(&b));
        assert_eq!(connector.attempts("endpoint-0"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn endpoint_that_fails_probe_is_skipped() {
        let connector = Arc::new(MockConnector::new());
        let dead = MockChain::new();
        dead.set_probe_ok(false);
        connector.accept("endpoint-0", dead);
        connector.accept("endpoint-1", MockChain::new());

        let manager = EndpointManager::new(endpoints(2), connector, settings(3)).unwrap();
        assert_eq!(manager.get_connection().await.unwrap().endpoint_id, "endpoint-1");
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_after_attempt_ceiling_with_doubling_delays() {
        let connector = Arc::new(MockConnector::new());
        for i in 0..3 {
            connector.refuse(&format!("endpoint-{}", i));
        }
        let manager = EndpointManager::new(endpoints(3), connector.clone(), settings(5)).unwrap();

        let started = tokio::time::Instant::now();
        let err = manager.get_connection().await.unwrap_err();

        assert_eq!(err, NetworkError::NetworkUnavailable { attempts: 5 });
        assert_eq!(manager.state(), ConnectionState::Unavailable);
        assert_eq!(connector.attempts("endpoint-0"), 5);
        assert_eq!(connector.attempts("endpoint-2"), 5);

        // 1 + 2 + 4 + 8 seconds between the five rounds.
        assert_eq!(started.elapsed(), Duration::from_secs(15));

        let gaps = connector.round_gaps("endpoint-0");
        assert_eq!(
            gaps,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_is_permanent() {
        let connector = Arc::new(MockConnector::new());
        connector.refuse("endpoint-0");
        let manager = EndpointManager::new(endpoints(1), connector.clone(), settings(2)).unwrap();
        assert!(manager.get_connection().await.is_err());

        connector.accept("endpoint-0", MockChain::new());
        assert!(matches!(
            manager.get_connection().await,
            Err(NetworkError::NetworkUnavailable { attempts: 2 })
        ));
        assert_eq!(connector.attempts("endpoint-0"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_during_backoff() {
        let connector = Arc::new(MockConnector::new());
        connector.refuse("endpoint-0");
        let manager = Arc::new(EndpointManager::new(endpoints(1), connector.clone(), settings(10)).unwrap());

        let task = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.get_connection().await })
        };

        // Let two rounds fail (t=0, t=1s), then bring the endpoint up.
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        connector.accept("endpoint-0", MockChain::new());

        let handle = task.await.unwrap().unwrap();
        assert_eq!(handle.endpoint_id, "endpoint-0");
        assert_eq!(connector.attempts("endpoint-0"), 3);
        assert!(!manager.is_exhausted());
    }

    #[tokio::test(start_paused = true)]
    async fn report_failure_fails_over_to_next_endpoint() {
        let connector = Arc::new(MockConnector::new());
        connector.accept("endpoint-0", MockChain::new());
        connector.accept("endpoint-1", MockChain::new());
        let manager = EndpointManager::new(endpoints(2), connector.clone(), settings(3)).unwrap();

        let first = manager.get_connection().await.unwrap();
        assert_eq!(first.endpoint_id, "endpoint-0");

        connector.refuse("endpoint-0");
        manager.report_failure(&first, &SourceError::Transport("reset".to_string()));
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        let second = manager.get_connection().await.unwrap();
        assert_eq!(second.endpoint_id, "endpoint-1");
    }

    #[tokio::test(start_paused = true)]
    async fn stale_failure_report_is_ignored() {
        let connector = Arc::new(MockConnector::new());
        connector.accept("endpoint-0", MockChain::new());
        let manager = EndpointManager::new(endpoints(1), connector.clone(), settings(3)).unwrap();

        let first = manager.get_connection().await.unwrap();
        manager.report_failure(&first, &SourceError::Transport("reset".to_string()));
        let second = manager.get_connection().await.unwrap();

        manager.report_failure(&first, &SourceError::Transport("late".to_string()));
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert!(manager.get_connection().await.unwrap().same_as(&second));
    }

    #[tokio::test(start_paused = true)]
    async fn probe_failure_switches_endpoint() {
        let connector = Arc::new(MockConnector::new());
        let primary = MockChain::new();
        connector.accept("endpoint-0", primary.clone());
        connector.accept("endpoint-1", MockChain::new());
        let manager = EndpointManager::new(endpoints(2), connector.clone(), settings(3)).unwrap();
        manager.get_connection().await.unwrap();

        primary.set_probe_ok(false);
        manager.probe().await;

        assert_eq!(manager.active_endpoint().as_deref(), Some("endpoint-1"));
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn health_probe_task_stops_on_signal() {
        let connector = Arc::new(MockConnector::new());
        let chain = MockChain::new();
        connector.accept("endpoint-0", chain.clone());
        let manager = Arc::new(EndpointManager::new(endpoints(1), connector, settings(3)).unwrap());
        manager.get_connection().await.unwrap();

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = manager.spawn_health_probe(Duration::from_secs(30), stop_rx);

        tokio::time::sleep(Duration::from_secs(95)).await;
        // One probe at connect, three from the task.
        assert_eq!(chain.probe_calls(), 4);

        stop_tx.send(true).unwrap();
        task.await.unwrap();
    }
}
