//! Connection supervision.
//!
//! [`LinkSupervisor`] owns the connection lifecycle for one target peer:
//! resolve, connect, stay connected, and reconnect with backoff when the
//! link drops, until told to stop. It is the single writer of connection
//! state; everything else observes through the [`SupervisorHandle`] or
//! registered callbacks.

use std::future::Future;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sensorlink_types::{PeerInfo, TelemetryReading, decode_frame};

use crate::error::{Error, Result};
use crate::link::BleLink;
use crate::observers::ObserverRegistry;
use crate::resolve::{ResolvePolicy, TargetIdentity};
use crate::session::SessionEvent;
use crate::traits::TelemetryLink;

/// Reconnection backoff policy.
///
/// Every failed connect attempt waits `delay` before the next one.
/// Once `max_attempts` consecutive failures accumulate, a
/// single `cooldown` wait is inserted instead and the failure counter
/// resets, so the cycle starts over at the short delay. Retries
/// continue indefinitely; only a stop request ends them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Wait between ordinary attempts.
    pub delay: Duration,
    /// Consecutive failures before the extended cooldown kicks in.
    pub max_attempts: u32,
    /// The extended wait inserted at the ceiling.
    pub cooldown: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(2),
            max_attempts: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    fn validate(&self) -> Result<()> {
        if self.delay.is_zero() {
            return Err(Error::invalid_config("reconnect delay must be non-zero"));
        }
        if self.max_attempts == 0 {
            return Err(Error::invalid_config("max_attempts must be at least 1"));
        }
        if self.cooldown < self.delay {
            return Err(Error::invalid_config(
                "cooldown must be at least the base delay",
            ));
        }
        Ok(())
    }

    /// The wait to apply after the given consecutive-failure count, and
    /// whether the counter resets afterwards.
    pub fn delay_after_failure(&self, consecutive_failures: u32) -> (Duration, bool) {
        if consecutive_failures >= self.max_attempts {
            (self.cooldown, true)
        } else {
            (self.delay, false)
        }
    }
}

/// Configuration for one supervised link.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// What to look for on the radio.
    pub identity: TargetIdentity,
    /// Budget for each resolve pass.
    pub scan_timeout: Duration,
    /// Budget for each connection attempt.
    pub connect_timeout: Duration,
    /// Backoff between failed attempts.
    pub reconnect: ReconnectPolicy,
    /// Whether resolved addresses are cached back into the identity.
    pub resolve_policy: ResolvePolicy,
}

impl LinkConfig {
    /// Config with default timeouts and backoff for a target identity.
    pub fn new(identity: TargetIdentity) -> Self {
        Self {
            identity,
            scan_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
            resolve_policy: ResolvePolicy::default(),
        }
    }

    /// Set the resolve budget.
    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Set the connect budget.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the backoff policy.
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Set the resolve policy.
    pub fn with_resolve_policy(mut self, policy: ResolvePolicy) -> Self {
        self.resolve_policy = policy;
        self
    }

    /// Check the configuration for internally inconsistent values.
    pub fn validate(&self) -> Result<()> {
        if self.scan_timeout.is_zero() {
            return Err(Error::invalid_config("scan timeout must be non-zero"));
        }
        if self.connect_timeout.is_zero() {
            return Err(Error::invalid_config("connect timeout must be non-zero"));
        }
        self.reconnect.validate()
    }
}

/// Where the supervisor is in the connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    /// Created, not yet running.
    #[default]
    Idle,
    /// Looking for the target peer.
    Scanning,
    /// Peer resolved, connection attempt in flight.
    Connecting,
    /// Link is up, telemetry flowing.
    Connected,
    /// Stopped; terminal.
    Stopped,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LinkState::Idle => "idle",
            LinkState::Scanning => "scanning",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Cloneable handle for interacting with a running supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    cancel: CancellationToken,
    commands: mpsc::Sender<Vec<u8>>,
    connected: watch::Receiver<bool>,
    latest: watch::Receiver<TelemetryReading>,
}

impl SupervisorHandle {
    /// Request a stop. Takes effect promptly, including mid-backoff.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Current connection status.
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Wait until the link is up. Fails if the supervisor stops first.
    pub async fn wait_connected(&mut self) -> Result<()> {
        while !*self.connected.borrow_and_update() {
            self.connected.changed().await.map_err(|_| Error::Cancelled)?;
        }
        Ok(())
    }

    /// Wait for the next connection status transition.
    pub async fn status_changed(&mut self) -> Result<bool> {
        self.connected.changed().await.map_err(|_| Error::Cancelled)?;
        Ok(*self.connected.borrow_and_update())
    }

    /// Latest merged reading. Fields keep their last observed value
    /// across frames that omit them.
    pub fn latest_reading(&self) -> TelemetryReading {
        *self.latest.borrow()
    }

    /// Watch for reading updates.
    pub fn reading_watch(&self) -> watch::Receiver<TelemetryReading> {
        self.latest.clone()
    }

    /// Queue a payload for the peer's command channel.
    ///
    /// Fails fast with [`Error::NotConnected`] while the link is down
    /// rather than queueing for a future connection.
    pub async fn send(&self, payload: impl Into<Vec<u8>>) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        self.commands
            .send(payload.into())
            .await
            .map_err(|_| Error::Cancelled)
    }
}

/// Drives one [`TelemetryLink`] through the connection lifecycle.
pub struct LinkSupervisor<L: TelemetryLink> {
    config: LinkConfig,
    link: L,
    observers: ObserverRegistry,
    state: LinkState,
    cancel: CancellationToken,
    commands: mpsc::Receiver<Vec<u8>>,
    // Held so `commands.recv()` never observes channel closure when
    // every external handle is dropped.
    _commands_tx: mpsc::Sender<Vec<u8>>,
    connected_tx: watch::Sender<bool>,
    latest_tx: watch::Sender<TelemetryReading>,
    listener: Option<(CancellationToken, tokio::task::JoinHandle<()>)>,
}

impl LinkSupervisor<BleLink> {
    /// Create a supervisor over the platform BLE stack.
    ///
    /// A missing Bluetooth adapter is a startup fault and surfaces here,
    /// not from [`run`](LinkSupervisor::run).
    pub async fn new(config: LinkConfig) -> Result<(Self, SupervisorHandle)> {
        config.validate()?;
        let link = BleLink::init(config.resolve_policy).await?;
        Ok(Self::build(config, link))
    }
}

impl<L: TelemetryLink> LinkSupervisor<L> {
    /// Create a supervisor over an arbitrary link implementation.
    pub fn with_link(config: LinkConfig, link: L) -> Result<(Self, SupervisorHandle)> {
        config.validate()?;
        Ok(Self::build(config, link))
    }

    fn build(config: LinkConfig, link: L) -> (Self, SupervisorHandle) {
        let cancel = CancellationToken::new();
        let (commands_tx, commands) = mpsc::channel(8);
        let (connected_tx, connected) = watch::channel(false);
        let (latest_tx, latest) = watch::channel(TelemetryReading::default());

        let handle = SupervisorHandle {
            cancel: cancel.clone(),
            commands: commands_tx.clone(),
            connected,
            latest,
        };
        let supervisor = Self {
            config,
            link,
            observers: ObserverRegistry::new(),
            state: LinkState::Idle,
            cancel,
            commands,
            _commands_tx: commands_tx,
            connected_tx,
            latest_tx,
            listener: None,
        };
        (supervisor, handle)
    }

    /// Register an advertisement observer. Must be called before
    /// [`run`](LinkSupervisor::run).
    pub fn on_advertisement<F>(&mut self, callback: F)
    where
        F: Fn(&PeerInfo) + Send + Sync + 'static,
    {
        self.observers.on_advertisement(callback);
    }

    /// Register a connection-status observer.
    pub fn on_connection_status<F>(&mut self, callback: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.observers.on_connection_status(callback);
    }

    /// Register a telemetry observer.
    pub fn on_telemetry<F>(&mut self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.observers.on_telemetry(callback);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Run the connection lifecycle until stopped.
    ///
    /// Returns `Ok(())` on a requested stop. Unrecoverable faults (bad
    /// configuration discovered late, transport stack failure) end the
    /// loop with the error; transient faults never do.
    pub async fn run(mut self) -> Result<()> {
        let result = self.drive().await;
        self.shutdown().await;
        result
    }

    async fn drive(&mut self) -> Result<()> {
        let Self {
            config,
            link,
            observers,
            state,
            cancel,
            commands,
            connected_tx,
            latest_tx,
            listener,
            ..
        } = self;

        let (ads_tx, mut ads) = mpsc::channel(32);
        let listener_cancel = cancel.child_token();
        let task =
            link.spawn_advertisement_listener(config.identity.clone(), ads_tx, listener_cancel.clone());
        *listener = Some((listener_cancel, task));

        let mut identity = config.identity.clone();
        let mut failures: u32 = 0;

        loop {
            *state = LinkState::Scanning;

            let peer = match serviced(
                cancel,
                &mut ads,
                observers,
                link.resolve(&mut identity, config.scan_timeout),
            )
            .await
            {
                None => return Ok(()),
                Some(Ok(peer)) => peer,
                Some(Err(e)) if e.is_recoverable() => {
                    // Resolution misses retry at the base delay; only
                    // failed connect attempts count toward the cooldown
                    // ceiling.
                    debug!(
                        "peer not found ({}); retrying in {:?}",
                        e, config.reconnect.delay
                    );
                    match serviced(cancel, &mut ads, observers, sleep(config.reconnect.delay))
                        .await
                    {
                        None => return Ok(()),
                        Some(()) => continue,
                    }
                }
                Some(Err(e)) => return Err(e),
            };

            *state = LinkState::Connecting;
            info!("resolved {}; connecting", peer);
            let (events_tx, mut session_events) = mpsc::channel(64);
            match serviced(
                cancel,
                &mut ads,
                observers,
                link.connect(config.connect_timeout, events_tx),
            )
            .await
            {
                None => return Ok(()),
                Some(Ok(())) => {}
                Some(Err(e)) if e.is_recoverable() => {
                    failures += 1;
                    let (delay, reset) = config.reconnect.delay_after_failure(failures);
                    if reset {
                        warn!(
                            "connect to {} failed ({}); {} consecutive failures, cooling down for {:?}",
                            peer, e, failures, delay
                        );
                        failures = 0;
                    } else {
                        warn!("connect to {} failed ({}); retrying in {:?}", peer, e, delay);
                    }
                    match serviced(cancel, &mut ads, observers, sleep(delay)).await {
                        None => return Ok(()),
                        Some(()) => continue,
                    }
                }
                Some(Err(e)) => return Err(e),
            }

            failures = 0;
            *state = LinkState::Connected;
            publish_status(observers, connected_tx, true);
            info!("link to {} established", peer);

            // Connected: forward commands, decode frames, watch for the
            // link to drop. `None` reason means a stop request.
            let reason: Option<&str> = loop {
                tokio::select! {
                    _ = cancel.cancelled() => break None,
                    Some(seen) = ads.recv() => observers.dispatch_advertisement(&seen),
                    Some(payload) = commands.recv() => {
                        if let Err(e) = link.send(&payload).await {
                            warn!("command write failed ({}); dropping link", e);
                            break Some("command write failure");
                        }
                    }
                    event = session_events.recv() => match event {
                        Some(SessionEvent::Frame(bytes)) => {
                            handle_frame(&bytes, observers, latest_tx);
                        }
                        Some(SessionEvent::Disconnected) | None => break Some("peer disconnected"),
                    }
                }
            };

            link.disconnect().await;
            publish_status(observers, connected_tx, false);
            match reason {
                None => return Ok(()),
                Some(reason) => {
                    info!("link to {} lost: {}; rescanning", peer, reason);
                }
            }
        }
    }

    async fn shutdown(&mut self) {
        if let Some((listener_cancel, task)) = self.listener.take() {
            listener_cancel.cancel();
            let _ = task.await;
        }
        self.link.disconnect().await;
        publish_status(&self.observers, &self.connected_tx, false);
        self.state = LinkState::Stopped;
        info!("link supervisor stopped");
    }
}

/// Decode and fan out one inbound frame. Undecodable frames are dropped
/// with a warning; frames with no recognizable fields still reach the
/// observers but leave the merged reading untouched.
fn handle_frame(
    bytes: &[u8],
    observers: &ObserverRegistry,
    latest_tx: &watch::Sender<TelemetryReading>,
) {
    match decode_frame(bytes) {
        Ok(text) => {
            let reading = TelemetryReading::parse(&text);
            if !reading.is_empty() {
                latest_tx.send_modify(|latest| latest.merge(&reading));
            }
            observers.dispatch_telemetry(&text);
        }
        Err(e) => warn!("dropping undecodable frame: {}", e),
    }
}

/// Publish a status transition exactly once per change. The watch
/// channel is the source of truth, so observers see a strict up/down
/// alternation no matter which exit path reports the change.
fn publish_status(observers: &ObserverRegistry, tx: &watch::Sender<bool>, up: bool) {
    let changed = tx.send_if_modified(|current| {
        if *current != up {
            *current = up;
            true
        } else {
            false
        }
    });
    if changed {
        observers.dispatch_connection_status(up);
    }
}

/// Drive `fut` to completion while continuing to service stop requests
/// and advertisement dispatch. Returns `None` when cancelled.
async fn serviced<T>(
    cancel: &CancellationToken,
    ads: &mut mpsc::Receiver<PeerInfo>,
    observers: &ObserverRegistry,
    fut: impl Future<Output = T>,
) -> Option<T> {
    tokio::pin!(fut);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return None,
            Some(peer) = ads.recv() => observers.dispatch_advertisement(&peer),
            out = &mut fut => return Some(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_below_ceiling_uses_base_delay() {
        let policy = ReconnectPolicy::default();
        for failures in 1..policy.max_attempts {
            assert_eq!(
                policy.delay_after_failure(failures),
                (Duration::from_secs(2), false)
            );
        }
    }

    #[test]
    fn test_backoff_at_ceiling_cools_down_and_resets() {
        let policy = ReconnectPolicy::default();
        assert_eq!(
            policy.delay_after_failure(policy.max_attempts),
            (Duration::from_secs(30), true)
        );
    }

    #[test]
    fn test_backoff_with_ceiling_of_three() {
        let policy = ReconnectPolicy {
            delay: Duration::from_secs(1),
            max_attempts: 3,
            cooldown: Duration::from_secs(20),
        };
        assert_eq!(policy.delay_after_failure(1), (Duration::from_secs(1), false));
        assert_eq!(policy.delay_after_failure(2), (Duration::from_secs(1), false));
        // Third failure cools down and resets, so the fourth attempt
        // starts the cycle over.
        assert_eq!(policy.delay_after_failure(3), (Duration::from_secs(20), true));
        assert_eq!(policy.delay_after_failure(1), (Duration::from_secs(1), false));
    }

    #[test]
    fn test_config_defaults() {
        let config = LinkConfig::new(TargetIdentity::by_name("node"));
        assert_eq!(config.scan_timeout, Duration::from_secs(5));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_zero_timeouts() {
        let config =
            LinkConfig::new(TargetIdentity::by_name("node")).with_scan_timeout(Duration::ZERO);
        assert!(config.validate().is_err());

        let config =
            LinkConfig::new(TargetIdentity::by_name("node")).with_connect_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_rejects_cooldown_shorter_than_delay() {
        let config = LinkConfig::new(TargetIdentity::by_name("node")).with_reconnect(
            ReconnectPolicy {
                delay: Duration::from_secs(5),
                max_attempts: 3,
                cooldown: Duration::from_secs(1),
            },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(LinkState::Scanning.to_string(), "scanning");
        assert_eq!(LinkState::Connected.to_string(), "connected");
    }
}
