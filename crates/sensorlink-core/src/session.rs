//! Transport session over one BLE peripheral.
//!
//! A [`Session`] owns the physical link to the peer: it connects,
//! subscribes to the telemetry notification channel, forwards every
//! inbound frame verbatim into the supervisor's event channel, and
//! writes outbound commands. It never holds authoritative connection
//! state - it reports transitions through [`SessionEvent`] and the
//! supervisor decides what they mean.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use btleplug::api::{Central, CentralEvent, Characteristic, Peripheral as _, WriteType};
use btleplug::platform::Adapter;
use futures::StreamExt;
use tokio::sync::{Mutex, mpsc};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use sensorlink_types::PeerInfo;
use sensorlink_types::uuids::{UART_RX_CHAR, UART_SERVICE, UART_TX_CHAR};

use crate::error::{Error, Result};
use crate::resolve::PeerHandle;

/// Timeout for service discovery after the link comes up.
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Events a session reports to the supervisor.
///
/// Frames are delivered in radio order with no buffering or coalescing
/// beyond what the transport itself provides.
#[derive(Debug)]
pub enum SessionEvent {
    /// A raw notification frame, exactly as received.
    Frame(Vec<u8>),
    /// The peer dropped the link.
    Disconnected,
}

/// An established link to one peer.
pub struct Session {
    peripheral: btleplug::platform::Peripheral,
    peer: PeerInfo,
    /// Write path (UART RX on the peer). Absent when the peer does not
    /// expose the telemetry service.
    command_char: Option<Characteristic>,
    /// Notification path (UART TX on the peer).
    telemetry_char: Option<Characteristic>,
    /// Spawned forwarder/watcher tasks, aborted on disconnect.
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    disconnected: AtomicBool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("peer", &self.peer)
            .field("has_telemetry", &self.telemetry_char.is_some())
            .field("disconnected", &self.disconnected.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Establish the link to a resolved peer.
    ///
    /// Connects with `connect_timeout`, discovers services, and - when
    /// the peer exposes the UART service - subscribes to the telemetry
    /// characteristic before returning, so a connected-but-unsubscribed
    /// session is never observable. A peer without the service still
    /// connects successfully; a warning is raised and no telemetry will
    /// arrive.
    pub async fn connect(
        adapter: &Adapter,
        peer: PeerHandle,
        connect_timeout: Duration,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<Self> {
        let PeerHandle { info, peripheral } = peer;

        info!("connecting to {}", info);
        timeout(connect_timeout, peripheral.connect())
            .await
            .map_err(|_| Error::timeout("connect to peer", connect_timeout))?
            .map_err(|e| Error::connection_failed(Some(info.label().to_string()), e.to_string()))?;

        match Self::finish_setup(adapter, peripheral.clone(), info.clone(), events).await {
            Ok(session) => Ok(session),
            Err(e) => {
                // Do not leave a half-set-up link behind.
                let _ = peripheral.disconnect().await;
                Err(e)
            }
        }
    }

    async fn finish_setup(
        adapter: &Adapter,
        peripheral: btleplug::platform::Peripheral,
        peer: PeerInfo,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<Self> {
        timeout(DISCOVERY_TIMEOUT, peripheral.discover_services())
            .await
            .map_err(|_| Error::timeout("discover services", DISCOVERY_TIMEOUT))?
            .map_err(|e| Error::connection_failed(Some(peer.label().to_string()), e.to_string()))?;

        let services = peripheral.services();
        debug!("discovered {} services on {}", services.len(), peer);

        let mut telemetry_char = None;
        let mut command_char = None;
        if let Some(service) = services.iter().find(|s| s.uuid == UART_SERVICE) {
            telemetry_char = service
                .characteristics
                .iter()
                .find(|c| c.uuid == UART_TX_CHAR)
                .cloned();
            command_char = service
                .characteristics
                .iter()
                .find(|c| c.uuid == UART_RX_CHAR)
                .cloned();
        }

        let mut tasks = Vec::new();

        match &telemetry_char {
            Some(characteristic) => {
                peripheral.subscribe(characteristic).await?;
                let mut stream = peripheral.notifications().await?;
                let char_uuid = characteristic.uuid;
                let frames = events.clone();
                tasks.push(tokio::spawn(async move {
                    while let Some(notification) = stream.next().await {
                        if notification.uuid != char_uuid {
                            continue;
                        }
                        if frames
                            .send(SessionEvent::Frame(notification.value))
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    // Stream end means the transport tore down the link.
                    let _ = frames.send(SessionEvent::Disconnected).await;
                }));
                info!("telemetry notifications enabled for {}", peer);
            }
            None => {
                warn!(
                    "telemetry service not found on {}; connected, but no readings will arrive",
                    peer
                );
            }
        }

        // Push-based disconnection signal from the transport layer.
        let mut central_events = adapter.events().await?;
        let peer_id = peripheral.id();
        tasks.push(tokio::spawn(async move {
            while let Some(event) = central_events.next().await {
                if let CentralEvent::DeviceDisconnected(id) = event
                    && id == peer_id
                {
                    let _ = events.send(SessionEvent::Disconnected).await;
                    return;
                }
            }
        }));

        Ok(Self {
            peripheral,
            peer,
            command_char,
            telemetry_char,
            tasks: Mutex::new(tasks),
            disconnected: AtomicBool::new(false),
        })
    }

    /// The peer this session is bound to.
    pub fn peer(&self) -> &PeerInfo {
        &self.peer
    }

    /// Whether the peer exposes the telemetry service.
    pub fn has_telemetry(&self) -> bool {
        self.telemetry_char.is_some()
    }

    /// Write a payload to the peer's command channel, fire-and-forget.
    ///
    /// No response is awaited. A synchronous failure is surfaced to the
    /// caller, which treats it as an implicit disconnect.
    pub async fn send(&self, payload: &[u8]) -> Result<()> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        let characteristic =
            self.command_char
                .as_ref()
                .ok_or_else(|| Error::CharacteristicNotFound {
                    uuid: UART_RX_CHAR.to_string(),
                })?;
        self.peripheral
            .write(characteristic, payload, WriteType::WithoutResponse)
            .await
            .map_err(|e| Error::WriteFailed {
                uuid: UART_RX_CHAR.to_string(),
                reason: e.to_string(),
            })
    }

    /// Tear the session down.
    ///
    /// Idempotent: calling this on an already-disconnected session is a
    /// no-op. Forwarder tasks are aborted first so no event can arrive
    /// after this returns.
    pub async fn disconnect(&self) {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return;
        }
        for handle in self.tasks.lock().await.drain(..) {
            handle.abort();
        }
        if let Some(characteristic) = &self.telemetry_char {
            let _ = self.peripheral.unsubscribe(characteristic).await;
        }
        if let Err(e) = self.peripheral.disconnect().await {
            debug!("disconnect from {}: {} (peer may already be gone)", self.peer, e);
        }
        info!("disconnected from {}", self.peer);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Best-effort: the supervisor always disconnects explicitly,
        // but a dropped session must not leave forwarder tasks running.
        if !self.disconnected.load(Ordering::SeqCst)
            && let Ok(mut tasks) = self.tasks.try_lock()
        {
            for handle in tasks.drain(..) {
                handle.abort();
            }
        }
    }
}
