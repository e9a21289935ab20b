//! Trait abstraction over the radio link.
//!
//! [`TelemetryLink`] is the seam between the connection supervisor and
//! the transport stack. The production implementation is
//! [`crate::link::BleLink`]; tests drive the supervisor with
//! [`crate::mock::MockLink`] instead.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use sensorlink_types::PeerInfo;

use crate::error::Result;
use crate::resolve::TargetIdentity;
use crate::session::SessionEvent;

/// Operations the supervisor needs from a radio link.
#[async_trait]
pub trait TelemetryLink: Send {
    /// Resolve the target identity to a connectable peer, holding the
    /// connectable handle internally for the next [`connect`] call.
    ///
    /// Handles are valid for a single attempt; calling `resolve` again
    /// discards any previously held handle.
    ///
    /// [`connect`]: TelemetryLink::connect
    async fn resolve(
        &mut self,
        identity: &mut TargetIdentity,
        timeout: Duration,
    ) -> Result<PeerInfo>;

    /// Connect to the most recently resolved peer and begin forwarding
    /// [`SessionEvent`]s into `events`.
    async fn connect(
        &mut self,
        timeout: Duration,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<()>;

    /// Write a payload to the connected peer's command channel.
    async fn send(&mut self, payload: &[u8]) -> Result<()>;

    /// Tear down the active session, if any. Idempotent.
    async fn disconnect(&mut self);

    /// Start the always-on advertisement listener, forwarding matched
    /// sightings into `events` until `cancel` fires.
    fn spawn_advertisement_listener(
        &self,
        identity: TargetIdentity,
        events: mpsc::Sender<PeerInfo>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()>;
}
