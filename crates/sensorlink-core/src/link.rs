//! Production [`TelemetryLink`] over the platform BLE stack.

use std::time::Duration;

use async_trait::async_trait;
use btleplug::platform::Adapter;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use sensorlink_types::PeerInfo;

use crate::advertise::AdvertisementListener;
use crate::error::{Error, Result};
use crate::resolve::{PeerHandle, ResolvePolicy, Resolver, TargetIdentity, get_adapter};
use crate::session::{Session, SessionEvent};
use crate::traits::TelemetryLink;

/// BLE-backed link composed of a resolver and at most one live session.
#[derive(Debug)]
pub struct BleLink {
    adapter: Adapter,
    resolver: Resolver,
    resolved: Option<PeerHandle>,
    session: Option<Session>,
}

impl BleLink {
    /// Create a link over the first available adapter.
    pub async fn init(policy: ResolvePolicy) -> Result<Self> {
        let adapter = get_adapter().await?;
        Ok(Self::new(adapter, policy))
    }

    /// Create a link over a specific adapter.
    pub fn new(adapter: Adapter, policy: ResolvePolicy) -> Self {
        let resolver = Resolver::new(adapter.clone(), policy);
        Self {
            adapter,
            resolver,
            resolved: None,
            session: None,
        }
    }
}

#[async_trait]
impl TelemetryLink for BleLink {
    async fn resolve(
        &mut self,
        identity: &mut TargetIdentity,
        timeout: Duration,
    ) -> Result<PeerInfo> {
        // Stale handles never survive into a new attempt.
        self.resolved = None;
        let handle = self.resolver.find(identity, timeout).await?;
        let info = handle.info.clone();
        self.resolved = Some(handle);
        Ok(info)
    }

    async fn connect(&mut self, timeout: Duration, events: mpsc::Sender<SessionEvent>) -> Result<()> {
        let peer = self.resolved.take().ok_or(Error::NotConnected)?;
        let session = Session::connect(&self.adapter, peer, timeout, events).await?;
        self.session = Some(session);
        Ok(())
    }

    async fn send(&mut self, payload: &[u8]) -> Result<()> {
        match &self.session {
            Some(session) => session.send(payload).await,
            None => Err(Error::NotConnected),
        }
    }

    async fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            session.disconnect().await;
        }
    }

    fn spawn_advertisement_listener(
        &self,
        identity: TargetIdentity,
        events: mpsc::Sender<PeerInfo>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        AdvertisementListener::new(self.adapter.clone(), identity).spawn(events, cancel)
    }
}
