//! Always-on advertisement listening.
//!
//! A background task that owns the radio scan for the lifetime of the
//! controller and forwards every broadcast matching the target identity
//! into the supervisor, independent of connection state. The supervisor
//! dispatches these to advertisement observers on its own task, so
//! observer logic never runs on the transport's delivery thread.
//!
//! Keeping the scan running here also feeds the resolver, which only
//! inspects the adapter's discovered-peripheral set.

use btleplug::api::{Central, CentralEvent, Peripheral as _, ScanFilter};
use btleplug::platform::Adapter;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sensorlink_types::PeerInfo;

use crate::error::Result;
use crate::resolve::TargetIdentity;

/// Listens for broadcasts from the target peer.
#[derive(Debug)]
pub struct AdvertisementListener {
    adapter: Adapter,
    identity: TargetIdentity,
}

impl AdvertisementListener {
    /// Create a listener for the given target.
    pub fn new(adapter: Adapter, identity: TargetIdentity) -> Self {
        Self { adapter, identity }
    }

    /// Start the listener task.
    ///
    /// Matched sightings are sent to `events` in packet-arrival order.
    /// The task runs until the cancellation token fires, then stops the
    /// scan it started.
    pub fn spawn(
        self,
        events: mpsc::Sender<PeerInfo>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.run(events, cancel).await {
                warn!("advertisement listener error: {}", e);
            }
        })
    }

    async fn run(self, events: mpsc::Sender<PeerInfo>, cancel: CancellationToken) -> Result<()> {
        let mut stream = self.adapter.events().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;
        info!("advertisement listener started for {}", self.identity.label());

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = stream.next() => {
                    let Some(event) = event else { break };
                    let id = match event {
                        CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                        _ => continue,
                    };
                    let Ok(peripheral) = self.adapter.peripheral(&id).await else {
                        continue;
                    };
                    let Ok(Some(props)) = peripheral.properties().await else {
                        continue;
                    };
                    let address = props.address.to_string();
                    if !self.identity.matches(props.local_name.as_deref(), &address) {
                        continue;
                    }
                    let peer = PeerInfo {
                        name: props.local_name,
                        address,
                        rssi: props.rssi,
                    };
                    if events.send(peer).await.is_err() {
                        break;
                    }
                }
            }
        }

        let _ = self.adapter.stop_scan().await;
        info!("advertisement listener stopped");
        Ok(())
    }
}
