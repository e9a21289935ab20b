//! Scripted [`TelemetryLink`] for driving the supervisor in tests.
//!
//! Each resolve and connect call pops the next scripted outcome; a
//! successful connect plays a per-session frame script into the
//! supervisor's event channel. When a script runs out the call pends
//! forever, which models a radio that never produces the event and
//! keeps stop-request tests honest.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use sensorlink_types::PeerInfo;

use crate::error::{Error, Result};
use crate::resolve::TargetIdentity;
use crate::session::SessionEvent;
use crate::traits::TelemetryLink;

/// One step of a scripted session.
#[derive(Debug)]
pub enum FrameStep {
    /// Let this much (test) time pass.
    Delay(Duration),
    /// Deliver a raw frame.
    Frame(Vec<u8>),
    /// Drop the link.
    Disconnect,
}

enum ConnectOutcome {
    Fail(Error),
    Session(Vec<FrameStep>),
}

/// Scripted link implementation.
pub struct MockLink {
    resolve_script: VecDeque<Result<PeerInfo>>,
    connect_script: VecDeque<ConnectOutcome>,
    advertisements: Vec<PeerInfo>,
    fail_sends: bool,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    disconnects: Arc<AtomicUsize>,
    session_task: Option<tokio::task::JoinHandle<()>>,
    connected: bool,
}

impl MockLink {
    /// Start building a scripted link.
    pub fn builder() -> MockLinkBuilder {
        MockLinkBuilder::default()
    }

    /// Payloads written through the link, in order.
    pub fn sent(&self) -> Arc<Mutex<Vec<Vec<u8>>>> {
        Arc::clone(&self.sent)
    }

    /// Counter of disconnect calls.
    pub fn disconnect_count(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.disconnects)
    }
}

#[async_trait]
impl TelemetryLink for MockLink {
    async fn resolve(
        &mut self,
        _identity: &mut TargetIdentity,
        _timeout: Duration,
    ) -> Result<PeerInfo> {
        match self.resolve_script.pop_front() {
            Some(outcome) => outcome,
            None => std::future::pending().await,
        }
    }

    async fn connect(
        &mut self,
        _timeout: Duration,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<()> {
        match self.connect_script.pop_front() {
            Some(ConnectOutcome::Fail(e)) => Err(e),
            Some(ConnectOutcome::Session(script)) => {
                self.session_task = Some(tokio::spawn(async move {
                    for step in script {
                        match step {
                            FrameStep::Delay(duration) => sleep(duration).await,
                            FrameStep::Frame(bytes) => {
                                if events.send(SessionEvent::Frame(bytes)).await.is_err() {
                                    return;
                                }
                            }
                            FrameStep::Disconnect => {
                                let _ = events.send(SessionEvent::Disconnected).await;
                                return;
                            }
                        }
                    }
                    // Script exhausted without a disconnect: hold the
                    // sender so the link stays up until torn down.
                    std::future::pending::<()>().await;
                }));
                self.connected = true;
                Ok(())
            }
            None => std::future::pending().await,
        }
    }

    async fn send(&mut self, payload: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        if self.fail_sends {
            return Err(Error::WriteFailed {
                uuid: "mock".into(),
                reason: "scripted write failure".into(),
            });
        }
        self.sent.lock().unwrap().push(payload.to_vec());
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(task) = self.session_task.take() {
            task.abort();
        }
        if self.connected {
            self.connected = false;
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn spawn_advertisement_listener(
        &self,
        _identity: TargetIdentity,
        events: mpsc::Sender<PeerInfo>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let ads = self.advertisements.clone();
        tokio::spawn(async move {
            for peer in ads {
                if events.send(peer).await.is_err() {
                    return;
                }
            }
            cancel.cancelled().await;
        })
    }
}

/// Builder for [`MockLink`] scripts.
#[derive(Default)]
pub struct MockLinkBuilder {
    resolve_script: VecDeque<Result<PeerInfo>>,
    connect_script: VecDeque<ConnectOutcome>,
    advertisements: Vec<PeerInfo>,
    fail_sends: bool,
}

impl MockLinkBuilder {
    /// Next resolve call succeeds with this peer.
    pub fn resolve_ok(mut self, peer: PeerInfo) -> Self {
        self.resolve_script.push_back(Ok(peer));
        self
    }

    /// Next resolve call fails.
    pub fn resolve_err(mut self, error: Error) -> Self {
        self.resolve_script.push_back(Err(error));
        self
    }

    /// Next connect call fails.
    pub fn connect_err(mut self, error: Error) -> Self {
        self.connect_script.push_back(ConnectOutcome::Fail(error));
        self
    }

    /// Next connect call succeeds and plays this session script.
    pub fn session(mut self, script: Vec<FrameStep>) -> Self {
        self.connect_script.push_back(ConnectOutcome::Session(script));
        self
    }

    /// Advertisement sightings delivered by the listener at startup.
    pub fn advertisement(mut self, peer: PeerInfo) -> Self {
        self.advertisements.push(peer);
        self
    }

    /// Make every in-session write fail.
    pub fn failing_sends(mut self) -> Self {
        self.fail_sends = true;
        self
    }

    /// Finish the script.
    pub fn build(self) -> MockLink {
        MockLink {
            resolve_script: self.resolve_script,
            connect_script: self.connect_script,
            advertisements: self.advertisements,
            fail_sends: self.fail_sends,
            sent: Arc::new(Mutex::new(Vec::new())),
            disconnects: Arc::new(AtomicUsize::new(0)),
            session_task: None,
            connected: false,
        }
    }
}
