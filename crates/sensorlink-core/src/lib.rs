//! Core connection control for UART-telemetry sensor nodes.
//!
//! This crate drives the full lifecycle of a BLE link to one sensor
//! node: resolving the target from a name fragment or fixed address,
//! connecting and subscribing to its telemetry channel, decoding the
//! line-oriented frames it sends, and reconnecting with backoff
//! whenever the link drops.
//!
//! # Quick start
//!
//! ```no_run
//! use sensorlink_core::{LinkConfig, LinkSupervisor, TargetIdentity};
//!
//! #[tokio::main]
//! async fn main() -> sensorlink_core::Result<()> {
//!     let config = LinkConfig::new(TargetIdentity::by_name("circuitpy"));
//!     let (mut supervisor, handle) = LinkSupervisor::new(config).await?;
//!     supervisor.on_telemetry(|text| println!("frame: {text}"));
//!
//!     let worker = tokio::spawn(supervisor.run());
//!     // ... later:
//!     handle.stop();
//!     worker.await.expect("supervisor task")?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - [`supervisor`]: the connection state machine and its handle
//! - [`resolve`]: target identity matching and peer resolution
//! - [`session`]: one established link, frame forwarding, writes
//! - [`advertise`]: the always-on scan and advertisement fan-in
//! - [`observers`]: callback registry with panic isolation
//! - [`traits`]: the [`TelemetryLink`] seam the supervisor runs over
//! - [`mock`]: scripted link for tests

pub mod advertise;
pub mod error;
pub mod link;
pub mod mock;
pub mod observers;
pub mod resolve;
pub mod session;
pub mod supervisor;
pub mod traits;

pub use advertise::AdvertisementListener;
pub use error::{Error, PeerNotFoundReason, Result};
pub use link::BleLink;
pub use mock::{FrameStep, MockLink, MockLinkBuilder};
pub use observers::ObserverRegistry;
pub use resolve::{PeerHandle, ResolvePolicy, Resolver, TargetIdentity, get_adapter};
pub use session::{Session, SessionEvent};
pub use supervisor::{LinkConfig, LinkState, LinkSupervisor, ReconnectPolicy, SupervisorHandle};
pub use traits::TelemetryLink;

pub use sensorlink_types::{DecodeError, PeerInfo, TelemetryReading, decode_frame};
