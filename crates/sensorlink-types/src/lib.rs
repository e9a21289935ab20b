//! Wire-format types for sensorlink telemetry nodes.
//!
//! This crate holds the platform-agnostic pieces of the sensorlink
//! protocol so they can be shared between the native controller and any
//! future bindings:
//!
//! - The text telemetry grammar (`T:<temp>,H:<humid>,L:<light>`) and its
//!   decoder/parser
//! - [`TelemetryReading`], the partial reading extracted from one frame
//! - [`PeerInfo`], the observable identity of a discovered radio peer
//! - Nordic UART Service UUID constants for the BLE transport
//!
//! # Example
//!
//! ```
//! use sensorlink_types::{TelemetryReading, telemetry::decode_frame};
//!
//! let text = decode_frame(b"T:22.15,H:52.15,L:41.00\n").unwrap();
//! let reading = TelemetryReading::parse(&text);
//! assert_eq!(reading.temperature, Some(22.15));
//! ```

pub mod error;
pub mod peer;
pub mod telemetry;
pub mod uuid;

pub use error::DecodeError;
pub use peer::PeerInfo;
pub use telemetry::{TelemetryReading, decode_frame};
pub use self::uuid as uuids;
