//! Bluetooth UUIDs for the sensor node's UART transport.
//!
//! The node exposes the Nordic UART Service (NUS): telemetry arrives as
//! notifications on the TX characteristic, and commands are written to
//! the RX characteristic.

use uuid::{Uuid, uuid};

/// Nordic UART Service UUID.
pub const UART_SERVICE: Uuid = uuid!("6e400001-b5a3-f393-e0a9-e50e24dcca9e");

/// UART RX characteristic - the controller writes commands here.
pub const UART_RX_CHAR: Uuid = uuid!("6e400002-b5a3-f393-e0a9-e50e24dcca9e");

/// UART TX characteristic - telemetry notifications come from here.
pub const UART_TX_CHAR: Uuid = uuid!("6e400003-b5a3-f393-e0a9-e50e24dcca9e");
