//! Target peer resolution.
//!
//! The resolver turns a [`TargetIdentity`] (a name fragment and/or a
//! fixed address) into a connectable peripheral. Scanning itself is
//! owned by the advertisement listener, which keeps the radio scan
//! running for the lifetime of the controller; the resolver only polls
//! the adapter's discovered-peripheral set until its deadline.

use std::time::Duration;

use btleplug::api::{Central, Manager as _, Peripheral as _};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tokio::time::{Instant, sleep};
use tracing::{debug, info};

use sensorlink_types::PeerInfo;

use crate::error::{Error, PeerNotFoundReason, Result};

/// How often the resolver re-inspects the discovered-peripheral set.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// What the controller is looking for on the radio.
///
/// At least one of `name` or `address` must be set. Name matching is a
/// case-insensitive substring test against the advertised local name;
/// address matching is exact (case-insensitive).
#[derive(Debug, Clone)]
pub struct TargetIdentity {
    /// Name fragment to match against advertised names.
    pub name: Option<String>,
    /// Fixed peer address, when known.
    pub address: Option<String>,
}

impl TargetIdentity {
    /// Create an identity; fails if neither field is provided.
    pub fn new(name: Option<String>, address: Option<String>) -> Result<Self> {
        if name.is_none() && address.is_none() {
            return Err(Error::invalid_config(
                "either a peer name or a peer address must be provided",
            ));
        }
        Ok(Self { name, address })
    }

    /// Identity matching by advertised name fragment.
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            address: None,
        }
    }

    /// Identity matching by fixed address.
    pub fn by_address(address: impl Into<String>) -> Self {
        Self {
            name: None,
            address: Some(address.into()),
        }
    }

    /// Whether a broadcast with the given name/address belongs to the
    /// target. The address check runs first: it is the fast path and
    /// bypasses name matching entirely.
    pub fn matches(&self, name: Option<&str>, address: &str) -> bool {
        if let Some(target) = &self.address
            && target.eq_ignore_ascii_case(address)
        {
            return true;
        }
        if let Some(target) = &self.name
            && let Some(name) = name
            && name.to_lowercase().contains(&target.to_lowercase())
        {
            return true;
        }
        false
    }

    /// Human-readable label for log lines.
    pub fn label(&self) -> &str {
        self.name
            .as_deref()
            .or(self.address.as_deref())
            .unwrap_or("<unspecified>")
    }
}

/// Policy for what happens to the identity after a name-based match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolvePolicy {
    /// Cache the resolved address into the identity so later attempts
    /// match by address alone. Faster, but wrong for peers whose
    /// advertised address rotates.
    #[default]
    CacheAddress,
    /// Re-match by name on every attempt.
    AlwaysResolve,
}

/// A resolved, connectable peer.
///
/// Valid for exactly one connection attempt: the underlying radio
/// metadata is volatile, so the supervisor discards the handle after
/// every attempt and resolves afresh.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    /// Observable metadata for the peer.
    pub info: PeerInfo,
    pub(crate) peripheral: Peripheral,
}

/// Get the first available Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    adapters
        .into_iter()
        .next()
        .ok_or(Error::PeerNotFound(PeerNotFoundReason::NoAdapter))
}

/// Resolves the target identity against peripherals the adapter has
/// seen. Requires an active scan (the advertisement listener provides
/// one).
#[derive(Debug, Clone)]
pub struct Resolver {
    adapter: Adapter,
    policy: ResolvePolicy,
}

impl Resolver {
    /// Create a resolver over an adapter.
    pub fn new(adapter: Adapter, policy: ResolvePolicy) -> Self {
        Self { adapter, policy }
    }

    /// Find the target peer, polling until `timeout` elapses.
    ///
    /// First match wins; with several advertisers carrying colliding
    /// name fragments the winner is whichever broadcast arrived first,
    /// which is non-deterministic across runs. On a name-based match
    /// under [`ResolvePolicy::CacheAddress`] the resolved address is
    /// written back into `identity` so subsequent calls take the
    /// address fast path.
    pub async fn find(
        &self,
        identity: &mut TargetIdentity,
        timeout: Duration,
    ) -> Result<PeerHandle> {
        debug!("resolving peer: {}", identity.label());
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(handle) = self.inspect_discovered(identity).await? {
                return Ok(handle);
            }
            if Instant::now() + POLL_INTERVAL > deadline {
                debug!("peer {} not seen within {:?}", identity.label(), timeout);
                return Err(Error::scan_timeout(timeout));
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// One pass over the adapter's discovered set.
    async fn inspect_discovered(&self, identity: &mut TargetIdentity) -> Result<Option<PeerHandle>> {
        for peripheral in self.adapter.peripherals().await? {
            let Ok(Some(props)) = peripheral.properties().await else {
                continue;
            };
            let address = props.address.to_string();
            if !identity.matches(props.local_name.as_deref(), &address) {
                continue;
            }

            info!(
                "resolved peer {} at {}",
                props.local_name.as_deref().unwrap_or("<unnamed>"),
                address
            );
            if identity.address.is_none() && self.policy == ResolvePolicy::CacheAddress {
                identity.address = Some(address.clone());
            }

            let info = PeerInfo {
                name: props.local_name.clone(),
                address,
                rssi: props.rssi,
            };
            return Ok(Some(PeerHandle { info, peripheral }));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_requires_name_or_address() {
        assert!(TargetIdentity::new(None, None).is_err());
        assert!(TargetIdentity::new(Some("node".into()), None).is_ok());
        assert!(TargetIdentity::new(None, Some("aa:bb".into())).is_ok());
    }

    #[test]
    fn test_name_match_is_case_insensitive_substring() {
        let identity = TargetIdentity::by_name("CIRCUITPY23c6");
        assert!(identity.matches(Some("circuitpy23c6-rev2"), "aa:bb:cc:dd:ee:ff"));
        assert!(!identity.matches(Some("circuitpy9999"), "aa:bb:cc:dd:ee:ff"));
        assert!(!identity.matches(None, "aa:bb:cc:dd:ee:ff"));
    }

    #[test]
    fn test_address_match_bypasses_name() {
        let identity = TargetIdentity {
            name: Some("nonsense".into()),
            address: Some("AA:BB:CC:DD:EE:FF".into()),
        };
        assert!(identity.matches(None, "aa:bb:cc:dd:ee:ff"));
        assert!(identity.matches(Some("unrelated"), "AA:BB:CC:DD:EE:FF"));
    }

    #[test]
    fn test_label_prefers_name() {
        let identity = TargetIdentity {
            name: Some("node".into()),
            address: Some("aa:bb".into()),
        };
        assert_eq!(identity.label(), "node");
        assert_eq!(TargetIdentity::by_address("aa:bb").label(), "aa:bb");
    }
}
