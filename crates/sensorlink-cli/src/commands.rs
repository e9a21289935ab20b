//! Command implementations.

use std::time::Duration;

use anyhow::{Context, Result};
use btleplug::api::{Central, Peripheral as _, ScanFilter};
use tracing::info;

use sensorlink_core::{
    LinkConfig, LinkSupervisor, ResolvePolicy, TargetIdentity, TelemetryReading, get_adapter,
};

use crate::TargetArgs;

impl TargetArgs {
    fn identity(&self) -> Result<TargetIdentity> {
        TargetIdentity::new(self.name.clone(), self.address.clone())
            .context("pass --name, --address, or set SENSORLINK_DEVICE")
    }

    fn resolve_policy(&self) -> ResolvePolicy {
        if self.no_cache_address {
            ResolvePolicy::AlwaysResolve
        } else {
            ResolvePolicy::CacheAddress
        }
    }
}

/// List everything advertising nearby.
pub async fn scan(duration: Duration, json: bool) -> Result<()> {
    let adapter = get_adapter().await?;
    info!("scanning for {:?}", duration);
    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(duration).await;
    let peripherals = adapter.peripherals().await?;
    adapter.stop_scan().await?;

    let mut seen = Vec::new();
    for peripheral in peripherals {
        let Ok(Some(props)) = peripheral.properties().await else {
            continue;
        };
        seen.push((
            props.local_name.unwrap_or_else(|| "<unnamed>".to_string()),
            props.address.to_string(),
            props.rssi,
        ));
    }
    seen.sort_by(|a, b| b.2.cmp(&a.2));

    if json {
        let entries: Vec<_> = seen
            .iter()
            .map(|(name, address, rssi)| {
                serde_json::json!({ "name": name, "address": address, "rssi": rssi })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        if seen.is_empty() {
            println!("no nodes seen");
            return Ok(());
        }
        for (name, address, rssi) in seen {
            match rssi {
                Some(rssi) => println!("{name}  {address}  {rssi} dBm"),
                None => println!("{name}  {address}"),
            }
        }
    }
    Ok(())
}

/// Stream telemetry until interrupted.
pub async fn watch(
    target: TargetArgs,
    scan_timeout: Duration,
    connect_timeout: Duration,
    json: bool,
) -> Result<()> {
    let config = LinkConfig::new(target.identity()?)
        .with_scan_timeout(scan_timeout)
        .with_connect_timeout(connect_timeout)
        .with_resolve_policy(target.resolve_policy());

    let (mut supervisor, handle) = LinkSupervisor::new(config).await?;
    supervisor.on_connection_status(|up| {
        if up {
            info!("node connected");
        } else {
            info!("node disconnected");
        }
    });
    if json {
        supervisor.on_telemetry(move |text| {
            let reading = TelemetryReading::parse(text);
            if let Ok(line) = serde_json::to_string(&reading) {
                println!("{line}");
            }
        });
    } else {
        supervisor.on_telemetry(|text| println!("{text}"));
    }

    let mut worker = tokio::spawn(supervisor.run());
    tokio::select! {
        result = &mut worker => {
            result??;
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {
            info!("stop requested");
            handle.stop();
        }
    }
    worker.await??;
    Ok(())
}

/// One-shot command write.
pub async fn send(target: TargetArgs, payload: String, timeout: Duration) -> Result<()> {
    let config = LinkConfig::new(target.identity()?)
        .with_resolve_policy(target.resolve_policy());

    let (supervisor, mut handle) = LinkSupervisor::new(config).await?;
    let worker = tokio::spawn(supervisor.run());

    tokio::time::timeout(timeout, handle.wait_connected())
        .await
        .context("no connection within the deadline")??;

    let mut bytes = payload.into_bytes();
    bytes.push(b'\n');
    handle.send(bytes).await?;
    // Give the supervisor a beat to forward the queued payload.
    tokio::time::sleep(Duration::from_millis(250)).await;

    handle.stop();
    worker.await??;
    info!("payload sent");
    Ok(())
}
