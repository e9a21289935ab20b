//! End-to-end supervisor tests over a scripted link.
//!
//! All tests run under paused time, so backoff waits are asserted
//! against virtual clocks and complete instantly.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::{Instant, sleep};

use sensorlink_core::{
    Error, FrameStep, LinkConfig, LinkSupervisor, MockLink, PeerInfo, ReconnectPolicy,
    TargetIdentity,
};

fn test_peer() -> PeerInfo {
    PeerInfo::with_name("aa:bb:cc:dd:ee:ff", "circuitpy23c6-rev2")
}

fn test_config() -> LinkConfig {
    LinkConfig::new(TargetIdentity::by_name("circuitpy23c6"))
}

/// Let spawned tasks settle under paused time.
async fn settle() {
    sleep(Duration::from_millis(50)).await;
}

#[tokio::test(start_paused = true)]
async fn test_connects_and_delivers_telemetry() {
    let link = MockLink::builder()
        .resolve_ok(test_peer())
        .session(vec![FrameStep::Frame(b"T:22.15,H:52.15,L:41.00\n".to_vec())])
        .build();

    let (mut supervisor, mut handle) = LinkSupervisor::with_link(test_config(), link).unwrap();
    let frames = Arc::new(Mutex::new(Vec::new()));
    {
        let frames = Arc::clone(&frames);
        supervisor.on_telemetry(move |text| frames.lock().unwrap().push(text.to_string()));
    }

    let worker = tokio::spawn(supervisor.run());
    handle.wait_connected().await.unwrap();
    settle().await;

    assert_eq!(*frames.lock().unwrap(), vec!["T:22.15,H:52.15,L:41.00"]);
    let reading = handle.latest_reading();
    assert_eq!(reading.temperature, Some(22.15));
    assert_eq!(reading.humidity, Some(52.15));
    assert_eq!(reading.light, Some(41.0));

    handle.stop();
    worker.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_connect_failures_back_off_then_cool_down() {
    // Five consecutive connect failures: four base delays, then the
    // extended cooldown, then the counter resets and the sixth attempt
    // connects.
    let mut builder = MockLink::builder();
    for _ in 0..5 {
        builder = builder
            .resolve_ok(test_peer())
            .connect_err(Error::connection_failed(None, "refused".to_string()));
    }
    let link = builder.resolve_ok(test_peer()).session(vec![]).build();

    let (supervisor, mut handle) = LinkSupervisor::with_link(test_config(), link).unwrap();
    let start = Instant::now();
    let worker = tokio::spawn(supervisor.run());
    handle.wait_connected().await.unwrap();

    let elapsed = start.elapsed();
    let expected = Duration::from_secs(4 * 2 + 30);
    assert!(
        elapsed >= expected && elapsed < expected + Duration::from_secs(1),
        "elapsed {elapsed:?}, expected about {expected:?}"
    );

    handle.stop();
    worker.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_scan_timeouts_retry_with_base_delay() {
    let link = MockLink::builder()
        .resolve_err(Error::scan_timeout(Duration::from_secs(5)))
        .resolve_err(Error::scan_timeout(Duration::from_secs(5)))
        .resolve_ok(test_peer())
        .session(vec![])
        .build();

    let (supervisor, mut handle) = LinkSupervisor::with_link(test_config(), link).unwrap();
    let start = Instant::now();
    let worker = tokio::spawn(supervisor.run());
    handle.wait_connected().await.unwrap();

    let elapsed = start.elapsed();
    assert!(
        elapsed >= Duration::from_secs(4) && elapsed < Duration::from_secs(5),
        "elapsed {elapsed:?}, expected about 4s"
    );

    handle.stop();
    worker.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_status_transitions_strictly_alternate() {
    let link = MockLink::builder()
        .resolve_ok(test_peer())
        .session(vec![
            FrameStep::Frame(b"T:20.00,H:50.00\n".to_vec()),
            FrameStep::Disconnect,
        ])
        .resolve_ok(test_peer())
        .session(vec![])
        .build();

    let (mut supervisor, mut handle) = LinkSupervisor::with_link(test_config(), link).unwrap();
    let transitions = Arc::new(Mutex::new(Vec::new()));
    {
        let transitions = Arc::clone(&transitions);
        supervisor.on_connection_status(move |up| transitions.lock().unwrap().push(up));
    }

    let worker = tokio::spawn(supervisor.run());
    handle.wait_connected().await.unwrap();
    // Ride out the scripted disconnect and the reconnect.
    handle.status_changed().await.unwrap();
    handle.wait_connected().await.unwrap();
    handle.stop();
    worker.await.unwrap().unwrap();

    let seen = transitions.lock().unwrap().clone();
    assert_eq!(seen, vec![true, false, true, false]);
    for pair in seen.windows(2) {
        assert_ne!(pair[0], pair[1], "status repeated without alternation");
    }
}

#[tokio::test(start_paused = true)]
async fn test_send_reaches_link_when_connected() {
    let link = MockLink::builder().resolve_ok(test_peer()).session(vec![]).build();
    let sent = link.sent();

    let (supervisor, mut handle) = LinkSupervisor::with_link(test_config(), link).unwrap();
    let worker = tokio::spawn(supervisor.run());
    handle.wait_connected().await.unwrap();

    handle.send(&b"PING\n"[..]).await.unwrap();
    settle().await;
    assert_eq!(*sent.lock().unwrap(), vec![b"PING\n".to_vec()]);

    handle.stop();
    worker.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_send_fails_fast_when_disconnected() {
    let link = MockLink::builder().build();
    let (_supervisor, handle) = LinkSupervisor::with_link(test_config(), link).unwrap();

    // Not running, never connected: the send must not queue.
    let err = handle.send(&b"PING\n"[..]).await.unwrap_err();
    assert!(matches!(err, Error::NotConnected));
}

#[tokio::test(start_paused = true)]
async fn test_write_failure_is_treated_as_disconnect() {
    let link = MockLink::builder()
        .resolve_ok(test_peer())
        .session(vec![])
        .resolve_ok(test_peer())
        .session(vec![])
        .failing_sends()
        .build();

    let (mut supervisor, mut handle) = LinkSupervisor::with_link(test_config(), link).unwrap();
    let transitions = Arc::new(Mutex::new(Vec::new()));
    {
        let transitions = Arc::clone(&transitions);
        supervisor.on_connection_status(move |up| transitions.lock().unwrap().push(up));
    }

    let worker = tokio::spawn(supervisor.run());
    handle.wait_connected().await.unwrap();
    handle.send(&b"PING\n"[..]).await.unwrap();

    // The failed write drops the link; the supervisor reconnects.
    handle.status_changed().await.unwrap();
    handle.wait_connected().await.unwrap();
    handle.stop();
    worker.await.unwrap().unwrap();

    assert_eq!(*transitions.lock().unwrap(), vec![true, false, true, false]);
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_prompt_while_scanning() {
    // Empty resolve script: the resolve call pends forever.
    let link = MockLink::builder().build();
    let (supervisor, handle) = LinkSupervisor::with_link(test_config(), link).unwrap();

    let start = Instant::now();
    let worker = tokio::spawn(supervisor.run());
    settle().await;
    handle.stop();
    worker.await.unwrap().unwrap();

    assert!(start.elapsed() < Duration::from_secs(1));
    assert!(!handle.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_panicking_observer_does_not_starve_others() {
    let link = MockLink::builder()
        .resolve_ok(test_peer())
        .session(vec![FrameStep::Frame(b"T:21.00,H:45.00\n".to_vec())])
        .build();

    let (mut supervisor, mut handle) = LinkSupervisor::with_link(test_config(), link).unwrap();
    supervisor.on_telemetry(|_| panic!("observer bug"));
    let delivered = Arc::new(AtomicUsize::new(0));
    {
        let delivered = Arc::clone(&delivered);
        supervisor.on_telemetry(move |_| {
            delivered.fetch_add(1, Ordering::SeqCst);
        });
    }

    let worker = tokio::spawn(supervisor.run());
    handle.wait_connected().await.unwrap();
    settle().await;

    assert_eq!(delivered.load(Ordering::SeqCst), 1);

    handle.stop();
    worker.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_undecodable_frame_is_dropped() {
    let link = MockLink::builder()
        .resolve_ok(test_peer())
        .session(vec![
            FrameStep::Frame(vec![0xff, 0xfe, 0xfd]),
            FrameStep::Frame(b"T:19.50,H:48.00\n".to_vec()),
        ])
        .build();

    let (mut supervisor, mut handle) = LinkSupervisor::with_link(test_config(), link).unwrap();
    let frames = Arc::new(Mutex::new(Vec::new()));
    {
        let frames = Arc::clone(&frames);
        supervisor.on_telemetry(move |text| frames.lock().unwrap().push(text.to_string()));
    }

    let worker = tokio::spawn(supervisor.run());
    handle.wait_connected().await.unwrap();
    settle().await;

    // Only the decodable frame reaches observers.
    assert_eq!(*frames.lock().unwrap(), vec!["T:19.50,H:48.00"]);
    assert_eq!(handle.latest_reading().temperature, Some(19.5));

    handle.stop();
    worker.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_readings_merge_stickily_across_frames() {
    let link = MockLink::builder()
        .resolve_ok(test_peer())
        .session(vec![
            FrameStep::Frame(b"T:20.00,H:50.00\n".to_vec()),
            FrameStep::Delay(Duration::from_millis(100)),
            FrameStep::Frame(b"L:10\n".to_vec()),
        ])
        .build();

    let (supervisor, mut handle) = LinkSupervisor::with_link(test_config(), link).unwrap();
    let worker = tokio::spawn(supervisor.run());
    handle.wait_connected().await.unwrap();
    settle().await;

    let reading = handle.latest_reading();
    assert_eq!(reading.temperature, Some(20.0));
    assert_eq!(reading.humidity, Some(50.0));
    assert_eq!(reading.light, Some(10.0));

    handle.stop();
    worker.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_advertisements_reach_observers() {
    let link = MockLink::builder()
        .advertisement(test_peer())
        .advertisement(test_peer())
        .build();

    let (mut supervisor, handle) = LinkSupervisor::with_link(test_config(), link).unwrap();
    let sightings = Arc::new(AtomicUsize::new(0));
    {
        let sightings = Arc::clone(&sightings);
        supervisor.on_advertisement(move |_| {
            sightings.fetch_add(1, Ordering::SeqCst);
        });
    }

    let worker = tokio::spawn(supervisor.run());
    settle().await;
    assert_eq!(sightings.load(Ordering::SeqCst), 2);

    handle.stop();
    worker.await.unwrap().unwrap();
}
