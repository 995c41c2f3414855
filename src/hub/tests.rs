//! Lifecycle and delivery tests for the datagram hub

use super::*;
use crate::processors::Forwarder;
use crate::test_utils::{CallLog, RecordingProcessor};
use crate::types::{DeviceId, build_packet};

const TIMEOUT: Duration = Duration::from_secs(5);

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

async fn wait_for_datagrams(stats: &mut watch::Receiver<HubStats>, count: u64) {
    tokio::time::timeout(TIMEOUT, stats.wait_for(|s| s.datagrams >= count))
        .await
        .expect("datagrams delivered within timeout")
        .unwrap();
}

#[tokio::test]
async fn forwards_datagram_end_to_end() {
    let _ = tracing_subscriber::fmt::try_init();

    let listener = UdpSocket::bind(loopback()).await.unwrap();
    let mut hub = DatagramHub::bind_to(loopback()).await.unwrap();
    let hub_addr = hub.local_addr().unwrap();
    assert_eq!(hub.state(), HubState::Bound);

    let chain = ProcessorChain::new().with(Forwarder::new(listener.local_addr().unwrap()));
    let cancel = CancellationToken::new();
    let run_cancel = cancel.clone();
    let task = tokio::spawn(async move {
        let exit = hub.run(chain, Source::Live, run_cancel).await;
        (hub, exit)
    });

    let sender = UdpSocket::bind(loopback()).await.unwrap();
    let datagram: Vec<u8> = (0..20u8).collect();
    sender.send_to(&datagram, hub_addr).await.unwrap();

    let mut buf = [0u8; 64];
    let (n, _) = tokio::time::timeout(TIMEOUT, listener.recv_from(&mut buf))
        .await
        .expect("forwarded datagram within timeout")
        .unwrap();
    assert_eq!(&buf[..n], &datagram[..]);

    cancel.cancel();
    let (hub, exit) = task.await.unwrap();
    assert!(matches!(exit, Ok(HubExit::Cancelled)));
    assert_eq!(hub.state(), HubState::Closed);
    assert_eq!(hub.stats().datagrams, 1);
    assert!(hub.local_addr().is_none());
}

#[tokio::test]
async fn run_requires_a_bound_hub() {
    let mut hub = DatagramHub::new(HubConfig::new(loopback()));
    let err = hub.run(ProcessorChain::new(), Source::Live, CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, GseError::InvalidState { from: "idle", to: "active" }));

    let err = hub.close().await.unwrap_err();
    assert!(matches!(err, GseError::InvalidState { .. }));
}

#[tokio::test]
async fn bind_conflict_is_a_bind_error() {
    let first = DatagramHub::bind_to(loopback()).await.unwrap();
    let taken = first.local_addr().unwrap();

    let err = DatagramHub::bind_to(taken).await.unwrap_err();
    assert!(matches!(err, GseError::Bind { addr, .. } if addr == taken));
    assert_eq!(err.kind(), crate::ErrorKind::Resource);
}

#[tokio::test]
async fn setup_failure_tears_down_through_close() {
    let log = CallLog::new();
    let chain = ProcessorChain::new()
        .with(RecordingProcessor::new("first", &log))
        .with(RecordingProcessor::new("broken", &log).failing_setup())
        .with(RecordingProcessor::new("never", &log));

    let mut hub = DatagramHub::bind_to(loopback()).await.unwrap();
    let err = hub.run(chain, Source::Live, CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, GseError::Configuration { .. }));
    assert_eq!(hub.state(), HubState::Closed);
    assert_eq!(log.entries(), vec!["first:setup", "broken:setup", "first:close"]);
    hub.close().await.unwrap();
}

#[tokio::test]
async fn failing_processor_is_isolated_and_counted() {
    let log = CallLog::new();
    let chain = ProcessorChain::new()
        .with(RecordingProcessor::new("flaky", &log).failing_receive())
        .with(RecordingProcessor::new("steady", &log));

    let mut hub = DatagramHub::bind_to(loopback()).await.unwrap();
    let hub_addr = hub.local_addr().unwrap();
    let mut stats = hub.subscribe_stats();
    let cancel = CancellationToken::new();
    let run_cancel = cancel.clone();
    let task = tokio::spawn(async move {
        hub.run(chain, Source::Live, run_cancel).await.unwrap();
        hub
    });

    let sender = UdpSocket::bind(loopback()).await.unwrap();
    sender.send_to(build_packet(DeviceId(0xC0), 0, &[1, 2]).as_bytes(), hub_addr).await.unwrap();
    sender.send_to(&[0xAA; 5], hub_addr).await.unwrap();
    wait_for_datagrams(&mut stats, 2).await;

    cancel.cancel();
    let hub = task.await.unwrap();
    let stats = hub.stats();
    assert_eq!(stats.processor_errors, 2);
    assert_eq!(stats.short_packets, 1);
    assert_eq!(stats.crc_failures, 0);
    assert_eq!(stats.bytes, 18 + 5);

    let entries = log.entries();
    assert!(entries.contains(&"steady:receive:18".to_string()));
    assert!(entries.contains(&"steady:receive:5".to_string()));
    assert_eq!(entries.iter().filter(|e| e.ends_with(":close")).count(), 2);
}

#[tokio::test]
async fn corrupt_header_crc_is_counted_but_delivered() {
    let log = CallLog::new();
    let chain = ProcessorChain::new().with(RecordingProcessor::new("sink", &log));

    let mut hub = DatagramHub::bind_to(loopback()).await.unwrap();
    let hub_addr = hub.local_addr().unwrap();
    let mut stats = hub.subscribe_stats();
    let cancel = CancellationToken::new();
    let run_cancel = cancel.clone();
    let task = tokio::spawn(async move {
        hub.run(chain, Source::Live, run_cancel).await.unwrap();
        hub
    });

    let mut bytes = build_packet(DeviceId(0xD1), 0, &[7; 12]).as_bytes().to_vec();
    bytes[20] ^= 0xFF;
    let sender = UdpSocket::bind(loopback()).await.unwrap();
    sender.send_to(&bytes, hub_addr).await.unwrap();
    wait_for_datagrams(&mut stats, 1).await;

    cancel.cancel();
    let hub = task.await.unwrap();
    assert_eq!(hub.stats().crc_failures, 1);
    assert!(log.entries().contains(&"sink:receive:28".to_string()));
}

#[tokio::test]
async fn missing_playback_binary_fails_before_setup() {
    let log = CallLog::new();
    let chain = ProcessorChain::new().with(RecordingProcessor::new("sink", &log));
    let capture = tempfile::NamedTempFile::new().unwrap();

    let mut hub = DatagramHub::bind_to(loopback()).await.unwrap();
    let source = Source::Playback {
        controller: PlaybackController::new("/nonexistent/playback"),
        capture: capture.path().to_path_buf(),
        options: PlaybackOptions::default(),
    };
    let err = hub.run(chain, source, CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, GseError::PlaybackMissing { .. }));
    assert_eq!(hub.state(), HubState::Bound);
    assert!(log.entries().is_empty());
}

#[tokio::test]
async fn invalid_playback_speed_fails_before_setup() {
    let log = CallLog::new();
    let chain = ProcessorChain::new().with(RecordingProcessor::new("sink", &log));
    let capture = tempfile::NamedTempFile::new().unwrap();

    let mut hub = DatagramHub::bind_to(loopback()).await.unwrap();
    let source = Source::Playback {
        controller: PlaybackController::new("/bin/sh"),
        capture: capture.path().to_path_buf(),
        options: PlaybackOptions::default().with_speed(-1.0),
    };
    let err = hub.run(chain, source, CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, GseError::Configuration { .. }));
    assert_eq!(hub.state(), HubState::Bound);
    assert!(log.entries().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn playback_completion_closes_after_grace_period() {
    let log = CallLog::new();
    let chain = ProcessorChain::new().with(RecordingProcessor::new("sink", &log));

    // /bin/sh runs the "capture" as a script; it exits immediately
    let capture = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(capture.path(), "echo replayed \"$@\"\n").unwrap();

    let mut hub = DatagramHub::new(HubConfig::new(loopback()).with_grace_period(Duration::from_millis(50)));
    let port = hub.bind().await.unwrap().port();
    let source = Source::Playback {
        controller: PlaybackController::new("/bin/sh"),
        capture: capture.path().to_path_buf(),
        options: PlaybackOptions::default().with_speed(2.0),
    };

    let exit = tokio::time::timeout(TIMEOUT, hub.run(chain, source, CancellationToken::new()))
        .await
        .expect("playback run within timeout")
        .unwrap();

    match exit {
        HubExit::PlaybackComplete(outcome) => {
            assert!(outcome.status.success());
            assert_eq!(outcome.stdout.trim(), format!("replayed -p {port} -s 2"));
        }
        other => panic!("expected playback completion, got {other:?}"),
    }
    assert_eq!(hub.state(), HubState::Closed);
    assert_eq!(log.entries(), vec!["sink:setup", "sink:close"]);
}

#[cfg(unix)]
#[tokio::test]
async fn cancellation_during_playback_still_closes() {
    let log = CallLog::new();
    let chain = ProcessorChain::new().with(RecordingProcessor::new("sink", &log));

    let capture = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(capture.path(), "sleep 30\n").unwrap();

    let mut hub = DatagramHub::bind_to(loopback()).await.unwrap();
    let source = Source::Playback {
        controller: PlaybackController::new("/bin/sh"),
        capture: capture.path().to_path_buf(),
        options: PlaybackOptions::default(),
    };

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let exit = tokio::time::timeout(TIMEOUT, hub.run(chain, source, cancel)).await.unwrap().unwrap();
    assert!(matches!(exit, HubExit::Cancelled));
    assert_eq!(hub.state(), HubState::Closed);
    assert_eq!(log.entries(), vec!["sink:setup", "sink:close"]);
}
