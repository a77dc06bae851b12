//! Raw REPL sessions against a simulated interpreter

mod common;

use common::{collector, connect, fast_timings, wait_until, writes};
use replink_core::core::raw_repl::{END_OF_DATA, ENTER_RAW, EXIT_RAW, RAW_PASTE_PROBE};
use replink_core::{
    DeviceLink, DeviceSimulator, LinkError, LinkEvent, MockTransport, ProbeOutcome,
    RawPasteSupport, RoutingMode, SimulatorConfig, TransferMode, TransportError,
};
use std::sync::Arc;
use std::time::Duration;

fn payload(len: usize) -> String {
    (0..len).map(|i| char::from(b'a' + (i % 26) as u8)).collect()
}

#[tokio::test]
async fn test_raw_paste_chunks_never_exceed_window() {
    let program = payload(100);

    for window in [0u16, 1, 3, 7, 64, 100, 300] {
        let device =
            DeviceSimulator::with_raw_paste(RawPasteSupport::Enabled { window_size: window });
        let programs = device.program_log();
        let (link, mock) = connect(device).await;

        let session = link.open_session("run").await.unwrap();
        assert!(session.capability().use_raw_paste);
        assert_eq!(session.capability().window_size, window);

        mock.clear_writes();
        let report = session.send(&program).await.unwrap();
        assert!(report.is_complete(), "window {window}");
        assert!(report.acknowledged, "window {window}");
        assert_eq!(report.mode, TransferMode::RawPaste { window_size: window });

        let writes = writes(&mock);
        let (last, chunks) = writes.split_last().unwrap();
        assert_eq!(last, &vec![END_OF_DATA]);

        let limit = usize::from(window).max(1);
        assert!(
            chunks.iter().all(|c| !c.is_empty() && c.len() <= limit),
            "window {window}: chunk sizes {:?}",
            chunks.iter().map(Vec::len).collect::<Vec<_>>()
        );
        assert_eq!(chunks.concat(), program.as_bytes(), "window {window}");

        session.close().await.unwrap();
        assert_eq!(programs.lock().as_slice(), [program.clone()]);
        link.disconnect().await.unwrap();
    }
}

#[tokio::test]
async fn test_window_size_is_little_endian() {
    let mock = Arc::new(MockTransport::with_responder(|data| match data {
        [ENTER_RAW] => b"raw REPL; CTRL-B to exit\r\n>".to_vec(),
        d if d == RAW_PASTE_PROBE => vec![b'R', 0x01, 0x40, 0x00, 0x01],
        _ => Vec::new(),
    }));
    let link = DeviceLink::with_timings(mock, fast_timings());
    link.connect().await.unwrap();

    let session = link.open_session("run").await.unwrap();
    let capability = session.capability();
    assert!(capability.use_raw_paste);
    assert_eq!(capability.window_size, 64);
    assert_eq!(capability.probe, ProbeOutcome::RawPasteConfirmed { window_size: 64 });
}

#[tokio::test]
async fn test_declined_probe_uses_plain_raw_mode() {
    let device = DeviceSimulator::new(SimulatorConfig {
        raw_paste: RawPasteSupport::Disabled,
        program_output: "2\r\n".to_string(),
        ..SimulatorConfig::default()
    });
    let (link, mock) = connect(device).await;

    let session = link.open_session("run").await.unwrap();
    assert!(!session.capability().use_raw_paste);
    assert_eq!(session.capability().probe, ProbeOutcome::RawPasteDeclined);

    mock.clear_writes();
    let report = session.send("print(1 + 1)").await.unwrap();
    assert_eq!(report.mode, TransferMode::Plain);
    assert!(!report.acknowledged);
    assert_eq!(
        writes(&mock),
        vec![b"print(1 + 1)".to_vec(), vec![END_OF_DATA]]
    );

    let output = session.exec("print(1 + 1)").await.unwrap();
    assert_eq!(output.stdout, "2\r\n");
    assert!(!output.is_error());
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_legacy_reply_falls_back_without_error() {
    let device = DeviceSimulator::new(SimulatorConfig {
        raw_paste: RawPasteSupport::Legacy,
        program_output: "legacy\r\n".to_string(),
        ..SimulatorConfig::default()
    });
    let (link, _mock) = connect(device).await;

    let session = link.open_session("run").await.unwrap();
    assert!(!session.capability().use_raw_paste);
    assert_eq!(session.capability().probe, ProbeOutcome::LegacyDevice);

    let output = session.exec("print('legacy')").await.unwrap();
    assert_eq!(output.stdout, "legacy\r\n");
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_silent_and_garbled_probes_are_legacy() {
    for support in [RawPasteSupport::Silent, RawPasteSupport::Garbled] {
        let (link, _mock) = connect(DeviceSimulator::with_raw_paste(support)).await;
        let session = link.open_session("run").await.unwrap();
        assert_eq!(session.capability().probe, ProbeOutcome::LegacyDevice, "{support:?}");
        assert!(!session.capability().use_raw_paste);
        session.close().await.unwrap();
    }
}

#[tokio::test]
async fn test_second_session_is_rejected() {
    let device = DeviceSimulator::new(SimulatorConfig {
        program_output: "ok\r\n".to_string(),
        ..SimulatorConfig::default()
    });
    let (link, mock) = connect(device).await;

    let first = link.open_session("first").await.unwrap();
    mock.clear_writes();

    assert!(matches!(
        link.open_session("second").await,
        Err(LinkError::SessionAlreadyActive)
    ));
    assert!(mock.writes().is_empty());
    assert_eq!(link.busy_status().unwrap().reason, "first");

    let output = first.exec("print('ok')").await.unwrap();
    assert_eq!(output.stdout, "ok\r\n");
    first.close().await.unwrap();

    let again = link.open_session("second").await.unwrap();
    again.close().await.unwrap();
}

#[tokio::test]
async fn test_end_to_end_write_sequence() {
    let (link, mock) = connect(DeviceSimulator::default()).await;
    mock.clear_writes();
    assert!(link.busy_status().is_none());

    let session = link.open_session("run").await.unwrap();
    assert_eq!(link.busy_status().unwrap().reason, "run");
    assert_eq!(link.routing_mode(), RoutingMode::Session);

    session.send("print(1)\n").await.unwrap();
    session.close().await.unwrap();

    assert_eq!(
        writes(&mock),
        vec![
            vec![ENTER_RAW],
            RAW_PASTE_PROBE.to_vec(),
            b"print(1)\n".to_vec(),
            vec![END_OF_DATA],
            vec![EXIT_RAW],
        ]
    );
    assert!(link.busy_status().is_none());
    assert!(!link.session_active());
    assert_eq!(link.routing_mode(), RoutingMode::Console);
}

#[tokio::test]
async fn test_device_abort_stops_transfer() {
    let device = DeviceSimulator::new(SimulatorConfig {
        raw_paste: RawPasteSupport::Enabled { window_size: 8 },
        abort_after: Some(3),
        ..SimulatorConfig::default()
    });
    let programs = device.program_log();
    let (link, _mock) = connect(device).await;
    let session = link.open_session("run").await.unwrap();

    let report = session.send(&payload(20)).await.unwrap();
    assert!(report.aborted);
    assert!(report.acknowledged);
    assert_eq!(report.bytes_sent, 8);
    assert!(!report.is_complete());
    assert!(matches!(
        report.into_result(),
        Err(LinkError::DeviceAbort { sent: 8, total: 20 })
    ));

    session.close().await.unwrap();
    assert!(programs.lock().is_empty());
    assert!(link.busy_status().is_none());
}

#[tokio::test]
async fn test_abort_in_final_window_is_not_the_ack() {
    let device = DeviceSimulator::new(SimulatorConfig {
        raw_paste: RawPasteSupport::Enabled { window_size: 8 },
        abort_after: Some(3),
        ..SimulatorConfig::default()
    });
    let (link, _mock) = connect(device).await;
    let session = link.open_session("run").await.unwrap();
    let (output, sink) = collector();
    session.on_data(sink);

    // The whole payload fits in the first window
    let report = session.send(&payload(6)).await.unwrap();
    assert!(report.aborted);
    assert!(report.acknowledged);
    assert_eq!(report.bytes_sent, 6);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(output.lock().is_empty());
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_failed_send_still_allows_close() {
    let (link, mock) = connect(DeviceSimulator::default()).await;
    let session = link.open_session("run").await.unwrap();

    mock.set_fail_writes(true);
    let err = session.send("print(1)").await.unwrap_err();
    assert!(matches!(err, LinkError::PortIo(TransportError::SendError(_))));
    assert_eq!(link.routing_mode(), RoutingMode::Session);

    mock.set_fail_writes(false);
    session.close().await.unwrap();
    assert!(!link.session_active());
    assert!(link.busy_status().is_none());
    assert_eq!(link.routing_mode(), RoutingMode::Console);
}

#[tokio::test]
async fn test_failed_exit_write_still_releases() {
    let (link, mock) = connect(DeviceSimulator::default()).await;
    let session = link.open_session("run").await.unwrap();

    mock.set_fail_writes(true);
    assert!(session.close().await.is_err());
    assert!(!link.session_active());
    assert!(link.busy_status().is_none());
    assert_eq!(link.routing_mode(), RoutingMode::Console);
}

#[tokio::test]
async fn test_exec_collects_output_and_errors() {
    let device = DeviceSimulator::new(SimulatorConfig {
        raw_paste: RawPasteSupport::Enabled { window_size: 32 },
        program_output: "hello\r\n".to_string(),
        program_error: "Traceback (most recent call last):\r\nNameError\r\n".to_string(),
        ..SimulatorConfig::default()
    });
    let (link, _mock) = connect(device).await;
    let session = link.open_session("exec").await.unwrap();

    let output = session.exec(&payload(70)).await.unwrap();
    assert_eq!(output.stdout, "hello\r\n");
    assert!(output.is_error());
    assert!(output.stderr.starts_with("Traceback"));
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_second_transfer_probes_again() {
    let device = DeviceSimulator::default();
    let programs = device.program_log();
    let (link, mock) = connect(device).await;
    let session = link.open_session("run").await.unwrap();

    session.exec("a = 1").await.unwrap();
    mock.clear_writes();
    let output = session.exec("print(a)").await.unwrap();
    assert!(!output.is_error());

    let writes = writes(&mock);
    assert_eq!(writes[0], RAW_PASTE_PROBE.to_vec());
    assert_eq!(writes[1], b"print(a)".to_vec());
    assert_eq!(programs.lock().as_slice(), ["a = 1", "print(a)"]);
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_plain_fallback_exec_strips_ok() {
    let mut raw = false;
    let mut probes = 0;
    let mut pasting = false;
    let mock = Arc::new(MockTransport::with_responder(move |data| match data {
        [ENTER_RAW] => {
            raw = true;
            b"raw REPL; CTRL-B to exit\r\n>".to_vec()
        }
        d if d == RAW_PASTE_PROBE => {
            probes += 1;
            if probes == 1 {
                pasting = true;
                vec![b'R', 0x01, 0x80, 0x00, 0x01]
            } else {
                b"R\x00".to_vec()
            }
        }
        [END_OF_DATA] if pasting => {
            pasting = false;
            b"\x04first\x04\x04>".to_vec()
        }
        [END_OF_DATA] if raw => b"OKsecond\x04\x04>".to_vec(),
        _ => Vec::new(),
    }));
    let link = DeviceLink::with_timings(mock, fast_timings());
    link.connect().await.unwrap();
    let session = link.open_session("run").await.unwrap();
    assert!(session.capability().use_raw_paste);

    assert_eq!(session.exec("print('first')").await.unwrap().stdout, "first");
    // Raw-paste is declined this time, so the device answers with OK first
    assert_eq!(session.exec("print('second')").await.unwrap().stdout, "second");
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_cancelled_open_rolls_back() {
    let (link, _mock) = connect(DeviceSimulator::with_raw_paste(RawPasteSupport::Silent)).await;

    // A silent device keeps negotiation waiting well past 50 ms
    let opening = tokio::time::timeout(Duration::from_millis(50), link.open_session("run")).await;
    assert!(opening.is_err());
    assert!(!link.session_active());
    assert!(link.busy_status().is_none());
    assert_eq!(link.routing_mode(), RoutingMode::Console);

    let session = link.open_session("run").await.unwrap();
    assert_eq!(session.capability().probe, ProbeOutcome::LegacyDevice);
    session.close().await.unwrap();
    assert!(link.busy_status().is_none());
}

#[tokio::test]
async fn test_cancelled_send_returns_routing_to_session() {
    // Acknowledges raw-paste with a 4-byte window, then never grants more
    let mock = Arc::new(MockTransport::with_responder(|data| match data {
        [ENTER_RAW] => b"raw REPL; CTRL-B to exit\r\n>".to_vec(),
        d if d == RAW_PASTE_PROBE => vec![b'R', 0x01, 0x04, 0x00, 0x01],
        _ => Vec::new(),
    }));
    let link = DeviceLink::with_timings(mock.clone(), fast_timings());
    link.connect().await.unwrap();
    let session = link.open_session("run").await.unwrap();
    let (output, sink) = collector();
    session.on_data(sink);

    let sending = tokio::time::timeout(Duration::from_millis(50), session.send(&payload(10))).await;
    assert!(sending.is_err());
    assert_eq!(link.routing_mode(), RoutingMode::Session);
    assert!(session.is_active());

    mock.inject(b"late output");
    wait_until(|| output.lock().as_str() == "late output").await;

    session.close().await.unwrap();
    assert!(link.busy_status().is_none());
    assert!(!link.session_active());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_opens_admit_exactly_one() {
    let (link, _mock) = connect(DeviceSimulator::default()).await;

    let first = tokio::spawn({
        let link = link.clone();
        async move { link.open_session("a").await }
    });
    let second = tokio::spawn({
        let link = link.clone();
        async move { link.open_session("b").await }
    });
    let (first, second) = tokio::join!(first, second);

    let (session, rejected) = match (first.unwrap(), second.unwrap()) {
        (Ok(session), Err(e)) | (Err(e), Ok(session)) => (session, e),
        other => panic!("expected exactly one session, got {:?}", other),
    };
    assert!(matches!(rejected, LinkError::SessionAlreadyActive));
    assert_eq!(link.busy_status().unwrap().reason, session.reason());

    session.close().await.unwrap();
    assert!(link.busy_status().is_none());
    assert!(!link.session_active());
}

#[tokio::test]
async fn test_disconnect_during_open_fails_cleanly() {
    let (link, _mock) = connect(DeviceSimulator::with_raw_paste(RawPasteSupport::Silent)).await;

    let opening = tokio::spawn({
        let link = link.clone();
        async move { link.open_session("run").await.map(|_| ()) }
    });

    // Negotiation is still waiting on the silent device
    tokio::time::sleep(Duration::from_millis(50)).await;
    link.disconnect().await.unwrap();

    assert!(matches!(
        opening.await.unwrap(),
        Err(LinkError::NotConnected)
    ));
    assert!(link.busy_status().is_none());
    assert!(!link.session_active());
    assert_eq!(link.routing_mode(), RoutingMode::Console);
}

#[tokio::test]
async fn test_handshake_timeout_rolls_back() {
    let device = DeviceSimulator::new(SimulatorConfig {
        refuse_raw: true,
        ..SimulatorConfig::default()
    });
    let (link, _mock) = connect(device).await;

    assert!(matches!(
        link.open_session("run").await,
        Err(LinkError::HandshakeTimeout)
    ));
    assert!(link.busy_status().is_none());
    assert!(!link.session_active());
    assert_eq!(link.routing_mode(), RoutingMode::Console);

    // Exclusivity was released: the next attempt negotiates again
    assert!(matches!(
        link.open_session("run").await,
        Err(LinkError::HandshakeTimeout)
    ));
}

#[tokio::test]
async fn test_disconnect_mid_session_releases_everything() {
    let (link, _mock) = connect(DeviceSimulator::default()).await;
    let session = link.open_session("run").await.unwrap();

    link.disconnect().await.unwrap();
    assert!(link.busy_status().is_none());
    assert!(!link.session_active());
    assert!(!session.is_active());
    assert!(matches!(session.send("x").await, Err(LinkError::NotConnected)));
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_dropped_session_releases() {
    let (link, _mock) = connect(DeviceSimulator::default()).await;
    let session = link.open_session("run").await.unwrap();
    drop(session);

    assert!(!link.session_active());
    assert!(link.busy_status().is_none());
    assert_eq!(link.routing_mode(), RoutingMode::Console);
}

#[tokio::test]
async fn test_session_events_and_busy_watch() {
    let (link, _mock) = connect(DeviceSimulator::default()).await;
    let mut events = link.subscribe();
    let busy = link.watch_busy();

    let session = link.open_session("sync").await.unwrap();
    assert_eq!(busy.borrow().as_ref().map(|b| b.reason.clone()).as_deref(), Some("sync"));
    session.close().await.unwrap();
    assert!(busy.borrow().is_none());

    let mut opened = false;
    let mut closed = false;
    while let Ok(event) = events.try_recv() {
        match event {
            LinkEvent::SessionOpened { reason, capability } => {
                assert_eq!(reason, "sync");
                assert!(capability.use_raw_paste);
                opened = true;
            }
            LinkEvent::SessionClosed { reason } => {
                assert_eq!(reason, "sync");
                closed = true;
            }
            _ => {}
        }
    }
    assert!(opened && closed);
}
