//! Shared helpers for link integration tests

#![allow(dead_code)]

use parking_lot::Mutex;
use replink_core::{DeviceLink, DeviceSimulator, LinkTimings, MockTransport};
use std::sync::Arc;
use std::time::Duration;

/// No fixed pauses, short bounded waits
pub fn fast_timings() -> LinkTimings {
    LinkTimings {
        raw_entry_timeout_ms: 500,
        probe_timeout_ms: 200,
        legacy_prompt_timeout_ms: 200,
        flow_timeout_ms: 500,
        exec_timeout_ms: 1000,
        ..LinkTimings::default()
    }
    .without_pauses()
}

/// Connect a link to a simulated interpreter
pub async fn connect(device: DeviceSimulator) -> (DeviceLink, Arc<MockTransport>) {
    let mock = Arc::new(device.into_transport());
    let link = DeviceLink::with_timings(mock.clone(), fast_timings());
    link.connect().await.unwrap();
    (link, mock)
}

/// Text sink recording everything delivered to it
pub fn collector() -> (Arc<Mutex<String>>, impl Fn(&str) + Send + Sync + 'static) {
    let text = Arc::new(Mutex::new(String::new()));
    let sink = {
        let text = Arc::clone(&text);
        move |chunk: &str| text.lock().push_str(chunk)
    };
    (text, sink)
}

/// Poll `check` until it holds, failing the test after two seconds
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Every write as an owned byte vector
pub fn writes(mock: &MockTransport) -> Vec<Vec<u8>> {
    mock.writes().iter().map(|w| w.to_vec()).collect()
}
