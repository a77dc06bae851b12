//! Byte accumulator for protocol capture
//!
//! Append-only byte queue, consumed destructively from the front. Bytes are
//! never reordered or dropped, and a wait that times out consumes nothing.
//! Waiters are woken on every append rather than polling.

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Growable byte buffer with bounded-wait extraction
#[derive(Debug, Default)]
pub struct ByteAccumulator {
    buffer: Mutex<BytesMut>,
    appended: Notify,
}

impl ByteAccumulator {
    /// Create an empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and wake any waiter
    pub fn append(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.buffer.lock().extend_from_slice(data);
        self.appended.notify_waiters();
    }

    /// Number of queued bytes
    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Check if nothing is queued
    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }

    /// Discard everything queued
    pub fn reset(&self) {
        self.buffer.lock().clear();
    }

    /// Remove and return everything queued
    pub fn drain(&self) -> Bytes {
        self.buffer.lock().split().freeze()
    }

    /// Remove exactly `n` bytes if that many are queued
    pub fn try_take(&self, n: usize) -> Option<Bytes> {
        let mut buffer = self.buffer.lock();
        (buffer.len() >= n).then(|| buffer.split_to(n).freeze())
    }

    /// Remove everything up to and including the first `marker`, returning it
    /// as text. The cut is made on the byte offset of the match, so multi-byte
    /// characters before the marker are never split.
    pub fn try_take_until(&self, marker: &[u8]) -> Option<String> {
        let mut buffer = self.buffer.lock();
        let end = find(&buffer, marker)? + marker.len();
        let taken = buffer.split_to(end);
        Some(String::from_utf8_lossy(&taken).into_owned())
    }

    /// Wait up to `timeout` for `n` bytes. `None` means timed out, in which
    /// case nothing was consumed.
    pub async fn take(&self, n: usize, timeout: Duration) -> Option<Bytes> {
        self.wait_for(timeout, || self.try_take(n)).await
    }

    /// Wait up to `timeout` for `marker` to appear. `None` means timed out,
    /// in which case nothing was consumed.
    pub async fn take_until(&self, marker: &str, timeout: Duration) -> Option<String> {
        self.wait_for(timeout, || self.try_take_until(marker.as_bytes())).await
    }

    async fn wait_for<T>(
        &self,
        timeout: Duration,
        mut attempt: impl FnMut() -> Option<T>,
    ) -> Option<T> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register before checking so an append between the check and
            // the await still wakes us.
            let appended = self.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            if let Some(value) = attempt() {
                return Some(value);
            }
            if tokio::time::timeout_at(deadline, appended).await.is_err() {
                return None;
            }
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const SHORT: Duration = Duration::from_millis(50);

    #[test]
    fn test_try_take_preserves_remainder() {
        let acc = ByteAccumulator::new();
        acc.append(b"R\x01\x40\x00\x01");
        assert_eq!(&acc.try_take(2).unwrap()[..], b"R\x01");
        assert_eq!(&acc.try_take(2).unwrap()[..], &[0x40, 0x00]);
        assert_eq!(acc.len(), 1);
        assert!(acc.try_take(2).is_none());
        assert_eq!(acc.len(), 1);
    }

    #[test]
    fn test_take_until_cuts_on_byte_offset() {
        let acc = ByteAccumulator::new();
        acc.append("héllo>rest".as_bytes());
        assert_eq!(acc.try_take_until(b">").unwrap(), "héllo>");
        assert_eq!(&acc.drain()[..], b"rest");
    }

    #[tokio::test]
    async fn test_take_times_out_without_consuming() {
        let acc = ByteAccumulator::new();
        acc.append(b"a");
        assert!(acc.take(3, SHORT).await.is_none());
        assert_eq!(acc.len(), 1);

        acc.append(b"bc");
        assert_eq!(&acc.take(3, SHORT).await.unwrap()[..], b"abc");
        assert!(acc.is_empty());
    }

    #[tokio::test]
    async fn test_take_until_times_out_without_consuming() {
        let acc = ByteAccumulator::new();
        acc.append(b"raw REPL; CTRL-B to exit\r\n");
        assert!(acc.take_until(">", SHORT).await.is_none());
        assert_eq!(acc.len(), 26);
    }

    #[tokio::test]
    async fn test_take_wakes_on_append() {
        let acc = Arc::new(ByteAccumulator::new());
        let writer = Arc::clone(&acc);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.append(b"\x01");
        });

        let byte = acc.take(1, Duration::from_secs(2)).await.unwrap();
        assert_eq!(&byte[..], &[0x01]);
    }

    #[tokio::test]
    async fn test_pending_take_completes_on_append() {
        let acc = ByteAccumulator::new();
        let mut take = tokio_test::task::spawn(acc.take(2, Duration::from_secs(5)));
        tokio_test::assert_pending!(take.poll());

        acc.append(b"R");
        assert!(take.is_woken());
        tokio_test::assert_pending!(take.poll());

        acc.append(b"\x00");
        let bytes = tokio_test::assert_ready!(take.poll());
        assert_eq!(&bytes.unwrap()[..], b"R\x00");
    }

    #[tokio::test]
    async fn test_take_zero_is_immediate() {
        let acc = ByteAccumulator::new();
        assert!(acc.take(0, SHORT).await.unwrap().is_empty());
    }
}
