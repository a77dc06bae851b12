//! Program transfer
//!
//! Plain raw mode writes the program and an end-of-data byte and returns.
//! Raw-paste writes at most one window at a time and waits for the device's
//! flow-control byte before the next one.

use super::{END_OF_DATA, FLOW_ABORT, FLOW_CONTINUE};
use crate::core::accumulator::ByteAccumulator;
use crate::core::error::LinkError;
use crate::core::link::LinkShared;
use crate::core::transport::TransportError;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// How a program was sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransferMode {
    /// Whole program then end-of-data, no acknowledgement
    Plain,
    /// Windowed with flow control
    RawPaste {
        /// Window used for this transfer
        window_size: u16,
    },
}

/// Outcome of one `send`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferReport {
    /// Transfer mode
    pub mode: TransferMode,
    /// Payload length in bytes
    pub payload_len: usize,
    /// Payload bytes written
    pub bytes_sent: usize,
    /// Flow-control bytes waited for
    pub flow_waits: usize,
    /// Device asked to stop early
    pub aborted: bool,
    /// Device acknowledged end of data
    pub acknowledged: bool,
}

impl TransferReport {
    /// Check if every payload byte went out
    pub fn is_complete(&self) -> bool {
        self.bytes_sent == self.payload_len
    }

    /// Turn a device abort into [`LinkError::DeviceAbort`]
    pub fn into_result(self) -> Result<Self, LinkError> {
        if self.aborted {
            Err(LinkError::DeviceAbort {
                sent: self.bytes_sent,
                total: self.payload_len,
            })
        } else {
            Ok(self)
        }
    }
}

/// Plain raw mode: fire and forget
pub(crate) async fn send_plain(
    shared: &LinkShared,
    payload: &[u8],
) -> Result<TransferReport, LinkError> {
    shared.write_all(payload).await?;
    shared.write_all(&[END_OF_DATA]).await?;

    Ok(TransferReport {
        mode: TransferMode::Plain,
        payload_len: payload.len(),
        bytes_sent: payload.len(),
        flow_waits: 0,
        aborted: false,
        acknowledged: false,
    })
}

/// Raw-paste transfer. Expects protocol capture to be engaged so every
/// flow-control byte lands in the accumulator.
///
/// A window of 0 sends one byte at a time, waiting for flow control after
/// each.
pub(crate) async fn send_raw_paste(
    shared: &LinkShared,
    payload: &[u8],
    window_size: u16,
) -> Result<TransferReport, LinkError> {
    let accumulator = shared.router.accumulator();
    let flow_timeout = shared.timings.flow_timeout();
    let window = usize::from(window_size).max(1);

    let mut report = TransferReport {
        mode: TransferMode::RawPaste { window_size },
        payload_len: payload.len(),
        bytes_sent: 0,
        flow_waits: 0,
        aborted: false,
        acknowledged: false,
    };

    let mut remaining = window;
    while report.bytes_sent < payload.len() {
        // Flow bytes already received are consumed before the next write.
        while remaining == 0 || !accumulator.is_empty() {
            let flow = if remaining == 0 {
                report.flow_waits += 1;
                accumulator
                    .take(1, flow_timeout)
                    .await
                    .ok_or(LinkError::FlowControlTimeout)?
            } else {
                match accumulator.try_take(1) {
                    Some(flow) => flow,
                    None => break,
                }
            };
            match flow[0] {
                FLOW_CONTINUE => remaining = remaining.saturating_add(window),
                FLOW_ABORT => {
                    report.aborted = true;
                    break;
                }
                other => return Err(LinkError::UnexpectedFlowByte(other)),
            }
        }
        if report.aborted {
            break;
        }

        let end = (report.bytes_sent + remaining.min(window)).min(payload.len());
        let written = shared.write(&payload[report.bytes_sent..end]).await?;
        if written == 0 {
            return Err(TransportError::SendError("transport accepted no bytes".into()).into());
        }
        report.bytes_sent += written;
        remaining = remaining.saturating_sub(written);
    }

    if !report.aborted {
        // Let the reader hand over a reply to the last chunk.
        tokio::task::yield_now().await;
        report.aborted = take_pending_abort(accumulator)?;
    }
    if report.aborted {
        tracing::debug!(
            sent = report.bytes_sent,
            total = payload.len(),
            "device aborted raw-paste transfer"
        );
    }

    shared.write_all(&[END_OF_DATA]).await?;
    report.acknowledged = await_end_ack(accumulator, flow_timeout).await;

    Ok(report)
}

/// Consume flow bytes received after the last chunk. An abort among them
/// must not be mistaken for the end-of-data ack.
fn take_pending_abort(accumulator: &ByteAccumulator) -> Result<bool, LinkError> {
    while let Some(flow) = accumulator.try_take(1) {
        match flow[0] {
            FLOW_CONTINUE => {}
            FLOW_ABORT => return Ok(true),
            other => return Err(LinkError::UnexpectedFlowByte(other)),
        }
    }
    Ok(false)
}

/// Wait for the end-of-data acknowledgement. A window that closed exactly at
/// the end of the payload leaves a flow-control byte ahead of it.
async fn await_end_ack(accumulator: &ByteAccumulator, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match accumulator.take(1, remaining).await {
            Some(ack) if ack[0] == END_OF_DATA => return true,
            Some(flow) if flow[0] == FLOW_CONTINUE => {
                tracing::trace!("flow-control byte ahead of end-of-data ack");
            }
            Some(other) => {
                tracing::warn!("Unexpected byte 0x{:02x} instead of end-of-data ack", other[0]);
                return false;
            }
            None => {
                tracing::warn!("No end-of-data acknowledgement from device");
                return false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(aborted: bool) -> TransferReport {
        TransferReport {
            mode: TransferMode::RawPaste { window_size: 32 },
            payload_len: 100,
            bytes_sent: if aborted { 64 } else { 100 },
            flow_waits: 2,
            aborted,
            acknowledged: true,
        }
    }

    #[test]
    fn test_pending_abort_after_last_chunk() {
        let accumulator = ByteAccumulator::new();
        accumulator.append(&[FLOW_CONTINUE, FLOW_ABORT]);
        assert!(take_pending_abort(&accumulator).unwrap());

        accumulator.append(&[FLOW_CONTINUE]);
        assert!(!take_pending_abort(&accumulator).unwrap());
        assert!(accumulator.is_empty());

        accumulator.append(b"x");
        assert!(matches!(
            take_pending_abort(&accumulator),
            Err(LinkError::UnexpectedFlowByte(b'x'))
        ));
    }

    #[test]
    fn test_into_result() {
        assert!(report(false).into_result().unwrap().is_complete());
        match report(true).into_result() {
            Err(LinkError::DeviceAbort { sent, total }) => {
                assert_eq!((sent, total), (64, 100));
            }
            other => panic!("expected DeviceAbort, got {:?}", other),
        }
    }
}
