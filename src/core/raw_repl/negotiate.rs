//! Raw REPL entry and raw-paste capability probe
//!
//! `Idle -> EnterRawRepl -> ProbeRawPaste -> {Confirmed | Declined | Legacy}`.
//! Only a missing raw REPL prompt is fatal; every unclear probe reply falls
//! back to plain raw mode.

use super::{
    ProbeOutcome, SessionCapability, ENTER_RAW, LEGACY_PROMPT_PREFIX, RAW_PASTE_ACK,
    RAW_PASTE_DECLINE, RAW_PASTE_PROBE, RAW_PROMPT, RAW_REPL_BANNER,
};
use crate::core::codec::escape_control;
use crate::core::error::LinkError;
use crate::core::link::LinkShared;
use crate::core::routing::RoutingMode;
use tokio::time::Instant;

/// Run the whole handshake. Leaves the router in protocol capture; the
/// caller decides where routing goes next.
pub(crate) async fn negotiate(shared: &LinkShared) -> Result<SessionCapability, LinkError> {
    enter_raw_repl(shared).await?;
    let probe = probe_raw_paste(shared).await?;
    Ok(SessionCapability::from(probe))
}

async fn enter_raw_repl(shared: &LinkShared) -> Result<(), LinkError> {
    let router = &shared.router;
    let accumulator = router.accumulator();

    router.set_mode(RoutingMode::ProtocolCapture);
    accumulator.reset();
    shared.write_all(&[ENTER_RAW]).await?;

    // Prompts from the wake sequence can still be in flight; skip any '>'
    // that does not close the raw REPL banner.
    let deadline = Instant::now() + shared.timings.raw_entry_timeout();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let Some(captured) = accumulator.take_until(RAW_PROMPT, remaining).await else {
            return Err(LinkError::HandshakeTimeout);
        };

        if captured.contains(RAW_REPL_BANNER) {
            tracing::debug!(banner = %escape_control(&captured), "entered raw REPL");
            return Ok(());
        }
        tracing::trace!(
            skipped = %escape_control(&captured),
            "stale prompt before raw REPL banner"
        );
    }
}

/// Send the raw-paste probe and classify the reply. Expects capture to be
/// engaged. Never fails on an unexpected or missing reply.
pub(crate) async fn probe_raw_paste(shared: &LinkShared) -> Result<ProbeOutcome, LinkError> {
    let accumulator = shared.router.accumulator();
    let timeout = shared.timings.probe_timeout();

    shared.write_all(&RAW_PASTE_PROBE).await?;

    let Some(reply) = accumulator.take(2, timeout).await else {
        tracing::warn!("No reply to raw-paste probe, using plain raw mode");
        return Ok(ProbeOutcome::LegacyDevice);
    };

    match [reply[0], reply[1]] {
        RAW_PASTE_ACK => {
            let Some(window) = accumulator.take(2, timeout).await else {
                tracing::warn!("Raw-paste window size missing, using plain raw mode");
                return Ok(ProbeOutcome::LegacyDevice);
            };
            let window_size = u16::from_le_bytes([window[0], window[1]]);

            // The device opens the first window with a flow-control byte
            if accumulator.take(1, timeout).await.is_none() {
                tracing::debug!("Initial raw-paste flow-control byte not seen");
            }

            tracing::debug!(window_size, "raw-paste supported");
            Ok(ProbeOutcome::RawPasteConfirmed { window_size })
        }
        RAW_PASTE_DECLINE => {
            tracing::debug!("raw-paste disabled on device");
            Ok(ProbeOutcome::RawPasteDeclined)
        }
        LEGACY_PROMPT_PREFIX => {
            // Old firmware re-entered raw mode and is printing its banner
            let timeout = shared.timings.legacy_prompt_timeout();
            if accumulator.take_until(RAW_PROMPT, timeout).await.is_none() {
                tracing::debug!("Legacy prompt did not complete");
            }
            tracing::debug!("legacy device, no raw-paste");
            Ok(ProbeOutcome::LegacyDevice)
        }
        other => {
            tracing::warn!(
                reply = %hex::encode(other),
                "Unrecognised raw-paste probe reply, using plain raw mode"
            );
            Ok(ProbeOutcome::LegacyDevice)
        }
    }
}
