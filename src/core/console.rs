//! Console shell
//!
//! Thin pass-through between an interactive terminal and the device. Always
//! available, but mute while a raw REPL session owns the wire.

use super::error::LinkError;
use super::link::LinkShared;
use std::sync::Arc;

/// Console consumer handle
#[derive(Clone)]
pub struct ConsoleShell {
    shared: Arc<LinkShared>,
}

impl ConsoleShell {
    pub(crate) fn new(shared: Arc<LinkShared>) -> Self {
        Self { shared }
    }

    /// Send keystrokes/text to the device. Dropped, without error, while a
    /// session is active.
    pub async fn send(&self, text: &str) -> Result<(), LinkError> {
        if self.shared.session_active() {
            tracing::debug!(len = text.len(), "console input dropped while session active");
            return Ok(());
        }
        self.shared.write_all(text.as_bytes()).await
    }

    /// Install the consumer for device output routed to the console
    pub fn on_data<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.shared.router.set_console_sink(Some(Arc::new(callback)));
    }

    /// Remove the console consumer
    pub fn clear_on_data(&self) {
        self.shared.router.set_console_sink(None);
    }

    /// Terminal size change. Accepted for interface parity; the device
    /// protocol has no way to carry it.
    pub fn resize(&self, cols: Option<u16>, rows: Option<u16>) {
        tracing::trace!(?cols, ?rows, "console resize ignored");
    }
}

impl std::fmt::Debug for ConsoleShell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleShell")
            .field("session_active", &self.shared.session_active())
            .finish()
    }
}
