//! Incoming message rendering and delivery progress
//!
//! [`MessageRenderer`] is the handler behind
//! [`ChatGotMessage`](crate::events::EngineEvent::ChatGotMessage) and
//! [`ChatDidDeliverMessage`](crate::events::EngineEvent::ChatDidDeliverMessage).
//! Chunks arriving on an incoming file stream are offered to the
//! reassembler first; whatever it declines (content wrapped for another
//! purpose) is rendered as an ordinary chat line and logged to the
//! session's history file.

use std::sync::Arc;

use chrono::{DateTime, Local, Utc};

use crate::console::Console;
use crate::engine::{SessionId, SipAddress, StreamId, StreamKind};
use crate::manager::SessionManager;
use crate::transfer::{ChunkDisposition, FileTransferReassembler, MessageChunk, TransferProgress};

/// Renders incoming chat traffic and tracks outbound delivery progress
pub struct MessageRenderer {
    console: Arc<dyn Console>,
    manager: Arc<SessionManager>,
    reassembler: Arc<FileTransferReassembler>,
    progress: TransferProgress,
}

impl MessageRenderer {
    /// Create a renderer
    pub fn new(
        console: Arc<dyn Console>,
        manager: Arc<SessionManager>,
        reassembler: Arc<FileTransferReassembler>,
        progress: TransferProgress,
    ) -> Arc<Self> {
        Arc::new(Self {
            console,
            manager,
            reassembler,
            progress,
        })
    }

    /// Handle one incoming chunk
    pub fn on_chat_message(
        &self,
        session: SessionId,
        stream: StreamId,
        chunk: &MessageChunk,
        sender: Option<&SipAddress>,
        timestamp: Option<DateTime<Utc>>,
    ) {
        let Some(controller) = self.manager.find(session) else {
            tracing::debug!(%session, "chat chunk for an untracked session");
            return;
        };

        if let Some(attached) = controller.stream(stream) {
            if attached.kind == StreamKind::FileIncoming {
                if let Some(selector) = &attached.selector {
                    match self.reassembler.handle_chunk(stream, selector, chunk) {
                        Ok(ChunkDisposition::Consumed) => {
                            // Progress moved; the prompt shows percentages.
                            self.manager.update_prompt();
                            return;
                        }
                        Ok(ChunkDisposition::NotFilePayload) => {}
                        Err(error) => {
                            self.console
                                .print(&format!("File transfer error: {}", error));
                            return;
                        }
                    }
                }
            }
        }

        match std::str::from_utf8(&chunk.payload) {
            Ok(text) => {
                let from = sender.unwrap_or_else(|| controller.remote_party());
                let line = format_incoming_message(text, from, timestamp);
                self.console.print(&line);
                controller.append_history(&line);
            }
            Err(_) => {
                self.console.print(&format!(
                    "Failed to parse incoming message, content_type={:?}",
                    chunk.content_type
                ));
            }
        }
    }

    /// Handle a delivery report for an outbound chunk
    pub fn on_message_delivered(&self, stream: StreamId, range_end: u64) {
        self.progress.record_delivered(stream, range_end);
        self.manager.update_prompt();
    }
}

/// Format a timestamp in the local timezone
///
/// Same-day timestamps render as time only; older ones carry the date too.
pub fn format_datetime(timestamp: DateTime<Utc>) -> String {
    let local = timestamp.with_timezone(&Local);
    if local.date_naive() == Local::now().date_naive() {
        local.format("%X").to_string()
    } else {
        local.format("%X %x").to_string()
    }
}

/// Format an incoming chat line
pub fn format_incoming_message(
    text: &str,
    sender: &SipAddress,
    timestamp: Option<DateTime<Utc>>,
) -> String {
    match timestamp {
        Some(at) => format!("{} {}: {}", format_datetime(at), sender, text),
        None => format!("{}: {}", sender, text),
    }
}

/// Format an outgoing chat line
pub fn format_outgoing_message(
    local: &SipAddress,
    text: &str,
    timestamp: DateTime<Utc>,
) -> String {
    format!("{} {}: {}", format_datetime(timestamp), local, text)
}
