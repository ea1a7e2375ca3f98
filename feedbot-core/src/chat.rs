use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::error::ChatError;

/// Events the pipeline consumes from the chat transport.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    Connected,
    Disconnected,
    /// Someone joined a channel; the orchestrator cares about self-joins.
    Joined { nick: String, channel: String },
    /// Inbound PRIVMSG.
    Message {
        nick: String,
        ident: String,
        host: String,
        target: String,
        text: String,
    },
}

/// One outbound chat line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMsg {
    pub target: String,
    pub text: String,
}

/// Cloneable sender side of the chat transport. The transport (or a test)
/// owns the receiving end and the connected flag.
#[derive(Debug, Clone)]
pub struct ChatHandle {
    outbound: mpsc::UnboundedSender<OutboundMsg>,
    connected: Arc<AtomicBool>,
}

impl ChatHandle {
    /// A handle plus the queue of messages sent through it. The handle
    /// starts connected; a real transport flips the flag as it goes.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundMsg>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            outbound: tx,
            connected: Arc::new(AtomicBool::new(true)),
        };
        (handle, rx)
    }

    pub fn send_message(&self, target: &str, text: &str) -> Result<(), ChatError> {
        self.outbound
            .send(OutboundMsg {
                target: target.to_string(),
                text: text.to_string(),
            })
            .map_err(|_| ChatError::Disconnected)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

/// Best-effort alerts: log plus a message to the alerts channel. Alerts are
/// not subject to the global send token.
#[derive(Debug, Clone)]
pub struct Alerter {
    chat: ChatHandle,
    channel: String,
}

impl Alerter {
    pub fn new(chat: ChatHandle, channel: String) -> Self {
        Self { chat, channel }
    }

    pub fn alert(&self, msg: &str) {
        error!("{msg}");
        let _ = self.chat.send_message(&self.channel, msg);
    }

    pub fn alert_warn(&self, msg: &str) {
        warn!("{msg}");
        let _ = self.chat.send_message(&self.channel, msg);
    }
}
