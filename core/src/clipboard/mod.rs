//! Clipboard push
//!
//! Out-of-band of file transfers. A push is always explicit on the
//! sending side; the receiving side applies it to the OS clipboard
//! automatically only for trusted peers in the Intimate zone, and
//! otherwise just records it in a bounded history the user can apply
//! from later.
//!
//! The OS clipboard itself is an external collaborator behind
//! [`ClipboardSink`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::data::TrustStore;
use crate::distance::DistanceMonitor;
use crate::network::messages::{ClipboardAckMessage, ClipboardPushMessage};
use crate::network::packet::MessageType;
use crate::protocol::config::SeaDropConfig;
use crate::protocol::error::{Error, ErrorKind, Result};
use crate::protocol::events::{ClipboardReceivedEvent, SeaDropEvent};
use crate::protocol::types::{current_timestamp, ClipboardValue, Device, DeviceId, TrustZone};
use crate::session::channel::ChannelWriter;
use crate::transfer::BoxedTransport;

type Writer = ChannelWriter<BoxedTransport>;

/// Access to the OS clipboard, provided by the embedding application.
pub trait ClipboardSink: Send + Sync {
    fn get(&self) -> Result<ClipboardValue>;
    fn set(&self, value: &ClipboardValue) -> Result<()>;
}

/// One received clipboard entry.
#[derive(Debug, Clone)]
pub struct ReceivedClipboard {
    pub value: ClipboardValue,
    pub from: DeviceId,
    pub received_at: i64,
    pub auto_applied: bool,
}

struct Link {
    writer: Writer,
    peer: Device,
}

/// Clipboard push/receive manager.
pub struct ClipboardManager {
    config: SeaDropConfig,
    store: Arc<TrustStore>,
    monitor: Arc<DistanceMonitor>,
    events: tokio::sync::mpsc::Sender<SeaDropEvent>,
    sink: StdMutex<Option<Box<dyn ClipboardSink>>>,
    link: Mutex<Option<Link>>,
    history: StdMutex<VecDeque<ReceivedClipboard>>,
    pending_ack: Mutex<Option<oneshot::Sender<ClipboardAckMessage>>>,
}

impl ClipboardManager {
    pub fn new(
        config: SeaDropConfig,
        store: Arc<TrustStore>,
        monitor: Arc<DistanceMonitor>,
        events: tokio::sync::mpsc::Sender<SeaDropEvent>,
    ) -> Arc<Self> {
        Arc::new(ClipboardManager {
            config,
            store,
            monitor,
            events,
            sink: StdMutex::new(None),
            link: Mutex::new(None),
            history: StdMutex::new(VecDeque::new()),
            pending_ack: Mutex::new(None),
        })
    }

    /// Install the OS clipboard bridge.
    pub fn set_sink(&self, sink: Box<dyn ClipboardSink>) {
        if let Ok(mut slot) = self.sink.lock() {
            *slot = Some(sink);
        }
    }

    pub async fn set_link(&self, writer: Writer, peer: Device) {
        *self.link.lock().await = Some(Link { writer, peer });
    }

    pub async fn clear_link(&self) {
        *self.link.lock().await = None;
        *self.pending_ack.lock().await = None;
    }

    fn read_sink(&self) -> Result<ClipboardValue> {
        let sink = self
            .sink
            .lock()
            .map_err(|_| Error::new(ErrorKind::InvalidState, "clipboard sink poisoned"))?;
        match sink.as_ref() {
            Some(sink) => sink.get(),
            None => Err(Error::new(
                ErrorKind::NotInitialized,
                "no clipboard sink installed",
            )),
        }
    }

    fn write_sink(&self, value: &ClipboardValue) -> Result<()> {
        let sink = self
            .sink
            .lock()
            .map_err(|_| Error::new(ErrorKind::InvalidState, "clipboard sink poisoned"))?;
        match sink.as_ref() {
            Some(sink) => sink.set(value),
            None => Err(Error::new(
                ErrorKind::NotInitialized,
                "no clipboard sink installed",
            )),
        }
    }

    /// Push the local clipboard to the connected peer.
    ///
    /// Returns after the peer acks. A missing ack within the timeout is a
    /// non-fatal `Timeout` error; the channel stays up.
    pub async fn push(&self) -> Result<()> {
        let value = self.read_sink()?;
        self.push_value(value).await
    }

    /// Push a specific value instead of snapshotting the sink.
    pub async fn push_value(&self, value: ClipboardValue) -> Result<()> {
        if value.is_empty() {
            return Err(Error::new(ErrorKind::InvalidArgument, "clipboard is empty"));
        }

        let writer = {
            let link = self.link.lock().await;
            match link.as_ref() {
                Some(link) => link.writer.clone(),
                None => return Err(Error::new(ErrorKind::NotConnected, "no active session")),
            }
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        *self.pending_ack.lock().await = Some(ack_tx);

        let msg = ClipboardPushMessage::from_value(&value);
        writer.send(MessageType::ClipboardPush, &msg.encode()).await?;
        debug!(kind = value.kind.name(), bytes = value.size(), "clipboard pushed");

        let ack = tokio::time::timeout(self.config.clipboard_ack_timeout, ack_rx).await;
        *self.pending_ack.lock().await = None;

        match ack {
            Ok(Ok(ack)) => match ack.error_code {
                None => Ok(()),
                Some(code) => Err(Error::new(
                    ErrorKind::from_code(code),
                    "peer rejected the clipboard push",
                )),
            },
            Ok(Err(_)) | Err(_) => Err(Error::new(
                ErrorKind::Timeout,
                "clipboard ack not received in time",
            )),
        }
    }

    /// Whether a received clipboard from this peer may auto-apply now.
    ///
    /// Requires the policy to be on, the peer trusted, and the current
    /// zone to be exactly Intimate; leaving Intimate disables the
    /// condition immediately because the zone is re-read on every push.
    fn auto_apply_allowed(&self, peer: &DeviceId) -> bool {
        self.config.auto_clipboard
            && self.store.is_trusted(peer).unwrap_or(false)
            && self.monitor.get_zone(peer) == TrustZone::Intimate
    }

    /// Handle an incoming `ClipboardPush`.
    pub async fn handle_push(self: &Arc<Self>, payload: &[u8]) -> Result<()> {
        let peer = {
            let link = self.link.lock().await;
            match link.as_ref() {
                Some(link) => link.peer.clone(),
                None => return Ok(()),
            }
        };

        let msg = match ClipboardPushMessage::decode(payload) {
            Ok(msg) => msg,
            Err(e) => {
                self.send_ack(ClipboardAckMessage::failed(e.kind().code()))
                    .await;
                return Err(e);
            }
        };
        let value = msg.into_value();

        let auto_applied = if self.auto_apply_allowed(&peer.id) {
            match self.write_sink(&value) {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "auto-apply failed; keeping history entry only");
                    false
                }
            }
        } else {
            false
        };

        let history_index = {
            let mut history = self
                .history
                .lock()
                .map_err(|_| Error::new(ErrorKind::InvalidState, "history poisoned"))?;
            history.push_back(ReceivedClipboard {
                value: value.clone(),
                from: peer.id,
                received_at: current_timestamp(),
                auto_applied,
            });
            while history.len() > self.config.clipboard_history_limit {
                history.pop_front();
            }
            history.len() - 1
        };

        info!(
            from = %peer.id,
            kind = value.kind.name(),
            auto = auto_applied,
            "clipboard received"
        );
        self.send_ack(ClipboardAckMessage::ok()).await;
        let _ = self
            .events
            .send(SeaDropEvent::ClipboardReceived(ClipboardReceivedEvent {
                peer_id: peer.id,
                value,
                history_index,
                auto_applied,
            }))
            .await;
        Ok(())
    }

    async fn send_ack(&self, ack: ClipboardAckMessage) {
        let link = self.link.lock().await;
        if let Some(link) = link.as_ref() {
            let _ = link
                .writer
                .send(MessageType::ClipboardAck, &ack.encode())
                .await;
        }
    }

    /// Handle an incoming `ClipboardAck` for our own push.
    pub async fn handle_ack(&self, payload: &[u8]) -> Result<()> {
        let ack = ClipboardAckMessage::decode(payload)?;
        if let Some(tx) = self.pending_ack.lock().await.take() {
            let _ = tx.send(ack);
        }
        Ok(())
    }

    /// Snapshot of the received history, oldest first.
    pub fn history(&self) -> Vec<ReceivedClipboard> {
        self.history
            .lock()
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Write a stored history entry back through the sink.
    pub fn apply_received(&self, index: usize) -> Result<()> {
        let value = {
            let history = self
                .history
                .lock()
                .map_err(|_| Error::new(ErrorKind::InvalidState, "history poisoned"))?;
            history
                .get(index)
                .map(|entry| entry.value.clone())
                .ok_or_else(|| {
                    Error::new(
                        ErrorKind::RecordNotFound,
                        format!("no clipboard history entry {}", index),
                    )
                })?
        };
        self.write_sink(&value)
    }

    pub fn clear_history(&self) {
        if let Ok(mut history) = self.history.lock() {
            history.clear();
        }
    }
}
