//! Transfer engine
//!
//! Sender and receiver halves of the chunked transfer protocol, driven
//! over one secure channel at a time. The sender runs as a spawned task
//! per transfer and observes strict stop-and-wait: chunk `j+1` is never
//! sent before the ack for chunk `j` arrives. The receiver half is fed by
//! the session read loop through [`TransferEngine::handle_message`] and
//! enforces in-order delivery, nacking anything out of sequence.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use crate::data::{HistoryEntry, TrustStore};
use crate::distance::DistanceMonitor;
use crate::network::messages::{
    ChunkAckMessage, ErrorMessage, FileChunkMessage, FileCompleteMessage, FileEntry,
    FileHeaderMessage, ProgressMessage, TransferAcceptMessage, TransferControlMessage,
    TransferRejectMessage, TransferRequestMessage,
};
use crate::network::packet::MessageType;
use crate::protocol::config::SeaDropConfig;
use crate::protocol::error::{Error, ErrorKind, Result};
use crate::protocol::events::{
    FileConflictEvent, FileReceivedEvent, SeaDropEvent, StateChangedEvent, StateScope,
    TransferRequestEvent,
};
use crate::protocol::types::{
    current_timestamp, Device, DeviceId, TransferDirection, TransferId, TrustZone,
};
use crate::security::{hash_file, HashStream};
use crate::session::channel::{ChannelWriter, Transport};
use crate::statemachine::{TransferState, TransferStateMachine};
use crate::transfer::conflict::{resolve_save_path, ConflictResolution, PathDecision};
use crate::transfer::progress::{
    detect_mime_type, FileOutcome, ProgressTracker, TransferProgress, TransferResult,
};

/// Transport type the engine talks through once a session is up.
pub type BoxedTransport = Box<dyn Transport>;

type Writer = ChannelWriter<BoxedTransport>;

/// Interval between progress events while chunks stream.
const PROGRESS_EMIT_INTERVAL: std::time::Duration = std::time::Duration::from_millis(200);

/// Signals routed to a sender task from the session read loop.
enum SenderSignal {
    Accepted,
    Rejected(String),
    RemoteCancelled,
    Ack(ChunkAckMessage),
    RemotePaused,
    RemoteResumed,
}

/// Sender-side control state toggled by the public API.
#[derive(Debug, Clone, Copy, Default)]
struct SenderControl {
    paused: bool,
    cancelled: bool,
}

struct OutgoingHandle {
    machine: Arc<TransferStateMachine>,
    signals: mpsc::UnboundedSender<SenderSignal>,
    control: watch::Sender<SenderControl>,
    tracker: Arc<StdMutex<ProgressTracker>>,
}

struct PendingRequest {
    peer: Device,
    request: TransferRequestMessage,
    machine: Arc<TransferStateMachine>,
    expiry_task: tokio::task::JoinHandle<()>,
}

struct CurrentFile {
    header: FileHeaderMessage,
    /// `None` while skipping; chunks are consumed and discarded.
    file: Option<tokio::fs::File>,
    saved_path: Option<PathBuf>,
    next_chunk: u32,
    written: u64,
    hasher: Option<HashStream>,
    expected_checksum: Option<[u8; 32]>,
}

struct PendingConflict {
    header: FileHeaderMessage,
    target: PathBuf,
    buffered: Vec<FileChunkMessage>,
}

struct IncomingTransfer {
    peer: Device,
    request: TransferRequestMessage,
    machine: Arc<TransferStateMachine>,
    save_dir: PathBuf,
    tracker: ProgressTracker,
    current: Option<CurrentFile>,
    conflict: Option<PendingConflict>,
    successful: Vec<FileOutcome>,
    failed: Vec<FileOutcome>,
    skipped: Vec<FileOutcome>,
    files_seen: u32,
    consecutive_failures: u32,
    started: Instant,
    last_progress_emit: Instant,
}

struct Link {
    writer: Writer,
    peer: Device,
}

/// The transfer engine. One instance per [`crate::SeaDrop`].
pub struct TransferEngine {
    config: SeaDropConfig,
    store: Arc<TrustStore>,
    monitor: Arc<DistanceMonitor>,
    events: mpsc::Sender<SeaDropEvent>,
    link: Mutex<Option<Link>>,
    outgoing: Mutex<HashMap<TransferId, OutgoingHandle>>,
    pending: Mutex<HashMap<TransferId, PendingRequest>>,
    incoming: Mutex<HashMap<TransferId, IncomingTransfer>>,
    completed: StdMutex<VecDeque<TransferResult>>,
    last_alert: StdMutex<HashMap<DeviceId, Instant>>,
}

impl TransferEngine {
    pub fn new(
        config: SeaDropConfig,
        store: Arc<TrustStore>,
        monitor: Arc<DistanceMonitor>,
        events: mpsc::Sender<SeaDropEvent>,
    ) -> Arc<Self> {
        Arc::new(TransferEngine {
            config,
            store,
            monitor,
            events,
            link: Mutex::new(None),
            outgoing: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            incoming: Mutex::new(HashMap::new()),
            completed: StdMutex::new(VecDeque::new()),
            last_alert: StdMutex::new(HashMap::new()),
        })
    }

    /// Wire the engine to an established session.
    pub async fn set_link(&self, writer: Writer, peer: Device) {
        *self.link.lock().await = Some(Link { writer, peer });
    }

    /// Drop the session link; active transfers fail on their next send.
    pub async fn clear_link(&self) {
        *self.link.lock().await = None;
    }

    async fn writer(&self) -> Result<(Writer, Device)> {
        let link = self.link.lock().await;
        match link.as_ref() {
            Some(link) => Ok((link.writer.clone(), link.peer.clone())),
            None => Err(Error::new(ErrorKind::NotConnected, "no active session")),
        }
    }

    async fn emit(&self, event: SeaDropEvent) {
        let _ = self.events.send(event).await;
    }

    async fn emit_state_change(&self, id: TransferId, from: TransferState, to: TransferState) {
        self.emit(SeaDropEvent::StateChanged(StateChangedEvent {
            scope: StateScope::Transfer(id),
            from: from.name(),
            to: to.name(),
        }))
        .await;
    }

    /// Record that a security alert fired for this peer; auto-accept is
    /// suppressed for a hysteresis window afterwards.
    pub fn note_security_alert(&self, device_id: &DeviceId) {
        if let Ok(mut alerts) = self.last_alert.lock() {
            alerts.insert(*device_id, Instant::now());
        }
    }

    fn recent_alert(&self, device_id: &DeviceId) -> bool {
        self.last_alert
            .lock()
            .ok()
            .and_then(|alerts| alerts.get(device_id).copied())
            .map(|at| at.elapsed() < self.config.zone_hysteresis.max(std::time::Duration::from_secs(2)))
            .unwrap_or(false)
    }

    /// Zone-gated auto-accept decision for an incoming request.
    fn auto_accept_allowed(&self, peer: &DeviceId, total_size: u64, file_count: usize) -> bool {
        if !self.config.auto_accept_trusted {
            return false;
        }
        if !self.store.is_trusted(peer).unwrap_or(false) {
            return false;
        }
        if file_count > self.config.max_files_per_transfer {
            return false;
        }
        if self.config.max_transfer_bytes > 0 && total_size > self.config.max_transfer_bytes {
            return false;
        }
        if self.recent_alert(peer) {
            return false;
        }
        match self.monitor.get_zone(peer) {
            TrustZone::Intimate | TrustZone::Close => true,
            TrustZone::Nearby => total_size <= self.config.auto_accept_max_bytes,
            TrustZone::Far | TrustZone::Unknown => false,
        }
    }

    /// Completed transfers, newest last. Bounded in-memory buffer.
    pub fn completed_history(&self) -> Vec<TransferResult> {
        self.completed
            .lock()
            .map(|c| c.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Progress of an active outgoing or incoming transfer.
    pub async fn get_progress(&self, id: &TransferId) -> Result<TransferProgress> {
        if let Some(handle) = self.outgoing.lock().await.get(id) {
            let state = handle.machine.current();
            if let Ok(mut tracker) = handle.tracker.lock() {
                return Ok(tracker.snapshot(state));
            }
        }
        if let Some(transfer) = self.incoming.lock().await.get_mut(id) {
            let state = transfer.machine.current();
            return Ok(transfer.tracker.snapshot(state));
        }
        Err(Error::new(
            ErrorKind::RecordNotFound,
            format!("no active transfer {}", id),
        ))
    }

    /// Transfer ids currently awaiting a local accept/reject decision.
    pub async fn pending_requests(&self) -> Vec<TransferId> {
        self.pending.lock().await.keys().copied().collect()
    }

    fn record_result(&self, result: &TransferResult, peer_name: &str) {
        if let Ok(mut completed) = self.completed.lock() {
            completed.push_back(result.clone());
            while completed.len() > self.config.completed_history_limit {
                completed.pop_front();
            }
        }

        let filenames: Vec<String> = result
            .successful
            .iter()
            .chain(&result.failed)
            .chain(&result.skipped)
            .map(|f| f.relative_path.clone())
            .collect();
        let entry = HistoryEntry {
            id: 0,
            transfer_id: result.id,
            peer_id: result.peer_id,
            peer_name: peer_name.to_string(),
            direction: result.direction,
            final_state: result.final_state.name().to_string(),
            file_count: filenames.len() as u32,
            filenames,
            total_bytes: result.bytes_done,
            duration_ms: result.duration.as_millis() as u64,
            timestamp: current_timestamp(),
            error_message: result.error_message.clone(),
        };
        if let Err(e) = self.store.add_history(&entry) {
            warn!(error = %e, "failed to persist transfer history");
        }
    }

    // =========================================================================
    // Sender half
    // =========================================================================

    /// Send a single file.
    pub async fn send_file(self: &Arc<Self>, path: PathBuf) -> Result<TransferId> {
        self.send_files(vec![path]).await
    }

    /// Recursively send every regular file under a directory.
    pub async fn send_directory(self: &Arc<Self>, dir: PathBuf) -> Result<TransferId> {
        if !dir.is_dir() {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("not a directory: {}", dir.display()),
            ));
        }
        let files = tokio::task::spawn_blocking(move || collect_files(&dir))
            .await
            .map_err(|e| Error::new(ErrorKind::PlatformError, e.to_string()))??;
        self.send_files(files).await
    }

    /// Validate paths, build the request, and start the sender task.
    pub async fn send_files(self: &Arc<Self>, paths: Vec<PathBuf>) -> Result<TransferId> {
        if paths.is_empty() {
            return Err(Error::new(ErrorKind::InvalidArgument, "no files to send"));
        }
        if paths.len() > self.config.max_files_per_transfer {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!(
                    "{} files exceeds the per-transfer limit of {}",
                    paths.len(),
                    self.config.max_files_per_transfer
                ),
            ));
        }
        let (writer, peer) = self.writer().await?;

        // Build the file entries, hashing up front when checksums are on.
        let include_checksum = self.config.include_checksum;
        let mut entries = Vec::with_capacity(paths.len());
        let mut total_size = 0u64;
        for path in &paths {
            let meta = tokio::fs::metadata(path).await.map_err(|_| {
                Error::new(
                    ErrorKind::FileNotFound,
                    format!("file not found: {}", path.display()),
                )
            })?;
            if !meta.is_file() {
                return Err(Error::new(
                    ErrorKind::InvalidArgument,
                    format!("not a regular file: {}", path.display()),
                ));
            }
            let basename = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| {
                    Error::new(
                        ErrorKind::InvalidArgument,
                        format!("unusable file name: {}", path.display()),
                    )
                })?
                .to_string();

            let checksum = if include_checksum {
                let path = path.clone();
                Some(
                    tokio::task::spawn_blocking(move || hash_file(&path))
                        .await
                        .map_err(|e| Error::new(ErrorKind::PlatformError, e.to_string()))??,
                )
            } else {
                None
            };

            let modified = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs())
                .unwrap_or(0);

            total_size += meta.len();
            let entry = FileEntry {
                relative_path: basename,
                size: meta.len(),
                mime: detect_mime_type(path).to_string(),
                modified_time: modified,
                checksum,
            };
            entry.validate()?;
            entries.push(entry);
        }

        if self.config.max_transfer_bytes > 0 && total_size > self.config.max_transfer_bytes {
            return Err(Error::new(
                ErrorKind::FileTooLarge,
                format!(
                    "transfer of {} bytes exceeds the configured limit",
                    total_size
                ),
            ));
        }

        let transfer_id = TransferId::generate();
        let request = TransferRequestMessage {
            transfer_id,
            total_size,
            include_checksum,
            files: entries,
        };

        let machine = Arc::new(TransferStateMachine::new());
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = watch::channel(SenderControl::default());
        let tracker = Arc::new(StdMutex::new(ProgressTracker::new(
            transfer_id,
            total_size,
            request.files.len() as u32,
        )));

        self.outgoing.lock().await.insert(
            transfer_id,
            OutgoingHandle {
                machine: machine.clone(),
                signals: signal_tx,
                control: control_tx,
                tracker: tracker.clone(),
            },
        );

        let engine = self.clone();
        tokio::spawn(async move {
            engine
                .run_sender(transfer_id, request, paths, machine, signal_rx, control_rx, tracker, writer, peer)
                .await;
        });

        info!(transfer = %transfer_id, bytes = total_size, "transfer requested");
        Ok(transfer_id)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_sender(
        self: Arc<Self>,
        id: TransferId,
        request: TransferRequestMessage,
        paths: Vec<PathBuf>,
        machine: Arc<TransferStateMachine>,
        mut signals: mpsc::UnboundedReceiver<SenderSignal>,
        mut control: watch::Receiver<SenderControl>,
        tracker: Arc<StdMutex<ProgressTracker>>,
        writer: Writer,
        peer: Device,
    ) {
        let started = Instant::now();
        let outcome = self
            .sender_flow(
                id, &request, &paths, &machine, &mut signals, &mut control, &tracker, &writer,
            )
            .await;

        self.outgoing.lock().await.remove(&id);

        let final_state = machine.current();
        let (successful, failed, skipped, error_message) = match outcome {
            Ok(partition) => partition,
            Err(e) => {
                // Anything unrecovered fails the whole transfer.
                if !final_state.is_terminal() {
                    machine.force_transition(TransferState::Failed);
                }
                let _ = writer
                    .send(
                        MessageType::Error,
                        &ErrorMessage {
                            transfer_id: id,
                            code: e.kind().code(),
                            message: e.message().to_string(),
                            fatal: true,
                        }
                        .encode(),
                    )
                    .await;
                (Vec::new(), all_outcomes(&request, Some(e.message())), Vec::new(), Some(e.to_string()))
            }
        };

        let final_state = machine.current();
        let bytes_done = tracker.lock().map(|t| t.bytes_done()).unwrap_or(0);
        let duration = started.elapsed();
        let result = TransferResult {
            id,
            peer_id: peer.id,
            direction: TransferDirection::Send,
            final_state,
            bytes_done,
            duration,
            avg_speed_bps: if duration.as_secs_f64() > 0.0 {
                bytes_done as f64 / duration.as_secs_f64()
            } else {
                0.0
            },
            successful,
            failed,
            skipped,
            error_message,
        };

        info!(
            transfer = %id,
            state = final_state.name(),
            bytes = bytes_done,
            "transfer finished"
        );
        self.record_result(&result, peer.display_name());
        self.emit(SeaDropEvent::TransferComplete(result)).await;
    }

    /// The sender state walk. Returns the file partition on any terminal
    /// outcome reached through the state machine; `Err` means the whole
    /// transfer failed.
    #[allow(clippy::too_many_arguments)]
    async fn sender_flow(
        &self,
        id: TransferId,
        request: &TransferRequestMessage,
        paths: &[PathBuf],
        machine: &Arc<TransferStateMachine>,
        signals: &mut mpsc::UnboundedReceiver<SenderSignal>,
        control: &mut watch::Receiver<SenderControl>,
        tracker: &Arc<StdMutex<ProgressTracker>>,
        writer: &Writer,
    ) -> Result<(Vec<FileOutcome>, Vec<FileOutcome>, Vec<FileOutcome>, Option<String>)> {
        machine.transition(TransferState::AwaitingAccept)?;
        self.emit_state_change(id, TransferState::Pending, TransferState::AwaitingAccept)
            .await;
        writer
            .send(MessageType::TransferRequest, &request.encode())
            .await?;

        // Wait for the receiver's decision, bounded by the request expiry.
        let decision = tokio::time::timeout(self.config.request_expiry, async {
            loop {
                match signals.recv().await {
                    Some(SenderSignal::Accepted) => return Ok(()),
                    Some(SenderSignal::Rejected(reason)) => {
                        return Err(Error::new(ErrorKind::TransferRejected, reason));
                    }
                    Some(SenderSignal::RemoteCancelled) | None => {
                        return Err(Error::new(ErrorKind::TransferCancelled, "cancelled"));
                    }
                    Some(_) => continue,
                }
            }
        })
        .await;

        match decision {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.kind() == ErrorKind::TransferRejected => {
                machine.transition(TransferState::Rejected)?;
                self.emit_state_change(id, TransferState::AwaitingAccept, TransferState::Rejected)
                    .await;
                return Ok((
                    Vec::new(),
                    Vec::new(),
                    all_outcomes(request, None),
                    Some(e.message().to_string()),
                ));
            }
            Ok(Err(_)) => {
                machine.transition(TransferState::Cancelled)?;
                self.emit_state_change(id, TransferState::AwaitingAccept, TransferState::Cancelled)
                    .await;
                return Ok((Vec::new(), Vec::new(), all_outcomes(request, None), None));
            }
            Err(_) => {
                return Err(Error::new(
                    ErrorKind::Timeout,
                    "transfer request expired without an answer",
                ));
            }
        }

        machine.transition(TransferState::Preparing)?;
        self.emit_state_change(id, TransferState::AwaitingAccept, TransferState::Preparing)
            .await;
        machine.transition(TransferState::InProgress)?;
        self.emit_state_change(id, TransferState::Preparing, TransferState::InProgress)
            .await;

        let mut successful = Vec::new();
        let mut failed: Vec<FileOutcome> = Vec::new();
        let mut consecutive_failures = 0u32;

        for (index, (path, entry)) in paths.iter().zip(&request.files).enumerate() {
            if let Ok(mut t) = tracker.lock() {
                t.set_current_file(Some(entry.relative_path.clone()));
            }

            match self
                .send_one_file(id, index as u32, path, entry, machine, signals, control, tracker, writer)
                .await
            {
                Ok(()) => {
                    consecutive_failures = 0;
                    if let Ok(mut t) = tracker.lock() {
                        t.file_done();
                    }
                    successful.push(FileOutcome {
                        relative_path: entry.relative_path.clone(),
                        size: entry.size,
                        saved_path: None,
                        error: None,
                    });
                }
                Err(e) if e.kind() == ErrorKind::TransferCancelled => {
                    machine.force_transition(TransferState::Cancelled);
                    self.emit_state_change(id, TransferState::InProgress, TransferState::Cancelled)
                        .await;
                    let mut skipped = Vec::new();
                    for entry in &request.files[index..] {
                        skipped.push(FileOutcome {
                            relative_path: entry.relative_path.clone(),
                            size: entry.size,
                            saved_path: None,
                            error: None,
                        });
                    }
                    return Ok((successful, failed, skipped, None));
                }
                Err(e) => {
                    warn!(transfer = %id, file = %entry.relative_path, error = %e, "file failed");
                    consecutive_failures += 1;
                    failed.push(FileOutcome {
                        relative_path: entry.relative_path.clone(),
                        size: entry.size,
                        saved_path: None,
                        error: Some(e.to_string()),
                    });
                    if consecutive_failures >= self.config.consecutive_failure_limit {
                        return Err(Error::new(
                            ErrorKind::TransferFailed,
                            format!("{} consecutive file failures", consecutive_failures),
                        ));
                    }
                }
            }
        }

        // Terminal progress: bytes_done equals the advertised total.
        let bytes_done = tracker.lock().map(|t| t.bytes_done()).unwrap_or(0);
        writer
            .send(
                MessageType::Progress,
                &ProgressMessage {
                    transfer_id: id,
                    bytes_done,
                    bytes_total: request.total_size,
                    files_done: successful.len() as u32,
                    files_total: request.files.len() as u32,
                }
                .encode(),
            )
            .await?;

        // A pause that landed after the last ack leaves the machine Paused;
        // the data is fully sent either way.
        let from = machine.current();
        if machine.transition(TransferState::Completed).is_err() {
            machine.force_transition(TransferState::Completed);
        }
        self.emit_state_change(id, from, TransferState::Completed).await;
        Ok((successful, failed, Vec::new(), None))
    }

    /// Stream one file as header, stop-and-wait chunks, and completion.
    #[allow(clippy::too_many_arguments)]
    async fn send_one_file(
        &self,
        id: TransferId,
        file_index: u32,
        path: &Path,
        entry: &FileEntry,
        machine: &Arc<TransferStateMachine>,
        signals: &mut mpsc::UnboundedReceiver<SenderSignal>,
        control: &mut watch::Receiver<SenderControl>,
        tracker: &Arc<StdMutex<ProgressTracker>>,
        writer: &Writer,
    ) -> Result<()> {
        let chunk_size = self.config.chunk_size as u64;
        let total_chunks = if entry.size == 0 {
            0
        } else {
            entry.size.div_ceil(chunk_size) as u32
        };

        writer
            .send(
                MessageType::FileHeader,
                &FileHeaderMessage {
                    transfer_id: id,
                    file_index,
                    filename: entry.relative_path.clone(),
                    file_size: entry.size,
                    total_chunks,
                    chunk_size: self.config.chunk_size as u32,
                }
                .encode(),
            )
            .await?;

        let mut file = tokio::fs::File::open(path).await.map_err(|e| {
            Error::new(
                ErrorKind::FileReadError,
                format!("cannot open {}: {}", path.display(), e),
            )
        })?;
        let mut buf = vec![0u8; self.config.chunk_size];
        let mut last_emit = Instant::now();

        for chunk_index in 0..total_chunks {
            // Honor pause between chunks: the in-flight chunk finishes,
            // nothing new starts until resume.
            loop {
                let state = *control.borrow();
                if state.cancelled {
                    return Err(Error::new(ErrorKind::TransferCancelled, "cancelled"));
                }
                if !state.paused {
                    break;
                }
                if control.changed().await.is_err() {
                    return Err(Error::new(ErrorKind::TransferCancelled, "cancelled"));
                }
            }

            let expected = {
                let remaining = entry.size - u64::from(chunk_index) * chunk_size;
                remaining.min(chunk_size) as usize
            };
            let mut filled = 0usize;
            while filled < expected {
                let n = file.read(&mut buf[filled..expected]).await.map_err(|e| {
                    Error::new(
                        ErrorKind::FileReadError,
                        format!("read failed on {}: {}", path.display(), e),
                    )
                })?;
                if n == 0 {
                    return Err(Error::new(
                        ErrorKind::FileReadError,
                        format!("{} shrank while sending", path.display()),
                    ));
                }
                filled += n;
            }

            let chunk = FileChunkMessage {
                transfer_id: id,
                file_index,
                chunk_index,
                chunk_size: expected as u32,
                data: buf[..expected].to_vec(),
            };

            // Stop-and-wait with a bounded re-send budget on nacks.
            let mut attempts = 0u32;
            loop {
                writer.send(MessageType::FileChunk, &chunk.encode()).await?;

                let ack = tokio::time::timeout(self.config.ack_timeout, async {
                    loop {
                        match signals.recv().await {
                            Some(SenderSignal::Ack(ack))
                                if ack.file_index == file_index
                                    && ack.chunk_index == chunk_index =>
                            {
                                return Ok(ack);
                            }
                            Some(SenderSignal::Ack(stale)) => {
                                debug!(
                                    chunk = stale.chunk_index,
                                    "ignoring stale ack"
                                );
                            }
                            Some(SenderSignal::RemoteCancelled) | None => {
                                return Err(Error::new(
                                    ErrorKind::TransferCancelled,
                                    "cancelled",
                                ));
                            }
                            Some(SenderSignal::RemotePaused) => {
                                machine.force_transition(TransferState::Paused);
                            }
                            Some(SenderSignal::RemoteResumed) => {
                                machine.force_transition(TransferState::InProgress);
                            }
                            Some(_) => {}
                        }
                    }
                })
                .await
                .map_err(|_| {
                    Error::new(ErrorKind::Timeout, "chunk ack timed out")
                })??;

                if ack.success {
                    break;
                }
                attempts += 1;
                if attempts > self.config.chunk_retry_limit {
                    return Err(Error::new(
                        ErrorKind::TransferFailed,
                        format!(
                            "chunk {} of {} nacked {} times",
                            chunk_index, entry.relative_path, attempts
                        ),
                    ));
                }
            }

            if let Ok(mut t) = tracker.lock() {
                t.add_bytes(expected as u64);
            }
            if last_emit.elapsed() >= PROGRESS_EMIT_INTERVAL || chunk_index + 1 == total_chunks {
                last_emit = Instant::now();
                let snapshot = tracker
                    .lock()
                    .ok()
                    .map(|mut t| t.snapshot(machine.current()));
                if let Some(snapshot) = snapshot {
                    self.emit(SeaDropEvent::TransferProgress(snapshot)).await;
                }
            }
        }

        writer
            .send(
                MessageType::FileComplete,
                &FileCompleteMessage {
                    transfer_id: id,
                    file_index,
                }
                .encode(),
            )
            .await?;
        Ok(())
    }

    /// Pause an outgoing transfer. Valid only from `InProgress`.
    pub async fn pause_transfer(&self, id: &TransferId) -> Result<()> {
        let outgoing = self.outgoing.lock().await;
        let handle = outgoing.get(id).ok_or_else(|| {
            Error::new(ErrorKind::RecordNotFound, format!("no transfer {}", id))
        })?;
        handle.machine.transition(TransferState::Paused)?;
        handle.control.send_modify(|c| c.paused = true);
        let (writer, _) = self.writer().await?;
        writer
            .send(
                MessageType::TransferPause,
                &TransferControlMessage { transfer_id: *id }.encode(),
            )
            .await?;
        self.emit_state_change(*id, TransferState::InProgress, TransferState::Paused)
            .await;
        Ok(())
    }

    /// Resume a paused outgoing transfer.
    pub async fn resume_transfer(&self, id: &TransferId) -> Result<()> {
        let outgoing = self.outgoing.lock().await;
        let handle = outgoing.get(id).ok_or_else(|| {
            Error::new(ErrorKind::RecordNotFound, format!("no transfer {}", id))
        })?;
        handle.machine.transition(TransferState::InProgress)?;
        handle.control.send_modify(|c| c.paused = false);
        let (writer, _) = self.writer().await?;
        writer
            .send(
                MessageType::TransferResume,
                &TransferControlMessage { transfer_id: *id }.encode(),
            )
            .await?;
        self.emit_state_change(*id, TransferState::Paused, TransferState::InProgress)
            .await;
        Ok(())
    }

    /// Cancel a transfer in any direction. Idempotent; unknown or already
    /// terminal ids are a no-op.
    pub async fn cancel_transfer(&self, id: &TransferId) -> Result<()> {
        let mut signalled = false;

        if let Some(handle) = self.outgoing.lock().await.get(id) {
            if !handle.machine.is_terminal() {
                handle.control.send_modify(|c| c.cancelled = true);
                let _ = handle.signals.send(SenderSignal::RemoteCancelled);
            }
            signalled = true;
        }

        if let Some(pending) = self.pending.lock().await.remove(id) {
            pending.expiry_task.abort();
            pending.machine.force_transition(TransferState::Cancelled);
            signalled = true;
        }

        if let Some(mut transfer) = self.incoming.lock().await.remove(id) {
            transfer.machine.force_transition(TransferState::Cancelled);
            discard_partial(&mut transfer).await;
            let result = finish_incoming(transfer, TransferState::Cancelled, None);
            self.record_result(&result.0, &result.1);
            self.emit(SeaDropEvent::TransferComplete(result.0)).await;
            signalled = true;
        }

        if signalled {
            if let Ok((writer, _)) = self.writer().await {
                let _ = writer
                    .send(
                        MessageType::TransferCancel,
                        &TransferControlMessage { transfer_id: *id }.encode(),
                    )
                    .await;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Receiver half
    // =========================================================================

    /// Accept a surfaced transfer request.
    ///
    /// `RecordNotFound` when the request already expired or was withdrawn.
    pub async fn accept_transfer(
        self: &Arc<Self>,
        id: &TransferId,
        save_directory: Option<PathBuf>,
    ) -> Result<()> {
        let pending = self.pending.lock().await.remove(id).ok_or_else(|| {
            Error::new(
                ErrorKind::RecordNotFound,
                format!("no pending request {}", id),
            )
        })?;
        pending.expiry_task.abort();
        self.start_incoming(pending.peer, pending.request, pending.machine, save_directory)
            .await
    }

    /// Reject a surfaced transfer request.
    pub async fn reject_transfer(&self, id: &TransferId, reason: &str) -> Result<()> {
        let pending = self.pending.lock().await.remove(id).ok_or_else(|| {
            Error::new(
                ErrorKind::RecordNotFound,
                format!("no pending request {}", id),
            )
        })?;
        pending.expiry_task.abort();
        pending.machine.transition(TransferState::Rejected)?;
        self.emit_state_change(*id, TransferState::AwaitingAccept, TransferState::Rejected)
            .await;

        let (writer, _) = self.writer().await?;
        writer
            .send(
                MessageType::TransferReject,
                &TransferRejectMessage {
                    transfer_id: *id,
                    reason: reason.to_string(),
                }
                .encode(),
            )
            .await?;
        Ok(())
    }

    async fn start_incoming(
        self: &Arc<Self>,
        peer: Device,
        request: TransferRequestMessage,
        machine: Arc<TransferStateMachine>,
        save_directory: Option<PathBuf>,
    ) -> Result<()> {
        let id = request.transfer_id;
        let mut save_dir = save_directory.unwrap_or_else(|| self.config.download_path.clone());
        if self.config.use_sender_subdir {
            let sub: String = peer
                .display_name()
                .chars()
                .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
                .collect();
            if !sub.is_empty() {
                save_dir = save_dir.join(sub);
            }
        }
        tokio::fs::create_dir_all(&save_dir).await.map_err(|e| {
            Error::new(
                ErrorKind::FileWriteError,
                format!("cannot create {}: {}", save_dir.display(), e),
            )
        })?;

        machine.transition(TransferState::Preparing)?;
        self.emit_state_change(id, TransferState::AwaitingAccept, TransferState::Preparing)
            .await;

        let tracker = ProgressTracker::new(id, request.total_size, request.files.len() as u32);
        self.incoming.lock().await.insert(
            id,
            IncomingTransfer {
                peer,
                request,
                machine,
                save_dir: save_dir.clone(),
                tracker,
                current: None,
                conflict: None,
                successful: Vec::new(),
                failed: Vec::new(),
                skipped: Vec::new(),
                files_seen: 0,
                consecutive_failures: 0,
                started: Instant::now(),
                last_progress_emit: Instant::now(),
            },
        );

        let (writer, _) = self.writer().await?;
        writer
            .send(
                MessageType::TransferAccept,
                &TransferAcceptMessage {
                    transfer_id: id,
                    save_directory: save_dir.to_string_lossy().into_owned(),
                }
                .encode(),
            )
            .await?;
        info!(transfer = %id, dir = %save_dir.display(), "transfer accepted");
        Ok(())
    }

    /// Route one decrypted application message into the engine.
    pub async fn handle_message(
        self: &Arc<Self>,
        msg_type: MessageType,
        payload: &[u8],
    ) -> Result<()> {
        match msg_type {
            MessageType::TransferRequest => {
                let msg = self.decode_or_report::<TransferRequestMessage>(
                    TransferRequestMessage::decode(payload),
                )
                .await?;
                self.on_transfer_request(msg).await
            }
            MessageType::TransferAccept => {
                let msg = TransferAcceptMessage::decode(payload)?;
                self.signal_outgoing(&msg.transfer_id, SenderSignal::Accepted).await;
                Ok(())
            }
            MessageType::TransferReject => {
                let msg = TransferRejectMessage::decode(payload)?;
                self.signal_outgoing(&msg.transfer_id, SenderSignal::Rejected(msg.reason))
                    .await;
                Ok(())
            }
            MessageType::TransferCancel => {
                let msg = TransferControlMessage::decode(payload)?;
                self.on_remote_cancel(&msg.transfer_id).await;
                Ok(())
            }
            MessageType::TransferPause => {
                let msg = TransferControlMessage::decode(payload)?;
                self.on_remote_pause(&msg.transfer_id, true).await;
                Ok(())
            }
            MessageType::TransferResume => {
                let msg = TransferControlMessage::decode(payload)?;
                self.on_remote_pause(&msg.transfer_id, false).await;
                Ok(())
            }
            MessageType::FileHeader => {
                let msg = self
                    .decode_or_report::<FileHeaderMessage>(FileHeaderMessage::decode(payload))
                    .await?;
                self.on_file_header(msg).await
            }
            MessageType::FileChunk => {
                let msg = self
                    .decode_or_report::<FileChunkMessage>(FileChunkMessage::decode(payload))
                    .await?;
                self.on_file_chunk(msg).await
            }
            MessageType::FileComplete => {
                let msg = self
                    .decode_or_report::<FileCompleteMessage>(FileCompleteMessage::decode(payload))
                    .await?;
                self.on_file_complete(msg).await
            }
            MessageType::ChunkAck | MessageType::ChunkNack => {
                let msg = ChunkAckMessage::decode(payload)?;
                self.signal_outgoing(&msg.transfer_id, SenderSignal::Ack(msg)).await;
                Ok(())
            }
            MessageType::Progress => {
                let msg = ProgressMessage::decode(payload)?;
                self.on_progress(msg).await
            }
            MessageType::Error => {
                let msg = ErrorMessage::decode(payload)?;
                self.on_wire_error(msg).await;
                Ok(())
            }
            other => Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("{} is not a transfer message", other.name()),
            )),
        }
    }

    /// Decode failures inside an active transfer report a fatal wire error
    /// but keep the connection open.
    async fn decode_or_report<T>(&self, decoded: Result<T>) -> Result<T> {
        match decoded {
            Ok(v) => Ok(v),
            Err(e) => {
                if let Ok((writer, _)) = self.writer().await {
                    let _ = writer
                        .send(
                            MessageType::Error,
                            &ErrorMessage {
                                transfer_id: TransferId([0; 16]),
                                code: e.kind().code(),
                                message: e.message().to_string(),
                                fatal: true,
                            }
                            .encode(),
                        )
                        .await;
                }
                Err(e)
            }
        }
    }

    async fn signal_outgoing(&self, id: &TransferId, signal: SenderSignal) {
        if let Some(handle) = self.outgoing.lock().await.get(id) {
            let _ = handle.signals.send(signal);
        } else {
            debug!(transfer = %id, "signal for unknown outgoing transfer");
        }
    }

    async fn on_transfer_request(self: &Arc<Self>, request: TransferRequestMessage) -> Result<()> {
        let (writer, peer) = self.writer().await?;
        let id = request.transfer_id;

        // Blocked peers are refused outright.
        if self.store.is_blocked(&peer.id).unwrap_or(false) {
            writer
                .send(
                    MessageType::TransferReject,
                    &TransferRejectMessage {
                        transfer_id: id,
                        reason: "blocked".to_string(),
                    }
                    .encode(),
                )
                .await?;
            return Ok(());
        }

        // Validate the request shape before surfacing anything.
        let valid = request.sizes_consistent()
            && request.files.len() <= self.config.max_files_per_transfer
            && !request.files.is_empty()
            && request.files.iter().all(|f| f.validate().is_ok())
            && (self.config.max_transfer_bytes == 0
                || request.total_size <= self.config.max_transfer_bytes);
        if !valid {
            writer
                .send(
                    MessageType::TransferReject,
                    &TransferRejectMessage {
                        transfer_id: id,
                        reason: "invalid request".to_string(),
                    }
                    .encode(),
                )
                .await?;
            return Ok(());
        }

        let machine = Arc::new(TransferStateMachine::new());
        machine.transition(TransferState::AwaitingAccept)?;

        if self.auto_accept_allowed(&peer.id, request.total_size, request.files.len()) {
            info!(transfer = %id, peer = %peer.id, "auto-accepting transfer");
            return self.start_incoming(peer, request, machine, None).await;
        }

        let expires_at = current_timestamp() + self.config.request_expiry.as_secs() as i64;
        let event = TransferRequestEvent {
            transfer_id: id,
            peer: peer.clone(),
            file_names: request
                .files
                .iter()
                .map(|f| f.relative_path.clone())
                .collect(),
            file_count: request.files.len() as u32,
            total_size: request.total_size,
            expires_at,
        };

        let engine = self.clone();
        let expiry = self.config.request_expiry;
        let expiry_task = tokio::spawn(async move {
            tokio::time::sleep(expiry).await;
            engine.expire_request(&id).await;
        });

        self.pending.lock().await.insert(
            id,
            PendingRequest {
                peer,
                request,
                machine,
                expiry_task,
            },
        );
        self.emit(SeaDropEvent::TransferRequest(event)).await;
        Ok(())
    }

    async fn expire_request(&self, id: &TransferId) {
        let pending = self.pending.lock().await.remove(id);
        if let Some(pending) = pending {
            info!(transfer = %id, "transfer request expired");
            let _ = pending.machine.transition(TransferState::Rejected);
            self.emit_state_change(*id, TransferState::AwaitingAccept, TransferState::Rejected)
                .await;
            if let Ok((writer, _)) = self.writer().await {
                let _ = writer
                    .send(
                        MessageType::TransferReject,
                        &TransferRejectMessage {
                            transfer_id: *id,
                            reason: "request expired".to_string(),
                        }
                        .encode(),
                    )
                    .await;
            }
        }
    }

    async fn on_file_header(self: &Arc<Self>, header: FileHeaderMessage) -> Result<()> {
        let mut incoming = self.incoming.lock().await;
        let transfer = match incoming.get_mut(&header.transfer_id) {
            Some(t) => t,
            None => {
                debug!(transfer = %header.transfer_id, "header for unknown transfer");
                return Ok(());
            }
        };

        // First header moves the transfer into InProgress.
        if transfer.machine.current() == TransferState::Preparing {
            transfer.machine.transition(TransferState::InProgress)?;
            self.emit_state_change(
                header.transfer_id,
                TransferState::Preparing,
                TransferState::InProgress,
            )
            .await;
        }

        if header.file_index != transfer.files_seen
            || header.file_index as usize >= transfer.request.files.len()
        {
            warn!(
                transfer = %header.transfer_id,
                index = header.file_index,
                expected = transfer.files_seen,
                "file header out of order"
            );
            return Ok(());
        }

        let entry = &transfer.request.files[header.file_index as usize];
        let relative = entry.relative_path.clone();
        transfer
            .tracker
            .set_current_file(Some(relative.clone()));

        let decision = resolve_save_path(
            &transfer.save_dir,
            &relative,
            self.config.conflict_resolution,
        )?;
        let expected_checksum = entry.checksum;

        match decision {
            PathDecision::Write(path) => {
                open_current_file(transfer, header, path, expected_checksum).await;
            }
            PathDecision::Skip => {
                transfer.current = Some(CurrentFile {
                    header,
                    file: None,
                    saved_path: None,
                    next_chunk: 0,
                    written: 0,
                    hasher: None,
                    expected_checksum: None,
                });
            }
            PathDecision::AskCaller(target) => {
                let event = FileConflictEvent {
                    transfer_id: header.transfer_id,
                    file_index: header.file_index,
                    target_path: target.clone(),
                };
                transfer.conflict = Some(PendingConflict {
                    header,
                    target,
                    buffered: Vec::new(),
                });
                drop(incoming);
                self.emit(SeaDropEvent::FileConflict(event)).await;
            }
        }
        Ok(())
    }

    /// Resolve a surfaced filename conflict (`Ask` policy). Buffered chunks
    /// are replayed and acked once the decision lands.
    pub async fn resolve_file_conflict(
        self: &Arc<Self>,
        id: &TransferId,
        file_index: u32,
        resolution: ConflictResolution,
    ) -> Result<()> {
        let mut incoming = self.incoming.lock().await;
        let transfer = incoming.get_mut(id).ok_or_else(|| {
            Error::new(ErrorKind::RecordNotFound, format!("no transfer {}", id))
        })?;
        let conflict = transfer.conflict.take().ok_or_else(|| {
            Error::new(ErrorKind::InvalidState, "no pending file conflict")
        })?;
        if conflict.header.file_index != file_index {
            transfer.conflict = Some(conflict);
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                "conflict decision for the wrong file",
            ));
        }

        let entry = &transfer.request.files[file_index as usize];
        let expected_checksum = entry.checksum;
        match resolution {
            ConflictResolution::Skip => {
                transfer.current = Some(CurrentFile {
                    header: conflict.header,
                    file: None,
                    saved_path: None,
                    next_chunk: 0,
                    written: 0,
                    hasher: None,
                    expected_checksum: None,
                });
            }
            ConflictResolution::Overwrite => {
                let target = conflict.target.clone();
                open_current_file(transfer, conflict.header, target, expected_checksum).await;
            }
            ConflictResolution::AutoRename | ConflictResolution::Ask => {
                let target = crate::transfer::conflict::unique_path(&conflict.target);
                open_current_file(transfer, conflict.header, target, expected_checksum).await;
            }
        }

        let buffered = conflict.buffered;
        drop(incoming);
        for chunk in buffered {
            self.on_file_chunk(chunk).await?;
        }
        Ok(())
    }

    async fn on_file_chunk(self: &Arc<Self>, chunk: FileChunkMessage) -> Result<()> {
        let key = chunk_key(&chunk);
        let mut progress_snapshot = None;
        let ok;

        {
            let mut incoming = self.incoming.lock().await;
            let transfer = match incoming.get_mut(&chunk.transfer_id) {
                Some(t) => t,
                None => return Ok(()),
            };

            // A chunk for a file awaiting a conflict decision is buffered
            // without an ack; the sender stalls until the user decides.
            if let Some(conflict) = &mut transfer.conflict {
                if conflict.header.file_index == chunk.file_index {
                    conflict.buffered.push(chunk);
                    return Ok(());
                }
            }

            ok = match &mut transfer.current {
                None => false,
                Some(current) => {
                    let in_order = current.header.file_index == chunk.file_index
                        && current.next_chunk == chunk.chunk_index
                        && chunk.size_consistent();
                    if !in_order {
                        false
                    } else {
                        let mut write_ok = true;
                        if let Some(file) = &mut current.file {
                            use tokio::io::AsyncWriteExt;
                            if let Err(e) = file.write_all(&chunk.data).await {
                                warn!(error = %e, "chunk write failed");
                                write_ok = false;
                            }
                        }
                        if write_ok {
                            if let Some(hasher) = &mut current.hasher {
                                hasher.update(&chunk.data);
                            }
                            current.next_chunk += 1;
                            current.written += chunk.data.len() as u64;
                        }
                        write_ok
                    }
                }
            };

            if ok {
                transfer.tracker.add_bytes(chunk.data.len() as u64);
                if transfer.last_progress_emit.elapsed() >= PROGRESS_EMIT_INTERVAL {
                    transfer.last_progress_emit = Instant::now();
                    progress_snapshot =
                        Some(transfer.tracker.snapshot(transfer.machine.current()));
                }
            }
        }

        if let Some(snapshot) = progress_snapshot {
            self.emit(SeaDropEvent::TransferProgress(snapshot)).await;
        }
        self.send_chunk_ack(&key, ok).await;
        Ok(())
    }

    async fn send_chunk_ack(&self, chunk: &FileChunkMessage, success: bool) {
        if let Ok((writer, _)) = self.writer().await {
            let msg_type = if success {
                MessageType::ChunkAck
            } else {
                MessageType::ChunkNack
            };
            let _ = writer
                .send(
                    msg_type,
                    &ChunkAckMessage {
                        transfer_id: chunk.transfer_id,
                        file_index: chunk.file_index,
                        chunk_index: chunk.chunk_index,
                        success,
                    }
                    .encode(),
                )
                .await;
        }
    }

    async fn on_file_complete(self: &Arc<Self>, msg: FileCompleteMessage) -> Result<()> {
        let mut incoming = self.incoming.lock().await;
        let transfer = match incoming.get_mut(&msg.transfer_id) {
            Some(t) => t,
            None => return Ok(()),
        };

        let current = match transfer.current.take() {
            Some(c) if c.header.file_index == msg.file_index => c,
            Some(c) => {
                transfer.current = Some(c);
                warn!(index = msg.file_index, "completion for the wrong file");
                return Ok(());
            }
            None => return Ok(()),
        };
        transfer.files_seen += 1;

        let entry = &transfer.request.files[msg.file_index as usize];
        let relative = entry.relative_path.clone();
        let size = entry.size;

        // Skipped files never opened a stream.
        if current.saved_path.is_none() {
            transfer.skipped.push(FileOutcome {
                relative_path: relative,
                size,
                saved_path: None,
                error: None,
            });
            transfer.consecutive_failures = 0;
            return Ok(());
        }

        let saved_path = current.saved_path.clone();
        let mut failure: Option<String> = None;

        if let Some(mut file) = current.file {
            use tokio::io::AsyncWriteExt;
            if let Err(e) = file.flush().await {
                failure = Some(format!("flush failed: {}", e));
            }
            if failure.is_none() {
                if let Err(e) = file.sync_all().await {
                    failure = Some(format!("sync failed: {}", e));
                }
            }
        }

        if failure.is_none() && current.written != current.header.file_size {
            failure = Some(format!(
                "size mismatch: wrote {} of {} bytes",
                current.written, current.header.file_size
            ));
        }

        // Checksum verification is a per-file verdict; a mismatch fails the
        // file without aborting the transfer.
        if failure.is_none() {
            if let (Some(hasher), Some(expected)) = (current.hasher, current.expected_checksum) {
                let actual = hasher.finalize();
                if actual != expected {
                    failure = Some("checksum mismatch".to_string());
                }
            }
        }

        match failure {
            None => {
                transfer.consecutive_failures = 0;
                transfer.tracker.file_done();
                transfer.successful.push(FileOutcome {
                    relative_path: relative,
                    size,
                    saved_path: saved_path.clone(),
                    error: None,
                });
                if let Some(path) = saved_path {
                    let event = FileReceivedEvent {
                        transfer_id: msg.transfer_id,
                        peer_id: transfer.peer.id,
                        saved_path: path,
                        size,
                    };
                    drop(incoming);
                    self.emit(SeaDropEvent::FileReceived(event)).await;
                }
            }
            Some(reason) => {
                warn!(file = %relative, reason = %reason, "received file failed");
                if let Some(path) = &saved_path {
                    let _ = tokio::fs::remove_file(path).await;
                }
                transfer.consecutive_failures += 1;
                transfer.failed.push(FileOutcome {
                    relative_path: relative,
                    size,
                    saved_path: None,
                    error: Some(reason),
                });

                if transfer.consecutive_failures >= self.config.consecutive_failure_limit {
                    let id = msg.transfer_id;
                    transfer.machine.force_transition(TransferState::Failed);
                    if let Some(transfer) = incoming.remove(&id) {
                        let (result, peer_name) = finish_incoming(
                            transfer,
                            TransferState::Failed,
                            Some("too many consecutive file failures".to_string()),
                        );
                        drop(incoming);
                        self.record_result(&result, &peer_name);
                        if let Ok((writer, _)) = self.writer().await {
                            let _ = writer
                                .send(
                                    MessageType::Error,
                                    &ErrorMessage {
                                        transfer_id: id,
                                        code: ErrorKind::TransferFailed.code(),
                                        message: "too many consecutive file failures".to_string(),
                                        fatal: true,
                                    }
                                    .encode(),
                                )
                                .await;
                        }
                        self.emit(SeaDropEvent::TransferComplete(result)).await;
                    }
                }
            }
        }
        Ok(())
    }

    async fn on_progress(self: &Arc<Self>, msg: ProgressMessage) -> Result<()> {
        // The sender's terminal progress closes the receive side.
        if msg.bytes_done < msg.bytes_total {
            return Ok(());
        }
        let mut incoming = self.incoming.lock().await;
        let transfer = match incoming.remove(&msg.transfer_id) {
            Some(t) => t,
            None => return Ok(()),
        };
        drop(incoming);

        let from = transfer.machine.current();
        if transfer.machine.transition(TransferState::Completed).is_err() {
            transfer.machine.force_transition(TransferState::Completed);
        }
        self.emit_state_change(msg.transfer_id, from, TransferState::Completed)
            .await;

        let (result, peer_name) = finish_incoming(transfer, TransferState::Completed, None);
        info!(
            transfer = %msg.transfer_id,
            files_ok = result.successful.len(),
            files_failed = result.failed.len(),
            "receive complete"
        );
        self.record_result(&result, &peer_name);
        self.emit(SeaDropEvent::TransferComplete(result)).await;
        Ok(())
    }

    async fn on_remote_cancel(self: &Arc<Self>, id: &TransferId) {
        self.signal_outgoing(id, SenderSignal::RemoteCancelled).await;

        if let Some(pending) = self.pending.lock().await.remove(id) {
            pending.expiry_task.abort();
            pending.machine.force_transition(TransferState::Cancelled);
            self.emit_state_change(*id, TransferState::AwaitingAccept, TransferState::Cancelled)
                .await;
        }

        let removed = self.incoming.lock().await.remove(id);
        if let Some(mut transfer) = removed {
            transfer.machine.force_transition(TransferState::Cancelled);
            discard_partial(&mut transfer).await;
            let (result, peer_name) = finish_incoming(transfer, TransferState::Cancelled, None);
            self.record_result(&result, &peer_name);
            self.emit(SeaDropEvent::TransferComplete(result)).await;
        }
    }

    async fn on_remote_pause(&self, id: &TransferId, paused: bool) {
        // Remote pause/resume of an outgoing transfer.
        if let Some(handle) = self.outgoing.lock().await.get(id) {
            let _ = handle.signals.send(if paused {
                SenderSignal::RemotePaused
            } else {
                SenderSignal::RemoteResumed
            });
            handle.control.send_modify(|c| c.paused = paused);
            return;
        }
        // Mirror the sender's state on the receiving side.
        if let Some(transfer) = self.incoming.lock().await.get_mut(id) {
            let target = if paused {
                TransferState::Paused
            } else {
                TransferState::InProgress
            };
            let from = transfer.machine.current();
            if transfer.machine.transition(target).is_ok() {
                self.emit_state_change(*id, from, target).await;
            }
        }
    }

    async fn on_wire_error(self: &Arc<Self>, msg: ErrorMessage) {
        warn!(
            transfer = %msg.transfer_id,
            code = msg.code,
            fatal = msg.fatal,
            message = %msg.message,
            "peer reported error"
        );
        if !msg.fatal {
            self.emit(SeaDropEvent::Error {
                device_id: None,
                error: Error::new(ErrorKind::from_code(msg.code), msg.message.clone()),
            })
            .await;
            return;
        }

        self.signal_outgoing(&msg.transfer_id, SenderSignal::RemoteCancelled)
            .await;
        if let Some(handle) = self.outgoing.lock().await.get(&msg.transfer_id) {
            handle.machine.force_transition(TransferState::Failed);
        }

        let removed = self.incoming.lock().await.remove(&msg.transfer_id);
        if let Some(mut transfer) = removed {
            transfer.machine.force_transition(TransferState::Failed);
            discard_partial(&mut transfer).await;
            let (result, peer_name) =
                finish_incoming(transfer, TransferState::Failed, Some(msg.message));
            self.record_result(&result, &peer_name);
            self.emit(SeaDropEvent::TransferComplete(result)).await;
        }
    }
}

/// Identity fields of a chunk, without the data payload.
fn chunk_key(chunk: &FileChunkMessage) -> FileChunkMessage {
    FileChunkMessage {
        transfer_id: chunk.transfer_id,
        file_index: chunk.file_index,
        chunk_index: chunk.chunk_index,
        chunk_size: 0,
        data: Vec::new(),
    }
}

async fn open_current_file(
    transfer: &mut IncomingTransfer,
    header: FileHeaderMessage,
    path: PathBuf,
    expected_checksum: Option<[u8; 32]>,
) {
    if let Some(parent) = path.parent() {
        let _ = tokio::fs::create_dir_all(parent).await;
    }
    match tokio::fs::File::create(&path).await {
        Ok(file) => {
            let hasher = expected_checksum.map(|_| HashStream::new());
            transfer.current = Some(CurrentFile {
                header,
                file: Some(file),
                saved_path: Some(path),
                next_chunk: 0,
                written: 0,
                hasher,
                expected_checksum,
            });
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot open file for writing");
            // Chunks will be nacked until the sender gives up on the file.
            transfer.current = None;
        }
    }
}

async fn discard_partial(transfer: &mut IncomingTransfer) {
    // Partial files are deleted, not resumed.
    if let Some(current) = transfer.current.take() {
        drop(current.file);
        if let Some(path) = current.saved_path {
            let _ = tokio::fs::remove_file(&path).await;
        }
    }
}

fn all_outcomes(request: &TransferRequestMessage, error: Option<&str>) -> Vec<FileOutcome> {
    request
        .files
        .iter()
        .map(|f| FileOutcome {
            relative_path: f.relative_path.clone(),
            size: f.size,
            saved_path: None,
            error: error.map(|e| e.to_string()),
        })
        .collect()
}

fn finish_incoming(
    mut transfer: IncomingTransfer,
    final_state: TransferState,
    error_message: Option<String>,
) -> (TransferResult, String) {
    // Files never reached land in the skipped partition so the result
    // always accounts for the full request.
    let reached: std::collections::HashSet<&str> = transfer
        .successful
        .iter()
        .chain(&transfer.failed)
        .chain(&transfer.skipped)
        .map(|f| f.relative_path.as_str())
        .collect();
    let unreached: Vec<FileOutcome> = transfer
        .request
        .files
        .iter()
        .filter(|f| !reached.contains(f.relative_path.as_str()))
        .map(|f| FileOutcome {
            relative_path: f.relative_path.clone(),
            size: f.size,
            saved_path: None,
            error: None,
        })
        .collect();
    transfer.skipped.extend(unreached);

    let duration = transfer.started.elapsed();
    let bytes_done = transfer.tracker.bytes_done();
    let result = TransferResult {
        id: transfer.request.transfer_id,
        peer_id: transfer.peer.id,
        direction: TransferDirection::Receive,
        final_state,
        bytes_done,
        duration,
        avg_speed_bps: if duration.as_secs_f64() > 0.0 {
            bytes_done as f64 / duration.as_secs_f64()
        } else {
            0.0
        },
        successful: transfer.successful,
        failed: transfer.failed,
        skipped: transfer.skipped,
        error_message,
    };
    let peer_name = transfer.peer.display_name().to_string();
    (result, peer_name)
}

fn collect_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir).map_err(|e| {
            Error::new(
                ErrorKind::FileReadError,
                format!("cannot read {}: {}", dir.display(), e),
            )
        })? {
            let entry = entry.map_err(|e| Error::new(ErrorKind::FileReadError, e.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.is_file() {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::packet::PacketParser;
    use crate::session::channel::{secure_channel, ChannelReader};

    struct Harness {
        engine: Arc<TransferEngine>,
        events: mpsc::Receiver<SeaDropEvent>,
        /// Far side of the link: what the engine sends arrives here.
        far_reader: ChannelReader<BoxedTransport>,
        far_writer: ChannelWriter<BoxedTransport>,
        peer: Device,
        _download_dir: tempfile::TempDir,
        download_path: PathBuf,
    }

    async fn harness_with(configure: impl FnOnce(SeaDropConfig) -> SeaDropConfig) -> Harness {
        let download_dir = tempfile::tempdir().unwrap();
        let download_path = download_dir.path().to_path_buf();
        let mut config = SeaDropConfig::for_testing(download_path.clone());
        config.use_sender_subdir = false;
        let config = configure(config);

        let store = Arc::new(TrustStore::open_in_memory().unwrap());
        let monitor = Arc::new(DistanceMonitor::new());
        monitor.set_smoothing_window(1);
        monitor.set_zone_hysteresis(std::time::Duration::ZERO);
        let (event_tx, event_rx) = mpsc::channel(1024);
        let engine = TransferEngine::new(config, store.clone(), monitor, event_tx);

        let peer = Device::discovered(DeviceId([0xBB; 32]), "peer-device");
        store.save(&peer).unwrap();

        let key = [0x11u8; 32];
        let (near, far) = tokio::io::duplex(1024 * 1024);
        let near: BoxedTransport = Box::new(near);
        let far: BoxedTransport = Box::new(far);
        let (near_reader, near_writer) = secure_channel(near, key, PacketParser::new());
        let (far_reader, far_writer) = secure_channel(far, key, PacketParser::new());

        engine.set_link(near_writer, peer.clone()).await;

        // Pump: messages arriving at the near side go into the engine,
        // standing in for the session read loop.
        {
            let engine = engine.clone();
            let mut near_reader = near_reader;
            tokio::spawn(async move {
                while let Ok(Some(msg)) = near_reader.next().await {
                    let _ = engine.handle_message(msg.msg_type, &msg.payload).await;
                }
            });
        }

        Harness {
            engine,
            events: event_rx,
            far_reader,
            far_writer,
            peer,
            _download_dir: download_dir,
            download_path,
        }
    }

    async fn harness() -> Harness {
        harness_with(|c| c).await
    }

    async fn next_far(h: &mut Harness) -> (MessageType, Vec<u8>) {
        let msg = h.far_reader.next().await.unwrap().unwrap();
        (msg.msg_type, msg.payload)
    }

    fn request_for(files: &[(&str, u64)], include_checksum: bool) -> TransferRequestMessage {
        TransferRequestMessage {
            transfer_id: TransferId::generate(),
            total_size: files.iter().map(|(_, s)| *s).sum(),
            include_checksum,
            files: files
                .iter()
                .map(|(name, size)| FileEntry {
                    relative_path: name.to_string(),
                    size: *size,
                    mime: "application/octet-stream".to_string(),
                    modified_time: 0,
                    checksum: include_checksum.then_some([0u8; 32]),
                })
                .collect(),
        }
    }

    async fn drive_incoming_file(
        h: &mut Harness,
        id: TransferId,
        file_index: u32,
        data: &[u8],
        chunk_size: usize,
        checksum: Option<[u8; 32]>,
    ) {
        let total_chunks = data.len().div_ceil(chunk_size) as u32;
        h.far_writer
            .send(
                MessageType::FileHeader,
                &FileHeaderMessage {
                    transfer_id: id,
                    file_index,
                    filename: format!("file-{}", file_index),
                    file_size: data.len() as u64,
                    total_chunks,
                    chunk_size: chunk_size as u32,
                }
                .encode(),
            )
            .await
            .unwrap();

        for (chunk_index, chunk) in data.chunks(chunk_size).enumerate() {
            h.far_writer
                .send(
                    MessageType::FileChunk,
                    &FileChunkMessage {
                        transfer_id: id,
                        file_index,
                        chunk_index: chunk_index as u32,
                        chunk_size: chunk.len() as u32,
                        data: chunk.to_vec(),
                    }
                    .encode(),
                )
                .await
                .unwrap();
            let (msg_type, payload) = next_far(h).await;
            assert_eq!(msg_type, MessageType::ChunkAck, "expected ack");
            let ack = ChunkAckMessage::decode(&payload).unwrap();
            assert!(ack.success);
            assert_eq!(ack.chunk_index, chunk_index as u32);
        }

        let _ = checksum;
        h.far_writer
            .send(
                MessageType::FileComplete,
                &FileCompleteMessage {
                    transfer_id: id,
                    file_index,
                }
                .encode(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_send_files_rejects_missing_path() {
        let h = harness().await;
        let err = h
            .engine
            .send_files(vec![PathBuf::from("/no/such/file")])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileNotFound);
    }

    #[tokio::test]
    async fn test_send_files_rejects_empty() {
        let h = harness().await;
        let err = h.engine.send_files(vec![]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_send_files_requires_link() {
        let h = harness().await;
        h.engine.clear_link().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello").unwrap();
        let err = h.engine.send_files(vec![path]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn test_send_files_enforces_size_limit() {
        let h = harness_with(|mut c| {
            c.max_transfer_bytes = 4;
            c
        })
        .await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.bin");
        std::fs::write(&path, vec![0u8; 100]).unwrap();
        let err = h.engine.send_files(vec![path]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileTooLarge);
    }

    #[tokio::test]
    async fn test_sender_full_flow() {
        let mut h = harness().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        let data: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        let id = h.engine.send_files(vec![path]).await.unwrap();

        // Far side sees the request and accepts.
        let (msg_type, payload) = next_far(&mut h).await;
        assert_eq!(msg_type, MessageType::TransferRequest);
        let request = TransferRequestMessage::decode(&payload).unwrap();
        assert_eq!(request.transfer_id, id);
        assert_eq!(request.total_size, 3000);
        assert!(request.include_checksum);

        h.far_writer
            .send(
                MessageType::TransferAccept,
                &TransferAcceptMessage {
                    transfer_id: id,
                    save_directory: String::new(),
                }
                .encode(),
            )
            .await
            .unwrap();

        // Header, then stop-and-wait chunks (1024-byte test chunks).
        let (msg_type, payload) = next_far(&mut h).await;
        assert_eq!(msg_type, MessageType::FileHeader);
        let header = FileHeaderMessage::decode(&payload).unwrap();
        assert_eq!(header.file_size, 3000);
        assert_eq!(header.total_chunks, 3);

        let mut received = Vec::new();
        for expected_index in 0..3u32 {
            let (msg_type, payload) = next_far(&mut h).await;
            assert_eq!(msg_type, MessageType::FileChunk);
            let chunk = FileChunkMessage::decode(&payload).unwrap();
            assert_eq!(chunk.chunk_index, expected_index);
            assert!(chunk.size_consistent());
            received.extend_from_slice(&chunk.data);

            h.far_writer
                .send(
                    MessageType::ChunkAck,
                    &ChunkAckMessage {
                        transfer_id: id,
                        file_index: 0,
                        chunk_index: expected_index,
                        success: true,
                    }
                    .encode(),
                )
                .await
                .unwrap();
        }
        assert_eq!(received, data);

        let (msg_type, _) = next_far(&mut h).await;
        assert_eq!(msg_type, MessageType::FileComplete);

        let (msg_type, payload) = next_far(&mut h).await;
        assert_eq!(msg_type, MessageType::Progress);
        let progress = ProgressMessage::decode(&payload).unwrap();
        assert_eq!(progress.bytes_done, 3000);
        assert_eq!(progress.bytes_total, 3000);

        // The terminal result lands in the event stream.
        let result = loop {
            match h.events.recv().await.unwrap() {
                SeaDropEvent::TransferComplete(result) => break result,
                _ => continue,
            }
        };
        assert_eq!(result.final_state, TransferState::Completed);
        assert_eq!(result.bytes_done, 3000);
        assert_eq!(result.successful.len(), 1);
        assert!(result.failed.is_empty());
    }

    #[tokio::test]
    async fn test_sender_nack_retries_then_fails_file() {
        let mut h = harness_with(|mut c| {
            c.chunk_retry_limit = 1;
            c.include_checksum = false;
            c.consecutive_failure_limit = 1;
            c
        })
        .await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        std::fs::write(&path, vec![7u8; 100]).unwrap();

        let id = h.engine.send_files(vec![path]).await.unwrap();
        let (_, _) = next_far(&mut h).await; // request
        h.far_writer
            .send(
                MessageType::TransferAccept,
                &TransferAcceptMessage {
                    transfer_id: id,
                    save_directory: String::new(),
                }
                .encode(),
            )
            .await
            .unwrap();
        let (_, _) = next_far(&mut h).await; // header

        // Nack the chunk twice: initial send + one retry exhausts the budget.
        for _ in 0..2 {
            let (msg_type, _) = next_far(&mut h).await;
            assert_eq!(msg_type, MessageType::FileChunk);
            h.far_writer
                .send(
                    MessageType::ChunkNack,
                    &ChunkAckMessage {
                        transfer_id: id,
                        file_index: 0,
                        chunk_index: 0,
                        success: false,
                    }
                    .encode(),
                )
                .await
                .unwrap();
        }

        let result = loop {
            match h.events.recv().await.unwrap() {
                SeaDropEvent::TransferComplete(result) => break result,
                _ => continue,
            }
        };
        assert_eq!(result.final_state, TransferState::Failed);
    }

    #[tokio::test]
    async fn test_sender_rejected() {
        let mut h = harness().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, b"data").unwrap();

        let id = h.engine.send_files(vec![path]).await.unwrap();
        let (_, _) = next_far(&mut h).await;
        h.far_writer
            .send(
                MessageType::TransferReject,
                &TransferRejectMessage {
                    transfer_id: id,
                    reason: "not now".to_string(),
                }
                .encode(),
            )
            .await
            .unwrap();

        let result = loop {
            match h.events.recv().await.unwrap() {
                SeaDropEvent::TransferComplete(result) => break result,
                _ => continue,
            }
        };
        assert_eq!(result.final_state, TransferState::Rejected);
        assert_eq!(result.skipped.len(), 1);
    }

    #[tokio::test]
    async fn test_receiver_full_flow_with_checksum() {
        let mut h = harness().await;
        let data: Vec<u8> = (0..2500u32).map(|i| (i % 241) as u8).collect();
        let checksum = crate::security::hash(&data);

        let mut request = request_for(&[("incoming.bin", 2500)], true);
        request.files[0].checksum = Some(checksum);
        let id = request.transfer_id;

        h.far_writer
            .send(MessageType::TransferRequest, &request.encode())
            .await
            .unwrap();

        // Surfaced to the caller; accept it.
        let event = loop {
            match h.events.recv().await.unwrap() {
                SeaDropEvent::TransferRequest(event) => break event,
                _ => continue,
            }
        };
        assert_eq!(event.transfer_id, id);
        assert_eq!(event.total_size, 2500);
        h.engine.accept_transfer(&id, None).await.unwrap();

        let (msg_type, payload) = next_far(&mut h).await;
        assert_eq!(msg_type, MessageType::TransferAccept);
        TransferAcceptMessage::decode(&payload).unwrap();

        drive_incoming_file(&mut h, id, 0, &data, 1000, Some(checksum)).await;

        // Terminal progress from the sender side closes the transfer.
        h.far_writer
            .send(
                MessageType::Progress,
                &ProgressMessage {
                    transfer_id: id,
                    bytes_done: 2500,
                    bytes_total: 2500,
                    files_done: 1,
                    files_total: 1,
                }
                .encode(),
            )
            .await
            .unwrap();

        let result = loop {
            match h.events.recv().await.unwrap() {
                SeaDropEvent::TransferComplete(result) => break result,
                _ => continue,
            }
        };
        assert_eq!(result.final_state, TransferState::Completed);
        assert_eq!(result.successful.len(), 1);
        let saved = result.successful[0].saved_path.clone().unwrap();
        assert_eq!(std::fs::read(&saved).unwrap(), data);
        assert!(saved.starts_with(&h.download_path));
    }

    #[tokio::test]
    async fn test_receiver_checksum_mismatch_fails_file_not_transfer() {
        let mut h = harness().await;
        let data = vec![1u8; 500];

        let mut request = request_for(&[("bad.bin", 500), ("good.bin", 500)], true);
        request.files[0].checksum = Some([0xEE; 32]); // wrong
        request.files[1].checksum = Some(crate::security::hash(&data));
        let id = request.transfer_id;

        h.far_writer
            .send(MessageType::TransferRequest, &request.encode())
            .await
            .unwrap();
        loop {
            if let SeaDropEvent::TransferRequest(_) = h.events.recv().await.unwrap() {
                break;
            }
        }
        h.engine.accept_transfer(&id, None).await.unwrap();
        let _ = next_far(&mut h).await; // accept

        drive_incoming_file(&mut h, id, 0, &data, 500, None).await;
        drive_incoming_file(&mut h, id, 1, &data, 500, None).await;

        h.far_writer
            .send(
                MessageType::Progress,
                &ProgressMessage {
                    transfer_id: id,
                    bytes_done: 1000,
                    bytes_total: 1000,
                    files_done: 2,
                    files_total: 2,
                }
                .encode(),
            )
            .await
            .unwrap();

        let result = loop {
            match h.events.recv().await.unwrap() {
                SeaDropEvent::TransferComplete(result) => break result,
                _ => continue,
            }
        };
        assert_eq!(result.final_state, TransferState::Completed);
        assert_eq!(result.successful.len(), 1);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].relative_path, "bad.bin");
        assert!(result.failed[0].error.as_deref().unwrap().contains("checksum"));
        // sum over partitions covers the whole request
        assert_eq!(result.accounted_bytes(), 1000);
    }

    #[tokio::test]
    async fn test_receiver_rejects_blocked_peer() {
        let mut h = harness().await;
        h.engine.store.block(&h.peer.id).unwrap();

        let request = request_for(&[("x.bin", 10)], false);
        h.far_writer
            .send(MessageType::TransferRequest, &request.encode())
            .await
            .unwrap();

        let (msg_type, payload) = next_far(&mut h).await;
        assert_eq!(msg_type, MessageType::TransferReject);
        let reject = TransferRejectMessage::decode(&payload).unwrap();
        assert_eq!(reject.reason, "blocked");
    }

    #[tokio::test]
    async fn test_receiver_rejects_inconsistent_sizes() {
        let mut h = harness().await;
        let mut request = request_for(&[("x.bin", 10)], false);
        request.total_size = 999;
        h.far_writer
            .send(MessageType::TransferRequest, &request.encode())
            .await
            .unwrap();

        let (msg_type, payload) = next_far(&mut h).await;
        assert_eq!(msg_type, MessageType::TransferReject);
        assert_eq!(
            TransferRejectMessage::decode(&payload).unwrap().reason,
            "invalid request"
        );
    }

    #[tokio::test]
    async fn test_auto_accept_zone_gating() {
        let h = harness_with(|mut c| {
            c.auto_accept_trusted = true;
            c.auto_accept_max_bytes = 100;
            c
        })
        .await;
        h.engine.store.trust(&h.peer.id, &[9; 32]).unwrap();

        // No readings yet: Unknown zone, never auto-accept.
        assert!(!h.engine.auto_accept_allowed(&h.peer.id, 10, 1));

        // Intimate: any size.
        h.engine.monitor.feed_rssi(
            &h.peer.id,
            crate::distance::RssiReading::now(-40, true),
        );
        assert!(h.engine.auto_accept_allowed(&h.peer.id, 1_000_000, 1));

        // Nearby: small files only.
        h.engine.monitor.feed_rssi(
            &h.peer.id,
            crate::distance::RssiReading::now(-85, true),
        );
        assert!(h.engine.auto_accept_allowed(&h.peer.id, 100, 1));
        assert!(!h.engine.auto_accept_allowed(&h.peer.id, 101, 1));

        // Far: never.
        h.engine.monitor.feed_rssi(
            &h.peer.id,
            crate::distance::RssiReading::now(-95, true),
        );
        assert!(!h.engine.auto_accept_allowed(&h.peer.id, 10, 1));
    }

    #[tokio::test]
    async fn test_auto_accept_requires_trust() {
        let h = harness_with(|mut c| {
            c.auto_accept_trusted = true;
            c
        })
        .await;
        h.engine.monitor.feed_rssi(
            &h.peer.id,
            crate::distance::RssiReading::now(-40, true),
        );
        // Discovered but not trusted.
        assert!(!h.engine.auto_accept_allowed(&h.peer.id, 10, 1));
    }

    #[tokio::test]
    async fn test_auto_accept_suppressed_after_alert() {
        let h = harness_with(|mut c| {
            c.auto_accept_trusted = true;
            c
        })
        .await;
        h.engine.store.trust(&h.peer.id, &[9; 32]).unwrap();
        h.engine.monitor.feed_rssi(
            &h.peer.id,
            crate::distance::RssiReading::now(-40, true),
        );
        assert!(h.engine.auto_accept_allowed(&h.peer.id, 10, 1));

        h.engine.note_security_alert(&h.peer.id);
        assert!(!h.engine.auto_accept_allowed(&h.peer.id, 10, 1));
    }

    #[tokio::test]
    async fn test_out_of_order_chunk_nacked() {
        let mut h = harness().await;
        let request = request_for(&[("f.bin", 2000)], false);
        let id = request.transfer_id;

        h.far_writer
            .send(MessageType::TransferRequest, &request.encode())
            .await
            .unwrap();
        loop {
            if let SeaDropEvent::TransferRequest(_) = h.events.recv().await.unwrap() {
                break;
            }
        }
        h.engine.accept_transfer(&id, None).await.unwrap();
        let _ = next_far(&mut h).await; // accept

        h.far_writer
            .send(
                MessageType::FileHeader,
                &FileHeaderMessage {
                    transfer_id: id,
                    file_index: 0,
                    filename: "f.bin".to_string(),
                    file_size: 2000,
                    total_chunks: 2,
                    chunk_size: 1000,
                }
                .encode(),
            )
            .await
            .unwrap();

        // Send chunk 1 before chunk 0.
        h.far_writer
            .send(
                MessageType::FileChunk,
                &FileChunkMessage {
                    transfer_id: id,
                    file_index: 0,
                    chunk_index: 1,
                    chunk_size: 1000,
                    data: vec![0u8; 1000],
                }
                .encode(),
            )
            .await
            .unwrap();

        let (msg_type, payload) = next_far(&mut h).await;
        assert_eq!(msg_type, MessageType::ChunkNack);
        let nack = ChunkAckMessage::decode(&payload).unwrap();
        assert!(!nack.success);
        assert_eq!(nack.chunk_index, 1);
    }

    #[tokio::test]
    async fn test_accept_unknown_request_is_record_not_found() {
        let h = harness().await;
        let err = h
            .engine
            .accept_transfer(&TransferId([9; 16]), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RecordNotFound);

        let err = h
            .engine
            .reject_transfer(&TransferId([9; 16]), "no")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RecordNotFound);
    }

    #[tokio::test]
    async fn test_request_expiry_auto_rejects() {
        let mut h = harness_with(|mut c| {
            c.request_expiry = std::time::Duration::from_millis(50);
            c
        })
        .await;
        let request = request_for(&[("f.bin", 10)], false);
        let id = request.transfer_id;
        h.far_writer
            .send(MessageType::TransferRequest, &request.encode())
            .await
            .unwrap();
        loop {
            if let SeaDropEvent::TransferRequest(_) = h.events.recv().await.unwrap() {
                break;
            }
        }

        // Wait past expiry: a reject goes out and the accept now fails.
        let (msg_type, payload) = next_far(&mut h).await;
        assert_eq!(msg_type, MessageType::TransferReject);
        assert_eq!(
            TransferRejectMessage::decode(&payload).unwrap().reason,
            "request expired"
        );
        let err = h.engine.accept_transfer(&id, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RecordNotFound);
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let h = harness().await;
        let id = TransferId::generate();
        h.engine.cancel_transfer(&id).await.unwrap();
        h.engine.cancel_transfer(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_skip_policy_consumes_and_discards() {
        let mut h = harness_with(|mut c| {
            c.conflict_resolution = ConflictResolution::Skip;
            c
        })
        .await;

        // Pre-create the conflicting file.
        std::fs::write(h.download_path.join("dup.bin"), b"old contents").unwrap();

        let request = request_for(&[("dup.bin", 500)], false);
        let id = request.transfer_id;
        h.far_writer
            .send(MessageType::TransferRequest, &request.encode())
            .await
            .unwrap();
        loop {
            if let SeaDropEvent::TransferRequest(_) = h.events.recv().await.unwrap() {
                break;
            }
        }
        h.engine.accept_transfer(&id, None).await.unwrap();
        let _ = next_far(&mut h).await; // accept

        drive_incoming_file(&mut h, id, 0, &vec![9u8; 500], 500, None).await;
        h.far_writer
            .send(
                MessageType::Progress,
                &ProgressMessage {
                    transfer_id: id,
                    bytes_done: 500,
                    bytes_total: 500,
                    files_done: 1,
                    files_total: 1,
                }
                .encode(),
            )
            .await
            .unwrap();

        let result = loop {
            match h.events.recv().await.unwrap() {
                SeaDropEvent::TransferComplete(result) => break result,
                _ => continue,
            }
        };
        assert_eq!(result.skipped.len(), 1);
        assert!(result.successful.is_empty());
        // Existing file untouched.
        assert_eq!(
            std::fs::read(h.download_path.join("dup.bin")).unwrap(),
            b"old contents"
        );
    }

    #[tokio::test]
    async fn test_auto_rename_on_conflict() {
        let mut h = harness().await;
        std::fs::write(h.download_path.join("photo.jpg"), b"original").unwrap();

        let request = request_for(&[("photo.jpg", 100)], false);
        let id = request.transfer_id;
        h.far_writer
            .send(MessageType::TransferRequest, &request.encode())
            .await
            .unwrap();
        loop {
            if let SeaDropEvent::TransferRequest(_) = h.events.recv().await.unwrap() {
                break;
            }
        }
        h.engine.accept_transfer(&id, None).await.unwrap();
        let _ = next_far(&mut h).await;

        drive_incoming_file(&mut h, id, 0, &vec![5u8; 100], 100, None).await;
        h.far_writer
            .send(
                MessageType::Progress,
                &ProgressMessage {
                    transfer_id: id,
                    bytes_done: 100,
                    bytes_total: 100,
                    files_done: 1,
                    files_total: 1,
                }
                .encode(),
            )
            .await
            .unwrap();

        let result = loop {
            match h.events.recv().await.unwrap() {
                SeaDropEvent::TransferComplete(result) => break result,
                _ => continue,
            }
        };
        let saved = result.successful[0].saved_path.clone().unwrap();
        assert_eq!(saved.file_name().unwrap(), "photo (1).jpg");
        assert_eq!(
            std::fs::read(h.download_path.join("photo.jpg")).unwrap(),
            b"original"
        );
    }

    #[tokio::test]
    async fn test_remote_cancel_discards_partial_file() {
        let mut h = harness().await;
        let request = request_for(&[("partial.bin", 2000)], false);
        let id = request.transfer_id;
        h.far_writer
            .send(MessageType::TransferRequest, &request.encode())
            .await
            .unwrap();
        loop {
            if let SeaDropEvent::TransferRequest(_) = h.events.recv().await.unwrap() {
                break;
            }
        }
        h.engine.accept_transfer(&id, None).await.unwrap();
        let _ = next_far(&mut h).await;

        // One chunk of two, then a remote cancel.
        h.far_writer
            .send(
                MessageType::FileHeader,
                &FileHeaderMessage {
                    transfer_id: id,
                    file_index: 0,
                    filename: "partial.bin".to_string(),
                    file_size: 2000,
                    total_chunks: 2,
                    chunk_size: 1000,
                }
                .encode(),
            )
            .await
            .unwrap();
        h.far_writer
            .send(
                MessageType::FileChunk,
                &FileChunkMessage {
                    transfer_id: id,
                    file_index: 0,
                    chunk_index: 0,
                    chunk_size: 1000,
                    data: vec![3u8; 1000],
                }
                .encode(),
            )
            .await
            .unwrap();
        let _ = next_far(&mut h).await; // ack

        h.far_writer
            .send(
                MessageType::TransferCancel,
                &TransferControlMessage { transfer_id: id }.encode(),
            )
            .await
            .unwrap();

        let result = loop {
            match h.events.recv().await.unwrap() {
                SeaDropEvent::TransferComplete(result) => break result,
                _ => continue,
            }
        };
        assert_eq!(result.final_state, TransferState::Cancelled);
        assert!(!h.download_path.join("partial.bin").exists());
    }

    #[tokio::test]
    async fn test_completed_history_bounded() {
        let h = harness_with(|mut c| {
            c.completed_history_limit = 2;
            c
        })
        .await;
        for _ in 0..4 {
            let result = TransferResult {
                id: TransferId::generate(),
                peer_id: h.peer.id,
                direction: TransferDirection::Send,
                final_state: TransferState::Completed,
                bytes_done: 1,
                duration: std::time::Duration::from_secs(1),
                avg_speed_bps: 1.0,
                successful: vec![],
                failed: vec![],
                skipped: vec![],
                error_message: None,
            };
            h.engine.record_result(&result, "peer");
        }
        assert_eq!(h.engine.completed_history().len(), 2);
        // Persistent history kept everything.
        assert_eq!(h.engine.store.get_history(10, 0).unwrap().len(), 4);
    }
}
