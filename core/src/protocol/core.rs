//! The SeaDrop façade
//!
//! Owns the local identity and wires the subsystems together: trust
//! store, distance monitor, transfer engine, clipboard and pairing
//! managers, and the per-session read loop. External collaborators feed
//! it discovery sightings, RSSI readings and connected transports; it
//! reports everything back through one event channel.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::clipboard::{ClipboardManager, ClipboardSink, ReceivedClipboard};
use crate::data::{HistoryEntry, TransferStats, TrustStore};
use crate::distance::{DistanceMonitor, RssiReading, ZoneThresholds};
use crate::network::packet::MessageType;
use crate::pairing::PairingManager;
use crate::protocol::config::SeaDropConfig;
use crate::protocol::error::{Error, ErrorKind, Result};
use crate::protocol::events::{SeaDropEvent, StateChangedEvent, StateScope, ZoneChangedEvent};
use crate::protocol::types::{
    current_timestamp, Capabilities, ClipboardValue, Device, DeviceId, TransferId, TrustZone,
};
use crate::security::SigningKeyPair;
use crate::session::channel::{secure_channel, ChannelReader, Transport};
use crate::session::handshake::{handshake, HandshakeRole, LocalDeviceInfo};
use crate::statemachine::{
    ConnectionState, ConnectionStateMachine, DiscoveryState, DiscoveryStateMachine,
};
use crate::transfer::conflict::ConflictResolution;
use crate::transfer::{BoxedTransport, TransferEngine, TransferProgress, TransferResult};

/// Event channel depth; events are dropped with a warning beyond this.
const EVENT_CHANNEL_DEPTH: usize = 1024;

/// The core runtime. One instance per device.
pub struct SeaDrop {
    config: SeaDropConfig,
    identity: SigningKeyPair,
    local_device: Device,
    store: Arc<TrustStore>,
    monitor: Arc<DistanceMonitor>,
    engine: Arc<TransferEngine>,
    clipboard: Arc<ClipboardManager>,
    pairing: Arc<PairingManager>,
    connection: Arc<ConnectionStateMachine>,
    discovery: Arc<DiscoveryStateMachine>,
    events_tx: mpsc::Sender<SeaDropEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<SeaDropEvent>>>,
    session_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SeaDrop {
    /// Open the store, load or create the identity, and wire everything up.
    pub fn start(config: SeaDropConfig) -> Result<Arc<SeaDrop>> {
        let store = Arc::new(match &config.db_path {
            Some(path) => TrustStore::open(path)?,
            None => TrustStore::open_in_memory()?,
        });
        let identity = store.get_or_create_identity()?;
        info!(device_id = %identity.device_id(), name = %config.device_name, "seadrop starting");

        let monitor = Arc::new(DistanceMonitor::new());
        let (intimate, close, nearby) = config.zone_thresholds_m;
        monitor.set_zone_thresholds(ZoneThresholds::new(intimate, close, nearby)?);
        monitor.set_smoothing_window(config.smoothing_window);
        monitor.set_zone_hysteresis(config.zone_hysteresis);

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_DEPTH);

        let engine = TransferEngine::new(
            config.clone(),
            store.clone(),
            monitor.clone(),
            events_tx.clone(),
        );
        let clipboard = ClipboardManager::new(
            config.clone(),
            store.clone(),
            monitor.clone(),
            events_tx.clone(),
        );
        let pairing = PairingManager::new(config.clone(), store.clone(), events_tx.clone());

        // Distance callbacks fan out into the event channel; security
        // alerts additionally suppress auto-accept for a window.
        {
            let events = events_tx.clone();
            monitor.on_zone_changed(move |event| {
                let forwarded = SeaDropEvent::ZoneChanged(ZoneChangedEvent {
                    device_id: event.device_id,
                    previous_zone: event.previous_zone,
                    current_zone: event.current_zone,
                    distance: event.distance_info,
                    is_moving_closer: event.is_moving_closer,
                    requires_security_alert: event.requires_security_alert,
                });
                if events.try_send(forwarded).is_err() {
                    warn!("event channel full; dropping zone change");
                }
            });
        }
        {
            let events = events_tx.clone();
            let engine = engine.clone();
            monitor.on_security_alert(move |device_id, message| {
                engine.note_security_alert(device_id);
                let event = SeaDropEvent::SecurityAlert {
                    device_id: *device_id,
                    message: message.to_string(),
                };
                if events.try_send(event).is_err() {
                    warn!("event channel full; dropping security alert");
                }
            });
        }

        let connection = Arc::new(ConnectionStateMachine::new());
        let discovery = Arc::new(DiscoveryStateMachine::new());
        {
            let events = events_tx.clone();
            discovery.on_state_changed(move |from, to| {
                let _ = events.try_send(SeaDropEvent::StateChanged(StateChangedEvent {
                    scope: StateScope::Discovery,
                    from: from.name(),
                    to: to.name(),
                }));
            });
        }

        let mut local_device = Device::discovered(identity.device_id(), config.device_name.clone());
        local_device.platform = config.platform;
        local_device.protocol_version = config.version.clone();
        local_device.capabilities = config.capabilities;

        Ok(Arc::new(SeaDrop {
            config,
            identity,
            local_device,
            store,
            monitor,
            engine,
            clipboard,
            pairing,
            connection,
            discovery,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            session_task: Mutex::new(None),
        }))
    }

    /// Take the event receiver. Can be taken once.
    pub async fn events(&self) -> Option<mpsc::Receiver<SeaDropEvent>> {
        self.events_rx.lock().await.take()
    }

    pub fn device_id(&self) -> DeviceId {
        self.identity.device_id()
    }

    pub fn local_device(&self) -> &Device {
        &self.local_device
    }

    pub fn trust_store(&self) -> &Arc<TrustStore> {
        &self.store
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.current()
    }

    pub fn discovery_state(&self) -> DiscoveryState {
        self.discovery.current()
    }

    /// Report a discovery-layer state change (advertise/scan lifecycle).
    pub fn set_discovery_state(&self, state: DiscoveryState) -> Result<()> {
        self.discovery.transition(state)
    }

    // =========================================================================
    // Discovery inputs (external BLE collaborator)
    // =========================================================================

    /// Ingest one discovery sighting. `last_seen` is the sighting time
    /// reported by the discovery layer (Unix seconds); 0 means "now".
    pub async fn on_peer_seen(
        &self,
        device_id: DeviceId,
        name: &str,
        rssi_dbm: i32,
        capabilities: Capabilities,
        last_seen: i64,
    ) -> Result<()> {
        if device_id == self.identity.device_id() {
            return Ok(());
        }
        if self.store.is_blocked(&device_id)? {
            debug!(peer = %device_id, "ignoring sighting of blocked device");
            return Ok(());
        }

        let known = self.store.get(&device_id)?;
        let is_new = known.is_none();
        let mut device = known.unwrap_or_else(|| Device::discovered(device_id, name));
        device.name = name.to_string();
        device.capabilities = capabilities;
        device.last_seen = if last_seen > 0 {
            last_seen
        } else {
            current_timestamp()
        };
        self.store.save(&device)?;

        let event = if is_new {
            SeaDropEvent::DeviceDiscovered(device)
        } else {
            SeaDropEvent::DeviceUpdated(device)
        };
        let _ = self.events_tx.send(event).await;

        // The sighting event precedes any zone change it triggers.
        self.monitor
            .feed_rssi(&device_id, RssiReading::now(rssi_dbm, true));
        Ok(())
    }

    /// A previously seen peer went silent.
    pub async fn on_peer_lost(&self, device_id: DeviceId) {
        self.monitor.remove_device(&device_id);
        let _ = self
            .events_tx
            .send(SeaDropEvent::DeviceLost(device_id))
            .await;
    }

    /// Post-connect RSSI from the transport layer.
    pub fn feed_rssi(&self, device_id: DeviceId, rssi_dbm: i32) {
        self.monitor
            .feed_rssi(&device_id, RssiReading::now(rssi_dbm, false));
    }

    /// Current trust zone for a peer.
    pub fn zone_of(&self, device_id: &DeviceId) -> TrustZone {
        self.monitor.get_zone(device_id)
    }

    // =========================================================================
    // Sessions (external connection collaborator hands in the stream)
    // =========================================================================

    /// Run a session over a connected duplex transport.
    ///
    /// Performs the handshake (bounded by the configured timeout), wires
    /// the encrypted channel into the engines, starts the read loop, and
    /// begins pairing when the peer is not yet trusted. Returns the peer
    /// once the session is up.
    pub async fn attach_transport(
        self: &Arc<Self>,
        transport: impl Transport,
        role: HandshakeRole,
    ) -> Result<Device> {
        if self.connection.is_connected() {
            return Err(Error::new(
                ErrorKind::AlreadyConnected,
                "a session is already active",
            ));
        }
        self.connection.reset();
        self.connection.transition(ConnectionState::Connecting)?;
        self.connection.transition(ConnectionState::Establishing)?;
        self.connection.transition(ConnectionState::Handshaking)?;

        let mut boxed: BoxedTransport = Box::new(transport);
        let local_info = LocalDeviceInfo {
            name: self.config.device_name.clone(),
            platform: self.config.platform,
            version: self.config.version.clone(),
            capabilities: self.config.capabilities,
        };

        let outcome = match tokio::time::timeout(
            self.config.handshake_timeout,
            handshake(&mut boxed, &self.identity, &local_info, &self.store, role),
        )
        .await
        {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                self.connection.force_transition(ConnectionState::Error);
                self.connection
                    .force_transition(ConnectionState::Disconnected);
                return Err(e);
            }
            Err(_) => {
                self.connection.force_transition(ConnectionState::Error);
                self.connection
                    .force_transition(ConnectionState::Disconnected);
                return Err(Error::new(
                    ErrorKind::ConnectionTimeout,
                    "handshake timed out",
                ));
            }
        };

        let peer = outcome.peer.clone();
        self.connection.transition(ConnectionState::Connected)?;
        self.emit_connection_change(peer.id, ConnectionState::Handshaking, ConnectionState::Connected)
            .await;

        let (reader, writer) = secure_channel(boxed, outcome.session_key, outcome.leftover);
        self.engine.set_link(writer.clone(), peer.clone()).await;
        self.clipboard.set_link(writer.clone(), peer.clone()).await;

        let _ = self
            .events_tx
            .send(SeaDropEvent::Connected(peer.clone()))
            .await;

        if !outcome.already_paired {
            self.pairing
                .begin(
                    peer.clone(),
                    &outcome.session_key,
                    role == HandshakeRole::Initiator,
                )
                .await?;
        }

        // The session read loop owns the reader half until EOF or error.
        let task = {
            let this = self.clone();
            let peer = peer.clone();
            let writer = writer.clone();
            tokio::spawn(async move {
                let reason = this.read_loop(reader, writer, &peer).await;
                this.teardown_session(&peer, &reason).await;
            })
        };
        *self.session_task.lock().await = Some(task);

        Ok(peer)
    }

    async fn read_loop(
        self: &Arc<Self>,
        mut reader: ChannelReader<BoxedTransport>,
        writer: crate::session::channel::ChannelWriter<BoxedTransport>,
        peer: &Device,
    ) -> String {
        loop {
            match reader.next().await {
                Ok(Some(msg)) => match msg.msg_type {
                    MessageType::Ping => {
                        if writer.send(MessageType::Pong, &[]).await.is_err() {
                            return "write failed".to_string();
                        }
                    }
                    MessageType::Pong => {}
                    MessageType::Hello | MessageType::HelloAck | MessageType::VersionMismatch => {
                        debug!("ignoring handshake message inside established session");
                    }
                    MessageType::ClipboardPush => {
                        if let Err(e) = self.clipboard.handle_push(&msg.payload).await {
                            warn!(error = %e, "clipboard push failed");
                        }
                    }
                    MessageType::ClipboardAck => {
                        let _ = self.clipboard.handle_ack(&msg.payload).await;
                    }
                    _ => {
                        if let Err(e) = self.engine.handle_message(msg.msg_type, &msg.payload).await
                        {
                            warn!(
                                peer = %peer.id,
                                message = msg.msg_type.name(),
                                error = %e,
                                "message handling failed"
                            );
                        }
                    }
                },
                Ok(None) => return "peer closed the connection".to_string(),
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::DecryptAuthFailure
                            | ErrorKind::ProtocolBadMagic
                            | ErrorKind::ProtocolVersionMismatch
                            | ErrorKind::ProtocolOverflow
                    ) =>
                {
                    // Framing or authentication failures tear the
                    // connection down with no retries.
                    warn!(peer = %peer.id, error = %e, "tearing down session");
                    return e.to_string();
                }
                Err(e) => return e.to_string(),
            }
        }
    }

    async fn teardown_session(self: &Arc<Self>, peer: &Device, reason: &str) {
        info!(peer = %peer.id, reason = %reason, "session ended");
        self.engine.clear_link().await;
        self.clipboard.clear_link().await;
        self.pairing.abort().await;

        let from = self.connection.current();
        if from == ConnectionState::Connected {
            self.connection.force_transition(ConnectionState::Lost);
            self.emit_connection_change(peer.id, from, ConnectionState::Lost)
                .await;
        }
        self.connection
            .force_transition(ConnectionState::Disconnected);

        let _ = self
            .events_tx
            .send(SeaDropEvent::Disconnected {
                device_id: peer.id,
                reason: reason.to_string(),
            })
            .await;
    }

    async fn emit_connection_change(
        &self,
        peer: DeviceId,
        from: ConnectionState,
        to: ConnectionState,
    ) {
        let _ = self
            .events_tx
            .send(SeaDropEvent::StateChanged(StateChangedEvent {
                scope: StateScope::Connection(peer),
                from: from.name(),
                to: to.name(),
            }))
            .await;
    }

    /// Tear the active session down and stop background work.
    pub async fn stop(&self) {
        if let Some(task) = self.session_task.lock().await.take() {
            task.abort();
        }
        self.engine.clear_link().await;
        self.clipboard.clear_link().await;
        self.pairing.abort().await;
        self.connection.reset();
        info!("seadrop stopped");
    }

    // =========================================================================
    // Transfers
    // =========================================================================

    pub async fn send_files(self: &Arc<Self>, paths: Vec<PathBuf>) -> Result<TransferId> {
        self.engine.send_files(paths).await
    }

    pub async fn send_file(self: &Arc<Self>, path: PathBuf) -> Result<TransferId> {
        self.engine.send_file(path).await
    }

    pub async fn send_directory(self: &Arc<Self>, dir: PathBuf) -> Result<TransferId> {
        self.engine.send_directory(dir).await
    }

    pub async fn accept_transfer(
        self: &Arc<Self>,
        id: &TransferId,
        save_directory: Option<PathBuf>,
    ) -> Result<()> {
        self.engine.accept_transfer(id, save_directory).await
    }

    pub async fn reject_transfer(&self, id: &TransferId, reason: &str) -> Result<()> {
        self.engine.reject_transfer(id, reason).await
    }

    pub async fn pause_transfer(&self, id: &TransferId) -> Result<()> {
        self.engine.pause_transfer(id).await
    }

    pub async fn resume_transfer(&self, id: &TransferId) -> Result<()> {
        self.engine.resume_transfer(id).await
    }

    pub async fn cancel_transfer(&self, id: &TransferId) -> Result<()> {
        self.engine.cancel_transfer(id).await
    }

    pub async fn resolve_file_conflict(
        self: &Arc<Self>,
        id: &TransferId,
        file_index: u32,
        resolution: ConflictResolution,
    ) -> Result<()> {
        self.engine
            .resolve_file_conflict(id, file_index, resolution)
            .await
    }

    pub async fn transfer_progress(&self, id: &TransferId) -> Result<TransferProgress> {
        self.engine.get_progress(id).await
    }

    pub fn completed_transfers(&self) -> Vec<TransferResult> {
        self.engine.completed_history()
    }

    pub async fn pending_transfer_requests(&self) -> Vec<TransferId> {
        self.engine.pending_requests().await
    }

    pub fn transfer_history(&self, limit: usize, offset: usize) -> Result<Vec<HistoryEntry>> {
        self.store.get_history(limit, offset)
    }

    pub fn transfer_stats(&self) -> Result<TransferStats> {
        self.store.transfer_stats()
    }

    // =========================================================================
    // Pairing and trust
    // =========================================================================

    pub async fn accept_pairing(&self, peer_id: &DeviceId) -> Result<Device> {
        self.pairing.accept(peer_id).await
    }

    pub async fn reject_pairing(&self, peer_id: &DeviceId) -> Result<()> {
        self.pairing.reject(peer_id).await
    }

    pub fn block_device(&self, id: &DeviceId) -> Result<()> {
        self.store.block(id)
    }

    pub fn unblock_device(&self, id: &DeviceId) -> Result<()> {
        self.store.unblock(id)
    }

    pub fn untrust_device(&self, id: &DeviceId) -> Result<()> {
        self.store.untrust(id)
    }

    // =========================================================================
    // Clipboard
    // =========================================================================

    pub fn set_clipboard_sink(&self, sink: Box<dyn ClipboardSink>) {
        self.clipboard.set_sink(sink);
    }

    pub async fn push_clipboard(&self) -> Result<()> {
        self.clipboard.push().await
    }

    pub async fn push_clipboard_value(&self, value: ClipboardValue) -> Result<()> {
        self.clipboard.push_value(value).await
    }

    pub fn clipboard_history(&self) -> Vec<ReceivedClipboard> {
        self.clipboard.history()
    }

    pub fn apply_received_clipboard(&self, index: usize) -> Result<()> {
        self.clipboard.apply_received(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &tempfile::TempDir) -> SeaDropConfig {
        SeaDropConfig::for_testing(dir.path().join("downloads"))
    }

    #[tokio::test]
    async fn test_start_creates_identity() {
        let dir = tempfile::tempdir().unwrap();
        let node = SeaDrop::start(test_config(&dir)).unwrap();
        assert!(!node.device_id().is_zero());
        assert_eq!(node.local_device().name, "test-device");
        assert_eq!(node.connection_state(), ConnectionState::Disconnected);
        assert_eq!(node.discovery_state(), DiscoveryState::Idle);
    }

    #[tokio::test]
    async fn test_identity_stable_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("seadrop.db");

        let first = {
            let config = test_config(&dir).with_db_path(db.clone());
            SeaDrop::start(config).unwrap().device_id()
        };
        let second = {
            let config = test_config(&dir).with_db_path(db);
            SeaDrop::start(config).unwrap().device_id()
        };
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_events_taken_once() {
        let dir = tempfile::tempdir().unwrap();
        let node = SeaDrop::start(test_config(&dir)).unwrap();
        assert!(node.events().await.is_some());
        assert!(node.events().await.is_none());
    }

    #[tokio::test]
    async fn test_peer_seen_discovered_then_updated() {
        let dir = tempfile::tempdir().unwrap();
        let node = SeaDrop::start(test_config(&dir)).unwrap();
        let mut events = node.events().await.unwrap();

        let peer = DeviceId([0x21; 32]);
        node.on_peer_seen(peer, "phone", -50, Capabilities::default(), 0)
            .await
            .unwrap();
        match events.recv().await.unwrap() {
            SeaDropEvent::DeviceDiscovered(device) => assert_eq!(device.name, "phone"),
            other => panic!("unexpected {:?}", other.name()),
        }

        node.on_peer_seen(peer, "phone-renamed", -52, Capabilities::default(), 0)
            .await
            .unwrap();
        // The monitor reported a zone for the first reading already.
        loop {
            match events.recv().await.unwrap() {
                SeaDropEvent::DeviceUpdated(device) => {
                    assert_eq!(device.name, "phone-renamed");
                    break;
                }
                _ => continue,
            }
        }
        assert_eq!(node.zone_of(&peer), TrustZone::Intimate);
    }

    #[tokio::test]
    async fn test_blocked_peer_sightings_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let node = SeaDrop::start(test_config(&dir)).unwrap();

        let peer = DeviceId([0x22; 32]);
        node.on_peer_seen(peer, "spam", -50, Capabilities::default(), 0)
            .await
            .unwrap();
        node.block_device(&peer).unwrap();
        node.on_peer_seen(peer, "spam", -50, Capabilities::default(), 0)
            .await
            .unwrap();

        // Record still blocked; its name was not refreshed post-block.
        assert!(node.trust_store().is_blocked(&peer).unwrap());
    }

    #[tokio::test]
    async fn test_peer_lost_clears_distance() {
        let dir = tempfile::tempdir().unwrap();
        let node = SeaDrop::start(test_config(&dir)).unwrap();
        let peer = DeviceId([0x23; 32]);

        node.on_peer_seen(peer, "gone", -60, Capabilities::default(), 0)
            .await
            .unwrap();
        assert_ne!(node.zone_of(&peer), TrustZone::Unknown);

        node.on_peer_lost(peer).await;
        assert_eq!(node.zone_of(&peer), TrustZone::Unknown);
    }

    #[tokio::test]
    async fn test_full_session_pair_and_transfer() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        let alice = SeaDrop::start(
            test_config(&dir_a).with_device_name("alice"),
        )
        .unwrap();
        let bob = SeaDrop::start(
            test_config(&dir_b).with_device_name("bob"),
        )
        .unwrap();
        let mut alice_events = alice.events().await.unwrap();
        let mut bob_events = bob.events().await.unwrap();

        // External connection layer: one duplex pipe.
        let (a_end, b_end) = tokio::io::duplex(1024 * 1024);
        let (peer_of_alice, peer_of_bob) = tokio::join!(
            alice.attach_transport(a_end, HandshakeRole::Initiator),
            bob.attach_transport(b_end, HandshakeRole::Responder),
        );
        let peer_of_alice = peer_of_alice.unwrap();
        let peer_of_bob = peer_of_bob.unwrap();
        assert_eq!(peer_of_alice.id, bob.device_id());
        assert_eq!(peer_of_bob.id, alice.device_id());
        assert!(alice.connection.is_connected());

        // Both sides see a pairing request with the same code.
        let code_a = loop {
            match alice_events.recv().await.unwrap() {
                SeaDropEvent::PairingRequest(req) => break req.verification_code,
                _ => continue,
            }
        };
        let code_b = loop {
            match bob_events.recv().await.unwrap() {
                SeaDropEvent::PairingRequest(req) => break req.verification_code,
                _ => continue,
            }
        };
        assert_eq!(code_a, code_b);

        alice.accept_pairing(&bob.device_id()).await.unwrap();
        bob.accept_pairing(&alice.device_id()).await.unwrap();
        assert!(alice.trust_store().is_trusted(&bob.device_id()).unwrap());
        assert!(bob.trust_store().is_trusted(&alice.device_id()).unwrap());
        // Both ends stored the same shared key.
        assert_eq!(
            alice.trust_store().get_shared_key(&bob.device_id()).unwrap(),
            bob.trust_store().get_shared_key(&alice.device_id()).unwrap()
        );

        // Alice sends a file; Bob accepts when it surfaces.
        let payload: Vec<u8> = (0..5000u32).map(|i| (i % 199) as u8).collect();
        let src = dir_a.path().join("report.bin");
        std::fs::write(&src, &payload).unwrap();
        let transfer_id = alice.send_files(vec![src]).await.unwrap();

        let request = loop {
            match bob_events.recv().await.unwrap() {
                SeaDropEvent::TransferRequest(req) => break req,
                _ => continue,
            }
        };
        assert_eq!(request.transfer_id, transfer_id);
        assert_eq!(request.total_size, 5000);
        bob.accept_transfer(&transfer_id, None).await.unwrap();

        // Bob finishes receiving, Alice finishes sending.
        let bob_result = loop {
            match bob_events.recv().await.unwrap() {
                SeaDropEvent::TransferComplete(result) => break result,
                _ => continue,
            }
        };
        let alice_result = loop {
            match alice_events.recv().await.unwrap() {
                SeaDropEvent::TransferComplete(result) => break result,
                _ => continue,
            }
        };
        assert_eq!(
            bob_result.final_state,
            crate::statemachine::TransferState::Completed
        );
        assert_eq!(
            alice_result.final_state,
            crate::statemachine::TransferState::Completed
        );
        let saved = bob_result.successful[0].saved_path.clone().unwrap();
        assert_eq!(std::fs::read(&saved).unwrap(), payload);

        // History landed on both sides.
        assert_eq!(alice.transfer_history(10, 0).unwrap().len(), 1);
        assert_eq!(bob.transfer_history(10, 0).unwrap().len(), 1);

        alice.stop().await;
        bob.stop().await;
    }

    #[tokio::test]
    async fn test_clipboard_over_session() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        let alice = SeaDrop::start(test_config(&dir_a)).unwrap();
        let bob = SeaDrop::start(test_config(&dir_b)).unwrap();
        let mut bob_events = bob.events().await.unwrap();

        let (a_end, b_end) = tokio::io::duplex(256 * 1024);
        let (ra, rb) = tokio::join!(
            alice.attach_transport(a_end, HandshakeRole::Initiator),
            bob.attach_transport(b_end, HandshakeRole::Responder),
        );
        ra.unwrap();
        rb.unwrap();

        alice
            .push_clipboard_value(ClipboardValue::from_text("hello bob"))
            .await
            .unwrap();

        let event = loop {
            match bob_events.recv().await.unwrap() {
                SeaDropEvent::ClipboardReceived(event) => break event,
                _ => continue,
            }
        };
        assert_eq!(event.value.as_text(), Some("hello bob"));
        assert_eq!(bob.clipboard_history().len(), 1);

        alice.stop().await;
        bob.stop().await;
    }

    #[tokio::test]
    async fn test_attach_rejects_second_session() {
        let dir = tempfile::tempdir().unwrap();
        let node = SeaDrop::start(test_config(&dir)).unwrap();
        let peer_dir = tempfile::tempdir().unwrap();
        let peer = SeaDrop::start(test_config(&peer_dir)).unwrap();

        let (a_end, b_end) = tokio::io::duplex(256 * 1024);
        let (ra, rb) = tokio::join!(
            node.attach_transport(a_end, HandshakeRole::Initiator),
            peer.attach_transport(b_end, HandshakeRole::Responder),
        );
        ra.unwrap();
        rb.unwrap();

        let (extra, _keep) = tokio::io::duplex(1024);
        let err = node
            .attach_transport(extra, HandshakeRole::Initiator)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyConnected);

        node.stop().await;
        peer.stop().await;
    }

    #[tokio::test]
    async fn test_disconnect_emits_event() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        let alice = SeaDrop::start(test_config(&dir_a)).unwrap();
        let bob = SeaDrop::start(test_config(&dir_b)).unwrap();
        let mut alice_events = alice.events().await.unwrap();

        let (a_end, b_end) = tokio::io::duplex(256 * 1024);
        let (ra, rb) = tokio::join!(
            alice.attach_transport(a_end, HandshakeRole::Initiator),
            bob.attach_transport(b_end, HandshakeRole::Responder),
        );
        ra.unwrap();
        rb.unwrap();

        // Bob drops the session.
        bob.stop().await;

        loop {
            match alice_events.recv().await.unwrap() {
                SeaDropEvent::Disconnected { device_id, .. } => {
                    assert_eq!(device_id, bob.device_id());
                    break;
                }
                _ => continue,
            }
        }
        assert_eq!(alice.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_discovery_state_transitions() {
        let dir = tempfile::tempdir().unwrap();
        let node = SeaDrop::start(test_config(&dir)).unwrap();

        node.set_discovery_state(DiscoveryState::Scanning).unwrap();
        assert!(node.discovery.is_active());
        let err = node
            .set_discovery_state(DiscoveryState::Uninitialized)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }
}
