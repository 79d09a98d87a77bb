//! Pairing
//!
//! Runs after a session is established with a peer that is not yet
//! trusted. Both sides derive the same 6-digit verification code from the
//! session secret and display it; the initiator additionally shows a
//! PIN. Nothing about the codes crosses the wire: the humans comparing
//! displays are the MAC. Acceptance on each side promotes the peer to
//! `Trusted` and persists the session key as the long-term shared key.
//!
//! Reject, mismatch, or timeout (default 60 s) drops the attempt without
//! storing anything.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::data::TrustStore;
use crate::protocol::config::SeaDropConfig;
use crate::protocol::error::{Error, ErrorKind, Result};
use crate::protocol::events::{PairingRequestEvent, SeaDropEvent};
use crate::protocol::types::{current_timestamp, Device, DeviceId, TrustLevel};
use crate::security::{derive_verification_code, generate_pairing_pin};

struct PendingPairing {
    peer: Device,
    session_key: Zeroizing<[u8; 32]>,
    verification_code: String,
    expires_at: i64,
    timeout_task: tokio::task::JoinHandle<()>,
}

/// Drives the pairing subflow for the single active session.
pub struct PairingManager {
    config: SeaDropConfig,
    store: Arc<TrustStore>,
    events: tokio::sync::mpsc::Sender<SeaDropEvent>,
    pending: Mutex<Option<PendingPairing>>,
}

impl PairingManager {
    pub fn new(
        config: SeaDropConfig,
        store: Arc<TrustStore>,
        events: tokio::sync::mpsc::Sender<SeaDropEvent>,
    ) -> Arc<Self> {
        Arc::new(PairingManager {
            config,
            store,
            events,
            pending: Mutex::new(None),
        })
    }

    /// Start a pairing attempt for an unpaired session peer.
    ///
    /// Emits `PairingRequest` with the verification code (and, on the
    /// initiating side, a PIN) and arms the expiry timer.
    pub async fn begin(
        self: &Arc<Self>,
        peer: Device,
        session_key: &[u8; 32],
        initiator: bool,
    ) -> Result<()> {
        let mut pending = self.pending.lock().await;
        if pending.is_some() {
            return Err(Error::new(
                ErrorKind::InvalidState,
                "a pairing attempt is already in progress",
            ));
        }

        let verification_code = derive_verification_code(session_key);
        let pin = initiator.then(generate_pairing_pin);
        let expires_at = current_timestamp() + self.config.pairing_timeout.as_secs() as i64;

        // Mark the record while the decision is outstanding.
        let mut record = peer.clone();
        if record.trust_level != TrustLevel::Trusted {
            record.trust_level = TrustLevel::PairingPending;
        }
        self.store.save(&record)?;

        let manager = self.clone();
        let peer_id = peer.id;
        let timeout = self.config.pairing_timeout;
        let timeout_task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            manager.expire(&peer_id).await;
        });

        info!(peer = %peer.id, code = %verification_code, "pairing started");
        let event = PairingRequestEvent {
            device: peer.clone(),
            verification_code: verification_code.clone(),
            pin,
            expires_at,
        };
        *pending = Some(PendingPairing {
            peer,
            session_key: Zeroizing::new(*session_key),
            verification_code,
            expires_at,
            timeout_task,
        });
        drop(pending);

        let _ = self
            .events
            .send(SeaDropEvent::PairingRequest(event))
            .await;
        Ok(())
    }

    /// The verification code currently on display, if a pairing is pending.
    pub async fn current_code(&self) -> Option<String> {
        self.pending
            .lock()
            .await
            .as_ref()
            .map(|p| p.verification_code.clone())
    }

    /// User confirmed the codes match: promote the peer to `Trusted` and
    /// persist the shared key.
    pub async fn accept(&self, peer_id: &DeviceId) -> Result<Device> {
        let mut slot = self.pending.lock().await;
        let pending = match slot.take() {
            Some(p) if p.peer.id == *peer_id => p,
            Some(p) => {
                let err = Error::new(
                    ErrorKind::RecordNotFound,
                    format!("pending pairing is with {}, not {}", p.peer.id, peer_id),
                );
                *slot = Some(p);
                return Err(err);
            }
            None => {
                return Err(Error::new(
                    ErrorKind::RecordNotFound,
                    "no pairing in progress",
                ));
            }
        };
        drop(slot);
        pending.timeout_task.abort();

        if current_timestamp() > pending.expires_at {
            self.fail(&pending.peer, "pairing expired").await;
            return Err(Error::new(ErrorKind::PairingFailed, "pairing expired"));
        }

        self.store.trust(&pending.peer.id, &pending.session_key)?;
        info!(peer = %pending.peer.id, "pairing complete");
        let _ = self
            .events
            .send(SeaDropEvent::PairingComplete {
                device_id: pending.peer.id,
                success: true,
            })
            .await;

        let mut device = pending.peer.clone();
        device.trust_level = TrustLevel::Trusted;
        Ok(device)
    }

    /// User rejected the attempt; nothing is stored.
    pub async fn reject(&self, peer_id: &DeviceId) -> Result<()> {
        let pending = {
            let mut slot = self.pending.lock().await;
            match slot.take() {
                Some(p) if p.peer.id == *peer_id => p,
                other => {
                    *slot = other;
                    return Err(Error::new(
                        ErrorKind::RecordNotFound,
                        "no matching pairing in progress",
                    ));
                }
            }
        };
        pending.timeout_task.abort();
        self.fail(&pending.peer, "pairing rejected").await;
        Ok(())
    }

    /// Drop any pending attempt, e.g. when the session goes away.
    pub async fn abort(&self) {
        let pending = self.pending.lock().await.take();
        if let Some(pending) = pending {
            pending.timeout_task.abort();
            self.fail(&pending.peer, "session closed during pairing").await;
        }
    }

    async fn expire(&self, peer_id: &DeviceId) {
        let pending = {
            let mut slot = self.pending.lock().await;
            match slot.as_ref() {
                Some(p) if p.peer.id == *peer_id => slot.take(),
                _ => None,
            }
        };
        if let Some(pending) = pending {
            warn!(peer = %peer_id, "pairing timed out");
            self.fail(&pending.peer, "pairing timed out").await;
        }
    }

    async fn fail(&self, peer: &Device, reason: &str) {
        // Back to Discovered; no key was ever stored.
        let mut record = peer.clone();
        if record.trust_level != TrustLevel::Trusted {
            record.trust_level = TrustLevel::Discovered;
            if let Err(e) = self.store.save(&record) {
                warn!(error = %e, "failed to reset trust level after pairing failure");
            }
        }

        let _ = self
            .events
            .send(SeaDropEvent::PairingComplete {
                device_id: peer.id,
                success: false,
            })
            .await;
        let _ = self
            .events
            .send(SeaDropEvent::Error {
                device_id: Some(peer.id),
                error: Error::new(ErrorKind::PairingFailed, reason),
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    struct Harness {
        manager: Arc<PairingManager>,
        events: tokio::sync::mpsc::Receiver<SeaDropEvent>,
        store: Arc<TrustStore>,
        peer: Device,
    }

    async fn harness(configure: impl FnOnce(SeaDropConfig) -> SeaDropConfig) -> Harness {
        let config = configure(SeaDropConfig::for_testing(PathBuf::from("/tmp")));
        let store = Arc::new(TrustStore::open_in_memory().unwrap());
        let (event_tx, event_rx) = tokio::sync::mpsc::channel(64);
        let manager = PairingManager::new(config, store.clone(), event_tx);

        let peer = Device::discovered(DeviceId([0xDD; 32]), "pair-peer");
        store.save(&peer).unwrap();

        Harness {
            manager,
            events: event_rx,
            store,
            peer,
        }
    }

    #[tokio::test]
    async fn test_begin_emits_request_with_code() {
        let mut h = harness(|c| c).await;
        let key = [7u8; 32];
        h.manager.begin(h.peer.clone(), &key, true).await.unwrap();

        let event = match h.events.recv().await.unwrap() {
            SeaDropEvent::PairingRequest(event) => event,
            other => panic!("unexpected event {:?}", other.name()),
        };
        assert_eq!(event.verification_code, derive_verification_code(&key));
        assert!(event.pin.is_some());
        assert_eq!(event.pin.as_ref().unwrap().len(), 6);

        // Responder side shows no PIN.
        let h2 = harness(|c| c).await;
        h2.manager.begin(h2.peer.clone(), &key, false).await.unwrap();
        assert_eq!(h2.manager.current_code().await.unwrap(), event.verification_code);
    }

    #[tokio::test]
    async fn test_both_sides_derive_same_code() {
        let key = [42u8; 32];
        assert_eq!(derive_verification_code(&key), derive_verification_code(&key));
    }

    #[tokio::test]
    async fn test_pending_marks_record() {
        let h = harness(|c| c).await;
        h.manager.begin(h.peer.clone(), &[1; 32], false).await.unwrap();
        let record = h.store.get(&h.peer.id).unwrap().unwrap();
        assert_eq!(record.trust_level, TrustLevel::PairingPending);
    }

    #[tokio::test]
    async fn test_accept_trusts_and_stores_key() {
        let mut h = harness(|c| c).await;
        let key = [9u8; 32];
        h.manager.begin(h.peer.clone(), &key, true).await.unwrap();

        let device = h.manager.accept(&h.peer.id).await.unwrap();
        assert_eq!(device.trust_level, TrustLevel::Trusted);
        assert!(h.store.is_trusted(&h.peer.id).unwrap());
        assert_eq!(h.store.get_shared_key(&h.peer.id).unwrap(), key);

        loop {
            match h.events.recv().await.unwrap() {
                SeaDropEvent::PairingComplete { device_id, success } => {
                    assert_eq!(device_id, h.peer.id);
                    assert!(success);
                    break;
                }
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_reject_stores_nothing() {
        let mut h = harness(|c| c).await;
        h.manager.begin(h.peer.clone(), &[3; 32], false).await.unwrap();
        h.manager.reject(&h.peer.id).await.unwrap();

        assert!(!h.store.is_trusted(&h.peer.id).unwrap());
        assert!(h.store.get_shared_key(&h.peer.id).is_err());
        let record = h.store.get(&h.peer.id).unwrap().unwrap();
        assert_eq!(record.trust_level, TrustLevel::Discovered);

        loop {
            match h.events.recv().await.unwrap() {
                SeaDropEvent::PairingComplete { success, .. } => {
                    assert!(!success);
                    break;
                }
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_timeout_fails_pairing() {
        let mut h = harness(|mut c| {
            c.pairing_timeout = std::time::Duration::from_millis(50);
            c
        })
        .await;
        h.manager.begin(h.peer.clone(), &[4; 32], false).await.unwrap();

        // Wait for the expiry to fire.
        let mut saw_failure = false;
        loop {
            match h.events.recv().await.unwrap() {
                SeaDropEvent::PairingComplete { success, .. } => {
                    assert!(!success);
                    saw_failure = true;
                }
                SeaDropEvent::Error { error, .. } => {
                    assert_eq!(error.kind(), ErrorKind::PairingFailed);
                    if saw_failure {
                        break;
                    }
                }
                _ => continue,
            }
        }
        let err = h.manager.accept(&h.peer.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RecordNotFound);
    }

    #[tokio::test]
    async fn test_accept_without_pending() {
        let h = harness(|c| c).await;
        let err = h.manager.accept(&h.peer.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RecordNotFound);
    }

    #[tokio::test]
    async fn test_accept_wrong_peer_keeps_pending() {
        let h = harness(|c| c).await;
        h.manager.begin(h.peer.clone(), &[5; 32], false).await.unwrap();

        let err = h.manager.accept(&DeviceId([0x01; 32])).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RecordNotFound);
        // The original attempt is still pending.
        assert!(h.manager.current_code().await.is_some());
    }

    #[tokio::test]
    async fn test_second_begin_rejected_while_pending() {
        let h = harness(|c| c).await;
        h.manager.begin(h.peer.clone(), &[6; 32], false).await.unwrap();
        let err = h
            .manager
            .begin(h.peer.clone(), &[7; 32], false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn test_abort_clears_pending() {
        let h = harness(|c| c).await;
        h.manager.begin(h.peer.clone(), &[8; 32], false).await.unwrap();
        h.manager.abort().await;
        assert!(h.manager.current_code().await.is_none());
    }
}
