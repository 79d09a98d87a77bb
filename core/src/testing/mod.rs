//! Testing utilities
//!
//! In-process helpers for exercising two connected SeaDrop endpoints
//! without any real radio or network: the "connection layer" is a tokio
//! duplex pipe.
//!
//! # Example
//!
//! ```ignore
//! let (mut alice, mut bob) = connected_pair(dir_a, dir_b).await?;
//! alice.node.send_files(vec![path]).await?;
//! let request = wait_for(&mut bob.events, |e| match e {
//!     SeaDropEvent::TransferRequest(r) => Some(r),
//!     _ => None,
//! }).await;
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::protocol::config::SeaDropConfig;
use crate::protocol::core::SeaDrop;
use crate::protocol::error::{Error, ErrorKind, Result};
use crate::protocol::events::SeaDropEvent;
use crate::protocol::types::Device;
use crate::session::handshake::HandshakeRole;

/// One side of a connected test pair.
pub struct PairEnd {
    pub node: Arc<SeaDrop>,
    pub events: mpsc::Receiver<SeaDropEvent>,
    /// The other side, as this side sees it.
    pub peer: Device,
}

/// Start two nodes with in-memory stores and join them over a duplex pipe.
///
/// Returns once both handshakes completed. The nodes are not yet paired;
/// a `PairingRequest` is waiting in each event stream.
pub async fn connected_pair(download_a: PathBuf, download_b: PathBuf) -> Result<(PairEnd, PairEnd)> {
    let a = SeaDrop::start(SeaDropConfig::for_testing(download_a).with_device_name("node-a"))?;
    let b = SeaDrop::start(SeaDropConfig::for_testing(download_b).with_device_name("node-b"))?;
    join_nodes(a, b).await
}

/// Join two already started nodes over a fresh duplex pipe.
pub async fn join_nodes(a: Arc<SeaDrop>, b: Arc<SeaDrop>) -> Result<(PairEnd, PairEnd)> {
    let events_a = a.events().await.ok_or_else(|| {
        Error::new(ErrorKind::InvalidState, "event stream already taken")
    })?;
    let events_b = b.events().await.ok_or_else(|| {
        Error::new(ErrorKind::InvalidState, "event stream already taken")
    })?;

    let (end_a, end_b) = tokio::io::duplex(1024 * 1024);
    let (peer_of_a, peer_of_b) = tokio::join!(
        a.attach_transport(end_a, HandshakeRole::Initiator),
        b.attach_transport(end_b, HandshakeRole::Responder),
    );

    Ok((
        PairEnd {
            node: a,
            events: events_a,
            peer: peer_of_a?,
        },
        PairEnd {
            node: b,
            events: events_b,
            peer: peer_of_b?,
        },
    ))
}

/// Complete pairing on both ends of a connected pair.
pub async fn pair_both(a: &mut PairEnd, b: &mut PairEnd) -> Result<()> {
    let code_a = wait_for(&mut a.events, |e| match e {
        SeaDropEvent::PairingRequest(req) => Some(req.verification_code),
        _ => None,
    })
    .await;
    let code_b = wait_for(&mut b.events, |e| match e {
        SeaDropEvent::PairingRequest(req) => Some(req.verification_code),
        _ => None,
    })
    .await;
    if code_a != code_b {
        return Err(Error::new(
            ErrorKind::PairingFailed,
            "verification codes diverge",
        ));
    }

    a.node.accept_pairing(&a.peer.id).await?;
    b.node.accept_pairing(&b.peer.id).await?;
    Ok(())
}

/// Drain events until `select` returns a value.
pub async fn wait_for<T>(
    events: &mut mpsc::Receiver<SeaDropEvent>,
    mut select: impl FnMut(SeaDropEvent) -> Option<T>,
) -> T {
    loop {
        let event = events
            .recv()
            .await
            .expect("event channel closed while waiting");
        if let Some(value) = select(event) {
            return value;
        }
    }
}
