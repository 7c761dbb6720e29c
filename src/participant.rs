use std::time::Instant;

use tokio::sync::mpsc;

use crate::ids::ParticipantId;
use crate::protocol::ServerMessage;

/// A connected peer with a live signaling channel inside a room.
///
/// Outbound sends go through an unbounded mpsc channel whose receiving end is
/// drained by a single write task per channel (spawned in `channel.rs`), so a
/// slow peer cannot interleave fragments of two messages on the wire.
#[derive(Debug, Clone)]
pub struct Participant {
    pub id: ParticipantId,
    pub username: String,
    pub joined_at: Instant,
    outbound: mpsc::UnboundedSender<ServerMessage>,
}

impl Participant {
    pub fn new(
        id: ParticipantId,
        username: String,
        outbound: mpsc::UnboundedSender<ServerMessage>,
    ) -> Self {
        Self {
            id,
            username,
            joined_at: Instant::now(),
            outbound,
        }
    }

    /// Enqueue a message for this participant. Returns `Err` if the
    /// participant's channel has already closed; callers treat that as "mark
    /// for removal" rather than propagating a hard failure (§4.B).
    pub fn send(&self, message: ServerMessage) -> Result<(), ()> {
        self.outbound.send(message).map_err(|_| ())
    }
}
