//! Identity of a change.

use serde::{Deserialize, Serialize};

use crate::clock::{ActorId, TicketFactory, TimeTicket};

/// `(client_seq, lamport, actor)` plus the sequence a server assigned, if
/// any. The lamport value is shared by every ticket issued in the change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeId {
    pub client_seq: u32,
    pub lamport: u64,
    pub actor: ActorId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_seq: Option<u64>,
}

impl ChangeId {
    pub const INITIAL: ChangeId = ChangeId {
        client_seq: 0,
        lamport: 0,
        actor: ActorId::INITIAL,
        server_seq: None,
    };

    pub fn new(client_seq: u32, lamport: u64, actor: ActorId) -> Self {
        Self {
            client_seq,
            lamport,
            actor,
            server_seq: None,
        }
    }

    /// Id of the next local change.
    pub fn next(&self) -> ChangeId {
        ChangeId {
            client_seq: self.client_seq + 1,
            lamport: self.lamport + 1,
            actor: self.actor,
            server_seq: None,
        }
    }

    /// Moves the lamport clock past a change seen from another replica.
    pub fn sync_lamport(&self, other_lamport: u64) -> ChangeId {
        ChangeId {
            lamport: self.lamport.max(other_lamport),
            ..*self
        }
    }

    pub fn set_actor(&self, actor: ActorId) -> ChangeId {
        ChangeId { actor, ..*self }
    }

    pub fn set_server_seq(&self, server_seq: u64) -> ChangeId {
        ChangeId {
            server_seq: Some(server_seq),
            ..*self
        }
    }

    pub fn create_time_ticket(&self, delimiter: u32) -> TimeTicket {
        TimeTicket::new(self.lamport, delimiter, self.actor)
    }

    /// Factory issuing this change's tickets, starting at delimiter 1.
    pub fn ticket_factory(&self) -> TicketFactory {
        TicketFactory::new(self.lamport, self.actor, 0)
    }
}

impl Default for ChangeId {
    fn default() -> Self {
        Self::INITIAL
    }
}
