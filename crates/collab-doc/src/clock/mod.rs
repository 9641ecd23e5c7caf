//! Logical clock types.
//!
//! Every element, every text or tree fragment and every operation is stamped
//! with a [`TimeTicket`]. Tickets are totally ordered so that concurrent
//! writes can be resolved identically on every replica.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::DocError;

// ── ActorId ────────────────────────────────────────────────────────────────

/// Identifier of a replica, 12 bytes rendered as 24 lowercase hex chars.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ActorId([u8; 12]);

impl ActorId {
    /// Actor of the initial ticket, also used before a replica is attached.
    pub const INITIAL: ActorId = ActorId([0; 12]);
    pub const MAX: ActorId = ActorId([0xff; 12]);

    pub const fn new(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    pub fn random() -> Self {
        let mut bytes = [0u8; 12];
        rand::thread_rng().fill(&mut bytes[..]);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }

    pub fn from_hex(hex: &str) -> Result<Self, DocError> {
        if hex.len() != 24 || !hex.is_ascii() {
            return Err(DocError::InvalidArgument(format!("invalid actor id: {hex:?}")));
        }
        let mut bytes = [0u8; 12];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|_| DocError::InvalidArgument(format!("invalid actor id: {hex:?}")))?;
        }
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActorId({})", self.to_hex())
    }
}

impl From<ActorId> for String {
    fn from(actor: ActorId) -> Self {
        actor.to_hex()
    }
}

impl TryFrom<String> for ActorId {
    type Error = DocError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ActorId::from_hex(&value)
    }
}

// ── TimeTicket ─────────────────────────────────────────────────────────────

/// A logical timestamp `(lamport, actor, delimiter)`.
///
/// Ordering compares lamport first, then actor, then delimiter. The
/// delimiter distinguishes tickets issued within one change.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct TimeTicket {
    lamport: u64,
    delimiter: u32,
    actor: ActorId,
}

impl TimeTicket {
    pub const INITIAL: TimeTicket = TimeTicket::new(0, 0, ActorId::INITIAL);
    pub const MAX: TimeTicket = TimeTicket::new(u64::MAX, u32::MAX, ActorId::MAX);

    pub const fn new(lamport: u64, delimiter: u32, actor: ActorId) -> Self {
        Self {
            lamport,
            delimiter,
            actor,
        }
    }

    pub fn lamport(&self) -> u64 {
        self.lamport
    }

    pub fn delimiter(&self) -> u32 {
        self.delimiter
    }

    pub fn actor(&self) -> ActorId {
        self.actor
    }

    /// Strictly later than `other`.
    #[inline]
    pub fn after(&self, other: &TimeTicket) -> bool {
        self > other
    }

    /// `lamport:actor:delimiter`, unique per ticket.
    pub fn to_id_string(&self) -> String {
        format!("{}:{}:{}", self.lamport, self.actor, self.delimiter)
    }
}

impl Ord for TimeTicket {
    fn cmp(&self, other: &Self) -> Ordering {
        self.lamport
            .cmp(&other.lamport)
            .then_with(|| self.actor.cmp(&other.actor))
            .then_with(|| self.delimiter.cmp(&other.delimiter))
    }
}

impl PartialOrd for TimeTicket {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for TimeTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.lamport, self.actor, self.delimiter)
    }
}

impl fmt::Debug for TimeTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form: lamport, last four actor bytes, delimiter.
        let hex = self.actor.to_hex();
        write!(f, "{}:..{}:{}", self.lamport, &hex[hex.len() - 4..], self.delimiter)
    }
}

impl FromStr for TimeTicket {
    type Err = DocError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DocError::InvalidArgument(format!("invalid time ticket: {s:?}"));
        let mut parts = s.split(':');
        let (Some(lamport), Some(actor), Some(delimiter), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        Ok(TimeTicket::new(
            lamport.parse().map_err(|_| invalid())?,
            delimiter.parse().map_err(|_| invalid())?,
            ActorId::from_hex(actor)?,
        ))
    }
}

impl From<TimeTicket> for String {
    fn from(ticket: TimeTicket) -> Self {
        ticket.to_id_string()
    }
}

impl TryFrom<String> for TimeTicket {
    type Error = DocError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// ── TicketFactory ──────────────────────────────────────────────────────────

/// Issues tickets sharing one lamport value with increasing delimiters.
///
/// Owned by the execution context of a single change, so ticket issuance
/// never depends on shared global state.
#[derive(Debug, Clone)]
pub struct TicketFactory {
    lamport: u64,
    actor: ActorId,
    delimiter: u32,
}

impl TicketFactory {
    /// The first ticket issued has delimiter `delimiter + 1`.
    pub fn new(lamport: u64, actor: ActorId, delimiter: u32) -> Self {
        Self {
            lamport,
            actor,
            delimiter,
        }
    }

    /// Continues right after `ticket`.
    pub fn after(ticket: &TimeTicket) -> Self {
        Self::new(ticket.lamport, ticket.actor, ticket.delimiter)
    }

    pub fn issue(&mut self) -> TimeTicket {
        self.delimiter += 1;
        TimeTicket::new(self.lamport, self.delimiter, self.actor)
    }

    /// Reserves `count` delimiters that were consumed by a deterministic
    /// sub-factory (see tree splits).
    pub fn skip(&mut self, count: u32) {
        self.delimiter += count;
    }

    pub fn last_delimiter(&self) -> u32 {
        self.delimiter
    }

    pub fn lamport(&self) -> u64 {
        self.lamport
    }

    pub fn actor(&self) -> ActorId {
        self.actor
    }
}
