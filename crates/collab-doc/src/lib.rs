//! collab-doc: a replicated document model.
//!
//! Replicas of a JSON-like document are edited independently, offline or
//! concurrently, and converge once they have seen the same set of changes
//! in any order. Containers are CRDTs (`crdt`), mutations are operations
//! grouped into changes (`operation`, `change`), and [`Document`] ties them
//! together with a clock, presences and local undo/redo.

pub mod clock;
pub mod error;

pub mod crdt;
pub mod operation;

pub mod change;
pub mod document;

pub use change::{Change, ChangeContext, ChangeId, ElementInit, Presence, PresenceChange};
pub use clock::{ActorId, TicketFactory, TimeTicket};
pub use crdt::tree::TreeNodeSpec;
pub use crdt::{CrdtElement, CrdtRoot};
pub use document::{Document, DocumentOptions, DocumentSnapshot, Schema, ValueType};
pub use error::DocError;
pub use operation::{OpInfo, OpSource, Operation};
