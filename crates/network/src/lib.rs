//! Transport interface boundary for the consensus core.
//!
//! Defines the [`Sender`] and [`PeerConnector`] traits implemented by the
//! real p2p transport, plus an in-memory backend used by tests and
//! simulation. Consensus treats delivery as best-effort and unordered;
//! loss is covered by round timeouts.

mod memory;
mod traits;

pub use memory::{MemoryNetwork, MemorySender};
pub use traits::{InboundMsg, PeerConnector, PeerInfo, Sender};
