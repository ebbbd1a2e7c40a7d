//! Capability traits consumed by the consensus engine.
//!
//! - **Governance**: node-set membership, per-round configuration, CRS and
//!   the DKG registry (an external contract in production).
//! - **Network**: broadcast/direct-send of consensus messages and the
//!   inbound message stream.
//! - **Application**: payload preparation and delivery callbacks.
//! - **Storage**: the block database behind the compaction chain.

mod application;
mod governance;
mod network;
mod storage;

pub use application::*;
pub use governance::*;
pub use network::*;
pub use storage::*;
