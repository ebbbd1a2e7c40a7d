//! # Lattice Core
//!
//! Capability traits and shared infrastructure for the Lattice consensus
//! engine.
//!
//! The engine never talks to concrete collaborators: governance, the
//! network, the application and block storage are all injected at
//! construction behind the traits defined here. This keeps the consensus
//! crate testable against mocks and lets deployments swap transports and
//! storage backends without touching protocol code.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod blockdb;
pub mod traits;

pub use blockdb::MemoryBlockDatabase;
pub use traits::*;
