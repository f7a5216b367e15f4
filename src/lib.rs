//! A distributed coordination engine in which N peer processes share D
//! exclusive "house" resources and a pool of P interchangeable "paser"
//! units, using two instances of a Ricart-Agrawala mutual-exclusion
//! protocol driven by a single Lamport clock.
//!
//! See [`coordinator`] for the protocol core, [`process`] for the
//! per-process state machine that drives it, and [`driver`] for the
//! concurrent receive/tick loop that ties a process to its transport.

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod driver;
pub mod error;
pub mod message;
pub mod net;
pub mod process;
