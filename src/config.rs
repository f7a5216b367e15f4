//! Startup configuration: peer count, resource counts, this process's
//! identity, the peer address table, and the driver's timing knobs.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

use crate::error::ConfigError;

pub const N_PROCESSES_DEFAULT: i64 = 5;
pub const D_HOUSES_DEFAULT: i64 = 3;
pub const P_PASERS_DEFAULT: i64 = 2;

const DEFAULT_TICK_MILLIS: u64 = 50;
const DEFAULT_WATCHDOG_SECS: u64 = 600;

#[derive(Debug, Clone, Parser)]
#[command(name = "paser-mutex", about = "Ricart-Agrawala house/paser coordinator")]
pub struct Args {
    /// This process's 1-based identity, in [1..N].
    #[arg(long)]
    pub id: i64,

    /// Socket address of every peer, ordered by rank (rank = id - 1). Must
    /// contain exactly N entries; this process's own entry is the one it
    /// binds its listener to.
    #[arg(long = "peer", required = true, num_args = 1..)]
    pub peers: Vec<SocketAddr>,

    /// Number of distinguishable houses (D).
    #[arg(long, default_value_t = D_HOUSES_DEFAULT)]
    pub houses: i64,

    /// Number of interchangeable paser units (P).
    #[arg(long, default_value_t = P_PASERS_DEFAULT)]
    pub pasers: i64,

    /// Ticker cadence in milliseconds.
    #[arg(long, default_value_t = DEFAULT_TICK_MILLIS)]
    pub tick_millis: u64,

    /// Wall-clock watchdog budget in seconds.
    #[arg(long, default_value_t = DEFAULT_WATCHDOG_SECS)]
    pub watchdog_secs: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub id: i64,
    pub peers: Vec<SocketAddr>,
    pub houses: i64,
    pub pasers: i64,
    pub tick_interval: Duration,
    pub watchdog: Duration,
}

impl Config {
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        let n = args.peers.len() as i64;
        if n < 1 {
            return Err(ConfigError::TooFewPeers(n));
        }
        if args.id < 1 || args.id > n {
            return Err(ConfigError::IdOutOfRange { id: args.id, n });
        }
        Ok(Self {
            id: args.id,
            peers: args.peers,
            houses: args.houses,
            pasers: args.pasers,
            tick_interval: Duration::from_millis(args.tick_millis),
            watchdog: Duration::from_secs(args.watchdog_secs),
        })
    }

    pub fn n(&self) -> i64 {
        self.peers.len() as i64
    }

    pub fn rank(&self) -> usize {
        (self.id - 1) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(id: i64, n: usize) -> Args {
        Args {
            id,
            peers: (0..n)
                .map(|i| SocketAddr::from(([127, 0, 0, 1], 4000 + i as u16)))
                .collect(),
            houses: D_HOUSES_DEFAULT,
            pasers: P_PASERS_DEFAULT,
            tick_millis: DEFAULT_TICK_MILLIS,
            watchdog_secs: DEFAULT_WATCHDOG_SECS,
        }
    }

    #[test]
    fn rejects_id_out_of_range() {
        assert_eq!(
            Config::from_args(args(6, 5)).unwrap_err(),
            ConfigError::IdOutOfRange { id: 6, n: 5 }
        );
    }

    #[test]
    fn accepts_single_process() {
        let config = Config::from_args(args(1, 1)).unwrap();
        assert_eq!(config.n(), 1);
        assert_eq!(config.rank(), 0);
    }
}
