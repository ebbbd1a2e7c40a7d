//! Per-round consensus configuration supplied by governance.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Consensus parameters for one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Number of parallel chains in the lattice.
    pub num_chains: u32,
    /// Notary set size sampled per chain.
    pub notary_set_size: u32,
    /// DKG set size sampled per round.
    pub dkg_set_size: u32,
    /// Total-ordering ack-count slack.
    pub k: u32,
    /// Total-ordering chain-coverage ratio, in (0.5, 1].
    pub phi_ratio: f32,
    /// Tick interval of the Byzantine Agreement clock.
    pub lambda_ba: Duration,
    /// Wall-clock duration of one round.
    pub round_interval: Duration,
    /// Minimum spacing between consecutive blocks on a chain.
    pub min_block_interval: Duration,
    /// Maximum spacing between consecutive blocks on a chain.
    pub max_block_interval: Duration,
}

impl Config {
    /// Canonical encoding used inside the round-anchor hash.
    ///
    /// Durations are encoded as big-endian nanosecond counts; `phi_ratio` as
    /// its IEEE-754 bit pattern.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        out.extend_from_slice(&self.num_chains.to_be_bytes());
        out.extend_from_slice(&self.notary_set_size.to_be_bytes());
        out.extend_from_slice(&self.dkg_set_size.to_be_bytes());
        out.extend_from_slice(&self.k.to_be_bytes());
        out.extend_from_slice(&self.phi_ratio.to_bits().to_be_bytes());
        out.extend_from_slice(&(self.lambda_ba.as_nanos() as u64).to_be_bytes());
        out.extend_from_slice(&(self.round_interval.as_nanos() as u64).to_be_bytes());
        out.extend_from_slice(&(self.min_block_interval.as_nanos() as u64).to_be_bytes());
        out.extend_from_slice(&(self.max_block_interval.as_nanos() as u64).to_be_bytes());
        out
    }

    /// Total-ordering chain threshold derived from `phi_ratio`:
    /// `⌊(num_chains − 1)·φ⌋ + 1`.
    pub fn phi(&self) -> u64 {
        ((self.num_chains.saturating_sub(1)) as f32 * self.phi_ratio) as u64 + 1
    }

    /// DKG/TSIG threshold `t = ⌊dkg_set_size/3⌋ + 1`.
    pub fn dkg_threshold(&self) -> usize {
        (self.dkg_set_size as usize) / 3 + 1
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_chains: 4,
            notary_set_size: 7,
            dkg_set_size: 7,
            k: 0,
            phi_ratio: 0.667,
            lambda_ba: Duration::from_millis(250),
            round_interval: Duration::from_secs(60),
            min_block_interval: Duration::from_millis(100),
            max_block_interval: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phi_threshold() {
        let config = Config {
            num_chains: 4,
            phi_ratio: 0.667,
            ..Default::default()
        };
        assert_eq!(config.phi(), 3);

        let config = Config {
            num_chains: 1,
            ..Default::default()
        };
        assert_eq!(config.phi(), 1);
    }

    #[test]
    fn test_dkg_threshold() {
        let config = Config {
            dkg_set_size: 7,
            ..Default::default()
        };
        assert_eq!(config.dkg_threshold(), 3);
    }

    #[test]
    fn test_canonical_bytes_change_with_fields() {
        let a = Config::default();
        let mut b = Config::default();
        b.num_chains += 1;
        assert_ne!(a.to_bytes(), b.to_bytes());
    }
}
