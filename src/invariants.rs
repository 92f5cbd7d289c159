use std::fmt;

use crate::network::Network;
use crate::participant::{Participant, ParticipantId};
use crate::pool::{Pool, PoolId};

/// Relative tolerance for `tao_in * alpha_in == k`.
pub const K_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub struct InvariantViolation {
    pub msg: String,
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg)
    }
}

impl std::error::Error for InvariantViolation {}

fn violation(msg: impl Into<String>) -> InvariantViolation {
    InvariantViolation { msg: msg.into() }
}

pub fn assert_pool_invariants(pool: &Pool) -> Result<(), InvariantViolation> {
    if pool.tao_in.is_nan() || pool.alpha_in.is_nan() || pool.alpha_out.is_nan() || pool.k.is_nan() {
        return Err(violation("NaN in pool reserves"));
    }
    if pool.tao_in < 0.0 || pool.alpha_in < 0.0 {
        return Err(violation(format!(
            "negative reserves tao_in={} alpha_in={}",
            pool.tao_in, pool.alpha_in
        )));
    }
    if pool.is_root {
        if pool.k != 0.0 {
            return Err(violation("root pool carries a non-zero k"));
        }
        return Ok(());
    }
    let product = pool.tao_in * pool.alpha_in;
    let scale = pool.k.abs().max(f64::MIN_POSITIVE);
    if (product - pool.k).abs() / scale > K_TOLERANCE && pool.k != 0.0 {
        return Err(violation(format!("tao_in * alpha_in = {} drifted from k = {}", product, pool.k)));
    }
    Ok(())
}

pub fn assert_participant_invariants(participant: &Participant) -> Result<(), InvariantViolation> {
    if participant.free_balance.is_nan() {
        return Err(violation("NaN free balance"));
    }
    if participant.free_balance < 0.0 {
        return Err(violation(format!("negative free balance {}", participant.free_balance)));
    }
    if let Some((pool_id, _)) = participant.alpha_stakes.iter().find(|(_, v)| v.is_nan()) {
        return Err(violation(format!("NaN stake in pool {}", pool_id)));
    }
    Ok(())
}

/// Every pool-level violation in the network, by pool id.
pub fn check_network(network: &Network) -> Vec<(PoolId, InvariantViolation)> {
    network
        .pools()
        .values()
        .filter_map(|pool| assert_pool_invariants(pool).err().map(|v| (pool.id, v)))
        .collect()
}

/// Every participant-level violation, by participant id.
pub fn check_participants(network: &Network) -> Vec<(ParticipantId, InvariantViolation)> {
    network
        .participants()
        .values()
        .filter_map(|p| assert_participant_invariants(p).err().map(|v| (p.id, v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_pools_hold() {
        assert!(assert_pool_invariants(&Pool::new(1, 3.0, 4.0, 0.0)).is_ok());
        assert!(assert_pool_invariants(&Pool::root(0, 0.0, 0.0, 5.0)).is_ok());
    }

    #[test]
    fn test_drifted_k_detected() {
        let mut pool = Pool::new(1, 3.0, 4.0, 0.0);
        pool.tao_in = 3.5;
        assert!(assert_pool_invariants(&pool).is_err());
    }

    #[test]
    fn test_negative_reserve_detected() {
        let mut pool = Pool::new(1, 3.0, 4.0, 0.0);
        pool.alpha_in = -1.0;
        pool.k = pool.tao_in * pool.alpha_in;
        assert!(assert_pool_invariants(&pool).is_err());
    }

    #[test]
    fn test_participant_checks() {
        let mut p = Participant::new(1, 5.0, &[1]);
        assert!(assert_participant_invariants(&p).is_ok());
        p.free_balance = -0.1;
        assert!(assert_participant_invariants(&p).is_err());
        p.free_balance = 1.0;
        p.alpha_stakes.insert(1, f64::NAN);
        assert!(assert_participant_invariants(&p).is_err());
    }
}
