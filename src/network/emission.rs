//! Per-block emission: how new tao is split across subnets, how the root
//! weight decays, and which reserves a pool's injection lands in.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::pool::{Pool, PoolId};

/// New tao minted per block.
pub const EMISSION_PER_BLOCK: f64 = 1.0;

/// Sum of alpha prices at which the network counts as balanced.
pub const PRICE_PARITY: f64 = 1.0;

/// Share of emission per non-root pool, proportional to its tao reserve.
pub fn emission_shares(pools: &BTreeMap<PoolId, Pool>) -> BTreeMap<PoolId, f64> {
    let total: f64 = pools.values().filter(|p| !p.is_root).map(|p| p.tao_in).sum();
    pools
        .values()
        .filter(|p| !p.is_root)
        .map(|p| {
            let share = if total != 0.0 { p.tao_in / total } else { 0.0 };
            (p.id, share)
        })
        .collect()
}

/// Sum of alpha prices over non-root pools.
pub fn sum_prices(pools: &BTreeMap<PoolId, Pool>) -> f64 {
    pools.values().filter(|p| !p.is_root).map(|p| p.price()).sum()
}

/// Linear decay from `initial` at block 0 toward zero at `blocks`, clamped at zero.
pub fn decayed_root_weight(initial: f64, block: u64, blocks: u64) -> f64 {
    if blocks == 0 {
        return initial.max(0.0);
    }
    let per_block = initial / blocks as f64;
    (initial - block as f64 * per_block).max(0.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Injection {
    pub tao: f64,
    pub alpha: f64,
}

/// Decides supply growth and per-pool injection from the price sum.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InjectionPolicy {
    /// Two bands split at price parity: tao below it (or when unbalanced),
    /// alpha at or above it.
    #[default]
    Threshold,
    /// Three bands: tao below `min`, alpha above `max`, both in between.
    /// Unbalanced networks always take the tao band.
    Range { min: f64, max: f64 },
}

impl InjectionPolicy {
    fn below(&self, sum_prices: f64, balanced: bool) -> bool {
        let floor = match *self {
            InjectionPolicy::Threshold => PRICE_PARITY,
            InjectionPolicy::Range { min, .. } => min,
        };
        sum_prices < floor || !balanced
    }

    /// Whether `tao_supply` grows by the block emission.
    pub fn grows_supply(&self, sum_prices: f64, balanced: bool) -> bool {
        self.below(sum_prices, balanced)
    }

    pub fn plan(&self, sum_prices: f64, balanced: bool, share: f64, emission: f64) -> Injection {
        let tao_band = Injection { tao: share * emission, alpha: 0.0 };
        if self.below(sum_prices, balanced) {
            return tao_band;
        }
        match *self {
            InjectionPolicy::Threshold => Injection { tao: 0.0, alpha: emission },
            InjectionPolicy::Range { max, .. } => {
                if sum_prices > max {
                    Injection { tao: 0.0, alpha: emission }
                } else {
                    Injection { tao: share * emission, alpha: emission }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_map(pools: Vec<Pool>) -> BTreeMap<PoolId, Pool> {
        pools.into_iter().map(|p| (p.id, p)).collect()
    }

    #[test]
    fn test_emission_shares_proportional() {
        let pools = pool_map(vec![
            Pool::root(0, 9999.0, 0.0, 0.0),
            Pool::new(1, 500.0, 100.0, 0.0),
            Pool::new(2, 1500.0, 100.0, 0.0),
        ]);
        let shares = emission_shares(&pools);
        assert_eq!(shares.len(), 2);
        assert!((shares[&1] - 0.25).abs() < 1e-12);
        assert!((shares[&2] - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_emission_shares_zero_total() {
        let pools = pool_map(vec![Pool::root(0, 0.0, 0.0, 0.0), Pool::new(1, 0.0, 0.0, 0.0)]);
        let shares = emission_shares(&pools);
        assert_eq!(shares[&1], 0.0);
    }

    #[test]
    fn test_root_weight_decay() {
        assert_eq!(decayed_root_weight(0.5, 0, 100), 0.5);
        let last = decayed_root_weight(0.5, 99, 100);
        assert!(last >= 0.0 && last < 0.5);
        assert_eq!(decayed_root_weight(0.5, 100, 100), 0.0);
        assert_eq!(decayed_root_weight(0.5, 250, 100), 0.0);
        assert_eq!(decayed_root_weight(0.0, 10, 100), 0.0);
    }

    #[test]
    fn test_threshold_policy_bands() {
        let policy = InjectionPolicy::Threshold;
        assert!(policy.grows_supply(0.5, true));
        assert!(!policy.grows_supply(1.0, true));
        assert!(policy.grows_supply(5.0, false));

        assert_eq!(policy.plan(0.5, true, 0.25, 1.0), Injection { tao: 0.25, alpha: 0.0 });
        assert_eq!(policy.plan(1.0, true, 0.25, 1.0), Injection { tao: 0.0, alpha: 1.0 });
        assert_eq!(policy.plan(3.0, false, 0.25, 1.0), Injection { tao: 0.25, alpha: 0.0 });
    }

    #[test]
    fn test_range_policy_bands() {
        let policy = InjectionPolicy::Range { min: 0.8, max: 1.2 };
        assert_eq!(policy.plan(0.5, true, 0.5, 1.0), Injection { tao: 0.5, alpha: 0.0 });
        assert_eq!(policy.plan(1.0, true, 0.5, 1.0), Injection { tao: 0.5, alpha: 1.0 });
        assert_eq!(policy.plan(1.5, true, 0.5, 1.0), Injection { tao: 0.0, alpha: 1.0 });
        assert!(!policy.grows_supply(1.0, true));
        assert!(policy.grows_supply(1.0, false));
    }
}
