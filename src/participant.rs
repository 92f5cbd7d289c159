use std::collections::{BTreeMap, BTreeSet};

use crate::pool::{Pool, PoolId};

pub type ParticipantId = u32;

/// An account holding free tao and alpha stakes across pools.
#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    pub id: ParticipantId,
    pub free_balance: f64,
    /// Pools this account accrues dividends in
    pub registered_pools: BTreeSet<PoolId>,
    /// Alpha staked per pool. A present key marks the account as a staker,
    /// even when the amount has gone back to zero.
    pub alpha_stakes: BTreeMap<PoolId, f64>,
}

impl Participant {
    pub fn new(id: ParticipantId, free_balance: f64, registered: &[PoolId]) -> Self {
        Self {
            id,
            free_balance,
            registered_pools: registered.iter().copied().collect(),
            alpha_stakes: BTreeMap::new(),
        }
    }

    pub fn with_stake(mut self, pool_id: PoolId, alpha: f64) -> Self {
        self.alpha_stakes.insert(pool_id, alpha);
        self
    }

    pub fn stake_in(&self, pool_id: PoolId) -> f64 {
        self.alpha_stakes.get(&pool_id).copied().unwrap_or(0.0)
    }

    pub fn has_stake_entry(&self, pool_id: PoolId) -> bool {
        self.alpha_stakes.contains_key(&pool_id)
    }

    pub fn is_registered(&self, pool_id: PoolId) -> bool {
        self.registered_pools.contains(&pool_id)
    }

    pub fn credit_stake(&mut self, pool_id: PoolId, alpha: f64) {
        *self.alpha_stakes.entry(pool_id).or_insert(0.0) += alpha;
    }

    pub fn debit_stake(&mut self, pool_id: PoolId, alpha: f64) {
        *self.alpha_stakes.entry(pool_id).or_insert(0.0) -= alpha;
    }

    /// Free balance plus every positive stake marked to market: root stakes
    /// at par, subnet stakes at the tao they would fetch if sold now.
    pub fn market_value(&self, pools: &BTreeMap<PoolId, Pool>) -> f64 {
        let staked: f64 = pools
            .values()
            .filter_map(|pool| {
                let stake = self.stake_in(pool.id);
                if stake > 0.0 {
                    Some(pool.unstake_quote(stake))
                } else {
                    None
                }
            })
            .sum();
        self.free_balance + staked
    }
}
