//! Dividend shares: a blend of each participant's network-wide weight and
//! its weight inside the paying pool.
//!
//! All maps here are rebuilt from current reserves on every call; reserves
//! move every block so nothing is cached.

use std::collections::BTreeMap;

use crate::participant::{Participant, ParticipantId};
use crate::pool::{Pool, PoolId};

/// Network-wide weight per participant: root stakes scaled by `root_weight`,
/// subnet stakes valued at their pro-rata share of the tao reserve.
pub fn global_weights(
    pools: &BTreeMap<PoolId, Pool>,
    participants: &BTreeMap<ParticipantId, Participant>,
    root_weight: f64,
) -> BTreeMap<ParticipantId, f64> {
    let mut weights: BTreeMap<ParticipantId, f64> = BTreeMap::new();
    for pool in pools.values() {
        for participant in participants.values() {
            let Some(&alpha) = participant.alpha_stakes.get(&pool.id) else {
                continue;
            };
            let scaled = if pool.is_root { alpha * root_weight } else { alpha };
            *weights.entry(participant.id).or_insert(0.0) += pool.weight(scaled);
        }
    }
    weights
}

/// Weight of each staker inside one pool.
pub fn local_weights(
    pool: &Pool,
    participants: &BTreeMap<ParticipantId, Participant>,
) -> BTreeMap<ParticipantId, f64> {
    participants
        .values()
        .filter_map(|p| p.alpha_stakes.get(&pool.id).map(|&alpha| (p.id, pool.weight(alpha))))
        .collect()
}

/// Normalised dividend share of every participant in `pool_id`.
///
/// `share = split * global/Σglobal + (1 - split) * local/Σlocal`, with a term
/// dropping to zero when its denominator is zero. Participants without any
/// stake still get an entry (possibly zero). Unknown pools yield an empty map.
pub fn dividend_shares(
    pool_id: PoolId,
    pools: &BTreeMap<PoolId, Pool>,
    participants: &BTreeMap<ParticipantId, Participant>,
    root_weight: f64,
    global_split: f64,
) -> BTreeMap<ParticipantId, f64> {
    let Some(pool) = pools.get(&pool_id) else {
        return BTreeMap::new();
    };

    let global = global_weights(pools, participants, root_weight);
    let local = local_weights(pool, participants);
    let total_global: f64 = global.values().sum();
    let total_local: f64 = local.values().sum();

    participants
        .keys()
        .map(|id| {
            let g = if total_global != 0.0 {
                global.get(id).copied().unwrap_or(0.0) / total_global
            } else {
                0.0
            };
            let l = if total_local != 0.0 {
                local.get(id).copied().unwrap_or(0.0) / total_local
            } else {
                0.0
            };
            (*id, global_split * g + (1.0 - global_split) * l)
        })
        .collect()
}
