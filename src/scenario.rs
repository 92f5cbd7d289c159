//! Named scenarios. Each entry builds the full parameter set for a run.

use crate::action::{Action, Amount};
use crate::network::emission::InjectionPolicy;
use crate::network::NetworkParams;
use crate::participant::Participant;
use crate::pool::Pool;

pub struct Scenario {
    pub name: &'static str,
    pub description: &'static str,
    build: fn() -> NetworkParams,
}

impl Scenario {
    pub fn params(&self) -> NetworkParams {
        (self.build)()
    }
}

const SCENARIOS: &[Scenario] = &[
    Scenario {
        name: "first_block",
        description: "two pools, two accounts staking at block 1, pure global split",
        build: first_block,
    },
    Scenario {
        name: "template",
        description: "root plus one seeded subnet, a single 100 tao stake",
        build: template,
    },
    Scenario {
        name: "unbalanced",
        description: "three subnets, supply grows every block",
        build: unbalanced,
    },
];

pub fn all() -> &'static [Scenario] {
    SCENARIOS
}

pub fn names() -> Vec<&'static str> {
    SCENARIOS.iter().map(|s| s.name).collect()
}

pub fn find(name: &str) -> Option<&'static Scenario> {
    SCENARIOS.iter().find(|s| s.name == name)
}

pub fn first_block() -> NetworkParams {
    NetworkParams {
        pools: vec![Pool::root(0, 0.0, 0.0, 0.0), Pool::new(1, 1.0, 1.0, 0.0)],
        participants: vec![
            Participant::new(1, 100.0, &[0, 1]),
            Participant::new(2, 100.0, &[1]),
        ],
        actions: vec![
            Action::stake(1, 1, 0, Amount::Absolute(100.0)),
            Action::stake(1, 2, 1, Amount::Absolute(100.0)),
        ],
        tao_supply: 200.0,
        global_split: 1.0,
        balanced: true,
        root_weight: 0.5,
        total_blocks: 7200,
        n_steps: 7200,
        injection_policy: InjectionPolicy::Threshold,
    }
}

pub fn template() -> NetworkParams {
    NetworkParams {
        pools: vec![Pool::root(0, 1000.0, 1000.0, 0.0), Pool::new(1, 500.0, 500.0, 0.0)],
        participants: vec![Participant::new(0, 1000.0, &[0, 1])],
        actions: vec![Action::stake(1, 0, 1, Amount::Absolute(100.0))],
        tao_supply: 10_000.0,
        global_split: 0.5,
        balanced: true,
        root_weight: 1.0,
        total_blocks: 100,
        n_steps: 10,
        injection_policy: InjectionPolicy::Threshold,
    }
}

pub fn unbalanced() -> NetworkParams {
    NetworkParams {
        pools: vec![
            Pool::root(0, 0.0, 0.0, 0.0),
            Pool::new(1, 100.0, 100.0, 0.0),
            Pool::new(2, 200.0, 100.0, 0.0),
            Pool::new(3, 50.0, 100.0, 0.0),
        ],
        participants: vec![
            Participant::new(1, 500.0, &[0, 1, 2, 3]),
            Participant::new(2, 300.0, &[2, 3]),
        ],
        actions: vec![
            Action::stake(1, 1, 1, Amount::Absolute(100.0)),
            Action::stake(1, 1, 0, Amount::Absolute(50.0)),
            Action::stake(2, 1, 2, Amount::Percentage(50.0)),
            Action::stake(5, 2, 3, Amount::All),
            Action::unstake(50, 2, 3, Amount::Percentage(50.0)),
        ],
        tao_supply: 1000.0,
        global_split: 0.5,
        balanced: false,
        root_weight: 1.0,
        total_blocks: 200,
        n_steps: 20,
        injection_policy: InjectionPolicy::Threshold,
    }
}
